//! Output placement and file writers for job reports.

use std::path::{Path, PathBuf};

use log::info;

use crate::config::{OutputLayout, RunContext};
use crate::error::OutputError;

/// Where one job writes its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub json: PathBuf,
    pub report: PathBuf,
    /// Directory holding per-device transcripts.
    pub transcripts: PathBuf,
}

impl OutputPaths {
    pub fn new(ctx: &RunContext, layout: OutputLayout, job: &str) -> Self {
        let ts = ctx.timestamp();
        let out = ctx.output_dir();
        match layout {
            OutputLayout::Grouped => {
                let run_dir = out.join(&ts);
                Self {
                    json: run_dir.join(format!("{job}.json")),
                    report: run_dir.join(format!("{job}_report.txt")),
                    transcripts: run_dir.join(job),
                }
            }
            OutputLayout::Suffixed => Self {
                json: out.join(format!("{job}_{ts}.json")),
                report: out.join(format!("{job}_report_{ts}.txt")),
                transcripts: out.join(format!("{job}_{ts}")),
            },
        }
    }

    /// Transcript path for one device.
    pub fn transcript(&self, hostname: &str) -> PathBuf {
        self.transcripts.join(format!("{}.txt", file_stem(hostname)))
    }
}

/// Keeps host names usable as file names.
fn file_stem(hostname: &str) -> String {
    hostname
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}

/// Writes `contents` to `path`, creating parent directories.
pub async fn write_file(path: &Path, contents: &str) -> Result<(), OutputError> {
    let io_err = |source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    tokio::fs::write(path, contents).await.map_err(io_err)?;
    info!("Saved {}", path.display());
    Ok(())
}
