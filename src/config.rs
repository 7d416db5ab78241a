//! Run-level configuration.
//!
//! A [`RunContext`] is built once per process and passed by `Arc` into every
//! component, so path layout and the run timestamp never come from globals.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Local};

/// Default number of devices contacted concurrently within one job.
pub const DEFAULT_DEVICE_WORKERS: usize = 16;

/// Default number of jobs run concurrently within one batch.
pub const DEFAULT_JOB_WORKERS: usize = 8;

/// Prefix of every failed command value in the JSON result.
pub const ERROR_MARKER: &str = "Error: ";

/// Timestamp format used in output paths.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Immutable per-run context: directory layout and run start time.
#[derive(Debug, Clone)]
pub struct RunContext {
    config_dir: PathBuf,
    cmd_dir: PathBuf,
    output_dir: PathBuf,
    log_dir: PathBuf,
    started_at: DateTime<Local>,
}

impl RunContext {
    /// Standard layout under `base_dir`: `config/`, `cmd/`, `output/` and `log/`.
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self::at(base_dir, Local::now())
    }

    /// Same as [`RunContext::new`] with a fixed start time.
    pub fn at(base_dir: impl AsRef<Path>, started_at: DateTime<Local>) -> Self {
        let base = base_dir.as_ref();
        Self {
            config_dir: base.join("config"),
            cmd_dir: base.join("cmd"),
            output_dir: base.join("output"),
            log_dir: base.join("log"),
            started_at,
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn cmd_dir(&self) -> &Path {
        &self.cmd_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Per-run log file, e.g. `log/batch_nightly_20250627_145400.log`.
    pub fn log_file(&self, prefix: &str) -> PathBuf {
        self.log_dir.join(format!("{prefix}_{}.log", self.timestamp()))
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// Run timestamp as used in output paths, e.g. `20250627_145400`.
    pub fn timestamp(&self) -> String {
        self.started_at.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Resolves a device-set or batch file reference. Absolute paths are kept.
    pub fn resolve_config(&self, reference: impl AsRef<Path>) -> PathBuf {
        self.config_dir.join(reference)
    }

    /// Resolves a command file reference. Absolute paths are kept.
    pub fn resolve_command_file(&self, reference: impl AsRef<Path>) -> PathBuf {
        self.cmd_dir.join(reference)
    }
}

/// Placement of job outputs under the output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputLayout {
    /// One directory per run: `output/<timestamp>/<job>.json`.
    #[default]
    Grouped,
    /// Timestamp in the file name: `output/<job>_<timestamp>.json`.
    Suffixed,
}

impl FromStr for OutputLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "grouped" | "option1" => Ok(OutputLayout::Grouped),
            "suffixed" | "option2" => Ok(OutputLayout::Suffixed),
            other => Err(format!(
                "unknown output structure '{other}', expected grouped|suffixed"
            )),
        }
    }
}

impl fmt::Display for OutputLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputLayout::Grouped => write!(f, "grouped"),
            OutputLayout::Suffixed => write!(f, "suffixed"),
        }
    }
}

/// Options shared by every job of a run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum devices in flight per job.
    pub device_workers: usize,
    /// Write the JSON result.
    pub save_json: bool,
    /// Write one text transcript per device.
    pub save_txt: bool,
    pub layout: OutputLayout,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            device_workers: DEFAULT_DEVICE_WORKERS,
            save_json: true,
            save_txt: false,
            layout: OutputLayout::Grouped,
        }
    }
}

/// Options of the batch coordinator.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Maximum jobs in flight.
    pub job_workers: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            job_workers: DEFAULT_JOB_WORKERS,
        }
    }
}
