//! Command files.
//!
//! A command file is newline-delimited text. Blank lines, `#` comments and
//! the session terminators `exit`/`quit` (any case) are dropped; the rest
//! runs in file order.

use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::ConfigError;

const TERMINATION_COMMANDS: &[&str] = &["exit", "quit"];

/// Normalized, immutable command sequence for a device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandList {
    source: PathBuf,
    commands: Vec<String>,
}

impl CommandList {
    /// Normalizes command file text. `source` is only used in log lines.
    pub fn parse(source: impl Into<PathBuf>, text: &str) -> Self {
        let source = source.into();
        let mut commands = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if TERMINATION_COMMANDS
                .iter()
                .any(|t| line.eq_ignore_ascii_case(t))
            {
                debug!(
                    "Skipped termination command '{}' in {}",
                    line,
                    source.display()
                );
                continue;
            }
            commands.push(line.to_string());
        }

        if commands.is_empty() {
            warn!("No valid commands found in {}", source.display());
        } else {
            debug!("Read {} commands from {}", commands.len(), source.display());
        }
        Self { source, commands }
    }

    /// Reads and normalizes a command file.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::parse(path, &text))
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl<'a> IntoIterator for &'a CommandList {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}
