//! Error types for device transport, run configuration and report output.
//!
//! Only [`ConfigError`] is allowed to abort a job. [`ConnectError`] values are
//! contained by the device worker and recorded in the device outcome, and
//! [`OutputError`] values are logged and listed in the job summary.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by a device transport.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The device rejected the supplied credentials.
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    /// Connection establishment did not finish within the connect timeout.
    #[error("connection timed out: {0}")]
    Timeout(String),

    /// Any other failure while opening the connection or the shell.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Device dialect autodetection could not identify the device.
    #[error("device type detection failed: {0}")]
    Detection(String),

    /// The device answered a command with an error.
    ///
    /// The error contains the output received for the command.
    #[error("command failed: {0}")]
    Exec(String),

    /// Command execution timed out.
    ///
    /// The error contains the partial output received before the timeout.
    #[error("exec command timeout: {0}")]
    ExecTimeout(String),

    /// The remote shell closed while a command was running.
    #[error("session closed by remote device")]
    SessionClosed,

    /// No dialect with this name exists in the catalog.
    #[error("unsupported device type {0}")]
    UnsupportedDeviceType(String),

    /// A dialect pattern failed to compile.
    #[error("invalid dialect definition: {0}")]
    InvalidDialect(String),

    /// The run was cancelled before the operation completed.
    #[error("run cancelled")]
    Cancelled,

    /// An error occurred in the async-ssh2-tokio library.
    #[error("async ssh2 error: {0}")]
    Ssh2Error(#[from] async_ssh2_tokio::Error),

    /// An error occurred in the russh library.
    #[error("russh error: {0}")]
    RusshError(#[from] russh::Error),
}

impl ConnectError {
    /// True for failures that prevented a session from being opened.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            ConnectError::AuthFailure(_)
                | ConnectError::Timeout(_)
                | ConnectError::Connect(_)
                | ConnectError::UnsupportedDeviceType(_)
                | ConnectError::InvalidDialect(_)
                | ConnectError::Ssh2Error(_)
                | ConnectError::RusshError(_)
        )
    }

    /// True when the session can no longer execute commands.
    ///
    /// A timed-out command may still print its tail and prompt later, which
    /// the next command would read as its own output.
    pub fn is_session_lost(&self) -> bool {
        matches!(
            self,
            ConnectError::SessionClosed
                | ConnectError::ExecTimeout(_)
                | ConnectError::RusshError(_)
                | ConnectError::Ssh2Error(_)
        )
    }
}

/// Fatal configuration errors. Any of these aborts the affected job before
/// a device is contacted.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("device set {0} does not exist")]
    MissingDeviceSet(PathBuf),

    #[error("batch file {0} does not exist")]
    MissingBatchFile(PathBuf),

    #[error("device set {path} missing required fields: {fields:?}")]
    MissingFields { path: PathBuf, fields: Vec<String> },

    #[error("device set {path} row {row}: field '{field}' is empty")]
    EmptyField {
        path: PathBuf,
        row: usize,
        field: &'static str,
    },

    #[error("invalid port '{value}' for device {ip}")]
    InvalidPort { ip: String, value: String },

    #[error("command file {path} for device {ip} does not exist")]
    MissingCommandFile { ip: String, path: PathBuf },

    #[error("device {ip} appears more than once in {path}")]
    DuplicateDevice { ip: String, path: PathBuf },

    #[error("no devices found in {0}")]
    EmptyDeviceSet(PathBuf),

    #[error("no device sets listed in {0}")]
    EmptyBatch(PathBuf),

    #[error("malformed device set {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Errors writing job results to their sinks.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode json result: {0}")]
    Json(#[from] serde_json::Error),
}
