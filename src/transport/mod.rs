//! Device transport capability.
//!
//! The orchestrator only talks to devices through [`DeviceTransport`] and the
//! [`DeviceSession`] it opens. [`SshTransport`] is the production
//! implementation over `async-ssh2-tokio`; tests drive the workers with
//! scripted in-memory transports instead.

use async_ssh2_tokio::client::{AuthMethod, Client};
use async_ssh2_tokio::{Config, ServerCheckMethod};
use log::{debug, trace, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use russh::keys::{Algorithm, EcdsaCurve, HashAlg};
use russh::{ChannelMsg, Preferred, cipher, compression, kex, mac};
use std::borrow::Cow;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver, Sender};

use crate::device::Device;
use crate::error::ConnectError;

pub mod dialect;
mod security;
mod ssh;

pub use dialect::{CompiledDialect, Dialect};
pub use security::{ConnectionSecurityOptions, SecurityLevel};
pub use ssh::{SshSession, SshTransport};

/// An open interactive session on one device.
///
/// Owned by exactly one worker and never shared across tasks.
pub trait DeviceSession: Send {
    /// Runs one command and returns its cleaned output.
    fn execute(&mut self, command: &str) -> impl Future<Output = Result<String, ConnectError>> + Send;

    /// Releases the session.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Connects to devices and identifies their dialect.
pub trait DeviceTransport: Send + Sync + 'static {
    type Session: DeviceSession;

    /// Identifies the dialect of a device whose type was not declared.
    fn detect(&self, device: &Device) -> impl Future<Output = Result<String, ConnectError>> + Send;

    /// Opens a session speaking `device_type`.
    fn connect(
        &self,
        device: &Device,
        device_type: &str,
    ) -> impl Future<Output = Result<Self::Session, ConnectError>> + Send;
}
