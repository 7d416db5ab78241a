//! Per-device state machine.
//!
//! ```text
//! Init -> [Detecting] -> Connecting -> Executing(loop) -> Done
//!             |               |
//!       DetectionFailed  ConnectionFailed
//! ```
//!
//! A [`DeviceWorker`] never fails past its boundary: every transport error is
//! captured into the returned [`DeviceOutcome`].

use std::borrow::Cow;
use std::sync::Arc;

use log::{debug, error, info, warn};
use serde::ser::{Serialize, SerializeMap, Serializer};
use tokio_util::sync::CancellationToken;

use crate::command::CommandList;
use crate::config::ERROR_MARKER;
use crate::device::{DeclaredType, Device, DeviceTypeResolution};
use crate::error::ConnectError;
use crate::transport::{DeviceSession, DeviceTransport};

/// Result of one attempted command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    Output(String),
    /// Error description, without the error marker.
    Failed(String),
}

impl CommandResult {
    pub fn is_failed(&self) -> bool {
        matches!(self, CommandResult::Failed(_))
    }

    /// Value as written to the JSON result. Failures carry [`ERROR_MARKER`].
    pub fn rendered(&self) -> Cow<'_, str> {
        match self {
            CommandResult::Output(text) => Cow::Borrowed(text),
            CommandResult::Failed(detail) => Cow::Owned(format!("{ERROR_MARKER}{detail}")),
        }
    }
}

impl Serialize for CommandResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.rendered())
    }
}

/// Command string to result, in first-execution order.
///
/// Each command appears at most once. Recording a command again replaces its
/// result in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    entries: Vec<(String, CommandResult)>,
}

impl CommandOutcome {
    pub fn record(&mut self, command: &str, result: CommandResult) {
        match self.entries.iter_mut().find(|(cmd, _)| cmd == command) {
            Some((_, slot)) => *slot = result,
            None => self.entries.push((command.to_string(), result)),
        }
    }

    pub fn get(&self, command: &str) -> Option<&CommandResult> {
        self.entries
            .iter()
            .find(|(cmd, _)| cmd == command)
            .map(|(_, result)| result)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CommandResult)> {
        self.entries.iter().map(|(cmd, result)| (cmd.as_str(), result))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for CommandOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (command, result) in &self.entries {
            map.serialize_entry(command, result)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    Success,
    #[default]
    Failed,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Success => "Success",
            ConnectionStatus::Failed => "Failed",
        }
    }
}

/// Final record of one device's run.
#[derive(Debug, Clone)]
pub struct DeviceOutcome {
    ip: String,
    hostname: String,
    declared_type: DeclaredType,
    resolution: Option<DeviceTypeResolution>,
    status: ConnectionStatus,
    commands: CommandOutcome,
}

impl DeviceOutcome {
    fn new(device: &Device) -> Self {
        Self {
            ip: device.ip().to_string(),
            hostname: device.hostname().to_string(),
            declared_type: device.declared_type().clone(),
            resolution: None,
            status: ConnectionStatus::Failed,
            commands: CommandOutcome::default(),
        }
    }

    /// Outcome of a worker task that died without returning one.
    pub fn defect(device: &Device) -> Self {
        Self::new(device)
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn declared_type(&self) -> &DeclaredType {
        &self.declared_type
    }

    /// `None` when the worker stopped before settling on a type.
    pub fn resolution(&self) -> Option<&DeviceTypeResolution> {
        self.resolution.as_ref()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn commands(&self) -> &CommandOutcome {
        &self.commands
    }

    /// Commands whose recorded result is a failure.
    pub fn failed_commands(&self) -> Vec<&str> {
        self.commands
            .iter()
            .filter(|(_, result)| result.is_failed())
            .map(|(cmd, _)| cmd)
            .collect()
    }

    pub(crate) fn fail_all(&mut self, commands: &CommandList, err: &ConnectError) {
        for command in commands {
            self.commands
                .record(command, CommandResult::Failed(err.to_string()));
        }
        self.status = ConnectionStatus::Failed;
    }
}

/// Runs the command list of one device through a transport.
pub struct DeviceWorker<T> {
    transport: Arc<T>,
    cancel: CancellationToken,
}

impl<T: DeviceTransport> DeviceWorker<T> {
    pub fn new(transport: Arc<T>, cancel: CancellationToken) -> Self {
        Self { transport, cancel }
    }

    pub async fn run(&self, device: &Device, commands: &CommandList) -> DeviceOutcome {
        let mut outcome = DeviceOutcome::new(device);
        let addr = device.addr();

        if commands.is_empty() {
            warn!(
                "{} has no commands to run in {}, skipping device",
                addr,
                commands.source().display()
            );
            return outcome;
        }
        if self.cancel.is_cancelled() {
            outcome.fail_all(commands, &ConnectError::Cancelled);
            return outcome;
        }

        let resolution = match device.declared_type() {
            DeclaredType::Declared(device_type) => {
                DeviceTypeResolution::Declared(device_type.clone())
            }
            DeclaredType::Unspecified => {
                debug!("{} detecting device type", addr);
                let detected = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Err(ConnectError::Cancelled),
                    detected = self.transport.detect(device) => detected,
                };
                match detected {
                    Ok(device_type) => {
                        info!("{} detected device type {}", addr, device_type);
                        DeviceTypeResolution::Detected(device_type)
                    }
                    Err(ConnectError::Cancelled) => {
                        outcome.fail_all(commands, &ConnectError::Cancelled);
                        return outcome;
                    }
                    Err(err) => {
                        error!("{} device type detection failed: {}", addr, err);
                        outcome.resolution = Some(DeviceTypeResolution::DetectionFailed);
                        return outcome;
                    }
                }
            }
        };

        let Some(device_type) = resolution.device_type().map(str::to_string) else {
            outcome.resolution = Some(resolution);
            return outcome;
        };
        outcome.resolution = Some(resolution);

        let connected = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ConnectError::Cancelled),
            session = self.transport.connect(device, &device_type) => session,
        };
        let mut session = match connected {
            Ok(session) => session,
            Err(err) => {
                if err.is_connection_failure() {
                    error!("{} connection failed: {}", addr, err);
                } else {
                    warn!("{} not connected: {}", addr, err);
                }
                outcome.fail_all(commands, &err);
                return outcome;
            }
        };
        info!("{} connected as {}", addr, device_type);
        outcome.status = ConnectionStatus::Success;

        let mut pending = commands.iter();
        while let Some(command) = pending.next() {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(ConnectError::Cancelled),
                result = session.execute(command) => result,
            };
            match result {
                Ok(output) => {
                    debug!("{} '{}' ok ({} bytes)", addr, command, output.len());
                    outcome.commands.record(command, CommandResult::Output(output));
                }
                Err(err) => {
                    let aborts = err.is_session_lost() || matches!(err, ConnectError::Cancelled);
                    warn!("{} '{}' failed: {}", addr, command, err);
                    outcome
                        .commands
                        .record(command, CommandResult::Failed(err.to_string()));
                    if aborts {
                        error!("{} stopping after '{}': {}", addr, command, err);
                        let reason = match &err {
                            ConnectError::ExecTimeout(_) => {
                                format!("skipped, session out of sync after '{command}' timed out")
                            }
                            err => err.to_string(),
                        };
                        for rest in pending.by_ref() {
                            outcome
                                .commands
                                .record(rest, CommandResult::Failed(reason.clone()));
                        }
                        outcome.status = ConnectionStatus::Failed;
                    }
                }
            }
        }

        session.close().await;
        outcome
    }
}
