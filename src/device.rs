//! Device model and device-set loading.
//!
//! A [`Device`] is validated once when its device set is loaded and is never
//! mutated afterwards. Malformed rows are rejected here as [`ConfigError`]s
//! instead of surfacing later inside a worker.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use log::debug;
use serde::Deserialize;

use crate::config::RunContext;
use crate::error::ConfigError;

/// Columns every device set must carry.
pub const REQUIRED_FIELDS: &[&str] = &["username", "password", "hostname", "ip", "port", "cmdfile"];

/// An opaque secret. Never printed by `Debug` or `Display`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the secret value for handing to the transport.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Login credentials of one device.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: Secret,
    /// Privileged-mode password, if the device needs one.
    pub secret: Option<Secret>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Secret::new(password),
            secret: None,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(Secret::new(secret));
        self
    }
}

/// Device type as given in the device set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclaredType {
    /// No type given; the worker autodetects it.
    Unspecified,
    Declared(String),
}

impl DeclaredType {
    /// Empty values and `autodetect` both mean [`DeclaredType::Unspecified`].
    pub fn from_field(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") => DeclaredType::Unspecified,
            Some(v) if v.eq_ignore_ascii_case("autodetect") => DeclaredType::Unspecified,
            Some(v) => DeclaredType::Declared(v.to_string()),
        }
    }

    pub fn as_declared(&self) -> Option<&str> {
        match self {
            DeclaredType::Unspecified => None,
            DeclaredType::Declared(t) => Some(t),
        }
    }
}

/// How a worker settled on the device type it connects with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceTypeResolution {
    Declared(String),
    Detected(String),
    DetectionFailed,
}

impl DeviceTypeResolution {
    /// The device type a connection may be attempted with.
    pub fn device_type(&self) -> Option<&str> {
        match self {
            DeviceTypeResolution::Declared(t) | DeviceTypeResolution::Detected(t) => Some(t),
            DeviceTypeResolution::DetectionFailed => None,
        }
    }
}

/// One validated target device.
#[derive(Debug, Clone)]
pub struct Device {
    hostname: String,
    ip: String,
    port: u16,
    credentials: Credentials,
    command_file: PathBuf,
    declared_type: DeclaredType,
}

impl Device {
    /// Builds a device, rejecting port 0 and an empty IP.
    pub fn new(
        hostname: impl Into<String>,
        ip: impl Into<String>,
        port: u16,
        credentials: Credentials,
        command_file: impl Into<PathBuf>,
        declared_type: DeclaredType,
    ) -> Result<Self, ConfigError> {
        let ip = ip.into();
        if port == 0 {
            return Err(ConfigError::InvalidPort {
                ip,
                value: port.to_string(),
            });
        }
        if ip.trim().is_empty() {
            return Err(ConfigError::EmptyField {
                path: PathBuf::new(),
                row: 0,
                field: "ip",
            });
        }
        let hostname = hostname.into();
        // An empty hostname falls back to the address in reports and file names.
        let hostname = if hostname.trim().is_empty() {
            ip.clone()
        } else {
            hostname
        };
        Ok(Self {
            hostname,
            ip,
            port,
            credentials,
            command_file: command_file.into(),
            declared_type,
        })
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Resolved path of the command file.
    pub fn command_file(&self) -> &Path {
        &self.command_file
    }

    pub fn declared_type(&self) -> &DeclaredType {
        &self.declared_type
    }

    /// `user@ip:port`, used in log lines.
    pub fn addr(&self) -> String {
        format!("{}@{}:{}", self.credentials.username, self.ip, self.port)
    }
}

/// Parses a port column value. Only integers in `1..=65535` are accepted.
pub fn parse_port(ip: &str, value: &str) -> Result<u16, ConfigError> {
    let invalid = || ConfigError::InvalidPort {
        ip: ip.to_string(),
        value: value.to_string(),
    };
    let port: u32 = value.trim().parse().map_err(|_| invalid())?;
    if !(1..=65535).contains(&port) {
        return Err(invalid());
    }
    u16::try_from(port).map_err(|_| invalid())
}

#[derive(Debug, Deserialize)]
struct DeviceRecord {
    username: String,
    password: String,
    hostname: String,
    ip: String,
    port: String,
    cmdfile: String,
    #[serde(default)]
    device_type: Option<String>,
    #[serde(default)]
    secret: Option<String>,
}

/// Parses device-set text. Command file references are resolved through
/// `ctx` but their existence is not checked here.
pub fn parse_device_set(
    path: &Path,
    text: &str,
    ctx: &RunContext,
) -> Result<Vec<Device>, ConfigError> {
    let csv_err = |source| ConfigError::Csv {
        path: path.to_path_buf(),
        source,
    };

    // Rows may leave out trailing optional cells.
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader.headers().map_err(csv_err)?.clone();
    let missing: Vec<String> = REQUIRED_FIELDS
        .iter()
        .filter(|field| !headers.iter().any(|h| h == **field))
        .map(|field| field.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ConfigError::MissingFields {
            path: path.to_path_buf(),
            fields: missing,
        });
    }

    let mut devices = Vec::new();
    let mut seen = HashSet::new();
    for (idx, record) in reader.deserialize::<DeviceRecord>().enumerate() {
        let row = idx + 1;
        let record = record.map_err(csv_err)?;

        for (field, value) in [
            ("ip", &record.ip),
            ("username", &record.username),
            ("cmdfile", &record.cmdfile),
        ] {
            if value.is_empty() {
                return Err(ConfigError::EmptyField {
                    path: path.to_path_buf(),
                    row,
                    field,
                });
            }
        }

        let port = parse_port(&record.ip, &record.port)?;
        if !seen.insert(record.ip.clone()) {
            return Err(ConfigError::DuplicateDevice {
                ip: record.ip,
                path: path.to_path_buf(),
            });
        }

        let mut credentials = Credentials::new(record.username, record.password);
        if let Some(secret) = record.secret.filter(|s| !s.is_empty()) {
            credentials = credentials.with_secret(secret);
        }

        devices.push(Device::new(
            record.hostname,
            record.ip,
            port,
            credentials,
            ctx.resolve_command_file(&record.cmdfile),
            DeclaredType::from_field(record.device_type.as_deref()),
        )?);
    }

    if devices.is_empty() {
        return Err(ConfigError::EmptyDeviceSet(path.to_path_buf()));
    }
    Ok(devices)
}

/// Loads and validates a device set, including the existence of every
/// referenced command file.
pub async fn load_device_set(path: &Path, ctx: &RunContext) -> Result<Vec<Device>, ConfigError> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::MissingDeviceSet(path.to_path_buf()));
        }
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let devices = parse_device_set(path, &text, ctx)?;
    for device in &devices {
        if !is_file(device.command_file()).await {
            return Err(ConfigError::MissingCommandFile {
                ip: device.ip().to_string(),
                path: device.command_file().to_path_buf(),
            });
        }
    }
    debug!("Read {} devices from {}", devices.len(), path.display());
    Ok(devices)
}

pub(crate) async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}
