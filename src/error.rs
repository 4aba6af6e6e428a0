//! Application-level error type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use sertool_serial::serial::{SerialError, SerialErrorKind};

/// Categorised configuration / front-end error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigError {
    pub kind: ConfigErrorKind,
    pub message: String,
    /// File the error relates to, if any.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// Configuration document written by an incompatible format version.
    VersionMismatch,
    /// Document is not valid JSON or has the wrong shape.
    Malformed,
    /// A value is out of range (bad channel index, unknown level, ...).
    InvalidValue,
    /// Nothing to load (no recently used configuration, no port given).
    NotFound,
    /// Serial core reported a failure.
    Serial,
    /// Local file I/O failed.
    Io,
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// ── Construction helpers ─────────────────────────────────────────────

impl ConfigError {
    pub fn new(kind: ConfigErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: &Path) -> Self {
        self.path = Some(path.display().to_string());
        self
    }

    pub fn version_mismatch(expected: &str, found: &str) -> Self {
        Self::new(
            ConfigErrorKind::VersionMismatch,
            format!(
                "Configuration file syntax has changed, unable to set configuration. \
                 Current version: {}, config file version: {}",
                expected, found
            ),
        )
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::new(ConfigErrorKind::Malformed, msg)
    }

    pub fn invalid_value(msg: impl Into<String>) -> Self {
        Self::new(ConfigErrorKind::InvalidValue, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ConfigErrorKind::NotFound, msg)
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(ConfigErrorKind::Io, msg)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "[Config {:?}] {} ({})", self.kind, self.message, path),
            None => write!(f, "[Config {:?}] {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::io(e.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        Self::malformed(e.to_string())
    }
}

impl From<SerialError> for ConfigError {
    fn from(e: SerialError) -> Self {
        let kind = match e.kind {
            SerialErrorKind::Io => ConfigErrorKind::Io,
            _ => ConfigErrorKind::Serial,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<ConfigError> for String {
    fn from(e: ConfigError) -> Self {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_path() {
        let e = ConfigError::malformed("bad json").with_path(Path::new("cfg.json"));
        assert_eq!(e.to_string(), "[Config Malformed] bad json (cfg.json)");
    }

    #[test]
    fn test_version_mismatch_names_both() {
        let e = ConfigError::version_mismatch("2.0", "1.0");
        assert_eq!(e.kind, ConfigErrorKind::VersionMismatch);
        assert!(e.message.contains("2.0"));
        assert!(e.message.contains("1.0"));
    }

    #[test]
    fn test_from_serial_error() {
        let e: ConfigError = SerialError::not_connected().into();
        assert_eq!(e.kind, ConfigErrorKind::Serial);
        assert!(e.message.contains("not open"));

        let e: ConfigError = SerialError::io("disk full").into();
        assert_eq!(e.kind, ConfigErrorKind::Io);
    }
}
