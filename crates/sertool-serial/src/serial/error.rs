//! Serial-specific error type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Categorised serial error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialError {
    pub kind: SerialErrorKind,
    pub message: String,
    /// Port the error relates to, if known.
    pub port_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SerialErrorKind {
    /// Port could not be opened (bad device, permissions, already in use).
    ConnectionFailed,
    /// Operation requires an open port.
    NotConnected,
    /// Write failed or the OS reported a short write.
    WriteFailed,
    /// Read failed while waiting for inbound data.
    ReadFailed,
    /// Channel index out of range or channel holds no data.
    InvalidChannel,
    /// Sequence index out of range or sequence references empty channels.
    InvalidSequence,
    /// Malformed channel or sequence text.
    Parse,
    /// Blocking operation was cancelled from another thread.
    Cancelled,
    /// Any other I/O error on the local side.
    Io,
}

pub type SerialResult<T> = Result<T, SerialError>;

// ── Construction helpers ─────────────────────────────────────────────

impl SerialError {
    pub fn new(kind: SerialErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            port_name: None,
        }
    }

    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port_name = Some(port.into());
        self
    }

    // ── Convenience constructors ─────────────────────────────────

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::new(SerialErrorKind::ConnectionFailed, msg)
    }

    pub fn not_connected() -> Self {
        Self::new(SerialErrorKind::NotConnected, "serial port is not open")
    }

    pub fn write_failed(msg: impl Into<String>) -> Self {
        Self::new(SerialErrorKind::WriteFailed, msg)
    }

    pub fn short_write(written: usize, expected: usize) -> Self {
        Self::write_failed(format!(
            "serial port write unsuccessful: {} sent while data length is {}",
            written, expected
        ))
    }

    pub fn read_failed(msg: impl Into<String>) -> Self {
        Self::new(SerialErrorKind::ReadFailed, msg)
    }

    pub fn invalid_channel(msg: impl Into<String>) -> Self {
        Self::new(SerialErrorKind::InvalidChannel, msg)
    }

    pub fn invalid_sequence(msg: impl Into<String>) -> Self {
        Self::new(SerialErrorKind::InvalidSequence, msg)
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::new(SerialErrorKind::Parse, msg)
    }

    pub fn cancelled() -> Self {
        Self::new(SerialErrorKind::Cancelled, "operation cancelled")
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(SerialErrorKind::Io, msg)
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == SerialErrorKind::Cancelled
    }
}

impl fmt::Display for SerialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.port_name {
            Some(port) => write!(f, "[Serial {:?}] {} ({})", self.kind, self.message, port),
            None => write!(f, "[Serial {:?}] {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for SerialError {}

impl From<std::io::Error> for SerialError {
    fn from(e: std::io::Error) -> Self {
        Self::io(e.to_string())
    }
}

impl From<serialport::Error> for SerialError {
    fn from(e: serialport::Error) -> Self {
        match e.kind() {
            serialport::ErrorKind::NoDevice => {
                Self::connection_failed(format!("device not available: {}", e.description))
            }
            serialport::ErrorKind::InvalidInput => {
                Self::connection_failed(format!("invalid port settings: {}", e.description))
            }
            _ => Self::io(e.description),
        }
    }
}

impl From<SerialError> for String {
    fn from(e: SerialError) -> String {
        e.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_port() {
        let e = SerialError::not_connected().with_port("COM3");
        assert_eq!(e.to_string(), "[Serial NotConnected] serial port is not open (COM3)");
    }

    #[test]
    fn test_display_without_port() {
        let e = SerialError::parse("bad token");
        assert_eq!(e.to_string(), "[Serial Parse] bad token");
    }

    #[test]
    fn test_short_write_message() {
        let e = SerialError::short_write(2, 5);
        assert_eq!(e.kind, SerialErrorKind::WriteFailed);
        assert!(e.message.contains("2 sent"));
        assert!(e.message.contains("5"));
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe gone");
        let e: SerialError = io.into();
        assert_eq!(e.kind, SerialErrorKind::Io);
        assert!(e.message.contains("pipe gone"));
    }

    #[test]
    fn test_from_serialport_no_device() {
        let err = serialport::Error::new(serialport::ErrorKind::NoDevice, "gone");
        let e: SerialError = err.into();
        assert_eq!(e.kind, SerialErrorKind::ConnectionFailed);
    }

    #[test]
    fn test_into_string() {
        let s: String = SerialError::cancelled().into();
        assert_eq!(s, "operation cancelled");
        assert!(SerialError::cancelled().is_cancelled());
    }
}
