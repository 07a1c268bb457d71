//! OBD-II Error Types

use crate::session::SessionState;
use thiserror::Error;

/// Errors that can occur during OBD-II communication
#[derive(Debug, Error)]
pub enum ObdError {
    /// No candidate serial device could be opened
    #[error("No serial port available (tried {tried} candidates)")]
    PortUnavailable { tried: usize },

    /// Adapter gave no usable answer during initialization
    #[error("Adapter handshake failed at '{step}'")]
    HandshakeFailed { step: &'static str },

    /// Command produced no bytes before the read budget ran out
    #[error("No response to '{command}'")]
    NoResponse { command: String },

    /// Payload too short or malformed to decode
    #[error("Decode error: {0}")]
    Decode(String),

    /// Serial port I/O error
    #[error("Serial port error: {0}")]
    Serial(String),

    /// Session is not in the Ready state
    #[error("Session not ready (state: {0:?})")]
    NotReady(SessionState),

    /// A previous transaction was cancelled before its terminator arrived
    #[error("Previous transaction was abandoned; close and reconnect")]
    TransactionAbandoned,

    /// Sensor index has no registry entry
    #[error("No sensor registered at index {0}")]
    UnknownSensor(u8),
}

impl From<std::io::Error> for ObdError {
    fn from(err: std::io::Error) -> Self {
        ObdError::Serial(err.to_string())
    }
}

impl From<tokio_serial::Error> for ObdError {
    fn from(err: tokio_serial::Error) -> Self {
        ObdError::Serial(err.to_string())
    }
}

/// Convenience alias for OBD results.
pub type ObdResult<T> = Result<T, ObdError>;
