//! Capture error types

use elm_obd::ObdError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error(transparent)]
    Obd(#[from] ObdError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Log output error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type CaptureResult<T> = Result<T, CaptureError>;
