//! ELM327 Sensor Capture
//!
//! Connects to the first serial port with a responding adapter, discovers
//! the supported sensors and captures them periodically, reads and clears
//! trouble codes, and logs single sensors as time series.

mod capture;
mod config;
mod error;

pub use capture::{unless_stopped, Capture, CaptureFrame, CaptureStats};
pub use self::config::{CaptureConfig, SensorLogConfig, CONFIG_PATH_ENV, ENV_PREFIX};
pub use error::{CaptureError, CaptureResult};

use tracing::subscriber::SetGlobalDefaultError;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Install the global tracing subscriber.
///
/// `level` is one of trace, debug, info, warn or error (anything else falls
/// back to info). With `json` set every event is written as one JSON object.
pub fn init_logging(level: &str, json: bool) -> Result<(), SetGlobalDefaultError> {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    }
}
