//! OBD-II Client for ELM327 Adapters
//!
//! This crate talks to ELM327-compatible adapters over a serial line: it runs
//! the adapter handshake, discovers which mode 01 sensors the vehicle
//! supports, decodes sensor readings and diagnostic trouble codes, and clears
//! stored codes.
//!
//! ```no_run
//! use elm_obd::{PortCandidates, SensorReader, SensorRegistry, SerialSettings, Session, SessionConfig};
//!
//! # async fn demo() -> Result<(), elm_obd::ObdError> {
//! let mut session = Session::connect_any(
//!     &PortCandidates::default(),
//!     &SerialSettings::default(),
//!     SessionConfig::default(),
//!     None,
//! )
//! .await?;
//!
//! let registry = SensorRegistry::standard();
//! let mut reader = SensorReader::new(&mut session, &registry);
//! let supported = reader.supported_sensors().await?;
//! for sensor in &supported.supported {
//!     let reading = reader.sensor(sensor.index).await?;
//!     println!("{} = {:?} {}", reading.name, reading.reading, reading.unit);
//! }
//! session.close().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod dtc;
mod error;
pub mod mock;
mod registry;
mod response;
mod sensors;
mod session;
mod sink;
mod transport;

pub use config::{DecodePolicy, SessionConfig};
pub use dtc::{
    decode_dtc_word, frame_count, parse_code_words, DiagnosticCodeReader, DtcEntry, DtcStatus,
    MonitorStatus,
};
pub use error::{ObdError, ObdResult};
pub use registry::{Decoder, SensorDescriptor, SensorRegistry, SensorValue};
pub use response::{
    hex_to_bytes, interpret, interpret_with_header, Feed, Payload, RawResponse,
    ResponseAccumulator,
};
pub use sensors::{Reading, SensorReader, SensorReading, SupportedPids, SupportedSensors};
pub use session::{Reply, Session, SessionState};
pub use sink::{DiagnosticSink, MemorySink, NoopSink, Severity, SharedSink, TracingSink};
pub use transport::{PortCandidates, PortPattern, SerialSettings, SerialTransport, Transport};

/// Command lines sent to the adapter
pub mod command {
    /// Soft reset
    pub const RESET: &str = "atz";
    /// Disable command echo
    pub const ECHO_OFF: &str = "ate0";
    /// Supported PID bitmap for PIDs 01-20
    pub const SUPPORTED_PIDS: &str = "0100";
    /// Monitor status (MIL and stored code count)
    pub const MONITOR_STATUS: &str = "0101";
    /// Read stored codes
    pub const READ_DTC: &str = "03";
    /// Clear stored codes
    pub const CLEAR_DTC: &str = "04";
    /// Read freeze-frame codes
    pub const FREEZE_DTC: &str = "07";
}
