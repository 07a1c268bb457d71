//! Serial Transport for ELM327 Adapters
//!
//! Byte-level I/O underneath the session: flush-then-write of CRLF-terminated
//! commands, single-byte reads bounded by a timeout, and an idempotent close.
//! Port discovery probes a fixed, ordered list of device-name patterns.

use crate::error::{ObdError, ObdResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{
    ClearBuffer, DataBits, Parity, SerialPort, SerialPortBuilderExt, SerialStream, StopBits,
};
use tracing::{debug, info, warn};

/// Line terminator appended to every command
pub const COMMAND_TERMINATOR: &[u8] = b"\r\n";

/// Byte-level link to an adapter.
///
/// A transport is owned by exactly one session and never shared.
#[async_trait]
pub trait Transport: Send {
    /// Device name, for diagnostics
    fn name(&self) -> &str;

    /// Whether the underlying handle is still held
    fn is_open(&self) -> bool;

    /// Discard pending input and output, then write `command` followed by CRLF.
    async fn write_command(&mut self, command: &str) -> ObdResult<()>;

    /// Read one byte, waiting at most `timeout`.
    ///
    /// `Ok(None)` means nothing arrived in time. Reading from a closed
    /// transport is an error.
    async fn read_byte(&mut self, timeout: Duration) -> ObdResult<Option<u8>>;

    /// Release the handle. Calling this more than once is harmless.
    async fn close(&mut self);
}

/// Serial line settings (data bits, parity and stop bits are fixed at 8N1)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Baud rate (default: 38400)
    pub baud_rate: u32,
    /// Driver-level read timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 38400,
            timeout_ms: 1000,
        }
    }
}

/// One entry in the port search order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortPattern {
    /// A single device path
    Path(String),
    /// `prefix` followed by every number in `start..end`
    Range { prefix: String, start: u16, end: u16 },
}

impl PortPattern {
    pub fn range(prefix: &str, start: u16, end: u16) -> Self {
        PortPattern::Range {
            prefix: prefix.to_string(),
            start,
            end,
        }
    }

    fn names(&self) -> Vec<String> {
        match self {
            PortPattern::Path(path) => vec![path.clone()],
            PortPattern::Range { prefix, start, end } => {
                (*start..*end).map(|n| format!("{prefix}{n}")).collect()
            }
        }
    }
}

/// Ordered list of device-name patterns to probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortCandidates(pub Vec<PortPattern>);

impl Default for PortCandidates {
    /// Bluetooth RFCOMM channels first, then USB serial, then standard serial.
    fn default() -> Self {
        Self(vec![
            PortPattern::range("/dev/rfcomm", 0, 100),
            PortPattern::range("/dev/ttyUSB", 0, 256),
            PortPattern::range("/dev/ttyS", 0, 256),
        ])
    }
}

impl PortCandidates {
    /// Candidates consisting of fixed device paths only
    pub fn paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(paths.into_iter().map(|p| PortPattern::Path(p.into())).collect())
    }

    /// Concrete device names, in probe order
    pub fn expand(&self) -> Vec<String> {
        self.0.iter().flat_map(PortPattern::names).collect()
    }
}

/// ELM327 link over a serial device
pub struct SerialTransport {
    name: String,
    stream: Option<SerialStream>,
}

impl SerialTransport {
    /// Open a single device at 8N1 with the given settings.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(name: &str, settings: &SerialSettings) -> ObdResult<Self> {
        let stream = tokio_serial::new(name, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(Duration::from_millis(settings.timeout_ms))
            .open_native_async()?;

        Ok(Self {
            name: name.to_string(),
            stream: Some(stream),
        })
    }

    /// Probe every candidate and return the names that opened.
    ///
    /// Each probe is closed again immediately. Devices that do not exist are
    /// skipped silently.
    pub fn discover(candidates: &PortCandidates, settings: &SerialSettings) -> Vec<String> {
        let available: Vec<String> = candidates
            .expand()
            .into_iter()
            .filter(|name| match Self::open(name, settings) {
                Ok(_) => true,
                Err(e) => {
                    debug!("Port {} unavailable: {}", name, e);
                    false
                }
            })
            .collect();

        info!("Available serial ports: {:?}", available);
        available
    }

    /// Open the first candidate that succeeds.
    ///
    /// Every candidate is probed first so the returned list names all ports
    /// that opened (for diagnostics); the handle is for the first of them.
    pub fn open_first(
        candidates: &PortCandidates,
        settings: &SerialSettings,
    ) -> ObdResult<(Self, Vec<String>)> {
        let available = Self::discover(candidates, settings);

        for name in &available {
            match Self::open(name, settings) {
                Ok(transport) => {
                    info!("Opened serial port {}", name);
                    return Ok((transport, available));
                }
                Err(e) => warn!("Port {} vanished after probe: {}", name, e),
            }
        }

        Err(ObdError::PortUnavailable {
            tried: candidates.expand().len(),
        })
    }

    fn stream(&mut self) -> ObdResult<&mut SerialStream> {
        let name = &self.name;
        self.stream
            .as_mut()
            .ok_or_else(|| ObdError::Serial(format!("{name} is closed")))
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    async fn write_command(&mut self, command: &str) -> ObdResult<()> {
        let stream = self.stream()?;
        stream.clear(ClearBuffer::All)?;
        stream.write_all(command.as_bytes()).await?;
        stream.write_all(COMMAND_TERMINATOR).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn read_byte(&mut self, timeout: Duration) -> ObdResult<Option<u8>> {
        let stream = self.stream()?;
        let mut buf = [0u8; 1];

        match tokio::time::timeout(timeout, stream.read(&mut buf)).await {
            Ok(Ok(0)) => Ok(None),
            Ok(Ok(_)) => Ok(Some(buf[0])),
            Ok(Err(e)) if e.kind() == ErrorKind::TimedOut => Ok(None),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(None),
        }
    }

    async fn close(&mut self) {
        if self.stream.take().is_some() {
            info!("Closed serial port {}", self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_candidate_order() {
        let names = PortCandidates::default().expand();
        assert_eq!(names.len(), 100 + 256 + 256);
        assert_eq!(names[0], "/dev/rfcomm0");
        assert_eq!(names[100], "/dev/ttyUSB0");
        assert_eq!(names[356], "/dev/ttyS0");
        assert_eq!(names.last().map(String::as_str), Some("/dev/ttyS255"));
    }

    #[test]
    fn test_fixed_paths() {
        let candidates = PortCandidates::paths(["/dev/obd", "/dev/ttyACM0"]);
        assert_eq!(candidates.expand(), vec!["/dev/obd", "/dev/ttyACM0"]);
    }

    #[tokio::test]
    async fn test_missing_device_is_not_fatal() {
        let candidates = PortCandidates(vec![PortPattern::range("/dev/does-not-exist-elm", 0, 3)]);
        let result = SerialTransport::open_first(&candidates, &SerialSettings::default());
        assert!(matches!(result, Err(ObdError::PortUnavailable { tried: 3 })));
    }

    #[test]
    fn test_default_settings() {
        let settings = SerialSettings::default();
        assert_eq!(settings.baud_rate, 38400);
    }
}
