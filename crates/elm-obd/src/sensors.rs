//! Supported-Sensor Discovery and Sensor Reads
//!
//! The vehicle answers `0100` with a 32-bit bitmap, most significant bit
//! first: bit `32 - i` set means PID `i` is supported. [`SensorReader`]
//! turns that bitmap into registry entries and reads individual sensors.

use crate::command;
use crate::config::DecodePolicy;
use crate::error::{ObdError, ObdResult};
use crate::registry::{SensorDescriptor, SensorRegistry, SensorValue};
use crate::session::{Reply, Session};
use crate::sink::Severity;
use crate::transport::{SerialTransport, Transport};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

/// Ordered set of supported PID indices
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupportedPids(BTreeSet<u8>);

impl SupportedPids {
    /// Number of PIDs covered by one bitmap reply
    pub const BITMAP_WIDTH: u8 = 32;

    /// Decode the bitmap, MSB first: bit (32 - i) marks PID i.
    pub fn from_bitmap(bitmap: u32) -> Self {
        (1..=Self::BITMAP_WIDTH)
            .filter(|&i| bitmap & (1u32 << (Self::BITMAP_WIDTH - i)) != 0)
            .collect()
    }

    /// Decode the first 8 hex digits of a `0100` payload.
    pub fn from_payload(hex: &str) -> ObdResult<Self> {
        let digits = hex.get(..8).ok_or_else(|| {
            ObdError::Decode(format!("supported-PID payload '{}' shorter than 8 digits", hex))
        })?;
        let bitmap = u32::from_str_radix(digits, 16)
            .map_err(|_| ObdError::Decode(format!("invalid supported-PID bitmap '{}'", digits)))?;
        Ok(Self::from_bitmap(bitmap))
    }

    pub fn contains(&self, index: u8) -> bool {
        self.0.contains(&index)
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<u8> for SupportedPids {
    fn from_iter<I: IntoIterator<Item = u8>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Result of supported-sensor discovery
#[derive(Debug, Clone, Default)]
pub struct SupportedSensors {
    /// Registry entries the vehicle supports, in PID order
    pub supported: Vec<SensorDescriptor>,
    /// Registered PIDs the vehicle did not mark (never read)
    pub unsupported: Vec<u8>,
}

/// Outcome of reading one sensor
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reading {
    Value(SensorValue),
    /// The adapter answered NODATA
    NoData,
    /// Nothing arrived within the read budget
    NoResponse,
}

impl Reading {
    pub fn value(&self) -> Option<&SensorValue> {
        match self {
            Reading::Value(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Value(value) => write!(f, "{}", value),
            Reading::NoData => f.write_str("NODATA"),
            Reading::NoResponse => f.write_str("NORESPONSE"),
        }
    }
}

/// A reading together with the sensor's display name and unit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    pub index: u8,
    pub name: &'static str,
    pub reading: Reading,
    pub unit: &'static str,
}

/// Reads mode 01 sensors through a ready session
pub struct SensorReader<'a, T: Transport = SerialTransport> {
    session: &'a mut Session<T>,
    registry: &'a SensorRegistry,
}

impl<'a, T: Transport> SensorReader<'a, T> {
    pub fn new(session: &'a mut Session<T>, registry: &'a SensorRegistry) -> Self {
        Self { session, registry }
    }

    /// Request the supported-PID bitmap.
    ///
    /// NODATA means nothing is supported; no response at all is an error.
    pub async fn supported_pids(&mut self) -> ObdResult<SupportedPids> {
        match self.session.query(command::SUPPORTED_PIDS).await? {
            Reply::Data(hex) => SupportedPids::from_payload(&hex),
            Reply::NoData => Ok(SupportedPids::default()),
            Reply::NoResponse => Err(ObdError::NoResponse {
                command: command::SUPPORTED_PIDS.to_string(),
            }),
        }
    }

    /// Supported registry entries and the registered indices left out.
    pub async fn supported_sensors(&mut self) -> ObdResult<SupportedSensors> {
        let pids = self.supported_pids().await?;
        let (supported, unsupported) = self.registry.partition(&pids);

        debug!(
            "{} supported sensors, {} unsupported",
            supported.len(),
            unsupported.len()
        );
        self.session.report(
            Severity::Detail,
            format!(
                "Supported sensors: {:?}",
                supported.iter().map(|d| d.index).collect::<Vec<_>>()
            ),
        );

        Ok(SupportedSensors {
            supported,
            unsupported,
        })
    }

    /// Read and decode one sensor. NODATA and silence are returned as
    /// readings and never reach the decoder.
    ///
    /// A payload shorter than the decoder needs fails the read under
    /// [`DecodePolicy::Strict`]; under [`DecodePolicy::Lenient`] it is
    /// reported as suspect and decoded zero-padded.
    pub async fn sensor_value(&mut self, descriptor: &SensorDescriptor) -> ObdResult<Reading> {
        let policy = self.session.config().decode_policy;
        let reading = match self.session.query(descriptor.command).await? {
            Reply::Data(hex) => {
                if policy == DecodePolicy::Lenient && hex.len() < descriptor.decoder.min_bytes() * 2
                {
                    self.session.report(
                        Severity::Warning,
                        format!("Suspect response to {}: payload '{}'", descriptor.command, hex),
                    );
                }
                Reading::Value(descriptor.decoder.decode_with(&hex, policy)?)
            }
            Reply::NoData => Reading::NoData,
            Reply::NoResponse => Reading::NoResponse,
        };
        Ok(reading)
    }

    /// Read the sensor registered at `index`.
    pub async fn sensor(&mut self, index: u8) -> ObdResult<SensorReading> {
        let descriptor = *self
            .registry
            .get(index)
            .ok_or(ObdError::UnknownSensor(index))?;

        let reading = self.sensor_value(&descriptor).await?;
        Ok(SensorReading {
            index,
            name: descriptor.name,
            reading,
            unit: descriptor.unit,
        })
    }

    pub fn registry(&self) -> &SensorRegistry {
        self.registry
    }
}
