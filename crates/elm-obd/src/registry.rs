//! Mode 01 Sensor Registry
//!
//! Maps a PID index to the command that reads it, its display name and unit,
//! and the decoder that turns the reply payload into a value. The standard
//! table covers PIDs 00-20; callers can build their own registry from any set
//! of descriptors.

use crate::config::DecodePolicy;
use crate::dtc::{decode_dtc_word, MonitorStatus};
use crate::error::{ObdError, ObdResult};
use crate::response::hex_to_bytes;
use crate::sensors::SupportedPids;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Decoded sensor value, at full precision
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SensorValue {
    Number(f64),
    Bitmap(u32),
    MonitorStatus(MonitorStatus),
    Text(String),
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorValue::Number(n) => write!(f, "{}", n),
            SensorValue::Bitmap(bits) => write!(f, "{:08X}", bits),
            SensorValue::MonitorStatus(status) => write!(
                f,
                "MIL {}, {} stored codes",
                if status.mil_on { "on" } else { "off" },
                status.dtc_count
            ),
            SensorValue::Text(text) => f.write_str(text),
        }
    }
}

/// How a sensor's payload is decoded
#[derive(Debug, Clone, Copy)]
pub enum Decoder {
    /// 32-bit supported-PID bitmap
    PidBitmap,
    /// MIL flag and stored code count
    MonitorStatus,
    /// Code that caused the freeze frame
    DtcCode,
    /// Fuel system status byte
    FuelSystemStatus,
    /// A * 100 / 255
    Percent,
    /// A - 40
    Temperature,
    /// (A - 128) * 100 / 128
    FuelTrim,
    /// A * 3
    FuelPressure,
    /// A as-is
    Byte,
    /// (256A + B) / 4
    Rpm,
    /// A / 2 - 64
    TimingAdvance,
    /// (256A + B) / 100
    AirFlow,
    /// Commanded secondary air status byte
    SecondaryAir,
    /// Oxygen sensor presence bits
    O2Locations,
    /// A / 200
    O2Voltage,
    /// OBD standard the vehicle conforms to
    ObdStandard,
    /// Power take-off status bit
    AuxInput,
    /// 256A + B
    Seconds,
    /// Caller-supplied decoding of the payload bytes
    Custom(fn(&[u8]) -> ObdResult<SensorValue>),
}

impl Decoder {
    /// Payload bytes the decoder reads. Custom decoders check their own input.
    pub fn min_bytes(&self) -> usize {
        match self {
            Decoder::PidBitmap => 4,
            Decoder::DtcCode | Decoder::Rpm | Decoder::AirFlow | Decoder::Seconds => 2,
            Decoder::Custom(_) => 0,
            _ => 1,
        }
    }

    /// Decode a hex payload (header already removed), rejecting short input.
    pub fn decode(&self, hex: &str) -> ObdResult<SensorValue> {
        self.decode_with(hex, DecodePolicy::Strict)
    }

    /// Decode a hex payload under `policy`.
    ///
    /// Under [`DecodePolicy::Lenient`] a trailing odd digit is dropped and a
    /// payload shorter than [`Decoder::min_bytes`] is zero-padded.
    pub fn decode_with(&self, hex: &str, policy: DecodePolicy) -> ObdResult<SensorValue> {
        let need = self.min_bytes();
        let bytes = match policy {
            DecodePolicy::Strict => {
                let bytes = hex_to_bytes(hex)?;
                if bytes.len() < need {
                    return Err(ObdError::Decode(format!(
                        "{:?}: need {} bytes, got {}",
                        self,
                        need,
                        bytes.len()
                    )));
                }
                bytes
            }
            DecodePolicy::Lenient => {
                let mut bytes = hex_to_bytes(hex.get(..hex.len() & !1).unwrap_or(hex))?;
                if bytes.len() < need {
                    bytes.resize(need, 0);
                }
                bytes
            }
        };
        let a = || bytes[0] as f64;
        let ab = || bytes[0] as f64 * 256.0 + bytes[1] as f64;

        let value = match self {
            Decoder::PidBitmap => {
                SensorValue::Bitmap(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            Decoder::MonitorStatus => SensorValue::MonitorStatus(MonitorStatus::from_byte(bytes[0])),
            Decoder::DtcCode => {
                let word = u16::from_be_bytes([bytes[0], bytes[1]]);
                SensorValue::Text(decode_dtc_word(word).unwrap_or_else(|| "None".to_string()))
            }
            Decoder::FuelSystemStatus => SensorValue::Text(fuel_system_status(bytes[0])),
            Decoder::Percent => SensorValue::Number(a() * 100.0 / 255.0),
            Decoder::Temperature => SensorValue::Number(a() - 40.0),
            Decoder::FuelTrim => SensorValue::Number((a() - 128.0) * 100.0 / 128.0),
            Decoder::FuelPressure => SensorValue::Number(a() * 3.0),
            Decoder::Byte => SensorValue::Number(a()),
            Decoder::Rpm => SensorValue::Number(ab() / 4.0),
            Decoder::TimingAdvance => SensorValue::Number(a() / 2.0 - 64.0),
            Decoder::AirFlow => SensorValue::Number(ab() / 100.0),
            Decoder::SecondaryAir => SensorValue::Text(secondary_air_status(bytes[0])),
            Decoder::O2Locations => SensorValue::Bitmap(bytes[0] as u32),
            Decoder::O2Voltage => SensorValue::Number(a() / 200.0),
            Decoder::ObdStandard => SensorValue::Text(obd_standard(bytes[0])),
            Decoder::AuxInput => {
                let pto = if bytes[0] & 0x01 != 0 { "active" } else { "inactive" };
                SensorValue::Text(format!("Power take-off {pto}"))
            }
            Decoder::Seconds => SensorValue::Number(ab()),
            Decoder::Custom(decode) => decode(bytes.as_slice())?,
        };

        Ok(value)
    }
}

fn fuel_system_status(code: u8) -> String {
    match code {
        0x00 => "Not reported".to_string(),
        0x01 => "Open loop (engine cold)".to_string(),
        0x02 => "Closed loop".to_string(),
        0x04 => "Open loop (load or deceleration)".to_string(),
        0x08 => "Open loop (system failure)".to_string(),
        0x10 => "Closed loop (feedback fault)".to_string(),
        other => format!("Unknown (0x{other:02X})"),
    }
}

fn secondary_air_status(code: u8) -> String {
    match code {
        0x01 => "Upstream".to_string(),
        0x02 => "Downstream of catalytic converter".to_string(),
        0x04 => "From outside atmosphere or off".to_string(),
        0x08 => "Pump commanded on for diagnosis".to_string(),
        other => format!("Unknown (0x{other:02X})"),
    }
}

fn obd_standard(code: u8) -> String {
    let name = match code {
        1 => "OBD-II (CARB)",
        2 => "OBD (EPA)",
        3 => "OBD and OBD-II",
        4 => "OBD-I",
        5 => "Not OBD compliant",
        6 => "EOBD",
        7 => "EOBD and OBD-II",
        8 => "EOBD and OBD",
        9 => "EOBD, OBD and OBD-II",
        10 => "JOBD",
        11 => "JOBD and OBD-II",
        12 => "JOBD and EOBD",
        13 => "JOBD, EOBD and OBD-II",
        other => return format!("Unknown ({other})"),
    };
    name.to_string()
}

/// One entry of the registry
#[derive(Debug, Clone, Copy)]
pub struct SensorDescriptor {
    /// PID index (also the position in the supported bitmap)
    pub index: u8,
    /// Command line that requests the value
    pub command: &'static str,
    pub name: &'static str,
    pub short_name: &'static str,
    pub unit: &'static str,
    pub decoder: Decoder,
}

impl SensorDescriptor {
    pub const fn new(
        index: u8,
        command: &'static str,
        name: &'static str,
        short_name: &'static str,
        unit: &'static str,
        decoder: Decoder,
    ) -> Self {
        Self {
            index,
            command,
            name,
            short_name,
            unit,
            decoder,
        }
    }
}

const STANDARD_SENSORS: &[SensorDescriptor] = &[
    SensorDescriptor::new(0x00, "0100", "Supported PIDs", "pids", "", Decoder::PidBitmap),
    SensorDescriptor::new(0x01, "0101", "Status Since DTC Cleared", "dtc_status", "", Decoder::MonitorStatus),
    SensorDescriptor::new(0x02, "0102", "DTC Causing Freeze Frame", "dtc_ff", "", Decoder::DtcCode),
    SensorDescriptor::new(0x03, "0103", "Fuel System Status", "fuel_status", "", Decoder::FuelSystemStatus),
    SensorDescriptor::new(0x04, "0104", "Calculated Load Value", "load", "%", Decoder::Percent),
    SensorDescriptor::new(0x05, "0105", "Coolant Temperature", "temp", "°C", Decoder::Temperature),
    SensorDescriptor::new(0x06, "0106", "Short Term Fuel Trim (Bank 1)", "short_term_fuel_trim_1", "%", Decoder::FuelTrim),
    SensorDescriptor::new(0x07, "0107", "Long Term Fuel Trim (Bank 1)", "long_term_fuel_trim_1", "%", Decoder::FuelTrim),
    SensorDescriptor::new(0x08, "0108", "Short Term Fuel Trim (Bank 2)", "short_term_fuel_trim_2", "%", Decoder::FuelTrim),
    SensorDescriptor::new(0x09, "0109", "Long Term Fuel Trim (Bank 2)", "long_term_fuel_trim_2", "%", Decoder::FuelTrim),
    SensorDescriptor::new(0x0A, "010A", "Fuel Rail Pressure", "fuel_pressure", "kPa", Decoder::FuelPressure),
    SensorDescriptor::new(0x0B, "010B", "Intake Manifold Pressure", "manifold_pressure", "kPa", Decoder::Byte),
    SensorDescriptor::new(0x0C, "010C", "Engine RPM", "rpm", "rpm", Decoder::Rpm),
    SensorDescriptor::new(0x0D, "010D", "Vehicle Speed", "speed", "km/h", Decoder::Byte),
    SensorDescriptor::new(0x0E, "010E", "Timing Advance", "timing_advance", "°", Decoder::TimingAdvance),
    SensorDescriptor::new(0x0F, "010F", "Intake Air Temperature", "intake_air_temp", "°C", Decoder::Temperature),
    SensorDescriptor::new(0x10, "0110", "Air Flow Rate (MAF)", "maf", "g/s", Decoder::AirFlow),
    SensorDescriptor::new(0x11, "0111", "Throttle Position", "throttle_pos", "%", Decoder::Percent),
    SensorDescriptor::new(0x12, "0112", "Secondary Air Status", "secondary_air_status", "", Decoder::SecondaryAir),
    SensorDescriptor::new(0x13, "0113", "Location of O2 Sensors", "o2_sensor_positions", "", Decoder::O2Locations),
    SensorDescriptor::new(0x14, "0114", "O2 Sensor: 1 - 1", "o211", "V", Decoder::O2Voltage),
    SensorDescriptor::new(0x15, "0115", "O2 Sensor: 1 - 2", "o212", "V", Decoder::O2Voltage),
    SensorDescriptor::new(0x16, "0116", "O2 Sensor: 1 - 3", "o213", "V", Decoder::O2Voltage),
    SensorDescriptor::new(0x17, "0117", "O2 Sensor: 1 - 4", "o214", "V", Decoder::O2Voltage),
    SensorDescriptor::new(0x18, "0118", "O2 Sensor: 2 - 1", "o221", "V", Decoder::O2Voltage),
    SensorDescriptor::new(0x19, "0119", "O2 Sensor: 2 - 2", "o222", "V", Decoder::O2Voltage),
    SensorDescriptor::new(0x1A, "011A", "O2 Sensor: 2 - 3", "o223", "V", Decoder::O2Voltage),
    SensorDescriptor::new(0x1B, "011B", "O2 Sensor: 2 - 4", "o224", "V", Decoder::O2Voltage),
    SensorDescriptor::new(0x1C, "011C", "OBD Designation", "obd_standard", "", Decoder::ObdStandard),
    SensorDescriptor::new(0x1D, "011D", "Location of O2 Sensors (Alt)", "o2_sensor_position_b", "", Decoder::O2Locations),
    SensorDescriptor::new(0x1E, "011E", "Auxiliary Input Status", "aux_input", "", Decoder::AuxInput),
    SensorDescriptor::new(0x1F, "011F", "Time Since Engine Start", "engine_time", "s", Decoder::Seconds),
    SensorDescriptor::new(0x20, "0120", "Supported PIDs 21-40", "pids_b", "", Decoder::PidBitmap),
];

/// Read-only table of sensors keyed by PID index.
///
/// Built once and shareable across sessions.
#[derive(Debug, Clone, Default)]
pub struct SensorRegistry {
    sensors: BTreeMap<u8, SensorDescriptor>,
}

impl SensorRegistry {
    /// Standard mode 01 sensors for PIDs 00-20
    pub fn standard() -> Self {
        Self::from_descriptors(STANDARD_SENSORS.iter().copied())
    }

    /// Registry holding exactly `descriptors` (later entries replace earlier
    /// ones with the same index)
    pub fn from_descriptors<I>(descriptors: I) -> Self
    where
        I: IntoIterator<Item = SensorDescriptor>,
    {
        Self {
            sensors: descriptors.into_iter().map(|d| (d.index, d)).collect(),
        }
    }

    pub fn get(&self, index: u8) -> Option<&SensorDescriptor> {
        self.sensors.get(&index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SensorDescriptor> {
        self.sensors.values()
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Split the registry by `supported`.
    ///
    /// Returns the supported descriptors in index order, and the registered
    /// indices in 01-20 that the vehicle did not mark. Supported indices with
    /// no registry entry are dropped.
    pub fn partition(&self, supported: &SupportedPids) -> (Vec<SensorDescriptor>, Vec<u8>) {
        let present = supported
            .iter()
            .filter_map(|index| self.get(index).copied())
            .collect();

        let missing = self
            .sensors
            .range(1..=SupportedPids::BITMAP_WIDTH)
            .map(|(&index, _)| index)
            .filter(|&index| !supported.contains(index))
            .collect();

        (present, missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(index: u8, hex: &str) -> SensorValue {
        SensorRegistry::standard()
            .get(index)
            .unwrap()
            .decoder
            .decode(hex)
            .unwrap()
    }

    fn number(value: SensorValue) -> f64 {
        match value {
            SensorValue::Number(n) => n,
            other => panic!("expected number, got {other:?}"),
        }
    }

    #[test]
    fn test_standard_registry_is_indexed_by_pid() {
        let registry = SensorRegistry::standard();
        assert_eq!(registry.len(), 33);
        for sensor in registry.iter() {
            assert_eq!(sensor.command, format!("01{:02X}", sensor.index));
        }
    }

    #[test]
    fn test_rpm_decode() {
        // ((0x1A * 256) + 0xF8) / 4 = 1726
        assert!((number(decode(0x0C, "1AF8")) - 1726.0).abs() < 1e-9);
    }

    #[test]
    fn test_coolant_temp_decode() {
        assert!((number(decode(0x05, "7B")) - 83.0).abs() < 1e-9);
    }

    #[test]
    fn test_fuel_trim_keeps_full_precision() {
        // (0x81 - 128) * 100 / 128 = 0.78125
        assert_eq!(number(decode(0x06, "81")), 0.78125);
    }

    #[test]
    fn test_timing_advance_decode() {
        assert!((number(decode(0x0E, "90")) - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_maf_decode() {
        assert!((number(decode(0x10, "01F4")) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_monitor_status_decode() {
        let value = decode(0x01, "83076504");
        assert_eq!(
            value,
            SensorValue::MonitorStatus(MonitorStatus {
                mil_on: true,
                dtc_count: 3
            })
        );
    }

    #[test]
    fn test_text_decoders() {
        assert_eq!(decode(0x03, "0200"), SensorValue::Text("Closed loop".into()));
        assert_eq!(decode(0x1C, "06"), SensorValue::Text("EOBD".into()));
        assert_eq!(decode(0x02, "0143"), SensorValue::Text("P0143".into()));
    }

    #[test]
    fn test_bitmap_decode() {
        assert_eq!(decode(0x00, "BE3EB811"), SensorValue::Bitmap(0xBE3E_B811));
    }

    #[test]
    fn test_short_payload_is_decode_error() {
        let rpm = SensorRegistry::standard().get(0x0C).copied().unwrap();
        assert!(matches!(rpm.decoder.decode("1A"), Err(ObdError::Decode(_))));
        assert!(matches!(rpm.decoder.decode(""), Err(ObdError::Decode(_))));
    }

    #[test]
    fn test_lenient_decode_pads_short_payload() {
        let rpm = SensorRegistry::standard().get(0x0C).copied().unwrap();
        // 0x1A00 / 4
        assert_eq!(
            rpm.decoder.decode_with("1A", DecodePolicy::Lenient).unwrap(),
            SensorValue::Number(1664.0)
        );
        assert_eq!(
            rpm.decoder.decode_with("1A0", DecodePolicy::Lenient).unwrap(),
            SensorValue::Number(1664.0)
        );
        assert_eq!(
            rpm.decoder.decode_with("", DecodePolicy::Lenient).unwrap(),
            SensorValue::Number(0.0)
        );
        assert!(rpm.decoder.decode_with("1A", DecodePolicy::Strict).is_err());
    }

    #[test]
    fn test_partition_skips_unregistered_indices() {
        let registry = SensorRegistry::from_descriptors([
            SensorDescriptor::new(1, "0101", "Status", "status", "", Decoder::MonitorStatus),
            SensorDescriptor::new(5, "0105", "Coolant", "temp", "°C", Decoder::Temperature),
            SensorDescriptor::new(12, "010C", "RPM", "rpm", "rpm", Decoder::Rpm),
            SensorDescriptor::new(13, "010D", "Speed", "speed", "km/h", Decoder::Byte),
        ]);
        let supported: SupportedPids = [1u8, 5, 12, 99].into_iter().collect();

        let (present, missing) = registry.partition(&supported);

        let indices: Vec<u8> = present.iter().map(|d| d.index).collect();
        assert_eq!(indices, vec![1, 5, 12]);
        assert_eq!(missing, vec![13]);
    }
}
