//! Capture configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `ELM_CAPTURE__*` environment variables, e.g.
//! `ELM_CAPTURE__SESSION__DECODE_POLICY=lenient`.

use crate::error::{CaptureError, CaptureResult};
use config::{Config, Environment, File};
use elm_obd::{PortCandidates, SerialSettings, SessionConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "ELM_CAPTURE_CONFIG";

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "ELM_CAPTURE";

/// Single-sensor time-series logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorLogConfig {
    /// PID index of the sensor to log
    pub index: u8,
    /// Output file (truncated on start)
    pub path: PathBuf,
    /// Samples to take; runs until shutdown when absent
    #[serde(default)]
    pub samples: Option<usize>,
}

/// Configuration for the capture program
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Device-name patterns probed in order
    pub ports: PortCandidates,
    pub serial: SerialSettings,
    pub session: SessionConfig,
    /// Delay between capture frames (milliseconds)
    pub poll_interval_ms: u64,
    /// Read stored and freeze-frame codes once after connecting
    pub read_codes_on_start: bool,
    /// Log sensor time series instead of capturing frames
    pub log_sensor: Option<SensorLogConfig>,
    /// Log level filter (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit logs as JSON
    pub log_json: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            ports: PortCandidates::default(),
            serial: SerialSettings::default(),
            session: SessionConfig::default(),
            poll_interval_ms: 1000,
            read_codes_on_start: true,
            log_sensor: None,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl CaptureConfig {
    /// Load `path` (if given), then environment overrides. Fields missing
    /// from both keep their `Default` values.
    pub fn load(path: Option<&Path>) -> CaptureResult<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        let settings: CaptureConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Config file path from the first CLI argument or `ELM_CAPTURE_CONFIG`.
    pub fn path_from_args<I>(mut args: I) -> Option<PathBuf>
    where
        I: Iterator<Item = String>,
    {
        args.nth(1)
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
            .map(PathBuf::from)
    }

    pub fn validate(&self) -> CaptureResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(invalid(format!(
                "log_level '{}' must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }
        if self.ports.expand().is_empty() {
            return Err(invalid("ports must name at least one device".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn invalid(message: String) -> CaptureError {
    CaptureError::Config(config::ConfigError::Message(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use elm_obd::{DecodePolicy, PortPattern};
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = CaptureConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.serial.baud_rate, 38400);
        assert_eq!(config.session.max_empty_reads, 5);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_load_from_toml_file() {
        let path = std::env::temp_dir().join(format!("elm-capture-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
ports = ["/dev/rfcomm0", {{ prefix = "/dev/ttyUSB", start = 0, end = 2 }}]
poll_interval_ms = 250
read_codes_on_start = false

[session]
decode_policy = "lenient"
settle_delay_ms = 500

[log_sensor]
index = 12
path = "/tmp/rpm.log"
samples = 10
"#
        )
        .unwrap();

        let config = CaptureConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(
            config.ports.0,
            vec![
                PortPattern::Path("/dev/rfcomm0".into()),
                PortPattern::range("/dev/ttyUSB", 0, 2),
            ]
        );
        assert_eq!(config.poll_interval_ms, 250);
        assert!(!config.read_codes_on_start);
        assert_eq!(config.session.decode_policy, DecodePolicy::Lenient);
        assert_eq!(config.session.settle_delay_ms, 500);
        assert_eq!(config.session.max_empty_reads, 5);
        let log = config.log_sensor.unwrap();
        assert_eq!(log.index, 12);
        assert_eq!(log.samples, Some(10));
    }

    #[test]
    fn test_rejects_bad_log_level() {
        let config = CaptureConfig {
            log_level: "loud".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(CaptureError::Config(_))));
    }

    #[test]
    fn test_rejects_empty_ports() {
        let config = CaptureConfig {
            ports: PortCandidates(Vec::new()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_path_from_first_argument() {
        let args = ["elm-capture".to_string(), "capture.toml".to_string()];
        assert_eq!(
            CaptureConfig::path_from_args(args.into_iter()),
            Some(PathBuf::from("capture.toml"))
        );
    }
}
