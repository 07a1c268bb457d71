//! Session configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How to treat responses too short to carry a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodePolicy {
    /// Fail the transaction with a decode error
    #[default]
    Strict,
    /// Log the response as suspect and decode what is there
    Lenient,
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Per-byte read timeout (milliseconds)
    pub byte_timeout_ms: u64,

    /// Pause after `atz` before reading the banner (milliseconds)
    pub settle_delay_ms: u64,

    /// Consecutive empty reads that end a transaction
    pub max_empty_reads: u8,

    /// Short-response handling
    pub decode_policy: DecodePolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            byte_timeout_ms: 1000,
            settle_delay_ms: 1000,
            max_empty_reads: 5,
            decode_policy: DecodePolicy::Strict,
        }
    }
}

impl SessionConfig {
    /// Config that tolerates short responses like legacy adapters expect
    pub fn lenient() -> Self {
        Self {
            decode_policy: DecodePolicy::Lenient,
            ..Default::default()
        }
    }

    /// Config with no settle delay and a short byte timeout
    pub fn fast() -> Self {
        Self {
            byte_timeout_ms: 50,
            settle_delay_ms: 0,
            ..Default::default()
        }
    }

    pub fn byte_timeout(&self) -> Duration {
        Duration::from_millis(self.byte_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.max_empty_reads, 5);
        assert_eq!(config.decode_policy, DecodePolicy::Strict);
        assert_eq!(config.settle_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_lenient() {
        assert_eq!(SessionConfig::lenient().decode_policy, DecodePolicy::Lenient);
    }
}
