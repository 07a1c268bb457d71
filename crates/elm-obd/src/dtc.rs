//! Diagnostic Trouble Codes
//!
//! Stored codes (mode 03) arrive three per frame as 16-bit words; the
//! vehicle pads the last frame with zero words. Freeze-frame codes (mode 07)
//! come back in a single frame and are reported as passive.
//!
//! Word layout:
//!
//! ```text
//!  15 14 | 13 12 | 11..8 | 7..4 | 3..0
//!  domain| digit | digit | digit| digit
//!  00=P 01=C 10=B 11=U
//! ```

use crate::command;
use crate::config::DecodePolicy;
use crate::error::{ObdError, ObdResult};
use crate::response::{hex_to_bytes, MODE_HEADER_LEN};
use crate::session::{Reply, Session};
use crate::sink::Severity;
use crate::transport::{SerialTransport, Transport};
use serde::Serialize;
use tracing::{debug, warn};

/// Codes carried by one mode 03/07 frame
pub const CODES_PER_FRAME: usize = 3;

/// Hex digits per code word
const WORD_DIGITS: usize = 4;

const DOMAINS: [char; 4] = ['P', 'C', 'B', 'U'];

/// PID 01 monitor status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MonitorStatus {
    /// Malfunction indicator lamp (check engine light) is on
    pub mil_on: bool,
    /// Number of stored codes
    pub dtc_count: u8,
}

impl MonitorStatus {
    /// Decode byte A of the PID 01 reply.
    pub fn from_byte(a: u8) -> Self {
        Self {
            mil_on: a & 0x80 != 0,
            dtc_count: a & 0x7F,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DtcStatus {
    /// Stored code (mode 03)
    Active,
    /// Freeze-frame code (mode 07)
    Passive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DtcEntry {
    pub status: DtcStatus,
    /// Domain letter plus four digits, e.g. "P0143"
    pub code: String,
}

/// Render a code word. Zero is padding and yields `None`.
pub fn decode_dtc_word(word: u16) -> Option<String> {
    if word == 0 {
        return None;
    }
    let domain = DOMAINS[(word >> 14) as usize];
    Some(format!(
        "{}{:X}{:X}{:X}{:X}",
        domain,
        (word >> 12) & 0x3,
        (word >> 8) & 0xF,
        (word >> 4) & 0xF,
        word & 0xF
    ))
}

/// Number of mode 03 frames needed for `dtc_count` codes
pub fn frame_count(dtc_count: u8) -> usize {
    (dtc_count as usize).div_ceil(CODES_PER_FRAME)
}

/// Parse up to three code words from a frame payload (mode header removed).
///
/// Parsing stops at the first zero word. A payload too short for even one
/// word is a decode error under [`DecodePolicy::Strict`] and yields no words
/// under [`DecodePolicy::Lenient`]; a trailing partial word is ignored.
pub fn parse_code_words(hex: &str, policy: DecodePolicy) -> ObdResult<Vec<u16>> {
    if hex.len() < WORD_DIGITS {
        return match policy {
            DecodePolicy::Strict => Err(ObdError::Decode(format!(
                "code frame '{}' shorter than one code word",
                hex
            ))),
            DecodePolicy::Lenient => {
                warn!("Suspect code frame '{}', no codes decoded", hex);
                Ok(Vec::new())
            }
        };
    }

    let mut words = Vec::with_capacity(CODES_PER_FRAME);
    for i in 0..CODES_PER_FRAME {
        let Some(digits) = hex.get(i * WORD_DIGITS..(i + 1) * WORD_DIGITS) else {
            break;
        };
        let bytes = hex_to_bytes(digits)?;
        let word = u16::from_be_bytes([bytes[0], bytes[1]]);
        if word == 0 {
            break;
        }
        words.push(word);
    }
    Ok(words)
}

fn entries(words: &[u16], status: DtcStatus) -> impl Iterator<Item = DtcEntry> + '_ {
    words
        .iter()
        .filter_map(move |&w| decode_dtc_word(w).map(|code| DtcEntry { status, code }))
}

/// Reads and clears trouble codes through a ready session
pub struct DiagnosticCodeReader<'a, T: Transport = SerialTransport> {
    session: &'a mut Session<T>,
}

impl<'a, T: Transport> DiagnosticCodeReader<'a, T> {
    pub fn new(session: &'a mut Session<T>) -> Self {
        Self { session }
    }

    /// MIL state and stored code count (PID 01).
    ///
    /// NODATA is treated as "no codes" and reported to the sink.
    pub async fn monitor_status(&mut self) -> ObdResult<MonitorStatus> {
        match self.session.query(command::MONITOR_STATUS).await? {
            Reply::Data(hex) => {
                let bytes = hex_to_bytes(&hex)?;
                let a = bytes.first().copied().ok_or_else(|| {
                    ObdError::Decode(format!("monitor status payload '{}' is empty", hex))
                })?;
                Ok(MonitorStatus::from_byte(a))
            }
            Reply::NoData => {
                self.session.report(
                    Severity::Warning,
                    "Monitor status unavailable (NODATA), assuming no stored codes".into(),
                );
                Ok(MonitorStatus::default())
            }
            Reply::NoResponse => Err(ObdError::NoResponse {
                command: command::MONITOR_STATUS.to_string(),
            }),
        }
    }

    /// Stored codes (active) followed by freeze-frame codes (passive).
    pub async fn stored_codes(&mut self) -> ObdResult<Vec<DtcEntry>> {
        let status = self.monitor_status().await?;
        let frames = frame_count(status.dtc_count);
        self.session.report(
            Severity::Status,
            format!(
                "Number of stored DTC: {} MIL: {}",
                status.dtc_count,
                if status.mil_on { "on" } else { "off" }
            ),
        );

        let policy = self.session.config().decode_policy;
        let mut codes = Vec::new();

        for frame in 0..frames {
            match self
                .session
                .query_with_header(command::READ_DTC, MODE_HEADER_LEN)
                .await?
            {
                Reply::Data(hex) => {
                    debug!("DTC frame {}/{}: {}", frame + 1, frames, hex);
                    let words = parse_code_words(&hex, policy)?;
                    codes.extend(entries(&words, DtcStatus::Active));
                }
                Reply::NoData => debug!("DTC frame {}/{}: NODATA", frame + 1, frames),
                Reply::NoResponse => {
                    return Err(ObdError::NoResponse {
                        command: command::READ_DTC.to_string(),
                    })
                }
            }
        }

        match self
            .session
            .query_with_header(command::FREEZE_DTC, MODE_HEADER_LEN)
            .await?
        {
            Reply::Data(hex) => {
                debug!("Freeze DTC frame: {}", hex);
                let words = parse_code_words(&hex, policy)?;
                codes.extend(entries(&words, DtcStatus::Passive));
            }
            Reply::NoData => {}
            Reply::NoResponse => self.session.report(
                Severity::Warning,
                "No response to freeze-frame code request".into(),
            ),
        }

        Ok(codes)
    }

    /// Clear stored codes and freeze-frame data.
    ///
    /// Returns the first non-empty line of the adapter's acknowledgement.
    pub async fn clear_codes(&mut self) -> ObdResult<String> {
        let raw = self.session.transact(command::CLEAR_DTC).await?;
        if raw.is_empty() {
            return Err(ObdError::NoResponse {
                command: command::CLEAR_DTC.to_string(),
            });
        }

        let text = raw.text();
        let ack = text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or_default()
            .to_string();
        self.session
            .report(Severity::Status, format!("Clear DTC response: {}", ack));
        Ok(ack)
    }
}
