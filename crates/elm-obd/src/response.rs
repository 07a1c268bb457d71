//! Adapter Response Framing and Interpretation
//!
//! The adapter answers every command with a run of ASCII bytes terminated by
//! the `>` prompt. [`ResponseAccumulator`] collects those bytes (dropping
//! carriage returns and the prompt itself) into a [`RawResponse`], and
//! [`interpret`] turns that into a hex [`Payload`] or the NODATA sentinel.

use crate::config::DecodePolicy;
use crate::error::{ObdError, ObdResult};
use tracing::warn;

/// Prompt byte that terminates every adapter response
pub const PROMPT: u8 = b'>';

/// Sentinel the adapter sends for unsupported PIDs or empty modes
pub const NO_DATA: &str = "NODATA";

/// Header length of a mode 01 reply ("41" + echoed PID)
pub const SENSOR_HEADER_LEN: usize = 4;

/// Header length of a mode 03/07 reply ("43" / "47")
pub const MODE_HEADER_LEN: usize = 2;

/// Result of feeding one byte into the accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    /// Keep reading
    Pending,
    /// Prompt seen; the response is complete
    Complete,
}

/// Collects response bytes up to the prompt terminator.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    buffer: Vec<u8>,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte received from the adapter.
    pub fn push(&mut self, byte: u8) -> Feed {
        match byte {
            PROMPT => Feed::Complete,
            b'\r' => Feed::Pending,
            other => {
                self.buffer.push(other);
                Feed::Pending
            }
        }
    }

    /// Consume the accumulator, returning what was collected so far.
    pub fn finish(self) -> RawResponse {
        RawResponse(self.buffer)
    }
}

/// Bytes of one adapter response, without carriage returns or prompt.
///
/// Empty when the read budget ran out before anything arrived.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawResponse(Vec<u8>);

impl RawResponse {
    /// Build a response from already-filtered bytes (carriage returns and
    /// prompt bytes are removed).
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Self {
        let mut acc = ResponseAccumulator::new();
        for &b in bytes.as_ref() {
            if b != PROMPT {
                acc.push(b);
            }
        }
        acc.finish()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Lossy text view of the response
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }

    /// First non-blank line with all internal whitespace removed.
    pub fn first_line(&self) -> String {
        self.text()
            .split('\n')
            .map(|segment| segment.split_whitespace().collect::<String>())
            .find(|segment| !segment.is_empty())
            .unwrap_or_default()
    }
}

/// Interpreted response content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Hex digits following the response header
    Data(String),
    /// Adapter reported NODATA
    NoData,
}

/// Interpret a mode 01 response: drop the 4-character header.
pub fn interpret(raw: &RawResponse, policy: DecodePolicy) -> ObdResult<Payload> {
    interpret_with_header(raw, SENSOR_HEADER_LEN, policy)
}

/// Interpret a response whose header is `header_len` characters long.
///
/// Only the first non-blank line is considered, in case the adapter still
/// echoes commands. A line shorter than the header is a decode error under
/// [`DecodePolicy::Strict`]; under [`DecodePolicy::Lenient`] it is logged as
/// suspect and yields an empty payload.
pub fn interpret_with_header(
    raw: &RawResponse,
    header_len: usize,
    policy: DecodePolicy,
) -> ObdResult<Payload> {
    let line = raw.first_line();

    if line.starts_with(NO_DATA) {
        return Ok(Payload::NoData);
    }

    match line.get(header_len..) {
        Some(rest) => Ok(Payload::Data(rest.to_string())),
        None => match policy {
            DecodePolicy::Strict => Err(ObdError::Decode(format!(
                "response '{}' shorter than {}-character header",
                line, header_len
            ))),
            DecodePolicy::Lenient => {
                warn!("Suspect short response '{}', continuing", line);
                Ok(Payload::Data(String::new()))
            }
        },
    }
}

/// Parse a string of hex digit pairs into bytes.
pub fn hex_to_bytes(hex: &str) -> ObdResult<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(ObdError::Decode(format!("odd-length hex payload '{}'", hex)));
    }
    hex.as_bytes()
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(|| ObdError::Decode(format!("invalid hex in payload '{}'", hex)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn accumulate(bytes: &[u8]) -> RawResponse {
        let mut acc = ResponseAccumulator::new();
        for &b in bytes {
            if acc.push(b) == Feed::Complete {
                break;
            }
        }
        acc.finish()
    }

    #[test]
    fn test_accumulator_stops_at_prompt() {
        let raw = accumulate(b"41 0C 1A F8\r\r>ignored");
        assert_eq!(raw.as_bytes(), b"41 0C 1A F8");
    }

    #[test]
    fn test_interpret_sensor_reply() {
        let raw = RawResponse::from_bytes("41 0C 1A F8");
        let payload = interpret(&raw, DecodePolicy::Strict).unwrap();
        assert_eq!(payload, Payload::Data("1AF8".into()));
    }

    #[test]
    fn test_interpret_nodata() {
        let raw = RawResponse::from_bytes("NO DATA");
        assert_eq!(
            interpret(&raw, DecodePolicy::Strict).unwrap(),
            Payload::NoData
        );
    }

    #[test]
    fn test_interpret_keeps_first_line_only() {
        let raw = RawResponse::from_bytes("\n41 05 7B\n41 05 7C\n");
        assert_eq!(
            interpret(&raw, DecodePolicy::Strict).unwrap(),
            Payload::Data("7B".into())
        );
    }

    #[test]
    fn test_interpret_short_response_strict() {
        let raw = RawResponse::from_bytes("41");
        let err = interpret(&raw, DecodePolicy::Strict).unwrap_err();
        assert!(matches!(err, ObdError::Decode(_)));
    }

    #[test]
    fn test_interpret_short_response_lenient() {
        let raw = RawResponse::from_bytes("41");
        assert_eq!(
            interpret(&raw, DecodePolicy::Lenient).unwrap(),
            Payload::Data(String::new())
        );
    }

    #[test]
    fn test_interpret_empty_buffer_is_short() {
        let raw = RawResponse::default();
        assert!(interpret(&raw, DecodePolicy::Strict).is_err());
    }

    #[test]
    fn test_interpret_mode_header() {
        let raw = RawResponse::from_bytes("43 01 43 00 00 00 00");
        assert_eq!(
            interpret_with_header(&raw, MODE_HEADER_LEN, DecodePolicy::Strict).unwrap(),
            Payload::Data("014300000000".into())
        );
    }

    #[test]
    fn test_hex_to_bytes() {
        assert_eq!(hex_to_bytes("1AF8").unwrap(), vec![0x1A, 0xF8]);
        assert!(hex_to_bytes("1AF").is_err());
        assert!(hex_to_bytes("ZZ").is_err());
    }

    proptest! {
        #[test]
        fn test_accumulated_bytes_never_contain_cr_or_prompt(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let raw = accumulate(&bytes);
            prop_assert!(!raw.as_bytes().contains(&b'\r'));
            prop_assert!(!raw.as_bytes().contains(&PROMPT));
        }
    }
}
