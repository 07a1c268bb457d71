//! OBD-II Session for ELM327 Adapters
//!
//! A session owns one transport, runs the adapter handshake and provides the
//! single request/response transaction every reader builds on. The wire
//! protocol is half-duplex: a command is only written once the previous
//! response's prompt (or read budget) has been observed.
//!
//! # Cancellation
//!
//! Every operation takes `&mut self`, so transactions on one session cannot
//! overlap. Dropping a transaction future mid-flight (for example through
//! `tokio::time::timeout`) is a hard cancellation: the session notices the
//! unfinished transaction on the next call, moves to [`SessionState::Failed`]
//! and returns [`ObdError::TransactionAbandoned`]. Close it and reconnect.

use crate::command;
use crate::config::SessionConfig;
use crate::error::{ObdError, ObdResult};
use crate::response::{
    interpret_with_header, Feed, Payload, RawResponse, ResponseAccumulator, SENSOR_HEADER_LEN,
};
use crate::sink::{default_sink, Severity, SharedSink};
use crate::transport::{PortCandidates, SerialSettings, SerialTransport, Transport};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

const UNKNOWN_VERSION: &str = "Unknown";

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Closed,
    Opening,
    Handshaking,
    Ready,
    Failed,
}

/// Interpreted outcome of one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Hex payload after the response header
    Data(String),
    /// Adapter answered NODATA
    NoData,
    /// Nothing arrived before the read budget ran out
    NoResponse,
}

/// Protocol session over one transport
pub struct Session<T: Transport = SerialTransport> {
    transport: T,
    state: SessionState,
    /// Adapter banner from `atz` (informational)
    version: String,
    config: SessionConfig,
    sink: SharedSink,
    /// Set while a transaction is between write and prompt
    in_flight: bool,
}

impl<T: Transport> Session<T> {
    /// Run the handshake over an opened transport.
    ///
    /// On failure the transport is closed and no session is returned. When
    /// `sink` is `None` messages go to [`TracingSink`](crate::TracingSink).
    pub async fn connect(
        transport: T,
        config: SessionConfig,
        sink: Option<SharedSink>,
    ) -> ObdResult<Self> {
        let mut session = Self {
            transport,
            state: SessionState::Opening,
            version: UNKNOWN_VERSION.to_string(),
            config,
            sink: sink.unwrap_or_else(default_sink),
            in_flight: false,
        };

        session.report(
            Severity::Status,
            format!("Interface {} successfully opened", session.transport.name()),
        );
        session.set_state(SessionState::Handshaking);
        session.report(Severity::Status, "Connecting to ECU...".into());

        match session.handshake().await {
            Ok(()) => {
                session.set_state(SessionState::Ready);
                info!(
                    "Adapter ready on {} ({})",
                    session.transport.name(),
                    session.version
                );
                Ok(session)
            }
            Err(e) => {
                session.set_state(SessionState::Failed);
                session.report(Severity::Warning, format!("Connection failed: {e}"));
                session.transport.close().await;
                Err(e)
            }
        }
    }

    async fn handshake(&mut self) -> ObdResult<()> {
        let banner = self
            .exchange(command::RESET, self.config.settle_delay())
            .await?;
        if banner.is_empty() {
            return Err(ObdError::HandshakeFailed {
                step: command::RESET,
            });
        }
        self.version = banner_text(&banner);
        self.report(Severity::Detail, format!("atz response: {}", self.version));

        let echo = self.exchange(command::ECHO_OFF, Duration::ZERO).await?;
        self.report(Severity::Detail, format!("ate0 response: {}", echo.text().trim()));

        let ready = self
            .exchange(command::SUPPORTED_PIDS, Duration::ZERO)
            .await?;
        if ready.is_empty() {
            return Err(ObdError::HandshakeFailed {
                step: command::SUPPORTED_PIDS,
            });
        }
        self.report(Severity::Detail, format!("0100 response: {}", ready.text().trim()));

        Ok(())
    }

    /// Send `command` and collect the raw response.
    ///
    /// An empty response means the read budget (consecutive empty reads) ran
    /// out; the caller decides whether to retry.
    pub async fn transact(&mut self, command: &str) -> ObdResult<RawResponse> {
        self.ensure_ready()?;
        self.exchange(command, Duration::ZERO).await
    }

    /// Send a mode 01 request and interpret the reply.
    pub async fn query(&mut self, command: &str) -> ObdResult<Reply> {
        self.query_with_header(command, SENSOR_HEADER_LEN).await
    }

    /// Send a request whose reply carries a `header_len`-character header.
    pub async fn query_with_header(&mut self, command: &str, header_len: usize) -> ObdResult<Reply> {
        let raw = self.transact(command).await?;
        if raw.is_empty() {
            debug!("No response to {}", command);
            return Ok(Reply::NoResponse);
        }

        match interpret_with_header(&raw, header_len, self.config.decode_policy)? {
            Payload::NoData => {
                metrics::counter!("elm_nodata_total").increment(1);
                Ok(Reply::NoData)
            }
            Payload::Data(hex) => {
                if hex.is_empty() {
                    self.report(
                        Severity::Warning,
                        format!("Suspect response to {}: '{}'", command, raw.text()),
                    );
                }
                Ok(Reply::Data(hex))
            }
        }
    }

    /// Reset the adapter (best effort) and release the transport.
    ///
    /// Safe to call more than once.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        if self.state == SessionState::Ready && !self.in_flight && self.transport.is_open() {
            if let Err(e) = self.transport.write_command(command::RESET).await {
                warn!("Adapter reset on close failed: {}", e);
            }
        }

        self.transport.close().await;
        self.in_flight = false;
        self.version = UNKNOWN_VERSION.to_string();
        self.set_state(SessionState::Closed);
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Adapter banner reported by `atz`
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Forward a message to the diagnostic sink
    pub fn report(&self, severity: Severity, message: String) {
        self.sink.report(severity, &message);
    }

    fn ensure_ready(&mut self) -> ObdResult<()> {
        if self.in_flight {
            warn!("Transaction abandoned before its prompt; session unusable");
            self.set_state(SessionState::Failed);
            return Err(ObdError::TransactionAbandoned);
        }
        match self.state {
            SessionState::Ready => Ok(()),
            other => Err(ObdError::NotReady(other)),
        }
    }

    fn set_state(&mut self, state: SessionState) {
        debug!("Session state {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// One transaction: write, optionally wait, read until prompt or budget.
    async fn exchange(&mut self, command: &str, settle: Duration) -> ObdResult<RawResponse> {
        self.in_flight = true;
        let result = self.write_then_read(command, settle).await;
        self.in_flight = false;
        result
    }

    async fn write_then_read(&mut self, command: &str, settle: Duration) -> ObdResult<RawResponse> {
        metrics::counter!("elm_transactions_total").increment(1);
        debug!("-> {}", command);

        self.transport.write_command(command).await?;
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }

        let raw = self.read_response().await?;
        debug!("<- {:?}", raw.text());
        Ok(raw)
    }

    async fn read_response(&mut self) -> ObdResult<RawResponse> {
        let timeout = self.config.byte_timeout();
        let budget = self.config.max_empty_reads.max(1);
        let mut acc = ResponseAccumulator::new();
        let mut empty_reads = 0u8;

        while empty_reads < budget {
            match self.transport.read_byte(timeout).await? {
                Some(byte) => {
                    empty_reads = 0;
                    if acc.push(byte) == Feed::Complete {
                        return Ok(acc.finish());
                    }
                }
                None => empty_reads += 1,
            }
        }

        metrics::counter!("elm_read_timeouts_total").increment(1);
        let raw = acc.finish();
        debug!(
            "Read budget exhausted after {} empty reads ({} bytes kept)",
            budget,
            raw.len()
        );
        Ok(raw)
    }
}

impl Session<SerialTransport> {
    /// Probe `candidates` and keep the first port whose adapter completes
    /// the handshake.
    pub async fn connect_any(
        candidates: &PortCandidates,
        settings: &SerialSettings,
        config: SessionConfig,
        sink: Option<SharedSink>,
    ) -> ObdResult<Self> {
        let sink = sink.unwrap_or_else(default_sink);
        sink.report(Severity::Status, "Opening interface (serial port)");

        let available = SerialTransport::discover(candidates, settings);
        sink.report(
            Severity::Detail,
            &format!("Ports that opened: [{}]", available.join(", ")),
        );

        let mut last_error = ObdError::PortUnavailable {
            tried: candidates.expand().len(),
        };

        for name in &available {
            let transport = match SerialTransport::open(name, settings) {
                Ok(transport) => transport,
                Err(e) => {
                    warn!("Port {} no longer opens: {}", name, e);
                    continue;
                }
            };

            match Self::connect(transport, config.clone(), Some(sink.clone())).await {
                Ok(session) => return Ok(session),
                Err(e) => {
                    warn!("No adapter answering on {}: {}", name, e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

/// Last non-blank line of the `atz` reply, e.g. "ELM327 v1.5"
fn banner_text(raw: &RawResponse) -> String {
    raw.text()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .unwrap_or(UNKNOWN_VERSION)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use crate::sink::MemorySink;
    use async_trait::async_trait;
    use std::sync::Arc;

    const BITMAP_REPLY: &str = "41 00 BE 3E B8 11";

    async fn ready_session(mock: MockTransport) -> Session<MockTransport> {
        Session::connect(mock, SessionConfig::fast(), None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_handshake_reaches_ready() {
        let sink = Arc::new(MemorySink::new());
        let session = Session::connect(
            MockTransport::handshaking(BITMAP_REPLY),
            SessionConfig::fast(),
            Some(sink.clone()),
        )
        .await
        .unwrap();

        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.version(), "ELM327 v1.5");
        assert_eq!(session.transport().sent_commands(), ["atz", "ate0", "0100"]);
        assert!(sink.contains("Connecting to ECU"));
        assert!(sink.contains("0100 response: 41 00 BE 3E B8 11"));
    }

    #[tokio::test]
    async fn test_handshake_fails_without_banner() {
        let result = Session::connect(MockTransport::new(), SessionConfig::fast(), None).await;
        assert!(matches!(
            result,
            Err(ObdError::HandshakeFailed { step: "atz" })
        ));
    }

    #[tokio::test]
    async fn test_handshake_fails_on_silent_bitmap() {
        let mock = MockTransport::with_replies(["ELM327 v1.5>", "OK>"]);
        let result = Session::connect(mock, SessionConfig::fast(), None).await;
        assert!(matches!(
            result,
            Err(ObdError::HandshakeFailed { step: "0100" })
        ));
    }

    #[tokio::test]
    async fn test_transact_gives_up_after_five_empty_reads() {
        let mut session = ready_session(MockTransport::handshaking(BITMAP_REPLY)).await;
        let before = session.transport().read_attempts();

        let raw = session.transact("010C").await.unwrap();

        assert!(raw.is_empty());
        assert_eq!(session.transport().read_attempts() - before, 5);
        assert!(session.is_ready());
    }

    #[tokio::test]
    async fn test_transact_strips_cr_and_prompt() {
        let mut mock = MockTransport::handshaking(BITMAP_REPLY);
        mock.respond_to("010D", "41 0D 3C\r\r>");
        let mut session = ready_session(mock).await;

        let raw = session.transact("010D").await.unwrap();
        assert_eq!(raw.as_bytes(), b"41 0D 3C");
    }

    #[tokio::test]
    async fn test_query_distinguishes_outcomes() {
        let mut mock = MockTransport::handshaking(BITMAP_REPLY);
        mock.respond_to("010D", "41 0D 3C>");
        mock.respond_to("0150", "NO DATA>");
        let mut session = ready_session(mock).await;

        assert_eq!(session.query("010D").await.unwrap(), Reply::Data("3C".into()));
        assert_eq!(session.query("0150").await.unwrap(), Reply::NoData);
        assert_eq!(session.query("0151").await.unwrap(), Reply::NoResponse);
    }

    #[tokio::test]
    async fn test_short_reply_strict_vs_lenient() {
        let mut mock = MockTransport::handshaking(BITMAP_REPLY);
        mock.respond_to("010D", "41>");
        let mut strict = ready_session(mock).await;
        assert!(matches!(
            strict.query("010D").await,
            Err(ObdError::Decode(_))
        ));

        let mut mock = MockTransport::handshaking(BITMAP_REPLY);
        mock.respond_to("010D", "41>");
        let sink = Arc::new(MemorySink::new());
        let config = SessionConfig {
            decode_policy: crate::DecodePolicy::Lenient,
            ..SessionConfig::fast()
        };
        let mut lenient = Session::connect(mock, config, Some(sink.clone()))
            .await
            .unwrap();
        assert_eq!(lenient.query("010D").await.unwrap(), Reply::Data(String::new()));
        assert!(sink.contains("Suspect response"));
    }

    #[tokio::test]
    async fn test_close_resets_and_is_idempotent() {
        let mut session = ready_session(MockTransport::handshaking(BITMAP_REPLY)).await;
        session.close().await;
        session.close().await;

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.version(), "Unknown");
        assert!(!session.transport().is_open());
        assert_eq!(session.transport().sent_commands().last().unwrap(), "atz");
        assert!(matches!(
            session.transact("0100").await,
            Err(ObdError::NotReady(SessionState::Closed))
        ));
    }

    /// Answers the handshake, then never answers again.
    struct StallingTransport {
        inner: MockTransport,
    }

    #[async_trait]
    impl Transport for StallingTransport {
        fn name(&self) -> &str {
            "stalling"
        }

        fn is_open(&self) -> bool {
            self.inner.is_open()
        }

        async fn write_command(&mut self, command: &str) -> ObdResult<()> {
            self.inner.write_command(command).await
        }

        async fn read_byte(&mut self, timeout: Duration) -> ObdResult<Option<u8>> {
            if self.inner.sent_commands().len() > 3 {
                std::future::pending::<()>().await;
            }
            self.inner.read_byte(timeout).await
        }

        async fn close(&mut self) {
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn test_abandoned_transaction_fails_session() {
        let transport = StallingTransport {
            inner: MockTransport::handshaking(BITMAP_REPLY),
        };
        let mut session = Session::connect(transport, SessionConfig::fast(), None)
            .await
            .unwrap();

        let abandoned =
            tokio::time::timeout(Duration::from_millis(20), session.transact("010C")).await;
        assert!(abandoned.is_err());

        assert!(matches!(
            session.transact("010D").await,
            Err(ObdError::TransactionAbandoned)
        ));
        assert_eq!(session.state(), SessionState::Failed);

        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.transport().is_open());
    }
}
