//! Mock transport for testing.
//!
//! Replies are either queued (one consumed per written command, FIFO) or
//! bound to a specific command. Sent commands and read attempts are recorded
//! so tests can assert on the exact wire traffic without an adapter.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::error::{ObdError, ObdResult};
use crate::transport::Transport;

/// Scripted stand-in for a serial adapter.
#[derive(Debug, Default)]
pub struct MockTransport {
    /// Replies handed out one per command, in order
    queued: VecDeque<Vec<u8>>,
    /// Replies bound to a command; take precedence over the queue
    bound: HashMap<String, Vec<u8>>,
    /// Bytes of the current reply not yet read
    pending: VecDeque<u8>,
    /// Every command passed to `write_command`
    sent: Vec<String>,
    /// Number of `read_byte` calls
    read_attempts: usize,
    closed: bool,
}

impl MockTransport {
    /// Mock that never answers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock pre-loaded with replies, one per command.
    pub fn with_replies<I, B>(replies: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let mut mock = Self::new();
        for reply in replies {
            mock.queue_reply(reply);
        }
        mock
    }

    /// Mock that answers the standard handshake (`atz`, `ate0`, `0100`).
    pub fn handshaking(bitmap_reply: &str) -> Self {
        let mut mock = Self::with_replies(["ELM327 v1.5\r\r>", "OK\r\r>"]);
        mock.queue_reply(format!("{bitmap_reply}\r\r>"));
        mock
    }

    /// Queue a reply for the next unbound command.
    pub fn queue_reply(&mut self, reply: impl AsRef<[u8]>) {
        self.queued.push_back(reply.as_ref().to_vec());
    }

    /// Always answer `command` with `reply`.
    pub fn respond_to(&mut self, command: &str, reply: impl AsRef<[u8]>) {
        self.bound.insert(command.to_string(), reply.as_ref().to_vec());
    }

    /// Commands written so far.
    pub fn sent_commands(&self) -> &[String] {
        &self.sent
    }

    /// How many times `read_byte` was called.
    pub fn read_attempts(&self) -> usize {
        self.read_attempts
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    fn is_open(&self) -> bool {
        !self.closed
    }

    async fn write_command(&mut self, command: &str) -> ObdResult<()> {
        if self.closed {
            return Err(ObdError::Serial("mock is closed".into()));
        }

        self.pending.clear();
        self.sent.push(command.to_string());

        let reply = match self.bound.get(command) {
            Some(reply) => Some(reply.clone()),
            None => self.queued.pop_front(),
        };
        if let Some(reply) = reply {
            self.pending.extend(reply);
        }
        Ok(())
    }

    async fn read_byte(&mut self, _timeout: Duration) -> ObdResult<Option<u8>> {
        if self.closed {
            return Err(ObdError::Serial("mock is closed".into()));
        }
        self.read_attempts += 1;
        Ok(self.pending.pop_front())
    }

    async fn close(&mut self) {
        self.closed = true;
        self.pending.clear();
    }
}
