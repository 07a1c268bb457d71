//! Diagnostic sink
//!
//! User-facing progress messages ("Opening interface", adapter banners,
//! suspect responses) go to a [`DiagnosticSink`] handed to the session. When
//! no richer sink is attached the session uses [`TracingSink`].

use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Message severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Adapter-level detail (banners, raw replies)
    Detail,
    /// Connection progress
    Status,
    /// Something looked wrong but the session continues
    Warning,
}

/// Receiver of diagnostic messages. Must not block.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, severity: Severity, message: &str);
}

/// Shared sink handle
pub type SharedSink = Arc<dyn DiagnosticSink>;

/// Forwards messages to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Detail => debug!(target: "elm_obd::diagnostics", "{}", message),
            Severity::Status => info!(target: "elm_obd::diagnostics", "{}", message),
            Severity::Warning => warn!(target: "elm_obd::diagnostics", "{}", message),
        }
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl DiagnosticSink for NoopSink {
    fn report(&self, _severity: Severity, _message: &str) {}
}

/// Keeps every message in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: Mutex<Vec<(Severity, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the messages received so far
    pub fn messages(&self) -> Vec<(Severity, String)> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Whether any message contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.messages().iter().any(|(_, m)| m.contains(needle))
    }
}

impl DiagnosticSink for MemorySink {
    fn report(&self, severity: Severity, message: &str) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push((severity, message.to_string()));
        }
    }
}

/// Default sink used when the caller does not provide one
pub fn default_sink() -> SharedSink {
    Arc::new(TracingSink)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_collects() {
        let sink = MemorySink::new();
        sink.report(Severity::Status, "Connecting to ECU...");
        sink.report(Severity::Detail, "atz response: ELM327 v1.5");

        let messages = sink.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].0, Severity::Status);
        assert!(sink.contains("ELM327"));
    }

    #[test]
    fn test_noop_sink() {
        NoopSink.report(Severity::Warning, "ignored");
    }
}
