//! Audit events for wildcard key use.
//!
//! The authorizer builds an [`AuditEvent`] whenever a key stored against
//! [`WILDCARD_IP`] lets a request through, and hands it to an [`AuditSink`].
//! Sinks are fire-and-forget: a failing sink logs locally and never affects
//! the authorization decision that produced the event.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::store::{db::now, Store, WILDCARD_IP};

pub const WILDCARD_USED: &str = "Wildcard API Key Used";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: i64,
    pub event: String,
    /// Human-readable message. The caller address inside it is already
    /// HTML-escaped.
    pub message: String,
    /// Caller address as observed, unescaped.
    pub caller: String,
}

impl AuditEvent {
    pub fn wildcard_use(caller: &str) -> Self {
        Self {
            timestamp: now(),
            event: WILDCARD_USED.to_owned(),
            message: format!(
                "API key with wildcard IP ({WILDCARD_IP}) was used from {}",
                escape_html(caller)
            ),
            caller: caller.to_owned(),
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

/// Emits audit events as structured `tracing` records.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        info!(
            event = %event.event,
            caller = %escape_html(&event.caller),
            message = %event.message,
            "audit: key.wildcard_used"
        );
    }
}

/// Persists audit events to the redb `audit` table for the admin view.
pub struct StoreAuditSink {
    store: Store,
}

impl StoreAuditSink {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

impl AuditSink for StoreAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Err(e) = self.store.append_audit(event) {
            warn!(error = %e, "failed to persist audit event");
        }
    }
}

/// Forwards every event to each inner sink in order.
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

impl AuditSink for FanoutAuditSink {
    fn record(&self, event: &AuditEvent) {
        for sink in &self.sinks {
            sink.record(event);
        }
    }
}

/// Escape the characters that are significant in HTML text and attributes.
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recording(Mutex<Vec<AuditEvent>>);

    impl AuditSink for Recording {
        fn record(&self, event: &AuditEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn message_names_sentinel_and_caller() {
        let e = AuditEvent::wildcard_use("203.0.113.5");
        assert_eq!(e.event, "Wildcard API Key Used");
        assert_eq!(
            e.message,
            "API key with wildcard IP (0.0.0.0) was used from 203.0.113.5"
        );
    }

    #[test]
    fn markup_in_caller_is_escaped_in_message() {
        let e = AuditEvent::wildcard_use("<script>alert('x')</script>");
        assert!(!e.message.contains("<script>"));
        assert!(e
            .message
            .ends_with("&lt;script&gt;alert(&#039;x&#039;)&lt;/script&gt;"));
        assert_eq!(e.caller, "<script>alert('x')</script>");
    }

    #[test]
    fn escape_html_handles_ampersand_first() {
        assert_eq!(escape_html("a&<b>\""), "a&amp;&lt;b&gt;&quot;");
        assert_eq!(escape_html("198.51.100.1"), "198.51.100.1");
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let a = Arc::new(Recording::default());
        let b = Arc::new(Recording::default());
        let fanout = FanoutAuditSink::new(vec![a.clone() as Arc<dyn AuditSink>, b.clone()]);

        fanout.record(&AuditEvent::wildcard_use("203.0.113.5"));

        assert_eq!(a.0.lock().unwrap().len(), 1);
        assert_eq!(b.0.lock().unwrap().len(), 1);
    }
}
