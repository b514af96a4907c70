use anyhow::{Context, Result};
use redb::{ReadableTable, ReadableTableMetadata, TableDefinition};
use tracing::{debug, warn};

use super::settings::SETTINGS;
use crate::audit::AuditEvent;

/// Sequence number → bincode-encoded [`AuditEvent`].
pub(crate) const AUDIT: TableDefinition<u64, &[u8]> = TableDefinition::new("audit");

/// Setting holding the number of audit events kept. Older events are dropped
/// as new ones are appended.
pub const MAX_AUDIT_EVENTS: &str = "max_audit_events";
pub const DEFAULT_MAX_AUDIT_EVENTS: u64 = 10_000;

/// Parse a retention cap. Zero is rejected: the newest event is always kept.
pub fn parse_retention(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|n| *n > 0)
}

impl super::db::Store {
    /// Append an audit event and drop the oldest ones beyond the
    /// `max_audit_events` cap, in the same transaction. Returns its sequence
    /// number.
    pub fn append_audit(&self, event: &AuditEvent) -> Result<u64> {
        let bytes = bincode::serde::encode_to_vec(event, bincode::config::standard())
            .context("bincode encode audit event")?;

        let write_txn = self.db.begin_write()?;
        let seq = {
            let cap = {
                let settings = write_txn.open_table(SETTINGS)?;
                let raw = settings.get(MAX_AUDIT_EVENTS)?.map(|v| v.value().to_owned());
                retention_or_default(raw.as_deref())
            };

            let mut table = write_txn.open_table(AUDIT)?;
            let seq = match table.last()? {
                Some((last, _)) => last.value() + 1,
                None => 1,
            };
            table.insert(seq, bytes.as_slice())?;

            let mut dropped = 0u64;
            while table.len()? > cap {
                if table.pop_first()?.is_none() {
                    break;
                }
                dropped += 1;
            }
            if dropped > 0 {
                debug!(dropped, cap, "audit retention applied");
            }
            seq
        };
        write_txn.commit()?;
        Ok(seq)
    }

    pub fn audit_len(&self) -> Result<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUDIT)?;
        Ok(table.len()?)
    }

    /// Most recent audit events first, at most `limit` of them.
    pub fn list_audit(&self, limit: usize) -> Result<Vec<AuditEvent>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUDIT)?;

        let mut events = Vec::new();
        for item in table.iter()?.rev().take(limit) {
            let (_seq, v) = item?;
            let (event, _): (AuditEvent, _) =
                bincode::serde::decode_from_slice(v.value(), bincode::config::standard())
                    .context("bincode decode audit event")?;
            events.push(event);
        }
        Ok(events)
    }
}

fn retention_or_default(raw: Option<&str>) -> u64 {
    match raw {
        None => DEFAULT_MAX_AUDIT_EVENTS,
        Some(raw) => parse_retention(raw).unwrap_or_else(|| {
            warn!(key = MAX_AUDIT_EVENTS, value = %raw, "invalid setting, using default");
            DEFAULT_MAX_AUDIT_EVENTS
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[test]
    fn newest_first_with_limit() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("wildkey.db")).unwrap();

        for caller in ["203.0.113.1", "203.0.113.2", "203.0.113.3"] {
            store.append_audit(&AuditEvent::wildcard_use(caller)).unwrap();
        }

        let events = store.list_audit(2).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].caller, "203.0.113.3");
        assert_eq!(events[1].caller, "203.0.113.2");
    }

    #[test]
    fn retention_cap_drops_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("wildkey.db")).unwrap();
        store.set_setting(MAX_AUDIT_EVENTS, "3").unwrap();

        let mut last = 0;
        for i in 1..=5 {
            last = store
                .append_audit(&AuditEvent::wildcard_use(&format!("203.0.113.{i}")))
                .unwrap();
        }

        assert_eq!(last, 5);
        assert_eq!(store.audit_len().unwrap(), 3);
        let callers: Vec<String> = store
            .list_audit(10)
            .unwrap()
            .into_iter()
            .map(|e| e.caller)
            .collect();
        assert_eq!(callers, vec!["203.0.113.5", "203.0.113.4", "203.0.113.3"]);
    }

    #[test]
    fn lowering_the_cap_trims_on_next_append() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("wildkey.db")).unwrap();

        for i in 1..=6 {
            store
                .append_audit(&AuditEvent::wildcard_use(&format!("203.0.113.{i}")))
                .unwrap();
        }
        assert_eq!(store.audit_len().unwrap(), 6);

        store.set_setting(MAX_AUDIT_EVENTS, "2").unwrap();
        store.append_audit(&AuditEvent::wildcard_use("203.0.113.7")).unwrap();
        assert_eq!(store.audit_len().unwrap(), 2);
        assert_eq!(store.list_audit(10).unwrap()[1].caller, "203.0.113.6");
    }

    #[test]
    fn invalid_cap_falls_back_to_default() {
        assert_eq!(retention_or_default(None), DEFAULT_MAX_AUDIT_EVENTS);
        assert_eq!(retention_or_default(Some("0")), DEFAULT_MAX_AUDIT_EVENTS);
        assert_eq!(retention_or_default(Some("lots")), DEFAULT_MAX_AUDIT_EVENTS);
        assert_eq!(retention_or_default(Some(" 250 ")), 250);
    }
}
