// ============================================================================
// AUDIT BUFFER
// ============================================================================
// Ring of every execution while auditing is switched on, tagged with the
// kind of operation. Same overwrite policy as the slow query buffer.
// ============================================================================

use std::fmt::{self, Display, Formatter};

use parking_lot::RwLock;
use serde::Serialize;

use crate::constants::*;
use crate::ring::OverwriteRing;
use crate::types::{Fingerprint, TagBuf, Timestamp};

// ----------------------------------------------------------------------------
// Operation Kind
// ----------------------------------------------------------------------------

/// Closed set of audited operation kinds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Read,
    Insert,
    Update,
    Delete,
    SchemaChange,
    #[default]
    Unknown,
}

impl OperationKind {
    /// Classify a statement by its leading keyword
    pub fn from_statement(text: &str) -> Self {
        let text = text.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
        let end = text
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(text.len());
        let keyword = &text[..end];

        let is = |kw: &str| keyword.eq_ignore_ascii_case(kw);
        if is("select") || is("with") || is("show") {
            OperationKind::Read
        } else if is("insert") {
            OperationKind::Insert
        } else if is("update") {
            OperationKind::Update
        } else if is("delete") {
            OperationKind::Delete
        } else if is("create") || is("alter") || is("drop") || is("truncate") || is("comment") {
            OperationKind::SchemaChange
        } else {
            OperationKind::Unknown
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Read => "read",
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::SchemaChange => "schema_change",
            OperationKind::Unknown => "unknown",
        }
    }
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// The Buffer
// ----------------------------------------------------------------------------

/// One audited execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AuditEvent {
    pub fingerprint: Fingerprint,
    pub operation: OperationKind,
    pub user: TagBuf<USER_WIDTH>,
    pub database: TagBuf<DATABASE_WIDTH>,
    pub rows_affected: u64,
    pub duration_ms: f64,
    pub timestamp: Timestamp,
}

/// Bounded audit log, overwriting the oldest event when full.
#[derive(Debug)]
pub struct AuditBuffer {
    ring: RwLock<OverwriteRing<AuditEvent>>,
}

impl AuditBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: RwLock::new(OverwriteRing::new(capacity)),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_AUDIT_BUFFER_SIZE)
    }

    /// Append one event
    pub fn record(
        &self,
        fingerprint: Fingerprint,
        operation: OperationKind,
        user: &str,
        database: &str,
        rows_affected: u64,
        duration_ms: f64,
    ) {
        let event = AuditEvent {
            fingerprint,
            operation,
            user: TagBuf::from_str_truncated(user),
            database: TagBuf::from_str_truncated(database),
            rows_affected,
            duration_ms,
            timestamp: Timestamp::now(),
        };
        self.ring.write().push(event);
    }

    pub fn count(&self) -> usize {
        self.ring.read().len()
    }

    /// Events recorded since startup or the last clear
    pub fn total(&self) -> u64 {
        self.ring.read().total()
    }

    pub fn capacity(&self) -> usize {
        self.ring.read().capacity()
    }

    /// Valid events, oldest first
    pub fn snapshot(&self) -> Vec<AuditEvent> {
        self.ring.read().to_vec()
    }

    pub fn clear(&self) {
        self.ring.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("SELECT * FROM t", OperationKind::Read ; "select")]
    #[test_case("  with x as (select 1) select * from x", OperationKind::Read ; "cte")]
    #[test_case("show search_path", OperationKind::Read ; "show")]
    #[test_case("(select 1) union (select 2)", OperationKind::Read ; "parenthesized")]
    #[test_case("insert into t values (1)", OperationKind::Insert ; "insert")]
    #[test_case("UPDATE t SET x = 1", OperationKind::Update ; "update")]
    #[test_case("delete from t", OperationKind::Delete ; "delete")]
    #[test_case("CREATE TABLE t (id int)", OperationKind::SchemaChange ; "create")]
    #[test_case("alter table t add column y int", OperationKind::SchemaChange ; "alter")]
    #[test_case("DROP INDEX i", OperationKind::SchemaChange ; "drop")]
    #[test_case("truncate t", OperationKind::SchemaChange ; "truncate")]
    #[test_case("vacuum analyze t", OperationKind::Unknown ; "vacuum")]
    #[test_case("COPY orders TO STDOUT", OperationKind::Unknown ; "copy export")]
    #[test_case("copy orders from stdin", OperationKind::Unknown ; "copy import")]
    #[test_case("VALUES (1), (2)", OperationKind::Unknown ; "bare values")]
    #[test_case("table orders", OperationKind::Unknown ; "table shorthand")]
    #[test_case("selectx from t", OperationKind::Unknown ; "keyword prefix only")]
    #[test_case("", OperationKind::Unknown ; "empty")]
    fn test_operation_kind_from_statement(text: &str, expected: OperationKind) {
        assert_eq!(OperationKind::from_statement(text), expected);
    }

    #[test]
    fn test_operation_kind_serializes_snake_case() {
        let json = serde_json::to_string(&OperationKind::SchemaChange).unwrap();
        assert_eq!(json, "\"schema_change\"");
        assert_eq!(OperationKind::SchemaChange.to_string(), "schema_change");
    }

    #[test]
    fn test_audit_ring_wraps() {
        let buffer = AuditBuffer::new(5);
        for i in 1..=6u64 {
            buffer.record(Fingerprint::from_raw(i), OperationKind::Read, "alice", "shop", i, 1.0);
        }

        assert_eq!(buffer.count(), 5);
        assert_eq!(buffer.total(), 6);
        let events = buffer.snapshot();
        assert_eq!(events.first().unwrap().fingerprint.as_u64(), 2);
        assert_eq!(events.last().unwrap().rows_affected, 6);
        assert_eq!(events[0].database.as_str(), "shop");
    }

    #[test]
    fn test_audit_unallocated_is_noop() {
        let buffer = AuditBuffer::new(0);
        buffer.record(Fingerprint::from_raw(1), OperationKind::Delete, "", "", 0, 0.0);
        assert_eq!(buffer.total(), 0);
        assert!(buffer.snapshot().is_empty());
    }

    #[test]
    fn test_audit_clear() {
        let buffer = AuditBuffer::new(2);
        buffer.record(Fingerprint::from_raw(1), OperationKind::Insert, "u", "d", 1, 1.0);
        buffer.clear();
        assert_eq!(buffer.count(), 0);
        assert_eq!(buffer.total(), 0);
    }
}
