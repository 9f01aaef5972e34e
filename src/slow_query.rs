// ============================================================================
// SLOW QUERY BUFFER
// ============================================================================
// Ring of the most recent executions the host judged slow. Appends are
// unconditional: the threshold check belongs to the caller.
// ============================================================================

use parking_lot::RwLock;
use serde::Serialize;

use crate::constants::*;
use crate::ring::OverwriteRing;
use crate::types::{Fingerprint, TagBuf, Timestamp};

/// One slow execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SlowQueryEntry {
    pub fingerprint: Fingerprint,
    pub duration_ms: f64,
    pub timestamp: Timestamp,
    pub app_name: TagBuf<APP_NAME_WIDTH>,
    pub user: TagBuf<USER_WIDTH>,
    /// Rows returned or affected
    pub rows_processed: u64,
}

/// Bounded log of slow executions, overwriting the oldest when full.
#[derive(Debug)]
pub struct SlowQueryBuffer {
    ring: RwLock<OverwriteRing<SlowQueryEntry>>,
}

impl SlowQueryBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: RwLock::new(OverwriteRing::new(capacity)),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_SLOW_QUERY_BUFFER_SIZE)
    }

    /// Append one slow execution
    pub fn record(&self, fingerprint: Fingerprint, duration_ms: f64, app_name: &str, user: &str, rows_processed: u64) {
        let entry = SlowQueryEntry {
            fingerprint,
            duration_ms,
            timestamp: Timestamp::now(),
            app_name: TagBuf::from_str_truncated(app_name),
            user: TagBuf::from_str_truncated(user),
            rows_processed,
        };
        self.ring.write().push(entry);
    }

    /// Valid entries
    pub fn count(&self) -> usize {
        self.ring.read().len()
    }

    /// Slow executions recorded since startup or the last clear
    pub fn total(&self) -> u64 {
        self.ring.read().total()
    }

    pub fn capacity(&self) -> usize {
        self.ring.read().capacity()
    }

    /// Valid entries, oldest first
    pub fn snapshot(&self) -> Vec<SlowQueryEntry> {
        self.ring.read().to_vec()
    }

    pub fn clear(&self) {
        self.ring.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slow_buffer_overwrites_oldest() {
        let buffer = SlowQueryBuffer::new(3);
        for i in 1..=4u64 {
            buffer.record(Fingerprint::from_raw(i), 250.0 + i as f64, "app", "alice", i);
        }

        assert_eq!(buffer.count(), 3);
        assert_eq!(buffer.total(), 4);

        let fps: Vec<u64> = buffer.snapshot().iter().map(|e| e.fingerprint.as_u64()).collect();
        assert_eq!(fps, vec![2, 3, 4]);
    }

    #[test]
    fn test_slow_buffer_truncates_tags() {
        let buffer = SlowQueryBuffer::new(2);
        let long_app = "a".repeat(200);
        buffer.record(Fingerprint::from_raw(1), 500.0, &long_app, "bob", 10);

        let entry = buffer.snapshot()[0];
        assert_eq!(entry.app_name.len(), APP_NAME_WIDTH - 1);
        assert_eq!(entry.user.as_str(), "bob");
        assert_eq!(entry.rows_processed, 10);
        assert!(!entry.timestamp.is_epoch());
    }

    #[test]
    fn test_slow_buffer_no_dedup() {
        let buffer = SlowQueryBuffer::new(8);
        for _ in 0..3 {
            buffer.record(Fingerprint::from_raw(7), 300.0, "", "", 0);
        }
        assert_eq!(buffer.count(), 3);
    }

    #[test]
    fn test_slow_buffer_clear() {
        let buffer = SlowQueryBuffer::new(2);
        buffer.record(Fingerprint::from_raw(1), 300.0, "", "", 0);
        buffer.clear();
        assert_eq!(buffer.total(), 0);
        assert!(buffer.snapshot().is_empty());
        assert_eq!(buffer.capacity(), 2);
    }

    #[test]
    fn test_slow_buffer_concurrent_total() {
        let buffer = SlowQueryBuffer::new(16);
        std::thread::scope(|s| {
            for t in 0..4u64 {
                let buffer = &buffer;
                s.spawn(move || {
                    for i in 0..250u64 {
                        buffer.record(Fingerprint::from_raw(t * 1000 + i + 1), 300.0, "", "", 0);
                    }
                });
            }
        });
        assert_eq!(buffer.total(), 1000);
        assert_eq!(buffer.count(), 16);
    }
}
