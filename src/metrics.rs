// ============================================================================
// GLOBAL METRICS
// ============================================================================
// Coarse counters over every execution: totals, failures, slow executions
// and a fixed six-bucket latency histogram. One exclusive lock per write;
// readers copy everything out as a unit under the shared lock.
// ============================================================================

use parking_lot::RwLock;
use serde::Serialize;

use crate::constants::*;
use crate::types::Timestamp;

/// Histogram bucket index for a latency: the first bucket whose inclusive
/// upper bound holds it, or the unbounded last bucket.
#[inline]
pub fn bucket_for_latency(duration_ms: f64) -> usize {
    LATENCY_BUCKET_BOUNDS_MS
        .iter()
        .position(|&bound| duration_ms <= bound as f64)
        .unwrap_or(LATENCY_BUCKETS - 1)
}

/// Inclusive upper bound of bucket `idx`, `None` for the unbounded bucket
#[inline]
pub fn bucket_upper_ms(idx: usize) -> Option<u64> {
    LATENCY_BUCKET_BOUNDS_MS.get(idx).copied()
}

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    queries_total: u64,
    queries_failed: u64,
    slow_queries: u64,
    latency_buckets: [u64; LATENCY_BUCKETS],
}

/// One histogram row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HistogramBucket {
    /// Inclusive upper bound, `None` for the last bucket
    pub upper_ms: Option<u64>,
    pub count: u64,
}

/// Point-in-time copy of the global counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub queries_total: u64,
    pub queries_failed: u64,
    pub slow_queries: u64,
    pub start_time: Timestamp,
    pub histogram: [HistogramBucket; LATENCY_BUCKETS],
}

impl MetricsSnapshot {
    /// Share of executions that failed, 0 when none ran
    pub fn failure_rate(&self) -> f64 {
        if self.queries_total == 0 {
            0.0
        } else {
            self.queries_failed as f64 / self.queries_total as f64
        }
    }
}

/// Process-wide execution counters.
#[derive(Debug)]
pub struct GlobalMetrics {
    counters: RwLock<Counters>,
    /// Executions strictly slower than this count as slow
    slow_query_ms: u64,
    start_time: Timestamp,
}

impl GlobalMetrics {
    pub fn new(slow_query_ms: u64) -> Self {
        Self {
            counters: RwLock::new(Counters::default()),
            slow_query_ms,
            start_time: Timestamp::now(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_SLOW_QUERY_MS)
    }

    #[inline]
    pub fn slow_query_ms(&self) -> u64 {
        self.slow_query_ms
    }

    #[inline]
    pub fn start_time(&self) -> Timestamp {
        self.start_time
    }

    /// Count one execution
    pub fn record_query(&self, duration_ms: f64, failed: bool) {
        let bucket = bucket_for_latency(duration_ms);
        let slow = duration_ms > self.slow_query_ms as f64;

        let mut c = self.counters.write();
        c.queries_total += 1;
        if failed {
            c.queries_failed += 1;
        }
        if slow {
            c.slow_queries += 1;
        }
        c.latency_buckets[bucket] += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = *self.counters.read();
        MetricsSnapshot {
            queries_total: c.queries_total,
            queries_failed: c.queries_failed,
            slow_queries: c.slow_queries,
            start_time: self.start_time,
            histogram: std::array::from_fn(|i| HistogramBucket {
                upper_ms: bucket_upper_ms(i),
                count: c.latency_buckets[i],
            }),
        }
    }

    /// Zero every counter. The start time is kept.
    pub fn reset(&self) {
        *self.counters.write() = Counters::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bucket_bounds_are_inclusive() {
        assert_eq!(bucket_for_latency(0.0), 0);
        assert_eq!(bucket_for_latency(5.0), 0);
        assert_eq!(bucket_for_latency(5.01), 1);
        assert_eq!(bucket_for_latency(10.0), 1);
        assert_eq!(bucket_for_latency(50.0), 2);
        assert_eq!(bucket_for_latency(100.0), 3);
        assert_eq!(bucket_for_latency(500.0), 4);
        assert_eq!(bucket_for_latency(500.5), 5);
        assert_eq!(bucket_for_latency(1e9), 5);
    }

    #[test]
    fn test_record_query_counters() {
        let metrics = GlobalMetrics::new(200);
        metrics.record_query(3.0, false);
        metrics.record_query(200.0, true);
        metrics.record_query(201.0, false);
        metrics.record_query(9_000.0, true);

        let snap = metrics.snapshot();
        assert_eq!(snap.queries_total, 4);
        assert_eq!(snap.queries_failed, 2);
        // 200 is not strictly above the threshold
        assert_eq!(snap.slow_queries, 2);
        assert_eq!(snap.failure_rate(), 0.5);

        let counts: Vec<u64> = snap.histogram.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![1, 0, 0, 0, 2, 1]);
    }

    #[test]
    fn test_histogram_rows() {
        let snap = GlobalMetrics::with_defaults().snapshot();
        let bounds: Vec<Option<u64>> = snap.histogram.iter().map(|b| b.upper_ms).collect();
        assert_eq!(bounds, vec![Some(5), Some(10), Some(50), Some(100), Some(500), None]);
        assert!(!snap.start_time.is_epoch());
    }

    #[test]
    fn test_metrics_reset_keeps_start_time() {
        let metrics = GlobalMetrics::new(10);
        metrics.record_query(50.0, true);
        let started = metrics.start_time();

        metrics.reset();

        let snap = metrics.snapshot();
        assert_eq!(snap.queries_total, 0);
        assert_eq!(snap.slow_queries, 0);
        assert_eq!(snap.start_time, started);
    }

    #[test]
    fn test_metrics_concurrent_histogram_sums_to_total() {
        let metrics = GlobalMetrics::new(100);
        std::thread::scope(|s| {
            for t in 0..4 {
                let metrics = &metrics;
                s.spawn(move || {
                    for i in 0..1_000 {
                        metrics.record_query(((i * 7 + t) % 700) as f64, i % 10 == 0);
                    }
                });
            }
        });

        let snap = metrics.snapshot();
        assert_eq!(snap.queries_total, 4_000);
        assert_eq!(snap.queries_failed, 400);
        assert_eq!(snap.histogram.iter().map(|b| b.count).sum::<u64>(), 4_000);
    }
}
