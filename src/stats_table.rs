// ============================================================================
// QUERY STATS TABLE
// ============================================================================
// Bounded open-addressed hash table from fingerprint to running statistics:
// - Linear probing, start slot = fingerprint mod table size, stride 1
// - Twice as many slots as tracked queries (load factor <= 50%)
// - No deletion; entries only disappear through a full reset
// - Per-entry latency sample rings live in one flat arena indexed by slot
// - Anomaly flags recomputed on every write against the baseline latency
// ============================================================================

use std::mem;

use compact_str::CompactString;
use parking_lot::RwLock;
use serde::Serialize;
use smallvec::SmallVec;
use tracing::{trace, warn};

use crate::constants::*;
use crate::types::{Fingerprint, TagBuf, Timestamp};

// ----------------------------------------------------------------------------
// Entry Layout
// ----------------------------------------------------------------------------

/// One slot of the table. Zeroed (`Default`) slots are empty.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueryStatsEntry {
    pub fingerprint: Fingerprint,
    pub calls: u64,
    pub errors: u64,
    pub total_time_ms: f64,
    pub max_time_ms: f64,
    pub first_seen: Timestamp,
    pub last_seen: Timestamp,
    #[serde(skip)]
    pub valid: bool,

    /// True exactly when the latest execution was the first one
    pub is_new: bool,
    /// Recomputed on every execution
    pub is_anomalous: bool,
    /// Executions that carried no application name
    pub empty_app_count: u64,
    pub total_rows_scanned: u64,
    pub total_rows_returned: u64,

    pub last_app_name: TagBuf<APP_NAME_WIDTH>,
    pub last_user: TagBuf<USER_WIDTH>,
    pub last_database: TagBuf<DATABASE_WIDTH>,
    pub last_request_id: TagBuf<REQUEST_ID_WIDTH>,

    /// Next write position in this slot's sample ring
    #[serde(skip)]
    sample_pos: u32,
    /// Valid samples, capped at the ring capacity
    #[serde(skip)]
    sample_count: u32,
}

impl QueryStatsEntry {
    /// Average latency, 0 when never called
    #[inline]
    pub fn avg_time_ms(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_time_ms / self.calls as f64
        }
    }

    #[inline]
    pub fn sample_count(&self) -> usize {
        self.sample_count as usize
    }

    fn init(&mut self, fingerprint: Fingerprint, now: Timestamp) {
        *self = Self::default();
        self.fingerprint = fingerprint;
        self.valid = true;
        self.first_seen = now;
        self.last_seen = now;
    }
}

/// One execution as seen by the stats table
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionRecord<'a> {
    pub duration_ms: f64,
    pub failed: bool,
    pub app_name: &'a str,
    pub user: &'a str,
    pub database: &'a str,
    pub request_id: &'a str,
    pub rows_scanned: u64,
    pub rows_returned: u64,
}

// ----------------------------------------------------------------------------
// Anomaly Rule
// ----------------------------------------------------------------------------

/// An execution is anomalous when it runs longer than three times the
/// baseline, or scans more than a hundred rows per row it returns.
#[inline]
pub fn is_anomalous(baseline_ms: f64, duration_ms: f64, rows_scanned: u64, rows_returned: u64) -> bool {
    let slow = baseline_ms > 0.0 && duration_ms > baseline_ms * ANOMALY_LATENCY_FACTOR;
    let wasteful =
        rows_returned > 0 && (rows_scanned as f64 / rows_returned as f64) > ANOMALY_SCAN_RATIO;
    slow || wasteful
}

// ----------------------------------------------------------------------------
// Percentiles
// ----------------------------------------------------------------------------

/// p-th percentile (0..=100) of `samples`: the value at index
/// `floor(p/100 * (n-1))` of the ascending order, clamped to the range.
pub fn percentile(samples: &[f64], p: f64) -> f64 {
    let n = samples.len();
    if n == 0 {
        return 0.0;
    }

    let mut sorted: SmallVec<[f64; DEFAULT_LATENCY_SAMPLES]> = SmallVec::from_slice(samples);
    sorted.sort_by(f64::total_cmp);

    let idx = ((p / 100.0) * (n - 1) as f64).floor();
    let idx = if idx.is_nan() { 0 } else { idx.clamp(0.0, (n - 1) as f64) as usize };
    sorted[idx]
}

// ----------------------------------------------------------------------------
// Snapshots
// ----------------------------------------------------------------------------

/// Owned copy of one entry and its valid samples (oldest first), taken
/// under the shared lock.
#[derive(Debug, Clone)]
pub struct QueryStatsSnapshot {
    pub entry: QueryStatsEntry,
    pub samples: Vec<f64>,
}

impl QueryStatsSnapshot {
    #[inline]
    pub fn percentile(&self, p: f64) -> f64 {
        percentile(&self.samples, p)
    }

    /// Derived figures for the reporting layer
    pub fn summary(&self) -> QuerySummary {
        let e = &self.entry;
        QuerySummary {
            fingerprint: e.fingerprint,
            calls: e.calls,
            errors: e.errors,
            total_time_ms: e.total_time_ms,
            avg_time_ms: e.avg_time_ms(),
            max_time_ms: e.max_time_ms,
            p50_ms: self.percentile(50.0),
            p95_ms: self.percentile(95.0),
            p99_ms: self.percentile(99.0),
            first_seen: e.first_seen,
            last_seen: e.last_seen,
            is_new: e.is_new,
            is_anomalous: e.is_anomalous,
            empty_app_count: e.empty_app_count,
            total_rows_scanned: e.total_rows_scanned,
            total_rows_returned: e.total_rows_returned,
            rows_ratio: if e.total_rows_returned == 0 {
                0.0
            } else {
                e.total_rows_scanned as f64 / e.total_rows_returned as f64
            },
            last_app_name: CompactString::from(e.last_app_name.as_str()),
            last_user: CompactString::from(e.last_user.as_str()),
            last_database: CompactString::from(e.last_database.as_str()),
            last_request_id: CompactString::from(e.last_request_id.as_str()),
        }
    }
}

/// Report row for one query shape
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuerySummary {
    pub fingerprint: Fingerprint,
    pub calls: u64,
    pub errors: u64,
    pub total_time_ms: f64,
    pub avg_time_ms: f64,
    pub max_time_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub first_seen: Timestamp,
    pub last_seen: Timestamp,
    pub is_new: bool,
    pub is_anomalous: bool,
    pub empty_app_count: u64,
    pub total_rows_scanned: u64,
    pub total_rows_returned: u64,
    /// Rows scanned per row returned, 0 when nothing was returned
    pub rows_ratio: f64,
    pub last_app_name: CompactString,
    pub last_user: CompactString,
    pub last_database: CompactString,
    pub last_request_id: CompactString,
}

/// Occupancy figures for the table
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TableStats {
    pub entries: usize,
    pub capacity: usize,
    pub table_size: usize,
    pub collisions: u64,
    pub load_factor: f64,
}

// ----------------------------------------------------------------------------
// The Table
// ----------------------------------------------------------------------------

struct TableInner {
    entries: Box<[QueryStatsEntry]>,
    /// `table_size * sample_capacity` latency samples, one ring per slot
    samples: Box<[f64]>,
    num_entries: usize,
    /// Inserts that landed away from their start slot
    collisions: u64,
    full_warned: bool,
}

impl TableInner {
    /// Probe for `fingerprint`, stopping at the first empty slot
    fn find(&self, fingerprint: Fingerprint) -> Option<usize> {
        let size = self.entries.len();
        let start = fingerprint.start_slot(size);
        for i in 0..size {
            let idx = (start + i) % size;
            let entry = &self.entries[idx];
            if !entry.valid {
                return None;
            }
            if entry.fingerprint == fingerprint {
                return Some(idx);
            }
        }
        None
    }

    /// Probe for `fingerprint`, claiming the first empty slot when absent.
    /// Returns `None` when the entry cap is reached or no slot is free.
    fn find_or_create(&mut self, fingerprint: Fingerprint, max_entries: usize, now: Timestamp) -> Option<usize> {
        let size = self.entries.len();
        let start = fingerprint.start_slot(size);
        for i in 0..size {
            let idx = (start + i) % size;
            let entry = &mut self.entries[idx];
            if !entry.valid {
                if self.num_entries >= max_entries {
                    return None;
                }
                entry.init(fingerprint, now);
                self.num_entries += 1;
                if i > 0 {
                    self.collisions += 1;
                }
                trace!(
                    target: "querytrace::stats",
                    fingerprint = %fingerprint,
                    slot = idx,
                    probes = i + 1,
                    "Tracking new query shape"
                );
                return Some(idx);
            }
            if entry.fingerprint == fingerprint {
                return Some(idx);
            }
        }
        None
    }
}

/// Bounded per-query statistics shared by every execution context.
pub struct QueryStatsTable {
    inner: RwLock<TableInner>,
    max_queries: usize,
    table_size: usize,
    sample_capacity: usize,
}

impl QueryStatsTable {
    /// Allocate a zeroed table for up to `max_queries` shapes with
    /// `sample_capacity` latency samples each. A zero `max_queries` yields
    /// an unallocated table on which every operation is a no-op.
    pub fn new(max_queries: usize, sample_capacity: usize) -> Self {
        let table_size = max_queries * HASH_TABLE_SLOTS_PER_QUERY;
        let sample_capacity = sample_capacity.max(1);
        Self {
            inner: RwLock::new(TableInner {
                entries: vec![QueryStatsEntry::default(); table_size].into_boxed_slice(),
                samples: vec![0.0; table_size * sample_capacity].into_boxed_slice(),
                num_entries: 0,
                collisions: 0,
                full_warned: false,
            }),
            max_queries,
            table_size,
            sample_capacity,
        }
    }

    /// Table with the default capacities
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_MAX_QUERIES, DEFAULT_LATENCY_SAMPLES)
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.table_size > 0
    }

    /// Maximum number of distinct fingerprints
    #[inline]
    pub fn capacity(&self) -> usize {
        self.max_queries
    }

    #[inline]
    pub fn table_size(&self) -> usize {
        self.table_size
    }

    #[inline]
    pub fn sample_capacity(&self) -> usize {
        self.sample_capacity
    }

    /// Bytes reserved for slots and sample rings
    pub fn footprint_bytes(&self) -> usize {
        self.table_size * mem::size_of::<QueryStatsEntry>()
            + self.table_size * self.sample_capacity * mem::size_of::<f64>()
    }

    /// Record one execution of `fingerprint`.
    ///
    /// Runs in two phases: the baseline is computed under the shared lock,
    /// which is released before the exclusive section begins. The lock is
    /// not reentrant, so the order must stay this way. Dropped silently when
    /// the fingerprint is `0`, the table is unallocated, or the table is full.
    pub fn record(&self, fingerprint: Fingerprint, rec: &ExecutionRecord<'_>) {
        if fingerprint.is_none() || !self.is_initialized() {
            return;
        }

        let baseline = self.baseline_latency();

        let mut guard = self.inner.write();
        let inner = &mut *guard;
        // Clock read under the exclusive lock: last_seen is monotonic per entry
        let now = Timestamp::now();

        let Some(slot) = inner.find_or_create(fingerprint, self.max_queries, now) else {
            if !inner.full_warned {
                inner.full_warned = true;
                warn!(
                    target: "querytrace::capacity",
                    capacity = self.max_queries,
                    fingerprint = %fingerprint,
                    "Query stats table full, new query shapes are dropped"
                );
            }
            return;
        };

        let entry = &mut inner.entries[slot];
        let is_first_call = entry.calls == 0;

        entry.calls += 1;
        entry.total_time_ms += rec.duration_ms;
        entry.last_seen = now;
        if rec.failed {
            entry.errors += 1;
        }
        if rec.duration_ms > entry.max_time_ms {
            entry.max_time_ms = rec.duration_ms;
        }

        entry.is_new = is_first_call;
        if rec.app_name.is_empty() {
            entry.empty_app_count += 1;
        }
        entry.total_rows_scanned = entry.total_rows_scanned.saturating_add(rec.rows_scanned);
        entry.total_rows_returned = entry.total_rows_returned.saturating_add(rec.rows_returned);

        entry.last_app_name.set(rec.app_name);
        entry.last_user.set(rec.user);
        entry.last_database.set(rec.database);
        entry.last_request_id.set(rec.request_id);

        let cap = self.sample_capacity;
        let pos = entry.sample_pos as usize;
        inner.samples[slot * cap + pos] = rec.duration_ms;
        entry.sample_pos = ((pos + 1) % cap) as u32;
        if (entry.sample_count as usize) < cap {
            entry.sample_count += 1;
        }

        entry.is_anomalous = is_anomalous(baseline, rec.duration_ms, rec.rows_scanned, rec.rows_returned);
        if entry.is_anomalous {
            trace!(
                target: "querytrace::stats",
                fingerprint = %fingerprint,
                duration_ms = rec.duration_ms,
                baseline_ms = baseline,
                "Anomalous execution"
            );
        }
    }

    /// Copy of the entry for `fingerprint`, if tracked
    pub fn get(&self, fingerprint: Fingerprint) -> Option<QueryStatsSnapshot> {
        if fingerprint.is_none() || !self.is_initialized() {
            return None;
        }
        let inner = self.inner.read();
        let slot = inner.find(fingerprint)?;
        Some(self.copy_slot(&inner, slot))
    }

    /// Number of live entries
    pub fn count(&self) -> usize {
        if !self.is_initialized() {
            return 0;
        }
        self.inner.read().num_entries
    }

    pub fn collisions(&self) -> u64 {
        if !self.is_initialized() {
            return 0;
        }
        self.inner.read().collisions
    }

    /// Occupancy figures, read together under one shared lock
    pub fn stats(&self) -> TableStats {
        let (entries, collisions) = if self.is_initialized() {
            let inner = self.inner.read();
            (inner.num_entries, inner.collisions)
        } else {
            (0, 0)
        };
        TableStats {
            entries,
            capacity: self.max_queries,
            table_size: self.table_size,
            collisions,
            load_factor: if self.table_size == 0 {
                0.0
            } else {
                entries as f64 / self.table_size as f64
            },
        }
    }

    /// Zero every slot and counter. Storage is kept as is.
    pub fn reset(&self) {
        if !self.is_initialized() {
            return;
        }
        let mut inner = self.inner.write();
        inner.entries.fill(QueryStatsEntry::default());
        inner.samples.fill(0.0);
        inner.num_entries = 0;
        inner.collisions = 0;
        inner.full_warned = false;
    }

    /// Mean over valid entries of each entry's own average latency.
    ///
    /// Scans every slot under the shared lock, so its cost grows with the
    /// table and it runs once per `record`.
    pub fn baseline_latency(&self) -> f64 {
        if !self.is_initialized() {
            return 0.0;
        }
        let inner = self.inner.read();
        let (sum, count) = inner
            .entries
            .iter()
            .filter(|e| e.valid && e.calls > 0)
            .fold((0.0_f64, 0_u64), |(sum, count), e| (sum + e.avg_time_ms(), count + 1));

        if count > 0 {
            sum / count as f64
        } else {
            0.0
        }
    }

    /// Copies of every valid entry, in slot order
    pub fn snapshot(&self) -> Vec<QueryStatsSnapshot> {
        if !self.is_initialized() {
            return Vec::new();
        }
        let inner = self.inner.read();
        let mut out = Vec::with_capacity(inner.num_entries);
        for (slot, entry) in inner.entries.iter().enumerate() {
            if entry.valid {
                out.push(self.copy_slot(&inner, slot));
            }
        }
        out
    }

    fn copy_slot(&self, inner: &TableInner, slot: usize) -> QueryStatsSnapshot {
        let entry = inner.entries[slot];
        let cap = self.sample_capacity;
        let ring = &inner.samples[slot * cap..(slot + 1) * cap];
        let count = entry.sample_count as usize;

        // Oldest sample sits at the write position once the ring has wrapped
        let samples = if count < cap {
            ring[..count].to_vec()
        } else {
            let pos = entry.sample_pos as usize;
            ring[pos..].iter().chain(&ring[..pos]).copied().collect()
        };

        QueryStatsSnapshot { entry, samples }
    }
}

impl std::fmt::Debug for QueryStatsTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryStatsTable")
            .field("max_queries", &self.max_queries)
            .field("table_size", &self.table_size)
            .field("sample_capacity", &self.sample_capacity)
            .finish()
    }
}
