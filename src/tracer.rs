// ============================================================================
// QUERY TRACER
// ============================================================================
// Host-facing facade. The host calls `begin` when an execution starts and
// `finish` when it ends; the tracer fans the event out to each structure in
// turn, one lock acquisition at a time. Updates for one execution are not
// atomic as a group: a reader may see the stats update before the matching
// audit event.
// ============================================================================

use std::mem;
use std::sync::Arc;

use compact_str::CompactString;
use serde::Serialize;
use tracing::{debug, info};

use crate::audit::{AuditBuffer, AuditEvent, OperationKind};
use crate::config::{CapacityConfig, EngineConfig, TracingConfig};
use crate::constants::*;
use crate::error_track::{ErrorCode, ErrorTrackEntry, ErrorTrackTable};
use crate::fingerprint::fingerprint_opt;
use crate::logging::PerfTimer;
use crate::metrics::{GlobalMetrics, MetricsSnapshot};
use crate::slow_query::{SlowQueryBuffer, SlowQueryEntry};
use crate::stats_table::{ExecutionRecord, QueryStatsTable, QuerySummary, TableStats};
use crate::types::{Fingerprint, Timestamp};

// ----------------------------------------------------------------------------
// Shared State
// ----------------------------------------------------------------------------

/// Every shared structure, allocated once at startup. An absent structure
/// turns each operation on it into a no-op.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    pub metrics: Option<Arc<GlobalMetrics>>,
    pub query_stats: Option<Arc<QueryStatsTable>>,
    pub slow_queries: Option<Arc<SlowQueryBuffer>>,
    pub errors: Option<Arc<ErrorTrackTable>>,
    pub audit: Option<Arc<AuditBuffer>>,
}

impl SharedState {
    /// Allocate and zero every structure. A zero capacity leaves the
    /// matching structure absent.
    pub fn allocate(capacity: &CapacityConfig, slow_query_ms: u64) -> Self {
        let state = Self {
            metrics: Some(Arc::new(GlobalMetrics::new(slow_query_ms))),
            query_stats: (capacity.max_queries > 0)
                .then(|| Arc::new(QueryStatsTable::new(capacity.max_queries, capacity.latency_samples))),
            slow_queries: (capacity.slow_query_buffer > 0)
                .then(|| Arc::new(SlowQueryBuffer::new(capacity.slow_query_buffer))),
            errors: (capacity.error_entries > 0).then(|| Arc::new(ErrorTrackTable::new(capacity.error_entries))),
            audit: (capacity.audit_buffer > 0).then(|| Arc::new(AuditBuffer::new(capacity.audit_buffer))),
        };

        info!(
            target: "querytrace::init",
            max_queries = capacity.max_queries,
            slow_query_buffer = capacity.slow_query_buffer,
            error_entries = capacity.error_entries,
            audit_buffer = capacity.audit_buffer,
            footprint_bytes = state.footprint_bytes(),
            "Shared state allocated"
        );
        state
    }

    /// State with nothing allocated
    pub fn unallocated() -> Self {
        Self::default()
    }

    /// Bytes reserved by the allocated structures
    pub fn footprint_bytes(&self) -> usize {
        let metrics = self.metrics.as_ref().map_or(0, |_| mem::size_of::<GlobalMetrics>());
        let stats = self.query_stats.as_ref().map_or(0, |t| t.footprint_bytes());
        let slow = self
            .slow_queries
            .as_ref()
            .map_or(0, |b| b.capacity() * mem::size_of::<SlowQueryEntry>());
        let errors = self
            .errors
            .as_ref()
            .map_or(0, |t| t.capacity() * mem::size_of::<ErrorTrackEntry>());
        let audit = self
            .audit
            .as_ref()
            .map_or(0, |b| b.capacity() * mem::size_of::<AuditEvent>());
        metrics + stats + slow + errors + audit
    }
}

// ----------------------------------------------------------------------------
// Host Settings
// ----------------------------------------------------------------------------

/// Switches injected by the host; the structures never read configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct TracerSettings {
    pub enabled: bool,
    pub slow_query_ms: u64,
    pub audit_enabled: bool,
    /// Applied when an execution carries no request id
    pub default_request_id: Option<CompactString>,
}

impl Default for TracerSettings {
    fn default() -> Self {
        Self::from(&TracingConfig::default())
    }
}

impl From<&TracingConfig> for TracerSettings {
    fn from(config: &TracingConfig) -> Self {
        Self {
            enabled: config.enabled,
            slow_query_ms: config.slow_query_ms,
            audit_enabled: config.audit_enabled,
            default_request_id: config.request_id.as_deref().map(CompactString::from),
        }
    }
}

// ----------------------------------------------------------------------------
// Per-Execution Types
// ----------------------------------------------------------------------------

/// Identity held for the duration of one execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionContext {
    pub fingerprint: Fingerprint,
    pub operation: OperationKind,
}

/// What the host measured when an execution ended
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionOutcome<'a> {
    pub duration_ms: f64,
    pub failed: bool,
    /// Ignored unless `failed`
    pub error_code: ErrorCode,
    pub rows_scanned: u64,
    pub rows_returned: u64,
    pub app_name: &'a str,
    pub user: &'a str,
    pub database: &'a str,
    pub request_id: &'a str,
}

impl<'a> ExecutionOutcome<'a> {
    fn to_record(&self, request_id: &'a str) -> ExecutionRecord<'a> {
        ExecutionRecord {
            duration_ms: self.duration_ms,
            failed: self.failed,
            app_name: self.app_name,
            user: self.user,
            database: self.database,
            request_id,
            rows_scanned: self.rows_scanned,
            rows_returned: self.rows_returned,
        }
    }
}

// ----------------------------------------------------------------------------
// Report
// ----------------------------------------------------------------------------

/// Everything the reporting layer reads, each part copied under its own lock
#[derive(Debug, Clone, Serialize)]
pub struct TraceReport {
    pub engine: &'static str,
    pub version: &'static str,
    pub generated_at: Timestamp,
    pub metrics: Option<MetricsSnapshot>,
    pub table: Option<TableStats>,
    pub queries: Vec<QuerySummary>,
    pub slow_queries_total: u64,
    pub slow_queries: Vec<SlowQueryEntry>,
    pub errors: Vec<ErrorTrackEntry>,
    pub audit_total: u64,
    pub audit: Vec<AuditEvent>,
}

// ----------------------------------------------------------------------------
// The Tracer
// ----------------------------------------------------------------------------

/// Receives host callbacks and records into the shared state.
#[derive(Debug, Clone)]
pub struct QueryTracer {
    state: SharedState,
    settings: TracerSettings,
}

impl QueryTracer {
    pub fn new(state: SharedState, settings: TracerSettings) -> Self {
        Self { state, settings }
    }

    /// Allocate fresh shared state sized and switched from `config`
    pub fn from_config(config: &EngineConfig) -> Self {
        let state = SharedState::allocate(&config.capacity, config.tracing.slow_query_ms);
        Self::new(state, TracerSettings::from(&config.tracing))
    }

    #[inline]
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    #[inline]
    pub fn settings(&self) -> &TracerSettings {
        &self.settings
    }

    /// Compute the identity of an execution that is starting
    pub fn begin(&self, query_text: Option<&str>) -> ExecutionContext {
        if !self.settings.enabled {
            return ExecutionContext::default();
        }
        ExecutionContext {
            fingerprint: fingerprint_opt(query_text),
            operation: query_text.map(OperationKind::from_statement).unwrap_or_default(),
        }
    }

    /// Record an execution that ended. Never fails; disabled tracing,
    /// absent structures and full tables all degrade to dropped data.
    pub fn finish(&self, ctx: &ExecutionContext, outcome: &ExecutionOutcome<'_>) {
        if !self.settings.enabled {
            return;
        }

        let request_id = match (outcome.request_id, &self.settings.default_request_id) {
            ("", Some(default)) => default.as_str(),
            (given, _) => given,
        };
        let fp = ctx.fingerprint;
        let duration = outcome.duration_ms;

        if let Some(metrics) = &self.state.metrics {
            metrics.record_query(duration, outcome.failed);
        }

        if let Some(stats) = &self.state.query_stats {
            stats.record(fp, &outcome.to_record(request_id));
        }

        if duration > self.settings.slow_query_ms as f64 {
            if let Some(slow) = &self.state.slow_queries {
                slow.record(fp, duration, outcome.app_name, outcome.user, outcome.rows_returned);
            }
        }

        if outcome.failed && !outcome.error_code.is_none() {
            if let Some(errors) = &self.state.errors {
                errors.record(fp, outcome.error_code);
            }
        }

        if self.settings.audit_enabled {
            if let Some(audit) = &self.state.audit {
                audit.record(
                    fp,
                    ctx.operation,
                    outcome.user,
                    outcome.database,
                    outcome.rows_returned,
                    duration,
                );
            }
        }
    }

    /// Copy every structure out for reporting. Derived figures are computed
    /// after each lock is released.
    pub fn report(&self) -> TraceReport {
        let timer = PerfTimer::with_threshold("report", 250);
        let s = &self.state;

        let snapshots = s.query_stats.as_ref().map(|t| t.snapshot()).unwrap_or_default();
        let queries: Vec<QuerySummary> = snapshots.iter().map(|snap| snap.summary()).collect();

        let report = TraceReport {
            engine: ENGINE_NAME,
            version: ENGINE_VERSION,
            generated_at: Timestamp::now(),
            metrics: s.metrics.as_ref().map(|m| m.snapshot()),
            table: s.query_stats.as_ref().map(|t| t.stats()),
            queries,
            slow_queries_total: s.slow_queries.as_ref().map_or(0, |b| b.total()),
            slow_queries: s.slow_queries.as_ref().map(|b| b.snapshot()).unwrap_or_default(),
            errors: s.errors.as_ref().map(|t| t.snapshot()).unwrap_or_default(),
            audit_total: s.audit.as_ref().map_or(0, |b| b.total()),
            audit: s.audit.as_ref().map(|b| b.snapshot()).unwrap_or_default(),
        };

        let elapsed_ms = timer.stop();
        debug!(
            target: "querytrace::report",
            queries = report.queries.len(),
            elapsed_ms,
            "Report built"
        );
        report
    }

    /// Clear the query stats table. The other structures are untouched.
    pub fn reset_query_stats(&self) {
        if let Some(stats) = &self.state.query_stats {
            stats.reset();
            info!(target: "querytrace::stats", "Query stats reset");
        }
    }

    /// Live entries in the query stats table
    pub fn query_count(&self) -> usize {
        self.state.query_stats.as_ref().map_or(0, |t| t.count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn small_capacity() -> CapacityConfig {
        CapacityConfig {
            max_queries: 32,
            latency_samples: 8,
            slow_query_buffer: 4,
            error_entries: 4,
            audit_buffer: 4,
        }
    }

    fn tracer(audit_enabled: bool) -> QueryTracer {
        let settings = TracerSettings {
            slow_query_ms: 100,
            audit_enabled,
            ..TracerSettings::default()
        };
        QueryTracer::new(SharedState::allocate(&small_capacity(), settings.slow_query_ms), settings)
    }

    fn outcome(duration_ms: f64) -> ExecutionOutcome<'static> {
        ExecutionOutcome {
            duration_ms,
            app_name: "web",
            user: "alice",
            database: "shop",
            ..Default::default()
        }
    }

    #[test]
    fn test_begin_computes_identity() {
        let t = tracer(false);
        let ctx = t.begin(Some("DELETE FROM carts WHERE id = 9"));
        assert_eq!(ctx.fingerprint, crate::fingerprint::fingerprint("delete from carts where id = 1"));
        assert_eq!(ctx.operation, OperationKind::Delete);

        let none = t.begin(None);
        assert!(none.fingerprint.is_none());
        assert_eq!(none.operation, OperationKind::Unknown);
    }

    #[test]
    fn test_finish_fans_out_in_order() {
        let t = tracer(true);
        let ctx = t.begin(Some("select * from items where id = 1"));

        t.finish(&ctx, &outcome(20.0));
        t.finish(&ctx, &ExecutionOutcome {
            failed: true,
            error_code: ErrorCode::from_sqlstate("57014").unwrap(),
            ..outcome(150.0)
        });

        let s = t.state();
        let metrics = s.metrics.as_ref().unwrap().snapshot();
        assert_eq!(metrics.queries_total, 2);
        assert_eq!(metrics.queries_failed, 1);
        assert_eq!(metrics.slow_queries, 1);

        let entry = s.query_stats.as_ref().unwrap().get(ctx.fingerprint).unwrap().entry;
        assert_eq!(entry.calls, 2);
        assert_eq!(entry.errors, 1);

        assert_eq!(s.slow_queries.as_ref().unwrap().total(), 1);
        assert_eq!(s.errors.as_ref().unwrap().count(), 1);

        let audit = s.audit.as_ref().unwrap().snapshot();
        assert_eq!(audit.len(), 2);
        assert_eq!(audit[0].operation, OperationKind::Read);
        assert_eq!(audit[1].user.as_str(), "alice");
    }

    #[test]
    fn test_slow_threshold_is_strict() {
        let t = tracer(false);
        let ctx = t.begin(Some("select 1"));
        t.finish(&ctx, &outcome(100.0));
        assert_eq!(t.state().slow_queries.as_ref().unwrap().total(), 0);
        t.finish(&ctx, &outcome(100.5));
        assert_eq!(t.state().slow_queries.as_ref().unwrap().total(), 1);
    }

    #[test]
    fn test_failure_without_code_skips_error_table() {
        let t = tracer(false);
        let ctx = t.begin(Some("select 1"));
        t.finish(&ctx, &ExecutionOutcome { failed: true, ..outcome(1.0) });
        assert_eq!(t.state().errors.as_ref().unwrap().count(), 0);

        // A code on a successful run is ignored too
        t.finish(&ctx, &ExecutionOutcome {
            error_code: ErrorCode::from_sqlstate("23505").unwrap(),
            ..outcome(1.0)
        });
        assert_eq!(t.state().errors.as_ref().unwrap().count(), 0);
    }

    #[test]
    fn test_audit_switch() {
        let t = tracer(false);
        let ctx = t.begin(Some("insert into t values (1)"));
        t.finish(&ctx, &outcome(1.0));
        assert_eq!(t.state().audit.as_ref().unwrap().total(), 0);
    }

    #[test]
    fn test_disabled_tracer_is_noop() {
        let settings = TracerSettings { enabled: false, ..TracerSettings::default() };
        let t = QueryTracer::new(SharedState::allocate(&small_capacity(), 100), settings);

        let ctx = t.begin(Some("select 1"));
        assert!(ctx.fingerprint.is_none());
        t.finish(&ExecutionContext { fingerprint: Fingerprint::from_raw(1), ..ctx }, &outcome(500.0));

        assert_eq!(t.state().metrics.as_ref().unwrap().snapshot().queries_total, 0);
        assert_eq!(t.query_count(), 0);
    }

    #[test]
    fn test_unallocated_state_is_noop() {
        let t = QueryTracer::new(SharedState::unallocated(), TracerSettings::default());
        let ctx = t.begin(Some("select 1"));
        t.finish(&ctx, &outcome(1_000.0));
        t.reset_query_stats();

        assert_eq!(t.query_count(), 0);
        assert_eq!(t.state().footprint_bytes(), 0);
        let report = t.report();
        assert!(report.metrics.is_none());
        assert!(report.queries.is_empty());
    }

    #[test]
    fn test_zero_capacity_leaves_structure_absent() {
        let capacity = CapacityConfig { max_queries: 0, error_entries: 0, ..small_capacity() };
        let state = SharedState::allocate(&capacity, 100);
        assert!(state.query_stats.is_none());
        assert!(state.errors.is_none());
        assert!(state.slow_queries.is_some());
        assert!(state.footprint_bytes() > 0);
    }

    #[test]
    fn test_default_request_id_applied() {
        let settings = TracerSettings {
            default_request_id: Some("batch-42".into()),
            ..TracerSettings::default()
        };
        let t = QueryTracer::new(SharedState::allocate(&small_capacity(), 200), settings);
        let ctx = t.begin(Some("select 1"));
        let stats = t.state().query_stats.clone().unwrap();

        t.finish(&ctx, &outcome(1.0));
        assert_eq!(stats.get(ctx.fingerprint).unwrap().entry.last_request_id.as_str(), "batch-42");

        t.finish(&ctx, &ExecutionOutcome { request_id: "req-9", ..outcome(1.0) });
        assert_eq!(stats.get(ctx.fingerprint).unwrap().entry.last_request_id.as_str(), "req-9");
    }

    #[test]
    fn test_reset_query_stats_only_clears_table() {
        let t = tracer(true);
        let ctx = t.begin(Some("select 1"));
        t.finish(&ctx, &outcome(500.0));
        assert_eq!(t.query_count(), 1);

        t.reset_query_stats();

        assert_eq!(t.query_count(), 0);
        assert_eq!(t.state().metrics.as_ref().unwrap().snapshot().queries_total, 1);
        assert_eq!(t.state().slow_queries.as_ref().unwrap().total(), 1);
        assert_eq!(t.state().audit.as_ref().unwrap().total(), 1);
    }

    #[test]
    fn test_report_serializes() {
        let t = tracer(true);
        let ctx = t.begin(Some("update t set x = 'a' where id = 3"));
        t.finish(&ctx, &ExecutionOutcome {
            failed: true,
            error_code: ErrorCode::from_sqlstate("40P01").unwrap(),
            ..outcome(250.0)
        });

        let report = t.report();
        assert_eq!(report.queries.len(), 1);
        assert_eq!(report.table.unwrap().entries, 1);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["engine"], ENGINE_NAME);
        assert_eq!(json["queries"][0]["calls"], 1);
        assert_eq!(json["errors"][0]["error_code"], "40P01");
        assert_eq!(json["audit"][0]["operation"], "update");
        assert_eq!(json["slow_queries"][0]["app_name"], "web");
        assert_eq!(json["metrics"]["histogram"][5]["upper_ms"], serde_json::Value::Null);
    }

    #[test]
    fn test_concurrent_executions_share_state() {
        let t = tracer(true);
        let shapes = ["select * from a where id = 1", "select * from b where id = 1", "delete from c"];

        std::thread::scope(|s| {
            for worker in 0..6 {
                let t = &t;
                s.spawn(move || {
                    for i in 0..200 {
                        let ctx = t.begin(Some(shapes[(worker + i) % shapes.len()]));
                        t.finish(&ctx, &outcome(((i % 50) * 5) as f64));
                    }
                });
            }
        });

        assert_eq!(t.query_count(), 3);
        let report = t.report();
        assert_eq!(report.metrics.unwrap().queries_total, 1_200);
        assert_eq!(report.queries.iter().map(|q| q.calls).sum::<u64>(), 1_200);
        assert_eq!(report.audit_total, 1_200);
        assert_eq!(report.audit.len(), 4);
    }
}
