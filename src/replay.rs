// ============================================================================
// EXECUTION REPLAY
// ============================================================================
// Feeds recorded execution events (JSON lines) through a shared tracer from
// a pool of worker threads, standing in for the host's execution hooks.
// ============================================================================

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use compact_str::CompactString;
use rayon::prelude::*;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{TraceError, TraceResult};
use crate::error_track::ErrorCode;
use crate::logging::PerfTimer;
use crate::tracer::{ExecutionOutcome, QueryTracer};

/// One recorded execution
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReplayEvent {
    #[serde(default)]
    pub query: Option<String>,
    pub duration_ms: f64,
    #[serde(default)]
    pub failed: bool,
    /// Five-character SQLSTATE
    #[serde(default)]
    pub error_code: Option<CompactString>,
    #[serde(default)]
    pub rows_scanned: u64,
    #[serde(default)]
    pub rows_returned: u64,
    #[serde(default)]
    pub app_name: CompactString,
    #[serde(default)]
    pub user: CompactString,
    #[serde(default)]
    pub database: CompactString,
    #[serde(default)]
    pub request_id: CompactString,
}

impl ReplayEvent {
    /// Packed error code; absent or malformed codes map to none
    pub fn error_code(&self) -> ErrorCode {
        self.error_code
            .as_deref()
            .and_then(ErrorCode::from_sqlstate)
            .unwrap_or(ErrorCode::NONE)
    }

    pub fn outcome(&self) -> ExecutionOutcome<'_> {
        ExecutionOutcome {
            duration_ms: self.duration_ms,
            failed: self.failed,
            error_code: self.error_code(),
            rows_scanned: self.rows_scanned,
            rows_returned: self.rows_returned,
            app_name: &self.app_name,
            user: &self.user,
            database: &self.database,
            request_id: &self.request_id,
        }
    }
}

/// Parse JSON-lines events. Blank lines are skipped; a malformed line fails
/// the whole load with its line number.
pub fn parse_events<R: BufRead>(reader: R) -> TraceResult<Vec<ReplayEvent>> {
    let mut events = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event: ReplayEvent = serde_json::from_str(line)
            .map_err(|e| TraceError::Internal(format!("line {}: {}", idx + 1, e)))?;

        if let Some(code) = &event.error_code {
            if ErrorCode::from_sqlstate(code).is_none() {
                warn!(
                    target: "querytrace::replay",
                    line = idx + 1,
                    error_code = %code,
                    "Ignoring malformed SQLSTATE"
                );
            }
        }
        events.push(event);
    }

    Ok(events)
}

/// Load events from a JSON-lines file
pub fn load_events<P: AsRef<Path>>(path: P) -> TraceResult<Vec<ReplayEvent>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let events = parse_events(BufReader::new(file))?;
    debug!(
        target: "querytrace::replay",
        path = %path.display(),
        events = events.len(),
        "Events loaded"
    );
    Ok(events)
}

/// Feed `events` through `tracer` from `workers` threads (0 = one per CPU)
pub fn replay(tracer: &QueryTracer, events: &[ReplayEvent], workers: usize) -> TraceResult<()> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("querytrace-replay-{}", i))
        .build()
        .map_err(|e| TraceError::Internal(format!("Failed to build replay pool: {}", e)))?;

    let timer = PerfTimer::new("replay");
    pool.install(|| {
        events.par_iter().for_each(|event| {
            let ctx = tracer.begin(event.query.as_deref());
            tracer.finish(&ctx, &event.outcome());
        });
    });
    let elapsed_ms = timer.stop();

    info!(
        target: "querytrace::replay",
        events = events.len(),
        workers = pool.current_num_threads(),
        elapsed_ms,
        "Replay finished"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use std::io::Write;

    const EVENTS: &str = r#"
{"query": "SELECT * FROM users WHERE id = 1", "duration_ms": 12.0, "app_name": "web", "user": "alice"}
{"query": "select * from users where id = 2", "duration_ms": 340.0, "rows_scanned": 5000, "rows_returned": 1}

{"query": "insert into orders values (1, 'x')", "duration_ms": 3.5, "failed": true, "error_code": "23505"}
{"duration_ms": 1.0}
"#;

    #[test]
    fn test_parse_events_skips_blank_lines() {
        let events = parse_events(EVENTS.as_bytes()).unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].app_name.as_str(), "web");
        assert_eq!(events[2].error_code().to_string(), "23505");
        assert!(events[3].query.is_none());
        assert!(events[3].error_code().is_none());
    }

    #[test]
    fn test_parse_events_reports_line_number() {
        let err = parse_events("{\"duration_ms\": 1.0}\nnot json\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 2"), "{}", err);
    }

    #[test]
    fn test_malformed_code_maps_to_none() {
        let events = parse_events("{\"duration_ms\": 1.0, \"error_code\": \"bad\"}".as_bytes()).unwrap();
        assert!(events[0].error_code().is_none());
    }

    #[test]
    fn test_replay_through_tracer() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(EVENTS.as_bytes()).unwrap();

        let mut config = EngineConfig::default();
        config.tracing.audit_enabled = true;
        let tracer = QueryTracer::from_config(&config);

        let events = load_events(file.path()).unwrap();
        replay(&tracer, &events, 2).unwrap();

        let report = tracer.report();
        let metrics = report.metrics.unwrap();
        assert_eq!(metrics.queries_total, 4);
        assert_eq!(metrics.queries_failed, 1);
        assert_eq!(metrics.slow_queries, 1);
        // Two shapes; the text-less event has no identity
        assert_eq!(tracer.query_count(), 2);
        assert_eq!(report.slow_queries.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.audit_total, 4);
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_events("/nonexistent/events.jsonl").unwrap_err();
        assert_eq!(err.category(), "io");
    }
}
