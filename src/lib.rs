//! # QueryTrace Engine - In-Process Query Observability
//!
//! Low-overhead capture of per-query performance, error and anomaly signals
//! from every executed statement, using only structures allocated once at
//! startup. Recording never fails the monitored workload: full tables, unset
//! structures and reserved keys all degrade to dropped data.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          QUERYTRACE ENGINE                            │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  host begin ──► FINGERPRINTER ──► ExecutionContext                    │
//! │  host finish ─► METRICS → STATS TABLE → SLOW RING → ERRORS → AUDIT    │
//! │  reporting  ◄── per-structure snapshots (shared lock, then format)    │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Fingerprinting**: literal-insensitive query shapes hashed with FNV-1a
//! - **Query Stats**: open-addressed table with latency percentiles
//! - **Anomaly Detection**: latency against the cross-query baseline, scan ratio
//! - **Bounded Logs**: slow query and audit rings, per-code error counts

#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]

pub mod audit;
pub mod config;
pub mod constants;
pub mod error;
pub mod error_track;
pub mod fingerprint;
pub mod logging;
pub mod metrics;
pub mod replay;
pub mod ring;
pub mod slow_query;
pub mod stats_table;
pub mod tracer;
pub mod types;

pub use audit::{AuditBuffer, AuditEvent, OperationKind};
pub use config::{CapacityConfig, EngineConfig, LoggingConfig, TracingConfig};
pub use error::{ConfigError, TraceError, TraceResult};
pub use error_track::{ErrorCode, ErrorTrackEntry, ErrorTrackTable};
pub use fingerprint::{fingerprint, normalize};
pub use metrics::{GlobalMetrics, MetricsSnapshot};
pub use slow_query::{SlowQueryBuffer, SlowQueryEntry};
pub use stats_table::{ExecutionRecord, QueryStatsEntry, QueryStatsTable, QuerySummary};
pub use tracer::{ExecutionContext, ExecutionOutcome, QueryTracer, SharedState, TraceReport, TracerSettings};
pub use types::{Fingerprint, Timestamp};
