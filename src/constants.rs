// ============================================================================
// CONSTANTS & VERSION INFORMATION
// ============================================================================
// Fixed capacities and thresholds. Every structure is sized from these (or
// from the matching configuration values) exactly once at startup.
// ============================================================================

/// Engine version - follows semantic versioning
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ENGINE_NAME: &str = "querytrace-engine";
pub const ENGINE_FULL_NAME: &str = "QueryTrace Observability Engine";

// ----------------------------------------------------------------------------
// Query Stats Table
// ----------------------------------------------------------------------------

/// Maximum number of distinct fingerprints tracked
pub const DEFAULT_MAX_QUERIES: usize = 10_000;

/// Slots per tracked query; keeps the load factor at or below 50%
pub const HASH_TABLE_SLOTS_PER_QUERY: usize = 2;

/// Upper bound accepted for `capacity.max_queries`
pub const MAX_QUERIES_LIMIT: usize = 1_000_000;

/// Latency samples kept per query for percentile computation
pub const DEFAULT_LATENCY_SAMPLES: usize = 100;

/// Upper bound accepted for `capacity.latency_samples`
pub const MAX_LATENCY_SAMPLES: usize = 1024;

/// Upper bound on latency samples across every slot (512 MiB of `f64`)
pub const MAX_TOTAL_LATENCY_SAMPLES: usize = 1 << 26;

// ----------------------------------------------------------------------------
// Logs & Buffers
// ----------------------------------------------------------------------------

/// Slow query ring capacity
pub const DEFAULT_SLOW_QUERY_BUFFER_SIZE: usize = 1000;

/// Error track table capacity
pub const DEFAULT_ERROR_BUFFER_SIZE: usize = 1000;

/// Audit ring capacity
pub const DEFAULT_AUDIT_BUFFER_SIZE: usize = 5000;

// ----------------------------------------------------------------------------
// Context Tag Widths (bytes, including the terminator slot)
// ----------------------------------------------------------------------------

pub const APP_NAME_WIDTH: usize = 64;
pub const USER_WIDTH: usize = 32;
pub const DATABASE_WIDTH: usize = 64;
pub const REQUEST_ID_WIDTH: usize = 64;

// ----------------------------------------------------------------------------
// Anomaly Detection
// ----------------------------------------------------------------------------

/// A run is anomalous when it exceeds this multiple of the baseline latency
pub const ANOMALY_LATENCY_FACTOR: f64 = 3.0;

/// A run is anomalous when rows scanned per row returned exceeds this
pub const ANOMALY_SCAN_RATIO: f64 = 100.0;

// ----------------------------------------------------------------------------
// Global Metrics
// ----------------------------------------------------------------------------

/// Number of latency histogram buckets
pub const LATENCY_BUCKETS: usize = 6;

/// Inclusive upper bounds (ms) of the bounded histogram buckets; the last
/// bucket is unbounded
pub const LATENCY_BUCKET_BOUNDS_MS: [u64; LATENCY_BUCKETS - 1] = [5, 10, 50, 100, 500];

// ----------------------------------------------------------------------------
// Host Settings
// ----------------------------------------------------------------------------

/// Default slow query threshold (milliseconds)
pub const DEFAULT_SLOW_QUERY_MS: u64 = 200;

/// Minimum allowed slow query threshold (milliseconds)
pub const MIN_SLOW_QUERY_MS: u64 = 1;

/// Maximum allowed slow query threshold (milliseconds)
pub const MAX_SLOW_QUERY_MS: u64 = 60_000;

/// Default number of replay workers (0 = one per CPU)
pub const DEFAULT_REPLAY_WORKERS: usize = 0;
