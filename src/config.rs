// ============================================================================
// CONFIGURATION SYSTEM
// ============================================================================
// Host-side settings. The recording structures never read these: the host
// reads them once, sizes the shared state from `capacity` and injects the
// `tracing` switches into the `QueryTracer`.
// ============================================================================

use std::path::Path;
use std::str::FromStr;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::ConfigError;

/// Prefix for environment overrides, e.g. `QUERYTRACE_TRACING__SLOW_QUERY_MS`
pub const ENV_PREFIX: &str = "QUERYTRACE_";

// ----------------------------------------------------------------------------
// Root Configuration
// ----------------------------------------------------------------------------

/// Root configuration for the engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Host-facing recording switches
    #[serde(default)]
    pub tracing: TracingConfig,

    /// Fixed structure capacities
    #[serde(default)]
    pub capacity: CapacityConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from file with environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let config: Self = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ConfigError::ParseError {
                message: e.to_string(),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let slow = self.tracing.slow_query_ms;
        if !(MIN_SLOW_QUERY_MS..=MAX_SLOW_QUERY_MS).contains(&slow) {
            return Err(ConfigError::invalid_value(
                "tracing.slow_query_ms",
                format!(
                    "must be between {} and {} (got {})",
                    MIN_SLOW_QUERY_MS, MAX_SLOW_QUERY_MS, slow
                ),
            ));
        }

        let cap = &self.capacity;
        if cap.max_queries > MAX_QUERIES_LIMIT {
            return Err(ConfigError::invalid_value(
                "capacity.max_queries",
                format!("cannot exceed {}", MAX_QUERIES_LIMIT),
            ));
        }
        if !(1..=MAX_LATENCY_SAMPLES).contains(&cap.latency_samples) {
            return Err(ConfigError::invalid_value(
                "capacity.latency_samples",
                format!("must be between 1 and {}", MAX_LATENCY_SAMPLES),
            ));
        }
        let total_samples = cap
            .max_queries
            .saturating_mul(HASH_TABLE_SLOTS_PER_QUERY)
            .saturating_mul(cap.latency_samples);
        if total_samples > MAX_TOTAL_LATENCY_SAMPLES {
            return Err(ConfigError::invalid_value(
                "capacity.latency_samples",
                format!(
                    "max_queries x {} slots x latency_samples must not exceed {} (got {})",
                    HASH_TABLE_SLOTS_PER_QUERY, MAX_TOTAL_LATENCY_SAMPLES, total_samples
                ),
            ));
        }
        for (field, value) in [
            ("capacity.slow_query_buffer", cap.slow_query_buffer),
            ("capacity.audit_buffer", cap.audit_buffer),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid_value(field, "ring capacity must be at least 1"));
            }
        }

        Ok(())
    }

    /// Render the default configuration as TOML
    pub fn generate_default_config() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl FromStr for EngineConfig {
    type Err = ConfigError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Self = toml::from_str(toml_str).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }
}

// ----------------------------------------------------------------------------
// Recording Switches
// ----------------------------------------------------------------------------

/// Switches the host consults before invoking the recording structures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracingConfig {
    /// Master switch
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Executions slower than this go to the slow query buffer
    #[serde(default = "default_slow_query_ms")]
    pub slow_query_ms: u64,

    /// Correlation id applied when an execution carries none
    #[serde(default)]
    pub request_id: Option<String>,

    /// Record every execution into the audit buffer
    #[serde(default)]
    pub audit_enabled: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            slow_query_ms: DEFAULT_SLOW_QUERY_MS,
            request_id: None,
            audit_enabled: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_slow_query_ms() -> u64 {
    DEFAULT_SLOW_QUERY_MS
}

// ----------------------------------------------------------------------------
// Capacities
// ----------------------------------------------------------------------------

/// Fixed capacities of the shared structures, applied once at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityConfig {
    /// Distinct fingerprints in the query stats table (0 leaves it unallocated)
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,

    /// Latency samples per tracked query
    #[serde(default = "default_latency_samples")]
    pub latency_samples: usize,

    #[serde(default = "default_slow_query_buffer")]
    pub slow_query_buffer: usize,

    /// (fingerprint, error code) pairs in the error table (0 leaves it unallocated)
    #[serde(default = "default_error_entries")]
    pub error_entries: usize,

    #[serde(default = "default_audit_buffer")]
    pub audit_buffer: usize,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            max_queries: DEFAULT_MAX_QUERIES,
            latency_samples: DEFAULT_LATENCY_SAMPLES,
            slow_query_buffer: DEFAULT_SLOW_QUERY_BUFFER_SIZE,
            error_entries: DEFAULT_ERROR_BUFFER_SIZE,
            audit_buffer: DEFAULT_AUDIT_BUFFER_SIZE,
        }
    }
}

fn default_max_queries() -> usize {
    DEFAULT_MAX_QUERIES
}

fn default_latency_samples() -> usize {
    DEFAULT_LATENCY_SAMPLES
}

fn default_slow_query_buffer() -> usize {
    DEFAULT_SLOW_QUERY_BUFFER_SIZE
}

fn default_error_entries() -> usize {
    DEFAULT_ERROR_BUFFER_SIZE
}

fn default_audit_buffer() -> usize {
    DEFAULT_AUDIT_BUFFER_SIZE
}

// ----------------------------------------------------------------------------
// Logging Configuration
// ----------------------------------------------------------------------------

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Enable ANSI colors
    #[serde(default = "default_true")]
    pub colors: bool,

    /// Include source location
    #[serde(default)]
    pub source_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            colors: true,
            source_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "compact".into()
}
