// ============================================================================
// ERROR HANDLING FRAMEWORK
// ============================================================================
// Errors only exist on the outer surfaces (configuration, logging setup and
// the CLI). The recording structures never return them: every failure mode
// there (unset structure, full table, reserved key) degrades to a no-op.
// ============================================================================

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for the engine's outer surfaces.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TraceError {
    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            TraceError::Config(_) => "config",
            TraceError::Io(_) => "io",
            TraceError::Json(_) => "json",
            TraceError::Internal(_) => "internal",
        }
    }
}

/// Errors related to configuration loading and validation
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to parse configuration: {message}")]
    ParseError { message: String },

    #[error("Invalid configuration value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result type for the engine's outer surfaces
pub type TraceResult<T> = Result<T, TraceError>;
