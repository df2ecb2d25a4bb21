//! Engine error types
//!
//! None of these reach a producer calling `enqueue`; they describe
//! construction problems and failures inside pluggable strategies.

use thiserror::Error;

use sluice_config::ConfigError;

/// Error type returned by business code and strategy backends
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Engine construction and operational errors
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration failed validation
    #[error("invalid engine configuration: {0}")]
    Config(#[from] ConfigError),

    /// A partition key string did not parse
    #[error("invalid partition key '{0}'")]
    InvalidPartitionKey(String),

    /// Engine is shutting down or already stopped
    #[error("engine is shutting down")]
    ShuttingDown,
}

/// Failures raised by a resilience strategy
#[derive(Debug, Error)]
pub enum StrategyError {
    /// The backing store or service failed
    #[error("{strategy} backend failed: {message}")]
    Backend {
        /// Strategy name (e.g., "idempotency")
        strategy: &'static str,
        /// Error message
        message: String,
    },

    /// The operation did not finish in time
    #[error("{operation} timed out after {millis}ms")]
    Timeout {
        /// Operation name
        operation: &'static str,
        /// Elapsed bound in milliseconds
        millis: u64,
    },

    /// The shared cancellation signal fired
    #[error("operation cancelled")]
    Cancelled,
}

impl StrategyError {
    /// Create a Backend error
    pub fn backend(strategy: &'static str, message: impl Into<String>) -> Self {
        Self::Backend {
            strategy,
            message: message.into(),
        }
    }
}

/// Failures writing to the fallback store
#[derive(Debug, Error)]
pub enum FallbackError {
    /// File could not be opened or written
    #[error("fallback store I/O failed at '{path}': {source}")]
    Io {
        /// Path of the store file
        path: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Record could not be encoded or decoded
    #[error("fallback record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Store refuses new records
    #[error("fallback store unavailable: {0}")]
    Unavailable(String),
}
