//! Configuration error types

use std::io;
use thiserror::Error;

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur when loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        /// Path to the file
        path: String,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Validation error - a field holds a value outside its allowed range
    #[error("{section} has invalid {field}: {message}")]
    InvalidValue {
        /// Section name (e.g., "engine", "metrics")
        section: &'static str,
        /// Field name
        field: &'static str,
        /// Error message
        message: String,
    },

    /// Validation error - an execution mode override names a bad partition
    #[error("execution mode override for partition '{partition}' is invalid: {message}")]
    InvalidOverride {
        /// The override key as written in the config
        partition: String,
        /// Error message
        message: String,
    },
}

impl ConfigError {
    /// Create an InvalidValue error
    pub fn invalid_value(
        section: &'static str,
        field: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            section,
            field,
            message: message.into(),
        }
    }

    /// Create an InvalidOverride error
    pub fn invalid_override(partition: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOverride {
            partition: partition.into(),
            message: message.into(),
        }
    }
}
