//! Sluice Configuration
//!
//! TOML-based configuration loading with sensible defaults.
//! An empty file is a valid config - only specify what you need to change.
//!
//! # Parsing
//!
//! Use the `FromStr` trait to parse configuration:
//!
//! ```
//! use sluice_config::Config;
//! use std::str::FromStr;
//!
//! let config = Config::from_str("[engine]\nbatch_size = 50").unwrap();
//! assert_eq!(config.engine.batch_size, 50);
//! ```
//!
//! # Example Config
//!
//! ```toml
//! [engine]
//! batch_size = 100
//! batch_interval = "100ms"
//! partition_count = 4
//! max_partition_count = 32
//!
//! [fallback]
//! path = "data/fallback.jsonl"
//!
//! [metrics]
//! interval = "30s"
//!
//! [log]
//! level = "info"
//! ```

mod engine;
mod error;
mod fallback;
mod logging;
mod metrics;
mod validation;

use std::fs;
use std::path::Path;
use std::str::FromStr;

pub use engine::{
    Backoff, DEFAULT_BATCH_SIZE, DEFAULT_FAILURE_THRESHOLD, DEFAULT_ISOLATE_MAX_CONCURRENCY,
    DEFAULT_MAX_PARTITION_COUNT, DEFAULT_PARTITION_COUNT, DEFAULT_RETRY_MAX_COUNT, EngineConfig,
    ExecutionMode,
};
pub use error::{ConfigError, Result};
pub use fallback::FallbackConfig;
pub use logging::{LogConfig, LogFormat, LogLevel, LogOutput};
pub use metrics::MetricsConfig;

use serde::Deserialize;

/// Main configuration structure
///
/// All sections are optional with sensible defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Batch engine settings
    pub engine: EngineConfig,

    /// Fallback store settings
    pub fallback: FallbackConfig,

    /// Periodic health report settings
    pub metrics: MetricsConfig,

    /// Logging configuration
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, contains invalid TOML, or fails
    /// validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string
    ///
    /// Prefer using the `FromStr` trait implementation.
    fn parse(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section
    fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_str("").unwrap();
        assert_eq!(config.engine, EngineConfig::default());
        assert!(config.metrics.enabled);
        assert!(!config.fallback.is_durable());
        assert_eq!(config.log.level, LogLevel::Info);
    }

    #[test]
    fn test_full_config() {
        let toml = r#"
[engine]
batch_size = 10
batch_interval = "20ms"
partition_count = 2
max_partition_count = 8

[engine.execution_mode_overrides]
"0" = "parallel"

[fallback]
path = "fallback.jsonl"

[metrics]
interval = "5s"
include_partitions = true

[log]
level = "debug"
format = "json"
"#;
        let config = Config::from_str(toml).unwrap();
        assert_eq!(config.engine.batch_size, 10);
        assert_eq!(config.engine.batch_interval, Duration::from_millis(20));
        assert_eq!(config.engine.execution_mode_for(0), ExecutionMode::Parallel);
        assert!(config.fallback.is_durable());
        assert!(config.metrics.include_partitions);
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn test_shipped_example_config_parses() {
        let config = Config::from_str(include_str!("../../../configs/sluice.toml")).unwrap();
        assert_eq!(config.engine.retry_backoff, Backoff::Exponential);
        assert_eq!(config.engine.execution_mode_for(0), ExecutionMode::Parallel);
        assert_eq!(config.engine.execution_mode_for(1), ExecutionMode::Serial);
        assert_eq!(config.log.targets.len(), 1);
    }

    #[test]
    fn test_invalid_engine_section_rejected() {
        let err = Config::from_str("[engine]\nbatch_size = 0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let err = Config::from_str("[engine\nbatch_size = ").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sluice.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "[engine]\nretry_max_count = 7").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.engine.retry_max_count, 7);
    }

    #[test]
    fn test_from_missing_file() {
        let err = Config::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError { .. }));
    }
}
