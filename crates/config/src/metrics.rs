//! Metrics reporting configuration
//!
//! Controls the periodic health report the engine writes to the log.
//!
//! # Defaults
//!
//! - `enabled`: true
//! - `interval`: 60s
//! - `include_partitions`: false

use serde::Deserialize;
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Metrics configuration
///
/// # Example
///
/// ```toml
/// [metrics]
/// enabled = true
/// interval = "30s"
/// include_partitions = true
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable the periodic health report
    pub enabled: bool,

    /// Reporting interval
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Also log one line per partition with its health snapshot
    pub include_partitions: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
            include_partitions: false,
        }
    }
}

impl MetricsConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.enabled && self.interval.is_zero() {
            return Err(ConfigError::invalid_value(
                "metrics",
                "interval",
                "must be greater than 0 when metrics are enabled",
            ));
        }
        Ok(())
    }
}
