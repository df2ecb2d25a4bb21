//! Fallback store configuration
//!
//! Selects where records that could not go through the normal path end up.
//! Without a path the engine keeps them in memory, which only makes sense
//! for tests and embedded use.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Fallback store configuration
///
/// # Example
///
/// ```toml
/// [fallback]
/// path = "data/fallback.jsonl"
/// sync = true
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// JSON lines file the records are appended to
    pub path: Option<PathBuf>,

    /// fsync after every record
    pub sync: bool,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            path: None,
            sync: true,
        }
    }
}

impl FallbackConfig {
    /// Whether records are persisted to disk
    pub fn is_durable(&self) -> bool {
        self.path.is_some()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(ref path) = self.path
            && path.as_os_str().is_empty()
        {
            return Err(ConfigError::invalid_value(
                "fallback",
                "path",
                "must not be empty",
            ));
        }
        Ok(())
    }
}
