//! Logging configuration
//!
//! Controls how the sluice binary sets up `tracing`. The engine crate only
//! emits events; installing a subscriber is left to the process.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Log level
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level - per-message detail
    Trace,
    /// Debug level - per-batch detail
    Debug,
    /// Info level - lifecycle events (default)
    #[default]
    Info,
    /// Warn level - fallback writes, breaker transitions
    Warn,
    /// Error level - fallback store failures, loop panics
    Error,
}

impl LogLevel {
    /// Convert to a tracing filter directive
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable console output (default)
    #[default]
    Console,
    /// One JSON object per event
    Json,
}

/// Log output destination
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    /// Write to stdout (default)
    #[default]
    Stdout,
    /// Write to stderr
    Stderr,
    /// Append to a file
    #[serde(untagged)]
    File(String),
}

/// Logging configuration
///
/// # Example
///
/// ```toml
/// [log]
/// level = "info"
/// format = "json"
/// output = "stderr"
///
/// [log.targets]
/// sluice_engine = "debug"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Base level applied to every target
    pub level: LogLevel,

    /// Output format (console, json)
    pub format: LogFormat,

    /// Output destination (stdout, stderr, or file path)
    pub output: LogOutput,

    /// Per-target level overrides, keyed by tracing target (crate path)
    pub targets: BTreeMap<String, LogLevel>,
}

impl LogConfig {
    /// Build an `EnvFilter`-compatible directive string
    ///
    /// The base level comes first, followed by one `target=level` pair per
    /// override, e.g. `info,sluice_engine=debug`.
    pub fn filter_directive(&self) -> String {
        let mut directive = self.level.as_str().to_string();
        for (target, level) in &self.targets {
            directive.push(',');
            directive.push_str(target);
            directive.push('=');
            directive.push_str(level.as_str());
        }
        directive
    }
}
