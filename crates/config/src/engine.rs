//! Batch engine configuration
//!
//! Every knob the partitioned batch engine reads: batching, partition
//! scaling, resilience layers and shutdown bounds. The value is immutable
//! once handed to the engine; runtime changes replace it wholesale.
//!
//! # Example
//!
//! ```toml
//! [engine]
//! batch_size = 200
//! batch_interval = "50ms"
//! partition_count = 8
//! max_partition_count = 64
//! retry_max_count = 2
//! default_execution_mode = "serial"
//!
//! [engine.execution_mode_overrides]
//! "3" = "parallel"
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of envelopes per batch
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default initial partition count
pub const DEFAULT_PARTITION_COUNT: usize = 4;

/// Default upper bound for dynamic partition scaling
pub const DEFAULT_MAX_PARTITION_COUNT: usize = 32;

/// Default admitted-but-unfinished messages per partition
pub const DEFAULT_ISOLATE_MAX_CONCURRENCY: usize = 10_000;

/// Default retry attempts after the first failure
pub const DEFAULT_RETRY_MAX_COUNT: u32 = 3;

/// Default consecutive terminal failures before a partition breaker opens
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Order guarantee a partition runs under
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One batch at a time, in arrival order (default)
    #[default]
    Serial,
    /// Several batches in flight, no ordering guarantee
    Parallel,
}

impl ExecutionMode {
    /// Lowercase name used in config and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Serial => "serial",
            Self::Parallel => "parallel",
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delay shape between retry attempts
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Always wait `retry_interval` (default)
    #[default]
    Fixed,
    /// Double `retry_interval` per attempt, capped at 64x
    Exponential,
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based)
    pub fn delay(&self, base: Duration, attempt: u32) -> Duration {
        match self {
            Self::Fixed => base,
            Self::Exponential => base.saturating_mul(1 << attempt.min(6)),
        }
    }
}

/// Batch engine configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum envelopes handed to one `process_batch` call
    pub batch_size: usize,

    /// Idle sleep of a consumer loop when its queue is empty
    #[serde(with = "humantime_serde")]
    pub batch_interval: Duration,

    /// Partition count at startup
    pub partition_count: usize,

    /// Lower bound for dynamic scaling
    pub min_partition_count: usize,

    /// Upper bound for dynamic scaling
    pub max_partition_count: usize,

    /// Admitted-but-unfinished messages allowed per partition
    pub isolate_max_concurrency_per_partition: usize,

    /// Retries after the first failed attempt
    pub retry_max_count: u32,

    /// Base delay between attempts
    #[serde(with = "humantime_serde")]
    pub retry_interval: Duration,

    /// Delay shape between attempts
    pub retry_backoff: Backoff,

    /// Upper bound on waiting for in-flight batches during a mode switch
    #[serde(with = "humantime_serde")]
    pub execution_mode_switch_timeout: Duration,

    /// Mean queue length above which partitions are added
    pub partition_expand_threshold: usize,

    /// Mean queue length below which partitions are removed
    pub partition_shrink_threshold: usize,

    /// Scaling check period, also the minimum gap between two adjustments
    #[serde(with = "humantime_serde")]
    pub partition_adjust_interval: Duration,

    /// Mode used by partitions without an override
    pub default_execution_mode: ExecutionMode,

    /// Per-partition mode overrides, keyed by partition index
    pub execution_mode_overrides: BTreeMap<String, ExecutionMode>,

    /// Batches in flight at once for a partition in parallel mode
    pub parallel_max_concurrency: usize,

    /// Consecutive terminal failures before a partition breaker opens
    pub circuit_breaker_failure_threshold: u32,

    /// Time an open breaker rejects before allowing a trial
    #[serde(with = "humantime_serde")]
    pub circuit_breaker_break_duration: Duration,

    /// Upper bound on a degrade handler call
    #[serde(with = "humantime_serde")]
    pub degrade_timeout: Duration,

    /// Pause of a consumer loop after a terminal batch failure
    #[serde(with = "humantime_serde")]
    pub failure_backoff: Duration,

    /// Wait for consumer loops to exit before forcing the drain
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Envelopes pre-allocated in the reuse pool
    pub envelope_pool_size: usize,

    /// How long processed ids are remembered by the in-memory checker
    #[serde(with = "humantime_serde")]
    pub idempotency_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_interval: Duration::from_millis(100),
            partition_count: DEFAULT_PARTITION_COUNT,
            min_partition_count: 1,
            max_partition_count: DEFAULT_MAX_PARTITION_COUNT,
            isolate_max_concurrency_per_partition: DEFAULT_ISOLATE_MAX_CONCURRENCY,
            retry_max_count: DEFAULT_RETRY_MAX_COUNT,
            retry_interval: Duration::from_millis(200),
            retry_backoff: Backoff::Fixed,
            execution_mode_switch_timeout: Duration::from_secs(5),
            partition_expand_threshold: 1000,
            partition_shrink_threshold: 100,
            partition_adjust_interval: Duration::from_secs(30),
            default_execution_mode: ExecutionMode::Serial,
            execution_mode_overrides: BTreeMap::new(),
            parallel_max_concurrency: 4,
            circuit_breaker_failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            circuit_breaker_break_duration: Duration::from_secs(30),
            degrade_timeout: Duration::from_secs(5),
            failure_backoff: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(10),
            envelope_pool_size: 4096,
            idempotency_ttl: Duration::from_secs(3600),
        }
    }
}

impl EngineConfig {
    /// Resolved mode overrides as `(partition index, mode)` pairs
    ///
    /// Keys that do not parse are skipped here; `validate()` rejects them.
    pub fn mode_overrides(&self) -> impl Iterator<Item = (u32, ExecutionMode)> + '_ {
        self.execution_mode_overrides
            .iter()
            .filter_map(|(key, mode)| key.trim().parse::<u32>().ok().map(|idx| (idx, *mode)))
    }

    /// Mode configured for a partition index
    pub fn execution_mode_for(&self, partition: u32) -> ExecutionMode {
        self.mode_overrides()
            .find(|(idx, _)| *idx == partition)
            .map(|(_, mode)| mode)
            .unwrap_or(self.default_execution_mode)
    }

    /// Builder-style setter for the batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Builder-style setter for the idle interval
    pub fn with_batch_interval(mut self, interval: Duration) -> Self {
        self.batch_interval = interval;
        self
    }

    /// Builder-style setter for partition count and bounds
    pub fn with_partitions(mut self, initial: usize, min: usize, max: usize) -> Self {
        self.partition_count = initial;
        self.min_partition_count = min;
        self.max_partition_count = max;
        self
    }

    /// Builder-style setter for retry count and interval
    pub fn with_retry(mut self, max_count: u32, interval: Duration) -> Self {
        self.retry_max_count = max_count;
        self.retry_interval = interval;
        self
    }

    /// Validate ranges and cross-field ordering
    pub fn validate(&self) -> crate::Result<()> {
        crate::validation::validate_engine(self)
    }
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod engine_test;
