//! Partition dispatcher
//!
//! Owns the authoritative partition count read by the router and grows or
//! shrinks it from the mean queue length of the active partitions.
//!
//! # Scaling rule
//!
//! - mean > expand threshold: `min(ceil(count * 1.5), max)`
//! - mean < shrink threshold: `max(floor(count * 2 / 3), min)`
//! - otherwise unchanged
//!
//! At most one adjustment happens per `partition_adjust_interval`. Raising
//! the count only changes future routing; partitions are materialized by the
//! queue set the first time a message reaches them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use sluice_config::EngineConfig;

use crate::health::HealthMonitor;
use crate::message::PartitionKey;
use crate::metrics::EngineMetrics;

/// A partition-count change
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleDecision {
    pub from: usize,
    pub to: usize,
    /// Mean queue length that triggered the change
    pub mean_queue_length: f64,
}

impl ScaleDecision {
    pub fn is_expand(&self) -> bool {
        self.to > self.from
    }
}

/// Single writer of the current partition count
#[derive(Debug)]
pub struct PartitionDispatcher {
    current: AtomicUsize,
    last_adjusted: Mutex<Option<Instant>>,
    accepting: AtomicBool,
}

impl PartitionDispatcher {
    /// Dispatcher starting at `initial` partitions
    pub fn new(initial: usize) -> Self {
        Self {
            current: AtomicUsize::new(initial.max(1)),
            last_adjusted: Mutex::new(None),
            accepting: AtomicBool::new(true),
        }
    }

    /// Partition count the router must use
    #[inline]
    pub fn current(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    /// Stop making scaling decisions (shutdown)
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Run one scaling check
    ///
    /// `queue_lengths` may cover any set of partitions; only those below the
    /// current count are averaged, and active partitions without an entry
    /// count as empty. Returns the decision if the count changed.
    pub fn adjust(
        &self,
        config: &EngineConfig,
        queue_lengths: impl IntoIterator<Item = (PartitionKey, usize)>,
    ) -> Option<ScaleDecision> {
        if !self.is_accepting() {
            return None;
        }

        let mut last_adjusted = self.last_adjusted.lock();
        if let Some(at) = *last_adjusted
            && at.elapsed() < config.partition_adjust_interval
        {
            return None;
        }

        let current = self.current();
        let total: usize = queue_lengths
            .into_iter()
            .filter(|(key, _)| key.as_usize() < current)
            .map(|(_, len)| len)
            .sum();
        let mean = total as f64 / current as f64;

        let target = target_count(config, current, mean);
        if target == current {
            debug!(partitions = current, mean_queue_length = mean, "partition count unchanged");
            return None;
        }

        self.current.store(target, Ordering::Release);
        *last_adjusted = Some(Instant::now());

        info!(
            from = current,
            to = target,
            mean_queue_length = mean,
            "partition count adjusted"
        );
        Some(ScaleDecision {
            from: current,
            to: target,
            mean_queue_length: mean,
        })
    }
}

/// Partition count the scaling rule picks for `current` at `mean`
fn target_count(config: &EngineConfig, current: usize, mean: f64) -> usize {
    let min = config.min_partition_count.max(1);
    let max = config.max_partition_count.max(min);

    // Bounds may have moved under a reconfiguration
    if current > max || current < min {
        return current.clamp(min, max);
    }

    if mean > config.partition_expand_threshold as f64 && current < max {
        (current * 3).div_ceil(2).min(max)
    } else if mean < config.partition_shrink_threshold as f64 && current > min {
        (current * 2 / 3).max(min)
    } else {
        current
    }
}

/// Periodic scaling loop, runs until `cancel` fires
pub(crate) async fn run(
    dispatcher: Arc<PartitionDispatcher>,
    config: Arc<ArcSwap<EngineConfig>>,
    health: Arc<HealthMonitor>,
    metrics: Arc<EngineMetrics>,
    cancel: CancellationToken,
) {
    info!(
        interval_ms = config.load().partition_adjust_interval.as_millis() as u64,
        partitions = dispatcher.current(),
        "partition dispatcher started"
    );

    loop {
        let interval = config.load().partition_adjust_interval;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("partition dispatcher shutting down");
                break;
            }
            _ = tokio::time::sleep(interval) => {
                let current = config.load();
                if dispatcher.adjust(&current, health.queue_stats()).is_some() {
                    metrics.record_partition_adjustment();
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "dispatcher_test.rs"]
mod dispatcher_test;
