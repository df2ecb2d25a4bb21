//! Periodic health reporter
//!
//! Logs engine counters, per-interval deltas, pool efficiency and partition
//! health at the configured interval until cancelled.

use std::sync::Arc;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::info;

use sluice_config::MetricsConfig;

use crate::dispatcher::PartitionDispatcher;
use crate::health::HealthMonitor;
use crate::message::FailureReason;
use crate::metrics::{EngineMetrics, EngineMetricsSnapshot};
use crate::pool::EnvelopePool;

/// Handles the reporter reads from
pub(crate) struct ReportSources<T> {
    pub metrics: Arc<EngineMetrics>,
    pub health: Arc<HealthMonitor>,
    pub dispatcher: Arc<PartitionDispatcher>,
    pub pool: Arc<EnvelopePool<T>>,
}

/// Periodic health reporter
pub(crate) struct HealthReporter<T> {
    config: MetricsConfig,
    sources: ReportSources<T>,
    previous: Option<EngineMetricsSnapshot>,
}

impl<T> HealthReporter<T> {
    pub(crate) fn new(config: MetricsConfig, sources: ReportSources<T>) -> Self {
        Self {
            config,
            sources,
            previous: None,
        }
    }

    /// Run the reporter until cancellation
    pub(crate) async fn run(mut self, cancel: CancellationToken) {
        if !self.config.enabled {
            info!("health reporting disabled");
            return;
        }

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; skip the empty report
        ticker.tick().await;

        info!(
            interval_secs = self.config.interval.as_secs(),
            include_partitions = self.config.include_partitions,
            "health reporter started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("health reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.report();
                }
            }
        }
    }

    /// Collect and report once
    fn report(&mut self) {
        let current = self.sources.metrics.snapshot();
        let delta = self
            .previous
            .as_ref()
            .map(|prev| current.diff(prev))
            .unwrap_or(current);
        let pool = self.sources.pool.metrics().snapshot();

        info!(
            partitions = self.sources.dispatcher.current(),
            live_partitions = self.sources.health.len(),
            enqueued = current.messages_enqueued,
            processed = current.messages_processed,
            deduplicated = current.messages_deduplicated,
            batches_ok = current.batches_succeeded,
            batches_failed = current.batches_failed,
            retries = current.retries,
            fallback = current.fallback_total(),
            interval_enqueued = delta.messages_enqueued,
            interval_processed = delta.messages_processed,
            interval_retries = delta.retries,
            interval_fallback = delta.fallback_total(),
            pool_hit_rate = pool.hit_rate(),
            "engine health"
        );

        if delta.fallback_total() > 0 {
            for reason in FailureReason::ALL {
                let count = delta.fallback(reason);
                if count > 0 {
                    info!(reason = %reason, messages = count, "fallback in interval");
                }
            }
        }

        if self.config.include_partitions {
            for health in self.sources.health.snapshot() {
                info!(
                    partition = %health.partition,
                    queue_length = health.queue_length,
                    mode = %health.execution_mode,
                    latency_ms = health.last_batch_latency_ms,
                    failures = health.failure_count,
                    batches = health.batches_processed,
                    "partition health"
                );
            }
        }

        self.previous = Some(current);
    }
}
