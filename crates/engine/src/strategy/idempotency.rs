//! Idempotency checking
//!
//! Remembers which message ids finished successfully so a redelivered
//! message is dropped at the gate instead of processed twice.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::StrategyError;

/// Upper bound on the gap between two purge sweeps
const MAX_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Processed-id registry shared by all partitions
///
/// Implementations must be safe for concurrent calls. A false negative
/// (`seen` returning false for a processed id) causes duplicate side
/// effects; backends that cannot answer should return an error, which the
/// engine turns into an `EnqueueFailure` fallback record.
#[async_trait]
pub trait IdempotencyChecker: Send + Sync {
    /// Whether `message_id` already completed successfully
    async fn seen(&self, message_id: &str) -> Result<bool, StrategyError>;

    /// Record `message_id` as completed
    async fn mark_processed(&self, message_id: &str) -> Result<(), StrategyError>;

    /// Drop expired ids, returning how many were removed
    ///
    /// Called periodically by the engine. Backends that expire entries on
    /// their own keep the default.
    async fn purge_expired(&self) -> Result<usize, StrategyError> {
        Ok(0)
    }
}

/// In-process checker with time-based retention
///
/// Suitable for a single engine instance. Deployments with several
/// processes need a shared backend behind the same trait.
#[derive(Debug)]
pub struct MemoryIdempotencyChecker {
    processed: DashMap<String, Instant>,
    ttl: Duration,
}

impl MemoryIdempotencyChecker {
    /// Create a checker that forgets ids after `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            processed: DashMap::new(),
            ttl,
        }
    }

    /// Number of ids currently remembered (including expired, not yet purged)
    pub fn len(&self) -> usize {
        self.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }

    fn is_live(&self, marked_at: Instant) -> bool {
        marked_at.elapsed() < self.ttl
    }
}

#[async_trait]
impl IdempotencyChecker for MemoryIdempotencyChecker {
    async fn seen(&self, message_id: &str) -> Result<bool, StrategyError> {
        let live = match self.processed.get(message_id) {
            Some(entry) => self.is_live(*entry.value()),
            None => return Ok(false),
        };

        if !live {
            self.processed
                .remove_if(message_id, |_, marked_at| !self.is_live(*marked_at));
        }
        Ok(live)
    }

    async fn mark_processed(&self, message_id: &str) -> Result<(), StrategyError> {
        self.processed.insert(message_id.to_string(), Instant::now());
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, StrategyError> {
        let before = self.processed.len();
        self.processed.retain(|_, marked_at| self.is_live(*marked_at));
        Ok(before.saturating_sub(self.processed.len()))
    }
}

/// Gap between purge sweeps for ids retained for `ttl`
pub(crate) fn purge_interval(ttl: Duration) -> Duration {
    ttl.min(MAX_PURGE_INTERVAL)
}

/// Purge expired ids every `every` until cancelled
pub(crate) async fn run_purge(
    checker: Arc<dyn IdempotencyChecker>,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match checker.purge_expired().await {
            Ok(0) => {}
            Ok(purged) => debug!(purged, "expired idempotency ids purged"),
            Err(e) => warn!(error = %e, "idempotency purge failed"),
        }
    }
}
