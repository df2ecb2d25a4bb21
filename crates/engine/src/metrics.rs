//! Engine metrics
//!
//! Atomic counters for tracking engine throughput and failure paths.
//! All operations use relaxed ordering; values are eventually consistent.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::message::FailureReason;

/// Counters shared by every partition
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// `enqueue` calls
    messages_enqueued: AtomicU64,

    /// Messages dropped as already processed or already pending
    messages_deduplicated: AtomicU64,

    /// Messages that completed a successful batch
    messages_processed: AtomicU64,

    batches_succeeded: AtomicU64,
    batches_failed: AtomicU64,

    /// `process_batch` calls, first attempts and retries alike
    batch_attempts: AtomicU64,

    /// Attempts beyond the first
    retries: AtomicU64,

    /// Messages written to the fallback store, per reason
    fallback_messages: [AtomicU64; 5],

    /// Fallback writes that failed (records lost)
    fallback_write_errors: AtomicU64,

    degrade_failures: AtomicU64,
    degrade_timeouts: AtomicU64,

    /// Idempotency backend errors while marking processed
    idempotency_errors: AtomicU64,

    partitions_created: AtomicU64,
    partitions_retired: AtomicU64,
    loop_restarts: AtomicU64,
    partition_adjustments: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_enqueued(&self) {
        self.messages_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_deduplicated(&self) {
        self.messages_deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    /// A batch of `messages` completed successfully
    #[inline]
    pub fn record_batch_success(&self, messages: u64) {
        self.batches_succeeded.fetch_add(1, Ordering::Relaxed);
        self.messages_processed
            .fetch_add(messages, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_batch_failure(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// One `process_batch` attempt; `attempt` is 0 for the first try
    #[inline]
    pub fn record_attempt(&self, attempt: u32) {
        self.batch_attempts.fetch_add(1, Ordering::Relaxed);
        if attempt > 0 {
            self.retries.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_fallback(&self, reason: FailureReason, messages: u64) {
        self.fallback_messages[reason.slot()].fetch_add(messages, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fallback_error(&self) {
        self.fallback_write_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_degrade_failure(&self) {
        self.degrade_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_degrade_timeout(&self) {
        self.degrade_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_idempotency_error(&self) {
        self.idempotency_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_partition_created(&self) {
        self.partitions_created.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_partition_retired(&self) {
        self.partitions_retired.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_loop_restart(&self) {
        self.loop_restarts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_partition_adjustment(&self) {
        self.partition_adjustments.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of metrics
    pub fn snapshot(&self) -> EngineMetricsSnapshot {
        let mut fallback_messages = [0u64; 5];
        for (slot, counter) in fallback_messages.iter_mut().zip(&self.fallback_messages) {
            *slot = counter.load(Ordering::Relaxed);
        }

        EngineMetricsSnapshot {
            messages_enqueued: self.messages_enqueued.load(Ordering::Relaxed),
            messages_deduplicated: self.messages_deduplicated.load(Ordering::Relaxed),
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            batches_succeeded: self.batches_succeeded.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            batch_attempts: self.batch_attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            fallback_messages,
            fallback_write_errors: self.fallback_write_errors.load(Ordering::Relaxed),
            degrade_failures: self.degrade_failures.load(Ordering::Relaxed),
            degrade_timeouts: self.degrade_timeouts.load(Ordering::Relaxed),
            idempotency_errors: self.idempotency_errors.load(Ordering::Relaxed),
            partitions_created: self.partitions_created.load(Ordering::Relaxed),
            partitions_retired: self.partitions_retired.load(Ordering::Relaxed),
            loop_restarts: self.loop_restarts.load(Ordering::Relaxed),
            partition_adjustments: self.partition_adjustments.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`EngineMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineMetricsSnapshot {
    pub messages_enqueued: u64,
    pub messages_deduplicated: u64,
    pub messages_processed: u64,
    pub batches_succeeded: u64,
    pub batches_failed: u64,
    pub batch_attempts: u64,
    pub retries: u64,
    /// Indexed in [`FailureReason::ALL`] order
    pub fallback_messages: [u64; 5],
    pub fallback_write_errors: u64,
    pub degrade_failures: u64,
    pub degrade_timeouts: u64,
    pub idempotency_errors: u64,
    pub partitions_created: u64,
    pub partitions_retired: u64,
    pub loop_restarts: u64,
    pub partition_adjustments: u64,
}

impl EngineMetricsSnapshot {
    /// Messages written to the fallback store for `reason`
    #[inline]
    pub fn fallback(&self, reason: FailureReason) -> u64 {
        self.fallback_messages[reason.slot()]
    }

    /// Messages written to the fallback store for any reason
    pub fn fallback_total(&self) -> u64 {
        self.fallback_messages.iter().sum()
    }

    /// Share of finished batches that succeeded
    ///
    /// Returns None if no batch has finished yet.
    pub fn batch_success_rate(&self) -> Option<f64> {
        let total = self.batches_succeeded + self.batches_failed;
        if total == 0 {
            None
        } else {
            Some(self.batches_succeeded as f64 / total as f64)
        }
    }

    /// Calculate the difference from another snapshot
    ///
    /// Useful for calculating rates over time intervals.
    pub fn diff(&self, previous: &EngineMetricsSnapshot) -> EngineMetricsSnapshot {
        let mut fallback_messages = [0u64; 5];
        for (i, slot) in fallback_messages.iter_mut().enumerate() {
            *slot = self.fallback_messages[i].saturating_sub(previous.fallback_messages[i]);
        }

        EngineMetricsSnapshot {
            messages_enqueued: self
                .messages_enqueued
                .saturating_sub(previous.messages_enqueued),
            messages_deduplicated: self
                .messages_deduplicated
                .saturating_sub(previous.messages_deduplicated),
            messages_processed: self
                .messages_processed
                .saturating_sub(previous.messages_processed),
            batches_succeeded: self
                .batches_succeeded
                .saturating_sub(previous.batches_succeeded),
            batches_failed: self.batches_failed.saturating_sub(previous.batches_failed),
            batch_attempts: self.batch_attempts.saturating_sub(previous.batch_attempts),
            retries: self.retries.saturating_sub(previous.retries),
            fallback_messages,
            fallback_write_errors: self
                .fallback_write_errors
                .saturating_sub(previous.fallback_write_errors),
            degrade_failures: self
                .degrade_failures
                .saturating_sub(previous.degrade_failures),
            degrade_timeouts: self
                .degrade_timeouts
                .saturating_sub(previous.degrade_timeouts),
            idempotency_errors: self
                .idempotency_errors
                .saturating_sub(previous.idempotency_errors),
            partitions_created: self
                .partitions_created
                .saturating_sub(previous.partitions_created),
            partitions_retired: self
                .partitions_retired
                .saturating_sub(previous.partitions_retired),
            loop_restarts: self.loop_restarts.saturating_sub(previous.loop_restarts),
            partition_adjustments: self
                .partition_adjustments
                .saturating_sub(previous.partition_adjustments),
        }
    }
}

// ============================================================================
// Fallback Tracker - Rate-limited logging for enqueue-gate rejections
// ============================================================================

/// Rate-limited logging of fallback writes at the enqueue gate
///
/// A tripped breaker or a saturated partition can divert every incoming
/// message. Instead of one line per message, rejections are aggregated and
/// summarized at most once per second.
///
/// # Thresholds
///
/// - >0 records/sec: WARN level
/// - >100 records/sec: ERROR level
pub struct FallbackTracker {
    /// Records per reason in the current interval
    interval_records: [AtomicU64; 5],
    /// Last log time (epoch milliseconds)
    last_log_ms: AtomicU64,
}

/// Log interval in milliseconds
const LOG_INTERVAL_MS: u64 = 1000;
/// Records/sec that escalate the summary to ERROR
const CRITICAL_FALLBACK_THRESHOLD: u64 = 100;

impl FallbackTracker {
    pub fn new() -> Self {
        Self {
            interval_records: Default::default(),
            last_log_ms: AtomicU64::new(Self::now_ms()),
        }
    }

    /// Record one diverted message; returns true if a summary was logged
    pub fn record(&self, reason: FailureReason) -> bool {
        self.interval_records[reason.slot()].fetch_add(1, Ordering::Relaxed);
        self.maybe_log()
    }

    fn maybe_log(&self) -> bool {
        let now = Self::now_ms();
        let last = self.last_log_ms.load(Ordering::Relaxed);

        if now.saturating_sub(last) < LOG_INTERVAL_MS {
            return false;
        }

        // Claim the log slot so concurrent callers do not log twice
        if self
            .last_log_ms
            .compare_exchange(last, now, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }

        let mut counts = [0u64; 5];
        for (count, counter) in counts.iter_mut().zip(&self.interval_records) {
            *count = counter.swap(0, Ordering::Relaxed);
        }
        let total: u64 = counts.iter().sum();
        if total == 0 {
            return false;
        }

        let [enqueue, breaker, isolate, _, shutdown] = counts;
        if total > CRITICAL_FALLBACK_THRESHOLD {
            tracing::error!(
                records = total,
                enqueue_failure = enqueue,
                circuit_breaker_failure = breaker,
                isolate_failure = isolate,
                shutdown_remaining = shutdown,
                threshold = CRITICAL_FALLBACK_THRESHOLD,
                "CRITICAL: high fallback rate at enqueue gate"
            );
        } else {
            tracing::warn!(
                records = total,
                enqueue_failure = enqueue,
                circuit_breaker_failure = breaker,
                isolate_failure = isolate,
                shutdown_remaining = shutdown,
                "messages diverted to fallback in last second"
            );
        }
        true
    }

    #[inline]
    fn now_ms() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    #[cfg(test)]
    fn pending(&self) -> u64 {
        self.interval_records
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }
}

impl Default for FallbackTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FallbackTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackTracker")
            .field(
                "last_log_ms",
                &self.last_log_ms.load(Ordering::Relaxed),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let metrics = EngineMetrics::new();
        metrics.record_enqueued();
        metrics.record_enqueued();
        metrics.record_deduplicated();
        metrics.record_batch_success(2);
        metrics.record_batch_failure();
        metrics.record_fallback(FailureReason::ProcessFailure, 3);
        metrics.record_fallback(FailureReason::IsolateFailure, 1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_enqueued, 2);
        assert_eq!(snapshot.messages_deduplicated, 1);
        assert_eq!(snapshot.messages_processed, 2);
        assert_eq!(snapshot.fallback(FailureReason::ProcessFailure), 3);
        assert_eq!(snapshot.fallback(FailureReason::ShutdownRemaining), 0);
        assert_eq!(snapshot.fallback_total(), 4);
        assert_eq!(snapshot.batch_success_rate(), Some(0.5));
    }

    #[test]
    fn test_attempts_and_retries() {
        let metrics = EngineMetrics::new();
        for attempt in 0..3 {
            metrics.record_attempt(attempt);
        }
        metrics.record_attempt(0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.batch_attempts, 4);
        assert_eq!(snapshot.retries, 2);
    }

    #[test]
    fn test_success_rate_empty() {
        assert_eq!(EngineMetricsSnapshot::default().batch_success_rate(), None);
    }

    #[test]
    fn test_diff() {
        let metrics = EngineMetrics::new();
        metrics.record_enqueued();
        metrics.record_fallback(FailureReason::EnqueueFailure, 1);
        let before = metrics.snapshot();

        metrics.record_enqueued();
        metrics.record_enqueued();
        metrics.record_fallback(FailureReason::EnqueueFailure, 2);
        metrics.record_loop_restart();
        let after = metrics.snapshot();

        let delta = after.diff(&before);
        assert_eq!(delta.messages_enqueued, 2);
        assert_eq!(delta.fallback(FailureReason::EnqueueFailure), 2);
        assert_eq!(delta.loop_restarts, 1);

        // Reversed order saturates instead of wrapping
        assert_eq!(before.diff(&after).messages_enqueued, 0);
    }

    #[test]
    fn test_tracker_accumulates_within_interval() {
        let tracker = FallbackTracker::new();
        assert!(!tracker.record(FailureReason::IsolateFailure));
        assert!(!tracker.record(FailureReason::CircuitBreakerFailure));
        assert_eq!(tracker.pending(), 2);
    }

    #[test]
    fn test_tracker_logs_after_interval() {
        let tracker = FallbackTracker::new();
        tracker
            .last_log_ms
            .store(FallbackTracker::now_ms() - 2 * LOG_INTERVAL_MS, Ordering::Relaxed);

        assert!(tracker.record(FailureReason::IsolateFailure));
        assert_eq!(tracker.pending(), 0);
        assert!(!tracker.record(FailureReason::IsolateFailure));
    }
}
