//! Partition health monitor
//!
//! Per-partition statistics read by the dispatcher and by operators.
//! Updates are best-effort: an update for a partition that is not
//! registered (already retired) is silently ignored.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use sluice_config::ExecutionMode;

use crate::message::PartitionKey;

/// Point-in-time health of one partition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionHealth {
    pub partition: PartitionKey,
    /// Envelopes waiting in the queue
    pub queue_length: usize,
    /// Wall time of the most recent completed batch, in milliseconds
    pub last_batch_latency_ms: u64,
    /// Batches that failed terminally
    pub failure_count: u64,
    pub execution_mode: ExecutionMode,
    /// Batches executing right now
    pub current_concurrency: usize,
    pub batches_processed: u64,
    pub messages_processed: u64,
    pub created_at: DateTime<Utc>,
    pub last_batch_at: Option<DateTime<Utc>>,
}

impl PartitionHealth {
    fn new(partition: PartitionKey, execution_mode: ExecutionMode) -> Self {
        Self {
            partition,
            queue_length: 0,
            last_batch_latency_ms: 0,
            failure_count: 0,
            execution_mode,
            current_concurrency: 0,
            batches_processed: 0,
            messages_processed: 0,
            created_at: Utc::now(),
            last_batch_at: None,
        }
    }
}

/// Health statistics for every live partition
#[derive(Debug, Default)]
pub struct HealthMonitor {
    partitions: DashMap<PartitionKey, PartitionHealth>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `key`; keeps existing stats if already tracked
    pub fn register(&self, key: PartitionKey, mode: ExecutionMode) {
        self.partitions
            .entry(key)
            .or_insert_with(|| PartitionHealth::new(key, mode));
    }

    /// Stop tracking a retired partition
    pub fn remove(&self, key: PartitionKey) {
        self.partitions.remove(&key);
    }

    pub fn set_queue_length(&self, key: PartitionKey, queue_length: usize) {
        if let Some(mut health) = self.partitions.get_mut(&key) {
            health.queue_length = queue_length;
        }
    }

    pub fn set_execution_mode(&self, key: PartitionKey, mode: ExecutionMode) {
        if let Some(mut health) = self.partitions.get_mut(&key) {
            health.execution_mode = mode;
        }
    }

    /// A batch of `messages` completed in `latency`
    pub fn record_success(
        &self,
        key: PartitionKey,
        messages: usize,
        latency: Duration,
        queue_length: usize,
    ) {
        if let Some(mut health) = self.partitions.get_mut(&key) {
            health.batches_processed += 1;
            health.messages_processed += messages as u64;
            health.last_batch_latency_ms = latency.as_millis() as u64;
            health.queue_length = queue_length;
            health.last_batch_at = Some(Utc::now());
        }
    }

    /// A batch failed terminally after `latency`
    pub fn record_failure(&self, key: PartitionKey, latency: Duration, queue_length: usize) {
        if let Some(mut health) = self.partitions.get_mut(&key) {
            health.failure_count += 1;
            health.last_batch_latency_ms = latency.as_millis() as u64;
            health.queue_length = queue_length;
            health.last_batch_at = Some(Utc::now());
        }
    }

    /// Health of one partition
    pub fn get(&self, key: PartitionKey) -> Option<PartitionHealth> {
        self.partitions.get(&key).map(|h| h.clone())
    }

    /// Health of every tracked partition, ordered by partition
    pub fn snapshot(&self) -> Vec<PartitionHealth> {
        let mut snapshot: Vec<_> = self.partitions.iter().map(|h| h.clone()).collect();
        snapshot.sort_by_key(|h| h.partition);
        snapshot
    }

    /// Queue length per tracked partition
    pub fn queue_stats(&self) -> BTreeMap<PartitionKey, usize> {
        self.partitions
            .iter()
            .map(|h| (*h.key(), h.queue_length))
            .collect()
    }

    /// Number of tracked partitions
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P0: PartitionKey = PartitionKey::new(0);
    const P1: PartitionKey = PartitionKey::new(1);

    #[test]
    fn test_register_and_snapshot_ordering() {
        let monitor = HealthMonitor::new();
        monitor.register(P1, ExecutionMode::Parallel);
        monitor.register(P0, ExecutionMode::Serial);

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].partition, P0);
        assert_eq!(snapshot[1].execution_mode, ExecutionMode::Parallel);
    }

    #[test]
    fn test_register_keeps_existing_stats() {
        let monitor = HealthMonitor::new();
        monitor.register(P0, ExecutionMode::Serial);
        monitor.set_queue_length(P0, 7);
        monitor.register(P0, ExecutionMode::Parallel);

        let health = monitor.get(P0).unwrap();
        assert_eq!(health.queue_length, 7);
        assert_eq!(health.execution_mode, ExecutionMode::Serial);
    }

    #[test]
    fn test_record_success_and_failure() {
        let monitor = HealthMonitor::new();
        monitor.register(P0, ExecutionMode::Serial);

        monitor.record_success(P0, 10, Duration::from_millis(25), 3);
        monitor.record_success(P0, 5, Duration::from_millis(15), 0);
        monitor.record_failure(P0, Duration::from_millis(40), 2);

        let health = monitor.get(P0).unwrap();
        assert_eq!(health.batches_processed, 2);
        assert_eq!(health.messages_processed, 15);
        assert_eq!(health.failure_count, 1);
        assert_eq!(health.last_batch_latency_ms, 40);
        assert_eq!(health.queue_length, 2);
        assert!(health.last_batch_at.is_some());
    }

    #[test]
    fn test_updates_for_unknown_partition_are_ignored() {
        let monitor = HealthMonitor::new();
        monitor.set_queue_length(P0, 5);
        monitor.record_failure(P0, Duration::ZERO, 0);
        assert!(monitor.is_empty());
    }

    #[test]
    fn test_queue_stats_and_remove() {
        let monitor = HealthMonitor::new();
        monitor.register(P0, ExecutionMode::Serial);
        monitor.register(P1, ExecutionMode::Serial);
        monitor.set_queue_length(P0, 4);

        let stats = monitor.queue_stats();
        assert_eq!(stats[&P0], 4);
        assert_eq!(stats[&P1], 0);

        monitor.remove(P0);
        assert_eq!(monitor.len(), 1);
        assert!(monitor.get(P0).is_none());
    }

    #[test]
    fn test_health_serializes() {
        let monitor = HealthMonitor::new();
        monitor.register(P1, ExecutionMode::Parallel);
        let json = serde_json::to_value(monitor.get(P1).unwrap()).unwrap();
        assert_eq!(json["partition"], "1");
        assert_eq!(json["execution_mode"], "parallel");
    }
}
