//! Partition router
//!
//! Pure mapping from a routing key to a partition index. The count comes
//! from the dispatcher on every call, so the router itself holds no state.

use xxhash_rust::xxh3::xxh3_64;

use crate::message::PartitionKey;

/// Hash-based partition router
///
/// Uses xxh3-64, which is stable across processes and releases, so a key
/// lands on the same partition for a given count everywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartitionRouter;

impl PartitionRouter {
    pub const fn new() -> Self {
        Self
    }

    /// Partition for `routing_key` when `partition_count` partitions exist
    ///
    /// A count of zero is treated as one.
    #[inline]
    pub fn route(&self, routing_key: &str, partition_count: usize) -> PartitionKey {
        let count = partition_count.max(1) as u64;
        let index = xxh3_64(routing_key.as_bytes()) % count;
        PartitionKey::new(index as u32)
    }

    /// Whether `key` is reachable under `partition_count`
    #[inline]
    pub fn is_active(&self, key: PartitionKey, partition_count: usize) -> bool {
        key.as_usize() < partition_count.max(1)
    }
}
