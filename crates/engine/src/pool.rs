//! Lock-free envelope pool
//!
//! Keeps pre-allocated `Envelope`s around so the enqueue hot path does not
//! allocate per message. Uses a lock-free queue for O(1) get/put.
//!
//! # Example
//!
//! ```ignore
//! let pool: EnvelopePool<Reading> = EnvelopePool::new(4096, 256);
//!
//! let mut envelope = pool.get();
//! envelope.fill(reading, "dev-1:42", &trace_id, None);
//! // ... queued, batched, processed ...
//! pool.put(envelope);
//! ```

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::envelope::Envelope;

/// Raw buffers that grew past this many multiples of the initial capacity
/// are not pooled again
const MAX_RETAINED_GROWTH: usize = 16;

/// Lock-free pool of reusable envelopes
///
/// When the pool is exhausted, fresh envelopes are allocated on demand and
/// may be returned to the pool later.
pub struct EnvelopePool<T> {
    /// Lock-free queue of available envelopes
    queue: ArrayQueue<Envelope<T>>,

    /// Raw buffer capacity reserved per envelope
    raw_capacity: usize,

    /// Metrics
    metrics: PoolMetrics,
}

/// Metrics for envelope pool monitoring
#[derive(Debug, Default)]
pub struct PoolMetrics {
    /// Checkouts served from the pool
    pub hits: AtomicU64,

    /// Checkouts that had to allocate
    pub misses: AtomicU64,

    /// Envelopes returned to the pool
    pub returns: AtomicU64,

    /// Envelopes dropped on return (pool full or buffer oversized)
    pub drops: AtomicU64,
}

impl PoolMetrics {
    /// Create new metrics instance
    pub const fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            returns: AtomicU64::new(0),
            drops: AtomicU64::new(0),
        }
    }

    #[inline]
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_return(&self) {
        self.returns.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_drop(&self) {
        self.drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of metrics
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            returns: self.returns.load(Ordering::Relaxed),
            drops: self.drops.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of pool metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub returns: u64,
    pub drops: u64,
}

impl PoolSnapshot {
    /// Share of checkouts served without allocating (1.0 when idle)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            1.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Envelopes checked out and not yet returned or dropped
    pub fn outstanding(&self) -> u64 {
        (self.hits + self.misses).saturating_sub(self.returns + self.drops)
    }
}

impl<T> EnvelopePool<T> {
    /// Create a pool with `pool_size` pre-allocated envelopes
    ///
    /// `raw_capacity` bytes are reserved in every envelope's raw buffer.
    pub fn new(pool_size: usize, raw_capacity: usize) -> Self {
        let queue = ArrayQueue::new(pool_size.max(1));

        for _ in 0..queue.capacity() {
            // Filling an empty queue up to its capacity cannot fail
            let _ = queue.push(Envelope::with_raw_capacity(raw_capacity));
        }

        Self {
            queue,
            raw_capacity,
            metrics: PoolMetrics::new(),
        }
    }

    /// Check out an empty envelope
    ///
    /// Returns a pooled envelope if available, otherwise allocates one.
    #[inline]
    pub fn get(&self) -> Envelope<T> {
        match self.queue.pop() {
            Some(envelope) => {
                self.metrics.record_hit();
                envelope
            }
            None => {
                self.metrics.record_miss();
                Envelope::with_raw_capacity(self.raw_capacity)
            }
        }
    }

    /// Return an envelope to the pool
    ///
    /// The envelope is reset first. It is dropped instead of pooled when the
    /// pool is full or its raw buffer grew far beyond the configured size.
    #[inline]
    pub fn put(&self, mut envelope: Envelope<T>) {
        envelope.reset();

        let retain_limit = self.raw_capacity.max(1) * MAX_RETAINED_GROWTH;
        if envelope.raw_capacity() > retain_limit {
            self.metrics.record_drop();
            return;
        }

        match self.queue.push(envelope) {
            Ok(()) => self.metrics.record_return(),
            Err(_) => self.metrics.record_drop(),
        }
    }

    /// Number of envelopes currently available
    #[inline]
    pub fn available(&self) -> usize {
        self.queue.len()
    }

    /// Maximum number of pooled envelopes
    #[inline]
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Get reference to metrics
    #[inline]
    pub fn metrics(&self) -> &PoolMetrics {
        &self.metrics
    }
}

impl<T> std::fmt::Debug for EnvelopePool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopePool")
            .field("available", &self.available())
            .field("capacity", &self.capacity())
            .field("raw_capacity", &self.raw_capacity)
            .finish()
    }
}

#[cfg(test)]
#[path = "pool_test.rs"]
mod pool_test;
