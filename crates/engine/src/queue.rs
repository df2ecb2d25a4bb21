//! Partition queue set
//!
//! One FIFO queue per partition, created lazily the first time a message
//! routes to it. Dequeued batches stay registered on their partition as
//! in-flight claims until a terminal action takes them, so an envelope is
//! always owned by exactly one of: a queue, a claim, or the code that just
//! took the claim.
//!
//! # Lock order
//!
//! Queue lock before in-flight lock before the partition map shard. Producers
//! only ever take the map shard briefly to clone a state handle.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tokio::task::JoinHandle;

use crate::envelope::Envelope;
use crate::message::PartitionKey;

/// A dequeued batch awaiting its terminal action
///
/// Whoever calls [`BatchClaim::take`] first owns the envelopes; every later
/// call gets `None`.
pub(crate) struct BatchClaim<T> {
    id: u64,
    trace_id: String,
    envelopes: Mutex<Option<Vec<Envelope<T>>>>,
}

impl<T> BatchClaim<T> {
    fn new(id: u64, trace_id: String, envelopes: Vec<Envelope<T>>) -> Self {
        Self {
            id,
            trace_id,
            envelopes: Mutex::new(Some(envelopes)),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Messages still owned by the claim
    #[cfg(test)]
    pub(crate) fn size(&self) -> usize {
        self.envelopes.lock().as_ref().map_or(0, Vec::len)
    }

    /// Take ownership of the envelopes, if nobody has yet
    pub(crate) fn take(&self) -> Option<Vec<Envelope<T>>> {
        self.envelopes.lock().take()
    }

    #[cfg(test)]
    pub(crate) fn is_taken(&self) -> bool {
        self.envelopes.lock().is_none()
    }
}

impl<T: Clone> BatchClaim<T> {
    /// Copies of the batch payloads, in dequeue order
    pub(crate) fn payloads(&self) -> Vec<T> {
        self.envelopes
            .lock()
            .as_ref()
            .map(|envelopes| envelopes.iter().filter_map(|e| e.payload().cloned()).collect())
            .unwrap_or_default()
    }
}

struct QueueInner<T> {
    items: VecDeque<Envelope<T>>,
    closed: bool,
}

/// Queue, in-flight claims and loop handle of one partition
pub(crate) struct PartitionState<T> {
    key: PartitionKey,
    queue: Mutex<QueueInner<T>>,
    in_flight: Mutex<BTreeMap<u64, Arc<BatchClaim<T>>>>,
    next_claim: AtomicU64,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl<T> PartitionState<T> {
    fn new(key: PartitionKey) -> Self {
        Self {
            key,
            queue: Mutex::new(QueueInner {
                items: VecDeque::new(),
                closed: false,
            }),
            in_flight: Mutex::new(BTreeMap::new()),
            next_claim: AtomicU64::new(0),
            supervisor: Mutex::new(None),
        }
    }

    pub(crate) fn key(&self) -> PartitionKey {
        self.key
    }

    /// Append an envelope, returning the new queue length
    ///
    /// A closed queue (retired or drained) hands the envelope back.
    pub(crate) fn push(&self, envelope: Envelope<T>) -> Result<usize, Envelope<T>> {
        let mut queue = self.queue.lock();
        if queue.closed {
            return Err(envelope);
        }
        queue.items.push_back(envelope);
        Ok(queue.items.len())
    }

    /// Dequeue up to `max` envelopes as a new in-flight claim
    pub(crate) fn dequeue_batch(&self, max: usize, trace_id: String) -> Option<Arc<BatchClaim<T>>> {
        let mut queue = self.queue.lock();
        if queue.items.is_empty() {
            return None;
        }

        let count = queue.items.len().min(max.max(1));
        let envelopes: Vec<_> = queue.items.drain(..count).collect();
        let id = self.next_claim.fetch_add(1, Ordering::Relaxed);
        let claim = Arc::new(BatchClaim::new(id, trace_id, envelopes));

        // Registered before the queue lock drops so the partition never
        // looks idle while the batch is in transit
        self.in_flight.lock().insert(id, Arc::clone(&claim));
        Some(claim)
    }

    /// Unregister a claim after its terminal action
    pub(crate) fn finish(&self, claim_id: u64) {
        self.in_flight.lock().remove(&claim_id);
    }

    /// Remove and return every registered claim
    pub(crate) fn take_in_flight(&self) -> Vec<Arc<BatchClaim<T>>> {
        std::mem::take(&mut *self.in_flight.lock())
            .into_values()
            .collect()
    }

    /// Claim with `claim_id`, if still registered
    pub(crate) fn claim(&self, claim_id: u64) -> Option<Arc<BatchClaim<T>>> {
        self.in_flight.lock().get(&claim_id).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.lock().items.len()
    }

    #[cfg(test)]
    pub(crate) fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.queue.lock().closed
    }

    /// Close the queue and take everything it still holds
    ///
    /// Returns the queued envelopes plus every in-flight claim.
    pub(crate) fn close_and_drain(&self) -> (Vec<Envelope<T>>, Vec<Arc<BatchClaim<T>>>) {
        let mut queue = self.queue.lock();
        queue.closed = true;
        let items: Vec<_> = queue.items.drain(..).collect();
        let claims = self.take_in_flight();
        (items, claims)
    }

    pub(crate) fn set_supervisor(&self, handle: JoinHandle<()>) {
        *self.supervisor.lock() = Some(handle);
    }

    pub(crate) fn take_supervisor(&self) -> Option<JoinHandle<()>> {
        self.supervisor.lock().take()
    }
}

/// All partition states, keyed by partition
pub(crate) struct PartitionQueueSet<T> {
    partitions: DashMap<PartitionKey, Arc<PartitionState<T>>>,
    open: RwLock<bool>,
}

impl<T> PartitionQueueSet<T> {
    pub(crate) fn new() -> Self {
        Self {
            partitions: DashMap::new(),
            open: RwLock::new(true),
        }
    }

    /// Guard that keeps the set open while held
    ///
    /// Producers hold it across materialization and push; `close` waits
    /// for every holder, so nothing lands in a queue after the final drain.
    pub(crate) fn admit(&self) -> Option<RwLockReadGuard<'_, bool>> {
        let open = self.open.read();
        (*open).then_some(open)
    }

    /// Stop admitting producers and return every partition state
    pub(crate) fn close(&self) -> Vec<Arc<PartitionState<T>>> {
        *self.open.write() = false;
        self.states()
    }

    /// State for `key`, creating it on first use
    ///
    /// The flag is true when this call created the partition.
    pub(crate) fn get_or_create(&self, key: PartitionKey) -> (Arc<PartitionState<T>>, bool) {
        match self.partitions.entry(key) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                let state = Arc::new(PartitionState::new(key));
                entry.insert(Arc::clone(&state));
                (state, true)
            }
        }
    }

    pub(crate) fn get(&self, key: PartitionKey) -> Option<Arc<PartitionState<T>>> {
        self.partitions.get(&key).map(|e| Arc::clone(e.value()))
    }

    /// Close and unregister `state` if it holds no work
    ///
    /// The map entry is removed while the queue lock is held, so a producer
    /// that finds the queue closed will not find this state again.
    /// `on_remove` runs under the map shard lock, before any producer can
    /// create a replacement for the same key.
    pub(crate) fn retire_if_idle(
        &self,
        state: &Arc<PartitionState<T>>,
        on_remove: impl FnOnce(),
    ) -> bool {
        let mut queue = state.queue.lock();
        if !queue.items.is_empty() || !state.in_flight.lock().is_empty() {
            return false;
        }
        queue.closed = true;
        self.partitions.remove_if(&state.key, |_, current| {
            let same = Arc::ptr_eq(current, state);
            if same {
                on_remove();
            }
            same
        });
        true
    }

    /// Number of materialized partitions
    pub(crate) fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Handles to every materialized partition
    ///
    /// Collected before any queue lock is taken: `retire_if_idle` holds a
    /// queue lock while it waits for the shard.
    fn states(&self) -> Vec<Arc<PartitionState<T>>> {
        self.partitions.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Queue length per materialized partition
    pub(crate) fn queue_lengths(&self) -> BTreeMap<PartitionKey, usize> {
        self.states()
            .into_iter()
            .map(|state| (state.key(), state.len()))
            .collect()
    }

    /// Envelopes queued across all partitions (excluding in-flight)
    pub(crate) fn total_queued(&self) -> usize {
        self.states().iter().map(|state| state.len()).sum()
    }
}

#[cfg(test)]
#[path = "queue_test.rs"]
mod queue_test;
