//! Execution-order controller
//!
//! Runs batch operations for a partition under its current execution mode
//! and lets operators switch that mode at runtime.
//!
//! Each partition has a lane with a gate. Every execution holds the gate
//! shared for its duration; a mode switch takes it exclusively, so the new
//! mode only applies once in-flight batches have drained. The gate is fair,
//! which means a pending switch holds back new executions instead of being
//! starved by them.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{Mutex, RwLock as Gate, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sluice_config::ExecutionMode;

use crate::error::StrategyError;
use crate::message::PartitionKey;

struct Lane {
    gate: Gate<()>,
    serial: Mutex<()>,
    parallel: Semaphore,
    mode: RwLock<ExecutionMode>,
    active: AtomicUsize,
}

impl Lane {
    fn new(mode: ExecutionMode, parallel_limit: usize) -> Self {
        Self {
            gate: Gate::new(()),
            serial: Mutex::new(()),
            parallel: Semaphore::new(parallel_limit),
            mode: RwLock::new(mode),
            active: AtomicUsize::new(0),
        }
    }
}

/// Decrements the lane's active count when the execution ends
struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Per-partition execution lanes
pub struct ExecutionController {
    lanes: DashMap<PartitionKey, Arc<Lane>>,
    parallel_limit: usize,
}

impl ExecutionController {
    /// Controller allowing `parallel_limit` concurrent batches per
    /// partition in parallel mode
    pub fn new(parallel_limit: usize) -> Self {
        Self {
            lanes: DashMap::new(),
            parallel_limit: parallel_limit.max(1),
        }
    }

    /// Make sure `key` has a lane, starting in `mode` if it is new
    ///
    /// A lane created earlier (for example by a mode switch issued before
    /// the partition saw traffic) keeps its mode.
    pub fn register(&self, key: PartitionKey, mode: ExecutionMode) {
        self.lane_or(key, mode);
    }

    /// Drop the lane for a retired partition
    pub fn remove(&self, key: PartitionKey) {
        self.lanes.remove(&key);
    }

    /// Current mode of `key`, if it has a lane
    pub fn mode(&self, key: PartitionKey) -> Option<ExecutionMode> {
        self.lanes.get(&key).map(|lane| *lane.mode.read())
    }

    /// Operations currently executing for `key`
    pub fn current_concurrency(&self, key: PartitionKey) -> usize {
        self.lanes
            .get(&key)
            .map(|lane| lane.active.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Run `operation` for `key` under the partition's current mode
    ///
    /// Serial lanes run one operation at a time in the order callers
    /// arrived; parallel lanes admit up to the configured limit. Returns
    /// `Cancelled` if `cancel` fires while waiting for a slot. The
    /// operation itself is expected to observe `cancel`.
    pub async fn execute<F, Fut, R>(
        &self,
        key: PartitionKey,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<R, StrategyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        let lane = self.lane_or(key, ExecutionMode::default());

        let _gate = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StrategyError::Cancelled),
            gate = lane.gate.read() => gate,
        };

        let mode = *lane.mode.read();
        match mode {
            ExecutionMode::Serial => {
                let _slot = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(StrategyError::Cancelled),
                    slot = lane.serial.lock() => slot,
                };
                let _active = ActiveGuard::enter(&lane.active);
                Ok(operation().await)
            }
            ExecutionMode::Parallel => {
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(StrategyError::Cancelled),
                    permit = lane.parallel.acquire() => {
                        permit.map_err(|_| StrategyError::Cancelled)?
                    }
                };
                let _active = ActiveGuard::enter(&lane.active);
                Ok(operation().await)
            }
        }
    }

    /// Switch `key` to `mode` once in-flight work has drained
    ///
    /// Returns false if the drain did not finish within `timeout`; the
    /// previous mode stays in effect.
    pub async fn switch_mode(
        &self,
        key: PartitionKey,
        mode: ExecutionMode,
        timeout: Duration,
    ) -> bool {
        let lane = self.lane_or(key, mode);

        match tokio::time::timeout(timeout, lane.gate.write()).await {
            Ok(_exclusive) => {
                let previous = std::mem::replace(&mut *lane.mode.write(), mode);
                if previous != mode {
                    info!(partition = %key, from = %previous, to = %mode, "execution mode switched");
                }
                true
            }
            Err(_) => {
                warn!(
                    partition = %key,
                    to = %mode,
                    timeout_ms = timeout.as_millis() as u64,
                    "execution mode switch timed out waiting for in-flight batches"
                );
                false
            }
        }
    }

    fn lane_or(&self, key: PartitionKey, mode: ExecutionMode) -> Arc<Lane> {
        let limit = self.parallel_limit;
        Arc::clone(
            self.lanes
                .entry(key)
                .or_insert_with(|| Arc::new(Lane::new(mode, limit)))
                .value(),
        )
    }
}

impl std::fmt::Debug for ExecutionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionController")
            .field("lanes", &self.lanes.len())
            .field("parallel_limit", &self.parallel_limit)
            .finish()
    }
}

#[cfg(test)]
#[path = "execution_test.rs"]
mod execution_test;
