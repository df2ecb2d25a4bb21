//! Batch engine
//!
//! Ties the router, queue set, consumer loops, resilience strategies,
//! dispatcher and health monitor together behind one handle.
//!
//! # Message lifecycle
//!
//! ```text
//! enqueue ─► pending reservation ─► idempotency ─► route ─► breaker ─► isolation
//!                                                                         │
//!   fallback ◄── (any gate rejects)                                       ▼
//!                                                          pooled envelope ─► partition queue
//!                                                                         │
//!                                                 consumer loop ◄─────────┘
//!                                                         │
//!                                 retry ─► execution lane ─► process_batch
//!                                                         │
//!                     success: mark processed ◄───────────┴──► failure: degrade + fallback
//! ```

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use arc_swap::ArcSwap;
use bytes::Bytes;
use dashmap::DashSet;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use sluice_config::{EngineConfig, ExecutionMode, MetricsConfig};

use crate::consumer;
use crate::dispatcher::{self, PartitionDispatcher};
use crate::envelope::Envelope;
use crate::error::{EngineError, StrategyError};
use crate::health::{HealthMonitor, PartitionHealth};
use crate::message::{EnqueueOutcome, FailureReason, Message, PartitionKey};
use crate::metrics::{EngineMetrics, EngineMetricsSnapshot, FallbackTracker};
use crate::pool::{EnvelopePool, PoolSnapshot};
use crate::processor::BatchProcessor;
use crate::queue::{PartitionQueueSet, PartitionState};
use crate::reporter::{HealthReporter, ReportSources};
use crate::router::PartitionRouter;
use crate::strategy::idempotency;
use crate::strategy::{
    CircuitBreaker, ConcurrencyIsolator, DegradeHandler, ExecutionController, FallbackEntry,
    FallbackRecord, FallbackStore, IdempotencyChecker, LogDegradeHandler, MemoryFallbackStore,
    MemoryIdempotencyChecker, PartitionCircuitBreaker, PartitionIsolator, RetryExecutor,
};

/// Bytes reserved in each pooled envelope's raw buffer
pub const DEFAULT_RAW_CAPACITY: usize = 256;

/// Attempts to find an open queue when racing a partition retirement
const MAX_ADMIT_ATTEMPTS: usize = 3;

/// Outcome of [`BatchEngine::shutdown`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Messages written to the fallback store as `shutdown_remaining`
    pub drained: usize,
    /// Whether some consumer loop missed the deadline and was aborted
    pub forced: bool,
}

/// State shared by the engine handle, consumer loops and background tasks
pub(crate) struct Shared<T: Message> {
    pub(crate) config: Arc<ArcSwap<EngineConfig>>,
    pub(crate) processor: Arc<dyn BatchProcessor<T>>,
    pub(crate) idempotency: Arc<dyn IdempotencyChecker>,
    pub(crate) breaker: Arc<dyn CircuitBreaker>,
    pub(crate) isolator: Arc<dyn ConcurrencyIsolator>,
    pub(crate) degrade: Arc<dyn DegradeHandler<T>>,
    pub(crate) fallback: Arc<dyn FallbackStore<T>>,
    pub(crate) retry: RetryExecutor,
    pub(crate) execution: ExecutionController,
    pub(crate) router: PartitionRouter,
    pub(crate) dispatcher: Arc<PartitionDispatcher>,
    pub(crate) queues: PartitionQueueSet<T>,
    pub(crate) health: Arc<HealthMonitor>,
    pub(crate) pool: Arc<EnvelopePool<T>>,
    pub(crate) metrics: Arc<EngineMetrics>,
    pub(crate) tracker: FallbackTracker,
    /// Ids admitted and not yet terminal
    pub(crate) pending: DashSet<String>,
    pub(crate) cancel: CancellationToken,
    pub(crate) shutting_down: AtomicBool,
}

pub(crate) fn new_trace_id() -> String {
    Uuid::new_v4().to_string()
}

impl<T: Message> Shared<T> {
    #[inline]
    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Queue an admitted envelope on `partition`, creating it if needed
    ///
    /// Hands the envelope back when the engine is closing or the partition
    /// kept retiring under us.
    fn admit(
        self: &Arc<Self>,
        partition: PartitionKey,
        mut envelope: Envelope<T>,
    ) -> Result<usize, Envelope<T>> {
        let Some(_open) = self.queues.admit() else {
            return Err(envelope);
        };

        for _ in 0..MAX_ADMIT_ATTEMPTS {
            let (state, created) = self.queues.get_or_create(partition);
            if created {
                self.materialize(&state);
            }
            match state.push(envelope) {
                Ok(queue_length) => {
                    self.health.set_queue_length(partition, queue_length);
                    return Ok(queue_length);
                }
                Err(returned) => {
                    debug!(partition = %partition, "partition retired during enqueue, retrying");
                    envelope = returned;
                }
            }
        }
        Err(envelope)
    }

    /// Register a new partition everywhere and start its consumer loop
    fn materialize(self: &Arc<Self>, state: &Arc<PartitionState<T>>) {
        let key = state.key();
        let configured = self.config.load().execution_mode_for(key.index());
        self.execution.register(key, configured);
        let mode = self.execution.mode(key).unwrap_or(configured);

        self.health.register(key, mode);
        self.metrics.record_partition_created();
        consumer::spawn(self, state);

        info!(partition = %key, mode = %mode, "partition created");
    }

    /// Drop a retired partition's health entry and execution lane
    pub(crate) fn forget(&self, key: PartitionKey) {
        self.health.remove(key);
        self.execution.remove(key);
    }

    /// Return an envelope after its terminal action
    pub(crate) fn release(&self, key: PartitionKey, envelope: Envelope<T>) {
        self.pending.remove(envelope.message_id());
        self.isolator.release(key);
        self.pool.put(envelope);
    }

    /// Write envelopes to the fallback store, then release them
    pub(crate) async fn divert(
        &self,
        key: PartitionKey,
        mut envelopes: Vec<Envelope<T>>,
        reason: FailureReason,
        trace_id: &str,
        error: Option<String>,
    ) {
        let entries: Vec<_> = envelopes
            .iter_mut()
            .filter_map(FallbackEntry::from_envelope)
            .collect();

        if !entries.is_empty() {
            let mut record = FallbackRecord::new(reason, Some(key), trace_id, entries);
            if let Some(error) = error {
                record = record.with_error(error);
            }
            self.write_fallback(record).await;
        }

        for envelope in envelopes {
            self.release(key, envelope);
        }
    }

    /// Persist a record, logging and counting write failures
    pub(crate) async fn write_fallback(&self, record: FallbackRecord<T>) {
        let reason = record.reason;
        let messages = record.len();
        let partition = record.partition;
        let trace_id = record.trace_id.clone();

        match reason {
            FailureReason::EnqueueFailure
            | FailureReason::CircuitBreakerFailure
            | FailureReason::IsolateFailure => {
                self.tracker.record(reason);
            }
            FailureReason::ProcessFailure | FailureReason::ShutdownRemaining => {
                warn!(
                    partition = ?partition.map(|p| p.index()),
                    reason = %reason,
                    messages,
                    trace_id,
                    "writing batch to fallback store"
                );
            }
        }

        match self.fallback.store_batch(record).await {
            Ok(()) => self.metrics.record_fallback(reason, messages as u64),
            Err(e) => {
                self.metrics.record_fallback_error();
                error!(
                    partition = ?partition.map(|p| p.index()),
                    reason = %reason,
                    messages,
                    trace_id,
                    error = %e,
                    "fallback store write failed, messages lost"
                );
            }
        }
    }

    /// Divert a message rejected before it was admitted
    async fn reject(
        &self,
        message: T,
        message_id: String,
        partition: Option<PartitionKey>,
        reason: FailureReason,
        trace_id: &str,
        error: Option<String>,
    ) -> EnqueueOutcome {
        let raw = message.raw_payload().map(Bytes::copy_from_slice);
        let mut entry = FallbackEntry::new(message_id, message);
        entry.raw = raw;

        let mut record = FallbackRecord::new(reason, partition, trace_id, vec![entry]);
        if let Some(error) = error {
            record = record.with_error(error);
        }
        self.write_fallback(record).await;
        EnqueueOutcome::Fallback(reason)
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`BatchEngine`]
///
/// Only the configuration and the business processor are required. Every
/// strategy falls back to the in-process implementation when not supplied.
pub struct BatchEngineBuilder<T: Message> {
    config: EngineConfig,
    metrics_config: MetricsConfig,
    processor: Arc<dyn BatchProcessor<T>>,
    idempotency: Option<Arc<dyn IdempotencyChecker>>,
    breaker: Option<Arc<dyn CircuitBreaker>>,
    isolator: Option<Arc<dyn ConcurrencyIsolator>>,
    degrade: Option<Arc<dyn DegradeHandler<T>>>,
    fallback: Option<Arc<dyn FallbackStore<T>>>,
    raw_capacity: usize,
}

impl<T: Message> BatchEngineBuilder<T> {
    fn new(config: EngineConfig, processor: Arc<dyn BatchProcessor<T>>) -> Self {
        Self {
            config,
            metrics_config: MetricsConfig::default(),
            processor,
            idempotency: None,
            breaker: None,
            isolator: None,
            degrade: None,
            fallback: None,
            raw_capacity: DEFAULT_RAW_CAPACITY,
        }
    }

    pub fn idempotency_checker(mut self, checker: Arc<dyn IdempotencyChecker>) -> Self {
        self.idempotency = Some(checker);
        self
    }

    pub fn circuit_breaker(mut self, breaker: Arc<dyn CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn isolator(mut self, isolator: Arc<dyn ConcurrencyIsolator>) -> Self {
        self.isolator = Some(isolator);
        self
    }

    pub fn degrade_handler(mut self, handler: Arc<dyn DegradeHandler<T>>) -> Self {
        self.degrade = Some(handler);
        self
    }

    pub fn fallback_store(mut self, store: Arc<dyn FallbackStore<T>>) -> Self {
        self.fallback = Some(store);
        self
    }

    /// Settings for the periodic health reporter started by [`BatchEngine::start`]
    pub fn metrics_config(mut self, config: MetricsConfig) -> Self {
        self.metrics_config = config;
        self
    }

    /// Bytes reserved per pooled envelope for raw payloads
    pub fn raw_capacity(mut self, bytes: usize) -> Self {
        self.raw_capacity = bytes;
        self
    }

    /// Validate the configuration and assemble the engine
    pub fn build(self) -> Result<BatchEngine<T>, EngineError> {
        self.config.validate()?;
        let config = self.config;

        let fallback = self.fallback.unwrap_or_else(|| {
            warn!("no fallback store configured, using in-memory store (not durable)");
            Arc::new(MemoryFallbackStore::<T>::new())
        });

        let shared = Arc::new(Shared {
            idempotency: self
                .idempotency
                .unwrap_or_else(|| Arc::new(MemoryIdempotencyChecker::new(config.idempotency_ttl))),
            breaker: self
                .breaker
                .unwrap_or_else(|| Arc::new(PartitionCircuitBreaker::from_config(&config))),
            isolator: self
                .isolator
                .unwrap_or_else(|| Arc::new(PartitionIsolator::new())),
            degrade: self
                .degrade
                .unwrap_or_else(|| Arc::new(LogDegradeHandler::<T>::new())),
            fallback,
            processor: self.processor,
            retry: RetryExecutor::new(),
            execution: ExecutionController::new(config.parallel_max_concurrency),
            router: PartitionRouter::new(),
            dispatcher: Arc::new(PartitionDispatcher::new(config.partition_count)),
            queues: PartitionQueueSet::new(),
            health: Arc::new(HealthMonitor::new()),
            pool: Arc::new(EnvelopePool::new(config.envelope_pool_size, self.raw_capacity)),
            metrics: Arc::new(EngineMetrics::new()),
            tracker: FallbackTracker::new(),
            pending: DashSet::new(),
            cancel: CancellationToken::new(),
            shutting_down: AtomicBool::new(false),
            config: Arc::new(ArcSwap::from_pointee(config)),
        });

        Ok(BatchEngine {
            shared,
            metrics_config: self.metrics_config,
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }
}

// ============================================================================
// Engine handle
// ============================================================================

/// Partitioned batch-processing engine
///
/// Producers call [`enqueue`](Self::enqueue); everything else happens on
/// background tasks. Must be used from within a tokio runtime.
pub struct BatchEngine<T: Message> {
    shared: Arc<Shared<T>>,
    metrics_config: MetricsConfig,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Message> BatchEngine<T> {
    /// Start building an engine around `processor`
    pub fn builder(
        config: EngineConfig,
        processor: Arc<dyn BatchProcessor<T>>,
    ) -> BatchEngineBuilder<T> {
        BatchEngineBuilder::new(config, processor)
    }

    /// Start the partition dispatcher, the health reporter and the
    /// idempotency purge
    ///
    /// Consumer loops start on their own as partitions see traffic; this
    /// only enables dynamic scaling, periodic reporting and expiry of
    /// processed ids. Calling it again has no effect.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let shared = &self.shared;

        let dispatcher = tokio::spawn(dispatcher::run(
            Arc::clone(&shared.dispatcher),
            Arc::clone(&shared.config),
            Arc::clone(&shared.health),
            Arc::clone(&shared.metrics),
            shared.cancel.clone(),
        ));

        let reporter = HealthReporter::new(
            self.metrics_config.clone(),
            ReportSources {
                metrics: Arc::clone(&shared.metrics),
                health: Arc::clone(&shared.health),
                dispatcher: Arc::clone(&shared.dispatcher),
                pool: Arc::clone(&shared.pool),
            },
        );
        let reporter = tokio::spawn(reporter.run(shared.cancel.clone()));

        let config = shared.config.load();
        let purge = tokio::spawn(idempotency::run_purge(
            Arc::clone(&shared.idempotency),
            idempotency::purge_interval(config.idempotency_ttl),
            shared.cancel.clone(),
        ));

        self.tasks.lock().extend([dispatcher, reporter, purge]);

        info!(
            partitions = shared.dispatcher.current(),
            min_partitions = config.min_partition_count,
            max_partitions = config.max_partition_count,
            batch_size = config.batch_size,
            default_mode = %config.default_execution_mode,
            "batch engine started"
        );
    }

    /// Submit one message
    ///
    /// Never fails: every rejection is written to the fallback store and
    /// reported through the returned outcome. Does not wait for processing.
    pub async fn enqueue(&self, message: T) -> EnqueueOutcome {
        self.submit(message, None).await
    }

    /// Submit one message, giving up on admission once `cancel` fires
    ///
    /// Cancellation only covers the gates before the message is queued
    /// (a slow idempotency backend, for instance). A cancelled message is
    /// diverted as `EnqueueFailure`; once queued it is processed normally.
    pub async fn enqueue_cancellable(
        &self,
        message: T,
        cancel: &CancellationToken,
    ) -> EnqueueOutcome {
        self.submit(message, Some(cancel)).await
    }

    async fn submit(&self, message: T, cancel: Option<&CancellationToken>) -> EnqueueOutcome {
        let shared = &self.shared;
        shared.metrics.record_enqueued();

        let message_id = message
            .message_id()
            .map(Cow::into_owned)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let trace_id = new_trace_id();

        let refused = if shared.is_shutting_down() {
            Some(EngineError::ShuttingDown.to_string())
        } else if cancel.is_some_and(CancellationToken::is_cancelled) {
            Some(StrategyError::Cancelled.to_string())
        } else {
            None
        };
        if let Some(error) = refused {
            return shared
                .reject(
                    message,
                    message_id,
                    None,
                    FailureReason::EnqueueFailure,
                    &trace_id,
                    Some(error),
                )
                .await;
        }

        if !shared.pending.insert(message_id.clone()) {
            shared.metrics.record_deduplicated();
            debug!(message_id, "duplicate of a pending message ignored");
            return EnqueueOutcome::Duplicate;
        }

        let seen = match cancel {
            Some(cancel) => tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(StrategyError::Cancelled),
                seen = shared.idempotency.seen(&message_id) => seen,
            },
            None => shared.idempotency.seen(&message_id).await,
        };
        match seen {
            Ok(false) => {}
            Ok(true) => {
                shared.pending.remove(&message_id);
                shared.metrics.record_deduplicated();
                debug!(message_id, "already processed message ignored");
                return EnqueueOutcome::Duplicate;
            }
            Err(e) => {
                shared.pending.remove(&message_id);
                warn!(message_id, error = %e, "idempotency check failed");
                return shared
                    .reject(
                        message,
                        message_id,
                        None,
                        FailureReason::EnqueueFailure,
                        &trace_id,
                        Some(e.to_string()),
                    )
                    .await;
            }
        }

        let partition = {
            let routing_key = message.routing_key();
            shared.router.route(
                routing_key.as_deref().unwrap_or(&message_id),
                shared.dispatcher.current(),
            )
        };

        if !shared.breaker.allow(partition) {
            shared.pending.remove(&message_id);
            return shared
                .reject(
                    message,
                    message_id,
                    Some(partition),
                    FailureReason::CircuitBreakerFailure,
                    &trace_id,
                    None,
                )
                .await;
        }

        let max_concurrency = shared.config.load().isolate_max_concurrency_per_partition;
        if !shared.isolator.try_acquire(partition, max_concurrency) {
            shared.pending.remove(&message_id);
            return shared
                .reject(
                    message,
                    message_id,
                    Some(partition),
                    FailureReason::IsolateFailure,
                    &trace_id,
                    None,
                )
                .await;
        }

        let mut envelope = shared.pool.get();
        if let Some(raw) = message.raw_payload() {
            envelope.extend_raw(raw);
        }
        envelope.fill(message, &message_id, &trace_id, None);

        match shared.admit(partition, envelope) {
            Ok(queue_length) => {
                trace!(partition = %partition, message_id, queue_length, "message queued");
                EnqueueOutcome::Queued { partition }
            }
            Err(envelope) => {
                shared
                    .divert(
                        partition,
                        vec![envelope],
                        FailureReason::EnqueueFailure,
                        &trace_id,
                        Some("partition queue unavailable".to_string()),
                    )
                    .await;
                EnqueueOutcome::Fallback(FailureReason::EnqueueFailure)
            }
        }
    }

    /// Switch a partition's execution mode once its in-flight batches drain
    ///
    /// Returns false if the drain exceeds `execution_mode_switch_timeout`,
    /// the partition is at or above `max_partition_count`, or the engine is
    /// shutting down.
    pub async fn switch_partition_execution_mode(
        &self,
        partition: PartitionKey,
        mode: ExecutionMode,
    ) -> bool {
        let shared = &self.shared;
        if shared.is_shutting_down() {
            return false;
        }

        let config = shared.config.load_full();
        if partition.as_usize() >= config.max_partition_count {
            warn!(
                partition = %partition,
                max_partitions = config.max_partition_count,
                "mode switch for a partition the router can never reach"
            );
            return false;
        }

        let timeout = config.execution_mode_switch_timeout;
        let switched = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => false,
            switched = shared.execution.switch_mode(partition, mode, timeout) => switched,
        };

        if switched {
            shared.health.set_execution_mode(partition, mode);
        }
        switched
    }

    /// Queue length per materialized partition
    pub fn partition_queue_stats(&self) -> BTreeMap<PartitionKey, usize> {
        self.shared.queues.queue_lengths()
    }

    /// Health of every live partition, with live queue and concurrency figures
    pub fn health_snapshot(&self) -> Vec<PartitionHealth> {
        let shared = &self.shared;
        let mut snapshot = shared.health.snapshot();
        for health in &mut snapshot {
            let key = health.partition;
            if let Some(state) = shared.queues.get(key) {
                health.queue_length = state.len();
            }
            health.current_concurrency = shared.execution.current_concurrency(key);
            if let Some(mode) = shared.execution.mode(key) {
                health.execution_mode = mode;
            }
        }
        snapshot
    }

    /// Partition count the router currently uses
    pub fn current_partition_count(&self) -> usize {
        self.shared.dispatcher.current()
    }

    /// Run one scaling check now, outside the periodic schedule
    ///
    /// Still subject to the adjust-interval rate limit.
    pub fn adjust_partitions(&self) -> Option<dispatcher::ScaleDecision> {
        let shared = &self.shared;
        let decision = shared
            .dispatcher
            .adjust(&shared.config.load(), shared.health.queue_stats());
        if decision.is_some() {
            shared.metrics.record_partition_adjustment();
        }
        decision
    }

    pub fn metrics(&self) -> EngineMetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn pool_metrics(&self) -> PoolSnapshot {
        self.shared.pool.metrics().snapshot()
    }

    /// Configuration currently in effect
    pub fn config(&self) -> Arc<EngineConfig> {
        self.shared.config.load_full()
    }

    /// Swap in a new configuration
    ///
    /// Batch size and interval, retry, isolation limit, thresholds and
    /// timeouts apply from the next read. Breaker settings, the parallel
    /// limit of existing lanes and the pool size keep their startup values.
    pub fn reconfigure(&self, config: EngineConfig) -> Result<(), EngineError> {
        config.validate()?;
        self.shared.config.store(Arc::new(config));
        info!("engine configuration replaced");
        Ok(())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.is_shutting_down()
    }

    /// Stop the engine and divert everything still queued
    ///
    /// Stops scaling, cancels every loop, waits up to `shutdown_timeout`
    /// for them to finish their current batch, then drains every queue and
    /// unfinished batch into the fallback store as `shutdown_remaining`.
    /// Later calls return an empty report.
    pub async fn shutdown(&self) -> ShutdownReport {
        let shared = &self.shared;
        if shared.shutting_down.swap(true, Ordering::AcqRel) {
            return ShutdownReport::default();
        }

        let started = Instant::now();
        let timeout = shared.config.load().shutdown_timeout;
        info!(timeout_ms = timeout.as_millis() as u64, "batch engine shutting down");

        shared.dispatcher.stop_accepting();
        shared.cancel.cancel();
        let states = shared.queues.close();

        let deadline = tokio::time::Instant::now() + timeout;
        let mut forced = false;

        for state in &states {
            let Some(mut handle) = state.take_supervisor() else {
                continue;
            };
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                warn!(partition = %state.key(), "consumer loop missed shutdown deadline, aborting");
                handle.abort();
                let _ = handle.await;
                forced = true;
            }
        }

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for mut task in tasks {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                task.abort();
            }
        }

        let mut drained = 0;
        for state in &states {
            let key = state.key();
            let (queued, claims) = state.close_and_drain();

            if !queued.is_empty() {
                drained += queued.len();
                shared
                    .divert(key, queued, FailureReason::ShutdownRemaining, &new_trace_id(), None)
                    .await;
            }

            for claim in claims {
                if let Some(envelopes) = claim.take() {
                    drained += envelopes.len();
                    shared
                        .divert(
                            key,
                            envelopes,
                            FailureReason::ShutdownRemaining,
                            claim.trace_id(),
                            None,
                        )
                        .await;
                }
            }
        }

        let report = ShutdownReport { drained, forced };
        let snapshot = shared.metrics.snapshot();
        info!(
            drained,
            forced,
            elapsed_ms = started.elapsed().as_millis() as u64,
            processed = snapshot.messages_processed,
            fallback = snapshot.fallback_total(),
            "batch engine stopped"
        );
        report
    }
}

impl<T: Message> Drop for BatchEngine<T> {
    fn drop(&mut self) {
        if !self.shared.is_shutting_down() {
            self.shared.cancel.cancel();
            let queued = self.shared.queues.total_queued();
            if queued > 0 {
                warn!(queued, "batch engine dropped without shutdown, queued messages lost");
            }
        }
    }
}

impl<T: Message> std::fmt::Debug for BatchEngine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchEngine")
            .field("partitions", &self.shared.dispatcher.current())
            .field("live_partitions", &self.shared.queues.partition_count())
            .field("shutting_down", &self.shared.is_shutting_down())
            .finish()
    }
}
