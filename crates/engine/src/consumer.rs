//! Partition consumer loop
//!
//! One supervised task per materialized partition. The loop dequeues up to
//! `batch_size` envelopes, runs them through retry and the execution lane
//! into the business processor, and performs exactly one terminal action
//! per batch: complete, or degrade and divert to the fallback store.
//!
//! In serial mode each batch is awaited inline. In parallel mode batches run
//! on a `JoinSet`, bounded by `parallel_max_concurrency`.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::{AbortHandle, Id, JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use sluice_config::ExecutionMode;

use crate::engine::{Shared, new_trace_id};
use crate::envelope::Envelope;
use crate::error::{BoxError, StrategyError};
use crate::message::{FailureReason, Message};
use crate::queue::{BatchClaim, PartitionState};
use crate::strategy::{RetryError, RetryPolicy};
use crate::strategy::degrade::degrade_bounded;

/// Aborts the wrapped task when dropped
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Start the supervised consumer loop for `state`
pub(crate) fn spawn<T: Message>(shared: &Arc<Shared<T>>, state: &Arc<PartitionState<T>>) {
    let handle = tokio::spawn(supervise(Arc::clone(shared), Arc::clone(state)));
    state.set_supervisor(handle);
}

/// Restart the loop after a panic until it exits cleanly or the engine stops
async fn supervise<T: Message>(shared: Arc<Shared<T>>, state: Arc<PartitionState<T>>) {
    let key = state.key();

    loop {
        let task = tokio::spawn(consume(Arc::clone(&shared), Arc::clone(&state)));
        let _abort = AbortOnDrop(task.abort_handle());

        let error = match task.await {
            Ok(()) => break,
            Err(e) if e.is_cancelled() => break,
            Err(e) => e,
        };

        shared.metrics.record_loop_restart();
        let message = panic_message(error);
        error!(partition = %key, error = %message, "consumer loop panicked");

        // Batches the dead loop left behind go down the failure path
        for claim in state.take_in_flight() {
            if let Some(envelopes) = claim.take() {
                fail_batch(
                    &shared,
                    &state,
                    envelopes,
                    claim.trace_id(),
                    format!("consumer loop panicked: {message}"),
                    Duration::ZERO,
                )
                .await;
            }
        }

        if shared.cancel.is_cancelled() {
            break;
        }
        warn!(partition = %key, "restarting consumer loop");
    }

    debug!(partition = %key, "consumer loop stopped");
}

async fn consume<T: Message>(shared: Arc<Shared<T>>, state: Arc<PartitionState<T>>) {
    let key = state.key();
    let mut batches = JoinSet::new();
    let mut running: HashMap<Id, u64> = HashMap::new();

    loop {
        if shared.cancel.is_cancelled() {
            break;
        }

        while let Some(joined) = batches.try_join_next_with_id() {
            settle(&shared, &state, &mut running, joined).await;
        }

        if batches.is_empty()
            && !shared.router.is_active(key, shared.dispatcher.current())
            && shared.queues.retire_if_idle(&state, || shared.forget(key))
        {
            shared.metrics.record_partition_retired();
            info!(partition = %key, "partition retired");
            return;
        }

        let config = shared.config.load_full();
        let mode = shared
            .execution
            .mode(key)
            .unwrap_or_else(|| config.execution_mode_for(key.index()));
        let limit = match mode {
            ExecutionMode::Serial => 1,
            ExecutionMode::Parallel => config.parallel_max_concurrency.max(1),
        };

        if batches.len() >= limit {
            let joined = tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => break,
                joined = batches.join_next_with_id() => joined,
            };
            if let Some(joined) = joined {
                settle(&shared, &state, &mut running, joined).await;
            }
            continue;
        }

        let Some(claim) = state.dequeue_batch(config.batch_size, new_trace_id()) else {
            tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => break,
                _ = tokio::time::sleep(config.batch_interval) => {}
            }
            continue;
        };
        shared.health.set_queue_length(key, state.len());

        match mode {
            ExecutionMode::Serial => run_batch(&shared, &state, &claim).await,
            ExecutionMode::Parallel => {
                let claim_id = claim.id();
                let task = {
                    let shared = Arc::clone(&shared);
                    let state = Arc::clone(&state);
                    batches.spawn(async move { run_batch(&shared, &state, &claim).await })
                };
                running.insert(task.id(), claim_id);
            }
        }
    }

    // Batches already dispatched observe cancellation and settle themselves
    while let Some(joined) = batches.join_next_with_id().await {
        settle(&shared, &state, &mut running, joined).await;
    }
}

/// Account for a finished batch task
///
/// A task that panicked never reached its terminal action, so its claim is
/// failed here.
async fn settle<T: Message>(
    shared: &Shared<T>,
    state: &PartitionState<T>,
    running: &mut HashMap<Id, u64>,
    joined: Result<(Id, ()), JoinError>,
) {
    let error = match joined {
        Ok((id, ())) => {
            running.remove(&id);
            return;
        }
        Err(e) => e,
    };

    let claim_id = running.remove(&error.id());
    if error.is_cancelled() {
        return;
    }

    let message = panic_message(error);
    error!(partition = %state.key(), error = %message, "batch task panicked");

    let Some(claim) = claim_id.and_then(|id| state.claim(id)) else {
        return;
    };
    if let Some(envelopes) = claim.take() {
        state.finish(claim.id());
        fail_batch(
            shared,
            state,
            envelopes,
            claim.trace_id(),
            format!("batch task panicked: {message}"),
            Duration::ZERO,
        )
        .await;
    }
}

/// Drive one batch through retry and the execution lane to its terminal action
async fn run_batch<T: Message>(shared: &Shared<T>, state: &PartitionState<T>, claim: &BatchClaim<T>) {
    let key = state.key();
    let trace_id = claim.trace_id();
    let payloads = claim.payloads();
    let batch = payloads.as_slice();
    let policy = RetryPolicy::from_config(&shared.config.load());
    let cancel = &shared.cancel;

    debug!(partition = %key, trace_id, messages = batch.len(), "processing batch");

    let started = Instant::now();
    let result = shared
        .retry
        .execute(&policy, cancel, "process_batch", move |attempt| async move {
            shared.metrics.record_attempt(attempt);
            let outcome = shared
                .execution
                .execute(key, cancel, || {
                    shared.processor.process_batch(batch, &key, trace_id, cancel)
                })
                .await;
            match outcome {
                Ok(processed) => processed,
                Err(e) => Err(Box::new(e) as BoxError),
            }
        })
        .await;
    let latency = started.elapsed();

    // Shutdown may have drained the claim while the processor ran
    let Some(envelopes) = claim.take() else {
        state.finish(claim.id());
        debug!(partition = %key, trace_id, "batch already claimed by shutdown");
        return;
    };
    state.finish(claim.id());

    match result {
        Ok(()) => complete_batch(shared, state, envelopes, trace_id, latency).await,
        Err(RetryError::Cancelled { last_error, .. }) => {
            shared
                .divert(key, envelopes, FailureReason::ShutdownRemaining, trace_id, last_error)
                .await;
        }
        Err(RetryError::Exhausted {
            attempts,
            last_error,
        }) => {
            let error = format!("failed after {attempts} attempts: {last_error}");
            fail_batch(shared, state, envelopes, trace_id, error, latency).await;

            let backoff = shared.config.load().failure_backoff;
            if !backoff.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
}

/// Success path: mark processed, release, record
async fn complete_batch<T: Message>(
    shared: &Shared<T>,
    state: &PartitionState<T>,
    envelopes: Vec<Envelope<T>>,
    trace_id: &str,
    latency: Duration,
) {
    let key = state.key();
    let messages = envelopes.len();
    shared.breaker.record_success(key);

    for envelope in &envelopes {
        if let Err(e) = shared.idempotency.mark_processed(envelope.message_id()).await {
            shared.metrics.record_idempotency_error();
            warn!(
                partition = %key,
                message_id = envelope.message_id(),
                error = %e,
                "failed to mark message processed"
            );
        }
    }

    for envelope in envelopes {
        shared.release(key, envelope);
    }

    shared.metrics.record_batch_success(messages as u64);
    shared
        .health
        .record_success(key, messages, latency, state.len());

    debug!(
        partition = %key,
        trace_id,
        messages,
        latency_ms = latency.as_millis() as u64,
        "batch processed"
    );
}

/// Failure path: breaker, health, degrade handler, fallback store
async fn fail_batch<T: Message>(
    shared: &Shared<T>,
    state: &PartitionState<T>,
    envelopes: Vec<Envelope<T>>,
    trace_id: &str,
    error: String,
    latency: Duration,
) {
    let key = state.key();
    if shared.breaker.record_failure(key) {
        warn!(partition = %key, "circuit breaker opened");
    }
    shared.metrics.record_batch_failure();
    shared.health.record_failure(key, latency, state.len());

    let payloads: Vec<T> = envelopes
        .iter()
        .filter_map(|e| e.payload().cloned())
        .collect();
    let timeout = shared.config.load().degrade_timeout;

    match degrade_bounded(&*shared.degrade, timeout, &payloads, key, trace_id, &error).await {
        Ok(()) => {}
        Err(e @ StrategyError::Timeout { .. }) => {
            shared.metrics.record_degrade_timeout();
            warn!(partition = %key, trace_id, error = %e, "degrade handler timed out");
        }
        Err(e) => {
            shared.metrics.record_degrade_failure();
            warn!(partition = %key, trace_id, error = %e, "degrade handler failed");
        }
    }

    shared
        .divert(key, envelopes, FailureReason::ProcessFailure, trace_id, Some(error))
        .await;
}

fn panic_message(error: JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }
    let payload: Box<dyn Any + Send> = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
