//! Degrade handlers
//!
//! Best-effort side channel invoked when a batch fails terminally, before
//! it is written to the fallback store. The engine bounds every call with
//! `degrade_timeout` and ignores the result beyond logging and counting.

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{BoxError, StrategyError};
use crate::message::PartitionKey;

/// Alternate handling for a batch that exhausted its retries
#[async_trait]
pub trait DegradeHandler<T>: Send + Sync {
    /// Handle a failed batch; `error` is the last processing error
    async fn degrade(
        &self,
        batch: &[T],
        partition: PartitionKey,
        trace_id: &str,
        error: &str,
    ) -> Result<(), BoxError>;
}

/// Degrade handler that only logs the failed batch
#[derive(Debug)]
pub struct LogDegradeHandler<T> {
    _payload: PhantomData<fn(T)>,
}

impl<T> LogDegradeHandler<T> {
    pub fn new() -> Self {
        Self {
            _payload: PhantomData,
        }
    }
}

impl<T> Default for LogDegradeHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> DegradeHandler<T> for LogDegradeHandler<T> {
    async fn degrade(
        &self,
        batch: &[T],
        partition: PartitionKey,
        trace_id: &str,
        error: &str,
    ) -> Result<(), BoxError> {
        warn!(
            partition = %partition,
            trace_id,
            batch_size = batch.len(),
            error,
            "batch degraded"
        );
        Ok(())
    }
}

/// Degrade handler that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDegradeHandler;

#[async_trait]
impl<T: Send + Sync + 'static> DegradeHandler<T> for NoopDegradeHandler {
    async fn degrade(
        &self,
        _batch: &[T],
        _partition: PartitionKey,
        _trace_id: &str,
        _error: &str,
    ) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Call `handler` with a time bound
///
/// Handler errors and timeouts are mapped to `StrategyError` for the caller
/// to log and count; they never reach the processing path.
pub(crate) async fn degrade_bounded<T>(
    handler: &dyn DegradeHandler<T>,
    timeout: Duration,
    batch: &[T],
    partition: PartitionKey,
    trace_id: &str,
    error: &str,
) -> Result<(), StrategyError> {
    match tokio::time::timeout(timeout, handler.degrade(batch, partition, trace_id, error)).await {
        Ok(Ok(())) => {
            debug!(partition = %partition, trace_id, "degrade handler completed");
            Ok(())
        }
        Ok(Err(e)) => Err(StrategyError::backend("degrade", e.to_string())),
        Err(_) => Err(StrategyError::Timeout {
            operation: "degrade",
            millis: timeout.as_millis() as u64,
        }),
    }
}
