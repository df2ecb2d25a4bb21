//! Business extension point

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::BoxError;
use crate::message::PartitionKey;

/// Business logic executed once per batch
///
/// The only mandatory integration point. Every resilience layer of the
/// engine wraps this call: an `Err` is retried, and once retries run out the
/// batch is diverted to the fallback store.
///
/// Implementations should observe `cancel` in long-running work; the engine
/// fires it on shutdown.
///
/// # Example
///
/// ```ignore
/// struct Writer { db: Pool }
///
/// #[async_trait]
/// impl BatchProcessor<Reading> for Writer {
///     async fn process_batch(
///         &self,
///         batch: &[Reading],
///         partition: &PartitionKey,
///         trace_id: &str,
///         cancel: &CancellationToken,
///     ) -> Result<(), BoxError> {
///         self.db.insert_many(batch).await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait BatchProcessor<T>: Send + Sync {
    async fn process_batch(
        &self,
        batch: &[T],
        partition: &PartitionKey,
        trace_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), BoxError>;
}
