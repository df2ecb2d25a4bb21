//! Sluice - Batch Engine
//!
//! Partitioned batch processing for high-volume device messages. Producers
//! enqueue one message at a time; the engine routes each to a partition,
//! forms batches per partition and hands them to a caller-supplied
//! [`BatchProcessor`] behind layered resilience.
//!
//! # Architecture
//!
//! ```text
//!              ┌─ idempotency ─ breaker ─ isolation ─┐
//! enqueue() ───┤                                     ├──→ [Partition 0] ──→ consumer loop ─┐
//!              └──────── fallback ◄── reject ────────┘    [Partition 1] ──→ consumer loop ─┼─→ retry ─→ lane ─→ process_batch
//!                                                         [Partition N] ──→ consumer loop ─┘
//!                     ▲                                                      │
//!              dispatcher (scale N) ◄── health monitor ◄─────────────────────┘
//! ```
//!
//! # Key Design
//!
//! - **Never blocks producers**: every rejection is written to the fallback
//!   store and reported as an [`EnqueueOutcome`]
//! - **One terminal outcome per message**: processed, or diverted with a
//!   [`FailureReason`]
//! - **Per-partition FIFO**: serial partitions process batches in queue order
//! - **Pooled envelopes**: messages travel in reusable [`Envelope`]s
//! - **Pluggable strategies**: idempotency, breaker, isolation, degrade and
//!   fallback are traits with in-process defaults
//!
//! # Example
//!
//! ```ignore
//! use sluice_engine::{BatchEngine, EngineConfig};
//!
//! let engine = BatchEngine::builder(EngineConfig::default(), Arc::new(Writer::new(db)))
//!     .fallback_store(Arc::new(JsonlFallbackStore::open("fallback.jsonl", true).await?))
//!     .build()?;
//! engine.start();
//!
//! engine.enqueue(reading).await;
//!
//! let report = engine.shutdown().await;
//! ```

mod consumer;
mod dispatcher;
mod engine;
mod envelope;
mod error;
mod health;
mod message;
mod metrics;
mod pool;
mod processor;
mod queue;
mod reporter;
mod router;
pub mod strategy;

pub use dispatcher::{PartitionDispatcher, ScaleDecision};
pub use engine::{BatchEngine, BatchEngineBuilder, DEFAULT_RAW_CAPACITY, ShutdownReport};
pub use envelope::Envelope;
pub use error::{BoxError, EngineError, FallbackError, StrategyError};
pub use health::{HealthMonitor, PartitionHealth};
pub use message::{EnqueueOutcome, FailureReason, Message, PartitionKey};
pub use metrics::{EngineMetrics, EngineMetricsSnapshot};
pub use pool::{EnvelopePool, PoolMetrics, PoolSnapshot};
pub use processor::BatchProcessor;
pub use router::PartitionRouter;
pub use strategy::{
    CircuitBreaker, CircuitState, ConcurrencyIsolator, DegradeHandler, FallbackEntry,
    FallbackRecord, FallbackStore, IdempotencyChecker, JsonlFallbackStore, LogDegradeHandler,
    MemoryFallbackStore, MemoryIdempotencyChecker, NoopDegradeHandler, PartitionCircuitBreaker,
    PartitionIsolator, RetryPolicy,
};

// Re-export configuration types callers need to build an engine
pub use sluice_config::{Backoff, EngineConfig, ExecutionMode, MetricsConfig};

// Re-export so processors can name the token without a direct dependency
pub use tokio_util::sync::CancellationToken;
