//! Resilience strategies
//!
//! The pluggable layers every message passes through. Idempotency, circuit
//! breaking, isolation, degrade and fallback are traits injected into the
//! engine; retry and execution ordering are concrete components driven by
//! configuration.

pub mod circuit_breaker;
pub mod degrade;
pub mod execution;
pub mod fallback;
pub mod idempotency;
pub mod isolation;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitState, PartitionCircuitBreaker};
pub use degrade::{DegradeHandler, LogDegradeHandler, NoopDegradeHandler};
pub use execution::ExecutionController;
pub use fallback::{
    FallbackEntry, FallbackRecord, FallbackStore, JsonlFallbackStore, MemoryFallbackStore,
};
pub use idempotency::{IdempotencyChecker, MemoryIdempotencyChecker};
pub use isolation::{ConcurrencyIsolator, PartitionIsolator};
pub use retry::{RetryError, RetryExecutor, RetryPolicy};
