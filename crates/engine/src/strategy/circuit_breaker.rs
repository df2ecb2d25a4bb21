//! Per-partition circuit breaking
//!
//! A partition whose batches keep failing terminally is fast-failed at the
//! enqueue gate for a cooldown period instead of piling more work onto a
//! broken downstream.
//!
//! # State machine
//!
//! ```text
//! Closed --(threshold consecutive failures)--> Open
//! Open --(break duration elapsed, one request admitted)--> HalfOpen
//! HalfOpen --(success)--> Closed
//! HalfOpen --(failure)--> Open
//! ```
//!
//! While half-open only the trial request passes. If its outcome never
//! arrives, another trial is admitted once a further break duration passes.

use std::fmt;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use sluice_config::EngineConfig;

use crate::message::PartitionKey;

/// Observable breaker state for one partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fast-fail gate keyed by partition
pub trait CircuitBreaker: Send + Sync {
    /// Whether a new message for `key` may enter the pipeline
    ///
    /// May transition Open to HalfOpen as a side effect.
    fn allow(&self, key: PartitionKey) -> bool;

    /// A batch for `key` completed successfully
    fn record_success(&self, key: PartitionKey);

    /// A batch for `key` failed terminally; returns true if the circuit
    /// opened because of this failure
    fn record_failure(&self, key: PartitionKey) -> bool;

    /// Current state for `key`
    fn state(&self, key: PartitionKey) -> CircuitState;
}

#[derive(Debug, Default)]
struct PartitionCircuit {
    failures: u32,
    opened_at: Option<Instant>,
    trial_at: Option<Instant>,
}

impl PartitionCircuit {
    fn state(&self) -> CircuitState {
        match (self.opened_at, self.trial_at) {
            (None, _) => CircuitState::Closed,
            (Some(_), None) => CircuitState::Open,
            (Some(_), Some(_)) => CircuitState::HalfOpen,
        }
    }
}

/// Consecutive-failure breaker with one state machine per partition
#[derive(Debug)]
pub struct PartitionCircuitBreaker {
    circuits: DashMap<PartitionKey, PartitionCircuit>,
    failure_threshold: u32,
    break_duration: Duration,
}

impl PartitionCircuitBreaker {
    pub fn new(failure_threshold: u32, break_duration: Duration) -> Self {
        Self {
            circuits: DashMap::new(),
            failure_threshold: failure_threshold.max(1),
            break_duration,
        }
    }

    /// Breaker using `circuit_breaker_*` settings
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.circuit_breaker_failure_threshold,
            config.circuit_breaker_break_duration,
        )
    }

    /// Consecutive failures currently counted for `key`
    pub fn failure_count(&self, key: PartitionKey) -> u32 {
        self.circuits.get(&key).map(|c| c.failures).unwrap_or(0)
    }

    /// Partitions whose breaker is not closed
    pub fn open_partitions(&self) -> Vec<PartitionKey> {
        self.circuits
            .iter()
            .filter(|entry| entry.value().state() != CircuitState::Closed)
            .map(|entry| *entry.key())
            .collect()
    }
}

impl CircuitBreaker for PartitionCircuitBreaker {
    fn allow(&self, key: PartitionKey) -> bool {
        // No entry means no failures yet
        let Some(mut circuit) = self.circuits.get_mut(&key) else {
            return true;
        };

        let Some(opened_at) = circuit.opened_at else {
            return true;
        };

        let now = Instant::now();
        match circuit.trial_at {
            None if now.duration_since(opened_at) >= self.break_duration => {
                circuit.trial_at = Some(now);
                info!(partition = %key, "circuit breaker half-open, admitting trial");
                true
            }
            Some(trial_at) if now.duration_since(trial_at) >= self.break_duration => {
                circuit.trial_at = Some(now);
                debug!(partition = %key, "half-open trial timed out, admitting another");
                true
            }
            _ => false,
        }
    }

    fn record_success(&self, key: PartitionKey) {
        if let Some((_, circuit)) = self.circuits.remove(&key)
            && circuit.opened_at.is_some()
        {
            info!(
                partition = %key,
                prev_failures = circuit.failures,
                "circuit breaker closed after successful batch"
            );
        }
    }

    fn record_failure(&self, key: PartitionKey) -> bool {
        let mut circuit = self.circuits.entry(key).or_default();
        circuit.failures = circuit.failures.saturating_add(1);

        match circuit.state() {
            CircuitState::Closed if circuit.failures >= self.failure_threshold => {
                circuit.opened_at = Some(Instant::now());
                warn!(
                    partition = %key,
                    failures = circuit.failures,
                    break_ms = self.break_duration.as_millis() as u64,
                    "circuit breaker opened after consecutive failures"
                );
                true
            }
            CircuitState::HalfOpen => {
                circuit.opened_at = Some(Instant::now());
                circuit.trial_at = None;
                warn!(partition = %key, "half-open trial failed, circuit breaker re-opened");
                true
            }
            _ => false,
        }
    }

    fn state(&self, key: PartitionKey) -> CircuitState {
        self.circuits
            .get(&key)
            .map(|c| c.state())
            .unwrap_or(CircuitState::Closed)
    }
}

#[cfg(test)]
#[path = "circuit_breaker_test.rs"]
mod circuit_breaker_test;
