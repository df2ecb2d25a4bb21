//! Tests for the partition circuit breaker

use std::thread;
use std::time::Duration;

use sluice_config::EngineConfig;

use super::{CircuitBreaker, CircuitState, PartitionCircuitBreaker};
use crate::message::PartitionKey;

const P0: PartitionKey = PartitionKey::new(0);
const P1: PartitionKey = PartitionKey::new(1);

#[test]
fn test_new_partition_is_closed() {
    let breaker = PartitionCircuitBreaker::new(3, Duration::from_secs(60));
    assert_eq!(breaker.state(P0), CircuitState::Closed);
    assert!(breaker.allow(P0));
    assert_eq!(breaker.failure_count(P0), 0);
}

#[test]
fn test_opens_after_threshold() {
    let breaker = PartitionCircuitBreaker::new(3, Duration::from_secs(60));

    assert!(!breaker.record_failure(P0));
    assert!(!breaker.record_failure(P0));
    assert!(breaker.allow(P0));
    assert!(breaker.record_failure(P0));

    assert_eq!(breaker.state(P0), CircuitState::Open);
    assert!(!breaker.allow(P0));
}

#[test]
fn test_partitions_are_isolated() {
    let breaker = PartitionCircuitBreaker::new(1, Duration::from_secs(60));
    breaker.record_failure(P0);

    assert!(!breaker.allow(P0));
    assert!(breaker.allow(P1));
    assert_eq!(breaker.open_partitions(), vec![P0]);
}

#[test]
fn test_success_resets_failures() {
    let breaker = PartitionCircuitBreaker::new(3, Duration::from_secs(60));
    breaker.record_failure(P0);
    breaker.record_failure(P0);
    breaker.record_success(P0);

    assert_eq!(breaker.failure_count(P0), 0);
    assert!(!breaker.record_failure(P0));
    assert_eq!(breaker.state(P0), CircuitState::Closed);
}

#[test]
fn test_half_open_admits_single_trial() {
    let breaker = PartitionCircuitBreaker::new(1, Duration::from_millis(20));
    breaker.record_failure(P0);
    assert!(!breaker.allow(P0));

    thread::sleep(Duration::from_millis(30));

    assert!(breaker.allow(P0));
    assert_eq!(breaker.state(P0), CircuitState::HalfOpen);
    assert!(!breaker.allow(P0));
}

#[test]
fn test_half_open_success_closes() {
    let breaker = PartitionCircuitBreaker::new(1, Duration::from_millis(20));
    breaker.record_failure(P0);
    thread::sleep(Duration::from_millis(30));
    assert!(breaker.allow(P0));

    breaker.record_success(P0);
    assert_eq!(breaker.state(P0), CircuitState::Closed);
    assert!(breaker.allow(P0));
    assert!(breaker.open_partitions().is_empty());
}

#[test]
fn test_half_open_failure_reopens() {
    let breaker = PartitionCircuitBreaker::new(5, Duration::from_millis(20));
    for _ in 0..5 {
        breaker.record_failure(P0);
    }
    thread::sleep(Duration::from_millis(30));
    assert!(breaker.allow(P0));

    assert!(breaker.record_failure(P0));
    assert_eq!(breaker.state(P0), CircuitState::Open);
    assert!(!breaker.allow(P0));
}

#[test]
fn test_lost_trial_is_replaced_after_break_duration() {
    let breaker = PartitionCircuitBreaker::new(1, Duration::from_millis(20));
    breaker.record_failure(P0);
    thread::sleep(Duration::from_millis(30));
    assert!(breaker.allow(P0));
    assert!(!breaker.allow(P0));

    thread::sleep(Duration::from_millis(30));
    assert!(breaker.allow(P0));
}

#[test]
fn test_from_config() {
    let config = EngineConfig {
        circuit_breaker_failure_threshold: 2,
        ..EngineConfig::default()
    };
    let breaker = PartitionCircuitBreaker::from_config(&config);

    breaker.record_failure(P0);
    assert!(breaker.record_failure(P0));
}

#[test]
fn test_state_display() {
    assert_eq!(CircuitState::Closed.to_string(), "closed");
    assert_eq!(CircuitState::HalfOpen.to_string(), "half_open");
}
