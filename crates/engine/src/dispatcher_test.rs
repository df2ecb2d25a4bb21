//! Tests for the partition dispatcher

use std::time::Duration;

use sluice_config::EngineConfig;

use super::{PartitionDispatcher, ScaleDecision};
use crate::message::PartitionKey;

fn config(min: usize, max: usize, interval: Duration) -> EngineConfig {
    EngineConfig {
        partition_expand_threshold: 100,
        partition_shrink_threshold: 10,
        partition_adjust_interval: interval,
        ..EngineConfig::default().with_partitions(min, min, max)
    }
}

fn uniform(count: usize, len: usize) -> Vec<(PartitionKey, usize)> {
    (0..count as u32).map(|i| (PartitionKey::new(i), len)).collect()
}

#[test]
fn test_expand_by_half_rounding_up() {
    let dispatcher = PartitionDispatcher::new(3);
    let config = config(1, 32, Duration::ZERO);

    let decision = dispatcher.adjust(&config, uniform(3, 500)).unwrap();
    assert_eq!(
        decision,
        ScaleDecision {
            from: 3,
            to: 5,
            mean_queue_length: 500.0,
        }
    );
    assert!(decision.is_expand());
    assert_eq!(dispatcher.current(), 5);
}

#[test]
fn test_expand_capped_at_max() {
    let dispatcher = PartitionDispatcher::new(6);
    let config = config(1, 8, Duration::ZERO);

    dispatcher.adjust(&config, uniform(6, 1000));
    assert_eq!(dispatcher.current(), 8);
    assert!(dispatcher.adjust(&config, uniform(8, 1000)).is_none());
}

#[test]
fn test_shrink_by_third_rounding_down() {
    let dispatcher = PartitionDispatcher::new(8);
    let config = config(1, 32, Duration::ZERO);

    let decision = dispatcher.adjust(&config, uniform(8, 0)).unwrap();
    assert_eq!(decision.to, 5);
    assert!(!decision.is_expand());
}

#[test]
fn test_shrink_floored_at_min() {
    let dispatcher = PartitionDispatcher::new(4);
    let config = config(3, 32, Duration::ZERO);

    dispatcher.adjust(&config, uniform(4, 0));
    assert_eq!(dispatcher.current(), 3);
    assert!(dispatcher.adjust(&config, uniform(3, 0)).is_none());
}

#[test]
fn test_between_thresholds_unchanged() {
    let dispatcher = PartitionDispatcher::new(4);
    let config = config(1, 32, Duration::ZERO);

    assert!(dispatcher.adjust(&config, uniform(4, 50)).is_none());
    assert_eq!(dispatcher.current(), 4);
}

#[test]
fn test_missing_partitions_count_as_empty() {
    let dispatcher = PartitionDispatcher::new(4);
    let config = config(1, 32, Duration::ZERO);

    // 404 / 4 = 101 > 100
    let decision = dispatcher
        .adjust(&config, vec![(PartitionKey::new(0), 404)])
        .unwrap();
    assert_eq!(decision.mean_queue_length, 101.0);
    assert_eq!(decision.to, 6);
}

#[test]
fn test_inactive_partitions_ignored() {
    let dispatcher = PartitionDispatcher::new(2);
    let config = config(1, 32, Duration::ZERO);

    // A retiring partition with a deep queue does not trigger expansion
    let lengths = vec![
        (PartitionKey::new(0), 50),
        (PartitionKey::new(1), 50),
        (PartitionKey::new(5), 10_000),
    ];
    assert!(dispatcher.adjust(&config, lengths).is_none());
}

#[test]
fn test_rate_limited_within_interval() {
    let dispatcher = PartitionDispatcher::new(2);
    let config = config(1, 32, Duration::from_secs(3600));

    assert!(dispatcher.adjust(&config, uniform(2, 1000)).is_some());
    assert_eq!(dispatcher.current(), 3);

    for _ in 0..10 {
        assert!(dispatcher.adjust(&config, uniform(3, 1000)).is_none());
    }
    assert_eq!(dispatcher.current(), 3);
}

#[test]
fn test_no_change_does_not_start_interval() {
    let dispatcher = PartitionDispatcher::new(2);
    let config = config(1, 32, Duration::from_secs(3600));

    assert!(dispatcher.adjust(&config, uniform(2, 50)).is_none());
    assert!(dispatcher.adjust(&config, uniform(2, 1000)).is_some());
}

#[test]
fn test_repeated_checks_stay_within_bounds() {
    let dispatcher = PartitionDispatcher::new(4);
    let config = config(2, 11, Duration::ZERO);

    for round in 0..50 {
        let len = if round % 7 < 4 { 5000 } else { 0 };
        dispatcher.adjust(&config, uniform(dispatcher.current(), len));
        let current = dispatcher.current();
        assert!((2..=11).contains(&current), "count {} out of bounds", current);
    }
}

#[test]
fn test_clamps_after_bounds_change() {
    let dispatcher = PartitionDispatcher::new(20);
    let config = config(1, 8, Duration::ZERO);

    let decision = dispatcher.adjust(&config, uniform(20, 50)).unwrap();
    assert_eq!(decision.to, 8);
}

#[test]
fn test_stop_accepting() {
    let dispatcher = PartitionDispatcher::new(2);
    let config = config(1, 32, Duration::ZERO);

    dispatcher.stop_accepting();
    assert!(!dispatcher.is_accepting());
    assert!(dispatcher.adjust(&config, uniform(2, 1000)).is_none());
    assert_eq!(dispatcher.current(), 2);
}

#[test]
fn test_zero_initial_treated_as_one() {
    let dispatcher = PartitionDispatcher::new(0);
    assert_eq!(dispatcher.current(), 1);
}
