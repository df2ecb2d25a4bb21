//! Tests for the execution-order controller

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use sluice_config::ExecutionMode;

use super::ExecutionController;
use crate::error::StrategyError;
use crate::message::PartitionKey;

const P0: PartitionKey = PartitionKey::new(0);

/// Runs `tasks` concurrent executions and returns the peak concurrency seen
async fn peak_concurrency(controller: Arc<ExecutionController>, tasks: usize) -> usize {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let cancel = CancellationToken::new();
    let mut handles = vec![];

    for _ in 0..tasks {
        let controller = Arc::clone(&controller);
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            controller
                .execute(P0, &cancel, || async {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }
    peak.load(Ordering::SeqCst)
}

#[tokio::test]
async fn test_serial_runs_one_at_a_time() {
    let controller = Arc::new(ExecutionController::new(4));
    controller.register(P0, ExecutionMode::Serial);

    assert_eq!(peak_concurrency(controller, 5).await, 1);
}

#[tokio::test]
async fn test_parallel_bounded_by_limit() {
    let controller = Arc::new(ExecutionController::new(3));
    controller.register(P0, ExecutionMode::Parallel);

    let peak = peak_concurrency(controller, 8).await;
    assert!(peak > 1);
    assert!(peak <= 3);
}

#[tokio::test]
async fn test_serial_preserves_arrival_order() {
    let controller = Arc::new(ExecutionController::new(4));
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let cancel = CancellationToken::new();
    let mut handles = vec![];

    for i in 0..5 {
        let controller = Arc::clone(&controller);
        let order = Arc::clone(&order);
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            controller
                .execute(P0, &cancel, || async {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    order.lock().push(i);
                })
                .await
                .unwrap();
        }));
        // Let each task reach the lane before spawning the next
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_register_keeps_existing_mode() {
    let controller = ExecutionController::new(2);
    controller.register(P0, ExecutionMode::Parallel);
    controller.register(P0, ExecutionMode::Serial);
    assert_eq!(controller.mode(P0), Some(ExecutionMode::Parallel));

    controller.remove(P0);
    assert_eq!(controller.mode(P0), None);
}

#[tokio::test]
async fn test_switch_mode_when_idle() {
    let controller = ExecutionController::new(2);
    controller.register(P0, ExecutionMode::Serial);

    let switched = controller
        .switch_mode(P0, ExecutionMode::Parallel, Duration::from_millis(100))
        .await;

    assert!(switched);
    assert_eq!(controller.mode(P0), Some(ExecutionMode::Parallel));
}

#[tokio::test]
async fn test_switch_mode_before_first_use() {
    let controller = ExecutionController::new(2);
    assert!(
        controller
            .switch_mode(P0, ExecutionMode::Parallel, Duration::from_millis(100))
            .await
    );

    controller.register(P0, ExecutionMode::Serial);
    assert_eq!(controller.mode(P0), Some(ExecutionMode::Parallel));
}

#[tokio::test]
async fn test_switch_mode_waits_for_in_flight() {
    let controller = Arc::new(ExecutionController::new(2));
    controller.register(P0, ExecutionMode::Serial);
    let cancel = CancellationToken::new();

    let runner = {
        let controller = Arc::clone(&controller);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            controller
                .execute(P0, &cancel, || tokio::time::sleep(Duration::from_millis(50)))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(controller.current_concurrency(P0), 1);

    let switched = controller
        .switch_mode(P0, ExecutionMode::Parallel, Duration::from_secs(2))
        .await;

    assert!(switched);
    runner.await.unwrap().unwrap();
    assert_eq!(controller.current_concurrency(P0), 0);
}

#[tokio::test]
async fn test_switch_mode_times_out() {
    let controller = Arc::new(ExecutionController::new(2));
    controller.register(P0, ExecutionMode::Serial);
    let cancel = CancellationToken::new();

    let runner = {
        let controller = Arc::clone(&controller);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            controller
                .execute(P0, &cancel, || tokio::time::sleep(Duration::from_millis(300)))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let switched = controller
        .switch_mode(P0, ExecutionMode::Parallel, Duration::from_millis(20))
        .await;

    assert!(!switched);
    assert_eq!(controller.mode(P0), Some(ExecutionMode::Serial));
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_cancel_while_waiting_for_slot() {
    let controller = Arc::new(ExecutionController::new(1));
    controller.register(P0, ExecutionMode::Serial);
    let cancel = CancellationToken::new();

    let holder = {
        let controller = Arc::clone(&controller);
        let cancel = CancellationToken::new();
        tokio::spawn(async move {
            controller
                .execute(P0, &cancel, || tokio::time::sleep(Duration::from_millis(200)))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    let result = controller.execute(P0, &cancel, || async { 1 }).await;
    assert!(matches!(result, Err(StrategyError::Cancelled)));
    holder.await.unwrap().unwrap();
}
