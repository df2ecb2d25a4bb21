//! Tests for the fallback stores

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use super::{FallbackEntry, FallbackRecord, FallbackStore, JsonlFallbackStore, MemoryFallbackStore};
use crate::envelope::Envelope;
use crate::error::FallbackError;
use crate::message::{FailureReason, PartitionKey};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Reading {
    device: String,
    value: f64,
}

fn reading(device: &str, value: f64) -> Reading {
    Reading {
        device: device.into(),
        value,
    }
}

fn batch_record(reason: FailureReason, ids: &[&str]) -> FallbackRecord<Reading> {
    let entries = ids
        .iter()
        .map(|id| FallbackEntry::new(*id, reading(id, 1.0)))
        .collect();
    FallbackRecord::new(reason, Some(PartitionKey::new(2)), "trace-1", entries)
}

#[test]
fn test_entry_from_envelope_takes_payload() {
    let mut envelope = Envelope::with_raw_capacity(16);
    envelope.fill(reading("d1", 20.5), "d1:1", "t-1", Some(b"\x01\x02"));

    let entry = FallbackEntry::from_envelope(&mut envelope).unwrap();
    assert_eq!(entry.message_id, "d1:1");
    assert_eq!(entry.payload, reading("d1", 20.5));
    assert_eq!(entry.raw, Some(Bytes::from_static(b"\x01\x02")));
    assert!(!envelope.is_filled());

    assert!(FallbackEntry::from_envelope(&mut envelope).is_none());
}

#[test]
fn test_record_accessors() {
    let record = batch_record(FailureReason::ProcessFailure, &["a", "b"]).with_error("timeout");

    assert_eq!(record.len(), 2);
    assert!(!record.is_empty());
    assert_eq!(record.message_ids().collect::<Vec<_>>(), vec!["a", "b"]);
    assert_eq!(record.error.as_deref(), Some("timeout"));
}

#[tokio::test]
async fn test_memory_store_counts() {
    let store = MemoryFallbackStore::new();

    store
        .store_batch(batch_record(FailureReason::ProcessFailure, &["a", "b", "c"]))
        .await
        .unwrap();
    store
        .store(
            FallbackEntry::new("d", reading("d", 0.0)),
            FailureReason::IsolateFailure,
            Some(PartitionKey::new(0)),
            "trace-2",
        )
        .await
        .unwrap();

    assert_eq!(store.len(), 2);
    assert_eq!(store.message_count(), 4);
    assert_eq!(store.message_ids(), vec!["a", "b", "c", "d"]);

    let by_reason = store.count_by_reason();
    assert_eq!(by_reason[&FailureReason::ProcessFailure], 3);
    assert_eq!(by_reason[&FailureReason::IsolateFailure], 1);

    assert_eq!(store.take().len(), 2);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_jsonl_store_roundtrip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("fallback.jsonl");

    let store = JsonlFallbackStore::open(&path, true).await.unwrap();
    store
        .store_batch(batch_record(FailureReason::ShutdownRemaining, &["x", "y"]))
        .await
        .unwrap();
    store
        .store(
            FallbackEntry::new("z", reading("z", 3.5)),
            FailureReason::CircuitBreakerFailure,
            None,
            "trace-3",
        )
        .await
        .unwrap();

    let records: Vec<FallbackRecord<Reading>> = JsonlFallbackStore::load(&path).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].reason, FailureReason::ShutdownRemaining);
    assert_eq!(records[0].partition, Some(PartitionKey::new(2)));
    assert_eq!(records[0].message_ids().collect::<Vec<_>>(), vec!["x", "y"]);
    assert_eq!(records[1].partition, None);
    assert_eq!(records[1].entries[0].payload, reading("z", 3.5));
}

#[tokio::test]
async fn test_jsonl_store_appends_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fallback.jsonl");

    {
        let store = JsonlFallbackStore::open(&path, false).await.unwrap();
        store
            .store_batch(batch_record(FailureReason::ProcessFailure, &["a"]))
            .await
            .unwrap();
    }
    {
        let store = JsonlFallbackStore::open(&path, false).await.unwrap();
        store
            .store_batch(batch_record(FailureReason::ProcessFailure, &["b"]))
            .await
            .unwrap();
    }

    let records: Vec<FallbackRecord<Reading>> = JsonlFallbackStore::load(&path).await.unwrap();
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn test_jsonl_record_format() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fallback.jsonl");

    let store = JsonlFallbackStore::open(&path, false).await.unwrap();
    store
        .store_batch(batch_record(FailureReason::ProcessFailure, &["a"]).with_error("boom"))
        .await
        .unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let value: serde_json::Value = serde_json::from_str(contents.trim()).unwrap();
    assert_eq!(value["reason"], "process_failure");
    assert_eq!(value["partition"], "2");
    assert_eq!(value["error"], "boom");
    assert_eq!(value["entries"][0]["message_id"], "a");
    assert!(value["entries"][0].get("raw").is_none());
}

#[tokio::test]
async fn test_jsonl_concurrent_writers_do_not_interleave() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fallback.jsonl");
    let store = Arc::new(JsonlFallbackStore::open(&path, false).await.unwrap());

    let mut handles = vec![];
    for i in 0..8 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let id = format!("m-{}", i);
            let record = batch_record(FailureReason::ProcessFailure, &[id.as_str()]);
            FallbackStore::<Reading>::store_batch(store.as_ref(), record)
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let records: Vec<FallbackRecord<Reading>> = JsonlFallbackStore::load(&path).await.unwrap();
    assert_eq!(records.len(), 8);
}

#[tokio::test]
async fn test_jsonl_load_missing_file() {
    let dir = TempDir::new().unwrap();
    let result: Result<Vec<FallbackRecord<Reading>>, _> =
        JsonlFallbackStore::load(dir.path().join("absent.jsonl")).await;

    assert!(matches!(result, Err(FallbackError::Io { .. })));
}

#[tokio::test]
async fn test_jsonl_load_rejects_malformed_line() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fallback.jsonl");
    std::fs::write(&path, "{not json}\n").unwrap();

    let result: Result<Vec<FallbackRecord<Reading>>, _> = JsonlFallbackStore::load(&path).await;
    assert!(matches!(result, Err(FallbackError::Serialization(_))));
}
