//! Fallback command - Summarize a JSON-lines fallback file
//!
//! Payloads are read as opaque JSON, so the file can be inspected without
//! knowing the message type that produced it.
//!
//! # Usage
//!
//! ```bash
//! sluice fallback data/fallback.jsonl
//!
//! # Also list every message id
//! sluice fallback data/fallback.jsonl --ids
//!
//! # JSON output
//! sluice fallback data/fallback.jsonl --json
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use sluice_engine::{FailureReason, FallbackRecord, JsonlFallbackStore};

/// Fallback command arguments
#[derive(Args, Debug)]
pub struct FallbackArgs {
    /// Fallback file written by the engine
    pub file: PathBuf,

    /// List message ids per record
    #[arg(long)]
    pub ids: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Totals for one failure reason
#[derive(Debug, Default, Serialize, PartialEq)]
struct ReasonSummary {
    records: usize,
    messages: usize,
    /// Messages per partition; `-` for rejections before routing
    partitions: BTreeMap<String, usize>,
}

#[derive(Debug, Default, Serialize)]
struct Summary {
    records: usize,
    messages: usize,
    reasons: BTreeMap<&'static str, ReasonSummary>,
}

pub async fn run(args: FallbackArgs) -> Result<()> {
    let records = JsonlFallbackStore::load::<serde_json::Value>(&args.file)
        .await
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let summary = summarize(&records);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "{}: {} records, {} messages",
        args.file.display(),
        summary.records,
        summary.messages
    );
    for (reason, totals) in &summary.reasons {
        println!(
            "\n  {:<24} {:>8} records {:>10} messages",
            reason, totals.records, totals.messages
        );
        for (partition, messages) in &totals.partitions {
            println!("    partition {:<12} {:>10} messages", partition, messages);
        }
    }

    if args.ids {
        println!();
        for record in &records {
            let ids: Vec<&str> = record.message_ids().collect();
            println!(
                "{} {} {} [{}]",
                record.recorded_at.to_rfc3339(),
                record.reason,
                record.trace_id,
                ids.join(", ")
            );
        }
    }

    Ok(())
}

fn summarize(records: &[FallbackRecord<serde_json::Value>]) -> Summary {
    let mut summary = Summary::default();
    for reason in FailureReason::ALL {
        let matching = records.iter().filter(|r| r.reason == reason);
        let mut totals = ReasonSummary::default();
        for record in matching {
            totals.records += 1;
            totals.messages += record.len();
            let partition = record
                .partition
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string());
            *totals.partitions.entry(partition).or_default() += record.len();
        }
        if totals.records > 0 {
            summary.records += totals.records;
            summary.messages += totals.messages;
            summary.reasons.insert(reason.as_str(), totals);
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_engine::{FallbackEntry, FallbackStore, PartitionKey};
    use tempfile::TempDir;

    fn record(
        reason: FailureReason,
        partition: Option<u32>,
        ids: &[&str],
    ) -> FallbackRecord<serde_json::Value> {
        let entries = ids
            .iter()
            .map(|id| FallbackEntry::new(*id, serde_json::json!({ "id": id })))
            .collect();
        FallbackRecord::new(reason, partition.map(PartitionKey::new), "trace", entries)
    }

    #[test]
    fn test_summarize_groups_by_reason_and_partition() {
        let records = vec![
            record(FailureReason::ProcessFailure, Some(1), &["a", "b"]),
            record(FailureReason::ProcessFailure, Some(2), &["c"]),
            record(FailureReason::EnqueueFailure, None, &["d"]),
        ];

        let summary = summarize(&records);
        assert_eq!(summary.records, 3);
        assert_eq!(summary.messages, 4);

        let process = &summary.reasons["process_failure"];
        assert_eq!(process.records, 2);
        assert_eq!(process.partitions["1"], 2);
        assert_eq!(process.partitions["2"], 1);
        assert_eq!(summary.reasons["enqueue_failure"].partitions["-"], 1);
        assert!(!summary.reasons.contains_key("shutdown_remaining"));
    }

    #[tokio::test]
    async fn test_run_reads_store_output() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fallback.jsonl");
        let store = JsonlFallbackStore::open(&path, false).await.unwrap();
        store
            .store_batch(record(FailureReason::ShutdownRemaining, Some(0), &["x"]))
            .await
            .unwrap();

        let args = FallbackArgs {
            file: path,
            ids: true,
            json: false,
        };
        assert!(run(args).await.is_ok());
    }
}
