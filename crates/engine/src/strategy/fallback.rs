//! Fallback stores
//!
//! Last-resort persistence for messages the normal pipeline could not
//! finish. Once a record is written the engine's responsibility for its
//! messages ends.
//!
//! - [`MemoryFallbackStore`] keeps records in process (tests, embedding)
//! - [`JsonlFallbackStore`] appends one JSON object per line to a file and
//!   survives restarts

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use crate::envelope::Envelope;
use crate::error::FallbackError;
use crate::message::{FailureReason, PartitionKey};

/// One message inside a fallback record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackEntry<T> {
    pub message_id: String,
    pub payload: T,
    /// Raw wire bytes, when the payload exposed them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Bytes>,
}

impl<T> FallbackEntry<T> {
    pub fn new(message_id: impl Into<String>, payload: T) -> Self {
        Self {
            message_id: message_id.into(),
            payload,
            raw: None,
        }
    }

    /// Move the payload out of a filled envelope
    ///
    /// Returns `None` for an envelope that carries no payload.
    pub(crate) fn from_envelope(envelope: &mut Envelope<T>) -> Option<Self> {
        let payload = envelope.take_payload()?;
        let raw = (!envelope.raw().is_empty()).then(|| Bytes::copy_from_slice(envelope.raw()));
        Some(Self {
            message_id: envelope.message_id().to_string(),
            payload,
            raw,
        })
    }
}

/// Persisted unit of the fallback store
///
/// Holds one message (enqueue-gate rejections) or a whole batch (processing
/// failures, shutdown drain) with the reason it was diverted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackRecord<T> {
    pub reason: FailureReason,
    /// Partition the messages were routed to, if routing happened
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<PartitionKey>,
    pub trace_id: String,
    /// Last processing error, for `process_failure` records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
    pub entries: Vec<FallbackEntry<T>>,
}

impl<T> FallbackRecord<T> {
    pub fn new(
        reason: FailureReason,
        partition: Option<PartitionKey>,
        trace_id: impl Into<String>,
        entries: Vec<FallbackEntry<T>>,
    ) -> Self {
        Self {
            reason,
            partition,
            trace_id: trace_id.into(),
            error: None,
            recorded_at: Utc::now(),
            entries,
        }
    }

    /// Attach the error that caused the diversion
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Number of messages in this record
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn message_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.message_id.as_str())
    }
}

/// Durable sink for diverted messages
///
/// Must stay writable while the processing path is degraded. Errors are
/// logged and counted by the engine, never propagated to producers.
#[async_trait]
pub trait FallbackStore<T: Send + 'static>: Send + Sync {
    /// Persist a record holding one or more messages
    async fn store_batch(&self, record: FallbackRecord<T>) -> Result<(), FallbackError>;

    /// Persist a single message
    async fn store(
        &self,
        entry: FallbackEntry<T>,
        reason: FailureReason,
        partition: Option<PartitionKey>,
        trace_id: &str,
    ) -> Result<(), FallbackError> {
        self.store_batch(FallbackRecord::new(reason, partition, trace_id, vec![entry]))
            .await
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Fallback store that keeps records in memory
#[derive(Debug)]
pub struct MemoryFallbackStore<T> {
    records: Mutex<Vec<FallbackRecord<T>>>,
}

impl<T> Default for MemoryFallbackStore<T> {
    fn default() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Clone> MemoryFallbackStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every record written so far
    pub fn records(&self) -> Vec<FallbackRecord<T>> {
        self.records.lock().clone()
    }

    /// Remove and return every record
    pub fn take(&self) -> Vec<FallbackRecord<T>> {
        std::mem::take(&mut *self.records.lock())
    }

    /// Number of records (not messages)
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Total messages across all records
    pub fn message_count(&self) -> usize {
        self.records.lock().iter().map(|r| r.len()).sum()
    }

    /// Message ids of every stored message, in write order
    pub fn message_ids(&self) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .flat_map(|r| r.message_ids().map(str::to_string))
            .collect()
    }

    /// Messages stored per failure reason
    pub fn count_by_reason(&self) -> HashMap<FailureReason, usize> {
        let mut counts = HashMap::new();
        for record in self.records.lock().iter() {
            *counts.entry(record.reason).or_insert(0) += record.len();
        }
        counts
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> FallbackStore<T> for MemoryFallbackStore<T> {
    async fn store_batch(&self, record: FallbackRecord<T>) -> Result<(), FallbackError> {
        self.records.lock().push(record);
        Ok(())
    }
}

// ============================================================================
// JSON-lines file store
// ============================================================================

/// Append-only JSON-lines fallback file
///
/// Each record is serialized to one line and appended under a lock, so
/// concurrent writers never interleave. With `sync` enabled the file data
/// is flushed to disk after every record.
#[derive(Debug)]
pub struct JsonlFallbackStore {
    path: PathBuf,
    file: tokio::sync::Mutex<tokio::fs::File>,
    sync: bool,
}

impl JsonlFallbackStore {
    /// Open (or create) the file at `path` for appending
    ///
    /// Missing parent directories are created.
    pub async fn open(path: impl AsRef<Path>, sync: bool) -> Result<Self, FallbackError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| io_error(&path, source))?;
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| io_error(&path, source))?;

        info!(path = %path.display(), sync, "fallback store opened");

        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(file),
            sync,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record from a fallback file
    ///
    /// Blank lines are skipped; a malformed line is an error.
    pub async fn load<T: DeserializeOwned>(
        path: impl AsRef<Path>,
    ) -> Result<Vec<FallbackRecord<T>>, FallbackError> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|source| io_error(path, source))?;

        let mut lines = BufReader::new(file).lines();
        let mut records = Vec::new();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|source| io_error(path, source))?
        {
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl<T: Serialize + Send + Sync + 'static> FallbackStore<T> for JsonlFallbackStore {
    async fn store_batch(&self, record: FallbackRecord<T>) -> Result<(), FallbackError> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line)
            .await
            .map_err(|source| io_error(&self.path, source))?;
        if self.sync {
            file.sync_data()
                .await
                .map_err(|source| io_error(&self.path, source))?;
        } else {
            file.flush()
                .await
                .map_err(|source| io_error(&self.path, source))?;
        }
        Ok(())
    }
}

fn io_error(path: &Path, source: std::io::Error) -> FallbackError {
    FallbackError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
#[path = "fallback_test.rs"]
mod fallback_test;
