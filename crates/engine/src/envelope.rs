//! Message envelope
//!
//! Wraps a payload with the metadata the engine needs between checkout and
//! return. Envelopes are pooled, so every field that owns heap memory keeps
//! its capacity across `reset()`.

use bytes::BytesMut;
use chrono::{DateTime, Utc};

/// Payload plus routing metadata
///
/// Owned by exactly one partition queue (or one in-flight batch) at a time.
#[derive(Debug)]
pub struct Envelope<T> {
    payload: Option<T>,
    message_id: String,
    trace_id: String,
    enqueued_at: DateTime<Utc>,
    raw: BytesMut,
}

impl<T> Default for Envelope<T> {
    fn default() -> Self {
        Self::with_raw_capacity(0)
    }
}

impl<T> Envelope<T> {
    /// Empty envelope whose raw buffer has `capacity` bytes reserved
    pub fn with_raw_capacity(capacity: usize) -> Self {
        Self {
            payload: None,
            message_id: String::new(),
            trace_id: String::new(),
            enqueued_at: DateTime::<Utc>::UNIX_EPOCH,
            raw: BytesMut::with_capacity(capacity),
        }
    }

    /// Populate a freshly checked-out envelope
    pub fn fill(&mut self, payload: T, message_id: &str, trace_id: &str, raw: Option<&[u8]>) {
        self.payload = Some(payload);
        self.message_id.push_str(message_id);
        self.trace_id.push_str(trace_id);
        self.enqueued_at = Utc::now();
        if let Some(bytes) = raw {
            self.raw.extend_from_slice(bytes);
        }
    }

    /// Append raw bytes without touching the other fields
    pub fn extend_raw(&mut self, bytes: &[u8]) {
        self.raw.extend_from_slice(bytes);
    }

    /// Clear every field, keeping allocated capacity
    pub fn reset(&mut self) {
        self.payload = None;
        self.message_id.clear();
        self.trace_id.clear();
        self.enqueued_at = DateTime::<Utc>::UNIX_EPOCH;
        self.raw.clear();
    }

    #[inline]
    pub fn payload(&self) -> Option<&T> {
        self.payload.as_ref()
    }

    /// Move the payload out, leaving the envelope empty
    #[inline]
    pub fn take_payload(&mut self) -> Option<T> {
        self.payload.take()
    }

    #[inline]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    #[inline]
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    #[inline]
    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    /// Raw bytes, empty when the payload exposed none
    #[inline]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Bytes currently reserved by the raw buffer
    #[inline]
    pub fn raw_capacity(&self) -> usize {
        self.raw.capacity()
    }

    /// Whether the envelope currently carries a payload
    #[inline]
    pub fn is_filled(&self) -> bool {
        self.payload.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_and_reset() {
        let mut envelope: Envelope<u32> = Envelope::with_raw_capacity(64);
        envelope.fill(42, "m-1", "t-1", Some(b"\x01\x02"));

        assert!(envelope.is_filled());
        assert_eq!(envelope.payload(), Some(&42));
        assert_eq!(envelope.message_id(), "m-1");
        assert_eq!(envelope.trace_id(), "t-1");
        assert_eq!(envelope.raw(), b"\x01\x02");
        assert!(envelope.enqueued_at() > DateTime::<Utc>::UNIX_EPOCH);

        envelope.reset();
        assert!(!envelope.is_filled());
        assert!(envelope.message_id().is_empty());
        assert!(envelope.raw().is_empty());
        assert!(envelope.raw_capacity() >= 64);
    }

    #[test]
    fn test_refill_does_not_concatenate() {
        let mut envelope: Envelope<&str> = Envelope::default();
        envelope.fill("a", "first", "trace-a", None);
        envelope.reset();
        envelope.fill("b", "second", "trace-b", None);
        assert_eq!(envelope.message_id(), "second");
        assert_eq!(envelope.trace_id(), "trace-b");
    }

    #[test]
    fn test_take_payload() {
        let mut envelope: Envelope<String> = Envelope::default();
        envelope.fill("hello".into(), "id", "trace", None);
        assert_eq!(envelope.take_payload().as_deref(), Some("hello"));
        assert!(!envelope.is_filled());
    }
}
