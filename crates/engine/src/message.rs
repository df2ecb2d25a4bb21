//! Message-facing types
//!
//! The payload contract (`Message`), the partition identifier, and the
//! outcome/failure vocabulary shared by every layer of the engine.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Payload type accepted by the engine
///
/// Only the bounds are mandatory. The provided methods let a payload expose
/// an identity and a routing key; without them the engine generates a
/// UUID per message and routes on it.
///
/// # Example
///
/// ```
/// use std::borrow::Cow;
/// use sluice_engine::Message;
///
/// #[derive(Clone)]
/// struct Reading {
///     device_id: String,
///     seq: u64,
/// }
///
/// impl Message for Reading {
///     fn message_id(&self) -> Option<Cow<'_, str>> {
///         Some(Cow::Owned(format!("{}:{}", self.device_id, self.seq)))
///     }
///
///     fn routing_key(&self) -> Option<Cow<'_, str>> {
///         Some(Cow::Borrowed(&self.device_id))
///     }
/// }
/// ```
pub trait Message: Clone + Send + Sync + 'static {
    /// Stable identity used for idempotency
    fn message_id(&self) -> Option<Cow<'_, str>> {
        None
    }

    /// String hashed by the router; defaults to the message id
    fn routing_key(&self) -> Option<Cow<'_, str>> {
        None
    }

    /// Raw wire bytes, copied into the envelope's pooled buffer
    fn raw_payload(&self) -> Option<&[u8]> {
        None
    }
}

/// Identifier of one processing lane
///
/// A `Copy` index in `[0, current partition count)`. Displays and parses as
/// its decimal index, which is also how config overrides name partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PartitionKey(u32);

impl PartitionKey {
    /// Create a partition key from its index
    #[inline]
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Numeric index of this partition
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }

    /// Index as usize, for comparisons against partition counts
    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PartitionKey {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .map(Self)
            .map_err(|_| EngineError::InvalidPartitionKey(s.to_string()))
    }
}

impl From<PartitionKey> for String {
    fn from(key: PartitionKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for PartitionKey {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<u32> for PartitionKey {
    #[inline]
    fn from(index: u32) -> Self {
        Self::new(index)
    }
}

/// Why a message ended up in the fallback store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Unexpected error while validating or queuing
    EnqueueFailure,
    /// Partition breaker open, processing never attempted
    CircuitBreakerFailure,
    /// Partition admission limit reached
    IsolateFailure,
    /// Business callback failed after all retries
    ProcessFailure,
    /// Still queued or in flight when the engine stopped
    ShutdownRemaining,
}

impl FailureReason {
    /// All reasons, in taxonomy order
    pub const ALL: [FailureReason; 5] = [
        Self::EnqueueFailure,
        Self::CircuitBreakerFailure,
        Self::IsolateFailure,
        Self::ProcessFailure,
        Self::ShutdownRemaining,
    ];

    /// Tag written to records and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EnqueueFailure => "enqueue_failure",
            Self::CircuitBreakerFailure => "circuit_breaker_failure",
            Self::IsolateFailure => "isolate_failure",
            Self::ProcessFailure => "process_failure",
            Self::ShutdownRemaining => "shutdown_remaining",
        }
    }

    #[inline]
    pub(crate) fn slot(&self) -> usize {
        match self {
            Self::EnqueueFailure => 0,
            Self::CircuitBreakerFailure => 1,
            Self::IsolateFailure => 2,
            Self::ProcessFailure => 3,
            Self::ShutdownRemaining => 4,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single `enqueue` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Appended to the partition's queue
    Queued {
        /// Partition the message was routed to
        partition: PartitionKey,
    },
    /// Already processed or already pending; nothing was done
    Duplicate,
    /// Diverted to the fallback store
    Fallback(FailureReason),
}

impl EnqueueOutcome {
    /// Whether the message entered a partition queue
    #[inline]
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued { .. })
    }
}
