//! Retry executor
//!
//! Re-invokes a batch operation until it succeeds, the retry budget runs
//! out, or the engine is cancelled. Only the final failure is reported.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use sluice_config::{Backoff, EngineConfig};

/// Retry budget and delay shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = run once)
    pub max_retries: u32,
    /// Base delay between attempts
    pub interval: Duration,
    /// How the delay grows with each retry
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl RetryPolicy {
    /// Policy from the `retry_*` settings
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_retries: config.retry_max_count,
            interval: config.retry_interval,
            backoff: config.retry_backoff,
        }
    }

    /// Delay before retry number `retry` (0-based)
    pub fn delay(&self, retry: u32) -> Duration {
        self.backoff.delay(self.interval, retry)
    }

    /// Total attempts this policy allows
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Why a retried operation gave up
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError {
    /// Every attempt failed
    #[error("failed after {attempts} attempts: {last_error}")]
    Exhausted {
        attempts: u32,
        last_error: String,
    },

    /// Cancellation fired before the operation could succeed
    #[error("cancelled after {attempts} attempts")]
    Cancelled {
        attempts: u32,
        last_error: Option<String>,
    },
}

impl RetryError {
    /// Attempts actually made
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } | Self::Cancelled { attempts, .. } => *attempts,
        }
    }

    /// Last error message reported by the operation, if any
    pub fn last_error(&self) -> Option<&str> {
        match self {
            Self::Exhausted { last_error, .. } => Some(last_error),
            Self::Cancelled { last_error, .. } => last_error.as_deref(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Runs operations under a [`RetryPolicy`], counting retries
#[derive(Debug, Default)]
pub struct RetryExecutor {
    attempts: AtomicU64,
    retries: AtomicU64,
}

impl RetryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke `operation` until it succeeds or the policy is exhausted
    ///
    /// Delays between attempts are cancellable. A failure observed after
    /// cancellation is reported as `Cancelled` rather than retried.
    pub async fn execute<F, Fut, R, E>(
        &self,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        operation_name: &str,
        mut operation: F,
    ) -> Result<R, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: std::fmt::Display,
    {
        let mut last_error = None;

        for attempt in 0..policy.max_attempts() {
            if attempt > 0 {
                let delay = policy.delay(attempt - 1);
                debug!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after delay"
                );
                self.retries.fetch_add(1, Ordering::Relaxed);

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(RetryError::Cancelled { attempts: attempt, last_error });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            self.attempts.fetch_add(1, Ordering::Relaxed);
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    debug!(operation = operation_name, attempt, error = %e, "attempt failed");
                    last_error = Some(e.to_string());

                    if cancel.is_cancelled() {
                        return Err(RetryError::Cancelled {
                            attempts: attempt + 1,
                            last_error,
                        });
                    }
                }
            }
        }

        Err(RetryError::Exhausted {
            attempts: policy.max_attempts(),
            last_error: last_error.unwrap_or_else(|| "unknown error".to_string()),
        })
    }

    /// Attempts made across all operations
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Retries (attempts beyond the first) across all operations
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[path = "retry_test.rs"]
mod retry_test;
