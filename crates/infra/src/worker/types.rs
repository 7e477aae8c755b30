//! Retry policy for engine attempts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry policy for not-loadable documents.
///
/// Retries are immediate unless a pause is set. The retry count never
/// exceeds [`RetryPolicy::MAX_RETRIES`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Additional attempts after the first (0 = no retries)
    pub max_retries: u32,
    /// Pause before each retry, in milliseconds
    pub pause_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::immediate(Self::MAX_RETRIES)
    }
}

impl RetryPolicy {
    /// Hard upper bound on retries per job.
    pub const MAX_RETRIES: u32 = 3;

    /// Create a policy with no retries.
    pub fn no_retry() -> Self {
        Self::immediate(0)
    }

    /// Retry `max_retries` times without waiting.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            pause_ms: 0,
        }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause_ms = pause.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    /// Retries actually allowed: the configured count capped at
    /// [`RetryPolicy::MAX_RETRIES`].
    pub fn effective_retries(&self) -> u32 {
        self.max_retries.min(Self::MAX_RETRIES)
    }

    /// Whether the configured count is within the hard bound.
    pub fn is_within_bound(&self) -> bool {
        self.max_retries <= Self::MAX_RETRIES
    }

    /// Total attempts the policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.effective_retries() + 1
    }

    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }

    /// Whether another retry is allowed after `retries_done` retries.
    pub fn should_retry(&self, retries_done: u32) -> bool {
        retries_done < self.effective_retries()
    }
}
