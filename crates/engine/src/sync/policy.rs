//! Retry limits for replayed offline actions

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How hard the offline queue tries before giving up on an action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Failed attempts after which an action is dead-lettered
    pub max_retries: u32,
    /// Upper bound on a single replay call
    pub request_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            request_timeout_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Whether an action that has already failed `retry_count` times may be tried again
    pub fn allows_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }
}
