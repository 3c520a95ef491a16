//! Retry policy with capped exponential backoff.
//!
//! Both the [`RetryHttpClient`](super::RetryHttpClient) and the
//! [`ProgressDownloader`](super::ProgressDownloader) use this policy. Attempts
//! are 1-indexed; the first attempt is never delayed and the delay before
//! attempt `k` (k ≥ 2) is:
//!
//! ```text
//! delay(k) = min(base_delay * 2^(k-2), max_delay)
//! ```
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use taskhub_core::download::{RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::with_retry_count(3);
//! assert_eq!(policy.max_attempts(), 4);
//! assert_eq!(policy.delay_before_attempt(2), Duration::from_secs(1));
//!
//! match policy.should_retry(1) {
//!     RetryDecision::Retry { delay, attempt } => assert_eq!((delay, attempt), (Duration::from_secs(1), 2)),
//!     RetryDecision::DoNotRetry { reason } => panic!("{reason}"),
//! }
//! ```

use std::time::Duration;

use tracing::{debug, instrument};

use super::constants::{BACKOFF_BASE_DELAY, BACKOFF_MAX_DELAY, DEFAULT_RETRY_COUNT};

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Give up.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// # Default Values
///
/// - `retry_count`: 3 (so 4 attempts in total)
/// - `base_delay`: 1 second
/// - `max_delay`: 30 seconds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    retry_count: u32,

    /// Delay before the first retry.
    base_delay: Duration,

    /// Maximum delay cap.
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_count: DEFAULT_RETRY_COUNT,
            base_delay: BACKOFF_BASE_DELAY,
            max_delay: BACKOFF_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with custom delays.
    ///
    /// # Arguments
    ///
    /// * `retry_count` - Additional attempts after the first
    /// * `base_delay` - Delay before the first retry
    /// * `max_delay` - Maximum delay cap
    #[must_use]
    pub fn new(retry_count: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            retry_count,
            base_delay,
            max_delay,
        }
    }

    /// Creates a policy with a custom retry count, using default delays.
    #[must_use]
    pub fn with_retry_count(retry_count: u32) -> Self {
        Self {
            retry_count,
            ..Self::default()
        }
    }

    /// Returns the configured number of retries.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Returns the maximum number of attempts (`retry_count + 1`).
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }

    /// Determines whether to retry after `attempt` (1-indexed) failed.
    #[instrument(level = "debug", skip(self), fields(max_attempts = self.max_attempts()))]
    pub fn should_retry(&self, attempt: u32) -> RetryDecision {
        if attempt >= self.max_attempts() {
            debug!(attempt, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts()),
            };
        }

        let next_attempt = attempt + 1;
        RetryDecision::Retry {
            delay: self.delay_before_attempt(next_attempt),
            attempt: next_attempt,
        }
    }

    /// Returns the delay to wait before `attempt` (1-indexed).
    ///
    /// The first attempt is never delayed.
    #[must_use]
    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        // 2^(attempt-2), saturating so large attempt numbers land on the cap
        let exponent = attempt - 2;
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}
