//! Retry policy
//!
//! Each failed attempt is either retried after `base_delay * 2^attempts`
//! or rejected. There is no jitter: delays are a pure function of the
//! attempt count.

use std::time::Duration;

use serde::Serialize;
use upsync_core::config::RetryConfig;
use upsync_core::ports::{ErrorClass, TransferError};

/// Why an item will not be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The error was classified fatal
    Fatal,
    /// `max_tries` attempts have been made
    Exhausted,
    /// Too many items were already waiting to be retried
    Overflow,
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    Reject(RejectReason),
}

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_tries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(max_tries: u32, base_delay: Duration) -> Self {
        Self {
            max_tries,
            base_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_tries, Duration::from_millis(config.base_delay_ms))
    }

    /// Backoff after `attempts` failed tries: `base_delay * 2^attempts`
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let factor = 2u32.checked_pow(attempts).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Decide the fate of an item that has now failed `attempts` times
    ///
    /// A throttling response with a `retry_after` hint never waits less than
    /// the hint.
    pub fn decide(&self, attempts: u32, error: &TransferError) -> RetryDecision {
        if error.class() == ErrorClass::Fatal {
            return RetryDecision::Reject(RejectReason::Fatal);
        }
        if attempts >= self.max_tries {
            return RetryDecision::Reject(RejectReason::Exhausted);
        }

        let mut delay = self.delay_for(attempts);
        if let TransferError::Throttled {
            retry_after: Some(hint),
        } = error
        {
            delay = delay.max(*hint);
        }
        RetryDecision::Retry { delay }
    }
}
