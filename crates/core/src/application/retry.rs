// Retry policy
//
// Exponential backoff on the completed attempt count:
//   delay(k) = base_backoff * 2^(k-1)
// so the first retry waits exactly `base_backoff`. Inline retries use this
// exactly; broker workers add a deterministic +-10% per-job jitter.

use crate::domain::JobOptions;
use std::time::Duration;
use tracing::{info, warn};

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the given delay
    Retry(Duration),
    /// Do not retry, job has failed permanently
    Failed,
}

/// Immutable per-facade policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_backoff: Duration,
}

impl RetryPolicy {
    /// `max_attempts` counts the first execution and is clamped to >= 1
    pub fn new(max_attempts: u32, base_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_backoff,
        }
    }

    /// One attempt, no retries
    pub fn single_attempt() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_backoff(&self) -> Duration {
        self.base_backoff
    }

    /// Delay after `completed` failed attempts (completed >= 1)
    pub fn backoff_for(&self, completed: u32) -> Duration {
        let exponent = completed.saturating_sub(1).min(31);
        self.base_backoff.saturating_mul(1u32 << exponent)
    }

    /// Decide what happens after `completed` failed attempts
    pub fn decide(&self, job_id: &str, completed: u32) -> RetryDecision {
        if completed >= self.max_attempts {
            warn!(
                job_id = %job_id,
                attempts = completed,
                max_attempts = self.max_attempts,
                "Max retry attempts reached"
            );
            return RetryDecision::Failed;
        }

        let delay = self.backoff_for(completed);
        info!(
            job_id = %job_id,
            attempt = completed,
            max_attempts = self.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduling retry"
        );
        RetryDecision::Retry(delay)
    }

    /// Broker-native options carrying this policy
    pub fn job_options(&self) -> JobOptions {
        JobOptions {
            attempts: self.max_attempts,
            backoff_ms: self.base_backoff.as_millis() as u64,
            ..JobOptions::default()
        }
    }

    /// Policy stored on a broker record
    pub fn from_options(options: &JobOptions) -> Self {
        Self::new(options.attempts, Duration::from_millis(options.backoff_ms))
    }
}

/// Apply the deterministic +-10% jitter used by broker workers
///
/// The job id seeds the factor so the same job always gets the same delay
/// while concurrent retries of different jobs spread out.
pub fn jittered(job_id: &str, delay: Duration) -> Duration {
    let jitter_seed = job_id.chars().map(|c| c as u32).fold(0u32, u32::wrapping_add);
    let jitter_percent = 90 + (jitter_seed % 21) as u128; // 90 to 110
    let millis = delay.as_millis() * jitter_percent / 100;
    Duration::from_millis(millis.min(u64::MAX as u128) as u64)
}
