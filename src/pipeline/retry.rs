//! Bounded retry with exponential backoff for single external calls.
//!
//! The orchestrator never retries a stage. Stages wrap individual fetches,
//! model calls and sink operations with [`with_backoff`] instead.

use std::future::Future;
use std::time::Duration;

/// Retry budget for one call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Always at least 1.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each attempt after that.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay before attempt number `attempt` (0-based). Zero for the first attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }
}

/// Runs `operation` until it succeeds, fails with a non-transient error, or
/// the policy's attempts are exhausted. The last error is returned.
pub async fn with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    is_transient: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        if attempt > 0 {
            let delay = policy.delay_for(attempt);
            tracing::debug!(
                operation = label,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Retrying after transient failure"
            );
            tokio::time::sleep(delay).await;
        }

        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if !is_transient(&err) || attempt >= policy.max_attempts {
                    return Err(err);
                }
                tracing::warn!(
                    operation = label,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %err,
                    "Transient error, will retry"
                );
            }
        }
    }
}
