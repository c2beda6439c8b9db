//! Retry policy for outbound SOAP calls
//!
//! Delays grow exponentially from `initial_backoff` by `backoff_multiplier`,
//! each capped at `max_backoff`. Retrying stops when the next delay would
//! overrun the elapsed-time budget or when `max_attempts` is reached.

use crate::error::ClientError;
use serde::{Deserialize, Serialize};
use soapgate_core::duration::millis;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts, first one included (`None` = limited by
    /// `max_elapsed` only)
    pub max_attempts: Option<u32>,
    /// Initial backoff duration
    #[serde(with = "millis")]
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    #[serde(with = "millis")]
    pub max_backoff: Duration,
    /// Total time budget for all attempts and delays
    #[serde(with = "millis")]
    pub max_elapsed: Duration,
    /// Backoff multiplier (e.g., 2.0 for exponential)
    pub backoff_multiplier: f64,
    /// Add random jitter to backoff (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            max_elapsed: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that makes exactly one attempt
    pub fn never() -> Self {
        Self::default().max_attempts(1)
    }

    /// Set maximum number of attempts
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    pub fn initial_backoff(mut self, duration: Duration) -> Self {
        self.initial_backoff = duration;
        self
    }

    pub fn max_backoff(mut self, duration: Duration) -> Self {
        self.max_backoff = duration;
        self
    }

    pub fn max_elapsed(mut self, duration: Duration) -> Self {
        self.max_elapsed = duration;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set jitter factor (0.0 to 1.0)
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Elapsed-time budget for a call whose caller allows `remaining`.
    ///
    /// A caller deadline further away than `max_elapsed` extends the budget;
    /// a nearer one is enforced by the caller's own timeout.
    pub fn budget(&self, remaining: Option<Duration>) -> Duration {
        match remaining {
            Some(remaining) if remaining > self.max_elapsed => remaining,
            _ => self.max_elapsed,
        }
    }

    /// Backoff before retry number `attempt` (1 for the first retry)
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let base_millis = self.initial_backoff.as_millis() as f64;
        let multiplier = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let backoff_millis = base_millis * multiplier;

        let jitter_factor = if self.jitter > 0.0 {
            1.0 + (rand::random::<f64>() * self.jitter * 2.0 - self.jitter)
        } else {
            1.0
        };

        let final_millis = (backoff_millis * jitter_factor).min(u64::MAX as f64) as u64;
        Duration::from_millis(final_millis).min(self.max_backoff)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the policy gives up. The last error is returned.
pub async fn retry_with_policy<F, Fut, T>(
    policy: &RetryPolicy,
    budget: Duration,
    mut operation: F,
) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let started = Instant::now();
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                attempt += 1;
                if !error.is_retryable() || policy.max_attempts.is_some_and(|max| attempt >= max) {
                    return Err(error);
                }

                let backoff = policy.backoff_duration(attempt);
                if started.elapsed() + backoff > budget {
                    debug!(attempts = attempt, "retry budget of {:?} exhausted", budget);
                    return Err(error);
                }
                debug!(attempt, "retrying in {:?}: {}", backoff, error);
                tokio::time::sleep(backoff).await;
            }
        }
    }
}
