//! Retry logic for cache backend commands.
//!
//! # Responsibilities
//! - Run a backend command up to `max_retries` times
//! - Bound every attempt with a deadline
//! - Sleep a fixed delay between attempts without blocking the runtime
//!
//! # Design Decisions
//! - Only transient errors are retried; anything else returns immediately
//! - A timed-out attempt counts as a transient failure
//! - The caller decides what to degrade to once attempts are exhausted

use std::future::Future;
use std::time::Duration;

use crate::cache::BackendError;

/// Fixed-delay retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_retries: u32,
    /// Pause between attempts.
    pub delay: Duration,
    /// Deadline for a single attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_millis(100),
            attempt_timeout: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration, attempt_timeout: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            delay,
            attempt_timeout,
        }
    }

    /// Upper bound on the time `run` can take.
    pub fn budget(&self) -> Duration {
        (self.attempt_timeout + self.delay) * self.max_retries
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, command: &str, mut op: F) -> Result<T, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let result = match tokio::time::timeout(self.attempt_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::Transient(format!(
                    "{} timed out after {:?}",
                    command, self.attempt_timeout
                ))),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    tracing::debug!(
                        command,
                        attempt,
                        delay = ?self.delay,
                        error = %e,
                        "Retrying cache command"
                    );
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
