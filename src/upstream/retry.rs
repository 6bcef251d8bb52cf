//! Exponential backoff retry policy
//!
//! Decoupled from the HTTP client: the caller supplies the operation and a
//! predicate deciding which failures are worth another attempt.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

/// How many times to try, and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one (at least one attempt is always made)
    pub max_attempts: u32,
    /// Wait after the first failed attempt
    pub initial_delay: Duration,
    /// Multiplier applied to the wait after every further failure
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            backoff_factor: 2.0,
        }
    }
}

/// Why a retried operation gave up
#[derive(Debug, Clone, PartialEq)]
pub enum RetryError<E> {
    /// The predicate rejected the failure; surfaced after a single attempt
    Fatal(E),
    /// Every attempt failed; carries the last failure
    Exhausted { attempts: u32, last: E },
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            initial_delay,
            backoff_factor,
        }
    }

    /// Wait before attempt `attempt + 1`, given that `attempt` (1-based) just failed
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        self.initial_delay.mul_f64(self.backoff_factor.max(0.0).powi(exponent))
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Run `op` until it succeeds, hits a non-retryable failure, or runs out of attempts
    pub async fn run<T, E, F, Fut, P>(
        &self,
        is_retryable: P,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let attempts = self.attempts();
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if !is_retryable(&err) => return Err(RetryError::Fatal(err)),
                Err(err) if attempt >= attempts => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: err,
                    })
                }
                Err(err) => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        "Attempt {} of {} failed: {} (retrying in {:?})",
                        attempt, attempts, err, delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
