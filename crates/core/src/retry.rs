//! Bounded exponential backoff for ledger transactions and RPC calls.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use backoff::ExponentialBackoff;
use tracing::{debug, warn};

use crate::error::Retryable;
use crate::metrics::record_retry;

/// Retry policy shared by the ledger workers.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// First delay.
    pub min_delay: Duration,
    /// Delay cap.
    pub max_delay: Duration,
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Randomization factor applied to every delay (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            max_attempts: 5,
            jitter: 0.1,
        }
    }
}

/// Last error of an operation that was given up on.
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub attempts: u32,
    pub error: E,
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.min_delay,
            randomization_factor: self.jitter,
            multiplier: 2.0,
            max_interval: self.max_delay,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Run `op` until it succeeds, fails permanently, or runs out of attempts.
    ///
    /// Only errors reporting [`Retryable::is_transient`] are retried.
    pub async fn run<T, E, F, Fut>(&self, worker: &'static str, mut op: F) -> Result<T, RetryFailure<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempts = 0u32;

        let result = backoff::future::retry(self.backoff(), || {
            attempts += 1;
            let attempt = attempts;
            let fut = op();
            async move {
                match fut.await {
                    Ok(value) => Ok(value),
                    Err(e) if !e.is_transient() => {
                        debug!(worker, attempt, error = %e, "Permanent error, not retrying");
                        Err(backoff::Error::permanent(e))
                    }
                    Err(e) if attempt >= max_attempts => Err(backoff::Error::permanent(e)),
                    Err(e) => {
                        warn!(worker, attempt, max_attempts, error = %e, "⚠️  Transient error, retrying");
                        record_retry(worker);
                        Err(backoff::Error::transient(e))
                    }
                }
            }
        })
        .await;

        result.map_err(|error| RetryFailure { attempts, error })
    }
}
