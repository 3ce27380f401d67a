use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::core::WatcherConfig;

/// Bounded exponential backoff with additive jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            jitter_min: Duration::from_secs(1),
            jitter_max: Duration::from_secs(5),
        }
    }
}

/// Why a retried operation gave up.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryFailure<E> {
    /// The error was not retryable and was returned on the spot.
    Permanent(E),
    /// Every attempt hit a retryable error; carries the last one.
    Exhausted { attempts: u32, last: E },
}

impl RetryPolicy {
    pub fn from_config(config: &WatcherConfig) -> Self {
        Self {
            max_attempts: config.retry_max_attempts.max(1),
            base_delay: Duration::from_secs(config.retry_base_delay_secs),
            jitter_min: Duration::from_secs(config.retry_jitter_min_secs),
            jitter_max: Duration::from_secs(config.retry_jitter_max_secs),
        }
    }

    /// Delay before retrying after the 0-indexed `attempt`: base * 2^attempt + jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponential = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));

        let (low, high) = if self.jitter_min <= self.jitter_max {
            (self.jitter_min, self.jitter_max)
        } else {
            (self.jitter_max, self.jitter_min)
        };
        let jitter = if low == high {
            low
        } else {
            let secs = rand::thread_rng().gen_range(low.as_secs_f64()..=high.as_secs_f64());
            Duration::from_secs_f64(secs)
        };

        exponential.saturating_add(jitter)
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget runs out. `on_backoff` is told about every wait before it happens.
    pub async fn run<T, E, F, Fut, P, B>(
        &self,
        operation_name: &str,
        mut operation: F,
        is_retryable: P,
        mut on_backoff: B,
    ) -> Result<T, RetryFailure<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        B: FnMut(u32, Duration),
        E: Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(
                            operation = operation_name,
                            attempts = attempt + 1,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) if !is_retryable(&err) => {
                    debug!(operation = operation_name, error = %err, "Permanent error, not retrying");
                    return Err(RetryFailure::Permanent(err));
                }
                Err(err) => {
                    if attempt + 1 >= max_attempts {
                        warn!(
                            operation = operation_name,
                            attempts = attempt + 1,
                            error = %err,
                            "🛑 Retry budget exhausted"
                        );
                        return Err(RetryFailure::Exhausted {
                            attempts: attempt + 1,
                            last: err,
                        });
                    }

                    let delay = self.backoff(attempt);
                    warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        max_attempts = max_attempts,
                        error = %err,
                        "⏳ Rate limited, waiting {:.2}s before retry",
                        delay.as_secs_f64()
                    );
                    on_backoff(attempt, delay);
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
