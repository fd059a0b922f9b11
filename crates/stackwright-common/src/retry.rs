//! Retry with exponential backoff and jitter.
//!
//! Used where Stackwright itself owns the retry policy, for example dialing a
//! freshly provisioned agent that is still booting. Engine plan/apply calls are
//! never retried here.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use tracing::{debug, warn};

/// Backoff policy for an operation that may fail transiently.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = until cancelled)
    pub max_attempts: u32,
    /// Delay before the second attempt
    #[serde(with = "duration_millis")]
    pub initial_delay: Duration,
    /// Upper bound for the delay between attempts
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    /// Multiplier applied to the delay after every failure
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(15),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Policy with a bounded number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Delay that follows `delay`, capped at `max_delay`
    ///
    /// A multiplier below 1.0 or not finite keeps the delay constant.
    fn next_delay(&self, delay: Duration) -> Duration {
        let multiplier = if self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0 {
            self.backoff_multiplier
        } else {
            1.0
        };
        Duration::from_secs_f64(
            (delay.as_secs_f64() * multiplier).min(self.max_delay.as_secs_f64()),
        )
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

/// Run `operation` until it succeeds, the attempts run out, or `should_retry`
/// rejects an error.
///
/// Returns the last error when giving up.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    should_retry: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        let err = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !should_retry(&err) {
            debug!(operation = %operation_name, attempt, error = %err, "error is not retryable");
            return Err(err);
        }

        if config.exhausted(attempt) {
            warn!(
                operation = %operation_name,
                attempt,
                error = %err,
                "giving up after max attempts"
            );
            return Err(err);
        }

        // 0.5x to 1.5x of the nominal delay
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let sleep_for = delay.mul_f64(jitter);

        debug!(
            operation = %operation_name,
            attempt,
            error = %err,
            delay_ms = sleep_for.as_millis() as u64,
            "attempt failed, retrying"
        );

        tokio::time::sleep(sleep_for).await;
        delay = config.next_delay(delay);
    }
}

/// Serde helper reading a [`Duration`] from integer milliseconds
pub mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    /// Deserialize milliseconds into a `Duration`
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
