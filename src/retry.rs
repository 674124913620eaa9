//! Exponential backoff for transient upstream failures.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, info, warn};

use crate::config::RetryConfig;

/// Classifies errors as transient (worth retrying) or permanent.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;

    /// Server-requested wait before the next attempt, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Run `operation` until it succeeds, fails permanently, or runs out of retries.
///
/// The delay starts at `initial_delay` and is multiplied by
/// `backoff_multiplier` after each failure, capped at `max_delay`. A
/// `retry_after` hint from the error takes precedence when it is longer.
///
/// # Errors
///
/// Returns the last error once retries are exhausted, or the first
/// non-retryable error.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    info!(attempts = attempt + 1, "Request succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;

                let base = e.retry_after().map_or(delay, |hint| hint.max(delay));
                let wait = if config.jitter { add_jitter(base) } else { base };

                warn!(
                    error = %e,
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = wait.as_millis(),
                    "Request failed, retrying"
                );

                tokio::time::sleep(wait).await;

                delay = Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier)
                    .min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    error!(error = %e, attempts = attempt + 1, "All retry attempts failed");
                }
                return Err(e);
            }
        }
    }
}

/// Stretch a delay by a random factor in `[1.0, 2.0]`.
fn add_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + factor))
}
