//! Retry configuration and exponential backoff.
//!
//! Used by [`CorrelatedRequestClient`](crate::CorrelatedRequestClient) when a
//! request attempt times out: the request is republished with a fresh
//! correlation token after a backoff delay.
//!
//! - Only [`RpcError::TransportRetryable`] errors are retried
//! - Delays grow by `multiplier` per attempt, capped at `max_delay`
//! - Each delay is jittered by ±25%

use std::collections::hash_map::RandomState;
use std::future::Future;
use std::hash::BuildHasher;
use std::time::Duration;
use tokio::time::sleep;

use crate::{log_debug, Result, RpcError};

/// Retry configuration with exponential backoff.
///
/// # Example
///
/// ```
/// use zone2json_rpc::RetryConfig;
/// use std::time::Duration;
///
/// let retry_config = RetryConfig {
///     max_attempts: 5,
///     multiplier: 2.0,
///     initial_delay: Duration::from_millis(100),
///     max_delay: Duration::from_secs(10),
/// };
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt (0 = no retries).
    pub max_attempts: u32,

    /// Backoff multiplier applied to the delay after each retry.
    pub multiplier: f32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    /// - `max_attempts`: 3
    /// - `multiplier`: 2.0
    /// - `initial_delay`: 100ms
    /// - `max_delay`: 5s
    fn default() -> Self {
        // ---
        Self {
            max_attempts: 3,
            multiplier: 2.0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Run `operation`, retrying retryable failures according to `retry_config`.
///
/// With `None` the operation runs exactly once. Non-retryable errors are
/// returned immediately. When attempts are exhausted the last retryable
/// error is returned.
pub(crate) async fn retry_with_backoff<F, Fut, T>(
    retry_config: Option<&RetryConfig>,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let Some(retry_config) = retry_config else {
        return operation().await;
    };

    let mut attempt = 0;
    let mut current_delay = retry_config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(RpcError::TransportRetryable(details)) => {
                attempt += 1;

                if attempt > retry_config.max_attempts {
                    log_debug!(
                        "giving up after {} retries, last error: {details}",
                        retry_config.max_attempts
                    );
                    return Err(RpcError::TransportRetryable(details));
                }

                let delay = apply_jitter(current_delay);

                log_debug!(
                    "retry {attempt}/{} in {delay:?} ({details})",
                    retry_config.max_attempts
                );

                sleep(delay).await;

                let next = Duration::from_secs_f64(
                    current_delay.as_secs_f64() * f64::from(retry_config.multiplier),
                );
                current_delay = next.min(retry_config.max_delay);
            }
            Err(err) => return Err(err),
        }
    }
}

/// Scale `delay` by a random factor in `0.75..1.25`.
fn apply_jitter(delay: Duration) -> Duration {
    // ---
    let hash = RandomState::new().hash_one(std::time::SystemTime::now());
    let random_factor = (hash % 1000) as f64 / 1000.0;

    Duration::from_secs_f64(delay.as_secs_f64() * (0.75 + random_factor * 0.5))
}
