//! Retry driver for transient API failures.
//!
//! Backoff is exponential with jitter: the base delay doubles with each
//! attempt, is capped at the configured maximum, and gains a random 0-50%
//! of itself so concurrent invocations do not synchronize.

use crate::config::RetryConfig;
use crate::error::ApiError;
use crate::Result;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Run `operation` until it succeeds, fails non-transiently, or exhausts
/// the configured attempts. The last transient error is surfaced on
/// exhaustion rather than swallowed.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = config.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() && attempt + 1 < attempts => {
                let delay = compute_backoff(config, attempt);
                debug!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying after backoff"
                );
                tokio::time::sleep(delay).await;
                last_error = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_error.unwrap_or_else(|| ApiError::Transient {
        status: None,
        message: "retry loop ended without a result".to_string(),
    }))
}

/// Backoff for the given zero-based attempt:
/// `min(initial * 2^attempt, max) + random(0..=50% of that)`.
fn compute_backoff(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config
        .initial_backoff
        .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let capped = base.min(config.max_backoff);

    let jitter_range = capped.as_millis() as u64 / 2;
    if jitter_range > 0 {
        capped + Duration::from_millis(rand::rng().random_range(0..=jitter_range))
    } else {
        capped
    }
}
