//! Bounded retry with a fixed interval.

use std::future::Future;
use std::time::Duration;

use qsr_core::error::RelayError;

use crate::{ClientError, ClientResult};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    /// No waiting between attempts; used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget runs out. `should_retry` decides which errors are worth
/// another try; exhaustion surfaces as [`ClientError::RetriesExhausted`]
/// wrapping the last error, so callers can tell "still not ready after the
/// whole budget" from an ordinary failure.
pub async fn retry_with<T, F, Fut, P>(
    policy: RetryPolicy,
    should_retry: P,
    mut op: F,
) -> ClientResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RelayError>>,
    P: Fn(&RelayError) -> bool,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if should_retry(&err) => {
                if attempt >= policy.max_attempts {
                    return Err(ClientError::RetriesExhausted {
                        attempts: attempt,
                        source: err,
                    });
                }
                tracing::debug!(attempt, "retrying after: {err}");
                if !policy.interval.is_zero() {
                    tokio::time::sleep(policy.interval).await;
                }
            }
            Err(err) => return Err(err.into()),
        }
    }
}
