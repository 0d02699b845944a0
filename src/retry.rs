use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("non-retryable failure: {0}")]
    Fatal(E),
}

/// Runs `operation` until it succeeds, fails with an error `is_retryable`
/// rejects, or `policy.max_attempts` attempts have been made.
///
/// Sleeps `policy.backoff` between attempts, never after the final one, so a
/// success after `k` failures has waited exactly `k` intervals.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    policy: RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if !is_retryable(&err) => return Err(RetryError::Fatal(err)),
            Err(err) if attempt >= max_attempts => {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }
            Err(err) => {
                tracing::warn!(
                    attempt,
                    max_attempts,
                    backoff_ms = policy.backoff.as_millis() as u64,
                    error = %err,
                    "attempt failed; retrying"
                );
                tokio::time::sleep(policy.backoff).await;
                attempt += 1;
            }
        }
    }
}
