use std::future::Future;
use std::time::Duration;

use config::shared::RetryConfig;
use tracing::warn;

use crate::error::{EtlError, EtlResult};

/// How often and how patiently an operation is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, the first one included.
    pub max_attempts: u32,
    /// Fixed delay between two attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}

/// Runs `operation` until it succeeds, fails with an error `is_retryable` rejects, or runs out of
/// attempts. The last error is returned unchanged.
pub async fn retry_with_backoff<T, F, Fut, P>(
    policy: RetryPolicy,
    is_retryable: P,
    mut operation: F,
) -> EtlResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EtlResult<T>>,
    P: Fn(&EtlError) -> bool,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_attempts && is_retryable(&err) => {
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %err,
                    "operation failed, retrying after backoff"
                );

                tokio::time::sleep(policy.backoff).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::time::Instant;

    use super::*;
    use crate::error::ErrorKind;
    use crate::etl_error;

    async fn failing_until(calls: &AtomicU32, succeed_on: u32, kind: ErrorKind) -> EtlResult<u32> {
        let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call >= succeed_on {
            Ok(call)
        } else {
            Err(etl_error!(kind, "Injected failure"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_last_attempt() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result = retry_with_backoff(RetryPolicy::default(), EtlError::is_transient, || {
            failing_until(&calls, 3, ErrorKind::SourceThrottled)
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn returns_last_error_after_max_attempts() {
        let calls = AtomicU32::new(0);

        let err = retry_with_backoff(RetryPolicy::default(), EtlError::is_transient, || {
            failing_until(&calls, u32::MAX, ErrorKind::SourceServerError)
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SourceServerError);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let err = retry_with_backoff(RetryPolicy::default(), EtlError::is_transient, || {
            failing_until(&calls, u32::MAX, ErrorKind::SourceTableMissing)
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SourceTableMissing);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
