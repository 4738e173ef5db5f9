use std::future::Future;
use std::time::Duration;

use crate::constants::RETRYABLE_STATUS_CODES;
use crate::types::{ObservedError, Result, RockpoolError};

/// Exponential backoff for the initial provider request. Once a stream has
/// started producing output the connection is never retried; a mid-stream
/// failure finalizes the stream with whatever partial body exists.
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
        }
    }

    pub async fn execute_with_retry<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match operation().await {
                Ok(val) => return Ok(val),
                Err(e) if attempts < self.max_attempts && is_retryable(&e) => {
                    let base_delay = self.base_delay_ms * 2u64.pow(attempts - 1);
                    // Add jitter: ±25% of the base delay
                    let jitter_range = base_delay / 4;
                    let jitter = if jitter_range > 0 {
                        fastrand::i64(-(jitter_range as i64)..jitter_range as i64)
                    } else {
                        0
                    };
                    let final_delay_ms = (base_delay as i64 + jitter).max(1) as u64;
                    let delay = Duration::from_millis(final_delay_ms);

                    tracing::warn!(
                        "[☁️ ] Provider request failed (attempt {}): {}. Retrying in {:?}...",
                        attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Transient transport failures and throttling/server statuses are worth a
/// second attempt; resolution and request-shape errors are not.
pub fn is_retryable(err: &ObservedError) -> bool {
    match &err.inner {
        RockpoolError::Network(_) => true,
        RockpoolError::Upstream(status, _) => RETRYABLE_STATUS_CODES.contains(&status.as_u16()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn upstream(status: StatusCode) -> ObservedError {
        RockpoolError::Upstream(status, "test".to_string()).into()
    }

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable(&upstream(StatusCode::TOO_MANY_REQUESTS)));
        assert!(is_retryable(&upstream(StatusCode::BAD_GATEWAY)));
        assert!(is_retryable(&upstream(StatusCode::SERVICE_UNAVAILABLE)));

        assert!(!is_retryable(&upstream(StatusCode::UNAUTHORIZED)));
        assert!(!is_retryable(&upstream(StatusCode::BAD_REQUEST)));
        assert!(!is_retryable(
            &RockpoolError::UnknownModel("gpt-9".to_string()).into()
        ));
        assert!(!is_retryable(
            &RockpoolError::MissingApiKey("gpt-4.1".to_string()).into()
        ));
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let policy = RetryPolicy::new(3, 1);
        let calls = AtomicU32::new(0);

        let result: Result<&str> = policy
            .execute_with_retry(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(upstream(StatusCode::SERVICE_UNAVAILABLE))
                    } else {
                        Ok("connected")
                    }
                }
            })
            .await;

        match result {
            Ok(v) => assert_eq!(v, "connected"),
            Err(e) => panic!("Expected success after retries: {}", e),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let policy = RetryPolicy::new(3, 1);
        let calls = AtomicU32::new(0);

        let result: Result<&str> = policy
            .execute_with_retry(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(upstream(StatusCode::UNAUTHORIZED)) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_budget_exhausted() {
        let policy = RetryPolicy::new(2, 1);
        let calls = AtomicU32::new(0);

        let result: Result<&str> = policy
            .execute_with_retry(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(upstream(StatusCode::BAD_GATEWAY)) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
