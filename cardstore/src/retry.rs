use std::future::Future;
use std::time::Duration;

use serde::Deserialize;

use crate::errors::{Result, StorageError};

/// Bounded retry with exponential backoff for idempotent table calls.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Upper bound for a single underlying request.
    pub request_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 50,
            max_delay_ms: 2_000,
            request_timeout_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no backoff.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based), capped at `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let delay_ms = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Runs one request under the configured timeout. An elapsed timeout is
    /// reported as an upstream failure so it is retried like one.
    pub async fn timed<T, Fut>(&self, operation: &str, request: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.request_timeout(), request).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Upstream(format!(
                "{operation} timed out after {}ms",
                self.request_timeout_ms
            ))),
        }
    }

    /// Retries `call` while it fails with a retryable error.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.timed(operation, call()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < attempts => {
                    let delay = self.delay_for(attempt - 1);
                    log::warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        operation,
                        attempt,
                        attempts,
                        delay,
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_retryable() => {
                    return Err(StorageError::RetryExhausted {
                        operation: operation.to_string(),
                        attempts,
                        last_error: err.to_string(),
                    })
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 4,
            request_timeout_ms: 1_000,
        }
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = fast();
        assert_eq!(policy.delay_for(0), Duration::from_millis(1));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4));
        assert_eq!(policy.delay_for(10), Duration::from_millis(4));
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let value = fast()
            .run("scan", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(StorageError::Throttled("slow down".into()))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn surfaces_exhaustion_and_skips_permanent_errors() {
        let err = fast()
            .run("scan", || async { Err::<(), _>(StorageError::Upstream("down".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::RetryExhausted { attempts: 3, .. }));

        let calls = AtomicU32::new(0);
        let calls = &calls;
        let err = fast()
            .run("scan", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(StorageError::InvalidArg("bad".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidArg(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
