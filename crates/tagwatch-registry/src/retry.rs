//! Bounded retry with jittered exponential backoff.
//!
//! Tuning lives in explicit policy values with documented defaults; the
//! embedding process may override them from its own configuration surface.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::{RegistryError, Result};

/// Retry policy for one class of registry operation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,

    /// Base delay before the first retry.
    pub base_delay: Duration,

    /// Upper bound on any single backoff delay.
    pub max_delay: Duration,

    /// Deadline applied to each individual attempt.
    pub attempt_timeout: Option<Duration>,

    /// Whether every HTTP error status is retried, not only transient ones.
    pub retry_all_statuses: bool,
}

impl RetryPolicy {
    /// Policy for bearer-token fetches: 7 attempts, 200ms base, 3s cap,
    /// retrying on any non-2xx response.
    #[must_use]
    pub const fn token_fetch() -> Self {
        Self {
            max_attempts: 7,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(3),
            attempt_timeout: None,
            retry_all_statuses: true,
        }
    }

    /// Policy for tag-list and manifest fetches: 3 attempts, 500ms base,
    /// 5s cap, 10s per-attempt timeout.
    #[must_use]
    pub const fn data_fetch() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            attempt_timeout: Some(Duration::from_secs(10)),
            retry_all_statuses: false,
        }
    }

    /// Backoff delay before retrying the given zero-based attempt, jittered
    /// into the upper half of the exponential window.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let cap = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        let exp = base.saturating_mul(2u64.saturating_pow(attempt)).min(cap);
        let jittered = exp / 2 + rand::thread_rng().gen_range(0..=exp / 2);
        Duration::from_millis(jittered)
    }

    fn should_retry(&self, error: &RegistryError) -> bool {
        error.is_retryable()
            || (self.retry_all_statuses && matches!(error, RegistryError::HttpError { .. }))
    }

    /// Runs `make` until it succeeds, retries are exhausted, or a
    /// non-retryable error occurs.
    ///
    /// Each attempt is bounded by [`RetryPolicy::attempt_timeout`]
    /// independently of any deadline the caller holds: dropping the returned
    /// future cancels the wait, so the shorter of the two always wins.
    ///
    /// # Errors
    ///
    /// Returns the last attempt's error.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut make: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            let outcome = match self.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, make()).await {
                    Ok(result) => result,
                    Err(_) => Err(RegistryError::Timeout {
                        operation: operation.to_string(),
                    }),
                },
                None => make().await,
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(error) if attempt + 1 < self.max_attempts && self.should_retry(&error) => {
                    let delay = self.backoff_delay(attempt);
                    tracing::debug!(
                        operation,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            attempt_timeout: None,
            retry_all_statuses: false,
        }
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = fast_policy()
            .run("op", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = fast_policy()
            .run("op", || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(RegistryError::Timeout {
                            operation: "op".to_string(),
                        })
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<()> = fast_policy()
            .run("op", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(RegistryError::Timeout {
                        operation: "op".to_string(),
                    })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_configuration_errors() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<()> = fast_policy()
            .run("op", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(RegistryError::ConfigError {
                        message: "bad".to_string(),
                    })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_token_policy_retries_any_http_status() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            ..RetryPolicy::token_fetch()
        };

        let result: Result<()> = policy
            .run("token", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(RegistryError::HttpError {
                        status: 401,
                        message: "unauthorized".to_string(),
                    })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_attempt_timeout_converts_to_timeout_error() {
        let policy = RetryPolicy {
            max_attempts: 1,
            attempt_timeout: Some(Duration::from_millis(10)),
            ..fast_policy()
        };

        let result: Result<()> = policy
            .run("slow op", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(RegistryError::Timeout { .. })));
    }

    #[test]
    fn test_backoff_delay_respects_cap() {
        let policy = RetryPolicy::data_fetch();
        for attempt in 0..12 {
            assert!(policy.backoff_delay(attempt) <= policy.max_delay);
        }
    }
}
