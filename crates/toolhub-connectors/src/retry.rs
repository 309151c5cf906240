//! Bounded retry with backoff for throttled upstream calls.

use std::{future::Future, time::Duration};

use crate::ConnectorError;

/// Retry budget and backoff curve.
///
/// Delays start at `base_delay` and double per attempt up to `max_delay`. A
/// delay hint from the upstream (`retry-after-ms` / `retry-after`) takes
/// precedence, still capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (0-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32, hint: Option<Duration>) -> Duration {
        let computed = hint.unwrap_or_else(|| {
            self.base_delay
                .checked_mul(2_u32.saturating_pow(retry))
                .unwrap_or(self.max_delay)
        });
        computed.min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails without throttling, or the budget runs out.
    ///
    /// # Errors
    /// Returns the first non-throttle error unchanged, or
    /// [`ConnectorError::RetriesExhausted`] once `max_retries` retries were spent.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, ConnectorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ConnectorError>>,
    {
        let mut retry = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(ConnectorError::RateLimited { retry_after }) => {
                    if retry >= self.max_retries {
                        tracing::error!(call = label, attempts = retry + 1, "rate limited, retry budget exhausted");
                        return Err(ConnectorError::RetriesExhausted {
                            attempts: retry + 1,
                            last: "rate limited by upstream".to_owned(),
                        });
                    }
                    let delay = self.delay_for(retry, retry_after);
                    tracing::info!(call = label, retry = retry + 1, ?delay, "rate limited, backing off");
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(other) => return Err(other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0, None), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1, None), Duration::from_secs(1));
        assert_eq!(policy.delay_for(6, None), Duration::from_secs(8));
        assert_eq!(policy.delay_for(40, None), Duration::from_secs(8));
    }

    #[test]
    fn test_hint_takes_precedence_but_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for(3, Some(Duration::from_millis(120))),
            Duration::from_millis(120)
        );
        assert_eq!(
            policy.delay_for(0, Some(Duration::from_secs(60))),
            Duration::from_secs(8)
        );
    }

    #[tokio::test]
    async fn test_succeeds_after_throttling() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let out = fast(5)
            .run("test", || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ConnectorError::RateLimited { retry_after: None })
                    } else {
                        Ok("done")
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(out, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let err = fast(2)
            .run::<(), _, _>("test", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(ConnectorError::RateLimited { retry_after: Some(Duration::ZERO) }) }
            })
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ConnectorError::RetriesExhausted {
                attempts: 3,
                last: "rate limited by upstream".into()
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let err = fast(5)
            .run::<(), _, _>("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ConnectorError::NotFound("x".into())) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::NotFound(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
