//! Retry-with-backoff and deadline helpers shared by every component that
//! talks to a remote service.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{RagError, Result};

/// Parameters for retrying transient failures with exponential backoff.
///
/// `max_attempts` counts the first call, so `1` disables retries and `2`
/// allows exactly one retry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor applied per retry.
    pub multiplier: f64,
    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay_ms: 250, max_delay_ms: 8_000, multiplier: 2.0, jitter: true }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    /// Return a copy of this policy with a different attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay before retry number `retry` (zero-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let base = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay_ms as f64);
        let jittered = if self.jitter { capped * (1.0 + 0.25 * rand::random::<f64>()) } else { capped };
        Duration::from_millis(jittered as u64)
    }
}

/// Run `operation` until it succeeds, fails permanently, or the policy's
/// attempt budget is spent.
///
/// Only errors for which [`RagError::is_transient`] holds are retried. The
/// last error is returned unchanged so callers keep its type.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, operation: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.backoff(attempt - 1);
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after transient error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Bound a remote call by `limit`. On expiry the error built by `on_timeout`
/// is returned; it should be transient so retry policies pick it up.
pub async fn with_timeout<Fut, T, E>(limit: Duration, fut: Fut, on_timeout: E) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
    E: FnOnce() -> RagError,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::ServiceErrorKind;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy { max_attempts, base_delay_ms: 100, max_delay_ms: 1_000, multiplier: 2.0, jitter: false }
    }

    #[test]
    fn backoff_grows_exponentially_and_is_capped() {
        let policy = policy(5);
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(5), Duration::from_millis(1_000));
    }

    #[test]
    fn jitter_adds_at_most_a_quarter() {
        let policy = RetryPolicy { jitter: true, ..policy(3) };
        for _ in 0..50 {
            let delay = policy.backoff(1).as_millis();
            assert!((200..=250).contains(&delay), "delay {delay} out of range");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = with_retry(&policy(3), "test", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RagError::store_unavailable("mock", "down"))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<()> = with_retry(&policy(2), "test", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(RagError::embedding("mock", ServiceErrorKind::Timeout, "slow"))
            }
        })
        .await;
        assert!(matches!(result, Err(RagError::EmbeddingService { kind: ServiceErrorKind::Timeout, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<()> = with_retry(&policy(5), "test", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(RagError::Configuration("bad dimension".into()))
            }
        })
        .await;
        assert!(matches!(result, Err(RagError::Configuration(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_maps_to_supplied_error() {
        let result: Result<()> = with_timeout(
            Duration::from_millis(10),
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            },
            || RagError::store_unavailable("mock", "timed out"),
        )
        .await;
        assert!(matches!(result, Err(RagError::VectorStoreUnavailable { .. })));
    }
}
