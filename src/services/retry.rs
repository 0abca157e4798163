//! Retry policy with exponential backoff for external calls.
//!
//! Backoff is `min(initial * multiplier^attempt, max)`. Only errors the
//! injected classifier marks transient are retried; persistent failures
//! surface immediately.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Decides whether an error is worth retrying.
pub type TransienceClassifier = Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>;

/// Retry policy applied to DB probes, notifications, and usage-log writes.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries before giving up.
    pub max_retries: u32,
    /// Initial backoff duration in milliseconds.
    pub initial_backoff_ms: u64,
    /// Backoff multiplier per attempt.
    pub multiplier: f64,
    /// Maximum backoff duration in milliseconds.
    pub max_backoff_ms: u64,
    classifier: TransienceClassifier,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1_000,
            multiplier: 2.0,
            max_backoff_ms: 30_000,
            classifier: Arc::new(|_| true),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff_ms,
            max_backoff_ms,
            ..Self::default()
        }
    }

    /// Replace the transience classifier. Platforms with typed errors
    /// plug their own predicate in here.
    pub fn with_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Execute an async operation with retries on transient failures.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, anyhow::Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, anyhow::Error>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    if attempt >= self.max_retries || !(self.classifier)(&err) {
                        return Err(err);
                    }
                    let backoff = self.backoff_for(attempt);
                    tracing::debug!(
                        attempt = attempt + 1,
                        max = self.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "retrying after transient failure"
                    );
                    sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Backoff duration for a 0-indexed attempt.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let raw = self.initial_backoff_ms as f64 * self.multiplier.powi(attempt as i32);
        Duration::from_millis((raw as u64).min(self.max_backoff_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, 1, 4)
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::new(10, 10, 35);
        assert_eq!(policy.backoff_for(0), Duration::from_millis(10));
        assert_eq!(policy.backoff_for(1), Duration::from_millis(20));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(35));
        assert_eq!(policy.backoff_for(5), Duration::from_millis(35));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let policy = fast_policy();
        let attempts = AtomicU32::new(0);
        let result = policy
            .execute(|| async {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(anyhow::anyhow!("transient"))
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let policy = fast_policy();
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = policy
            .execute(|| async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("always fails"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_persistent_errors_are_not_retried() {
        let policy = fast_policy().with_classifier(|err| !err.to_string().contains("auth"));
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = policy
            .execute(|| async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("invalid auth"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
