//! Bounded exponential backoff for collaborator calls

use std::future::Future;
use std::time::Duration;

use crate::Result;

/// Retry policy applied at the boundary closest to a remote collaborator
///
/// Only errors for which [`crate::Error::is_transient`] holds are retried.
/// The backoff starts at `initial_backoff` and doubles after every failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
        }
    }

    /// Policy that makes exactly one attempt
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Run `operation` until it succeeds, fails permanently, or retries run out
    ///
    /// The closure receives the zero-based attempt number.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut f: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = self.initial_backoff;
        let mut attempt = 0;

        loop {
            if attempt > 0 {
                tracing::warn!(
                    operation,
                    attempt,
                    max_retries = self.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "Retrying after transient failure"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            match f(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    tracing::debug!(operation, attempt, error = %e, "Transient failure");
                }
                Err(e) => {
                    if e.is_transient() {
                        tracing::error!(operation, attempts = attempt + 1, error = %e, "Retries exhausted");
                    }
                    return Err(e);
                }
            }

            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));

        let result = policy
            .run("flaky", |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Error::transient("test", "reset"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::from_millis(1));

        let result: Result<()> = policy
            .run("down", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::transient("test", "refused")) }
            })
            .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);

        let result: Result<()> = RetryPolicy::default()
            .run("bad request", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::collaborator("test", "400")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
