use crate::config::LoadConfig;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Bounded retry with exponential backoff.
///
/// Attempt `n` (1-based) that fails with a retryable error is followed by a
/// sleep of `base_delay * 2^(n-1)`, capped at `max_delay`. No sleep follows
/// the final attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    name: String,
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Duration,
}

/// Error type for retried calls
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempt(s): {source}")]
    Exhausted { attempts: usize, source: E },

    #[error("non-retryable failure on attempt {attempts}: {source}")]
    Aborted { attempts: usize, source: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> usize {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Aborted { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { source, .. } | RetryError::Aborted { source, .. } => source,
        }
    }
}

impl RetryPolicy {
    /// # Arguments
    /// * `name` - Identifier for logging
    /// * `max_attempts` - Total attempts including the first one (at least 1)
    /// * `base_delay` - Sleep after the first failed attempt
    /// * `max_delay` - Upper bound for any single sleep
    pub fn new(
        name: impl Into<String>,
        max_attempts: usize,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(name: impl Into<String>, config: &LoadConfig) -> Self {
        Self::new(
            name,
            config.retry_count,
            config.base_delay(),
            config.max_delay(),
        )
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Sleep that follows failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as u32;
        self.base_delay
            .checked_mul(2u32.saturating_pow(exponent))
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails with an error `retryable` rejects,
    /// or the attempt budget is spent.
    pub async fn call<F, Fut, T, E, P>(&self, mut op: F, retryable: P) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("Retry [{}]: succeeded on attempt {}", self.name, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if !retryable(&e) => {
                    return Err(RetryError::Aborted {
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) if attempt >= self.max_attempts => {
                    warn!(
                        "Retry [{}]: attempt {}/{} failed, giving up: {}",
                        self.name, attempt, self.max_attempts, e
                    );
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "Retry [{}]: attempt {}/{} failed, retrying in {:?}: {}",
                        self.name, attempt, self.max_attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    fn policy() -> RetryPolicy {
        RetryPolicy::new("test", 3, Duration::from_secs(1), Duration::from_secs(10))
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let p = RetryPolicy::new("test", 6, Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(p.delay_for(1), Duration::from_secs(1));
        assert_eq!(p.delay_for(2), Duration::from_secs(2));
        assert_eq!(p.delay_for(3), Duration::from_secs(4));
        assert_eq!(p.delay_for(4), Duration::from_secs(8));
        assert_eq!(p.delay_for(5), Duration::from_secs(10));
        assert_eq!(p.delay_for(60), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let start = Instant::now();

        let result = policy()
            .call(
                move || async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 { Err("timeout") } else { Ok(n) }
                },
                |_| true,
            )
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s after the first failure, 2s after the second
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_attempts() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result: Result<(), _> = policy()
            .call(
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("connection reset")
                },
                |_| true,
            )
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, RetryError::Exhausted { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_aborts_immediately() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result: Result<(), _> = policy()
            .call(
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("bad schema")
                },
                |_| false,
            )
            .await;

        assert!(matches!(result, Err(RetryError::Aborted { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
