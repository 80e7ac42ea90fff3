//! Retry schedule for transient upstream failures

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::{Result, SourceError};

/// Exponential backoff: `initial_delay * multiplier^(attempt-1)`, capped at `max_delay`
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Total tries including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Single attempt, no sleeping
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.max(1.0).powi(attempt.saturating_sub(1) as i32);
        let nanos = self.initial_delay.as_nanos() as f64 * exp;
        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            self.max_delay
        } else {
            Duration::from_nanos(nanos.round() as u64)
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// A rate-limit whose `retry_after` exceeds `max_delay` is handed back
    /// immediately so the caller can decide how to wait.
    pub async fn retry<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match op().await {
                Ok(v) => return Ok(v),
                Err(e) => e,
            };
            if !err.is_transient() || attempt >= attempts {
                return Err(err);
            }
            let delay = match err.retry_after() {
                Some(wait) if wait > self.max_delay => return Err(err),
                Some(wait) => wait,
                None => self.delay_for(attempt),
            };
            warn!(
                "{} failed: {}; retrying in {:?} (attempt {}/{})",
                label, err, delay, attempt, attempts
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Bound an upstream call by `timeout`
pub async fn with_timeout<T, Fut>(timeout: Duration, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_delay_schedule_is_capped() {
        let p = policy();
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(300));
        assert_eq!(p.delay_for(30), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let calls = &AtomicU32::new(0);
        let result = policy()
            .retry("test", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(SourceError::Unavailable("flaky".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = &AtomicU32::new(0);
        let result: Result<()> = policy()
            .retry("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SourceError::Unavailable("down".into()))
            })
            .await;
        assert!(matches!(result, Err(SourceError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<()> = policy()
            .retry("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SourceError::Malformed("bad json".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_long_retry_after_returned_to_caller() {
        let calls = &AtomicU32::new(0);
        let result: Result<()> = policy()
            .retry("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SourceError::RateLimited {
                    retry_after: Some(Duration::from_secs(60)),
                })
            })
            .await;
        assert_eq!(
            result.unwrap_err().retry_after(),
            Some(Duration::from_secs(60))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_maps_to_source_error() {
        let result: Result<()> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(SourceError::Timeout(_))));
    }
}
