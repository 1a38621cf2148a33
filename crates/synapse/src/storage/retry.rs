//! Persistence retry with exponential backoff and jitter

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::config::PersistenceConfig;
use crate::error::{Result, SynapseError};

/// How many times a write is attempted and how long to wait in between
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PersistenceConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// No waiting between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based), jittered to 50-100%
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        jitter(exp.min(self.max_backoff))
    }
}

fn jitter(base: Duration) -> Duration {
    if base.is_zero() {
        return base;
    }
    let factor: f64 = rand::thread_rng().gen_range(0.5..=1.0);
    Duration::from_millis((base.as_millis() as f64 * factor) as u64)
}

/// Run `op` until it succeeds or the attempt budget is spent.
///
/// Fatal errors are returned at once. Exhaustion is reported as
/// `PersistenceFailure` carrying the last error.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) if attempt >= policy.max_attempts => {
                return Err(SynapseError::PersistenceFailure(format!(
                    "{what} failed after {attempt} attempts: {e}"
                )));
            }
            Err(e) => {
                let delay = policy.delay_for(attempt);
                debug!("{} attempt {} failed ({}), retrying in {:?}", what, attempt, e, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_is_capped_and_jittered() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(400),
        };
        for attempt in 1..=8 {
            let d = policy.delay_for(attempt);
            assert!(d <= Duration::from_millis(400));
        }
        let first = policy.delay_for(1);
        assert!(first >= Duration::from_millis(50) && first <= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let calls = &AtomicU32::new(0);
        let result = with_retry(&RetryPolicy::immediate(3), "write", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(SynapseError::PersistenceFailure("flaky".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let calls = &AtomicU32::new(0);
        let result: Result<()> = with_retry(&RetryPolicy::immediate(2), "write", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SynapseError::PersistenceFailure("down".into()))
        })
        .await;
        assert!(matches!(result, Err(SynapseError::PersistenceFailure(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<()> = with_retry(&RetryPolicy::immediate(5), "write", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SynapseError::StoreUnavailable("gone".into()))
        })
        .await;
        assert!(matches!(result, Err(SynapseError::StoreUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
