//! Retry, Timeout, Fallback
//!
//! The three innermost policy wrappers. Composition order (outer to inner)
//! is `fallback(retry(timeout(op)))`: the timeout applies per attempt, the
//! retry controller treats a timeout as retriable, and the fallback runs
//! once after every attempt is spent - it is never retried itself.

use super::BackoffStrategy;
use crate::runtime::error::ExecutionError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Extra attempts after the first failure; total attempts = max_retries + 1
    pub max_retries: u32,
    /// Base delay between attempts
    pub delay: Duration,
    pub backoff: BackoffStrategy,
    /// Cap applied to computed delays
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: 0,
            delay: Duration::from_millis(100),
            backoff: BackoffStrategy::Fixed,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Delay before retry `n` (1-based)
    pub fn delay_for_attempt(&self, n: u32) -> Duration {
        let base = self.delay;
        let computed = match self.backoff {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Linear => base.saturating_mul(n),
            BackoffStrategy::Exponential => base.saturating_mul(1u32 << (n - 1).min(31)),
        };
        computed.min(self.max_delay)
    }
}

/// Run an operation up to `max_retries + 1` times, sleeping the configured
/// backoff between attempts. Exhaustion yields `RetryExhausted` carrying
/// every attempt's error.
pub async fn execute_with_retry<F, Fut, T>(
    mut op: F,
    config: RetryConfig,
    mut on_retry: Option<&mut (dyn FnMut(u32, &ExecutionError) + Send)>,
) -> Result<T, ExecutionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExecutionError>>,
{
    let total_attempts = config.max_retries + 1;
    let mut errors: Vec<String> = Vec::new();

    for attempt in 1..=total_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                // Cancellation is terminal: retrying a cancelled run would
                // outlive the cancel
                if matches!(e, ExecutionError::Cancelled) {
                    return Err(e);
                }
                errors.push(e.to_string());
                if attempt < total_attempts {
                    if let Some(callback) = on_retry.as_mut() {
                        callback(attempt, &e);
                    }
                    warn!(attempt, error = %e, "attempt failed, retrying");
                    tokio::time::sleep(config.delay_for_attempt(attempt)).await;
                }
            }
        }
    }

    Err(ExecutionError::RetryExhausted {
        total_attempts,
        errors,
    })
}

/// Cancel the operation after `duration`, signalling `ModuleTimeout`
pub async fn execute_with_timeout<Fut, T>(
    op: Fut,
    duration: Duration,
) -> Result<T, ExecutionError>
where
    Fut: Future<Output = Result<T, ExecutionError>>,
{
    match tokio::time::timeout(duration, op).await {
        Ok(result) => result,
        Err(_) => Err(ExecutionError::ModuleTimeout { duration }),
    }
}

/// On any failure of `op`, run `fallback` once
pub async fn execute_with_fallback<F, FFut, G, GFut, T>(
    op: F,
    fallback: G,
    mut on_fallback: Option<&mut (dyn FnMut(&ExecutionError) + Send)>,
) -> Result<T, ExecutionError>
where
    F: FnOnce() -> FFut,
    FFut: Future<Output = Result<T, ExecutionError>>,
    G: FnOnce() -> GFut,
    GFut: Future<Output = Result<T, ExecutionError>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(e) => {
            if let Some(callback) = on_fallback.as_mut() {
                callback(&e);
            }
            warn!(error = %e, "operation failed, running fallback");
            fallback().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    fn boom() -> ExecutionError {
        ExecutionError::ModuleFailed {
            module_name: "m".into(),
            message: "boom".into(),
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);
        let result = execute_with_retry(
            move || {
                let calls = Arc::clone(&calls2);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(boom())
                    } else {
                        Ok(7)
                    }
                }
            },
            RetryConfig {
                max_retries: 3,
                delay: Duration::from_millis(1),
                ..RetryConfig::default()
            },
            None,
        )
        .await;
        assert_eq!(result.expect("third attempt succeeds"), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_reports_every_error() {
        let result: Result<(), _> = execute_with_retry(
            || async { Err(boom()) },
            RetryConfig {
                max_retries: 2,
                delay: Duration::from_millis(1),
                ..RetryConfig::default()
            },
            None,
        )
        .await;
        match result {
            Err(ExecutionError::RetryExhausted {
                total_attempts,
                errors,
            }) => {
                assert_eq!(total_attempts, 3);
                assert_eq!(errors.len(), 3);
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exponential_backoff_grows_the_gap() {
        let timestamps = Arc::new(parking_lot::Mutex::new(Vec::<Instant>::new()));
        let t2 = Arc::clone(&timestamps);
        let _: Result<(), _> = execute_with_retry(
            move || {
                let timestamps = Arc::clone(&t2);
                async move {
                    timestamps.lock().push(Instant::now());
                    Err(boom())
                }
            },
            RetryConfig {
                max_retries: 2,
                delay: Duration::from_millis(50),
                backoff: BackoffStrategy::Exponential,
                max_delay: Duration::from_secs(1),
            },
            None,
        )
        .await;
        let times = timestamps.lock();
        assert_eq!(times.len(), 3);
        let first_gap = times[1] - times[0];
        let second_gap = times[2] - times[1];
        assert!(
            second_gap.as_secs_f64() >= first_gap.as_secs_f64() * 1.5,
            "second gap {second_gap:?} should be at least 1.5x first gap {first_gap:?}"
        );
    }

    #[test]
    fn delays_cap_at_max_delay() {
        let config = RetryConfig {
            max_retries: 10,
            delay: Duration::from_millis(100),
            backoff: BackoffStrategy::Exponential,
            max_delay: Duration::from_millis(250),
        };
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(250));
        assert_eq!(config.delay_for_attempt(8), Duration::from_millis(250));
    }

    #[test]
    fn linear_backoff_scales_with_attempt() {
        let config = RetryConfig {
            max_retries: 3,
            delay: Duration::from_millis(10),
            backoff: BackoffStrategy::Linear,
            max_delay: Duration::from_secs(1),
        };
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(10));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(30));
    }

    #[tokio::test]
    async fn timeout_signals_module_timeout() {
        let result: Result<(), _> = execute_with_timeout(
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
            Duration::from_millis(10),
        )
        .await;
        assert!(matches!(result, Err(ExecutionError::ModuleTimeout { .. })));
    }

    #[tokio::test]
    async fn timeout_is_retriable() {
        assert!(ExecutionError::ModuleTimeout {
            duration: Duration::from_secs(1)
        }
        .is_retriable());
    }

    #[tokio::test]
    async fn fallback_runs_once_on_failure() {
        let fallback_calls = Arc::new(AtomicU32::new(0));
        let fc = Arc::clone(&fallback_calls);
        let result = execute_with_fallback(
            || async { Err::<i32, _>(boom()) },
            move || {
                let fc = Arc::clone(&fc);
                async move {
                    fc.fetch_add(1, Ordering::SeqCst);
                    Ok(99)
                }
            },
            None,
        )
        .await;
        assert_eq!(result.expect("fallback value"), 99);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fallback_not_run_on_success() {
        let result = execute_with_fallback(
            || async { Ok(1) },
            || async { Ok(2) },
            None,
        )
        .await;
        assert_eq!(result.expect("primary value"), 1);
    }

    #[tokio::test]
    async fn on_retry_callback_observes_attempts() {
        let mut seen: Vec<u32> = Vec::new();
        let mut callback = |attempt: u32, _err: &ExecutionError| seen.push(attempt);
        let _: Result<(), _> = execute_with_retry(
            || async { Err(boom()) },
            RetryConfig {
                max_retries: 2,
                delay: Duration::from_millis(1),
                ..RetryConfig::default()
            },
            Some(&mut callback),
        )
        .await;
        assert_eq!(seen, vec![1, 2]);
    }
}
