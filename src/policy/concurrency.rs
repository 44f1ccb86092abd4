//! Concurrency Limiter
//!
//! A counting semaphore capping how many module bodies run at once, with
//! active/peak/total counters. Permits release on every exit path, panics
//! included, via the guard returned by the semaphore.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Semaphore, TryAcquireError};

/// Limiter observability counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConcurrencyStats {
    pub active: usize,
    pub peak: usize,
    pub total: u64,
    pub waiting: usize,
    pub available: usize,
}

/// Semaphore-backed concurrency cap
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    active: AtomicUsize,
    peak: AtomicUsize,
    total: AtomicU64,
    waiting: AtomicUsize,
}

impl ConcurrencyLimiter {
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        ConcurrencyLimiter {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            total: AtomicU64::new(0),
            waiting: AtomicUsize::new(0),
        }
    }

    /// Run the operation under a permit; waits when the cap is reached
    pub async fn with_permit<F, Fut, T>(&self, op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        self.waiting.fetch_add(1, Ordering::Relaxed);
        let permit = self
            .semaphore
            .acquire()
            .await
            .unwrap_or_else(|_| unreachable!("limiter semaphore is never closed"));
        self.waiting.fetch_sub(1, Ordering::Relaxed);

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::Relaxed);

        let result = op().await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        drop(permit);
        result
    }

    /// Non-blocking permit check; callers must hold the returned guard for
    /// the duration of their work
    pub fn try_acquire(&self) -> Option<tokio::sync::OwnedSemaphorePermit> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(TryAcquireError::NoPermits) => None,
            Err(TryAcquireError::Closed) => None,
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn stats(&self) -> ConcurrencyStats {
        ConcurrencyStats {
            active: self.active(),
            peak: self.peak.load(Ordering::SeqCst),
            total: self.total.load(Ordering::Relaxed),
            waiting: self.waiting.load(Ordering::Relaxed),
            available: self.available(),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn never_exceeds_the_cap() {
        let limiter = Arc::new(ConcurrencyLimiter::new(3));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let observed_max = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let limiter = Arc::clone(&limiter);
            let concurrent = Arc::clone(&concurrent);
            let observed_max = Arc::clone(&observed_max);
            tasks.push(tokio::spawn(async move {
                limiter
                    .with_permit(|| async {
                        let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                        observed_max.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        concurrent.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for task in tasks {
            task.await.expect("join");
        }

        assert!(observed_max.load(Ordering::SeqCst) <= 3);
        let stats = limiter.stats();
        assert!(stats.peak <= 3);
        assert_eq!(stats.total, 20);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.available, 3);
    }

    #[tokio::test]
    async fn try_acquire_respects_outstanding_permits() {
        let limiter = ConcurrencyLimiter::new(1);
        let held = limiter.try_acquire().expect("first permit");
        assert!(limiter.try_acquire().is_none());
        drop(held);
        assert!(limiter.try_acquire().is_some());
    }

    #[tokio::test]
    async fn permit_released_on_operation_result() {
        let limiter = ConcurrencyLimiter::new(1);
        let value: Result<i32, &str> = limiter.with_permit(|| async { Err("boom") }).await;
        assert!(value.is_err());
        assert_eq!(limiter.available(), 1);
    }
}
