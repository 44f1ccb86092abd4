//! Token-Bucket Rate Limiter
//!
//! Configured as `count` per `duration`. Tokens refill continuously at
//! `count / duration` and cap at `count`, so over any interval `Δ` at most
//! `rate·Δ + count` acquisitions succeed. `acquire` waits one token
//! interval between attempts rather than busy-spinning.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Rate limiter observability counters
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RateLimiterStats {
    pub acquired: u64,
    pub rejected: u64,
    pub current_tokens: f64,
}

/// Continuous-refill token bucket
pub struct RateLimiter {
    count: f64,
    period: Duration,
    state: Mutex<BucketState>,
    acquired: AtomicU64,
    rejected: AtomicU64,
}

impl RateLimiter {
    /// `count` tokens per `period`
    pub fn new(count: u32, period: Duration) -> Self {
        RateLimiter {
            count: f64::from(count.max(1)),
            period: if period.is_zero() {
                Duration::from_millis(1)
            } else {
                period
            },
            state: Mutex::new(BucketState {
                tokens: f64::from(count.max(1)),
                last_refill: Instant::now(),
            }),
            acquired: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Time for one token to refill
    pub fn token_interval(&self) -> Duration {
        self.period.div_f64(self.count)
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill);
        let refilled = elapsed.as_secs_f64() * (self.count / self.period.as_secs_f64());
        state.tokens = (state.tokens + refilled).min(self.count);
        state.last_refill = now;
    }

    /// Consume one token if available
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            self.acquired.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Wait until a token is available, sleeping one token interval between
    /// attempts
    pub async fn acquire(&self) {
        loop {
            if self.try_acquire() {
                return;
            }
            tokio::time::sleep(self.token_interval()).await;
        }
    }

    /// Acquire a token, then run the operation
    pub async fn with_rate_limit<F, Fut, T>(&self, op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        self.acquire().await;
        op().await
    }

    pub fn stats(&self) -> RateLimiterStats {
        let mut state = self.state.lock();
        self.refill(&mut state);
        RateLimiterStats {
            acquired: self.acquired.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            current_tokens: state.tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_up_to_count_then_rejects() {
        let limiter = RateLimiter::new(3, Duration::from_secs(10));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        let stats = limiter.stats();
        assert_eq!(stats.acquired, 3);
        assert_eq!(stats.rejected, 1);
    }

    #[test]
    fn tokens_refill_over_time() {
        let limiter = RateLimiter::new(10, Duration::from_millis(100));
        for _ in 0..10 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
        std::thread::sleep(Duration::from_millis(35));
        // ~3.5 tokens refilled
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn tokens_cap_at_count() {
        let limiter = RateLimiter::new(2, Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(50));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn acquire_waits_for_refill() {
        let limiter = RateLimiter::new(1, Duration::from_millis(30));
        limiter.acquire().await;
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[tokio::test]
    async fn with_rate_limit_runs_the_operation() {
        let limiter = RateLimiter::new(5, Duration::from_secs(1));
        let result = limiter.with_rate_limit(|| async { 7 }).await;
        assert_eq!(result, 7);
    }
}
