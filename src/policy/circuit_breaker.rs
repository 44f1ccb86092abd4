//! Circuit Breaker
//!
//! Per-module fault isolation with the classic three-state machine:
//!
//! - `Closed` - calls flow; consecutive failures are counted and reset on
//!   any success. Reaching the threshold opens the circuit.
//! - `Open` - calls are rejected with `CircuitOpen` until the reset
//!   duration elapses; the next admission transitions to half-open as the
//!   first probe.
//! - `HalfOpen` - up to `half_open_max_probes` concurrent probes are
//!   admitted. Any success closes the circuit; any failure re-opens it and
//!   restarts the reset clock.
//!
//! `check_and_transition` performs the state read and transition under one
//! lock, so concurrent callers observe a consistent machine.

use super::CircuitBreakerConfig;
use crate::runtime::error::ExecutionError;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Breaker observability counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerStats {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejected: u64,
}

#[derive(Debug)]
struct Machine {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probes_in_flight: u32,
}

/// One breaker guarding one module
pub struct CircuitBreaker {
    module_name: String,
    config: CircuitBreakerConfig,
    machine: Mutex<Machine>,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    total_rejected: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(module_name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        CircuitBreaker {
            module_name: module_name.into(),
            config,
            machine: Mutex::new(Machine {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probes_in_flight: 0,
            }),
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
        }
    }

    fn reset_duration(&self) -> Duration {
        Duration::from_millis(self.config.reset_duration_ms)
    }

    /// Atomically decide whether a call may proceed, transitioning the
    /// machine as needed
    pub fn check_and_transition(&self) -> Result<(), ExecutionError> {
        let mut machine = self.machine.lock();
        match machine.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = machine
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.reset_duration() {
                    machine.state = BreakerState::HalfOpen;
                    machine.probes_in_flight = 1;
                    Ok(())
                } else {
                    self.total_rejected.fetch_add(1, Ordering::Relaxed);
                    Err(ExecutionError::CircuitOpen {
                        module_name: self.module_name.clone(),
                    })
                }
            }
            BreakerState::HalfOpen => {
                if machine.probes_in_flight < self.config.half_open_max_probes {
                    machine.probes_in_flight += 1;
                    Ok(())
                } else {
                    self.total_rejected.fetch_add(1, Ordering::Relaxed);
                    Err(ExecutionError::CircuitOpen {
                        module_name: self.module_name.clone(),
                    })
                }
            }
        }
    }

    /// Record a successful call
    pub fn on_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        let mut machine = self.machine.lock();
        machine.consecutive_failures = 0;
        if machine.state == BreakerState::HalfOpen {
            machine.state = BreakerState::Closed;
            machine.opened_at = None;
            machine.probes_in_flight = 0;
        }
    }

    /// Record a failed call
    pub fn on_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let mut machine = self.machine.lock();
        match machine.state {
            BreakerState::HalfOpen => {
                machine.state = BreakerState::Open;
                machine.opened_at = Some(Instant::now());
                machine.probes_in_flight = 0;
                warn!(module = %self.module_name, "half-open probe failed, circuit re-opened");
            }
            BreakerState::Closed => {
                machine.consecutive_failures += 1;
                if machine.consecutive_failures >= self.config.failure_threshold {
                    machine.state = BreakerState::Open;
                    machine.opened_at = Some(Instant::now());
                    warn!(
                        module = %self.module_name,
                        failures = machine.consecutive_failures,
                        "failure threshold reached, circuit opened"
                    );
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Run an operation under the breaker
    pub async fn execute<F, Fut, T>(&self, op: F) -> Result<T, ExecutionError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, ExecutionError>>,
    {
        self.check_and_transition()?;
        match op().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure();
                Err(e)
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.machine.lock().state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let machine = self.machine.lock();
        CircuitBreakerStats {
            state: machine.state,
            consecutive_failures: machine.consecutive_failures,
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
        }
    }
}

/// Process-wide registry of breakers keyed by module name
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        CircuitBreakerRegistry {
            breakers: DashMap::new(),
        }
    }

    /// Race-safe get-or-create; the first caller's config wins
    pub fn get_or_create(
        &self,
        module_name: &str,
        config: CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(module_name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(module_name, config)))
            .clone()
    }

    pub fn get(&self, module_name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(module_name).map(|b| Arc::clone(&b))
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, reset_ms: u64, probes: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_duration_ms: reset_ms,
            half_open_max_probes: probes,
        }
    }

    async fn fail(breaker: &CircuitBreaker) {
        let _ = breaker
            .execute(|| async {
                Err::<(), _>(ExecutionError::ModuleFailed {
                    module_name: "m".into(),
                    message: "boom".into(),
                })
            })
            .await;
    }

    #[tokio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new("m", config(3, 60_000, 1));
        for _ in 0..3 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        let rejected = breaker.execute(|| async { Ok(1) }).await;
        assert!(matches!(
            rejected,
            Err(ExecutionError::CircuitOpen { module_name }) if module_name == "m"
        ));
        assert_eq!(breaker.stats().total_rejected, 1);
    }

    #[tokio::test]
    async fn success_resets_the_failure_count() {
        let breaker = CircuitBreaker::new("m", config(3, 60_000, 1));
        fail(&breaker).await;
        fail(&breaker).await;
        breaker.execute(|| async { Ok(()) }).await.expect("success");
        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_probe_success_closes() {
        let breaker = CircuitBreaker::new("m", config(1, 20, 1));
        fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;
        breaker.execute(|| async { Ok(()) }).await.expect("probe");
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_probe_failure_reopens() {
        let breaker = CircuitBreaker::new("m", config(1, 20, 1));
        fail(&breaker).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);
        // Clock restarted: still rejecting immediately after
        assert!(breaker.check_and_transition().is_err());
    }

    #[tokio::test]
    async fn half_open_caps_concurrent_probes() {
        let breaker = CircuitBreaker::new("m", config(1, 10, 2));
        fail(&breaker).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // First admission flips to half-open with one probe in flight
        breaker.check_and_transition().expect("probe 1");
        breaker.check_and_transition().expect("probe 2");
        assert!(breaker.check_and_transition().is_err());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn registry_returns_the_same_breaker() {
        let registry = CircuitBreakerRegistry::new();
        let a = registry.get_or_create("m", CircuitBreakerConfig::default());
        let b = registry.get_or_create("m", config(1, 1, 1));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }
}
