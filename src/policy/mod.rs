//! # Execution Policy Primitives
//!
//! Reusable, independently testable policy building blocks wrapped around
//! module invocations by the options executor:
//!
//! - [`cache`] - keyed caches with LRU eviction and TTL
//! - [`keygen`] - deterministic, canonical cache keys
//! - [`rate_limit`] - token-bucket rate limiting
//! - [`concurrency`] - semaphore-backed concurrency caps
//! - [`circuit_breaker`] - Closed/Open/HalfOpen breakers with a registry
//! - [`retry`] - retry with backoff, per-attempt timeouts, fallback
//! - [`lazy`] - memoized one-shot computations
//! - [`error_strategy`] - propagate/skip/log/wrap at the module boundary
//! - [`options`] - composition of all of the above around one call
//!
//! This module also owns the shared policy vocabulary ([`ModuleCallOptions`]
//! and its enums) carried from typed calls through the IR into the runtime.

pub mod cache;
pub mod circuit_breaker;
pub mod concurrency;
pub mod error_strategy;
pub mod keygen;
pub mod lazy;
pub mod options;
pub mod rate_limit;
pub mod retry;

pub use cache::{CacheBackend, CacheEntry, CacheStats, InMemoryCache};
pub use circuit_breaker::{
    BreakerState, CircuitBreaker, CircuitBreakerRegistry, CircuitBreakerStats,
};
pub use concurrency::{ConcurrencyLimiter, ConcurrencyStats};
pub use error_strategy::ModuleError;
pub use keygen::CacheKeyGenerator;
pub use lazy::LazyValue;
pub use options::OptionsExecutor;
pub use rate_limit::{RateLimiter, RateLimiterStats};

use crate::cvalue::CValue;
use serde::{Deserialize, Serialize};

/// Delay progression between retry attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BackoffStrategy {
    /// Same delay every attempt
    #[default]
    Fixed,
    /// `base * attempt`
    Linear,
    /// `base * 2^(attempt - 1)`
    Exponential,
}

/// What to do when a module invocation fails after all policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ErrorStrategy {
    /// Fail the node (default)
    #[default]
    Propagate,
    /// Substitute the zero value for the declared output type
    Skip,
    /// Log the failure, then substitute the zero value
    Log,
    /// Produce a result union carrying either the value or the error
    Wrap,
}

/// Scheduler priority, clamped to `[0, 100]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PriorityLevel(pub u8);

impl PriorityLevel {
    pub const LOW: PriorityLevel = PriorityLevel(10);
    pub const NORMAL: PriorityLevel = PriorityLevel(50);
    pub const HIGH: PriorityLevel = PriorityLevel(80);
    pub const CRITICAL: PriorityLevel = PriorityLevel(100);

    pub fn new(level: u8) -> Self {
        PriorityLevel(level.min(100))
    }
}

impl Default for PriorityLevel {
    fn default() -> Self {
        PriorityLevel::NORMAL
    }
}

/// Circuit breaker tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting a probe
    pub reset_duration_ms: u64,
    /// Concurrent probes admitted while half-open
    pub half_open_max_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            failure_threshold: 5,
            reset_duration_ms: 30_000,
            half_open_max_probes: 1,
        }
    }
}

/// Per-call execution knobs attached to a module node.
///
/// All fields optional; an empty value means the operation runs bare.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModuleCallOptions {
    /// Extra attempts after the first failure
    pub retry: Option<u32>,
    /// Base delay between attempts, milliseconds
    pub delay_ms: Option<u64>,
    pub backoff: Option<BackoffStrategy>,
    /// Cap applied to computed backoff delays
    pub max_delay_ms: Option<u64>,
    /// Per-attempt timeout, milliseconds
    pub timeout_ms: Option<u64>,
    pub lazy: Option<bool>,
    /// Cache TTL, milliseconds; presence enables caching
    pub cache_ms: Option<u64>,
    /// Named backend from the context; defaults to the in-memory backend
    pub cache_backend: Option<String>,
    /// Token count per throttle window
    pub throttle_count: Option<u32>,
    /// Throttle window, milliseconds
    pub throttle_per_ms: Option<u64>,
    /// Concurrency cap for this module
    pub concurrency: Option<u32>,
    pub on_error: Option<ErrorStrategy>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    pub priority: Option<PriorityLevel>,
    /// Value substituted when the operation (plus retries) fails
    pub fallback: Option<CValue>,
}

impl ModuleCallOptions {
    /// True when no knob is set; the executor takes a fast path
    pub fn is_empty(&self) -> bool {
        self == &ModuleCallOptions::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_are_empty() {
        assert!(ModuleCallOptions::default().is_empty());
        let with_retry = ModuleCallOptions {
            retry: Some(2),
            ..ModuleCallOptions::default()
        };
        assert!(!with_retry.is_empty());
    }

    #[test]
    fn priority_clamps_to_100() {
        assert_eq!(PriorityLevel::new(250).0, 100);
        assert_eq!(PriorityLevel::new(42).0, 42);
    }
}
