//! Module-Options Executor
//!
//! Composes the policy primitives around a single module invocation
//! according to its [`ModuleCallOptions`]. Composition order, outermost to
//! innermost:
//!
//! ```text
//! priority submission
//!   circuit breaker
//!     rate limit
//!       concurrency permit
//!         cache (single-flight get_or_compute)
//!           lazy memoization
//!             error strategy
//!               fallback
//!                 retry
//!                   per-attempt timeout
//!                     operation
//! ```
//!
//! An empty options value takes a fast path that runs the operation
//! directly. Per-module limiters and breakers are created on first use and
//! shared by name.

use super::cache::CacheBackend;
use super::circuit_breaker::CircuitBreakerRegistry;
use super::concurrency::ConcurrencyLimiter;
use super::error_strategy;
use super::keygen::CacheKeyGenerator;
use super::lazy::LazyValue;
use super::rate_limit::RateLimiter;
use super::retry::{execute_with_retry, execute_with_timeout, RetryConfig};
use super::{ErrorStrategy, ModuleCallOptions};
use crate::cvalue::{CType, CValue};
use crate::runtime::error::ExecutionError;
use crate::scheduler::PriorityScheduler;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};
use uuid::Uuid;

/// A re-invocable module operation
pub type ModuleOperation =
    Arc<dyn Fn() -> BoxFuture<'static, Result<CValue, ExecutionError>> + Send + Sync>;

/// Shared policy wiring for module invocations
pub struct OptionsExecutor {
    default_cache: Arc<dyn CacheBackend>,
    named_caches: DashMap<String, Arc<dyn CacheBackend>>,
    breakers: Arc<CircuitBreakerRegistry>,
    rate_limiters: DashMap<String, Arc<RateLimiter>>,
    concurrency_limiters: DashMap<String, Arc<ConcurrencyLimiter>>,
    lazy_cells: DashMap<String, Arc<LazyValue<CValue>>>,
    scheduler: Arc<PriorityScheduler>,
    keygen: CacheKeyGenerator,
}

impl OptionsExecutor {
    pub fn new(
        default_cache: Arc<dyn CacheBackend>,
        breakers: Arc<CircuitBreakerRegistry>,
        scheduler: Arc<PriorityScheduler>,
    ) -> Self {
        OptionsExecutor {
            default_cache,
            named_caches: DashMap::new(),
            breakers,
            rate_limiters: DashMap::new(),
            concurrency_limiters: DashMap::new(),
            lazy_cells: DashMap::new(),
            scheduler,
            keygen: CacheKeyGenerator::new(),
        }
    }

    /// Register a named cache backend selectable via the `cacheBackend`
    /// option
    pub fn register_cache_backend(&self, name: impl Into<String>, backend: Arc<dyn CacheBackend>) {
        self.named_caches.insert(name.into(), backend);
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn scheduler(&self) -> &PriorityScheduler {
        &self.scheduler
    }

    fn cache_for(&self, options: &ModuleCallOptions) -> Arc<dyn CacheBackend> {
        match &options.cache_backend {
            Some(name) => match self.named_caches.get(name) {
                Some(backend) => Arc::clone(&backend),
                None => {
                    warn!(backend = %name, "unknown cache backend, using default");
                    Arc::clone(&self.default_cache)
                }
            },
            None => Arc::clone(&self.default_cache),
        }
    }

    fn rate_limiter_for(&self, module_name: &str, count: u32, per: Duration) -> Arc<RateLimiter> {
        self.rate_limiters
            .entry(module_name.to_string())
            .or_insert_with(|| Arc::new(RateLimiter::new(count, per)))
            .clone()
    }

    fn concurrency_limiter_for(&self, module_name: &str, max: u32) -> Arc<ConcurrencyLimiter> {
        self.concurrency_limiters
            .entry(module_name.to_string())
            .or_insert_with(|| Arc::new(ConcurrencyLimiter::new(max as usize)))
            .clone()
    }

    /// Execute one module invocation with its options applied
    #[instrument(skip_all, fields(module = module_name, node = %module_id))]
    pub async fn execute_with_options(
        &self,
        operation: ModuleOperation,
        module_id: Uuid,
        module_name: &str,
        inputs: &BTreeMap<String, CValue>,
        options: &ModuleCallOptions,
        output_type: &CType,
        caller_fallback: Option<CValue>,
    ) -> Result<CValue, ExecutionError> {
        // Fast path: nothing to compose
        if options.is_empty() && caller_fallback.is_none() {
            return operation().await;
        }

        let inner = self.compose_inner(
            Arc::clone(&operation),
            module_name,
            options,
            output_type,
            caller_fallback,
        );

        // Lazy memoization: the first invocation for a given module and
        // input set computes; every later one reuses the memoized value
        let inner: Arc<dyn Fn() -> BoxFuture<'static, Result<CValue, ExecutionError>> + Send + Sync> =
            if options.lazy == Some(true) {
                let cell_key = format!(
                    "{module_id}:{}",
                    self.keygen.generate(module_name, inputs)
                );
                let cell = self
                    .lazy_cells
                    .entry(cell_key)
                    .or_insert_with(|| Arc::new(LazyValue::new()))
                    .clone();
                Arc::new(move || {
                    let cell = Arc::clone(&cell);
                    let compute = inner();
                    Box::pin(async move { cell.force(|| compute).await })
                })
            } else {
                inner
            };

        // Cache layer: single-flight read-through on the canonical key
        let cached: Arc<dyn Fn() -> BoxFuture<'static, Result<CValue, ExecutionError>> + Send + Sync> =
            match options.cache_ms {
                Some(ttl_ms) => {
                    let backend = self.cache_for(options);
                    let key = self.keygen.generate(module_name, inputs);
                    let ttl = Duration::from_millis(ttl_ms);
                    Arc::new(move || {
                        let backend = Arc::clone(&backend);
                        let key = key.clone();
                        let fut = inner();
                        Box::pin(async move { backend.get_or_compute(&key, ttl, fut).await })
                    })
                }
                None => inner,
            };

        // Concurrency cap
        let limited: Arc<dyn Fn() -> BoxFuture<'static, Result<CValue, ExecutionError>> + Send + Sync> =
            match options.concurrency {
                Some(max) => {
                    let limiter = self.concurrency_limiter_for(module_name, max);
                    Arc::new(move || {
                        let limiter = Arc::clone(&limiter);
                        let fut = cached();
                        Box::pin(async move { limiter.with_permit(|| fut).await })
                    })
                }
                None => cached,
            };

        // Token bucket
        let throttled: Arc<dyn Fn() -> BoxFuture<'static, Result<CValue, ExecutionError>> + Send + Sync> =
            match (options.throttle_count, options.throttle_per_ms) {
                (Some(count), Some(per_ms)) => {
                    let limiter =
                        self.rate_limiter_for(module_name, count, Duration::from_millis(per_ms));
                    Arc::new(move || {
                        let limiter = Arc::clone(&limiter);
                        let fut = limited();
                        Box::pin(async move { limiter.with_rate_limit(|| fut).await })
                    })
                }
                _ => limited,
            };

        // Circuit breaker
        let guarded: BoxFuture<'static, Result<CValue, ExecutionError>> =
            match options.circuit_breaker {
                Some(config) => {
                    let breaker = self.breakers.get_or_create(module_name, config);
                    let fut = throttled();
                    Box::pin(async move { breaker.execute(|| fut).await })
                }
                None => throttled(),
            };

        // Priority submission
        let priority = options.priority.unwrap_or_default();
        self.scheduler.submit(priority, || guarded).await?
    }

    /// Innermost layers: timeout, retry, fallback, error strategy, lazy
    fn compose_inner(
        &self,
        operation: ModuleOperation,
        module_name: &str,
        options: &ModuleCallOptions,
        output_type: &CType,
        caller_fallback: Option<CValue>,
    ) -> Arc<dyn Fn() -> BoxFuture<'static, Result<CValue, ExecutionError>> + Send + Sync> {
        // Per-attempt timeout
        let attempt: ModuleOperation = match options.timeout_ms {
            Some(timeout_ms) => {
                let duration = Duration::from_millis(timeout_ms);
                Arc::new(move || {
                    let fut = operation();
                    Box::pin(async move { execute_with_timeout(fut, duration).await })
                })
            }
            None => operation,
        };

        let retry_config = options.retry.map(|max_retries| RetryConfig {
            max_retries,
            delay: Duration::from_millis(options.delay_ms.unwrap_or(100)),
            backoff: options.backoff.unwrap_or_default(),
            max_delay: Duration::from_millis(options.max_delay_ms.unwrap_or(30_000)),
        });

        let fallback_value = options.fallback.clone().or(caller_fallback);
        let strategy = options.on_error.unwrap_or(ErrorStrategy::Propagate);
        let module_name = module_name.to_string();
        let output_type = output_type.clone();

        let composed: Arc<dyn Fn() -> BoxFuture<'static, Result<CValue, ExecutionError>> + Send + Sync> =
            Arc::new(move || {
                let attempt = Arc::clone(&attempt);
                let fallback_value = fallback_value.clone();
                let module_name = module_name.clone();
                let output_type = output_type.clone();
                Box::pin(async move {
                    let result = match retry_config {
                        Some(config) => {
                            execute_with_retry(|| attempt(), config, None).await
                        }
                        None => attempt().await,
                    };
                    // Fallback substitutes a value; it is never retried
                    let result = match (result, fallback_value) {
                        (Ok(value), _) => Ok(value),
                        (Err(e), Some(value)) => {
                            warn!(module = %module_name, error = %e, "using fallback value");
                            Ok(value)
                        }
                        (Err(e), None) => Err(e),
                    };
                    error_strategy::apply(strategy, &module_name, &output_type, result)
                })
            });

        composed
    }
}
