//! Engine Context
//!
//! All process-wide resources - registries, stores, scheduler, lifecycle -
//! bundled into one injected object built by [`EngineContextBuilder`].
//! Nothing in the crate reaches for hidden globals; constructors receive
//! the context explicitly.

use crate::config::{EngineConfig, SchedulerMode};
use crate::policy::cache::{CacheBackend, InMemoryCache};
use crate::policy::circuit_breaker::CircuitBreakerRegistry;
use crate::policy::options::OptionsExecutor;
use crate::registry::FunctionRegistry;
use crate::runtime::lifecycle::ConstellationLifecycle;
use crate::runtime::module::ModuleRegistry;
use crate::runtime::suspension::{InMemorySuspensionStore, SuspensionStore};
use crate::scheduler::{BoundedSchedulerConfig, PriorityScheduler};
use crate::store::PipelineStore;
use std::sync::Arc;
use std::time::Duration;

/// Shared resources for one engine instance
#[derive(Clone)]
pub struct EngineContext {
    pub functions: Arc<FunctionRegistry>,
    pub modules: Arc<ModuleRegistry>,
    pub pipelines: Arc<PipelineStore>,
    pub suspension_store: Option<Arc<dyn SuspensionStore>>,
    pub lifecycle: Arc<ConstellationLifecycle>,
    pub scheduler: Arc<PriorityScheduler>,
    pub options_executor: Arc<OptionsExecutor>,
}

impl EngineContext {
    /// Builder seeded with in-memory defaults
    pub fn builder() -> EngineContextBuilder {
        EngineContextBuilder::new()
    }

    /// Context with every default, shaped by the config
    pub fn with_defaults(config: &EngineConfig) -> Self {
        EngineContextBuilder::new().build(config)
    }
}

/// Step-by-step construction of an [`EngineContext`]
#[derive(Default)]
pub struct EngineContextBuilder {
    functions: Option<Arc<FunctionRegistry>>,
    modules: Option<Arc<ModuleRegistry>>,
    pipelines: Option<Arc<PipelineStore>>,
    suspension_store: Option<Arc<dyn SuspensionStore>>,
    default_cache: Option<Arc<dyn CacheBackend>>,
    named_caches: Vec<(String, Arc<dyn CacheBackend>)>,
    disable_suspension: bool,
}

impl EngineContextBuilder {
    pub fn new() -> Self {
        EngineContextBuilder::default()
    }

    pub fn functions(mut self, functions: Arc<FunctionRegistry>) -> Self {
        self.functions = Some(functions);
        self
    }

    pub fn modules(mut self, modules: Arc<ModuleRegistry>) -> Self {
        self.modules = Some(modules);
        self
    }

    pub fn pipelines(mut self, pipelines: Arc<PipelineStore>) -> Self {
        self.pipelines = Some(pipelines);
        self
    }

    pub fn suspension_store(mut self, store: Arc<dyn SuspensionStore>) -> Self {
        self.suspension_store = Some(store);
        self
    }

    /// No suspension support even if the config enables it
    pub fn without_suspension(mut self) -> Self {
        self.disable_suspension = true;
        self
    }

    pub fn default_cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.default_cache = Some(cache);
        self
    }

    /// Additional backend selectable via the `cacheBackend` call option
    pub fn named_cache(mut self, name: impl Into<String>, cache: Arc<dyn CacheBackend>) -> Self {
        self.named_caches.push((name.into(), cache));
        self
    }

    pub fn build(self, config: &EngineConfig) -> EngineContext {
        let scheduler = Arc::new(match config.scheduler.mode {
            SchedulerMode::Unbounded => PriorityScheduler::unbounded(),
            SchedulerMode::Bounded => PriorityScheduler::bounded(BoundedSchedulerConfig {
                max_concurrency: config.scheduler.max_concurrency,
                max_queue_size: config.scheduler.max_queue_size,
                aging_interval: Duration::from_millis(config.scheduler.aging_interval_ms),
                boost_per_interval: config.scheduler.boost_per_interval,
            }),
        });

        let default_cache = self
            .default_cache
            .unwrap_or_else(|| Arc::new(InMemoryCache::new(config.cache.max_entries)));
        let options_executor = Arc::new(OptionsExecutor::new(
            default_cache,
            Arc::new(CircuitBreakerRegistry::new()),
            Arc::clone(&scheduler),
        ));
        for (name, cache) in self.named_caches {
            options_executor.register_cache_backend(name, cache);
        }

        let suspension_store = if self.disable_suspension {
            None
        } else {
            self.suspension_store.or_else(|| {
                config.suspension.enabled.then(|| {
                    let mut store = InMemorySuspensionStore::new();
                    if let Some(ttl_ms) = config.suspension.ttl_ms {
                        store = store.with_ttl(Duration::from_millis(ttl_ms));
                    }
                    if config.suspension.validate_codec {
                        store = store.with_codec_validation();
                    }
                    Arc::new(store) as Arc<dyn SuspensionStore>
                })
            })
        };

        EngineContext {
            functions: self.functions.unwrap_or_else(|| Arc::new(FunctionRegistry::new())),
            modules: self.modules.unwrap_or_else(|| Arc::new(ModuleRegistry::new())),
            pipelines: self.pipelines.unwrap_or_else(|| Arc::new(PipelineStore::new())),
            suspension_store,
            lifecycle: Arc::new(ConstellationLifecycle::new()),
            scheduler,
            options_executor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn defaults_build_a_working_context() {
        let config = EngineConfig::default();
        let context = EngineContext::with_defaults(&config);
        assert!(context.functions.is_empty());
        assert!(context.modules.is_empty());
        assert!(context.suspension_store.is_some());
    }

    #[tokio::test]
    async fn suspension_can_be_disabled() {
        let config = EngineConfig::default();
        let context = EngineContext::builder().without_suspension().build(&config);
        assert!(context.suspension_store.is_none());
    }
}
