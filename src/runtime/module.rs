//! Module Implementation Contract
//!
//! A module declares its port maps and an async `run` effect. The runtime
//! invokes modules through the options executor; modules must be
//! deterministic with respect to their inputs only when caching is enabled
//! for them.
//!
//! The registry also tracks which module names the runtime recognizes as
//! higher-order targets and how to apply their lambda arguments natively.

use crate::cvalue::CValue;
use crate::runtime::error::ExecutionError;
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use std::collections::BTreeMap;
use std::sync::Arc;

/// What a module produced
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleOutput {
    /// One value, written to the module's single `out` port
    Single(CValue),
    /// Explicit per-port values
    Ports(BTreeMap<String, CValue>),
}

/// An executable module implementation
#[async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, inputs: BTreeMap<String, CValue>) -> Result<ModuleOutput, ExecutionError>;
}

/// How the runtime applies a recognized higher-order module's lambda
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HigherOrderKind {
    /// Apply the lambda to each element of the list argument
    Map,
    /// Keep the elements for which the lambda yields true
    Filter,
}

type ModuleFn = Arc<
    dyn Fn(BTreeMap<String, CValue>) -> BoxFuture<'static, Result<ModuleOutput, ExecutionError>>
        + Send
        + Sync,
>;

/// A module built from a closure; the common way embedders and tests
/// register implementations
pub struct FnModule {
    name: String,
    f: ModuleFn,
}

impl FnModule {
    /// Async module from a future-returning closure
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(BTreeMap<String, CValue>) -> BoxFuture<'static, Result<ModuleOutput, ExecutionError>>
            + Send
            + Sync
            + 'static,
    {
        FnModule {
            name: name.into(),
            f: Arc::new(f),
        }
    }

    /// Synchronous single-output module from a plain closure
    pub fn from_sync<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(BTreeMap<String, CValue>) -> Result<CValue, ExecutionError>
            + Send
            + Sync
            + 'static,
    {
        let f = Arc::new(f);
        FnModule::new(name, move |inputs| {
            let f = Arc::clone(&f);
            Box::pin(async move { f(inputs).map(ModuleOutput::Single) })
        })
    }
}

#[async_trait]
impl Module for FnModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, inputs: BTreeMap<String, CValue>) -> Result<ModuleOutput, ExecutionError> {
        (self.f)(inputs).await
    }
}

/// Concurrent registry of module implementations
#[derive(Default)]
pub struct ModuleRegistry {
    modules: DashMap<String, Arc<dyn Module>>,
    higher_order: DashMap<String, HigherOrderKind>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        ModuleRegistry {
            modules: DashMap::new(),
            higher_order: DashMap::new(),
        }
    }

    pub fn register(&self, module: Arc<dyn Module>) {
        self.modules.insert(module.name().to_string(), module);
    }

    /// Mark a module name as a native higher-order target
    pub fn register_higher_order(&self, name: impl Into<String>, kind: HigherOrderKind) {
        self.higher_order.insert(name.into(), kind);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.modules.get(name).map(|m| Arc::clone(&m))
    }

    pub fn higher_order_kind(&self, name: &str) -> Option<HigherOrderKind> {
        self.higher_order.get(name).map(|k| *k)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fn_module_runs_sync_closures() {
        let module = FnModule::from_sync("Double", |inputs| {
            let n = inputs
                .get("arg0")
                .and_then(CValue::as_int)
                .ok_or_else(|| ExecutionError::InvalidInput {
                    message: "arg0 must be an int".into(),
                })?;
            Ok(CValue::CInt(n * 2))
        });

        let output = module
            .run([("arg0".to_string(), CValue::CInt(21))].into_iter().collect())
            .await
            .expect("run");
        assert_eq!(output, ModuleOutput::Single(CValue::CInt(42)));
    }

    #[test]
    fn registry_round_trip() {
        let registry = ModuleRegistry::new();
        registry.register(Arc::new(FnModule::from_sync("M", |_| {
            Ok(CValue::CBoolean(true))
        })));
        assert!(registry.get("M").is_some());
        assert!(registry.get("missing").is_none());

        registry.register_higher_order("map", HigherOrderKind::Map);
        assert_eq!(
            registry.higher_order_kind("map"),
            Some(HigherOrderKind::Map)
        );
        assert_eq!(registry.higher_order_kind("M"), None);
    }
}
