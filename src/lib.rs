//! # Constellation Engine
//!
//! A typed dataflow pipeline platform: programs declare typed inputs,
//! intermediate bindings computed by named modules, and named outputs. The
//! engine compiles a program to a typed intermediate representation and
//! executes it as a concurrent DAG with per-module execution policies and
//! cooperative cancellation.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! Program (AST)
//!     ↓
//! [Type Checker]          → TypedPipeline (bidirectional, row-polymorphic)
//!     ↓
//! [IR Builder]            → DagSpec (data nodes, module nodes, edges)
//!     ↓
//! [Content Hashing]       → PipelineImage (structural + syntactic hash)
//!     ↓
//! [Pipeline Store]        → alias or sha256:<hash> reference
//!     ↓
//! [DAG Executor]          → DataSignature (outputs + metadata)
//!          ↑ policies: retry, timeout, fallback, cache, throttle,
//!            concurrency, circuit breaker, priority, error strategy
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use constellation::ast::builders::*;
//! use constellation::cvalue::CValue;
//! use constellation::{Engine, EngineConfig};
//! use std::collections::BTreeMap;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let engine = Engine::with_defaults(EngineConfig::default());
//!
//! // in x: String
//! // out x
//! let program = program().input("x", named("String")).output("x").build();
//! let image = engine.compile(&program).expect("compiles");
//!
//! let inputs: BTreeMap<String, CValue> =
//!     [("x".to_string(), CValue::CString("hello".into()))].into_iter().collect();
//! let signature = engine.run_image(&image, inputs).await.expect("runs");
//! assert_eq!(
//!     signature.output("x"),
//!     Some(&CValue::CString("hello".into()))
//! );
//! # }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `ast` | Syntactic program AST + builders (parser lives elsewhere) |
//! | `types` | Semantic types, subtyping, row polymorphism |
//! | `registry` | Function signatures, namespaces, instantiation |
//! | `checker` | Bidirectional type checker → TypedPipeline |
//! | `ir` | DAG spec, IR builder, content hashing, pipeline images |
//! | `cvalue` | Runtime values/types + streaming JSON bridge |
//! | `policy` | Cache, rate limit, concurrency, breaker, retry, options |
//! | `runtime` | DAG executor, cancellation, suspension, lifecycle |
//! | `store` | Content-addressed pipeline store with aliases |
//! | `scheduler` | Bounded priority scheduler with aging |
//! | `config` | Figment-layered engine configuration |
//! | `context` | Injected bundle of process-wide resources |
//! | `engine` | Facade: compile / run / resume / shutdown |

pub mod ast;
pub mod checker;
pub mod config;
pub mod context;
pub mod cvalue;
pub mod engine;
pub mod ir;
pub mod policy;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod store;
pub mod types;

// Re-export the surface most embedders need
pub use checker::{CompileError, TypeChecker, TypedPipeline, Warning};
pub use config::EngineConfig;
pub use context::{EngineContext, EngineContextBuilder};
pub use cvalue::{CType, CValue, JsonLimits};
pub use engine::Engine;
pub use ir::{DagSpec, IrBuilder, PipelineImage};
pub use policy::{BackoffStrategy, ErrorStrategy, ModuleCallOptions, PriorityLevel};
pub use registry::{FunctionRegistry, FunctionSignature};
pub use runtime::{
    DataSignature, ExecutionError, FnModule, HigherOrderKind, Module, ModuleOutput,
    ModuleRegistry, SignatureStatus,
};
pub use store::PipelineStore;
pub use types::SemanticType;
