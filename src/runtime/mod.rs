//! # Pipeline Runtime
//!
//! Everything that happens after compilation: the concurrent DAG executor,
//! per-run state and cancellation, suspension/resumption, the module
//! implementation contract, and the process lifecycle.
//!
//! ```text
//! PipelineImage + inputs
//!     |
//! [DagExecutor]  -- OptionsExecutor (policies), ModuleRegistry
//!     |               CancellableExecution, ConstellationLifecycle
//!     v
//! DataSignature  (outputs, statuses, timings, provenance)
//! ```

pub mod cancellation;
pub mod error;
pub mod eval;
pub mod executor;
pub mod lifecycle;
pub mod module;
pub mod signature;
pub mod state;
pub mod suspension;

pub use cancellation::{CancellableExecution, RunStatus};
pub use error::ExecutionError;
pub use executor::{DagExecutor, ExecutorConfig, RunningExecution};
pub use lifecycle::{ConstellationLifecycle, LifecycleState};
pub use module::{FnModule, HigherOrderKind, Module, ModuleOutput, ModuleRegistry};
pub use signature::{
    DataSignature, NodeTiming, ResolutionSource, RunMetadata, SignatureStatus,
};
pub use state::{ModuleStatus, RunState};
pub use suspension::{
    InMemorySuspensionStore, SuspendedExecution, SuspensionFilter, SuspensionStore,
    SuspensionSummary,
};
