//! Runtime Error Taxonomy
//!
//! Errors produced while executing a pipeline: policy failures (retry
//! exhaustion, timeouts, open circuits, full queues), evaluation failures,
//! and run-surface failures. Exact variant names are part of the crate's
//! test contract.

use std::time::Duration;
use uuid::Uuid;

/// A runtime failure
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    #[error("node {id} not found ({context})")]
    NodeNotFound { id: Uuid, context: String },

    #[error("lambda parameter '{name}' is not bound")]
    LambdaParameterNotBound { name: String },

    #[error("module timed out after {duration:?}")]
    ModuleTimeout { duration: Duration },

    #[error("retries exhausted after {total_attempts} attempts: {}", errors.join("; "))]
    RetryExhausted {
        total_attempts: u32,
        errors: Vec<String>,
    },

    #[error("circuit breaker for '{module_name}' is open")]
    CircuitOpen { module_name: String },

    #[error("scheduler queue is full ({current_size}/{max_size})")]
    QueueFull {
        current_size: usize,
        max_size: usize,
    },

    #[error("no suspension store is configured")]
    NoSuspensionStore,

    #[error("suspension '{handle}' not found")]
    SuspensionNotFound { handle: String },

    #[error("module '{module_name}' failed: {message}")]
    ModuleFailed {
        module_name: String,
        message: String,
    },

    #[error("module '{module_name}' is not registered")]
    ModuleNotRegistered { module_name: String },

    #[error("pipeline '{reference}' not found")]
    PipelineNotFound { reference: String },

    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error("evaluation error: {message}")]
    Eval { message: String },

    #[error("execution was cancelled")]
    Cancelled,

    #[error("run timed out after {duration:?}")]
    RunTimeout { duration: Duration },

    #[error("runtime is {state} and not accepting new executions")]
    NotAcceptingRuns { state: String },

    #[error("scheduler has shut down")]
    SchedulerShutdown,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ExecutionError {
    /// Timeouts and transient module failures are retriable; programming
    /// errors and terminal states are not
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ExecutionError::ModuleTimeout { .. } | ExecutionError::ModuleFailed { .. }
        )
    }
}
