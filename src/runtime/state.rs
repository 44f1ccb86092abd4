//! Runtime Execution State
//!
//! Mutable per-run state: completed data-node values and per-module status.
//! The executor loop is the single writer; module tasks observe immutable
//! snapshots of their input values, which gives the happens-before edge
//! between a producer's completion and its consumers' starts.

use crate::cvalue::CValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Lifecycle of one module node within a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModuleStatus {
    /// Waiting for its inputs
    Pending,
    /// Spawned; unix milliseconds of the start
    Running { started_at_ms: i64 },
    /// Completed successfully
    Fired {
        latency_ms: u64,
        /// Output ports written
        outputs: Vec<String>,
    },
    /// Completed with an error
    Failed { error: String },
    /// Never ran (upstream failure or cancellation)
    Skipped,
}

impl ModuleStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ModuleStatus::Fired { .. } | ModuleStatus::Failed { .. } | ModuleStatus::Skipped
        )
    }
}

/// Per-run value map and module statuses
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunState {
    /// Completed data-node values
    pub data: HashMap<Uuid, CValue>,
    pub module_status: HashMap<Uuid, ModuleStatus>,
}

impl RunState {
    pub fn new() -> Self {
        RunState {
            data: HashMap::new(),
            module_status: HashMap::new(),
        }
    }

    /// All of the listed nodes have values
    pub fn has_all(&self, nodes: impl IntoIterator<Item = Uuid>) -> bool {
        nodes.into_iter().all(|id| self.data.contains_key(&id))
    }
}
