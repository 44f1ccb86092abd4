//! Data Signatures
//!
//! The result surface of one pipeline run: final status, resolved outputs,
//! the full computed value map, what is still missing, and optional
//! per-node metadata (timings, provenance, blocked nodes).

use crate::cvalue::CValue;
use crate::runtime::state::ModuleStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Final status of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureStatus {
    Completed,
    Suspended,
    /// Blocked on missing inputs with no suspension store configured
    Partial,
    Failed,
    Cancelled,
    TimedOut,
}

/// How a data node obtained its value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionSource {
    /// Provided as a run input
    ProvidedInput,
    /// Computed by a module or inline transform
    Computed,
    /// Provided on resume as an additional input
    ResumedInput,
    /// Explicitly resolved by the resuming caller
    ManuallyResolved,
}

/// Wall-clock bracket of one module invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTiming {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub latency_ms: u64,
}

/// Optional run metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Per-module timings, keyed by module node id
    pub node_timings: BTreeMap<Uuid, NodeTiming>,
    /// How each named data node was resolved
    pub provenance: BTreeMap<String, ResolutionSource>,
    /// Data node names blocked when the run stopped early
    pub blocked_nodes: BTreeSet<String>,
    /// Final module statuses, keyed by module node id
    pub module_statuses: BTreeMap<Uuid, ModuleStatus>,
}

/// The outcome of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSignature {
    pub execution_id: Uuid,
    pub structural_hash: String,
    pub status: SignatureStatus,
    pub resumption_count: u32,
    /// Declared outputs that resolved, keyed by name
    pub outputs: BTreeMap<String, CValue>,
    /// Every computed data node, keyed by node id
    pub computed_nodes: BTreeMap<Uuid, CValue>,
    /// Declared inputs that were never provided
    pub missing_inputs: BTreeSet<String>,
    /// Declared outputs that did not resolve
    pub pending_outputs: BTreeSet<String>,
    /// Names of data nodes whose producers failed
    pub failed_nodes: BTreeSet<String>,
    /// Inputs the run started with (including resumed additions)
    pub all_inputs: BTreeMap<String, CValue>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Handle of the stored snapshot when the run suspended
    pub suspension_handle: Option<String>,
    pub metadata: Option<RunMetadata>,
}

impl DataSignature {
    /// Convenience accessor for a named output
    pub fn output(&self, name: &str) -> Option<&CValue> {
        self.outputs.get(name)
    }

    pub fn is_completed(&self) -> bool {
        self.status == SignatureStatus::Completed
    }
}
