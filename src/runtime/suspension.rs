//! Suspension and Resumption
//!
//! When a run has no ready module and required inputs are missing, the
//! executor snapshots its state into a [`SuspendedExecution`] and hands it
//! to the configured [`SuspensionStore`]. A later resume rehydrates the
//! state, merges the new inputs, bumps the resumption count, and re-enters
//! the loop.
//!
//! The in-memory store supports optional TTL eviction (swept lazily on
//! access) and optional codec validation: snapshots are round-tripped
//! through bincode on save so a corrupt value surfaces immediately instead
//! of at resume time.

use crate::cvalue::CValue;
use crate::ir::DagSpec;
use crate::runtime::error::ExecutionError;
use crate::runtime::state::ModuleStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use uuid::Uuid;

/// A persisted snapshot of one blocked execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspendedExecution {
    pub execution_id: Uuid,
    pub structural_hash: String,
    /// Incremented on every resume
    pub resumption_count: u32,
    pub dag: DagSpec,
    pub provided_inputs: BTreeMap<String, CValue>,
    /// Completed data-node values at suspension time
    pub computed_values: HashMap<Uuid, CValue>,
    pub module_statuses: HashMap<Uuid, ModuleStatus>,
    pub suspended_at: DateTime<Utc>,
}

/// Listing entry for stored suspensions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspensionSummary {
    pub handle: String,
    pub execution_id: Uuid,
    pub structural_hash: String,
    pub resumption_count: u32,
    pub suspended_at: DateTime<Utc>,
}

/// Listing filter; empty matches everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuspensionFilter {
    /// Match only suspensions of this pipeline
    pub structural_hash: Option<String>,
}

/// Persistence contract for suspended executions
#[async_trait]
pub trait SuspensionStore: Send + Sync {
    /// Persist a snapshot; returns its handle
    async fn save(&self, suspended: SuspendedExecution) -> Result<String, ExecutionError>;

    async fn load(&self, handle: &str) -> Result<Option<SuspendedExecution>, ExecutionError>;

    /// Returns true when the handle existed
    async fn delete(&self, handle: &str) -> Result<bool, ExecutionError>;

    async fn list(&self, filter: &SuspensionFilter) -> Result<Vec<SuspensionSummary>, ExecutionError>;
}

struct StoredSuspension {
    suspended: SuspendedExecution,
    stored_at: std::time::Instant,
}

/// In-memory store with optional TTL and codec validation
pub struct InMemorySuspensionStore {
    entries: DashMap<String, StoredSuspension>,
    ttl: Option<Duration>,
    validate_codec: bool,
}

impl InMemorySuspensionStore {
    pub fn new() -> Self {
        InMemorySuspensionStore {
            entries: DashMap::new(),
            ttl: None,
            validate_codec: false,
        }
    }

    /// Entries older than `ttl` are evicted lazily on access
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Round-trip snapshots through bincode on save
    pub fn with_codec_validation(mut self) -> Self {
        self.validate_codec = true;
        self
    }

    fn sweep(&self) {
        if let Some(ttl) = self.ttl {
            self.entries
                .retain(|_, stored| stored.stored_at.elapsed() < ttl);
        }
    }

    pub fn len(&self) -> usize {
        self.sweep();
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemorySuspensionStore {
    fn default() -> Self {
        InMemorySuspensionStore::new()
    }
}

#[async_trait]
impl SuspensionStore for InMemorySuspensionStore {
    async fn save(&self, suspended: SuspendedExecution) -> Result<String, ExecutionError> {
        self.sweep();
        if self.validate_codec {
            let bytes = bincode::serialize(&suspended).map_err(|e| {
                ExecutionError::Internal(format!("suspension serialization failed: {e}"))
            })?;
            let _: SuspendedExecution = bincode::deserialize(&bytes).map_err(|e| {
                ExecutionError::Internal(format!("suspension round-trip failed: {e}"))
            })?;
        }
        let handle = format!("susp-{}", suspended.execution_id);
        self.entries.insert(
            handle.clone(),
            StoredSuspension {
                suspended,
                stored_at: std::time::Instant::now(),
            },
        );
        Ok(handle)
    }

    async fn load(&self, handle: &str) -> Result<Option<SuspendedExecution>, ExecutionError> {
        self.sweep();
        Ok(self
            .entries
            .get(handle)
            .map(|stored| stored.suspended.clone()))
    }

    async fn delete(&self, handle: &str) -> Result<bool, ExecutionError> {
        Ok(self.entries.remove(handle).is_some())
    }

    async fn list(
        &self,
        filter: &SuspensionFilter,
    ) -> Result<Vec<SuspensionSummary>, ExecutionError> {
        self.sweep();
        let mut summaries: Vec<SuspensionSummary> = self
            .entries
            .iter()
            .filter(|entry| {
                filter
                    .structural_hash
                    .as_ref()
                    .is_none_or(|hash| &entry.suspended.structural_hash == hash)
            })
            .map(|entry| SuspensionSummary {
                handle: entry.key().clone(),
                execution_id: entry.suspended.execution_id,
                structural_hash: entry.suspended.structural_hash.clone(),
                resumption_count: entry.suspended.resumption_count,
                suspended_at: entry.suspended.suspended_at,
            })
            .collect();
        summaries.sort_by(|a, b| a.suspended_at.cmp(&b.suspended_at));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> SuspendedExecution {
        SuspendedExecution {
            execution_id: Uuid::new_v4(),
            structural_hash: "abc".into(),
            resumption_count: 0,
            dag: DagSpec::default(),
            provided_inputs: BTreeMap::new(),
            computed_values: HashMap::new(),
            module_statuses: HashMap::new(),
            suspended_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn save_load_delete_round_trip() {
        let store = InMemorySuspensionStore::new();
        let suspended = snapshot();
        let id = suspended.execution_id;
        let handle = store.save(suspended).await.expect("save");

        let loaded = store.load(&handle).await.expect("load").expect("present");
        assert_eq!(loaded.execution_id, id);

        assert!(store.delete(&handle).await.expect("delete"));
        assert!(store.load(&handle).await.expect("load").is_none());
        assert!(!store.delete(&handle).await.expect("second delete"));
    }

    #[tokio::test]
    async fn codec_validation_round_trips_snapshots() {
        let store = InMemorySuspensionStore::new().with_codec_validation();
        let handle = store.save(snapshot()).await.expect("validated save");
        assert!(store.load(&handle).await.expect("load").is_some());
    }

    #[tokio::test]
    async fn ttl_evicts_old_entries() {
        let store = InMemorySuspensionStore::new().with_ttl(Duration::from_millis(10));
        let handle = store.save(snapshot()).await.expect("save");
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(store.load(&handle).await.expect("load").is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn list_filters_by_structural_hash() {
        let store = InMemorySuspensionStore::new();
        let mut a = snapshot();
        a.structural_hash = "hash-a".into();
        let mut b = snapshot();
        b.structural_hash = "hash-b".into();
        store.save(a).await.expect("save a");
        store.save(b).await.expect("save b");

        let all = store
            .list(&SuspensionFilter::default())
            .await
            .expect("list");
        assert_eq!(all.len(), 2);

        let filtered = store
            .list(&SuspensionFilter {
                structural_hash: Some("hash-a".into()),
            })
            .await
            .expect("list filtered");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].structural_hash, "hash-a");
    }
}
