//! Module Result Cache
//!
//! Provides caching for module invocation results keyed by canonical input
//! keys (see [`super::keygen`]).
//!
//! ## Design
//!
//! The in-memory backend uses least-recently-used eviction with a
//! configurable size limit. Entries carry a TTL; expired entries are pruned
//! lazily on read. `get_or_compute` single-flights concurrent computations
//! per key: exactly one caller runs the computation while the others await
//! its result.
//!
//! Distributed backends implement the same [`CacheBackend`] contract and
//! move values through a [`CacheSerde`]; a deserialization failure is
//! treated as a miss and the corrupt entry is deleted.

use crate::cvalue::CValue;
use crate::runtime::error::ExecutionError;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::warn;

/// A cached value with its expiry bookkeeping
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: CValue,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl CacheEntry {
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Cache observability counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub max_size: Option<usize>,
}

/// Storage contract for module result caches
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Option<CacheEntry>;

    async fn set(&self, key: &str, value: CValue, ttl: Duration);

    /// Returns true when the key existed
    async fn delete(&self, key: &str) -> bool;

    async fn clear(&self);

    fn stats(&self) -> CacheStats;

    /// Read-through: get, or compute then store. Backends may override to
    /// single-flight concurrent computations of the same key.
    async fn get_or_compute(
        &self,
        key: &str,
        ttl: Duration,
        compute: BoxFuture<'static, Result<CValue, ExecutionError>>,
    ) -> Result<CValue, ExecutionError> {
        if let Some(entry) = self.get(key).await {
            return Ok(entry.value);
        }
        let value = compute.await?;
        self.set(key, value.clone(), ttl).await;
        Ok(value)
    }
}

/// Value codec used by backends that serialize entries
pub trait CacheSerde: Send + Sync {
    fn serialize(&self, value: &CValue) -> Result<Vec<u8>, String>;
    fn deserialize(&self, bytes: &[u8]) -> Result<CValue, String>;
}

/// Bincode codec; the default for binary backends
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeSerde;

impl CacheSerde for BincodeSerde {
    fn serialize(&self, value: &CValue) -> Result<Vec<u8>, String> {
        bincode::serialize(value).map_err(|e| e.to_string())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<CValue, String> {
        bincode::deserialize(bytes).map_err(|e| e.to_string())
    }
}

struct StoredEntry {
    entry: CacheEntry,
    last_used: u64,
}

#[derive(Default)]
struct LruState {
    entries: HashMap<String, StoredEntry>,
    use_counter: u64,
}

type ComputeSlot = watch::Receiver<Option<Result<CValue, ExecutionError>>>;

/// In-memory LRU cache with TTL
pub struct InMemoryCache {
    state: Mutex<LruState>,
    max_size: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    /// Single-flight coordination per key
    in_flight: Mutex<HashMap<String, ComputeSlot>>,
}

impl InMemoryCache {
    pub fn new(max_size: usize) -> Self {
        InMemoryCache {
            state: Mutex::new(LruState::default()),
            max_size: max_size.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            in_flight: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        InMemoryCache::new(1024)
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut state = self.state.lock();
        state.use_counter += 1;
        let counter = state.use_counter;
        match state.entries.get_mut(key) {
            Some(stored) if !stored.entry.is_expired() => {
                stored.last_used = counter;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(stored.entry.clone())
            }
            Some(_) => {
                // Lazy expiry pruning
                state.entries.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: CValue, ttl: Duration) {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.use_counter += 1;
        let counter = state.use_counter;

        if !state.entries.contains_key(key) && state.entries.len() >= self.max_size {
            // Evict the least-recently-used entry
            if let Some(victim) = state
                .entries
                .iter()
                .min_by_key(|(_, stored)| stored.last_used)
                .map(|(k, _)| k.clone())
            {
                state.entries.remove(&victim);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        state.entries.insert(
            key.to_string(),
            StoredEntry {
                entry: CacheEntry {
                    value,
                    created_at: now,
                    expires_at: now + ttl,
                },
                last_used: counter,
            },
        );
    }

    async fn delete(&self, key: &str) -> bool {
        self.state.lock().entries.remove(key).is_some()
    }

    async fn clear(&self) {
        self.state.lock().entries.clear();
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.state.lock().entries.len(),
            max_size: Some(self.max_size),
        }
    }

    /// Single-flight read-through: one concurrent caller computes, the rest
    /// await the shared slot
    async fn get_or_compute(
        &self,
        key: &str,
        ttl: Duration,
        compute: BoxFuture<'static, Result<CValue, ExecutionError>>,
    ) -> Result<CValue, ExecutionError> {
        if let Some(entry) = self.get(key).await {
            return Ok(entry.value);
        }

        let (leader_tx, follower_rx) = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(key) {
                Some(rx) => (None, Some(rx.clone())),
                None => {
                    let (tx, rx) = watch::channel(None);
                    in_flight.insert(key.to_string(), rx);
                    (Some(tx), None)
                }
            }
        };

        if let Some(mut rx) = follower_rx {
            loop {
                let settled = rx.borrow().clone();
                if let Some(result) = settled {
                    return result;
                }
                if rx.changed().await.is_err() {
                    // Leader dropped without settling; retry from scratch
                    warn!(key, "in-flight cache computation vanished, recomputing");
                    return self.get(key).await.map(|e| e.value).ok_or(
                        ExecutionError::Internal("cache computation abandoned".to_string()),
                    );
                }
            }
        }

        let tx = leader_tx.unwrap_or_else(|| unreachable!("leader path always has a sender"));
        let result = compute.await;
        if let Ok(value) = &result {
            self.set(key, value.clone(), ttl).await;
        }
        self.in_flight.lock().remove(key);
        let _ = tx.send(Some(result.clone()));
        result
    }
}
