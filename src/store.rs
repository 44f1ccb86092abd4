//! # Pipeline Store
//!
//! Content-addressed storage of compiled [`PipelineImage`]s keyed by
//! structural hash, plus human-friendly aliases. References at the run
//! surface are either a bare alias (`scoring`) or an explicit hash
//! (`sha256:3f2a...`).

use crate::ir::PipelineImage;
use dashmap::DashMap;
use std::sync::Arc;

/// Prefix of explicit hash references
const HASH_PREFIX: &str = "sha256:";

/// A parsed pipeline reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineReference {
    Alias(String),
    Hash(String),
}

impl PipelineReference {
    /// Parse `name` or `sha256:<hex>`
    pub fn parse(reference: &str) -> Self {
        match reference.strip_prefix(HASH_PREFIX) {
            Some(hash) => PipelineReference::Hash(hash.to_string()),
            None => PipelineReference::Alias(reference.to_string()),
        }
    }
}

/// In-memory image store with alias resolution
#[derive(Default)]
pub struct PipelineStore {
    images: DashMap<String, Arc<PipelineImage>>,
    aliases: DashMap<String, String>,
}

impl PipelineStore {
    pub fn new() -> Self {
        PipelineStore {
            images: DashMap::new(),
            aliases: DashMap::new(),
        }
    }

    /// Store an image under its structural hash; idempotent
    pub fn store(&self, image: PipelineImage) -> Arc<PipelineImage> {
        let hash = image.structural_hash.clone();
        self.images
            .entry(hash)
            .or_insert_with(|| Arc::new(image))
            .clone()
    }

    pub fn get(&self, hash: &str) -> Option<Arc<PipelineImage>> {
        self.images.get(hash).map(|image| Arc::clone(&image))
    }

    /// Remove an image; aliases pointing at it are removed too
    pub fn remove(&self, hash: &str) -> bool {
        let removed = self.images.remove(hash).is_some();
        if removed {
            self.aliases.retain(|_, target| target != hash);
        }
        removed
    }

    /// Point a name at a stored hash; re-aliasing moves the name
    pub fn alias(&self, name: impl Into<String>, hash: impl Into<String>) {
        self.aliases.insert(name.into(), hash.into());
    }

    pub fn resolve(&self, name: &str) -> Option<String> {
        self.aliases.get(name).map(|hash| hash.clone())
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<PipelineImage>> {
        self.resolve(name).and_then(|hash| self.get(&hash))
    }

    /// Resolve a reference string of either form
    pub fn get_by_reference(&self, reference: &str) -> Option<Arc<PipelineImage>> {
        match PipelineReference::parse(reference) {
            PipelineReference::Hash(hash) => self.get(&hash),
            PipelineReference::Alias(name) => self.get_by_name(&name),
        }
    }

    /// All stored hashes
    pub fn list_images(&self) -> Vec<String> {
        let mut hashes: Vec<String> = self.images.iter().map(|e| e.key().clone()).collect();
        hashes.sort();
        hashes
    }

    /// All `(alias, hash)` pairs
    pub fn list_aliases(&self) -> Vec<(String, String)> {
        let mut aliases: Vec<(String, String)> = self
            .aliases
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        aliases.sort();
        aliases
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::DagSpec;

    fn image(hash: &str) -> PipelineImage {
        PipelineImage {
            structural_hash: hash.to_string(),
            syntactic_hash: format!("{hash}-syn"),
            dag: DagSpec::default(),
            compiled_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn store_and_resolve_by_hash_reference() {
        let store = PipelineStore::new();
        store.store(image("abc123"));
        assert!(store.get_by_reference("sha256:abc123").is_some());
        assert!(store.get_by_reference("sha256:zzz").is_none());
    }

    #[test]
    fn alias_resolution() {
        let store = PipelineStore::new();
        store.store(image("abc123"));
        store.alias("scoring", "abc123");

        assert_eq!(store.resolve("scoring").as_deref(), Some("abc123"));
        assert!(store.get_by_name("scoring").is_some());
        assert!(store.get_by_reference("scoring").is_some());
        assert!(store.get_by_reference("other").is_none());
    }

    #[test]
    fn remove_drops_dangling_aliases() {
        let store = PipelineStore::new();
        store.store(image("abc123"));
        store.alias("scoring", "abc123");
        assert!(store.remove("abc123"));
        assert!(store.resolve("scoring").is_none());
        assert!(!store.remove("abc123"));
    }

    #[test]
    fn listing_is_sorted() {
        let store = PipelineStore::new();
        store.store(image("bbb"));
        store.store(image("aaa"));
        store.alias("z", "bbb");
        store.alias("a", "aaa");
        assert_eq!(store.list_images(), vec!["aaa", "bbb"]);
        assert_eq!(
            store.list_aliases(),
            vec![
                ("a".to_string(), "aaa".to_string()),
                ("z".to_string(), "bbb".to_string())
            ]
        );
    }

    #[test]
    fn reference_parsing() {
        assert_eq!(
            PipelineReference::parse("sha256:ff00"),
            PipelineReference::Hash("ff00".to_string())
        );
        assert_eq!(
            PipelineReference::parse("my-pipeline"),
            PipelineReference::Alias("my-pipeline".to_string())
        );
    }
}
