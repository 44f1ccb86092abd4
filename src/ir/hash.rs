//! Content Hashing and Pipeline Images
//!
//! A pipeline is identified by a 256-bit structural hash over a canonical
//! byte representation of its DAG. Node UUIDs are freshly random per
//! compilation, so canonicalization remaps them to dense indices derived
//! from the (deterministic) node names before serializing: two compilations
//! of the same program hash identically, and any semantic change hashes
//! differently.
//!
//! The syntactic hash additionally covers the program's source spans, so
//! reformatting a program changes the syntactic hash but not the structural
//! one.

use super::DagSpec;
use crate::ast::Span;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A compiled, hashed pipeline ready for storage and repeated execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineImage {
    /// Hex SHA-256 of the canonical DAG bytes
    pub structural_hash: String,
    /// Hex SHA-256 of the canonical DAG bytes plus source spans
    pub syntactic_hash: String,
    pub dag: DagSpec,
    pub compiled_at: DateTime<Utc>,
}

impl PipelineImage {
    pub fn new(dag: DagSpec, spans: &[Span]) -> Self {
        let canonical = canonical_bytes(&dag);
        PipelineImage {
            structural_hash: structural_hash(&canonical),
            syntactic_hash: syntactic_hash(&canonical, spans),
            dag,
            compiled_at: Utc::now(),
        }
    }

    /// Per-module options keyed by module node id
    pub fn module_options(&self) -> BTreeMap<Uuid, crate::policy::ModuleCallOptions> {
        self.dag
            .module_nodes
            .iter()
            .map(|(id, m)| (*id, m.options.clone()))
            .collect()
    }
}

/// Hex SHA-256 of the canonical bytes
pub fn structural_hash(canonical: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical);
    hex_digest(hasher)
}

/// Hex SHA-256 of the canonical bytes plus every source span
pub fn syntactic_hash(canonical: &[u8], spans: &[Span]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical);
    for span in spans {
        hasher.update(span.start.to_le_bytes());
        hasher.update(span.end.to_le_bytes());
    }
    hex_digest(hasher)
}

fn hex_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Canonical shadow of the DAG with dense ids
#[derive(Serialize)]
struct CanonicalDag<'a> {
    data_nodes: Vec<CanonicalData<'a>>,
    module_nodes: Vec<CanonicalModule<'a>>,
    in_edges: Vec<(u32, u32, &'a str)>,
    out_edges: Vec<(u32, u32, &'a str)>,
    declared_outputs: &'a [String],
    output_bindings: Vec<(&'a str, u32)>,
    input_nodes: Vec<(&'a str, u32)>,
    transforms: Vec<CanonicalTransform<'a>>,
}

#[derive(Serialize)]
struct CanonicalData<'a> {
    name: &'a str,
    ty: &'a crate::cvalue::CType,
}

#[derive(Serialize)]
struct CanonicalModule<'a> {
    name: &'a str,
    consumes: &'a BTreeMap<String, crate::cvalue::CType>,
    produces: &'a BTreeMap<String, crate::cvalue::CType>,
    options: &'a crate::policy::ModuleCallOptions,
    lambdas: &'a BTreeMap<String, super::LambdaSpec>,
}

#[derive(Serialize)]
struct CanonicalTransform<'a> {
    target: u32,
    deps: Vec<(&'a str, u32)>,
    expr: &'a super::ExprSpec,
}

/// Serialize a DAG to canonical bytes: data nodes ordered by name, modules
/// ordered by (name, wiring), UUIDs replaced with dense indices
pub fn canonical_bytes(dag: &DagSpec) -> Vec<u8> {
    // Data node names are unique within a DAG by construction
    let mut data_ids: Vec<Uuid> = dag.data_nodes.keys().copied().collect();
    data_ids.sort_by(|a, b| dag.data_nodes[a].name.cmp(&dag.data_nodes[b].name));
    let data_index: BTreeMap<Uuid, u32> = data_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (*id, i as u32))
        .collect();

    // Module identity: name plus its wiring in data-index space
    let mut module_keys: Vec<(String, Uuid)> = dag
        .module_nodes
        .values()
        .map(|m| {
            let inputs: Vec<(String, u32)> = dag
                .module_inputs(m.id)
                .into_iter()
                .map(|(port, data)| (port, data_index[&data]))
                .collect();
            let outputs: Vec<(String, u32)> = dag
                .module_outputs(m.id)
                .into_iter()
                .map(|(port, data)| (port, data_index[&data]))
                .collect();
            (format!("{}|{inputs:?}|{outputs:?}", m.name), m.id)
        })
        .collect();
    module_keys.sort();
    let module_index: BTreeMap<Uuid, u32> = module_keys
        .iter()
        .enumerate()
        .map(|(i, (_, id))| (*id, i as u32))
        .collect();

    let mut in_edges: Vec<(u32, u32, &str)> = dag
        .in_edges
        .iter()
        .map(|(d, m, p)| (data_index[d], module_index[m], p.as_str()))
        .collect();
    in_edges.sort();
    let mut out_edges: Vec<(u32, u32, &str)> = dag
        .out_edges
        .iter()
        .map(|(m, d, p)| (module_index[m], data_index[d], p.as_str()))
        .collect();
    out_edges.sort();

    let mut transforms: Vec<CanonicalTransform<'_>> = dag
        .inline_transforms
        .values()
        .map(|t| CanonicalTransform {
            target: data_index[&t.target],
            deps: t
                .deps
                .iter()
                .map(|(name, id)| (name.as_str(), data_index[id]))
                .collect(),
            expr: &t.expr,
        })
        .collect();
    transforms.sort_by_key(|t| t.target);

    let canonical = CanonicalDag {
        data_nodes: data_ids
            .iter()
            .map(|id| {
                let node = &dag.data_nodes[id];
                CanonicalData {
                    name: &node.name,
                    ty: &node.ty,
                }
            })
            .collect(),
        module_nodes: module_keys
            .iter()
            .map(|(_, id)| {
                let module = &dag.module_nodes[id];
                CanonicalModule {
                    name: &module.name,
                    consumes: &module.consumes,
                    produces: &module.produces,
                    options: &module.options,
                    lambdas: &module.lambdas,
                }
            })
            .collect(),
        in_edges,
        out_edges,
        declared_outputs: &dag.declared_outputs,
        output_bindings: dag
            .output_bindings
            .iter()
            .map(|(name, id)| (name.as_str(), data_index[id]))
            .collect(),
        input_nodes: dag
            .input_nodes
            .iter()
            .map(|(name, id)| (name.as_str(), data_index[id]))
            .collect(),
        transforms,
    };

    // BTreeMap fields keep key order; the whole structure is deterministic
    serde_json::to_vec(&canonical).unwrap_or_default()
}
