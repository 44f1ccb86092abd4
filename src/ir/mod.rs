//! # Intermediate Representation - Dataflow DAG
//!
//! Typed pipelines lower to a DAG of data nodes and module nodes:
//!
//! - [`DataNodeSpec`] - a named value slot, fed either by an external input,
//!   an inline transform, or exactly one producing module
//! - [`ModuleNodeSpec`] - an invocation of a named module with typed input
//!   and output ports and per-call [`ModuleCallOptions`]
//! - in-edges connect data nodes to module input ports; out-edges connect
//!   module output ports to data nodes
//!
//! Pure computations (literals, merges, projections, field accesses,
//! operators, guards) never become module nodes; they are
//! [`InlineTransform`]s reduced by the executor as soon as their
//! dependencies resolve. Conditionals lower to synthetic branch modules
//! (name prefix `branch-`) the executor evaluates natively.
//!
//! All node maps are keyed by id in `BTreeMap`s, so the serialized form is
//! canonical and the content hash is stable.

mod builder;
mod hash;

pub use builder::IrBuilder;
pub use hash::{canonical_bytes, structural_hash, syntactic_hash, PipelineImage};

use crate::ast::{BinaryOp, UnaryOp};
use crate::cvalue::{CType, CValue};
use crate::policy::ModuleCallOptions;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Name prefix of synthetic conditional modules
pub const BRANCH_PREFIX: &str = "branch-";

/// A value slot in the DAG
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataNodeSpec {
    pub id: Uuid,
    pub name: String,
    pub ty: CType,
    /// Module input ports consuming this node: (module id, port name)
    pub consumers: BTreeSet<(Uuid, String)>,
}

/// A module invocation in the DAG
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleNodeSpec {
    pub id: Uuid,
    /// Module implementation name; `branch-N` marks a synthetic conditional
    pub name: String,
    /// Input ports and their types
    pub consumes: BTreeMap<String, CType>,
    /// Output ports and their types
    pub produces: BTreeMap<String, CType>,
    pub options: ModuleCallOptions,
    /// Lambda arguments for recognized higher-order modules, keyed by port
    pub lambdas: BTreeMap<String, LambdaSpec>,
}

impl ModuleNodeSpec {
    /// Synthetic conditional generated by the IR builder
    pub fn is_branch(&self) -> bool {
        self.name.starts_with(BRANCH_PREFIX)
    }
}

/// A lambda carried on a higher-order module call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LambdaSpec {
    pub params: Vec<String>,
    pub body: ExprSpec,
}

/// A pure expression evaluated by the runtime: inline transform bodies and
/// lambda bodies. Parameters refer to dependency slots or lambda parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprSpec {
    Literal(CValue),
    Param(String),
    Record(Vec<(String, ExprSpec)>),
    /// Element expressions plus the element type (needed when empty)
    ListOf(Vec<ExprSpec>, CType),
    FieldAccess(Box<ExprSpec>, String),
    Projection(Box<ExprSpec>, Vec<String>),
    /// Structural merge, right wins; candidates broadcast
    Merge(Box<ExprSpec>, Box<ExprSpec>),
    SomeOf(Box<ExprSpec>),
    NoneOf(CType),
    Conditional(Box<ExprSpec>, Box<ExprSpec>, Box<ExprSpec>),
    Coalesce(Box<ExprSpec>, Box<ExprSpec>),
    Binary(BinaryOp, Box<ExprSpec>, Box<ExprSpec>),
    Unary(UnaryOp, Box<ExprSpec>),
}

/// A pure reduction writing one data node from others
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineTransform {
    /// Data node receiving the result
    pub target: Uuid,
    /// Dependency slots: parameter name to source data node
    pub deps: BTreeMap<String, Uuid>,
    pub expr: ExprSpec,
}

/// The complete lowered pipeline
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DagSpec {
    pub data_nodes: BTreeMap<Uuid, DataNodeSpec>,
    pub module_nodes: BTreeMap<Uuid, ModuleNodeSpec>,
    /// (data node, module node, input port)
    pub in_edges: BTreeSet<(Uuid, Uuid, String)>,
    /// (module node, data node, output port)
    pub out_edges: BTreeSet<(Uuid, Uuid, String)>,
    /// Declared output names, in program order
    pub declared_outputs: Vec<String>,
    pub output_bindings: BTreeMap<String, Uuid>,
    /// Program inputs: name to data node
    pub input_nodes: BTreeMap<String, Uuid>,
    /// Inline transforms keyed by target data node
    pub inline_transforms: BTreeMap<Uuid, InlineTransform>,
}

/// DAG structural invariant violation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DagError {
    #[error("the DAG contains a cycle")]
    Cyclic,

    #[error("module {module} port '{port}' has {count} in-edges, expected exactly one")]
    PortEdgeMismatch {
        module: Uuid,
        port: String,
        count: usize,
    },

    #[error("data node {node} has {count} producers, at most one is allowed")]
    MultipleProducers { node: Uuid, count: usize },

    #[error("declared output '{name}' is not bound to a known data node")]
    UnboundOutput { name: String },
}

impl DagSpec {
    /// Check the structural invariants: acyclicity, one in-edge per consumed
    /// port, at most one producer per data node, bound outputs
    pub fn validate(&self) -> Result<(), DagError> {
        for module in self.module_nodes.values() {
            for port in module.consumes.keys() {
                let count = self
                    .in_edges
                    .iter()
                    .filter(|(_, m, p)| *m == module.id && p == port)
                    .count();
                if count != 1 {
                    return Err(DagError::PortEdgeMismatch {
                        module: module.id,
                        port: port.clone(),
                        count,
                    });
                }
            }
        }

        for data in self.data_nodes.values() {
            let mut producers = self
                .out_edges
                .iter()
                .filter(|(_, d, _)| *d == data.id)
                .count();
            if self.inline_transforms.contains_key(&data.id) {
                producers += 1;
            }
            if producers > 1 {
                return Err(DagError::MultipleProducers {
                    node: data.id,
                    count: producers,
                });
            }
        }

        for name in &self.declared_outputs {
            match self.output_bindings.get(name) {
                Some(id) if self.data_nodes.contains_key(id) => {}
                _ => return Err(DagError::UnboundOutput { name: name.clone() }),
            }
        }

        if self.has_cycle() {
            return Err(DagError::Cyclic);
        }
        Ok(())
    }

    /// Kahn's algorithm over the combined data/module/transform edge set
    fn has_cycle(&self) -> bool {
        // Successor map over node ids (data and module nodes share the space)
        let mut successors: BTreeMap<Uuid, Vec<Uuid>> = BTreeMap::new();
        let mut indegree: BTreeMap<Uuid, usize> = BTreeMap::new();
        for id in self.data_nodes.keys().chain(self.module_nodes.keys()) {
            indegree.insert(*id, 0);
        }
        let mut add_edge = |from: Uuid, to: Uuid| {
            successors.entry(from).or_default().push(to);
            *indegree.entry(to).or_insert(0) += 1;
        };
        for (data, module, _) in &self.in_edges {
            add_edge(*data, *module);
        }
        for (module, data, _) in &self.out_edges {
            add_edge(*module, *data);
        }
        for transform in self.inline_transforms.values() {
            for dep in transform.deps.values() {
                add_edge(*dep, transform.target);
            }
        }

        let mut ready: Vec<Uuid> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0usize;
        while let Some(id) = ready.pop() {
            visited += 1;
            if let Some(next) = successors.get(&id) {
                for n in next {
                    let d = indegree.get_mut(n).map(|d| {
                        *d -= 1;
                        *d
                    });
                    if d == Some(0) {
                        ready.push(*n);
                    }
                }
            }
        }
        visited != indegree.len()
    }

    /// Data node ids feeding a module's input ports, keyed by port
    pub fn module_inputs(&self, module_id: Uuid) -> BTreeMap<String, Uuid> {
        self.in_edges
            .iter()
            .filter(|(_, m, _)| *m == module_id)
            .map(|(d, _, p)| (p.clone(), *d))
            .collect()
    }

    /// Data node ids a module writes, keyed by output port
    pub fn module_outputs(&self, module_id: Uuid) -> BTreeMap<String, Uuid> {
        self.out_edges
            .iter()
            .filter(|(m, _, _)| *m == module_id)
            .map(|(_, d, p)| (p.clone(), *d))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, ty: CType) -> DataNodeSpec {
        DataNodeSpec {
            id: Uuid::new_v4(),
            name: name.to_string(),
            ty,
            consumers: BTreeSet::new(),
        }
    }

    #[test]
    fn validate_accepts_a_simple_chain() {
        let mut dag = DagSpec::default();
        let input = node("x", CType::String);
        let output = node("y", CType::String);
        let module = ModuleNodeSpec {
            id: Uuid::new_v4(),
            name: "Upper".to_string(),
            consumes: [("arg0".to_string(), CType::String)].into_iter().collect(),
            produces: [("out".to_string(), CType::String)].into_iter().collect(),
            options: ModuleCallOptions::default(),
            lambdas: BTreeMap::new(),
        };
        dag.in_edges.insert((input.id, module.id, "arg0".into()));
        dag.out_edges.insert((module.id, output.id, "out".into()));
        dag.declared_outputs.push("y".into());
        dag.output_bindings.insert("y".into(), output.id);
        dag.input_nodes.insert("x".into(), input.id);
        dag.data_nodes.insert(input.id, input);
        dag.data_nodes.insert(output.id, output);
        dag.module_nodes.insert(module.id, module);

        dag.validate().expect("chain is valid");
    }

    #[test]
    fn validate_rejects_unbound_output() {
        let mut dag = DagSpec::default();
        dag.declared_outputs.push("ghost".into());
        assert_eq!(
            dag.validate(),
            Err(DagError::UnboundOutput {
                name: "ghost".into()
            })
        );
    }

    #[test]
    fn validate_rejects_cycles() {
        let mut dag = DagSpec::default();
        let a = node("a", CType::Int);
        let b = node("b", CType::Int);
        dag.inline_transforms.insert(
            b.id,
            InlineTransform {
                target: b.id,
                deps: [("v".to_string(), a.id)].into_iter().collect(),
                expr: ExprSpec::Param("v".into()),
            },
        );
        dag.inline_transforms.insert(
            a.id,
            InlineTransform {
                target: a.id,
                deps: [("v".to_string(), b.id)].into_iter().collect(),
                expr: ExprSpec::Param("v".into()),
            },
        );
        dag.data_nodes.insert(a.id, a);
        dag.data_nodes.insert(b.id, b);
        assert_eq!(dag.validate(), Err(DagError::Cyclic));
    }

    #[test]
    fn validate_rejects_missing_port_edge() {
        let mut dag = DagSpec::default();
        let module = ModuleNodeSpec {
            id: Uuid::new_v4(),
            name: "Lonely".to_string(),
            consumes: [("arg0".to_string(), CType::Int)].into_iter().collect(),
            produces: BTreeMap::new(),
            options: ModuleCallOptions::default(),
            lambdas: BTreeMap::new(),
        };
        dag.module_nodes.insert(module.id, module);
        assert!(matches!(
            dag.validate(),
            Err(DagError::PortEdgeMismatch { count: 0, .. })
        ));
    }
}
