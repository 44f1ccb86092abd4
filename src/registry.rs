//! Function Registry: module signatures visible to the checker and runtime
//!
//! Tracks [`FunctionSignature`]s by plain name and by `namespace::name`, and
//! resolves unqualified lookups against a program's imported namespaces.
//! Signatures declaring row variables are *row-polymorphic*; each call site
//! instantiates them with fresh row vars before unification.

use crate::types::rows::{rename_row_vars, RowVarGen, RowVarId};
use crate::types::SemanticType;
use dashmap::{DashMap, DashSet};
use std::collections::BTreeMap;

/// A registered module signature
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSignature {
    /// Surface-language function name
    pub name: String,
    /// Parameter types, in declaration order
    pub params: Vec<SemanticType>,
    /// Return type
    pub returns: SemanticType,
    /// Name of the module implementation the runtime invokes
    pub module_name: String,
    /// Optional namespace qualifier
    pub namespace: Option<String>,
    /// Row variables declared by this signature
    pub row_vars: Vec<RowVarId>,
}

impl FunctionSignature {
    /// Signature without a namespace whose module name equals the function
    /// name
    pub fn simple(name: impl Into<String>, params: Vec<SemanticType>, returns: SemanticType) -> Self {
        let name = name.into();
        FunctionSignature {
            module_name: name.clone(),
            name,
            params,
            returns,
            namespace: None,
            row_vars: Vec::new(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_row_vars(mut self, row_vars: Vec<RowVarId>) -> Self {
        self.row_vars = row_vars;
        self
    }

    /// Declares at least one row variable
    pub fn is_row_polymorphic(&self) -> bool {
        !self.row_vars.is_empty()
    }

    /// Fully qualified display name
    pub fn qualified_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}::{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Sibling signature with every declared row var replaced by a freshly
    /// allocated one; parameter and return types rewritten accordingly
    pub fn instantiate(&self, gen: &RowVarGen) -> FunctionSignature {
        if self.row_vars.is_empty() {
            return self.clone();
        }
        let renames: BTreeMap<RowVarId, RowVarId> =
            self.row_vars.iter().map(|old| (*old, gen.fresh())).collect();
        FunctionSignature {
            name: self.name.clone(),
            params: self
                .params
                .iter()
                .map(|p| rename_row_vars(p, &renames))
                .collect(),
            returns: rename_row_vars(&self.returns, &renames),
            module_name: self.module_name.clone(),
            namespace: self.namespace.clone(),
            row_vars: renames.values().copied().collect(),
        }
    }
}

/// Lookup failure
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LookupError {
    #[error("function '{0}' is not registered")]
    NotFound(String),

    /// The name resolves in more than one imported namespace
    #[error("function '{name}' is ambiguous: {}", candidates.join(", "))]
    Ambiguous {
        name: String,
        candidates: Vec<String>,
    },
}

/// Concurrent registry of function signatures
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    /// Unqualified signatures, keyed by name
    global: DashMap<String, FunctionSignature>,
    /// Namespaced signatures, keyed by `namespace::name`
    namespaced: DashMap<String, FunctionSignature>,
    /// Module names the runtime recognizes as higher-order targets
    higher_order: DashSet<String>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        FunctionRegistry {
            global: DashMap::new(),
            namespaced: DashMap::new(),
            higher_order: DashSet::new(),
        }
    }

    /// Register a signature under its namespace (or globally when none)
    pub fn register(&self, signature: FunctionSignature) {
        match &signature.namespace {
            Some(ns) => {
                self.namespaced
                    .insert(format!("{ns}::{}", signature.name), signature);
            }
            None => {
                self.global.insert(signature.name.clone(), signature);
            }
        }
    }

    /// Unqualified signature by name
    pub fn get(&self, name: &str) -> Option<FunctionSignature> {
        self.global.get(name).map(|s| s.clone())
    }

    /// Signature under an explicit namespace
    pub fn get_qualified(&self, namespace: &str, name: &str) -> Option<FunctionSignature> {
        self.namespaced
            .get(&format!("{namespace}::{name}"))
            .map(|s| s.clone())
    }

    /// Resolve an unqualified name against the global scope plus a program's
    /// imported namespaces. Exactly one match wins; several are ambiguous.
    pub fn lookup(
        &self,
        name: &str,
        imported_namespaces: &[String],
    ) -> Result<FunctionSignature, LookupError> {
        let mut matches: Vec<FunctionSignature> = Vec::new();
        if let Some(sig) = self.get(name) {
            matches.push(sig);
        }
        for ns in imported_namespaces {
            if let Some(sig) = self.get_qualified(ns, name) {
                matches.push(sig);
            }
        }
        match matches.len() {
            0 => Err(LookupError::NotFound(name.to_string())),
            1 => Ok(matches.remove(0)),
            _ => Err(LookupError::Ambiguous {
                name: name.to_string(),
                candidates: matches.iter().map(FunctionSignature::qualified_name).collect(),
            }),
        }
    }

    /// Whether a namespace has any registered signatures
    pub fn has_namespace(&self, namespace: &str) -> bool {
        let prefix = format!("{namespace}::");
        self.namespaced.iter().any(|e| e.key().starts_with(&prefix))
    }

    /// Mark a module as a recognized higher-order target (it accepts lambda
    /// arguments the runtime knows how to apply)
    pub fn register_higher_order(&self, module_name: impl Into<String>) {
        self.higher_order.insert(module_name.into());
    }

    pub fn is_higher_order(&self, module_name: &str) -> bool {
        self.higher_order.contains(module_name)
    }

    pub fn len(&self) -> usize {
        self.global.len() + self.namespaced.len()
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_empty() && self.namespaced.is_empty()
    }
}
