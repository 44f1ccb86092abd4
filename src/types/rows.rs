//! Row Polymorphism Support
//!
//! Fresh row-variable allocation, unification of closed records against open
//! record parameters, and substitution application. Row vars only appear at
//! function boundaries and are fresh per call, so no general unification or
//! occurs-check is needed.

use super::SemanticType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque identifier of a row variable
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct RowVarId(pub u64);

impl fmt::Display for RowVarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ρ{}", self.0)
    }
}

/// Allocator of fresh row variables; shared across a checker invocation
#[derive(Debug, Default)]
pub struct RowVarGen {
    next: AtomicU64,
}

impl RowVarGen {
    pub fn new() -> Self {
        RowVarGen {
            next: AtomicU64::new(0),
        }
    }

    pub fn fresh(&self) -> RowVarId {
        RowVarId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Row unification failure
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RowError {
    /// The closed record lacks fields the open record requires
    #[error("missing fields: {}", .0.iter().cloned().collect::<Vec<_>>().join(", "))]
    MissingFields(std::collections::BTreeSet<String>),

    /// A required field exists but with an incompatible type
    #[error("field '{field}' has type {actual}, expected {expected}")]
    FieldTypeMismatch {
        field: String,
        expected: SemanticType,
        actual: SemanticType,
    },
}

/// Mapping from row variables to the closed fields they captured
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSubstitution {
    bindings: BTreeMap<RowVarId, BTreeMap<String, SemanticType>>,
}

impl RowSubstitution {
    pub fn new() -> Self {
        RowSubstitution {
            bindings: BTreeMap::new(),
        }
    }

    pub fn bind(&mut self, row: RowVarId, captured: BTreeMap<String, SemanticType>) {
        self.bindings.insert(row, captured);
    }

    pub fn get(&self, row: RowVarId) -> Option<&BTreeMap<String, SemanticType>> {
        self.bindings.get(&row)
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Merge another substitution in; later bindings win on conflicts
    pub fn extend(&mut self, other: RowSubstitution) {
        self.bindings.extend(other.bindings);
    }
}

/// Unify a closed record's fields against an open record parameter.
///
/// Produces a substitution binding the open record's row variable to exactly
/// the closed fields not named by the open record's required fields. Every
/// required field must exist in the closed record with a subtype.
pub fn unify_closed_with_open(
    closed: &BTreeMap<String, SemanticType>,
    required: &BTreeMap<String, SemanticType>,
    row: RowVarId,
) -> Result<RowSubstitution, RowError> {
    let missing: std::collections::BTreeSet<String> = required
        .keys()
        .filter(|k| !closed.contains_key(*k))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(RowError::MissingFields(missing));
    }

    for (name, expected) in required {
        let actual = &closed[name];
        if !super::subtype::is_subtype(actual, expected) {
            return Err(RowError::FieldTypeMismatch {
                field: name.clone(),
                expected: expected.clone(),
                actual: actual.clone(),
            });
        }
    }

    let captured: BTreeMap<String, SemanticType> = closed
        .iter()
        .filter(|(k, _)| !required.contains_key(*k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let mut subst = RowSubstitution::new();
    subst.bind(row, captured);
    Ok(subst)
}

/// Walk a type tree replacing bound row variables with closed records.
///
/// An `OpenRecord(F, ρ)` with `ρ` bound becomes `Record(F ∪ captured(ρ))`;
/// a bare `RowVar(ρ)` becomes `Record(captured(ρ))`. Unbound row vars are
/// left in place.
pub fn apply_substitution(ty: &SemanticType, subst: &RowSubstitution) -> SemanticType {
    match ty {
        SemanticType::OpenRecord(fields, row) => match subst.get(*row) {
            Some(captured) => {
                let mut merged = fields.clone();
                for (k, v) in captured {
                    merged.insert(k.clone(), v.clone());
                }
                SemanticType::Record(
                    merged
                        .into_iter()
                        .map(|(k, v)| (k, apply_substitution(&v, subst)))
                        .collect(),
                )
            }
            None => SemanticType::OpenRecord(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), apply_substitution(v, subst)))
                    .collect(),
                *row,
            ),
        },
        SemanticType::RowVar(row) => match subst.get(*row) {
            Some(captured) => SemanticType::Record(captured.clone()),
            None => ty.clone(),
        },
        SemanticType::List(t) => SemanticType::List(Box::new(apply_substitution(t, subst))),
        SemanticType::Optional(t) => SemanticType::Optional(Box::new(apply_substitution(t, subst))),
        SemanticType::Candidates(t) => {
            SemanticType::Candidates(Box::new(apply_substitution(t, subst)))
        }
        SemanticType::Map(k, v) => SemanticType::Map(
            Box::new(apply_substitution(k, subst)),
            Box::new(apply_substitution(v, subst)),
        ),
        SemanticType::Record(fields) => SemanticType::Record(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), apply_substitution(v, subst)))
                .collect(),
        ),
        SemanticType::Function(params, ret) => SemanticType::Function(
            params.iter().map(|p| apply_substitution(p, subst)).collect(),
            Box::new(apply_substitution(ret, subst)),
        ),
        _ => ty.clone(),
    }
}

/// Rewrite row-variable identities throughout a type tree.
///
/// Used when instantiating a row-polymorphic signature: every declared row
/// var is replaced with a freshly allocated one so concurrent call sites
/// never share bindings.
pub fn rename_row_vars(ty: &SemanticType, renames: &BTreeMap<RowVarId, RowVarId>) -> SemanticType {
    match ty {
        SemanticType::OpenRecord(fields, row) => SemanticType::OpenRecord(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), rename_row_vars(v, renames)))
                .collect(),
            renames.get(row).copied().unwrap_or(*row),
        ),
        SemanticType::RowVar(row) => {
            SemanticType::RowVar(renames.get(row).copied().unwrap_or(*row))
        }
        SemanticType::List(t) => SemanticType::List(Box::new(rename_row_vars(t, renames))),
        SemanticType::Optional(t) => SemanticType::Optional(Box::new(rename_row_vars(t, renames))),
        SemanticType::Candidates(t) => {
            SemanticType::Candidates(Box::new(rename_row_vars(t, renames)))
        }
        SemanticType::Map(k, v) => SemanticType::Map(
            Box::new(rename_row_vars(k, renames)),
            Box::new(rename_row_vars(v, renames)),
        ),
        SemanticType::Record(fields) => SemanticType::Record(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), rename_row_vars(v, renames)))
                .collect(),
        ),
        SemanticType::Function(params, ret) => SemanticType::Function(
            params.iter().map(|p| rename_row_vars(p, renames)).collect(),
            Box::new(rename_row_vars(ret, renames)),
        ),
        _ => ty.clone(),
    }
}
