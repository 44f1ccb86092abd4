//! # Semantic Type Model
//!
//! Closed representation of the types the checker assigns to expressions:
//! scalars, collections, records, functions, and the row-polymorphic forms
//! (`OpenRecord`, `RowVar`) used at function boundaries.
//!
//! Record fields are kept in a `BTreeMap`, so field insertion order never
//! affects equality or hashing; the key set plus per-key types define
//! identity.
//!
//! ## Submodules
//!
//! - [`subtype`] - the subtype relation and failure explanations
//! - [`rows`] - row-variable allocation, unification, substitution

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub mod rows;
pub mod subtype;

pub use rows::{RowError, RowSubstitution, RowVarGen, RowVarId};
pub use subtype::{explain_failure, is_subtype};

/// A semantic type as assigned by the checker
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SemanticType {
    Int,
    Float,
    String,
    Boolean,
    /// Bottom type: subtype of every type. The type of `[]` elements and of
    /// expressions that cannot produce a value.
    Nothing,
    List(Box<SemanticType>),
    Map(Box<SemanticType>, Box<SemanticType>),
    Optional(Box<SemanticType>),
    /// Closed record: exactly these fields
    Record(BTreeMap<String, SemanticType>),
    /// Collection abstraction whose elements are records; merges broadcast
    Candidates(Box<SemanticType>),
    Function(Vec<SemanticType>, Box<SemanticType>),
    /// Record requiring at least `fields`, extras captured by the row var
    OpenRecord(BTreeMap<String, SemanticType>, RowVarId),
    /// A bare row variable (appears only inside instantiated signatures)
    RowVar(RowVarId),
}

impl SemanticType {
    /// Closed record from field pairs
    pub fn record<S: Into<String>>(fields: impl IntoIterator<Item = (S, SemanticType)>) -> Self {
        SemanticType::Record(fields.into_iter().map(|(n, t)| (n.into(), t)).collect())
    }

    /// Open record from required field pairs and a row variable
    pub fn open_record<S: Into<String>>(
        fields: impl IntoIterator<Item = (S, SemanticType)>,
        row: RowVarId,
    ) -> Self {
        SemanticType::OpenRecord(fields.into_iter().map(|(n, t)| (n.into(), t)).collect(), row)
    }

    pub fn list(elem: SemanticType) -> Self {
        SemanticType::List(Box::new(elem))
    }

    pub fn optional(inner: SemanticType) -> Self {
        SemanticType::Optional(Box::new(inner))
    }

    pub fn candidates(inner: SemanticType) -> Self {
        SemanticType::Candidates(Box::new(inner))
    }

    pub fn map(key: SemanticType, value: SemanticType) -> Self {
        SemanticType::Map(Box::new(key), Box::new(value))
    }

    pub fn function(params: Vec<SemanticType>, returns: SemanticType) -> Self {
        SemanticType::Function(params, Box::new(returns))
    }

    /// Int or Float
    pub fn is_numeric(&self) -> bool {
        matches!(self, SemanticType::Int | SemanticType::Float)
    }

    /// Record, or Candidates over a record (possibly open)
    pub fn is_mergeable(&self) -> bool {
        match self {
            SemanticType::Record(_) | SemanticType::OpenRecord(..) => true,
            SemanticType::Candidates(inner) => inner.is_mergeable(),
            _ => false,
        }
    }

    /// Fields if this is a closed or open record
    pub fn record_fields(&self) -> Option<&BTreeMap<String, SemanticType>> {
        match self {
            SemanticType::Record(fields) | SemanticType::OpenRecord(fields, _) => Some(fields),
            _ => None,
        }
    }

    /// Whether any row variable occurs anywhere in the type tree
    pub fn has_row_vars(&self) -> bool {
        match self {
            SemanticType::RowVar(_) | SemanticType::OpenRecord(..) => true,
            SemanticType::List(t) | SemanticType::Optional(t) | SemanticType::Candidates(t) => {
                t.has_row_vars()
            }
            SemanticType::Map(k, v) => k.has_row_vars() || v.has_row_vars(),
            SemanticType::Record(fields) => fields.values().any(SemanticType::has_row_vars),
            SemanticType::Function(params, ret) => {
                params.iter().any(SemanticType::has_row_vars) || ret.has_row_vars()
            }
            _ => false,
        }
    }

    /// Least upper bound approximated as the supertype of the pair, if one
    /// side subtype-relates to the other
    pub fn lub(&self, other: &SemanticType) -> Option<SemanticType> {
        if subtype::is_subtype(self, other) {
            Some(other.clone())
        } else if subtype::is_subtype(other, self) {
            Some(self.clone())
        } else {
            None
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SemanticType::Int => write!(f, "Int"),
            SemanticType::Float => write!(f, "Float"),
            SemanticType::String => write!(f, "String"),
            SemanticType::Boolean => write!(f, "Boolean"),
            SemanticType::Nothing => write!(f, "Nothing"),
            SemanticType::List(t) => write!(f, "List<{t}>"),
            SemanticType::Map(k, v) => write!(f, "Map<{k}, {v}>"),
            SemanticType::Optional(t) => write!(f, "Optional<{t}>"),
            SemanticType::Candidates(t) => write!(f, "Candidates<{t}>"),
            SemanticType::Record(fields) => {
                write!(f, "{{")?;
                for (i, (name, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {ty}")?;
                }
                write!(f, "}}")
            }
            SemanticType::OpenRecord(fields, row) => {
                write!(f, "{{")?;
                for (name, ty) in fields {
                    write!(f, "{name}: {ty}, ")?;
                }
                write!(f, "..{row}}}")
            }
            SemanticType::RowVar(id) => write!(f, "{id}"),
            SemanticType::Function(params, ret) => {
                write!(f, "(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ") -> {ret}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_equality_ignores_insertion_order() {
        let a = SemanticType::record([("x", SemanticType::Int), ("y", SemanticType::String)]);
        let b = SemanticType::record([("y", SemanticType::String), ("x", SemanticType::Int)]);
        assert_eq!(a, b);
    }

    #[test]
    fn display_is_stable() {
        let ty = SemanticType::record([
            ("name", SemanticType::String),
            ("age", SemanticType::Int),
        ]);
        assert_eq!(ty.to_string(), "{age: Int, name: String}");
        assert_eq!(
            SemanticType::list(SemanticType::Int).to_string(),
            "List<Int>"
        );
    }

    #[test]
    fn mergeable_covers_candidates_of_records() {
        let rec = SemanticType::record([("x", SemanticType::Int)]);
        assert!(rec.is_mergeable());
        assert!(SemanticType::candidates(rec.clone()).is_mergeable());
        assert!(!SemanticType::Int.is_mergeable());
        assert!(!SemanticType::list(rec).is_mergeable());
    }
}
