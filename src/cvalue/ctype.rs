//! Runtime Type Tags
//!
//! [`CType`] mirrors the semantic type model at runtime: every [`crate::cvalue::CValue`]
//! carries enough type information to reconstruct its `CType`. Conversion
//! from checker types happens once at IR-generation time.

use crate::types::SemanticType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Runtime type of a value flowing through the DAG
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CType {
    String,
    Int,
    Float,
    Boolean,
    /// Bottom type; only inhabitable by zero values
    Nothing,
    List(Box<CType>),
    Map(Box<CType>, Box<CType>),
    Optional(Box<CType>),
    /// Record with a fixed field schema
    Product(BTreeMap<String, CType>),
    /// Tagged union over named variants
    Union(BTreeMap<String, CType>),
}

impl CType {
    pub fn list(elem: CType) -> Self {
        CType::List(Box::new(elem))
    }

    pub fn optional(inner: CType) -> Self {
        CType::Optional(Box::new(inner))
    }

    pub fn map(key: CType, value: CType) -> Self {
        CType::Map(Box::new(key), Box::new(value))
    }

    pub fn product<S: Into<String>>(fields: impl IntoIterator<Item = (S, CType)>) -> Self {
        CType::Product(fields.into_iter().map(|(n, t)| (n.into(), t)).collect())
    }

    pub fn union<S: Into<String>>(variants: impl IntoIterator<Item = (S, CType)>) -> Self {
        CType::Union(variants.into_iter().map(|(n, t)| (n.into(), t)).collect())
    }

    /// Lower a checker type to its runtime representation.
    ///
    /// `Candidates<T>` becomes a list; open records become products over
    /// their required fields (row variables are resolved before lowering).
    /// Function types have no runtime representation and are rejected.
    pub fn from_semantic(ty: &SemanticType) -> Result<CType, String> {
        match ty {
            SemanticType::Int => Ok(CType::Int),
            SemanticType::Float => Ok(CType::Float),
            SemanticType::String => Ok(CType::String),
            SemanticType::Boolean => Ok(CType::Boolean),
            SemanticType::Nothing => Ok(CType::Nothing),
            SemanticType::List(t) | SemanticType::Candidates(t) => {
                Ok(CType::List(Box::new(CType::from_semantic(t)?)))
            }
            SemanticType::Optional(t) => Ok(CType::Optional(Box::new(CType::from_semantic(t)?))),
            SemanticType::Map(k, v) => Ok(CType::Map(
                Box::new(CType::from_semantic(k)?),
                Box::new(CType::from_semantic(v)?),
            )),
            SemanticType::Record(fields) | SemanticType::OpenRecord(fields, _) => {
                let mut lowered = BTreeMap::new();
                for (name, field_ty) in fields {
                    lowered.insert(name.clone(), CType::from_semantic(field_ty)?);
                }
                Ok(CType::Product(lowered))
            }
            SemanticType::Function(..) => {
                Err("function types have no runtime representation".to_string())
            }
            SemanticType::RowVar(id) => Err(format!("unresolved row variable {id}")),
        }
    }

    /// The type-appropriate default produced by the Skip error strategy:
    /// empty string, 0, 0.0, false, empty collections, `CNone`, a product of
    /// zero values, the first variant of a union.
    pub fn zero_value(&self) -> super::CValue {
        use super::CValue;
        match self {
            CType::String | CType::Nothing => CValue::CString(String::new()),
            CType::Int => CValue::CInt(0),
            CType::Float => CValue::CFloat(0.0),
            CType::Boolean => CValue::CBoolean(false),
            CType::List(elem) => CValue::CList {
                elements: Vec::new(),
                elem_type: (**elem).clone(),
            },
            CType::Map(k, v) => CValue::CMap {
                pairs: Vec::new(),
                key_type: (**k).clone(),
                value_type: (**v).clone(),
            },
            CType::Optional(inner) => CValue::CNone {
                inner_type: (**inner).clone(),
            },
            CType::Product(schema) => CValue::CProduct {
                fields: schema
                    .iter()
                    .map(|(name, ty)| (name.clone(), ty.zero_value()))
                    .collect(),
                schema: schema.clone(),
            },
            CType::Union(variants) => match variants.iter().next() {
                Some((tag, ty)) => CValue::CUnion {
                    payload: Box::new(ty.zero_value()),
                    variants: variants.clone(),
                    tag: tag.clone(),
                },
                // Uninhabited union degrades to an empty string marker
                None => CValue::CString(String::new()),
            },
        }
    }
}

impl fmt::Display for CType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CType::String => write!(f, "String"),
            CType::Int => write!(f, "Int"),
            CType::Float => write!(f, "Float"),
            CType::Boolean => write!(f, "Boolean"),
            CType::Nothing => write!(f, "Nothing"),
            CType::List(t) => write!(f, "List<{t}>"),
            CType::Map(k, v) => write!(f, "Map<{k}, {v}>"),
            CType::Optional(t) => write!(f, "Optional<{t}>"),
            CType::Product(fields) => {
                write!(f, "{{")?;
                for (i, (name, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {ty}")?;
                }
                write!(f, "}}")
            }
            CType::Union(variants) => {
                write!(f, "<")?;
                for (i, (name, ty)) in variants.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{name}: {ty}")?;
                }
                write!(f, ">")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cvalue::CValue;

    #[test]
    fn lowering_maps_candidates_to_lists() {
        let sem = SemanticType::candidates(SemanticType::record([("x", SemanticType::Int)]));
        let lowered = CType::from_semantic(&sem).expect("lowering should succeed");
        assert_eq!(lowered, CType::list(CType::product([("x", CType::Int)])));
    }

    #[test]
    fn lowering_rejects_functions() {
        let sem = SemanticType::function(vec![SemanticType::Int], SemanticType::Int);
        assert!(CType::from_semantic(&sem).is_err());
    }

    #[test]
    fn zero_values_match_types() {
        assert_eq!(CType::Int.zero_value(), CValue::CInt(0));
        assert_eq!(CType::Boolean.zero_value(), CValue::CBoolean(false));
        assert_eq!(
            CType::String.zero_value(),
            CValue::CString(String::new())
        );

        let product = CType::product([("count", CType::Int), ("label", CType::String)]);
        match product.zero_value() {
            CValue::CProduct { fields, .. } => {
                assert_eq!(fields["count"], CValue::CInt(0));
                assert_eq!(fields["label"], CValue::CString(String::new()));
            }
            other => panic!("expected product, got {other:?}"),
        }
    }

    #[test]
    fn union_zero_value_picks_first_variant() {
        let union = CType::union([("err", CType::String), ("ok", CType::Int)]);
        match union.zero_value() {
            CValue::CUnion { tag, payload, .. } => {
                // BTreeMap ordering: "err" < "ok"
                assert_eq!(tag, "err");
                assert_eq!(*payload, CValue::CString(String::new()));
            }
            other => panic!("expected union, got {other:?}"),
        }
    }
}
