//! # Runtime Value System
//!
//! Tagged runtime values flowing through the DAG executor. Every value
//! carries enough type information to reconstruct its [`CType`], which keeps
//! cache keys, zero values, and the JSON bridge type-driven.
//!
//! ## Usage
//!
//! ```rust
//! use constellation::cvalue::{CType, CValue};
//!
//! let v = CValue::product([
//!     ("name", CValue::CString("ada".into())),
//!     ("age", CValue::CInt(36)),
//! ]);
//! assert_eq!(
//!     v.ctype(),
//!     CType::product([("name", CType::String), ("age", CType::Int)])
//! );
//! ```

mod ctype;
pub mod json;

pub use ctype::CType;
pub use json::{decode_json, encode_json, JsonBridgeError, JsonLimits};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A tagged runtime value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CValue {
    CString(String),
    CInt(i64),
    CFloat(f64),
    CBoolean(bool),
    CList {
        elements: Vec<CValue>,
        elem_type: CType,
    },
    CMap {
        pairs: Vec<(CValue, CValue)>,
        key_type: CType,
        value_type: CType,
    },
    CProduct {
        fields: BTreeMap<String, CValue>,
        schema: BTreeMap<String, CType>,
    },
    CUnion {
        payload: Box<CValue>,
        variants: BTreeMap<String, CType>,
        tag: String,
    },
    CSome {
        value: Box<CValue>,
        inner_type: CType,
    },
    CNone {
        inner_type: CType,
    },
}

impl CValue {
    /// Product value whose schema is derived from the given field values
    pub fn product<S: Into<String>>(fields: impl IntoIterator<Item = (S, CValue)>) -> Self {
        let fields: BTreeMap<String, CValue> =
            fields.into_iter().map(|(n, v)| (n.into(), v)).collect();
        let schema = fields.iter().map(|(n, v)| (n.clone(), v.ctype())).collect();
        CValue::CProduct { fields, schema }
    }

    /// Homogeneous list; `elem_type` inferred from the first element,
    /// `Nothing` when empty
    pub fn list(elements: Vec<CValue>) -> Self {
        let elem_type = elements.first().map_or(CType::Nothing, CValue::ctype);
        CValue::CList {
            elements,
            elem_type,
        }
    }

    pub fn some(value: CValue) -> Self {
        let inner_type = value.ctype();
        CValue::CSome {
            value: Box::new(value),
            inner_type,
        }
    }

    pub fn none(inner_type: CType) -> Self {
        CValue::CNone { inner_type }
    }

    /// Runtime type of this value
    pub fn ctype(&self) -> CType {
        match self {
            CValue::CString(_) => CType::String,
            CValue::CInt(_) => CType::Int,
            CValue::CFloat(_) => CType::Float,
            CValue::CBoolean(_) => CType::Boolean,
            CValue::CList { elem_type, .. } => CType::List(Box::new(elem_type.clone())),
            CValue::CMap {
                key_type,
                value_type,
                ..
            } => CType::Map(Box::new(key_type.clone()), Box::new(value_type.clone())),
            CValue::CProduct { schema, .. } => CType::Product(schema.clone()),
            CValue::CUnion { variants, .. } => CType::Union(variants.clone()),
            CValue::CSome { inner_type, .. } | CValue::CNone { inner_type } => {
                CType::Optional(Box::new(inner_type.clone()))
            }
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CValue::CBoolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            CValue::CInt(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            CValue::CFloat(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CValue::CString(s) => Some(s),
            _ => None,
        }
    }

    /// Field of a product value
    pub fn field(&self, name: &str) -> Option<&CValue> {
        match self {
            CValue::CProduct { fields, .. } => fields.get(name),
            _ => None,
        }
    }
}

impl fmt::Display for CValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CValue::CString(s) => write!(f, "{s:?}"),
            CValue::CInt(i) => write!(f, "{i}"),
            CValue::CFloat(x) => write!(f, "{x}"),
            CValue::CBoolean(b) => write!(f, "{b}"),
            CValue::CList { elements, .. } => {
                write!(f, "[")?;
                for (i, e) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, "]")
            }
            CValue::CMap { pairs, .. } => {
                write!(f, "{{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            CValue::CProduct { fields, .. } => {
                write!(f, "{{")?;
                for (i, (name, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {v}")?;
                }
                write!(f, "}}")
            }
            CValue::CUnion { tag, payload, .. } => write!(f, "{tag}({payload})"),
            CValue::CSome { value, .. } => write!(f, "Some({value})"),
            CValue::CNone { .. } => write!(f, "None"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_schema_follows_fields() {
        let v = CValue::product([
            ("id", CValue::CInt(7)),
            ("tags", CValue::list(vec![CValue::CString("a".into())])),
        ]);
        assert_eq!(
            v.ctype(),
            CType::product([("id", CType::Int), ("tags", CType::list(CType::String))])
        );
    }

    #[test]
    fn empty_list_has_nothing_element_type() {
        let v = CValue::list(vec![]);
        assert_eq!(v.ctype(), CType::list(CType::Nothing));
    }

    #[test]
    fn optional_round_trip() {
        let v = CValue::some(CValue::CInt(1));
        assert_eq!(v.ctype(), CType::optional(CType::Int));
        let n = CValue::none(CType::Int);
        assert_eq!(n.ctype(), CType::optional(CType::Int));
        assert_ne!(v, n);
    }

    #[test]
    fn bincode_round_trip_all_variants() {
        let values = vec![
            CValue::CString("s".into()),
            CValue::CInt(-3),
            CValue::CFloat(2.5),
            CValue::CBoolean(true),
            CValue::list(vec![CValue::CInt(1), CValue::CInt(2)]),
            CValue::CMap {
                pairs: vec![(CValue::CString("k".into()), CValue::CInt(9))],
                key_type: CType::String,
                value_type: CType::Int,
            },
            CValue::product([("a", CValue::CBoolean(false))]),
            CValue::CUnion {
                payload: Box::new(CValue::CInt(1)),
                variants: [("ok".to_string(), CType::Int)].into_iter().collect(),
                tag: "ok".into(),
            },
            CValue::some(CValue::CFloat(0.5)),
            CValue::none(CType::String),
        ];
        for v in values {
            let bytes = bincode::serialize(&v).expect("serialize");
            let back: CValue = bincode::deserialize(&bytes).expect("deserialize");
            assert_eq!(back, v);
        }
    }

    #[test]
    fn display_renders_nested_values() {
        let v = CValue::product([("xs", CValue::list(vec![CValue::CInt(1), CValue::CInt(2)]))]);
        assert_eq!(v.to_string(), "{xs: [1, 2]}");
    }
}
