//! Streaming JSON Bridge
//!
//! Converts external JSON payloads into [`CValue`]s matching a declared
//! [`CType`], without materializing an intermediate document tree: decoding
//! is a type-driven [`serde::de::DeserializeSeed`] over `serde_json`'s
//! incremental deserializer.
//!
//! Configurable limits enforce DoS resistance:
//! - `max_payload_bytes` - rejected before parsing starts
//! - `max_array_elements` - checked as elements stream in
//! - `max_nesting_depth` - checked on every container entry
//!
//! Unknown object fields are skipped (tolerant read). Unions are encoded as
//! `{"tag": ..., "value": ...}` with `tag` preceding `value`.

use super::{CType, CValue};
use serde::de::{self, DeserializeSeed, IgnoredAny, MapAccess, SeqAccess, Visitor};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;

/// Limits applied while decoding external payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct JsonLimits {
    /// Maximum payload size in bytes
    pub max_payload_bytes: usize,
    /// Maximum number of elements in any single array
    pub max_array_elements: usize,
    /// Maximum container nesting depth
    pub max_nesting_depth: usize,
}

impl Default for JsonLimits {
    fn default() -> Self {
        JsonLimits {
            max_payload_bytes: 1024 * 1024,
            max_array_elements: 10_000,
            max_nesting_depth: 32,
        }
    }
}

/// Decoding failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JsonBridgeError {
    #[error("payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("array exceeds limit of {limit} elements")]
    ArrayLimitExceeded { limit: usize },

    #[error("nesting exceeds limit of {limit} levels")]
    NestingLimitExceeded { limit: usize },

    #[error("decode error: {0}")]
    Decode(String),
}

/// Decode a JSON payload into a value of the given type
pub fn decode_json(
    payload: &[u8],
    ty: &CType,
    limits: &JsonLimits,
) -> Result<CValue, JsonBridgeError> {
    if payload.len() > limits.max_payload_bytes {
        return Err(JsonBridgeError::PayloadTooLarge {
            size: payload.len(),
            limit: limits.max_payload_bytes,
        });
    }

    let ctx = DecodeCtx {
        limits,
        violation: Cell::new(None),
    };
    let mut de = serde_json::Deserializer::from_slice(payload);
    let seed = TypedSeed {
        ty,
        depth: 0,
        ctx: &ctx,
    };
    let parsed = match seed.deserialize(&mut de) {
        Ok(value) => de.end().map(|()| value),
        Err(e) => Err(e),
    };
    match parsed {
        Ok(value) => Ok(value),
        // A recorded limit violation takes precedence over the serde error
        // it was smuggled through
        Err(e) => Err(ctx
            .violation
            .take()
            .unwrap_or_else(|| JsonBridgeError::Decode(e.to_string()))),
    }
}

/// Encode a value back to a JSON document
pub fn encode_json(value: &CValue) -> serde_json::Value {
    use serde_json::{json, Map, Number, Value};
    match value {
        CValue::CString(s) => Value::String(s.clone()),
        CValue::CInt(i) => Value::Number((*i).into()),
        CValue::CFloat(x) => Number::from_f64(*x).map_or(Value::Null, Value::Number),
        CValue::CBoolean(b) => Value::Bool(*b),
        CValue::CList { elements, .. } => Value::Array(elements.iter().map(encode_json).collect()),
        CValue::CMap {
            pairs, key_type, ..
        } => {
            if *key_type == CType::String {
                let mut map = Map::new();
                for (k, v) in pairs {
                    if let CValue::CString(key) = k {
                        map.insert(key.clone(), encode_json(v));
                    }
                }
                Value::Object(map)
            } else {
                Value::Array(
                    pairs
                        .iter()
                        .map(|(k, v)| Value::Array(vec![encode_json(k), encode_json(v)]))
                        .collect(),
                )
            }
        }
        CValue::CProduct { fields, .. } => Value::Object(
            fields
                .iter()
                .map(|(name, v)| (name.clone(), encode_json(v)))
                .collect(),
        ),
        CValue::CUnion { tag, payload, .. } => json!({ "tag": tag, "value": encode_json(payload) }),
        CValue::CSome { value, .. } => encode_json(value),
        CValue::CNone { .. } => Value::Null,
    }
}

// ============================================================================
// Type-driven decoding seeds
// ============================================================================

struct DecodeCtx<'l> {
    limits: &'l JsonLimits,
    violation: Cell<Option<JsonBridgeError>>,
}

impl DecodeCtx<'_> {
    /// Record a limit violation and produce the serde error carrying it out
    fn violate<E: de::Error>(&self, violation: JsonBridgeError) -> E {
        let msg = violation.to_string();
        self.violation.set(Some(violation));
        E::custom(msg)
    }

    fn enter<E: de::Error>(&self, depth: usize) -> Result<(), E> {
        if depth >= self.limits.max_nesting_depth {
            Err(self.violate(JsonBridgeError::NestingLimitExceeded {
                limit: self.limits.max_nesting_depth,
            }))
        } else {
            Ok(())
        }
    }
}

#[derive(Clone, Copy)]
struct TypedSeed<'a> {
    ty: &'a CType,
    depth: usize,
    ctx: &'a DecodeCtx<'a>,
}

impl<'de> DeserializeSeed<'de> for TypedSeed<'_> {
    type Value = CValue;

    fn deserialize<D>(self, deserializer: D) -> Result<CValue, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        match self.ty {
            CType::String => deserializer.deserialize_str(StringVisitor),
            CType::Int => deserializer.deserialize_i64(IntVisitor),
            CType::Float => deserializer.deserialize_f64(FloatVisitor),
            CType::Boolean => deserializer.deserialize_bool(BoolVisitor),
            CType::Nothing => Err(de::Error::custom("no value can inhabit type Nothing")),
            CType::Optional(inner) => deserializer.deserialize_option(OptionVisitor {
                inner,
                depth: self.depth,
                ctx: self.ctx,
            }),
            CType::List(elem) => deserializer.deserialize_seq(ListVisitor {
                elem,
                depth: self.depth,
                ctx: self.ctx,
            }),
            CType::Map(key, value) => {
                if **key == CType::String {
                    deserializer.deserialize_map(StringMapVisitor {
                        value_ty: value,
                        depth: self.depth,
                        ctx: self.ctx,
                    })
                } else {
                    deserializer.deserialize_seq(PairSeqVisitor {
                        key_ty: key,
                        value_ty: value,
                        depth: self.depth,
                        ctx: self.ctx,
                    })
                }
            }
            CType::Product(schema) => deserializer.deserialize_map(ProductVisitor {
                schema,
                depth: self.depth,
                ctx: self.ctx,
            }),
            CType::Union(variants) => deserializer.deserialize_map(UnionVisitor {
                variants,
                depth: self.depth,
                ctx: self.ctx,
            }),
        }
    }
}

struct StringVisitor;

impl Visitor<'_> for StringVisitor {
    type Value = CValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<CValue, E> {
        Ok(CValue::CString(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<CValue, E> {
        Ok(CValue::CString(v))
    }
}

struct IntVisitor;

impl Visitor<'_> for IntVisitor {
    type Value = CValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON integer")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<CValue, E> {
        Ok(CValue::CInt(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<CValue, E> {
        i64::try_from(v)
            .map(CValue::CInt)
            .map_err(|_| E::custom(format!("integer {v} out of range")))
    }
}

struct FloatVisitor;

impl Visitor<'_> for FloatVisitor {
    type Value = CValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON number")
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<CValue, E> {
        Ok(CValue::CFloat(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<CValue, E> {
        Ok(CValue::CFloat(v as f64))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<CValue, E> {
        Ok(CValue::CFloat(v as f64))
    }
}

struct BoolVisitor;

impl Visitor<'_> for BoolVisitor {
    type Value = CValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON boolean")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<CValue, E> {
        Ok(CValue::CBoolean(v))
    }
}

struct OptionVisitor<'a> {
    inner: &'a CType,
    depth: usize,
    ctx: &'a DecodeCtx<'a>,
}

impl<'de> Visitor<'de> for OptionVisitor<'_> {
    type Value = CValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON value or null")
    }

    fn visit_none<E: de::Error>(self) -> Result<CValue, E> {
        Ok(CValue::CNone {
            inner_type: self.inner.clone(),
        })
    }

    fn visit_unit<E: de::Error>(self) -> Result<CValue, E> {
        self.visit_none()
    }

    fn visit_some<D>(self, deserializer: D) -> Result<CValue, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        let value = TypedSeed {
            ty: self.inner,
            depth: self.depth,
            ctx: self.ctx,
        }
        .deserialize(deserializer)?;
        Ok(CValue::CSome {
            value: Box::new(value),
            inner_type: self.inner.clone(),
        })
    }
}

struct ListVisitor<'a> {
    elem: &'a CType,
    depth: usize,
    ctx: &'a DecodeCtx<'a>,
}

impl<'de> Visitor<'de> for ListVisitor<'_> {
    type Value = CValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON array")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<CValue, A::Error> {
        self.ctx.enter(self.depth)?;
        let mut elements = Vec::new();
        loop {
            let seed = TypedSeed {
                ty: self.elem,
                depth: self.depth + 1,
                ctx: self.ctx,
            };
            match seq.next_element_seed(seed)? {
                None => break,
                Some(v) => {
                    if elements.len() >= self.ctx.limits.max_array_elements {
                        return Err(self.ctx.violate(JsonBridgeError::ArrayLimitExceeded {
                            limit: self.ctx.limits.max_array_elements,
                        }));
                    }
                    elements.push(v);
                }
            }
        }
        Ok(CValue::CList {
            elements,
            elem_type: self.elem.clone(),
        })
    }
}

struct StringMapVisitor<'a> {
    value_ty: &'a CType,
    depth: usize,
    ctx: &'a DecodeCtx<'a>,
}

impl<'de> Visitor<'de> for StringMapVisitor<'_> {
    type Value = CValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<CValue, A::Error> {
        self.ctx.enter(self.depth)?;
        let mut pairs = Vec::new();
        while let Some(key) = map.next_key::<String>()? {
            let seed = TypedSeed {
                ty: self.value_ty,
                depth: self.depth + 1,
                ctx: self.ctx,
            };
            let value = map.next_value_seed(seed)?;
            if pairs.len() >= self.ctx.limits.max_array_elements {
                return Err(self.ctx.violate(JsonBridgeError::ArrayLimitExceeded {
                    limit: self.ctx.limits.max_array_elements,
                }));
            }
            pairs.push((CValue::CString(key), value));
        }
        Ok(CValue::CMap {
            pairs,
            key_type: CType::String,
            value_type: self.value_ty.clone(),
        })
    }
}

/// Non-string-keyed maps are encoded as arrays of `[key, value]` pairs
struct PairSeqVisitor<'a> {
    key_ty: &'a CType,
    value_ty: &'a CType,
    depth: usize,
    ctx: &'a DecodeCtx<'a>,
}

impl<'de> Visitor<'de> for PairSeqVisitor<'_> {
    type Value = CValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON array of [key, value] pairs")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<CValue, A::Error> {
        self.ctx.enter(self.depth)?;
        let mut pairs = Vec::new();
        loop {
            let seed = PairSeed {
                key_ty: self.key_ty,
                value_ty: self.value_ty,
                depth: self.depth + 1,
                ctx: self.ctx,
            };
            match seq.next_element_seed(seed)? {
                None => break,
                Some(pair) => {
                    if pairs.len() >= self.ctx.limits.max_array_elements {
                        return Err(self.ctx.violate(JsonBridgeError::ArrayLimitExceeded {
                            limit: self.ctx.limits.max_array_elements,
                        }));
                    }
                    pairs.push(pair);
                }
            }
        }
        Ok(CValue::CMap {
            pairs,
            key_type: self.key_ty.clone(),
            value_type: self.value_ty.clone(),
        })
    }
}

struct PairSeed<'a> {
    key_ty: &'a CType,
    value_ty: &'a CType,
    depth: usize,
    ctx: &'a DecodeCtx<'a>,
}

impl<'de> DeserializeSeed<'de> for PairSeed<'_> {
    type Value = (CValue, CValue);

    fn deserialize<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        struct PairVisitor<'a> {
            key_ty: &'a CType,
            value_ty: &'a CType,
            depth: usize,
            ctx: &'a DecodeCtx<'a>,
        }

        impl<'de> Visitor<'de> for PairVisitor<'_> {
            type Value = (CValue, CValue);

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a [key, value] pair")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                self.ctx.enter(self.depth)?;
                let key = seq
                    .next_element_seed(TypedSeed {
                        ty: self.key_ty,
                        depth: self.depth + 1,
                        ctx: self.ctx,
                    })?
                    .ok_or_else(|| de::Error::custom("missing map key"))?;
                let value = seq
                    .next_element_seed(TypedSeed {
                        ty: self.value_ty,
                        depth: self.depth + 1,
                        ctx: self.ctx,
                    })?
                    .ok_or_else(|| de::Error::custom("missing map value"))?;
                if seq.next_element::<IgnoredAny>()?.is_some() {
                    return Err(de::Error::custom("pair has more than two elements"));
                }
                Ok((key, value))
            }
        }

        deserializer.deserialize_seq(PairVisitor {
            key_ty: self.key_ty,
            value_ty: self.value_ty,
            depth: self.depth,
            ctx: self.ctx,
        })
    }
}

struct ProductVisitor<'a> {
    schema: &'a BTreeMap<String, CType>,
    depth: usize,
    ctx: &'a DecodeCtx<'a>,
}

impl<'de> Visitor<'de> for ProductVisitor<'_> {
    type Value = CValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<CValue, A::Error> {
        self.ctx.enter(self.depth)?;
        let mut fields: BTreeMap<String, CValue> = BTreeMap::new();
        while let Some(key) = map.next_key::<String>()? {
            match self.schema.get(&key) {
                Some(field_ty) => {
                    let seed = TypedSeed {
                        ty: field_ty,
                        depth: self.depth + 1,
                        ctx: self.ctx,
                    };
                    let value = map.next_value_seed(seed)?;
                    fields.insert(key, value);
                }
                // Tolerant read: unknown fields are skipped
                None => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        for (name, field_ty) in self.schema {
            if !fields.contains_key(name) {
                // Absent optional fields decode as CNone
                if let CType::Optional(inner) = field_ty {
                    fields.insert(
                        name.clone(),
                        CValue::CNone {
                            inner_type: (**inner).clone(),
                        },
                    );
                } else {
                    return Err(de::Error::custom(format!("missing field '{name}'")));
                }
            }
        }
        Ok(CValue::CProduct {
            fields,
            schema: self.schema.clone(),
        })
    }
}

struct UnionVisitor<'a> {
    variants: &'a BTreeMap<String, CType>,
    depth: usize,
    ctx: &'a DecodeCtx<'a>,
}

impl<'de> Visitor<'de> for UnionVisitor<'_> {
    type Value = CValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a {\"tag\": ..., \"value\": ...} object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<CValue, A::Error> {
        self.ctx.enter(self.depth)?;
        // Streaming requirement: tag must precede value so the value can be
        // decoded with the right seed in a single pass
        let first_key: String = map
            .next_key::<String>()?
            .ok_or_else(|| de::Error::custom("empty union object"))?;
        if first_key != "tag" {
            return Err(de::Error::custom(format!(
                "union objects must start with \"tag\", found \"{first_key}\""
            )));
        }
        let tag: String = map.next_value()?;
        let variant_ty = self
            .variants
            .get(&tag)
            .ok_or_else(|| de::Error::custom(format!("unknown union tag '{tag}'")))?;

        let value_key: String = map
            .next_key::<String>()?
            .ok_or_else(|| de::Error::custom("union object missing \"value\""))?;
        if value_key != "value" {
            return Err(de::Error::custom(format!(
                "expected \"value\" after \"tag\", found \"{value_key}\""
            )));
        }
        let payload = map.next_value_seed(TypedSeed {
            ty: variant_ty,
            depth: self.depth + 1,
            ctx: self.ctx,
        })?;
        while map.next_key::<IgnoredAny>()?.is_some() {
            map.next_value::<IgnoredAny>()?;
        }
        Ok(CValue::CUnion {
            payload: Box::new(payload),
            variants: self.variants.clone(),
            tag,
        })
    }
}
