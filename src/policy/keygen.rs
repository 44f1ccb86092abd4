//! Deterministic Cache Keys
//!
//! A cache key is a keyed hash of `(module name, version, inputs)` where the
//! inputs are serialized canonically: map fields sorted by key, every value
//! tagged with its type, and separator characters escaped so `"a:b"` and
//! `"a","b"` can never collide. Equal logical inputs yield equal keys
//! regardless of map insertion order; any change to module name, version, or
//! any input value yields a different key.
//!
//! The final key is the URL-safe base64 (unpadded) encoding of the SHA-256
//! digest of the canonical string.

use crate::cvalue::CValue;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Generates cache keys for module invocations
#[derive(Debug, Clone, Default)]
pub struct CacheKeyGenerator {
    /// Optional version salt; bump to invalidate all prior keys for a module
    version: Option<String>,
}

impl CacheKeyGenerator {
    pub fn new() -> Self {
        CacheKeyGenerator { version: None }
    }

    pub fn with_version(version: impl Into<String>) -> Self {
        CacheKeyGenerator {
            version: Some(version.into()),
        }
    }

    /// Key for one invocation: module name plus its canonicalized inputs
    pub fn generate(&self, module_name: &str, inputs: &BTreeMap<String, CValue>) -> String {
        let mut canonical = String::new();
        canonical.push_str("module=");
        escape_into(module_name, &mut canonical);
        canonical.push(';');
        if let Some(version) = &self.version {
            canonical.push_str("version=");
            escape_into(version, &mut canonical);
            canonical.push(';');
        }
        for (port, value) in inputs {
            escape_into(port, &mut canonical);
            canonical.push('=');
            write_value(value, &mut canonical);
            canonical.push(';');
        }

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }
}

/// Escape the separator characters used by the canonical form
fn escape_into(s: &str, out: &mut String) {
    for c in s.chars() {
        if matches!(c, '\\' | ';' | '=' | ':' | ',' | '(' | ')' | '[' | ']' | '{' | '}') {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Type-tagged canonical rendering; every container sorts deterministically
fn write_value(value: &CValue, out: &mut String) {
    match value {
        CValue::CString(s) => {
            out.push_str("s:");
            escape_into(s, out);
        }
        CValue::CInt(i) => {
            out.push_str("i:");
            out.push_str(&i.to_string());
        }
        CValue::CFloat(x) => {
            out.push_str("f:");
            out.push_str(&x.to_bits().to_string());
        }
        CValue::CBoolean(b) => {
            out.push_str("b:");
            out.push_str(if *b { "1" } else { "0" });
        }
        CValue::CList { elements, .. } => {
            out.push_str("l:[");
            for (i, element) in elements.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(element, out);
            }
            out.push(']');
        }
        CValue::CMap { pairs, .. } => {
            // Pair order is not semantic; sort by the rendered key
            let mut rendered: Vec<(String, &CValue)> = pairs
                .iter()
                .map(|(k, v)| {
                    let mut key = String::new();
                    write_value(k, &mut key);
                    (key, v)
                })
                .collect();
            rendered.sort_by(|a, b| a.0.cmp(&b.0));
            out.push_str("m:{");
            for (i, (key, v)) in rendered.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(key);
                out.push(':');
                write_value(v, out);
            }
            out.push('}');
        }
        CValue::CProduct { fields, .. } => {
            out.push_str("p:{");
            for (i, (name, v)) in fields.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                escape_into(name, out);
                out.push(':');
                write_value(v, out);
            }
            out.push('}');
        }
        CValue::CUnion { tag, payload, .. } => {
            out.push_str("u:");
            escape_into(tag, out);
            out.push('(');
            write_value(payload, out);
            out.push(')');
        }
        CValue::CSome { value, .. } => {
            out.push_str("o:(");
            write_value(value, out);
            out.push(')');
        }
        CValue::CNone { .. } => {
            out.push_str("o:()");
        }
    }
}
