//! Subtype Relation
//!
//! Structural, depth-limited subtyping over [`SemanticType`]:
//!
//! - `Nothing <: T` for every `T`; `T <: T` reflexively
//! - `List`, `Optional`, `Candidates` and record field types are covariant
//! - `Map` is invariant on keys, covariant on values
//! - Closed records use width + depth subtyping (extra fields allowed)
//! - Open records require their named fields with compatible types; extras
//!   are free
//! - Functions are contravariant in parameters, covariant in the return

use super::SemanticType;

/// Structural recursion bound; deeper types are rejected rather than risking
/// unbounded recursion on adversarial inputs
const MAX_DEPTH: usize = 64;

/// Is `sub` usable where `sup` is expected?
pub fn is_subtype(sub: &SemanticType, sup: &SemanticType) -> bool {
    check(sub, sup, 0).is_ok()
}

/// Human-readable reason why `sub` is not a subtype of `sup`, if it isn't
pub fn explain_failure(sub: &SemanticType, sup: &SemanticType) -> Option<String> {
    check(sub, sup, 0).err()
}

fn check(sub: &SemanticType, sup: &SemanticType, depth: usize) -> Result<(), String> {
    if depth > MAX_DEPTH {
        return Err(format!("type nesting exceeds depth limit {MAX_DEPTH}"));
    }

    match (sub, sup) {
        // Bottom type
        (SemanticType::Nothing, _) => Ok(()),

        // Reflexive scalars
        (SemanticType::Int, SemanticType::Int)
        | (SemanticType::Float, SemanticType::Float)
        | (SemanticType::String, SemanticType::String)
        | (SemanticType::Boolean, SemanticType::Boolean) => Ok(()),

        // Covariant wrappers
        (SemanticType::List(a), SemanticType::List(b))
        | (SemanticType::Optional(a), SemanticType::Optional(b))
        | (SemanticType::Candidates(a), SemanticType::Candidates(b)) => {
            check(a, b, depth + 1).map_err(|e| format!("element type: {e}"))
        }

        // Invariant keys, covariant values
        (SemanticType::Map(k1, v1), SemanticType::Map(k2, v2)) => {
            if k1 != k2 {
                return Err(format!("map key {k1} is not identical to {k2}"));
            }
            check(v1, v2, depth + 1).map_err(|e| format!("map value: {e}"))
        }

        // Width + depth record subtyping
        (SemanticType::Record(sub_fields), SemanticType::Record(sup_fields)) => {
            for (name, sup_ty) in sup_fields {
                match sub_fields.get(name) {
                    None => return Err(format!("missing field '{name}'")),
                    Some(sub_ty) => {
                        check(sub_ty, sup_ty, depth + 1)
                            .map_err(|e| format!("field '{name}': {e}"))?;
                    }
                }
            }
            Ok(())
        }

        // Closed record against an open record: required fields must match,
        // extras are captured by the row var at unification time
        (SemanticType::Record(sub_fields), SemanticType::OpenRecord(required, _)) => {
            for (name, sup_ty) in required {
                match sub_fields.get(name) {
                    None => return Err(format!("missing required field '{name}'")),
                    Some(sub_ty) => {
                        check(sub_ty, sup_ty, depth + 1)
                            .map_err(|e| format!("field '{name}': {e}"))?;
                    }
                }
            }
            Ok(())
        }

        // Open against open: the supertype's requirements are a subset
        (SemanticType::OpenRecord(sub_fields, _), SemanticType::OpenRecord(sup_fields, _)) => {
            for (name, sup_ty) in sup_fields {
                match sub_fields.get(name) {
                    None => return Err(format!("missing required field '{name}'")),
                    Some(sub_ty) => {
                        check(sub_ty, sup_ty, depth + 1)
                            .map_err(|e| format!("field '{name}': {e}"))?;
                    }
                }
            }
            Ok(())
        }

        // Functions: contravariant params, covariant return
        (SemanticType::Function(p1, r1), SemanticType::Function(p2, r2)) => {
            if p1.len() != p2.len() {
                return Err(format!(
                    "function arity {} does not match {}",
                    p1.len(),
                    p2.len()
                ));
            }
            for (i, (a, b)) in p1.iter().zip(p2.iter()).enumerate() {
                check(b, a, depth + 1).map_err(|e| format!("parameter {i}: {e}"))?;
            }
            check(r1, r2, depth + 1).map_err(|e| format!("return type: {e}"))
        }

        // Identical row vars only
        (SemanticType::RowVar(a), SemanticType::RowVar(b)) if a == b => Ok(()),

        _ => Err(format!("{sub} is not a subtype of {sup}")),
    }
}
