//! Expression Evaluation
//!
//! Interprets [`ExprSpec`] trees against bound parameters: inline transform
//! bodies (parameters are dependency data nodes) and lambda bodies
//! (parameters are the lambda's formals). All operations here are pure.

use crate::ast::{BinaryOp, UnaryOp};
use crate::cvalue::{CType, CValue};
use crate::ir::ExprSpec;
use crate::runtime::error::ExecutionError;
use std::collections::{BTreeMap, HashMap};

fn eval_err(message: impl Into<String>) -> ExecutionError {
    ExecutionError::Eval {
        message: message.into(),
    }
}

/// Evaluate an expression with the given parameter bindings
pub fn eval(expr: &ExprSpec, params: &HashMap<String, CValue>) -> Result<CValue, ExecutionError> {
    match expr {
        ExprSpec::Literal(value) => Ok(value.clone()),

        ExprSpec::Param(name) => params
            .get(name)
            .cloned()
            .ok_or_else(|| ExecutionError::LambdaParameterNotBound { name: name.clone() }),

        ExprSpec::Record(fields) => {
            let mut values = Vec::with_capacity(fields.len());
            for (name, field_expr) in fields {
                values.push((name.clone(), eval(field_expr, params)?));
            }
            Ok(CValue::product(values))
        }

        ExprSpec::ListOf(elements, elem_type) => {
            let mut values = Vec::with_capacity(elements.len());
            for element in elements {
                values.push(eval(element, params)?);
            }
            Ok(CValue::CList {
                elements: values,
                elem_type: elem_type.clone(),
            })
        }

        ExprSpec::FieldAccess(base, field) => field_access(&eval(base, params)?, field),

        ExprSpec::Projection(base, fields) => project(&eval(base, params)?, fields),

        ExprSpec::Merge(left, right) => {
            merge_values(&eval(left, params)?, &eval(right, params)?)
        }

        ExprSpec::SomeOf(inner) => Ok(CValue::some(eval(inner, params)?)),

        ExprSpec::NoneOf(inner_type) => Ok(CValue::CNone {
            inner_type: inner_type.clone(),
        }),

        ExprSpec::Conditional(condition, then_branch, else_branch) => {
            match eval(condition, params)? {
                CValue::CBoolean(true) => eval(then_branch, params),
                CValue::CBoolean(false) => eval(else_branch, params),
                other => Err(eval_err(format!(
                    "condition evaluated to {other}, expected a boolean"
                ))),
            }
        }

        ExprSpec::Coalesce(left, right) => match eval(left, params)? {
            CValue::CSome { value, .. } => Ok(*value),
            CValue::CNone { .. } => eval(right, params),
            other => Err(eval_err(format!(
                "'??' applied to non-optional value {other}"
            ))),
        },

        ExprSpec::Binary(op, left, right) => {
            binary_op(*op, &eval(left, params)?, &eval(right, params)?)
        }

        ExprSpec::Unary(op, operand) => unary_op(*op, &eval(operand, params)?),
    }
}

/// Structural merge, right wins on shared fields. Lists of records broadcast
/// a record operand into every element; two lists merge pairwise.
pub fn merge_values(left: &CValue, right: &CValue) -> Result<CValue, ExecutionError> {
    match (left, right) {
        (
            CValue::CProduct {
                fields: lf,
                schema: ls,
            },
            CValue::CProduct {
                fields: rf,
                schema: rs,
            },
        ) => {
            let mut fields = lf.clone();
            let mut schema = ls.clone();
            for (name, value) in rf {
                fields.insert(name.clone(), value.clone());
            }
            for (name, ty) in rs {
                schema.insert(name.clone(), ty.clone());
            }
            Ok(CValue::CProduct { fields, schema })
        }

        (CValue::CList { elements, .. }, CValue::CProduct { .. }) => {
            broadcast(elements, |element| merge_values(element, right))
        }

        (CValue::CProduct { .. }, CValue::CList { elements, .. }) => {
            broadcast(elements, |element| merge_values(left, element))
        }

        (
            CValue::CList { elements: le, .. },
            CValue::CList { elements: re, .. },
        ) => {
            if le.len() != re.len() {
                return Err(eval_err(format!(
                    "cannot merge candidate sets of different sizes ({} vs {})",
                    le.len(),
                    re.len()
                )));
            }
            let mut merged = Vec::with_capacity(le.len());
            for (l, r) in le.iter().zip(re.iter()) {
                merged.push(merge_values(l, r)?);
            }
            let elem_type = merged.first().map_or(CType::Nothing, CValue::ctype);
            Ok(CValue::CList {
                elements: merged,
                elem_type,
            })
        }

        _ => Err(eval_err(format!(
            "cannot merge {} with {}",
            left.ctype(),
            right.ctype()
        ))),
    }
}

fn broadcast(
    elements: &[CValue],
    f: impl Fn(&CValue) -> Result<CValue, ExecutionError>,
) -> Result<CValue, ExecutionError> {
    let mut merged = Vec::with_capacity(elements.len());
    for element in elements {
        merged.push(f(element)?);
    }
    let elem_type = merged.first().map_or(CType::Nothing, CValue::ctype);
    Ok(CValue::CList {
        elements: merged,
        elem_type,
    })
}

fn field_access(base: &CValue, field: &str) -> Result<CValue, ExecutionError> {
    match base {
        CValue::CProduct { fields, .. } => fields
            .get(field)
            .cloned()
            .ok_or_else(|| eval_err(format!("field '{field}' not present"))),
        CValue::CList { elements, .. } => broadcast(elements, |e| field_access(e, field)),
        other => Err(eval_err(format!(
            "field access on non-record value {}",
            other.ctype()
        ))),
    }
}

fn project(base: &CValue, keep: &[String]) -> Result<CValue, ExecutionError> {
    match base {
        CValue::CProduct { fields, schema } => {
            let mut projected_fields = BTreeMap::new();
            let mut projected_schema = BTreeMap::new();
            for name in keep {
                match (fields.get(name), schema.get(name)) {
                    (Some(value), Some(ty)) => {
                        projected_fields.insert(name.clone(), value.clone());
                        projected_schema.insert(name.clone(), ty.clone());
                    }
                    _ => return Err(eval_err(format!("field '{name}' not present"))),
                }
            }
            Ok(CValue::CProduct {
                fields: projected_fields,
                schema: projected_schema,
            })
        }
        CValue::CList { elements, .. } => broadcast(elements, |e| project(e, keep)),
        other => Err(eval_err(format!(
            "projection on non-record value {}",
            other.ctype()
        ))),
    }
}

fn binary_op(op: BinaryOp, left: &CValue, right: &CValue) -> Result<CValue, ExecutionError> {
    use BinaryOp::*;
    match op {
        Add | Sub | Mul | Div => arithmetic(op, left, right),
        Eq => Ok(CValue::CBoolean(left == right)),
        Ne => Ok(CValue::CBoolean(left != right)),
        Lt | Gt | Le | Ge => ordering(op, left, right),
        And | Or => match (left, right) {
            (CValue::CBoolean(l), CValue::CBoolean(r)) => Ok(CValue::CBoolean(match op {
                And => *l && *r,
                _ => *l || *r,
            })),
            _ => Err(eval_err(format!(
                "'{}' requires boolean operands",
                op.symbol()
            ))),
        },
    }
}

fn arithmetic(op: BinaryOp, left: &CValue, right: &CValue) -> Result<CValue, ExecutionError> {
    use BinaryOp::*;
    match (left, right) {
        // Record/candidate merge arrives through Add on mergeable values
        (CValue::CProduct { .. } | CValue::CList { .. }, _) if op == Add => {
            merge_values(left, right)
        }
        (CValue::CInt(l), CValue::CInt(r)) => {
            let result = match op {
                Add => l.checked_add(*r),
                Sub => l.checked_sub(*r),
                Mul => l.checked_mul(*r),
                Div => {
                    if *r == 0 {
                        return Err(eval_err("integer division by zero"));
                    }
                    l.checked_div(*r)
                }
                _ => None,
            };
            result
                .map(CValue::CInt)
                .ok_or_else(|| eval_err("integer overflow"))
        }
        (CValue::CFloat(l), CValue::CFloat(r)) => Ok(CValue::CFloat(match op {
            Add => l + r,
            Sub => l - r,
            Mul => l * r,
            Div => l / r,
            _ => return Err(eval_err("unsupported float operation")),
        })),
        _ => Err(eval_err(format!(
            "'{}' not supported for {} and {}",
            op.symbol(),
            left.ctype(),
            right.ctype()
        ))),
    }
}

fn ordering(op: BinaryOp, left: &CValue, right: &CValue) -> Result<CValue, ExecutionError> {
    use BinaryOp::*;
    let cmp = match (left, right) {
        (CValue::CInt(l), CValue::CInt(r)) => l.partial_cmp(r),
        (CValue::CFloat(l), CValue::CFloat(r)) => l.partial_cmp(r),
        _ => None,
    };
    match cmp {
        Some(ordering) => Ok(CValue::CBoolean(match op {
            Lt => ordering.is_lt(),
            Gt => ordering.is_gt(),
            Le => ordering.is_le(),
            Ge => ordering.is_ge(),
            _ => false,
        })),
        None => Err(eval_err(format!(
            "'{}' not supported for {} and {}",
            op.symbol(),
            left.ctype(),
            right.ctype()
        ))),
    }
}

fn unary_op(op: UnaryOp, operand: &CValue) -> Result<CValue, ExecutionError> {
    match (op, operand) {
        (UnaryOp::Not, CValue::CBoolean(b)) => Ok(CValue::CBoolean(!b)),
        (UnaryOp::Neg, CValue::CInt(i)) => Ok(CValue::CInt(-i)),
        (UnaryOp::Neg, CValue::CFloat(x)) => Ok(CValue::CFloat(-x)),
        _ => Err(eval_err(format!(
            "unary operator not supported for {}",
            operand.ctype()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: Vec<(&str, CValue)>) -> HashMap<String, CValue> {
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn unbound_parameter_is_reported() {
        let err = eval(&ExprSpec::Param("ghost".into()), &HashMap::new())
            .expect_err("should fail");
        assert!(matches!(
            err,
            ExecutionError::LambdaParameterNotBound { name } if name == "ghost"
        ));
    }

    #[test]
    fn merge_right_wins() {
        let left = CValue::product([("x", CValue::CInt(1)), ("y", CValue::CInt(2))]);
        let right = CValue::product([
            ("y", CValue::CString("b".into())),
            ("z", CValue::CString("c".into())),
        ]);
        let merged = merge_values(&left, &right).expect("merge");
        assert_eq!(merged.field("x"), Some(&CValue::CInt(1)));
        assert_eq!(merged.field("y"), Some(&CValue::CString("b".into())));
        assert_eq!(merged.field("z"), Some(&CValue::CString("c".into())));
    }

    #[test]
    fn candidates_broadcast_a_record() {
        let rows = CValue::list(vec![
            CValue::product([("id", CValue::CInt(1))]),
            CValue::product([("id", CValue::CInt(2))]),
        ]);
        let context = CValue::product([("tag", CValue::CString("t".into()))]);
        let merged = merge_values(&rows, &context).expect("broadcast");
        match merged {
            CValue::CList { elements, .. } => {
                assert_eq!(elements.len(), 2);
                for element in elements {
                    assert_eq!(
                        element.field("tag"),
                        Some(&CValue::CString("t".into()))
                    );
                }
            }
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn conditional_picks_the_active_branch() {
        let expr = ExprSpec::Conditional(
            Box::new(ExprSpec::Param("flag".into())),
            Box::new(ExprSpec::Literal(CValue::CInt(1))),
            Box::new(ExprSpec::Literal(CValue::CInt(2))),
        );
        assert_eq!(
            eval(&expr, &params(vec![("flag", CValue::CBoolean(true))])).expect("then"),
            CValue::CInt(1)
        );
        assert_eq!(
            eval(&expr, &params(vec![("flag", CValue::CBoolean(false))])).expect("else"),
            CValue::CInt(2)
        );
    }

    #[test]
    fn coalesce_unwraps_or_defaults() {
        let expr = ExprSpec::Coalesce(
            Box::new(ExprSpec::Param("v".into())),
            Box::new(ExprSpec::Literal(CValue::CInt(0))),
        );
        assert_eq!(
            eval(&expr, &params(vec![("v", CValue::some(CValue::CInt(5)))])).expect("some"),
            CValue::CInt(5)
        );
        assert_eq!(
            eval(&expr, &params(vec![("v", CValue::none(CType::Int))])).expect("none"),
            CValue::CInt(0)
        );
    }

    #[test]
    fn arithmetic_and_comparisons() {
        let add = ExprSpec::Binary(
            BinaryOp::Add,
            Box::new(ExprSpec::Literal(CValue::CInt(2))),
            Box::new(ExprSpec::Literal(CValue::CInt(3))),
        );
        assert_eq!(eval(&add, &HashMap::new()).expect("add"), CValue::CInt(5));

        let lt = ExprSpec::Binary(
            BinaryOp::Lt,
            Box::new(ExprSpec::Literal(CValue::CFloat(1.0))),
            Box::new(ExprSpec::Literal(CValue::CFloat(2.0))),
        );
        assert_eq!(
            eval(&lt, &HashMap::new()).expect("lt"),
            CValue::CBoolean(true)
        );
    }

    #[test]
    fn division_by_zero_is_an_eval_error() {
        let div = ExprSpec::Binary(
            BinaryOp::Div,
            Box::new(ExprSpec::Literal(CValue::CInt(1))),
            Box::new(ExprSpec::Literal(CValue::CInt(0))),
        );
        assert!(matches!(
            eval(&div, &HashMap::new()),
            Err(ExecutionError::Eval { .. })
        ));
    }

    #[test]
    fn projection_on_candidates() {
        let rows = CValue::list(vec![CValue::product([
            ("a", CValue::CInt(1)),
            ("b", CValue::CInt(2)),
        ])]);
        let projected = project(&rows, &["a".to_string()]).expect("project");
        match projected {
            CValue::CList { elements, .. } => {
                assert_eq!(elements[0].field("a"), Some(&CValue::CInt(1)));
                assert_eq!(elements[0].field("b"), None);
            }
            other => panic!("expected list, got {other:?}"),
        }
    }
}
