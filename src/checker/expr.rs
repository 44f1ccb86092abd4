//! Expression Checking and Inference
//!
//! The two mutually recursive judgments of the bidirectional algorithm:
//! [`infer`] synthesizes a type, [`check`] pushes an expected type down
//! (which is how unannotated lambdas receive their parameter types).

use super::error::CompileError;
use super::typed::TypedExpression;
use super::CheckContext;
use crate::ast::{BinaryOp, CallOption, Expression, Literal, Span, UnaryOp};
use crate::cvalue::CValue;
use crate::policy::{
    BackoffStrategy, CircuitBreakerConfig, ErrorStrategy, ModuleCallOptions, PriorityLevel,
};
use crate::types::rows::{apply_substitution, unify_closed_with_open, RowSubstitution};
use crate::types::{explain_failure, is_subtype, SemanticType};
use std::collections::BTreeMap;

/// Synthesize the type of an expression
pub(super) fn infer(
    ctx: &mut CheckContext<'_>,
    expr: &Expression,
) -> Result<TypedExpression, CompileError> {
    match expr {
        Expression::Literal { value, span } => Ok(TypedExpression::Literal {
            ty: literal_type(value),
            value: value.clone(),
            span: *span,
        }),

        Expression::ListLiteral { elements, span } => {
            let mut typed = Vec::with_capacity(elements.len());
            let mut elem_ty = SemanticType::Nothing;
            for element in elements {
                let te = infer(ctx, element)?;
                elem_ty = match elem_ty.lub(te.ty()) {
                    Some(t) => t,
                    None => {
                        return Err(CompileError::TypeMismatch {
                            expected: elem_ty,
                            actual: te.ty().clone(),
                            span: te.span(),
                            detail: Some("list elements must share a type".to_string()),
                        })
                    }
                };
                typed.push(te);
            }
            Ok(TypedExpression::ListLiteral {
                elements: typed,
                ty: SemanticType::list(elem_ty),
                span: *span,
            })
        }

        Expression::Variable { name, span } => match ctx.env.lookup(name) {
            Some(ty) => {
                ctx.used_names.insert(name.clone());
                Ok(TypedExpression::Variable {
                    name: name.clone(),
                    ty: ty.clone(),
                    span: *span,
                })
            }
            None => Err(CompileError::UndefinedVariable {
                name: name.clone(),
                span: *span,
            }),
        },

        Expression::Record { fields, span } => {
            let mut typed_fields = Vec::with_capacity(fields.len());
            let mut field_types = BTreeMap::new();
            for (name, value) in fields {
                let te = infer(ctx, value)?;
                field_types.insert(name.clone(), te.ty().clone());
                typed_fields.push((name.clone(), te));
            }
            Ok(TypedExpression::Record {
                fields: typed_fields,
                ty: SemanticType::Record(field_types),
                span: *span,
            })
        }

        Expression::Projection { base, fields, span } => {
            let typed_base = infer(ctx, base)?;
            let ty = project_type(typed_base.ty(), fields, *span)?;
            Ok(TypedExpression::Projection {
                base: Box::new(typed_base),
                fields: fields.clone(),
                ty,
                span: *span,
            })
        }

        Expression::FieldAccess { base, field, span } => {
            let typed_base = infer(ctx, base)?;
            let ty = field_access_type(typed_base.ty(), field, *span)?;
            Ok(TypedExpression::FieldAccess {
                base: Box::new(typed_base),
                field: field.clone(),
                ty,
                span: *span,
            })
        }

        Expression::Conditional {
            condition,
            then_branch,
            else_branch,
            span,
        } => {
            let typed_cond = check_boolean(ctx, condition)?;
            let typed_then = infer(ctx, then_branch)?;
            let typed_else = infer(ctx, else_branch)?;
            let ty = match typed_then.ty().lub(typed_else.ty()) {
                Some(t) => t,
                None => {
                    return Err(CompileError::TypeMismatch {
                        expected: typed_then.ty().clone(),
                        actual: typed_else.ty().clone(),
                        span: typed_else.span(),
                        detail: Some("conditional branches must unify".to_string()),
                    })
                }
            };
            Ok(TypedExpression::Conditional {
                condition: Box::new(typed_cond),
                then_branch: Box::new(typed_then),
                else_branch: Box::new(typed_else),
                ty,
                span: *span,
            })
        }

        Expression::Guard {
            value,
            condition,
            span,
        } => {
            let typed_value = infer(ctx, value)?;
            let typed_cond = check_boolean(ctx, condition)?;
            let ty = SemanticType::optional(typed_value.ty().clone());
            Ok(TypedExpression::Guard {
                value: Box::new(typed_value),
                condition: Box::new(typed_cond),
                ty,
                span: *span,
            })
        }

        Expression::Coalesce { left, right, span } => {
            let typed_left = infer(ctx, left)?;
            let inner = match typed_left.ty() {
                SemanticType::Optional(inner) => (**inner).clone(),
                other => {
                    return Err(CompileError::TypeError {
                        message: format!("'??' requires an Optional left operand, found {other}"),
                        span: typed_left.span(),
                    })
                }
            };
            let typed_right = infer(ctx, right)?;
            let ty = match inner.lub(typed_right.ty()) {
                Some(t) => t,
                None => {
                    return Err(CompileError::TypeMismatch {
                        expected: inner,
                        actual: typed_right.ty().clone(),
                        span: typed_right.span(),
                        detail: Some("'??' operands must unify".to_string()),
                    })
                }
            };
            Ok(TypedExpression::Coalesce {
                left: Box::new(typed_left),
                right: Box::new(typed_right),
                ty,
                span: *span,
            })
        }

        Expression::Call {
            namespace,
            function,
            args,
            options,
            span,
        } => infer_call(ctx, namespace.as_deref(), function, args, options, *span),

        Expression::Lambda { params, body, span } => {
            // Inference mode requires explicit parameter annotations
            let mut param_types = Vec::with_capacity(params.len());
            for (name, annotation) in params {
                match annotation {
                    Some(ty_expr) => {
                        param_types.push((name.clone(), ctx.resolve_type(ty_expr, *span)?));
                    }
                    None => return Err(CompileError::LambdaNeedsAnnotation { span: *span }),
                }
            }
            ctx.env.push_scope();
            for (name, ty) in &param_types {
                ctx.env.bind(name.clone(), ty.clone());
            }
            let typed_body = infer(ctx, body);
            ctx.env.pop_scope();
            let typed_body = typed_body?;
            let ty = SemanticType::function(
                param_types.iter().map(|(_, t)| t.clone()).collect(),
                typed_body.ty().clone(),
            );
            Ok(TypedExpression::Lambda {
                params: param_types,
                body: Box::new(typed_body),
                ty,
                span: *span,
            })
        }

        Expression::Binary {
            op,
            left,
            right,
            span,
        } => infer_binary(ctx, *op, left, right, *span),

        Expression::Unary { op, operand, span } => {
            let typed = infer(ctx, operand)?;
            let ty = match op {
                UnaryOp::Not => {
                    if typed.ty() != &SemanticType::Boolean {
                        return Err(CompileError::TypeMismatch {
                            expected: SemanticType::Boolean,
                            actual: typed.ty().clone(),
                            span: typed.span(),
                            detail: None,
                        });
                    }
                    SemanticType::Boolean
                }
                UnaryOp::Neg => {
                    if !typed.ty().is_numeric() {
                        return Err(CompileError::TypeError {
                            message: format!("cannot negate {}", typed.ty()),
                            span: typed.span(),
                        });
                    }
                    typed.ty().clone()
                }
            };
            Ok(TypedExpression::Unary {
                op: *op,
                operand: Box::new(typed),
                ty,
                span: *span,
            })
        }
    }
}

/// Check an expression against an expected type (subsumption everywhere
/// except lambdas, which inherit parameter types from the expectation)
pub(super) fn check(
    ctx: &mut CheckContext<'_>,
    expr: &Expression,
    expected: &SemanticType,
) -> Result<TypedExpression, CompileError> {
    if let Expression::Lambda { params, body, span } = expr {
        if let SemanticType::Function(param_types, return_type) = expected {
            if params.len() != param_types.len() {
                return Err(CompileError::LambdaArityMismatch {
                    expected: param_types.len(),
                    actual: params.len(),
                    span: *span,
                });
            }
            let bound: Vec<(String, SemanticType)> = params
                .iter()
                .zip(param_types.iter())
                .map(|((name, _), ty)| (name.clone(), ty.clone()))
                .collect();
            ctx.env.push_scope();
            for (name, ty) in &bound {
                ctx.env.bind(name.clone(), ty.clone());
            }
            let typed_body = check(ctx, body, return_type);
            ctx.env.pop_scope();
            let typed_body = typed_body?;
            return Ok(TypedExpression::Lambda {
                params: bound,
                body: Box::new(typed_body),
                ty: expected.clone(),
                span: *span,
            });
        }
    }

    let typed = infer(ctx, expr)?;
    if is_subtype(typed.ty(), expected) {
        Ok(typed)
    } else {
        Err(CompileError::TypeMismatch {
            expected: expected.clone(),
            actual: typed.ty().clone(),
            span: typed.span(),
            detail: explain_failure(typed.ty(), expected),
        })
    }
}

// ============================================================================
// Calls
// ============================================================================

fn infer_call(
    ctx: &mut CheckContext<'_>,
    namespace: Option<&str>,
    function: &str,
    args: &[Expression],
    options: &[CallOption],
    span: Span,
) -> Result<TypedExpression, CompileError> {
    let signature = match namespace {
        Some(ns_or_alias) => {
            let ns = ctx.resolve_namespace(ns_or_alias);
            ctx.registry.get_qualified(&ns, function).ok_or_else(|| {
                CompileError::UndefinedFunction {
                    name: format!("{ns_or_alias}::{function}"),
                    span,
                }
            })?
        }
        None => ctx
            .registry
            .lookup(function, &ctx.imports)
            .map_err(|e| match e {
                crate::registry::LookupError::NotFound(name) => {
                    CompileError::UndefinedFunction { name, span }
                }
                crate::registry::LookupError::Ambiguous { name, candidates } => {
                    CompileError::AmbiguousFunction {
                        name,
                        candidates,
                        span,
                    }
                }
            })?,
    };

    // Row-polymorphic signatures get fresh row vars per call site
    let signature = if signature.is_row_polymorphic() {
        signature.instantiate(ctx.row_gen)
    } else {
        signature
    };

    if args.len() != signature.params.len() {
        return Err(CompileError::TypeError {
            message: format!(
                "'{function}' takes {} arguments but {} were supplied",
                signature.params.len(),
                args.len()
            ),
            span,
        });
    }

    let mut subst = RowSubstitution::new();
    let mut typed_args = Vec::with_capacity(args.len());
    for (arg, param) in args.iter().zip(signature.params.iter()) {
        match param {
            SemanticType::Function(..) if matches!(arg, Expression::Lambda { .. }) => {
                typed_args.push(check(ctx, arg, param)?);
            }
            SemanticType::OpenRecord(required, row) => {
                let typed = infer(ctx, arg)?;
                match typed.ty() {
                    SemanticType::Record(closed_fields) => {
                        match unify_closed_with_open(closed_fields, required, *row) {
                            Ok(s) => subst.extend(s),
                            Err(row_err) => {
                                return Err(CompileError::TypeMismatch {
                                    expected: param.clone(),
                                    actual: typed.ty().clone(),
                                    span: typed.span(),
                                    detail: Some(row_err.to_string()),
                                })
                            }
                        }
                    }
                    other => {
                        return Err(CompileError::TypeMismatch {
                            expected: param.clone(),
                            actual: other.clone(),
                            span: typed.span(),
                            detail: Some("an open record parameter requires a record".to_string()),
                        })
                    }
                }
                typed_args.push(typed);
            }
            _ => {
                let typed = infer(ctx, arg)?;
                if !is_subtype(typed.ty(), param) {
                    return Err(CompileError::TypeMismatch {
                        expected: param.clone(),
                        actual: typed.ty().clone(),
                        span: typed.span(),
                        detail: explain_failure(typed.ty(), param),
                    });
                }
                typed_args.push(typed);
            }
        }
    }

    let return_type = apply_substitution(&signature.returns, &subst);
    let options = convert_options(options, span)?;
    Ok(TypedExpression::Call {
        signature,
        args: typed_args,
        options,
        ty: return_type,
        span,
    })
}

/// Convert surface call options to the policy vocabulary
fn convert_options(
    options: &[CallOption],
    span: Span,
) -> Result<ModuleCallOptions, CompileError> {
    let mut out = ModuleCallOptions::default();
    let mut breaker: Option<CircuitBreakerConfig> = None;
    for option in options {
        let name = option.name.as_str();
        match name {
            "retry" => out.retry = Some(expect_u32(name, &option.value, span)?),
            "delayMs" => out.delay_ms = Some(expect_u64(name, &option.value, span)?),
            "maxDelayMs" => out.max_delay_ms = Some(expect_u64(name, &option.value, span)?),
            "timeoutMs" => out.timeout_ms = Some(expect_u64(name, &option.value, span)?),
            "cacheMs" => out.cache_ms = Some(expect_u64(name, &option.value, span)?),
            "throttlePerMs" => out.throttle_per_ms = Some(expect_u64(name, &option.value, span)?),
            "throttleCount" => out.throttle_count = Some(expect_u32(name, &option.value, span)?),
            "concurrency" => out.concurrency = Some(expect_u32(name, &option.value, span)?),
            "lazy" => match option.value {
                Literal::Bool(b) => out.lazy = Some(b),
                ref other => return Err(option_type_error(name, other, "a boolean", span)),
            },
            "cacheBackend" => match &option.value {
                Literal::Str(s) => out.cache_backend = Some(s.clone()),
                other => return Err(option_type_error(name, other, "a string", span)),
            },
            "backoff" => match &option.value {
                Literal::Str(s) => {
                    out.backoff = Some(match s.as_str() {
                        "fixed" => BackoffStrategy::Fixed,
                        "linear" => BackoffStrategy::Linear,
                        "exponential" => BackoffStrategy::Exponential,
                        other => {
                            return Err(CompileError::TypeError {
                                message: format!("unknown backoff strategy '{other}'"),
                                span,
                            })
                        }
                    });
                }
                other => return Err(option_type_error(name, other, "a string", span)),
            },
            "onError" => match &option.value {
                Literal::Str(s) => {
                    out.on_error = Some(match s.as_str() {
                        "propagate" => ErrorStrategy::Propagate,
                        "skip" => ErrorStrategy::Skip,
                        "log" => ErrorStrategy::Log,
                        "wrap" => ErrorStrategy::Wrap,
                        other => {
                            return Err(CompileError::TypeError {
                                message: format!("unknown error strategy '{other}'"),
                                span,
                            })
                        }
                    });
                }
                other => return Err(option_type_error(name, other, "a string", span)),
            },
            "priority" => match &option.value {
                Literal::Int(i) if (0..=100).contains(i) => {
                    out.priority = Some(PriorityLevel::new(*i as u8));
                }
                Literal::Str(s) => {
                    out.priority = Some(match s.as_str() {
                        "low" => PriorityLevel::LOW,
                        "normal" => PriorityLevel::NORMAL,
                        "high" => PriorityLevel::HIGH,
                        "critical" => PriorityLevel::CRITICAL,
                        other => {
                            return Err(CompileError::TypeError {
                                message: format!("unknown priority '{other}'"),
                                span,
                            })
                        }
                    });
                }
                other => return Err(option_type_error(name, other, "0..=100 or a level name", span)),
            },
            "circuitBreakerThreshold" => {
                breaker.get_or_insert_with(CircuitBreakerConfig::default).failure_threshold =
                    expect_u32(name, &option.value, span)?;
            }
            "circuitBreakerResetMs" => {
                breaker.get_or_insert_with(CircuitBreakerConfig::default).reset_duration_ms =
                    expect_u64(name, &option.value, span)?;
            }
            "circuitBreakerProbes" => {
                breaker
                    .get_or_insert_with(CircuitBreakerConfig::default)
                    .half_open_max_probes = expect_u32(name, &option.value, span)?;
            }
            "fallback" => {
                out.fallback = Some(match &option.value {
                    Literal::Int(i) => CValue::CInt(*i),
                    Literal::Float(x) => CValue::CFloat(*x),
                    Literal::Str(s) => CValue::CString(s.clone()),
                    Literal::Bool(b) => CValue::CBoolean(*b),
                });
            }
            other => {
                return Err(CompileError::TypeError {
                    message: format!("unknown call option '{other}'"),
                    span,
                })
            }
        }
    }
    out.circuit_breaker = breaker;
    Ok(out)
}

fn expect_u32(name: &str, value: &Literal, span: Span) -> Result<u32, CompileError> {
    match value {
        Literal::Int(i) if *i >= 0 => Ok(*i as u32),
        other => Err(option_type_error(name, other, "a non-negative integer", span)),
    }
}

fn expect_u64(name: &str, value: &Literal, span: Span) -> Result<u64, CompileError> {
    match value {
        Literal::Int(i) if *i >= 0 => Ok(*i as u64),
        other => Err(option_type_error(name, other, "a non-negative integer", span)),
    }
}

fn option_type_error(name: &str, value: &Literal, wanted: &str, span: Span) -> CompileError {
    CompileError::TypeError {
        message: format!("call option '{name}' expects {wanted}, found {value:?}"),
        span,
    }
}

// ============================================================================
// Binary operators
// ============================================================================

fn infer_binary(
    ctx: &mut CheckContext<'_>,
    op: BinaryOp,
    left: &Expression,
    right: &Expression,
    span: Span,
) -> Result<TypedExpression, CompileError> {
    let typed_left = infer(ctx, left)?;
    let typed_right = infer(ctx, right)?;
    let (lt, rt) = (typed_left.ty().clone(), typed_right.ty().clone());

    match op {
        BinaryOp::Add => {
            if lt.is_mergeable() || rt.is_mergeable() {
                let ty = merge_type(&lt, &rt, span)?;
                return Ok(TypedExpression::Merge {
                    left: Box::new(typed_left),
                    right: Box::new(typed_right),
                    ty,
                    span,
                });
            }
            arithmetic_result(op, typed_left, typed_right, span)
        }
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            arithmetic_result(op, typed_left, typed_right, span)
        }
        BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => {
            if op.is_ordering() && !(lt.is_numeric() && rt.is_numeric()) {
                return Err(CompileError::UnsupportedComparison {
                    op: op.symbol().to_string(),
                    left: lt,
                    right: rt,
                    span,
                });
            }
            if lt != rt {
                return Err(CompileError::UnsupportedComparison {
                    op: op.symbol().to_string(),
                    left: lt,
                    right: rt,
                    span,
                });
            }
            Ok(TypedExpression::Binary {
                op,
                left: Box::new(typed_left),
                right: Box::new(typed_right),
                ty: SemanticType::Boolean,
                span,
            })
        }
        BinaryOp::And | BinaryOp::Or => {
            for operand in [&typed_left, &typed_right] {
                if operand.ty() != &SemanticType::Boolean {
                    return Err(CompileError::TypeMismatch {
                        expected: SemanticType::Boolean,
                        actual: operand.ty().clone(),
                        span: operand.span(),
                        detail: None,
                    });
                }
            }
            Ok(TypedExpression::Binary {
                op,
                left: Box::new(typed_left),
                right: Box::new(typed_right),
                ty: SemanticType::Boolean,
                span,
            })
        }
    }
}

fn arithmetic_result(
    op: BinaryOp,
    typed_left: TypedExpression,
    typed_right: TypedExpression,
    span: Span,
) -> Result<TypedExpression, CompileError> {
    let (lt, rt) = (typed_left.ty().clone(), typed_right.ty().clone());
    if lt.is_numeric() && lt == rt {
        let ty = lt;
        Ok(TypedExpression::Binary {
            op,
            left: Box::new(typed_left),
            right: Box::new(typed_right),
            ty,
            span,
        })
    } else {
        Err(CompileError::UnsupportedArithmetic {
            op: op.symbol().to_string(),
            left: lt,
            right: rt,
            span,
        })
    }
}

/// Structural merge typing: right wins on shared fields; candidates
/// broadcast; merging a mergeable with a non-mergeable is an incompatible
/// merge
fn merge_type(
    left: &SemanticType,
    right: &SemanticType,
    span: Span,
) -> Result<SemanticType, CompileError> {
    match (left, right) {
        (SemanticType::Candidates(l), SemanticType::Candidates(r)) => Ok(SemanticType::candidates(
            merge_type(l, r, span)?,
        )),
        (SemanticType::Candidates(l), r) if r.is_mergeable() => {
            Ok(SemanticType::candidates(merge_type(l, r, span)?))
        }
        (l, SemanticType::Candidates(r)) if l.is_mergeable() => {
            Ok(SemanticType::candidates(merge_type(l, r, span)?))
        }
        _ => match (left.record_fields(), right.record_fields()) {
            (Some(l), Some(r)) => {
                let mut merged = l.clone();
                for (name, ty) in r {
                    merged.insert(name.clone(), ty.clone());
                }
                Ok(SemanticType::Record(merged))
            }
            _ => Err(CompileError::IncompatibleMerge {
                left: left.clone(),
                right: right.clone(),
                span,
            }),
        },
    }
}

// ============================================================================
// Records: projection and field access
// ============================================================================

fn project_type(
    base: &SemanticType,
    fields: &[String],
    span: Span,
) -> Result<SemanticType, CompileError> {
    match base {
        SemanticType::Candidates(inner) => Ok(SemanticType::candidates(project_type(
            inner, fields, span,
        )?)),
        _ => match base.record_fields() {
            Some(available) => {
                let mut projected = BTreeMap::new();
                for field in fields {
                    match available.get(field) {
                        Some(ty) => {
                            projected.insert(field.clone(), ty.clone());
                        }
                        None => {
                            return Err(CompileError::InvalidProjection {
                                field: field.clone(),
                                base: base.clone(),
                                span,
                            })
                        }
                    }
                }
                Ok(SemanticType::Record(projected))
            }
            None => Err(CompileError::TypeError {
                message: format!("projection requires a record operand, found {base}"),
                span,
            }),
        },
    }
}

fn field_access_type(
    base: &SemanticType,
    field: &str,
    span: Span,
) -> Result<SemanticType, CompileError> {
    match base {
        SemanticType::Candidates(inner) => Ok(SemanticType::candidates(field_access_type(
            inner, field, span,
        )?)),
        _ => match base.record_fields() {
            Some(available) => available.get(field).cloned().ok_or_else(|| {
                CompileError::InvalidFieldAccess {
                    field: field.to_string(),
                    base: base.clone(),
                }
            }),
            None => Err(CompileError::TypeError {
                message: format!("field access requires a record operand, found {base}"),
                span,
            }),
        },
    }
}

fn check_boolean(
    ctx: &mut CheckContext<'_>,
    expr: &Expression,
) -> Result<TypedExpression, CompileError> {
    let typed = infer(ctx, expr)?;
    if typed.ty() == &SemanticType::Boolean {
        Ok(typed)
    } else {
        Err(CompileError::TypeMismatch {
            expected: SemanticType::Boolean,
            actual: typed.ty().clone(),
            span: typed.span(),
            detail: None,
        })
    }
}

fn literal_type(literal: &Literal) -> SemanticType {
    match literal {
        Literal::Int(_) => SemanticType::Int,
        Literal::Float(_) => SemanticType::Float,
        Literal::Str(_) => SemanticType::String,
        Literal::Bool(_) => SemanticType::Boolean,
    }
}
