//! # Type Checker
//!
//! Bidirectional semantic analysis over the syntactic [`Program`]: two
//! mutually recursive judgments (`check` pushes an expected type down,
//! `infer` synthesizes one) thread an environment of bindings, the
//! program's imported namespaces, and a per-declaration error accumulator.
//!
//! Failure mode: fail-fast *per declaration* - the first error inside a
//! declaration abandons that declaration, but checking continues with the
//! remaining declarations so one bad binding does not mask unrelated
//! mistakes. Non-fatal observations (shadowed or unused bindings) are
//! recorded as warnings without aborting.
//!
//! ```text
//! Program (AST)
//!     |
//! [TypeChecker]  -- FunctionRegistry, type aliases, namespaces
//!     |
//! TypedPipeline  -> IR generator
//! ```

mod env;
pub mod error;
mod expr;
mod typed;

pub use env::Environment;
pub use error::{CompileError, Warning};
pub use typed::{TypedDeclaration, TypedExpression, TypedPipeline};

use crate::ast::{Declaration, Program, Span, TypeExpr};
use crate::registry::FunctionRegistry;
use crate::types::rows::RowVarGen;
use crate::types::SemanticType;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Mutable state threaded through one checking pass
pub(crate) struct CheckContext<'r> {
    pub(crate) registry: &'r FunctionRegistry,
    pub(crate) row_gen: &'r RowVarGen,
    pub(crate) env: Environment,
    pub(crate) imports: Vec<String>,
    /// `use ns as alias` mappings
    namespace_aliases: HashMap<String, String>,
    /// `type Name = ...` aliases
    type_aliases: HashMap<String, SemanticType>,
    pub(crate) used_names: HashSet<String>,
    warnings: Vec<Warning>,
}

impl CheckContext<'_> {
    /// Resolve a namespace reference through declared aliases
    pub(crate) fn resolve_namespace(&self, name: &str) -> String {
        self.namespace_aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// Resolve a surface type expression to a semantic type
    pub(crate) fn resolve_type(
        &self,
        ty: &TypeExpr,
        span: Span,
    ) -> Result<SemanticType, CompileError> {
        match ty {
            TypeExpr::Named(name) => match name.as_str() {
                "Int" => Ok(SemanticType::Int),
                "Float" => Ok(SemanticType::Float),
                "String" => Ok(SemanticType::String),
                "Boolean" => Ok(SemanticType::Boolean),
                "Nothing" => Ok(SemanticType::Nothing),
                other => self.type_aliases.get(other).cloned().ok_or_else(|| {
                    CompileError::UndefinedType {
                        name: other.to_string(),
                        span,
                    }
                }),
            },
            TypeExpr::Generic { name, args } => {
                let resolved: Result<Vec<SemanticType>, CompileError> =
                    args.iter().map(|a| self.resolve_type(a, span)).collect();
                let mut resolved = resolved?;
                match (name.as_str(), resolved.len()) {
                    ("List", 1) => Ok(SemanticType::List(Box::new(resolved.remove(0)))),
                    ("Optional", 1) => Ok(SemanticType::Optional(Box::new(resolved.remove(0)))),
                    ("Candidates", 1) => {
                        Ok(SemanticType::Candidates(Box::new(resolved.remove(0))))
                    }
                    ("Map", 2) => {
                        let value = resolved.remove(1);
                        let key = resolved.remove(0);
                        Ok(SemanticType::map(key, value))
                    }
                    ("List" | "Optional" | "Candidates" | "Map", n) => {
                        Err(CompileError::TypeError {
                            message: format!("'{name}' does not take {n} type arguments"),
                            span,
                        })
                    }
                    _ => Err(CompileError::UndefinedType {
                        name: name.clone(),
                        span,
                    }),
                }
            }
            TypeExpr::Record(fields) => {
                let mut resolved = BTreeMap::new();
                for (field_name, field_ty) in fields {
                    resolved.insert(field_name.clone(), self.resolve_type(field_ty, span)?);
                }
                Ok(SemanticType::Record(resolved))
            }
            TypeExpr::Function { params, returns } => {
                let resolved: Result<Vec<SemanticType>, CompileError> =
                    params.iter().map(|p| self.resolve_type(p, span)).collect();
                Ok(SemanticType::function(
                    resolved?,
                    self.resolve_type(returns, span)?,
                ))
            }
        }
    }
}

/// Stateless checker; a fresh invocation per program
pub struct TypeChecker<'r> {
    registry: &'r FunctionRegistry,
}

impl<'r> TypeChecker<'r> {
    pub fn new(registry: &'r FunctionRegistry) -> Self {
        TypeChecker { registry }
    }

    /// Check a whole program, producing a typed pipeline or the accumulated
    /// errors
    pub fn check_program(&self, program: &Program) -> Result<TypedPipeline, Vec<CompileError>> {
        let row_gen = RowVarGen::new();
        let mut ctx = CheckContext {
            registry: self.registry,
            row_gen: &row_gen,
            env: Environment::new(),
            imports: Vec::new(),
            namespace_aliases: HashMap::new(),
            type_aliases: HashMap::new(),
            used_names: HashSet::new(),
            warnings: Vec::new(),
        };

        let mut errors: Vec<CompileError> = Vec::new();
        let mut declarations: Vec<TypedDeclaration> = Vec::new();
        let mut outputs: Vec<String> = Vec::new();
        let mut binding_spans: HashMap<String, Span> = HashMap::new();

        for declaration in &program.declarations {
            match declaration {
                Declaration::Use {
                    namespace,
                    alias,
                    span,
                } => {
                    if !self.registry.has_namespace(namespace) {
                        errors.push(CompileError::UndefinedNamespace {
                            name: namespace.clone(),
                            span: *span,
                        });
                        continue;
                    }
                    ctx.imports.push(namespace.clone());
                    if let Some(alias) = alias {
                        ctx.namespace_aliases.insert(alias.clone(), namespace.clone());
                    }
                }

                Declaration::TypeAlias { name, parts, span } => {
                    match self.resolve_alias(&ctx, parts, *span) {
                        Ok(ty) => {
                            ctx.type_aliases.insert(name.clone(), ty);
                        }
                        Err(e) => errors.push(e),
                    }
                }

                Declaration::Input { name, ty, span } => match ctx.resolve_type(ty, *span) {
                    Ok(resolved) => {
                        if ctx.env.bind(name.clone(), resolved.clone()) {
                            ctx.warnings.push(Warning::ShadowedBinding {
                                name: name.clone(),
                                span: *span,
                            });
                        }
                        binding_spans.insert(name.clone(), *span);
                        declarations.push(TypedDeclaration::Input {
                            name: name.clone(),
                            ty: resolved,
                            span: *span,
                        });
                    }
                    Err(e) => errors.push(e),
                },

                Declaration::Assignment { name, expr, span } => {
                    match expr::infer(&mut ctx, expr) {
                        Ok(typed) => {
                            if ctx.env.bind(name.clone(), typed.ty().clone()) {
                                ctx.warnings.push(Warning::ShadowedBinding {
                                    name: name.clone(),
                                    span: *span,
                                });
                            }
                            binding_spans.insert(name.clone(), *span);
                            declarations.push(TypedDeclaration::Assignment {
                                name: name.clone(),
                                expr: typed,
                                span: *span,
                            });
                        }
                        // Fail-fast per declaration: the first error inside
                        // this declaration poisons only this declaration
                        Err(e) => {
                            debug!(declaration = %name, error = %e, "declaration failed to check");
                            errors.push(e);
                        }
                    }
                }

                Declaration::Output { name, span } => {
                    if ctx.env.lookup(name).is_none() {
                        errors.push(CompileError::UndefinedVariable {
                            name: name.clone(),
                            span: *span,
                        });
                    } else {
                        ctx.used_names.insert(name.clone());
                        outputs.push(name.clone());
                    }
                }
            }
        }

        // Unused-binding warnings: bound but never referenced nor exported
        for declaration in &declarations {
            let name = declaration.name();
            if !ctx.used_names.contains(name) {
                if let Some(span) = binding_spans.get(name) {
                    ctx.warnings.push(Warning::UnusedBinding {
                        name: name.to_string(),
                        span: *span,
                    });
                }
            }
        }

        if errors.is_empty() {
            Ok(TypedPipeline {
                declarations,
                outputs,
                warnings: ctx.warnings,
            })
        } else {
            Err(errors)
        }
    }

    /// Resolve `type Name = T [+ T ...]`; multi-part aliases merge record
    /// parts right-wins
    fn resolve_alias(
        &self,
        ctx: &CheckContext<'_>,
        parts: &[TypeExpr],
        span: Span,
    ) -> Result<SemanticType, CompileError> {
        let mut resolved: Vec<SemanticType> = Vec::with_capacity(parts.len());
        for part in parts {
            resolved.push(ctx.resolve_type(part, span)?);
        }
        if resolved.len() == 1 {
            return Ok(resolved.remove(0));
        }
        let mut merged = BTreeMap::new();
        for part in &resolved {
            match part.record_fields() {
                Some(fields) => {
                    for (name, ty) in fields {
                        merged.insert(name.clone(), ty.clone());
                    }
                }
                None => {
                    return Err(CompileError::TypeError {
                        message: format!("only record types can be merged in an alias, found {part}"),
                        span,
                    })
                }
            }
        }
        Ok(SemanticType::Record(merged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::*;
    use crate::ast::{Literal, TypeExpr};
    use crate::registry::FunctionSignature;

    fn registry() -> FunctionRegistry {
        let registry = FunctionRegistry::new();
        registry.register(FunctionSignature::simple(
            "Upper",
            vec![SemanticType::String],
            SemanticType::String,
        ));
        let gen = RowVarGen::new();
        let row = gen.fresh();
        registry.register(
            FunctionSignature::simple(
                "GetName",
                vec![SemanticType::open_record(
                    [("name", SemanticType::String)],
                    row,
                )],
                SemanticType::String,
            )
            .with_row_vars(vec![row]),
        );
        registry
    }

    fn check(program: crate::ast::Program) -> Result<TypedPipeline, Vec<CompileError>> {
        let registry = registry();
        TypeChecker::new(&registry).check_program(&program)
    }

    #[test]
    fn passthrough_program_checks() {
        let p = program()
            .input("x", named("String"))
            .output("x")
            .build();
        let typed = check(p).expect("should check");
        assert_eq!(typed.outputs, vec!["x"]);
        assert_eq!(typed.declarations.len(), 1);
    }

    #[test]
    fn undefined_variable_is_reported() {
        let p = program().assign("y", var("missing")).output("y").build();
        let errors = check(p).expect_err("should fail");
        assert!(errors
            .iter()
            .any(|e| matches!(e, CompileError::UndefinedVariable { name, .. } if name == "missing")));
    }

    #[test]
    fn later_declarations_still_surface_errors() {
        let p = program()
            .assign("a", var("missing1"))
            .assign("b", var("missing2"))
            .build();
        let errors = check(p).expect_err("should fail");
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn conditional_requires_boolean_condition() {
        let p = program()
            .input("n", named("Int"))
            .assign("r", cond(var("n"), int(1), int(2)))
            .output("r")
            .build();
        let errors = check(p).expect_err("should fail");
        assert!(matches!(
            &errors[0],
            CompileError::TypeMismatch { expected, .. } if *expected == SemanticType::Boolean
        ));
    }

    #[test]
    fn conditional_result_is_lub() {
        let p = program()
            .input("flag", named("Boolean"))
            .assign("r", cond(var("flag"), list(vec![]), list(vec![int(1)])))
            .output("r")
            .build();
        let typed = check(p).expect("should check");
        match &typed.declarations[1] {
            TypedDeclaration::Assignment { expr, .. } => {
                assert_eq!(expr.ty(), &SemanticType::list(SemanticType::Int));
            }
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn merge_is_right_wins() {
        let p = program()
            .input(
                "a",
                record_ty([("x", named("Int")), ("y", named("Int"))]),
            )
            .input(
                "b",
                record_ty([("y", named("String")), ("z", named("String"))]),
            )
            .assign("r", merge(var("a"), var("b")))
            .output("r")
            .build();
        let typed = check(p).expect("should check");
        match &typed.declarations[2] {
            TypedDeclaration::Assignment { expr, .. } => {
                assert_eq!(
                    expr.ty(),
                    &SemanticType::record([
                        ("x", SemanticType::Int),
                        ("y", SemanticType::String),
                        ("z", SemanticType::String),
                    ])
                );
            }
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn merge_with_scalar_is_incompatible() {
        let p = program()
            .input("a", record_ty([("x", named("Int"))]))
            .input("n", named("Int"))
            .assign("r", merge(var("a"), var("n")))
            .build();
        let errors = check(p).expect_err("should fail");
        assert!(matches!(&errors[0], CompileError::IncompatibleMerge { .. }));
    }

    #[test]
    fn row_polymorphic_call_accepts_extra_fields() {
        let p = program()
            .input(
                "user",
                record_ty([
                    ("name", named("String")),
                    ("age", named("Int")),
                    ("email", named("String")),
                ]),
            )
            .assign("n", call("GetName", [var("user")]))
            .output("n")
            .build();
        let typed = check(p).expect("should check");
        match &typed.declarations[1] {
            TypedDeclaration::Assignment { expr, .. } => {
                assert_eq!(expr.ty(), &SemanticType::String);
            }
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn row_polymorphic_call_reports_missing_field() {
        let p = program()
            .input("user", record_ty([("age", named("Int"))]))
            .assign("n", call("GetName", [var("user")]))
            .build();
        let errors = check(p).expect_err("should fail");
        match &errors[0] {
            CompileError::TypeMismatch { detail, .. } => {
                let detail = detail.as_ref().expect("row detail");
                assert!(detail.contains("name"), "detail was: {detail}");
            }
            other => panic!("expected TypeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn ambiguous_function_across_namespaces() {
        let registry = FunctionRegistry::new();
        for ns in ["a", "b"] {
            registry.register(
                FunctionSignature::simple("F", vec![SemanticType::Int], SemanticType::Int)
                    .with_namespace(ns),
            );
        }
        let p = program()
            .import("a")
            .import("b")
            .input("x", named("Int"))
            .assign("y", call("F", [var("x")]))
            .build();
        let errors = TypeChecker::new(&registry)
            .check_program(&p)
            .expect_err("should fail");
        assert!(matches!(&errors[0], CompileError::AmbiguousFunction { candidates, .. } if candidates.len() == 2));
    }

    #[test]
    fn qualified_call_through_alias() {
        let registry = FunctionRegistry::new();
        registry.register(
            FunctionSignature::simple("F", vec![SemanticType::Int], SemanticType::Int)
                .with_namespace("very.long.namespace"),
        );
        let p = program()
            .import_as("very.long.namespace", "ns")
            .input("x", named("Int"))
            .assign("y", qualified_call("ns", "F", [var("x")]))
            .output("y")
            .build();
        TypeChecker::new(&registry)
            .check_program(&p)
            .expect("alias resolution should work");
    }

    #[test]
    fn unknown_namespace_is_reported() {
        let p = program().import("nope").build();
        let errors = check(p).expect_err("should fail");
        assert!(matches!(&errors[0], CompileError::UndefinedNamespace { name, .. } if name == "nope"));
    }

    #[test]
    fn guard_produces_optional() {
        let p = program()
            .input("n", named("Int"))
            .input("flag", named("Boolean"))
            .assign("g", guard(var("n"), var("flag")))
            .assign("r", coalesce(var("g"), int(0)))
            .output("r")
            .build();
        let typed = check(p).expect("should check");
        match &typed.declarations[2] {
            TypedDeclaration::Assignment { expr, .. } => {
                assert_eq!(expr.ty(), &SemanticType::optional(SemanticType::Int));
            }
            other => panic!("expected assignment, got {other:?}"),
        }
        match &typed.declarations[3] {
            TypedDeclaration::Assignment { expr, .. } => {
                assert_eq!(expr.ty(), &SemanticType::Int);
            }
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn coalesce_requires_optional_left() {
        let p = program()
            .input("n", named("Int"))
            .assign("r", coalesce(var("n"), int(0)))
            .build();
        let errors = check(p).expect_err("should fail");
        assert!(matches!(&errors[0], CompileError::TypeError { .. }));
    }

    #[test]
    fn ordering_comparison_rejects_strings() {
        let p = program()
            .input("s", named("String"))
            .assign("r", binary(crate::ast::BinaryOp::Lt, var("s"), var("s")))
            .build();
        let errors = check(p).expect_err("should fail");
        assert!(matches!(&errors[0], CompileError::UnsupportedComparison { .. }));
    }

    #[test]
    fn string_equality_is_allowed() {
        let p = program()
            .input("s", named("String"))
            .assign("r", binary(crate::ast::BinaryOp::Eq, var("s"), string("x")))
            .output("r")
            .build();
        let typed = check(p).expect("should check");
        match &typed.declarations[1] {
            TypedDeclaration::Assignment { expr, .. } => {
                assert_eq!(expr.ty(), &SemanticType::Boolean);
            }
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn projection_keeps_listed_fields() {
        let p = program()
            .input(
                "u",
                record_ty([
                    ("a", named("Int")),
                    ("b", named("String")),
                    ("c", named("Float")),
                ]),
            )
            .assign("r", project(var("u"), ["a", "c"]))
            .output("r")
            .build();
        let typed = check(p).expect("should check");
        match &typed.declarations[1] {
            TypedDeclaration::Assignment { expr, .. } => {
                assert_eq!(
                    expr.ty(),
                    &SemanticType::record([("a", SemanticType::Int), ("c", SemanticType::Float)])
                );
            }
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn projection_of_missing_field_fails() {
        let p = program()
            .input("u", record_ty([("a", named("Int"))]))
            .assign("r", project(var("u"), ["nope"]))
            .build();
        let errors = check(p).expect_err("should fail");
        assert!(matches!(&errors[0], CompileError::InvalidProjection { field, .. } if field == "nope"));
    }

    #[test]
    fn field_access_on_candidates_maps_inside() {
        let p = program()
            .input(
                "rows",
                candidates_ty(record_ty([("score", named("Float"))])),
            )
            .assign("scores", field(var("rows"), "score"))
            .output("scores")
            .build();
        let typed = check(p).expect("should check");
        match &typed.declarations[1] {
            TypedDeclaration::Assignment { expr, .. } => {
                assert_eq!(expr.ty(), &SemanticType::candidates(SemanticType::Float));
            }
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn lambda_without_annotation_needs_checked_context() {
        let p = program()
            .assign("f", lambda(["x"], var("x")))
            .build();
        let errors = check(p).expect_err("should fail");
        assert!(matches!(&errors[0], CompileError::LambdaNeedsAnnotation { .. }));
    }

    #[test]
    fn type_alias_merge_right_wins() {
        let p = program()
            .type_alias("Base", record_ty([("id", named("Int")), ("v", named("Int"))]))
            .type_alias_merged(
                "Extended",
                [
                    TypeExpr::Named("Base".into()),
                    record_ty([("v", named("String"))]),
                ],
            )
            .input("e", named("Extended"))
            .assign("v", field(var("e"), "v"))
            .output("v")
            .build();
        let typed = check(p).expect("should check");
        match &typed.declarations[1] {
            TypedDeclaration::Assignment { expr, .. } => {
                assert_eq!(expr.ty(), &SemanticType::String);
            }
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn shadowed_and_unused_bindings_warn() {
        let p = program()
            .input("x", named("Int"))
            .assign("x", int(1))
            .assign("dead", int(2))
            .output("x")
            .build();
        let typed = check(p).expect("warnings are not errors");
        assert!(typed
            .warnings
            .iter()
            .any(|w| matches!(w, Warning::ShadowedBinding { name, .. } if name == "x")));
        assert!(typed
            .warnings
            .iter()
            .any(|w| matches!(w, Warning::UnusedBinding { name, .. } if name == "dead")));
    }

    #[test]
    fn call_options_are_converted() {
        let p = program()
            .input("s", named("String"))
            .assign(
                "r",
                call_with_options(
                    "Upper",
                    [var("s")],
                    [
                        ("retry", Literal::Int(3)),
                        ("timeoutMs", Literal::Int(500)),
                        ("backoff", Literal::Str("exponential".into())),
                    ],
                ),
            )
            .output("r")
            .build();
        let typed = check(p).expect("should check");
        match &typed.declarations[1] {
            TypedDeclaration::Assignment { expr, .. } => match expr {
                TypedExpression::Call { options, .. } => {
                    assert_eq!(options.retry, Some(3));
                    assert_eq!(options.timeout_ms, Some(500));
                    assert_eq!(options.backoff, Some(crate::policy::BackoffStrategy::Exponential));
                }
                other => panic!("expected call, got {other:?}"),
            },
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn unknown_call_option_is_rejected() {
        let p = program()
            .input("s", named("String"))
            .assign(
                "r",
                call_with_options("Upper", [var("s")], [("bogus", Literal::Int(1))]),
            )
            .build();
        let errors = check(p).expect_err("should fail");
        assert!(matches!(&errors[0], CompileError::TypeError { message, .. } if message.contains("bogus")));
    }
}
