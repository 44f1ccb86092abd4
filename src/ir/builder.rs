//! IR Builder
//!
//! TypedPipeline -> DAG lowering. Inputs become top-level data nodes;
//! function calls become module nodes wired through typed ports; all pure
//! computation folds into inline transforms; conditionals become synthetic
//! branch modules.
//!
//! ```text
//! TypedPipeline -> [IrBuilder] -> DagSpec -> hashing -> PipelineImage
//! ```
//!
//! Errors are fail-first per pipeline: the first problem in a declaration
//! aborts the build (the checker has already surfaced everything it can).

use super::{
    DagSpec, DataNodeSpec, ExprSpec, InlineTransform, LambdaSpec, ModuleNodeSpec, BRANCH_PREFIX,
};
use crate::ast::{Literal, Span};
use crate::checker::{CompileError, TypedDeclaration, TypedExpression, TypedPipeline};
use crate::cvalue::{CType, CValue};
use crate::policy::ModuleCallOptions;
use crate::registry::FunctionRegistry;
use crate::types::SemanticType;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;
use uuid::Uuid;

/// Stateless per-pipeline lowering
pub struct IrBuilder<'r> {
    registry: &'r FunctionRegistry,
}

impl<'r> IrBuilder<'r> {
    pub fn new(registry: &'r FunctionRegistry) -> Self {
        IrBuilder { registry }
    }

    /// Lower a checked pipeline to a validated DAG
    pub fn build(&self, pipeline: &TypedPipeline) -> Result<DagSpec, CompileError> {
        let mut state = BuildState {
            registry: self.registry,
            dag: DagSpec::default(),
            env: HashMap::new(),
            used_names: HashMap::new(),
            branch_counter: 0,
            anon_counter: 0,
        };

        for declaration in &pipeline.declarations {
            match declaration {
                TypedDeclaration::Input { name, ty, span } => {
                    let id = state.new_data_node(name.clone(), ty, *span)?;
                    state.dag.input_nodes.insert(name.clone(), id);
                    state.env.insert(name.clone(), id);
                }
                TypedDeclaration::Assignment { name, expr, span } => {
                    let id = match expr {
                        // A bare variable still gets its own node so every
                        // declared name has a distinct id
                        TypedExpression::Variable {
                            name: source, ty, ..
                        } => {
                            let source_id = state.resolve(source, *span)?;
                            let id = state.new_data_node(name.clone(), ty, *span)?;
                            state.dag.inline_transforms.insert(
                                id,
                                InlineTransform {
                                    target: id,
                                    deps: [(source.clone(), source_id)].into_iter().collect(),
                                    expr: ExprSpec::Param(source.clone()),
                                },
                            );
                            id
                        }
                        TypedExpression::Lambda { span, .. } => {
                            return Err(CompileError::InvalidLambdaContext { span: *span })
                        }
                        _ => state.lower_expr(expr, Some(name))?,
                    };
                    state.env.insert(name.clone(), id);
                }
            }
        }

        for output in &pipeline.outputs {
            let id = state.resolve(output, Span::synthetic())?;
            state.dag.declared_outputs.push(output.clone());
            state.dag.output_bindings.insert(output.clone(), id);
        }

        state.dag.validate().map_err(|e| CompileError::InternalError {
            message: format!("generated DAG failed validation: {e}"),
            span: None,
        })?;
        debug!(
            data_nodes = state.dag.data_nodes.len(),
            module_nodes = state.dag.module_nodes.len(),
            transforms = state.dag.inline_transforms.len(),
            "lowered pipeline"
        );
        Ok(state.dag)
    }
}

struct BuildState<'r> {
    registry: &'r FunctionRegistry,
    dag: DagSpec,
    env: HashMap<String, Uuid>,
    /// Node display names must be unique: they order the canonical form
    used_names: HashMap<String, usize>,
    branch_counter: usize,
    anon_counter: usize,
}

impl BuildState<'_> {
    fn resolve(&self, name: &str, span: Span) -> Result<Uuid, CompileError> {
        self.env
            .get(name)
            .copied()
            .ok_or_else(|| CompileError::UndefinedVariable {
                name: name.to_string(),
                span,
            })
    }

    fn new_data_node(
        &mut self,
        name: String,
        ty: &SemanticType,
        span: Span,
    ) -> Result<Uuid, CompileError> {
        let ctype = CType::from_semantic(ty).map_err(|e| CompileError::InternalError {
            message: e,
            span: Some(span),
        })?;
        // Shadowed bindings get numbered node names so canonical ordering
        // stays deterministic
        let name = match self.used_names.get_mut(&name) {
            Some(count) => {
                *count += 1;
                format!("{name}#{count}")
            }
            None => {
                self.used_names.insert(name.clone(), 1);
                name
            }
        };
        let id = Uuid::new_v4();
        self.dag.data_nodes.insert(
            id,
            DataNodeSpec {
                id,
                name,
                ty: ctype,
                consumers: BTreeSet::new(),
            },
        );
        Ok(id)
    }

    fn anon_name(&mut self, hint: Option<&str>) -> String {
        match hint {
            Some(name) => name.to_string(),
            None => {
                self.anon_counter += 1;
                format!("expr-{}", self.anon_counter)
            }
        }
    }

    fn connect_input(&mut self, data: Uuid, module: Uuid, port: &str) {
        self.dag.in_edges.insert((data, module, port.to_string()));
        if let Some(node) = self.dag.data_nodes.get_mut(&data) {
            node.consumers.insert((module, port.to_string()));
        }
    }

    /// Lower an expression to the data node carrying its value
    fn lower_expr(
        &mut self,
        expr: &TypedExpression,
        hint: Option<&str>,
    ) -> Result<Uuid, CompileError> {
        match expr {
            TypedExpression::Variable { name, .. } => self.resolve(name, expr.span()),

            TypedExpression::Call {
                signature,
                args,
                options,
                ty,
                span,
            } => self.lower_call(signature, args, options.clone(), ty, *span, hint),

            TypedExpression::Conditional {
                condition,
                then_branch,
                else_branch,
                ty,
                span,
            } => self.lower_branch(condition, then_branch, else_branch, ty, *span, hint),

            TypedExpression::Lambda { span, .. } => {
                Err(CompileError::InvalidLambdaContext { span: *span })
            }

            // Everything else is pure: fold the subtree into one inline
            // transform over its non-pure dependencies
            _ => {
                let mut deps = BTreeMap::new();
                let spec = self.lower_pure(expr, &mut deps)?;
                let name = self.anon_name(hint);
                let id = self.new_data_node(name, expr.ty(), expr.span())?;
                self.dag.inline_transforms.insert(
                    id,
                    InlineTransform {
                        target: id,
                        deps,
                        expr: spec,
                    },
                );
                Ok(id)
            }
        }
    }

    /// Lower a pure subtree to an expression spec, collecting dependency
    /// slots for variables and any nested impure nodes
    fn lower_pure(
        &mut self,
        expr: &TypedExpression,
        deps: &mut BTreeMap<String, Uuid>,
    ) -> Result<ExprSpec, CompileError> {
        match expr {
            TypedExpression::Literal { value, .. } => Ok(ExprSpec::Literal(literal_value(value))),

            TypedExpression::Variable { name, .. } => {
                let id = self.resolve(name, expr.span())?;
                deps.insert(name.clone(), id);
                Ok(ExprSpec::Param(name.clone()))
            }

            TypedExpression::ListLiteral { elements, ty, .. } => {
                let elem_ctype = match ty {
                    SemanticType::List(elem) => {
                        CType::from_semantic(elem).map_err(|e| CompileError::InternalError {
                            message: e,
                            span: Some(expr.span()),
                        })?
                    }
                    _ => CType::Nothing,
                };
                let specs: Result<Vec<ExprSpec>, CompileError> = elements
                    .iter()
                    .map(|e| self.lower_pure(e, deps))
                    .collect();
                Ok(ExprSpec::ListOf(specs?, elem_ctype))
            }

            TypedExpression::Record { fields, .. } => {
                let mut specs = Vec::with_capacity(fields.len());
                for (name, value) in fields {
                    specs.push((name.clone(), self.lower_pure(value, deps)?));
                }
                Ok(ExprSpec::Record(specs))
            }

            TypedExpression::Merge { left, right, .. } => Ok(ExprSpec::Merge(
                Box::new(self.lower_pure(left, deps)?),
                Box::new(self.lower_pure(right, deps)?),
            )),

            TypedExpression::Projection { base, fields, .. } => Ok(ExprSpec::Projection(
                Box::new(self.lower_pure(base, deps)?),
                fields.clone(),
            )),

            TypedExpression::FieldAccess { base, field, .. } => Ok(ExprSpec::FieldAccess(
                Box::new(self.lower_pure(base, deps)?),
                field.clone(),
            )),

            TypedExpression::Guard {
                value, condition, ty, ..
            } => {
                let inner = match ty {
                    SemanticType::Optional(inner) => {
                        CType::from_semantic(inner).map_err(|e| CompileError::InternalError {
                            message: e,
                            span: Some(expr.span()),
                        })?
                    }
                    _ => CType::Nothing,
                };
                Ok(ExprSpec::Conditional(
                    Box::new(self.lower_pure(condition, deps)?),
                    Box::new(ExprSpec::SomeOf(Box::new(self.lower_pure(value, deps)?))),
                    Box::new(ExprSpec::NoneOf(inner)),
                ))
            }

            TypedExpression::Coalesce { left, right, .. } => Ok(ExprSpec::Coalesce(
                Box::new(self.lower_pure(left, deps)?),
                Box::new(self.lower_pure(right, deps)?),
            )),

            TypedExpression::Binary {
                op, left, right, ..
            } => Ok(ExprSpec::Binary(
                *op,
                Box::new(self.lower_pure(left, deps)?),
                Box::new(self.lower_pure(right, deps)?),
            )),

            TypedExpression::Unary { op, operand, .. } => Ok(ExprSpec::Unary(
                *op,
                Box::new(self.lower_pure(operand, deps)?),
            )),

            // Impure subtrees become their own nodes, referenced through a
            // dependency slot
            TypedExpression::Call { .. } | TypedExpression::Conditional { .. } => {
                let id = self.lower_expr(expr, None)?;
                let slot = format!("dep-{id}");
                deps.insert(slot.clone(), id);
                Ok(ExprSpec::Param(slot))
            }

            TypedExpression::Lambda { span, .. } => {
                Err(CompileError::InvalidLambdaContext { span: *span })
            }
        }
    }

    fn lower_call(
        &mut self,
        signature: &crate::registry::FunctionSignature,
        args: &[TypedExpression],
        options: ModuleCallOptions,
        return_ty: &SemanticType,
        span: Span,
        hint: Option<&str>,
    ) -> Result<Uuid, CompileError> {
        let module_id = Uuid::new_v4();
        let mut consumes = BTreeMap::new();
        let mut lambdas = BTreeMap::new();
        let mut wires: Vec<(Uuid, String)> = Vec::new();

        for (index, arg) in args.iter().enumerate() {
            let port = format!("arg{index}");
            if let TypedExpression::Lambda { params, body, .. } = arg {
                // Lambdas ride on the module node rather than the data plane;
                // only runtime-recognized higher-order modules may take them
                if !self.registry.is_higher_order(&signature.module_name) {
                    return Err(CompileError::UnknownHigherOrderFunction {
                        module_name: signature.module_name.clone(),
                        span,
                    });
                }
                let param_names: Vec<String> = params.iter().map(|(n, _)| n.clone()).collect();
                let body_spec = self.lower_lambda_body(
                    body,
                    &param_names.iter().cloned().collect::<HashSet<_>>(),
                )?;
                lambdas.insert(
                    port,
                    LambdaSpec {
                        params: param_names,
                        body: body_spec,
                    },
                );
                continue;
            }
            let arg_node = self.lower_expr(arg, None)?;
            let arg_ctype =
                CType::from_semantic(arg.ty()).map_err(|e| CompileError::InternalError {
                    message: e,
                    span: Some(arg.span()),
                })?;
            consumes.insert(port.clone(), arg_ctype);
            wires.push((arg_node, port));
        }

        let out_name = self.anon_name(hint);
        let out_node = self.new_data_node(out_name, return_ty, span)?;
        let out_ctype = CType::from_semantic(return_ty).map_err(|e| CompileError::InternalError {
            message: e,
            span: Some(span),
        })?;

        self.dag.module_nodes.insert(
            module_id,
            ModuleNodeSpec {
                id: module_id,
                name: signature.module_name.clone(),
                consumes,
                produces: [("out".to_string(), out_ctype)].into_iter().collect(),
                options,
                lambdas,
            },
        );
        for (data, port) in wires {
            self.connect_input(data, module_id, &port);
        }
        self.dag
            .out_edges
            .insert((module_id, out_node, "out".to_string()));
        Ok(out_node)
    }

    /// Conditionals become synthetic branch modules the executor evaluates
    /// natively; both branches are materialized as data nodes and the branch
    /// picks one deterministically
    fn lower_branch(
        &mut self,
        condition: &TypedExpression,
        then_branch: &TypedExpression,
        else_branch: &TypedExpression,
        ty: &SemanticType,
        span: Span,
        hint: Option<&str>,
    ) -> Result<Uuid, CompileError> {
        let cond_node = self.lower_expr(condition, None)?;
        let then_node = self.lower_expr(then_branch, None)?;
        let else_node = self.lower_expr(else_branch, None)?;

        let branch_name = format!("{BRANCH_PREFIX}{}", self.branch_counter);
        self.branch_counter += 1;

        let out_ctype = CType::from_semantic(ty).map_err(|e| CompileError::InternalError {
            message: e,
            span: Some(span),
        })?;
        let module_id = Uuid::new_v4();
        let out_name = self.anon_name(hint);
        let out_node = self.new_data_node(out_name, ty, span)?;

        self.dag.module_nodes.insert(
            module_id,
            ModuleNodeSpec {
                id: module_id,
                name: branch_name,
                consumes: [
                    ("cond".to_string(), CType::Boolean),
                    ("then".to_string(), out_ctype.clone()),
                    ("otherwise".to_string(), out_ctype.clone()),
                ]
                .into_iter()
                .collect(),
                produces: [("out".to_string(), out_ctype)].into_iter().collect(),
                options: ModuleCallOptions::default(),
                lambdas: BTreeMap::new(),
            },
        );
        self.connect_input(cond_node, module_id, "cond");
        self.connect_input(then_node, module_id, "then");
        self.connect_input(else_node, module_id, "otherwise");
        self.dag
            .out_edges
            .insert((module_id, out_node, "out".to_string()));
        Ok(out_node)
    }

    /// Lambda bodies are pure expressions over the lambda's own parameters;
    /// module calls and outer bindings are not permitted inside them
    fn lower_lambda_body(
        &mut self,
        body: &TypedExpression,
        params: &HashSet<String>,
    ) -> Result<ExprSpec, CompileError> {
        match body {
            TypedExpression::Literal { value, .. } => Ok(ExprSpec::Literal(literal_value(value))),

            TypedExpression::Variable { name, span, .. } => {
                if params.contains(name) {
                    Ok(ExprSpec::Param(name.clone()))
                } else {
                    Err(CompileError::UndefinedVariable {
                        name: name.clone(),
                        span: *span,
                    })
                }
            }

            TypedExpression::Record { fields, .. } => {
                let mut specs = Vec::with_capacity(fields.len());
                for (name, value) in fields {
                    specs.push((name.clone(), self.lower_lambda_body(value, params)?));
                }
                Ok(ExprSpec::Record(specs))
            }

            TypedExpression::ListLiteral { elements, ty, .. } => {
                let elem_ctype = match ty {
                    SemanticType::List(elem) => {
                        CType::from_semantic(elem).map_err(|e| CompileError::InternalError {
                            message: e,
                            span: Some(body.span()),
                        })?
                    }
                    _ => CType::Nothing,
                };
                let specs: Result<Vec<ExprSpec>, CompileError> = elements
                    .iter()
                    .map(|e| self.lower_lambda_body(e, params))
                    .collect();
                Ok(ExprSpec::ListOf(specs?, elem_ctype))
            }

            TypedExpression::Merge { left, right, .. } => Ok(ExprSpec::Merge(
                Box::new(self.lower_lambda_body(left, params)?),
                Box::new(self.lower_lambda_body(right, params)?),
            )),

            TypedExpression::Projection { base, fields, .. } => Ok(ExprSpec::Projection(
                Box::new(self.lower_lambda_body(base, params)?),
                fields.clone(),
            )),

            TypedExpression::FieldAccess { base, field, .. } => Ok(ExprSpec::FieldAccess(
                Box::new(self.lower_lambda_body(base, params)?),
                field.clone(),
            )),

            TypedExpression::Conditional {
                condition,
                then_branch,
                else_branch,
                ..
            } => Ok(ExprSpec::Conditional(
                Box::new(self.lower_lambda_body(condition, params)?),
                Box::new(self.lower_lambda_body(then_branch, params)?),
                Box::new(self.lower_lambda_body(else_branch, params)?),
            )),

            TypedExpression::Guard {
                value, condition, ty, ..
            } => {
                let inner = match ty {
                    SemanticType::Optional(inner) => {
                        CType::from_semantic(inner).map_err(|e| CompileError::InternalError {
                            message: e,
                            span: Some(body.span()),
                        })?
                    }
                    _ => CType::Nothing,
                };
                Ok(ExprSpec::Conditional(
                    Box::new(self.lower_lambda_body(condition, params)?),
                    Box::new(ExprSpec::SomeOf(Box::new(
                        self.lower_lambda_body(value, params)?,
                    ))),
                    Box::new(ExprSpec::NoneOf(inner)),
                ))
            }

            TypedExpression::Coalesce { left, right, .. } => Ok(ExprSpec::Coalesce(
                Box::new(self.lower_lambda_body(left, params)?),
                Box::new(self.lower_lambda_body(right, params)?),
            )),

            TypedExpression::Binary {
                op, left, right, ..
            } => Ok(ExprSpec::Binary(
                *op,
                Box::new(self.lower_lambda_body(left, params)?),
                Box::new(self.lower_lambda_body(right, params)?),
            )),

            TypedExpression::Unary { op, operand, .. } => Ok(ExprSpec::Unary(
                *op,
                Box::new(self.lower_lambda_body(operand, params)?),
            )),

            TypedExpression::Call { span, .. } => Err(CompileError::TypeError {
                message: "module calls are not permitted inside lambda bodies".to_string(),
                span: *span,
            }),

            TypedExpression::Lambda { span, .. } => {
                Err(CompileError::InvalidLambdaContext { span: *span })
            }
        }
    }
}

fn literal_value(literal: &Literal) -> CValue {
    match literal {
        Literal::Int(i) => CValue::CInt(*i),
        Literal::Float(x) => CValue::CFloat(*x),
        Literal::Str(s) => CValue::CString(s.clone()),
        Literal::Bool(b) => CValue::CBoolean(*b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::*;
    use crate::checker::TypeChecker;
    use crate::registry::FunctionSignature;

    fn registry() -> FunctionRegistry {
        let registry = FunctionRegistry::new();
        registry.register(FunctionSignature::simple(
            "Upper",
            vec![SemanticType::String],
            SemanticType::String,
        ));
        registry.register(FunctionSignature::simple(
            "MapScores",
            vec![
                SemanticType::list(SemanticType::Int),
                SemanticType::function(vec![SemanticType::Int], SemanticType::Int),
            ],
            SemanticType::list(SemanticType::Int),
        ));
        registry.register_higher_order("MapScores");
        registry.register(FunctionSignature::simple(
            "Slow",
            vec![
                SemanticType::list(SemanticType::Int),
                SemanticType::function(vec![SemanticType::Int], SemanticType::Int),
            ],
            SemanticType::list(SemanticType::Int),
        ));
        registry
    }

    fn build(program: crate::ast::Program) -> Result<DagSpec, CompileError> {
        let registry = registry();
        let typed = TypeChecker::new(&registry)
            .check_program(&program)
            .expect("program should typecheck");
        IrBuilder::new(&registry).build(&typed)
    }

    #[test]
    fn passthrough_produces_input_and_binding() {
        let dag = build(program().input("x", named("String")).output("x").build())
            .expect("should build");
        assert_eq!(dag.data_nodes.len(), 1);
        assert!(dag.module_nodes.is_empty());
        assert_eq!(dag.declared_outputs, vec!["x"]);
        let bound = dag.output_bindings["x"];
        assert_eq!(dag.input_nodes["x"], bound);
    }

    #[test]
    fn call_creates_module_with_wired_ports() {
        let dag = build(
            program()
                .input("s", named("String"))
                .assign("r", call("Upper", [var("s")]))
                .output("r")
                .build(),
        )
        .expect("should build");
        assert_eq!(dag.module_nodes.len(), 1);
        let module = dag.module_nodes.values().next().expect("module");
        assert_eq!(module.name, "Upper");
        let inputs = dag.module_inputs(module.id);
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs["arg0"], dag.input_nodes["s"]);
        let outputs = dag.module_outputs(module.id);
        assert_eq!(outputs["out"], dag.output_bindings["r"]);
    }

    #[test]
    fn conditional_lowers_to_branch_module() {
        let dag = build(
            program()
                .input("flag", named("Boolean"))
                .input("a", named("Int"))
                .input("b", named("Int"))
                .assign("result", cond(var("flag"), var("a"), var("b")))
                .output("result")
                .build(),
        )
        .expect("should build");
        let branch = dag
            .module_nodes
            .values()
            .find(|m| m.is_branch())
            .expect("branch module");
        assert_eq!(branch.consumes.len(), 3);
        assert!(branch.consumes.contains_key("cond"));
        assert!(branch.consumes.contains_key("otherwise"));
    }

    #[test]
    fn pure_chain_folds_into_one_transform() {
        let dag = build(
            program()
                .input("a", record_ty([("x", named("Int"))]))
                .input("b", record_ty([("y", named("Int"))]))
                .assign("m", field(merge(var("a"), var("b")), "y"))
                .output("m")
                .build(),
        )
        .expect("should build");
        assert!(dag.module_nodes.is_empty());
        assert_eq!(dag.inline_transforms.len(), 1);
        let transform = dag.inline_transforms.values().next().expect("transform");
        assert_eq!(transform.deps.len(), 2);
    }

    #[test]
    fn lambda_to_recognized_hof_rides_on_module() {
        let dag = build(
            program()
                .input("xs", list_ty(named("Int")))
                .assign(
                    "ys",
                    call(
                        "MapScores",
                        [
                            var("xs"),
                            lambda(["n"], binary(crate::ast::BinaryOp::Mul, var("n"), int(2))),
                        ],
                    ),
                )
                .output("ys")
                .build(),
        )
        .expect("should build");
        let module = dag.module_nodes.values().next().expect("module");
        assert_eq!(module.lambdas.len(), 1);
        assert!(module.lambdas.contains_key("arg1"));
        // The lambda port carries no data edge
        assert_eq!(dag.module_inputs(module.id).len(), 1);
    }

    #[test]
    fn lambda_to_unrecognized_module_fails() {
        let err = build(
            program()
                .input("xs", list_ty(named("Int")))
                .assign("ys", call("Slow", [var("xs"), lambda(["n"], var("n"))]))
                .output("ys")
                .build(),
        )
        .expect_err("should fail");
        assert!(matches!(
            err,
            CompileError::UnknownHigherOrderFunction { module_name, .. } if module_name == "Slow"
        ));
    }

    #[test]
    fn standalone_lambda_assignment_fails() {
        let registry = registry();
        let typed = TypeChecker::new(&registry)
            .check_program(
                &program()
                    .assign("f", lambda_typed([("x", named("Int"))], var("x")))
                    .build(),
            )
            .expect("checker accepts annotated lambdas");
        let err = IrBuilder::new(&registry)
            .build(&typed)
            .expect_err("IR rejects standalone lambdas");
        assert!(matches!(err, CompileError::InvalidLambdaContext { .. }));
    }

    #[test]
    fn alias_assignment_gets_its_own_node() {
        let dag = build(
            program()
                .input("x", named("Int"))
                .assign("y", var("x"))
                .output("y")
                .build(),
        )
        .expect("should build");
        assert_eq!(dag.data_nodes.len(), 2);
        assert_ne!(dag.input_nodes["x"], dag.output_bindings["y"]);
        assert_eq!(dag.inline_transforms.len(), 1);
    }
}
