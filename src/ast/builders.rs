//! Builder Patterns for Program Construction
//!
//! Provides fluent APIs for constructing programs without a parser,
//! particularly useful for tests and embedders.
//!
//! ## Example
//!
//! ```rust
//! use constellation::ast::builders::{program, var, call, record_ty, named};
//!
//! // in user: {name: String, age: Int}
//! // n = GetName(user)
//! // out n
//! let p = program()
//!     .input("user", record_ty([("name", named("String")), ("age", named("Int"))]))
//!     .assign("n", call("GetName", [var("user")]))
//!     .output("n")
//!     .build();
//! assert_eq!(p.declarations.len(), 3);
//! ```

use super::{
    BinaryOp, CallOption, Declaration, Expression, Literal, Program, Span, TypeExpr, UnaryOp,
};

/// Start a new program builder
pub fn program() -> ProgramBuilder {
    ProgramBuilder::new()
}

/// Fluent builder assembling declarations in order
#[derive(Debug, Clone, Default)]
pub struct ProgramBuilder {
    declarations: Vec<Declaration>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        ProgramBuilder {
            declarations: Vec::new(),
        }
    }

    /// `in name: ty`
    pub fn input(mut self, name: impl Into<String>, ty: TypeExpr) -> Self {
        self.declarations.push(Declaration::Input {
            name: name.into(),
            ty,
            span: Span::synthetic(),
        });
        self
    }

    /// `name = expr`
    pub fn assign(mut self, name: impl Into<String>, expr: Expression) -> Self {
        self.declarations.push(Declaration::Assignment {
            name: name.into(),
            expr,
            span: Span::synthetic(),
        });
        self
    }

    /// `out name`
    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.declarations.push(Declaration::Output {
            name: name.into(),
            span: Span::synthetic(),
        });
        self
    }

    /// `use namespace`
    pub fn import(mut self, namespace: impl Into<String>) -> Self {
        self.declarations.push(Declaration::Use {
            namespace: namespace.into(),
            alias: None,
            span: Span::synthetic(),
        });
        self
    }

    /// `use namespace as alias`
    pub fn import_as(mut self, namespace: impl Into<String>, alias: impl Into<String>) -> Self {
        self.declarations.push(Declaration::Use {
            namespace: namespace.into(),
            alias: Some(alias.into()),
            span: Span::synthetic(),
        });
        self
    }

    /// `type Name = ty`
    pub fn type_alias(mut self, name: impl Into<String>, ty: TypeExpr) -> Self {
        self.declarations.push(Declaration::TypeAlias {
            name: name.into(),
            parts: vec![ty],
            span: Span::synthetic(),
        });
        self
    }

    /// `type Name = t1 + t2 + ...` - record alias merge
    pub fn type_alias_merged(
        mut self,
        name: impl Into<String>,
        parts: impl IntoIterator<Item = TypeExpr>,
    ) -> Self {
        self.declarations.push(Declaration::TypeAlias {
            name: name.into(),
            parts: parts.into_iter().collect(),
            span: Span::synthetic(),
        });
        self
    }

    pub fn build(self) -> Program {
        Program::new(self.declarations)
    }
}

// ============================================================================
// Type expression helpers
// ============================================================================

/// Named type: `Int`, `String`, `User`
pub fn named(name: impl Into<String>) -> TypeExpr {
    TypeExpr::Named(name.into())
}

/// `List<elem>`
pub fn list_ty(elem: TypeExpr) -> TypeExpr {
    TypeExpr::Generic {
        name: "List".into(),
        args: vec![elem],
    }
}

/// `Optional<inner>`
pub fn optional_ty(inner: TypeExpr) -> TypeExpr {
    TypeExpr::Generic {
        name: "Optional".into(),
        args: vec![inner],
    }
}

/// `Candidates<inner>`
pub fn candidates_ty(inner: TypeExpr) -> TypeExpr {
    TypeExpr::Generic {
        name: "Candidates".into(),
        args: vec![inner],
    }
}

/// `Map<key, value>`
pub fn map_ty(key: TypeExpr, value: TypeExpr) -> TypeExpr {
    TypeExpr::Generic {
        name: "Map".into(),
        args: vec![key, value],
    }
}

/// Record literal type: `{f1: T1, f2: T2}`
pub fn record_ty<S: Into<String>>(fields: impl IntoIterator<Item = (S, TypeExpr)>) -> TypeExpr {
    TypeExpr::Record(fields.into_iter().map(|(n, t)| (n.into(), t)).collect())
}

// ============================================================================
// Expression helpers
// ============================================================================

/// Integer literal
pub fn int(value: i64) -> Expression {
    Expression::Literal {
        value: Literal::Int(value),
        span: Span::synthetic(),
    }
}

/// Float literal
pub fn float(value: f64) -> Expression {
    Expression::Literal {
        value: Literal::Float(value),
        span: Span::synthetic(),
    }
}

/// String literal
pub fn string(value: impl Into<String>) -> Expression {
    Expression::Literal {
        value: Literal::Str(value.into()),
        span: Span::synthetic(),
    }
}

/// Boolean literal
pub fn boolean(value: bool) -> Expression {
    Expression::Literal {
        value: Literal::Bool(value),
        span: Span::synthetic(),
    }
}

/// List literal `[e1, e2, ...]`
pub fn list(elements: impl IntoIterator<Item = Expression>) -> Expression {
    Expression::ListLiteral {
        elements: elements.into_iter().collect(),
        span: Span::synthetic(),
    }
}

/// Variable reference
pub fn var(name: impl Into<String>) -> Expression {
    Expression::Variable {
        name: name.into(),
        span: Span::synthetic(),
    }
}

/// Record construction `{f1: e1, ...}`
pub fn record<S: Into<String>>(fields: impl IntoIterator<Item = (S, Expression)>) -> Expression {
    Expression::Record {
        fields: fields.into_iter().map(|(n, e)| (n.into(), e)).collect(),
        span: Span::synthetic(),
    }
}

/// Record merge `left + right`
pub fn merge(left: Expression, right: Expression) -> Expression {
    binary(BinaryOp::Add, left, right)
}

/// Projection `base[f1, f2, ...]`
pub fn project<S: Into<String>>(
    base: Expression,
    fields: impl IntoIterator<Item = S>,
) -> Expression {
    Expression::Projection {
        base: Box::new(base),
        fields: fields.into_iter().map(Into::into).collect(),
        span: Span::synthetic(),
    }
}

/// Field access `base.field`
pub fn field(base: Expression, name: impl Into<String>) -> Expression {
    Expression::FieldAccess {
        base: Box::new(base),
        field: name.into(),
        span: Span::synthetic(),
    }
}

/// `if cond then t else e`
pub fn cond(condition: Expression, then_branch: Expression, else_branch: Expression) -> Expression {
    Expression::Conditional {
        condition: Box::new(condition),
        then_branch: Box::new(then_branch),
        else_branch: Box::new(else_branch),
        span: Span::synthetic(),
    }
}

/// `value when condition`
pub fn guard(value: Expression, condition: Expression) -> Expression {
    Expression::Guard {
        value: Box::new(value),
        condition: Box::new(condition),
        span: Span::synthetic(),
    }
}

/// `left ?? right`
pub fn coalesce(left: Expression, right: Expression) -> Expression {
    Expression::Coalesce {
        left: Box::new(left),
        right: Box::new(right),
        span: Span::synthetic(),
    }
}

/// Unqualified call `Function(args...)`
pub fn call(function: impl Into<String>, args: impl IntoIterator<Item = Expression>) -> Expression {
    Expression::Call {
        namespace: None,
        function: function.into(),
        args: args.into_iter().collect(),
        options: Vec::new(),
        span: Span::synthetic(),
    }
}

/// Qualified call `ns.Function(args...)`
pub fn qualified_call(
    namespace: impl Into<String>,
    function: impl Into<String>,
    args: impl IntoIterator<Item = Expression>,
) -> Expression {
    Expression::Call {
        namespace: Some(namespace.into()),
        function: function.into(),
        args: args.into_iter().collect(),
        options: Vec::new(),
        span: Span::synthetic(),
    }
}

/// Call with execution options `Function(args...) with {name: value, ...}`
pub fn call_with_options<S: Into<String>>(
    function: impl Into<String>,
    args: impl IntoIterator<Item = Expression>,
    options: impl IntoIterator<Item = (S, Literal)>,
) -> Expression {
    Expression::Call {
        namespace: None,
        function: function.into(),
        args: args.into_iter().collect(),
        options: options
            .into_iter()
            .map(|(name, value)| CallOption {
                name: name.into(),
                value,
            })
            .collect(),
        span: Span::synthetic(),
    }
}

/// Lambda `(p1, p2) -> body` without parameter annotations
pub fn lambda<S: Into<String>>(
    params: impl IntoIterator<Item = S>,
    body: Expression,
) -> Expression {
    Expression::Lambda {
        params: params.into_iter().map(|p| (p.into(), None)).collect(),
        body: Box::new(body),
        span: Span::synthetic(),
    }
}

/// Lambda with annotated parameters
pub fn lambda_typed<S: Into<String>>(
    params: impl IntoIterator<Item = (S, TypeExpr)>,
    body: Expression,
) -> Expression {
    Expression::Lambda {
        params: params
            .into_iter()
            .map(|(p, t)| (p.into(), Some(t)))
            .collect(),
        body: Box::new(body),
        span: Span::synthetic(),
    }
}

/// Binary operation
pub fn binary(op: BinaryOp, left: Expression, right: Expression) -> Expression {
    Expression::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
        span: Span::synthetic(),
    }
}

/// Unary operation
pub fn unary(op: UnaryOp, operand: Expression) -> Expression {
    Expression::Unary {
        op,
        operand: Box::new(operand),
        span: Span::synthetic(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_emits_declarations_in_order() {
        let p = program()
            .input("x", named("String"))
            .assign("y", var("x"))
            .output("y")
            .build();

        assert_eq!(p.declarations.len(), 3);
        assert!(matches!(&p.declarations[0], Declaration::Input { name, .. } if name == "x"));
        assert!(matches!(&p.declarations[1], Declaration::Assignment { name, .. } if name == "y"));
        assert_eq!(p.output_names(), vec!["y"]);
    }

    #[test]
    fn call_with_options_attaches_options() {
        let e = call_with_options("Fetch", [var("url")], [("retry", Literal::Int(3))]);
        match e {
            Expression::Call { options, .. } => {
                assert_eq!(options.len(), 1);
                assert_eq!(options[0].name, "retry");
            }
            _ => panic!("expected call"),
        }
    }
}
