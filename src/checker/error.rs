//! Compile-Time Error Taxonomy
//!
//! Shared by the type checker and the IR generator. Exact variant names are
//! part of the crate's test contract.

use crate::ast::Span;
use crate::types::SemanticType;

/// A compile-time failure with source location where available
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("undefined variable '{name}' at {span}")]
    UndefinedVariable { name: String, span: Span },

    #[error("undefined function '{name}' at {span}")]
    UndefinedFunction { name: String, span: Span },

    #[error("undefined type '{name}' at {span}")]
    UndefinedType { name: String, span: Span },

    #[error("undefined namespace '{name}' at {span}")]
    UndefinedNamespace { name: String, span: Span },

    #[error("ambiguous function '{name}': candidates {}", candidates.join(", "))]
    AmbiguousFunction {
        name: String,
        candidates: Vec<String>,
        span: Span,
    },

    #[error("type mismatch at {span}: expected {expected}, found {actual}{}", detail.as_ref().map(|d| format!(" ({d})")).unwrap_or_default())]
    TypeMismatch {
        expected: SemanticType,
        actual: SemanticType,
        span: Span,
        /// Enhanced explanation, e.g. row-unification field details
        detail: Option<String>,
    },

    #[error("type error at {span}: {message}")]
    TypeError { message: String, span: Span },

    #[error("operator '{op}' not supported for {left} and {right} at {span}")]
    UnsupportedArithmetic {
        op: String,
        left: SemanticType,
        right: SemanticType,
        span: Span,
    },

    #[error("comparison '{op}' not supported for {left} and {right} at {span}")]
    UnsupportedComparison {
        op: String,
        left: SemanticType,
        right: SemanticType,
        span: Span,
    },

    #[error("cannot merge {left} with {right} at {span}")]
    IncompatibleMerge {
        left: SemanticType,
        right: SemanticType,
        span: Span,
    },

    #[error("invalid projection: field '{field}' does not exist on {base} at {span}")]
    InvalidProjection {
        field: String,
        base: SemanticType,
        span: Span,
    },

    #[error("invalid field access: '{field}' does not exist on {base}")]
    InvalidFieldAccess { field: String, base: SemanticType },

    #[error("lambda parameters need type annotations when used outside a checked call at {span}")]
    LambdaNeedsAnnotation { span: Span },

    #[error("lambda takes {actual} parameters but {expected} were expected at {span}")]
    LambdaArityMismatch {
        expected: usize,
        actual: usize,
        span: Span,
    },

    #[error("lambdas are only permitted as direct arguments to higher-order modules at {span}")]
    InvalidLambdaContext { span: Span },

    #[error("module '{module_name}' is not a recognized higher-order function at {span}")]
    UnknownHigherOrderFunction { module_name: String, span: Span },

    #[error("parse error: {message}{}", span.map(|s| format!(" at {s}")).unwrap_or_default())]
    ParseError {
        message: String,
        span: Option<Span>,
    },

    #[error("internal error: {message}{}", span.map(|s| format!(" at {s}")).unwrap_or_default())]
    InternalError {
        message: String,
        span: Option<Span>,
    },
}

impl CompileError {
    /// Source span, when the error carries one
    pub fn span(&self) -> Option<Span> {
        match self {
            CompileError::UndefinedVariable { span, .. }
            | CompileError::UndefinedFunction { span, .. }
            | CompileError::UndefinedType { span, .. }
            | CompileError::UndefinedNamespace { span, .. }
            | CompileError::AmbiguousFunction { span, .. }
            | CompileError::TypeMismatch { span, .. }
            | CompileError::TypeError { span, .. }
            | CompileError::UnsupportedArithmetic { span, .. }
            | CompileError::UnsupportedComparison { span, .. }
            | CompileError::IncompatibleMerge { span, .. }
            | CompileError::InvalidProjection { span, .. }
            | CompileError::LambdaNeedsAnnotation { span }
            | CompileError::LambdaArityMismatch { span, .. }
            | CompileError::InvalidLambdaContext { span }
            | CompileError::UnknownHigherOrderFunction { span, .. } => Some(*span),
            CompileError::ParseError { span, .. } | CompileError::InternalError { span, .. } => {
                *span
            }
            CompileError::InvalidFieldAccess { .. } => None,
        }
    }
}

/// Non-fatal observation recorded during checking
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    /// An assignment rebinds a name already in scope
    ShadowedBinding { name: String, span: Span },
    /// A binding is never referenced and not exported
    UnusedBinding { name: String, span: Span },
}
