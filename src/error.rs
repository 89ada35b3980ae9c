//! Translation errors.
//!
//! Every failure surfaced by the translator is a [`TranslateError`]. Messages
//! produced deep inside monad operations may carry an `{EXPR}` placeholder;
//! the translator fills it with the rendered source of the expression being
//! translated when the error crosses a node boundary (see
//! [`TranslateError::with_expr`]).

use crate::config::SettingsError;
use crate::syntax::ParseError;

/// Placeholder replaced by the offending expression's source text.
pub const EXPR_PLACEHOLDER: &str = "{EXPR}";

/// Errors raised while translating a query.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TranslateError {
    /// Malformed or ambiguous query shape.
    #[error("{0}")]
    Translation(String),

    #[error("Incomparable types '{left}' and '{right}' in expression: {expr}")]
    IncomparableTypes {
        left: String,
        right: String,
        expr: String,
    },

    /// A valid query shape the engine does not support.
    #[error("{0}")]
    NotImplemented(String),

    #[error("{0}")]
    Type(String),

    #[error("{0}")]
    Attribute(String),

    #[error("{0}")]
    Index(String),

    #[error("{0}")]
    Value(String),

    #[error("{0}")]
    IllegalName(String),

    /// An external parameter getter failed.
    #[error("`{src}` raises {kind}: {message}")]
    ExternalEval {
        src: String,
        kind: String,
        message: String,
    },

    #[error("{0}")]
    Parse(#[from] ParseError),

    #[error("{0}")]
    Settings(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    /// Aborts a speculative subquery-to-join rewrite. Never leaves the
    /// translator.
    #[error("Optimization failed")]
    OptimizationFailed,
}

pub type TranslateResult<T> = Result<T, TranslateError>;

impl TranslateError {
    pub fn translation(msg: impl Into<String>) -> Self {
        TranslateError::Translation(msg.into())
    }

    pub fn not_implemented(msg: impl Into<String>) -> Self {
        TranslateError::NotImplemented(msg.into())
    }

    pub fn type_error(msg: impl Into<String>) -> Self {
        TranslateError::Type(msg.into())
    }

    pub fn attribute(msg: impl Into<String>) -> Self {
        TranslateError::Attribute(msg.into())
    }

    pub fn incomparable(left: impl Into<String>, right: impl Into<String>) -> Self {
        TranslateError::IncomparableTypes {
            left: left.into(),
            right: right.into(),
            expr: EXPR_PLACEHOLDER.to_string(),
        }
    }

    /// Substitute `{EXPR}` with the given source text.
    ///
    /// Only the first substitution sticks: once the placeholder is gone the
    /// innermost expression stays attached to the error.
    pub fn with_expr(self, src: &str) -> Self {
        let fill = |s: String| s.replace(EXPR_PLACEHOLDER, src);
        match self {
            TranslateError::Translation(s) => TranslateError::Translation(fill(s)),
            TranslateError::NotImplemented(s) => TranslateError::NotImplemented(fill(s)),
            TranslateError::Type(s) => TranslateError::Type(fill(s)),
            TranslateError::Attribute(s) => TranslateError::Attribute(fill(s)),
            TranslateError::Index(s) => TranslateError::Index(fill(s)),
            TranslateError::Value(s) => TranslateError::Value(fill(s)),
            TranslateError::IncomparableTypes { left, right, expr } => {
                TranslateError::IncomparableTypes {
                    left,
                    right,
                    expr: fill(expr),
                }
            }
            other => other,
        }
    }

    /// Whether the message still waits for an expression.
    pub fn has_placeholder(&self) -> bool {
        match self {
            TranslateError::Translation(s)
            | TranslateError::NotImplemented(s)
            | TranslateError::Type(s)
            | TranslateError::Attribute(s)
            | TranslateError::Index(s)
            | TranslateError::Value(s) => s.contains(EXPR_PLACEHOLDER),
            TranslateError::IncomparableTypes { expr, .. } => expr.contains(EXPR_PLACEHOLDER),
            _ => false,
        }
    }

    /// Missing-feature signal, as opposed to a malformed query.
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, TranslateError::NotImplemented(_))
    }
}

impl From<SettingsError> for TranslateError {
    fn from(err: SettingsError) -> Self {
        TranslateError::Settings(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_expr_fills_placeholder() {
        let err = TranslateError::type_error("Unsupported operand in {EXPR}").with_expr("a + b");
        assert_eq!(err.to_string(), "Unsupported operand in a + b");
        assert!(!err.has_placeholder());
    }

    #[test]
    fn test_with_expr_keeps_innermost() {
        let err = TranslateError::incomparable("str", "float")
            .with_expr("s.name > s.gpa")
            .with_expr("s for s in Student if s.name > s.gpa");
        assert_eq!(
            err.to_string(),
            "Incomparable types 'str' and 'float' in expression: s.name > s.gpa"
        );
    }

    #[test]
    fn test_external_eval_message() {
        let err = TranslateError::ExternalEval {
            src: "1 / x".into(),
            kind: "ZeroDivisionError".into(),
            message: "division by zero".into(),
        };
        assert_eq!(err.to_string(), "`1 / x` raises ZeroDivisionError: division by zero");
    }
}
