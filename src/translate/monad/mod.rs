//! Typed expressions.
//!
//! Every translated node yields a [`Monad`]: its canonical type, the two
//! aggregation flags and a [`MonadKind`] describing how its SQL is produced.
//! Operations on monads (comparison, arithmetic, attribute access,
//! aggregation) are methods of the [`Translator`](super::translator::Translator),
//! which owns the table references that the SQL of a monad depends on.
//!
//! A monad's SQL is always a list of fragments: one per column, so an entity
//! with a composite primary key produces several.

mod attrset;
mod func;
mod ops;
mod queryset;
mod string;

use crate::error::{TranslateError, TranslateResult};
use crate::sql::{ParamKey, SqlExpr};
use crate::syntax::{render::python_repr, BinOpKind, CmpOp};
use crate::types::{Builtin, CanonicalType, EntityRef, Value};

use super::tableref::{AttrRef, TableRefId};
use super::translator::Frame;

#[derive(Debug, Clone)]
pub(crate) struct Monad {
    pub kind: MonadKind,
    pub ty: CanonicalType,
    /// Contains an aggregate function. `None` until derived from children.
    pub aggregated: Option<bool>,
    /// Must not be added to an implicit GROUP BY.
    pub nogroup: Option<bool>,
    /// Set by `distinct(...)`.
    pub forced_distinct: bool,
    /// Source text of the node the monad was last assigned to.
    pub src: String,
}

#[derive(Debug, Clone)]
pub(crate) enum MonadKind {
    /// A `for` variable.
    ObjectIter { tableref: TableRefId },
    /// A to-one or scalar attribute. Entity-valued attributes carry the
    /// reference of their target.
    Attr {
        parent: Box<Monad>,
        attr: AttrRef,
        tableref: Option<TableRefId>,
    },
    /// A collection reached through attributes, such as `g.students.gpa`.
    AttrSet { parent: Box<Monad>, attr: AttrRef },
    /// Arithmetic over collection attributes.
    NumericSetExpr {
        op: BinOpKind,
        left: Box<Monad>,
        right: Box<Monad>,
    },
    /// An external value. `literal` holds the value of a literal written in
    /// the query text.
    Param {
        key: ParamKey,
        literal: Option<Value>,
    },
    Const(Value),
    Expr(Vec<SqlExpr>),
    Cmp {
        op: CmpOp,
        left: Box<Monad>,
        right: Box<Monad>,
    },
    And(Vec<Monad>),
    Or(Vec<Monad>),
    Not(Box<Monad>),
    BoolExpr(SqlExpr),
    List(Vec<Monad>),
    /// A bound method that still waits for its call.
    Method { parent: Box<Monad>, name: String },
    Func(Builtin),
    EntitySet(EntityRef),
    /// A nested generator.
    QuerySet(Box<Frame>),
    Desc(Box<Monad>),
}

impl Monad {
    pub fn new(kind: MonadKind, ty: CanonicalType) -> Self {
        Self {
            kind,
            ty,
            aggregated: None,
            nogroup: None,
            forced_distinct: false,
            src: String::new(),
        }
    }

    pub fn expr(ty: CanonicalType, sql: Vec<SqlExpr>) -> Self {
        Self::new(MonadKind::Expr(sql), ty)
    }

    pub fn bool_expr(sql: SqlExpr) -> Self {
        Self::new(MonadKind::BoolExpr(sql), CanonicalType::BOOL)
    }

    pub fn constant(value: Value) -> Self {
        let ty = value.canonical_type().unwrap_or(CanonicalType::Null);
        Self::new(MonadKind::Const(value), ty)
    }

    pub fn with_aggregated(mut self, aggregated: bool) -> Self {
        self.aggregated = Some(aggregated);
        self
    }

    pub fn with_nogroup(mut self, nogroup: bool) -> Self {
        self.nogroup = Some(nogroup);
        self
    }

    pub fn is_aggregated(&self) -> bool {
        self.aggregated.unwrap_or(false)
    }

    pub fn is_nogroup(&self) -> bool {
        self.nogroup.unwrap_or(false)
    }

    /// Value known at translation time.
    pub fn const_value(&self) -> Option<&Value> {
        match &self.kind {
            MonadKind::Const(v) => Some(v),
            MonadKind::Param {
                literal: Some(v), ..
            } => Some(v),
            _ => None,
        }
    }

    pub fn is_none_const(&self) -> bool {
        matches!(&self.kind, MonadKind::Const(Value::None))
    }

    pub fn is_method(&self) -> bool {
        matches!(self.kind, MonadKind::Method { .. })
    }

    pub fn is_param(&self) -> bool {
        matches!(self.kind, MonadKind::Param { .. })
    }

    /// Collection-valued: attribute sets, set arithmetic and subqueries.
    pub fn is_set_like(&self) -> bool {
        matches!(
            self.kind,
            MonadKind::AttrSet { .. } | MonadKind::NumericSetExpr { .. } | MonadKind::QuerySet(_)
        )
    }

    /// Reference of an entity-valued monad bound to a table.
    pub fn tableref(&self) -> Option<TableRefId> {
        match &self.kind {
            MonadKind::ObjectIter { tableref } => Some(*tableref),
            MonadKind::Attr { tableref, .. } => *tableref,
            _ => None,
        }
    }

    /// Attribute of an `Attr` or `AttrSet` monad.
    pub fn attr_ref(&self) -> Option<&AttrRef> {
        match &self.kind {
            MonadKind::Attr { attr, .. } | MonadKind::AttrSet { attr, .. } => Some(attr),
            _ => None,
        }
    }
}

/// Type name as shown in diagnostics; tuples read as lists.
pub(crate) fn type_label(ty: &CanonicalType) -> String {
    match ty {
        CanonicalType::Tuple(_) => "list".to_string(),
        CanonicalType::SetOf(item) => format!("Set of {}", type_label(item)),
        other => other.to_string(),
    }
}

/// Quoted type name, as in `'int'`.
pub(crate) fn type_repr(ty: &CanonicalType) -> String {
    python_repr(&type_label(ty))
}

pub(crate) fn forgot_parentheses(method: &Monad) -> TranslateError {
    TranslateError::translation(format!(
        "You seems to forgot parentheses after {}",
        method.src
    ))
}

/// `desc(x)` is an ordering key, not a value.
pub(crate) fn ordering_only(monad: &Monad) -> TranslateResult<()> {
    if let MonadKind::Desc(_) = monad.kind {
        return Err(TranslateError::type_error(format!(
            "desc() can only be used for ordering: {}",
            monad.src
        )));
    }
    Ok(())
}

pub(crate) fn binop_error(left: &Monad, right: &Monad, op: &str) -> TranslateError {
    TranslateError::type_error(format!(
        "Unsupported operand types {} and {} for operation {} in expression: {}",
        type_repr(&left.ty),
        type_repr(&right.ty),
        python_repr(op),
        crate::error::EXPR_PLACEHOLDER
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NumericKind;

    #[test]
    fn test_type_labels() {
        let tuple = CanonicalType::Tuple(vec![CanonicalType::INT, CanonicalType::Text]);
        assert_eq!(type_label(&tuple), "list");
        assert_eq!(
            type_label(&CanonicalType::set_of(tuple)),
            "Set of list"
        );
        assert_eq!(type_repr(&CanonicalType::Numeric(NumericKind::Float)), "'float'");
    }

    #[test]
    fn test_literal_params_are_constant() {
        let key = ParamKey::new(crate::sql::VarKey::new(0, "3"));
        let m = Monad::new(
            MonadKind::Param {
                key,
                literal: Some(Value::Int(3)),
            },
            CanonicalType::INT,
        );
        assert_eq!(m.const_value(), Some(&Value::Int(3)));
        assert!(!m.is_aggregated());
    }
}
