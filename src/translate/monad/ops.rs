//! SQL generation, comparison, logic and arithmetic.

use crate::error::{TranslateError, TranslateResult, EXPR_PLACEHOLDER};
use crate::sql::{
    sql_and, sql_or, AggFunc, BinaryOp, FromKind, ScalarFunc, SqlDialect, SqlExpr, SqlLiteral,
};
use crate::syntax::render::python_repr;
use crate::syntax::{BinOpKind, CmpOp};
use crate::types::{coerce, comparable, comparable_membership, CanonicalType, NumericKind, Value};

use super::super::tableref::{entity_of, AttrRef, TableRefId};
use super::super::translator::Translator;
use super::{binop_error, forgot_parentheses, ordering_only, type_label, type_repr, Monad, MonadKind};

pub(crate) fn conjunction(items: Vec<SqlExpr>) -> SqlExpr {
    sql_and(items).unwrap_or(SqlExpr::value(true))
}

pub(crate) fn disjunction(items: Vec<SqlExpr>) -> SqlExpr {
    sql_or(items).unwrap_or(SqlExpr::value(false))
}

fn cmp_binary(op: CmpOp) -> Option<BinaryOp> {
    Some(match op {
        CmpOp::Eq => BinaryOp::Eq,
        CmpOp::Ne => BinaryOp::Ne,
        CmpOp::Lt => BinaryOp::Lt,
        CmpOp::Le => BinaryOp::Le,
        CmpOp::Gt => BinaryOp::Gt,
        CmpOp::Ge => BinaryOp::Ge,
        _ => return None,
    })
}

/// Logical negation of a comparison operator.
fn negated_cmp(op: CmpOp) -> CmpOp {
    match op {
        CmpOp::Lt => CmpOp::Ge,
        CmpOp::Ge => CmpOp::Lt,
        CmpOp::Le => CmpOp::Gt,
        CmpOp::Gt => CmpOp::Le,
        CmpOp::Eq => CmpOp::Ne,
        CmpOp::Ne => CmpOp::Eq,
        CmpOp::Is => CmpOp::IsNot,
        CmpOp::IsNot => CmpOp::Is,
        CmpOp::In => CmpOp::NotIn,
        CmpOp::NotIn => CmpOp::In,
    }
}

/// Negate a boolean SQL expression, folding into the operator when it has
/// a negated form.
pub(crate) fn negate_sql(sql: SqlExpr) -> SqlExpr {
    match sql {
        SqlExpr::In {
            expr,
            list,
            negated,
        } => SqlExpr::In {
            expr,
            list,
            negated: !negated,
        },
        SqlExpr::InSelect {
            expr,
            select,
            negated,
        } => SqlExpr::InSelect {
            expr,
            select,
            negated: !negated,
        },
        SqlExpr::Exists { select, negated } => SqlExpr::Exists {
            select,
            negated: !negated,
        },
        SqlExpr::Like {
            expr,
            template,
            escape,
            negated,
        } => SqlExpr::Like {
            expr,
            template,
            escape,
            negated: !negated,
        },
        SqlExpr::Between {
            expr,
            low,
            high,
            negated,
        } => SqlExpr::Between {
            expr,
            low,
            high,
            negated: !negated,
        },
        SqlExpr::IsNull(x) => SqlExpr::IsNotNull(x),
        SqlExpr::IsNotNull(x) => SqlExpr::IsNull(x),
        SqlExpr::Not(x) => *x,
        other => SqlExpr::not(other),
    }
}

fn arith_binary(op: BinOpKind) -> Option<BinaryOp> {
    Some(match op {
        BinOpKind::Add => BinaryOp::Add,
        BinOpKind::Sub => BinaryOp::Sub,
        BinOpKind::Mult => BinaryOp::Mul,
        BinOpKind::Div => BinaryOp::Div,
        BinOpKind::FloorDiv => BinaryOp::FloorDiv,
        BinOpKind::Mod => BinaryOp::Mod,
        BinOpKind::Pow => BinaryOp::Pow,
        _ => return None,
    })
}

impl Translator<'_> {
    /// SQL fragments of a monad, one per column.
    pub fn getsql(&mut self, monad: &Monad) -> TranslateResult<Vec<SqlExpr>> {
        let schema = self.schema;
        match &monad.kind {
            MonadKind::ObjectIter { tableref } => {
                let (alias, columns) = self.arena_mut().make_join(schema, *tableref, true)?;
                Ok(columns
                    .into_iter()
                    .map(|c| SqlExpr::column(alias.clone(), c))
                    .collect())
            }
            MonadKind::Attr { .. } => self.attr_sql(monad),
            MonadKind::AttrSet { .. } => {
                let subquery = self.subquery_id();
                let tableref = self.make_tableref(monad, subquery)?;
                self.make_expr_list(monad, tableref)
            }
            MonadKind::NumericSetExpr { .. } => {
                let subquery = self.subquery_id();
                Ok(self.numeric_set_sql(monad, subquery)?.0)
            }
            MonadKind::Param { key, .. } => match monad.ty.entity() {
                Some(entity) => {
                    let width = entity_of(schema, &entity.name)?.pk_columns().len();
                    Ok((0..width)
                        .map(|j| SqlExpr::Param(key.clone().pk(j)))
                        .collect())
                }
                None => Ok(vec![SqlExpr::Param(key.clone())]),
            },
            MonadKind::Const(value) => Ok(vec![const_sql(value)?]),
            MonadKind::Expr(sql) => Ok(sql.clone()),
            MonadKind::Cmp { op, left, right } => Ok(vec![self.cmp_sql(*op, left, right)?]),
            MonadKind::And(items) => {
                let sql = self.single_sql_all(items)?;
                Ok(vec![conjunction(sql)])
            }
            MonadKind::Or(items) => {
                let sql = self.single_sql_all(items)?;
                Ok(vec![disjunction(sql)])
            }
            MonadKind::Not(operand) => Ok(vec![SqlExpr::not(self.single_sql(operand)?)]),
            MonadKind::BoolExpr(sql) => Ok(vec![sql.clone()]),
            MonadKind::List(items) => Ok(vec![SqlExpr::Row(self.single_sql_all(items)?)]),
            MonadKind::Method { .. } => Err(forgot_parentheses(monad)),
            MonadKind::Func(builtin) => Err(TranslateError::type_error(format!(
                "Function {} cannot be used this way: {}",
                python_repr(builtin.name()),
                monad.src
            ))),
            MonadKind::EntitySet(entity) => Err(TranslateError::not_implemented(format!(
                "Entity {} cannot be used as a value: {}",
                entity.name, EXPR_PLACEHOLDER
            ))),
            MonadKind::QuerySet(_) => Err(TranslateError::not_implemented(format!(
                "Subquery cannot be used as a value: {}",
                EXPR_PLACEHOLDER
            ))),
            MonadKind::Desc(inner) => Ok(self
                .getsql(inner)?
                .into_iter()
                .map(|s| SqlExpr::Desc(Box::new(s)))
                .collect()),
        }
    }

    /// The single SQL fragment of a monad; several columns become a row.
    pub fn single_sql(&mut self, monad: &Monad) -> TranslateResult<SqlExpr> {
        let mut sql = self.getsql(monad)?;
        if sql.len() == 1 {
            Ok(sql.remove(0))
        } else {
            Ok(SqlExpr::Row(sql))
        }
    }

    fn single_sql_all(&mut self, monads: &[Monad]) -> TranslateResult<Vec<SqlExpr>> {
        monads.iter().map(|m| self.single_sql(m)).collect()
    }

    fn attr_sql(&mut self, monad: &Monad) -> TranslateResult<Vec<SqlExpr>> {
        let MonadKind::Attr {
            parent,
            attr,
            tableref,
        } = &monad.kind
        else {
            return Err(TranslateError::translation("Attribute expected"));
        };
        let schema = self.schema;
        let attr = attr.resolve(schema)?;
        let parent_tableref = parent.tableref().ok_or_else(|| {
            TranslateError::not_implemented(format!(
                "Attribute {} of a computed value is not supported: {}",
                attr.name, EXPR_PLACEHOLDER
            ))
        })?;
        let pk_only = attr.pk_offset.is_some();
        let (alias, parent_columns) =
            self.arena_mut().make_join(schema, parent_tableref, pk_only)?;
        let (alias, columns) = if let Some(offset) = attr.pk_offset {
            let columns = parent_columns
                .into_iter()
                .skip(offset)
                .take(attr.columns.len())
                .collect();
            (alias, columns)
        } else if attr.columns.is_empty() {
            let own = tableref.ok_or_else(|| {
                TranslateError::translation(format!("Attribute {} has no columns", attr.name))
            })?;
            let subquery = self.arena.tableref(own).subquery;
            self.arena_mut().subquery_mut(subquery).from.kind = FromKind::Left;
            if subquery == self.frame.subquery {
                self.frame.left_join = true;
            }
            self.arena_mut().make_join(schema, own, false)?
        } else {
            (alias, attr.columns.clone())
        };
        Ok(columns
            .into_iter()
            .map(|c| SqlExpr::column(alias.clone(), c))
            .collect())
    }

    /// Reject operand types that cannot meet under `op`.
    pub fn check_comparable(&self, left: &Monad, right: &Monad, op: CmpOp) -> TranslateResult<()> {
        if left.is_method() {
            return Err(forgot_parentheses(left));
        }
        if right.is_method() {
            return Err(forgot_parentheses(right));
        }
        if !comparable(op, &left.ty, &right.ty) {
            let right_ty = match op {
                CmpOp::In | CmpOp::NotIn => right.ty.item_type(),
                _ => &right.ty,
            };
            return Err(TranslateError::incomparable(
                type_label(&left.ty),
                type_label(right_ty),
            ));
        }
        Ok(())
    }

    /// Common type of two operands. Booleans meeting numbers are cast to
    /// integers on dialects without implicit conversion.
    pub fn coerce_monads(
        &mut self,
        left: Monad,
        right: Monad,
    ) -> TranslateResult<(Option<CanonicalType>, Monad, Monad)> {
        let result = coerce(&left.ty, &right.ty);
        let mixes_bool = left.ty.is_bool() || right.ty.is_bool();
        let widened = matches!(&result, Some(t) if t.is_numeric() && !t.is_bool());
        if !(mixes_bool && widened && self.dialect.casts_bool_in_arithmetic()) {
            return Ok((result, left, right));
        }
        let left = self.bool_to_int(left)?;
        let right = self.bool_to_int(right)?;
        Ok((result, left, right))
    }

    fn bool_to_int(&mut self, monad: Monad) -> TranslateResult<Monad> {
        if !monad.ty.is_bool() {
            return Ok(monad);
        }
        let sql = self.single_sql(&monad)?;
        let mut cast = Monad::expr(CanonicalType::INT, vec![SqlExpr::func(ScalarFunc::ToInt, vec![sql])]);
        cast.aggregated = monad.aggregated;
        cast.nogroup = monad.nogroup;
        cast.src = monad.src;
        Ok(cast)
    }

    pub fn cmp(&mut self, op: CmpOp, left: Monad, right: Monad) -> TranslateResult<Monad> {
        ordering_only(&left)?;
        ordering_only(&right)?;
        if let MonadKind::AttrSet { .. } = left.kind {
            self.check_comparable(&left, &right, op)?;
            return Err(TranslateError::not_implemented(format!(
                "Collections cannot be compared: {}",
                EXPR_PLACEHOLDER
            )));
        }
        let (mut left, mut right) = (left, right);
        if left.ty == CanonicalType::Null && right.ty != CanonicalType::Null {
            std::mem::swap(&mut left, &mut right);
        }
        let op = if right.ty == CanonicalType::Null {
            match op {
                CmpOp::Eq => CmpOp::Is,
                CmpOp::Ne => CmpOp::IsNot,
                other => other,
            }
        } else {
            match op {
                CmpOp::Is => CmpOp::Eq,
                CmpOp::IsNot => CmpOp::Ne,
                other => other,
            }
        };
        self.check_comparable(&left, &right, op)?;
        let (_, left, right) = self.coerce_monads(left, right)?;
        let aggregated = left.is_aggregated() || right.is_aggregated();
        Ok(Monad::new(
            MonadKind::Cmp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            CanonicalType::BOOL,
        )
        .with_aggregated(aggregated))
    }

    fn cmp_sql(&mut self, op: CmpOp, left: &Monad, right: &Monad) -> TranslateResult<SqlExpr> {
        let mut left_sql = self.getsql(left)?;
        match op {
            CmpOp::Is => return Ok(conjunction(left_sql.into_iter().map(SqlExpr::is_null).collect())),
            CmpOp::IsNot => {
                return Ok(conjunction(
                    left_sql.into_iter().map(SqlExpr::is_not_null).collect(),
                ))
            }
            _ => {}
        }
        let mut right_sql = self.getsql(right)?;
        if let [SqlExpr::Row(items)] = left_sql.as_slice() {
            left_sql = items.clone();
        }
        if let [SqlExpr::Row(items)] = right_sql.as_slice() {
            right_sql = items.clone();
        }
        if left_sql.len() != right_sql.len() {
            return Err(TranslateError::incomparable(
                type_label(&left.ty),
                type_label(&right.ty),
            ));
        }
        let binary = cmp_binary(op).ok_or_else(|| {
            TranslateError::translation(format!("Unexpected operator {}", op.symbol()))
        })?;
        let size = left_sql.len();
        match op {
            CmpOp::Eq => Ok(conjunction(
                left_sql
                    .into_iter()
                    .zip(right_sql)
                    .map(|(a, b)| SqlExpr::eq(a, b))
                    .collect(),
            )),
            CmpOp::Ne => Ok(disjunction(
                left_sql
                    .into_iter()
                    .zip(right_sql)
                    .map(|(a, b)| SqlExpr::binary(BinaryOp::Ne, a, b))
                    .collect(),
            )),
            _ if size == 1 => Ok(SqlExpr::binary(
                binary,
                left_sql.remove(0),
                right_sql.remove(0),
            )),
            _ if self.dialect.supports_row_value() => Ok(SqlExpr::binary(
                binary,
                SqlExpr::Row(left_sql),
                SqlExpr::Row(right_sql),
            )),
            _ => {
                // Lexicographic order: equal on a prefix, then ordered on
                // the next column.
                let strict = match binary {
                    BinaryOp::Le => BinaryOp::Lt,
                    BinaryOp::Ge => BinaryOp::Gt,
                    other => other,
                };
                let mut clauses = Vec::with_capacity(size);
                for i in 0..size {
                    let mut clause: Vec<SqlExpr> = (0..i)
                        .map(|j| SqlExpr::eq(left_sql[j].clone(), right_sql[j].clone()))
                        .collect();
                    let last_op = if i + 1 < size { strict } else { binary };
                    clause.push(SqlExpr::binary(
                        last_op,
                        left_sql[i].clone(),
                        right_sql[i].clone(),
                    ));
                    clauses.push(conjunction(clause));
                }
                Ok(disjunction(clauses))
            }
        }
    }

    /// `item in container`.
    pub fn contains(&mut self, container: Monad, item: Monad, not_in: bool) -> TranslateResult<Monad> {
        ordering_only(&container)?;
        ordering_only(&item)?;
        if item.is_method() {
            return Err(forgot_parentheses(&item));
        }
        match &container.kind {
            MonadKind::Method { .. } => Err(forgot_parentheses(&container)),
            MonadKind::List(_) => self.list_contains(container, item, not_in),
            MonadKind::AttrSet { .. } => self.attrset_contains(container, item, not_in),
            MonadKind::QuerySet(_) => self.queryset_contains(container, item, not_in),
            _ if container.ty.is_string() => self.string_contains(container, item, not_in),
            _ => Err(TranslateError::type_error(format!(
                "Operator `in` cannot be applied to {}: {}",
                type_repr(&container.ty),
                EXPR_PLACEHOLDER
            ))),
        }
    }

    fn list_contains(&mut self, list: Monad, item: Monad, not_in: bool) -> TranslateResult<Monad> {
        let MonadKind::List(items) = &list.kind else {
            return Err(TranslateError::translation("List expected"));
        };
        if item.ty.is_set() {
            return Err(TranslateError::type_error(format!(
                "Type of `{}` is '{}'. Expression `{}` is not supported",
                item.src,
                type_label(&item.ty),
                EXPR_PLACEHOLDER
            )));
        }
        for element in items {
            if element.is_method() {
                return Err(forgot_parentheses(element));
            }
            if !comparable_membership(&item.ty, &element.ty) {
                return Err(TranslateError::incomparable(
                    type_label(&item.ty),
                    type_label(&element.ty),
                ));
            }
        }
        let left_sql = self.getsql(&item)?;
        let sql = if left_sql.len() == 1 {
            let list_sql = self.single_sql_all(items)?;
            SqlExpr::In {
                expr: Box::new(left_sql.into_iter().next().unwrap_or(SqlExpr::value(SqlLiteral::Null))),
                list: list_sql,
                negated: not_in,
            }
        } else {
            let mut alternatives = Vec::with_capacity(items.len());
            for element in items {
                let element_sql = self.getsql(element)?;
                let pairs = left_sql.iter().cloned().zip(element_sql);
                alternatives.push(if not_in {
                    disjunction(pairs.map(|(a, b)| SqlExpr::binary(BinaryOp::Ne, a, b)).collect())
                } else {
                    conjunction(pairs.map(|(a, b)| SqlExpr::eq(a, b)).collect())
                });
            }
            if not_in {
                conjunction(alternatives)
            } else {
                disjunction(alternatives)
            }
        };
        Ok(Monad::bool_expr(sql))
    }

    /// Truthiness of a monad as a boolean monad.
    pub fn nonzero(&mut self, monad: Monad) -> TranslateResult<Monad> {
        ordering_only(&monad)?;
        let result = match &monad.kind {
            MonadKind::Method { .. } => return Err(forgot_parentheses(&monad)),
            MonadKind::AttrSet { .. } => self.attrset_nonzero(&monad, false)?,
            MonadKind::QuerySet(frame) => {
                let frame = frame.as_ref().clone();
                self.queryset_exists(&frame, false)?
            }
            _ if monad.ty.is_bool() => return Ok(monad),
            _ if monad.ty.is_numeric() => {
                self.cmp(CmpOp::Ne, monad.clone(), Monad::constant(Value::Int(0)))?
            }
            _ if monad.ty.is_string() => {
                let sql = self.single_sql(&monad)?;
                Monad::bool_expr(SqlExpr::binary(
                    BinaryOp::Gt,
                    SqlExpr::func(ScalarFunc::Length, vec![sql]),
                    SqlExpr::value(0i64),
                ))
            }
            _ if monad.ty.is_entity() => {
                self.cmp(CmpOp::IsNot, monad.clone(), Monad::constant(Value::None))?
            }
            _ => {
                return Err(TranslateError::type_error(format!(
                    "Value of type {} cannot be used as a condition: {}",
                    type_repr(&monad.ty),
                    EXPR_PLACEHOLDER
                )))
            }
        };
        Ok(inherit_flags(result, &monad))
    }

    /// Logical negation.
    pub fn negate(&mut self, monad: Monad) -> TranslateResult<Monad> {
        ordering_only(&monad)?;
        let result = match &monad.kind {
            MonadKind::Method { .. } => return Err(forgot_parentheses(&monad)),
            MonadKind::Cmp { op, left, right } => Monad::new(
                MonadKind::Cmp {
                    op: negated_cmp(*op),
                    left: left.clone(),
                    right: right.clone(),
                },
                CanonicalType::BOOL,
            ),
            MonadKind::BoolExpr(sql) => Monad::bool_expr(negate_sql(sql.clone())),
            MonadKind::Not(operand) => return Ok(operand.as_ref().clone()),
            MonadKind::AttrSet { .. } => self.attrset_nonzero(&monad, true)?,
            MonadKind::QuerySet(frame) => {
                let frame = frame.as_ref().clone();
                self.queryset_exists(&frame, true)?
            }
            MonadKind::And(_) | MonadKind::Or(_) => {
                Monad::new(MonadKind::Not(Box::new(monad.clone())), CanonicalType::BOOL)
            }
            _ if monad.ty.is_numeric() => self.numeric_negate(&monad)?,
            _ if monad.ty.is_string() => self.string_negate(&monad)?,
            _ if monad.ty.is_entity() => {
                self.cmp(CmpOp::Is, monad.clone(), Monad::constant(Value::None))?
            }
            _ => {
                let operand = self.nonzero(monad.clone())?;
                Monad::new(MonadKind::Not(Box::new(operand)), CanonicalType::BOOL)
            }
        };
        Ok(inherit_flags(result, &monad))
    }

    fn numeric_negate(&mut self, monad: &Monad) -> TranslateResult<Monad> {
        let zero = Monad::constant(Value::Int(0));
        let result = self.cmp(CmpOp::Eq, monad.clone(), zero)?;
        if !self.is_nullable(monad)? {
            return Ok(result);
        }
        let cmp_sql = self.single_sql(&result)?;
        let sql = self.single_sql(monad)?;
        Ok(Monad::bool_expr(disjunction(vec![cmp_sql, SqlExpr::is_null(sql)])))
    }

    /// Whether the monad may be NULL. Only attributes are known not to be.
    pub fn is_nullable(&self, monad: &Monad) -> TranslateResult<bool> {
        match &monad.kind {
            MonadKind::Attr { attr, .. } => Ok(attr.resolve(self.schema)?.nullable()),
            _ => Ok(true),
        }
    }

    pub fn and(&mut self, operands: Vec<Monad>) -> TranslateResult<Monad> {
        self.logical(operands, true)
    }

    pub fn or(&mut self, operands: Vec<Monad>) -> TranslateResult<Monad> {
        self.logical(operands, false)
    }

    fn logical(&mut self, operands: Vec<Monad>, and: bool) -> TranslateResult<Monad> {
        let mut items = Vec::with_capacity(operands.len());
        for operand in operands {
            if !operand.ty.is_bool() {
                items.push(self.nonzero(operand)?);
                continue;
            }
            match operand.kind {
                MonadKind::And(inner) if and => items.extend(inner),
                MonadKind::Or(inner) if !and => items.extend(inner),
                _ => items.push(operand),
            }
        }
        let kind = if and {
            MonadKind::And(items)
        } else {
            MonadKind::Or(items)
        };
        Ok(Monad::new(kind, CanonicalType::BOOL))
    }

    pub fn list(&mut self, items: Vec<Monad>) -> Monad {
        let ty = CanonicalType::Tuple(items.iter().map(|m| m.ty.clone()).collect());
        Monad::new(MonadKind::List(items), ty)
    }

    /// Binary arithmetic and string concatenation.
    pub fn binop(&mut self, left: Monad, op: BinOpKind, right: Monad) -> TranslateResult<Monad> {
        ordering_only(&left)?;
        ordering_only(&right)?;
        if left.is_method() {
            return Err(forgot_parentheses(&left));
        }
        let is_numeric_set =
            |m: &Monad| matches!(m.kind, MonadKind::AttrSet { .. } | MonadKind::NumericSetExpr { .. });
        let set_op = matches!(
            op,
            BinOpKind::Add | BinOpKind::Sub | BinOpKind::Mult | BinOpKind::Div | BinOpKind::FloorDiv
        );
        if set_op && (is_numeric_set(&left) || (left.ty.is_numeric() && is_numeric_set(&right))) {
            return self.numeric_set_expr(left, op, right);
        }
        if right.is_method() {
            return Err(forgot_parentheses(&right));
        }
        if left.ty.is_string() && !left.ty.is_set() && op == BinOpKind::Add {
            return self.string_concat(left, right);
        }
        if !left.ty.is_numeric() || left.is_set_like() {
            return Err(binop_error(&left, &right, op.symbol()));
        }
        let binary = arith_binary(op).ok_or_else(|| binop_error(&left, &right, op.symbol()))?;
        if op == BinOpKind::Pow {
            if !right.ty.is_numeric() || right.is_set_like() {
                return Err(binop_error(&left, &right, op.symbol()));
            }
            let left_sql = self.single_sql(&left)?;
            let right_sql = self.single_sql(&right)?;
            return Ok(Monad::expr(
                CanonicalType::FLOAT,
                vec![SqlExpr::binary(binary, left_sql, right_sql)],
            ));
        }
        let (result, left, right) = self.coerce_monads(left, right)?;
        let Some(result) = result.filter(|t| t.is_numeric() && !t.is_set()) else {
            return Err(binop_error(&left, &right, op.symbol()));
        };
        let left_sql = self.single_sql(&left)?;
        let right_sql = self.single_sql(&right)?;
        Ok(Monad::expr(result, vec![SqlExpr::binary(binary, left_sql, right_sql)]))
    }

    pub fn neg(&mut self, monad: Monad) -> TranslateResult<Monad> {
        ordering_only(&monad)?;
        if monad.is_method() {
            return Err(forgot_parentheses(&monad));
        }
        if !monad.ty.is_numeric() || monad.is_set_like() {
            return Err(TranslateError::type_error(format!(
                "Unsupported operand type for unary -: {}",
                type_repr(&monad.ty)
            )));
        }
        let sql = self.single_sql(&monad)?;
        Ok(Monad::expr(monad.ty.clone(), vec![SqlExpr::Neg(Box::new(sql))]))
    }

    pub fn pos(&mut self, monad: Monad) -> TranslateResult<Monad> {
        ordering_only(&monad)?;
        if monad.is_method() {
            return Err(forgot_parentheses(&monad));
        }
        if !monad.ty.is_numeric() || monad.is_set_like() {
            return Err(TranslateError::type_error(format!(
                "Unsupported operand type for unary +: {}",
                type_repr(&monad.ty)
            )));
        }
        Ok(monad)
    }

    pub fn abs(&mut self, monad: Monad) -> TranslateResult<Monad> {
        if monad.is_method() {
            return Err(forgot_parentheses(&monad));
        }
        if !monad.ty.is_numeric() || monad.is_set_like() {
            return Err(TranslateError::type_error(format!(
                "Function abs() cannot be applied to type {} in {}",
                type_repr(&monad.ty),
                EXPR_PLACEHOLDER
            )));
        }
        let sql = self.single_sql(&monad)?;
        Ok(Monad::expr(
            monad.ty.clone(),
            vec![SqlExpr::func(ScalarFunc::Abs, vec![sql])],
        ))
    }

    /// `body if test else orelse`.
    pub fn if_exp(&mut self, test: Monad, body: Monad, orelse: Monad) -> TranslateResult<Monad> {
        for m in [&test, &body, &orelse] {
            if m.is_method() {
                return Err(forgot_parentheses(m));
            }
        }
        let test = if test.ty.is_bool() {
            test
        } else {
            self.nonzero(test)?
        };
        let incompatible = || {
            TranslateError::type_error(format!(
                "Incompatible types {} and {} in conditional expression: {}",
                type_repr(&body.ty),
                type_repr(&orelse.ty),
                EXPR_PLACEHOLDER
            ))
        };
        let ty = match (&body.ty, &orelse.ty) {
            (CanonicalType::Null, t) | (t, CanonicalType::Null) => t.clone(),
            (a, b) => coerce(a, b).ok_or_else(incompatible)?,
        };
        let test_sql = self.single_sql(&test)?;
        let mut then_sql = self.getsql(&body)?;
        let mut else_sql = self.getsql(&orelse)?;
        if then_sql.len() != else_sql.len() {
            return Err(incompatible());
        }
        let (then_sql, else_sql) = if then_sql.len() == 1 {
            (then_sql.remove(0), else_sql.remove(0))
        } else if self.dialect.supports_row_value() {
            (SqlExpr::Row(then_sql), SqlExpr::Row(else_sql))
        } else {
            return Err(TranslateError::not_implemented(format!(
                "Conditional expressions over several columns are not supported by {}: {}",
                self.dialect.name(),
                EXPR_PLACEHOLDER
            )));
        };
        let aggregated = test.is_aggregated() || body.is_aggregated() || orelse.is_aggregated();
        Ok(
            Monad::expr(ty, vec![SqlExpr::case_when(test_sql, then_sql, Some(else_sql))])
                .with_aggregated(aggregated),
        )
    }

    /// Attribute access.
    pub fn getattr(&mut self, monad: Monad, name: &str) -> TranslateResult<Monad> {
        match &monad.kind {
            MonadKind::Method { .. } => return Err(forgot_parentheses(&monad)),
            MonadKind::AttrSet { .. } => return self.attrset_getattr(monad, name),
            MonadKind::QuerySet(_) => {
                const METHODS: [&str; 7] = ["count", "sum", "avg", "min", "max", "exists", "distinct"];
                if METHODS.contains(&name) {
                    return Ok(method(monad, name));
                }
            }
            MonadKind::NumericSetExpr { .. } => {
                if name == "distinct" {
                    return Ok(method(monad, name));
                }
            }
            _ if monad.ty.is_entity() && monad.tableref().is_some() => {
                return self.object_getattr(monad, name)
            }
            _ if monad.ty.is_string() => {
                if super::string::STRING_METHODS.contains(&name) {
                    return Ok(method(monad, name));
                }
            }
            _ if matches!(monad.ty, CanonicalType::Date | CanonicalType::DateTime) => {
                if let Some(func) = date_part(&monad.ty, name) {
                    let sql = self.single_sql(&monad)?;
                    return Ok(Monad::expr(CanonicalType::INT, vec![SqlExpr::func(func, vec![sql])]));
                }
            }
            _ => {}
        }
        Err(TranslateError::attribute(format!(
            "{} object has no attribute {}: {}",
            type_repr(&monad.ty),
            python_repr(name),
            EXPR_PLACEHOLDER
        )))
    }

    fn object_getattr(&mut self, monad: Monad, name: &str) -> TranslateResult<Monad> {
        let schema = self.schema;
        let entity_ref = monad
            .ty
            .entity()
            .cloned()
            .ok_or_else(|| TranslateError::translation("Entity expected"))?;
        let entity = entity_of(schema, &entity_ref.name)?;
        let owner = if entity.attr(name).is_some() {
            entity.name.clone()
        } else {
            entity
                .subclasses
                .iter()
                .find(|sub| schema.entity(sub).is_some_and(|e| e.attr(name).is_some()))
                .cloned()
                .ok_or_else(|| {
                    TranslateError::attribute(format!(
                        "Entity {} does not have attribute {}: {}",
                        entity.name, name, EXPR_PLACEHOLDER
                    ))
                })?
        };
        let attr_ref = AttrRef::new(owner, name);
        let attr = attr_ref.resolve(schema)?;
        let ty = schema.attr_type(attr);
        let parent_tableref = monad.tableref().ok_or_else(|| {
            TranslateError::translation(format!("Entity expression {} is not bound", monad.src))
        })?;
        if attr.is_collection() {
            return Ok(Monad::new(
                MonadKind::AttrSet {
                    parent: Box::new(monad),
                    attr: attr_ref,
                },
                ty,
            ));
        }
        let tableref = match attr.target() {
            Some(target) => Some(self.attr_tableref(parent_tableref, &attr_ref, target)?),
            None => None,
        };
        Ok(Monad::new(
            MonadKind::Attr {
                parent: Box::new(monad),
                attr: attr_ref,
                tableref,
            },
            ty,
        ))
    }

    /// Reference for a to-one hop, registered in the parent's subquery
    /// unless the current subquery already knows the path.
    fn attr_tableref(
        &mut self,
        parent: TableRefId,
        attr: &AttrRef,
        target: &str,
    ) -> TranslateResult<TableRefId> {
        let parent_ref = self.arena.tableref(parent);
        let name_path = format!("{}-{}", parent_ref.name_path, attr.name);
        let parent_subquery = parent_ref.subquery;
        let subquery = self.subquery_id();
        if let Some(found) = self.arena_mut().get_tableref(subquery, &name_path) {
            return Ok(found);
        }
        Ok(self
            .arena_mut()
            .add_joined(parent_subquery, &name_path, parent, attr.clone(), target))
    }

    /// Call a function or bound-method monad.
    pub fn call(
        &mut self,
        func: Monad,
        args: Vec<Monad>,
        keywords: Vec<(String, Monad)>,
    ) -> TranslateResult<Monad> {
        match func.kind {
            MonadKind::Func(builtin) => self.call_builtin(builtin, args, keywords),
            MonadKind::Method { parent, name } => self.call_method(*parent, &name, args, keywords),
            _ => Err(TranslateError::type_error(format!(
                "{} object is not callable: {}",
                type_repr(&func.ty),
                EXPR_PLACEHOLDER
            ))),
        }
    }

    fn call_method(
        &mut self,
        parent: Monad,
        name: &str,
        args: Vec<Monad>,
        keywords: Vec<(String, Monad)>,
    ) -> TranslateResult<Monad> {
        if parent.ty.is_string() && !parent.is_set_like() {
            return self.call_string_method(parent, name, args, keywords);
        }
        expect_args(name, &args, &keywords, 0, 0)?;
        match name {
            "distinct" => Ok(Monad {
                forced_distinct: true,
                ..parent
            }),
            "count" => self.count(parent),
            "sum" => self.aggregate(parent, AggFunc::Sum),
            "avg" => self.aggregate(parent, AggFunc::Avg),
            "min" => self.aggregate(parent, AggFunc::Min),
            "max" => self.aggregate(parent, AggFunc::Max),
            "exists" => self.nonzero(parent),
            _ => Err(TranslateError::attribute(format!(
                "{} object has no attribute {}: {}",
                type_repr(&parent.ty),
                python_repr(name),
                EXPR_PLACEHOLDER
            ))),
        }
    }

    /// `len(x)`.
    pub fn len(&mut self, monad: Monad) -> TranslateResult<Monad> {
        match &monad.kind {
            MonadKind::Method { .. } => Err(forgot_parentheses(&monad)),
            MonadKind::AttrSet { .. } | MonadKind::QuerySet(_) => self.count(monad),
            _ if monad.ty.is_string() => self.string_len(monad),
            _ => Err(TranslateError::type_error(format!(
                "Function len() cannot be applied to type {} in {}",
                type_repr(&monad.ty),
                EXPR_PLACEHOLDER
            ))),
        }
    }

    /// `count(x)`, or `x.count()`.
    pub fn count(&mut self, monad: Monad) -> TranslateResult<Monad> {
        match &monad.kind {
            MonadKind::Method { .. } => Err(forgot_parentheses(&monad)),
            MonadKind::AttrSet { .. } => self.attrset_count(monad),
            MonadKind::QuerySet(frame) => {
                let frame = frame.as_ref().clone();
                self.queryset_count(&frame)
            }
            _ => self.scalar_count(monad),
        }
    }

    fn scalar_count(&mut self, monad: Monad) -> TranslateResult<Monad> {
        if monad.is_aggregated() {
            return Err(TranslateError::translation(format!(
                "Aggregated functions cannot be nested. Got: {}",
                EXPR_PLACEHOLDER
            )));
        }
        let expr = self.getsql(&monad)?;
        let count = if monad.ty.is_bool() {
            let cond = expr.into_iter().next().unwrap_or(SqlExpr::value(SqlLiteral::Null));
            SqlExpr::Count {
                distinct: false,
                args: vec![SqlExpr::case_when(
                    cond,
                    SqlExpr::value(1i64),
                    Some(SqlExpr::value(SqlLiteral::Null)),
                )],
            }
        } else if expr.len() == 1 {
            SqlExpr::Count {
                distinct: true,
                args: expr,
            }
        } else if self.dialect.count_uses_row_value() {
            let row = SqlExpr::Row(expr);
            SqlExpr::Count {
                distinct: true,
                args: vec![SqlExpr::Case {
                    cases: vec![(SqlExpr::is_null(row.clone()), SqlExpr::value(SqlLiteral::Null))],
                    default: Some(Box::new(row)),
                }],
            }
        } else if self.dialect.counts_by_rowid() {
            let tableref = monad.tableref().ok_or_else(|| {
                TranslateError::not_implemented(format!(
                    "Composite values cannot be counted: {}",
                    EXPR_PLACEHOLDER
                ))
            })?;
            let schema = self.schema;
            let (alias, _) = self.arena_mut().make_join(schema, tableref, false)?;
            SqlExpr::Count {
                distinct: true,
                args: vec![SqlExpr::column(alias, "ROWID")],
            }
        } else {
            return Err(TranslateError::not_implemented(format!(
                "{} database provider does not support entities with composite primary keys inside aggregate functions. Got: {}",
                self.dialect.name(),
                EXPR_PLACEHOLDER
            )));
        };
        Ok(Monad::expr(CanonicalType::INT, vec![count]).with_aggregated(true))
    }

    /// `sum/avg/min/max` of a monad.
    pub fn aggregate(&mut self, monad: Monad, func: AggFunc) -> TranslateResult<Monad> {
        match &monad.kind {
            MonadKind::Method { .. } => Err(forgot_parentheses(&monad)),
            MonadKind::AttrSet { .. } => self.attrset_aggregate(monad, func),
            MonadKind::NumericSetExpr { .. } => self.numeric_set_aggregate(monad, func),
            MonadKind::QuerySet(frame) => {
                let frame = frame.as_ref().clone();
                self.queryset_aggregate(&frame, func, monad.forced_distinct)
            }
            _ => self.scalar_aggregate(monad, func),
        }
    }

    fn scalar_aggregate(&mut self, monad: Monad, func: AggFunc) -> TranslateResult<Monad> {
        if monad.is_aggregated() {
            return Err(TranslateError::translation(format!(
                "Aggregated functions cannot be nested. Got: {}",
                EXPR_PLACEHOLDER
            )));
        }
        check_aggregate_type(&monad.ty, func)?;
        let mut expr = self.getsql(&monad)?;
        let arg = if expr.len() == 1 {
            expr.remove(0)
        } else if self.dialect.supports_row_value() {
            SqlExpr::Row(expr)
        } else {
            return Err(TranslateError::not_implemented(format!(
                "{} over several columns is not supported by {}: {}",
                func.name(),
                self.dialect.name(),
                EXPR_PLACEHOLDER
            )));
        };
        let ty = aggregate_result_type(&monad.ty, func);
        let distinct = monad.forced_distinct && matches!(func, AggFunc::Sum | AggFunc::Avg);
        Ok(Monad::expr(
            ty,
            vec![SqlExpr::Aggregate {
                func,
                distinct,
                args: vec![arg],
            }],
        )
        .with_aggregated(true))
    }
}

fn method(parent: Monad, name: &str) -> Monad {
    Monad::new(
        MonadKind::Method {
            parent: Box::new(parent),
            name: name.to_string(),
        },
        CanonicalType::Method,
    )
}

fn date_part(ty: &CanonicalType, name: &str) -> Option<ScalarFunc> {
    let func = match name {
        "year" => ScalarFunc::Year,
        "month" => ScalarFunc::Month,
        "day" => ScalarFunc::Day,
        "hour" => ScalarFunc::Hour,
        "minute" => ScalarFunc::Minute,
        "second" => ScalarFunc::Second,
        _ => return None,
    };
    let time_part = matches!(func, ScalarFunc::Hour | ScalarFunc::Minute | ScalarFunc::Second);
    if time_part && *ty != CanonicalType::DateTime {
        return None;
    }
    Some(func)
}

pub(crate) fn const_sql(value: &Value) -> TranslateResult<SqlExpr> {
    match value {
        Value::Tuple(items) | Value::List(items) => Ok(SqlExpr::Row(
            items.iter().map(const_sql).collect::<TranslateResult<_>>()?,
        )),
        other => SqlLiteral::from_value(other).map(SqlExpr::Value).ok_or_else(|| {
            TranslateError::not_implemented(format!(
                "Value of type {} cannot be inlined in SQL",
                python_repr(&other.type_name())
            ))
        }),
    }
}

/// Copy the aggregation flags of `source` onto a derived monad that has
/// none of its own.
pub(crate) fn inherit_flags(mut monad: Monad, source: &Monad) -> Monad {
    if monad.aggregated.is_none() {
        monad.aggregated = source.aggregated;
    }
    if monad.nogroup.is_none() {
        monad.nogroup = source.nogroup;
    }
    monad
}

/// Validate the operand type of an aggregate function.
pub(crate) fn check_aggregate_type(ty: &CanonicalType, func: AggFunc) -> TranslateResult<()> {
    let item = ty.item_type();
    match func {
        AggFunc::Sum | AggFunc::Avg if !item.is_numeric() => Err(TranslateError::type_error(format!(
            "Function '{}' expects argument of numeric type, got {} in {}",
            func.name().to_lowercase(),
            type_repr(item),
            EXPR_PLACEHOLDER
        ))),
        AggFunc::Min | AggFunc::Max if !item.is_comparable_kind() => {
            Err(TranslateError::type_error(format!(
                "Function '{}' cannot be applied to type {} in {}",
                func.name().to_lowercase(),
                type_repr(item),
                EXPR_PLACEHOLDER
            )))
        }
        _ => Ok(()),
    }
}

pub(crate) fn aggregate_result_type(ty: &CanonicalType, func: AggFunc) -> CanonicalType {
    match func {
        AggFunc::Avg => CanonicalType::FLOAT,
        AggFunc::Count => CanonicalType::INT,
        AggFunc::Sum if ty.item_type().is_bool() => CanonicalType::Numeric(NumericKind::Int),
        _ => ty.item_type().clone(),
    }
}

/// Reject wrong argument counts and unexpected keywords.
pub(crate) fn expect_args(
    name: &str,
    args: &[Monad],
    keywords: &[(String, Monad)],
    min: usize,
    max: usize,
) -> TranslateResult<()> {
    if let Some((keyword, _)) = keywords.first() {
        return Err(TranslateError::type_error(format!(
            "{}() got an unexpected keyword argument {}",
            name,
            python_repr(keyword)
        )));
    }
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("{}", min)
        } else if max == usize::MAX {
            format!("at least {}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Err(TranslateError::type_error(format!(
            "{}() takes {} arguments ({} given)",
            name,
            expected,
            args.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negate_sql_folds_operators() {
        let col = SqlExpr::column("s", "name");
        assert_eq!(
            negate_sql(SqlExpr::is_null(col.clone())),
            SqlExpr::is_not_null(col.clone())
        );
        assert_eq!(negate_sql(SqlExpr::not(col.clone())), col.clone());
        let negated = negate_sql(SqlExpr::In {
            expr: Box::new(col.clone()),
            list: vec![],
            negated: false,
        });
        assert!(matches!(negated, SqlExpr::In { negated: true, .. }));
    }

    #[test]
    fn test_negated_cmp_is_an_involution() {
        for op in [CmpOp::Lt, CmpOp::Le, CmpOp::Eq, CmpOp::Is] {
            assert_eq!(negated_cmp(negated_cmp(op)), op);
        }
        assert_eq!(negated_cmp(CmpOp::Lt), CmpOp::Ge);
    }

    #[test]
    fn test_aggregate_type_checks() {
        assert!(check_aggregate_type(&CanonicalType::Text, AggFunc::Sum).is_err());
        assert!(check_aggregate_type(&CanonicalType::Text, AggFunc::Max).is_ok());
        assert_eq!(
            aggregate_result_type(&CanonicalType::INT, AggFunc::Avg),
            CanonicalType::FLOAT
        );
    }

    #[test]
    fn test_expect_args_messages() {
        let err = expect_args("upper", &[Monad::constant(Value::Int(1))], &[], 0, 0).unwrap_err();
        assert_eq!(err.to_string(), "upper() takes 0 arguments (1 given)");
    }
}
