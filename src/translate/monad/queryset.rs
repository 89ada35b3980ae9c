//! Nested generator expressions used as values.

use crate::error::{TranslateError, TranslateResult, EXPR_PLACEHOLDER};
use crate::sql::{
    sql_and, AggFunc, Dialect, FromClause, FromItem, FromKind, SelectAst, SelectKind, SelectList,
    Source, SqlDialect, SqlExpr,
};
use crate::syntax::CmpOp;
use crate::types::CanonicalType;

use super::super::translator::{Frame, Translator};
use super::ops::{aggregate_result_type, conjunction};
use super::{type_repr, Monad, MonadKind};

fn aggregates(exprs: Vec<SqlExpr>, from: FromClause, where_: Vec<SqlExpr>) -> SelectAst {
    SelectAst::new(SelectList::new(SelectKind::Aggregates, exprs), from).with_where(where_)
}

fn derived_table(alias: String, select: SelectAst) -> FromClause {
    let mut from = FromClause::new(FromKind::Inner);
    from.items.push(FromItem {
        alias: Some(alias),
        source: Source::Select(Box::new(select)),
        on: None,
    });
    from
}

fn too_complex() -> TranslateError {
    TranslateError::translation(format!("Too complex aggregation in {}", EXPR_PLACEHOLDER))
}

impl Translator<'_> {
    pub fn queryset_contains(&mut self, set: Monad, item: Monad, not_in: bool) -> TranslateResult<Monad> {
        self.check_comparable(&item, &set, CmpOp::In)?;
        let MonadKind::QuerySet(sub) = &set.kind else {
            return Err(TranslateError::translation("Subquery expected"));
        };
        let item_columns = match &item.kind {
            MonadKind::List(items) => {
                let mut columns = Vec::new();
                for m in items {
                    columns.extend(self.getsql(m)?);
                }
                columns
            }
            _ => self.getsql(&item)?,
        };
        let first_is_root = self
            .arena
            .subquery(sub.subquery)
            .from
            .items
            .first()
            .is_some_and(|i| i.on.is_none());

        let sql = if self.frame.hint_join && first_is_root {
            self.joined_membership(sub, item_columns, not_in)?
        } else if item_columns.len() == 1 || self.dialect.supports_row_value() {
            let select = self.shallow_copy(sub, not_in)?;
            let expr = match <[SqlExpr; 1]>::try_from(item_columns) {
                Ok([single]) => single,
                Err(several) => SqlExpr::Row(several),
            };
            SqlExpr::InSelect {
                expr: Box::new(expr),
                select: Box::new(select),
                negated: not_in,
            }
        } else {
            let mut select = self.shallow_copy(sub, false)?;
            let in_conditions: Vec<SqlExpr> = item_columns
                .into_iter()
                .zip(select.select.exprs.clone())
                .map(|(a, b)| SqlExpr::eq(a, b))
                .collect();
            if sub.aggregated {
                select.having.extend(in_conditions);
            } else {
                select.where_.extend(in_conditions);
            }
            SqlExpr::Exists {
                select: Box::new(select),
                negated: not_in,
            }
        };
        Ok(Monad::bool_expr(sql))
    }

    /// Membership as a join against the subquery: an inner join for `in`,
    /// a left join keeping unmatched rows for `not in`.
    fn joined_membership(&mut self, sub: &Frame, item_columns: Vec<SqlExpr>, not_in: bool) -> TranslateResult<SqlExpr> {
        let mut select = self.shallow_copy(sub, false)?;
        let current = self.frame.subquery;
        if not_in {
            self.arena_mut().subquery_mut(current).from.kind = FromKind::Left;
            self.frame.left_join = true;
        } else {
            self.frame.distinct = true;
        }
        let mut names: Vec<String> = Vec::new();
        let mut renamed = Vec::with_capacity(select.select.exprs.len());
        for expr in std::mem::take(&mut select.select.exprs) {
            let name = match &expr {
                SqlExpr::Column { name, .. } if !names.contains(name) => name.clone(),
                _ => self.arena_mut().next_expr_name(),
            };
            names.push(name.clone());
            renamed.push(SqlExpr::As {
                expr: Box::new(expr),
                alias: name,
            });
        }
        select.select.exprs = renamed;
        let alias = self.arena_mut().make_alias(current, "t");
        let on = item_columns
            .into_iter()
            .zip(&names)
            .map(|(item, name)| SqlExpr::eq(item, SqlExpr::column(alias.clone(), name.clone())))
            .collect();
        self.arena_mut().subquery_mut(current).from.items.push(FromItem {
            alias: Some(alias.clone()),
            source: Source::Select(Box::new(select)),
            on: sql_and(on),
        });
        Ok(if not_in {
            conjunction(
                names
                    .into_iter()
                    .map(|n| SqlExpr::is_null(SqlExpr::column(alias.clone(), n)))
                    .collect(),
            )
        } else {
            SqlExpr::eq(SqlExpr::value(1i64), SqlExpr::value(1i64))
        })
    }

    /// `EXISTS (subquery)`, or `NOT EXISTS` when negated.
    pub fn queryset_exists(&mut self, sub: &Frame, negated: bool) -> TranslateResult<Monad> {
        let select = self.shallow_copy(sub, false)?;
        Ok(Monad::bool_expr(SqlExpr::Exists {
            select: Box::new(select),
            negated,
        }))
    }

    pub fn queryset_count(&mut self, sub: &Frame) -> TranslateResult<Monad> {
        if sub.aggregated {
            return Err(too_complex());
        }
        let select = self.shallow_copy(sub, false)?;
        let (from, where_) = (select.from, select.where_);
        let columns = sub.expr_columns.clone();
        let count_all = || SqlExpr::Count {
            distinct: false,
            args: vec![],
        };
        let count_distinct = |args: Vec<SqlExpr>| SqlExpr::Count {
            distinct: true,
            args,
        };
        let composite = matches!(sub.expr_type, CanonicalType::Tuple(_) | CanonicalType::Entity(_));
        let ast = if composite {
            if !sub.distinct {
                aggregates(vec![count_all()], from, where_)
            } else if columns.len() == 1 {
                aggregates(vec![count_distinct(columns)], from, where_)
            } else if self.dialect == Dialect::Oracle {
                let mut ast = aggregates(
                    vec![SqlExpr::Count {
                        distinct: false,
                        args: vec![count_all()],
                    }],
                    from,
                    where_,
                );
                ast.group_by = columns;
                ast
            } else if self.dialect.count_uses_row_value() {
                aggregates(vec![count_distinct(vec![SqlExpr::Row(columns)])], from, where_)
            } else if self.dialect.supports_multi_column_count_distinct() {
                aggregates(vec![count_distinct(columns)], from, where_)
            } else if self.dialect.counts_by_rowid() {
                let current = self.frame.subquery;
                let alias = self.arena_mut().make_alias(current, "t");
                let inner = SelectAst::new(SelectList::new(SelectKind::Distinct, columns), from)
                    .with_where(where_);
                aggregates(vec![count_all()], derived_table(alias, inner), vec![])
            } else {
                return Err(TranslateError::not_implemented(format!(
                    "{} cannot count distinct rows of several columns: {}",
                    self.dialect.name(),
                    EXPR_PLACEHOLDER
                )));
            }
        } else if columns.len() == 1 {
            aggregates(vec![count_distinct(columns)], from, where_)
        } else {
            return Err(TranslateError::not_implemented(format!(
                "Counting a subquery of several columns is not supported: {}",
                EXPR_PLACEHOLDER
            )));
        };
        Ok(Monad::expr(CanonicalType::INT, vec![SqlExpr::Select(Box::new(ast))]).with_nogroup(true))
    }

    pub fn queryset_aggregate(&mut self, sub: &Frame, func: AggFunc, forced_distinct: bool) -> TranslateResult<Monad> {
        if sub.aggregated {
            return Err(too_complex());
        }
        let name = func.name().to_lowercase();
        let ty = &sub.expr_type;
        match func {
            AggFunc::Sum | AggFunc::Avg if !ty.is_numeric() => {
                return Err(TranslateError::type_error(format!(
                    "Function {}() expects query or items of numeric type, got {} in {}",
                    name,
                    type_repr(ty),
                    EXPR_PLACEHOLDER
                )))
            }
            AggFunc::Min | AggFunc::Max if !ty.is_comparable_kind() => {
                return Err(TranslateError::type_error(format!(
                    "Function {}() cannot be applied to type {} in {}",
                    name,
                    type_repr(ty),
                    EXPR_PLACEHOLDER
                )))
            }
            _ => {}
        }
        let [column] = <[SqlExpr; 1]>::try_from(sub.expr_columns.clone()).map_err(|_| {
            TranslateError::not_implemented(format!(
                "Function {}() over several columns is not supported: {}",
                name, EXPR_PLACEHOLDER
            ))
        })?;
        let select = self.shallow_copy(sub, false)?;
        let aggr = SqlExpr::Aggregate {
            func,
            distinct: forced_distinct && matches!(func, AggFunc::Sum | AggFunc::Avg),
            args: vec![column],
        };
        let ast = aggregates(vec![aggr], select.from, select.where_);
        Ok(Monad::expr(
            aggregate_result_type(ty, func),
            vec![SqlExpr::Select(Box::new(ast))],
        )
        .with_nogroup(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_table_has_alias() {
        let inner = SelectAst::new(SelectList::all(vec![]), FromClause::new(FromKind::Inner));
        let from = derived_table("t-1".into(), inner);
        assert_eq!(from.items.len(), 1);
        assert_eq!(from.items[0].alias.as_deref(), Some("t-1"));
        assert!(from.items[0].on.is_none());
    }
}
