//! Collections reached through attributes and arithmetic over them.
//!
//! Every aggregate or membership test over a collection builds a
//! [`Subselect`]: a subquery nested under the current one whose first FROM
//! item joins back to the outer query. That join condition is lifted out as
//! the subselect's outer conditions so the result can be used as a scalar
//! subquery, moved into the FROM clause of the outer query, or joined as a
//! grouped derived table.

use crate::error::{TranslateError, TranslateResult, EXPR_PLACEHOLDER};
use crate::sql::{
    sql_and, AggFunc, BinaryOp, Dialect, FromClause, FromItem, FromKind, ScalarFunc, SelectAst,
    SelectKind, SelectList, Source, SqlDialect, SqlExpr, SqlLiteral,
};
use crate::syntax::render::python_repr;
use crate::syntax::{BinOpKind, CmpOp};
use crate::types::CanonicalType;

use super::super::tableref::{entity_of, AttrRef, SubqueryId, TableRefId};
use super::super::translator::Translator;
use super::ops::{aggregate_result_type, conjunction};
use super::{binop_error, type_repr, Monad, MonadKind};

const SET_METHODS: [&str; 7] = ["count", "sum", "avg", "min", "max", "exists", "distinct"];

/// A collection's rows as a subquery of the current one.
#[derive(Debug, Clone)]
pub(crate) struct Subselect {
    pub subquery: SubqueryId,
    pub tableref: TableRefId,
    pub expr_list: Vec<SqlExpr>,
    /// Conditions tying the subquery to the enclosing one.
    pub outer_conditions: Vec<SqlExpr>,
}

fn split_and(cond: Option<SqlExpr>) -> Vec<SqlExpr> {
    match cond {
        Some(SqlExpr::And(items)) => items,
        Some(other) => vec![other],
        None => Vec::new(),
    }
}

/// Whether a condition equates two plain columns.
fn is_column_link(cond: &SqlExpr) -> bool {
    matches!(
        cond,
        SqlExpr::Binary { op: BinaryOp::Eq, left, right }
            if matches!(**left, SqlExpr::Column { .. }) && matches!(**right, SqlExpr::Column { .. })
    )
}

fn arith_op(op: BinOpKind) -> TranslateResult<BinaryOp> {
    Ok(match op {
        BinOpKind::Add => BinaryOp::Add,
        BinOpKind::Sub => BinaryOp::Sub,
        BinOpKind::Mult => BinaryOp::Mul,
        BinOpKind::Div => BinaryOp::Div,
        BinOpKind::FloorDiv => BinaryOp::FloorDiv,
        other => {
            return Err(TranslateError::type_error(format!(
                "Operator {} is not supported for collections",
                python_repr(other.symbol())
            )))
        }
    })
}

impl Translator<'_> {
    /// Reference of the collection's items inside `subquery`.
    pub fn make_tableref(&mut self, monad: &Monad, subquery: SubqueryId) -> TranslateResult<TableRefId> {
        let MonadKind::AttrSet { parent, attr } = &monad.kind else {
            return Err(TranslateError::translation(format!(
                "Collection expected: {}",
                monad.src
            )));
        };
        let parent_tableref = match &parent.kind {
            MonadKind::AttrSet { .. } => self.make_tableref(parent, subquery)?,
            _ => parent.tableref().ok_or_else(|| {
                TranslateError::not_implemented(format!(
                    "Collection of a computed value is not supported: {}",
                    EXPR_PLACEHOLDER
                ))
            })?,
        };
        let resolved = attr.resolve(self.schema)?;
        let tableref = match (&resolved.reverse, resolved.target()) {
            (Some(_), Some(target)) => {
                let name_path = format!(
                    "{}-{}",
                    self.arena.tableref(parent_tableref).name_path,
                    resolved.name
                );
                let target = target.to_string();
                let existing = self.arena.subquery(subquery).tablerefs.get(&name_path).copied();
                match existing {
                    Some(id) => id,
                    None => self.arena_mut().add_joined(
                        subquery,
                        &name_path,
                        parent_tableref,
                        attr.clone(),
                        &target,
                    ),
                }
            }
            _ => parent_tableref,
        };
        self.arena_mut().tableref_mut(tableref).can_affect_distinct = true;
        Ok(tableref)
    }

    /// Columns of the collection's items under `tableref`.
    pub fn make_expr_list(&mut self, monad: &Monad, tableref: TableRefId) -> TranslateResult<Vec<SqlExpr>> {
        let schema = self.schema;
        let attr = monad
            .attr_ref()
            .ok_or_else(|| TranslateError::translation("Attribute expected"))?
            .resolve(schema)?;
        let pk_only = attr.reverse.is_some() || attr.pk_offset.is_some();
        let (alias, columns) = self.arena_mut().make_join(schema, tableref, pk_only)?;
        let columns = if attr.reverse.is_some() {
            columns
        } else if let Some(offset) = attr.pk_offset {
            columns
                .into_iter()
                .skip(offset)
                .take(attr.columns.len())
                .collect()
        } else {
            attr.columns.clone()
        };
        Ok(columns
            .into_iter()
            .map(|c| SqlExpr::column(alias.clone(), c))
            .collect())
    }

    pub fn subselect(&mut self, monad: &Monad) -> TranslateResult<Subselect> {
        let current = self.frame.subquery;
        let subquery = self.arena_mut().new_subquery(Some(current), false);
        let tableref = self.make_tableref(monad, subquery)?;
        let expr_list = self.make_expr_list(monad, tableref)?;
        let attr = monad
            .attr_ref()
            .ok_or_else(|| TranslateError::translation("Attribute expected"))?
            .resolve(self.schema)?;
        let arena = self.arena_mut();
        let sq = arena.subquery_mut(subquery);
        if attr.reverse.is_none() && attr.optional {
            sq.conditions
                .extend(expr_list.iter().cloned().map(SqlExpr::is_not_null));
        }
        let outer_conditions = split_and(sq.from.items.first_mut().and_then(|item| item.on.take()));
        Ok(Subselect {
            subquery,
            tableref,
            expr_list,
            outer_conditions,
        })
    }

    fn subselect_from(&self, sub: &Subselect) -> FromClause {
        self.arena.subquery(sub.subquery).from.clone()
    }

    /// Outer conditions first, then the subquery's own.
    fn subselect_where(&self, sub: &Subselect) -> Vec<SqlExpr> {
        sub.outer_conditions
            .iter()
            .chain(&self.arena.subquery(sub.subquery).conditions)
            .cloned()
            .collect()
    }

    fn optimizes(&self, tableref: TableRefId) -> bool {
        self.frame.optimize.as_deref() == Some(self.arena.tableref(tableref).name_path.as_str())
    }

    pub fn attrset_contains(&mut self, set: Monad, item: Monad, not_in: bool) -> TranslateResult<Monad> {
        self.check_comparable(&item, &set, CmpOp::In)?;
        let item_sql = self.getsql(&item)?;
        if !self.frame.hint_join {
            let sub = self.subselect(&set)?;
            let from = self.subselect_from(&sub);
            let mut conditions = self.subselect_where(&sub);
            let sql = if sub.expr_list.len() == 1 || self.dialect.supports_row_value() {
                let select = SelectAst::new(SelectList::all(sub.expr_list), from).with_where(conditions);
                let expr = match <[SqlExpr; 1]>::try_from(item_sql) {
                    Ok([single]) => single,
                    Err(several) => SqlExpr::Row(several),
                };
                SqlExpr::InSelect {
                    expr: Box::new(expr),
                    select: Box::new(select),
                    negated: not_in,
                }
            } else {
                conditions.extend(
                    item_sql
                        .into_iter()
                        .zip(sub.expr_list)
                        .map(|(a, b)| SqlExpr::eq(a, b)),
                );
                SqlExpr::Exists {
                    select: Box::new(SelectAst::new(SelectList::all(vec![]), from).with_where(conditions)),
                    negated: not_in,
                }
            };
            return Ok(Monad::bool_expr(sql).with_nogroup(true));
        }

        let current = self.frame.subquery;
        if !not_in {
            self.frame.distinct = true;
            let tableref = self.make_tableref(&set, current)?;
            let expr_list = self.make_expr_list(&set, tableref)?;
            let conditions = expr_list
                .into_iter()
                .zip(item_sql)
                .map(|(a, b)| SqlExpr::eq(a, b))
                .collect();
            return Ok(Monad::bool_expr(conjunction(conditions)));
        }

        // Anti-join: left join the collection on the item and keep the rows
        // where nothing matched.
        let schema = self.schema;
        let subquery = self.arena_mut().new_subquery(Some(current), false);
        let tableref = self.make_tableref(&set, subquery)?;
        let attr = set
            .attr_ref()
            .ok_or_else(|| TranslateError::translation("Attribute expected"))?
            .resolve(schema)?;
        let has_reverse = attr.reverse.is_some();
        let (alias, columns) = self.arena_mut().make_join(schema, tableref, has_reverse)?;
        let expr_list = self.make_expr_list(&set, tableref)?;
        let columns = if has_reverse { columns } else { attr.columns.clone() };
        let arena = self.arena_mut();
        let inner = arena.subquery(subquery).clone();
        let mut conditions: Vec<SqlExpr> = columns
            .into_iter()
            .zip(item_sql)
            .map(|(c, expr)| SqlExpr::eq(SqlExpr::column(alias.clone(), c), expr))
            .collect();
        conditions.extend(inner.conditions);
        let from = &mut arena.subquery_mut(current).from;
        from.kind = FromKind::Left;
        from.items.extend(inner.from.items);
        if let Some(last) = from.items.last_mut() {
            last.on = sql_and(last.on.take().into_iter().chain(conditions).collect());
        }
        self.frame.left_join = true;
        Ok(Monad::bool_expr(conjunction(
            expr_list.into_iter().map(SqlExpr::is_null).collect(),
        )))
    }

    /// `EXISTS` over the collection, or `NOT EXISTS` when negated.
    pub fn attrset_nonzero(&mut self, set: &Monad, negated: bool) -> TranslateResult<Monad> {
        let sub = self.subselect(set)?;
        let select = SelectAst::new(SelectList::all(vec![]), self.subselect_from(&sub))
            .with_where(self.subselect_where(&sub));
        Ok(Monad::bool_expr(SqlExpr::Exists {
            select: Box::new(select),
            negated,
        }))
    }

    pub fn attrset_getattr(&mut self, set: Monad, name: &str) -> TranslateResult<Monad> {
        if SET_METHODS.contains(&name) {
            return Ok(Monad::new(
                MonadKind::Method {
                    parent: Box::new(set),
                    name: name.to_string(),
                },
                CanonicalType::Method,
            ));
        }
        let not_found = |set: &Monad| {
            TranslateError::attribute(format!(
                "{} object has no attribute {}: {}",
                type_repr(&set.ty),
                python_repr(name),
                EXPR_PLACEHOLDER
            ))
        };
        let Some(entity) = set.ty.item_type().entity().cloned() else {
            return Err(not_found(&set));
        };
        let Some(attr) = entity_of(self.schema, &entity.name)?.attr(name) else {
            return Err(not_found(&set));
        };
        let ty = CanonicalType::set_of(self.schema.attr_type(attr).item_type().clone());
        let attr = AttrRef::new(attr.owner.clone(), attr.name.clone());
        Ok(Monad::new(
            MonadKind::AttrSet {
                parent: Box::new(set),
                attr,
            },
            ty,
        ))
    }

    pub fn attrset_count(&mut self, set: Monad) -> TranslateResult<Monad> {
        let schema = self.schema;
        let sub = self.subselect(&set)?;
        let distinct = self.requires_distinct(&set, true)?;
        let optimizes = self.optimizes(sub.tableref);
        let hint_join = self.frame.hint_join;
        let count_all = || SqlExpr::Count {
            distinct: false,
            args: vec![],
        };
        let mut extra_grouping = false;
        let mut direct = None;
        let make_aggr: Box<dyn Fn(&[SqlExpr]) -> SqlExpr> = if !distinct && !optimizes {
            Box::new(move |_: &[SqlExpr]| count_all())
        } else if sub.expr_list.len() == 1 {
            Box::new(|exprs: &[SqlExpr]| SqlExpr::Count {
                distinct: true,
                args: exprs.to_vec(),
            })
        } else if self.dialect == Dialect::Oracle {
            if optimizes {
                let (alias, _) = self.arena_mut().make_join(schema, sub.tableref, true)?;
                Box::new(move |_: &[SqlExpr]| SqlExpr::Count {
                    distinct,
                    args: vec![SqlExpr::column(alias.clone(), "ROWID")],
                })
            } else {
                extra_grouping = true;
                if hint_join {
                    Box::new(move |_: &[SqlExpr]| count_all())
                } else {
                    Box::new(move |_: &[SqlExpr]| SqlExpr::Count {
                        distinct: false,
                        args: vec![count_all()],
                    })
                }
            }
        } else if self.dialect.count_uses_row_value() {
            Box::new(|exprs: &[SqlExpr]| {
                let row = SqlExpr::Row(exprs.to_vec());
                SqlExpr::Count {
                    distinct: true,
                    args: vec![SqlExpr::Case {
                        cases: vec![(SqlExpr::is_null(row.clone()), SqlExpr::value(SqlLiteral::Null))],
                        default: Some(Box::new(row)),
                    }],
                }
            })
        } else if self.dialect.supports_row_value() {
            Box::new(|exprs: &[SqlExpr]| SqlExpr::Count {
                distinct: true,
                args: exprs.to_vec(),
            })
        } else if self.dialect.counts_by_rowid() {
            if !distinct {
                let (alias, _) = self.arena_mut().make_join(schema, sub.tableref, true)?;
                Box::new(move |_: &[SqlExpr]| SqlExpr::Count {
                    distinct: false,
                    args: vec![SqlExpr::column(alias.clone(), "ROWID")],
                })
            } else if hint_join {
                extra_grouping = true;
                Box::new(move |_: &[SqlExpr]| count_all())
            } else {
                let current = self.frame.subquery;
                let alias = self.arena_mut().make_alias(current, "t");
                let inner = SelectAst::new(
                    SelectList::new(SelectKind::Distinct, sub.expr_list.clone()),
                    self.subselect_from(&sub),
                )
                .with_where(self.subselect_where(&sub));
                let mut from = FromClause::new(FromKind::Inner);
                from.items.push(FromItem {
                    alias: Some(alias),
                    source: Source::Select(Box::new(inner)),
                    on: None,
                });
                direct = Some(SqlExpr::Select(Box::new(SelectAst::new(
                    SelectList::new(SelectKind::Aggregates, vec![count_all()]),
                    from,
                ))));
                Box::new(move |_: &[SqlExpr]| count_all())
            }
        } else {
            return Err(TranslateError::not_implemented(format!(
                "{} cannot count collections with composite keys: {}",
                self.dialect.name(),
                EXPR_PLACEHOLDER
            )));
        };
        let (sql, optimized) = match direct {
            Some(sql) => (sql, false),
            None if hint_join => self.joined_subselect(&sub, &*make_aggr, extra_grouping, true)?,
            None => self.aggregated_scalar_subselect(&sub, &*make_aggr, extra_grouping)?,
        };
        let path = self.arena.tableref(sub.tableref).name_path.clone();
        self.frame.aggregated_subquery_paths.insert(path);
        Ok(subselect_result(CanonicalType::INT, sql, optimized))
    }

    pub fn attrset_aggregate(&mut self, set: Monad, func: AggFunc) -> TranslateResult<Monad> {
        let item_type = set.ty.item_type().clone();
        let name = func.name().to_lowercase();
        match func {
            AggFunc::Sum | AggFunc::Avg if !item_type.is_numeric() => {
                return Err(TranslateError::type_error(format!(
                    "Function {}() expects query or items of numeric type, got {} in {}",
                    name,
                    type_repr(&item_type),
                    EXPR_PLACEHOLDER
                )))
            }
            AggFunc::Min | AggFunc::Max if !item_type.is_comparable_kind() => {
                return Err(TranslateError::type_error(format!(
                    "Function {}() expects query or items of comparable type, got {} in {}",
                    name,
                    type_repr(&item_type),
                    EXPR_PLACEHOLDER
                )))
            }
            _ => {}
        }
        let distinct = set.forced_distinct && matches!(func, AggFunc::Sum | AggFunc::Avg);
        let make_aggr = move |exprs: &[SqlExpr]| SqlExpr::Aggregate {
            func,
            distinct,
            args: exprs.to_vec(),
        };
        let sub = self.subselect(&set)?;
        let (sql, optimized) = if self.frame.hint_join {
            self.joined_subselect(&sub, &make_aggr, false, func == AggFunc::Sum)?
        } else {
            self.aggregated_scalar_subselect(&sub, &make_aggr, false)?
        };
        let path = self.arena.tableref(sub.tableref).name_path.clone();
        self.frame.aggregated_subquery_paths.insert(path);
        Ok(subselect_result(
            aggregate_result_type(&item_type, func),
            sql,
            optimized,
        ))
    }

    /// The aggregate as a scalar subquery, or, when this collection is the
    /// one being optimized, as a plain aggregate over the collection's
    /// tables moved into the outer FROM clause.
    fn aggregated_scalar_subselect(
        &mut self,
        sub: &Subselect,
        make_aggr: &dyn Fn(&[SqlExpr]) -> SqlExpr,
        extra_grouping: bool,
    ) -> TranslateResult<(SqlExpr, bool)> {
        let aggr = make_aggr(&sub.expr_list);
        if self.optimizes(sub.tableref) {
            if !self.frame.from_optimized {
                self.move_into_from(sub);
            }
            return Ok((aggr, true));
        }
        let mut select = SelectAst::new(
            SelectList::new(SelectKind::Aggregates, vec![aggr]),
            self.subselect_from(sub),
        )
        .with_where(self.subselect_where(sub));
        if extra_grouping {
            select.group_by = sub.expr_list.clone();
        }
        Ok((SqlExpr::Select(Box::new(select)), false))
    }

    fn move_into_from(&mut self, sub: &Subselect) {
        let conditions = self.subselect_where(sub);
        let current = self.frame.subquery;
        let arena = self.arena_mut();
        let mut items = arena.subquery(sub.subquery).from.items.clone();
        if let Some(first) = items.first_mut() {
            first.on = sql_and(conditions);
        }
        arena.subquery_mut(current).from.items.extend(items);
        self.frame.from_optimized = true;
    }

    /// The aggregate grouped by the linking columns, joined as a derived
    /// table.
    fn joined_subselect(
        &mut self,
        sub: &Subselect,
        make_aggr: &dyn Fn(&[SqlExpr]) -> SqlExpr,
        extra_grouping: bool,
        coalesce_to_zero: bool,
    ) -> TranslateResult<(SqlExpr, bool)> {
        let current = self.frame.subquery;
        let mut inner_conditions = self.arena.subquery(sub.subquery).conditions.clone();
        let mut links = Vec::new();
        for cond in &sub.outer_conditions {
            if is_column_link(cond) {
                links.push(cond.clone());
            } else {
                inner_conditions.push(cond.clone());
            }
        }
        let link_column = |cond: &SqlExpr| -> Option<(SqlExpr, String)> {
            let SqlExpr::Binary { right, .. } = cond else {
                return None;
            };
            let SqlExpr::Column { name, .. } = right.as_ref() else {
                return None;
            };
            Some((right.as_ref().clone(), name.clone()))
        };
        let mut groupby_columns = Vec::with_capacity(links.len());
        for cond in &links {
            groupby_columns.push(link_column(cond).ok_or_else(|| {
                TranslateError::translation("Collection link must compare columns")
            })?);
        }
        let mut from = self.subselect_from(sub);
        let mut expr_list = sub.expr_list.clone();

        if extra_grouping {
            let inner_alias = self.arena_mut().make_alias(current, "t");
            let mut names: Vec<String> = Vec::new();
            let mut columns = Vec::new();
            let mut renamed = Vec::new();
            for column in groupby_columns.iter().map(|(c, _)| c).chain(&sub.expr_list) {
                let SqlExpr::Column { name, .. } = column else {
                    return Err(TranslateError::translation("Column expected in grouping"));
                };
                let new_name = if names.contains(name) {
                    self.arena_mut().next_expr_name()
                } else {
                    name.clone()
                };
                names.push(new_name.clone());
                columns.push(SqlExpr::As {
                    expr: Box::new(column.clone()),
                    alias: new_name.clone(),
                });
                renamed.push(new_name);
            }
            let inner = SelectAst::new(SelectList::new(SelectKind::Distinct, columns), from)
                .with_where(inner_conditions.clone());
            let (link_names, expr_names) = renamed.split_at(groupby_columns.len());
            for ((column, name), new_name) in groupby_columns.iter_mut().zip(link_names) {
                *column = SqlExpr::column(inner_alias.clone(), new_name.clone());
                *name = new_name.clone();
            }
            expr_list = expr_names
                .iter()
                .map(|n| SqlExpr::column(inner_alias.clone(), n.clone()))
                .collect();
            from = FromClause::new(FromKind::Inner);
            from.items.push(FromItem {
                alias: Some(inner_alias),
                source: Source::Select(Box::new(inner)),
                on: None,
            });
            inner_conditions.clear();
        }

        let expr_name = self.arena_mut().next_expr_name();
        let mut select_list: Vec<SqlExpr> = groupby_columns
            .iter()
            .map(|(column, name)| SqlExpr::As {
                expr: Box::new(column.clone()),
                alias: name.clone(),
            })
            .collect();
        select_list.push(SqlExpr::As {
            expr: Box::new(make_aggr(&expr_list)),
            alias: expr_name.clone(),
        });
        let mut select = SelectAst::new(SelectList::all(select_list), from).with_where(inner_conditions);
        select.group_by = groupby_columns.iter().map(|(c, _)| c.clone()).collect();

        let alias = self.arena_mut().make_alias(current, "t");
        let on: Vec<SqlExpr> = links
            .into_iter()
            .zip(&groupby_columns)
            .filter_map(|(cond, (_, name))| match cond {
                SqlExpr::Binary { op, left, .. } => Some(SqlExpr::Binary {
                    op,
                    left,
                    right: Box::new(SqlExpr::column(alias.clone(), name.clone())),
                }),
                _ => None,
            })
            .collect();
        self.arena_mut().subquery_mut(current).from.items.push(FromItem {
            alias: Some(alias.clone()),
            source: Source::Select(Box::new(select)),
            on: sql_and(on),
        });
        let mut expr = SqlExpr::column(alias, expr_name);
        if coalesce_to_zero {
            expr = SqlExpr::func(ScalarFunc::Coalesce, vec![expr, SqlExpr::value(0i64)]);
        }
        Ok((expr, false))
    }

    /// `left op right` where at least one side is a numeric collection.
    pub fn numeric_set_expr(&mut self, left: Monad, op: BinOpKind, right: Monad) -> TranslateResult<Monad> {
        arith_op(op)?;
        let error = binop_error(&left, &right, op.symbol());
        let (result, left, right) = self.coerce_monads(left, right)?;
        match result {
            Some(CanonicalType::SetOf(item)) if item.is_numeric() => Ok(Monad::new(
                MonadKind::NumericSetExpr {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                CanonicalType::SetOf(item),
            )),
            _ => Err(error),
        }
    }

    /// SQL of set arithmetic inside `subquery`, with the reference of the
    /// deepest collection involved.
    pub fn numeric_set_sql(&mut self, monad: &Monad, subquery: SubqueryId) -> TranslateResult<(Vec<SqlExpr>, TableRefId)> {
        let MonadKind::NumericSetExpr { op, left, right } = &monad.kind else {
            return Err(TranslateError::translation("Collection arithmetic expected"));
        };
        let (left_sql, left_ref) = self.set_operand_sql(left, subquery)?;
        let (right_sql, right_ref) = self.set_operand_sql(right, subquery)?;
        let path = |r: Option<TableRefId>| {
            r.map(|id| format!("{}-", self.arena.tableref(id).name_path))
                .unwrap_or_default()
        };
        let (left_path, right_path) = (path(left_ref), path(right_ref));
        let tableref = if left_path.starts_with(&right_path) {
            left_ref
        } else if right_path.starts_with(&left_path) {
            right_ref
        } else {
            None
        };
        let tableref = tableref.ok_or_else(|| {
            TranslateError::translation(format!("Cartesian product detected in {}", monad.src))
        })?;
        Ok((
            vec![SqlExpr::binary(arith_op(*op)?, left_sql, right_sql)],
            tableref,
        ))
    }

    fn set_operand_sql(
        &mut self,
        operand: &Monad,
        subquery: SubqueryId,
    ) -> TranslateResult<(SqlExpr, Option<TableRefId>)> {
        match &operand.kind {
            MonadKind::AttrSet { .. } => {
                let tableref = self.make_tableref(operand, subquery)?;
                let mut exprs = self.make_expr_list(operand, tableref)?;
                if exprs.len() != 1 {
                    return Err(TranslateError::type_error(format!(
                        "Collection {} cannot be used in arithmetic",
                        operand.src
                    )));
                }
                Ok((exprs.remove(0), Some(tableref)))
            }
            MonadKind::NumericSetExpr { .. } => {
                let (mut sql, tableref) = self.numeric_set_sql(operand, subquery)?;
                Ok((sql.remove(0), Some(tableref)))
            }
            _ => Ok((self.single_sql(operand)?, None)),
        }
    }

    pub fn numeric_set_aggregate(&mut self, monad: Monad, func: AggFunc) -> TranslateResult<Monad> {
        if func == AggFunc::Count {
            return Err(TranslateError::not_implemented(format!(
                "Arithmetic over collections cannot be counted: {}",
                EXPR_PLACEHOLDER
            )));
        }
        let current = self.frame.subquery;
        let subquery = self.arena_mut().new_subquery(Some(current), false);
        let (mut sql, tableref) = self.numeric_set_sql(&monad, subquery)?;
        let path = self.arena.tableref(tableref).name_path.clone();
        self.frame.aggregated_subquery_paths.insert(path);
        let outer_conditions = split_and(
            self.arena_mut()
                .subquery_mut(subquery)
                .from
                .items
                .first_mut()
                .and_then(|item| item.on.take()),
        );
        let sub = Subselect {
            subquery,
            tableref,
            expr_list: vec![sql.remove(0)],
            outer_conditions,
        };
        let distinct = monad.forced_distinct && matches!(func, AggFunc::Sum | AggFunc::Avg);
        let make_aggr = move |exprs: &[SqlExpr]| SqlExpr::Aggregate {
            func,
            distinct,
            args: exprs.to_vec(),
        };
        let (sql, optimized) = self.aggregated_scalar_subselect(&sub, &make_aggr, false)?;
        Ok(subselect_result(
            aggregate_result_type(&monad.ty, func),
            sql,
            optimized,
        ))
    }
}

/// An aggregate moved into the outer query counts as aggregated; a scalar
/// subquery must stay out of GROUP BY.
fn subselect_result(ty: CanonicalType, sql: SqlExpr, optimized: bool) -> Monad {
    let monad = Monad::expr(ty, vec![sql]);
    if optimized {
        monad.with_aggregated(true)
    } else {
        monad.with_nogroup(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_and_flattens_join_conditions() {
        let a = SqlExpr::eq(SqlExpr::column("g", "number"), SqlExpr::column("s", "group"));
        let b = SqlExpr::is_not_null(SqlExpr::column("s", "gpa"));
        assert_eq!(split_and(sql_and(vec![a.clone(), b.clone()])), vec![a.clone(), b.clone()]);
        assert_eq!(split_and(Some(a.clone())), vec![a.clone()]);
        assert!(split_and(None).is_empty());
        assert!(is_column_link(&a));
        assert!(!is_column_link(&b));
    }

    #[test]
    fn test_only_additive_and_multiplicative_ops() {
        assert!(arith_op(BinOpKind::Mult).is_ok());
        assert!(arith_op(BinOpKind::Pow).is_err());
    }
}
