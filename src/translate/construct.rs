//! Building SELECT and DELETE statements from a translated frame.

use std::mem;

use crate::error::{TranslateError, TranslateResult};
use crate::sql::{
    AggFunc, DeleteAst, FromClause, FromItem, FromKind, ForUpdate, Limit, SelectAst,
    SelectKind, SelectList, Source, SqlDialect, SqlExpr,
};
use crate::syntax::render::python_repr;
use crate::types::CanonicalType;

use super::layout::{AttrSlot, OutputColumn, OutputKind, RowLayout};
use super::monad::{Monad, MonadKind};
use super::tableref::entity_of;
use super::translator::{Frame, Translator};

/// Variations of the statement built for one frame.
#[derive(Debug, Clone, Default)]
pub(crate) struct SelectOptions {
    pub limit: Option<Limit>,
    /// Overrides the frame's own DISTINCT decision.
    pub distinct: Option<bool>,
    /// Wrap the result in an aggregate.
    pub aggregate: Option<AggFunc>,
    pub for_update: Option<ForUpdate>,
    /// Exclude rows where a result expression is NULL.
    pub is_not_null_checks: bool,
}

impl Translator<'_> {
    /// Run `f` with `frame` as the current frame.
    pub fn with_frame<T>(
        &mut self,
        frame: Frame,
        f: impl FnOnce(&mut Self) -> TranslateResult<T>,
    ) -> TranslateResult<T> {
        let outer = mem::replace(&mut self.frame, frame);
        let result = f(self);
        self.frame = outer;
        result
    }

    /// The SELECT of the current frame and the layout of its rows.
    pub fn construct_select(&mut self, opts: &SelectOptions) -> TranslateResult<(SelectAst, RowLayout)> {
        let mut distinct = opts.distinct.unwrap_or(self.frame.distinct);
        let mut groupby_monads = self.frame.groupby_monads.clone();
        if distinct && self.frame.aggregated && groupby_monads.is_empty() {
            distinct = false;
            groupby_monads = self.frame.expr_monads.clone();
        }
        let kind = if distinct {
            SelectKind::Distinct
        } else {
            SelectKind::All
        };
        let expr_columns = self.frame.expr_columns.clone();
        let mut select = SelectList::new(kind, expr_columns.clone());
        let mut layout = self.projection_layout()?;
        let mut wrapper = None;

        if let Some(func) = opts.aggregate {
            self.check_result_aggregate(func)?;
            let several = expr_columns.len() > 1;
            if !groupby_monads.is_empty() || (func == AggFunc::Count && distinct && several) {
                let mut outer_alias = "t".to_string();
                let outer = if func == AggFunc::Count {
                    SqlExpr::Count {
                        distinct: false,
                        args: vec![],
                    }
                } else {
                    let expr = expr_columns.first().cloned().ok_or_else(|| {
                        TranslateError::translation("Query has no result expression")
                    })?;
                    match expr {
                        SqlExpr::Column {
                            alias: Some(alias),
                            name,
                        } => {
                            outer_alias = alias.clone();
                            SqlExpr::Aggregate {
                                func,
                                distinct: false,
                                args: vec![SqlExpr::column(alias, name)],
                            }
                        }
                        other => {
                            select = SelectList::new(
                                kind,
                                vec![SqlExpr::As {
                                    expr: Box::new(other),
                                    alias: "expr".to_string(),
                                }],
                            );
                            SqlExpr::Aggregate {
                                func,
                                distinct: false,
                                args: vec![SqlExpr::column("t", "expr")],
                            }
                        }
                    }
                };
                wrapper = Some((outer_alias, outer));
            } else {
                let first = expr_columns.first().cloned().ok_or_else(|| {
                    TranslateError::translation("Query has no result expression")
                })?;
                let aggr = match func {
                    AggFunc::Count if !distinct && (several || self.frame.is_entity_result()) => {
                        SqlExpr::Count {
                            distinct: false,
                            args: vec![],
                        }
                    }
                    AggFunc::Count => SqlExpr::Count {
                        distinct: true,
                        args: vec![first],
                    },
                    _ => SqlExpr::Aggregate {
                        func,
                        distinct: false,
                        args: vec![first],
                    },
                };
                select = SelectList::new(SelectKind::Aggregates, vec![aggr]);
            }
            layout = RowLayout::Scalar;
        } else if self.frame.is_entity_result()
            && !self.frame.nested
            && !self.frame.aggregated
            && self.frame.optimize.is_none()
        {
            let (exprs, entity_layout) = self.entity_select_clause()?;
            select = SelectList::new(kind, exprs);
            layout = entity_layout;
        }

        let mut conditions = self.arena.subquery(self.frame.subquery).conditions.clone();
        let mut having = self.frame.having.clone();
        if opts.is_not_null_checks {
            for monad in self.frame.expr_monads.clone() {
                if self.never_null(&monad)? {
                    continue;
                }
                let checks = self
                    .getsql(&monad)?
                    .into_iter()
                    .map(SqlExpr::is_not_null);
                if monad.is_aggregated() {
                    having.extend(checks);
                } else {
                    conditions.extend(checks);
                }
            }
        }
        let mut group_by = Vec::new();
        for monad in &groupby_monads {
            group_by.extend(self.getsql(monad)?);
        }
        if !having.is_empty() && group_by.is_empty() {
            return Err(TranslateError::translation(
                "In order to use aggregated functions such as SUM(), COUNT(), etc., \
                 query must have grouping columns (i.e. resulting non-aggregated values)",
            ));
        }

        let from = self.arena.subquery(self.frame.subquery).from.clone();
        let mut ast = SelectAst::new(select, from).with_where(conditions);
        ast.group_by = group_by;
        ast.having = having;
        if opts.aggregate.is_none() {
            ast.order_by = self.frame.order.clone();
            ast.limit = opts.limit;
        }
        ast.for_update = opts.for_update;
        if let Some(for_update) = opts.for_update {
            if for_update.nowait && !self.dialect.supports_for_update_nowait() {
                return Err(TranslateError::translation(format!(
                    "nowait option is not supported by {}",
                    self.dialect.name()
                )));
            }
        }

        if let Some((alias, outer)) = wrapper {
            let mut from = FromClause::new(FromKind::Inner);
            from.items.push(FromItem {
                alias: Some(alias),
                source: Source::Select(Box::new(ast)),
                on: None,
            });
            ast = SelectAst::new(SelectList::new(SelectKind::Aggregates, vec![outer]), from);
        }
        Ok((ast, layout))
    }

    fn never_null(&self, monad: &Monad) -> TranslateResult<bool> {
        match &monad.kind {
            MonadKind::ObjectIter { .. } => Ok(true),
            MonadKind::Attr { .. } => Ok(!self.is_nullable(monad)?),
            _ => Ok(false),
        }
    }

    fn check_result_aggregate(&self, func: AggFunc) -> TranslateResult<()> {
        let name = python_repr(&func.name().to_lowercase());
        match &self.frame.expr_type {
            CanonicalType::Entity(_) if func != AggFunc::Count => Err(TranslateError::type_error(format!(
                "Attribute should be specified for {} aggregate function",
                name
            ))),
            CanonicalType::Tuple(_) if func != AggFunc::Count => Err(TranslateError::type_error(format!(
                "Single attribute should be specified for {} aggregate function",
                name
            ))),
            ty if matches!(func, AggFunc::Sum | AggFunc::Avg) && !ty.is_numeric() => Err(
                TranslateError::type_error(format!("{} is valid for numeric attributes only", name)),
            ),
            _ => Ok(()),
        }
    }

    /// Layout when rows carry exactly the frame's result columns.
    fn projection_layout(&self) -> TranslateResult<RowLayout> {
        if let CanonicalType::Entity(entity) = &self.frame.expr_type {
            let width = entity_of(self.schema, &entity.name)?.pk_columns().len();
            let name = self
                .frame
                .result
                .as_ref()
                .map(|m| m.src.clone())
                .unwrap_or_default();
            return Ok(RowLayout::Columns(vec![OutputColumn {
                name,
                kind: OutputKind::Entity(entity.name.clone()),
                offsets: 0..width,
            }]));
        }
        Ok(RowLayout::Columns(self.frame.outputs.clone()))
    }

    /// Every eagerly loaded column of the result entity and its subclasses.
    fn entity_select_clause(&self) -> TranslateResult<(Vec<SqlExpr>, RowLayout)> {
        let schema = self.schema;
        let entity_ref = self
            .frame
            .expr_type
            .entity()
            .ok_or_else(|| TranslateError::translation("Entity result expected"))?;
        let entity = entity_of(schema, &entity_ref.name)?;
        let alias = self
            .frame
            .alias
            .clone()
            .ok_or_else(|| TranslateError::translation("Result entity has no alias"))?;
        let mut attrs = Vec::new();
        let mut seen = Vec::new();
        let subclass_attrs = entity
            .subclasses
            .iter()
            .filter_map(|name| schema.entity(name))
            .flat_map(|sub| sub.attrs.values());
        for attr in entity.attrs.values().chain(subclass_attrs) {
            if attr.is_collection() || attr.lazy || attr.columns.is_empty() {
                continue;
            }
            if seen.contains(&attr.name) {
                continue;
            }
            seen.push(attr.name.clone());
            attrs.push(attr);
        }
        let mut exprs = Vec::new();
        let mut slots = Vec::new();
        let mut discriminator = None;
        for attr in attrs {
            let start = exprs.len();
            for column in &attr.columns {
                if entity.discriminator.as_ref() == Some(column) {
                    discriminator = Some(exprs.len());
                }
                exprs.push(SqlExpr::column(alias.clone(), column.clone()));
            }
            slots.push(AttrSlot {
                name: attr.name.clone(),
                offsets: start..exprs.len(),
            });
        }
        if let (Some(column), None) = (&entity.discriminator, discriminator) {
            discriminator = Some(exprs.len());
            exprs.push(SqlExpr::column(alias, column.clone()));
        }
        Ok((
            exprs,
            RowLayout::Entity {
                entity: entity.name.clone(),
                attrs: slots,
                discriminator,
            },
        ))
    }

    /// The frame's SELECT with its outer join condition moved into WHERE,
    /// ready to be embedded as a subquery.
    pub fn shallow_copy(&mut self, frame: &Frame, is_not_null_checks: bool) -> TranslateResult<SelectAst> {
        let opts = SelectOptions {
            distinct: Some(false),
            is_not_null_checks,
            ..SelectOptions::default()
        };
        let (mut ast, _) = self.with_frame(frame.clone(), |t| t.construct_select(&opts))?;
        let outer = ast.from.items.first_mut().and_then(|item| item.on.take());
        let outer = match outer {
            Some(SqlExpr::And(items)) => items,
            Some(cond) => vec![cond],
            None => Vec::new(),
        };
        ast.where_.splice(0..0, outer);
        Ok(ast)
    }

    /// DELETE of the entities the current frame selects.
    pub fn construct_delete(&mut self) -> TranslateResult<DeleteAst> {
        let src = self
            .frame
            .result
            .as_ref()
            .map(|m| m.src.clone())
            .unwrap_or_default();
        let Some(entity_ref) = self.frame.expr_type.entity().cloned() else {
            return Err(TranslateError::translation(format!(
                "Delete query should be applied to a single entity. Got: {}",
                src
            )));
        };
        if !self.frame.groupby_monads.is_empty() || !self.frame.having.is_empty() {
            return Err(TranslateError::translation(
                "Delete query cannot contains GROUP BY section or aggregate functions",
            ));
        }
        let entity = entity_of(self.schema, &entity_ref.name)?;
        let subquery = self.arena.subquery(self.frame.subquery);
        let from = subquery.from.clone();
        let conditions = subquery.conditions.clone();
        if from.items.len() == 1 && !subquery.used_from_subquery {
            return Ok(DeleteAst {
                alias: None,
                from,
                where_: conditions,
            });
        }
        if self.dialect.uses_delete_alias() {
            return Ok(DeleteAst {
                alias: self.frame.alias.clone(),
                from,
                where_: conditions,
            });
        }
        let pk_columns = entity.pk_columns();
        let (inner, outer) = if pk_columns.len() == 1 {
            (
                self.frame.expr_columns.clone(),
                SqlExpr::bare_column(pk_columns[0].clone()),
            )
        } else if self.dialect.supports_rowid() {
            let alias = self.frame.alias.clone().unwrap_or_default();
            (
                vec![SqlExpr::column(alias, "ROWID")],
                SqlExpr::bare_column("ROWID"),
            )
        } else if self.dialect.supports_row_value() {
            (
                self.frame.expr_columns.clone(),
                SqlExpr::Row(pk_columns.into_iter().map(SqlExpr::bare_column).collect()),
            )
        } else {
            return Err(TranslateError::not_implemented(format!(
                "{} cannot delete entities with composite keys through joins",
                self.dialect.name()
            )));
        };
        let select = SelectAst::new(SelectList::all(inner), from).with_where(conditions);
        let mut target = FromClause::new(FromKind::Inner);
        target.items.push(FromItem::table(None, entity.table.clone()));
        Ok(DeleteAst {
            alias: None,
            from: target,
            where_: vec![SqlExpr::InSelect {
                expr: Box::new(outer),
                select: Box::new(select),
                negated: false,
            }],
        })
    }
}

