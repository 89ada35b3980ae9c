//! Chained calls on a translated query: ordering and extra filters.
//!
//! Every operation here runs on a translator resumed from an existing plan,
//! so the plan it came from is never touched.

use crate::error::{TranslateError, TranslateResult};
use crate::sql::{ParamKey, SqlExpr, VarKey};
use crate::syntax::{CmpOp, Node, NodeKind};
use crate::types::{CanonicalType, Value};

use super::monad::{type_label, Monad, MonadKind};
use super::tableref::{entity_of, AttrRef};
use super::translator::{Scope, Translator};

/// One attribute in `order_by(Student.name, desc(Student.gpa))`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub struct OrderAttr {
    pub entity: String,
    pub attr: String,
    pub desc: bool,
}

impl OrderAttr {
    pub fn asc(entity: impl Into<String>, attr: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            attr: attr.into(),
            desc: false,
        }
    }

    pub fn desc(entity: impl Into<String>, attr: impl Into<String>) -> Self {
        Self {
            desc: true,
            ..Self::asc(entity, attr)
        }
    }
}

/// Whether a chained expression filters the query or orders it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainKind {
    Filter,
    OrderBy,
}

impl Translator<'_> {
    /// `order_by(1, -2)`: order by result positions, negative for DESC.
    pub fn order_by_numbers(&mut self, numbers: &[i64]) -> TranslateResult<()> {
        if numbers.contains(&0) {
            return Err(TranslateError::Value(
                "Numeric arguments of order_by() method must be non-zero".into(),
            ));
        }
        let width = self.frame.expr_monads.len();
        for &i in numbers {
            let index = i.unsigned_abs() as usize - 1;
            let Some(positions) = self.frame.orderby_columns.get(index).cloned() else {
                let detail = if width > 1 {
                    format!(
                        "query result is list of tuples with only {} elements in each",
                        width
                    )
                } else {
                    "query result is single list of elements and has only one 'column'".to_string()
                };
                return Err(TranslateError::Index(format!(
                    "Invalid index of order_by() method: {} ({})",
                    i, detail
                )));
            };
            for pos in positions {
                let column = SqlExpr::value(pos as i64);
                self.frame.order.push(if i < 0 {
                    SqlExpr::Desc(Box::new(column))
                } else {
                    column
                });
            }
        }
        Ok(())
    }

    /// `order_by(Student.name)`: entity results only.
    pub fn order_by_attributes(&mut self, attrs: &[OrderAttr]) -> TranslateResult<()> {
        let schema = self.schema;
        let Some(entity_ref) = self.frame.expr_type.entity().cloned() else {
            return Err(TranslateError::not_implemented(
                "Ordering by attributes is limited to queries which return simple list of objects. \
                 Try use other forms of ordering (by tuple element numbers or by full-blown lambda expr).",
            ));
        };
        let entity = entity_of(schema, &entity_ref.name)?;
        let alias = self
            .frame
            .alias
            .clone()
            .ok_or_else(|| TranslateError::translation("Result entity has no alias"))?;
        for item in attrs {
            let belongs = entity.attr(&item.attr).is_some_and(|a| {
                a.owner == item.entity || entity.name == item.entity
            }) || (entity.subclasses.contains(&item.entity)
                && schema
                    .entity(&item.entity)
                    .is_some_and(|sub| sub.attr(&item.attr).is_some()));
            if !belongs {
                return Err(TranslateError::type_error(format!(
                    "Attribute {}.{} does not belong to entity {}",
                    item.entity, item.attr, entity.name
                )));
            }
            let attr = AttrRef::new(item.entity.clone(), item.attr.clone()).resolve(schema)?;
            if attr.is_collection() {
                return Err(TranslateError::type_error(format!(
                    "Collection attribute {}.{} cannot be used for ordering",
                    item.entity, item.attr
                )));
            }
            for column in &attr.columns {
                let column = SqlExpr::column(alias.clone(), column.clone());
                self.frame.order.push(if item.desc {
                    SqlExpr::Desc(Box::new(column))
                } else {
                    column
                });
            }
        }
        Ok(())
    }

    pub fn without_order(&mut self) {
        self.frame.order.clear();
    }

    /// `filter_by(name=value)` on an entity result. A `None` type stands for
    /// a `None` value.
    pub fn apply_kwfilters(
        &mut self,
        filter: usize,
        kwargs: &[(String, Option<CanonicalType>)],
    ) -> TranslateResult<()> {
        let Some(tableref) = self.frame.tableref.filter(|_| self.frame.is_entity_result()) else {
            return Err(TranslateError::type_error(
                "Keyword arguments are not allowed when query result is not entity objects",
            ));
        };
        let object = Monad::new(
            MonadKind::ObjectIter { tableref },
            self.frame.expr_type.clone(),
        );
        for (name, ty) in kwargs {
            let attr = self.getattr(object.clone(), name).map_err(|e| e.with_expr(name))?;
            if attr.is_set_like() {
                return Err(TranslateError::type_error(format!(
                    "{} attribute {} cannot be used as a keyword argument for filtering",
                    type_label(&attr.ty),
                    name
                )));
            }
            let value = match ty {
                None => Monad::constant(Value::None),
                Some(ty) => Monad::new(
                    MonadKind::Param {
                        key: ParamKey::new(VarKey::new(filter, name.clone())),
                        literal: None,
                    },
                    ty.clone(),
                ),
            }
            .with_aggregated(false)
            .with_nogroup(false);
            let cond = self
                .cmp(CmpOp::Eq, attr, value)
                .map_err(|e| e.with_expr(name))?;
            self.route_condition(cond)?;
        }
        Ok(())
    }
}

impl<'a> Translator<'a> {
    /// Translate a chained `filter` or `order_by` expression.
    ///
    /// The source is either a lambda whose parameters name the result
    /// expressions, or a bare expression over the query's own names.
    pub fn apply_lambda(&mut self, kind: ChainKind, scope: Scope<'a>) -> TranslateResult<()> {
        let root = &scope.tree.root;
        let (names, body) = match &root.kind {
            NodeKind::Lambda { params, body } => {
                let names: Vec<String> = params.iter().map(|p| p.name().to_string()).collect();
                if names.len() != self.frame.expr_monads.len() {
                    return Err(TranslateError::type_error(format!(
                        "Incorrect number of lambda arguments. Expected: {}, got: {}",
                        self.frame.expr_monads.len(),
                        names.len()
                    )));
                }
                (Some(names), body.as_ref())
            }
            _ => (None, root),
        };
        self.set_scope(scope);
        self.frame.original_names = names.is_none();
        self.frame.lambda_names = names;
        let result = self.translate_chained(kind, body);
        self.frame.lambda_names = None;
        self.frame.original_names = false;
        result
    }

    fn translate_chained(&mut self, kind: ChainKind, body: &Node) -> TranslateResult<()> {
        let src = self.node_src(body.id);
        let monad = self.translate(body)?;
        match kind {
            ChainKind::OrderBy => {
                let items = match monad.kind {
                    MonadKind::List(items) => items,
                    _ => vec![monad],
                };
                for item in items {
                    if item.is_set_like() || item.ty.is_set() {
                        return Err(TranslateError::type_error(format!(
                            "Set of {} ({}) cannot be used for ordering",
                            type_label(item.ty.item_type()),
                            item.src
                        )));
                    }
                    let sql = self.getsql(&item).map_err(|e| e.with_expr(&src))?;
                    self.frame.order.extend(sql);
                }
                Ok(())
            }
            ChainKind::Filter => {
                let monad = if monad.ty.is_bool() {
                    monad
                } else {
                    self.nonzero(monad).map_err(|e| e.with_expr(&src))?
                };
                self.route_condition(monad).map_err(|e| e.with_expr(&src))
            }
        }
    }
}
