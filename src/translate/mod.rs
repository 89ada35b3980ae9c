//! Translation of parsed query sources into SQL.
//!
//! A [`Plan`] is the translated form of one query shape: the table
//! references, conditions and result expressions of its generator, built
//! for a fixed set of canonical argument types. Plans never hold argument
//! values, so one plan serves every call of the same shape.
//!
//! Chained calls (`filter`, `order_by`, `filter_by`, `without_order`)
//! derive a new plan from an existing one. The derived plan shares the
//! table-reference arena until it needs to change it.
//!
//! ```text
//! QueryTree + Extraction + types
//!         │
//!         ▼  translate()
//!       Plan ──── derive (filter / order_by / ...) ───▶ Plan
//!         │
//!         ▼  render() / render_delete()
//!   Statement { sql, adapter, layout }
//! ```

pub mod chain;
mod construct;
pub mod layout;
mod monad;
mod tableref;
mod translator;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::config::Settings;
use crate::error::{TranslateError, TranslateResult};
use crate::extract::Extraction;
use crate::schema::Schema;
use crate::sql::{render_delete, render_select, AggFunc, Dialect, ForUpdate, Limit, Rendered, VarKey};
use crate::syntax::{Node, NodeKind, QueryTree};
use crate::types::{Builtin, CanonicalType, Value};

pub use chain::{ChainKind, OrderAttr};
pub use layout::{AttrSlot, OutputColumn, OutputKind, RowLayout};

use construct::SelectOptions;
use tableref::Arena;
use translator::{Frame, Scope, Translated, Translator};

/// Variations of the SELECT rendered from a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct RenderOptions {
    pub limit: Option<Limit>,
    /// Overrides the plan's own DISTINCT decision.
    pub distinct: Option<bool>,
    /// Reduce the result to one aggregate value.
    pub aggregate: Option<AggFunc>,
    pub for_update: Option<ForUpdate>,
}

/// A rendered statement and the shape of its rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    pub rendered: Rendered,
    pub layout: RowLayout,
    /// Whether fetched rows may be served from a result cache.
    pub cacheable: bool,
}

/// The translated form of one query shape.
#[derive(Debug, Clone)]
pub struct Plan {
    schema_id: u64,
    dialect: Dialect,
    arena: Arc<Arena>,
    frame: Frame,
    cacheable: bool,
    left_join: bool,
    optimization_failed: bool,
    /// Parameter scopes used so far: the source, then one per chained call.
    filters: usize,
    /// Aggregate of a `count(... for ...)` style source.
    aggregate: Option<AggFunc>,
    slice_bounds: Vec<VarKey>,
}

impl Plan {
    /// Translate a parsed source.
    ///
    /// `types` are the canonical types of the extracted expressions, in
    /// extraction order.
    pub fn translate(
        schema: &Schema,
        settings: &Settings,
        tree: &QueryTree,
        extraction: &Extraction,
        types: &[(String, CanonicalType)],
    ) -> TranslateResult<Plan> {
        let types: HashMap<String, CanonicalType> = types.iter().cloned().collect();
        let scope = Scope {
            tree,
            extraction,
            types: &types,
            filter: 0,
        };
        let (generator, aggregate) = split_source(tree)?;
        let translated = translate_once(schema, settings, scope, generator, false, None)?;
        let mut plan = Plan {
            schema_id: schema.id(),
            dialect: settings.dialect,
            arena: translated.arena,
            frame: translated.frame,
            cacheable: translated.cacheable,
            left_join: false,
            optimization_failed: false,
            filters: 1,
            aggregate,
            slice_bounds: translated.slice_bounds,
        };
        if let Some(path) = plan.optimizable_path().filter(|_| settings.optimize_subqueries) {
            match translate_once(schema, settings, scope, generator, true, Some(path.clone())) {
                Ok(translated) if !translated.frame.groupby_monads.is_empty() => {
                    tracing::debug!(
                        target: "gensql::translate",
                        tree = %tree.id,
                        path = %path,
                        "rewrote aggregate subquery as outer join"
                    );
                    plan.arena = translated.arena;
                    plan.frame = translated.frame;
                    plan.cacheable = translated.cacheable;
                    plan.slice_bounds = translated.slice_bounds;
                    plan.left_join = true;
                }
                Ok(_) | Err(TranslateError::OptimizationFailed) => {
                    tracing::debug!(
                        target: "gensql::translate",
                        tree = %tree.id,
                        path = %path,
                        "outer join rewrite failed, keeping correlated subquery"
                    );
                    plan.optimization_failed = true;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(plan)
    }

    /// The single collection path whose aggregate could become a join.
    fn optimizable_path(&self) -> Option<String> {
        if !self.frame.groupby_monads.is_empty() || self.frame.aggregated_subquery_paths.len() != 1 {
            return None;
        }
        self.frame.aggregated_subquery_paths.iter().next().cloned()
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn left_join(&self) -> bool {
        self.left_join
    }

    pub fn optimization_failed(&self) -> bool {
        self.optimization_failed
    }

    pub fn cacheable(&self) -> bool {
        self.cacheable
    }

    /// Scope number for the parameters of the next chained call.
    pub fn next_filter(&self) -> usize {
        self.filters
    }

    /// Names bound by the query's `for` clauses.
    pub fn names(&self) -> &[String] {
        &self.frame.qual_names
    }

    pub fn result_type(&self) -> &CanonicalType {
        &self.frame.expr_type
    }

    /// Aggregate applied by the source itself, as in `count(s for s in Student)`.
    pub fn source_aggregate(&self) -> Option<AggFunc> {
        self.aggregate
    }

    /// Reject argument values the rendered SQL cannot express.
    ///
    /// String slices are rendered with positive-index arithmetic, so a
    /// parameter used as a slice bound must not be negative.
    pub fn check_arguments(&self, values: &HashMap<VarKey, Value>) -> TranslateResult<()> {
        for key in &self.slice_bounds {
            if let Some(Value::Int(i)) = values.get(key) {
                if *i < 0 {
                    return Err(TranslateError::not_implemented(format!(
                        "Negative indices are not supported in string slice: `{}` is {}",
                        key.src, i
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_schema(&self, schema: &Schema) -> TranslateResult<()> {
        if schema.id() != self.schema_id {
            return Err(TranslateError::translation(
                "Query was translated for a different schema",
            ));
        }
        Ok(())
    }

    /// Copy the plan and apply `f` to a translator over the copy.
    fn derive<'s>(
        &self,
        schema: &'s Schema,
        next_filter: bool,
        f: impl FnOnce(&mut Translator<'s>) -> TranslateResult<()>,
    ) -> TranslateResult<Plan> {
        self.check_schema(schema)?;
        let mut translator =
            Translator::resume(schema, self.dialect, Arc::clone(&self.arena), self.frame.clone());
        f(&mut translator)?;
        let translated = translator.into_parts();
        let mut slice_bounds = self.slice_bounds.clone();
        slice_bounds.extend(translated.slice_bounds);
        Ok(Plan {
            schema_id: self.schema_id,
            dialect: self.dialect,
            arena: translated.arena,
            frame: translated.frame,
            cacheable: self.cacheable && translated.cacheable,
            left_join: self.left_join,
            optimization_failed: self.optimization_failed,
            filters: self.filters + usize::from(next_filter),
            aggregate: self.aggregate,
            slice_bounds,
        })
    }

    /// Apply a chained `filter` or `order_by` source.
    ///
    /// The source's parameters use scope [`next_filter`](Self::next_filter).
    pub fn chain(
        &self,
        schema: &Schema,
        kind: ChainKind,
        tree: &QueryTree,
        extraction: &Extraction,
        types: &[(String, CanonicalType)],
    ) -> TranslateResult<Plan> {
        if self.aggregate.is_some() {
            return Err(TranslateError::type_error(format!(
                "Query of aggregate function cannot be chained: {}",
                tree.text
            )));
        }
        let types: HashMap<String, CanonicalType> = types.iter().cloned().collect();
        let scope = Scope {
            tree,
            extraction,
            types: &types,
            filter: self.filters,
        };
        self.derive(schema, true, |t| t.apply_lambda(kind, scope))
    }

    pub fn order_by_numbers(&self, schema: &Schema, numbers: &[i64]) -> TranslateResult<Plan> {
        self.derive(schema, false, |t| t.order_by_numbers(numbers))
    }

    pub fn order_by_attributes(&self, schema: &Schema, attrs: &[OrderAttr]) -> TranslateResult<Plan> {
        self.derive(schema, false, |t| t.order_by_attributes(attrs))
    }

    pub fn without_order(&self, schema: &Schema) -> TranslateResult<Plan> {
        self.derive(schema, false, |t| {
            t.without_order();
            Ok(())
        })
    }

    /// `filter_by(name=value, ...)`. A `None` type marks a `None` value.
    pub fn filter_by(
        &self,
        schema: &Schema,
        kwargs: &[(String, Option<CanonicalType>)],
    ) -> TranslateResult<Plan> {
        let filter = self.filters;
        self.derive(schema, true, |t| t.apply_kwfilters(filter, kwargs))
    }

    /// Render the SELECT for `opts`.
    pub fn render(&self, schema: &Schema, settings: &Settings, opts: &RenderOptions) -> TranslateResult<Statement> {
        self.check_schema(schema)?;
        let select_opts = SelectOptions {
            limit: opts.limit,
            distinct: opts.distinct,
            aggregate: opts.aggregate.or(self.aggregate),
            for_update: opts.for_update,
            is_not_null_checks: false,
        };
        let mut translator =
            Translator::resume(schema, self.dialect, Arc::clone(&self.arena), self.frame.clone());
        let (ast, layout) = translator.construct_select(&select_opts)?;
        let rendered = render_select(&ast, self.dialect, settings.inner_join_syntax)?;
        tracing::trace!(target: "gensql::translate", sql = %rendered.sql, "rendered select");
        Ok(Statement {
            rendered,
            layout,
            cacheable: self.cacheable && opts.for_update.is_none(),
        })
    }

    /// Render a DELETE of the entities the plan selects.
    pub fn render_delete(&self, schema: &Schema, settings: &Settings) -> TranslateResult<Rendered> {
        self.check_schema(schema)?;
        if self.aggregate.is_some() {
            return Err(TranslateError::translation(
                "Delete query cannot contains GROUP BY section or aggregate functions",
            ));
        }
        let mut translator =
            Translator::resume(schema, self.dialect, Arc::clone(&self.arena), self.frame.clone());
        let ast = translator.construct_delete()?;
        render_delete(&ast, self.dialect, settings.inner_join_syntax)
    }
}

/// The generator of a source and the aggregate wrapped around it, if any.
fn split_source(tree: &QueryTree) -> TranslateResult<(&Node, Option<AggFunc>)> {
    let root = &tree.root;
    match &root.kind {
        NodeKind::GeneratorExp { .. } => Ok((root, None)),
        NodeKind::Call { func, args } => {
            let builtin = func.name().and_then(Builtin::from_name);
            let aggregate = match builtin {
                Some(Builtin::Count) => Some(AggFunc::Count),
                Some(Builtin::Sum) => Some(AggFunc::Sum),
                Some(Builtin::Avg) => Some(AggFunc::Avg),
                Some(Builtin::Min) => Some(AggFunc::Min),
                Some(Builtin::Max) => Some(AggFunc::Max),
                Some(Builtin::Select) => None,
                _ => return Err(not_a_generator(tree)),
            };
            match args.as_slice() {
                [arg] if matches!(arg.kind, NodeKind::GeneratorExp { .. }) => Ok((arg, aggregate)),
                _ => Err(not_a_generator(tree)),
            }
        }
        _ => Err(not_a_generator(tree)),
    }
}

fn not_a_generator(tree: &QueryTree) -> TranslateError {
    TranslateError::translation(format!(
        "Query source must be a generator expression. Got: {}",
        tree.text
    ))
}

fn translate_once<'a>(
    schema: &'a Schema,
    settings: &Settings,
    scope: Scope<'a>,
    generator: &Node,
    left_join: bool,
    optimize: Option<String>,
) -> TranslateResult<Translated> {
    let mut translator = Translator::start(
        schema,
        settings.dialect,
        settings.alias_limit(),
        left_join,
        optimize,
    );
    translator.set_scope(scope);
    translator.translate_generator(generator)?;
    Ok(translator.into_parts())
}
