//! Query façade: translate once per shape, bind per call.
//!
//! A [`Database`] owns a schema, its settings and two plan caches:
//!
//! - plans, keyed by a [`PlanKey`] (source tree, argument types and every
//!   chained step applied after it);
//! - statements, keyed by the plan key plus [`RenderOptions`].
//!
//! A [`Query`] is a cheap handle over a cached plan plus the argument values
//! of the current call. Builder methods return a new handle; the plan they
//! derive is looked up in the cache before anything is translated.
//!
//! ```rust,ignore
//! let db = Database::new(schema, Settings::default());
//! let vars = Vars::new().with("min_gpa", 3.0);
//! let prepared = db
//!     .select("s for s in Student if s.gpa > min_gpa", &vars)?
//!     .order_by_attributes(&[OrderAttr::desc("Student", "gpa")])?
//!     .limit(10, None)
//!     .prepare()?;
//! ```

mod session;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use session::{Executor, Session};

use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::PlanCache;
use crate::config::Settings;
use crate::error::{TranslateError, TranslateResult};
use crate::extract::{extract_cached, extract_vars, Env, Vars};
use crate::schema::Schema;
use crate::sql::{AggFunc, ForUpdate, Limit, Rendered, VarKey};
use crate::syntax::{parse_cached, TreeId};
use crate::translate::{ChainKind, OrderAttr, Plan, RenderOptions, RowLayout, Statement};
use crate::types::{CanonicalType, Value};

/// One step in building a plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyStep {
    Source {
        tree: TreeId,
        types: Vec<(String, CanonicalType)>,
    },
    Chain {
        order: bool,
        tree: TreeId,
        types: Vec<(String, CanonicalType)>,
    },
    OrderNumbers(Vec<i64>),
    OrderAttributes(Vec<OrderAttr>),
    /// Keyword names with the type of each value, `None` for a `None` value.
    FilterBy(Vec<(String, Option<CanonicalType>)>),
    WithoutOrder,
}

/// Structural identity of a plan. Never contains argument values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlanKey(Vec<KeyStep>);

impl PlanKey {
    fn then(&self, step: KeyStep) -> PlanKey {
        let mut steps = self.0.clone();
        steps.push(step);
        PlanKey(steps)
    }

    /// Number of steps, the source included.
    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

/// Whether a prepared statement reads rows or deletes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Delete,
}

/// A rendered statement with its arguments bound for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct Prepared {
    pub kind: StatementKind,
    pub sql: String,
    pub args: Vec<Value>,
    pub layout: RowLayout,
    /// Rows may be served from a session's result cache.
    pub cacheable: bool,
}

impl Prepared {
    fn select(statement: &Statement, args: Vec<Value>) -> Self {
        Self {
            kind: StatementKind::Select,
            sql: statement.rendered.sql.clone(),
            args,
            layout: statement.layout.clone(),
            cacheable: statement.cacheable,
        }
    }

    fn delete(rendered: &Rendered, args: Vec<Value>) -> Self {
        Self {
            kind: StatementKind::Delete,
            sql: rendered.sql.clone(),
            args,
            layout: RowLayout::Scalar,
            cacheable: false,
        }
    }
}

/// A schema, its settings and the plans translated against it.
#[derive(Debug)]
pub struct Database {
    schema: Arc<Schema>,
    settings: Settings,
    plans: PlanCache<PlanKey, Plan>,
    statements: PlanCache<(PlanKey, RenderOptions), Statement>,
    deletes: PlanCache<PlanKey, Rendered>,
}

impl Database {
    pub fn new(schema: Schema, settings: Settings) -> Self {
        Self {
            schema: Arc::new(schema),
            settings,
            plans: PlanCache::new("plans"),
            statements: PlanCache::new("statements"),
            deletes: PlanCache::new("deletes"),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Number of distinct plans translated so far.
    pub fn plan_count(&self) -> usize {
        self.plans.len()
    }

    /// Number of distinct statements rendered so far.
    pub fn statement_count(&self) -> usize {
        self.statements.len() + self.deletes.len()
    }

    /// Start a query from a generator source such as
    /// `s for s in Student if s.gpa > min_gpa`.
    ///
    /// Names the source does not bind resolve to `vars`, then to entity
    /// names, then to builtins.
    pub fn select(&self, source: &str, vars: &Vars) -> TranslateResult<Query<'_>> {
        let tree = parse_cached(source)?;
        let extraction = extract_cached(&tree, &[])?;
        let extracted = extract_vars(0, &extraction, &Env::new(vars, Some(&self.schema)))?;
        let key = PlanKey(vec![KeyStep::Source {
            tree: tree.id.clone(),
            types: extracted.types.clone(),
        }]);
        let plan = self.plans.get_or_try_insert_with(&key, || {
            Plan::translate(&self.schema, &self.settings, &tree, &extraction, &extracted.types)
        })?;
        Ok(Query {
            db: self,
            key,
            plan,
            values: extracted.values,
            opts: RenderOptions::default(),
        })
    }
}

/// A query shape plus the argument values of one call.
#[derive(Debug, Clone)]
pub struct Query<'db> {
    db: &'db Database,
    key: PlanKey,
    plan: Arc<Plan>,
    values: HashMap<VarKey, Value>,
    opts: RenderOptions,
}

impl<'db> Query<'db> {
    pub fn key(&self) -> &PlanKey {
        &self.key
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Argument values bound so far, by parameter scope and source text.
    pub fn values(&self) -> &HashMap<VarKey, Value> {
        &self.values
    }

    fn derived(
        &self,
        step: KeyStep,
        values: HashMap<VarKey, Value>,
        build: impl FnOnce() -> TranslateResult<Plan>,
    ) -> TranslateResult<Query<'db>> {
        let key = self.key.then(step);
        let plan = self.db.plans.get_or_try_insert_with(&key, build)?;
        let mut merged = self.values.clone();
        merged.extend(values);
        Ok(Query {
            db: self.db,
            key,
            plan,
            values: merged,
            opts: self.opts,
        })
    }

    fn chained(&self, kind: ChainKind, source: &str, vars: &Vars) -> TranslateResult<Query<'db>> {
        let db = self.db;
        let tree = parse_cached(source)?;
        let extraction = extract_cached(&tree, self.plan.names())?;
        let filter = self.plan.next_filter();
        let extracted = extract_vars(filter, &extraction, &Env::new(vars, Some(&db.schema)))?;
        let step = KeyStep::Chain {
            order: kind == ChainKind::OrderBy,
            tree: tree.id.clone(),
            types: extracted.types.clone(),
        };
        let plan = Arc::clone(&self.plan);
        self.derived(step, extracted.values, || {
            plan.chain(&db.schema, kind, &tree, &extraction, &extracted.types)
        })
    }

    /// Add a condition, given as a lambda over the result
    /// (`lambda s: s.gpa > x`) or an expression over the query's own names.
    pub fn filter(&self, source: &str, vars: &Vars) -> TranslateResult<Query<'db>> {
        self.chained(ChainKind::Filter, source, vars)
    }

    /// Order by a lambda or an expression over the query's own names.
    pub fn order_by(&self, source: &str, vars: &Vars) -> TranslateResult<Query<'db>> {
        self.chained(ChainKind::OrderBy, source, vars)
    }

    /// Order by 1-based result positions; a negative position sorts DESC.
    pub fn order_by_numbers(&self, numbers: &[i64]) -> TranslateResult<Query<'db>> {
        let db = self.db;
        let plan = Arc::clone(&self.plan);
        self.derived(KeyStep::OrderNumbers(numbers.to_vec()), HashMap::new(), || {
            plan.order_by_numbers(&db.schema, numbers)
        })
    }

    pub fn order_by_attributes(&self, attrs: &[OrderAttr]) -> TranslateResult<Query<'db>> {
        let db = self.db;
        let plan = Arc::clone(&self.plan);
        self.derived(KeyStep::OrderAttributes(attrs.to_vec()), HashMap::new(), || {
            plan.order_by_attributes(&db.schema, attrs)
        })
    }

    pub fn without_order(&self) -> TranslateResult<Query<'db>> {
        let db = self.db;
        let plan = Arc::clone(&self.plan);
        self.derived(KeyStep::WithoutOrder, HashMap::new(), || plan.without_order(&db.schema))
    }

    /// `filter_by(name=value, ...)` on a query returning entities.
    ///
    /// A `None` value becomes an `IS NULL` test.
    pub fn filter_by<K, V>(&self, kwargs: impl IntoIterator<Item = (K, V)>) -> TranslateResult<Query<'db>>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let filter = self.plan.next_filter();
        let mut spec = Vec::new();
        let mut values = HashMap::new();
        for (name, value) in kwargs {
            let name = name.into();
            let value = value.into();
            let ty = if value.is_none() {
                None
            } else {
                Some(value.canonical_type().map_err(|type_name| {
                    TranslateError::type_error(format!(
                        "Keyword argument {} has unsupported type {}",
                        name, type_name
                    ))
                })?)
            };
            values.insert(VarKey::new(filter, name.clone()), value);
            spec.push((name, ty));
        }
        let db = self.db;
        let plan = Arc::clone(&self.plan);
        let step = KeyStep::FilterBy(spec.clone());
        self.derived(step, values, || plan.filter_by(&db.schema, &spec))
    }

    fn with_opts(&self, f: impl FnOnce(&mut RenderOptions)) -> Query<'db> {
        let mut query = self.clone();
        f(&mut query.opts);
        query
    }

    pub fn distinct(&self) -> Query<'db> {
        self.with_opts(|o| o.distinct = Some(true))
    }

    pub fn for_update(&self, nowait: bool) -> Query<'db> {
        self.with_opts(|o| o.for_update = Some(ForUpdate { nowait }))
    }

    pub fn limit(&self, limit: u64, offset: Option<u64>) -> Query<'db> {
        self.with_opts(|o| o.limit = Some(Limit { limit, offset }))
    }

    /// Rows `start..stop` of the result.
    pub fn slice(&self, start: u64, stop: u64) -> Query<'db> {
        let offset = (start > 0).then_some(start);
        self.limit(stop.saturating_sub(start), offset)
    }

    /// Render with the query's own options.
    pub fn prepare(&self) -> TranslateResult<Prepared> {
        self.prepare_with(self.opts)
    }

    fn prepare_with(&self, opts: RenderOptions) -> TranslateResult<Prepared> {
        self.plan.check_arguments(&self.values)?;
        let db = self.db;
        let key = (self.key.clone(), opts);
        let statement = db.statements.get_or_try_insert_with(&key, || {
            self.plan.render(&db.schema, &db.settings, &opts)
        })?;
        let args = statement.rendered.adapter.bind(&self.values)?;
        Ok(Prepared::select(&statement, args))
    }

    /// The first row only.
    pub fn first(&self) -> TranslateResult<Prepared> {
        self.prepare_with(RenderOptions {
            limit: Some(Limit {
                limit: 1,
                offset: self.opts.limit.and_then(|l| l.offset),
            }),
            ..self.opts
        })
    }

    /// Whether any row matches, as a query of at most one row.
    pub fn exists(&self) -> TranslateResult<Prepared> {
        self.prepare_with(RenderOptions {
            limit: Some(Limit {
                limit: 1,
                offset: None,
            }),
            for_update: None,
            ..self.opts
        })
    }

    pub fn aggregate(&self, func: AggFunc) -> TranslateResult<Prepared> {
        self.prepare_with(RenderOptions {
            aggregate: Some(func),
            limit: None,
            for_update: None,
            ..self.opts
        })
    }

    pub fn count(&self) -> TranslateResult<Prepared> {
        self.aggregate(AggFunc::Count)
    }

    pub fn sum(&self) -> TranslateResult<Prepared> {
        self.aggregate(AggFunc::Sum)
    }

    pub fn avg(&self) -> TranslateResult<Prepared> {
        self.aggregate(AggFunc::Avg)
    }

    pub fn min(&self) -> TranslateResult<Prepared> {
        self.aggregate(AggFunc::Min)
    }

    pub fn max(&self) -> TranslateResult<Prepared> {
        self.aggregate(AggFunc::Max)
    }

    /// DELETE the entities the query selects.
    pub fn delete(&self) -> TranslateResult<Prepared> {
        if self.opts.limit.is_some() {
            return Err(TranslateError::type_error(
                "Delete query cannot be combined with limit or slice",
            ));
        }
        self.plan.check_arguments(&self.values)?;
        let db = self.db;
        let rendered = db
            .deletes
            .get_or_try_insert_with(&self.key, || self.plan.render_delete(&db.schema, &db.settings))?;
        let args = rendered.adapter.bind(&self.values)?;
        Ok(Prepared::delete(&rendered, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaBuilder;
    use crate::types::NumericKind;

    fn db() -> Database {
        let schema = SchemaBuilder::new()
            .entity("Group", |e| e.pk("number", CanonicalType::INT).set("students", "Student", "group"))
            .entity("Student", |e| {
                e.pk("id", CanonicalType::INT)
                    .required("name", CanonicalType::Text)
                    .optional("gpa", CanonicalType::Numeric(NumericKind::Float))
                    .reference("group", "Group", "students")
            })
            .build()
            .unwrap();
        Database::new(schema, Settings::default())
    }

    #[test]
    fn test_same_shape_reuses_the_plan() {
        let db = db();
        let src = "s for s in Student if s.gpa > x";
        let a = db.select(src, &Vars::new().with("x", 3.0)).unwrap();
        let b = db.select(src, &Vars::new().with("x", 2.5)).unwrap();
        assert_eq!(db.plan_count(), 1);
        assert_eq!(a.key(), b.key());
        let (a, b) = (a.prepare().unwrap(), b.prepare().unwrap());
        assert_eq!(a.sql, b.sql);
        assert_eq!(a.args, vec![Value::Float(3.0)]);
        assert_eq!(b.args, vec![Value::Float(2.5)]);
    }

    #[test]
    fn test_argument_type_changes_the_key() {
        let db = db();
        let src = "s for s in Student if s.gpa > x";
        let a = db.select(src, &Vars::new().with("x", 3.0)).unwrap();
        let b = db.select(src, &Vars::new().with("x", 3i64)).unwrap();
        assert_ne!(a.key(), b.key());
        assert_eq!(db.plan_count(), 2);
    }

    #[test]
    fn test_getter_failure_names_the_expression() {
        let db = db();
        let err = db
            .select("s for s in Student if s.gpa > x", &Vars::new())
            .unwrap_err();
        assert!(matches!(err, TranslateError::ExternalEval { .. }));
        assert!(err.to_string().starts_with("`x` raises NameError"));
    }

    #[test]
    fn test_chained_steps_extend_the_key() {
        let db = db();
        let q = db.select("s for s in Student", &Vars::new()).unwrap();
        let filtered = q.filter("lambda s: s.name == n", &Vars::new().with("n", "Ann")).unwrap();
        assert_eq!(filtered.key().depth(), 2);
        let again = q.filter("lambda s: s.name == n", &Vars::new().with("n", "Bob")).unwrap();
        assert_eq!(filtered.key(), again.key());
        assert_eq!(db.plan_count(), 2);
        assert_eq!(again.prepare().unwrap().args, vec![Value::from("Bob")]);
    }

    #[test]
    fn test_filter_by_none_differs_from_value() {
        let db = db();
        let q = db.select("s for s in Student", &Vars::new()).unwrap();
        let with_value = q.filter_by([("gpa", Value::Float(3.0))]).unwrap();
        let with_none = q.filter_by([("gpa", Value::None)]).unwrap();
        assert_ne!(with_value.key(), with_none.key());
        assert!(with_none.prepare().unwrap().sql.contains("IS NULL"));
    }

    #[test]
    fn test_delete_rejects_limit() {
        let db = db();
        let q = db.select("s for s in Student", &Vars::new()).unwrap();
        assert!(q.limit(5, None).delete().is_err());
        assert_eq!(q.delete().unwrap().kind, StatementKind::Delete);
    }
}
