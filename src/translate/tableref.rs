//! Table references and subqueries.
//!
//! Every name bound by a `for` clause and every relationship hop reached
//! through an attribute chain becomes a [`TableRef`]. A reference is only
//! materialized into the FROM clause of its [`Subquery`] when some expression
//! needs its columns ([`Arena::make_join`]). A pk-only materialization reuses
//! the foreign-key columns of the parent row and is upgraded in place to a
//! real join when another attribute is needed later.
//!
//! Subqueries and references live in one [`Arena`] per translation, indexed
//! by plain ids, so that a finished plan can be branched by cloning the arena.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::error::{TranslateError, TranslateResult};
use crate::schema::{Attr, Entity, Schema};
use crate::sql::{join_tables, sql_and, FromClause, FromItem, FromKind, SqlExpr, SqlLiteral};

pub(crate) type SubqueryId = usize;
pub(crate) type TableRefId = usize;

/// FROM items, WHERE conditions and alias counters of one (sub)query.
#[derive(Debug, Clone)]
pub(crate) struct Subquery {
    pub parent: Option<SubqueryId>,
    pub from: FromClause,
    pub conditions: Vec<SqlExpr>,
    pub tablerefs: IndexMap<String, TableRefId>,
    alias_counters: HashMap<String, usize>,
    /// Set on a top-level subquery whose references were used by a nested one.
    pub used_from_subquery: bool,
}

impl Subquery {
    pub fn is_left_join(&self) -> bool {
        self.from.kind == FromKind::Left
    }
}

/// Attribute identified by the entity it was looked up on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct AttrRef {
    pub entity: String,
    pub name: String,
}

impl AttrRef {
    pub fn new(entity: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            name: name.into(),
        }
    }

    pub fn resolve<'s>(&self, schema: &'s Schema) -> TranslateResult<&'s Attr> {
        entity_of(schema, &self.entity)?.attr(&self.name).ok_or_else(|| {
            TranslateError::attribute(format!(
                "Entity {} does not have attribute {}",
                self.entity, self.name
            ))
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) enum RefKind {
    /// A name bound directly to an entity set.
    Root,
    /// One relationship hop away from `parent`.
    Joined { parent: TableRefId, attr: AttrRef },
}

#[derive(Debug, Clone)]
pub(crate) struct TableRef {
    pub subquery: SubqueryId,
    pub kind: RefKind,
    /// `s`, `s-group`, `s-group-dept`; the variable name for the last hop of
    /// a `for` clause.
    pub name_path: String,
    pub entity: String,
    pub alias: Option<String>,
    pub pk_columns: Vec<String>,
    pub joined: bool,
    /// Materialized without a join, reusing the parent's columns.
    pub optimized: bool,
    pub can_affect_distinct: bool,
}

impl TableRef {
    fn var_name(&self) -> Option<&str> {
        is_ident(&self.name_path).then_some(self.name_path.as_str())
    }
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

pub(crate) fn entity_of<'s>(schema: &'s Schema, name: &str) -> TranslateResult<&'s Entity> {
    schema
        .entity(name)
        .ok_or_else(|| TranslateError::translation(format!("Unknown entity {}", name)))
}

/// `classtype IN (...)` for entities of a single-table hierarchy.
pub(crate) fn discriminator_criteria(schema: &Schema, entity: &Entity, alias: &str) -> Option<SqlExpr> {
    let column = entity.discriminator.as_ref()?;
    let values = schema.discriminator_values(entity)?;
    Some(SqlExpr::In {
        expr: Box::new(SqlExpr::column(alias, column)),
        list: values
            .into_iter()
            .map(|v| SqlExpr::Value(SqlLiteral::Text(v)))
            .collect(),
        negated: false,
    })
}

/// Storage for the subqueries and table references of one translation.
#[derive(Debug, Clone)]
pub(crate) struct Arena {
    pub subqueries: Vec<Subquery>,
    pub tablerefs: Vec<TableRef>,
    expr_counter: usize,
    alias_limit: usize,
}

impl Arena {
    pub fn new(alias_limit: usize) -> Self {
        Self {
            subqueries: Vec::new(),
            tablerefs: Vec::new(),
            expr_counter: 0,
            alias_limit,
        }
    }

    /// A new subquery; nested ones inherit the parent's alias counters.
    pub fn new_subquery(&mut self, parent: Option<SubqueryId>, left_join: bool) -> SubqueryId {
        let alias_counters = parent
            .map(|p| self.subqueries[p].alias_counters.clone())
            .unwrap_or_default();
        let kind = if left_join { FromKind::Left } else { FromKind::Inner };
        self.subqueries.push(Subquery {
            parent,
            from: FromClause::new(kind),
            conditions: Vec::new(),
            tablerefs: IndexMap::new(),
            alias_counters,
            used_from_subquery: false,
        });
        self.subqueries.len() - 1
    }

    pub fn subquery(&self, id: SubqueryId) -> &Subquery {
        &self.subqueries[id]
    }

    pub fn subquery_mut(&mut self, id: SubqueryId) -> &mut Subquery {
        &mut self.subqueries[id]
    }

    pub fn tableref(&self, id: TableRefId) -> &TableRef {
        &self.tablerefs[id]
    }

    pub fn tableref_mut(&mut self, id: TableRefId) -> &mut TableRef {
        &mut self.tablerefs[id]
    }

    /// Next `expr-N` name, unique across the whole translation.
    pub fn next_expr_name(&mut self) -> String {
        self.expr_counter += 1;
        format!("expr-{}", self.expr_counter)
    }

    /// Look a reference up by path, searching enclosing subqueries.
    pub fn get_tableref(&mut self, subquery: SubqueryId, name_path: &str) -> Option<TableRefId> {
        let mut current = subquery;
        let mut nested = false;
        loop {
            let sq = &self.subqueries[current];
            if let Some(&id) = sq.tablerefs.get(name_path) {
                if nested && sq.parent.is_none() {
                    self.subqueries[current].used_from_subquery = true;
                }
                return Some(id);
            }
            current = sq.parent?;
            nested = true;
        }
    }

    /// Register a root reference for a `for` variable.
    pub fn add_root(&mut self, subquery: SubqueryId, name: &str, entity: &str) -> TableRefId {
        let alias = self.make_alias(subquery, name);
        let id = self.push(TableRef {
            subquery,
            kind: RefKind::Root,
            name_path: alias,
            entity: entity.to_string(),
            alias: None,
            pk_columns: Vec::new(),
            joined: false,
            optimized: false,
            can_affect_distinct: true,
        });
        self.subqueries[subquery].tablerefs.insert(name.to_string(), id);
        id
    }

    /// Register the reference reached from `parent` through `attr`.
    pub fn add_joined(
        &mut self,
        subquery: SubqueryId,
        name_path: &str,
        parent: TableRefId,
        attr: AttrRef,
        target: &str,
    ) -> TableRefId {
        let id = self.push(TableRef {
            subquery,
            kind: RefKind::Joined { parent, attr },
            name_path: name_path.to_string(),
            entity: target.to_string(),
            alias: None,
            pk_columns: Vec::new(),
            joined: false,
            optimized: false,
            can_affect_distinct: false,
        });
        self.subqueries[subquery]
            .tablerefs
            .insert(name_path.to_string(), id);
        id
    }

    fn push(&mut self, tableref: TableRef) -> TableRefId {
        self.tablerefs.push(tableref);
        self.tablerefs.len() - 1
    }

    /// Allocate an alias: the lower-cased name, suffixed `-N` from the
    /// second use on (and always for `t`).
    pub fn make_alias(&mut self, subquery: SubqueryId, name: &str) -> String {
        let name: String = name.chars().take(self.alias_limit).collect::<String>().to_lowercase();
        let counter = self.subqueries[subquery]
            .alias_counters
            .entry(name.clone())
            .or_insert(0);
        *counter += 1;
        if *counter == 1 && name != "t" {
            name
        } else {
            format!("{}-{}", name, counter)
        }
    }

    /// Add a joined table right after its parent's group of joined items.
    pub fn join_table(
        &mut self,
        subquery: SubqueryId,
        parent_alias: &str,
        alias: &str,
        table: &str,
        cond: Option<SqlExpr>,
    ) {
        let item = FromItem::table(Some(alias.to_string()), table).with_on(cond);
        let items = &mut self.subqueries[subquery].from.items;
        for i in 0..items.len() {
            if items[i].alias.as_deref() == Some(parent_alias) {
                if let Some(j) = (i + 1..items.len()).find(|&j| items[j].on.is_none()) {
                    items.insert(j, item);
                    return;
                }
            }
        }
        items.push(item);
    }

    /// Materialize a reference into its subquery's FROM clause.
    ///
    /// Returns the alias to qualify columns with and the primary-key columns
    /// under that alias. With `pk_only`, a to-one hop stops at the parent's
    /// foreign-key columns and a many-to-many hop stops at the intermediate
    /// table.
    pub fn make_join(
        &mut self,
        schema: &Schema,
        id: TableRefId,
        pk_only: bool,
    ) -> TranslateResult<(String, Vec<String>)> {
        let tableref = self.tablerefs[id].clone();
        match &tableref.kind {
            RefKind::Root => self.make_root_join(schema, id, &tableref),
            RefKind::Joined { parent, attr } => {
                self.make_attr_join(schema, id, &tableref, *parent, attr, pk_only)
            }
        }
    }

    fn make_root_join(
        &mut self,
        schema: &Schema,
        id: TableRefId,
        tableref: &TableRef,
    ) -> TranslateResult<(String, Vec<String>)> {
        let entity = entity_of(schema, &tableref.entity)?;
        let alias = tableref.name_path.clone();
        if !tableref.joined {
            let subquery = &mut self.subqueries[tableref.subquery];
            subquery
                .from
                .items
                .push(FromItem::table(Some(alias.clone()), entity.table.clone()));
            if let Some(criteria) = discriminator_criteria(schema, entity, &alias) {
                subquery.conditions.push(criteria);
            }
            let tr = &mut self.tablerefs[id];
            tr.joined = true;
            tr.alias = Some(alias.clone());
            tr.pk_columns = entity.pk_columns();
        }
        Ok((alias, entity.pk_columns()))
    }

    fn make_attr_join(
        &mut self,
        schema: &Schema,
        id: TableRefId,
        tableref: &TableRef,
        parent: TableRefId,
        attr_ref: &AttrRef,
        pk_only: bool,
    ) -> TranslateResult<(String, Vec<String>)> {
        if tableref.joined && (pk_only || !tableref.optimized) {
            return Ok((
                tableref.alias.clone().unwrap_or_default(),
                tableref.pk_columns.clone(),
            ));
        }
        let subquery = tableref.subquery;
        let attr = attr_ref.resolve(schema)?;
        let entity = entity_of(schema, &tableref.entity)?;
        let parent_pk_only = attr.pk_offset.is_some() || attr.is_collection();
        let (parent_alias, left_pk_columns) = self.make_join(schema, parent, parent_pk_only)?;
        let pk_columns = entity.pk_columns();
        let alias_name = tableref
            .var_name()
            .map(str::to_string)
            .unwrap_or_else(|| entity.name.clone());
        let missing_reverse = || {
            TranslateError::translation(format!(
                "Attribute {}.{} has no reverse",
                attr.owner, attr.name
            ))
        };

        let (alias, mut join_cond) = if !attr.is_collection() {
            if attr.columns.is_empty() {
                let reverse = schema.reverse_of(attr).ok_or_else(missing_reverse)?;
                let alias = self.make_alias(subquery, &alias_name);
                let cond = join_tables(&parent_alias, &alias, &left_pk_columns, &reverse.columns);
                (alias, cond)
            } else {
                let left_columns = match attr.pk_offset {
                    Some(offset) => left_pk_columns
                        .iter()
                        .skip(offset)
                        .take(attr.columns.len())
                        .cloned()
                        .collect(),
                    None => attr.columns.clone(),
                };
                if pk_only {
                    let tr = &mut self.tablerefs[id];
                    tr.alias = Some(parent_alias.clone());
                    tr.pk_columns = left_columns.clone();
                    tr.optimized = true;
                    tr.joined = true;
                    return Ok((parent_alias, left_columns));
                }
                let alias = self.make_alias(subquery, &alias_name);
                let cond = join_tables(&parent_alias, &alias, &left_columns, &pk_columns);
                (alias, cond)
            }
        } else {
            let reverse = schema.reverse_of(attr).ok_or_else(missing_reverse)?;
            if !reverse.is_collection() {
                let alias = self.make_alias(subquery, &alias_name);
                let cond = join_tables(&parent_alias, &alias, &left_pk_columns, &reverse.columns);
                (alias, cond)
            } else {
                let m2m_alias = if !tableref.joined {
                    let m2m_table = attr.m2m_table.clone().ok_or_else(|| {
                        TranslateError::translation(format!(
                            "Attribute {}.{} has no intermediate table",
                            attr.owner, attr.name
                        ))
                    })?;
                    let m2m_alias = self.make_alias(subquery, "t");
                    let cond =
                        join_tables(&parent_alias, &m2m_alias, &left_pk_columns, &reverse.columns);
                    self.join_table(subquery, &parent_alias, &m2m_alias, &m2m_table, cond);
                    if pk_only {
                        let tr = &mut self.tablerefs[id];
                        tr.alias = Some(m2m_alias.clone());
                        tr.pk_columns = attr.columns.clone();
                        tr.optimized = true;
                        tr.joined = true;
                        return Ok((m2m_alias, attr.columns.clone()));
                    }
                    m2m_alias
                } else {
                    tableref.alias.clone().unwrap_or_default()
                };
                let alias = self.make_alias(subquery, &alias_name);
                let cond = join_tables(&m2m_alias, &alias, &attr.columns, &pk_columns);
                (alias, cond)
            }
        };

        if !pk_only {
            if let Some(criteria) = discriminator_criteria(schema, entity, &alias) {
                join_cond = sql_and(join_cond.into_iter().chain([criteria]).collect());
            }
        }
        self.join_table(subquery, &parent_alias, &alias, &entity.table, join_cond);
        let tr = &mut self.tablerefs[id];
        tr.alias = Some(alias.clone());
        tr.pk_columns = pk_columns.clone();
        tr.optimized = false;
        tr.joined = true;
        Ok((alias, pk_columns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaBuilder;
    use crate::types::CanonicalType;

    fn schema() -> Schema {
        SchemaBuilder::new()
            .entity("Group", |e| {
                e.pk("number", CanonicalType::INT)
                    .set("students", "Student", "group")
            })
            .entity("Student", |e| {
                e.pk("id", CanonicalType::INT)
                    .required("name", CanonicalType::Text)
                    .reference("group", "Group", "students")
                    .set("courses", "Course", "students")
            })
            .entity("Course", |e| {
                e.pk("id", CanonicalType::INT)
                    .set("students", "Student", "courses")
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_alias_numbering() {
        let mut arena = Arena::new(27);
        let sq = arena.new_subquery(None, false);
        assert_eq!(arena.make_alias(sq, "Student"), "student");
        assert_eq!(arena.make_alias(sq, "Student"), "student-2");
        assert_eq!(arena.make_alias(sq, "t"), "t-1");
        let nested = arena.new_subquery(Some(sq), false);
        assert_eq!(arena.make_alias(nested, "student"), "student-3");
        assert_eq!(arena.make_alias(sq, "student"), "student-3");
    }

    #[test]
    fn test_alias_truncated() {
        let mut arena = Arena::new(4);
        let sq = arena.new_subquery(None, false);
        assert_eq!(arena.make_alias(sq, "Students"), "stud");
    }

    #[test]
    fn test_pk_only_reference_reuses_parent_columns() {
        let schema = schema();
        let mut arena = Arena::new(27);
        let sq = arena.new_subquery(None, false);
        let s = arena.add_root(sq, "s", "Student");
        arena.make_join(&schema, s, false).unwrap();
        let g = arena.add_joined(sq, "s-group", s, AttrRef::new("Student", "group"), "Group");

        let (alias, cols) = arena.make_join(&schema, g, true).unwrap();
        assert_eq!((alias.as_str(), cols), ("s", vec!["group".to_string()]));
        assert_eq!(arena.subquery(sq).from.items.len(), 1);

        let (alias, cols) = arena.make_join(&schema, g, false).unwrap();
        assert_eq!((alias.as_str(), cols), ("group", vec!["number".to_string()]));
        let items = &arena.subquery(sq).from.items;
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[1].on,
            Some(SqlExpr::eq(
                SqlExpr::column("s", "group"),
                SqlExpr::column("group", "number")
            ))
        );
    }

    #[test]
    fn test_many_to_many_goes_through_intermediate_table() {
        let schema = schema();
        let mut arena = Arena::new(27);
        let sq = arena.new_subquery(None, false);
        let s = arena.add_root(sq, "s", "Student");
        arena.make_join(&schema, s, false).unwrap();
        let c = arena.add_joined(sq, "c", s, AttrRef::new("Student", "courses"), "Course");
        let (alias, _) = arena.make_join(&schema, c, false).unwrap();
        assert_eq!(alias, "c");
        let aliases: Vec<_> = arena
            .subquery(sq)
            .from
            .items
            .iter()
            .map(|i| i.alias.clone().unwrap())
            .collect();
        assert_eq!(aliases, vec!["s", "t-1", "c"]);
    }

    #[test]
    fn test_lookup_from_nested_subquery_marks_root() {
        let mut arena = Arena::new(27);
        let sq = arena.new_subquery(None, false);
        arena.add_root(sq, "s", "Student");
        let nested = arena.new_subquery(Some(sq), false);
        assert!(arena.get_tableref(nested, "s").is_some());
        assert!(arena.subquery(sq).used_from_subquery);
        assert!(arena.get_tableref(nested, "x").is_none());
    }
}
