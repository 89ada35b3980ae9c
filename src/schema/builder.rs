//! Declarative schema construction.
//!
//! ```
//! use gensql::schema::SchemaBuilder;
//! use gensql::types::CanonicalType;
//!
//! let schema = SchemaBuilder::new()
//!     .entity("Group", |e| {
//!         e.pk("number", CanonicalType::INT)
//!             .set("students", "Student", "group")
//!     })
//!     .entity("Student", |e| {
//!         e.pk("id", CanonicalType::INT)
//!             .required("name", CanonicalType::Text)
//!             .reference("group", "Group", "students")
//!     })
//!     .build()
//!     .unwrap();
//! assert_eq!(schema.entity("Student").unwrap().attr("group").unwrap().columns, ["group"]);
//! ```

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{next_schema_id, Attr, AttrKind, Entity, Schema, DISCRIMINATOR_COLUMN};
use crate::types::CanonicalType;

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Invalid schema declaration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("{0:?} is not a valid identifier")]
    InvalidName(String),

    #[error("Entity {0} is declared twice")]
    DuplicateEntity(String),

    #[error("Attribute {entity}.{attr} is declared twice")]
    DuplicateAttr { entity: String, attr: String },

    #[error("Entity {entity} references unknown entity {target}")]
    UnknownEntity { entity: String, target: String },

    #[error("Entity {0} has no primary key")]
    MissingPrimaryKey(String),

    #[error("Entity {0} inherits its primary key and cannot declare one")]
    InheritedPrimaryKey(String),

    #[error("Inheritance cycle through entity {0}")]
    InheritanceCycle(String),

    #[error("Reverse attribute {target}.{reverse} of {entity}.{attr} is missing or does not point back")]
    BadReverse {
        entity: String,
        attr: String,
        target: String,
        reverse: String,
    },

    #[error("Invalid relation {entity}.{attr}: {message}")]
    BadRelation {
        entity: String,
        attr: String,
        message: String,
    },
}

#[derive(Debug, Clone)]
enum DeclKind {
    Scalar(CanonicalType),
    /// A reference; `owns_columns` is false for the column-less side of a
    /// one-to-one relation.
    Reference {
        target: String,
        owns_columns: bool,
    },
    Set(String),
}

#[derive(Debug, Clone)]
struct AttrDecl {
    name: String,
    kind: DeclKind,
    optional: bool,
    lazy: bool,
    pk: bool,
    reverse: Option<String>,
}

/// Declares the attributes of one entity.
#[derive(Debug, Clone, Default)]
pub struct EntityBuilder {
    name: String,
    table: Option<String>,
    base: Option<String>,
    attrs: Vec<AttrDecl>,
}

impl EntityBuilder {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    fn push(mut self, name: &str, kind: DeclKind, optional: bool) -> Self {
        self.attrs.push(AttrDecl {
            name: name.to_string(),
            kind,
            optional,
            lazy: false,
            pk: false,
            reverse: None,
        });
        self
    }

    fn relation(mut self, name: &str, kind: DeclKind, optional: bool, reverse: &str) -> Self {
        self = self.push(name, kind, optional);
        if let Some(attr) = self.attrs.last_mut() {
            attr.reverse = Some(reverse.to_string());
        }
        self
    }

    /// Backing table name; defaults to the entity name.
    pub fn table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    /// Single-table inheritance from `base`.
    pub fn extends(mut self, base: &str) -> Self {
        self.base = Some(base.to_string());
        self
    }

    /// A primary-key attribute. Repeated calls declare a composite key.
    pub fn pk(mut self, name: &str, ty: CanonicalType) -> Self {
        self = self.push(name, DeclKind::Scalar(ty), false);
        if let Some(attr) = self.attrs.last_mut() {
            attr.pk = true;
        }
        self
    }

    /// A reference that is part of the primary key.
    pub fn pk_reference(mut self, name: &str, target: &str, reverse: &str) -> Self {
        let kind = DeclKind::Reference {
            target: target.to_string(),
            owns_columns: true,
        };
        self = self.relation(name, kind, false, reverse);
        if let Some(attr) = self.attrs.last_mut() {
            attr.pk = true;
        }
        self
    }

    pub fn required(self, name: &str, ty: CanonicalType) -> Self {
        self.push(name, DeclKind::Scalar(ty), false)
    }

    pub fn optional(self, name: &str, ty: CanonicalType) -> Self {
        self.push(name, DeclKind::Scalar(ty), true)
    }

    /// An optional attribute left out of default entity selects.
    pub fn lazy(mut self, name: &str, ty: CanonicalType) -> Self {
        self = self.push(name, DeclKind::Scalar(ty), true);
        if let Some(attr) = self.attrs.last_mut() {
            attr.lazy = true;
        }
        self
    }

    /// A required reference holding foreign-key columns.
    pub fn reference(self, name: &str, target: &str, reverse: &str) -> Self {
        let kind = DeclKind::Reference {
            target: target.to_string(),
            owns_columns: true,
        };
        self.relation(name, kind, false, reverse)
    }

    /// An optional reference holding foreign-key columns.
    pub fn optional_reference(self, name: &str, target: &str, reverse: &str) -> Self {
        let kind = DeclKind::Reference {
            target: target.to_string(),
            owns_columns: true,
        };
        self.relation(name, kind, true, reverse)
    }

    /// The column-less side of a one-to-one relation.
    pub fn one_to_one(self, name: &str, target: &str, reverse: &str) -> Self {
        let kind = DeclKind::Reference {
            target: target.to_string(),
            owns_columns: false,
        };
        self.relation(name, kind, true, reverse)
    }

    /// A to-many collection.
    pub fn set(self, name: &str, target: &str, reverse: &str) -> Self {
        self.relation(name, DeclKind::Set(target.to_string()), true, reverse)
    }
}

/// Collects entity declarations and resolves them into a [`Schema`].
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    entities: Vec<EntityBuilder>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(mut self, name: &str, declare: impl FnOnce(EntityBuilder) -> EntityBuilder) -> Self {
        self.entities.push(declare(EntityBuilder::new(name)));
        self
    }

    pub fn build(self) -> Result<Schema, SchemaError> {
        Resolver::new(self.entities)?.resolve()
    }
}

struct Resolver {
    decls: IndexMap<String, EntityBuilder>,
    roots: HashMap<String, String>,
    /// Declarations in base-before-derived order.
    order: Vec<String>,
    pk_columns: HashMap<String, Vec<String>>,
}

impl Resolver {
    fn new(entities: Vec<EntityBuilder>) -> Result<Self, SchemaError> {
        let mut decls = IndexMap::new();
        for entity in entities {
            let name = entity.name.clone();
            if !IDENTIFIER.is_match(&name) {
                return Err(SchemaError::InvalidName(name));
            }
            let mut seen = HashSet::new();
            for attr in &entity.attrs {
                if !IDENTIFIER.is_match(&attr.name) {
                    return Err(SchemaError::InvalidName(attr.name.clone()));
                }
                if !seen.insert(attr.name.clone()) {
                    return Err(SchemaError::DuplicateAttr {
                        entity: name,
                        attr: attr.name.clone(),
                    });
                }
            }
            if decls.insert(name.clone(), entity).is_some() {
                return Err(SchemaError::DuplicateEntity(name));
            }
        }
        Ok(Self {
            decls,
            roots: HashMap::new(),
            order: Vec::new(),
            pk_columns: HashMap::new(),
        })
    }

    fn resolve(mut self) -> Result<Schema, SchemaError> {
        self.resolve_hierarchy()?;
        self.check_targets()?;
        let names: Vec<String> = self.order.clone();
        for name in &names {
            let root = self.roots[name].clone();
            let columns = self.pk_columns_of(&root, &mut Vec::new())?;
            self.pk_columns.insert(name.clone(), columns);
        }

        let mut entities: IndexMap<String, Entity> = IndexMap::new();
        for name in &names {
            let entity = self.build_entity(name, &entities)?;
            entities.insert(name.clone(), entity);
        }
        self.link_relations(&mut entities)?;

        // Keep declaration order for iteration.
        let mut ordered = IndexMap::new();
        for name in self.decls.keys() {
            if let Some(entity) = entities.shift_remove(name) {
                ordered.insert(name.clone(), entity);
            }
        }
        Ok(Schema {
            id: next_schema_id(),
            entities: ordered,
        })
    }

    fn resolve_hierarchy(&mut self) -> Result<(), SchemaError> {
        for name in self.decls.keys() {
            let mut current = name.clone();
            let mut steps = 0;
            while let Some(base) = self.decls[&current].base.clone() {
                if !self.decls.contains_key(&base) {
                    return Err(SchemaError::UnknownEntity {
                        entity: current,
                        target: base,
                    });
                }
                steps += 1;
                if steps > self.decls.len() {
                    return Err(SchemaError::InheritanceCycle(name.clone()));
                }
                current = base;
            }
            self.roots.insert(name.clone(), current);
        }
        let mut placed: HashSet<String> = HashSet::new();
        while self.order.len() < self.decls.len() {
            for (name, decl) in &self.decls {
                if placed.contains(name) {
                    continue;
                }
                let ready = decl.base.as_ref().map_or(true, |b| placed.contains(b));
                if ready {
                    placed.insert(name.clone());
                    self.order.push(name.clone());
                }
            }
        }
        for (name, decl) in &self.decls {
            let declares_pk = decl.attrs.iter().any(|a| a.pk);
            if decl.base.is_some() && declares_pk {
                return Err(SchemaError::InheritedPrimaryKey(name.clone()));
            }
            if decl.base.is_none() && !declares_pk {
                return Err(SchemaError::MissingPrimaryKey(name.clone()));
            }
        }
        Ok(())
    }

    fn check_targets(&self) -> Result<(), SchemaError> {
        for (name, decl) in &self.decls {
            for attr in &decl.attrs {
                let target = match &attr.kind {
                    DeclKind::Reference { target, .. } | DeclKind::Set(target) => target,
                    DeclKind::Scalar(_) => continue,
                };
                if !self.decls.contains_key(target) {
                    return Err(SchemaError::UnknownEntity {
                        entity: name.clone(),
                        target: target.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Primary-key columns of a root entity, following pk references.
    fn pk_columns_of(&self, root: &str, visiting: &mut Vec<String>) -> Result<Vec<String>, SchemaError> {
        if visiting.iter().any(|v| v == root) {
            return Err(SchemaError::BadRelation {
                entity: root.to_string(),
                attr: "<pk>".into(),
                message: "primary key references itself".into(),
            });
        }
        visiting.push(root.to_string());
        let mut columns = Vec::new();
        for attr in self.decls[root].attrs.iter().filter(|a| a.pk) {
            match &attr.kind {
                DeclKind::Scalar(_) => columns.push(attr.name.clone()),
                DeclKind::Reference { target, .. } => {
                    let target_root = self.roots[target].clone();
                    let target_pk = self.pk_columns_of(&target_root, visiting)?;
                    columns.extend(fk_columns(&attr.name, &target_pk));
                }
                DeclKind::Set(_) => {
                    return Err(SchemaError::BadRelation {
                        entity: root.to_string(),
                        attr: attr.name.clone(),
                        message: "a collection cannot be part of the primary key".into(),
                    })
                }
            }
        }
        visiting.pop();
        Ok(columns)
    }

    fn build_entity(&self, name: &str, built: &IndexMap<String, Entity>) -> Result<Entity, SchemaError> {
        let decl = &self.decls[name];
        let root = self.roots[name].clone();
        let mut attrs = match &decl.base {
            Some(base) => built[base].attrs.clone(),
            None => IndexMap::new(),
        };
        let mut pk = match &decl.base {
            Some(base) => built[base].pk.clone(),
            None => Vec::new(),
        };
        let mut pk_offset = 0;
        for attr in &decl.attrs {
            if attrs.contains_key(&attr.name) {
                return Err(SchemaError::DuplicateAttr {
                    entity: name.to_string(),
                    attr: attr.name.clone(),
                });
            }
            let (kind, columns) = match &attr.kind {
                DeclKind::Scalar(ty) => (AttrKind::Scalar(ty.clone()), vec![attr.name.clone()]),
                DeclKind::Reference {
                    target,
                    owns_columns,
                } => {
                    let columns = if *owns_columns {
                        fk_columns(&attr.name, &self.pk_columns[target])
                    } else {
                        Vec::new()
                    };
                    (AttrKind::Reference(target.clone()), columns)
                }
                DeclKind::Set(target) => (AttrKind::Set(target.clone()), Vec::new()),
            };
            let offset = if attr.pk {
                pk.push(attr.name.clone());
                let offset = pk_offset;
                pk_offset += columns.len();
                Some(offset)
            } else {
                None
            };
            attrs.insert(
                attr.name.clone(),
                Attr {
                    name: attr.name.clone(),
                    owner: name.to_string(),
                    kind,
                    columns,
                    optional: attr.optional,
                    lazy: attr.lazy,
                    is_pk: attr.pk,
                    pk_offset: offset,
                    reverse: attr.reverse.clone(),
                    m2m_table: None,
                },
            );
        }

        let table = self.decls[&root]
            .table
            .clone()
            .unwrap_or_else(|| root.clone());
        let subclasses = self.descendants(name);
        let in_hierarchy = !self.descendants(&root).is_empty();
        Ok(Entity {
            name: name.to_string(),
            table,
            base: decl.base.clone(),
            root,
            subclasses,
            attrs,
            pk,
            discriminator: in_hierarchy.then(|| DISCRIMINATOR_COLUMN.to_string()),
        })
    }

    fn descendants(&self, name: &str) -> Vec<String> {
        let mut out = Vec::new();
        for candidate in &self.order {
            let mut current = self.decls[candidate].base.clone();
            while let Some(base) = current {
                if base == name {
                    out.push(candidate.clone());
                    break;
                }
                current = self.decls[&base].base.clone();
            }
        }
        out
    }

    fn link_relations(&self, entities: &mut IndexMap<String, Entity>) -> Result<(), SchemaError> {
        let mut m2m: Vec<(String, String, String, Vec<String>)> = Vec::new();
        for entity in entities.values() {
            for attr in entity.attrs.values().filter(|a| a.owner == entity.name) {
                let (Some(target), Some(reverse_name)) = (attr.target(), attr.reverse.as_deref())
                else {
                    continue;
                };
                let bad_reverse = || SchemaError::BadReverse {
                    entity: entity.name.clone(),
                    attr: attr.name.clone(),
                    target: target.to_string(),
                    reverse: reverse_name.to_string(),
                };
                let reverse = entities[target].attr(reverse_name).ok_or_else(bad_reverse)?;
                let points_back = reverse.reverse.as_deref() == Some(attr.name.as_str())
                    && reverse
                        .target()
                        .is_some_and(|t| self.roots.get(t) == self.roots.get(&entity.name));
                if !points_back {
                    return Err(bad_reverse());
                }
                match (&attr.kind, &reverse.kind) {
                    (AttrKind::Reference(_), AttrKind::Reference(_))
                        if attr.columns.is_empty() == reverse.columns.is_empty() =>
                    {
                        return Err(SchemaError::BadRelation {
                            entity: entity.name.clone(),
                            attr: attr.name.clone(),
                            message: "exactly one side of a one-to-one relation must hold columns"
                                .into(),
                        });
                    }
                    (AttrKind::Set(_), AttrKind::Set(_)) => {
                        let table = m2m_table_name(&entity.name, target);
                        let self_reference = entity.name == target;
                        let target_root = &self.roots[target];
                        let mut columns = m2m_columns(target, &self.pk_columns[target_root]);
                        if self_reference && attr.name > reverse.name {
                            columns = columns.into_iter().map(|c| format!("{}_2", c)).collect();
                        }
                        m2m.push((entity.name.clone(), attr.name.clone(), table, columns));
                    }
                    _ => {}
                }
            }
        }
        for (entity_name, attr_name, table, columns) in m2m {
            let holders: Vec<String> = entities
                .values()
                .filter(|e| e.attrs.get(&attr_name).is_some_and(|a| a.owner == entity_name))
                .map(|e| e.name.clone())
                .collect();
            for holder in holders {
                if let Some(attr) = entities
                    .get_mut(&holder)
                    .and_then(|e| e.attrs.get_mut(&attr_name))
                {
                    attr.m2m_table = Some(table.clone());
                    attr.columns = columns.clone();
                }
            }
        }
        Ok(())
    }
}

/// Foreign-key column names: `<attr>` for a single-column key, otherwise
/// `<attr>_<pkcol>`.
fn fk_columns(attr: &str, target_pk: &[String]) -> Vec<String> {
    match target_pk {
        [_] => vec![attr.to_string()],
        cols => cols.iter().map(|c| format!("{}_{}", attr, c)).collect(),
    }
}

fn m2m_table_name(a: &str, b: &str) -> String {
    let mut names = [a, b];
    names.sort();
    format!("{}_{}", names[0], names[1])
}

fn m2m_columns(entity: &str, pk: &[String]) -> Vec<String> {
    let prefix = entity.to_lowercase();
    match pk {
        [_] => vec![prefix],
        cols => cols.iter().map(|c| format!("{}_{}", prefix, c)).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn university() -> Schema {
        SchemaBuilder::new()
            .entity("Group", |e| {
                e.pk("number", CanonicalType::INT)
                    .required("major", CanonicalType::Text)
                    .set("students", "Student", "group")
            })
            .entity("Student", |e| {
                e.pk("id", CanonicalType::INT)
                    .required("name", CanonicalType::Text)
                    .optional("gpa", CanonicalType::FLOAT)
                    .lazy("picture", CanonicalType::Binary)
                    .reference("group", "Group", "students")
                    .set("courses", "Course", "students")
            })
            .entity("Course", |e| {
                e.pk("name", CanonicalType::Text)
                    .pk("semester", CanonicalType::INT)
                    .set("students", "Student", "courses")
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_foreign_key_columns() {
        let schema = university();
        let student = schema.entity("Student").unwrap();
        assert_eq!(student.attr("group").unwrap().columns, ["group"]);
        assert_eq!(student.pk_columns(), ["id"]);
        assert!(student.attr("picture").unwrap().lazy);
        assert!(student.attr("gpa").unwrap().nullable());
    }

    #[test]
    fn test_many_to_many_table_and_columns() {
        let schema = university();
        let courses = schema.entity("Student").unwrap().attr("courses").unwrap();
        assert_eq!(courses.m2m_table.as_deref(), Some("Course_Student"));
        assert_eq!(courses.columns, ["course_name", "course_semester"]);
        let students = schema.entity("Course").unwrap().attr("students").unwrap();
        assert_eq!(students.m2m_table.as_deref(), Some("Course_Student"));
        assert_eq!(students.columns, ["student"]);
    }

    #[test]
    fn test_single_table_inheritance() {
        let schema = SchemaBuilder::new()
            .entity("Person", |e| {
                e.pk("id", CanonicalType::INT)
                    .required("name", CanonicalType::Text)
            })
            .entity("Teacher", |e| e.extends("Person").optional("degree", CanonicalType::Text))
            .entity("Professor", |e| e.extends("Teacher"))
            .build()
            .unwrap();
        let teacher = schema.entity("Teacher").unwrap();
        assert_eq!(teacher.table, "Person");
        assert_eq!(teacher.root, "Person");
        assert_eq!(teacher.pk, ["id"]);
        assert_eq!(teacher.attrs.keys().collect::<Vec<_>>(), ["id", "name", "degree"]);
        assert_eq!(
            schema.discriminator_values(teacher).unwrap(),
            ["Professor", "Teacher"]
        );
        assert_eq!(
            schema.entity("Person").unwrap().discriminator.as_deref(),
            Some("classtype")
        );
    }

    #[test]
    fn test_one_to_one_needs_one_column_side() {
        let ok = SchemaBuilder::new()
            .entity("Person", |e| {
                e.pk("id", CanonicalType::INT)
                    .one_to_one("passport", "Passport", "owner")
            })
            .entity("Passport", |e| {
                e.pk("id", CanonicalType::INT)
                    .optional_reference("owner", "Person", "passport")
            })
            .build();
        assert!(ok.is_ok());

        let err = SchemaBuilder::new()
            .entity("Person", |e| {
                e.pk("id", CanonicalType::INT)
                    .optional_reference("passport", "Passport", "owner")
            })
            .entity("Passport", |e| {
                e.pk("id", CanonicalType::INT)
                    .optional_reference("owner", "Person", "passport")
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::BadRelation { .. }));
    }

    #[test]
    fn test_reverse_must_point_back() {
        let err = SchemaBuilder::new()
            .entity("Group", |e| {
                e.pk("number", CanonicalType::INT)
                    .set("students", "Student", "team")
            })
            .entity("Student", |e| {
                e.pk("id", CanonicalType::INT)
                    .reference("group", "Group", "students")
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::BadReverse { .. }));
    }

    #[test]
    fn test_missing_pk_and_unknown_target() {
        let err = SchemaBuilder::new()
            .entity("Thing", |e| e.required("x", CanonicalType::INT))
            .build()
            .unwrap_err();
        assert_eq!(err, SchemaError::MissingPrimaryKey("Thing".into()));

        let err = SchemaBuilder::new()
            .entity("Thing", |e| {
                e.pk("id", CanonicalType::INT)
                    .reference("owner", "Nobody", "things")
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownEntity { .. }));
    }

    #[test]
    fn test_composite_pk_reference_columns() {
        let schema = SchemaBuilder::new()
            .entity("Course", |e| {
                e.pk("name", CanonicalType::Text)
                    .pk("semester", CanonicalType::INT)
                    .set("lessons", "Lesson", "course")
            })
            .entity("Lesson", |e| {
                e.pk_reference("course", "Course", "lessons")
                    .pk("number", CanonicalType::INT)
            })
            .build()
            .unwrap();
        let lesson = schema.entity("Lesson").unwrap();
        assert_eq!(
            lesson.pk_columns(),
            ["course_name", "course_semester", "number"]
        );
        assert_eq!(lesson.attr("number").unwrap().pk_offset, Some(2));
        assert_eq!(lesson.attr("course").unwrap().pk_offset, Some(0));
    }

    #[test]
    fn test_names_must_be_identifiers() {
        let err = SchemaBuilder::new()
            .entity("Student", |e| e.pk("student id", CanonicalType::INT))
            .build()
            .unwrap_err();
        assert_eq!(err, SchemaError::InvalidName("student id".into()));
    }

    #[test]
    fn test_schema_ids_are_unique() {
        assert_ne!(university().id(), university().id());
    }
}
