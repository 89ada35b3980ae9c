//! Entity and attribute metadata.
//!
//! The translator reads, but never mutates, this model: backing tables and
//! columns, relationship reverses, primary keys and inheritance
//! discriminators. Schemas are declared with [`SchemaBuilder`].

mod builder;

pub use builder::{EntityBuilder, SchemaBuilder, SchemaError};

use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use crate::types::{CanonicalType, EntityRef};

/// Name of the discriminator column of single-table hierarchies.
pub const DISCRIMINATOR_COLUMN: &str = "classtype";

static NEXT_SCHEMA_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_schema_id() -> u64 {
    NEXT_SCHEMA_ID.fetch_add(1, Ordering::Relaxed)
}

/// A set of related entities.
#[derive(Debug, Clone)]
pub struct Schema {
    id: u64,
    entities: IndexMap<String, Entity>,
}

impl Schema {
    /// Process-unique id; entities of different schemas never mix.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.get(name)
    }

    /// Entity behind a handle, if the handle belongs to this schema.
    pub fn resolve(&self, entity: &EntityRef) -> Option<&Entity> {
        if entity.schema != self.id {
            return None;
        }
        self.entities.get(&entity.name)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn entity_ref(&self, name: &str) -> Option<EntityRef> {
        self.entity(name)
            .map(|e| EntityRef::new(self.id, e.name.clone(), e.root.clone()))
    }

    /// Canonical type of an attribute value as seen by expressions.
    pub fn attr_type(&self, attr: &Attr) -> CanonicalType {
        match &attr.kind {
            AttrKind::Scalar(ty) => ty.clone(),
            AttrKind::Reference(target) => self
                .entity_ref(target)
                .map(CanonicalType::Entity)
                .unwrap_or(CanonicalType::Null),
            AttrKind::Set(target) => self
                .entity_ref(target)
                .map(|e| CanonicalType::set_of(CanonicalType::Entity(e)))
                .unwrap_or(CanonicalType::Null),
        }
    }

    /// Reverse attribute of a relationship.
    pub fn reverse_of(&self, attr: &Attr) -> Option<&Attr> {
        let reverse = attr.reverse.as_deref()?;
        self.entity(attr.target()?)?.attr(reverse)
    }

    /// `classtype IN (...)` values selecting an entity and its subclasses.
    pub fn discriminator_values(&self, entity: &Entity) -> Option<Vec<String>> {
        entity.discriminator.as_ref()?;
        let mut values = entity.subclasses.clone();
        values.push(entity.name.clone());
        Some(values)
    }
}

/// A mapped entity class.
#[derive(Debug, Clone)]
pub struct Entity {
    pub name: String,
    pub table: String,
    pub base: Option<String>,
    pub root: String,
    /// Every direct and indirect subclass.
    pub subclasses: Vec<String>,
    /// Attributes including inherited ones, base attributes first.
    pub attrs: IndexMap<String, Attr>,
    /// Primary-key attribute names.
    pub pk: Vec<String>,
    /// Discriminator column, set for every entity of a hierarchy.
    pub discriminator: Option<String>,
}

impl Entity {
    pub fn attr(&self, name: &str) -> Option<&Attr> {
        self.attrs.get(name)
    }

    pub fn pk_attrs(&self) -> impl Iterator<Item = &Attr> {
        self.pk.iter().filter_map(|name| self.attrs.get(name))
    }

    pub fn pk_columns(&self) -> Vec<String> {
        self.pk_attrs()
            .flat_map(|attr| attr.columns.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrKind {
    Scalar(CanonicalType),
    Reference(String),
    Set(String),
}

/// An entity attribute.
#[derive(Debug, Clone)]
pub struct Attr {
    pub name: String,
    /// Entity that declares the attribute.
    pub owner: String,
    pub kind: AttrKind,
    /// Backing columns. For many-to-many sets: the intermediate-table
    /// columns referencing the target.
    pub columns: Vec<String>,
    pub optional: bool,
    pub lazy: bool,
    pub is_pk: bool,
    /// Offset of this attribute's columns inside the owner's pk columns.
    pub pk_offset: Option<usize>,
    pub reverse: Option<String>,
    /// Intermediate table of a many-to-many relation.
    pub m2m_table: Option<String>,
}

impl Attr {
    pub fn is_collection(&self) -> bool {
        matches!(self.kind, AttrKind::Set(_))
    }

    pub fn is_relation(&self) -> bool {
        !matches!(self.kind, AttrKind::Scalar(_))
    }

    pub fn target(&self) -> Option<&str> {
        match &self.kind {
            AttrKind::Reference(t) | AttrKind::Set(t) => Some(t),
            AttrKind::Scalar(_) => None,
        }
    }

    /// Nullable in SQL: optional, or a reference without own columns.
    pub fn nullable(&self) -> bool {
        self.optional || (self.columns.is_empty() && !self.is_collection())
    }
}
