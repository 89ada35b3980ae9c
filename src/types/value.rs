//! Runtime values of external parameters.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{NaiveDate, NaiveDateTime};

use super::{Builtin, CanonicalType, EntityRef, NumericKind};

/// A loaded entity instance, identified by its primary key.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityValue {
    pub entity: EntityRef,
    pub pk: Vec<Value>,
    /// Attribute values known to the caller, readable from getters.
    pub attrs: BTreeMap<String, Value>,
}

impl EntityValue {
    pub fn new(entity: EntityRef, pk: Vec<Value>) -> Self {
        Self {
            entity,
            pk,
            attrs: BTreeMap::new(),
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }
}

/// Value of an external expression evaluated in the caller's scope.
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Decimal digits kept verbatim.
    Decimal(String),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Bytes(Vec<u8>),
    Entity(EntityValue),
    /// An entity class, iterable inside a query.
    EntitySet(EntityRef),
    Function(Builtin),
    Tuple(Vec<Value>),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
}

impl Value {
    pub fn tuple(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Tuple(items.into_iter().collect())
    }

    pub fn decimal(digits: impl Into<String>) -> Self {
        Value::Decimal(digits.into())
    }

    /// Host type name used in diagnostics.
    pub fn type_name(&self) -> String {
        match self {
            Value::None => "NoneType".into(),
            Value::Bool(_) => "bool".into(),
            Value::Int(_) => "int".into(),
            Value::Float(_) => "float".into(),
            Value::Decimal(_) => "Decimal".into(),
            Value::Text(_) => "str".into(),
            Value::Date(_) => "date".into(),
            Value::DateTime(_) => "datetime".into(),
            Value::Bytes(_) => "bytes".into(),
            Value::Entity(e) => e.entity.name.clone(),
            Value::EntitySet(_) => "EntityMeta".into(),
            Value::Function(_) => "function".into(),
            Value::Tuple(_) => "tuple".into(),
            Value::List(_) => "list".into(),
            Value::Map(_) => "dict".into(),
        }
    }

    /// Canonical type of this value.
    ///
    /// Lists are treated as fixed-size tuples. Dicts are rejected with their
    /// type name.
    pub fn canonical_type(&self) -> Result<CanonicalType, String> {
        Ok(match self {
            Value::None => CanonicalType::Null,
            Value::Bool(_) => CanonicalType::Numeric(NumericKind::Bool),
            Value::Int(_) => CanonicalType::Numeric(NumericKind::Int),
            Value::Float(_) => CanonicalType::Numeric(NumericKind::Float),
            Value::Decimal(_) => CanonicalType::Numeric(NumericKind::Decimal),
            Value::Text(_) => CanonicalType::Text,
            Value::Date(_) => CanonicalType::Date,
            Value::DateTime(_) => CanonicalType::DateTime,
            Value::Bytes(_) => CanonicalType::Binary,
            Value::Entity(e) => CanonicalType::Entity(e.entity.clone()),
            Value::EntitySet(e) => CanonicalType::set_of(CanonicalType::Entity(e.clone())),
            Value::Function(b) => CanonicalType::Function(*b),
            Value::Tuple(items) | Value::List(items) => CanonicalType::Tuple(
                items
                    .iter()
                    .map(Value::canonical_type)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Map(_) => return Err(self.type_name()),
        })
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Items of a tuple or list value.
    pub fn items(&self) -> Option<&[Value]> {
        match self {
            Value::Tuple(items) | Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Python-style truthiness.
    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Decimal(d) => !d.trim_start_matches(['-', '+', '0', '.']).is_empty(),
            Value::Text(s) => !s.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
            Value::Tuple(items) | Value::List(items) => !items.is_empty(),
            Value::Map(items) => !items.is_empty(),
            _ => true,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (None, None) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Decimal(a), Decimal(b)) => a == b,
            (Text(a), Text(b)) => a == b,
            (Date(a), Date(b)) => a == b,
            (DateTime(a), DateTime(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (Entity(a), Entity(b)) => a.entity == b.entity && a.pk == b.pk,
            (EntitySet(a), EntitySet(b)) => a == b,
            (Function(a), Function(b)) => a == b,
            (Tuple(a), Tuple(b)) | (List(a), List(b)) => a == b,
            (Map(a), Map(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::None => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Decimal(d) => d.hash(state),
            Value::Text(s) => s.hash(state),
            Value::Date(d) => d.hash(state),
            Value::DateTime(d) => d.hash(state),
            Value::Bytes(b) => b.hash(state),
            Value::Entity(e) => {
                e.entity.hash(state);
                e.pk.hash(state);
            }
            Value::EntitySet(e) => e.hash(state),
            Value::Function(b) => b.hash(state),
            Value::Tuple(items) | Value::List(items) => items.hash(state),
            Value::Map(items) => items.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", ryu::Buffer::new().format(*x)),
            Value::Decimal(d) => write!(f, "Decimal('{}')", d),
            Value::Text(s) => write!(f, "{:?}", s),
            Value::Date(d) => write!(f, "{}", d),
            Value::DateTime(d) => write!(f, "{}", d),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Entity(e) => {
                write!(f, "{}[", e.entity.name)?;
                for (i, v) in e.pk.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::EntitySet(e) => write!(f, "{}", e.name),
            Value::Function(b) => write!(f, "{}", b.name()),
            Value::Tuple(items) | Value::List(items) => {
                write!(f, "(")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, ")")
            }
            Value::Map(items) => write!(f, "{{{} items}}", items.len()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl From<EntityValue> for Value {
    fn from(v: EntityValue) -> Self {
        Value::Entity(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::None, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_is_tuple_of_item_types() {
        let v = Value::List(vec![Value::from("A"), Value::from(2)]);
        assert_eq!(
            v.canonical_type().unwrap(),
            CanonicalType::Tuple(vec![CanonicalType::Text, CanonicalType::INT])
        );
    }

    #[test]
    fn test_dict_is_rejected() {
        let v = Value::Map(vec![(Value::from("a"), Value::from(1))]);
        assert_eq!(v.canonical_type().unwrap_err(), "dict");
    }

    #[test]
    fn test_float_hash_eq_by_bits() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(Value::Float(3.0));
        assert!(set.contains(&Value::Float(3.0)));
        assert!(!set.contains(&Value::Int(3)));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::None.truthy());
        assert!(!Value::decimal("0.00").truthy());
        assert!(Value::decimal("0.5").truthy());
        assert!(Value::from("x").truthy());
        assert!(!Value::Tuple(vec![]).truthy());
    }
}
