//! Shape of result rows.

use std::ops::Range;

use serde::Serialize;

use crate::error::{TranslateError, TranslateResult};
use crate::schema::Schema;
use crate::types::{CanonicalType, EntityValue, Value};

/// An attribute of an entity row and the columns holding it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttrSlot {
    pub name: String,
    pub offsets: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum OutputKind {
    Value(CanonicalType),
    /// Primary-key columns of an entity.
    Entity(String),
}

/// One element of a projected row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputColumn {
    /// Source text of the expression, used as the column name.
    pub name: String,
    pub kind: OutputKind,
    pub offsets: Range<usize>,
}

/// How to turn a fetched row into a result value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RowLayout {
    /// Rows are entity instances.
    Entity {
        entity: String,
        attrs: Vec<AttrSlot>,
        discriminator: Option<usize>,
    },
    /// Rows are single values or tuples of expression results.
    Columns(Vec<OutputColumn>),
    /// One aggregate value.
    Scalar,
}

impl RowLayout {
    /// Number of columns a row carries.
    pub fn width(&self) -> usize {
        match self {
            RowLayout::Entity {
                attrs,
                discriminator,
                ..
            } => {
                let end = attrs.iter().map(|a| a.offsets.end).max().unwrap_or(0);
                end.max(discriminator.map_or(0, |d| d + 1))
            }
            RowLayout::Columns(columns) => columns.iter().map(|c| c.offsets.end).max().unwrap_or(0),
            RowLayout::Scalar => 1,
        }
    }

    pub fn col_names(&self) -> Vec<String> {
        match self {
            RowLayout::Entity { attrs, .. } => attrs.iter().map(|a| a.name.clone()).collect(),
            RowLayout::Columns(columns) => columns.iter().map(|c| c.name.clone()).collect(),
            RowLayout::Scalar => Vec::new(),
        }
    }

    /// Convert one fetched row.
    ///
    /// Entities come back as [`Value::Entity`] with their primary key and
    /// loaded attributes; a projection of several expressions becomes a
    /// tuple. An entity whose key contains NULL decodes to `None`.
    pub fn decode(&self, schema: &Schema, row: &[Value]) -> TranslateResult<Value> {
        if row.len() < self.width() {
            return Err(TranslateError::Execution(format!(
                "Expected {} columns, got {}",
                self.width(),
                row.len()
            )));
        }
        match self {
            RowLayout::Entity {
                entity,
                attrs,
                discriminator,
            } => {
                let class = match discriminator.and_then(|d| row[d].as_str()) {
                    Some(name) if schema.entity(name).is_some() => name,
                    _ => entity.as_str(),
                };
                let Some(value) = entity_value(schema, class, attrs, row)? else {
                    return Ok(Value::None);
                };
                Ok(Value::Entity(value))
            }
            RowLayout::Columns(columns) => {
                let mut values = Vec::with_capacity(columns.len());
                for column in columns {
                    values.push(match &column.kind {
                        OutputKind::Value(_) => row[column.offsets.start].clone(),
                        OutputKind::Entity(name) => {
                            let slot = AttrSlot {
                                name: String::new(),
                                offsets: column.offsets.clone(),
                            };
                            entity_key(schema, name, &slot, row)?
                        }
                    });
                }
                if values.len() == 1 {
                    Ok(values.remove(0))
                } else {
                    Ok(Value::Tuple(values))
                }
            }
            RowLayout::Scalar => Ok(row[0].clone()),
        }
    }
}

fn entity_value(
    schema: &Schema,
    name: &str,
    attrs: &[AttrSlot],
    row: &[Value],
) -> TranslateResult<Option<EntityValue>> {
    let entity = schema
        .entity(name)
        .ok_or_else(|| TranslateError::translation(format!("Unknown entity {}", name)))?;
    let entity_ref = schema
        .entity_ref(name)
        .ok_or_else(|| TranslateError::translation(format!("Unknown entity {}", name)))?;
    let mut pk = Vec::new();
    for pk_name in &entity.pk {
        let slot = attrs
            .iter()
            .find(|a| &a.name == pk_name)
            .ok_or_else(|| TranslateError::translation(format!("Row has no key column {}", pk_name)))?;
        pk.extend(row[slot.offsets.clone()].iter().cloned());
    }
    if pk.iter().any(Value::is_none) {
        return Ok(None);
    }
    let mut value = EntityValue::new(entity_ref, pk);
    for slot in attrs {
        let attr_value = match slot.offsets.len() {
            1 => row[slot.offsets.start].clone(),
            _ => Value::Tuple(row[slot.offsets.clone()].to_vec()),
        };
        value = value.with_attr(slot.name.clone(), attr_value);
    }
    Ok(Some(value))
}

fn entity_key(schema: &Schema, name: &str, slot: &AttrSlot, row: &[Value]) -> TranslateResult<Value> {
    let entity_ref = schema
        .entity_ref(name)
        .ok_or_else(|| TranslateError::translation(format!("Unknown entity {}", name)))?;
    let pk = row[slot.offsets.clone()].to_vec();
    if pk.iter().any(Value::is_none) {
        return Ok(Value::None);
    }
    Ok(Value::Entity(EntityValue::new(entity_ref, pk)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaBuilder;

    fn schema() -> Schema {
        SchemaBuilder::new()
            .entity("Student", |e| {
                e.pk("id", CanonicalType::INT)
                    .required("name", CanonicalType::Text)
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_entity_rows_decode_with_attrs() {
        let layout = RowLayout::Entity {
            entity: "Student".into(),
            attrs: vec![
                AttrSlot {
                    name: "id".into(),
                    offsets: 0..1,
                },
                AttrSlot {
                    name: "name".into(),
                    offsets: 1..2,
                },
            ],
            discriminator: None,
        };
        let value = layout
            .decode(&schema(), &[Value::Int(1), Value::from("Ann")])
            .unwrap();
        let Value::Entity(student) = value else {
            panic!("entity expected");
        };
        assert_eq!(student.pk, vec![Value::Int(1)]);
        assert_eq!(student.attrs.get("name"), Some(&Value::from("Ann")));
    }

    #[test]
    fn test_projection_rows_become_tuples() {
        let layout = RowLayout::Columns(vec![
            OutputColumn {
                name: "s".into(),
                kind: OutputKind::Entity("Student".into()),
                offsets: 0..1,
            },
            OutputColumn {
                name: "s.name".into(),
                kind: OutputKind::Value(CanonicalType::Text),
                offsets: 1..2,
            },
        ]);
        assert_eq!(layout.col_names(), vec!["s", "s.name"]);
        let value = layout
            .decode(&schema(), &[Value::None, Value::from("x")])
            .unwrap();
        assert_eq!(value, Value::Tuple(vec![Value::None, Value::from("x")]));
    }

    #[test]
    fn test_short_row_is_an_error() {
        assert!(RowLayout::Scalar.decode(&schema(), &[]).is_err());
    }
}
