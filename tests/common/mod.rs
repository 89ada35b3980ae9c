#![allow(dead_code)]

use gensql::prelude::*;
use sqlparser::dialect::{DuckDbDialect, GenericDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;

/// Groups of students taking courses.
pub fn university() -> Schema {
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

pub fn db() -> Database {
    Database::new(university(), Settings::default())
}

pub fn db_for(dialect: Dialect) -> Database {
    Database::new(university(), Settings::for_dialect(dialect))
}

/// A `Group` instance with the given key.
pub fn group(db: &Database, number: i64) -> Value {
    let group = db.schema().entity_ref("Group").unwrap();
    Value::Entity(EntityValue::new(group, vec![Value::Int(number)]))
}

pub fn sql_of(db: &Database, src: &str, vars: &Vars) -> String {
    db.select(src, vars).unwrap().prepare().unwrap().sql
}

/// Check that `sql` parses for `dialect`.
pub fn validate_sql(sql: &str, dialect: Dialect) {
    let parser: Box<dyn sqlparser::dialect::Dialect> = match dialect {
        Dialect::Sqlite => Box::new(SQLiteDialect {}),
        Dialect::Postgres => Box::new(PostgreSqlDialect {}),
        Dialect::MySql => Box::new(MySqlDialect {}),
        Dialect::Oracle => Box::new(GenericDialect {}),
        Dialect::DuckDb => Box::new(DuckDbDialect {}),
    };
    if let Err(err) = Parser::parse_sql(&*parser, sql) {
        panic!("invalid SQL for {:?}: {}\n{}", dialect, err, sql);
    }
}
