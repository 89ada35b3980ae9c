#[path = "../common/mod.rs"]
mod common;

use common::{db, sql_of, validate_sql};
use gensql::prelude::*;

#[test]
fn test_membership_in_nested_generator() {
    let db = db();
    let sql = sql_of(
        &db,
        "s for s in Student if s.group in (g for g in Group if g.major == 'Math')",
        &Vars::new(),
    );
    assert!(sql.contains(" IN ("), "{}", sql);
    assert!(sql.contains("FROM \"Group\" \"g\""), "{}", sql);
    validate_sql(&sql, Dialect::Sqlite);
}

#[test]
fn test_join_hint_turns_membership_into_join() {
    let db = db();
    let query = db
        .select(
            "g for g in Group if JOIN(g in (s.group for s in Student if s.gpa > 3.0))",
            &Vars::new(),
        )
        .unwrap();
    let prepared = query.prepare().unwrap();
    assert!(prepared.sql.starts_with("SELECT DISTINCT"), "{}", prepared.sql);
    assert!(!prepared.sql.contains(" IN ("), "{}", prepared.sql);
    assert_eq!(prepared.args, vec![Value::Float(3.0)]);
    validate_sql(&prepared.sql, Dialect::Sqlite);
}

#[test]
fn test_exists_over_collection_generator() {
    let db = db();
    let sql = sql_of(
        &db,
        "g for g in Group if exists(s for s in g.students if s.gpa > 3.5)",
        &Vars::new(),
    );
    assert!(sql.contains("EXISTS ("), "{}", sql);
    validate_sql(&sql, Dialect::Sqlite);
}

#[test]
fn test_empty_collection_test() {
    let db = db();
    let sql = sql_of(&db, "g for g in Group if not g.students", &Vars::new());
    assert!(sql.contains("NOT EXISTS"), "{}", sql);
    validate_sql(&sql, Dialect::Sqlite);
}

#[test]
fn test_aggregate_over_collection_attribute() {
    let settings = Settings {
        optimize_subqueries: false,
        ..Settings::default()
    };
    let db = Database::new(common::university(), settings);
    let sql = sql_of(&db, "g for g in Group if avg(g.students.gpa) > 3.0", &Vars::new());
    assert!(sql.contains("AVG("), "{}", sql);
    validate_sql(&sql, Dialect::Sqlite);
}

#[test]
fn test_many_to_many_membership() {
    let db = db();
    let sql = sql_of(
        &db,
        "c for c in Course if 'Ann' in c.students.name",
        &Vars::new(),
    );
    assert!(sql.contains("\"Course_Student\""), "{}", sql);
    validate_sql(&sql, Dialect::Sqlite);
}

#[test]
fn test_projection_with_aggregate_groups_by_other_columns() {
    let db = db();
    let prepared = db
        .select("(s.group, count(s)) for s in Student", &Vars::new())
        .unwrap()
        .prepare()
        .unwrap();
    assert!(prepared.sql.contains("GROUP BY \"s\".\"group\""), "{}", prepared.sql);
    assert_eq!(prepared.layout.col_names(), vec!["s.group", "count(s)"]);
    validate_sql(&prepared.sql, Dialect::Sqlite);
}

