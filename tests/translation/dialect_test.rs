#[path = "../common/mod.rs"]
mod common;

use common::{db_for, validate_sql};
use gensql::prelude::*;

const SOURCE: &str = "s for s in Student if s.gpa > x and s.name != y";

fn prepared(dialect: Dialect) -> Prepared {
    let vars = Vars::new().with("x", 3.0).with("y", "Ann");
    db_for(dialect)
        .select(SOURCE, &vars)
        .unwrap()
        .limit(5, Some(10))
        .prepare()
        .unwrap()
}

#[test]
fn test_every_dialect_renders_valid_sql() {
    for dialect in Dialect::ALL {
        let prepared = prepared(dialect);
        validate_sql(&prepared.sql, dialect);
        assert_eq!(prepared.args, vec![Value::Float(3.0), Value::from("Ann")]);
    }
}

#[test]
fn test_placeholders_per_dialect() {
    assert!(prepared(Dialect::Sqlite).sql.contains("> ?"));
    assert!(prepared(Dialect::Postgres).sql.contains("> $1"));
    assert!(prepared(Dialect::Postgres).sql.contains("<> $2"));
    assert!(prepared(Dialect::Oracle).sql.contains("> :p1"));
}

#[test]
fn test_identifier_quoting() {
    assert!(prepared(Dialect::MySql).sql.contains("FROM `Student` `s`"));
    assert!(prepared(Dialect::Postgres).sql.contains("FROM \"Student\" \"s\""));
}

#[test]
fn test_limit_forms() {
    assert!(prepared(Dialect::Postgres).sql.ends_with("LIMIT 5 OFFSET 10"));
    assert!(prepared(Dialect::Oracle)
        .sql
        .ends_with("OFFSET 10 ROWS FETCH NEXT 5 ROWS ONLY"));
}

#[test]
fn test_numbered_placeholders_reuse_repeated_parameters() {
    let db = db_for(Dialect::Postgres);
    let prepared = db
        .select("s for s in Student if s.gpa > x or s.gpa == x", &Vars::new().with("x", 2.5))
        .unwrap()
        .prepare()
        .unwrap();
    assert!(!prepared.sql.contains("$2"), "{}", prepared.sql);
    assert_eq!(prepared.args, vec![Value::Float(2.5)]);

    let db = db_for(Dialect::Sqlite);
    let prepared = db
        .select("s for s in Student if s.gpa > x or s.gpa == x", &Vars::new().with("x", 2.5))
        .unwrap()
        .prepare()
        .unwrap();
    assert_eq!(prepared.args, vec![Value::Float(2.5), Value::Float(2.5)]);
}

#[test]
fn test_for_update_nowait_support() {
    let vars = Vars::new();
    let pg = db_for(Dialect::Postgres);
    let sql = pg
        .select("s for s in Student", &vars)
        .unwrap()
        .for_update(true)
        .prepare()
        .unwrap()
        .sql;
    assert!(sql.ends_with("FOR UPDATE NOWAIT"), "{}", sql);

    let my = db_for(Dialect::MySql);
    assert!(my
        .select("s for s in Student", &vars)
        .unwrap()
        .for_update(true)
        .prepare()
        .is_err());
}

#[test]
fn test_for_update_is_never_cached() {
    let db = db_for(Dialect::Postgres);
    let query = db.select("s for s in Student", &Vars::new()).unwrap();
    assert!(query.prepare().unwrap().cacheable);
    assert!(!query.for_update(false).prepare().unwrap().cacheable);
}

#[test]
fn test_delete_statement() {
    let db = db_for(Dialect::Sqlite);
    let prepared = db
        .select("s for s in Student if s.gpa < x", &Vars::new().with("x", 2.0))
        .unwrap()
        .delete()
        .unwrap();
    insta::assert_snapshot!(prepared.sql, @r#"
    DELETE FROM "Student"
    WHERE "gpa" < ?
    "#);
    assert_eq!(prepared.args, vec![Value::Float(2.0)]);
    validate_sql(&prepared.sql, Dialect::Sqlite);
}
