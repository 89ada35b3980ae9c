#[path = "../common/mod.rs"]
mod common;

use common::{db, validate_sql};
use gensql::prelude::*;

#[test]
fn test_lambda_filter_adds_condition() {
    let db = db();
    let query = db.select("s for s in Student", &Vars::new()).unwrap();
    let filtered = query
        .filter("lambda s: s.gpa > x", &Vars::new().with("x", 3.0))
        .unwrap()
        .prepare()
        .unwrap();
    assert!(filtered.sql.ends_with("WHERE \"s\".\"gpa\" > ?"), "{}", filtered.sql);
    assert_eq!(filtered.args, vec![Value::Float(3.0)]);

    let plain = query.prepare().unwrap();
    assert!(!plain.sql.contains("WHERE"));
}

#[test]
fn test_filter_without_lambda_uses_query_names() {
    let db = db();
    let prepared = db
        .select("s for s in Student if s.gpa > low", &Vars::new().with("low", 2.0))
        .unwrap()
        .filter("s.name != n", &Vars::new().with("n", "Ann"))
        .unwrap()
        .prepare()
        .unwrap();
    assert_eq!(prepared.args, vec![Value::Float(2.0), Value::from("Ann")]);
    validate_sql(&prepared.sql, Dialect::Sqlite);
}

#[test]
fn test_same_source_text_in_two_filters_binds_separately() {
    let db = db();
    let prepared = db
        .select("s for s in Student", &Vars::new())
        .unwrap()
        .filter("lambda s: s.gpa > x", &Vars::new().with("x", 1.0))
        .unwrap()
        .filter("lambda s: s.gpa < x", &Vars::new().with("x", 4.0))
        .unwrap()
        .prepare()
        .unwrap();
    assert_eq!(prepared.args, vec![Value::Float(1.0), Value::Float(4.0)]);
}

#[test]
fn test_lambda_arity_must_match_result() {
    let db = db();
    let err = db
        .select("(s.name, s.gpa) for s in Student", &Vars::new())
        .unwrap()
        .filter("lambda s: s.gpa > 3", &Vars::new())
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Incorrect number of lambda arguments. Expected: 2, got: 1"
    );
}

#[test]
fn test_order_by_positions() {
    let db = db();
    let prepared = db
        .select("(s.name, s.gpa) for s in Student", &Vars::new())
        .unwrap()
        .order_by_numbers(&[-2, 1])
        .unwrap()
        .prepare()
        .unwrap();
    assert!(prepared.sql.ends_with("ORDER BY 2 DESC, 1"), "{}", prepared.sql);
}

#[test]
fn test_order_by_position_out_of_range() {
    let db = db();
    let query = db.select("s.name for s in Student", &Vars::new()).unwrap();
    let err = query.order_by_numbers(&[2]).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Invalid index of order_by() method: 2 \
         (query result is single list of elements and has only one 'column')"
    );
    let err = query.order_by_numbers(&[0]).unwrap_err();
    assert!(matches!(err, TranslateError::Value(_)));
}

#[test]
fn test_order_by_attributes() {
    let db = db();
    let prepared = db
        .select("s for s in Student", &Vars::new())
        .unwrap()
        .order_by_attributes(&[OrderAttr::asc("Student", "name"), OrderAttr::desc("Student", "gpa")])
        .unwrap()
        .prepare()
        .unwrap();
    assert!(
        prepared.sql.ends_with("ORDER BY \"s\".\"name\", \"s\".\"gpa\" DESC"),
        "{}",
        prepared.sql
    );

    let err = db
        .select("s for s in Student", &Vars::new())
        .unwrap()
        .order_by_attributes(&[OrderAttr::asc("Group", "major")])
        .unwrap_err();
    assert_eq!(err.to_string(), "Attribute Group.major does not belong to entity Student");
}

#[test]
fn test_order_by_lambda_and_without_order() {
    let db = db();
    let ordered = db
        .select("s for s in Student", &Vars::new())
        .unwrap()
        .order_by("lambda s: desc(s.gpa)", &Vars::new())
        .unwrap();
    let sql = ordered.prepare().unwrap().sql;
    assert!(sql.ends_with("ORDER BY \"s\".\"gpa\" DESC"), "{}", sql);

    let cleared = ordered.without_order().unwrap().prepare().unwrap();
    assert!(!cleared.sql.contains("ORDER BY"));
}

#[test]
fn test_filter_by_keywords() {
    let db = db();
    let query = db.select("s for s in Student", &Vars::new()).unwrap();
    let prepared = query
        .filter_by([("name", Value::from("Ann")), ("gpa", Value::None)])
        .unwrap()
        .prepare()
        .unwrap();
    assert!(prepared.sql.contains("\"s\".\"name\" = ?"), "{}", prepared.sql);
    assert!(prepared.sql.contains("\"s\".\"gpa\" IS NULL"), "{}", prepared.sql);
    assert_eq!(prepared.args, vec![Value::from("Ann")]);

    let err = db
        .select("s.name for s in Student", &Vars::new())
        .unwrap()
        .filter_by([("name", "Ann")])
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Keyword arguments are not allowed when query result is not entity objects"
    );
}

#[test]
fn test_aggregate_source_cannot_be_chained() {
    let db = db();
    let err = db
        .select("count(s for s in Student)", &Vars::new())
        .unwrap()
        .filter("lambda s: s.gpa > 3", &Vars::new())
        .unwrap_err();
    assert!(err.to_string().starts_with("Query of aggregate function cannot be chained"));
}

#[test]
fn test_limit_and_slice() {
    let db = db();
    let query = db.select("s for s in Student", &Vars::new()).unwrap();
    let page = query.slice(10, 20).prepare().unwrap();
    assert!(page.sql.ends_with("LIMIT 10 OFFSET 10"), "{}", page.sql);
    let first = query.first().unwrap();
    assert!(first.sql.ends_with("LIMIT 1"), "{}", first.sql);
}

#[test]
fn test_result_aggregates() {
    let db = db();
    let query = db.select("s.gpa for s in Student", &Vars::new()).unwrap();
    assert!(query.count().unwrap().sql.starts_with("SELECT COUNT(DISTINCT \"s\".\"gpa\")"));
    assert!(query.sum().unwrap().sql.starts_with("SELECT coalesce(SUM(\"s\".\"gpa\"), 0)"));
    assert!(query.max().unwrap().sql.starts_with("SELECT MAX(\"s\".\"gpa\")"));

    let students = db.select("s for s in Student", &Vars::new()).unwrap();
    let err = students.sum().unwrap_err();
    assert_eq!(err.to_string(), "Attribute should be specified for 'sum' aggregate function");
}
