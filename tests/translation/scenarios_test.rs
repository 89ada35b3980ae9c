#[path = "../common/mod.rs"]
mod common;

use common::{db, group, validate_sql};
use gensql::prelude::*;

#[test]
fn test_filter_on_numeric_attribute() {
    let db = db();
    let prepared = db
        .select("s for s in Student if s.gpa > 3.0", &Vars::new())
        .unwrap()
        .prepare()
        .unwrap();
    insta::assert_snapshot!(prepared.sql, @r#"
    SELECT "s"."id", "s"."name", "s"."gpa", "s"."group"
    FROM "Student" "s"
    WHERE "s"."gpa" > ?
    "#);
    assert_eq!(prepared.args, vec![Value::Float(3.0)]);
    assert!(matches!(prepared.layout, RowLayout::Entity { .. }));
    validate_sql(&prepared.sql, Dialect::Sqlite);
}

#[test]
fn test_count_binds_the_entity_key() {
    let db = db();
    let vars = Vars::new().with("g", group(&db, 101));
    let prepared = db
        .select("count(s for s in Student if s.group == g)", &vars)
        .unwrap()
        .prepare()
        .unwrap();
    insta::assert_snapshot!(prepared.sql, @r#"
    SELECT COUNT(*)
    FROM "Student" "s"
    WHERE "s"."group" = ?
    "#);
    assert_eq!(prepared.args, vec![Value::Int(101)]);
    assert_eq!(prepared.layout, RowLayout::Scalar);
}

#[test]
fn test_collection_size_uses_subquery_or_join() {
    let src = "g for g in Group if len(g.students) > 1";
    let db = db();
    let joined = db.select(src, &Vars::new()).unwrap();
    assert!(joined.plan().left_join());
    let sql = joined.prepare().unwrap().sql;
    assert!(sql.contains("LEFT JOIN"), "{}", sql);
    assert!(sql.contains("GROUP BY"), "{}", sql);
    assert!(sql.contains("HAVING"), "{}", sql);
    validate_sql(&sql, Dialect::Sqlite);

    let settings = Settings {
        optimize_subqueries: false,
        ..Settings::default()
    };
    let correlated = Database::new(common::university(), settings);
    let sql = correlated.select(src, &Vars::new()).unwrap().prepare().unwrap().sql;
    assert!(!sql.contains("LEFT JOIN"), "{}", sql);
    assert!(sql.contains("SELECT COUNT("), "{}", sql);
    validate_sql(&sql, Dialect::Sqlite);
}

#[test]
fn test_tuple_membership_binds_each_item() {
    let db = db();
    let prepared = db
        .select("s for s in Student if s.name in ('A', 'B')", &Vars::new())
        .unwrap()
        .prepare()
        .unwrap();
    assert!(prepared.sql.ends_with("WHERE \"s\".\"name\" IN (?, ?)"), "{}", prepared.sql);
    assert_eq!(prepared.args, vec![Value::from("A"), Value::from("B")]);
}

#[test]
fn test_text_and_number_are_incomparable() {
    let db = db();
    let err = db
        .select("s for s in Student if s.name > s.gpa", &Vars::new())
        .unwrap_err();
    let TranslateError::IncomparableTypes { left, right, expr } = &err else {
        panic!("unexpected error: {}", err);
    };
    assert_ne!(left, right);
    assert!(expr.contains("s.name > s.gpa"), "{}", expr);
    assert!(err.to_string().starts_with("Incomparable types"));
}

#[test]
fn test_external_variable_is_a_parameter() {
    let db = db();
    let low = db
        .select("s.name for s in Student if s.gpa > min_gpa", &Vars::new().with("min_gpa", 2.0))
        .unwrap()
        .prepare()
        .unwrap();
    let high = db
        .select("s.name for s in Student if s.gpa > min_gpa", &Vars::new().with("min_gpa", 3.5))
        .unwrap()
        .prepare()
        .unwrap();
    assert_eq!(low.sql, high.sql);
    assert_eq!(low.args, vec![Value::Float(2.0)]);
    assert_eq!(high.args, vec![Value::Float(3.5)]);
    assert_eq!(low.layout.col_names(), vec!["s.name"]);
}

#[test]
fn test_tuple_projection_layout() {
    let db = db();
    let prepared = db
        .select("(s, s.name) for s in Student", &Vars::new())
        .unwrap()
        .prepare()
        .unwrap();
    assert_eq!(prepared.layout.col_names(), vec!["s", "s.name"]);
    assert_eq!(prepared.layout.width(), 2);
    validate_sql(&prepared.sql, Dialect::Sqlite);
}

#[test]
fn test_attribute_path_joins_the_referenced_table() {
    let db = db();
    let prepared = db
        .select("s for s in Student if s.group.major == 'Math'", &Vars::new())
        .unwrap()
        .prepare()
        .unwrap();
    assert!(prepared.sql.contains("\"Group\""), "{}", prepared.sql);
    assert_eq!(prepared.args, vec![Value::from("Math")]);
    validate_sql(&prepared.sql, Dialect::Sqlite);
}

#[test]
fn test_unknown_attribute_is_reported() {
    let db = db();
    let err = db
        .select("s for s in Student if s.age > 20", &Vars::new())
        .unwrap_err();
    assert!(matches!(err, TranslateError::Attribute(_)), "{}", err);
}


#[test]
fn test_string_slice_with_constant_bounds() {
    let db = db();
    let prepared = db
        .select("s.name[1:3] for s in Student", &Vars::new())
        .unwrap()
        .prepare()
        .unwrap();
    assert!(prepared.sql.contains("substr(\"s\".\"name\", 2, 2)"), "{}", prepared.sql);
    validate_sql(&prepared.sql, Dialect::Sqlite);
}

#[test]
fn test_negative_slice_bounds_are_rejected() {
    let db = db();
    for src in ["s.name[-2:] for s in Student", "s.name[:-1] for s in Student"] {
        let err = db.select(src, &Vars::new()).unwrap_err();
        assert!(matches!(err, TranslateError::NotImplemented(_)), "{}: {}", src, err);
        assert!(err.to_string().contains("Negative indices are not supported"), "{}", err);
    }

    let src = "s.name[x:] for s in Student";
    let ok = db.select(src, &Vars::new().with("x", 1i64)).unwrap().prepare().unwrap();
    assert_eq!(ok.args, vec![Value::Int(1)]);
    let err = db
        .select(src, &Vars::new().with("x", -2i64))
        .unwrap()
        .prepare()
        .unwrap_err();
    assert!(matches!(err, TranslateError::NotImplemented(_)), "{}", err);
    assert!(err.to_string().contains("`x` is -2"), "{}", err);
}

#[test]
fn test_desc_is_only_an_ordering_key() {
    let db = db();
    for src in [
        "s for s in Student if desc(s.gpa)",
        "s for s in Student if desc(s.gpa) > 3.0",
        "desc(s.gpa) for s in Student",
    ] {
        let err = db.select(src, &Vars::new()).unwrap_err();
        assert!(matches!(err, TranslateError::Type(_)), "{}: {}", src, err);
        assert!(err.to_string().contains("desc() can only be used for ordering"), "{}", err);
    }
}

#[test]
fn test_distinct_needs_a_collection_or_number() {
    let db = db();
    let err = db
        .select("s for s in Student if distinct(s.name)", &Vars::new())
        .unwrap_err();
    assert!(matches!(err, TranslateError::Type(_)), "{}", err);
    assert!(err.to_string().contains("'distinct' function expects"), "{}", err);
}

#[test]
fn test_bool_is_not_a_member_of_numbers() {
    let db = db();
    let err = db
        .select("s for s in Student if s.gpa in (1, True)", &Vars::new())
        .unwrap_err();
    assert!(matches!(err, TranslateError::IncomparableTypes { .. }), "{}", err);
    assert!(db
        .select("s for s in Student if s.gpa in (1, 2.5)", &Vars::new())
        .is_ok());
}
