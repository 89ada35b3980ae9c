#[path = "../common/mod.rs"]
mod common;

use std::collections::BTreeSet;

use common::{group, university};
use gensql::prelude::*;

const DDL: &str = r#"
CREATE TABLE "Group" ("number" INTEGER PRIMARY KEY, "major" TEXT NOT NULL);
CREATE TABLE "Student" (
    "id" INTEGER PRIMARY KEY,
    "name" TEXT NOT NULL,
    "gpa" REAL,
    "picture" BLOB,
    "group" INTEGER NOT NULL REFERENCES "Group" ("number")
);
INSERT INTO "Group" VALUES (101, 'Math'), (102, 'Physics'), (103, 'History');
INSERT INTO "Student" VALUES
    (1, 'Ann', 3.9, NULL, 101),
    (2, 'Bob', 2.8, NULL, 101),
    (3, 'Cid', 3.1, NULL, 102),
    (4, 'Dee', NULL, NULL, 101),
    (5, 'Eve', 3.5, NULL, 103),
    (6, 'Fox', 3.6, NULL, 103);
"#;

fn session(db: &Database) -> Session<SqliteExecutor> {
    let executor = SqliteExecutor::open_in_memory().unwrap();
    executor.execute_batch(DDL).unwrap();
    Session::new(db, executor)
}

fn keys(rows: &[Value]) -> BTreeSet<i64> {
    rows.iter()
        .map(|row| match row {
            Value::Entity(e) => e.pk[0].as_int().unwrap(),
            other => panic!("entity expected, got {:?}", other),
        })
        .collect()
}

fn fetch_keys(db: &Database, src: &str, vars: &Vars) -> BTreeSet<i64> {
    let prepared = db.select(src, vars).unwrap().prepare().unwrap();
    let rows = session(db).fetch(&prepared).unwrap();
    keys(&rows)
}

#[test]
fn test_filter_returns_matching_entities() {
    let db = Database::new(university(), Settings::default());
    let found = fetch_keys(&db, "s for s in Student if s.gpa > x", &Vars::new().with("x", 3.4));
    assert_eq!(found, BTreeSet::from([1, 5, 6]));
}

#[test]
fn test_count_by_group() {
    let db = Database::new(university(), Settings::default());
    let vars = Vars::new().with("g", group(&db, 101));
    let prepared = db
        .select("count(s for s in Student if s.group == g)", &vars)
        .unwrap()
        .prepare()
        .unwrap();
    let mut session = session(&db);
    assert_eq!(session.fetch_one(&prepared).unwrap(), Some(Value::Int(3)));
}

#[test]
fn test_collection_size_forms_agree() {
    let src = "g for g in Group if len(g.students) > 1";
    let joined = Database::new(university(), Settings::default());
    let correlated = Database::new(
        university(),
        Settings {
            optimize_subqueries: false,
            ..Settings::default()
        },
    );
    let a = fetch_keys(&joined, src, &Vars::new());
    let b = fetch_keys(&correlated, src, &Vars::new());
    assert_eq!(a, b);
    assert_eq!(a, BTreeSet::from([101, 103]));
}

#[test]
fn test_join_hint_and_subquery_agree() {
    let db = Database::new(university(), Settings::default());
    let hinted = fetch_keys(
        &db,
        "g for g in Group if JOIN(g in (s.group for s in Student if s.gpa > 3.0))",
        &Vars::new(),
    );
    let plain = fetch_keys(
        &db,
        "g for g in Group if g in (s.group for s in Student if s.gpa > 3.0)",
        &Vars::new(),
    );
    assert_eq!(hinted, plain);
    assert_eq!(plain, BTreeSet::from([101, 102, 103]));
}

#[test]
fn test_string_methods_run_on_sqlite() {
    let db = Database::new(university(), Settings::default());
    let found = fetch_keys(
        &db,
        "s for s in Student if s.name.startswith(p) or s.name.lower() == 'eve'",
        &Vars::new().with("p", "B"),
    );
    assert_eq!(found, BTreeSet::from([2, 5]));
}

#[test]
fn test_delete_then_refetch() {
    let db = Database::new(university(), Settings::default());
    let query = db.select("s for s in Student if s.gpa < 3.0", &Vars::new()).unwrap();
    let all = db.select("s for s in Student", &Vars::new()).unwrap().prepare().unwrap();
    let mut session = session(&db);
    assert_eq!(session.fetch(&all).unwrap().len(), 6);
    assert_eq!(session.execute(&query.delete().unwrap()).unwrap(), 1);
    assert_eq!(session.fetch(&all).unwrap().len(), 5);
}

#[test]
fn test_projection_rows_are_tuples() {
    let db = Database::new(university(), Settings::default());
    let prepared = db
        .select("(s.name, s.group) for s in Student if s.id == 3", &Vars::new())
        .unwrap()
        .prepare()
        .unwrap();
    let rows = session(&db).fetch(&prepared).unwrap();
    let [Value::Tuple(items)] = rows.as_slice() else {
        panic!("one tuple expected, got {:?}", rows);
    };
    assert_eq!(items[0], Value::from("Cid"));
    let Value::Entity(g) = &items[1] else {
        panic!("group entity expected");
    };
    assert_eq!(g.pk, vec![Value::Int(102)]);
}
