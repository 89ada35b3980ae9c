#[path = "../common/mod.rs"]
mod common;

use common::db;
use gensql::prelude::*;

/// Serves fixed rows and records every statement it sees.
#[derive(Default)]
struct Canned {
    rows: Vec<Vec<Value>>,
    seen: Vec<(String, Vec<Value>)>,
}

impl Executor for Canned {
    fn query(&mut self, sql: &str, args: &[Value], width: usize) -> TranslateResult<Vec<Vec<Value>>> {
        self.seen.push((sql.to_string(), args.to_vec()));
        Ok(self.rows.iter().map(|r| r[..width].to_vec()).collect())
    }

    fn execute(&mut self, sql: &str, args: &[Value]) -> TranslateResult<u64> {
        self.seen.push((sql.to_string(), args.to_vec()));
        Ok(2)
    }
}

fn students() -> Canned {
    Canned {
        rows: vec![
            vec![Value::Int(1), Value::from("Ann"), Value::Float(3.9), Value::Int(101)],
            vec![Value::Int(2), Value::from("Bob"), Value::None, Value::Int(102)],
        ],
        seen: Vec::new(),
    }
}

#[test]
fn test_entity_rows_are_hydrated() {
    let db = db();
    let prepared = db.select("s for s in Student", &Vars::new()).unwrap().prepare().unwrap();
    let mut session = Session::new(&db, students());
    let rows = session.fetch(&prepared).unwrap();
    assert_eq!(rows.len(), 2);
    let Value::Entity(ann) = &rows[0] else {
        panic!("entity expected, got {:?}", rows[0]);
    };
    assert_eq!(ann.entity.name, "Student");
    assert_eq!(ann.pk, vec![Value::Int(1)]);
    assert_eq!(ann.attrs.get("name"), Some(&Value::from("Ann")));
    assert_eq!(ann.attrs.get("group"), Some(&Value::Int(101)));
}

#[test]
fn test_results_are_keyed_by_arguments() {
    let db = db();
    let mut session = Session::new(&db, students());
    for x in [3.0, 3.0, 2.0] {
        let prepared = db
            .select("s for s in Student if s.gpa > x", &Vars::new().with("x", x))
            .unwrap()
            .prepare()
            .unwrap();
        session.fetch(&prepared).unwrap();
    }
    assert_eq!(session.executor().seen.len(), 2);
    assert_eq!(session.cached_results(), 2);
}

#[test]
fn test_random_results_are_never_cached() {
    let db = db();
    let prepared = db
        .select("s for s in Student if random() < 0.5", &Vars::new())
        .unwrap()
        .prepare()
        .unwrap();
    assert!(!prepared.cacheable);
    let mut session = Session::new(&db, students());
    session.fetch(&prepared).unwrap();
    session.fetch(&prepared).unwrap();
    assert_eq!(session.executor().seen.len(), 2);
}

#[test]
fn test_delete_invalidates_cached_results() {
    let db = db();
    let query = db
        .select("s for s in Student if s.gpa < x", &Vars::new().with("x", 2.0))
        .unwrap();
    let select = query.prepare().unwrap();
    let delete = query.delete().unwrap();
    let mut session = Session::new(&db, students());

    session.fetch(&select).unwrap();
    assert_eq!(session.execute(&delete).unwrap(), 2);
    assert!(session.is_modified());
    session.fetch(&select).unwrap();
    assert_eq!(session.executor().seen.len(), 3);
    assert_eq!(session.executor().seen[1].1, vec![Value::Float(2.0)]);
}

#[test]
fn test_aggregate_fetch_one() {
    let db = db();
    let prepared = db.select("s for s in Student", &Vars::new()).unwrap().count().unwrap();
    let mut session = Session::new(
        &db,
        Canned {
            rows: vec![vec![Value::Int(7)]],
            seen: Vec::new(),
        },
    );
    assert_eq!(session.fetch_one(&prepared).unwrap(), Some(Value::Int(7)));
}
