#[path = "../common/mod.rs"]
mod common;

use std::thread;

use common::{db, university};
use gensql::prelude::*;

#[test]
fn test_plans_are_reused_across_calls() {
    let db = db();
    for gpa in [1.0, 2.0, 3.0] {
        db.select("s for s in Student if s.gpa > x", &Vars::new().with("x", gpa))
            .unwrap()
            .prepare()
            .unwrap();
    }
    assert_eq!(db.plan_count(), 1);
    assert_eq!(db.statement_count(), 1);
}

#[test]
fn test_render_options_get_their_own_statement() {
    let db = db();
    let query = db.select("s for s in Student", &Vars::new()).unwrap();
    query.prepare().unwrap();
    query.limit(10, None).prepare().unwrap();
    query.count().unwrap();
    query.count().unwrap();
    assert_eq!(db.plan_count(), 1);
    assert_eq!(db.statement_count(), 3);
}

#[test]
fn test_translation_is_deterministic_across_databases() {
    let src = "(s.name, count(s.courses)) for s in Student if s.group.major == m";
    let vars = Vars::new().with("m", "Physics");
    let a = Database::new(university(), Settings::default());
    let b = Database::new(university(), Settings::default());
    let a = a.select(src, &vars).unwrap().prepare().unwrap();
    let b = b.select(src, &vars).unwrap().prepare().unwrap();
    assert_eq!(a.sql, b.sql);
    assert_eq!(a.args, b.args);
}

#[test]
fn test_failed_translation_is_not_cached() {
    let db = db();
    assert!(db.select("s for s in Student if s.name > s.gpa", &Vars::new()).is_err());
    assert_eq!(db.plan_count(), 0);
}

#[test]
fn test_concurrent_callers_share_one_plan() {
    let db = db();
    let sqls: Vec<String> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let db = &db;
                scope.spawn(move || {
                    let vars = Vars::new().with("x", f64::from(i));
                    db.select("s.name for s in Student if s.gpa >= x", &vars)
                        .unwrap()
                        .prepare()
                        .unwrap()
                        .sql
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(sqls.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(db.plan_count(), 1);
}

#[test]
fn test_chained_plans_are_cached_per_step() {
    let db = db();
    let base = db.select("s for s in Student", &Vars::new()).unwrap();
    for name in ["Ann", "Bob"] {
        base.filter("lambda s: s.name == n", &Vars::new().with("n", name))
            .unwrap()
            .order_by_numbers(&[1])
            .unwrap();
    }
    assert_eq!(db.plan_count(), 3);
}
