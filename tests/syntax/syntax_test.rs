use std::convert::Infallible;

use gensql::extract::extract;
use gensql::syntax::{parse, render, walk, Node, NodeKind, Visitor};

#[test]
fn test_render_round_trip_is_stable() {
    let sources = [
        "s for s in Student if s.gpa > 3.0",
        "count(s for s in Student if s.group == g)",
        "(s.name, s.gpa) for s in Student if s.name in ('A', 'B')",
        "g for g in Group if len(g.students) > 1 and not g.major.startswith('M')",
        "(a + b) * c - d / e",
        "lambda s: (s.name, desc(s.gpa))",
        "x if a < b else -y",
    ];
    for source in sources {
        let tree = parse(source).unwrap();
        let again = parse(&render(&tree.root)).unwrap();
        assert_eq!(tree.id, again.id, "{}", source);
        assert_eq!(render(&tree.root), render(&again.root));
    }
}

#[test]
fn test_parentheses_only_where_priority_requires() {
    assert_eq!(render(&parse("(a + b) * c").unwrap().root), "(a + b) * c");
    assert_eq!(render(&parse("a * b + c").unwrap().root), "a * b + c");
    assert_eq!(render(&parse("((a))").unwrap().root), "a");
}

struct Names(Vec<String>);

impl Visitor for Names {
    type Output = ();
    type Error = Infallible;

    fn post(&mut self, node: &Node) -> Result<(), Infallible> {
        if let NodeKind::Name { id, .. } = &node.kind {
            self.0.push(id.clone());
        }
        Ok(())
    }
}

#[test]
fn test_walker_visits_every_name() {
    let tree = parse("s.name for s in Student if s.gpa > min_gpa").unwrap();
    let mut names = Names(Vec::new());
    walk(&mut names, &tree.root).unwrap();
    names.0.sort();
    assert_eq!(names.0, ["Student", "min_gpa", "s", "s", "s"]);
}

#[test]
fn test_external_expressions_of_nested_queries() {
    let tree = parse(
        "s for s in Student if s.group in (g for g in Group if g.major == m) and s.gpa > lo + 1",
    )
    .unwrap();
    let extraction = extract(&tree, &[]).unwrap();
    let sources: Vec<&str> = extraction.getters().map(|g| g.src.as_str()).collect();
    assert_eq!(sources, ["Student", "Group", "m", "lo + 1"]);
}

#[test]
fn test_names_bound_by_outer_query_are_not_extracted() {
    let tree = parse("s.gpa > x").unwrap();
    let extraction = extract(&tree, &["s".to_string()]).unwrap();
    let sources: Vec<&str> = extraction.getters().map(|g| g.src.as_str()).collect();
    assert_eq!(sources, ["x"]);
}

#[test]
fn test_syntax_errors_are_reported() {
    let err = parse("s for s in Student if").unwrap_err();
    assert_eq!(err.text, "s for s in Student if");
    assert!(!err.diagnostics.is_empty());
}
