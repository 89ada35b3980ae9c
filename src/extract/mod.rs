//! External-reference extraction.
//!
//! A query source mixes names bound by the query itself (`s` in
//! `s for s in Student`) with names that come from the calling scope
//! (`min_gpa`, `Student`). The extractor marks every subtree that depends
//! only on the calling scope and keeps the maximal ones: each becomes one
//! query parameter, evaluated per call by a [`Getter`].
//!
//! Keyword arguments, slices, lists, tuples and starred arguments are never
//! extracted whole; their external parts are extracted separately so each
//! piece binds as its own parameter. `('A', 'B')` thus yields two
//! parameters, not one tuple value.
//!
//! Extraction depends only on the tree and the set of names bound outside
//! it, and is cached per process.

pub mod getter;

pub use getter::{Env, EvalError, EvalErrorKind, Getter, Vars};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use once_cell::sync::Lazy;

use crate::cache::PlanCache;
use crate::error::{TranslateError, TranslateResult};
use crate::sql::VarKey;
use crate::syntax::render::python_repr;
use crate::syntax::{
    walk, LambdaParam, Literal, NameCtx, Node, NodeId, NodeKind, QueryTree, TreeId, Visitor, Walk,
};
use crate::types::{CanonicalType, Value};

/// Functions whose call is always translated, never evaluated in place.
const SPECIAL_FUNCTIONS: [&str; 2] = ["count", "random"];

/// The external expressions of one tree.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Getters by source text, in tree order.
    getters: IndexMap<String, Getter>,
    /// Source text of the extracted expression rooted at each node.
    nodes: BTreeMap<NodeId, String>,
}

impl Extraction {
    pub fn getters(&self) -> impl Iterator<Item = &Getter> {
        self.getters.values()
    }

    pub fn get(&self, src: &str) -> Option<&Getter> {
        self.getters.get(src)
    }

    /// Source of the extracted expression rooted at `node`, if any.
    pub fn src_of(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(&node).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.getters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.getters.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Facts {
    external: Option<bool>,
    constant: bool,
}

struct Extractor<'t> {
    tree: &'t QueryTree,
    contexts: Vec<HashSet<String>>,
    facts: Vec<Facts>,
    externals: IndexSet<NodeId>,
    nodes: HashMap<NodeId, &'t Node>,
}

impl<'t> Extractor<'t> {
    fn new(tree: &'t QueryTree, outer_names: &[String]) -> Self {
        let mut contexts = Vec::new();
        if !outer_names.is_empty() {
            contexts.push(outer_names.iter().cloned().collect());
        }
        let mut nodes = HashMap::new();
        tree.root.for_each(&mut |n: &'t Node| {
            nodes.insert(n.id, n);
        });
        Self {
            tree,
            contexts,
            facts: vec![Facts::default(); tree.node_count()],
            externals: IndexSet::new(),
            nodes,
        }
    }

    fn fact(&self, node: &Node) -> Facts {
        self.facts.get(node.id as usize).copied().unwrap_or_default()
    }

    fn fact_mut(&mut self, node: &Node) -> &mut Facts {
        let idx = node.id as usize;
        if idx >= self.facts.len() {
            self.facts.resize(idx + 1, Facts::default());
        }
        &mut self.facts[idx]
    }

    fn is_external(&self, node: &Node) -> bool {
        self.fact(node).external == Some(true)
    }

    /// External and worth a parameter of its own.
    fn is_extractable(&self, node: &Node) -> bool {
        let facts = self.fact(node);
        facts.external == Some(true) && (!facts.constant || is_param_literal(node))
    }

    fn is_bound(&self, name: &str) -> bool {
        self.contexts.iter().any(|ctx| ctx.contains(name))
    }

    fn dispatch(&mut self, node: &Node) -> TranslateResult<()> {
        walk(self, node)
    }

    /// Replace wrapper nodes by their external children.
    fn expand_wrappers(&mut self) {
        let mut pending: Vec<NodeId> = self.externals.iter().copied().collect();
        while let Some(id) = pending.pop() {
            let Some(node) = self.nodes.get(&id).copied() else {
                continue;
            };
            let facts = self.fact(node);
            let wrapper = is_nonexternalizable(node) || (facts.constant && !is_const(node));
            if !wrapper {
                continue;
            }
            self.fact_mut(node).external = Some(false);
            self.externals.shift_remove(&id);
            for child in node.children() {
                if self.is_extractable(child) && self.externals.insert(child.id) {
                    pending.push(child.id);
                }
            }
        }
    }

    fn finish(mut self) -> Extraction {
        self.expand_wrappers();
        let mut ids: Vec<NodeId> = self.externals.iter().copied().collect();
        ids.sort_unstable();
        let mut extraction = Extraction::default();
        for id in ids {
            let Some(node) = self.nodes.get(&id).copied() else {
                continue;
            };
            let src = self.tree.src(id).to_string();
            extraction
                .getters
                .entry(src.clone())
                .or_insert_with(|| Getter::new(src.clone(), node.clone()));
            extraction.nodes.insert(id, src);
        }
        extraction
    }
}

fn is_const(node: &Node) -> bool {
    matches!(node.kind, NodeKind::Const(_))
}

/// Literals bound as parameters; `None`, `True` and `False` stay inline.
fn is_param_literal(node: &Node) -> bool {
    matches!(
        node.kind,
        NodeKind::Const(Literal::Int(_) | Literal::Float(_) | Literal::Str(_))
    )
}

fn is_nonexternalizable(node: &Node) -> bool {
    matches!(
        node.kind,
        NodeKind::Keyword { .. }
            | NodeKind::Starred(_)
            | NodeKind::Slice { .. }
            | NodeKind::List(_)
            | NodeKind::Tuple(_)
    )
}

impl Visitor for Extractor<'_> {
    type Output = ();
    type Error = TranslateError;

    fn pre(&mut self, node: &Node) -> TranslateResult<Walk> {
        *self.fact_mut(node) = Facts::default();
        match &node.kind {
            NodeKind::GeneratorExp { elt, generators } => {
                self.contexts.push(HashSet::new());
                for gen in generators {
                    self.dispatch(&gen.iter)?;
                    self.dispatch(&gen.target)?;
                    for cond in &gen.ifs {
                        self.dispatch(cond)?;
                    }
                }
                self.dispatch(elt)?;
                self.contexts.pop();
                Ok(Walk::Stop)
            }
            NodeKind::Lambda { params, body } => {
                let mut names = HashSet::new();
                for param in params {
                    match param {
                        LambdaParam::Plain(name) => {
                            names.insert(name.clone());
                        }
                        other => {
                            return Err(TranslateError::not_implemented(format!(
                                "Lambda parameter {} is not supported",
                                python_repr(other.name())
                            )))
                        }
                    }
                }
                self.contexts.push(names);
                self.dispatch(body)?;
                self.contexts.pop();
                Ok(Walk::Stop)
            }
            _ => Ok(Walk::Continue),
        }
    }

    fn post(&mut self, node: &Node) -> TranslateResult<()> {
        match &node.kind {
            NodeKind::Name { id, ctx } => match ctx {
                NameCtx::Store => {
                    if id.starts_with("__") {
                        return Err(TranslateError::IllegalName(format!(
                            "Illegal name: {}",
                            python_repr(id)
                        )));
                    }
                    if self.contexts.is_empty() {
                        self.contexts.push(HashSet::new());
                    }
                    if let Some(ctx) = self.contexts.last_mut() {
                        ctx.insert(id.clone());
                    }
                }
                NameCtx::Load => {
                    if !self.is_bound(id) {
                        self.fact_mut(node).external = Some(true);
                    }
                }
            },
            NodeKind::Const(_) => {
                *self.fact_mut(node) = Facts {
                    external: Some(true),
                    constant: true,
                };
            }
            NodeKind::Slice { lower, upper, step } => {
                if lower.is_none() && upper.is_none() && step.is_none() {
                    *self.fact_mut(node) = Facts {
                        external: Some(true),
                        constant: true,
                    };
                }
            }
            NodeKind::Keyword { value, .. } => {
                let constant = self.fact(value).constant;
                self.fact_mut(node).constant = constant;
            }
            NodeKind::Call { func, .. } => {
                if let Some(name) = func.name() {
                    if self.is_external(func) && SPECIAL_FUNCTIONS.contains(&name) {
                        self.fact_mut(node).external = Some(false);
                    }
                }
            }
            NodeKind::Lambda { .. } | NodeKind::GeneratorExp { .. } => {
                self.fact_mut(node).external = Some(false);
            }
            NodeKind::List(items) if items.is_empty() => {
                self.fact_mut(node).external = Some(true);
            }
            NodeKind::Dict(pairs) if pairs.is_empty() => {
                self.fact_mut(node).external = Some(true);
            }
            _ => {}
        }

        let children = node.children();
        if self.fact(node).external.is_none()
            && !children.is_empty()
            && children.iter().all(|child| self.is_external(child))
        {
            self.fact_mut(node).external = Some(true);
        }
        if self.is_extractable(node) {
            for child in &children {
                self.externals.shift_remove(&child.id);
            }
            self.externals.insert(node.id);
        }
        Ok(())
    }
}

/// Extract the external expressions of a tree.
///
/// `outer_names` are names bound by the query a chained filter applies to.
pub fn extract(tree: &QueryTree, outer_names: &[String]) -> TranslateResult<Extraction> {
    let mut extractor = Extractor::new(tree, outer_names);
    walk(&mut extractor, &tree.root)?;
    Ok(extractor.finish())
}

static EXTRACTIONS: Lazy<PlanCache<(TreeId, Vec<String>), Extraction>> =
    Lazy::new(|| PlanCache::new("extractions"));

/// [`extract`], computed once per tree and outer-name set.
pub fn extract_cached(tree: &QueryTree, outer_names: &[String]) -> TranslateResult<Arc<Extraction>> {
    let key = (tree.id.clone(), outer_names.to_vec());
    EXTRACTIONS.get_or_try_insert_with(&key, || extract(tree, outer_names))
}

/// Values and canonical types of the external expressions for one call.
#[derive(Debug, Clone, Default)]
pub struct ExtractedVars {
    pub values: HashMap<VarKey, Value>,
    /// Canonical type per expression, in extraction order.
    pub types: Vec<(String, CanonicalType)>,
}

/// Evaluate every getter of `extraction` in `env`.
pub fn extract_vars(
    filter: usize,
    extraction: &Extraction,
    env: &Env<'_>,
) -> TranslateResult<ExtractedVars> {
    let mut vars = ExtractedVars::default();
    for getter in extraction.getters() {
        let value = getter.eval(env).map_err(|err| TranslateError::ExternalEval {
            src: getter.src.clone(),
            kind: err.kind.to_string(),
            message: err.message,
        })?;
        let value = match value {
            Value::List(items) => Value::Tuple(items),
            other => other,
        };
        let ty = value.canonical_type().map_err(|type_name| {
            TranslateError::type_error(format!(
                "Expression `{}` has unsupported type {}",
                getter.src,
                python_repr(&type_name)
            ))
        })?;
        vars.types.push((getter.src.clone(), ty));
        vars.values.insert(VarKey::new(filter, getter.src.clone()), value);
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::parse;

    fn sources(src: &str) -> Vec<String> {
        let tree = parse(src).unwrap();
        extract(&tree, &[])
            .unwrap()
            .getters()
            .map(|g| g.src.clone())
            .collect()
    }

    #[test]
    fn test_maximal_external_subtrees() {
        assert_eq!(
            sources("s for s in Student if s.gpa > min_gpa + 1"),
            vec!["Student", "min_gpa + 1"]
        );
    }

    #[test]
    fn test_literals_become_parameters() {
        assert_eq!(sources("s for s in Student if s.gpa > 3.0"), vec!["Student", "3.0"]);
        assert_eq!(sources("s for s in Student if s.active == True"), vec!["Student"]);
    }

    #[test]
    fn test_tuple_items_are_separate() {
        assert_eq!(
            sources("s for s in Student if s.name in ('A', 'B')"),
            vec!["Student", "'A'", "'B'"]
        );
        assert_eq!(
            sources("s for s in Student if s.name in (x, y + 1)"),
            vec!["Student", "x", "y + 1"]
        );
    }

    #[test]
    fn test_slice_bounds_are_separate() {
        assert_eq!(
            sources("s.name[1:n] for s in Student"),
            vec!["1", "n", "Student"]
        );
        assert_eq!(sources("s.name[:] for s in Student"), vec!["Student"]);
    }

    #[test]
    fn test_special_calls_stay_internal() {
        assert_eq!(sources("count()"), vec!["count"]);
        assert_eq!(
            sources("count(s for s in Student if s.group == g)"),
            vec!["count", "Student", "g"]
        );
        assert_eq!(sources("s for s in Student if s.id > len(ids)"), vec!["Student", "len(ids)"]);
    }

    #[test]
    fn test_nested_generator_scopes() {
        assert_eq!(
            sources("g for g in Group if count(s for s in g.students if s.gpa > x) > 1"),
            vec!["Group", "count", "x", "1"]
        );
    }

    #[test]
    fn test_outer_names_are_bound() {
        let tree = parse("s.gpa > limit").unwrap();
        let extraction = extract(&tree, &["s".to_string()]).unwrap();
        let srcs: Vec<_> = extraction.getters().map(|g| g.src.as_str()).collect();
        assert_eq!(srcs, vec!["limit"]);
        assert_eq!(extraction.src_of(3), Some("limit"));
        assert_eq!(extraction.src_of(0), None);
    }

    #[test]
    fn test_lambda_params_are_bound() {
        let tree = parse("lambda s: s.gpa > limit").unwrap();
        let extraction = extract(&tree, &[]).unwrap();
        let srcs: Vec<_> = extraction.getters().map(|g| g.src.as_str()).collect();
        assert_eq!(srcs, vec!["limit"]);

        let tree = parse("lambda *args: args").unwrap();
        assert!(extract(&tree, &[]).unwrap_err().is_not_implemented());
    }

    #[test]
    fn test_reserved_names_are_rejected() {
        let tree = parse("__x for __x in Student").unwrap();
        let err = extract(&tree, &[]).unwrap_err();
        assert_eq!(err, TranslateError::IllegalName("Illegal name: '__x'".into()));
    }

    #[test]
    fn test_mixed_list_is_not_extracted_whole() {
        assert_eq!(
            sources("s for s in Student if x in [s.name, y]"),
            vec!["Student", "x", "y"]
        );
    }

    #[test]
    fn test_extract_vars_types_and_errors() {
        let tree = parse("s for s in Student if s.gpa > x and s.name in names").unwrap();
        let extraction = extract(&tree, &[]).unwrap();
        let vars = Vars::new()
            .with("x", 3)
            .with("names", Value::List(vec!["A".into(), "B".into()]))
            .with("Student", Value::None);
        let env = Env::new(&vars, None);
        let extracted = extract_vars(0, &extraction, &env).unwrap();
        assert_eq!(extracted.types[1], ("x".to_string(), CanonicalType::INT));
        assert_eq!(
            extracted.types[2].1,
            CanonicalType::Tuple(vec![CanonicalType::Text, CanonicalType::Text])
        );
        assert!(matches!(
            extracted.values[&VarKey::new(0, "names")],
            Value::Tuple(_)
        ));

        let vars = Vars::new()
            .with("x", Value::Map(vec![]))
            .with("names", Value::None)
            .with("Student", Value::None);
        let err = extract_vars(0, &extraction, &Env::new(&vars, None)).unwrap_err();
        assert_eq!(err.to_string(), "Expression `x` has unsupported type 'dict'");

        let vars = Vars::new().with("Student", Value::None);
        let err = extract_vars(0, &extraction, &Env::new(&vars, None)).unwrap_err();
        assert_eq!(err.to_string(), "`x` raises NameError: name 'x' is not defined");
    }

    #[test]
    fn test_extraction_is_cached() {
        let tree = parse("s for s in Student if s.gpa > 2.5").unwrap();
        let a = extract_cached(&tree, &[]).unwrap();
        let b = extract_cached(&tree, &[]).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
