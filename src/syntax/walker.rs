//! Generic pre/post traversal of expression trees.

use super::ast::Node;

/// Whether a `pre` hook lets the walker descend into the children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    Continue,
    /// Skip the children; `post` still runs for the node itself.
    Stop,
}

/// Hooks invoked around every node of a tree.
///
/// Implementors match exhaustively on [`NodeKind`](super::NodeKind) inside
/// `post`; kinds they do not support must produce an error there.
pub trait Visitor {
    type Output;
    type Error;

    fn pre(&mut self, _node: &Node) -> Result<Walk, Self::Error> {
        Ok(Walk::Continue)
    }

    fn post(&mut self, node: &Node) -> Result<Self::Output, Self::Error>;

    /// Receives the result of `post` for every node.
    fn record(&mut self, _node: &Node, _output: Self::Output) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Walk `node`, calling `pre` before and `post` after its children.
pub fn walk<V: Visitor + ?Sized>(visitor: &mut V, node: &Node) -> Result<(), V::Error> {
    if visitor.pre(node)? == Walk::Continue {
        for child in node.children() {
            walk(visitor, child)?;
        }
    }
    let output = visitor.post(node)?;
    visitor.record(node, output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::{parse, NodeKind};

    struct Trace(Vec<String>);

    impl Visitor for Trace {
        type Output = String;
        type Error = String;

        fn pre(&mut self, node: &Node) -> Result<Walk, String> {
            Ok(match node.kind {
                NodeKind::Lambda { .. } => Walk::Stop,
                _ => Walk::Continue,
            })
        }

        fn post(&mut self, node: &Node) -> Result<String, String> {
            match &node.kind {
                NodeKind::Name { id, .. } => Ok(id.clone()),
                NodeKind::Attribute { attr, .. } => Ok(format!(".{}", attr)),
                NodeKind::Lambda { .. } => Ok("lambda".into()),
                NodeKind::Call { .. } => Ok("call".into()),
                other => Err(format!("unsupported {:?}", other)),
            }
        }

        fn record(&mut self, _node: &Node, output: String) -> Result<(), String> {
            self.0.push(output);
            Ok(())
        }
    }

    #[test]
    fn test_post_order_with_stop() {
        let tree = parse("f(a.b, lambda x: x.y)").unwrap();
        let mut trace = Trace(vec![]);
        walk(&mut trace, &tree.root).unwrap();
        assert_eq!(trace.0, vec!["f", "a", ".b", "lambda", "call"]);
    }

    #[test]
    fn test_unsupported_kind_fails() {
        let tree = parse("a + b").unwrap();
        let mut trace = Trace(vec![]);
        assert!(walk(&mut trace, &tree.root).is_err());
    }
}
