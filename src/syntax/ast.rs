//! Expression tree for query sources.
//!
//! The tree mirrors the subset of Python expression syntax accepted by the
//! parser. Nodes are immutable once parsed; per-pass facts (external,
//! constant, source text, monads) live in side tables keyed by [`NodeId`].

use serde::Serialize;

/// Byte range in the source text.
pub type Span = std::ops::Range<usize>;

/// Pre-order index of a node inside its tree.
pub type NodeId = u32;

/// A source-tree node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(skip)]
    pub span: Span,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum NodeKind {
    Name {
        id: String,
        ctx: NameCtx,
    },
    Const(Literal),
    Attribute {
        value: Box<Node>,
        attr: String,
    },
    /// Positional arguments, `Keyword` and `Starred` nodes, in source order.
    Call {
        func: Box<Node>,
        args: Vec<Node>,
    },
    Keyword {
        arg: String,
        value: Box<Node>,
    },
    Starred(Box<Node>),
    Compare {
        left: Box<Node>,
        ops: Vec<CmpOp>,
        comparators: Vec<Node>,
    },
    BoolOp {
        op: BoolOpKind,
        values: Vec<Node>,
    },
    BinOp {
        left: Box<Node>,
        op: BinOpKind,
        right: Box<Node>,
    },
    UnaryOp {
        op: UnaryOpKind,
        operand: Box<Node>,
    },
    IfExp {
        test: Box<Node>,
        body: Box<Node>,
        orelse: Box<Node>,
    },
    Tuple(Vec<Node>),
    List(Vec<Node>),
    Dict(Vec<(Node, Node)>),
    Subscript {
        value: Box<Node>,
        index: Box<Node>,
    },
    Slice {
        lower: Option<Box<Node>>,
        upper: Option<Box<Node>>,
        step: Option<Box<Node>>,
    },
    Lambda {
        params: Vec<LambdaParam>,
        body: Box<Node>,
    },
    GeneratorExp {
        elt: Box<Node>,
        generators: Vec<Comprehension>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NameCtx {
    Load,
    Store,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    None,
}

/// Comparison operators. `<>` is read as `!=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
}

impl CmpOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
            CmpOp::Is => "is",
            CmpOp::IsNot => "is not",
        }
    }

    /// The operator obtained by swapping operands, if any.
    pub fn inverse(&self) -> Option<CmpOp> {
        Some(match self {
            CmpOp::Eq => CmpOp::Eq,
            CmpOp::Ne => CmpOp::Ne,
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Ge => CmpOp::Le,
            CmpOp::Is => CmpOp::Is,
            CmpOp::IsNot => CmpOp::IsNot,
            CmpOp::In | CmpOp::NotIn => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BoolOpKind {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BinOpKind {
    Add,
    Sub,
    Mult,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
}

impl BinOpKind {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOpKind::Add => "+",
            BinOpKind::Sub => "-",
            BinOpKind::Mult => "*",
            BinOpKind::Div => "/",
            BinOpKind::FloorDiv => "//",
            BinOpKind::Mod => "%",
            BinOpKind::Pow => "**",
            BinOpKind::LShift => "<<",
            BinOpKind::RShift => ">>",
            BinOpKind::BitOr => "|",
            BinOpKind::BitXor => "^",
            BinOpKind::BitAnd => "&",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum UnaryOpKind {
    Not,
    Neg,
    Pos,
    Invert,
}

/// One `for target in iter if cond...` clause.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comprehension {
    pub target: Box<Node>,
    pub iter: Box<Node>,
    pub ifs: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum LambdaParam {
    Plain(String),
    Default(String, Box<Node>),
    VarArgs(String),
    KwArgs(String),
}

impl LambdaParam {
    pub fn name(&self) -> &str {
        match self {
            LambdaParam::Plain(n)
            | LambdaParam::Default(n, _)
            | LambdaParam::VarArgs(n)
            | LambdaParam::KwArgs(n) => n,
        }
    }
}

impl Node {
    pub fn new(kind: NodeKind, span: Span) -> Self {
        Self { id: 0, span, kind }
    }

    /// Span covering two nodes.
    pub fn join_span(a: &Node, b: &Node) -> Span {
        a.span.start.min(b.span.start)..a.span.end.max(b.span.end)
    }

    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Name { id, .. } => Some(id),
            _ => None,
        }
    }

    /// Direct children in source order.
    pub fn children(&self) -> Vec<&Node> {
        match &self.kind {
            NodeKind::Name { .. } | NodeKind::Const(_) => vec![],
            NodeKind::Attribute { value, .. } => vec![value],
            NodeKind::Call { func, args } => {
                let mut out = vec![func.as_ref()];
                out.extend(args);
                out
            }
            NodeKind::Keyword { value, .. } => vec![value],
            NodeKind::Starred(value) => vec![value],
            NodeKind::Compare {
                left, comparators, ..
            } => {
                let mut out = vec![left.as_ref()];
                out.extend(comparators);
                out
            }
            NodeKind::BoolOp { values, .. } => values.iter().collect(),
            NodeKind::BinOp { left, right, .. } => vec![left, right],
            NodeKind::UnaryOp { operand, .. } => vec![operand],
            NodeKind::IfExp { test, body, orelse } => vec![body, test, orelse],
            NodeKind::Tuple(items) | NodeKind::List(items) => items.iter().collect(),
            NodeKind::Dict(pairs) => pairs.iter().flat_map(|(k, v)| [k, v]).collect(),
            NodeKind::Subscript { value, index } => vec![value, index],
            NodeKind::Slice { lower, upper, step } => [lower, upper, step]
                .into_iter()
                .flatten()
                .map(|n| n.as_ref())
                .collect(),
            NodeKind::Lambda { params, body } => {
                let mut out: Vec<&Node> = params
                    .iter()
                    .filter_map(|p| match p {
                        LambdaParam::Default(_, d) => Some(d.as_ref()),
                        _ => None,
                    })
                    .collect();
                out.push(body);
                out
            }
            NodeKind::GeneratorExp { elt, generators } => {
                let mut out = vec![elt.as_ref()];
                for gen in generators {
                    out.push(&gen.target);
                    out.push(&gen.iter);
                    out.extend(&gen.ifs);
                }
                out
            }
        }
    }

    fn children_mut(&mut self) -> Vec<&mut Node> {
        match &mut self.kind {
            NodeKind::Name { .. } | NodeKind::Const(_) => vec![],
            NodeKind::Attribute { value, .. } => vec![value],
            NodeKind::Call { func, args } => {
                let mut out = vec![func.as_mut()];
                out.extend(args.iter_mut());
                out
            }
            NodeKind::Keyword { value, .. } => vec![value],
            NodeKind::Starred(value) => vec![value],
            NodeKind::Compare {
                left, comparators, ..
            } => {
                let mut out = vec![left.as_mut()];
                out.extend(comparators.iter_mut());
                out
            }
            NodeKind::BoolOp { values, .. } => values.iter_mut().collect(),
            NodeKind::BinOp { left, right, .. } => vec![left, right],
            NodeKind::UnaryOp { operand, .. } => vec![operand],
            NodeKind::IfExp { test, body, orelse } => vec![body, test, orelse],
            NodeKind::Tuple(items) | NodeKind::List(items) => items.iter_mut().collect(),
            NodeKind::Dict(pairs) => pairs.iter_mut().flat_map(|(k, v)| [k, v]).collect(),
            NodeKind::Subscript { value, index } => vec![value, index],
            NodeKind::Slice { lower, upper, step } => [lower, upper, step]
                .into_iter()
                .flatten()
                .map(|n| n.as_mut())
                .collect(),
            NodeKind::Lambda { params, body } => {
                let mut out: Vec<&mut Node> = params
                    .iter_mut()
                    .filter_map(|p| match p {
                        LambdaParam::Default(_, d) => Some(d.as_mut()),
                        _ => None,
                    })
                    .collect();
                out.push(body);
                out
            }
            NodeKind::GeneratorExp { elt, generators } => {
                let mut out = vec![elt.as_mut()];
                for gen in generators.iter_mut() {
                    out.push(gen.target.as_mut());
                    out.push(gen.iter.as_mut());
                    out.extend(gen.ifs.iter_mut());
                }
                out
            }
        }
    }

    /// Assign pre-order ids starting at `next`; returns the next free id.
    pub fn number(&mut self, next: NodeId) -> NodeId {
        self.id = next;
        let mut next = next + 1;
        for child in self.children_mut() {
            next = child.number(next);
        }
        next
    }

    /// Visit every node of the subtree in pre-order.
    pub fn for_each<'a>(&'a self, f: &mut impl FnMut(&'a Node)) {
        f(self);
        for child in self.children() {
            child.for_each(f);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(id: &str) -> Node {
        Node::new(
            NodeKind::Name {
                id: id.into(),
                ctx: NameCtx::Load,
            },
            0..0,
        )
    }

    #[test]
    fn test_numbering_is_preorder() {
        let mut node = Node::new(
            NodeKind::BinOp {
                left: Box::new(name("a")),
                op: BinOpKind::Add,
                right: Box::new(Node::new(
                    NodeKind::Attribute {
                        value: Box::new(name("b")),
                        attr: "c".into(),
                    },
                    0..0,
                )),
            },
            0..0,
        );
        assert_eq!(node.number(0), 4);
        let mut ids = vec![];
        node.for_each(&mut |n| ids.push(n.id));
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_ifexp_children_in_source_order() {
        let node = Node::new(
            NodeKind::IfExp {
                test: Box::new(name("t")),
                body: Box::new(name("b")),
                orelse: Box::new(name("o")),
            },
            0..0,
        );
        let names: Vec<_> = node.children().iter().filter_map(|n| n.name()).collect();
        assert_eq!(names, vec!["b", "t", "o"]);
    }

    #[test]
    fn test_cmp_inverse() {
        assert_eq!(CmpOp::Lt.inverse(), Some(CmpOp::Gt));
        assert_eq!(CmpOp::In.inverse(), None);
    }
}
