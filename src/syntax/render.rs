//! Source-text reconstruction.
//!
//! Renders a tree back to text, adding parentheses only where operator
//! priority requires them. The output is used as the key of external
//! parameters and as plan-cache text, so it must be stable: the same tree
//! always renders to the same string.

use super::ast::*;

/// Binding priority of a node; lower binds tighter.
pub fn priority(node: &Node) -> u8 {
    match &node.kind {
        NodeKind::Lambda { .. } => 16,
        NodeKind::IfExp { .. } => 15,
        NodeKind::BoolOp {
            op: BoolOpKind::Or, ..
        } => 14,
        NodeKind::BoolOp {
            op: BoolOpKind::And,
            ..
        } => 13,
        NodeKind::UnaryOp {
            op: UnaryOpKind::Not,
            ..
        } => 12,
        NodeKind::Compare { .. } => 11,
        NodeKind::BinOp { op, .. } => match op {
            BinOpKind::BitOr => 10,
            BinOpKind::BitXor => 9,
            BinOpKind::BitAnd => 8,
            BinOpKind::LShift | BinOpKind::RShift => 7,
            BinOpKind::Add | BinOpKind::Sub => 6,
            BinOpKind::Mult | BinOpKind::Div | BinOpKind::FloorDiv | BinOpKind::Mod => 5,
            BinOpKind::Pow => 3,
        },
        NodeKind::UnaryOp { .. } => 4,
        NodeKind::Attribute { .. } | NodeKind::Call { .. } | NodeKind::Subscript { .. } => 2,
        _ => 1,
    }
}

/// Render a node back to source text.
pub fn render(node: &Node) -> String {
    let own = priority(node);
    match &node.kind {
        NodeKind::Name { id, .. } => id.clone(),
        NodeKind::Const(lit) => render_literal(lit),
        NodeKind::Attribute { value, attr } => format!("{}.{}", primary(value), attr),
        NodeKind::Call { func, args } => {
            let args = match args.as_slice() {
                [only] if matches!(only.kind, NodeKind::GeneratorExp { .. }) => {
                    render_generator_body(only)
                }
                _ => join(args.iter().map(render), ", "),
            };
            format!("{}({})", primary(func), args)
        }
        NodeKind::Keyword { arg, value } => format!("{}={}", arg, render(value)),
        NodeKind::Starred(value) => format!("*{}", operand(value, own)),
        NodeKind::Compare {
            left,
            ops,
            comparators,
        } => {
            let mut out = operand(left, own);
            for (op, right) in ops.iter().zip(comparators) {
                out.push(' ');
                out.push_str(op.symbol());
                out.push(' ');
                out.push_str(&operand(right, own));
            }
            out
        }
        NodeKind::BoolOp { op, values } => {
            let sep = match op {
                BoolOpKind::And => " and ",
                BoolOpKind::Or => " or ",
            };
            join(values.iter().map(|v| operand(v, own)), sep)
        }
        NodeKind::BinOp { left, op, right } => format!(
            "{} {} {}",
            operand(left, own),
            op.symbol(),
            operand(right, own)
        ),
        NodeKind::UnaryOp { op, operand: inner } => {
            let prefix = match op {
                UnaryOpKind::Not => "not ",
                UnaryOpKind::Neg => "-",
                UnaryOpKind::Pos => "+",
                UnaryOpKind::Invert => "~",
            };
            format!("{}{}", prefix, operand(inner, own))
        }
        NodeKind::IfExp { test, body, orelse } => format!(
            "{} if {} else {}",
            operand(body, own),
            operand(test, own),
            operand(orelse, own)
        ),
        NodeKind::Tuple(items) => match items.as_slice() {
            [only] => format!("({},)", render(only)),
            _ => format!("({})", join(items.iter().map(render), ", ")),
        },
        NodeKind::List(items) => format!("[{}]", join(items.iter().map(render), ", ")),
        NodeKind::Dict(pairs) => format!(
            "{{{}}}",
            join(
                pairs
                    .iter()
                    .map(|(k, v)| format!("{}: {}", render(k), render(v))),
                ", "
            )
        ),
        NodeKind::Subscript { value, index } => {
            format!("{}[{}]", primary(value), render(index))
        }
        NodeKind::Slice { lower, upper, step } => {
            let part = |n: &Option<Box<Node>>| n.as_deref().map(render).unwrap_or_default();
            match step {
                Some(_) => format!("{}:{}:{}", part(lower), part(upper), part(step)),
                None => format!("{}:{}", part(lower), part(upper)),
            }
        }
        NodeKind::Lambda { params, body } => {
            let params = join(
                params.iter().map(|p| match p {
                    LambdaParam::Plain(n) => n.clone(),
                    LambdaParam::Default(n, d) => format!("{}={}", n, render(d)),
                    LambdaParam::VarArgs(n) => format!("*{}", n),
                    LambdaParam::KwArgs(n) => format!("**{}", n),
                }),
                ", ",
            );
            if params.is_empty() {
                format!("lambda: {}", render(body))
            } else {
                format!("lambda {}: {}", params, render(body))
            }
        }
        NodeKind::GeneratorExp { .. } => format!("({})", render_generator_body(node)),
    }
}

/// Render every node of the tree, indexed by node id.
pub fn render_all(root: &Node) -> Vec<String> {
    let mut out = Vec::new();
    root.for_each(&mut |node| {
        let idx = node.id as usize;
        if out.len() <= idx {
            out.resize(idx + 1, String::new());
        }
        out[idx] = render(node);
    });
    out
}

fn render_generator_body(node: &Node) -> String {
    let NodeKind::GeneratorExp { elt, generators } = &node.kind else {
        return render(node);
    };
    let mut out = render(elt);
    for gen in generators {
        let target = match &gen.target.kind {
            NodeKind::Tuple(names) => join(names.iter().map(render), ", "),
            _ => render(&gen.target),
        };
        out.push_str(&format!(" for {} in {}", target, render(&gen.iter)));
        for cond in &gen.ifs {
            out.push_str(&format!(" if {}", render(cond)));
        }
    }
    out
}

fn operand(child: &Node, parent_priority: u8) -> String {
    let text = render(child);
    if priority(child) >= parent_priority && priority(child) > 1 {
        format!("({})", text)
    } else {
        text
    }
}

fn primary(child: &Node) -> String {
    let text = render(child);
    if priority(child) > 2 {
        format!("({})", text)
    } else {
        text
    }
}

fn join(items: impl Iterator<Item = String>, sep: &str) -> String {
    items.collect::<Vec<_>>().join(sep)
}

fn render_literal(lit: &Literal) -> String {
    match lit {
        Literal::Int(i) => i.to_string(),
        Literal::Float(f) => render_float(*f),
        Literal::Str(s) => python_repr(s),
        Literal::Bool(true) => "True".into(),
        Literal::Bool(false) => "False".into(),
        Literal::None => "None".into(),
    }
}

fn render_float(f: f64) -> String {
    if !f.is_finite() {
        return if f.is_nan() {
            "nan".into()
        } else if f > 0.0 {
            "inf".into()
        } else {
            "-inf".into()
        };
    }
    ryu::Buffer::new().format_finite(f).to_string()
}

/// Quote a string the way Python's `repr` does.
pub fn python_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::parse;

    fn round(src: &str) -> String {
        render(&parse(src).unwrap().root)
    }

    #[test]
    fn test_keeps_required_parens() {
        assert_eq!(round("(a + b) * c"), "(a + b) * c");
        assert_eq!(round("a * b + c"), "a * b + c");
        assert_eq!(round("a*(b+c)"), "a * (b + c)");
    }

    #[test]
    fn test_attribute_chain_unparenthesized() {
        assert_eq!(round("s.group.dept.name"), "s.group.dept.name");
        assert_eq!(round("(a + b).c"), "(a + b).c");
    }

    #[test]
    fn test_generator_argument_not_double_parenthesized() {
        assert_eq!(
            round("count(s for s in Student if s.group == g)"),
            "count(s for s in Student if s.group == g)"
        );
        assert_eq!(
            round("s for s in Student if s.gpa > 3.0"),
            "(s for s in Student if s.gpa > 3.0)"
        );
    }

    #[test]
    fn test_tuples_and_strings() {
        assert_eq!(round("(x,)"), "(x,)");
        assert_eq!(round("s.name in (\"A\", 'B')"), "s.name in ('A', 'B')");
        assert_eq!(python_repr("it's"), "\"it's\"");
        assert_eq!(python_repr("a'b\"c"), "'a\\'b\"c'");
    }

    #[test]
    fn test_boolean_and_not() {
        assert_eq!(round("not (a or b) and c"), "not (a or b) and c");
        assert_eq!(round("not a == b"), "not a == b");
    }

    #[test]
    fn test_conditional_and_lambda() {
        assert_eq!(round("lambda s: s.gpa"), "lambda s: s.gpa");
        assert_eq!(round("a if b else c"), "a if b else c");
    }

    #[test]
    fn test_slices() {
        assert_eq!(round("s.name[1:3]"), "s.name[1:3]");
        assert_eq!(round("s.name[:2]"), "s.name[:2]");
        assert_eq!(round("x[::2]"), "x[::2]");
    }

    #[test]
    fn test_float_repr() {
        assert_eq!(round("3.0"), "3.0");
        assert_eq!(round("2.5"), "2.5");
    }
}
