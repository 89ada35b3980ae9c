//! Parser for query source text using chumsky.
//!
//! Transforms the token stream from the lexer into a [`Node`] tree. The
//! grammar follows Python's expression grammar from `lambda`/conditional
//! expressions down to atoms, plus generator expressions.

use chumsky::input::ValueInput;
use chumsky::prelude::*;

use super::ast::*;
use super::lexer::Token;

type ParserExtra<'tokens, 'src> = extra::Err<Rich<'tokens, Token<'src>, SimpleSpan>>;

fn to_span(span: SimpleSpan) -> Span {
    span.start..span.end
}

fn binop(left: Node, op: BinOpKind, right: Node) -> Node {
    let span = Node::join_span(&left, &right);
    Node::new(
        NodeKind::BinOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        },
        span,
    )
}

/// Suffix applied to a primary expression.
#[derive(Clone)]
enum Postfix {
    Attr(String),
    Call(Vec<Node>),
    Index(Node),
}

/// What follows the first item inside parentheses.
#[derive(Clone)]
enum ParenTail {
    Generator(Vec<Comprehension>),
    Tuple(Vec<Node>),
}

/// Create the expression parser.
///
/// The parser accepts either a single expression or a bare generator
/// expression (`x for x in X`) spanning the whole input.
pub fn parser<'tokens, 'src: 'tokens, I>(
) -> impl Parser<'tokens, I, Node, ParserExtra<'tokens, 'src>> + Clone
where
    I: ValueInput<'tokens, Token = Token<'src>, Span = SimpleSpan>,
{
    let mut test = Recursive::declare();
    let mut or_test = Recursive::declare();
    let mut unary = Recursive::declare();
    let mut not_test = Recursive::declare();

    let ident = select! {
        Token::Name(s) => s.to_string(),
    }
    .labelled("identifier");

    // ==========================================================================
    // Comprehensions
    // ==========================================================================

    let store_name = ident.clone().map_with(|id, e| {
        Node::new(
            NodeKind::Name {
                id,
                ctx: NameCtx::Store,
            },
            to_span(e.span()),
        )
    });
    let bare_targets = store_name
        .clone()
        .separated_by(just(Token::Comma))
        .at_least(1)
        .collect::<Vec<_>>()
        .map_with(|mut names: Vec<Node>, e| {
            if names.len() == 1 {
                names.remove(0)
            } else {
                Node::new(NodeKind::Tuple(names), to_span(e.span()))
            }
        });
    let paren_targets = store_name
        .separated_by(just(Token::Comma))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LParen), just(Token::RParen))
        .map_with(|names, e| Node::new(NodeKind::Tuple(names), to_span(e.span())));
    let target = paren_targets.or(bare_targets).labelled("loop variable");

    let comp_for = just(Token::For)
        .ignore_then(target)
        .then_ignore(just(Token::In))
        .then(or_test.clone())
        .then(
            just(Token::If)
                .ignore_then(or_test.clone())
                .repeated()
                .collect::<Vec<_>>(),
        )
        .map(|((target, iter), ifs)| Comprehension {
            target: Box::new(target),
            iter: Box::new(iter),
            ifs,
        });
    let comp_fors = comp_for.repeated().at_least(1).collect::<Vec<_>>();

    // `elt` optionally followed by `for ...` clauses.
    let maybe_generator = test
        .clone()
        .then(comp_fors.clone().or_not())
        .map_with(|(elt, generators): (Node, Option<Vec<Comprehension>>), e| match generators {
            Some(generators) => Node::new(
                NodeKind::GeneratorExp {
                    elt: Box::new(elt),
                    generators,
                },
                to_span(e.span()),
            ),
            None => elt,
        });

    // ==========================================================================
    // Atoms
    // ==========================================================================

    let literal = choice((
        select! { Token::Int(s) => s }.try_map(|s: &str, span| {
            s.parse::<i64>()
                .map(Literal::Int)
                .map_err(|err| Rich::custom(span, format!("invalid integer literal: {err}")))
        }),
        select! { Token::Float(s) => s }.try_map(|s: &str, span| {
            s.parse::<f64>()
                .map(Literal::Float)
                .map_err(|err| Rich::custom(span, format!("invalid float literal: {err}")))
        }),
        select! {
            Token::Str(s) => Literal::Str(s),
            Token::True => Literal::Bool(true),
            Token::False => Literal::Bool(false),
            Token::None => Literal::None,
        },
    ))
    .map_with(|lit, e| Node::new(NodeKind::Const(lit), to_span(e.span())))
    .labelled("literal");

    let name = ident.clone().map_with(|id, e| {
        Node::new(
            NodeKind::Name {
                id,
                ctx: NameCtx::Load,
            },
            to_span(e.span()),
        )
    });

    let paren = test
        .clone()
        .then(
            choice((
                comp_fors.clone().map(ParenTail::Generator),
                just(Token::Comma)
                    .ignore_then(
                        test.clone()
                            .separated_by(just(Token::Comma))
                            .allow_trailing()
                            .collect::<Vec<_>>(),
                    )
                    .map(ParenTail::Tuple),
            ))
            .or_not(),
        )
        .or_not()
        .delimited_by(just(Token::LParen), just(Token::RParen))
        .map_with(|body, e| {
            let span = to_span(e.span());
            match body {
                None => Node::new(NodeKind::Tuple(vec![]), span),
                Some((inner, None)) => inner,
                Some((elt, Some(ParenTail::Generator(generators)))) => Node::new(
                    NodeKind::GeneratorExp {
                        elt: Box::new(elt),
                        generators,
                    },
                    span,
                ),
                Some((first, Some(ParenTail::Tuple(rest)))) => {
                    let mut items = vec![first];
                    items.extend(rest);
                    Node::new(NodeKind::Tuple(items), span)
                }
            }
        });

    let list = test
        .clone()
        .separated_by(just(Token::Comma))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LBracket), just(Token::RBracket))
        .map_with(|items, e| Node::new(NodeKind::List(items), to_span(e.span())));

    let dict = test
        .clone()
        .then_ignore(just(Token::Colon))
        .then(test.clone())
        .separated_by(just(Token::Comma))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LBrace), just(Token::RBrace))
        .map_with(|pairs, e| Node::new(NodeKind::Dict(pairs), to_span(e.span())));

    let atom = choice((literal, name, paren, list, dict)).boxed();

    // ==========================================================================
    // Postfix: attribute access, calls, subscripts
    // ==========================================================================

    let keyword_arg = ident
        .clone()
        .then_ignore(just(Token::Assign))
        .then(test.clone())
        .map_with(|(arg, value), e| {
            Node::new(
                NodeKind::Keyword {
                    arg,
                    value: Box::new(value),
                },
                to_span(e.span()),
            )
        });
    let starred_arg = just(Token::Star)
        .ignore_then(test.clone())
        .map_with(|value, e| Node::new(NodeKind::Starred(Box::new(value)), to_span(e.span())));
    let call_args = choice((keyword_arg, starred_arg, maybe_generator.clone()))
        .separated_by(just(Token::Comma))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LParen), just(Token::RParen));

    let slice = test
        .clone()
        .or_not()
        .then_ignore(just(Token::Colon))
        .then(test.clone().or_not())
        .then(just(Token::Colon).ignore_then(test.clone().or_not()).or_not())
        .map_with(|((lower, upper), step), e| {
            Node::new(
                NodeKind::Slice {
                    lower: lower.map(Box::new),
                    upper: upper.map(Box::new),
                    step: step.flatten().map(Box::new),
                },
                to_span(e.span()),
            )
        });
    let subscript = slice
        .or(test.clone())
        .delimited_by(just(Token::LBracket), just(Token::RBracket));

    let postfix_op = choice((
        just(Token::Dot).ignore_then(ident.clone()).map(Postfix::Attr),
        call_args.map(Postfix::Call),
        subscript.map(Postfix::Index),
    ))
    .map_with(|op, e| (op, to_span(e.span()).end));

    let primary = atom
        .foldl(postfix_op.repeated(), |value, (op, end)| {
            let span = value.span.start..end;
            let kind = match op {
                Postfix::Attr(attr) => NodeKind::Attribute {
                    value: Box::new(value),
                    attr,
                },
                Postfix::Call(args) => NodeKind::Call {
                    func: Box::new(value),
                    args,
                },
                Postfix::Index(index) => NodeKind::Subscript {
                    value: Box::new(value),
                    index: Box::new(index),
                },
            };
            Node::new(kind, span)
        })
        .boxed();

    // ==========================================================================
    // Arithmetic and bitwise operators
    // ==========================================================================

    let power = primary
        .then(just(Token::DoubleStar).ignore_then(unary.clone()).or_not())
        .map(|(base, exponent)| match exponent {
            Some(exponent) => binop(base, BinOpKind::Pow, exponent),
            None => base,
        });

    unary.define(
        select! {
            Token::Minus => UnaryOpKind::Neg,
            Token::Plus => UnaryOpKind::Pos,
            Token::Tilde => UnaryOpKind::Invert,
        }
        .map_with(|op, e| (op, to_span(e.span()).start))
        .then(unary.clone())
        .map(|((op, start), operand): ((UnaryOpKind, usize), Node)| {
            let span = start..operand.span.end;
            Node::new(
                NodeKind::UnaryOp {
                    op,
                    operand: Box::new(operand),
                },
                span,
            )
        })
        .or(power),
    );

    let term = unary
        .clone()
        .foldl(
            select! {
                Token::Star => BinOpKind::Mult,
                Token::Slash => BinOpKind::Div,
                Token::DoubleSlash => BinOpKind::FloorDiv,
                Token::Percent => BinOpKind::Mod,
            }
            .then(unary.clone())
            .repeated(),
            |left, (op, right)| binop(left, op, right),
        )
        .boxed();

    let arith = term
        .clone()
        .foldl(
            select! {
                Token::Plus => BinOpKind::Add,
                Token::Minus => BinOpKind::Sub,
            }
            .then(term)
            .repeated(),
            |left, (op, right)| binop(left, op, right),
        )
        .boxed();

    let shift = arith
        .clone()
        .foldl(
            select! {
                Token::LShift => BinOpKind::LShift,
                Token::RShift => BinOpKind::RShift,
            }
            .then(arith)
            .repeated(),
            |left, (op, right)| binop(left, op, right),
        )
        .boxed();

    let band = shift
        .clone()
        .foldl(
            just(Token::Amp).to(BinOpKind::BitAnd).then(shift).repeated(),
            |left, (op, right)| binop(left, op, right),
        )
        .boxed();

    let bxor = band
        .clone()
        .foldl(
            just(Token::Caret).to(BinOpKind::BitXor).then(band).repeated(),
            |left, (op, right)| binop(left, op, right),
        )
        .boxed();

    let bor = bxor
        .clone()
        .foldl(
            just(Token::Pipe).to(BinOpKind::BitOr).then(bxor).repeated(),
            |left, (op, right)| binop(left, op, right),
        )
        .boxed();

    // ==========================================================================
    // Comparisons and boolean operators
    // ==========================================================================

    let cmp_op = choice((
        select! {
            Token::EqEq => CmpOp::Eq,
            Token::NotEq => CmpOp::Ne,
            Token::Lt => CmpOp::Lt,
            Token::Le => CmpOp::Le,
            Token::Gt => CmpOp::Gt,
            Token::Ge => CmpOp::Ge,
            Token::In => CmpOp::In,
        },
        just(Token::Not).then(just(Token::In)).to(CmpOp::NotIn),
        just(Token::Is).then(just(Token::Not)).to(CmpOp::IsNot),
        just(Token::Is).to(CmpOp::Is),
    ))
    .labelled("comparison operator");

    let comparison = bor
        .clone()
        .then(cmp_op.then(bor).repeated().collect::<Vec<_>>())
        .map(|(left, rest): (Node, Vec<(CmpOp, Node)>)| {
            if rest.is_empty() {
                return left;
            }
            let end = rest.last().map_or(left.span.end, |(_, n)| n.span.end);
            let span = left.span.start..end;
            let (ops, comparators) = rest.into_iter().unzip();
            Node::new(
                NodeKind::Compare {
                    left: Box::new(left),
                    ops,
                    comparators,
                },
                span,
            )
        });

    not_test.define(
        just(Token::Not)
            .map_with(|_, e| to_span(e.span()).start)
            .then(not_test.clone())
            .map(|(start, operand): (usize, Node)| {
                let span = start..operand.span.end;
                Node::new(
                    NodeKind::UnaryOp {
                        op: UnaryOpKind::Not,
                        operand: Box::new(operand),
                    },
                    span,
                )
            })
            .or(comparison),
    );

    let bool_chain = |op: BoolOpKind| {
        move |mut values: Vec<Node>| {
            if values.len() == 1 {
                return values.remove(0);
            }
            let start = values.first().map_or(0, |n| n.span.start);
            let end = values.last().map_or(0, |n| n.span.end);
            Node::new(NodeKind::BoolOp { op, values }, start..end)
        }
    };

    let and_test = not_test
        .clone()
        .separated_by(just(Token::And))
        .at_least(1)
        .collect::<Vec<_>>()
        .map(bool_chain(BoolOpKind::And));

    or_test.define(
        and_test
            .separated_by(just(Token::Or))
            .at_least(1)
            .collect::<Vec<_>>()
            .map(bool_chain(BoolOpKind::Or)),
    );

    // ==========================================================================
    // Conditional expressions and lambdas
    // ==========================================================================

    let conditional = or_test
        .clone()
        .then(
            just(Token::If)
                .ignore_then(or_test.clone())
                .then_ignore(just(Token::Else))
                .then(test.clone())
                .or_not(),
        )
        .map(|(body, rest): (Node, Option<(Node, Node)>)| match rest {
            Some((cond, orelse)) => {
                let span = body.span.start..orelse.span.end;
                Node::new(
                    NodeKind::IfExp {
                        test: Box::new(cond),
                        body: Box::new(body),
                        orelse: Box::new(orelse),
                    },
                    span,
                )
            }
            None => body,
        });

    let lambda_param = choice((
        just(Token::DoubleStar)
            .ignore_then(ident.clone())
            .map(LambdaParam::KwArgs),
        just(Token::Star)
            .ignore_then(ident.clone())
            .map(LambdaParam::VarArgs),
        ident
            .clone()
            .then_ignore(just(Token::Assign))
            .then(test.clone())
            .map(|(name, default)| LambdaParam::Default(name, Box::new(default))),
        ident.map(LambdaParam::Plain),
    ));

    let lambda = just(Token::Lambda)
        .ignore_then(
            lambda_param
                .separated_by(just(Token::Comma))
                .collect::<Vec<_>>(),
        )
        .then_ignore(just(Token::Colon))
        .then(test.clone())
        .map_with(|(params, body), e| {
            Node::new(
                NodeKind::Lambda {
                    params,
                    body: Box::new(body),
                },
                to_span(e.span()),
            )
        });

    test.define(lambda.or(conditional));

    maybe_generator.then_ignore(end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::lexer::lex;

    fn parse_ok(src: &str) -> Node {
        let tokens = lex(src).expect("lexing should succeed");
        let len = src.len();
        let eoi: SimpleSpan = (len..len).into();
        let stream = tokens
            .as_slice()
            .map(eoi, |(tok, span): &(Token<'_>, SimpleSpan)| (tok, span));
        let (node, errs) = parser().parse(stream).into_output_errors();
        assert!(errs.is_empty(), "unexpected errors: {:?}", errs);
        node.expect("parse should produce a node")
    }

    #[test]
    fn test_parse_bare_generator() {
        let node = parse_ok("s for s in Student if s.gpa > 3.0");
        match node.kind {
            NodeKind::GeneratorExp { elt, generators } => {
                assert_eq!(elt.name(), Some("s"));
                assert_eq!(generators.len(), 1);
                assert_eq!(generators[0].iter.name(), Some("Student"));
                assert_eq!(generators[0].ifs.len(), 1);
                assert!(matches!(
                    generators[0].target.kind,
                    NodeKind::Name {
                        ctx: NameCtx::Store,
                        ..
                    }
                ));
            }
            other => panic!("expected generator, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_call_with_generator_argument() {
        let node = parse_ok("count(s for s in Student if s.group == g)");
        match node.kind {
            NodeKind::Call { func, args } => {
                assert_eq!(func.name(), Some("count"));
                assert_eq!(args.len(), 1);
                assert!(matches!(args[0].kind, NodeKind::GeneratorExp { .. }));
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_precedence() {
        let node = parse_ok("a + b * c");
        match node.kind {
            NodeKind::BinOp { op, right, .. } => {
                assert_eq!(op, BinOpKind::Add);
                assert!(matches!(
                    right.kind,
                    NodeKind::BinOp {
                        op: BinOpKind::Mult,
                        ..
                    }
                ));
            }
            other => panic!("expected binop, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_power_right_assoc_and_unary() {
        let node = parse_ok("-a ** b ** c");
        match node.kind {
            NodeKind::UnaryOp { op, operand } => {
                assert_eq!(op, UnaryOpKind::Neg);
                match operand.kind {
                    NodeKind::BinOp { op, right, .. } => {
                        assert_eq!(op, BinOpKind::Pow);
                        assert!(matches!(
                            right.kind,
                            NodeKind::BinOp {
                                op: BinOpKind::Pow,
                                ..
                            }
                        ));
                    }
                    other => panic!("expected power, got {:?}", other),
                }
            }
            other => panic!("expected unary, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_compare_chain_and_not_in() {
        let node = parse_ok("a < b not in c");
        match node.kind {
            NodeKind::Compare {
                ops, comparators, ..
            } => {
                assert_eq!(ops, vec![CmpOp::Lt, CmpOp::NotIn]);
                assert_eq!(comparators.len(), 2);
            }
            other => panic!("expected compare, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_is_not() {
        let node = parse_ok("x is not None");
        assert!(matches!(
            node.kind,
            NodeKind::Compare { ref ops, .. } if ops == &vec![CmpOp::IsNot]
        ));
    }

    #[test]
    fn test_parse_tuples() {
        assert!(matches!(parse_ok("()").kind, NodeKind::Tuple(ref v) if v.is_empty()));
        assert!(matches!(parse_ok("(a,)").kind, NodeKind::Tuple(ref v) if v.len() == 1));
        assert!(matches!(parse_ok("(a, b)").kind, NodeKind::Tuple(ref v) if v.len() == 2));
        assert!(matches!(parse_ok("(a)").kind, NodeKind::Name { .. }));
    }

    #[test]
    fn test_parse_slices() {
        let node = parse_ok("s.name[1:3]");
        match node.kind {
            NodeKind::Subscript { index, .. } => {
                assert!(matches!(
                    index.kind,
                    NodeKind::Slice {
                        lower: Some(_),
                        upper: Some(_),
                        step: None
                    }
                ));
            }
            other => panic!("expected subscript, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_lambda() {
        let node = parse_ok("lambda s, t=1: s.gpa > t");
        match node.kind {
            NodeKind::Lambda { params, .. } => {
                assert_eq!(params.len(), 2);
                assert!(matches!(params[1], LambdaParam::Default(..)));
            }
            other => panic!("expected lambda, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_conditional_and_bool_ops() {
        let node = parse_ok("a if b and c or d else e");
        match node.kind {
            NodeKind::IfExp { test, .. } => {
                assert!(matches!(
                    test.kind,
                    NodeKind::BoolOp {
                        op: BoolOpKind::Or,
                        ..
                    }
                ));
            }
            other => panic!("expected conditional, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_tuple_targets() {
        let node = parse_ok("(a, b) for a, b in X");
        match node.kind {
            NodeKind::GeneratorExp { generators, .. } => {
                assert!(matches!(generators[0].target.kind, NodeKind::Tuple(ref v) if v.len() == 2));
            }
            other => panic!("expected generator, got {:?}", other),
        }
    }
}
