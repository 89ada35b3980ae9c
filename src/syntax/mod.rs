//! Query source syntax.
//!
//! Query sources are written as Python-style generator expressions:
//!
//! ```text
//! s for s in Student if s.gpa > min_gpa
//! count(s for s in Student if s.group == g)
//! (g.number, count(g.students)) for g in Group if len(g.students) > 1
//! ```
//!
//! [`parse`] turns the text into a [`QueryTree`]: the node tree with
//! pre-order ids, the rendered source of every node, and a content hash
//! that identifies the tree in plan caches.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod render;
pub mod walker;

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::Serialize;

pub use ast::*;
pub use render::render;
pub use walker::{walk, Visitor, Walk};

use crate::cache::compute_hash;

/// Content hash of a parsed tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TreeId(String);

impl TreeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0[..self.0.len().min(12)])
    }
}

/// A parsed query source.
#[derive(Debug, Clone)]
pub struct QueryTree {
    pub root: Node,
    /// Rendered source text of each node, indexed by node id.
    src: Vec<String>,
    pub id: TreeId,
    pub text: String,
}

impl QueryTree {
    /// Build a tree from an already parsed root, numbering its nodes.
    pub fn from_root(mut root: Node, text: impl Into<String>) -> Result<Self, ParseError> {
        let text = text.into();
        root.number(0);
        let id = compute_hash(&root).map_err(|err| {
            ParseError::new(
                text.clone(),
                vec![Diagnostic::error(0..text.len(), err.to_string())],
            )
        })?;
        let src = render::render_all(&root);
        Ok(Self {
            root,
            src,
            id: TreeId(id),
            text,
        })
    }

    /// Rendered source of a node of this tree.
    pub fn src(&self, id: NodeId) -> &str {
        self.src.get(id as usize).map(String::as_str).unwrap_or("")
    }

    pub fn node_count(&self) -> usize {
        self.src.len()
    }
}

/// A diagnostic message with source location.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub span: Span,
    pub message: String,
}

impl Diagnostic {
    pub fn error(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at {:?})", self.message, self.span)
    }
}

/// The source could not be parsed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Invalid query syntax in `{text}`: {}", first_message(.diagnostics))]
pub struct ParseError {
    pub text: String,
    pub diagnostics: Vec<Diagnostic>,
}

fn first_message(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .first()
        .map(ToString::to_string)
        .unwrap_or_else(|| "unknown error".into())
}

impl ParseError {
    pub fn new(text: impl Into<String>, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            text: text.into(),
            diagnostics,
        }
    }

    /// Render every diagnostic as an annotated source report.
    pub fn report(&self) -> String {
        use ariadne::{Config, Label, Report, ReportKind, Source};

        let mut out = Vec::new();
        for diag in &self.diagnostics {
            let span = diag.span.start.min(self.text.len())..diag.span.end.min(self.text.len());
            let written = Report::build(ReportKind::Error, span.clone())
                .with_config(Config::default().with_color(false))
                .with_message(&diag.message)
                .with_label(Label::new(span).with_message(&diag.message))
                .finish()
                .write(Source::from(self.text.as_str()), &mut out);
            if written.is_err() {
                out.extend_from_slice(diag.to_string().as_bytes());
                out.push(b'\n');
            }
        }
        String::from_utf8_lossy(&out).into_owned()
    }
}

/// Parse a query source.
pub fn parse(source: &str) -> Result<QueryTree, ParseError> {
    use chumsky::error::Rich;
    use chumsky::input::Input;
    use chumsky::span::SimpleSpan;
    use chumsky::Parser as _;

    let (tokens, lex_errs) = lexer::lexer().parse(source).into_output_errors();
    let mut diagnostics: Vec<Diagnostic> = lex_errs
        .into_iter()
        .map(|e: Rich<'_, char>| {
            let span = e.span();
            Diagnostic::error(span.start..span.end, e.to_string())
        })
        .collect();

    let tokens = match tokens {
        Some(tokens) if diagnostics.is_empty() => tokens,
        _ => return Err(ParseError::new(source, diagnostics)),
    };

    let len = source.len();
    let eoi: SimpleSpan = (len..len).into();
    let token_stream = tokens
        .as_slice()
        .map(eoi, |(tok, span): &(lexer::Token<'_>, SimpleSpan)| (tok, span));

    let (root, parse_errs) = parser::parser().parse(token_stream).into_output_errors();
    diagnostics.extend(
        parse_errs
            .into_iter()
            .map(|e: Rich<'_, lexer::Token<'_>, SimpleSpan>| {
                let span = e.span();
                Diagnostic::error(span.start..span.end, e.to_string())
            }),
    );

    match root {
        Some(root) if diagnostics.is_empty() => QueryTree::from_root(root, source),
        _ => Err(ParseError::new(source, diagnostics)),
    }
}

static TREES: Lazy<DashMap<String, Arc<QueryTree>>> = Lazy::new(DashMap::new);

/// Parse a source once per process; later calls share the tree.
pub fn parse_cached(source: &str) -> Result<Arc<QueryTree>, ParseError> {
    if let Some(tree) = TREES.get(source) {
        return Ok(Arc::clone(tree.value()));
    }
    let tree = Arc::new(parse(source)?);
    tracing::trace!(target: "gensql::syntax", tree = %tree.id, "parsed query source");
    TREES.insert(source.to_string(), Arc::clone(&tree));
    Ok(tree)
}
