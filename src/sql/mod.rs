//! SQL generation module.
//!
//! The translator emits a typed tree ([`ast`]) that [`render`] turns into
//! dialect text:
//!
//! - [`ast`] - SELECT/DELETE tree and expression nodes
//! - [`render`] - text generation and the parameter [`Adapter`]
//! - [`token`] - Token types for SQL generation
//! - [`dialect`] - SQL dialect implementations

pub mod ast;
pub mod dialect;
pub mod render;
pub mod token;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types at the sql module level
pub use ast::{
    join_tables, sql_and, sql_or, AggFunc, BinaryOp, DeleteAst, ForUpdate, FromClause, FromItem,
    FromKind, Limit, ParamKey, ScalarFunc, SelectAst, SelectKind, SelectList, Source, SqlExpr,
    SqlLiteral, VarKey,
};
pub use dialect::{Dialect, ParamStyle, SqlDialect};
pub use render::{render_delete, render_select, Adapter, Rendered};
pub use token::{Token, TokenStream};
