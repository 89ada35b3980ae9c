//! # gensql
//!
//! Translates generator-expression queries over an entity schema into SQL.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │   "s for s in Student if s.gpa > min_gpa"  + caller vars │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [syntax]
//! ┌─────────────────────────────────────────────────────────┐
//! │            QueryTree (content-hashed, cached)            │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [extract]
//! ┌─────────────────────────────────────────────────────────┐
//! │   external expressions → parameter values + types        │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [translate]
//! ┌─────────────────────────────────────────────────────────┐
//! │   Plan: typed expressions, table references, subqueries  │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [sql]
//! ┌─────────────────────────────────────────────────────────┐
//! │        SQL text + parameter adapter + row layout         │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! [`query::Database`] ties the stages together and caches plans by query
//! shape, so a query is translated once and re-bound on every call.

pub mod cache;
pub mod config;
pub mod error;
pub mod extract;
pub mod query;
pub mod schema;
pub mod sql;
pub mod syntax;
pub mod translate;
pub mod types;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::config::Settings;
    pub use crate::error::{TranslateError, TranslateResult};
    pub use crate::extract::Vars;
    pub use crate::query::{Database, Executor, Prepared, Query, Session, StatementKind};
    pub use crate::schema::{Schema, SchemaBuilder};
    pub use crate::sql::{AggFunc, Dialect};
    pub use crate::translate::{OrderAttr, RowLayout};
    pub use crate::types::{CanonicalType, EntityValue, NumericKind, Value};

    #[cfg(feature = "sqlite")]
    pub use crate::query::sqlite::SqliteExecutor;
}

pub use config::Settings;
pub use error::{TranslateError, TranslateResult};
pub use query::{Database, Prepared, Query, Session};
