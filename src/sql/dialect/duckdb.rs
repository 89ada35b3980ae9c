//! DuckDB SQL dialect.
//!
//! DuckDB is PostgreSQL-compatible for everything emitted here, but binds
//! parameters positionally with `?`.

use super::helpers;
use super::SqlDialect;

/// DuckDB SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct DuckDb;

impl SqlDialect for DuckDb {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_literal(b)
    }

    fn max_name_len(&self) -> usize {
        128
    }

    // Uses default emit_limit_offset (LIMIT ... OFFSET ...)

    fn supports_multi_column_count_distinct(&self) -> bool {
        true
    }

    fn count_uses_row_value(&self) -> bool {
        true
    }
}
