//! PostgreSQL SQL dialect.
//!
//! PostgreSQL features:
//! - ANSI identifier quoting (`"`)
//! - Native boolean type (true/false)
//! - Numbered placeholders (`$1`)
//! - Row values, including `COUNT(DISTINCT (a, b))`
//! - `(x)::int` casts

use super::helpers;
use super::{ParamStyle, SqlDialect};

/// PostgreSQL SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Postgres;

impl SqlDialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_literal(b)
    }

    fn max_name_len(&self) -> usize {
        63
    }

    fn param_style(&self) -> ParamStyle {
        ParamStyle::Numbered
    }

    // Uses default emit_limit_offset (LIMIT ... OFFSET ...)

    fn uses_cast_operator(&self) -> bool {
        true
    }

    fn supports_multi_column_count_distinct(&self) -> bool {
        true
    }

    fn count_uses_row_value(&self) -> bool {
        true
    }

    fn casts_bool_in_arithmetic(&self) -> bool {
        true
    }
}
