//! Oracle SQL dialect.
//!
//! Oracle differences:
//! - ANSI identifier quoting (`"`), 30-character identifiers
//! - No boolean in SQL (1/0)
//! - Named placeholders (`:p1`)
//! - `OFFSET m ROWS FETCH NEXT n ROWS ONLY` pagination (12c+)
//! - `MOD(a, b)` instead of `%`
//! - ROWID pseudo-column

use super::helpers;
use super::{ParamStyle, SqlDialect};
use crate::sql::token::TokenStream;

/// Oracle SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Oracle;

impl SqlDialect for Oracle {
    fn name(&self) -> &'static str {
        "oracle"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_numeric(b)
    }

    fn max_name_len(&self) -> usize {
        30
    }

    fn param_style(&self) -> ParamStyle {
        ParamStyle::Named
    }

    fn emit_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> TokenStream {
        helpers::emit_offset_fetch(limit, offset)
    }

    fn uses_mod_function(&self) -> bool {
        true
    }

    fn random_function(&self) -> &'static str {
        "dbms_random.value"
    }

    fn real_type_name(&self) -> &'static str {
        "NUMBER"
    }

    fn supports_rowid(&self) -> bool {
        true
    }

    fn counts_by_rowid(&self) -> bool {
        true
    }
}
