//! SQLite SQL dialect.
//!
//! SQLite differences:
//! - ANSI identifier quoting (`"`)
//! - No boolean type (1/0)
//! - No row values in comparisons
//! - Dates stored as ISO text, so date parts are substrings
//! - Whole-database locking: `FOR UPDATE` is dropped

use super::helpers;
use super::{DatePartStyle, SqlDialect};

/// SQLite SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Sqlite;

impl SqlDialect for Sqlite {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_numeric(b)
    }

    fn max_name_len(&self) -> usize {
        1024
    }

    // Uses default emit_limit_offset (LIMIT ... OFFSET ...)

    fn least_function(&self) -> &'static str {
        "min"
    }

    fn greatest_function(&self) -> &'static str {
        "max"
    }

    fn date_part_style(&self) -> DatePartStyle {
        DatePartStyle::Substr
    }

    fn supports_row_value(&self) -> bool {
        false
    }

    fn supports_for_update(&self) -> bool {
        false
    }

    fn supports_for_update_nowait(&self) -> bool {
        false
    }

    fn counts_by_rowid(&self) -> bool {
        true
    }
}
