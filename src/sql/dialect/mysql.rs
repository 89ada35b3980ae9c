//! MySQL SQL dialect.
//!
//! MySQL differences from ANSI:
//! - Backtick identifier quoting (`` `name` ``)
//! - Boolean is TINYINT(1), returns 1/0
//! - `||` is logical OR by default (use concat())
//! - Backslash escapes inside string literals
//! - `year(x)` style date parts, `trim(both c from x)`
//! - No `FOR UPDATE NOWAIT` before 8.0
//! - Multi-table DELETE names its target (`DELETE s FROM ...`)

use super::helpers;
use super::{DatePartStyle, SqlDialect};

/// MySQL SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct MySql;

impl SqlDialect for MySql {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_backtick(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        helpers::quote_string_backslash(s)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_numeric(b)
    }

    fn max_name_len(&self) -> usize {
        64
    }

    // Uses default emit_limit_offset (LIMIT ... OFFSET ...)

    fn supports_concat_operator(&self) -> bool {
        false
    }

    fn date_part_style(&self) -> DatePartStyle {
        DatePartStyle::Function
    }

    fn uses_trim_from_syntax(&self) -> bool {
        true
    }

    fn random_function(&self) -> &'static str {
        "rand()"
    }

    fn supports_for_update_nowait(&self) -> bool {
        false
    }

    fn supports_multi_column_count_distinct(&self) -> bool {
        true
    }

    fn uses_delete_alias(&self) -> bool {
        true
    }
}
