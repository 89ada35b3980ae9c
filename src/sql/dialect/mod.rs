//! SQL Dialect definitions and formatting rules.
//!
//! This module provides a trait-based abstraction for SQL dialect differences.
//! Each dialect implements `SqlDialect` to handle its specific syntax:
//!
//! - Identifier quoting: `"` (SQLite/PG/Oracle/DuckDB), `` ` `` (MySQL)
//! - Parameter placeholders: `?`, `$1`, `:p1`
//! - Pagination: LIMIT/OFFSET vs OFFSET FETCH
//! - Boolean literals: true/false vs 1/0
//! - String concatenation: `||` vs `concat()`
//! - Row values, ROWID, `FOR UPDATE NOWAIT`
//!
//! # Usage
//!
//! ```
//! use gensql::sql::{Dialect, SqlDialect};
//!
//! let dialect = Dialect::Postgres;
//! assert_eq!(dialect.quote_identifier("Student"), "\"Student\"");
//! assert_eq!(dialect.placeholder(1), "$1");
//! ```
//!
//! # Capability Matrix
//!
//! | Feature | SQLite | PostgreSQL | MySQL | Oracle | DuckDB |
//! |---------|--------|------------|-------|--------|--------|
//! | Row values `(a, b) IN (...)` | ❌ | ✓ | ✓ | ✓ | ✓ |
//! | ROWID | ❌ | ❌ | ❌ | ✓ | ❌ |
//! | FOR UPDATE | ignored | ✓ | ✓ | ✓ | ✓ |
//! | FOR UPDATE NOWAIT | ❌ | ✓ | ❌ | ✓ | ✓ |
//! | COUNT(DISTINCT a, b) | ❌ | ✓ | ✓ | ❌ | ✓ |
//! | Identifier length | 1024 | 63 | 64 | 30 | 128 |
//!
//! Check the capability methods before generating SQL that relies on them.

mod duckdb;
pub mod helpers;
mod mysql;
mod oracle;
mod postgres;
mod sqlite;

pub use duckdb::DuckDb;
pub use mysql::MySql;
pub use oracle::Oracle;
pub use postgres::Postgres;
pub use sqlite::Sqlite;

use serde::{Deserialize, Serialize};

use super::token::TokenStream;

/// How bound parameters are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamStyle {
    /// `?` for every occurrence; repeated keys are bound repeatedly.
    Qmark,
    /// `$1`, `$2`, ...; repeated keys share one number.
    Numbered,
    /// `:p1`, `:p2`, ...; repeated keys share one name.
    Named,
}

/// How `year(x)` and friends are spelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePartStyle {
    /// `cast(substr(x, 1, 4) as integer)` over the ISO text form.
    Substr,
    /// `year(x)`
    Function,
    /// `EXTRACT(YEAR FROM x)`
    Extract,
}

/// SQL dialect trait - defines how SQL constructs are rendered.
///
/// Implementations handle dialect-specific syntax differences.
/// The default implementations follow ANSI SQL where possible.
pub trait SqlDialect: std::fmt::Debug {
    /// Dialect name for display/logging.
    fn name(&self) -> &'static str;

    // =========================================================================
    // Identifier and Literal Quoting
    // =========================================================================

    /// Quote an identifier (table, column, alias).
    ///
    /// - SQLite/PostgreSQL/Oracle/DuckDB: `"identifier"`
    /// - MySQL: `` `identifier` ``
    fn quote_identifier(&self, ident: &str) -> String;

    /// Quote a string literal.
    ///
    /// All dialects use single quotes with `''` for escaping.
    fn quote_string(&self, s: &str) -> String {
        helpers::quote_string_single(s)
    }

    /// Format a boolean literal.
    ///
    /// - PostgreSQL/DuckDB: `true`/`false`
    /// - SQLite/MySQL/Oracle: `1`/`0`
    fn format_bool(&self, b: bool) -> &'static str;

    /// Format a date literal: `DATE 'YYYY-MM-DD'`.
    fn format_date_literal(&self, date: &str) -> String {
        format!("DATE {}", self.quote_string(date))
    }

    /// Format a timestamp literal: `TIMESTAMP 'YYYY-MM-DD HH:MM:SS'`.
    fn format_timestamp_literal(&self, ts: &str) -> String {
        format!("TIMESTAMP {}", self.quote_string(ts))
    }

    /// Longest identifier the database accepts.
    fn max_name_len(&self) -> usize;

    // =========================================================================
    // Parameters
    // =========================================================================

    fn param_style(&self) -> ParamStyle {
        ParamStyle::Qmark
    }

    /// Placeholder text for the `n`-th (1-based) distinct parameter.
    fn placeholder(&self, n: usize) -> String {
        match self.param_style() {
            ParamStyle::Qmark => "?".into(),
            ParamStyle::Numbered => format!("${}", n),
            ParamStyle::Named => format!(":p{}", n),
        }
    }

    // =========================================================================
    // Pagination
    // =========================================================================

    /// Emit LIMIT/OFFSET or equivalent pagination clause.
    ///
    /// - SQLite/PostgreSQL/DuckDB/MySQL: `LIMIT n OFFSET m` (default)
    /// - Oracle: `OFFSET m ROWS FETCH NEXT n ROWS ONLY` (override)
    fn emit_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> TokenStream {
        helpers::emit_limit_offset_standard(limit, offset)
    }

    // =========================================================================
    // Operators and Functions
    // =========================================================================

    /// Whether this dialect supports the `||` concat operator.
    ///
    /// MySQL uses `||` as logical OR by default.
    fn supports_concat_operator(&self) -> bool {
        true
    }

    /// Whether `%` is spelled as the `MOD(a, b)` function.
    fn uses_mod_function(&self) -> bool {
        false
    }

    /// Scalar minimum of several arguments.
    fn least_function(&self) -> &'static str {
        "least"
    }

    /// Scalar maximum of several arguments.
    fn greatest_function(&self) -> &'static str {
        "greatest"
    }

    fn date_part_style(&self) -> DatePartStyle {
        DatePartStyle::Extract
    }

    /// Whether `trim(x, chars)` is spelled `trim(both chars from x)`.
    fn uses_trim_from_syntax(&self) -> bool {
        false
    }

    /// Expression yielding a random number.
    fn random_function(&self) -> &'static str {
        "random()"
    }

    /// Whether integer casts use `(x)::int`.
    fn uses_cast_operator(&self) -> bool {
        false
    }

    /// Type name used by float casts.
    fn real_type_name(&self) -> &'static str {
        "real"
    }

    // =========================================================================
    // Capabilities
    // =========================================================================

    /// Whether `(a, b) = (c, d)` and `(a, b) IN (SELECT ...)` are accepted.
    fn supports_row_value(&self) -> bool {
        true
    }

    /// Whether rows carry an addressable `ROWID` pseudo-column.
    fn supports_rowid(&self) -> bool {
        false
    }

    /// Whether `SELECT ... FOR UPDATE` is emitted at all.
    ///
    /// SQLite locks the whole database and drops the clause.
    fn supports_for_update(&self) -> bool {
        true
    }

    fn supports_for_update_nowait(&self) -> bool {
        true
    }

    /// Whether `COUNT(DISTINCT ...)` takes several columns.
    fn supports_multi_column_count_distinct(&self) -> bool {
        false
    }

    /// Whether multi-column COUNT wraps its arguments in a row value.
    fn count_uses_row_value(&self) -> bool {
        false
    }

    /// Whether a multi-table DELETE names its target alias
    /// (`DELETE s FROM ...`).
    fn uses_delete_alias(&self) -> bool {
        false
    }

    /// Whether composite keys are counted through the `ROWID` pseudo-column
    /// inside aggregates.
    fn counts_by_rowid(&self) -> bool {
        false
    }

    /// Whether a bool operand must be cast to int before arithmetic.
    fn casts_bool_in_arithmetic(&self) -> bool {
        false
    }
}

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Sqlite,
    Postgres,
    MySql,
    Oracle,
    DuckDb,
}

impl Dialect {
    pub const ALL: [Dialect; 5] = [
        Dialect::Sqlite,
        Dialect::Postgres,
        Dialect::MySql,
        Dialect::Oracle,
        Dialect::DuckDb,
    ];

    /// Get the dialect implementation.
    pub fn dialect(&self) -> &'static dyn SqlDialect {
        match self {
            Dialect::Sqlite => &Sqlite,
            Dialect::Postgres => &Postgres,
            Dialect::MySql => &MySql,
            Dialect::Oracle => &Oracle,
            Dialect::DuckDb => &DuckDb,
        }
    }
}

// Implement SqlDialect for Dialect enum by delegating to concrete types
impl SqlDialect for Dialect {
    fn name(&self) -> &'static str {
        self.dialect().name()
    }

    fn quote_identifier(&self, ident: &str) -> String {
        self.dialect().quote_identifier(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        self.dialect().quote_string(s)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        self.dialect().format_bool(b)
    }

    fn format_date_literal(&self, date: &str) -> String {
        self.dialect().format_date_literal(date)
    }

    fn format_timestamp_literal(&self, ts: &str) -> String {
        self.dialect().format_timestamp_literal(ts)
    }

    fn max_name_len(&self) -> usize {
        self.dialect().max_name_len()
    }

    fn param_style(&self) -> ParamStyle {
        self.dialect().param_style()
    }

    fn placeholder(&self, n: usize) -> String {
        self.dialect().placeholder(n)
    }

    fn emit_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> TokenStream {
        self.dialect().emit_limit_offset(limit, offset)
    }

    fn supports_concat_operator(&self) -> bool {
        self.dialect().supports_concat_operator()
    }

    fn uses_mod_function(&self) -> bool {
        self.dialect().uses_mod_function()
    }

    fn least_function(&self) -> &'static str {
        self.dialect().least_function()
    }

    fn greatest_function(&self) -> &'static str {
        self.dialect().greatest_function()
    }

    fn date_part_style(&self) -> DatePartStyle {
        self.dialect().date_part_style()
    }

    fn uses_trim_from_syntax(&self) -> bool {
        self.dialect().uses_trim_from_syntax()
    }

    fn random_function(&self) -> &'static str {
        self.dialect().random_function()
    }

    fn uses_cast_operator(&self) -> bool {
        self.dialect().uses_cast_operator()
    }

    fn real_type_name(&self) -> &'static str {
        self.dialect().real_type_name()
    }

    fn supports_row_value(&self) -> bool {
        self.dialect().supports_row_value()
    }

    fn supports_rowid(&self) -> bool {
        self.dialect().supports_rowid()
    }

    fn supports_for_update(&self) -> bool {
        self.dialect().supports_for_update()
    }

    fn supports_for_update_nowait(&self) -> bool {
        self.dialect().supports_for_update_nowait()
    }

    fn supports_multi_column_count_distinct(&self) -> bool {
        self.dialect().supports_multi_column_count_distinct()
    }

    fn count_uses_row_value(&self) -> bool {
        self.dialect().count_uses_row_value()
    }

    fn uses_delete_alias(&self) -> bool {
        self.dialect().uses_delete_alias()
    }

    fn counts_by_rowid(&self) -> bool {
        self.dialect().counts_by_rowid()
    }

    fn casts_bool_in_arithmetic(&self) -> bool {
        self.dialect().casts_bool_in_arithmetic()
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dialect().name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_display() {
        assert_eq!(Dialect::Sqlite.to_string(), "sqlite");
        assert_eq!(Dialect::Postgres.to_string(), "postgres");
        assert_eq!(Dialect::MySql.to_string(), "mysql");
        assert_eq!(Dialect::Oracle.to_string(), "oracle");
        assert_eq!(Dialect::DuckDb.to_string(), "duckdb");
    }

    #[test]
    fn test_serde_names_match_display() {
        for dialect in Dialect::ALL {
            let json = serde_json::to_string(&dialect).unwrap();
            assert_eq!(json, format!("\"{}\"", dialect));
            let back: Dialect = serde_json::from_str(&json).unwrap();
            assert_eq!(back, dialect);
        }
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(Dialect::Sqlite.quote_identifier("users"), "\"users\"");
        assert_eq!(Dialect::Postgres.quote_identifier("users"), "\"users\"");
        assert_eq!(Dialect::Oracle.quote_identifier("users"), "\"users\"");
        assert_eq!(Dialect::MySql.quote_identifier("users"), "`users`");
    }

    #[test]
    fn test_quote_identifier_escaping() {
        assert_eq!(
            Dialect::DuckDb.quote_identifier("weird\"name"),
            "\"weird\"\"name\""
        );
        assert_eq!(
            Dialect::MySql.quote_identifier("weird`name"),
            "`weird``name`"
        );
    }

    #[test]
    fn test_format_bool() {
        assert_eq!(Dialect::DuckDb.format_bool(true), "true");
        assert_eq!(Dialect::Postgres.format_bool(false), "false");
        assert_eq!(Dialect::Sqlite.format_bool(true), "1");
        assert_eq!(Dialect::MySql.format_bool(false), "0");
        assert_eq!(Dialect::Oracle.format_bool(true), "1");
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(Dialect::Sqlite.placeholder(3), "?");
        assert_eq!(Dialect::MySql.placeholder(3), "?");
        assert_eq!(Dialect::DuckDb.placeholder(3), "?");
        assert_eq!(Dialect::Postgres.placeholder(3), "$3");
        assert_eq!(Dialect::Oracle.placeholder(3), ":p3");
    }

    #[test]
    fn test_capabilities() {
        assert!(!Dialect::Sqlite.supports_row_value());
        assert!(Dialect::Postgres.supports_row_value());
        assert!(Dialect::Oracle.supports_rowid());
        assert!(!Dialect::Postgres.supports_rowid());
        assert!(!Dialect::Sqlite.supports_for_update());
        assert!(!Dialect::MySql.supports_for_update_nowait());
        assert!(Dialect::Oracle.supports_for_update_nowait());
        assert!(Dialect::MySql.supports_multi_column_count_distinct());
        assert!(!Dialect::Oracle.supports_multi_column_count_distinct());
        assert!(!Dialect::MySql.supports_concat_operator());
        assert!(Dialect::Oracle.uses_mod_function());
    }

    #[test]
    fn test_max_name_len() {
        assert_eq!(Dialect::Sqlite.max_name_len(), 1024);
        assert_eq!(Dialect::Postgres.max_name_len(), 63);
        assert_eq!(Dialect::MySql.max_name_len(), 64);
        assert_eq!(Dialect::Oracle.max_name_len(), 30);
        assert_eq!(Dialect::DuckDb.max_name_len(), 128);
    }
}
