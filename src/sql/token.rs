//! SQL Tokens - the atomic units of SQL output.
//!
//! Tokens are dialect-agnostic representations that serialize
//! to dialect-specific strings.

use chrono::{NaiveDate, NaiveDateTime, Timelike};

use super::dialect::{Dialect, SqlDialect};

/// SQL Token - every element the query renderer emits.
///
/// Adding a new variant here will cause compile errors everywhere
/// it needs to be handled (exhaustive matching).
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // === Keywords ===
    Select,
    Distinct,
    From,
    Where,
    And,
    Or,
    Not,
    As,
    On,
    Join,
    Inner,
    Left,
    GroupBy,
    Having,
    OrderBy,
    Desc,
    Limit,
    Offset,
    Fetch,
    Next,
    Rows,
    Only,
    Case,
    When,
    Then,
    Else,
    End,
    In,
    Between,
    Like,
    Escape,
    IsNull,
    IsNotNull,
    Exists,
    Delete,
    For,
    Update,
    Nowait,

    // === Punctuation ===
    Comma,
    Dot,
    Star,
    LParen,
    RParen,

    // === Operators ===
    Eq,
    Ne,
    Lt,
    Gt,
    Lte,
    Gte,
    Plus,
    Minus,
    Mul,
    Div,
    Mod,
    Concat,

    // === Whitespace / Formatting ===
    Space,
    Newline,
    /// Four spaces per level.
    Indent(usize),

    // === Dynamic Content ===
    /// Simple identifier (table, column, alias)
    Ident(String),
    /// `alias.column`, or a bare column when no alias is given
    QualifiedIdent {
        qualifier: Option<String>,
        name: String,
    },
    LitInt(i64),
    /// Non-finite values serialize as `null`.
    LitFloat(f64),
    /// Decimal literal, already in canonical text form
    LitDecimal(String),
    LitString(String),
    LitBool(bool),
    LitNull,
    LitDate(NaiveDate),
    LitDateTime(NaiveDateTime),
    LitBytes(Vec<u8>),
    /// Bound parameter; the number is its 1-based position in the
    /// distinct-parameter list.
    Param(usize),

    // === Function Names ===
    /// Function name, rendered exactly as given.
    FunctionName(&'static str),

    // === Escape Hatch ===
    /// Raw SQL passed directly to output without escaping.
    ///
    /// **Never pass user input to this variant.** Only trusted, static
    /// fragments belong here; values go through the literal tokens.
    Raw(String),
}

impl Token {
    /// Serialize this token to a string for the given dialect.
    pub fn serialize(&self, dialect: Dialect) -> String {
        match self {
            // Keywords
            Token::Select => "SELECT".into(),
            Token::Distinct => "DISTINCT".into(),
            Token::From => "FROM".into(),
            Token::Where => "WHERE".into(),
            Token::And => "AND".into(),
            Token::Or => "OR".into(),
            Token::Not => "NOT".into(),
            Token::As => "AS".into(),
            Token::On => "ON".into(),
            Token::Join => "JOIN".into(),
            Token::Inner => "INNER".into(),
            Token::Left => "LEFT".into(),
            Token::GroupBy => "GROUP BY".into(),
            Token::Having => "HAVING".into(),
            Token::OrderBy => "ORDER BY".into(),
            Token::Desc => "DESC".into(),
            Token::Limit => "LIMIT".into(),
            Token::Offset => "OFFSET".into(),
            Token::Fetch => "FETCH".into(),
            Token::Next => "NEXT".into(),
            Token::Rows => "ROWS".into(),
            Token::Only => "ONLY".into(),
            Token::Case => "case".into(),
            Token::When => "when".into(),
            Token::Then => "then".into(),
            Token::Else => "else".into(),
            Token::End => "end".into(),
            Token::In => "IN".into(),
            Token::Between => "BETWEEN".into(),
            Token::Like => "LIKE".into(),
            Token::Escape => "ESCAPE".into(),
            Token::IsNull => "IS NULL".into(),
            Token::IsNotNull => "IS NOT NULL".into(),
            Token::Exists => "EXISTS".into(),
            Token::Delete => "DELETE".into(),
            Token::For => "FOR".into(),
            Token::Update => "UPDATE".into(),
            Token::Nowait => "NOWAIT".into(),

            // Punctuation
            Token::Comma => ",".into(),
            Token::Dot => ".".into(),
            Token::Star => "*".into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),

            // Operators
            Token::Eq => "=".into(),
            Token::Ne => "<>".into(),
            Token::Lt => "<".into(),
            Token::Gt => ">".into(),
            Token::Lte => "<=".into(),
            Token::Gte => ">=".into(),
            Token::Plus => "+".into(),
            Token::Minus => "-".into(),
            Token::Mul => "*".into(),
            Token::Div => "/".into(),
            Token::Mod => "%".into(),
            Token::Concat => "||".into(),

            // Whitespace
            Token::Space => " ".into(),
            Token::Newline => "\n".into(),
            Token::Indent(n) => "    ".repeat(*n),

            // Dynamic - dialect-specific formatting
            Token::Ident(name) => dialect.quote_identifier(name),
            Token::QualifiedIdent { qualifier, name } => match qualifier {
                Some(q) => format!(
                    "{}.{}",
                    dialect.quote_identifier(q),
                    dialect.quote_identifier(name)
                ),
                None => dialect.quote_identifier(name),
            },
            Token::LitInt(n) => n.to_string(),
            Token::LitFloat(f) => {
                if !f.is_finite() {
                    return "null".into();
                }
                let mut buffer = ryu::Buffer::new();
                buffer.format_finite(*f).to_string()
            }
            Token::LitDecimal(d) => d.clone(),
            Token::LitString(s) => dialect.quote_string(s),
            Token::LitBool(b) => dialect.format_bool(*b).into(),
            Token::LitNull => "null".into(),
            Token::LitDate(d) => dialect.format_date_literal(&d.format("%Y-%m-%d").to_string()),
            Token::LitDateTime(dt) => dialect.format_timestamp_literal(&format_timestamp(dt)),
            Token::LitBytes(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
                format!("X'{}'", hex)
            }
            Token::Param(n) => dialect.placeholder(*n),

            Token::FunctionName(name) => (*name).to_string(),

            // Escape hatch
            Token::Raw(s) => s.clone(),
        }
    }
}

/// `YYYY-MM-DD HH:MM:SS[.ffffff]`
pub fn format_timestamp(dt: &NaiveDateTime) -> String {
    if dt.nanosecond() == 0 {
        dt.format("%Y-%m-%d %H:%M:%S").to_string()
    } else {
        dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
    }
}

/// A stream of tokens that can be serialized to SQL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenStream {
    tokens: Vec<Token>,
}

impl TokenStream {
    /// Create an empty token stream.
    pub fn new() -> Self {
        Self { tokens: vec![] }
    }

    /// Push a single token.
    pub fn push(&mut self, token: Token) -> &mut Self {
        self.tokens.push(token);
        self
    }

    /// Extend with multiple tokens.
    pub fn extend(&mut self, tokens: impl IntoIterator<Item = Token>) -> &mut Self {
        self.tokens.extend(tokens);
        self
    }

    /// Append another token stream.
    pub fn append(&mut self, other: &TokenStream) -> &mut Self {
        self.tokens.extend(other.tokens.iter().cloned());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Serialize all tokens to a SQL string.
    pub fn serialize(&self, dialect: Dialect) -> String {
        self.tokens.iter().map(|t| t.serialize(dialect)).collect()
    }

    // Convenience methods for common tokens
    pub fn space(&mut self) -> &mut Self {
        self.push(Token::Space)
    }
    pub fn newline(&mut self) -> &mut Self {
        self.push(Token::Newline)
    }
    pub fn indent(&mut self, n: usize) -> &mut Self {
        if n > 0 {
            self.push(Token::Indent(n));
        }
        self
    }
    pub fn comma(&mut self) -> &mut Self {
        self.push(Token::Comma)
    }
    pub fn lparen(&mut self) -> &mut Self {
        self.push(Token::LParen)
    }
    pub fn rparen(&mut self) -> &mut Self {
        self.push(Token::RParen)
    }
    pub fn raw(&mut self, s: &str) -> &mut Self {
        self.push(Token::Raw(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_serialize() {
        assert_eq!(Token::Select.serialize(Dialect::Sqlite), "SELECT");
        assert_eq!(Token::GroupBy.serialize(Dialect::Postgres), "GROUP BY");
        assert_eq!(Token::Case.serialize(Dialect::Postgres), "case");
    }

    #[test]
    fn test_ident_serialize() {
        let tok = Token::Ident("Student".into());
        assert_eq!(tok.serialize(Dialect::Sqlite), "\"Student\"");
        assert_eq!(tok.serialize(Dialect::MySql), "`Student`");
    }

    #[test]
    fn test_qualified_ident() {
        let tok = Token::QualifiedIdent {
            qualifier: Some("s".into()),
            name: "gpa".into(),
        };
        assert_eq!(tok.serialize(Dialect::Postgres), "\"s\".\"gpa\"");
        let bare = Token::QualifiedIdent {
            qualifier: None,
            name: "gpa".into(),
        };
        assert_eq!(bare.serialize(Dialect::Oracle), "\"gpa\"");
    }

    #[test]
    fn test_token_stream() {
        let mut ts = TokenStream::new();
        ts.push(Token::Select)
            .space()
            .push(Token::Ident("name".into()))
            .newline()
            .push(Token::From)
            .space()
            .push(Token::Ident("Student".into()));

        assert_eq!(
            ts.serialize(Dialect::Postgres),
            "SELECT \"name\"\nFROM \"Student\""
        );
    }

    #[test]
    fn test_float_serialize() {
        assert_eq!(Token::LitFloat(3.5).serialize(Dialect::Sqlite), "3.5");
        assert_eq!(Token::LitFloat(1.0).serialize(Dialect::Sqlite), "1.0");
        assert_eq!(Token::LitFloat(-42.5).serialize(Dialect::Sqlite), "-42.5");
        let large = Token::LitFloat(1234567890.123456).serialize(Dialect::Sqlite);
        assert!(large.starts_with("1234567890"), "Large float: {}", large);
    }

    #[test]
    fn test_non_finite_float_is_null() {
        assert_eq!(Token::LitFloat(f64::NAN).serialize(Dialect::Sqlite), "null");
        assert_eq!(
            Token::LitFloat(f64::NEG_INFINITY).serialize(Dialect::Postgres),
            "null"
        );
    }

    #[test]
    fn test_temporal_and_bytes() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert_eq!(Token::LitDate(d).serialize(Dialect::Sqlite), "DATE '2024-01-31'");
        let dt = d.and_hms_opt(8, 30, 0).unwrap();
        assert_eq!(
            Token::LitDateTime(dt).serialize(Dialect::Postgres),
            "TIMESTAMP '2024-01-31 08:30:00'"
        );
        assert_eq!(Token::LitBytes(vec![0xde, 0xad]).serialize(Dialect::Sqlite), "X'dead'");
    }

    #[test]
    fn test_param_placeholders() {
        assert_eq!(Token::Param(2).serialize(Dialect::Sqlite), "?");
        assert_eq!(Token::Param(2).serialize(Dialect::Postgres), "$2");
        assert_eq!(Token::Param(2).serialize(Dialect::Oracle), ":p2");
    }
}
