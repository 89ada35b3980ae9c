//! Typed SQL tree emitted by the translator.
//!
//! The node set follows the classic nested-list IR (`COLUMN`, `PARAM`,
//! `VALUE`, `EQ`, `AND`, `COUNT`, `EXISTS`, ...) but every node is a typed
//! variant, so the renderer matches exhaustively.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::types::Value;

/// Identifies one external expression of a query: the filter it belongs to
/// (0 for the main source, then one per chained call) and its source text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct VarKey {
    pub filter: usize,
    pub src: String,
}

impl VarKey {
    pub fn new(filter: usize, src: impl Into<String>) -> Self {
        Self {
            filter,
            src: src.into(),
        }
    }
}

impl fmt::Display for VarKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.filter, self.src)
    }
}

/// Position of a bound value: the variable, optionally an item of a tuple
/// value, optionally a primary-key column of an entity value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ParamKey {
    pub var: VarKey,
    pub item: Option<usize>,
    pub pk: Option<usize>,
}

impl ParamKey {
    pub fn new(var: VarKey) -> Self {
        Self {
            var,
            item: None,
            pk: None,
        }
    }

    pub fn item(mut self, item: usize) -> Self {
        self.item = Some(item);
        self
    }

    pub fn pk(mut self, pk: usize) -> Self {
        self.pk = Some(pk);
        self
    }
}

/// A constant rendered inline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SqlLiteral {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(String),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Bytes(Vec<u8>),
}

impl SqlLiteral {
    /// Inline form of a primitive value.
    pub fn from_value(value: &Value) -> Option<Self> {
        Some(match value {
            Value::None => SqlLiteral::Null,
            Value::Bool(b) => SqlLiteral::Bool(*b),
            Value::Int(i) => SqlLiteral::Int(*i),
            Value::Float(f) => SqlLiteral::Float(*f),
            Value::Decimal(d) => SqlLiteral::Decimal(d.clone()),
            Value::Text(s) => SqlLiteral::Text(s.clone()),
            Value::Date(d) => SqlLiteral::Date(*d),
            Value::DateTime(d) => SqlLiteral::DateTime(*d),
            Value::Bytes(b) => SqlLiteral::Bytes(b.clone()),
            _ => return None,
        })
    }
}

impl From<i64> for SqlLiteral {
    fn from(v: i64) -> Self {
        SqlLiteral::Int(v)
    }
}

impl From<&str> for SqlLiteral {
    fn from(v: &str) -> Self {
        SqlLiteral::Text(v.to_string())
    }
}

impl From<bool> for SqlLiteral {
    fn from(v: bool) -> Self {
        SqlLiteral::Bool(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

/// Reducing functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggFunc {
    pub fn name(&self) -> &'static str {
        match self {
            AggFunc::Count => "COUNT",
            AggFunc::Sum => "SUM",
            AggFunc::Avg => "AVG",
            AggFunc::Min => "MIN",
            AggFunc::Max => "MAX",
        }
    }
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Scalar functions with dialect-specific spellings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ScalarFunc {
    Upper,
    Lower,
    Length,
    Abs,
    Coalesce,
    Trim,
    Ltrim,
    Rtrim,
    Replace,
    Substr,
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Random,
    ToInt,
    ToReal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SqlExpr {
    /// `alias.name`, or a bare column name.
    Column {
        alias: Option<String>,
        name: String,
    },
    Param(ParamKey),
    Value(SqlLiteral),
    Row(Vec<SqlExpr>),
    Binary {
        op: BinaryOp,
        left: Box<SqlExpr>,
        right: Box<SqlExpr>,
    },
    Neg(Box<SqlExpr>),
    And(Vec<SqlExpr>),
    Or(Vec<SqlExpr>),
    Not(Box<SqlExpr>),
    IsNull(Box<SqlExpr>),
    IsNotNull(Box<SqlExpr>),
    Concat(Vec<SqlExpr>),
    Like {
        expr: Box<SqlExpr>,
        template: Box<SqlExpr>,
        escape: Option<Box<SqlExpr>>,
        negated: bool,
    },
    Between {
        expr: Box<SqlExpr>,
        low: Box<SqlExpr>,
        high: Box<SqlExpr>,
        negated: bool,
    },
    /// `expr IN (a, b, ...)`; an empty list is always false.
    In {
        expr: Box<SqlExpr>,
        list: Vec<SqlExpr>,
        negated: bool,
    },
    InSelect {
        expr: Box<SqlExpr>,
        select: Box<SelectAst>,
        negated: bool,
    },
    /// The select list of the subquery is ignored; it renders `SELECT 1`.
    Exists {
        select: Box<SelectAst>,
        negated: bool,
    },
    /// A scalar subquery.
    Select(Box<SelectAst>),
    /// `COUNT(*)` when `args` is empty.
    Count {
        distinct: bool,
        args: Vec<SqlExpr>,
    },
    /// SUM/AVG/MIN/MAX. MIN and MAX with several arguments are the scalar
    /// least/greatest forms.
    Aggregate {
        func: AggFunc,
        distinct: bool,
        args: Vec<SqlExpr>,
    },
    Func {
        func: ScalarFunc,
        args: Vec<SqlExpr>,
    },
    Case {
        cases: Vec<(SqlExpr, SqlExpr)>,
        default: Option<Box<SqlExpr>>,
    },
    Desc(Box<SqlExpr>),
    As {
        expr: Box<SqlExpr>,
        alias: String,
    },
}

impl SqlExpr {
    pub fn column(alias: impl Into<String>, name: impl Into<String>) -> Self {
        SqlExpr::Column {
            alias: Some(alias.into()),
            name: name.into(),
        }
    }

    pub fn bare_column(name: impl Into<String>) -> Self {
        SqlExpr::Column {
            alias: None,
            name: name.into(),
        }
    }

    pub fn value(lit: impl Into<SqlLiteral>) -> Self {
        SqlExpr::Value(lit.into())
    }

    pub fn binary(op: BinaryOp, left: SqlExpr, right: SqlExpr) -> Self {
        SqlExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: SqlExpr, right: SqlExpr) -> Self {
        Self::binary(BinaryOp::Eq, left, right)
    }

    pub fn func(func: ScalarFunc, args: Vec<SqlExpr>) -> Self {
        SqlExpr::Func { func, args }
    }

    pub fn is_null(expr: SqlExpr) -> Self {
        SqlExpr::IsNull(Box::new(expr))
    }

    pub fn is_not_null(expr: SqlExpr) -> Self {
        SqlExpr::IsNotNull(Box::new(expr))
    }

    pub fn not(expr: SqlExpr) -> Self {
        SqlExpr::Not(Box::new(expr))
    }

    pub fn case_when(cond: SqlExpr, then: SqlExpr, default: Option<SqlExpr>) -> Self {
        SqlExpr::Case {
            cases: vec![(cond, then)],
            default: default.map(Box::new),
        }
    }

    /// Whether this is an inline constant.
    pub fn as_value(&self) -> Option<&SqlLiteral> {
        match self {
            SqlExpr::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// AND of the given conditions, flattening nested ANDs.
/// Returns `None` for an empty list.
pub fn sql_and(items: Vec<SqlExpr>) -> Option<SqlExpr> {
    flatten(items, true)
}

/// OR of the given conditions, flattening nested ORs.
pub fn sql_or(items: Vec<SqlExpr>) -> Option<SqlExpr> {
    flatten(items, false)
}

fn flatten(items: Vec<SqlExpr>, and: bool) -> Option<SqlExpr> {
    if items.len() <= 1 {
        return items.into_iter().next();
    }
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item {
            SqlExpr::And(inner) if and => out.extend(inner),
            SqlExpr::Or(inner) if !and => out.extend(inner),
            other => out.push(other),
        }
    }
    Some(if and { SqlExpr::And(out) } else { SqlExpr::Or(out) })
}

/// Pairwise column equality between two aliases.
pub fn join_tables(alias1: &str, alias2: &str, columns1: &[String], columns2: &[String]) -> Option<SqlExpr> {
    sql_and(
        columns1
            .iter()
            .zip(columns2)
            .map(|(c1, c2)| SqlExpr::eq(SqlExpr::column(alias1, c1), SqlExpr::column(alias2, c2)))
            .collect(),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SelectKind {
    All,
    Distinct,
    /// A select list made of aggregates only.
    Aggregates,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectList {
    pub kind: SelectKind,
    pub exprs: Vec<SqlExpr>,
}

impl SelectList {
    pub fn new(kind: SelectKind, exprs: Vec<SqlExpr>) -> Self {
        Self { kind, exprs }
    }

    pub fn all(exprs: Vec<SqlExpr>) -> Self {
        Self::new(SelectKind::All, exprs)
    }
}

/// How the non-first FROM items are joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FromKind {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Source {
    Table(String),
    Select(Box<SelectAst>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FromItem {
    pub alias: Option<String>,
    pub source: Source,
    /// Join condition; `None` lists the item after a comma.
    pub on: Option<SqlExpr>,
}

impl FromItem {
    pub fn table(alias: Option<String>, table: impl Into<String>) -> Self {
        Self {
            alias,
            source: Source::Table(table.into()),
            on: None,
        }
    }

    pub fn with_on(mut self, on: Option<SqlExpr>) -> Self {
        self.on = on;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FromClause {
    pub kind: FromKind,
    pub items: Vec<FromItem>,
}

impl FromClause {
    pub fn new(kind: FromKind) -> Self {
        Self {
            kind,
            items: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Limit {
    pub limit: u64,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ForUpdate {
    pub nowait: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectAst {
    pub for_update: Option<ForUpdate>,
    pub select: SelectList,
    pub from: FromClause,
    pub where_: Vec<SqlExpr>,
    pub group_by: Vec<SqlExpr>,
    pub having: Vec<SqlExpr>,
    pub order_by: Vec<SqlExpr>,
    pub limit: Option<Limit>,
}

impl SelectAst {
    pub fn new(select: SelectList, from: FromClause) -> Self {
        Self {
            for_update: None,
            select,
            from,
            where_: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn with_where(mut self, conditions: Vec<SqlExpr>) -> Self {
        self.where_ = conditions;
        self
    }
}

/// `DELETE` statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeleteAst {
    /// Target alias for the multi-table form (`DELETE alias FROM ...`).
    pub alias: Option<String>,
    pub from: FromClause,
    pub where_: Vec<SqlExpr>,
}
