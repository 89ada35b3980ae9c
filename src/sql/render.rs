//! SQL text generation.
//!
//! Turns a [`SelectAst`] or [`DeleteAst`] into dialect text plus an
//! [`Adapter`] that maps runtime variable values onto the placeholders in
//! emission order.
//!
//! Layout: every clause starts a new line, nested selects are wrapped in
//! parentheses and indented four spaces per level, and WHERE/HAVING put
//! each extra conjunct on its own `  AND` line.
//!
//! ```text
//! SELECT "s"."id", "s"."name"
//! FROM "Student" "s"
//! WHERE "s"."gpa" > ?
//!   AND "s"."group" = ?
//! ```

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::Serialize;

use super::ast::*;
use super::dialect::{DatePartStyle, Dialect, ParamStyle, SqlDialect};
use super::token::{Token, TokenStream};
use crate::error::{TranslateError, TranslateResult};
use crate::types::Value;

/// Generated SQL with its parameter adapter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rendered {
    pub sql: String,
    pub adapter: Adapter,
}

/// Maps variable values to the positional parameter list.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Adapter {
    params: Vec<ParamKey>,
}

impl Adapter {
    /// Parameter keys in binding order.
    pub fn params(&self) -> &[ParamKey] {
        &self.params
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Produce the values to bind, in placeholder order.
    ///
    /// A tuple item index selects into a tuple value; a primary-key index
    /// selects a key column of an entity value. A missing entity binds NULL.
    pub fn bind(&self, values: &HashMap<VarKey, Value>) -> TranslateResult<Vec<Value>> {
        self.params.iter().map(|key| bind_one(key, values)).collect()
    }
}

fn bind_one(key: &ParamKey, values: &HashMap<VarKey, Value>) -> TranslateResult<Value> {
    let mut value = values.get(&key.var).ok_or_else(|| {
        TranslateError::translation(format!("No value supplied for `{}`", key.var.src))
    })?;
    if let Some(i) = key.item {
        value = value
            .items()
            .and_then(|items| items.get(i))
            .ok_or_else(|| {
                TranslateError::type_error(format!(
                    "Expression `{}` is expected to be a tuple with at least {} items",
                    key.var.src,
                    i + 1
                ))
            })?;
    }
    match (key.pk, value) {
        (None, v) => Ok(v.clone()),
        (Some(_), Value::None) => Ok(Value::None),
        (Some(j), Value::Entity(entity)) => entity.pk.get(j).cloned().ok_or_else(|| {
            TranslateError::type_error(format!(
                "Primary key of `{}` has no column {}",
                key.var.src, j
            ))
        }),
        (Some(_), other) => Err(TranslateError::type_error(format!(
            "Expression `{}` is expected to be an entity instance, got {}",
            key.var.src,
            other.type_name()
        ))),
    }
}

/// Render a SELECT statement.
pub fn render_select(
    ast: &SelectAst,
    dialect: Dialect,
    inner_join_syntax: bool,
) -> TranslateResult<Rendered> {
    let mut renderer = Renderer::new(dialect, inner_join_syntax);
    let mut ts = TokenStream::new();
    renderer.select(&mut ts, ast)?;
    if let Some(for_update) = &ast.for_update {
        renderer.for_update(&mut ts, for_update)?;
    }
    Ok(renderer.finish(&ts))
}

/// Render a DELETE statement.
pub fn render_delete(
    ast: &DeleteAst,
    dialect: Dialect,
    inner_join_syntax: bool,
) -> TranslateResult<Rendered> {
    let mut renderer = Renderer::new(dialect, inner_join_syntax);
    let mut ts = TokenStream::new();
    renderer.delete(&mut ts, ast)?;
    Ok(renderer.finish(&ts))
}

struct Renderer {
    dialect: Dialect,
    inner_join_syntax: bool,
    indent: usize,
    suppress_aliases: bool,
    /// Distinct parameter keys with their 1-based numbers.
    keys: IndexMap<ParamKey, usize>,
    /// Every placeholder occurrence, in output order.
    occurrences: Vec<ParamKey>,
}

impl Renderer {
    fn new(dialect: Dialect, inner_join_syntax: bool) -> Self {
        Self {
            dialect,
            inner_join_syntax,
            indent: 0,
            suppress_aliases: false,
            keys: IndexMap::new(),
            occurrences: Vec::new(),
        }
    }

    fn finish(self, ts: &TokenStream) -> Rendered {
        let sql = ts.serialize(self.dialect).trim_end_matches('\n').to_string();
        let params = match self.dialect.param_style() {
            ParamStyle::Qmark => self.occurrences,
            ParamStyle::Numbered | ParamStyle::Named => self.keys.into_keys().collect(),
        };
        tracing::trace!(
            target: "gensql::sql",
            dialect = %self.dialect,
            params = params.len(),
            "rendered statement"
        );
        Rendered {
            sql,
            adapter: Adapter { params },
        }
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn select(&mut self, ts: &mut TokenStream, ast: &SelectAst) -> TranslateResult<()> {
        let prev_suppress = std::mem::replace(&mut self.suppress_aliases, false);
        let nested = self.indent > 0;
        if nested {
            ts.lparen().newline();
        }
        self.indent += 1;
        let result = self.select_sections(ts, ast, true);
        self.indent -= 1;
        self.suppress_aliases = prev_suppress;
        result?;
        if nested {
            ts.indent(self.indent).rparen();
        }
        Ok(())
    }

    /// Render the clauses of a select at the current indent.
    fn select_sections(
        &mut self,
        ts: &mut TokenStream,
        ast: &SelectAst,
        with_select_list: bool,
    ) -> TranslateResult<()> {
        let prefix = self.indent - 1;
        if with_select_list {
            ts.indent(prefix).push(Token::Select).space();
            if ast.select.kind == SelectKind::Distinct {
                ts.push(Token::Distinct).space();
            }
            self.expr_list(ts, &ast.select.exprs)?;
            ts.newline();
        }

        let (from, where_) = self.join_conditions(&ast.from, &ast.where_);
        self.from_clause(ts, &from)?;
        self.conditions(ts, Token::Where, &where_)?;
        if !ast.group_by.is_empty() {
            ts.indent(prefix).push(Token::GroupBy).space();
            self.expr_list(ts, &ast.group_by)?;
            ts.newline();
        }
        self.conditions(ts, Token::Having, &ast.having)?;
        if !ast.order_by.is_empty() {
            ts.indent(prefix).push(Token::OrderBy).space();
            self.expr_list(ts, &ast.order_by)?;
            ts.newline();
        }
        if let Some(limit) = &ast.limit {
            ts.indent(prefix);
            ts.append(&self.dialect.emit_limit_offset(Some(limit.limit), limit.offset));
            ts.newline();
        }
        Ok(())
    }

    fn for_update(&mut self, ts: &mut TokenStream, for_update: &ForUpdate) -> TranslateResult<()> {
        if for_update.nowait && !self.dialect.supports_for_update_nowait() {
            return Err(TranslateError::translation(format!(
                "nowait option is not supported by {}",
                self.dialect
            )));
        }
        if !self.dialect.supports_for_update() {
            return Ok(());
        }
        ts.push(Token::For).space().push(Token::Update);
        if for_update.nowait {
            ts.space().push(Token::Nowait);
        }
        ts.newline();
        Ok(())
    }

    fn delete(&mut self, ts: &mut TokenStream, ast: &DeleteAst) -> TranslateResult<()> {
        self.indent += 1;
        ts.push(Token::Delete).space();
        match &ast.alias {
            Some(alias) => {
                ts.push(Token::Ident(alias.clone())).space();
            }
            None => {
                let direct = matches!(
                    ast.from.items.as_slice(),
                    [FromItem { source: Source::Table(_), .. }]
                );
                if !direct {
                    return Err(TranslateError::translation(
                        "DELETE without a target alias must address a single table",
                    ));
                }
                self.suppress_aliases = true;
            }
        }
        let (from, where_) = self.join_conditions(&ast.from, &ast.where_);
        self.from_clause(ts, &from)?;
        self.conditions(ts, Token::Where, &where_)?;
        self.suppress_aliases = false;
        self.indent -= 1;
        Ok(())
    }

    // =========================================================================
    // Clauses
    // =========================================================================

    /// Without explicit join syntax, inner join conditions become WHERE
    /// conjuncts and the sources are listed with commas.
    fn join_conditions(&self, from: &FromClause, where_: &[SqlExpr]) -> (FromClause, Vec<SqlExpr>) {
        let mut from = from.clone();
        let mut where_ = where_.to_vec();
        if !self.inner_join_syntax && from.kind == FromKind::Inner {
            for item in from.items.iter_mut().skip(1) {
                if let Some(on) = item.on.take() {
                    where_.push(on);
                }
            }
        }
        (from, where_)
    }

    fn from_clause(&mut self, ts: &mut TokenStream, from: &FromClause) -> TranslateResult<()> {
        let prefix = self.indent - 1;
        let join = match from.kind {
            FromKind::Inner => Token::Inner,
            FromKind::Left => Token::Left,
        };
        ts.indent(prefix).push(Token::From).space();
        for (i, item) in from.items.iter().enumerate() {
            if i > 0 {
                if item.on.is_none() {
                    ts.comma().space();
                } else {
                    ts.newline()
                        .indent(prefix)
                        .raw("  ")
                        .push(join.clone())
                        .space()
                        .push(Token::Join)
                        .space();
                }
            }
            let alias = if self.suppress_aliases {
                None
            } else {
                item.alias.clone()
            };
            match &item.source {
                Source::Table(table) => {
                    ts.push(Token::Ident(table.clone()));
                }
                Source::Select(select) => {
                    if alias.is_none() {
                        return Err(TranslateError::translation(
                            "Subquery in FROM section must have an alias",
                        ));
                    }
                    self.select(ts, select)?;
                }
            }
            if let Some(alias) = alias {
                ts.space().push(Token::Ident(alias));
            }
            if let Some(on) = &item.on {
                ts.newline().indent(prefix + 1).push(Token::On).space();
                self.expr(ts, on)?;
            }
        }
        ts.newline();
        Ok(())
    }

    fn conditions(
        &mut self,
        ts: &mut TokenStream,
        keyword: Token,
        conditions: &[SqlExpr],
    ) -> TranslateResult<()> {
        let flat = flatten_and(conditions);
        let Some((first, rest)) = flat.split_first() else {
            return Ok(());
        };
        let prefix = self.indent - 1;
        ts.indent(prefix).push(keyword).space();
        self.expr(ts, first)?;
        ts.newline();
        for cond in rest {
            ts.indent(prefix).raw("  ").push(Token::And).space();
            self.expr(ts, cond)?;
            ts.newline();
        }
        Ok(())
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn expr_list(&mut self, ts: &mut TokenStream, exprs: &[SqlExpr]) -> TranslateResult<()> {
        for (i, e) in exprs.iter().enumerate() {
            if i > 0 {
                ts.comma().space();
            }
            self.expr(ts, e)?;
        }
        Ok(())
    }

    fn call(
        &mut self,
        ts: &mut TokenStream,
        name: &'static str,
        args: &[SqlExpr],
    ) -> TranslateResult<()> {
        ts.push(Token::FunctionName(name)).lparen();
        self.expr_list(ts, args)?;
        ts.rparen();
        Ok(())
    }

    fn param(&mut self, key: &ParamKey) -> Token {
        let next = self.keys.len() + 1;
        let n = *self.keys.entry(key.clone()).or_insert(next);
        self.occurrences.push(key.clone());
        Token::Param(n)
    }

    fn expr(&mut self, ts: &mut TokenStream, expr: &SqlExpr) -> TranslateResult<()> {
        match expr {
            SqlExpr::Column { alias, name } => {
                let qualifier = if self.suppress_aliases {
                    None
                } else {
                    alias.clone()
                };
                ts.push(Token::QualifiedIdent {
                    qualifier,
                    name: name.clone(),
                });
            }
            SqlExpr::Param(key) => {
                let tok = self.param(key);
                ts.push(tok);
            }
            SqlExpr::Value(lit) => {
                ts.push(literal_token(lit));
            }
            SqlExpr::Row(items) => {
                ts.lparen();
                self.expr_list(ts, items)?;
                ts.rparen();
            }
            SqlExpr::Binary { op, left, right } => self.binary(ts, *op, left, right)?,
            SqlExpr::Neg(inner) => {
                ts.push(Token::Minus).lparen();
                self.expr(ts, inner)?;
                ts.rparen();
            }
            SqlExpr::And(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        ts.space().push(Token::And).space();
                    }
                    self.expr(ts, item)?;
                }
            }
            SqlExpr::Or(items) => {
                ts.lparen();
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        ts.space().push(Token::Or).space();
                    }
                    self.expr(ts, item)?;
                }
                ts.rparen();
            }
            SqlExpr::Not(inner) => {
                ts.push(Token::Not).space().lparen();
                self.expr(ts, inner)?;
                ts.rparen();
            }
            SqlExpr::IsNull(inner) => {
                self.expr(ts, inner)?;
                ts.space().push(Token::IsNull);
            }
            SqlExpr::IsNotNull(inner) => {
                self.expr(ts, inner)?;
                ts.space().push(Token::IsNotNull);
            }
            SqlExpr::Concat(items) => {
                if self.dialect.supports_concat_operator() {
                    ts.lparen();
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            ts.space().push(Token::Concat).space();
                        }
                        self.expr(ts, item)?;
                    }
                    ts.rparen();
                } else {
                    self.call(ts, "concat", items)?;
                }
            }
            SqlExpr::Like {
                expr,
                template,
                escape,
                negated,
            } => {
                self.expr(ts, expr)?;
                ts.space();
                if *negated {
                    ts.push(Token::Not).space();
                }
                ts.push(Token::Like).space();
                self.expr(ts, template)?;
                if let Some(escape) = escape {
                    ts.space().push(Token::Escape).space();
                    self.expr(ts, escape)?;
                }
            }
            SqlExpr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                self.expr(ts, expr)?;
                ts.space();
                if *negated {
                    ts.push(Token::Not).space();
                }
                ts.push(Token::Between).space();
                self.expr(ts, low)?;
                ts.space().push(Token::And).space();
                self.expr(ts, high)?;
            }
            SqlExpr::In {
                expr,
                list,
                negated,
            } => {
                if list.is_empty() {
                    ts.raw(if *negated { "1 = 1" } else { "0 = 1" });
                    return Ok(());
                }
                self.expr(ts, expr)?;
                ts.space();
                if *negated {
                    ts.push(Token::Not).space();
                }
                ts.push(Token::In).space().lparen();
                self.expr_list(ts, list)?;
                ts.rparen();
            }
            SqlExpr::InSelect {
                expr,
                select,
                negated,
            } => {
                self.expr(ts, expr)?;
                ts.space();
                if *negated {
                    ts.push(Token::Not).space();
                }
                ts.push(Token::In).space();
                self.select(ts, select)?;
            }
            SqlExpr::Exists { select, negated } => self.exists(ts, select, *negated)?,
            SqlExpr::Select(select) => self.select(ts, select)?,
            SqlExpr::Count { distinct, args } => self.count(ts, *distinct, args)?,
            SqlExpr::Aggregate {
                func,
                distinct,
                args,
            } => self.aggregate(ts, *func, *distinct, args)?,
            SqlExpr::Func { func, args } => self.func(ts, *func, args)?,
            SqlExpr::Case { cases, default } => {
                ts.push(Token::Case);
                for (cond, then) in cases {
                    ts.space().push(Token::When).space();
                    self.expr(ts, cond)?;
                    ts.space().push(Token::Then).space();
                    self.expr(ts, then)?;
                }
                if let Some(default) = default {
                    ts.space().push(Token::Else).space();
                    self.expr(ts, default)?;
                }
                ts.space().push(Token::End);
            }
            SqlExpr::Desc(inner) => {
                self.expr(ts, inner)?;
                ts.space().push(Token::Desc);
            }
            SqlExpr::As { expr, alias } => {
                self.expr(ts, expr)?;
                ts.space()
                    .push(Token::As)
                    .space()
                    .push(Token::Ident(alias.clone()));
            }
        }
        Ok(())
    }

    fn binary(
        &mut self,
        ts: &mut TokenStream,
        op: BinaryOp,
        left: &SqlExpr,
        right: &SqlExpr,
    ) -> TranslateResult<()> {
        let symbol = match op {
            BinaryOp::Eq => Token::Eq,
            BinaryOp::Ne => Token::Ne,
            BinaryOp::Lt => Token::Lt,
            BinaryOp::Le => Token::Lte,
            BinaryOp::Gt => Token::Gt,
            BinaryOp::Ge => Token::Gte,
            BinaryOp::Add => Token::Plus,
            BinaryOp::Sub => Token::Minus,
            BinaryOp::Mul => Token::Mul,
            BinaryOp::Div | BinaryOp::FloorDiv => Token::Div,
            BinaryOp::Mod if self.dialect.uses_mod_function() => {
                return self.call(ts, "MOD", &[left.clone(), right.clone()]);
            }
            BinaryOp::Mod => Token::Mod,
            BinaryOp::Pow => {
                return self.call(ts, "power", &[left.clone(), right.clone()]);
            }
        };
        let parens = !op.is_comparison();
        if parens {
            ts.lparen();
        }
        self.expr(ts, left)?;
        ts.space().push(symbol).space();
        self.expr(ts, right)?;
        if parens {
            ts.rparen();
        }
        Ok(())
    }

    fn exists(
        &mut self,
        ts: &mut TokenStream,
        select: &SelectAst,
        negated: bool,
    ) -> TranslateResult<()> {
        if negated {
            ts.push(Token::Not).space();
        }
        ts.push(Token::Exists).space().lparen().newline();
        let prev_suppress = std::mem::replace(&mut self.suppress_aliases, false);
        ts.indent(self.indent)
            .push(Token::Select)
            .space()
            .push(Token::LitInt(1))
            .newline();
        self.indent += 1;
        let result = self.select_sections(ts, select, false);
        self.indent -= 1;
        self.suppress_aliases = prev_suppress;
        result?;
        ts.indent(self.indent).rparen();
        Ok(())
    }

    fn count(&mut self, ts: &mut TokenStream, distinct: bool, args: &[SqlExpr]) -> TranslateResult<()> {
        ts.push(Token::FunctionName("COUNT")).lparen();
        match args {
            [] if distinct => {
                return Err(TranslateError::translation(
                    "COUNT(DISTINCT) without argument",
                ))
            }
            [] => {
                ts.push(Token::Star);
            }
            [single] => {
                if distinct {
                    ts.push(Token::Distinct).space();
                }
                self.expr(ts, single)?;
            }
            several => {
                if distinct {
                    if !self.dialect.supports_multi_column_count_distinct() {
                        return Err(TranslateError::not_implemented(format!(
                            "COUNT(DISTINCT) over several columns is not supported by {}",
                            self.dialect
                        )));
                    }
                    ts.push(Token::Distinct).space();
                }
                if self.dialect.count_uses_row_value() {
                    ts.lparen();
                    self.expr_list(ts, several)?;
                    ts.rparen();
                } else {
                    self.expr_list(ts, several)?;
                }
            }
        }
        ts.rparen();
        Ok(())
    }

    fn aggregate(
        &mut self,
        ts: &mut TokenStream,
        func: AggFunc,
        distinct: bool,
        args: &[SqlExpr],
    ) -> TranslateResult<()> {
        if args.is_empty() {
            return Err(TranslateError::translation(format!(
                "{} requires an argument",
                func
            )));
        }
        match func {
            AggFunc::Count => return self.count(ts, distinct, args),
            AggFunc::Min | AggFunc::Max if args.len() > 1 => {
                let name = if func == AggFunc::Min {
                    self.dialect.least_function()
                } else {
                    self.dialect.greatest_function()
                };
                return self.call(ts, name, args);
            }
            _ => {}
        }
        let sum = func == AggFunc::Sum;
        if sum {
            ts.push(Token::FunctionName("coalesce")).lparen();
        }
        ts.push(Token::FunctionName(func.name())).lparen();
        if distinct && matches!(func, AggFunc::Sum | AggFunc::Avg) {
            ts.push(Token::Distinct).space();
        }
        self.expr_list(ts, args)?;
        ts.rparen();
        if sum {
            ts.comma().space().push(Token::LitInt(0)).rparen();
        }
        Ok(())
    }

    fn func(&mut self, ts: &mut TokenStream, func: ScalarFunc, args: &[SqlExpr]) -> TranslateResult<()> {
        match func {
            ScalarFunc::Upper => self.call(ts, "upper", args),
            ScalarFunc::Lower => self.call(ts, "lower", args),
            ScalarFunc::Length => self.call(ts, "length", args),
            ScalarFunc::Abs => self.call(ts, "abs", args),
            ScalarFunc::Coalesce => self.call(ts, "coalesce", args),
            ScalarFunc::Replace => self.call(ts, "replace", args),
            ScalarFunc::Substr => self.call(ts, "substr", args),
            ScalarFunc::Trim | ScalarFunc::Ltrim | ScalarFunc::Rtrim => self.trim(ts, func, args),
            ScalarFunc::Year
            | ScalarFunc::Month
            | ScalarFunc::Day
            | ScalarFunc::Hour
            | ScalarFunc::Minute
            | ScalarFunc::Second => self.date_part(ts, func, args),
            ScalarFunc::Random => {
                ts.raw(self.dialect.random_function());
                Ok(())
            }
            ScalarFunc::ToInt => {
                let [arg] = args else {
                    return Err(arity_error("cast", args.len()));
                };
                if self.dialect.uses_cast_operator() {
                    ts.lparen();
                    self.expr(ts, arg)?;
                    ts.rparen().raw("::int");
                } else {
                    ts.raw("CAST(");
                    self.expr(ts, arg)?;
                    ts.raw(" AS integer)");
                }
                Ok(())
            }
            ScalarFunc::ToReal => {
                let [arg] = args else {
                    return Err(arity_error("cast", args.len()));
                };
                ts.raw("CAST(");
                self.expr(ts, arg)?;
                ts.raw(" AS ").raw(self.dialect.real_type_name()).rparen();
                Ok(())
            }
        }
    }

    fn trim(&mut self, ts: &mut TokenStream, func: ScalarFunc, args: &[SqlExpr]) -> TranslateResult<()> {
        let (name, side) = match func {
            ScalarFunc::Ltrim => ("ltrim", "leading"),
            ScalarFunc::Rtrim => ("rtrim", "trailing"),
            _ => ("trim", "both"),
        };
        match args {
            [_] => self.call(ts, name, args),
            [expr, chars] if self.dialect.uses_trim_from_syntax() => {
                ts.raw("trim(").raw(side).space();
                self.expr(ts, chars)?;
                ts.raw(" from ");
                self.expr(ts, expr)?;
                ts.rparen();
                Ok(())
            }
            [_, _] => self.call(ts, name, args),
            _ => Err(arity_error(name, args.len())),
        }
    }

    fn date_part(&mut self, ts: &mut TokenStream, func: ScalarFunc, args: &[SqlExpr]) -> TranslateResult<()> {
        let [arg] = args else {
            return Err(arity_error("date part", args.len()));
        };
        let (name, keyword, start, len) = match func {
            ScalarFunc::Year => ("year", "YEAR", 1, 4),
            ScalarFunc::Month => ("month", "MONTH", 6, 2),
            ScalarFunc::Day => ("day", "DAY", 9, 2),
            ScalarFunc::Hour => ("hour", "HOUR", 12, 2),
            ScalarFunc::Minute => ("minute", "MINUTE", 15, 2),
            _ => ("second", "SECOND", 18, 2),
        };
        match self.dialect.date_part_style() {
            DatePartStyle::Substr => {
                ts.raw("cast(substr(");
                self.expr(ts, arg)?;
                ts.raw(&format!(", {}, {}) as integer)", start, len));
            }
            DatePartStyle::Function => {
                self.call(ts, name, args)?;
            }
            DatePartStyle::Extract => {
                ts.raw("EXTRACT(").raw(keyword).space().push(Token::From).space();
                self.expr(ts, arg)?;
                ts.rparen();
            }
        }
        Ok(())
    }
}

fn arity_error(name: &str, got: usize) -> TranslateError {
    TranslateError::translation(format!("{} received {} arguments", name, got))
}

fn literal_token(lit: &SqlLiteral) -> Token {
    match lit {
        SqlLiteral::Null => Token::LitNull,
        SqlLiteral::Bool(b) => Token::LitBool(*b),
        SqlLiteral::Int(i) => Token::LitInt(*i),
        SqlLiteral::Float(f) => Token::LitFloat(*f),
        SqlLiteral::Decimal(d) => Token::LitDecimal(d.clone()),
        SqlLiteral::Text(s) => Token::LitString(s.clone()),
        SqlLiteral::Date(d) => Token::LitDate(*d),
        SqlLiteral::DateTime(dt) => Token::LitDateTime(*dt),
        SqlLiteral::Bytes(b) => Token::LitBytes(b.clone()),
    }
}

fn flatten_and(conditions: &[SqlExpr]) -> Vec<&SqlExpr> {
    let mut out = Vec::new();
    for cond in conditions {
        match cond {
            SqlExpr::And(items) => out.extend(flatten_and(items)),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::test_utils::validate_sql;

    fn student_from() -> FromClause {
        let mut from = FromClause::new(FromKind::Inner);
        from.items.push(FromItem::table(Some("s".into()), "Student"));
        from
    }

    fn var(src: &str) -> ParamKey {
        ParamKey::new(VarKey::new(0, src))
    }

    fn simple_select() -> SelectAst {
        SelectAst::new(
            SelectList::all(vec![
                SqlExpr::column("s", "id"),
                SqlExpr::column("s", "name"),
            ]),
            student_from(),
        )
        .with_where(vec![
            SqlExpr::binary(
                BinaryOp::Gt,
                SqlExpr::column("s", "gpa"),
                SqlExpr::Param(var("x")),
            ),
            SqlExpr::binary(
                BinaryOp::Lt,
                SqlExpr::column("s", "gpa"),
                SqlExpr::Param(var("x")),
            ),
        ])
    }

    #[test]
    fn test_select_layout() {
        let out = render_select(&simple_select(), Dialect::Sqlite, false).unwrap();
        assert_eq!(
            out.sql,
            "SELECT \"s\".\"id\", \"s\".\"name\"\nFROM \"Student\" \"s\"\nWHERE \"s\".\"gpa\" > ?\n  AND \"s\".\"gpa\" < ?"
        );
        validate_sql(&out.sql, Dialect::Sqlite).unwrap();
    }

    #[test]
    fn test_repeated_param_per_style() {
        let qmark = render_select(&simple_select(), Dialect::Sqlite, false).unwrap();
        assert_eq!(qmark.adapter.params().len(), 2);

        let numbered = render_select(&simple_select(), Dialect::Postgres, false).unwrap();
        assert!(numbered.sql.contains("> $1"));
        assert!(numbered.sql.contains("< $1"));
        assert_eq!(numbered.adapter.params().len(), 1);

        let named = render_select(&simple_select(), Dialect::Oracle, false).unwrap();
        assert!(named.sql.contains("> :p1"));
    }

    #[test]
    fn test_adapter_binds_items_and_pk() {
        let adapter = Adapter {
            params: vec![var("t").item(1), var("e").pk(0)],
        };
        let mut values = HashMap::new();
        values.insert(
            VarKey::new(0, "t"),
            Value::tuple(vec![Value::Int(1), Value::Int(2)]),
        );
        values.insert(VarKey::new(0, "e"), Value::None);
        assert_eq!(adapter.bind(&values).unwrap(), vec![Value::Int(2), Value::None]);
    }

    #[test]
    fn test_adapter_missing_value() {
        let adapter = Adapter {
            params: vec![var("x")],
        };
        assert!(adapter.bind(&HashMap::new()).is_err());
    }

    #[test]
    fn test_exists_subquery_indented() {
        let mut inner_from = FromClause::new(FromKind::Inner);
        inner_from
            .items
            .push(FromItem::table(Some("s".into()), "Student"));
        let inner = SelectAst::new(SelectList::all(vec![]), inner_from).with_where(vec![
            SqlExpr::eq(SqlExpr::column("g", "number"), SqlExpr::column("s", "group")),
        ]);
        let mut from = FromClause::new(FromKind::Inner);
        from.items.push(FromItem::table(Some("g".into()), "Group"));
        let outer = SelectAst::new(SelectList::all(vec![SqlExpr::column("g", "number")]), from)
            .with_where(vec![SqlExpr::Exists {
                select: Box::new(inner),
                negated: false,
            }]);
        let out = render_select(&outer, Dialect::Sqlite, false).unwrap();
        assert_eq!(
            out.sql,
            "SELECT \"g\".\"number\"\nFROM \"Group\" \"g\"\nWHERE EXISTS (\n    SELECT 1\n    FROM \"Student\" \"s\"\n    WHERE \"g\".\"number\" = \"s\".\"group\"\n    )"
        );
        validate_sql(&out.sql, Dialect::Sqlite).unwrap();
    }

    #[test]
    fn test_inner_join_condition_moves_to_where() {
        let mut from = student_from();
        from.items.push(
            FromItem::table(Some("group".into()), "Group").with_on(Some(SqlExpr::eq(
                SqlExpr::column("s", "group"),
                SqlExpr::column("group", "number"),
            ))),
        );
        let ast = SelectAst::new(SelectList::all(vec![SqlExpr::column("s", "id")]), from);
        let flat = render_select(&ast, Dialect::Sqlite, false).unwrap();
        assert_eq!(
            flat.sql,
            "SELECT \"s\".\"id\"\nFROM \"Student\" \"s\", \"Group\" \"group\"\nWHERE \"s\".\"group\" = \"group\".\"number\""
        );
        let joined = render_select(&ast, Dialect::Sqlite, true).unwrap();
        assert_eq!(
            joined.sql,
            "SELECT \"s\".\"id\"\nFROM \"Student\" \"s\"\n  INNER JOIN \"Group\" \"group\"\n    ON \"s\".\"group\" = \"group\".\"number\""
        );
        validate_sql(&joined.sql, Dialect::Sqlite).unwrap();
    }

    #[test]
    fn test_operator_forms() {
        let a = SqlExpr::column("s", "a");
        let b = SqlExpr::column("s", "b");
        let ast = SelectAst::new(
            SelectList::all(vec![
                SqlExpr::binary(BinaryOp::Add, a.clone(), b.clone()),
                SqlExpr::binary(BinaryOp::Mod, a.clone(), b.clone()),
                SqlExpr::binary(BinaryOp::Pow, a.clone(), b.clone()),
                SqlExpr::Concat(vec![a.clone(), b.clone()]),
                SqlExpr::Neg(Box::new(a.clone())),
            ]),
            student_from(),
        );
        let pg = render_select(&ast, Dialect::Postgres, false).unwrap();
        assert!(pg.sql.starts_with(
            "SELECT (\"s\".\"a\" + \"s\".\"b\"), (\"s\".\"a\" % \"s\".\"b\"), power(\"s\".\"a\", \"s\".\"b\"), (\"s\".\"a\" || \"s\".\"b\"), -(\"s\".\"a\")"
        ));
        let my = render_select(&ast, Dialect::MySql, false).unwrap();
        assert!(my.sql.contains("concat(`s`.`a`, `s`.`b`)"));
        let ora = render_select(&ast, Dialect::Oracle, false).unwrap();
        assert!(ora.sql.contains("MOD(\"s\".\"a\", \"s\".\"b\")"));
    }

    #[test]
    fn test_empty_in_list() {
        let ast = SelectAst::new(SelectList::all(vec![SqlExpr::column("s", "id")]), student_from())
            .with_where(vec![SqlExpr::In {
                expr: Box::new(SqlExpr::column("s", "id")),
                list: vec![],
                negated: false,
            }]);
        let out = render_select(&ast, Dialect::Sqlite, false).unwrap();
        assert!(out.sql.ends_with("WHERE 0 = 1"));
    }

    #[test]
    fn test_aggregates() {
        let gpa = SqlExpr::column("s", "gpa");
        let ast = SelectAst::new(
            SelectList::new(
                SelectKind::Aggregates,
                vec![
                    SqlExpr::Aggregate {
                        func: AggFunc::Sum,
                        distinct: false,
                        args: vec![gpa.clone()],
                    },
                    SqlExpr::Count {
                        distinct: false,
                        args: vec![],
                    },
                    SqlExpr::Aggregate {
                        func: AggFunc::Max,
                        distinct: false,
                        args: vec![gpa.clone(), SqlExpr::value(0)],
                    },
                ],
            ),
            student_from(),
        );
        let lite = render_select(&ast, Dialect::Sqlite, false).unwrap();
        assert!(lite
            .sql
            .starts_with("SELECT coalesce(SUM(\"s\".\"gpa\"), 0), COUNT(*), max(\"s\".\"gpa\", 0)"));
        let pg = render_select(&ast, Dialect::Postgres, false).unwrap();
        assert!(pg.sql.contains("greatest(\"s\".\"gpa\", 0)"));
    }

    #[test]
    fn test_count_distinct_several_columns() {
        let ast = SelectAst::new(
            SelectList::new(
                SelectKind::Aggregates,
                vec![SqlExpr::Count {
                    distinct: true,
                    args: vec![SqlExpr::column("s", "a"), SqlExpr::column("s", "b")],
                }],
            ),
            student_from(),
        );
        let pg = render_select(&ast, Dialect::Postgres, false).unwrap();
        assert!(pg.sql.starts_with("SELECT COUNT(DISTINCT (\"s\".\"a\", \"s\".\"b\"))"));
        let my = render_select(&ast, Dialect::MySql, false).unwrap();
        assert!(my.sql.starts_with("SELECT COUNT(DISTINCT `s`.`a`, `s`.`b`)"));
        let err = render_select(&ast, Dialect::Sqlite, false).unwrap_err();
        assert!(err.is_not_implemented());
    }

    #[test]
    fn test_date_parts_per_dialect() {
        let ast = SelectAst::new(
            SelectList::all(vec![SqlExpr::func(
                ScalarFunc::Month,
                vec![SqlExpr::column("s", "dob")],
            )]),
            student_from(),
        );
        let sql = |d| render_select(&ast, d, false).unwrap().sql;
        assert!(sql(Dialect::Sqlite).starts_with("SELECT cast(substr(\"s\".\"dob\", 6, 2) as integer)"));
        assert!(sql(Dialect::MySql).starts_with("SELECT month(`s`.`dob`)"));
        assert!(sql(Dialect::Postgres).starts_with("SELECT EXTRACT(MONTH FROM \"s\".\"dob\")"));
    }

    #[test]
    fn test_limit_and_for_update() {
        let mut ast = simple_select();
        ast.limit = Some(Limit {
            limit: 10,
            offset: Some(20),
        });
        ast.for_update = Some(ForUpdate { nowait: true });
        let pg = render_select(&ast, Dialect::Postgres, false).unwrap();
        assert!(pg.sql.ends_with("LIMIT 10 OFFSET 20\nFOR UPDATE NOWAIT"));
        let ora = render_select(&ast, Dialect::Oracle, false).unwrap();
        assert!(ora
            .sql
            .ends_with("OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY\nFOR UPDATE NOWAIT"));
        assert!(render_select(&ast, Dialect::MySql, false).is_err());

        ast.for_update = Some(ForUpdate { nowait: false });
        let lite = render_select(&ast, Dialect::Sqlite, false).unwrap();
        assert!(lite.sql.ends_with("LIMIT 10 OFFSET 20"));
    }

    #[test]
    fn test_delete_forms() {
        let direct = DeleteAst {
            alias: None,
            from: student_from(),
            where_: vec![SqlExpr::binary(
                BinaryOp::Lt,
                SqlExpr::column("s", "gpa"),
                SqlExpr::value(2),
            )],
        };
        let out = render_delete(&direct, Dialect::Sqlite, false).unwrap();
        assert_eq!(out.sql, "DELETE FROM \"Student\"\nWHERE \"gpa\" < 2");
        validate_sql(&out.sql, Dialect::Sqlite).unwrap();

        let mut from = student_from();
        from.items.push(
            FromItem::table(Some("group".into()), "Group").with_on(Some(SqlExpr::eq(
                SqlExpr::column("s", "group"),
                SqlExpr::column("group", "number"),
            ))),
        );
        let aliased = DeleteAst {
            alias: Some("s".into()),
            from,
            where_: vec![],
        };
        let out = render_delete(&aliased, Dialect::MySql, false).unwrap();
        assert_eq!(
            out.sql,
            "DELETE `s` FROM `Student` `s`, `Group` `group`\nWHERE `s`.`group` = `group`.`number`"
        );
    }

    #[test]
    fn test_literals() {
        let ast = SelectAst::new(
            SelectList::all(vec![
                SqlExpr::value(true),
                SqlExpr::value("it's"),
                SqlExpr::Value(SqlLiteral::Null),
                SqlExpr::Value(SqlLiteral::Float(f64::NAN)),
            ]),
            student_from(),
        );
        let lite = render_select(&ast, Dialect::Sqlite, false).unwrap();
        assert!(lite.sql.starts_with("SELECT 1, 'it''s', null, null"));
        let pg = render_select(&ast, Dialect::Postgres, false).unwrap();
        assert!(pg.sql.starts_with("SELECT true, "));
    }
}
