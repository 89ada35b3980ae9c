//! String operations: slicing, LIKE patterns and string methods.

use crate::error::{TranslateError, TranslateResult, EXPR_PLACEHOLDER};
use crate::sql::{BinaryOp, ScalarFunc, SqlExpr, SqlLiteral};
use crate::types::{CanonicalType, Value};

use super::super::translator::Translator;
use super::ops::expect_args;
use super::{binop_error, forgot_parentheses, type_label, type_repr, Monad, MonadKind};

pub(crate) const STRING_METHODS: [&str; 7] =
    ["upper", "lower", "startswith", "endswith", "strip", "lstrip", "rstrip"];

const ESCAPE: &str = "!";

fn escape_like(value: &str) -> String {
    value
        .replace('!', "!!")
        .replace('%', "!%")
        .replace('_', "!_")
}

fn text(value: impl Into<String>) -> SqlExpr {
    SqlExpr::Value(SqlLiteral::Text(value.into()))
}

fn const_text(monad: &Monad) -> Option<&str> {
    match monad.const_value() {
        Some(Value::Text(s)) => Some(s),
        _ => None,
    }
}

fn const_int(monad: &Monad) -> Option<i64> {
    match monad.const_value() {
        Some(Value::Int(i)) => Some(*i),
        _ => None,
    }
}

/// Resolve a Python-style index against a length, clamping like slices do.
fn clamp_index(index: i64, len: usize) -> usize {
    let len = len as i64;
    let index = if index < 0 { index + len } else { index };
    index.clamp(0, len) as usize
}

fn slice_chars(value: &str, start: Option<i64>, stop: Option<i64>) -> String {
    let chars: Vec<char> = value.chars().collect();
    let start = start.map_or(0, |i| clamp_index(i, chars.len()));
    let stop = stop.map_or(chars.len(), |i| clamp_index(i, chars.len()));
    if start >= stop {
        return String::new();
    }
    chars[start..stop].iter().collect()
}

fn char_at(value: &str, index: i64) -> Option<char> {
    let len = value.chars().count() as i64;
    let index = if index < 0 { index + len } else { index };
    if index < 0 || index >= len {
        return None;
    }
    value.chars().nth(index as usize)
}

impl Translator<'_> {
    /// `s[start:stop]`.
    pub fn slice(
        &mut self,
        value: Monad,
        start: Option<Monad>,
        stop: Option<Monad>,
        step: Option<Monad>,
    ) -> TranslateResult<Monad> {
        if value.is_method() {
            return Err(forgot_parentheses(&value));
        }
        if !value.ty.is_string() || value.is_set_like() {
            return Err(TranslateError::type_error(format!(
                "{} object is not subscriptable: {}",
                type_repr(&value.ty),
                EXPR_PLACEHOLDER
            )));
        }
        if step.is_some() {
            return Err(TranslateError::type_error(format!(
                "Step is not supported in {}",
                EXPR_PLACEHOLDER
            )));
        }
        if start.is_none() && stop.is_none() {
            return Ok(value);
        }
        let start_const = start.as_ref().map(const_int);
        let stop_const = stop.as_ref().map(const_int);
        if let Some(s) = const_text(&value) {
            if start_const.unwrap_or(Some(0)).is_some() && stop_const.unwrap_or(Some(0)).is_some() {
                let sliced = slice_chars(s, start_const.flatten(), stop_const.flatten());
                return Ok(Monad::constant(Value::Text(sliced)));
            }
        }
        for (bound, which) in [(&start, "start"), (&stop, "stop")] {
            if let Some(b) = bound {
                if b.ty != CanonicalType::INT {
                    return Err(TranslateError::type_error(format!(
                        "Invalid type of {} index (expected 'int', got {}) in string slice {}",
                        which,
                        type_repr(&b.ty),
                        EXPR_PLACEHOLDER
                    )));
                }
                if let MonadKind::Param { key, literal: None } = &b.kind {
                    if key.item.is_none() && !self.slice_bounds.contains(&key.var) {
                        self.slice_bounds.push(key.var.clone());
                    }
                }
            }
        }
        let negative = || {
            TranslateError::not_implemented(format!(
                "Negative indices are not supported in string slice {}",
                EXPR_PLACEHOLDER
            ))
        };
        let expr = self.single_sql(&value)?;
        let start = start.unwrap_or_else(|| Monad::constant(Value::Int(0)));
        let start_value = const_int(&start);
        let start_sql = match start_value {
            Some(v) if v < 0 => return Err(negative()),
            Some(v) => SqlExpr::value(v + 1),
            None => SqlExpr::binary(BinaryOp::Add, self.single_sql(&start)?, SqlExpr::value(1i64)),
        };
        let len_sql = match stop {
            None => None,
            Some(stop) => {
                let stop_sql = match const_int(&stop) {
                    Some(v) if v < 0 => return Err(negative()),
                    Some(v) => match start_value {
                        Some(s) => {
                            return Ok(self.substr(&value, expr, start_sql, Some(SqlExpr::value(v - s))))
                        }
                        None => SqlExpr::value(v),
                    },
                    None => self.single_sql(&stop)?,
                };
                let start_sql = match start_value {
                    Some(s) => SqlExpr::value(s),
                    None => self.single_sql(&start)?,
                };
                Some(SqlExpr::binary(BinaryOp::Sub, stop_sql, start_sql))
            }
        };
        Ok(self.substr(&value, expr, start_sql, len_sql))
    }

    fn substr(&self, value: &Monad, expr: SqlExpr, start: SqlExpr, len: Option<SqlExpr>) -> Monad {
        let mut args = vec![expr, start];
        args.extend(len);
        Monad::expr(value.ty.clone(), vec![SqlExpr::func(ScalarFunc::Substr, args)])
    }

    /// `s[i]`.
    pub fn getitem(&mut self, value: Monad, index: Monad) -> TranslateResult<Monad> {
        if value.is_method() {
            return Err(forgot_parentheses(&value));
        }
        if !value.ty.is_string() || value.is_set_like() {
            return Err(TranslateError::type_error(format!(
                "{} object is not subscriptable: {}",
                type_repr(&value.ty),
                EXPR_PLACEHOLDER
            )));
        }
        if let MonadKind::List(_) = index.kind {
            return Err(TranslateError::type_error(format!(
                "String index must be of 'int' type. Got 'tuple' in {}",
                EXPR_PLACEHOLDER
            )));
        }
        if let (Some(s), Some(i)) = (const_text(&value), const_int(&index)) {
            let c = char_at(s, i)
                .ok_or_else(|| TranslateError::Index("string index out of range".into()))?;
            return Ok(Monad::constant(Value::Text(c.to_string())));
        }
        if index.ty != CanonicalType::INT {
            return Err(TranslateError::type_error(format!(
                "String indices must be integers. Got {} in expression {}",
                type_repr(&index.ty),
                EXPR_PLACEHOLDER
            )));
        }
        let expr = self.single_sql(&value)?;
        let index_sql = match const_int(&index) {
            Some(v) if v >= 0 => SqlExpr::value(v + 1),
            Some(v) => SqlExpr::value(v),
            None => {
                let inner = self.single_sql(&index)?;
                SqlExpr::binary(
                    BinaryOp::Add,
                    inner.clone(),
                    SqlExpr::case_when(
                        SqlExpr::binary(BinaryOp::Ge, inner, SqlExpr::value(0i64)),
                        SqlExpr::value(1i64),
                        Some(SqlExpr::value(0i64)),
                    ),
                )
            }
        };
        Ok(self.substr(&value, expr, index_sql, Some(SqlExpr::value(1i64))))
    }

    /// `item in s`.
    pub fn string_contains(&mut self, container: Monad, item: Monad, not_in: bool) -> TranslateResult<Monad> {
        if !item.ty.is_string() || item.is_set_like() {
            return Err(TranslateError::incomparable(
                type_label(&item.ty),
                type_label(&container.ty),
            ));
        }
        self.like(&container, &item, true, true, not_in)
    }

    /// `expr LIKE pattern` with `%` added before and/or after the item.
    fn like(&mut self, monad: &Monad, item: &Monad, before: bool, after: bool, negated: bool) -> TranslateResult<Monad> {
        let (template, escape) = match const_text(item) {
            Some(value) => {
                let escape = value.contains('%') || value.contains('_');
                let mut pattern = if escape {
                    escape_like(value)
                } else {
                    value.to_string()
                };
                if before {
                    pattern.insert(0, '%');
                }
                if after {
                    pattern.push('%');
                }
                (text(pattern), escape)
            }
            None => {
                let mut sql = self.single_sql(item)?;
                for (from, to) in [("!", "!!"), ("%", "!%"), ("_", "!_")] {
                    sql = SqlExpr::func(ScalarFunc::Replace, vec![sql, text(from), text(to)]);
                }
                let mut parts = Vec::with_capacity(3);
                if before {
                    parts.push(text("%"));
                }
                parts.push(sql);
                if after {
                    parts.push(text("%"));
                }
                let template = if parts.len() == 1 {
                    parts.remove(0)
                } else {
                    SqlExpr::Concat(parts)
                };
                (template, true)
            }
        };
        let expr = self.single_sql(monad)?;
        Ok(Monad::bool_expr(SqlExpr::Like {
            expr: Box::new(expr),
            template: Box::new(template),
            escape: escape.then(|| Box::new(text(ESCAPE))),
            negated,
        }))
    }

    /// Empty or, for a nullable attribute, NULL.
    pub fn string_negate(&mut self, monad: &Monad) -> TranslateResult<Monad> {
        let sql = self.single_sql(monad)?;
        let empty = SqlExpr::eq(SqlExpr::func(ScalarFunc::Length, vec![sql.clone()]), SqlExpr::value(0i64));
        let result = if matches!(monad.kind, MonadKind::Attr { .. }) && self.is_nullable(monad)? {
            SqlExpr::Or(vec![empty, SqlExpr::is_null(sql)])
        } else {
            empty
        };
        Ok(Monad::bool_expr(result).with_aggregated(monad.is_aggregated()))
    }

    pub fn string_len(&mut self, monad: Monad) -> TranslateResult<Monad> {
        if let Some(s) = const_text(&monad) {
            return Ok(Monad::constant(Value::Int(s.chars().count() as i64)));
        }
        let sql = self.single_sql(&monad)?;
        Ok(Monad::expr(
            CanonicalType::INT,
            vec![SqlExpr::func(ScalarFunc::Length, vec![sql])],
        ))
    }

    /// `a + b` on strings.
    pub fn string_concat(&mut self, left: Monad, right: Monad) -> TranslateResult<Monad> {
        if right.is_method() {
            return Err(forgot_parentheses(&right));
        }
        if !right.ty.is_string() || right.is_set_like() {
            return Err(binop_error(&left, &right, "+"));
        }
        let left_sql = self.single_sql(&left)?;
        let right_sql = self.single_sql(&right)?;
        let parts = [left_sql, right_sql]
            .into_iter()
            .flat_map(|part| match part {
                SqlExpr::Concat(items) => items,
                other => vec![other],
            })
            .collect();
        Ok(Monad::expr(left.ty.clone(), vec![SqlExpr::Concat(parts)]))
    }

    pub fn call_string_method(
        &mut self,
        parent: Monad,
        name: &str,
        args: Vec<Monad>,
        keywords: Vec<(String, Monad)>,
    ) -> TranslateResult<Monad> {
        match name {
            "upper" | "lower" => {
                expect_args(name, &args, &keywords, 0, 0)?;
                let func = if name == "upper" {
                    ScalarFunc::Upper
                } else {
                    ScalarFunc::Lower
                };
                let sql = self.single_sql(&parent)?;
                Ok(Monad::expr(parent.ty.clone(), vec![SqlExpr::func(func, vec![sql])]))
            }
            "startswith" | "endswith" => {
                expect_args(name, &args, &keywords, 1, 1)?;
                let arg = &args[0];
                if arg.is_method() {
                    return Err(forgot_parentheses(arg));
                }
                if !arg.ty.is_string() || arg.is_set_like() {
                    return Err(TranslateError::type_error(format!(
                        "Expected {} argument but got {} in expression {}",
                        type_repr(&parent.ty),
                        type_repr(&arg.ty),
                        EXPR_PLACEHOLDER
                    )));
                }
                let starts = name == "startswith";
                self.like(&parent, arg, !starts, starts, false)
            }
            "strip" | "lstrip" | "rstrip" => {
                let (mut args, keywords): (Vec<Monad>, Vec<(String, Monad)>) = (args, keywords);
                let mut rest = Vec::new();
                for (key, value) in keywords {
                    if key == "chars" && args.is_empty() {
                        args.push(value);
                    } else {
                        rest.push((key, value));
                    }
                }
                expect_args(name, &args, &rest, 0, 1)?;
                let func = match name {
                    "strip" => ScalarFunc::Trim,
                    "lstrip" => ScalarFunc::Ltrim,
                    _ => ScalarFunc::Rtrim,
                };
                let mut sql = vec![self.single_sql(&parent)?];
                if let Some(chars) = args.first() {
                    if chars.is_method() {
                        return Err(forgot_parentheses(chars));
                    }
                    if !chars.ty.is_string() || chars.is_set_like() {
                        return Err(TranslateError::type_error(format!(
                            "'chars' argument must be of {} type in {}, got: {}",
                            type_repr(&parent.ty),
                            EXPR_PLACEHOLDER,
                            type_repr(&chars.ty)
                        )));
                    }
                    sql.push(self.single_sql(chars)?);
                }
                Ok(Monad::expr(parent.ty.clone(), vec![SqlExpr::func(func, sql)]))
            }
            _ => Err(TranslateError::attribute(format!(
                "{} object has no attribute '{}': {}",
                type_repr(&parent.ty),
                name,
                EXPR_PLACEHOLDER
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_escaping() {
        assert_eq!(escape_like("50%_off!"), "50!%!_off!!");
    }

    #[test]
    fn test_const_slicing_follows_python() {
        assert_eq!(slice_chars("abcdef", Some(1), Some(3)), "bc");
        assert_eq!(slice_chars("abcdef", Some(-2), None), "ef");
        assert_eq!(slice_chars("abcdef", Some(4), Some(2)), "");
        assert_eq!(slice_chars("abc", None, Some(10)), "abc");
        assert_eq!(char_at("abc", -1), Some('c'));
        assert_eq!(char_at("abc", 3), None);
    }
}
