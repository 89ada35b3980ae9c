//! Builtin functions callable inside queries.

use crate::error::{TranslateError, TranslateResult, EXPR_PLACEHOLDER};
use crate::sql::{AggFunc, ScalarFunc, SqlExpr};
use crate::syntax::render::python_repr;
use crate::syntax::CmpOp;
use crate::types::{coerce, Builtin, CanonicalType, Value};

use super::super::translator::Translator;
use super::ops::{expect_args, inherit_flags};
use super::{forgot_parentheses, type_repr, Monad, MonadKind};

/// Split off an optional `distinct=<bool>` keyword.
fn take_distinct(
    name: &str,
    keywords: Vec<(String, Monad)>,
) -> TranslateResult<(Option<bool>, Vec<(String, Monad)>)> {
    let mut distinct = None;
    let mut rest = Vec::new();
    for (key, value) in keywords {
        if key != "distinct" {
            rest.push((key, value));
            continue;
        }
        match value.const_value() {
            Some(Value::Bool(b)) => distinct = Some(*b),
            Some(Value::None) => {}
            _ => {
                return Err(TranslateError::type_error(format!(
                    "'distinct' argument of {}() function must be a constant boolean: {}",
                    name, EXPR_PLACEHOLDER
                )))
            }
        }
    }
    Ok((distinct, rest))
}

impl Translator<'_> {
    pub fn call_builtin(
        &mut self,
        builtin: Builtin,
        args: Vec<Monad>,
        keywords: Vec<(String, Monad)>,
    ) -> TranslateResult<Monad> {
        let name = builtin.name();
        for arg in args.iter().chain(keywords.iter().map(|(_, v)| v)) {
            if arg.is_method() {
                return Err(forgot_parentheses(arg));
            }
        }
        match builtin {
            Builtin::Count => {
                let (distinct, keywords) = take_distinct(name, keywords)?;
                expect_args(name, &args, &keywords, 0, 1)?;
                match args.into_iter().next() {
                    None => Ok(Monad::expr(
                        CanonicalType::INT,
                        vec![SqlExpr::Count {
                            distinct: false,
                            args: vec![],
                        }],
                    )
                    .with_aggregated(true)),
                    Some(arg) if matches!(arg.const_value(), Some(Value::Text(s)) if s == "*") => {
                        self.call_builtin(Builtin::Count, vec![], vec![])
                    }
                    Some(arg) => {
                        let arg = match distinct {
                            Some(d) => Monad {
                                forced_distinct: d,
                                ..arg
                            },
                            None => arg,
                        };
                        self.count(arg)
                    }
                }
            }
            Builtin::Sum | Builtin::Avg => {
                let (distinct, keywords) = take_distinct(name, keywords)?;
                expect_args(name, &args, &keywords, 1, 1)?;
                let mut arg = single(args)?;
                if let Some(d) = distinct {
                    arg.forced_distinct = d;
                }
                let func = if builtin == Builtin::Sum {
                    AggFunc::Sum
                } else {
                    AggFunc::Avg
                };
                self.aggregate(arg, func)
            }
            Builtin::Min | Builtin::Max => {
                expect_args(name, &args, &keywords, 1, usize::MAX)?;
                let func = if builtin == Builtin::Min {
                    AggFunc::Min
                } else {
                    AggFunc::Max
                };
                if args.len() == 1 {
                    return self.aggregate(single(args)?, func);
                }
                self.least_greatest(name, func, args)
            }
            Builtin::Len => {
                expect_args(name, &args, &keywords, 1, 1)?;
                self.len(single(args)?)
            }
            Builtin::Exists => {
                expect_args(name, &args, &keywords, 1, 1)?;
                let arg = single(args)?;
                if !matches!(arg.kind, MonadKind::AttrSet { .. } | MonadKind::QuerySet(_)) {
                    return Err(TranslateError::type_error(format!(
                        "'exists' function expects generator expression or collection, got: {}",
                        EXPR_PLACEHOLDER
                    )));
                }
                self.nonzero(arg)
            }
            Builtin::Desc => {
                expect_args(name, &args, &keywords, 1, 1)?;
                let arg = single(args)?;
                if let MonadKind::Desc(inner) = arg.kind {
                    return Ok(*inner);
                }
                let ty = arg.ty.clone();
                let aggregated = arg.aggregated;
                let mut monad = Monad::new(MonadKind::Desc(Box::new(arg)), ty);
                monad.aggregated = aggregated;
                Ok(monad)
            }
            Builtin::Distinct => {
                expect_args(name, &args, &keywords, 1, 1)?;
                let arg = single(args)?;
                if !arg.is_set_like() && !arg.ty.is_set() && !arg.ty.is_numeric() {
                    return Err(TranslateError::type_error(format!(
                        "'distinct' function expects a collection or a numeric value, got {}: {}",
                        type_repr(&arg.ty),
                        EXPR_PLACEHOLDER
                    )));
                }
                Ok(Monad {
                    forced_distinct: true,
                    ..arg
                })
            }
            Builtin::Join => {
                expect_args(name, &args, &keywords, 1, 1)?;
                single(args)
            }
            Builtin::Coalesce => {
                expect_args(name, &args, &keywords, 0, usize::MAX)?;
                self.coalesce(args)
            }
            Builtin::Concat => {
                expect_args(name, &args, &keywords, 0, usize::MAX)?;
                self.concat(args)
            }
            Builtin::Between => {
                expect_args(name, &args, &keywords, 3, 3)?;
                self.between(args)
            }
            Builtin::Abs => {
                expect_args(name, &args, &keywords, 1, 1)?;
                self.abs(single(args)?)
            }
            Builtin::Select => {
                expect_args(name, &args, &keywords, 1, 1)?;
                let arg = single(args)?;
                if !matches!(arg.kind, MonadKind::QuerySet(_)) {
                    return Err(TranslateError::type_error(format!(
                        "'select' function expects generator expression, got: {}",
                        EXPR_PLACEHOLDER
                    )));
                }
                Ok(arg)
            }
            Builtin::Random => {
                expect_args(name, &args, &keywords, 0, 0)?;
                self.cacheable = false;
                Ok(Monad::expr(
                    CanonicalType::FLOAT,
                    vec![SqlExpr::func(ScalarFunc::Random, vec![])],
                ))
            }
        }
    }

    /// `min(a, b, ...)` and `max(a, b, ...)` over scalars.
    fn least_greatest(&mut self, name: &str, func: AggFunc, args: Vec<Monad>) -> TranslateResult<Monad> {
        let mut ty: Option<CanonicalType> = None;
        for arg in &args {
            if arg.is_set_like() || !arg.ty.is_comparable_kind() {
                return Err(TranslateError::type_error(format!(
                    "Value of type {} is not valid as argument of {} function in expression {}",
                    type_repr(&arg.ty),
                    python_repr(name),
                    EXPR_PLACEHOLDER
                )));
            }
            ty = Some(match ty {
                None => arg.ty.clone(),
                Some(t) => coerce(&t, &arg.ty).ok_or_else(|| {
                    TranslateError::incomparable(t.to_string(), arg.ty.to_string())
                })?,
            });
        }
        let ty = ty.ok_or_else(|| {
            TranslateError::type_error(format!("{}() function expected at least one argument", name))
        })?;
        let aggregated = args.iter().any(Monad::is_aggregated);
        let mut sql = Vec::with_capacity(args.len());
        for arg in &args {
            sql.push(self.single_sql(arg)?);
        }
        Ok(Monad::expr(
            ty,
            vec![SqlExpr::Aggregate {
                func,
                distinct: false,
                args: sql,
            }],
        )
        .with_aggregated(aggregated))
    }

    fn coalesce(&mut self, args: Vec<Monad>) -> TranslateResult<Monad> {
        if args.len() < 2 {
            return Err(TranslateError::type_error(
                "coalesce() function requires at least two arguments",
            ));
        }
        let mut ty = args[0].ty.clone();
        for arg in &args[1..] {
            ty = match (&ty, &arg.ty) {
                (CanonicalType::Null, t) | (t, CanonicalType::Null) => t.clone(),
                (a, b) => coerce(a, b).filter(|t| !t.is_set()).ok_or_else(|| {
                    TranslateError::type_error(
                        "All arguments of coalesce() function should have the same type",
                    )
                })?,
            };
        }
        let aggregated = args.iter().any(Monad::is_aggregated);
        let mut sql = Vec::with_capacity(args.len());
        for arg in &args {
            sql.push(self.single_sql(arg)?);
        }
        Ok(Monad::expr(ty, vec![SqlExpr::func(ScalarFunc::Coalesce, sql)]).with_aggregated(aggregated))
    }

    fn concat(&mut self, args: Vec<Monad>) -> TranslateResult<Monad> {
        if args.len() < 2 {
            return Err(TranslateError::type_error(
                "concat() function requires at least two arguments",
            ));
        }
        let mut parts = Vec::with_capacity(args.len());
        for arg in &args {
            if arg.is_set_like() || arg.ty.is_entity() || matches!(arg.ty, CanonicalType::Tuple(_)) {
                return Err(TranslateError::type_error(format!(
                    "Invalid argument of concat() function: {}",
                    arg.src
                )));
            }
            parts.push(self.single_sql(arg)?);
        }
        let aggregated = args.iter().any(Monad::is_aggregated);
        Ok(Monad::expr(CanonicalType::Text, vec![SqlExpr::Concat(parts)]).with_aggregated(aggregated))
    }

    fn between(&mut self, args: Vec<Monad>) -> TranslateResult<Monad> {
        let [x, low, high] = <[Monad; 3]>::try_from(args)
            .map_err(|_| TranslateError::type_error("between() takes 3 arguments"))?;
        for bound in [&low, &high] {
            if bound.ty.is_entity() || bound.is_set_like() {
                return Err(TranslateError::type_error(format!(
                    "{} instance cannot be argument of between() function: {}",
                    type_repr(&bound.ty),
                    EXPR_PLACEHOLDER
                )));
            }
            self.check_comparable(&x, bound, CmpOp::Le)?;
        }
        if x.ty.is_entity() || x.is_set_like() {
            return Err(TranslateError::type_error(format!(
                "{} instance cannot be argument of between() function: {}",
                type_repr(&x.ty),
                EXPR_PLACEHOLDER
            )));
        }
        let sql = SqlExpr::Between {
            expr: Box::new(self.single_sql(&x)?),
            low: Box::new(self.single_sql(&low)?),
            high: Box::new(self.single_sql(&high)?),
            negated: false,
        };
        let aggregated = x.is_aggregated() || low.is_aggregated() || high.is_aggregated();
        Ok(inherit_flags(Monad::bool_expr(sql).with_aggregated(aggregated), &x))
    }
}

fn single(args: Vec<Monad>) -> TranslateResult<Monad> {
    args.into_iter()
        .next()
        .ok_or_else(|| TranslateError::type_error("Missing argument"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distinct_keyword_is_split_off() {
        let keywords = vec![
            ("distinct".to_string(), Monad::constant(Value::Bool(true))),
            ("other".to_string(), Monad::constant(Value::Int(1))),
        ];
        let (distinct, rest) = take_distinct("sum", keywords).unwrap();
        assert_eq!(distinct, Some(true));
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].0, "other");
    }

    #[test]
    fn test_distinct_keyword_must_be_constant() {
        let keywords = vec![("distinct".to_string(), Monad::expr(CanonicalType::BOOL, vec![]))];
        assert!(take_distinct("count", keywords).is_err());
    }
}
