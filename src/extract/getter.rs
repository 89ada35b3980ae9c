//! Evaluation of extracted external expressions in the caller's scope.
//!
//! A [`Getter`] holds one extracted subtree. Evaluating it against an
//! [`Env`] produces the concrete [`Value`] bound to the query parameter.
//! Semantics follow the host language closely enough for parameter
//! expressions: integer/float arithmetic, comparisons, boolean operators
//! returning their operands, indexing and a few pure builtins.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use crate::schema::Schema;
use crate::syntax::{BinOpKind, BoolOpKind, CmpOp, Literal, Node, NodeKind, UnaryOpKind};
use crate::types::{Builtin, Value};

/// Category of an evaluation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvalErrorKind {
    NameError,
    TypeError,
    AttributeError,
    IndexError,
    ZeroDivisionError,
}

impl fmt::Display for EvalErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EvalErrorKind::NameError => "NameError",
            EvalErrorKind::TypeError => "TypeError",
            EvalErrorKind::AttributeError => "AttributeError",
            EvalErrorKind::IndexError => "IndexError",
            EvalErrorKind::ZeroDivisionError => "ZeroDivisionError",
        };
        f.write_str(name)
    }
}

/// A getter raised while computing a parameter value.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub message: String,
}

impl EvalError {
    pub fn new(kind: EvalErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    fn type_error(message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::TypeError, message)
    }

    fn index_error(message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::IndexError, message)
    }

    fn zero_division(message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::ZeroDivisionError, message)
    }
}

type EvalResult = Result<Value, EvalError>;

/// Caller-supplied variables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Vars {
    values: HashMap<String, Value>,
}

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Vars {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut vars = Vars::new();
        for (k, v) in iter {
            vars.insert(k, v);
        }
        vars
    }
}

/// Scope in which getters run.
///
/// Names resolve against the variables first, then against the entity
/// names of the schema, then against the query builtins.
#[derive(Debug, Clone, Copy)]
pub struct Env<'a> {
    pub vars: &'a Vars,
    pub schema: Option<&'a Schema>,
}

impl<'a> Env<'a> {
    pub fn new(vars: &'a Vars, schema: Option<&'a Schema>) -> Self {
        Self { vars, schema }
    }

    pub fn lookup(&self, name: &str) -> EvalResult {
        if let Some(value) = self.vars.get(name) {
            return Ok(value.clone());
        }
        if let Some(entity) = self.schema.and_then(|s| s.entity_ref(name)) {
            return Ok(Value::EntitySet(entity));
        }
        if let Some(builtin) = Builtin::from_name(name) {
            return Ok(Value::Function(builtin));
        }
        Err(EvalError::new(
            EvalErrorKind::NameError,
            format!("name '{}' is not defined", name),
        ))
    }
}

/// One compiled external expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Getter {
    pub src: String,
    node: Node,
}

impl Getter {
    pub fn new(src: impl Into<String>, node: Node) -> Self {
        Self {
            src: src.into(),
            node,
        }
    }

    /// The literal value when the expression is a plain constant or a
    /// negated numeric constant.
    pub fn literal(&self) -> Option<Value> {
        match &self.node.kind {
            NodeKind::Const(lit) => Some(literal_value(lit)),
            NodeKind::UnaryOp {
                op: UnaryOpKind::Neg,
                operand,
            } => match &operand.kind {
                NodeKind::Const(Literal::Int(i)) => i.checked_neg().map(Value::Int),
                NodeKind::Const(Literal::Float(f)) => Some(Value::Float(-f)),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn eval(&self, env: &Env<'_>) -> EvalResult {
        eval(&self.node, env)
    }
}

pub(crate) fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Int(i) => Value::Int(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::Str(s) => Value::Text(s.clone()),
        Literal::Bool(b) => Value::Bool(*b),
        Literal::None => Value::None,
    }
}

fn eval(node: &Node, env: &Env<'_>) -> EvalResult {
    match &node.kind {
        NodeKind::Const(lit) => Ok(literal_value(lit)),
        NodeKind::Name { id, .. } => env.lookup(id),
        NodeKind::Attribute { value, attr } => {
            let value = eval(value, env)?;
            get_attr(&value, attr, env)
        }
        NodeKind::Tuple(items) => Ok(Value::Tuple(eval_all(items, env)?)),
        NodeKind::List(items) => Ok(Value::List(eval_all(items, env)?)),
        NodeKind::Dict(pairs) => {
            let mut out = Vec::with_capacity(pairs.len());
            for (k, v) in pairs {
                out.push((eval(k, env)?, eval(v, env)?));
            }
            Ok(Value::Map(out))
        }
        NodeKind::BinOp { left, op, right } => {
            let l = eval(left, env)?;
            let r = eval(right, env)?;
            binop(*op, &l, &r)
        }
        NodeKind::UnaryOp { op, operand } => {
            let v = eval(operand, env)?;
            unary(*op, &v)
        }
        NodeKind::BoolOp { op, values } => {
            let mut last = Value::None;
            for value in values {
                last = eval(value, env)?;
                let stop = match op {
                    BoolOpKind::And => !last.truthy(),
                    BoolOpKind::Or => last.truthy(),
                };
                if stop {
                    break;
                }
            }
            Ok(last)
        }
        NodeKind::Compare {
            left,
            ops,
            comparators,
        } => {
            let mut current = eval(left, env)?;
            for (op, right) in ops.iter().zip(comparators) {
                let next = eval(right, env)?;
                if !compare(*op, &current, &next)? {
                    return Ok(Value::Bool(false));
                }
                current = next;
            }
            Ok(Value::Bool(true))
        }
        NodeKind::IfExp { test, body, orelse } => {
            if eval(test, env)?.truthy() {
                eval(body, env)
            } else {
                eval(orelse, env)
            }
        }
        NodeKind::Subscript { value, index } => {
            let container = eval(value, env)?;
            match &index.kind {
                NodeKind::Slice { lower, upper, step } => {
                    let bound = |b: &Option<Box<Node>>| -> Result<Option<i64>, EvalError> {
                        match b {
                            None => Ok(None),
                            Some(n) => match eval(n, env)? {
                                Value::None => Ok(None),
                                v => v.as_int().map(Some).ok_or_else(|| {
                                    EvalError::type_error(
                                        "slice indices must be integers or None",
                                    )
                                }),
                            },
                        }
                    };
                    slice(&container, bound(lower)?, bound(upper)?, bound(step)?)
                }
                _ => {
                    let key = eval(index, env)?;
                    subscript(&container, &key)
                }
            }
        }
        NodeKind::Call { func, args } => {
            let callee = eval(func, env)?;
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                match &arg.kind {
                    NodeKind::Keyword { arg: name, .. } => {
                        return Err(EvalError::type_error(format!(
                            "{}() got an unexpected keyword argument '{}'",
                            callee_name(&callee),
                            name
                        )))
                    }
                    NodeKind::Starred(inner) => match eval(inner, env)? {
                        Value::Tuple(items) | Value::List(items) => values.extend(items),
                        other => {
                            return Err(EvalError::type_error(format!(
                                "argument after * must be an iterable, not {}",
                                other.type_name()
                            )))
                        }
                    },
                    _ => values.push(eval(arg, env)?),
                }
            }
            call(&callee, values)
        }
        NodeKind::Keyword { .. }
        | NodeKind::Starred(_)
        | NodeKind::Slice { .. }
        | NodeKind::Lambda { .. }
        | NodeKind::GeneratorExp { .. } => Err(EvalError::type_error(
            "expression cannot be evaluated outside of a query",
        )),
    }
}

fn eval_all(nodes: &[Node], env: &Env<'_>) -> Result<Vec<Value>, EvalError> {
    nodes.iter().map(|n| eval(n, env)).collect()
}

fn callee_name(value: &Value) -> String {
    match value {
        Value::Function(b) => b.name().to_string(),
        other => other.type_name(),
    }
}

fn get_attr(value: &Value, attr: &str, env: &Env<'_>) -> EvalResult {
    let missing = || {
        EvalError::new(
            EvalErrorKind::AttributeError,
            format!("'{}' object has no attribute '{}'", value.type_name(), attr),
        )
    };
    let Value::Entity(instance) = value else {
        return Err(missing());
    };
    if let Some(v) = instance.attrs.get(attr) {
        return Ok(v.clone());
    }
    // Primary-key attributes are always known.
    let entity = env
        .schema
        .and_then(|s| s.resolve(&instance.entity))
        .ok_or_else(missing)?;
    let pk_attr = entity.attr(attr).filter(|a| a.is_pk).ok_or_else(missing)?;
    let offset = pk_attr.pk_offset.ok_or_else(missing)?;
    match pk_attr.columns.len() {
        1 => instance.pk.get(offset).cloned().ok_or_else(missing),
        n => Ok(Value::Tuple(
            instance.pk.iter().skip(offset).take(n).cloned().collect(),
        )),
    }
}

fn as_float(v: &Value) -> Option<f64> {
    match v {
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

fn is_int_like(v: &Value) -> bool {
    matches!(v, Value::Int(_) | Value::Bool(_))
}

fn unsupported(op: &str, l: &Value, r: &Value) -> EvalError {
    EvalError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op,
        l.type_name(),
        r.type_name()
    ))
}

fn overflow() -> EvalError {
    EvalError::type_error("integer overflow")
}

fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

fn py_mod(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    Some(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r })
}

fn binop(op: BinOpKind, l: &Value, r: &Value) -> EvalResult {
    let symbol = op.symbol();
    if let (Some(a), Some(b)) = (
        is_int_like(l).then(|| l.as_int()).flatten(),
        is_int_like(r).then(|| r.as_int()).flatten(),
    ) {
        return int_binop(op, a, b).unwrap_or_else(|| Err(unsupported(symbol, l, r)));
    }
    if let (Some(a), Some(b)) = (as_float(l), as_float(r)) {
        return float_binop(op, a, b).unwrap_or_else(|| Err(unsupported(symbol, l, r)));
    }
    match (op, l, r) {
        (BinOpKind::Add, Value::Text(a), Value::Text(b)) => Ok(Value::Text(format!("{}{}", a, b))),
        (BinOpKind::Add, Value::Tuple(a), Value::Tuple(b)) => {
            Ok(Value::Tuple(a.iter().chain(b).cloned().collect()))
        }
        (BinOpKind::Add, Value::List(a), Value::List(b)) => {
            Ok(Value::List(a.iter().chain(b).cloned().collect()))
        }
        (BinOpKind::Mult, Value::Text(s), n) | (BinOpKind::Mult, n, Value::Text(s))
            if is_int_like(n) =>
        {
            let times = n.as_int().unwrap_or(0).max(0) as usize;
            Ok(Value::Text(s.repeat(times)))
        }
        _ => Err(unsupported(symbol, l, r)),
    }
}

/// `None` when the operator does not apply to integers.
fn int_binop(op: BinOpKind, a: i64, b: i64) -> Option<EvalResult> {
    let checked = |v: Option<i64>| v.map(Value::Int).ok_or_else(overflow);
    Some(match op {
        BinOpKind::Add => checked(a.checked_add(b)),
        BinOpKind::Sub => checked(a.checked_sub(b)),
        BinOpKind::Mult => checked(a.checked_mul(b)),
        BinOpKind::Div => {
            if b == 0 {
                Err(EvalError::zero_division("division by zero"))
            } else {
                Ok(Value::Float(a as f64 / b as f64))
            }
        }
        BinOpKind::FloorDiv | BinOpKind::Mod if b == 0 => Err(EvalError::zero_division(
            "integer division or modulo by zero",
        )),
        BinOpKind::FloorDiv => checked(floor_div(a, b)),
        BinOpKind::Mod => checked(py_mod(a, b)),
        BinOpKind::Pow => {
            if b < 0 {
                Ok(Value::Float((a as f64).powf(b as f64)))
            } else {
                let exp = u32::try_from(b).map_err(|_| overflow());
                exp.and_then(|e| checked(a.checked_pow(e)))
            }
        }
        BinOpKind::LShift => u32::try_from(b)
            .ok()
            .and_then(|s| a.checked_shl(s))
            .map(Value::Int)
            .ok_or_else(|| EvalError::type_error("shift count out of range")),
        BinOpKind::RShift => u32::try_from(b)
            .ok()
            .map(|s| Value::Int(a >> s.min(63)))
            .ok_or_else(|| EvalError::type_error("negative shift count")),
        BinOpKind::BitOr => Ok(Value::Int(a | b)),
        BinOpKind::BitXor => Ok(Value::Int(a ^ b)),
        BinOpKind::BitAnd => Ok(Value::Int(a & b)),
    })
}

fn float_binop(op: BinOpKind, a: f64, b: f64) -> Option<EvalResult> {
    let zero = || Err(EvalError::zero_division("float division by zero"));
    Some(match op {
        BinOpKind::Add => Ok(Value::Float(a + b)),
        BinOpKind::Sub => Ok(Value::Float(a - b)),
        BinOpKind::Mult => Ok(Value::Float(a * b)),
        BinOpKind::Div if b == 0.0 => zero(),
        BinOpKind::Div => Ok(Value::Float(a / b)),
        BinOpKind::FloorDiv if b == 0.0 => zero(),
        BinOpKind::FloorDiv => Ok(Value::Float((a / b).floor())),
        BinOpKind::Mod if b == 0.0 => Err(EvalError::zero_division("float modulo")),
        BinOpKind::Mod => Ok(Value::Float(a - b * (a / b).floor())),
        BinOpKind::Pow => Ok(Value::Float(a.powf(b))),
        _ => return None,
    })
}

fn unary(op: UnaryOpKind, v: &Value) -> EvalResult {
    let bad = || {
        EvalError::type_error(format!(
            "bad operand type for unary operator: '{}'",
            v.type_name()
        ))
    };
    match (op, v) {
        (UnaryOpKind::Not, v) => Ok(Value::Bool(!v.truthy())),
        (UnaryOpKind::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOpKind::Neg, v) if is_int_like(v) => v
            .as_int()
            .and_then(i64::checked_neg)
            .map(Value::Int)
            .ok_or_else(overflow),
        (UnaryOpKind::Pos, Value::Float(f)) => Ok(Value::Float(*f)),
        (UnaryOpKind::Pos, v) if is_int_like(v) => v.as_int().map(Value::Int).ok_or_else(bad),
        (UnaryOpKind::Invert, v) if is_int_like(v) => {
            v.as_int().map(|i| Value::Int(!i)).ok_or_else(bad)
        }
        _ => Err(bad()),
    }
}

/// Equality across numeric flavours.
fn py_eq(l: &Value, r: &Value) -> bool {
    match (as_float(l), as_float(r)) {
        (Some(a), Some(b)) if !matches!((l, r), (Value::Int(_), Value::Int(_))) => a == b,
        _ => l == r,
    }
}

fn py_cmp(l: &Value, r: &Value) -> Result<Ordering, EvalError> {
    let unorderable = || {
        EvalError::type_error(format!(
            "'<' not supported between instances of '{}' and '{}'",
            l.type_name(),
            r.type_name()
        ))
    };
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
        (Value::Text(a), Value::Text(b)) => Ok(a.cmp(b)),
        (Value::Date(a), Value::Date(b)) => Ok(a.cmp(b)),
        (Value::DateTime(a), Value::DateTime(b)) => Ok(a.cmp(b)),
        (Value::Bytes(a), Value::Bytes(b)) => Ok(a.cmp(b)),
        (Value::Tuple(a), Value::Tuple(b)) | (Value::List(a), Value::List(b)) => {
            for (x, y) in a.iter().zip(b) {
                if !py_eq(x, y) {
                    return py_cmp(x, y);
                }
            }
            Ok(a.len().cmp(&b.len()))
        }
        _ => match (as_float(l), as_float(r)) {
            (Some(a), Some(b)) => a.partial_cmp(&b).ok_or_else(unorderable),
            _ => Err(unorderable()),
        },
    }
}

fn contains(container: &Value, item: &Value) -> Result<bool, EvalError> {
    match container {
        Value::Tuple(items) | Value::List(items) => Ok(items.iter().any(|x| py_eq(x, item))),
        Value::Map(pairs) => Ok(pairs.iter().any(|(k, _)| py_eq(k, item))),
        Value::Text(s) => match item {
            Value::Text(sub) => Ok(s.contains(sub.as_str())),
            other => Err(EvalError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        other => Err(EvalError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn compare(op: CmpOp, l: &Value, r: &Value) -> Result<bool, EvalError> {
    Ok(match op {
        CmpOp::Eq => py_eq(l, r),
        CmpOp::Ne => !py_eq(l, r),
        CmpOp::Lt => py_cmp(l, r)? == Ordering::Less,
        CmpOp::Le => py_cmp(l, r)? != Ordering::Greater,
        CmpOp::Gt => py_cmp(l, r)? == Ordering::Greater,
        CmpOp::Ge => py_cmp(l, r)? != Ordering::Less,
        CmpOp::In => contains(r, l)?,
        CmpOp::NotIn => !contains(r, l)?,
        CmpOp::Is => l == r && matches!(l, Value::None | Value::Bool(_)),
        CmpOp::IsNot => !(l == r && matches!(l, Value::None | Value::Bool(_))),
    })
}

fn normalize_index(i: i64, len: usize, what: &str) -> Result<usize, EvalError> {
    let len = len as i64;
    let idx = if i < 0 { i + len } else { i };
    if idx < 0 || idx >= len {
        return Err(EvalError::index_error(format!("{} index out of range", what)));
    }
    Ok(idx as usize)
}

fn subscript(container: &Value, key: &Value) -> EvalResult {
    match container {
        Value::Map(pairs) => pairs
            .iter()
            .find(|(k, _)| py_eq(k, key))
            .map(|(_, v)| v.clone())
            .ok_or_else(|| EvalError::index_error(format!("key {} not found", key))),
        Value::Tuple(items) | Value::List(items) => {
            let what = if matches!(container, Value::Tuple(_)) { "tuple" } else { "list" };
            let i = int_index(key, what)?;
            Ok(items[normalize_index(i, items.len(), what)?].clone())
        }
        Value::Text(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = int_index(key, "string")?;
            Ok(Value::Text(
                chars[normalize_index(i, chars.len(), "string")?].to_string(),
            ))
        }
        other => Err(EvalError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn int_index(key: &Value, what: &str) -> Result<i64, EvalError> {
    if !is_int_like(key) {
        return Err(EvalError::type_error(format!(
            "{} indices must be integers, not {}",
            what,
            key.type_name()
        )));
    }
    key.as_int()
        .ok_or_else(|| EvalError::type_error("index must be an integer"))
}

/// Indices selected by a Python slice over a sequence of `len` items.
fn slice_indices(len: usize, lower: Option<i64>, upper: Option<i64>, step: Option<i64>) -> Result<Vec<usize>, EvalError> {
    let len = len as i64;
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(EvalError::new(
            EvalErrorKind::TypeError,
            "slice step cannot be zero",
        ));
    }
    let clamp = |v: i64, lo: i64, hi: i64| v.max(lo).min(hi);
    let resolve = |v: i64, lo: i64, hi: i64| clamp(if v < 0 { v + len } else { v }, lo, hi);
    let mut out = Vec::new();
    if step > 0 {
        let start = lower.map_or(0, |v| resolve(v, 0, len));
        let stop = upper.map_or(len, |v| resolve(v, 0, len));
        let mut i = start;
        while i < stop {
            out.push(i as usize);
            i += step;
        }
    } else {
        let start = lower.map_or(len - 1, |v| resolve(v, -1, len - 1));
        let stop = upper.map_or(-1, |v| resolve(v, -1, len - 1));
        let mut i = start;
        while i > stop {
            out.push(i as usize);
            i += step;
        }
    }
    Ok(out)
}

fn slice(container: &Value, lower: Option<i64>, upper: Option<i64>, step: Option<i64>) -> EvalResult {
    match container {
        Value::Tuple(items) | Value::List(items) => {
            let picked: Vec<Value> = slice_indices(items.len(), lower, upper, step)?
                .into_iter()
                .map(|i| items[i].clone())
                .collect();
            Ok(if matches!(container, Value::Tuple(_)) {
                Value::Tuple(picked)
            } else {
                Value::List(picked)
            })
        }
        Value::Text(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::Text(
                slice_indices(chars.len(), lower, upper, step)?
                    .into_iter()
                    .map(|i| chars[i])
                    .collect(),
            ))
        }
        other => Err(EvalError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// Plain-text form used by `concat`.
fn py_str(v: &Value) -> String {
    match v {
        Value::Text(s) => s.clone(),
        Value::Decimal(d) => d.clone(),
        other => other.to_string(),
    }
}

fn iterable(v: &Value, func: &str) -> Result<Vec<Value>, EvalError> {
    match v {
        Value::Tuple(items) | Value::List(items) => Ok(items.clone()),
        Value::Text(s) => Ok(s.chars().map(|c| Value::Text(c.to_string())).collect()),
        other => Err(EvalError::type_error(format!(
            "'{}' object is not iterable in {}()",
            other.type_name(),
            func
        ))),
    }
}

fn call(callee: &Value, args: Vec<Value>) -> EvalResult {
    let Value::Function(builtin) = callee else {
        return Err(EvalError::type_error(format!(
            "'{}' object is not callable",
            callee.type_name()
        )));
    };
    let name = builtin.name();
    let arity = |expected: &str| {
        EvalError::type_error(format!(
            "{}() takes {} ({} given)",
            name,
            expected,
            args.len()
        ))
    };
    match builtin {
        Builtin::Len => {
            let [v] = args.as_slice() else {
                return Err(arity("exactly one argument"));
            };
            let n = match v {
                Value::Tuple(items) | Value::List(items) => items.len(),
                Value::Map(pairs) => pairs.len(),
                Value::Text(s) => s.chars().count(),
                Value::Bytes(b) => b.len(),
                other => {
                    return Err(EvalError::type_error(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )))
                }
            };
            Ok(Value::Int(n as i64))
        }
        Builtin::Abs => {
            let [v] = args.as_slice() else {
                return Err(arity("exactly one argument"));
            };
            match v {
                Value::Float(f) => Ok(Value::Float(f.abs())),
                v if is_int_like(v) => v
                    .as_int()
                    .and_then(i64::checked_abs)
                    .map(Value::Int)
                    .ok_or_else(overflow),
                other => Err(EvalError::type_error(format!(
                    "bad operand type for abs(): '{}'",
                    other.type_name()
                ))),
            }
        }
        Builtin::Min | Builtin::Max => {
            let items = match args.as_slice() {
                [] => return Err(arity("at least one argument")),
                [single] => iterable(single, name)?,
                _ => args.clone(),
            };
            let mut iter = items.into_iter();
            let mut best = iter.next().ok_or_else(|| {
                EvalError::new(
                    EvalErrorKind::TypeError,
                    format!("{}() arg is an empty sequence", name),
                )
            })?;
            for item in iter {
                let ord = py_cmp(&item, &best)?;
                let better = if *builtin == Builtin::Min {
                    ord == Ordering::Less
                } else {
                    ord == Ordering::Greater
                };
                if better {
                    best = item;
                }
            }
            Ok(best)
        }
        Builtin::Sum => {
            let (items, start) = match args.as_slice() {
                [items] => (iterable(items, name)?, Value::Int(0)),
                [items, start] => (iterable(items, name)?, start.clone()),
                _ => return Err(arity("one or two arguments")),
            };
            items
                .iter()
                .try_fold(start, |acc, item| binop(BinOpKind::Add, &acc, item))
        }
        Builtin::Between => {
            let [x, low, high] = args.as_slice() else {
                return Err(arity("exactly three arguments"));
            };
            Ok(Value::Bool(
                py_cmp(low, x)? != Ordering::Greater && py_cmp(x, high)? != Ordering::Greater,
            ))
        }
        Builtin::Coalesce => Ok(args
            .iter()
            .find(|v| !v.is_none())
            .cloned()
            .unwrap_or(Value::None)),
        Builtin::Concat => Ok(Value::Text(args.iter().map(py_str).collect())),
        _ => Err(EvalError::type_error(format!(
            "{}() can only be used inside a query",
            name
        ))),
    }
}
