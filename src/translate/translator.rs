//! Walking query trees into frames.
//!
//! A [`Frame`] is the translation state of one generator expression: its
//! subquery, the conditions routed to HAVING, the result expressions and the
//! flags that decide DISTINCT and GROUP BY. Nested generators get their own
//! frame whose subquery points at the enclosing one.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::iter;
use std::mem;
use std::sync::Arc;

use crate::error::{TranslateError, TranslateResult};
use crate::extract::getter::literal_value;
use crate::extract::Extraction;
use crate::schema::Schema;
use crate::sql::{Dialect, ParamKey, SqlExpr, VarKey};
use crate::syntax::render::python_repr;
use crate::syntax::{
    walk, BoolOpKind, CmpOp, Node, NodeId, NodeKind, QueryTree, UnaryOpKind, Visitor, Walk,
};
use crate::types::{Builtin, CanonicalType, Value};

use super::layout::{OutputColumn, OutputKind};
use super::monad::{ordering_only, Monad, MonadKind};
use super::tableref::{entity_of, Arena, AttrRef, SubqueryId, TableRefId};

/// The tree being walked and the externals extracted from it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Scope<'a> {
    pub tree: &'a QueryTree,
    pub extraction: &'a Extraction,
    pub types: &'a HashMap<String, CanonicalType>,
    pub filter: usize,
}

/// Translation state of one generator expression.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub subquery: SubqueryId,
    pub nested: bool,
    pub left_join: bool,
    pub qual_names: Vec<String>,
    pub having: Vec<SqlExpr>,
    pub order: Vec<SqlExpr>,
    pub distinct: bool,
    pub aggregated: bool,
    pub hint_join: bool,
    /// Path of the collection whose aggregate subquery is joined instead.
    pub optimize: Option<String>,
    pub from_optimized: bool,
    pub aggregated_subquery_paths: BTreeSet<String>,
    pub lambda_names: Option<Vec<String>>,
    pub original_names: bool,
    pub result: Option<Monad>,
    pub expr_monads: Vec<Monad>,
    pub groupby_monads: Vec<Monad>,
    pub expr_type: CanonicalType,
    pub expr_columns: Vec<SqlExpr>,
    pub alias: Option<String>,
    pub tableref: Option<TableRefId>,
    /// 1-based select-list positions of each result expression.
    pub orderby_columns: Vec<Vec<usize>>,
    pub outputs: Vec<OutputColumn>,
}

impl Frame {
    pub fn new(subquery: SubqueryId, nested: bool, left_join: bool, optimize: Option<String>) -> Self {
        Self {
            subquery,
            nested,
            left_join,
            qual_names: Vec::new(),
            having: Vec::new(),
            order: Vec::new(),
            distinct: false,
            aggregated: optimize.is_some(),
            hint_join: false,
            optimize,
            from_optimized: false,
            aggregated_subquery_paths: BTreeSet::new(),
            lambda_names: None,
            original_names: false,
            result: None,
            expr_monads: Vec::new(),
            groupby_monads: Vec::new(),
            expr_type: CanonicalType::Null,
            expr_columns: Vec::new(),
            alias: None,
            tableref: None,
            orderby_columns: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn is_entity_result(&self) -> bool {
        self.expr_type.is_entity()
    }
}

/// Everything a finished translation hands back to its plan.
pub(crate) struct Translated {
    pub arena: Arc<Arena>,
    pub frame: Frame,
    pub cacheable: bool,
    pub slice_bounds: Vec<VarKey>,
}

pub(crate) struct Translator<'a> {
    pub schema: &'a Schema,
    pub dialect: Dialect,
    pub arena: Arc<Arena>,
    pub frame: Frame,
    outer: Vec<Frame>,
    pub cacheable: bool,
    /// Parameters used as string slice bounds; their values must not be
    /// negative.
    pub slice_bounds: Vec<VarKey>,
    scope: Option<Scope<'a>>,
    monads: HashMap<NodeId, Monad>,
    join_hints: Vec<bool>,
}

impl<'a> Translator<'a> {
    /// A translator over a fresh top-level subquery.
    pub fn start(
        schema: &'a Schema,
        dialect: Dialect,
        alias_limit: usize,
        left_join: bool,
        optimize: Option<String>,
    ) -> Self {
        let mut arena = Arena::new(alias_limit);
        let subquery = arena.new_subquery(None, left_join);
        let frame = Frame::new(subquery, false, left_join, optimize);
        Self::resume(schema, dialect, Arc::new(arena), frame)
    }

    /// Continue from an existing plan state. The arena is copied on the
    /// first mutation.
    pub fn resume(schema: &'a Schema, dialect: Dialect, arena: Arc<Arena>, frame: Frame) -> Self {
        Self {
            schema,
            dialect,
            arena,
            frame,
            outer: Vec::new(),
            cacheable: true,
            slice_bounds: Vec::new(),
            scope: None,
            monads: HashMap::new(),
            join_hints: Vec::new(),
        }
    }

    pub fn set_scope(&mut self, scope: Scope<'a>) {
        self.scope = Some(scope);
        self.monads.clear();
        self.join_hints.clear();
    }

    pub fn into_parts(self) -> Translated {
        Translated {
            arena: self.arena,
            frame: self.frame,
            cacheable: self.cacheable,
            slice_bounds: self.slice_bounds,
        }
    }

    pub fn arena_mut(&mut self) -> &mut Arena {
        Arc::make_mut(&mut self.arena)
    }

    pub fn subquery_id(&self) -> SubqueryId {
        self.frame.subquery
    }

    fn scope(&self) -> TranslateResult<Scope<'a>> {
        self.scope
            .ok_or_else(|| TranslateError::translation("No query source is being translated"))
    }

    pub fn node_src(&self, id: NodeId) -> String {
        self.scope
            .map(|s| s.tree.src(id).to_string())
            .unwrap_or_default()
    }

    fn external_src(&self, id: NodeId) -> Option<String> {
        self.scope
            .and_then(|s| s.extraction.src_of(id))
            .map(str::to_string)
    }

    fn var_type(&self, src: &str) -> TranslateResult<CanonicalType> {
        let scope = self.scope()?;
        scope.types.get(src).cloned().ok_or_else(|| {
            TranslateError::translation(format!("No value was supplied for `{}`", src))
        })
    }

    pub fn monad_of(&self, node: &Node) -> TranslateResult<Monad> {
        self.monads.get(&node.id).cloned().ok_or_else(|| {
            TranslateError::translation(format!(
                "Expression `{}` was not translated",
                self.node_src(node.id)
            ))
        })
    }

    pub fn entity_type(&self, name: &str) -> TranslateResult<CanonicalType> {
        self.schema
            .entity_ref(name)
            .map(CanonicalType::Entity)
            .ok_or_else(|| TranslateError::translation(format!("Unknown entity {}", name)))
    }

    /// Walk `node` and return its monad.
    pub fn translate(&mut self, node: &Node) -> TranslateResult<Monad> {
        walk(self, node)?;
        self.monad_of(node)
    }

    /// Store a node's monad, deriving its aggregation flags from the
    /// children.
    fn assign(&mut self, node: &Node, mut monad: Monad) -> TranslateResult<()> {
        let children = node.children();
        let child_flag = |flag: fn(&Monad) -> bool| {
            children
                .iter()
                .any(|c| self.monads.get(&c.id).is_some_and(flag))
        };
        if monad.aggregated.is_none() {
            monad.aggregated = Some(child_flag(Monad::is_aggregated));
        }
        if monad.nogroup.is_none() {
            monad.nogroup = Some(child_flag(Monad::is_nogroup));
        }
        if monad.is_aggregated() {
            self.frame.aggregated = true;
            if monad.is_nogroup() && !matches!(monad.kind, MonadKind::List(_) | MonadKind::And(_)) {
                return Err(TranslateError::translation(format!(
                    "Too complex aggregation, expressions cannot be combined: {}",
                    self.node_src(node.id)
                )));
            }
        }
        monad.src = self.node_src(node.id);
        self.monads.insert(node.id, monad);
        Ok(())
    }

    fn pre_node(&mut self, node: &Node) -> TranslateResult<Walk> {
        if let Some(src) = self.external_src(node.id) {
            let monad = self.dispatch_external(&src)?;
            self.assign(node, monad)?;
            return Ok(Walk::Stop);
        }
        match &node.kind {
            NodeKind::GeneratorExp { .. } => {
                let frame = self.translate_nested(node)?;
                let ty = CanonicalType::set_of(frame.expr_type.clone());
                let monad = Monad::new(MonadKind::QuerySet(Box::new(frame)), ty)
                    .with_aggregated(false)
                    .with_nogroup(true);
                self.assign(node, monad)?;
                Ok(Walk::Stop)
            }
            NodeKind::Compare {
                left,
                ops,
                comparators,
            } => {
                let monad = self.translate_compare(left, ops, comparators)?;
                self.assign(node, monad)?;
                Ok(Walk::Stop)
            }
            NodeKind::Call { func, args } => {
                for arg in args {
                    if let NodeKind::Starred(inner) = &arg.kind {
                        return Err(TranslateError::not_implemented(format!(
                            "*{} is not supported",
                            self.node_src(inner.id)
                        )));
                    }
                }
                if !matches!(func.kind, NodeKind::Name { .. } | NodeKind::Attribute { .. }) {
                    return Err(TranslateError::not_implemented(self.node_src(node.id)));
                }
                if self.external_builtin(func) == Some(Builtin::Join) {
                    self.join_hints.push(self.frame.hint_join);
                    self.frame.hint_join = true;
                }
                Ok(Walk::Continue)
            }
            NodeKind::Lambda { .. } => Err(TranslateError::not_implemented(format!(
                "Lambda is not supported inside query: {}",
                self.node_src(node.id)
            ))),
            _ => Ok(Walk::Continue),
        }
    }

    fn post_node(&mut self, node: &Node) -> TranslateResult<Option<Monad>> {
        let monad = match &node.kind {
            NodeKind::Name { id, .. } => self.resolve_name(id)?,
            NodeKind::Const(lit) => Monad::constant(literal_value(lit)),
            NodeKind::Attribute { value, attr } => {
                let parent = self.monad_of(value)?;
                self.getattr(parent, attr)?
            }
            NodeKind::Call { func, args } => self.translate_call(func, args)?,
            NodeKind::Keyword { .. } | NodeKind::Slice { .. } => return Ok(None),
            NodeKind::Compare { .. } | NodeKind::GeneratorExp { .. } => return Ok(None),
            NodeKind::Starred(_) => {
                return Err(TranslateError::not_implemented(format!(
                    "{} is not supported",
                    self.node_src(node.id)
                )))
            }
            NodeKind::BoolOp { op, values } => {
                let operands = values
                    .iter()
                    .map(|v| self.monad_of(v))
                    .collect::<TranslateResult<Vec<_>>>()?;
                match op {
                    BoolOpKind::And => self.and(operands)?,
                    BoolOpKind::Or => self.or(operands)?,
                }
            }
            NodeKind::BinOp { left, op, right } => {
                let left = self.monad_of(left)?;
                let right = self.monad_of(right)?;
                self.binop(left, *op, right)?
            }
            NodeKind::UnaryOp { op, operand } => {
                let operand = self.monad_of(operand)?;
                match op {
                    UnaryOpKind::Not => self.negate(operand)?,
                    UnaryOpKind::Neg => self.neg(operand)?,
                    UnaryOpKind::Pos => self.pos(operand)?,
                    UnaryOpKind::Invert => {
                        return Err(TranslateError::not_implemented(format!(
                            "Operator ~ is not supported: {}",
                            self.node_src(node.id)
                        )))
                    }
                }
            }
            NodeKind::IfExp { test, body, orelse } => {
                let test = self.monad_of(test)?;
                let body = self.monad_of(body)?;
                let orelse = self.monad_of(orelse)?;
                self.if_exp(test, body, orelse)?
            }
            NodeKind::Tuple(items) | NodeKind::List(items) => {
                let items = items
                    .iter()
                    .map(|i| self.monad_of(i))
                    .collect::<TranslateResult<Vec<_>>>()?;
                self.list(items)
            }
            NodeKind::Dict(_) => {
                return Err(TranslateError::not_implemented(format!(
                    "Dictionaries are not supported: {}",
                    self.node_src(node.id)
                )))
            }
            NodeKind::Subscript { value, index } => {
                let value = self.monad_of(value)?;
                match &index.kind {
                    NodeKind::Slice { lower, upper, step } => {
                        let bound = |n: &Option<Box<Node>>| -> TranslateResult<Option<Monad>> {
                            n.as_ref().map(|n| self.monad_of(n)).transpose()
                        };
                        let (lower, upper, step) = (bound(lower)?, bound(upper)?, bound(step)?);
                        self.slice(value, lower, upper, step)?
                    }
                    _ => {
                        let index = self.monad_of(index)?;
                        self.getitem(value, index)?
                    }
                }
            }
            NodeKind::Lambda { .. } => {
                return Err(TranslateError::not_implemented(self.node_src(node.id)))
            }
        };
        Ok(Some(monad))
    }

    fn external_builtin(&self, node: &Node) -> Option<Builtin> {
        let src = self.external_src(node.id)?;
        match self.var_type(&src).ok()? {
            CanonicalType::Function(b) => Some(b),
            _ => None,
        }
    }

    fn translate_call(&mut self, func: &Node, args: &[Node]) -> TranslateResult<Monad> {
        let func_monad = self.monad_of(func)?;
        let mut positional = Vec::new();
        let mut keywords = Vec::new();
        for arg in args {
            match &arg.kind {
                NodeKind::Keyword { arg: name, value } => {
                    keywords.push((name.clone(), self.monad_of(value)?))
                }
                _ => positional.push(self.monad_of(arg)?),
            }
        }
        if matches!(func_monad.kind, MonadKind::Func(Builtin::Join)) {
            if let Some(previous) = self.join_hints.pop() {
                self.frame.hint_join = previous;
            }
        }
        self.call(func_monad, positional, keywords)
    }

    /// Monad of an external expression, by its canonical type.
    fn dispatch_external(&mut self, src: &str) -> TranslateResult<Monad> {
        let scope = self.scope()?;
        let ty = self.var_type(src)?;
        let key = ParamKey::new(VarKey::new(scope.filter, src));
        let literal = scope.extraction.get(src).and_then(|g| g.literal());
        let monad = match &ty {
            CanonicalType::Null => Monad::constant(Value::None),
            CanonicalType::SetOf(item) => match item.as_ref() {
                CanonicalType::Entity(entity) => {
                    Monad::new(MonadKind::EntitySet(entity.clone()), ty.clone())
                }
                other => {
                    return Err(TranslateError::type_error(format!(
                        "Expression `{}` has unsupported type 'Set of {}'",
                        src, other
                    )))
                }
            },
            CanonicalType::Function(builtin) => {
                if *builtin == Builtin::Random {
                    self.cacheable = false;
                }
                Monad::new(MonadKind::Func(*builtin), ty.clone())
            }
            CanonicalType::Tuple(items) => {
                if items.iter().any(|t| *t == CanonicalType::Null) {
                    return Err(TranslateError::type_error(format!(
                        "Expression `{}` should not contain None values",
                        src
                    )));
                }
                let params = items
                    .iter()
                    .enumerate()
                    .map(|(i, t)| {
                        Monad::new(
                            MonadKind::Param {
                                key: key.clone().item(i),
                                literal: None,
                            },
                            t.clone(),
                        )
                        .with_aggregated(false)
                        .with_nogroup(false)
                    })
                    .collect();
                Monad::new(MonadKind::List(params), ty.clone())
            }
            CanonicalType::Method => {
                return Err(TranslateError::type_error(format!(
                    "Expression `{}` has unsupported type 'method'",
                    src
                )))
            }
            _ => Monad::new(MonadKind::Param { key, literal }, ty.clone()),
        };
        Ok(monad.with_aggregated(false).with_nogroup(false))
    }

    fn resolve_name(&mut self, name: &str) -> TranslateResult<Monad> {
        for frame in iter::once(&self.frame).chain(self.outer.iter().rev()) {
            let Some(names) = &frame.lambda_names else {
                continue;
            };
            if frame.original_names {
                continue;
            }
            if let Some(i) = names.iter().position(|n| n == name) {
                return frame.expr_monads.get(i).cloned().ok_or_else(|| {
                    TranslateError::translation(format!("Name {} is not bound", python_repr(name)))
                });
            }
        }
        let subquery = self.frame.subquery;
        let tableref = self
            .arena_mut()
            .get_tableref(subquery, name)
            .ok_or_else(|| {
                TranslateError::translation(format!(
                    "Name {} must be defined in query",
                    python_repr(name)
                ))
            })?;
        let entity = self.arena.tableref(tableref).entity.clone();
        Ok(Monad::new(
            MonadKind::ObjectIter { tableref },
            self.entity_type(&entity)?,
        ))
    }

    fn translate_compare(
        &mut self,
        left: &Node,
        ops: &[CmpOp],
        comparators: &[Node],
    ) -> TranslateResult<Monad> {
        let mut left_monad = self.translate(left)?;
        let mut monads = Vec::with_capacity(ops.len());
        for (op, right) in ops.iter().zip(comparators) {
            let right_monad = self.translate(right)?;
            let mut monad = match op {
                CmpOp::In => self.contains(right_monad.clone(), left_monad.clone(), false)?,
                CmpOp::NotIn => self.contains(right_monad.clone(), left_monad.clone(), true)?,
                _ => self.cmp(*op, left_monad.clone(), right_monad.clone())?,
            };
            if monad.aggregated.is_none() {
                monad.aggregated = Some(left_monad.is_aggregated() || right_monad.is_aggregated());
            }
            if monad.nogroup.is_none() {
                monad.nogroup = Some(left_monad.is_nogroup() || right_monad.is_nogroup());
            }
            if monad.is_aggregated() && monad.is_nogroup() {
                return Err(TranslateError::translation(
                    "Too complex aggregation, expressions cannot be combined: {EXPR}",
                ));
            }
            monads.push(monad);
            left_monad = right_monad;
        }
        if monads.len() == 1 {
            return monads
                .pop()
                .ok_or_else(|| TranslateError::translation("Empty comparison"));
        }
        self.and(monads)
    }

    fn translate_nested(&mut self, node: &Node) -> TranslateResult<Frame> {
        let parent = self.frame.subquery;
        let subquery = self.arena_mut().new_subquery(Some(parent), false);
        let frame = Frame::new(subquery, true, false, None);
        let outer = mem::replace(&mut self.frame, frame);
        self.outer.push(outer);
        let result = self.translate_generator(node);
        let restored = self
            .outer
            .pop()
            .ok_or_else(|| TranslateError::translation("Unbalanced query frames"))?;
        let inner = mem::replace(&mut self.frame, restored);
        result?;
        Ok(inner)
    }

    /// Translate a generator expression into the current frame.
    pub fn translate_generator(&mut self, node: &Node) -> TranslateResult<()> {
        let NodeKind::GeneratorExp { elt, generators } = &node.kind else {
            return Err(TranslateError::translation(format!(
                "Generator expression expected, got: {}",
                self.node_src(node.id)
            )));
        };
        let qual_names: Vec<String> = generators
            .iter()
            .map(|g| g.target.name().unwrap_or_default().to_string())
            .collect();
        for (i, generator) in generators.iter().enumerate() {
            let name = match &generator.target.kind {
                NodeKind::Name { id, .. } => id.clone(),
                _ => {
                    return Err(TranslateError::not_implemented(
                        self.node_src(generator.target.id),
                    ))
                }
            };
            if self
                .arena
                .subquery(self.frame.subquery)
                .tablerefs
                .contains_key(&name)
            {
                return Err(TranslateError::translation(format!(
                    "Duplicate name: {}",
                    python_repr(&name)
                )));
            }
            if name.starts_with("__") {
                return Err(TranslateError::IllegalName(format!(
                    "Illegal name: {}",
                    python_repr(&name)
                )));
            }
            self.bind_iteration(i, &name, &generator.iter, &qual_names)?;
            self.frame.qual_names.push(name);
            for cond in &generator.ifs {
                self.add_condition(cond)?;
            }
        }
        self.translate_result(elt)
    }

    fn bind_iteration(
        &mut self,
        i: usize,
        name: &str,
        iter: &Node,
        qual_names: &[String],
    ) -> TranslateResult<()> {
        let schema = self.schema;
        let subquery = self.frame.subquery;
        let describe = format!("for {} in {}", name, self.node_src(iter.id));

        if let Some(src) = self.external_src(iter.id) {
            let entity = match self.var_type(&src)? {
                CanonicalType::SetOf(item) => match *item {
                    CanonicalType::Entity(entity) => entity,
                    _ => return Err(TranslateError::translation(describe)),
                },
                _ => {
                    return Err(TranslateError::translation(format!(
                        "Inside declarative query, iterator must be entity. Got: {}",
                        describe
                    )))
                }
            };
            if entity.schema != schema.id() {
                return Err(TranslateError::translation(
                    "All entities in a query must belong to the same database",
                ));
            }
            if i > 0 {
                if self.frame.left_join {
                    return Err(TranslateError::translation(format!(
                        "Collection expected inside left join query. Got: {}",
                        describe
                    )));
                }
                self.frame.distinct = true;
            }
            let arena = self.arena_mut();
            let tableref = arena.add_root(subquery, name, &entity.name);
            arena.make_join(schema, tableref, false)?;
            return Ok(());
        }

        let mut attr_names = Vec::new();
        let mut node = iter;
        while let NodeKind::Attribute { value, attr } = &node.kind {
            attr_names.push(attr.clone());
            node = value;
        }
        let root_name = match node.name() {
            Some(n) if !attr_names.is_empty() => n.to_string(),
            _ => return Err(TranslateError::translation(describe)),
        };
        attr_names.reverse();

        let mut parent = self
            .arena_mut()
            .get_tableref(subquery, &root_name)
            .ok_or_else(|| {
                TranslateError::translation(format!(
                    "Name {} must be defined in query",
                    python_repr(&root_name)
                ))
            })?;
        let mut parent_entity = self.arena.tableref(parent).entity.clone();
        let previous_name = qual_names
            .get((i + qual_names.len() - 1) % qual_names.len().max(1))
            .cloned()
            .unwrap_or_default();
        let mut name_path = root_name;
        let last = attr_names.len() - 1;
        for (j, attr_name) in attr_names.iter().enumerate() {
            let entity = entity_of(schema, &parent_entity)?;
            let attr = entity
                .attr(attr_name)
                .ok_or_else(|| TranslateError::attribute(attr_name.clone()))?;
            let Some(target) = attr.target().map(str::to_string) else {
                return Err(TranslateError::not_implemented(describe));
            };
            let mut can_affect_distinct = None;
            if attr.is_collection() {
                let reverse_is_collection = schema
                    .reverse_of(attr)
                    .is_some_and(|reverse| reverse.is_collection());
                if reverse_is_collection {
                    self.frame.distinct = true;
                } else if self.arena.tableref(parent).alias.as_deref() != Some(previous_name.as_str()) {
                    self.frame.distinct = true;
                } else {
                    can_affect_distinct = Some(true);
                }
            }
            name_path = if j == last {
                name.to_string()
            } else {
                format!("{}-{}", name_path, attr.name)
            };
            let attr_ref = AttrRef::new(parent_entity.clone(), attr.name.clone());
            let arena = self.arena_mut();
            let tableref = arena.add_joined(subquery, &name_path, parent, attr_ref, &target);
            if let Some(flag) = can_affect_distinct {
                arena.tableref_mut(tableref).can_affect_distinct = flag;
            }
            parent = tableref;
            parent_entity = target;
        }
        Ok(())
    }

    /// Translate one `if` clause into WHERE or HAVING conditions.
    pub fn add_condition(&mut self, cond: &Node) -> TranslateResult<()> {
        let src = self.node_src(cond.id);
        let mut monad = self.translate(cond)?;
        if !monad.ty.is_bool() {
            monad = self.nonzero(monad).map_err(|e| e.with_expr(&src))?;
        }
        self.route_condition(monad).map_err(|e| e.with_expr(&src))
    }

    pub fn route_condition(&mut self, monad: Monad) -> TranslateResult<()> {
        let operands = match monad.kind {
            MonadKind::And(items) => items,
            _ => vec![monad],
        };
        for m in operands {
            ordering_only(&m)?;
            let sql = self.getsql(&m)?;
            if m.is_aggregated() {
                self.frame.having.extend(sql);
            } else {
                let subquery = self.frame.subquery;
                self.arena_mut().subquery_mut(subquery).conditions.extend(sql);
            }
        }
        Ok(())
    }

    fn translate_result(&mut self, elt: &Node) -> TranslateResult<()> {
        let schema = self.schema;
        let monad = self.translate(elt)?;
        if monad.is_param() {
            return Err(TranslateError::translation(format!(
                "External parameter '{}' cannot be used as query result",
                monad.src
            )));
        }
        let expr_monads = match &monad.kind {
            MonadKind::List(items) => items.clone(),
            _ => vec![monad.clone()],
        };
        for m in &expr_monads {
            ordering_only(m)?;
        }

        if let CanonicalType::Entity(entity) = monad.ty.item_type().clone() {
            let pk_len = entity_of(schema, &entity.name)?.pk_columns().len();
            if monad.is_aggregated() {
                return Err(TranslateError::translation(format!(
                    "Aggregated entity cannot be used as query result: {}",
                    monad.src
                )));
            }
            if self.frame.aggregated {
                self.frame.groupby_monads = vec![monad.clone()];
            } else {
                let requires = self.requires_distinct(&monad, false)?;
                self.frame.distinct |= requires;
            }
            let tableref = match &monad.kind {
                MonadKind::ObjectIter { tableref } => *tableref,
                MonadKind::Attr {
                    tableref: Some(tableref),
                    ..
                } => *tableref,
                MonadKind::AttrSet { .. } => {
                    let subquery = self.frame.subquery;
                    self.make_tableref(&monad, subquery)?
                }
                _ => {
                    return Err(TranslateError::not_implemented(format!(
                        "Expression {} cannot be used as query result",
                        monad.src
                    )))
                }
            };
            let pk_only = self.frame.nested || self.frame.aggregated;
            let (alias, pk_columns) = self.arena_mut().make_join(schema, tableref, pk_only)?;
            self.frame.orderby_columns = vec![(1..=pk_len).collect()];
            self.frame.tableref = Some(tableref);
            self.frame.expr_columns = pk_columns
                .iter()
                .map(|c| SqlExpr::column(alias.clone(), c.clone()))
                .collect();
            self.frame.alias = Some(alias);
            self.frame.expr_type = CanonicalType::Entity(entity);
        } else {
            self.frame.expr_type = if expr_monads.len() > 1 {
                CanonicalType::Tuple(expr_monads.iter().map(|m| m.ty.clone()).collect())
            } else {
                monad.ty.clone()
            };
            let mut expr_columns = Vec::new();
            for m in &expr_monads {
                expr_columns.extend(self.getsql(m)?);
            }
            self.frame.expr_columns = expr_columns;
            if self.frame.aggregated {
                self.frame.groupby_monads = expr_monads
                    .iter()
                    .filter(|m| !m.is_aggregated() && !m.is_nogroup())
                    .cloned()
                    .collect();
            } else if self.projection_needs_distinct(&expr_monads)? {
                self.frame.distinct = true;
            }
            let mut offset = 0;
            let mut outputs = Vec::with_capacity(expr_monads.len());
            let mut orderby_columns = Vec::with_capacity(expr_monads.len());
            for m in &expr_monads {
                let ty = m.ty.item_type().clone();
                let (kind, width) = match &ty {
                    CanonicalType::Entity(e) => (
                        OutputKind::Entity(e.name.clone()),
                        entity_of(schema, &e.name)?.pk_columns().len(),
                    ),
                    _ => (OutputKind::Value(ty.clone()), 1),
                };
                outputs.push(OutputColumn {
                    name: m.src.clone(),
                    kind,
                    offsets: offset..offset + width,
                });
                orderby_columns.push((offset + 1..=offset + width).collect());
                offset += width;
            }
            self.frame.outputs = outputs;
            self.frame.orderby_columns = orderby_columns;
        }
        self.frame.result = Some(monad);
        self.frame.expr_monads = expr_monads;
        Ok(())
    }

    /// Whether a projection can repeat rows: some table that multiplies
    /// rows is not pinned by its full primary key in the output.
    fn projection_needs_distinct(&self, expr_monads: &[Monad]) -> TranslateResult<bool> {
        let mut paths = HashSet::new();
        let mut attrs = HashSet::new();
        for m in expr_monads {
            match &m.kind {
                MonadKind::ObjectIter { tableref } => {
                    paths.insert(self.arena.tableref(*tableref).name_path.clone());
                }
                MonadKind::Attr { parent, attr, .. } => {
                    if let MonadKind::ObjectIter { tableref } = &parent.kind {
                        let path = self.arena.tableref(*tableref).name_path.clone();
                        attrs.insert((path, attr.name.clone()));
                    }
                }
                _ => {}
            }
        }
        for &id in self.arena.subquery(self.frame.subquery).tablerefs.values() {
            let tableref = self.arena.tableref(id);
            if !tableref.can_affect_distinct || paths.contains(&tableref.name_path) {
                continue;
            }
            let entity = entity_of(self.schema, &tableref.entity)?;
            if entity
                .pk
                .iter()
                .any(|pk| !attrs.contains(&(tableref.name_path.clone(), pk.clone())))
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Whether iterating the monad's rows can repeat a value.
    pub fn requires_distinct(&self, monad: &Monad, for_count: bool) -> TranslateResult<bool> {
        match &monad.kind {
            MonadKind::ObjectIter { tableref } => {
                let path = &self.arena.tableref(*tableref).name_path;
                Ok(self.frame.qual_names.last() != Some(path))
            }
            MonadKind::Attr { parent, attr, .. } => {
                let attr = attr.resolve(self.schema)?;
                let reverse_is_collection = self
                    .schema
                    .reverse_of(attr)
                    .is_some_and(|r| r.is_collection());
                Ok(reverse_is_collection || self.requires_distinct(parent, false)?)
            }
            MonadKind::AttrSet { parent, attr } => {
                if self.requires_distinct(parent, false)? {
                    return Ok(true);
                }
                let attr = attr.resolve(self.schema)?;
                match self.schema.reverse_of(attr) {
                    None => Ok(true),
                    Some(reverse) if reverse.is_collection() => Ok((!for_count
                        && !self.frame.hint_join)
                        || matches!(parent.kind, MonadKind::AttrSet { .. })),
                    Some(_) => Ok(false),
                }
            }
            _ => Ok(false),
        }
    }
}

impl Visitor for Translator<'_> {
    type Output = Option<Monad>;
    type Error = TranslateError;

    fn pre(&mut self, node: &Node) -> TranslateResult<Walk> {
        self.pre_node(node)
            .map_err(|e| e.with_expr(&self.node_src(node.id)))
    }

    fn post(&mut self, node: &Node) -> TranslateResult<Option<Monad>> {
        if self.monads.contains_key(&node.id) {
            return Ok(None);
        }
        self.post_node(node)
            .map_err(|e| e.with_expr(&self.node_src(node.id)))
    }

    fn record(&mut self, node: &Node, output: Option<Monad>) -> TranslateResult<()> {
        match output {
            Some(monad) => self
                .assign(node, monad)
                .map_err(|e| e.with_expr(&self.node_src(node.id))),
            None => Ok(()),
        }
    }
}
