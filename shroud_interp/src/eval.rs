//! Statement execution and expression evaluation.

use crate::builtins;
use crate::error::{InterpError, InterpResult};
use crate::format::{convert, format_value};
use crate::ops;
use crate::scope::{Scope, ScopeKind};
use crate::value::{Body, Class, Function, Object, Param, ParamKind, Value};
use rustc_hash::FxHashMap;
use shroud_parser::ast::{
    Arguments, BoolOp, Comprehension, ExceptHandler, Expr, ExprKind, Module, Pattern, PatternKind,
    Stmt, StmtKind, UnaryOp,
};
use shroud_parser::{parse, parse_expression};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::trace;

/// Nesting limit for calls.
const MAX_DEPTH: usize = 48;

/// Builtin types that refuse to be subclassed.
const FINAL_TYPES: &[&str] = &["bool", "range", "slice", "memoryview"];

/// How a statement finished.
#[derive(Debug, Clone)]
pub enum Flow {
    /// Fall through to the next statement.
    Normal,
    /// `return`
    Return(Value),
    /// `break`
    Break,
    /// `continue`
    Continue,
}

/// A tree-walking evaluator with its own module namespace.
#[derive(Debug)]
pub struct Interpreter {
    globals: Rc<Scope>,
    output: String,
    snapshot: FxHashMap<String, Value>,
    /// Errors being handled, innermost last, for bare `raise`.
    handling: Vec<InterpError>,
    depth: usize,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// An interpreter with an empty module namespace.
    #[must_use]
    pub fn new() -> Self {
        Self {
            globals: Scope::module(),
            output: String::new(),
            snapshot: FxHashMap::default(),
            handling: Vec::new(),
            depth: 0,
        }
    }

    /// Parse and run `source` as a module.
    pub fn run_source(source: &str) -> InterpResult<Self> {
        let module = parse(source)?;
        let mut interp = Self::new();
        interp.run(&module)?;
        Ok(interp)
    }

    /// Run `module` in this interpreter's namespace.
    pub fn run(&mut self, module: &Module) -> InterpResult<()> {
        let globals = Rc::clone(&self.globals);
        let result = self.exec_block(&module.body, &globals);
        self.snapshot = globals.snapshot();
        match result? {
            Flow::Normal => Ok(()),
            _ => Err(InterpError::unsupported("control flow outside a function or loop")),
        }
    }

    /// Evaluate `source` as an expression in the module namespace.
    pub fn eval_source(&mut self, source: &str) -> InterpResult<Value> {
        let expr = parse_expression(source)?;
        let globals = Rc::clone(&self.globals);
        self.eval(&expr, &globals)
    }

    /// A module-level binding as of the end of the last run.
    #[must_use]
    pub fn global(&self, name: &str) -> Option<&Value> {
        self.snapshot.get(name)
    }

    /// Everything `print` wrote.
    #[must_use]
    pub fn output(&self) -> &str {
        &self.output
    }

    pub(crate) fn write(&mut self, text: &str) {
        self.output.push_str(text);
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn exec_block(&mut self, body: &[Stmt], scope: &Rc<Scope>) -> InterpResult<Flow> {
        for stmt in body {
            match self.exec(stmt, scope)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, scope: &Rc<Scope>) -> InterpResult<Flow> {
        match &stmt.kind {
            StmtKind::Expr(value) => {
                self.eval(value, scope)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value, scope)?;
                for target in targets {
                    self.assign(target, value.clone(), scope)?;
                }
            }
            StmtKind::AugAssign { target, op, value } => {
                let current = self.eval(target, scope)?;
                let rhs = self.eval(value, scope)?;
                let result = ops::binary(&current, *op, &rhs)?;
                self.assign(target, result, scope)?;
            }
            StmtKind::AnnAssign { target, value, .. } => {
                if let Some(value) = value {
                    let value = self.eval(value, scope)?;
                    self.assign(target, value, scope)?;
                }
            }
            StmtKind::If { test, body, orelse } => {
                let branch = if self.eval(test, scope)?.truthy() { body } else { orelse };
                return self.exec_block(branch, scope);
            }
            StmtKind::While { test, body, orelse } => {
                while self.eval(test, scope)?.truthy() {
                    match self.exec_block(body, scope)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Normal | Flow::Continue => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                return self.exec_block(orelse, scope);
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
                is_async: false,
            } => {
                let items = self.eval(iter, scope)?;
                for item in self.iterate(&items)? {
                    self.assign(target, item, scope)?;
                    match self.exec_block(body, scope)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Normal | Flow::Continue => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                return self.exec_block(orelse, scope);
            }
            StmtKind::FunctionDef {
                name,
                args,
                body,
                decorator_list,
                is_async: false,
                ..
            } => {
                let params = self.params(args, scope)?;
                let function = Value::Function(Rc::new(Function {
                    name: name.clone(),
                    params,
                    body: Body::Block(body.clone()),
                    closure: scope.closure_for_def(),
                }));
                let value = self.decorate(function, decorator_list, scope)?;
                scope.assign(name, value);
            }
            StmtKind::ClassDef {
                name,
                bases,
                body,
                decorator_list,
                ..
            } => {
                let class = self.class_def(name, bases, body, scope)?;
                let value = self.decorate(class, decorator_list, scope)?;
                scope.assign(name, value);
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(value) => self.eval(value, scope)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.delete(target, scope)?;
                }
            }
            StmtKind::Raise { exc, .. } => {
                return Err(match exc {
                    Some(exc) => {
                        let exc = self.eval(exc, scope)?;
                        self.raised(&exc)?
                    }
                    None => self
                        .handling
                        .last()
                        .cloned()
                        .ok_or_else(|| InterpError::Raised {
                            kind: "RuntimeError".into(),
                            message: "No active exception to reraise".into(),
                            bases: builtins::exception_bases("RuntimeError"),
                        })?,
                });
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => return self.exec_try(body, handlers, orelse, finalbody, scope),
            StmtKind::TryStar { .. } => return Err(InterpError::unsupported("except*")),
            StmtKind::Match { subject, cases } => {
                let subject = self.eval(subject, scope)?;
                for case in cases {
                    let mut bound = Vec::new();
                    if !self.match_pattern(&case.pattern, &subject, &mut bound, scope)? {
                        continue;
                    }
                    for (name, value) in bound {
                        scope.assign(&name, value);
                    }
                    if let Some(guard) = &case.guard {
                        if !self.eval(guard, scope)?.truthy() {
                            continue;
                        }
                    }
                    return self.exec_block(&case.body, scope);
                }
            }
            StmtKind::Assert { test, msg } => {
                if !self.eval(test, scope)?.truthy() {
                    let message = match msg {
                        Some(msg) => self.eval(msg, scope)?.to_str(),
                        None => String::new(),
                    };
                    return Err(InterpError::Assertion { message });
                }
            }
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    let module = builtins::import_module(&alias.name)?;
                    match &alias.asname {
                        Some(asname) => scope.assign(asname, module),
                        None => {
                            let top = alias.name.split('.').next().unwrap_or(&alias.name);
                            scope.assign(top, module);
                        }
                    }
                }
            }
            StmtKind::ImportFrom { module, names, level } => {
                let module = module.as_deref().unwrap_or_default();
                if module == "__future__" {
                    return Ok(Flow::Normal);
                }
                if *level > 0 || names.iter().any(|a| a.name == "*") {
                    return Err(InterpError::unsupported(format!("from-import of {module}")));
                }
                for alias in names {
                    let value = builtins::module_attr(module, &alias.name)?;
                    scope.assign(alias.asname.as_ref().unwrap_or(&alias.name), value);
                }
            }
            StmtKind::Global(_) | StmtKind::Nonlocal(_) | StmtKind::Pass => {}
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::With { .. } => return Err(InterpError::unsupported("with statement")),
            StmtKind::For { .. } | StmtKind::FunctionDef { .. } => {
                return Err(InterpError::unsupported("async"));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[ExceptHandler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
        scope: &Rc<Scope>,
    ) -> InterpResult<Flow> {
        let outcome = match self.exec_block(body, scope) {
            Ok(Flow::Normal) => self.exec_block(orelse, scope),
            Ok(flow) => Ok(flow),
            Err(error) => match self.find_handler(&error, handlers, scope)? {
                Some(handler) => {
                    if let Some(name) = &handler.name {
                        scope.assign(name, builtins::exception_object(&error));
                    }
                    self.handling.push(error);
                    let result = self.exec_block(&handler.body, scope);
                    self.handling.pop();
                    result
                }
                None => Err(error),
            },
        };
        match self.exec_block(finalbody, scope)? {
            Flow::Normal => outcome,
            flow => Ok(flow),
        }
    }

    /// Whether `subject` matches `pattern`. Captures are pushed onto `bound`
    /// and only committed by the caller once the whole pattern succeeds.
    fn match_pattern(
        &mut self,
        pattern: &Pattern,
        subject: &Value,
        bound: &mut Vec<(String, Value)>,
        scope: &Rc<Scope>,
    ) -> InterpResult<bool> {
        match &pattern.kind {
            PatternKind::Value(expr) => {
                let value = self.eval(expr, scope)?;
                Ok(ops::py_eq(subject, &value))
            }
            PatternKind::Singleton(None) => Ok(matches!(subject, Value::None)),
            PatternKind::Singleton(Some(expected)) => {
                Ok(matches!(subject, Value::Bool(actual) if actual == expected))
            }
            PatternKind::As { pattern, name } => {
                if let Some(inner) = pattern {
                    if !self.match_pattern(inner, subject, bound, scope)? {
                        return Ok(false);
                    }
                }
                if let Some(name) = name {
                    bound.push((name.clone(), subject.clone()));
                }
                Ok(true)
            }
            PatternKind::Or(options) => {
                for option in options {
                    let mark = bound.len();
                    if self.match_pattern(option, subject, bound, scope)? {
                        return Ok(true);
                    }
                    bound.truncate(mark);
                }
                Ok(false)
            }
            PatternKind::Sequence(items) => match subject {
                Value::List(values) | Value::Tuple(values) => {
                    self.match_sequence(items, values, bound, scope)
                }
                _ => Ok(false),
            },
            PatternKind::Mapping { keys, patterns, rest } => {
                let Value::Dict(entries) = subject else {
                    return Ok(false);
                };
                let mut used = Vec::with_capacity(keys.len());
                for (key, pattern) in keys.iter().zip(patterns) {
                    let key = self.eval(key, scope)?;
                    let Some(value) = ops::dict_get(entries, &key) else {
                        return Ok(false);
                    };
                    if !self.match_pattern(pattern, value, bound, scope)? {
                        return Ok(false);
                    }
                    used.push(key);
                }
                if let Some(rest) = rest {
                    let remaining = entries
                        .iter()
                        .filter(|(key, _)| !used.iter().any(|u| ops::py_eq(key, u)))
                        .cloned()
                        .collect();
                    bound.push((rest.clone(), Value::Dict(remaining)));
                }
                Ok(true)
            }
            PatternKind::Class {
                cls,
                patterns,
                kwd_attrs,
                kwd_patterns,
            } => {
                let class = self.eval(cls, scope)?;
                if !builtins::isinstance(subject, &class) {
                    return Ok(false);
                }
                let mut attrs: Vec<(String, &Pattern)> = Vec::new();
                if let Value::Builtin(name) = &class {
                    // Builtin types match their single positional against the subject itself.
                    match patterns.as_slice() {
                        [] => {}
                        [only] => {
                            if !self.match_pattern(only, subject, bound, scope)? {
                                return Ok(false);
                            }
                        }
                        _ => {
                            return Err(InterpError::type_error(format!(
                                "{name}() accepts 1 positional sub-pattern ({} given)",
                                patterns.len()
                            )));
                        }
                    }
                } else if !patterns.is_empty() {
                    let names = match builtins::get_attr(&class, "__match_args__") {
                        Ok(Value::Tuple(names)) => names,
                        _ => Vec::new(),
                    };
                    if patterns.len() > names.len() {
                        return Err(InterpError::type_error(format!(
                            "{}() accepts {} positional sub-patterns ({} given)",
                            builtins::get_attr(&class, "__name__")?.to_str(),
                            names.len(),
                            patterns.len()
                        )));
                    }
                    attrs.extend(names.iter().map(Value::to_str).zip(patterns));
                }
                attrs.extend(kwd_attrs.iter().cloned().zip(kwd_patterns));
                for (attr, pattern) in attrs {
                    let Ok(value) = builtins::get_attr(subject, &attr) else {
                        return Ok(false);
                    };
                    if !self.match_pattern(pattern, &value, bound, scope)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            PatternKind::Star(_) => Err(InterpError::unsupported("star pattern outside a sequence")),
        }
    }

    fn match_sequence(
        &mut self,
        items: &[Pattern],
        values: &[Value],
        bound: &mut Vec<(String, Value)>,
        scope: &Rc<Scope>,
    ) -> InterpResult<bool> {
        let star = items.iter().position(|p| matches!(p.kind, PatternKind::Star(_)));
        let (head, tail, rest) = match star {
            None if items.len() == values.len() => (items, &[][..], None),
            Some(at) if values.len() + 1 >= items.len() => {
                (&items[..at], &items[at + 1..], Some(&items[at]))
            }
            _ => return Ok(false),
        };
        let tail_start = values.len() - tail.len();
        let pairs = head.iter().zip(values).chain(tail.iter().zip(&values[tail_start..]));
        for (item, value) in pairs {
            if !self.match_pattern(item, value, bound, scope)? {
                return Ok(false);
            }
        }
        if let Some(Pattern {
            kind: PatternKind::Star(Some(name)),
            ..
        }) = rest
        {
            bound.push((name.clone(), Value::List(values[head.len()..tail_start].to_vec())));
        }
        Ok(true)
    }

    fn find_handler<'h>(
        &mut self,
        error: &InterpError,
        handlers: &'h [ExceptHandler],
        scope: &Rc<Scope>,
    ) -> InterpResult<Option<&'h ExceptHandler>> {
        if matches!(error, InterpError::Parse(_) | InterpError::Unsupported { .. }) {
            return Ok(None);
        }
        for handler in handlers {
            let Some(typ) = &handler.typ else {
                return Ok(Some(handler));
            };
            let typ = self.eval(typ, scope)?;
            let candidates = match typ {
                Value::Tuple(items) => items,
                other => vec![other],
            };
            let caught = candidates.iter().any(|candidate| match candidate {
                Value::Builtin(name) => error.caught_by(name),
                Value::Class(class) => error.caught_by(&class.name),
                _ => false,
            });
            if caught {
                return Ok(Some(handler));
            }
        }
        Ok(None)
    }

    /// The error a `raise <exc>` produces.
    fn raised(&mut self, exc: &Value) -> InterpResult<InterpError> {
        let exc = match exc {
            Value::Builtin(_) | Value::Class(_) => self.call(exc, Vec::new(), Vec::new())?,
            other => other.clone(),
        };
        match &exc {
            Value::Object(object) => match object.exception_class() {
                Some(class) => Ok(InterpError::Raised {
                    kind: class.name.clone(),
                    message: object.exception_message(),
                    bases: class.bases.clone(),
                }),
                None => Err(InterpError::type_error("exceptions must derive from BaseException")),
            },
            _ => Err(InterpError::type_error("exceptions must derive from BaseException")),
        }
    }

    fn decorate(&mut self, value: Value, decorators: &[Expr], scope: &Rc<Scope>) -> InterpResult<Value> {
        let decorators = decorators
            .iter()
            .map(|d| self.eval(d, scope))
            .collect::<InterpResult<Vec<_>>>()?;
        decorators
            .iter()
            .rev()
            .try_fold(value, |value, decorator| self.call(decorator, vec![value], Vec::new()))
    }

    fn class_def(
        &mut self,
        name: &str,
        bases: &[Expr],
        body: &[Stmt],
        scope: &Rc<Scope>,
    ) -> InterpResult<Value> {
        let mut ancestors = Vec::new();
        let mut mro = Vec::new();
        let mut inherited = FxHashMap::default();
        for base in bases {
            match self.eval(base, scope)? {
                Value::Class(class) => {
                    ancestors.push(class.name.clone());
                    ancestors.extend(class.bases.iter().cloned());
                    for (k, v) in class.attrs.borrow().iter() {
                        inherited.entry(k.clone()).or_insert_with(|| v.clone());
                    }
                    mro.push(Value::Class(Rc::clone(&class)));
                    mro.extend(class.mro.iter().cloned());
                }
                Value::Builtin(base) if FINAL_TYPES.contains(&base.as_str()) => {
                    return Err(InterpError::type_error(format!(
                        "type '{base}' is not an acceptable base type"
                    )));
                }
                Value::Builtin(base) => {
                    let chain = builtins::exception_bases(&base);
                    mro.push(Value::Builtin(base.clone()));
                    mro.extend(chain.iter().cloned().map(Value::Builtin));
                    ancestors.push(base);
                    ancestors.extend(chain);
                }
                other => {
                    return Err(InterpError::type_error(format!(
                        "cannot inherit from {}",
                        other.type_name()
                    )));
                }
            }
        }
        let class_scope = Scope::child(scope, ScopeKind::Class, body);
        match self.exec_block(body, &class_scope)? {
            Flow::Normal => {}
            _ => return Err(InterpError::unsupported("control flow in class body")),
        }
        mro.retain(|entry| !matches!(entry, Value::Builtin(b) if b == "object"));
        let mut class = Class::new(name, ancestors);
        class.mro = ops::dedup(mro);
        {
            let mut attrs = class.attrs.borrow_mut();
            attrs.extend(inherited);
            attrs.extend(class_scope.snapshot());
        }
        Ok(Value::Class(Rc::new(class)))
    }

    fn params(&mut self, args: &Arguments, scope: &Rc<Scope>) -> InterpResult<Vec<Param>> {
        let positional: Vec<(&str, ParamKind)> = args
            .posonlyargs
            .iter()
            .map(|a| (a.arg.as_str(), ParamKind::PositionalOnly))
            .chain(args.args.iter().map(|a| (a.arg.as_str(), ParamKind::Positional)))
            .collect();
        let first_default = positional.len().saturating_sub(args.defaults.len());
        let mut params = Vec::with_capacity(positional.len() + args.kwonlyargs.len() + 2);
        for (i, (name, kind)) in positional.into_iter().enumerate() {
            let default = match i.checked_sub(first_default) {
                Some(d) => Some(self.eval(&args.defaults[d], scope)?),
                None => None,
            };
            params.push(Param {
                name: name.to_string(),
                kind,
                default,
            });
        }
        if let Some(vararg) = &args.vararg {
            params.push(Param {
                name: vararg.arg.clone(),
                kind: ParamKind::VarArgs,
                default: None,
            });
        }
        for (i, arg) in args.kwonlyargs.iter().enumerate() {
            let default = match args.kw_defaults.get(i).and_then(Option::as_ref) {
                Some(expr) => Some(self.eval(expr, scope)?),
                None => None,
            };
            params.push(Param {
                name: arg.arg.clone(),
                kind: ParamKind::KeywordOnly,
                default,
            });
        }
        if let Some(kwarg) = &args.kwarg {
            params.push(Param {
                name: kwarg.arg.clone(),
                kind: ParamKind::VarKeywords,
                default: None,
            });
        }
        Ok(params)
    }

    // =========================================================================
    // Targets
    // =========================================================================

    pub(crate) fn assign(&mut self, target: &Expr, value: Value, scope: &Rc<Scope>) -> InterpResult<()> {
        match &target.kind {
            ExprKind::Name { id, .. } => {
                scope.assign(id, value);
                Ok(())
            }
            ExprKind::Tuple(elts) | ExprKind::List(elts) => self.unpack(elts, value, scope),
            ExprKind::Attribute { value: owner, attr } => {
                let owner = self.eval(owner, scope)?;
                builtins::set_attr(&owner, attr, value)
            }
            ExprKind::Subscript { value: container, slice } => {
                let mut current = self.eval(container, scope)?;
                let key = self.eval_index(slice, scope)?;
                ops::set_item(&mut current, key, value)?;
                self.write_back(container, current, scope)
            }
            ExprKind::Starred(_) => Err(InterpError::unsupported("starred assignment target")),
            _ => Err(InterpError::unsupported("assignment target")),
        }
    }

    /// Store a changed container back into the expression it was read from.
    /// Names keep their binding scope; temporaries are dropped.
    fn write_back(&mut self, source: &Expr, value: Value, scope: &Rc<Scope>) -> InterpResult<()> {
        match &source.kind {
            ExprKind::Name { id, .. } => {
                scope.rebind(id, value);
                Ok(())
            }
            ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => self.assign(source, value, scope),
            _ => Ok(()),
        }
    }

    fn unpack(&mut self, elts: &[Expr], value: Value, scope: &Rc<Scope>) -> InterpResult<()> {
        let items = self.iterate(&value)?;
        let star = elts.iter().position(|e| matches!(e.kind, ExprKind::Starred(_)));
        match star {
            None => {
                if items.len() != elts.len() {
                    return Err(InterpError::value_error(format!(
                        "expected {} values to unpack, got {}",
                        elts.len(),
                        items.len()
                    )));
                }
                for (elt, item) in elts.iter().zip(items) {
                    self.assign(elt, item, scope)?;
                }
            }
            Some(star) => {
                let after = elts.len() - star - 1;
                if items.len() < elts.len() - 1 {
                    return Err(InterpError::value_error("not enough values to unpack"));
                }
                let mut items = VecDeque::from(items);
                for elt in &elts[..star] {
                    let item = items.pop_front().unwrap_or(Value::None);
                    self.assign(elt, item, scope)?;
                }
                let tail = items.split_off(items.len() - after);
                if let ExprKind::Starred(inner) = &elts[star].kind {
                    self.assign(inner, Value::List(items.into()), scope)?;
                }
                for (elt, item) in elts[star + 1..].iter().zip(tail) {
                    self.assign(elt, item, scope)?;
                }
            }
        }
        Ok(())
    }

    fn delete(&mut self, target: &Expr, scope: &Rc<Scope>) -> InterpResult<()> {
        match &target.kind {
            ExprKind::Name { id, .. } => scope.delete(id),
            ExprKind::Tuple(elts) | ExprKind::List(elts) => {
                elts.iter().try_for_each(|elt| self.delete(elt, scope))
            }
            ExprKind::Attribute { value, attr } => {
                let owner = self.eval(value, scope)?;
                builtins::del_attr(&owner, attr)
            }
            ExprKind::Subscript { value: container, slice } => {
                let mut current = self.eval(container, scope)?;
                let key = self.eval_index(slice, scope)?;
                ops::del_item(&mut current, &key)?;
                self.write_back(container, current, scope)
            }
            _ => Err(InterpError::unsupported("delete target")),
        }
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    /// Evaluate `expr` in `scope`.
    pub fn eval(&mut self, expr: &Expr, scope: &Rc<Scope>) -> InterpResult<Value> {
        match &expr.kind {
            ExprKind::Int(v) => Ok(Value::Int(i128::from(*v))),
            ExprKind::BigInt(digits) => digits
                .parse::<i128>()
                .map(Value::Int)
                .map_err(|_| InterpError::Overflow {
                    message: format!("integer literal {digits} is too large"),
                }),
            ExprKind::Float(v) => Ok(Value::Float(*v)),
            ExprKind::Complex { real, imag } => Ok(Value::Complex(*real, *imag)),
            ExprKind::String(s) => Ok(Value::Str(s.clone())),
            ExprKind::Bytes(b) => Ok(Value::Bytes(b.clone())),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::None => Ok(Value::None),
            ExprKind::Ellipsis => Ok(Value::Ellipsis),
            ExprKind::Name { id, .. } => self.lookup(id, scope),
            ExprKind::BoolOp { op, values } => {
                let mut last = Value::None;
                for value in values {
                    last = self.eval(value, scope)?;
                    let done = match op {
                        BoolOp::And => !last.truthy(),
                        BoolOp::Or => last.truthy(),
                    };
                    if done {
                        break;
                    }
                }
                Ok(last)
            }
            ExprKind::NamedExpr { target, value } => {
                let value = self.eval(value, scope)?;
                let name = target
                    .as_name()
                    .ok_or_else(|| InterpError::unsupported("walrus target"))?;
                scope.assign_walrus(name, value.clone());
                Ok(value)
            }
            ExprKind::BinOp { left, op, right } => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                ops::binary(&left, *op, &right)
            }
            ExprKind::UnaryOp { op, operand } => {
                let operand = self.eval(operand, scope)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!operand.truthy())),
                    _ => ops::unary(*op, &operand),
                }
            }
            ExprKind::Lambda { args, body } => Ok(Value::Function(Rc::new(Function {
                name: "<lambda>".into(),
                params: self.params(args, scope)?,
                body: Body::Expr((**body).clone()),
                closure: Rc::clone(scope),
            }))),
            ExprKind::IfExp { test, body, orelse } => {
                if self.eval(test, scope)?.truthy() {
                    self.eval(body, scope)
                } else {
                    self.eval(orelse, scope)
                }
            }
            ExprKind::Dict { keys, values } => {
                let mut items: Vec<(Value, Value)> = Vec::with_capacity(keys.len());
                for (key, value) in keys.iter().zip(values) {
                    match key {
                        Some(key) => {
                            let key = self.eval(key, scope)?;
                            let value = self.eval(value, scope)?;
                            ops::dict_insert(&mut items, key, value);
                        }
                        None => match self.eval(value, scope)? {
                            Value::Dict(other) => {
                                for (k, v) in other {
                                    ops::dict_insert(&mut items, k, v);
                                }
                            }
                            other => {
                                return Err(InterpError::type_error(format!(
                                    "'{}' object is not a mapping",
                                    other.type_name()
                                )));
                            }
                        },
                    }
                }
                Ok(Value::Dict(items))
            }
            ExprKind::Set(elts) => {
                let items = self.eval_elements(elts, scope)?;
                Ok(Value::Set(ops::dedup(items)))
            }
            ExprKind::List(elts) => Ok(Value::List(self.eval_elements(elts, scope)?)),
            ExprKind::Tuple(elts) => Ok(Value::Tuple(self.eval_elements(elts, scope)?)),
            ExprKind::ListComp { elt, generators } => {
                Ok(Value::List(self.comprehension(elt, None, generators, scope)?))
            }
            ExprKind::SetComp { elt, generators } => Ok(Value::Set(ops::dedup(
                self.comprehension(elt, None, generators, scope)?,
            ))),
            ExprKind::GeneratorExp { elt, generators } => {
                let items = self.comprehension(elt, None, generators, scope)?;
                Ok(Value::Iter(Rc::new(RefCell::new(items.into()))))
            }
            ExprKind::DictComp {
                key,
                value,
                generators,
            } => {
                let pairs = self.comprehension(key, Some(value), generators, scope)?;
                let mut items = Vec::with_capacity(pairs.len());
                for pair in pairs {
                    if let Value::Tuple(mut kv) = pair
                        && kv.len() == 2
                    {
                        let v = kv.pop().unwrap_or(Value::None);
                        let k = kv.pop().unwrap_or(Value::None);
                        ops::dict_insert(&mut items, k, v);
                    }
                }
                Ok(Value::Dict(items))
            }
            ExprKind::Await(_) | ExprKind::Yield(_) | ExprKind::YieldFrom(_) => {
                Err(InterpError::unsupported("generators and coroutines"))
            }
            ExprKind::Compare {
                left,
                ops: cmp_ops,
                comparators,
            } => {
                let mut left = self.eval(left, scope)?;
                for (op, right) in cmp_ops.iter().zip(comparators) {
                    let right = self.eval(right, scope)?;
                    if !ops::compare(&left, *op, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            ExprKind::Call { func, args, keywords } => {
                let mut positional = Vec::with_capacity(args.len());
                let mut named = Vec::with_capacity(keywords.len());
                // Receiver and method evaluated before the arguments.
                let callee = match &func.kind {
                    ExprKind::Attribute { value, attr } => {
                        let receiver = self.eval(value, scope)?;
                        if builtins::mutates(&receiver, attr) {
                            self.call_args(args, keywords, &mut positional, &mut named, scope)?;
                            let mut receiver = receiver;
                            let result =
                                builtins::call_mutator(self, &mut receiver, attr, positional, named)?;
                            self.write_back(value, receiver, scope)?;
                            return Ok(result);
                        }
                        builtins::get_attr(&receiver, attr)?
                    }
                    _ => self.eval(func, scope)?,
                };
                self.call_args(args, keywords, &mut positional, &mut named, scope)?;
                self.call(&callee, positional, named)
            }
            ExprKind::FormattedValue {
                value,
                conversion,
                format_spec,
            } => {
                let value = convert(&self.eval(value, scope)?, *conversion)?;
                let spec = match format_spec {
                    Some(spec) => self.eval(spec, scope)?.to_str(),
                    None => String::new(),
                };
                Ok(Value::Str(format_value(&value, &spec)?))
            }
            ExprKind::JoinedStr(parts) => {
                let mut out = String::new();
                for part in parts {
                    out.push_str(&self.eval(part, scope)?.to_str());
                }
                Ok(Value::Str(out))
            }
            ExprKind::Attribute { value, attr } => {
                let value = self.eval(value, scope)?;
                builtins::get_attr(&value, attr)
            }
            ExprKind::Subscript { value, slice } => {
                let value = self.eval(value, scope)?;
                let key = self.eval_index(slice, scope)?;
                ops::get_item(&value, &key)
            }
            ExprKind::Starred(_) => Err(InterpError::unsupported("starred expression here")),
            ExprKind::Slice { .. } => self.eval_index(expr, scope),
        }
    }

    fn lookup(&self, name: &str, scope: &Rc<Scope>) -> InterpResult<Value> {
        scope
            .lookup(name)
            .or_else(|| builtins::builtin(name))
            .ok_or_else(|| InterpError::NameError {
                name: name.to_string(),
            })
    }

    /// A subscript key; slices become [`ops::Slice`] tuples.
    fn eval_index(&mut self, expr: &Expr, scope: &Rc<Scope>) -> InterpResult<Value> {
        match &expr.kind {
            ExprKind::Slice { lower, upper, step } => {
                let mut bound = |e: &Option<Box<Expr>>| -> InterpResult<Value> {
                    match e {
                        Some(e) => self.eval(e, scope),
                        None => Ok(Value::None),
                    }
                };
                let lower = bound(lower)?;
                let upper = bound(upper)?;
                let step = bound(step)?;
                Ok(ops::slice_key(lower, upper, step))
            }
            _ => self.eval(expr, scope),
        }
    }

    fn eval_elements(&mut self, elts: &[Expr], scope: &Rc<Scope>) -> InterpResult<Vec<Value>> {
        let mut out = Vec::with_capacity(elts.len());
        for elt in elts {
            match &elt.kind {
                ExprKind::Starred(inner) => {
                    let value = self.eval(inner, scope)?;
                    out.extend(self.iterate(&value)?);
                }
                _ => out.push(self.eval(elt, scope)?),
            }
        }
        Ok(out)
    }

    fn call_args(
        &mut self,
        args: &[Expr],
        keywords: &[shroud_parser::ast::Keyword],
        positional: &mut Vec<Value>,
        named: &mut Vec<(String, Value)>,
        scope: &Rc<Scope>,
    ) -> InterpResult<()> {
        positional.extend(self.eval_elements(args, scope)?);
        for keyword in keywords {
            let value = self.eval(&keyword.value, scope)?;
            match &keyword.arg {
                Some(name) => named.push((name.clone(), value)),
                None => match value {
                    Value::Dict(items) => {
                        for (k, v) in items {
                            named.push((k.as_str()?.to_string(), v));
                        }
                    }
                    other => {
                        return Err(InterpError::type_error(format!(
                            "argument after ** must be a mapping, not {}",
                            other.type_name()
                        )));
                    }
                },
            }
        }
        Ok(())
    }

    /// Evaluate a comprehension. With `value` set each item is a
    /// `(key, value)` tuple.
    fn comprehension(
        &mut self,
        elt: &Expr,
        value: Option<&Expr>,
        generators: &[Comprehension],
        scope: &Rc<Scope>,
    ) -> InterpResult<Vec<Value>> {
        let Some(first) = generators.first() else {
            return Ok(Vec::new());
        };
        let iterable = self.eval(&first.iter, scope)?;
        let inner = Scope::child(scope, ScopeKind::Comprehension, &[]);
        let mut out = Vec::new();
        self.generate(iterable, elt, value, generators, &inner, &mut out)?;
        Ok(out)
    }

    fn generate(
        &mut self,
        iterable: Value,
        elt: &Expr,
        value: Option<&Expr>,
        generators: &[Comprehension],
        scope: &Rc<Scope>,
        out: &mut Vec<Value>,
    ) -> InterpResult<()> {
        let (current, rest) = match generators.split_first() {
            Some(split) => split,
            None => return Ok(()),
        };
        'items: for item in self.iterate(&iterable)? {
            self.assign(&current.target, item, scope)?;
            for cond in &current.ifs {
                if !self.eval(cond, scope)?.truthy() {
                    continue 'items;
                }
            }
            match rest.first() {
                Some(next) => {
                    let next_iterable = self.eval(&next.iter, scope)?;
                    self.generate(next_iterable, elt, value, rest, scope, out)?;
                }
                None => {
                    let key = self.eval(elt, scope)?;
                    out.push(match value {
                        Some(value) => Value::Tuple(vec![key, self.eval(value, scope)?]),
                        None => key,
                    });
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Call `callee` with evaluated arguments.
    pub fn call(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> InterpResult<Value> {
        match callee {
            Value::Builtin(name) => builtins::call_builtin(self, name, args, kwargs),
            Value::Method(receiver, name) => builtins::call_method(self, receiver, name, args, kwargs),
            Value::Function(function) => self.call_function(function, args, kwargs),
            Value::BoundMethod(receiver, function) => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push((**receiver).clone());
                full.extend(args);
                self.call_function(function, full, kwargs)
            }
            Value::Class(class) => {
                let object = Value::Object(Rc::new(Object::instance(Rc::clone(class))));
                let init = class.attrs.borrow().get("__init__").cloned();
                match init {
                    Some(Value::Function(init)) => {
                        let mut full = Vec::with_capacity(args.len() + 1);
                        full.push(object.clone());
                        full.extend(args);
                        self.call_function(&init, full, kwargs)?;
                    }
                    _ if class.is_exception() => {
                        builtins::set_attr(&object, "args", Value::Tuple(args))?;
                    }
                    _ if !args.is_empty() || !kwargs.is_empty() => {
                        return Err(InterpError::type_error(format!(
                            "{}() takes no arguments",
                            class.name
                        )));
                    }
                    _ => {}
                }
                Ok(object)
            }
            other => Err(InterpError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(
        &mut self,
        function: &Rc<Function>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> InterpResult<Value> {
        if self.depth >= MAX_DEPTH {
            return Err(InterpError::Raised {
                kind: "RecursionError".into(),
                message: "maximum recursion depth exceeded".into(),
                bases: builtins::exception_bases("RecursionError"),
            });
        }
        let body: &[Stmt] = match &function.body {
            Body::Block(body) => body,
            Body::Expr(_) => &[],
        };
        let scope = Scope::child(&function.closure, ScopeKind::Function, body);
        bind_params(function, args, kwargs, &scope)?;
        trace!(function = %function.name, depth = self.depth, "call");

        self.depth += 1;
        let result = match &function.body {
            Body::Block(body) => self.exec_block(body, &scope).map(|flow| match flow {
                Flow::Return(value) => value,
                _ => Value::None,
            }),
            Body::Expr(expr) => self.eval(expr, &scope),
        };
        self.depth -= 1;
        result
    }

    /// Every item of an iterable. Iterators are drained.
    pub fn iterate(&mut self, value: &Value) -> InterpResult<Vec<Value>> {
        match value {
            Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
            Value::Bytes(b) => Ok(b.iter().map(|b| Value::Int(i128::from(*b))).collect()),
            Value::List(items) | Value::Tuple(items) | Value::Set(items) => Ok(items.clone()),
            Value::Dict(items) => Ok(items.iter().map(|(k, _)| k.clone()).collect()),
            Value::Iter(queue) => Ok(queue.borrow_mut().drain(..).collect()),
            other => Err(InterpError::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }

    /// `iter(value)`: iterators are returned as they are.
    pub fn to_iter(&mut self, value: &Value) -> InterpResult<Rc<RefCell<VecDeque<Value>>>> {
        match value {
            Value::Iter(queue) => Ok(Rc::clone(queue)),
            other => Ok(Rc::new(RefCell::new(self.iterate(other)?.into()))),
        }
    }
}

/// Bind call arguments to the parameters of `function` in `scope`.
fn bind_params(
    function: &Function,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
    scope: &Rc<Scope>,
) -> InterpResult<()> {
    let name = &function.name;
    let mut bound: FxHashMap<&str, Value> = FxHashMap::default();
    let mut args = args.into_iter();
    let mut extra_args = Vec::new();
    let mut extra_kwargs = Vec::new();

    for param in &function.params {
        match param.kind {
            ParamKind::PositionalOnly | ParamKind::Positional => {
                if let Some(arg) = args.next() {
                    bound.insert(&param.name, arg);
                }
            }
            ParamKind::VarArgs => extra_args.extend(args.by_ref()),
            _ => {}
        }
    }
    if args.len() > 0 {
        return Err(InterpError::type_error(format!(
            "{name}() takes {} positional arguments but more were given",
            function
                .params
                .iter()
                .filter(|p| matches!(p.kind, ParamKind::Positional | ParamKind::PositionalOnly))
                .count()
        )));
    }
    for (key, value) in kwargs {
        let param = function.params.iter().find(|p| {
            p.name == key && matches!(p.kind, ParamKind::Positional | ParamKind::KeywordOnly)
        });
        match param {
            Some(param) => {
                if bound.insert(&param.name, value).is_some() {
                    return Err(InterpError::type_error(format!(
                        "{name}() got multiple values for argument '{key}'"
                    )));
                }
            }
            None => extra_kwargs.push((Value::Str(key), value)),
        }
    }

    let mut has_varkw = false;
    for param in &function.params {
        let value = match param.kind {
            ParamKind::VarArgs => Value::Tuple(std::mem::take(&mut extra_args)),
            ParamKind::VarKeywords => {
                has_varkw = true;
                Value::Dict(std::mem::take(&mut extra_kwargs))
            }
            _ => match bound.remove(param.name.as_str()).or_else(|| param.default.clone()) {
                Some(value) => value,
                None => {
                    return Err(InterpError::type_error(format!(
                        "{name}() missing required argument: '{}'",
                        param.name
                    )));
                }
            },
        };
        scope.assign(&param.name, value);
    }
    if !has_varkw && let Some((key, _)) = extra_kwargs.first() {
        return Err(InterpError::type_error(format!(
            "{name}() got an unexpected keyword argument {}",
            key.repr()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn run(src: &str) -> Interpreter {
        Interpreter::run_source(src).unwrap()
    }

    fn v(src: &str) -> Value {
        run(src).global("v").cloned().unwrap()
    }

    #[test]
    fn test_mro_walks_builtin_chains() {
        let src = "class A(str): ...\nclass B(A): ...\nv = (B.mro()[2]('x'), len(B.mro()), B.mro()[0] is B)\n";
        assert_eq!(
            v(src),
            Value::Tuple(vec![Value::Str("x".into()), Value::Int(4), Value::Bool(true)])
        );
    }

    #[test]
    fn test_final_types_reject_subclasses() {
        let err = Interpreter::run_source("class A(bool): ...\n").unwrap_err();
        assert_eq!(err.kind_name(), "TypeError");
    }

    #[test]
    fn test_assignment_forms() {
        assert_eq!(v("a, (b, c) = 1, [2, 3]\nv = a + b + c\n"), Value::Int(6));
        assert_eq!(v("a, *b = 1, 2, 3\nv = b\n"), Value::List(vec![Value::Int(2), Value::Int(3)]));
        assert_eq!(v("x = y = 4\nv = x * y\n"), Value::Int(16));
        assert_eq!(v("v = 1\nv += 2\nv *= 3\n"), Value::Int(9));
        assert_eq!(v("v: int = 5\n"), Value::Int(5));
    }

    #[test]
    fn test_subscript_assignment_writes_back() {
        assert_eq!(
            v("v = [1, 2, 3]\nv[0] = 9\ndel v[1]\n"),
            Value::List(vec![Value::Int(9), Value::Int(3)])
        );
        assert_eq!(v("d = {}\nd['k'] = [0]\nd['k'][0] = 5\nv = d['k'][0]\n"), Value::Int(5));
        assert_eq!(v("v = []\nv.append(1)\nv.extend([2])\n"), Value::List(vec![Value::Int(1), Value::Int(2)]));
    }

    #[test]
    fn test_write_back_reaches_enclosing_binding() {
        let src = "\
seen = {}
def outer():
    acc = []
    def add(n):
        acc.append(n)
        seen[n] = True
        return len(acc)
    add(1)
    return add(2)
v = (outer(), len(seen))
";
        assert_eq!(v(src), Value::Tuple(vec![Value::Int(2), Value::Int(2)]));
    }

    #[test]
    fn test_loops_and_else() {
        let src = "v = 0\nfor i in range(10):\n    if i == 3:\n        continue\n    if i == 6:\n        break\n    v += i\nelse:\n    v = -1\n";
        assert_eq!(v(src), Value::Int(12));
        let src = "n = 0\nwhile n < 3:\n    n += 1\nelse:\n    v = n\n";
        assert_eq!(v(src), Value::Int(3));
    }

    #[test]
    fn test_functions() {
        let src = "\
def f(a, b=2, *rest, k=3, **kw):
    return (a, b, rest, k, kw)
v = f(1, 5, 6, k=4, z=0)
";
        assert_eq!(
            v(src),
            Value::Tuple(vec![
                Value::Int(1),
                Value::Int(5),
                Value::Tuple(vec![Value::Int(6)]),
                Value::Int(4),
                Value::Dict(vec![(Value::Str("z".into()), Value::Int(0))]),
            ])
        );
        assert!(Interpreter::run_source("def f(a):\n    pass\nf()\n").is_err());
        assert!(Interpreter::run_source("def f(a):\n    pass\nf(1, b=2)\n").is_err());
    }

    #[test]
    fn test_closures_and_decorators() {
        let src = "\
def twice(fn):
    def inner(x):
        return fn(fn(x))
    return inner
@twice
def inc(x):
    return x + 1
v = inc(0)
";
        assert_eq!(v(src), Value::Int(2));
    }

    #[test]
    fn test_classes() {
        let src = "\
class Base:
    kind = 'base'
    def name(self):
        return self.kind + '!'
class Child(Base):
    def __init__(self, n):
        self.n = n
    def total(self):
        return self.n * 2
c = Child(4)
v = (c.total(), c.name())
";
        assert_eq!(v(src), Value::Tuple(vec![Value::Int(8), Value::Str("base!".into())]));
    }

    #[test]
    fn test_try_except_finally() {
        let src = "\
log = []
try:
    1 / 0
except ValueError:
    log = log + ['value']
except ZeroDivisionError as e:
    log = log + [str(e)]
else:
    log = log + ['else']
finally:
    log = log + ['finally']
v = log
";
        assert_eq!(
            v(src),
            Value::List(vec![Value::Str("division by zero".into()), Value::Str("finally".into())])
        );
    }

    #[test]
    fn test_user_exceptions() {
        let src = "\
class Oops(ValueError):
    pass
try:
    raise Oops('bad')
except ValueError as e:
    v = str(e)
";
        assert_eq!(v(src), Value::Str("bad".into()));
        let err = Interpreter::run_source("raise KeyError('k')\n").unwrap_err();
        assert!(err.caught_by("LookupError"));
    }

    #[test]
    fn test_bare_raise_reraises() {
        let src = "try:\n    try:\n        [][1]\n    except IndexError:\n        raise\nexcept Exception as e:\n    v = 1\n";
        assert_eq!(v(src), Value::Int(1));
    }

    #[test]
    fn test_comprehensions() {
        assert_eq!(
            v("v = [x * y for x in range(1, 3) for y in range(2) if y]\n"),
            Value::List(vec![Value::Int(1), Value::Int(2)])
        );
        assert_eq!(
            v("v = {k: k * 2 for k in 'ab'}\n"),
            Value::Dict(vec![
                (Value::Str("a".into()), Value::Str("aa".into())),
                (Value::Str("b".into()), Value::Str("bb".into())),
            ])
        );
        assert_eq!(v("v = sum(x for x in [1, 2, 3])\n"), Value::Int(6));
        assert_eq!(v("[y := 5 for _ in [0]]\nv = y\n"), Value::Int(5));
    }

    #[test]
    fn test_print_collects_output() {
        let interp = run("print('a', 1, sep='-')\nprint(2.5, end='')\n");
        assert_eq!(interp.output(), "a-1\n2.5");
    }

    #[test]
    fn test_name_error() {
        let err = Interpreter::run_source("v = missing\n").unwrap_err();
        assert_eq!(err, InterpError::NameError { name: "missing".into() });
    }

    #[rstest]
    #[case("with open('f') as f:\n    pass\n")]
    #[case("from . import x\n")]
    fn test_unsupported(#[case] src: &str) {
        assert!(matches!(
            Interpreter::run_source(src),
            Err(InterpError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_recursion_limit() {
        let err = Interpreter::run_source("def f():\n    return f()\nf()\n").unwrap_err();
        assert_eq!(err.kind_name(), "RecursionError");
    }
}
