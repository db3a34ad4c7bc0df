//! Tree traversal.
//!
//! Two flavours are provided:
//!
//! - [`Visitor`] borrows the tree and never changes it.
//! - [`Transformer`] takes each node by value and returns its replacement.
//!   The default methods rebuild the node from its visited children, so an
//!   implementation only overrides the shapes it rewrites.
//!
//! Both traverse children in source order. The `walk_*` free functions hold
//! the default behaviour so overrides can fall back to it.

use crate::ast::{
    Alias, Arg, Arguments, Comprehension, ExceptHandler, Expr, ExprKind, Keyword, MatchCase, Module,
    Pattern, PatternKind, Stmt, StmtKind, WithItem,
};
use shroud_core::{ShroudResult, Span};

// =============================================================================
// Read-only traversal
// =============================================================================

/// Read-only traversal.
pub trait Visitor {
    /// Visit a statement.
    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }

    /// Visit an expression.
    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }

    /// Visit a parameter list.
    fn visit_arguments(&mut self, args: &Arguments) {
        walk_arguments(self, args);
    }

    /// Visit a single parameter.
    fn visit_arg(&mut self, arg: &Arg) {
        if let Some(annotation) = &arg.annotation {
            self.visit_expr(annotation);
        }
    }

    /// Visit a keyword argument.
    fn visit_keyword(&mut self, keyword: &Keyword) {
        self.visit_expr(&keyword.value);
    }

    /// Visit an import alias.
    fn visit_alias(&mut self, _alias: &Alias) {}

    /// Visit a comprehension clause.
    fn visit_comprehension(&mut self, comp: &Comprehension) {
        self.visit_expr(&comp.iter);
        self.visit_expr(&comp.target);
        for cond in &comp.ifs {
            self.visit_expr(cond);
        }
    }

    /// Visit an `except` clause.
    fn visit_except_handler(&mut self, handler: &ExceptHandler) {
        if let Some(typ) = &handler.typ {
            self.visit_expr(typ);
        }
        self.visit_body(&handler.body);
    }

    /// Visit a `case` block.
    fn visit_match_case(&mut self, case: &MatchCase) {
        self.visit_pattern(&case.pattern);
        if let Some(guard) = &case.guard {
            self.visit_expr(guard);
        }
        self.visit_body(&case.body);
    }

    /// Visit a pattern. Captured names are plain strings; only value, key
    /// and class expressions reach [`Visitor::visit_expr`].
    fn visit_pattern(&mut self, pattern: &Pattern) {
        walk_pattern(self, pattern);
    }

    /// Visit a statement list.
    fn visit_body(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.visit_stmt(stmt);
        }
    }
}

/// Visit every top-level statement of a module.
pub fn walk_module<V: Visitor + ?Sized>(v: &mut V, module: &Module) {
    v.visit_body(&module.body);
}

/// Visit the children of a statement.
pub fn walk_stmt<V: Visitor + ?Sized>(v: &mut V, stmt: &Stmt) {
    match &stmt.kind {
        StmtKind::FunctionDef {
            args,
            body,
            decorator_list,
            returns,
            ..
        } => {
            for d in decorator_list {
                v.visit_expr(d);
            }
            v.visit_arguments(args);
            if let Some(r) = returns {
                v.visit_expr(r);
            }
            v.visit_body(body);
        }
        StmtKind::ClassDef {
            bases,
            keywords,
            body,
            decorator_list,
            ..
        } => {
            for d in decorator_list {
                v.visit_expr(d);
            }
            for b in bases {
                v.visit_expr(b);
            }
            for k in keywords {
                v.visit_keyword(k);
            }
            v.visit_body(body);
        }
        StmtKind::Return(value) => {
            if let Some(value) = value {
                v.visit_expr(value);
            }
        }
        StmtKind::Delete(targets) => {
            for t in targets {
                v.visit_expr(t);
            }
        }
        StmtKind::Assign { targets, value } => {
            v.visit_expr(value);
            for t in targets {
                v.visit_expr(t);
            }
        }
        StmtKind::AugAssign { target, value, .. } => {
            v.visit_expr(value);
            v.visit_expr(target);
        }
        StmtKind::AnnAssign {
            target,
            annotation,
            value,
            ..
        } => {
            v.visit_expr(annotation);
            if let Some(value) = value {
                v.visit_expr(value);
            }
            v.visit_expr(target);
        }
        StmtKind::For {
            target,
            iter,
            body,
            orelse,
            ..
        } => {
            v.visit_expr(iter);
            v.visit_expr(target);
            v.visit_body(body);
            v.visit_body(orelse);
        }
        StmtKind::While { test, body, orelse } | StmtKind::If { test, body, orelse } => {
            v.visit_expr(test);
            v.visit_body(body);
            v.visit_body(orelse);
        }
        StmtKind::With { items, body, .. } => {
            for item in items {
                v.visit_expr(&item.context_expr);
                if let Some(vars) = &item.optional_vars {
                    v.visit_expr(vars);
                }
            }
            v.visit_body(body);
        }
        StmtKind::Raise { exc, cause } => {
            if let Some(exc) = exc {
                v.visit_expr(exc);
            }
            if let Some(cause) = cause {
                v.visit_expr(cause);
            }
        }
        StmtKind::Match { subject, cases } => {
            v.visit_expr(subject);
            for case in cases {
                v.visit_match_case(case);
            }
        }
        StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        }
        | StmtKind::TryStar {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            v.visit_body(body);
            for h in handlers {
                v.visit_except_handler(h);
            }
            v.visit_body(orelse);
            v.visit_body(finalbody);
        }
        StmtKind::Assert { test, msg } => {
            v.visit_expr(test);
            if let Some(msg) = msg {
                v.visit_expr(msg);
            }
        }
        StmtKind::Import(names) | StmtKind::ImportFrom { names, .. } => {
            for alias in names {
                v.visit_alias(alias);
            }
        }
        StmtKind::Expr(value) => v.visit_expr(value),
        StmtKind::Global(_)
        | StmtKind::Nonlocal(_)
        | StmtKind::Pass
        | StmtKind::Break
        | StmtKind::Continue => {}
    }
}

/// Visit the sub-patterns and expressions of a pattern.
pub fn walk_pattern<V: Visitor + ?Sized>(v: &mut V, pattern: &Pattern) {
    match &pattern.kind {
        PatternKind::Value(value) => v.visit_expr(value),
        PatternKind::Singleton(_) | PatternKind::Star(_) => {}
        PatternKind::Sequence(items) | PatternKind::Or(items) => {
            for item in items {
                v.visit_pattern(item);
            }
        }
        PatternKind::Mapping { keys, patterns, .. } => {
            for (key, value) in keys.iter().zip(patterns) {
                v.visit_expr(key);
                v.visit_pattern(value);
            }
        }
        PatternKind::Class {
            cls,
            patterns,
            kwd_patterns,
            ..
        } => {
            v.visit_expr(cls);
            for item in patterns.iter().chain(kwd_patterns) {
                v.visit_pattern(item);
            }
        }
        PatternKind::As { pattern, .. } => {
            if let Some(inner) = pattern {
                v.visit_pattern(inner);
            }
        }
    }
}

/// Visit parameter annotations and defaults.
pub fn walk_arguments<V: Visitor + ?Sized>(v: &mut V, args: &Arguments) {
    for d in &args.defaults {
        v.visit_expr(d);
    }
    for d in args.kw_defaults.iter().flatten() {
        v.visit_expr(d);
    }
    for arg in args.all_args() {
        v.visit_arg(arg);
    }
}

/// Visit the children of an expression.
pub fn walk_expr<V: Visitor + ?Sized>(v: &mut V, expr: &Expr) {
    match &expr.kind {
        ExprKind::BoolOp { values, .. } => {
            for e in values {
                v.visit_expr(e);
            }
        }
        ExprKind::NamedExpr { target, value } => {
            v.visit_expr(value);
            v.visit_expr(target);
        }
        ExprKind::BinOp { left, right, .. } => {
            v.visit_expr(left);
            v.visit_expr(right);
        }
        ExprKind::UnaryOp { operand, .. } => v.visit_expr(operand),
        ExprKind::Lambda { args, body } => {
            v.visit_arguments(args);
            v.visit_expr(body);
        }
        ExprKind::IfExp { test, body, orelse } => {
            v.visit_expr(test);
            v.visit_expr(body);
            v.visit_expr(orelse);
        }
        ExprKind::Dict { keys, values } => {
            for (k, val) in keys.iter().zip(values) {
                if let Some(k) = k {
                    v.visit_expr(k);
                }
                v.visit_expr(val);
            }
        }
        ExprKind::Set(elts) | ExprKind::List(elts) | ExprKind::Tuple(elts) => {
            for e in elts {
                v.visit_expr(e);
            }
        }
        ExprKind::ListComp { elt, generators }
        | ExprKind::SetComp { elt, generators }
        | ExprKind::GeneratorExp { elt, generators } => {
            for g in generators {
                v.visit_comprehension(g);
            }
            v.visit_expr(elt);
        }
        ExprKind::DictComp {
            key,
            value,
            generators,
        } => {
            for g in generators {
                v.visit_comprehension(g);
            }
            v.visit_expr(key);
            v.visit_expr(value);
        }
        ExprKind::Await(value) | ExprKind::YieldFrom(value) | ExprKind::Starred(value) => {
            v.visit_expr(value);
        }
        ExprKind::Yield(value) => {
            if let Some(value) = value {
                v.visit_expr(value);
            }
        }
        ExprKind::Compare {
            left, comparators, ..
        } => {
            v.visit_expr(left);
            for c in comparators {
                v.visit_expr(c);
            }
        }
        ExprKind::Call {
            func,
            args,
            keywords,
        } => {
            v.visit_expr(func);
            for a in args {
                v.visit_expr(a);
            }
            for k in keywords {
                v.visit_keyword(k);
            }
        }
        ExprKind::FormattedValue {
            value, format_spec, ..
        } => {
            v.visit_expr(value);
            if let Some(spec) = format_spec {
                v.visit_expr(spec);
            }
        }
        ExprKind::JoinedStr(parts) => {
            for p in parts {
                v.visit_expr(p);
            }
        }
        ExprKind::Attribute { value, .. } => v.visit_expr(value),
        ExprKind::Subscript { value, slice } => {
            v.visit_expr(value);
            v.visit_expr(slice);
        }
        ExprKind::Slice { lower, upper, step } => {
            for part in [lower, upper, step].into_iter().flatten() {
                v.visit_expr(part);
            }
        }
        ExprKind::Int(_)
        | ExprKind::BigInt(_)
        | ExprKind::Float(_)
        | ExprKind::Complex { .. }
        | ExprKind::String(_)
        | ExprKind::Bytes(_)
        | ExprKind::Bool(_)
        | ExprKind::None
        | ExprKind::Ellipsis
        | ExprKind::Name { .. } => {}
    }
}

// =============================================================================
// Rebuilding traversal
// =============================================================================

/// Rebuilding traversal: every method consumes a node and returns the node
/// that replaces it.
pub trait Transformer {
    /// Transform a statement.
    fn visit_stmt(&mut self, stmt: Stmt) -> ShroudResult<Stmt> {
        walk_stmt_mut(self, stmt)
    }

    /// Transform an expression.
    fn visit_expr(&mut self, expr: Expr) -> ShroudResult<Expr> {
        walk_expr_mut(self, expr)
    }

    /// Transform a statement list.
    fn visit_body(&mut self, body: Vec<Stmt>) -> ShroudResult<Vec<Stmt>> {
        body.into_iter().map(|s| self.visit_stmt(s)).collect()
    }

    /// Transform a parameter list.
    fn visit_arguments(&mut self, args: Arguments) -> ShroudResult<Arguments> {
        walk_arguments_mut(self, args)
    }

    /// Transform a single parameter.
    fn visit_arg(&mut self, arg: Arg) -> ShroudResult<Arg> {
        Ok(Arg {
            annotation: opt_boxed(self, arg.annotation)?,
            ..arg
        })
    }

    /// Transform a keyword argument.
    fn visit_keyword(&mut self, keyword: Keyword) -> ShroudResult<Keyword> {
        Ok(Keyword {
            value: self.visit_expr(keyword.value)?,
            ..keyword
        })
    }

    /// Transform an import alias.
    fn visit_alias(&mut self, alias: Alias) -> ShroudResult<Alias> {
        Ok(alias)
    }

    /// Transform a comprehension clause.
    fn visit_comprehension(&mut self, comp: Comprehension) -> ShroudResult<Comprehension> {
        let iter = self.visit_expr(comp.iter)?;
        let target = self.visit_expr(comp.target)?;
        Ok(Comprehension {
            target,
            iter,
            ifs: exprs(self, comp.ifs)?,
            is_async: comp.is_async,
        })
    }

    /// Transform an `except` clause.
    fn visit_except_handler(&mut self, handler: ExceptHandler) -> ShroudResult<ExceptHandler> {
        Ok(ExceptHandler {
            typ: opt_boxed(self, handler.typ)?,
            body: self.visit_body(handler.body)?,
            ..handler
        })
    }

    /// Transform a `case` block.
    fn visit_match_case(&mut self, case: MatchCase) -> ShroudResult<MatchCase> {
        Ok(MatchCase {
            pattern: self.visit_pattern(case.pattern)?,
            guard: opt_boxed(self, case.guard)?,
            body: self.visit_body(case.body)?,
        })
    }

    /// Transform a pattern. Patterns only admit literals and dotted names,
    /// which most rewrites would turn into something that no longer parses,
    /// so the default keeps the pattern. Name-aware transformers override
    /// this and use [`walk_pattern_mut`].
    fn visit_pattern(&mut self, pattern: Pattern) -> ShroudResult<Pattern> {
        Ok(pattern)
    }
}

/// Rebuild a pattern from its transformed sub-patterns and expressions.
pub fn walk_pattern_mut<T: Transformer + ?Sized>(t: &mut T, pattern: Pattern) -> ShroudResult<Pattern> {
    let Pattern { kind, span } = pattern;
    let kind = match kind {
        PatternKind::Sequence(items) => PatternKind::Sequence(patterns(t, items)?),
        PatternKind::Or(items) => PatternKind::Or(patterns(t, items)?),
        PatternKind::Mapping {
            keys,
            patterns: values,
            rest,
        } => PatternKind::Mapping {
            keys: exprs(t, keys)?,
            patterns: patterns(t, values)?,
            rest,
        },
        PatternKind::Class {
            cls,
            patterns: positional,
            kwd_attrs,
            kwd_patterns,
        } => PatternKind::Class {
            cls: boxed(t, cls)?,
            patterns: patterns(t, positional)?,
            kwd_attrs,
            kwd_patterns: patterns(t, kwd_patterns)?,
        },
        PatternKind::As { pattern, name } => PatternKind::As {
            pattern: pattern.map(|p| t.visit_pattern(*p).map(Box::new)).transpose()?,
            name,
        },
        PatternKind::Value(value) => PatternKind::Value(boxed(t, value)?),
        leaf @ (PatternKind::Singleton(_) | PatternKind::Star(_)) => leaf,
    };
    Ok(Pattern { kind, span })
}

/// Transform every top-level statement of a module.
pub fn walk_module_mut<T: Transformer + ?Sized>(t: &mut T, module: Module) -> ShroudResult<Module> {
    Ok(Module::new(t.visit_body(module.body)?))
}

fn boxed<T: Transformer + ?Sized>(t: &mut T, expr: Box<Expr>) -> ShroudResult<Box<Expr>> {
    Ok(Box::new(t.visit_expr(*expr)?))
}

fn opt_boxed<T: Transformer + ?Sized>(
    t: &mut T,
    expr: Option<Box<Expr>>,
) -> ShroudResult<Option<Box<Expr>>> {
    expr.map(|e| boxed(t, e)).transpose()
}

fn exprs<T: Transformer + ?Sized>(t: &mut T, exprs: Vec<Expr>) -> ShroudResult<Vec<Expr>> {
    exprs.into_iter().map(|e| t.visit_expr(e)).collect()
}

fn patterns<T: Transformer + ?Sized>(t: &mut T, items: Vec<Pattern>) -> ShroudResult<Vec<Pattern>> {
    items.into_iter().map(|p| t.visit_pattern(p)).collect()
}

fn comprehensions<T: Transformer + ?Sized>(
    t: &mut T,
    generators: Vec<Comprehension>,
) -> ShroudResult<Vec<Comprehension>> {
    generators
        .into_iter()
        .map(|g| t.visit_comprehension(g))
        .collect()
}

/// Rebuild a statement from its transformed children.
pub fn walk_stmt_mut<T: Transformer + ?Sized>(t: &mut T, stmt: Stmt) -> ShroudResult<Stmt> {
    let Stmt { kind, span } = stmt;
    let kind = match kind {
        StmtKind::FunctionDef {
            name,
            args,
            body,
            decorator_list,
            returns,
            is_async,
        } => StmtKind::FunctionDef {
            decorator_list: exprs(t, decorator_list)?,
            args: Box::new(t.visit_arguments(*args)?),
            returns: opt_boxed(t, returns)?,
            body: t.visit_body(body)?,
            name,
            is_async,
        },
        StmtKind::ClassDef {
            name,
            bases,
            keywords,
            body,
            decorator_list,
        } => StmtKind::ClassDef {
            decorator_list: exprs(t, decorator_list)?,
            bases: exprs(t, bases)?,
            keywords: keywords
                .into_iter()
                .map(|k| t.visit_keyword(k))
                .collect::<ShroudResult<_>>()?,
            body: t.visit_body(body)?,
            name,
        },
        StmtKind::Return(value) => StmtKind::Return(opt_boxed(t, value)?),
        StmtKind::Delete(targets) => StmtKind::Delete(exprs(t, targets)?),
        StmtKind::Assign { targets, value } => {
            let value = boxed(t, value)?;
            StmtKind::Assign {
                targets: exprs(t, targets)?,
                value,
            }
        }
        StmtKind::AugAssign { target, op, value } => {
            let value = boxed(t, value)?;
            StmtKind::AugAssign {
                target: boxed(t, target)?,
                op,
                value,
            }
        }
        StmtKind::AnnAssign {
            target,
            annotation,
            value,
            simple,
        } => {
            let annotation = boxed(t, annotation)?;
            let value = opt_boxed(t, value)?;
            StmtKind::AnnAssign {
                target: boxed(t, target)?,
                annotation,
                value,
                simple,
            }
        }
        StmtKind::For {
            target,
            iter,
            body,
            orelse,
            is_async,
        } => {
            let iter = boxed(t, iter)?;
            StmtKind::For {
                target: boxed(t, target)?,
                iter,
                body: t.visit_body(body)?,
                orelse: t.visit_body(orelse)?,
                is_async,
            }
        }
        StmtKind::While { test, body, orelse } => StmtKind::While {
            test: boxed(t, test)?,
            body: t.visit_body(body)?,
            orelse: t.visit_body(orelse)?,
        },
        StmtKind::If { test, body, orelse } => StmtKind::If {
            test: boxed(t, test)?,
            body: t.visit_body(body)?,
            orelse: t.visit_body(orelse)?,
        },
        StmtKind::With {
            items,
            body,
            is_async,
        } => StmtKind::With {
            items: items
                .into_iter()
                .map(|item| {
                    Ok(WithItem {
                        context_expr: t.visit_expr(item.context_expr)?,
                        optional_vars: opt_boxed(t, item.optional_vars)?,
                    })
                })
                .collect::<ShroudResult<_>>()?,
            body: t.visit_body(body)?,
            is_async,
        },
        StmtKind::Raise { exc, cause } => StmtKind::Raise {
            exc: opt_boxed(t, exc)?,
            cause: opt_boxed(t, cause)?,
        },
        StmtKind::Match { subject, cases } => StmtKind::Match {
            subject: boxed(t, subject)?,
            cases: cases
                .into_iter()
                .map(|c| t.visit_match_case(c))
                .collect::<ShroudResult<_>>()?,
        },
        StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => StmtKind::Try {
            body: t.visit_body(body)?,
            handlers: handlers
                .into_iter()
                .map(|h| t.visit_except_handler(h))
                .collect::<ShroudResult<_>>()?,
            orelse: t.visit_body(orelse)?,
            finalbody: t.visit_body(finalbody)?,
        },
        StmtKind::TryStar {
            body,
            handlers,
            orelse,
            finalbody,
        } => StmtKind::TryStar {
            body: t.visit_body(body)?,
            handlers: handlers
                .into_iter()
                .map(|h| t.visit_except_handler(h))
                .collect::<ShroudResult<_>>()?,
            orelse: t.visit_body(orelse)?,
            finalbody: t.visit_body(finalbody)?,
        },
        StmtKind::Assert { test, msg } => StmtKind::Assert {
            test: boxed(t, test)?,
            msg: opt_boxed(t, msg)?,
        },
        StmtKind::Import(names) => StmtKind::Import(
            names
                .into_iter()
                .map(|a| t.visit_alias(a))
                .collect::<ShroudResult<_>>()?,
        ),
        StmtKind::ImportFrom {
            module,
            names,
            level,
        } => StmtKind::ImportFrom {
            names: names
                .into_iter()
                .map(|a| t.visit_alias(a))
                .collect::<ShroudResult<_>>()?,
            module,
            level,
        },
        StmtKind::Expr(value) => StmtKind::Expr(boxed(t, value)?),
        kind @ (StmtKind::Global(_)
        | StmtKind::Nonlocal(_)
        | StmtKind::Pass
        | StmtKind::Break
        | StmtKind::Continue) => kind,
    };
    Ok(Stmt { kind, span })
}

/// Rebuild a parameter list from its transformed parts.
pub fn walk_arguments_mut<T: Transformer + ?Sized>(
    t: &mut T,
    args: Arguments,
) -> ShroudResult<Arguments> {
    let defaults = exprs(t, args.defaults)?;
    let kw_defaults = args
        .kw_defaults
        .into_iter()
        .map(|d| d.map(|d| t.visit_expr(d)).transpose())
        .collect::<ShroudResult<_>>()?;
    let mut visit_all = |list: Vec<Arg>| -> ShroudResult<Vec<Arg>> {
        list.into_iter().map(|a| t.visit_arg(a)).collect()
    };
    let posonlyargs = visit_all(args.posonlyargs)?;
    let plain = visit_all(args.args)?;
    let vararg = args.vararg.map(|a| t.visit_arg(a)).transpose()?;
    let kwonlyargs = args
        .kwonlyargs
        .into_iter()
        .map(|a| t.visit_arg(a))
        .collect::<ShroudResult<_>>()?;
    let kwarg = args.kwarg.map(|a| t.visit_arg(a)).transpose()?;
    Ok(Arguments {
        posonlyargs,
        args: plain,
        vararg,
        kwonlyargs,
        kw_defaults,
        kwarg,
        defaults,
    })
}

/// Rebuild an expression from its transformed children.
pub fn walk_expr_mut<T: Transformer + ?Sized>(t: &mut T, expr: Expr) -> ShroudResult<Expr> {
    let Expr { kind, span } = expr;
    let kind = match kind {
        ExprKind::BoolOp { op, values } => ExprKind::BoolOp {
            op,
            values: exprs(t, values)?,
        },
        ExprKind::NamedExpr { target, value } => {
            let value = boxed(t, value)?;
            ExprKind::NamedExpr {
                target: boxed(t, target)?,
                value,
            }
        }
        ExprKind::BinOp { left, op, right } => ExprKind::BinOp {
            left: boxed(t, left)?,
            op,
            right: boxed(t, right)?,
        },
        ExprKind::UnaryOp { op, operand } => ExprKind::UnaryOp {
            op,
            operand: boxed(t, operand)?,
        },
        ExprKind::Lambda { args, body } => ExprKind::Lambda {
            args: Box::new(t.visit_arguments(*args)?),
            body: boxed(t, body)?,
        },
        ExprKind::IfExp { test, body, orelse } => ExprKind::IfExp {
            test: boxed(t, test)?,
            body: boxed(t, body)?,
            orelse: boxed(t, orelse)?,
        },
        ExprKind::Dict { keys, values } => {
            let mut new_keys = Vec::with_capacity(keys.len());
            let mut new_values = Vec::with_capacity(values.len());
            for (k, v) in keys.into_iter().zip(values) {
                new_keys.push(k.map(|k| t.visit_expr(k)).transpose()?);
                new_values.push(t.visit_expr(v)?);
            }
            ExprKind::Dict {
                keys: new_keys,
                values: new_values,
            }
        }
        ExprKind::Set(elts) => ExprKind::Set(exprs(t, elts)?),
        ExprKind::List(elts) => ExprKind::List(exprs(t, elts)?),
        ExprKind::Tuple(elts) => ExprKind::Tuple(exprs(t, elts)?),
        ExprKind::ListComp { elt, generators } => {
            let generators = comprehensions(t, generators)?;
            ExprKind::ListComp {
                elt: boxed(t, elt)?,
                generators,
            }
        }
        ExprKind::SetComp { elt, generators } => {
            let generators = comprehensions(t, generators)?;
            ExprKind::SetComp {
                elt: boxed(t, elt)?,
                generators,
            }
        }
        ExprKind::GeneratorExp { elt, generators } => {
            let generators = comprehensions(t, generators)?;
            ExprKind::GeneratorExp {
                elt: boxed(t, elt)?,
                generators,
            }
        }
        ExprKind::DictComp {
            key,
            value,
            generators,
        } => {
            let generators = comprehensions(t, generators)?;
            ExprKind::DictComp {
                key: boxed(t, key)?,
                value: boxed(t, value)?,
                generators,
            }
        }
        ExprKind::Await(value) => ExprKind::Await(boxed(t, value)?),
        ExprKind::Yield(value) => ExprKind::Yield(opt_boxed(t, value)?),
        ExprKind::YieldFrom(value) => ExprKind::YieldFrom(boxed(t, value)?),
        ExprKind::Starred(value) => ExprKind::Starred(boxed(t, value)?),
        ExprKind::Compare {
            left,
            ops,
            comparators,
        } => ExprKind::Compare {
            left: boxed(t, left)?,
            ops,
            comparators: exprs(t, comparators)?,
        },
        ExprKind::Call {
            func,
            args,
            keywords,
        } => ExprKind::Call {
            func: boxed(t, func)?,
            args: exprs(t, args)?,
            keywords: keywords
                .into_iter()
                .map(|k| t.visit_keyword(k))
                .collect::<ShroudResult<_>>()?,
        },
        ExprKind::FormattedValue {
            value,
            conversion,
            format_spec,
        } => ExprKind::FormattedValue {
            value: boxed(t, value)?,
            conversion,
            format_spec: opt_boxed(t, format_spec)?,
        },
        ExprKind::JoinedStr(parts) => ExprKind::JoinedStr(exprs(t, parts)?),
        ExprKind::Attribute { value, attr } => ExprKind::Attribute {
            value: boxed(t, value)?,
            attr,
        },
        ExprKind::Subscript { value, slice } => ExprKind::Subscript {
            value: boxed(t, value)?,
            slice: boxed(t, slice)?,
        },
        ExprKind::Slice { lower, upper, step } => ExprKind::Slice {
            lower: opt_boxed(t, lower)?,
            upper: opt_boxed(t, upper)?,
            step: opt_boxed(t, step)?,
        },
        leaf @ (ExprKind::Int(_)
        | ExprKind::BigInt(_)
        | ExprKind::Float(_)
        | ExprKind::Complex { .. }
        | ExprKind::String(_)
        | ExprKind::Bytes(_)
        | ExprKind::Bool(_)
        | ExprKind::None
        | ExprKind::Ellipsis
        | ExprKind::Name { .. }) => leaf,
    };
    Ok(Expr { kind, span })
}

// =============================================================================
// Location repair
// =============================================================================

/// Give every node with a missing location the location of its nearest
/// located ancestor. Nodes with no located ancestor get line 1, column 0.
pub fn fix_missing_locations(module: Module) -> ShroudResult<Module> {
    let mut fixer = LocationFixer {
        parent: Span::point(1, 0),
    };
    walk_module_mut(&mut fixer, module)
}

struct LocationFixer {
    parent: Span,
}

impl LocationFixer {
    fn enter(&mut self, span: &mut Span) -> Span {
        *span = span.or(self.parent);
        std::mem::replace(&mut self.parent, *span)
    }
}

impl Transformer for LocationFixer {
    fn visit_stmt(&mut self, mut stmt: Stmt) -> ShroudResult<Stmt> {
        let saved = self.enter(&mut stmt.span);
        let stmt = walk_stmt_mut(self, stmt);
        self.parent = saved;
        stmt
    }

    fn visit_expr(&mut self, mut expr: Expr) -> ShroudResult<Expr> {
        let saved = self.enter(&mut expr.span);
        let expr = walk_expr_mut(self, expr);
        self.parent = saved;
        expr
    }

    fn visit_arg(&mut self, mut arg: Arg) -> ShroudResult<Arg> {
        arg.span = arg.span.or(self.parent);
        Ok(Arg {
            annotation: opt_boxed(self, arg.annotation)?,
            ..arg
        })
    }

    fn visit_keyword(&mut self, mut keyword: Keyword) -> ShroudResult<Keyword> {
        keyword.span = keyword.span.or(self.parent);
        Ok(Keyword {
            value: self.visit_expr(keyword.value)?,
            ..keyword
        })
    }

    fn visit_alias(&mut self, mut alias: Alias) -> ShroudResult<Alias> {
        alias.span = alias.span.or(self.parent);
        Ok(alias)
    }

    fn visit_except_handler(&mut self, mut handler: ExceptHandler) -> ShroudResult<ExceptHandler> {
        let saved = self.enter(&mut handler.span);
        let typ = opt_boxed(self, handler.typ);
        let body = self.visit_body(handler.body);
        self.parent = saved;
        Ok(ExceptHandler {
            typ: typ?,
            body: body?,
            ..handler
        })
    }
}

/// Location of the first node that is missing one, if any.
#[must_use]
pub fn find_missing_location(module: &Module) -> Option<Span> {
    struct Finder {
        found: Option<Span>,
    }

    impl Visitor for Finder {
        fn visit_stmt(&mut self, stmt: &Stmt) {
            if self.found.is_some() {
                return;
            }
            if stmt.span.is_dummy() {
                self.found = Some(stmt.span);
                return;
            }
            walk_stmt(self, stmt);
        }

        fn visit_expr(&mut self, expr: &Expr) {
            if self.found.is_some() {
                return;
            }
            if expr.span.is_dummy() {
                self.found = Some(expr.span);
                return;
            }
            walk_expr(self, expr);
        }

        fn visit_arg(&mut self, arg: &Arg) {
            if arg.span.is_dummy() && self.found.is_none() {
                self.found = Some(arg.span);
            }
            if let Some(annotation) = &arg.annotation {
                self.visit_expr(annotation);
            }
        }

        fn visit_keyword(&mut self, keyword: &Keyword) {
            if keyword.span.is_dummy() && self.found.is_none() {
                self.found = Some(keyword.span);
            }
            self.visit_expr(&keyword.value);
        }

        fn visit_alias(&mut self, alias: &Alias) {
            if alias.span.is_dummy() && self.found.is_none() {
                self.found = Some(alias.span);
            }
        }
    }

    let mut finder = Finder { found: None };
    walk_module(&mut finder, module);
    finder.found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinOp, ExprContext};
    use crate::parser::parse;
    use shroud_core::Pos;

    struct NameCounter {
        loads: usize,
        stores: usize,
    }

    impl Visitor for NameCounter {
        fn visit_expr(&mut self, expr: &Expr) {
            if let ExprKind::Name { ctx, .. } = &expr.kind {
                match ctx {
                    ExprContext::Store => self.stores += 1,
                    _ => self.loads += 1,
                }
            }
            walk_expr(self, expr);
        }
    }

    #[test]
    fn test_visitor_reaches_nested_names() {
        let module = parse("def f(a=b):\n    x = [y for y in z if w]\n").unwrap();
        let mut counter = NameCounter {
            loads: 0,
            stores: 0,
        };
        walk_module(&mut counter, &module);
        // b, y (elt), z, w
        assert_eq!(counter.loads, 4);
        // x, y (target)
        assert_eq!(counter.stores, 2);
    }

    struct IntDoubler;

    impl Transformer for IntDoubler {
        fn visit_expr(&mut self, expr: Expr) -> ShroudResult<Expr> {
            match expr.kind {
                ExprKind::Int(v) => Ok(Expr::new(ExprKind::Int(v * 2), expr.span)),
                _ => walk_expr_mut(self, expr),
            }
        }
    }

    #[test]
    fn test_visitor_enters_match_cases() {
        let module = parse("match s:\n    case Color.RED | [x, *_]:\n        y = x\n").unwrap();
        let mut counter = NameCounter {
            loads: 0,
            stores: 0,
        };
        walk_module(&mut counter, &module);
        // s, Color, x (body)
        assert_eq!(counter.loads, 3);
        // y
        assert_eq!(counter.stores, 1);
    }

    #[test]
    fn test_transformer_keeps_patterns() {
        let module = parse("match v:\n    case 1 | 2:\n        x = 3\n").unwrap();
        let out = walk_module_mut(&mut IntDoubler, module).unwrap();
        assert_eq!(
            crate::unparse::unparse(&out),
            "match v:\n    case 1 | 2:\n        x = 6\n"
        );
    }

    #[test]
    fn test_transformer_rebuilds() {
        let module = parse("x = f(1, k=2)[3]\n").unwrap();
        let out = walk_module_mut(&mut IntDoubler, module).unwrap();
        assert_eq!(crate::unparse::unparse(&out), "x = f(2, k=4)[6]\n");
    }

    #[test]
    fn test_fix_missing_locations_inherits_parent() {
        let mut module = parse("\n\ny = 0\n").unwrap();
        let StmtKind::Assign { value, .. } = &mut module.body[0].kind else {
            panic!("expected assign");
        };
        **value = Expr::binop(Expr::int(1), BinOp::Add, Expr::int(2));
        assert!(find_missing_location(&module).is_some());

        let fixed = fix_missing_locations(module).unwrap();
        assert_eq!(find_missing_location(&fixed), None);
        let StmtKind::Assign { value, .. } = &fixed.body[0].kind else {
            panic!("expected assign");
        };
        assert_eq!(value.span.start, Pos::new(3, 0));
    }

    #[test]
    fn test_fix_missing_locations_root_default() {
        let module = Module::new(vec![Stmt::synthetic(StmtKind::Pass)]);
        let fixed = fix_missing_locations(module).unwrap();
        assert_eq!(fixed.body[0].span, Span::point(1, 0));
    }
}
