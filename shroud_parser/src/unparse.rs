//! AST to source rendering.
//!
//! The output is valid Python 3.11 that parses back to the same tree.
//! Parentheses are inserted from operator precedence only, so redundant
//! grouping in the input is not preserved.

use crate::ast::{
    Alias, Arguments, BinOp, BoolOp, Comprehension, ExceptHandler, Expr, ExprKind, Keyword,
    MatchCase, Module, Pattern, PatternKind, Stmt, StmtKind, UnaryOp, WithItem,
};
use std::fmt::Write;

/// Render a module to source text.
#[must_use]
pub fn unparse(module: &Module) -> String {
    let mut u = Unparser::default();
    u.body(&module.body);
    u.out
}

/// Render a single statement (and its nested block) to source text.
#[must_use]
pub fn unparse_stmt(stmt: &Stmt) -> String {
    let mut u = Unparser::default();
    u.stmt(stmt);
    u.out
}

/// Render a single expression.
#[must_use]
pub fn unparse_expr(expr: &Expr) -> String {
    let mut u = Unparser::default();
    u.expr(expr, Prec::Tuple);
    u.out
}

/// Expression precedence, lowest binding first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    NamedExpr,
    Tuple,
    Yield,
    Test,
    Or,
    And,
    Not,
    Cmp,
    BOr,
    BXor,
    BAnd,
    Shift,
    Arith,
    Term,
    Factor,
    Power,
    Await,
    Atom,
}

impl Prec {
    const fn next(self) -> Self {
        match self {
            Self::NamedExpr => Self::Tuple,
            Self::Tuple => Self::Yield,
            Self::Yield => Self::Test,
            Self::Test => Self::Or,
            Self::Or => Self::And,
            Self::And => Self::Not,
            Self::Not => Self::Cmp,
            Self::Cmp => Self::BOr,
            Self::BOr => Self::BXor,
            Self::BXor => Self::BAnd,
            Self::BAnd => Self::Shift,
            Self::Shift => Self::Arith,
            Self::Arith => Self::Term,
            Self::Term => Self::Factor,
            Self::Factor => Self::Power,
            Self::Power => Self::Await,
            Self::Await | Self::Atom => Self::Atom,
        }
    }

    const fn of_binop(op: BinOp) -> Self {
        match op {
            BinOp::Add | BinOp::Sub => Self::Arith,
            BinOp::Mult | BinOp::MatMult | BinOp::Div | BinOp::Mod | BinOp::FloorDiv => Self::Term,
            BinOp::Pow => Self::Power,
            BinOp::LShift | BinOp::RShift => Self::Shift,
            BinOp::BitOr => Self::BOr,
            BinOp::BitXor => Self::BXor,
            BinOp::BitAnd => Self::BAnd,
        }
    }
}

#[derive(Default)]
struct Unparser {
    out: String,
    indent: usize,
}

impl Unparser {
    // =========================================================================
    // Statements
    // =========================================================================

    fn line(&mut self) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
    }

    fn body(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.stmt(stmt);
        }
    }

    fn block(&mut self, body: &[Stmt]) {
        self.out.push_str(":\n");
        self.indent += 1;
        if body.is_empty() {
            self.line();
            self.out.push_str("pass\n");
        } else {
            self.body(body);
        }
        self.indent -= 1;
    }

    fn else_block(&mut self, orelse: &[Stmt]) {
        if !orelse.is_empty() {
            self.line();
            self.out.push_str("else");
            self.block(orelse);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::FunctionDef {
                name,
                args,
                body,
                decorator_list,
                returns,
                is_async,
            } => {
                self.decorators(decorator_list);
                self.line();
                if *is_async {
                    self.out.push_str("async ");
                }
                let _ = write!(self.out, "def {name}(");
                self.arguments(args, true);
                self.out.push(')');
                if let Some(returns) = returns {
                    self.out.push_str(" -> ");
                    self.expr(returns, Prec::Test);
                }
                self.block(body);
            }
            StmtKind::ClassDef {
                name,
                bases,
                keywords,
                body,
                decorator_list,
            } => {
                self.decorators(decorator_list);
                self.line();
                let _ = write!(self.out, "class {name}");
                if !bases.is_empty() || !keywords.is_empty() {
                    self.out.push('(');
                    self.call_args(bases, keywords);
                    self.out.push(')');
                }
                self.block(body);
            }
            StmtKind::If { test, body, orelse } => {
                self.line();
                self.out.push_str("if ");
                self.expr(test, Prec::Test);
                self.block(body);
                self.elif_chain(orelse);
            }
            StmtKind::While { test, body, orelse } => {
                self.line();
                self.out.push_str("while ");
                self.expr(test, Prec::Test);
                self.block(body);
                self.else_block(orelse);
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
                is_async,
            } => {
                self.line();
                if *is_async {
                    self.out.push_str("async ");
                }
                self.out.push_str("for ");
                self.expr(target, Prec::Tuple);
                self.out.push_str(" in ");
                self.expr(iter, Prec::Test);
                self.block(body);
                self.else_block(orelse);
            }
            StmtKind::With {
                items,
                body,
                is_async,
            } => {
                self.line();
                if *is_async {
                    self.out.push_str("async ");
                }
                self.out.push_str("with ");
                self.with_items(items);
                self.block(body);
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
                let star = matches!(stmt.kind, StmtKind::TryStar { .. });
                self.line();
                self.out.push_str("try");
                self.block(body);
                for handler in handlers {
                    self.handler(handler, star);
                }
                self.else_block(orelse);
                if !finalbody.is_empty() {
                    self.line();
                    self.out.push_str("finally");
                    self.block(finalbody);
                }
            }
            StmtKind::Match { subject, cases } => {
                self.line();
                self.out.push_str("match ");
                self.expr(subject, Prec::Tuple);
                self.out.push_str(":\n");
                self.indent += 1;
                for case in cases {
                    self.case(case);
                }
                self.indent -= 1;
            }
            simple => {
                self.line();
                self.simple_stmt(simple);
                self.out.push('\n');
            }
        }
    }

    fn case(&mut self, case: &MatchCase) {
        self.line();
        self.out.push_str("case ");
        self.pattern(&case.pattern, false);
        if let Some(guard) = &case.guard {
            self.out.push_str(" if ");
            self.expr(guard, Prec::Test);
        }
        self.block(&case.body);
    }

    /// `closed` marks positions that only accept a closed pattern, where
    /// `|` and `as` need parentheses.
    fn pattern(&mut self, pattern: &Pattern, closed: bool) {
        match &pattern.kind {
            PatternKind::Value(value) => self.expr(value, Prec::Arith),
            PatternKind::Singleton(None) => self.out.push_str("None"),
            PatternKind::Singleton(Some(true)) => self.out.push_str("True"),
            PatternKind::Singleton(Some(false)) => self.out.push_str("False"),
            PatternKind::Sequence(items) => {
                self.out.push('[');
                self.patterns(items);
                self.out.push(']');
            }
            PatternKind::Mapping { keys, patterns, rest } => {
                self.out.push('{');
                for (i, (key, value)) in keys.iter().zip(patterns).enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.expr(key, Prec::Arith);
                    self.out.push_str(": ");
                    self.pattern(value, false);
                }
                if let Some(rest) = rest {
                    if !keys.is_empty() {
                        self.out.push_str(", ");
                    }
                    let _ = write!(self.out, "**{rest}");
                }
                self.out.push('}');
            }
            PatternKind::Class {
                cls,
                patterns,
                kwd_attrs,
                kwd_patterns,
            } => {
                self.expr(cls, Prec::Atom);
                self.out.push('(');
                self.patterns(patterns);
                for (i, (attr, value)) in kwd_attrs.iter().zip(kwd_patterns).enumerate() {
                    if i > 0 || !patterns.is_empty() {
                        self.out.push_str(", ");
                    }
                    let _ = write!(self.out, "{attr}=");
                    self.pattern(value, false);
                }
                self.out.push(')');
            }
            PatternKind::Star(name) => {
                let _ = write!(self.out, "*{}", name.as_deref().unwrap_or("_"));
            }
            PatternKind::As { pattern: None, name } => {
                self.out.push_str(name.as_deref().unwrap_or("_"));
            }
            PatternKind::As {
                pattern: Some(inner),
                name,
            } => {
                if closed {
                    self.out.push('(');
                }
                self.pattern(inner, !matches!(inner.kind, PatternKind::Or(_)));
                let _ = write!(self.out, " as {}", name.as_deref().unwrap_or("_"));
                if closed {
                    self.out.push(')');
                }
            }
            PatternKind::Or(alternatives) => {
                if closed {
                    self.out.push('(');
                }
                for (i, alternative) in alternatives.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(" | ");
                    }
                    self.pattern(alternative, true);
                }
                if closed {
                    self.out.push(')');
                }
            }
        }
    }

    fn patterns(&mut self, items: &[Pattern]) {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.pattern(item, false);
        }
    }

    fn elif_chain(&mut self, orelse: &[Stmt]) {
        if let [
            Stmt {
                kind: StmtKind::If { test, body, orelse },
                ..
            },
        ] = orelse
        {
            self.line();
            self.out.push_str("elif ");
            self.expr(test, Prec::Test);
            self.block(body);
            self.elif_chain(orelse);
        } else {
            self.else_block(orelse);
        }
    }

    fn decorators(&mut self, decorators: &[Expr]) {
        for decorator in decorators {
            self.line();
            self.out.push('@');
            self.expr(decorator, Prec::Test);
            self.out.push('\n');
        }
    }

    fn with_items(&mut self, items: &[WithItem]) {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.expr(&item.context_expr, Prec::Test);
            if let Some(vars) = &item.optional_vars {
                self.out.push_str(" as ");
                self.expr(vars, Prec::Test);
            }
        }
    }

    fn handler(&mut self, handler: &ExceptHandler, star: bool) {
        self.line();
        self.out.push_str(if star { "except*" } else { "except" });
        if let Some(typ) = &handler.typ {
            self.out.push(' ');
            self.expr(typ, Prec::Test);
        }
        if let Some(name) = &handler.name {
            let _ = write!(self.out, " as {name}");
        }
        self.block(&handler.body);
    }

    fn simple_stmt(&mut self, kind: &StmtKind) {
        match kind {
            StmtKind::Return(value) => {
                self.out.push_str("return");
                if let Some(value) = value {
                    self.out.push(' ');
                    self.expr(value, Prec::Tuple);
                }
            }
            StmtKind::Delete(targets) => {
                self.out.push_str("del ");
                self.comma_separated(targets, Prec::Test);
            }
            StmtKind::Assign { targets, value } => {
                for target in targets {
                    self.expr(target, Prec::Tuple);
                    self.out.push_str(" = ");
                }
                self.expr(value, Prec::Tuple);
            }
            StmtKind::AugAssign { target, op, value } => {
                self.expr(target, Prec::Tuple);
                let _ = write!(self.out, " {}= ", op.symbol());
                self.expr(value, Prec::Tuple);
            }
            StmtKind::AnnAssign {
                target,
                annotation,
                value,
                simple,
            } => {
                let wrap = !simple && target.as_name().is_some();
                if wrap {
                    self.out.push('(');
                }
                self.expr(target, Prec::Tuple);
                if wrap {
                    self.out.push(')');
                }
                self.out.push_str(": ");
                self.expr(annotation, Prec::Test);
                if let Some(value) = value {
                    self.out.push_str(" = ");
                    self.expr(value, Prec::Tuple);
                }
            }
            StmtKind::Raise { exc, cause } => {
                self.out.push_str("raise");
                if let Some(exc) = exc {
                    self.out.push(' ');
                    self.expr(exc, Prec::Test);
                }
                if let Some(cause) = cause {
                    self.out.push_str(" from ");
                    self.expr(cause, Prec::Test);
                }
            }
            StmtKind::Assert { test, msg } => {
                self.out.push_str("assert ");
                self.expr(test, Prec::Test);
                if let Some(msg) = msg {
                    self.out.push_str(", ");
                    self.expr(msg, Prec::Test);
                }
            }
            StmtKind::Import(names) => {
                self.out.push_str("import ");
                self.aliases(names);
            }
            StmtKind::ImportFrom {
                module,
                names,
                level,
            } => {
                self.out.push_str("from ");
                for _ in 0..*level {
                    self.out.push('.');
                }
                if let Some(module) = module {
                    self.out.push_str(module);
                }
                self.out.push_str(" import ");
                self.aliases(names);
            }
            StmtKind::Global(names) => {
                let _ = write!(self.out, "global {}", names.join(", "));
            }
            StmtKind::Nonlocal(names) => {
                let _ = write!(self.out, "nonlocal {}", names.join(", "));
            }
            StmtKind::Expr(value) => self.expr(value, Prec::Yield),
            StmtKind::Pass => self.out.push_str("pass"),
            StmtKind::Break => self.out.push_str("break"),
            StmtKind::Continue => self.out.push_str("continue"),
            StmtKind::FunctionDef { .. }
            | StmtKind::ClassDef { .. }
            | StmtKind::If { .. }
            | StmtKind::While { .. }
            | StmtKind::For { .. }
            | StmtKind::With { .. }
            | StmtKind::Match { .. }
            | StmtKind::Try { .. }
            | StmtKind::TryStar { .. } => {}
        }
    }

    fn aliases(&mut self, names: &[Alias]) {
        for (i, alias) in names.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.out.push_str(&alias.name);
            if let Some(asname) = &alias.asname {
                let _ = write!(self.out, " as {asname}");
            }
        }
    }

    fn arguments(&mut self, args: &Arguments, annotations: bool) {
        let mut first = true;
        let mut sep = |out: &mut String| {
            if !first {
                out.push_str(", ");
            }
            first = false;
        };

        let positional: Vec<_> = args.posonlyargs.iter().chain(&args.args).collect();
        let default_offset = positional.len().saturating_sub(args.defaults.len());
        for (i, arg) in positional.iter().enumerate() {
            sep(&mut self.out);
            self.arg(&arg.arg, arg.annotation.as_deref(), annotations);
            if i >= default_offset {
                self.out.push('=');
                self.expr(&args.defaults[i - default_offset], Prec::Test);
            }
            if i + 1 == args.posonlyargs.len() {
                self.out.push_str(", /");
            }
        }

        if args.vararg.is_some() || !args.kwonlyargs.is_empty() {
            sep(&mut self.out);
            self.out.push('*');
            if let Some(vararg) = &args.vararg {
                self.arg(&vararg.arg, vararg.annotation.as_deref(), annotations);
            }
        }

        for (i, arg) in args.kwonlyargs.iter().enumerate() {
            sep(&mut self.out);
            self.arg(&arg.arg, arg.annotation.as_deref(), annotations);
            if let Some(Some(default)) = args.kw_defaults.get(i) {
                self.out.push('=');
                self.expr(default, Prec::Test);
            }
        }

        if let Some(kwarg) = &args.kwarg {
            sep(&mut self.out);
            self.out.push_str("**");
            self.arg(&kwarg.arg, kwarg.annotation.as_deref(), annotations);
        }
    }

    fn arg(&mut self, name: &str, annotation: Option<&Expr>, annotations: bool) {
        self.out.push_str(name);
        if let (true, Some(annotation)) = (annotations, annotation) {
            self.out.push_str(": ");
            self.expr(annotation, Prec::Test);
        }
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn comma_separated(&mut self, items: &[Expr], prec: Prec) {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.expr(item, prec);
        }
    }

    fn open(&mut self, needed: bool) {
        if needed {
            self.out.push('(');
        }
    }

    fn close(&mut self, needed: bool) {
        if needed {
            self.out.push(')');
        }
    }

    fn expr(&mut self, expr: &Expr, prec: Prec) {
        match &expr.kind {
            ExprKind::BoolOp { op, values } => {
                let own = if *op == BoolOp::And { Prec::And } else { Prec::Or };
                let word = if *op == BoolOp::And { " and " } else { " or " };
                let parens = prec > own;
                self.open(parens);
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(word);
                    }
                    self.expr(value, own.next());
                }
                self.close(parens);
            }
            ExprKind::NamedExpr { target, value } => {
                let parens = prec > Prec::NamedExpr;
                self.open(parens);
                self.expr(target, Prec::Atom);
                self.out.push_str(" := ");
                self.expr(value, Prec::Atom);
                self.close(parens);
            }
            ExprKind::BinOp { left, op, right } => {
                let own = Prec::of_binop(*op);
                let parens = prec > own;
                let (left_prec, right_prec) = if *op == BinOp::Pow {
                    (own.next(), own)
                } else {
                    (own, own.next())
                };
                self.open(parens);
                self.expr(left, left_prec);
                let _ = write!(self.out, " {} ", op.symbol());
                self.expr(right, right_prec);
                self.close(parens);
            }
            ExprKind::UnaryOp { op, operand } => {
                let (own, symbol) = match op {
                    UnaryOp::Not => (Prec::Not, "not "),
                    UnaryOp::Invert => (Prec::Factor, "~"),
                    UnaryOp::UAdd => (Prec::Factor, "+"),
                    UnaryOp::USub => (Prec::Factor, "-"),
                };
                let parens = prec > own;
                self.open(parens);
                self.out.push_str(symbol);
                // Keep `- -x` from fusing into a decrement-looking token pair.
                if matches!(op, UnaryOp::USub | UnaryOp::UAdd)
                    && matches!(operand.kind, ExprKind::UnaryOp { op: UnaryOp::USub | UnaryOp::UAdd, .. })
                {
                    self.out.push(' ');
                }
                self.expr(operand, own);
                self.close(parens);
            }
            ExprKind::Lambda { args, body } => {
                let parens = prec > Prec::Test;
                self.open(parens);
                self.out.push_str("lambda");
                let mut params = Unparser::default();
                params.arguments(args, false);
                if !params.out.is_empty() {
                    self.out.push(' ');
                    self.out.push_str(&params.out);
                }
                self.out.push_str(": ");
                self.expr(body, Prec::Test);
                self.close(parens);
            }
            ExprKind::IfExp { test, body, orelse } => {
                let parens = prec > Prec::Test;
                self.open(parens);
                self.expr(body, Prec::Test.next());
                self.out.push_str(" if ");
                self.expr(test, Prec::Test.next());
                self.out.push_str(" else ");
                self.expr(orelse, Prec::Test);
                self.close(parens);
            }
            ExprKind::Dict { keys, values } => {
                self.out.push('{');
                for (i, (key, value)) in keys.iter().zip(values).enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    match key {
                        Some(key) => {
                            self.expr(key, Prec::Test);
                            self.out.push_str(": ");
                            self.expr(value, Prec::Test);
                        }
                        None => {
                            self.out.push_str("**");
                            self.expr(value, Prec::BOr);
                        }
                    }
                }
                self.out.push('}');
            }
            ExprKind::Set(elts) => {
                if elts.is_empty() {
                    self.out.push_str("{*()}");
                } else {
                    self.out.push('{');
                    self.comma_separated(elts, Prec::Test);
                    self.out.push('}');
                }
            }
            ExprKind::ListComp { elt, generators } => {
                self.out.push('[');
                self.expr(elt, Prec::Test);
                self.generators(generators);
                self.out.push(']');
            }
            ExprKind::SetComp { elt, generators } => {
                self.out.push('{');
                self.expr(elt, Prec::Test);
                self.generators(generators);
                self.out.push('}');
            }
            ExprKind::DictComp {
                key,
                value,
                generators,
            } => {
                self.out.push('{');
                self.expr(key, Prec::Test);
                self.out.push_str(": ");
                self.expr(value, Prec::Test);
                self.generators(generators);
                self.out.push('}');
            }
            ExprKind::GeneratorExp { elt, generators } => {
                self.out.push('(');
                self.expr(elt, Prec::Test);
                self.generators(generators);
                self.out.push(')');
            }
            ExprKind::Await(value) => {
                let parens = prec > Prec::Await;
                self.open(parens);
                self.out.push_str("await ");
                self.expr(value, Prec::Atom);
                self.close(parens);
            }
            ExprKind::Yield(value) => {
                let parens = prec > Prec::Yield;
                self.open(parens);
                self.out.push_str("yield");
                if let Some(value) = value {
                    self.out.push(' ');
                    self.expr(value, Prec::Tuple);
                }
                self.close(parens);
            }
            ExprKind::YieldFrom(value) => {
                let parens = prec > Prec::Yield;
                self.open(parens);
                self.out.push_str("yield from ");
                self.expr(value, Prec::Test);
                self.close(parens);
            }
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => {
                let parens = prec > Prec::Cmp;
                self.open(parens);
                self.expr(left, Prec::Cmp.next());
                for (op, comparator) in ops.iter().zip(comparators) {
                    let _ = write!(self.out, " {} ", op.symbol());
                    self.expr(comparator, Prec::Cmp.next());
                }
                self.close(parens);
            }
            ExprKind::Call {
                func,
                args,
                keywords,
            } => {
                self.expr(func, Prec::Atom);
                self.out.push('(');
                self.call_args(args, keywords);
                self.out.push(')');
            }
            ExprKind::FormattedValue { .. } => {
                self.joined_str(std::slice::from_ref(expr));
            }
            ExprKind::JoinedStr(parts) => self.joined_str(parts),
            ExprKind::Int(v) => {
                let parens = *v < 0 && prec > Prec::Factor;
                self.open(parens);
                let _ = write!(self.out, "{v}");
                self.close(parens);
            }
            ExprKind::BigInt(digits) => {
                let parens = digits.starts_with('-') && prec > Prec::Factor;
                self.open(parens);
                self.out.push_str(digits);
                self.close(parens);
            }
            ExprKind::Float(v) => {
                let parens = (v.is_sign_negative() || v.is_nan()) && prec > Prec::Factor;
                self.open(parens);
                self.out.push_str(&float_repr(*v));
                self.close(parens);
            }
            ExprKind::Complex { real, imag } => {
                let imag_text = format!("{}j", float_repr(*imag));
                if *real == 0.0 && !real.is_sign_negative() {
                    let parens = imag.is_sign_negative() && prec > Prec::Factor;
                    self.open(parens);
                    self.out.push_str(&imag_text);
                    self.close(parens);
                } else {
                    let sign = if imag.is_sign_negative() { "" } else { "+" };
                    let _ = write!(self.out, "({}{sign}{imag_text})", float_repr(*real));
                }
            }
            ExprKind::String(s) => self.out.push_str(&repr_str(s)),
            ExprKind::Bytes(b) => self.out.push_str(&repr_bytes(b)),
            ExprKind::Bool(b) => self.out.push_str(if *b { "True" } else { "False" }),
            ExprKind::None => self.out.push_str("None"),
            ExprKind::Ellipsis => self.out.push_str("..."),
            ExprKind::Attribute { value, attr } => {
                self.expr(value, Prec::Atom);
                // `1.real` would lex as a float.
                if matches!(value.kind, ExprKind::Int(v) if v >= 0)
                    || matches!(&value.kind, ExprKind::BigInt(d) if !d.starts_with('-'))
                {
                    self.out.push(' ');
                }
                let _ = write!(self.out, ".{attr}");
            }
            ExprKind::Subscript { value, slice } => {
                self.expr(value, Prec::Atom);
                self.out.push('[');
                match &slice.kind {
                    ExprKind::Tuple(elts) if !elts.is_empty() => {
                        self.comma_separated(elts, Prec::Test);
                        if elts.len() == 1 {
                            self.out.push(',');
                        }
                    }
                    _ => self.expr(slice, Prec::Tuple),
                }
                self.out.push(']');
            }
            ExprKind::Starred(value) => {
                self.out.push('*');
                self.expr(value, Prec::BOr);
            }
            ExprKind::Name { id, .. } => self.out.push_str(id),
            ExprKind::List(elts) => {
                self.out.push('[');
                self.comma_separated(elts, Prec::Test);
                self.out.push(']');
            }
            ExprKind::Tuple(elts) => {
                let parens = elts.len() <= 1 || prec > Prec::Tuple;
                self.open(parens);
                self.comma_separated(elts, Prec::Test);
                if elts.len() == 1 {
                    self.out.push(',');
                }
                self.close(parens);
            }
            ExprKind::Slice { lower, upper, step } => {
                if let Some(lower) = lower {
                    self.expr(lower, Prec::Test);
                }
                self.out.push(':');
                if let Some(upper) = upper {
                    self.expr(upper, Prec::Test);
                }
                if let Some(step) = step {
                    self.out.push(':');
                    self.expr(step, Prec::Test);
                }
            }
        }
    }

    fn generators(&mut self, generators: &[Comprehension]) {
        for generator in generators {
            self.out.push_str(if generator.is_async { " async for " } else { " for " });
            self.expr(&generator.target, Prec::Tuple);
            self.out.push_str(" in ");
            self.expr(&generator.iter, Prec::Test.next());
            for cond in &generator.ifs {
                self.out.push_str(" if ");
                self.expr(cond, Prec::Test.next());
            }
        }
    }

    fn call_args(&mut self, args: &[Expr], keywords: &[Keyword]) {
        let mut first = true;
        for arg in args {
            if !first {
                self.out.push_str(", ");
            }
            first = false;
            self.expr(arg, Prec::Test);
        }
        for keyword in keywords {
            if !first {
                self.out.push_str(", ");
            }
            first = false;
            match &keyword.arg {
                Some(name) => {
                    let _ = write!(self.out, "{name}=");
                    self.expr(&keyword.value, Prec::Test);
                }
                None => {
                    self.out.push_str("**");
                    self.expr(&keyword.value, Prec::BOr);
                }
            }
        }
    }

    // =========================================================================
    // F-strings
    // =========================================================================

    fn joined_str(&mut self, parts: &[Expr]) {
        let mut pieces = Vec::new();
        let mut holes = Vec::new();
        fstring_pieces(parts, false, &mut pieces, &mut holes);

        let quote = ["'", "\"", "'''", "\"\"\""]
            .into_iter()
            .find(|q| holes.iter().all(|h: &String| !h.contains(q)))
            .unwrap_or("'''");
        let quote_char = quote.chars().next().unwrap_or('\'');

        self.out.push('f');
        self.out.push_str(quote);
        for piece in pieces {
            match piece {
                FPiece::Literal(text) => self.out.push_str(&escape_literal(&text, quote_char)),
                FPiece::Raw(text) => self.out.push_str(&text),
            }
        }
        self.out.push_str(quote);
    }
}

enum FPiece {
    /// Literal text to be escaped.
    Literal(String),
    /// Already-rendered field syntax.
    Raw(String),
}

fn fstring_pieces(parts: &[Expr], in_spec: bool, pieces: &mut Vec<FPiece>, holes: &mut Vec<String>) {
    for part in parts {
        match &part.kind {
            ExprKind::String(s) => {
                let text = if in_spec {
                    s.clone()
                } else {
                    s.replace('{', "{{").replace('}', "}}")
                };
                pieces.push(FPiece::Literal(text));
            }
            ExprKind::FormattedValue {
                value,
                conversion,
                format_spec,
            } => {
                let mut inner = Unparser::default();
                inner.expr(value, Prec::Test.next());
                let mut text = inner.out;
                if text.starts_with('{') {
                    text.insert(0, ' ');
                }
                holes.push(text.clone());
                pieces.push(FPiece::Raw(format!("{{{text}")));
                if let Some(c) = conversion {
                    pieces.push(FPiece::Raw(format!("!{c}")));
                }
                if let Some(spec) = format_spec {
                    pieces.push(FPiece::Raw(":".to_string()));
                    match &spec.kind {
                        ExprKind::JoinedStr(spec_parts) => {
                            fstring_pieces(spec_parts, true, pieces, holes);
                        }
                        _ => fstring_pieces(std::slice::from_ref(spec), true, pieces, holes),
                    }
                }
                pieces.push(FPiece::Raw("}".to_string()));
            }
            other => {
                // Any other expression is rendered as a replacement field.
                let wrapped = Expr::new(
                    ExprKind::FormattedValue {
                        value: Box::new(Expr::new(other.clone(), part.span)),
                        conversion: None,
                        format_spec: None,
                    },
                    part.span,
                );
                fstring_pieces(std::slice::from_ref(&wrapped), in_spec, pieces, holes);
            }
        }
    }
}

fn escape_literal(text: &str, quote: char) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        push_escaped_char(&mut out, c, quote);
    }
    out
}

fn push_escaped_char(out: &mut String, c: char, quote: char) {
    match c {
        '\\' => out.push_str("\\\\"),
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\t' => out.push_str("\\t"),
        c if c == quote => {
            out.push('\\');
            out.push(c);
        }
        ' '..='~' => out.push(c),
        c if (c as u32) < 0x100 => {
            let _ = write!(out, "\\x{:02x}", c as u32);
        }
        c if (c as u32) < 0x10000 => {
            let _ = write!(out, "\\u{:04x}", c as u32);
        }
        c => {
            let _ = write!(out, "\\U{:08x}", c as u32);
        }
    }
}

/// Render a string literal. Non-ASCII characters are always escaped.
#[must_use]
pub fn repr_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        push_escaped_char(&mut out, c, quote);
    }
    out.push(quote);
    out
}

/// Render a bytes literal the way Python's `repr` does.
#[must_use]
pub fn repr_bytes(b: &[u8]) -> String {
    let quote = if b.contains(&b'\'') && !b.contains(&b'"') { b'"' } else { b'\'' };
    let mut out = String::with_capacity(b.len() + 3);
    out.push('b');
    out.push(quote as char);
    for &byte in b {
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            q if q == quote => {
                out.push('\\');
                out.push(q as char);
            }
            0x20..=0x7e => out.push(byte as char),
            _ => {
                let _ = write!(out, "\\x{byte:02x}");
            }
        }
    }
    out.push(quote as char);
    out
}

/// Render a float as a Python literal.
#[must_use]
pub fn float_repr(v: f64) -> String {
    if v.is_nan() {
        return "(1e309 - 1e309)".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "1e309" } else { "-1e309" }.to_string();
    }
    format!("{v:?}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse, parse_expression};
    use rstest::rstest;

    fn round_trip(src: &str) -> String {
        unparse_expr(&parse_expression(src).expect("parse failed"))
    }

    #[rstest]
    #[case("a + b * c")]
    #[case("(a + b) * c")]
    #[case("a - (b - c)")]
    #[case("(a ** b) ** c")]
    #[case("a ** b ** c")]
    #[case("-a ** b")]
    #[case("(-a) ** b")]
    #[case("not (a and b)")]
    #[case("(a or b) and c")]
    #[case("a if b else c")]
    #[case("(a if b else c) + 1")]
    #[case("lambda x, *y, z=1, **k: x")]
    #[case("f(a, *b, c=1, **d)")]
    #[case("x[1:2, ::3]")]
    #[case("[x for x in y if x]")]
    #[case("{k: v for k, v in d}")]
    #[case("f((yield))")]
    #[case("a < b <= c")]
    #[case("a not in b")]
    #[case("(x := 1)")]
    #[case("{**a, 'b': 1}")]
    #[case("1 .real")]
    #[case("(-1).real")]
    #[case("await x")]
    fn test_expression_round_trip(#[case] src: &str) {
        assert_eq!(round_trip(src), src);
    }

    #[test]
    fn test_reparse_is_stable() {
        let src = "def f(a, /, b=1, *, c):\n    if a:\n        return b\n    elif c:\n        pass\n    else:\n        del a\n";
        let module = parse(src).unwrap();
        let text = unparse(&module);
        assert_eq!(text, src);
    }

    #[test]
    fn test_match_round_trip() {
        let src = "match p:\n    case [1, *rest] if rest:\n        pass\n    case Point(0, y=1 | 2 as y2) | (3 | 4):\n        pass\n    case {'k': -1, **kw}:\n        pass\n    case Color.RED | None as v:\n        pass\n    case _:\n        pass\n";
        let module = parse(src).unwrap();
        assert_eq!(unparse(&module), src);
    }

    #[test]
    fn test_try_star_round_trip() {
        let src = "try:\n    f()\nexcept* ValueError as eg:\n    pass\nfinally:\n    g()\n";
        assert_eq!(unparse(&parse(src).unwrap()), src);
    }

    #[test]
    fn test_empty_body_gets_pass() {
        let module = parse("class A:\n    'doc'\n").unwrap();
        let mut module = module;
        if let StmtKind::ClassDef { body, .. } = &mut module.body[0].kind {
            body.clear();
        }
        assert_eq!(unparse(&module), "class A:\n    pass\n");
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(repr_str("it's"), "\"it's\"");
        assert_eq!(repr_str("a\n\u{e9}\u{1d5ee}"), "'a\\n\\xe9\\U0001d5ee'");
        assert_eq!(repr_bytes(b"\x00'a"), "b\"\\x00'a\"");
    }

    #[test]
    fn test_fstring_quote_choice() {
        let text = round_trip("f\"{d['k']!r:>{w}} {{x}}\"");
        assert_eq!(text, "f\"{d['k']!r:>{w}} {{x}}\"");
        let reparsed = parse_expression(&text).unwrap();
        assert!(matches!(reparsed.kind, ExprKind::JoinedStr(_)));
    }

    #[test]
    fn test_tuple_forms() {
        assert_eq!(round_trip("(1,)"), "(1,)");
        assert_eq!(round_trip("()"), "()");
        let module = parse("a, b = b, a\n").unwrap();
        assert_eq!(unparse(&module), "a, b = b, a\n");
    }

    #[test]
    fn test_floats() {
        assert_eq!(float_repr(1.5), "1.5");
        assert_eq!(float_repr(2.0), "2.0");
        assert_eq!(float_repr(f64::INFINITY), "1e309");
    }
}
