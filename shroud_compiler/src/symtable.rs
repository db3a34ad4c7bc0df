//! Symbol table construction and name resolution.
//!
//! Two phases, mirroring how the reference interpreter resolves names:
//!
//! 1. **Collection**: a [`Visitor`] walks the module and records, per scope,
//!    which names are assigned, used, declared `global` or `nonlocal`, and
//!    which are parameters.
//! 2. **Analysis**: scopes are resolved top-down with the set of names bound
//!    by enclosing function scopes. Free names requested by children turn
//!    the defining local into a cell and pass through intermediate scopes.
//!
//! Scopes are keyed by the address of the node that opens them, so the
//! compiler can look a scope up while walking the same tree.

use rustc_hash::{FxHashMap, FxHashSet};
use shroud_core::{ShroudError, ShroudResult, Span};
use shroud_parser::ast::{
    Arguments, Comprehension, ExceptHandler, Expr, ExprContext, ExprKind, Module, Pattern, Stmt,
    StmtKind,
};
use shroud_parser::visit::{self, Visitor};

/// Implicit cell a class body creates for methods that use `super` or
/// `__class__`.
pub const CLASS_CELL: &str = "__class__";

/// What kind of code block a scope compiles to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Module body.
    Module,
    /// Class body.
    Class,
    /// `def` or `lambda`.
    Function,
    /// List, set or dict comprehension, or generator expression.
    Comprehension,
}

impl ScopeKind {
    /// Whether locals live in fast slots.
    #[must_use]
    pub const fn is_function_like(self) -> bool {
        matches!(self, Self::Function | Self::Comprehension)
    }
}

/// How a name is accessed inside a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Bound in this scope.
    Local,
    /// Declared `global` here.
    GlobalExplicit,
    /// Never bound in any enclosing function scope.
    GlobalImplicit,
    /// Bound in an enclosing function scope.
    Free,
    /// Bound here and captured by a nested scope.
    Cell,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct SymbolFlags(u8);

impl SymbolFlags {
    const ASSIGNED: u8 = 0x01;
    const PARAM: u8 = 0x02;
    const GLOBAL: u8 = 0x04;
    const NONLOCAL: u8 = 0x08;
    const USED: u8 = 0x10;

    fn has(self, bit: u8) -> bool {
        self.0 & bit != 0
    }
}

/// One scope of the program.
#[derive(Debug, Clone)]
pub struct Scope {
    /// Kind of block.
    pub kind: ScopeKind,
    /// Short name (`<module>`, `<lambda>`, `<listcomp>`, a def name).
    pub name: String,
    /// Dotted qualified name.
    pub qualname: String,
    /// Parameters in declaration order.
    pub params: Vec<String>,
    /// Nested directly or indirectly inside a function scope.
    pub nested: bool,
    /// Contains `yield`.
    pub is_generator: bool,
    /// Sorted names captured by nested scopes.
    pub cellvars: Vec<String>,
    /// Sorted names captured from enclosing scopes.
    pub freevars: Vec<String>,
    /// Child scopes in source order.
    pub children: Vec<usize>,
    symbols: FxHashMap<String, SymbolFlags>,
    order: Vec<String>,
    bindings: FxHashMap<String, Binding>,
    span: Span,
}

impl Scope {
    fn new(kind: ScopeKind, name: &str, qualname: String, span: Span) -> Self {
        Self {
            kind,
            name: name.to_string(),
            qualname,
            params: Vec::new(),
            nested: false,
            is_generator: false,
            cellvars: Vec::new(),
            freevars: Vec::new(),
            children: Vec::new(),
            symbols: FxHashMap::default(),
            order: Vec::new(),
            bindings: FxHashMap::default(),
            span,
        }
    }

    fn mark(&mut self, name: &str, bit: u8) {
        match self.symbols.get_mut(name) {
            Some(flags) => flags.0 |= bit,
            None => {
                self.symbols.insert(name.to_string(), SymbolFlags(bit));
                self.order.push(name.to_string());
            }
        }
    }

    /// Resolved binding of `name`. Names never seen in this scope are
    /// implicit globals.
    #[must_use]
    pub fn binding(&self, name: &str) -> Binding {
        self.bindings
            .get(name)
            .copied()
            .unwrap_or(Binding::GlobalImplicit)
    }

    /// Fast-local names: parameters first, then other non-cell locals in
    /// order of first appearance.
    #[must_use]
    pub fn varnames(&self) -> Vec<String> {
        let mut out = self.params.clone();
        for name in &self.order {
            if self.binding(name) == Binding::Local && !out.contains(name) {
                out.push(name.clone());
            }
        }
        out
    }
}

/// All scopes of a module.
#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
    by_node: FxHashMap<usize, usize>,
}

impl SymbolTable {
    /// Collect and resolve every scope of `module`.
    pub fn build(module: &Module) -> ShroudResult<Self> {
        let mut builder = Builder {
            scopes: vec![Scope::new(
                ScopeKind::Module,
                "<module>",
                "<module>".to_string(),
                Span::point(1, 0),
            )],
            by_node: FxHashMap::default(),
            stack: vec![0],
            error: None,
        };
        builder.by_node.insert(node_key(module), 0);
        visit::walk_module(&mut builder, module);
        if let Some(err) = builder.error {
            return Err(err);
        }
        let mut table = Self {
            scopes: builder.scopes,
            by_node: builder.by_node,
        };
        table.analyze(0, &FxHashSet::default())?;
        tracing::trace!(scopes = table.scopes.len(), "symbol table built");
        Ok(table)
    }

    /// The module scope.
    #[must_use]
    pub fn root(&self) -> &Scope {
        &self.scopes[0]
    }

    /// Scope by index.
    #[must_use]
    pub fn scope(&self, index: usize) -> &Scope {
        &self.scopes[index]
    }

    /// Index of the scope opened by `node`.
    pub fn scope_of<T>(&self, node: &T) -> ShroudResult<usize> {
        self.by_node
            .get(&node_key(node))
            .copied()
            .ok_or_else(|| ShroudError::internal("no scope recorded for node"))
    }

    fn analyze(&mut self, index: usize, bound: &FxHashSet<String>) -> ShroudResult<FxHashSet<String>> {
        let kind = self.scopes[index].kind;
        let mut bindings = FxHashMap::default();
        let mut free = FxHashSet::default();
        let mut locals = FxHashSet::default();
        let mut explicit_globals = FxHashSet::default();

        {
            let scope = &self.scopes[index];
            for name in &scope.order {
                let flags = scope.symbols[name];
                let binding = if flags.has(SymbolFlags::GLOBAL) {
                    explicit_globals.insert(name.clone());
                    Binding::GlobalExplicit
                } else if flags.has(SymbolFlags::NONLOCAL) {
                    if !bound.contains(name) {
                        return Err(ShroudError::compile(
                            format!("no binding for nonlocal '{name}' found"),
                            Some(scope.span),
                        ));
                    }
                    Binding::Free
                } else if flags.has(SymbolFlags::ASSIGNED) || flags.has(SymbolFlags::PARAM) {
                    locals.insert(name.clone());
                    Binding::Local
                } else if kind != ScopeKind::Module && bound.contains(name) {
                    Binding::Free
                } else {
                    Binding::GlobalImplicit
                };
                if binding == Binding::Free {
                    free.insert(name.clone());
                }
                bindings.insert(name.clone(), binding);
            }
        }

        let child_bound: FxHashSet<String> = match kind {
            ScopeKind::Module => FxHashSet::default(),
            ScopeKind::Class => {
                let mut names = bound.clone();
                names.insert(CLASS_CELL.to_string());
                names
            }
            ScopeKind::Function | ScopeKind::Comprehension => bound
                .iter()
                .filter(|n| !explicit_globals.contains(*n))
                .chain(locals.iter())
                .cloned()
                .collect(),
        };

        let children = self.scopes[index].children.clone();
        for child in children {
            for name in self.analyze(child, &child_bound)? {
                match bindings.get(&name) {
                    Some(Binding::Local) if kind.is_function_like() => {
                        bindings.insert(name, Binding::Cell);
                    }
                    Some(Binding::Cell | Binding::Free) => {}
                    _ if kind == ScopeKind::Class && name == CLASS_CELL => {
                        bindings.insert(name, Binding::Cell);
                    }
                    // The class name stays in its namespace; the cell passes through.
                    Some(Binding::Local) if kind == ScopeKind::Class => {
                        free.insert(name);
                    }
                    _ => {
                        bindings.insert(name.clone(), Binding::Free);
                        free.insert(name);
                    }
                }
            }
        }

        let scope = &mut self.scopes[index];
        let mut cellvars: Vec<String> = bindings
            .iter()
            .filter(|(_, b)| **b == Binding::Cell)
            .map(|(n, _)| n.clone())
            .collect();
        cellvars.sort();
        let mut freevars: Vec<String> = free.iter().cloned().collect();
        freevars.sort();
        scope.cellvars = cellvars;
        scope.freevars = freevars;
        scope.bindings = bindings;
        Ok(free)
    }
}

fn node_key<T>(node: &T) -> usize {
    std::ptr::from_ref(node) as usize
}

// =============================================================================
// Collection
// =============================================================================

struct Builder {
    scopes: Vec<Scope>,
    by_node: FxHashMap<usize, usize>,
    stack: Vec<usize>,
    error: Option<ShroudError>,
}

impl Builder {
    fn current(&mut self) -> &mut Scope {
        let index = self.stack.last().copied().unwrap_or(0);
        &mut self.scopes[index]
    }

    fn fail(&mut self, message: impl Into<String>, span: Span) {
        if self.error.is_none() {
            self.error = Some(ShroudError::compile(message, Some(span)));
        }
    }

    fn define(&mut self, name: &str) {
        self.current().mark(name, SymbolFlags::ASSIGNED);
    }

    fn enter<T>(&mut self, node: &T, kind: ScopeKind, name: &str, span: Span) {
        let parent = self.stack.last().copied().unwrap_or(0);
        let parent_scope = &self.scopes[parent];
        let qualname = match parent_scope.kind {
            ScopeKind::Module => name.to_string(),
            ScopeKind::Class => format!("{}.{name}", parent_scope.qualname),
            ScopeKind::Function | ScopeKind::Comprehension => {
                format!("{}.<locals>.{name}", parent_scope.qualname)
            }
        };
        let nested = parent_scope.nested || parent_scope.kind.is_function_like();
        let mut scope = Scope::new(kind, name, qualname, span);
        scope.nested = nested;
        let index = self.scopes.len();
        self.scopes.push(scope);
        self.scopes[parent].children.push(index);
        self.by_node.insert(node_key(node), index);
        self.stack.push(index);
    }

    fn leave(&mut self) {
        self.stack.pop();
    }

    /// Parameters in frame slot order: positional, keyword-only, then the
    /// `*` and `**` collectors.
    fn params(&mut self, args: &Arguments) {
        let ordered = args
            .posonlyargs
            .iter()
            .chain(&args.args)
            .chain(&args.kwonlyargs)
            .chain(&args.vararg)
            .chain(&args.kwarg);
        for arg in ordered {
            let scope = self.current();
            scope.mark(&arg.arg, SymbolFlags::PARAM);
            scope.params.push(arg.arg.clone());
        }
    }

    /// Defaults and annotations are evaluated in the enclosing scope.
    fn outer_parts(&mut self, args: &Arguments, returns: Option<&Expr>) {
        for default in &args.defaults {
            self.visit_expr(default);
        }
        for default in args.kw_defaults.iter().flatten() {
            self.visit_expr(default);
        }
        for arg in args.all_args() {
            if let Some(annotation) = &arg.annotation {
                self.visit_expr(annotation);
            }
        }
        if let Some(returns) = returns {
            self.visit_expr(returns);
        }
    }

    fn comprehension(&mut self, expr: &Expr, name: &str, generators: &[Comprehension], elts: &[&Expr]) {
        let Some(first) = generators.first() else {
            self.fail("comprehension without a for clause", expr.span);
            return;
        };
        if generators.iter().any(|g| g.is_async) {
            self.fail("async comprehensions are not supported", expr.span);
        }
        self.visit_expr(&first.iter);
        self.enter(expr, ScopeKind::Comprehension, name, expr.span);
        let scope = self.current();
        scope.mark(".0", SymbolFlags::PARAM);
        scope.params.push(".0".to_string());
        if name == "<genexpr>" {
            scope.is_generator = true;
        }
        for (i, generator) in generators.iter().enumerate() {
            if i > 0 {
                self.visit_expr(&generator.iter);
            }
            self.visit_expr(&generator.target);
            for cond in &generator.ifs {
                self.visit_expr(cond);
            }
        }
        for elt in elts {
            self.visit_expr(elt);
        }
        self.leave();
    }
}

impl Visitor for Builder {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::FunctionDef {
                name,
                args,
                body,
                decorator_list,
                returns,
                is_async,
            } => {
                if *is_async {
                    self.fail("async functions are not supported", stmt.span);
                }
                for decorator in decorator_list {
                    self.visit_expr(decorator);
                }
                self.outer_parts(args, returns.as_deref());
                self.define(name);
                self.enter(stmt, ScopeKind::Function, name, stmt.span);
                self.params(args);
                self.visit_body(body);
                self.leave();
            }
            StmtKind::ClassDef {
                name,
                bases,
                keywords,
                body,
                decorator_list,
            } => {
                for decorator in decorator_list {
                    self.visit_expr(decorator);
                }
                for base in bases {
                    self.visit_expr(base);
                }
                for keyword in keywords {
                    self.visit_keyword(keyword);
                }
                self.define(name);
                self.enter(stmt, ScopeKind::Class, name, stmt.span);
                self.visit_body(body);
                self.leave();
            }
            StmtKind::Global(names) => {
                for name in names {
                    self.current().mark(name, SymbolFlags::GLOBAL);
                }
            }
            StmtKind::Nonlocal(names) => {
                if self.current().kind == ScopeKind::Module {
                    self.fail("nonlocal declaration not allowed at module level", stmt.span);
                }
                for name in names {
                    self.current().mark(name, SymbolFlags::NONLOCAL);
                }
            }
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    let bound = alias
                        .asname
                        .as_deref()
                        .unwrap_or_else(|| alias.name.split('.').next().unwrap_or(&alias.name));
                    self.define(bound);
                }
            }
            StmtKind::ImportFrom { names, .. } => {
                for alias in names {
                    if alias.name == "*" {
                        if self.current().kind != ScopeKind::Module {
                            self.fail("import * only allowed at module level", stmt.span);
                        }
                        continue;
                    }
                    self.define(alias.asname.as_deref().unwrap_or(&alias.name));
                }
            }
            StmtKind::For { is_async: true, .. } | StmtKind::With { is_async: true, .. } => {
                self.fail("async statements are not supported", stmt.span);
            }
            _ => visit::walk_stmt(self, stmt),
        }
    }

    fn visit_except_handler(&mut self, handler: &ExceptHandler) {
        if let Some(typ) = &handler.typ {
            self.visit_expr(typ);
        }
        if let Some(name) = &handler.name {
            self.define(name);
        }
        self.visit_body(&handler.body);
    }

    fn visit_pattern(&mut self, pattern: &Pattern) {
        for name in pattern.captures() {
            self.define(name);
        }
        visit::walk_pattern(self, pattern);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Name { id, ctx } => {
                let bit = match ctx {
                    ExprContext::Load => SymbolFlags::USED,
                    ExprContext::Store | ExprContext::Del => SymbolFlags::ASSIGNED,
                };
                let scope = self.current();
                if *ctx == ExprContext::Load && id == "super" && scope.kind.is_function_like() {
                    scope.mark(CLASS_CELL, SymbolFlags::USED);
                }
                scope.mark(id, bit);
            }
            ExprKind::Lambda { args, body } => {
                self.outer_parts(args, None);
                self.enter(expr, ScopeKind::Function, "<lambda>", expr.span);
                self.params(args);
                self.visit_expr(body);
                self.leave();
            }
            ExprKind::ListComp { elt, generators } => {
                self.comprehension(expr, "<listcomp>", generators, &[elt]);
            }
            ExprKind::SetComp { elt, generators } => {
                self.comprehension(expr, "<setcomp>", generators, &[elt]);
            }
            ExprKind::DictComp {
                key,
                value,
                generators,
            } => {
                self.comprehension(expr, "<dictcomp>", generators, &[key, value]);
            }
            ExprKind::GeneratorExp { elt, generators } => {
                self.comprehension(expr, "<genexpr>", generators, &[elt]);
            }
            ExprKind::Yield(value) => {
                let scope = self.current();
                if scope.kind.is_function_like() {
                    scope.is_generator = true;
                } else {
                    self.fail("'yield' outside function", expr.span);
                }
                if let Some(value) = value {
                    self.visit_expr(value);
                }
            }
            ExprKind::YieldFrom(value) => {
                let scope = self.current();
                if scope.kind.is_function_like() {
                    scope.is_generator = true;
                } else {
                    self.fail("'yield from' outside function", expr.span);
                }
                self.visit_expr(value);
            }
            ExprKind::Await(_) => self.fail("'await' is not supported", expr.span),
            ExprKind::NamedExpr { .. } if self.current().kind == ScopeKind::Comprehension => {
                self.fail("assignment expressions inside comprehensions are not supported", expr.span);
            }
            _ => visit::walk_expr(self, expr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_parser::parse;

    fn table(source: &str) -> (Module, SymbolTable) {
        let module = parse(source).unwrap();
        let table = SymbolTable::build(&module).unwrap();
        (module, table)
    }

    fn child<'a>(table: &'a SymbolTable, parent: &Scope, name: &str) -> &'a Scope {
        parent
            .children
            .iter()
            .map(|&i| table.scope(i))
            .find(|s| s.name == name)
            .unwrap()
    }

    #[test]
    fn test_module_names() {
        let (_, table) = table("x = 1\nprint(x)\n");
        assert_eq!(table.root().binding("x"), Binding::Local);
        assert_eq!(table.root().binding("print"), Binding::GlobalImplicit);
    }

    #[test]
    fn test_closure_cells_and_frees() {
        let (_, table) = table("def f(a):\n    b = 1\n    def g():\n        return a + b\n    return g\n");
        let f = child(&table, table.root(), "f");
        let g = child(&table, f, "g");
        assert_eq!(f.cellvars, ["a", "b"]);
        assert_eq!(f.varnames(), ["a", "g"]);
        assert_eq!(g.freevars, ["a", "b"]);
        assert_eq!(g.binding("a"), Binding::Free);
        assert_eq!(g.qualname, "f.<locals>.g");
        assert!(g.nested);
        assert!(!f.nested);
    }

    #[test]
    fn test_pass_through_free() {
        let (_, table) = table("def f():\n    x = 1\n    def g():\n        def h():\n            return x\n        return h\n");
        let f = child(&table, table.root(), "f");
        let g = child(&table, f, "g");
        let h = child(&table, g, "h");
        assert_eq!(f.binding("x"), Binding::Cell);
        assert_eq!(g.freevars, ["x"]);
        assert_eq!(h.freevars, ["x"]);
    }

    #[test]
    fn test_global_and_nonlocal() {
        let (_, table) = table(
            "def f():\n    global y\n    y = 1\n    z = 2\n    def g():\n        nonlocal z\n        z = 3\n",
        );
        let f = child(&table, table.root(), "f");
        assert_eq!(f.binding("y"), Binding::GlobalExplicit);
        assert_eq!(f.binding("z"), Binding::Cell);
        let g = child(&table, f, "g");
        assert_eq!(g.binding("z"), Binding::Free);
    }

    #[test]
    fn test_class_body_is_not_enclosing() {
        let (_, table) = table("class C:\n    a = 1\n    def m(self):\n        return a\n");
        let c = child(&table, table.root(), "C");
        let m = child(&table, c, "m");
        assert_eq!(m.binding("a"), Binding::GlobalImplicit);
        assert_eq!(m.qualname, "C.m");
    }

    #[test]
    fn test_comprehension_scope() {
        let (module, table) = table("ys = [x * k for x in xs if x]\n");
        let StmtKind::Assign { value, .. } = &module.body[0].kind else {
            panic!("expected assignment");
        };
        let comp = table.scope(table.scope_of(value.as_ref()).unwrap());
        assert_eq!(comp.kind, ScopeKind::Comprehension);
        assert_eq!(comp.params, [".0"]);
        assert_eq!(comp.binding("x"), Binding::Local);
        assert_eq!(comp.binding("xs"), Binding::GlobalImplicit);
        assert_eq!(table.root().binding("xs"), Binding::GlobalImplicit);
    }

    #[test]
    fn test_super_creates_class_cell() {
        let (_, table) = table("class C(B):\n    def m(self):\n        return super().m()\n    n = 1\n");
        let class = child(&table, table.root(), "C");
        assert_eq!(class.cellvars, [CLASS_CELL]);
        assert_eq!(class.binding(CLASS_CELL), Binding::Cell);
        let method = child(&table, class, "m");
        assert_eq!(method.freevars, [CLASS_CELL]);
        assert_eq!(method.binding("super"), Binding::GlobalImplicit);
    }

    #[test]
    fn test_class_body_captures_function_locals() {
        let source = "def f():\n    x = 1\n    y = 2\n    class C:\n        y = x\n        def m(self):\n            return y\n    return C\n";
        let (_, table) = table(source);
        let f = child(&table, table.root(), "f");
        assert_eq!(f.cellvars, ["x", "y"]);
        let class = child(&table, f, "C");
        assert_eq!(class.freevars, ["x", "y"]);
        assert_eq!(class.binding("x"), Binding::Free);
        assert_eq!(class.binding("y"), Binding::Local);
        assert!(class.cellvars.is_empty());
    }

    #[test]
    fn test_yield_from_marks_generator() {
        let (_, table) = table("def f():\n    yield from g()\n");
        assert!(child(&table, table.root(), "f").is_generator);
    }

    #[test]
    fn test_unsupported_constructs() {
        for source in [
            "async def f():\n    pass\n",
            "yield from g()\n",
            "ys = [(y := x) for x in xs]\n",
            "nonlocal x\n",
        ] {
            let module = parse(source).unwrap();
            assert!(SymbolTable::build(&module).is_err(), "{source}");
        }
    }
}
