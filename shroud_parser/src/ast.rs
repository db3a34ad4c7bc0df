//! Abstract syntax tree for the supported Python subset.
//!
//! Node shapes follow Python's own `ast` module so that passes can be
//! described in the same vocabulary: a module is a list of statements, every
//! statement and expression carries a [`Span`], and helper records
//! (arguments, keywords, aliases, handlers) mirror their Python namesakes.

use shroud_core::Span;

/// A parsed source file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    /// Top-level statements.
    pub body: Vec<Stmt>,
}

impl Module {
    /// Create a module from its statements.
    #[must_use]
    pub fn new(body: Vec<Stmt>) -> Self {
        Self { body }
    }
}

// =============================================================================
// Statements
// =============================================================================

/// A statement node.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    /// Statement kind.
    pub kind: StmtKind,
    /// Source location.
    pub span: Span,
}

impl Stmt {
    /// Create a new statement.
    #[must_use]
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// A statement with a missing location, to be repaired later.
    #[must_use]
    pub fn synthetic(kind: StmtKind) -> Self {
        Self::new(kind, Span::dummy())
    }

    /// Wrap an expression as a statement at the expression's location.
    #[must_use]
    pub fn expr(value: Expr) -> Self {
        let span = value.span;
        Self::new(StmtKind::Expr(Box::new(value)), span)
    }
}

/// Statement kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `def name(args) -> returns: body`, optionally `async`.
    FunctionDef {
        /// Function name.
        name: String,
        /// Parameter list.
        args: Box<Arguments>,
        /// Function body.
        body: Vec<Stmt>,
        /// Decorators, outermost first.
        decorator_list: Vec<Expr>,
        /// Return annotation.
        returns: Option<Box<Expr>>,
        /// `async def`
        is_async: bool,
    },
    /// `class name(bases, keywords): body`
    ClassDef {
        /// Class name.
        name: String,
        /// Positional base classes.
        bases: Vec<Expr>,
        /// Class keywords such as `metaclass=`.
        keywords: Vec<Keyword>,
        /// Class body.
        body: Vec<Stmt>,
        /// Decorators, outermost first.
        decorator_list: Vec<Expr>,
    },
    /// `return value`
    Return(Option<Box<Expr>>),
    /// `del targets`
    Delete(Vec<Expr>),
    /// `t1 = t2 = value`
    Assign {
        /// Targets, leftmost first.
        targets: Vec<Expr>,
        /// Assigned value.
        value: Box<Expr>,
    },
    /// `target op= value`
    AugAssign {
        /// Updated target.
        target: Box<Expr>,
        /// Operator.
        op: BinOp,
        /// Right-hand side.
        value: Box<Expr>,
    },
    /// `target: annotation = value`
    AnnAssign {
        /// Annotated target.
        target: Box<Expr>,
        /// The annotation.
        annotation: Box<Expr>,
        /// Assigned value, if any.
        value: Option<Box<Expr>>,
        /// Target is a bare, unparenthesized name.
        simple: bool,
    },
    /// `for target in iter: body else: orelse`, optionally `async`.
    For {
        /// Loop variable(s).
        target: Box<Expr>,
        /// Iterated expression.
        iter: Box<Expr>,
        /// Loop body.
        body: Vec<Stmt>,
        /// Runs when the loop ends without `break`.
        orelse: Vec<Stmt>,
        /// `async for`
        is_async: bool,
    },
    /// `while test: body else: orelse`
    While {
        /// Loop condition.
        test: Box<Expr>,
        /// Loop body.
        body: Vec<Stmt>,
        /// Runs when the loop ends without `break`.
        orelse: Vec<Stmt>,
    },
    /// `if test: body else: orelse` (`elif` nests in `orelse`)
    If {
        /// Condition.
        test: Box<Expr>,
        /// Taken branch.
        body: Vec<Stmt>,
        /// Other branch.
        orelse: Vec<Stmt>,
    },
    /// `with items: body`, optionally `async`.
    With {
        /// Context managers in order.
        items: Vec<WithItem>,
        /// Managed body.
        body: Vec<Stmt>,
        /// `async with`
        is_async: bool,
    },
    /// `match subject:` followed by its `case` blocks.
    Match {
        /// Matched value.
        subject: Box<Expr>,
        /// Cases, tried in order.
        cases: Vec<MatchCase>,
    },
    /// `raise exc from cause`
    Raise {
        /// Raised exception.
        exc: Option<Box<Expr>>,
        /// Explicit `__cause__`.
        cause: Option<Box<Expr>>,
    },
    /// `try: body except: handlers else: orelse finally: finalbody`
    Try {
        /// Guarded body.
        body: Vec<Stmt>,
        /// `except` clauses.
        handlers: Vec<ExceptHandler>,
        /// Runs when `body` raised nothing.
        orelse: Vec<Stmt>,
        /// Always runs.
        finalbody: Vec<Stmt>,
    },
    /// `try` whose handlers are `except*` clauses over exception groups.
    TryStar {
        /// Guarded body.
        body: Vec<Stmt>,
        /// `except*` clauses.
        handlers: Vec<ExceptHandler>,
        /// Runs when `body` raised nothing.
        orelse: Vec<Stmt>,
        /// Always runs.
        finalbody: Vec<Stmt>,
    },
    /// `assert test, msg`
    Assert {
        /// Asserted condition.
        test: Box<Expr>,
        /// Failure message.
        msg: Option<Box<Expr>>,
    },
    /// `import a.b as c, d`
    Import(Vec<Alias>),
    /// `from ..module import names`
    ImportFrom {
        /// Module path after the dots.
        module: Option<String>,
        /// Imported names; a single `*` alias for star imports.
        names: Vec<Alias>,
        /// Number of leading dots.
        level: u32,
    },
    /// `global a, b`
    Global(Vec<String>),
    /// `nonlocal a, b`
    Nonlocal(Vec<String>),
    /// Expression statement.
    Expr(Box<Expr>),
    /// `pass`
    Pass,
    /// `break`
    Break,
    /// `continue`
    Continue,
}

// =============================================================================
// Expressions
// =============================================================================

/// An expression node.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    /// Expression kind.
    pub kind: ExprKind,
    /// Source location.
    pub span: Span,
}

impl Expr {
    /// Create a new expression.
    #[must_use]
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// An expression with a missing location, to be repaired later.
    #[must_use]
    pub fn synthetic(kind: ExprKind) -> Self {
        Self::new(kind, Span::dummy())
    }

    /// A loaded name.
    #[must_use]
    pub fn name(id: impl Into<String>) -> Self {
        Self::synthetic(ExprKind::Name {
            id: id.into(),
            ctx: ExprContext::Load,
        })
    }

    /// A stored name.
    #[must_use]
    pub fn store(id: impl Into<String>) -> Self {
        Self::synthetic(ExprKind::Name {
            id: id.into(),
            ctx: ExprContext::Store,
        })
    }

    /// A string constant.
    #[must_use]
    pub fn str(s: impl Into<String>) -> Self {
        Self::synthetic(ExprKind::String(s.into()))
    }

    /// An integer constant.
    #[must_use]
    pub fn int(v: i64) -> Self {
        Self::synthetic(ExprKind::Int(v))
    }

    /// `func(args)`
    #[must_use]
    pub fn call(func: Expr, args: Vec<Expr>) -> Self {
        Self::synthetic(ExprKind::Call {
            func: Box::new(func),
            args,
            keywords: Vec::new(),
        })
    }

    /// `value.attr`
    #[must_use]
    pub fn attr(value: Expr, attr: impl Into<String>) -> Self {
        Self::synthetic(ExprKind::Attribute {
            value: Box::new(value),
            attr: attr.into(),
        })
    }

    /// `left op right`
    #[must_use]
    pub fn binop(left: Expr, op: BinOp, right: Expr) -> Self {
        Self::synthetic(ExprKind::BinOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        })
    }

    /// `value[slice]`
    #[must_use]
    pub fn subscript(value: Expr, slice: Expr) -> Self {
        Self::synthetic(ExprKind::Subscript {
            value: Box::new(value),
            slice: Box::new(slice),
        })
    }

    /// The identifier if this is a bare name.
    #[must_use]
    pub fn as_name(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Name { id, .. } => Some(id),
            _ => None,
        }
    }

    /// Whether this is a constant literal.
    #[must_use]
    pub fn is_constant(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Int(_)
                | ExprKind::BigInt(_)
                | ExprKind::Float(_)
                | ExprKind::Complex { .. }
                | ExprKind::String(_)
                | ExprKind::Bytes(_)
                | ExprKind::Bool(_)
                | ExprKind::None
                | ExprKind::Ellipsis
        )
    }
}

/// Load/store/delete context of a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExprContext {
    /// Read.
    #[default]
    Load,
    /// Assignment target.
    Store,
    /// `del` target.
    Del,
}

/// Expression kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    // === Operators ===
    /// `a and b and c`
    BoolOp {
        /// Operator shared by every operand.
        op: BoolOp,
        /// Two or more operands.
        values: Vec<Expr>,
    },
    /// `target := value`
    NamedExpr {
        /// Bound name.
        target: Box<Expr>,
        /// Assigned value.
        value: Box<Expr>,
    },
    /// `left op right`
    BinOp {
        /// Left operand.
        left: Box<Expr>,
        /// Operator.
        op: BinOp,
        /// Right operand.
        right: Box<Expr>,
    },
    /// `op operand`
    UnaryOp {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<Expr>,
    },
    /// `lambda args: body`
    Lambda {
        /// Parameter list.
        args: Box<Arguments>,
        /// Returned expression.
        body: Box<Expr>,
    },
    /// `body if test else orelse`
    IfExp {
        /// Condition.
        test: Box<Expr>,
        /// Value when true.
        body: Box<Expr>,
        /// Value when false.
        orelse: Box<Expr>,
    },

    // === Displays ===
    /// `{k: v, **m}`; a `None` key is a `**` unpacking.
    Dict {
        /// Keys, aligned with `values`.
        keys: Vec<Option<Expr>>,
        /// Values, or the mapping unpacked by a `None` key.
        values: Vec<Expr>,
    },
    /// `{a, b}`
    Set(Vec<Expr>),
    /// `[elt for ...]`
    ListComp {
        /// Collected element.
        elt: Box<Expr>,
        /// `for` clauses, outermost first.
        generators: Vec<Comprehension>,
    },
    /// `{elt for ...}`
    SetComp {
        /// Collected element.
        elt: Box<Expr>,
        /// `for` clauses, outermost first.
        generators: Vec<Comprehension>,
    },
    /// `{key: value for ...}`
    DictComp {
        /// Entry key.
        key: Box<Expr>,
        /// Entry value.
        value: Box<Expr>,
        /// `for` clauses, outermost first.
        generators: Vec<Comprehension>,
    },
    /// `(elt for ...)`
    GeneratorExp {
        /// Yielded element.
        elt: Box<Expr>,
        /// `for` clauses, outermost first.
        generators: Vec<Comprehension>,
    },

    // === Coroutines ===
    /// `await value`
    Await(Box<Expr>),
    /// `yield value`
    Yield(Option<Box<Expr>>),
    /// `yield from value`
    YieldFrom(Box<Expr>),

    /// `left op1 c1 op2 c2`
    Compare {
        /// First operand.
        left: Box<Expr>,
        /// Operators, one per comparator.
        ops: Vec<CmpOp>,
        /// Remaining operands.
        comparators: Vec<Expr>,
    },
    /// `func(args, keywords)`
    Call {
        /// Callee.
        func: Box<Expr>,
        /// Positional arguments, `Starred` for `*x`.
        args: Vec<Expr>,
        /// Keyword arguments and `**x`.
        keywords: Vec<Keyword>,
    },

    // === F-strings ===
    /// A replacement field of an f-string.
    FormattedValue {
        /// Formatted expression.
        value: Box<Expr>,
        /// `'s'`, `'r'` or `'a'`.
        conversion: Option<char>,
        /// Always a `JoinedStr` when present.
        format_spec: Option<Box<Expr>>,
    },
    /// An f-string: `String` and `FormattedValue` parts.
    JoinedStr(Vec<Expr>),

    // === Constants ===
    /// Integer that fits in `i64`.
    Int(i64),
    /// Integer outside `i64`, as signed decimal digits.
    BigInt(String),
    /// Float.
    Float(f64),
    /// Complex number.
    Complex {
        /// Real part.
        real: f64,
        /// Imaginary part.
        imag: f64,
    },
    /// String.
    String(String),
    /// Bytes.
    Bytes(Vec<u8>),
    /// `True` / `False`
    Bool(bool),
    /// `None`
    None,
    /// `...`
    Ellipsis,

    // === Targets and primaries ===
    /// `value.attr`
    Attribute {
        /// Object.
        value: Box<Expr>,
        /// Attribute name.
        attr: String,
    },
    /// `value[slice]`
    Subscript {
        /// Subscripted object.
        value: Box<Expr>,
        /// Index, slice or tuple of them.
        slice: Box<Expr>,
    },
    /// `*value`
    Starred(Box<Expr>),
    /// Identifier.
    Name {
        /// Identifier.
        id: String,
        /// Load, store or delete.
        ctx: ExprContext,
    },
    /// `[a, b]`
    List(Vec<Expr>),
    /// `(a, b)`
    Tuple(Vec<Expr>),
    /// `lower:upper:step`
    Slice {
        /// Start bound.
        lower: Option<Box<Expr>>,
        /// Stop bound.
        upper: Option<Box<Expr>>,
        /// Stride.
        step: Option<Box<Expr>>,
    },
}

// =============================================================================
// Operators
// =============================================================================

/// Boolean operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoolOp {
    /// `and`
    And,
    /// `or`
    Or,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mult,
    /// `@`
    MatMult,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `**`
    Pow,
    /// `<<`
    LShift,
    /// `>>`
    RShift,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `&`
    BitAnd,
    /// `//`
    FloorDiv,
}

impl BinOp {
    /// Source spelling.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mult => "*",
            Self::MatMult => "@",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Pow => "**",
            Self::LShift => "<<",
            Self::RShift => ">>",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::BitAnd => "&",
            Self::FloorDiv => "//",
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// `~`
    Invert,
    /// `not`
    Not,
    /// `+`
    UAdd,
    /// `-`
    USub,
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtE,
    /// `>`
    Gt,
    /// `>=`
    GtE,
    /// `is`
    Is,
    /// `is not`
    IsNot,
    /// `in`
    In,
    /// `not in`
    NotIn,
}

impl CmpOp {
    /// Source spelling.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtE => "<=",
            Self::Gt => ">",
            Self::GtE => ">=",
            Self::Is => "is",
            Self::IsNot => "is not",
            Self::In => "in",
            Self::NotIn => "not in",
        }
    }
}

// =============================================================================
// Helper records
// =============================================================================

/// Function or lambda parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Arguments {
    /// Positional-only parameters (before `/`).
    pub posonlyargs: Vec<Arg>,
    /// Regular positional parameters.
    pub args: Vec<Arg>,
    /// `*args`
    pub vararg: Option<Arg>,
    /// Keyword-only parameters.
    pub kwonlyargs: Vec<Arg>,
    /// Defaults of keyword-only parameters, aligned with `kwonlyargs`.
    pub kw_defaults: Vec<Option<Expr>>,
    /// `**kwargs`
    pub kwarg: Option<Arg>,
    /// Defaults of the last positional parameters.
    pub defaults: Vec<Expr>,
}

impl Arguments {
    /// Every parameter in declaration order.
    pub fn all_args(&self) -> impl Iterator<Item = &Arg> {
        self.posonlyargs
            .iter()
            .chain(&self.args)
            .chain(&self.vararg)
            .chain(&self.kwonlyargs)
            .chain(&self.kwarg)
    }

    /// Every parameter in declaration order, mutably.
    pub fn all_args_mut(&mut self) -> impl Iterator<Item = &mut Arg> {
        self.posonlyargs
            .iter_mut()
            .chain(&mut self.args)
            .chain(&mut self.vararg)
            .chain(&mut self.kwonlyargs)
            .chain(&mut self.kwarg)
    }
}

/// A single parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    /// Parameter name.
    pub arg: String,
    /// Optional annotation.
    pub annotation: Option<Box<Expr>>,
    /// Source location.
    pub span: Span,
}

/// A keyword argument; `arg: None` is `**value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    /// Keyword name.
    pub arg: Option<String>,
    /// Argument value.
    pub value: Expr,
    /// Source location.
    pub span: Span,
}

/// An import alias: `name as asname`.
#[derive(Debug, Clone, PartialEq)]
pub struct Alias {
    /// Imported (possibly dotted) name.
    pub name: String,
    /// Local binding.
    pub asname: Option<String>,
    /// Source location.
    pub span: Span,
}

/// One `for ... in ... if ...` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    /// Loop target.
    pub target: Expr,
    /// Iterated expression.
    pub iter: Expr,
    /// Filter conditions.
    pub ifs: Vec<Expr>,
    /// `async for`
    pub is_async: bool,
}

/// An `except` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptHandler {
    /// Exception type.
    pub typ: Option<Box<Expr>>,
    /// Bound name (`as name`).
    pub name: Option<String>,
    /// Handler body.
    pub body: Vec<Stmt>,
    /// Source location.
    pub span: Span,
}

/// A `with` item.
#[derive(Debug, Clone, PartialEq)]
pub struct WithItem {
    /// The context manager.
    pub context_expr: Expr,
    /// The `as` target.
    pub optional_vars: Option<Box<Expr>>,
}

// =============================================================================
// Patterns
// =============================================================================

/// One `case pattern if guard: body` block.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCase {
    /// Pattern tried against the subject.
    pub pattern: Pattern,
    /// Extra condition checked after the pattern binds.
    pub guard: Option<Box<Expr>>,
    /// Case body.
    pub body: Vec<Stmt>,
}

/// A `case` pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    /// Pattern kind.
    pub kind: PatternKind,
    /// Source location.
    pub span: Span,
}

impl Pattern {
    /// Create a new pattern.
    #[must_use]
    pub fn new(kind: PatternKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Every name the pattern binds when it matches, in source order.
    #[must_use]
    pub fn captures(&self) -> Vec<&str> {
        fn collect<'p>(pattern: &'p Pattern, out: &mut Vec<&'p str>) {
            match &pattern.kind {
                PatternKind::Value(_) | PatternKind::Singleton(_) => {}
                PatternKind::Sequence(items) | PatternKind::Or(items) => {
                    for item in items {
                        collect(item, out);
                    }
                }
                PatternKind::Mapping { patterns, rest, .. } => {
                    for item in patterns {
                        collect(item, out);
                    }
                    out.extend(rest.as_deref());
                }
                PatternKind::Class {
                    patterns,
                    kwd_patterns,
                    ..
                } => {
                    for item in patterns.iter().chain(kwd_patterns) {
                        collect(item, out);
                    }
                }
                PatternKind::Star(name) => out.extend(name.as_deref()),
                PatternKind::As { pattern, name } => {
                    if let Some(inner) = pattern {
                        collect(inner, out);
                    }
                    out.extend(name.as_deref());
                }
            }
        }
        let mut out = Vec::new();
        collect(self, &mut out);
        let mut seen = Vec::with_capacity(out.len());
        out.retain(|name| {
            let first = !seen.contains(name);
            seen.push(*name);
            first
        });
        out
    }
}

/// Pattern kinds, after Python's `ast.pattern` family.
#[derive(Debug, Clone, PartialEq)]
pub enum PatternKind {
    /// Literal or dotted name compared with `==`.
    Value(Box<Expr>),
    /// `None`, `True` or `False`, compared with `is`. `None` here is `None`.
    Singleton(Option<bool>),
    /// `[p, *rest]` or `(p, q)`
    Sequence(Vec<Pattern>),
    /// `{key: p, **rest}`
    Mapping {
        /// Literal or dotted-name keys.
        keys: Vec<Expr>,
        /// Value patterns, aligned with `keys`.
        patterns: Vec<Pattern>,
        /// `**rest` capture.
        rest: Option<String>,
    },
    /// `Cls(p, attr=q)`
    Class {
        /// Matched class, a name or dotted name.
        cls: Box<Expr>,
        /// Positional sub-patterns, resolved through `__match_args__`.
        patterns: Vec<Pattern>,
        /// Keyword attribute names.
        kwd_attrs: Vec<String>,
        /// Keyword sub-patterns, aligned with `kwd_attrs`.
        kwd_patterns: Vec<Pattern>,
    },
    /// `*name` inside a sequence; `None` is `*_`.
    Star(Option<String>),
    /// `p as name`, a bare capture (`pattern: None`) or `_` (both `None`).
    As {
        /// Pattern that must match first.
        pattern: Option<Box<Pattern>>,
        /// Captured name.
        name: Option<String>,
    },
    /// `p | q`
    Or(Vec<Pattern>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_args_order() {
        let arg = |n: &str| Arg {
            arg: n.to_string(),
            annotation: None,
            span: Span::dummy(),
        };
        let args = Arguments {
            posonlyargs: vec![arg("a")],
            args: vec![arg("b")],
            vararg: Some(arg("c")),
            kwonlyargs: vec![arg("d")],
            kw_defaults: vec![None],
            kwarg: Some(arg("e")),
            defaults: vec![],
        };
        let names: Vec<_> = args.all_args().map(|a| a.arg.as_str()).collect();
        assert_eq!(names, ["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_constant_detection() {
        assert!(Expr::int(1).is_constant());
        assert!(!Expr::name("x").is_constant());
        assert_eq!(Expr::name("x").as_name(), Some("x"));
    }
}
