//! Builder routines that reassemble code units at run time.
//!
//! A builder fills an eighteen-slot list one slice-insert at a time and
//! calls the code constructor on it:
//!
//! ```text
//! def <name>():
//!     a = [None] * 18
//!     a = [*a[:6], b'...', *a[7:]]      # statements in random order
//!     a = [*a[:1], 0, 0, *a[3:]]        # adjacent equal fields share one
//!     ...
//!     return type(b.__code__)(*a)
//! ```
//!
//! `b` is a module-level function whose code type is borrowed.

use crate::util::assign;
use rustc_hash::FxHashMap;
use shroud_compiler::{CodeUnit, Constant, Opcode, marshal};
use shroud_core::{Rng, ShroudResult};
use shroud_parser::ast::{Arguments, BinOp, Expr, ExprKind, Stmt, StmtKind};
use shroud_parser::unparse_expr;

/// Name of the function whose `__code__` supplies the code type.
pub const TYPE_DONOR: &str = "b";

/// Name of the slot list inside a builder.
const SLOTS: &str = "a";

/// Overwrite every inline cache entry of `code` with random bytes.
///
/// The interpreter ignores cache contents on entry, so this changes the
/// bytes without changing behaviour.
pub fn randomize_caches(code: &mut [u8], rng: &mut Rng) {
    let mut i = 0;
    while i + 1 < code.len() {
        let caches = Opcode::from_u8(code[i]).map_or(0, Opcode::cache_entries);
        let end = (i + 2 + 2 * caches).min(code.len());
        for byte in &mut code[i + 2..end] {
            *byte = (rng.next_u64() & 0xFF) as u8;
        }
        i += 2 + 2 * caches;
    }
}

/// Builder names keyed by the unit they rebuild.
#[derive(Debug, Default)]
pub struct BuilderNames {
    names: FxHashMap<*const CodeUnit, String>,
}

impl BuilderNames {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` as the builder of `unit`.
    pub fn insert(&mut self, unit: &CodeUnit, name: String) {
        self.names.insert(std::ptr::from_ref(unit), name);
    }

    /// Builder of `unit`, if one was registered.
    #[must_use]
    pub fn get(&self, unit: &CodeUnit) -> Option<&str> {
        self.names.get(&std::ptr::from_ref(unit)).map(String::as_str)
    }

    /// A constant as a source expression. Nested code units become calls
    /// of their builders, or `marshal.loads` of their bytes when no
    /// builder exists.
    pub fn constant(&self, value: &Constant) -> ShroudResult<Expr> {
        let kind = match value {
            Constant::None => ExprKind::None,
            Constant::Bool(b) => ExprKind::Bool(*b),
            Constant::Int(v) => ExprKind::Int(*v),
            Constant::BigInt(digits) => ExprKind::BigInt(digits.clone()),
            Constant::Float(v) => ExprKind::Float(*v),
            Constant::Complex { real, imag } => ExprKind::Complex {
                real: *real,
                imag: *imag,
            },
            Constant::Str(s) => ExprKind::String(s.clone()),
            Constant::Bytes(b) => ExprKind::Bytes(b.clone()),
            Constant::Ellipsis => ExprKind::Ellipsis,
            Constant::Tuple(items) => ExprKind::Tuple(
                items
                    .iter()
                    .map(|item| self.constant(item))
                    .collect::<ShroudResult<_>>()?,
            ),
            Constant::Code(code) => {
                return Ok(match self.get(code) {
                    Some(builder) => Expr::call(Expr::name(builder), Vec::new()),
                    None => Expr::call(
                        Expr::attr(crate::util::import_call("marshal"), "loads"),
                        vec![Expr::synthetic(ExprKind::Bytes(marshal::dumps(code)?))],
                    ),
                });
            }
        };
        Ok(Expr::synthetic(kind))
    }

    /// The eighteen constructor arguments of `unit`, with `code` in place
    /// of its instruction stream. Name, qualified name, first line and
    /// location table are blanked.
    pub fn fields(&self, unit: &CodeUnit, code: Vec<u8>) -> ShroudResult<Vec<Expr>> {
        let int = |v: u32| Expr::int(i64::from(v));
        let strings = |items: &[String]| {
            Expr::synthetic(ExprKind::Tuple(items.iter().map(|s| Expr::str(s.as_str())).collect()))
        };
        let bytes = |b: Vec<u8>| Expr::synthetic(ExprKind::Bytes(b));
        let consts = unit
            .consts
            .iter()
            .map(|c| self.constant(c))
            .collect::<ShroudResult<Vec<_>>>()?;

        Ok(vec![
            int(unit.argcount),
            int(unit.posonlyargcount),
            int(unit.kwonlyargcount),
            int(unit.nlocals),
            int(unit.stacksize),
            int(unit.flags.bits()),
            bytes(code),
            Expr::synthetic(ExprKind::Tuple(consts)),
            strings(&unit.names),
            strings(&unit.varnames),
            Expr::str(unit.filename.as_str()),
            Expr::str(""),
            Expr::str(""),
            Expr::int(0),
            bytes(Vec::new()),
            bytes(unit.exceptiontable.clone()),
            strings(&unit.freevars),
            strings(&unit.cellvars),
        ])
    }

    /// The builder routine `name` for `unit`.
    pub fn builder(&self, name: &str, unit: &CodeUnit, rng: &mut Rng) -> ShroudResult<Stmt> {
        let mut code = unit.code.clone();
        randomize_caches(&mut code, rng);
        let fields = self.fields(unit, code)?;
        Ok(builder_def(name, fields, rng))
    }
}

fn slots() -> Expr {
    Expr::name(SLOTS)
}

fn slice(lower: Option<usize>, upper: Option<usize>) -> Expr {
    let bound = |v: Option<usize>| v.map(|v| Box::new(Expr::int(v as i64)));
    Expr::subscript(
        slots(),
        Expr::synthetic(ExprKind::Slice {
            lower: bound(lower),
            upper: bound(upper),
            step: None,
        }),
    )
}

fn starred(value: Expr) -> Expr {
    Expr::synthetic(ExprKind::Starred(Box::new(value)))
}

/// `a = [*a[:start], v, v, …, *a[start + n:]]`
fn slice_insert(start: usize, values: Vec<Expr>) -> Stmt {
    let end = start + values.len();
    let mut elts = Vec::with_capacity(values.len() + 2);
    elts.push(starred(slice(None, Some(start))));
    elts.extend(values);
    elts.push(starred(slice(Some(end), None)));
    assign(SLOTS, Expr::synthetic(ExprKind::List(elts)))
}

/// Runs of equal adjacent fields, as (start, fields).
fn runs(fields: Vec<Expr>) -> Vec<(usize, Vec<Expr>)> {
    let mut out: Vec<(usize, Vec<Expr>, String)> = Vec::new();
    for (i, field) in fields.into_iter().enumerate() {
        let rendered = unparse_expr(&field);
        match out.last_mut() {
            Some((_, run, last)) if *last == rendered => run.push(field),
            _ => out.push((i, vec![field], rendered)),
        }
    }
    out.into_iter().map(|(start, run, _)| (start, run)).collect()
}

/// A parameter-less `def` that rebuilds a code unit from `fields`.
pub fn builder_def(name: &str, fields: Vec<Expr>, rng: &mut Rng) -> Stmt {
    let count = fields.len();
    let mut inserts: Vec<Stmt> = runs(fields)
        .into_iter()
        .map(|(start, run)| slice_insert(start, run))
        .collect();
    rng.shuffle(&mut inserts);

    let mut body = Vec::with_capacity(inserts.len() + 2);
    body.push(assign(
        SLOTS,
        Expr::binop(
            Expr::synthetic(ExprKind::List(vec![Expr::synthetic(ExprKind::None)])),
            BinOp::Mult,
            Expr::int(count as i64),
        ),
    ));
    body.extend(inserts);
    let code_type = Expr::call(
        Expr::name("type"),
        vec![Expr::attr(Expr::name(TYPE_DONOR), "__code__")],
    );
    body.push(Stmt::synthetic(StmtKind::Return(Some(Box::new(Expr::call(
        code_type,
        vec![starred(slots())],
    ))))));
    function(name, body)
}

/// `def name(): body`
pub fn function(name: &str, body: Vec<Stmt>) -> Stmt {
    Stmt::synthetic(StmtKind::FunctionDef {
        name: name.to_string(),
        args: Box::new(Arguments::default()),
        body,
        decorator_list: Vec::new(),
        returns: None,
        is_async: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_compiler::compile_module;
    use shroud_parser::{parse, unparse_stmt};

    #[test]
    fn test_randomize_caches_only_touches_caches() {
        let unit = compile_module(&parse("x = len([1, 2])\ny = x + 1\n").unwrap(), "").unwrap();
        let mut code = unit.code.clone();
        randomize_caches(&mut code, &mut Rng::seeded(4));
        assert_ne!(code, unit.code);
        let scrambled = CodeUnit { code, ..unit.clone() };
        assert_eq!(scrambled.code_without_caches(), unit.code_without_caches());
    }

    #[test]
    fn test_equal_neighbours_share_an_insert() {
        let fields = vec![Expr::int(0), Expr::int(0), Expr::int(0), Expr::str("x"), Expr::int(0)];
        let def = builder_def("f", fields, &mut Rng::seeded(1));
        let src = unparse_stmt(&def);
        assert!(src.starts_with("def f():\n    a = [None] * 5\n"), "{src}");
        assert!(src.contains("a = [*a[:0], 0, 0, 0, *a[3:]]"), "{src}");
        assert!(src.contains("a = [*a[:3], 'x', *a[4:]]"), "{src}");
        assert!(src.contains("a = [*a[:4], 0, *a[5:]]"), "{src}");
        assert!(src.ends_with("    return type(b.__code__)(*a)\n"), "{src}");
    }

    #[test]
    fn test_fields_blank_identity() {
        let unit = compile_module(&parse("def f(p):\n    return p\n").unwrap(), "").unwrap();
        let inner = unit.nested()[0];
        let mut names = BuilderNames::new();
        names.insert(inner, "build_f".to_string());
        let fields = names.fields(&unit, unit.code.clone()).unwrap();
        assert_eq!(fields.len(), CodeUnit::FIELD_COUNT);
        let rendered: Vec<String> = fields.iter().map(unparse_expr).collect();
        assert!(rendered[7].contains("build_f()"), "{}", rendered[7]);
        assert_eq!(rendered[11], "''");
        assert_eq!(rendered[12], "''");
        assert_eq!(rendered[13], "0");
        assert_eq!(rendered[14], "b''");
    }

    #[test]
    fn test_unregistered_code_is_marshalled() {
        let unit = compile_module(&parse("def f():\n    pass\n").unwrap(), "").unwrap();
        let names = BuilderNames::new();
        let code = unit
            .consts
            .iter()
            .find(|c| c.as_code().is_some())
            .unwrap();
        let rendered = unparse_expr(&names.constant(code).unwrap());
        assert!(rendered.starts_with("__import__('marshal').loads(b'"), "{rendered}");
    }
}
