//! Small tree-building helpers shared by the passes.

use shroud_core::{Rng, Span};
use shroud_parser::ast::{
    Arg, Arguments, Comprehension, Expr, ExprKind, Keyword, Stmt, StmtKind,
};

const CONFUSABLE: &[char] = &['l', 'I', 'M', 'N'];

/// A 32-character identifier drawn from visually confusable letters.
pub fn rnd_name(rng: &mut Rng) -> String {
    (0..32).map(|_| *rng.choose(CONFUSABLE)).collect()
}

/// A random valid identifier of `len` characters.
pub fn random_identifier(rng: &mut Rng, len: usize) -> String {
    const FIRST: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ_";
    const REST: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ_0123456789";
    let mut out = String::with_capacity(len);
    for i in 0..len.max(1) {
        let pool = if i == 0 { FIRST } else { REST };
        out.push(char::from(*rng.choose(pool)));
    }
    out
}

/// `__import__('module')`
#[must_use]
pub fn import_call(module: &str) -> Expr {
    Expr::call(Expr::name("__import__"), vec![Expr::str(module)])
}

/// `func(args, **keywords)` with named keywords.
#[must_use]
pub fn call_kw(func: Expr, args: Vec<Expr>, keywords: Vec<(&str, Expr)>) -> Expr {
    Expr::synthetic(ExprKind::Call {
        func: Box::new(func),
        args,
        keywords: keywords
            .into_iter()
            .map(|(name, value)| Keyword {
                arg: Some(name.to_string()),
                value,
                span: Span::dummy(),
            })
            .collect(),
    })
}

/// `[elt for target in iter]`
#[must_use]
pub fn list_comp(elt: Expr, target: &str, iter: Expr) -> Expr {
    Expr::synthetic(ExprKind::ListComp {
        elt: Box::new(elt),
        generators: vec![Comprehension {
            target: Expr::store(target),
            iter,
            ifs: Vec::new(),
            is_async: false,
        }],
    })
}

/// `lambda a, b: body`
#[must_use]
pub fn lambda(params: &[&str], body: Expr) -> Expr {
    Expr::synthetic(ExprKind::Lambda {
        args: Box::new(Arguments {
            args: params
                .iter()
                .map(|p| Arg {
                    arg: (*p).to_string(),
                    annotation: None,
                    span: Span::dummy(),
                })
                .collect(),
            ..Arguments::default()
        }),
        body: Box::new(body),
    })
}

/// `target = value`
#[must_use]
pub fn assign(target: &str, value: Expr) -> Stmt {
    Stmt::synthetic(StmtKind::Assign {
        targets: vec![Expr::store(target)],
        value: Box::new(value),
    })
}

/// Wrap an expression as an f-string replacement field.
#[must_use]
pub fn formatted(value: Expr) -> Expr {
    let span = value.span;
    Expr::new(
        ExprKind::FormattedValue {
            value: Box::new(value),
            conversion: None,
            format_spec: None,
        },
        span,
    )
}

/// Whether `body` opens with a docstring.
#[must_use]
pub fn has_docstring(body: &[Stmt]) -> bool {
    matches!(
        body.first().map(|s| &s.kind),
        Some(StmtKind::Expr(value)) if matches!(value.kind, ExprKind::String(_))
    )
}

/// Index after the leading `from __future__ import …` statements (and a
/// module docstring preceding them), where module-level setup may go.
#[must_use]
pub fn prologue_end(body: &[Stmt]) -> usize {
    let start = usize::from(has_docstring(body));
    let futures = body[start..].iter().take_while(|s| is_future_import(s)).count();
    if futures == 0 { 0 } else { start + futures }
}

fn is_future_import(stmt: &Stmt) -> bool {
    matches!(&stmt.kind, StmtKind::ImportFrom { module: Some(m), .. } if m == "__future__")
}

/// Insert `stmts` at the start of a module body, after any
/// `from __future__` imports.
pub fn insert_prologue(body: &mut Vec<Stmt>, stmts: impl IntoIterator<Item = Stmt>) {
    let at = prologue_end(body);
    body.splice(at..at, stmts);
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_parser::{parse, unparse};

    #[test]
    fn test_rnd_name_alphabet() {
        let mut rng = Rng::seeded(1);
        let name = rnd_name(&mut rng);
        assert_eq!(name.len(), 32);
        assert!(name.chars().all(|c| CONFUSABLE.contains(&c)));
    }

    #[test]
    fn test_random_identifier_is_valid() {
        let mut rng = Rng::seeded(2);
        for len in 1..20 {
            let id = random_identifier(&mut rng, len);
            assert_eq!(id.len(), len);
            assert!(!id.starts_with(|c: char| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_prologue_after_future_imports() {
        let mut module = parse("\"doc\"\nfrom __future__ import annotations\nx = 1\n").unwrap();
        insert_prologue(&mut module.body, [assign("t", Expr::int(0))]);
        assert_eq!(
            unparse(&module),
            "'doc'\nfrom __future__ import annotations\nt = 0\nx = 1\n"
        );
    }

    #[test]
    fn test_prologue_without_future_imports() {
        let mut module = parse("x = 1\n").unwrap();
        insert_prologue(&mut module.body, [assign("t", Expr::int(0))]);
        assert_eq!(unparse(&module), "t = 0\nx = 1\n");
    }
}
