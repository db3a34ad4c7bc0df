//! Attribute stores as `setattr` calls.
//!
//! Only single-target assignments are rewritten. Private names (`__x`
//! without a trailing `__`) are mangled the way the compiler would have
//! mangled the attribute inside the enclosing class, since `setattr` takes
//! the name verbatim.

use crate::{Pass, PassContext};
use shroud_core::ShroudResult;
use shroud_parser::ast::{Expr, ExprKind, Stmt, StmtKind};
use shroud_parser::visit::{Transformer, walk_module_mut, walk_stmt_mut};

/// The `attrib_set` pass.
pub struct AttribSet;

impl Pass for AttribSet {
    fn name(&self) -> &'static str {
        "attrib_set"
    }

    fn description(&self) -> &'static str {
        "Replaces direct attribute sets with setattr"
    }

    fn transform(&mut self, ctx: &mut PassContext<'_>) -> ShroudResult<()> {
        ctx.replace_tree(|tree, _| walk_module_mut(&mut SetattrRewriter::default(), tree))
    }
}

#[derive(Default)]
struct SetattrRewriter {
    /// Enclosing class names, innermost last.
    classes: Vec<String>,
}

/// The name Python stores for attribute `attr` written inside class
/// `class`.
pub fn mangle(class: Option<&str>, attr: &str) -> String {
    let private = attr.starts_with("__") && !attr.ends_with("__") && !attr.contains('.');
    match class.map(|c| c.trim_start_matches('_')) {
        Some(owner) if private && !owner.is_empty() => format!("_{owner}{attr}"),
        _ => attr.to_string(),
    }
}

impl Transformer for SetattrRewriter {
    fn visit_stmt(&mut self, stmt: Stmt) -> ShroudResult<Stmt> {
        let is_class = match &stmt.kind {
            StmtKind::ClassDef { name, .. } => {
                self.classes.push(name.clone());
                true
            }
            _ => false,
        };
        let stmt = walk_stmt_mut(self, stmt);
        if is_class {
            self.classes.pop();
        }
        let stmt = stmt?;

        match stmt.kind {
            StmtKind::Assign { mut targets, value } if targets.len() == 1 => {
                match targets.pop().map(|t| (t.kind, t.span)) {
                    Some((ExprKind::Attribute { value: object, attr }, _)) => {
                        let name = mangle(self.classes.last().map(String::as_str), &attr);
                        let mut call = Expr::call(
                            Expr::name("setattr"),
                            vec![*object, Expr::str(name), *value],
                        );
                        call.span = stmt.span;
                        Ok(Stmt::new(StmtKind::Expr(Box::new(call)), stmt.span))
                    }
                    Some((kind, span)) => Ok(Stmt::new(
                        StmtKind::Assign {
                            targets: vec![Expr::new(kind, span)],
                            value,
                        },
                        stmt.span,
                    )),
                    None => Err(shroud_core::ShroudError::internal("assignment without target")),
                }
            }
            kind => Ok(Stmt::new(kind, stmt.span)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use shroud_interp::{Interpreter, Value};
    use shroud_parser::{parse, unparse};

    fn rewrite(src: &str) -> String {
        unparse(&walk_module_mut(&mut SetattrRewriter::default(), parse(src).unwrap()).unwrap())
    }

    #[rstest]
    #[case("a.b = 1\n", "setattr(a, 'b', 1)\n")]
    #[case("a.b.c = f(x)\n", "setattr(a.b, 'c', f(x))\n")]
    #[case("a.b = c.d = 1\n", "a.b = c.d = 1\n")]
    #[case("a[0] = 1\n", "a[0] = 1\n")]
    #[case("x = 1\n", "x = 1\n")]
    fn test_rewrite(#[case] src: &str, #[case] expected: &str) {
        assert_eq!(rewrite(src), expected);
    }

    #[rstest]
    #[case(Some("C"), "__x", "_C__x")]
    #[case(Some("__C"), "__x", "_C__x")]
    #[case(Some("C"), "__x__", "__x__")]
    #[case(Some("C"), "_x", "_x")]
    #[case(Some("___"), "__x", "__x")]
    #[case(None, "__x", "__x")]
    fn test_mangle(#[case] class: Option<&str>, #[case] attr: &str, #[case] expected: &str) {
        assert_eq!(mangle(class, attr), expected);
    }

    #[test]
    fn test_private_attribute_in_method() {
        let out = rewrite("class C:\n    def m(self):\n        self.__v = 1\n");
        assert!(out.contains("setattr(self, '_C__v', 1)"), "{out}");
    }

    #[test]
    fn test_behaviour() {
        let src = "import types\no = types.SimpleNamespace()\no.a = 3\no.b = o.a + 1\nv = o.b\n";
        let interp = Interpreter::run_source(&rewrite(src)).unwrap();
        assert_eq!(interp.global("v"), Some(&Value::Int(4)));
    }
}
