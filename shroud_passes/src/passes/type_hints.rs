//! Annotation removal.

use crate::{Pass, PassContext};
use shroud_core::ShroudResult;
use shroud_parser::ast::{Arg, Expr, ExprKind, Stmt, StmtKind};
use shroud_parser::visit::{Transformer, walk_module_mut, walk_stmt_mut};

/// The `type_hints` pass.
pub struct TypeHints;

impl Pass for TypeHints {
    fn name(&self) -> &'static str {
        "type_hints"
    }

    fn description(&self) -> &'static str {
        "Removes type hints"
    }

    fn transform(&mut self, ctx: &mut PassContext<'_>) -> ShroudResult<()> {
        ctx.replace_tree(|tree, _| walk_module_mut(&mut HintStripper, tree))
    }
}

struct HintStripper;

impl Transformer for HintStripper {
    fn visit_stmt(&mut self, stmt: Stmt) -> ShroudResult<Stmt> {
        let span = stmt.span;
        let stmt = match stmt.kind {
            StmtKind::FunctionDef {
                name,
                args,
                body,
                decorator_list,
                returns: _,
                is_async,
            } => Stmt::new(
                StmtKind::FunctionDef {
                    name,
                    args,
                    body,
                    decorator_list,
                    returns: None,
                    is_async,
                },
                span,
            ),
            StmtKind::AnnAssign { target, value, .. } => match (value, &target.kind) {
                (Some(value), _) => assign(*target, *value, span),
                (None, ExprKind::Name { .. }) => assign(*target, Expr::synthetic(ExprKind::None), span),
                // `obj.attr: T` and `obj[k]: T` bind nothing.
                (None, _) => Stmt::new(StmtKind::Pass, span),
            },
            kind => Stmt::new(kind, span),
        };
        walk_stmt_mut(self, stmt)
    }

    fn visit_arg(&mut self, mut arg: Arg) -> ShroudResult<Arg> {
        arg.annotation = None;
        Ok(arg)
    }
}

fn assign(target: Expr, value: Expr, span: shroud_core::Span) -> Stmt {
    Stmt::new(
        StmtKind::Assign {
            targets: vec![target],
            value: Box::new(value),
        },
        span,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use shroud_parser::{parse, unparse};

    fn strip(src: &str) -> String {
        unparse(&walk_module_mut(&mut HintStripper, parse(src).unwrap()).unwrap())
    }

    #[rstest]
    #[case("def f(a: int, *b: str, c: 'x' = 1, **d: bool) -> None:\n    pass\n", "def f(a, *b, c=1, **d):\n    pass\n")]
    #[case("x: int = 5\n", "x = 5\n")]
    #[case("x: int\n", "x = None\n")]
    #[case("self.x: int\n", "pass\n")]
    #[case("lambda_ = lambda a: a\n", "lambda_ = lambda a: a\n")]
    fn test_strip(#[case] src: &str, #[case] expected: &str) {
        assert_eq!(strip(src), expected);
    }

    #[test]
    fn test_nested_functions() {
        let out = strip("class C:\n    y: list[int] = []\n    def m(self, v: int) -> int:\n        z: int = v\n        return z\n");
        assert_eq!(
            out,
            "class C:\n    y = []\n    def m(self, v):\n        z = v\n        return z\n"
        );
    }
}
