//! Opaque predicates around branch tests.
//!
//! `if T:` becomes
//!
//! ```text
//! if ((not (T and __import__('random').betavariate(a, b) != c)) << r) != 1 << r:
//! ```
//!
//! or the same with `T or ... == c`. A beta variate lies in `[0, 1]`, so with
//! `c > 1` the extra clause never changes the outcome. The outer shift and
//! compare is true exactly when the inner test is truthy, whatever its type.

use crate::util::import_call;
use crate::{Pass, PassContext};
use shroud_core::{Rng, ShroudResult};
use shroud_parser::ast::{BinOp, BoolOp, CmpOp, Expr, ExprKind, Stmt, StmtKind, UnaryOp};
use shroud_parser::visit::{Transformer, walk_module_mut, walk_stmt_mut};

/// The `logic` pass.
pub struct Logic;

impl Pass for Logic {
    fn name(&self) -> &'static str {
        "logic"
    }

    fn description(&self) -> &'static str {
        "Transforms boolean logic into confusing, but equally valid statements"
    }

    fn transform(&mut self, ctx: &mut PassContext<'_>) -> ShroudResult<()> {
        ctx.replace_tree(|tree, ctx| walk_module_mut(&mut Complicator { rng: ctx.rng }, tree))
    }
}

struct Complicator<'r> {
    rng: &'r mut Rng,
}

fn float(v: f64) -> Expr {
    Expr::synthetic(ExprKind::Float(v))
}

fn compare(left: Expr, op: CmpOp, right: Expr) -> Expr {
    Expr::synthetic(ExprKind::Compare {
        left: Box::new(left),
        ops: vec![op],
        comparators: vec![right],
    })
}

impl Complicator<'_> {
    /// `T and <never equal>` or `T or <never equal>`.
    fn pad(&mut self, test: Expr) -> Expr {
        let and = self.rng.coin();
        let variate = Expr::call(
            Expr::attr(import_call("random"), "betavariate"),
            vec![
                float(self.rng.uniform(1.0, 100.0)),
                float(self.rng.uniform(1.0, 100.0)),
            ],
        );
        let bound = float(self.rng.uniform(1.1, 100.0));
        let (op, cmp) = if and {
            (BoolOp::And, CmpOp::NotEq)
        } else {
            (BoolOp::Or, CmpOp::Eq)
        };
        Expr::synthetic(ExprKind::BoolOp {
            op,
            values: vec![test, compare(variate, cmp, bound)],
        })
    }

    /// `((not X) << r) != 1 << r`
    fn wrap(&mut self, test: Expr) -> Expr {
        let r = self.rng.range_inclusive(3, 16);
        let negated = Expr::synthetic(ExprKind::UnaryOp {
            op: UnaryOp::Not,
            operand: Box::new(test),
        });
        compare(
            Expr::binop(negated, BinOp::LShift, Expr::int(r)),
            CmpOp::NotEq,
            Expr::int(1 << r),
        )
    }

    fn complicate(&mut self, test: Box<Expr>) -> Box<Expr> {
        let span = test.span;
        let padded = self.pad(*test);
        let mut out = self.wrap(padded);
        out.span = span;
        Box::new(out)
    }
}

impl Transformer for Complicator<'_> {
    fn visit_stmt(&mut self, stmt: Stmt) -> ShroudResult<Stmt> {
        let stmt = walk_stmt_mut(self, stmt)?;
        let kind = match stmt.kind {
            StmtKind::If { test, body, orelse } => StmtKind::If {
                test: self.complicate(test),
                body,
                orelse,
            },
            StmtKind::While { test, body, orelse } => StmtKind::While {
                test: self.complicate(test),
                body,
                orelse,
            },
            kind => kind,
        };
        Ok(Stmt::new(kind, stmt.span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use shroud_interp::{Interpreter, Value};
    use shroud_parser::{parse, unparse};

    fn complicate(src: &str, seed: u64) -> String {
        let mut rng = Rng::seeded(seed);
        let tree = walk_module_mut(&mut Complicator { rng: &mut rng }, parse(src).unwrap()).unwrap();
        unparse(&tree)
    }

    #[rstest]
    #[case("1")]
    #[case("0")]
    #[case("'text'")]
    #[case("''")]
    #[case("[0]")]
    #[case("[]")]
    #[case("None")]
    #[case("2 > 1")]
    fn test_truthiness_preserved(#[case] test: &str, #[values(1, 2, 3, 4)] seed: u64) {
        let src = format!("v = 0\nif {test}:\n    v = 1\nelse:\n    v = 2\n");
        let expected = Interpreter::run_source(&src).unwrap().global("v").cloned();
        let out = complicate(&src, seed);
        let actual = Interpreter::run_source(&out).unwrap().global("v").cloned();
        assert_eq!(actual, expected, "{out}");
    }

    #[test]
    fn test_while_and_elif() {
        let src = "n = 0\nwhile n < 5:\n    n = n + 1\nif n == 1:\n    v = 1\nelif n == 5:\n    v = 5\n";
        let out = complicate(src, 9);
        assert_eq!(out.matches("betavariate").count(), 3, "{out}");
        let interp = Interpreter::run_source(&out).unwrap();
        assert_eq!(interp.global("v"), Some(&Value::Int(5)));
    }

    #[test]
    fn test_shape() {
        let out = complicate("if x:\n    pass\n", 1);
        let line = out.lines().next().unwrap();
        assert!(line.starts_with("if (not (x "), "{line}");
        assert!(line.contains("__import__('random').betavariate("), "{line}");
    }
}
