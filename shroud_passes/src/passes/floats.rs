//! Number literals as magnitudes on the complex plane.
//!
//! An integer `c` becomes `round(abs(a + bj))` for a random point `(a, b)`
//! on the circle of radius `c`. A float adds its exact fractional part to
//! the rebuilt integer part, so the sum is bit-identical to the literal.

use crate::{Pass, PassContext};
use shroud_core::{Rng, ShroudResult};
use shroud_parser::ast::{BinOp, Expr, ExprKind, UnaryOp};
use shroud_parser::visit::{Transformer, walk_expr_mut, walk_module_mut};

/// Magnitudes at or above this lose integer precision through `abs()`.
const LIMIT: f64 = 2_147_483_648.0;

/// The `floats` pass.
pub struct Floats;

impl Pass for Floats {
    fn name(&self) -> &'static str {
        "floats"
    }

    fn description(&self) -> &'static str {
        "Rewrites numbers as the magnitude of a complex value, recovered at run time"
    }

    fn transform(&mut self, ctx: &mut PassContext<'_>) -> ShroudResult<()> {
        ctx.replace_tree(|tree, ctx| walk_module_mut(&mut ComplexRewriter { rng: ctx.rng }, tree))
    }
}

struct ComplexRewriter<'r> {
    rng: &'r mut Rng,
}

impl Transformer for ComplexRewriter<'_> {
    fn visit_expr(&mut self, expr: Expr) -> ShroudResult<Expr> {
        let rewritten = match expr.kind {
            ExprKind::Int(v) if (v.unsigned_abs() as f64) < LIMIT => {
                Some(signed(v < 0, magnitude_expr(v.unsigned_abs() as f64, self.rng)))
            }
            ExprKind::Float(v) if v.is_finite() && v.abs() < LIMIT && !(v == 0.0 && v.is_sign_negative()) => {
                let whole = v.abs().trunc();
                let fraction = v.abs() - whole;
                let rebuilt = Expr::binop(
                    magnitude_expr(whole, self.rng),
                    BinOp::Add,
                    Expr::synthetic(ExprKind::Float(fraction)),
                );
                Some(signed(v < 0.0, rebuilt))
            }
            _ => None,
        };
        match rewritten {
            Some(mut out) => {
                out.span = expr.span;
                Ok(out)
            }
            None => walk_expr_mut(self, expr),
        }
    }
}

fn signed(negative: bool, expr: Expr) -> Expr {
    if negative {
        Expr::synthetic(ExprKind::UnaryOp {
            op: UnaryOp::USub,
            operand: Box::new(expr),
        })
    } else {
        expr
    }
}

/// `round(abs(a + bj))` with `a² + b² = c²`.
pub fn magnitude_expr(c: f64, rng: &mut Rng) -> Expr {
    let a = rng.uniform(0.0, c);
    let b = (c * c - a * a).max(0.0).sqrt();
    let point = Expr::binop(
        Expr::synthetic(ExprKind::Float(a)),
        BinOp::Add,
        Expr::synthetic(ExprKind::Complex { real: 0.0, imag: b }),
    );
    Expr::call(
        Expr::name("round"),
        vec![Expr::call(Expr::name("abs"), vec![point])],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;
    use shroud_interp::{Value, eval_source};
    use shroud_parser::{parse_expression, unparse_expr};

    fn rewrite(src: &str, seed: u64) -> Expr {
        let mut rng = Rng::seeded(seed);
        ComplexRewriter { rng: &mut rng }
            .visit_expr(parse_expression(src).unwrap())
            .unwrap()
    }

    fn eval(expr: &Expr) -> Value {
        eval_source(&unparse_expr(expr)).unwrap()
    }

    #[rstest]
    #[case("0", Value::Int(0))]
    #[case("1", Value::Int(1))]
    #[case("-7", Value::Int(-7))]
    #[case("2147483647", Value::Int(2_147_483_647))]
    #[case("0.5", Value::Float(0.5))]
    #[case("3.0", Value::Float(3.0))]
    #[case("-123.456", Value::Float(-123.456))]
    fn test_values_survive(#[case] src: &str, #[case] expected: Value) {
        assert_eq!(eval(&rewrite(src, 11)), expected);
    }

    #[test]
    fn test_shape() {
        let text = unparse_expr(&rewrite("9", 5));
        assert!(text.starts_with("round(abs("), "{text}");
        assert!(text.contains("j))"), "{text}");
    }

    #[rstest]
    #[case("2147483648")]
    #[case("True")]
    #[case("1e300")]
    #[case("'9'")]
    fn test_out_of_range_untouched(#[case] src: &str) {
        let expr = parse_expression(src).unwrap();
        assert_eq!(rewrite(src, 1).kind, expr.kind);
    }

    proptest! {
        #[test]
        fn test_ints_reconstruct(v in -2_147_483_647i64..2_147_483_647, seed in any::<u64>()) {
            let mut rng = Rng::seeded(seed);
            let expr = signed(v < 0, magnitude_expr(v.unsigned_abs() as f64, &mut rng));
            prop_assert_eq!(eval(&expr), Value::Int(i128::from(v)));
        }

        #[test]
        fn test_floats_reconstruct(v in -1.0e9f64..1.0e9, seed in any::<u64>()) {
            let mut rng = Rng::seeded(seed);
            let out = ComplexRewriter { rng: &mut rng }
                .visit_expr(Expr::synthetic(ExprKind::Float(v)))
                .unwrap();
            prop_assert_eq!(eval(&out), Value::Float(v));
        }
    }
}
