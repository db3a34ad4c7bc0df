//! Integer literal obfuscation.
//!
//! Two encodings:
//!
//! - `bits`: the literal as an OR of shifted `True` values, with the shift
//!   counts encoded the same way, so no digit survives. `0` and `1` become
//!   `True >> True` and `+True`, which evaluate to `int` rather than `bool`.
//! - `decode`: the literal's little-endian two's-complement bytes, each
//!   stored as a three-digit code `off - (byte + index)`, rebuilt at run time
//!   with `int.from_bytes`.

use crate::util::{call_kw, lambda};
use crate::{Pass, PassContext};
use shroud_core::{OptionDomain, OptionSpec, Rng, ShroudResult};
use shroud_parser::ast::{BinOp, Expr, ExprKind, UnaryOp};
use shroud_parser::visit::{Transformer, walk_expr_mut, walk_module_mut};

const MODES: &[&str] = &["bits", "decode"];

/// The `numeric` pass.
pub struct Numeric;

impl Pass for Numeric {
    fn name(&self) -> &'static str {
        "numeric"
    }

    fn description(&self) -> &'static str {
        "Obscures integer literals"
    }

    fn options(&self) -> Vec<OptionSpec> {
        vec![
            OptionSpec::new("mode", "How to encode integers: bits or decode", "bits")
                .with_domain(OptionDomain::OneOf(MODES)),
        ]
    }

    fn transform(&mut self, ctx: &mut PassContext<'_>) -> ShroudResult<()> {
        let decode = ctx.options.str("mode")? == "decode";
        ctx.replace_tree(|tree, ctx| {
            let mut rewriter = IntRewriter {
                decode,
                rng: ctx.rng,
            };
            walk_module_mut(&mut rewriter, tree)
        })
    }
}

struct IntRewriter<'r> {
    decode: bool,
    rng: &'r mut Rng,
}

impl Transformer for IntRewriter<'_> {
    fn visit_expr(&mut self, expr: Expr) -> ShroudResult<Expr> {
        match expr.kind {
            ExprKind::Int(v) => {
                let mut out = if self.decode {
                    decode_expr(v, self.rng)
                } else {
                    bits_expr(v)
                };
                out.span = expr.span;
                Ok(out)
            }
            _ => walk_expr_mut(self, expr),
        }
    }
}

fn truth() -> Expr {
    Expr::synthetic(ExprKind::Bool(true))
}

fn unary(op: UnaryOp, operand: Expr) -> Expr {
    Expr::synthetic(ExprKind::UnaryOp {
        op,
        operand: Box::new(operand),
    })
}

/// `v` as shifted `True` values.
#[must_use]
pub fn bits_expr(v: i64) -> Expr {
    let magnitude = bits_of(u128::from(v.unsigned_abs()));
    if v < 0 {
        unary(UnaryOp::USub, magnitude)
    } else {
        magnitude
    }
}

fn bits_of(v: u128) -> Expr {
    match v {
        0 => Expr::binop(truth(), BinOp::RShift, truth()),
        1 => unary(UnaryOp::UAdd, truth()),
        _ => {
            let mut terms = (0..128u32).filter(|k| (v >> k) & 1 == 1).map(|k| {
                if k == 0 {
                    truth()
                } else {
                    Expr::binop(truth(), BinOp::LShift, bits_of(u128::from(k)))
                }
            });
            let first = terms.next().unwrap_or_else(truth);
            terms.fold(first, |acc, term| Expr::binop(acc, BinOp::BitOr, term))
        }
    }
}

/// Little-endian two's-complement bytes of `v`, as `int.to_bytes` with
/// the minimal length for its sign produces them.
fn le_bytes(v: i64) -> Vec<u8> {
    let negative = v < 0;
    let bit_length = 64 - v.unsigned_abs().leading_zeros();
    let len = (bit_length + u32::from(negative)).div_ceil(8) as usize;
    i128::from(v).to_le_bytes()[..len].to_vec()
}

/// `v` as offset byte codes decoded by `int.from_bytes`.
pub fn decode_expr(v: i64, rng: &mut Rng) -> Expr {
    let bytes = le_bytes(v);
    let n = bytes.len() as i64;
    let off = rng.range_inclusive(255 + n, 999);
    let encoded: String = bytes
        .iter()
        .zip(0i64..)
        .map(|(b, i)| format!("{:03}", off - (i64::from(*b) + i)))
        .collect();

    // lambda O, i: off - (int(O) + i)
    let decoder = lambda(
        &["O", "i"],
        Expr::binop(
            Expr::int(off),
            BinOp::Sub,
            Expr::binop(
                Expr::call(Expr::name("int"), vec![Expr::name("O")]),
                BinOp::Add,
                Expr::name("i"),
            ),
        ),
    );
    // map(''.join, zip(*[iter(encoded)] * 3))
    let triples = Expr::call(
        Expr::name("map"),
        vec![
            Expr::attr(Expr::str(""), "join"),
            Expr::call(
                Expr::name("zip"),
                vec![Expr::synthetic(ExprKind::Starred(Box::new(Expr::binop(
                    Expr::synthetic(ExprKind::List(vec![Expr::call(
                        Expr::name("iter"),
                        vec![Expr::str(encoded)],
                    )])),
                    BinOp::Mult,
                    Expr::int(3),
                ))))],
            ),
        ],
    );
    let codes = Expr::call(
        Expr::name("map"),
        vec![
            decoder,
            triples,
            Expr::call(Expr::name("range"), vec![Expr::int(n)]),
        ],
    );
    call_kw(
        Expr::attr(Expr::name("int"), "from_bytes"),
        vec![codes, Expr::str("little")],
        vec![("signed", Expr::synthetic(ExprKind::Bool(v < 0)))],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;
    use shroud_interp::{Value, eval_source};
    use shroud_parser::unparse_expr;

    fn eval(expr: &Expr) -> Value {
        eval_source(&unparse_expr(expr)).unwrap()
    }

    #[rstest]
    #[case(0, "True >> True")]
    #[case(1, "+True")]
    #[case(2, "True << +True")]
    #[case(3, "True | True << +True")]
    #[case(-1, "- +True")]
    fn test_bits_shapes(#[case] v: i64, #[case] expected: &str) {
        assert_eq!(unparse_expr(&bits_expr(v)), expected);
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(-1)]
    #[case(255)]
    #[case(-128)]
    #[case(i64::MAX)]
    #[case(i64::MIN)]
    fn test_bits_evaluate_to_int(#[case] v: i64) {
        assert_eq!(eval(&bits_expr(v)), Value::Int(i128::from(v)));
    }

    #[test]
    fn test_bits_leave_no_digits() {
        for v in [7, 42, 1000, -65537] {
            let text = unparse_expr(&bits_expr(v));
            assert!(!text.contains(|c: char| c.is_ascii_digit()), "{text}");
        }
    }

    #[rstest]
    #[case(0, vec![])]
    #[case(1, vec![1])]
    #[case(-1, vec![0xff])]
    #[case(128, vec![0x80])]
    #[case(-128, vec![0x80, 0xff])]
    #[case(-129, vec![0x7f, 0xff])]
    #[case(256, vec![0x00, 0x01])]
    fn test_le_bytes_minimal(#[case] v: i64, #[case] expected: Vec<u8>) {
        assert_eq!(le_bytes(v), expected);
    }

    #[test]
    fn test_decode_call_shape() {
        let mut rng = Rng::seeded(3);
        let expr = decode_expr(-70000, &mut rng);
        let text = unparse_expr(&expr);
        assert!(text.starts_with("int.from_bytes(map(lambda O, i: "));
        assert!(text.ends_with("'little', signed=True)"));
    }

    proptest! {
        #[test]
        fn test_bits_reconstruct(v in any::<i64>()) {
            prop_assert_eq!(eval(&bits_expr(v)), Value::Int(i128::from(v)));
        }

        #[test]
        fn test_decode_reconstructs(v in any::<i64>(), seed in any::<u64>()) {
            let mut rng = Rng::seeded(seed);
            prop_assert_eq!(eval(&decode_expr(v, &mut rng)), Value::Int(i128::from(v)));
        }
    }
}
