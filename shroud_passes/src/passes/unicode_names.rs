//! Identifiers respelled with mathematical letters.
//!
//! Python normalizes identifiers with NFKC, which folds the sans-serif
//! letters of the Mathematical Alphanumeric Symbols block back to ASCII, so
//! the respelled names still resolve to the same bindings.

use crate::{Pass, PassContext};
use shroud_core::{Rng, ShroudResult};
use shroud_parser::ast::{Expr, ExprKind};
use shroud_parser::visit::{Transformer, walk_expr_mut, walk_module_mut};

/// First code point of the Mathematical Alphanumeric Symbols letters.
const MATH_LETTERS: u32 = 0x1D400;

/// Sans-serif bold, sans-serif italic and sans-serif bold italic. Each has
/// the full alphabet without reserved holes.
const STYLES: &[u32] = &[9, 10, 11];

/// The `unicode_names` pass.
pub struct UnicodeNames;

impl Pass for UnicodeNames {
    fn name(&self) -> &'static str {
        "unicode_names"
    }

    fn description(&self) -> &'static str {
        "Converts names to equally valid, but weird looking unicode names"
    }

    fn transform(&mut self, ctx: &mut PassContext<'_>) -> ShroudResult<()> {
        ctx.replace_tree(|tree, ctx| walk_module_mut(&mut Respeller { rng: ctx.rng }, tree))
    }
}

struct Respeller<'r> {
    rng: &'r mut Rng,
}

/// A random mathematical variant of an ASCII letter; other characters are
/// returned unchanged.
pub fn respell_char(c: char, rng: &mut Rng) -> char {
    let index = match c {
        'A'..='Z' => u32::from(c) - u32::from('A'),
        'a'..='z' => 26 + u32::from(c) - u32::from('a'),
        _ => return c,
    };
    let style = *rng.choose(STYLES);
    char::from_u32(MATH_LETTERS + 52 * style + index).unwrap_or(c)
}

impl Transformer for Respeller<'_> {
    fn visit_expr(&mut self, expr: Expr) -> ShroudResult<Expr> {
        match expr.kind {
            ExprKind::Name { id, ctx } => {
                let id = id.chars().map(|c| respell_char(c, self.rng)).collect();
                Ok(Expr::new(ExprKind::Name { id, ctx }, expr.span))
            }
            kind => walk_expr_mut(self, Expr::new(kind, expr.span)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_parser::{parse, unparse};

    #[test]
    fn test_letters_map_into_sans_serif_styles() {
        let mut rng = Rng::seeded(3);
        for c in ['a', 'z', 'A', 'Z'] {
            let out = u32::from(respell_char(c, &mut rng));
            assert!((0x1D5D4..0x1D670).contains(&out), "{c} -> {out:x}");
        }
        assert_eq!(respell_char('_', &mut rng), '_');
        assert_eq!(respell_char('7', &mut rng), '7');
    }

    #[test]
    fn test_bold_style_offsets() {
        // MATHEMATICAL SANS-SERIF BOLD CAPITAL A / SMALL A
        assert_eq!(MATH_LETTERS + 52 * 9, 0x1D5D4);
        assert_eq!(MATH_LETTERS + 52 * 9 + 26, 0x1D5EE);
    }

    #[test]
    fn test_only_names_change() {
        let mut rng = Rng::seeded(8);
        let tree = parse("x_1 = obj.attr\n").unwrap();
        let out = unparse(&walk_module_mut(&mut Respeller { rng: &mut rng }, tree).unwrap());
        assert!(out.contains(".attr"), "{out}");
        assert!(!out.starts_with('x'), "{out}");
        assert!(out.contains("_1 = "), "{out}");
    }
}
