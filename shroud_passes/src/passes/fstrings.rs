//! F-string lowering to `str.format`.
//!
//! `f'a{x!r:>4}b'` becomes `'a{:>4}b'.format(repr(x))`. Conversions map to
//! the matching builtin call; format specs must be made of literal text.

use crate::{Pass, PassContext};
use shroud_core::{ShroudError, ShroudResult};
use shroud_parser::ast::{Expr, ExprKind};
use shroud_parser::visit::{Transformer, walk_expr_mut, walk_module_mut};

/// The `fstrings` pass.
pub struct Fstrings;

impl Pass for Fstrings {
    fn name(&self) -> &'static str {
        "fstrings"
    }

    fn description(&self) -> &'static str {
        "Converts f-strings to their str.format equivalent"
    }

    fn transform(&mut self, ctx: &mut PassContext<'_>) -> ShroudResult<()> {
        let file = ctx.file().to_string();
        ctx.replace_tree(|tree, _| walk_module_mut(&mut FormatLowering { file: &file }, tree))
    }
}

struct FormatLowering<'a> {
    file: &'a str,
}

/// Builtin applied for a conversion character.
fn conversion_builtin(c: char) -> Option<&'static str> {
    match c {
        's' => Some("str"),
        'r' => Some("repr"),
        'a' => Some("ascii"),
        _ => None,
    }
}

fn escape_braces(text: &str) -> String {
    text.replace('{', "{{").replace('}', "}}")
}

impl FormatLowering<'_> {
    /// The literal text of a format spec.
    fn spec_text(&self, spec: &Expr) -> ShroudResult<String> {
        let parts = match &spec.kind {
            ExprKind::JoinedStr(parts) => parts.as_slice(),
            _ => std::slice::from_ref(spec),
        };
        let mut text = String::new();
        for part in parts {
            match &part.kind {
                ExprKind::String(s) => text.push_str(&escape_braces(s)),
                _ => {
                    return Err(ShroudError::invalid_input(
                        self.file,
                        part.span,
                        "Non-constant format specs are not supported",
                    ));
                }
            }
        }
        Ok(text)
    }

    fn lower(&mut self, parts: Vec<Expr>, span: shroud_core::Span) -> ShroudResult<Expr> {
        let mut template = String::new();
        let mut args = Vec::new();
        for part in parts {
            match part.kind {
                ExprKind::String(s) => template.push_str(&escape_braces(&s)),
                ExprKind::FormattedValue {
                    value,
                    conversion,
                    format_spec,
                } => {
                    template.push('{');
                    if let Some(spec) = &format_spec {
                        template.push(':');
                        template.push_str(&self.spec_text(spec)?);
                    }
                    template.push('}');
                    let mut value = self.visit_expr(*value)?;
                    if let Some(builtin) = conversion.and_then(conversion_builtin) {
                        value = Expr::call(Expr::name(builtin), vec![value]);
                    }
                    args.push(value);
                }
                // Anything else in literal position is formatted as-is.
                other => {
                    template.push_str("{}");
                    args.push(self.visit_expr(Expr::new(other, part.span))?);
                }
            }
        }
        let mut call = Expr::call(Expr::attr(Expr::str(template), "format"), args);
        call.span = span;
        Ok(call)
    }
}

impl Transformer for FormatLowering<'_> {
    fn visit_expr(&mut self, expr: Expr) -> ShroudResult<Expr> {
        match expr.kind {
            ExprKind::JoinedStr(parts) => self.lower(parts, expr.span),
            kind => walk_expr_mut(self, Expr::new(kind, expr.span)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use shroud_interp::{Interpreter, Value};
    use shroud_parser::{parse, unparse};

    fn lower(src: &str) -> ShroudResult<String> {
        let tree = walk_module_mut(&mut FormatLowering { file: "/f.py" }, parse(src)?)?;
        Ok(unparse(&tree))
    }

    #[rstest]
    #[case("v = f'a{x}b'\n", "v = 'a{}b'.format(x)\n")]
    #[case("v = f'{x!r:>4}'\n", "v = '{:>4}'.format(repr(x))\n")]
    #[case("v = f'{x!s}{y!a}'\n", "v = '{}{}'.format(str(x), ascii(y))\n")]
    #[case("v = f'{{lit}} {x}'\n", "v = '{{lit}} {}'.format(x)\n")]
    #[case("v = f'{f\"{x}\"}'\n", "v = '{}'.format('{}'.format(x))\n")]
    fn test_lowering(#[case] src: &str, #[case] expected: &str) {
        assert_eq!(lower(src).unwrap(), expected);
    }

    #[test]
    fn test_non_constant_spec_is_fatal() {
        let err = lower("w = 3\nv = f'{x:>{w}}'\n").unwrap_err();
        assert_eq!(
            err,
            ShroudError::invalid_input("/f.py", err.span().unwrap(), "Non-constant format specs are not supported")
        );
        assert_eq!(err.span().unwrap().line(), 2);
    }

    #[test]
    fn test_behaviour_matches() {
        let src = "x = 7\ny = 'q'\nv = f'<{x:>3}|{y!r}|{{}}>'\n";
        let original = Interpreter::run_source(src).unwrap().global("v").cloned();
        let lowered = lower(src).unwrap();
        let after = Interpreter::run_source(&lowered).unwrap().global("v").cloned();
        assert_eq!(original, after);
        assert_eq!(after, Some(Value::Str("<  7|'q'|{}>".into())));
    }
}
