//! F-string body parsing.
//!
//! The lexer hands over the raw text between the quotes; this module splits
//! it into literal runs and replacement fields and sub-parses each field's
//! expression.

use super::parse_expression_at;
use crate::ast::{Expr, ExprKind};
use crate::lexer::string::decode_escapes;
use shroud_core::{Pos, ShroudError, ShroudResult, Span};

/// Parse an f-string body into `String` and `FormattedValue` parts.
pub fn parse_fstring(body: &str, raw: bool, origin: Pos, span: Span) -> ShroudResult<Vec<Expr>> {
    let chars: Vec<char> = body.chars().collect();
    let mut scanner = Scanner {
        chars: &chars,
        pos: 0,
        raw,
        origin,
        span,
    };
    scanner.parts(false)
}

struct Scanner<'a> {
    chars: &'a [char],
    pos: usize,
    raw: bool,
    origin: Pos,
    span: Span,
}

impl Scanner<'_> {
    fn peek(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn error(&self, message: &str) -> ShroudError {
        ShroudError::syntax(format!("f-string: {message}"), self.span)
    }

    /// Scan parts until the end of input, or until an unmatched `}` when
    /// scanning a nested format spec.
    fn parts(&mut self, in_spec: bool) -> ShroudResult<Vec<Expr>> {
        let mut parts = Vec::new();
        let mut literal = String::new();

        while let Some(c) = self.peek(0) {
            match c {
                '{' if self.peek(1) == Some('{') && !in_spec => {
                    literal.push('{');
                    self.pos += 2;
                }
                '}' if self.peek(1) == Some('}') && !in_spec => {
                    literal.push('}');
                    self.pos += 2;
                }
                '{' => {
                    self.flush(&mut literal, &mut parts)?;
                    self.pos += 1;
                    parts.extend(self.field()?);
                }
                '}' if in_spec => break,
                '}' => return Err(self.error("single '}' is not allowed")),
                '\\' if !self.raw => {
                    literal.push(c);
                    self.pos += 1;
                    if let Some(next) = self.peek(0) {
                        literal.push(next);
                        self.pos += 1;
                    }
                }
                _ => {
                    literal.push(c);
                    self.pos += 1;
                }
            }
        }

        self.flush(&mut literal, &mut parts)?;
        Ok(parts)
    }

    fn flush(&self, literal: &mut String, parts: &mut Vec<Expr>) -> ShroudResult<()> {
        if literal.is_empty() {
            return Ok(());
        }
        let text = std::mem::take(literal);
        let text = if self.raw {
            text
        } else {
            decode_escapes(&text).map_err(|m| self.error(&m))?
        };
        parts.push(Expr::new(ExprKind::String(text), self.span));
        Ok(())
    }

    /// Scan one replacement field; the opening `{` is consumed.
    ///
    /// Returns the `FormattedValue`, preceded by a literal for the
    /// self-documenting `{expr=}` form.
    fn field(&mut self) -> ShroudResult<Vec<Expr>> {
        let start = self.pos;
        let mut depth = 0usize;
        let mut quote: Option<char> = None;

        // Find the end of the expression text.
        while let Some(c) = self.peek(0) {
            if let Some(q) = quote {
                if c == q {
                    quote = None;
                }
                self.pos += 1;
                continue;
            }
            match c {
                '\'' | '"' => quote = Some(c),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' if depth > 0 => depth -= 1,
                '}' => break,
                '!' if depth == 0 && self.peek(1) != Some('=') => break,
                ':' if depth == 0 => break,
                '=' if depth == 0
                    && self.peek(1) != Some('=')
                    && !matches!(self.chars.get(self.pos.wrapping_sub(1)), Some('=' | '!' | '<' | '>')) =>
                {
                    break;
                }
                _ => {}
            }
            self.pos += 1;
        }

        let text: String = self.chars[start..self.pos].iter().collect();
        if text.trim().is_empty() {
            return Err(self.error("empty expression not allowed"));
        }
        let origin = Pos::new(self.origin.line, self.origin.col + start as u32);
        let mut value = parse_expression_at(&format!("({text})"), origin)?;
        value.span = value.span.or(self.span);

        let mut out = Vec::new();
        let mut self_documenting = false;
        if self.peek(0) == Some('=') {
            self.pos += 1;
            self_documenting = true;
            out.push(Expr::new(ExprKind::String(format!("{text}=")), self.span));
        }

        let mut conversion = None;
        if self.peek(0) == Some('!') {
            self.pos += 1;
            match self.peek(0) {
                Some(c @ ('s' | 'r' | 'a')) => conversion = Some(c),
                _ => return Err(self.error("invalid conversion character")),
            }
            self.pos += 1;
        }

        let mut format_spec = None;
        if self.peek(0) == Some(':') {
            self.pos += 1;
            let spec = self.parts(true)?;
            format_spec = Some(Box::new(Expr::new(ExprKind::JoinedStr(spec), self.span)));
        }

        if self.peek(0) != Some('}') {
            return Err(self.error("expecting '}'"));
        }
        self.pos += 1;

        if self_documenting && conversion.is_none() && format_spec.is_none() {
            conversion = Some('r');
        }

        out.push(Expr::new(
            ExprKind::FormattedValue {
                value: Box::new(value),
                conversion,
                format_spec,
            },
            self.span,
        ));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(body: &str) -> Vec<Expr> {
        parse_fstring(body, false, Pos::new(1, 0), Span::point(1, 0)).expect("parse failed")
    }

    #[test]
    fn test_literal_and_field() {
        let p = parts("a{x}b");
        assert_eq!(p.len(), 3);
        assert_eq!(p[0].kind, ExprKind::String("a".into()));
        assert!(matches!(p[1].kind, ExprKind::FormattedValue { .. }));
    }

    #[test]
    fn test_escaped_braces() {
        let p = parts("{{x}}");
        assert_eq!(p, vec![Expr::new(ExprKind::String("{x}".into()), Span::point(1, 0))]);
    }

    #[test]
    fn test_conversion_and_spec() {
        let p = parts("{x!r:>{w}}");
        let ExprKind::FormattedValue {
            conversion,
            format_spec,
            ..
        } = &p[0].kind
        else {
            panic!("expected FormattedValue");
        };
        assert_eq!(*conversion, Some('r'));
        let Some(spec) = format_spec else {
            panic!("expected spec");
        };
        let ExprKind::JoinedStr(spec_parts) = &spec.kind else {
            panic!("expected JoinedStr spec");
        };
        assert_eq!(spec_parts[0].kind, ExprKind::String(">".into()));
        assert!(matches!(spec_parts[1].kind, ExprKind::FormattedValue { .. }));
    }

    #[test]
    fn test_nested_brackets_and_strings() {
        let p = parts("{d['}'] + f(a, b)}");
        assert_eq!(p.len(), 1);
    }

    #[test]
    fn test_comparison_not_a_conversion() {
        let p = parts("{a != b}");
        assert_eq!(p.len(), 1);
    }

    #[test]
    fn test_self_documenting() {
        let p = parts("{x=}");
        assert_eq!(p[0].kind, ExprKind::String("x=".into()));
        assert!(matches!(
            p[1].kind,
            ExprKind::FormattedValue {
                conversion: Some('r'),
                ..
            }
        ));
    }

    #[test]
    fn test_escapes_in_literal() {
        assert_eq!(parts("a\\n")[0].kind, ExprKind::String("a\n".into()));
    }

    #[test]
    fn test_errors() {
        let bad = |body: &str| parse_fstring(body, false, Pos::new(1, 0), Span::point(1, 0));
        assert!(bad("{}").is_err());
        assert!(bad("a}").is_err());
        assert!(bad("{x!z}").is_err());
        assert!(bad("{x").is_err());
    }
}
