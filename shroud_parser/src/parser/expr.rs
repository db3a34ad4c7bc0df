//! Expression parser using Pratt parsing.

use super::fstring::parse_fstring;
use crate::ast::{
    Arg, Arguments, BinOp, BoolOp, CmpOp, Comprehension, Expr, ExprContext, ExprKind, Keyword,
    UnaryOp,
};
use crate::parser::{Parser, Precedence};
use crate::token::{Keyword as KW, TokenKind};
use shroud_core::{Pos, ShroudResult};

/// Expression parser.
pub struct ExprParser;

impl ExprParser {
    /// Parse an expression with the given minimum precedence.
    pub fn parse(parser: &mut Parser<'_>, min_prec: Precedence) -> ShroudResult<Expr> {
        let mut left = Self::parse_prefix(parser)?;

        while let Some(prec) = Self::infix_precedence(parser) {
            if prec < min_prec {
                break;
            }
            left = Self::parse_infix(parser, left)?;
        }

        Ok(left)
    }

    /// Parse a prefix expression (literals, unary ops, atoms).
    fn parse_prefix(parser: &mut Parser<'_>) -> ShroudResult<Expr> {
        let start = parser.start_span();
        let kind = parser.current().kind.clone();
        let simple = match &kind {
            // === Literals ===
            TokenKind::Int(n) => Some(ExprKind::Int(*n)),
            TokenKind::BigInt(s) => Some(ExprKind::BigInt(s.clone())),
            TokenKind::Float(n) => Some(ExprKind::Float(*n)),
            TokenKind::Imaginary(n) => Some(ExprKind::Complex { real: 0.0, imag: *n }),
            TokenKind::Keyword(KW::True) => Some(ExprKind::Bool(true)),
            TokenKind::Keyword(KW::False) => Some(ExprKind::Bool(false)),
            TokenKind::Keyword(KW::None) => Some(ExprKind::None),
            TokenKind::Ellipsis => Some(ExprKind::Ellipsis),
            TokenKind::Ident(id) => Some(ExprKind::Name {
                id: id.clone(),
                ctx: ExprContext::Load,
            }),
            _ => None,
        };
        if let Some(kind) = simple {
            parser.advance();
            return Ok(Expr::new(kind, parser.span_from(start)));
        }

        match kind {
            TokenKind::String(_) | TokenKind::Bytes(_) | TokenKind::FString { .. } => {
                Self::parse_strings(parser, start)
            }

            // === Unary Operators ===
            TokenKind::Minus => Self::parse_unary(parser, start, UnaryOp::USub, Precedence::Unary),
            TokenKind::Plus => Self::parse_unary(parser, start, UnaryOp::UAdd, Precedence::Unary),
            TokenKind::Tilde => {
                Self::parse_unary(parser, start, UnaryOp::Invert, Precedence::Unary)
            }
            TokenKind::Keyword(KW::Not) => {
                Self::parse_unary(parser, start, UnaryOp::Not, Precedence::Not)
            }

            // === Await ===
            TokenKind::Keyword(KW::Await) => {
                parser.advance();
                let operand = Self::parse(parser, Precedence::Await)?;
                Ok(Expr::new(
                    ExprKind::Await(Box::new(operand)),
                    parser.span_from(start),
                ))
            }

            TokenKind::Keyword(KW::Lambda) => Self::parse_lambda(parser, start),
            TokenKind::LeftParen => Self::parse_paren_expr(parser, start),
            TokenKind::LeftBracket => Self::parse_list_expr(parser, start),
            TokenKind::LeftBrace => Self::parse_brace_expr(parser, start),

            // === Starred ===
            TokenKind::Star => {
                parser.advance();
                let operand = Self::parse(parser, Precedence::BitwiseOr)?;
                Ok(Expr::new(
                    ExprKind::Starred(Box::new(operand)),
                    parser.span_from(start),
                ))
            }

            TokenKind::Keyword(KW::Yield) => Self::parse_yield(parser, start),

            _ => Err(parser.error_at_current("expected expression")),
        }
    }

    fn parse_unary(
        parser: &mut Parser<'_>,
        start: Pos,
        op: UnaryOp,
        operand_prec: Precedence,
    ) -> ShroudResult<Expr> {
        parser.advance();
        let operand = Self::parse(parser, operand_prec)?;
        Ok(Expr::new(
            ExprKind::UnaryOp {
                op,
                operand: Box::new(operand),
            },
            parser.span_from(start),
        ))
    }

    /// Parse one or more adjacent string literals, concatenating them.
    fn parse_strings(parser: &mut Parser<'_>, start: Pos) -> ShroudResult<Expr> {
        let mut text = String::new();
        let mut bytes: Option<Vec<u8>> = None;
        let mut parts: Vec<Expr> = Vec::new();
        let mut is_fstring = false;
        let mut count = 0usize;

        loop {
            let token = parser.current().clone();
            match token.kind {
                TokenKind::String(s) => {
                    if bytes.is_some() {
                        return Err(parser.error_at_current("cannot mix bytes and nonbytes literals"));
                    }
                    text.push_str(&s);
                }
                TokenKind::Bytes(b) => {
                    if count > 0 && bytes.is_none() {
                        return Err(parser.error_at_current("cannot mix bytes and nonbytes literals"));
                    }
                    bytes.get_or_insert_with(Vec::new).extend(b);
                }
                TokenKind::FString { body, raw } => {
                    if bytes.is_some() {
                        return Err(parser.error_at_current("cannot mix bytes and nonbytes literals"));
                    }
                    is_fstring = true;
                    if !text.is_empty() {
                        parts.push(Expr::new(
                            ExprKind::String(std::mem::take(&mut text)),
                            token.span,
                        ));
                    }
                    // Skip the prefix and opening quote(s).
                    let origin = Pos::new(token.span.start.line, token.span.start.col + 2);
                    parts.extend(parse_fstring(&body, raw, origin, token.span)?);
                }
                _ => break,
            }
            count += 1;
            parser.advance();
        }

        let span = parser.span_from(start);
        if let Some(bytes) = bytes {
            return Ok(Expr::new(ExprKind::Bytes(bytes), span));
        }
        if !is_fstring {
            return Ok(Expr::new(ExprKind::String(text), span));
        }
        if !text.is_empty() {
            parts.push(Expr::new(ExprKind::String(text), span));
        }
        Ok(Expr::new(ExprKind::JoinedStr(merge_literals(parts)), span))
    }

    /// Parse an infix expression.
    fn parse_infix(parser: &mut Parser<'_>, left: Expr) -> ShroudResult<Expr> {
        let start = left.span.start;

        let binop = match &parser.current().kind {
            TokenKind::Plus => Some((BinOp::Add, Precedence::Additive.next())),
            TokenKind::Minus => Some((BinOp::Sub, Precedence::Additive.next())),
            TokenKind::Star => Some((BinOp::Mult, Precedence::Multiplicative.next())),
            TokenKind::At => Some((BinOp::MatMult, Precedence::Multiplicative.next())),
            TokenKind::Slash => Some((BinOp::Div, Precedence::Multiplicative.next())),
            TokenKind::DoubleSlash => Some((BinOp::FloorDiv, Precedence::Multiplicative.next())),
            TokenKind::Percent => Some((BinOp::Mod, Precedence::Multiplicative.next())),
            // Power is right-associative and binds tighter than a unary
            // operator on its right.
            TokenKind::DoubleStar => Some((BinOp::Pow, Precedence::Unary)),
            TokenKind::LeftShift => Some((BinOp::LShift, Precedence::Shift.next())),
            TokenKind::RightShift => Some((BinOp::RShift, Precedence::Shift.next())),
            TokenKind::Pipe => Some((BinOp::BitOr, Precedence::BitwiseOr.next())),
            TokenKind::Caret => Some((BinOp::BitXor, Precedence::BitwiseXor.next())),
            TokenKind::Ampersand => Some((BinOp::BitAnd, Precedence::BitwiseAnd.next())),
            _ => None,
        };
        if let Some((op, right_prec)) = binop {
            parser.advance();
            let right = Self::parse(parser, right_prec)?;
            return Ok(Expr::new(
                ExprKind::BinOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
                parser.span_from(start),
            ));
        }

        match &parser.current().kind.clone() {
            // === Boolean Operators ===
            TokenKind::Keyword(kw @ (KW::And | KW::Or)) => {
                let (op, prec) = if *kw == KW::And {
                    (BoolOp::And, Precedence::And)
                } else {
                    (BoolOp::Or, Precedence::Or)
                };
                let mut values = vec![left];
                while parser.match_keyword(*kw) {
                    values.push(Self::parse(parser, prec.next())?);
                }
                Ok(Expr::new(
                    ExprKind::BoolOp { op, values },
                    parser.span_from(start),
                ))
            }

            // === Comparison Operators ===
            TokenKind::Less
            | TokenKind::Greater
            | TokenKind::LessEqual
            | TokenKind::GreaterEqual
            | TokenKind::EqualEqual
            | TokenKind::NotEqual
            | TokenKind::Keyword(KW::Is)
            | TokenKind::Keyword(KW::In)
            | TokenKind::Keyword(KW::Not) => Self::parse_comparison(parser, left, start),

            // === Conditional ===
            TokenKind::Keyword(KW::If) => {
                parser.advance();
                let test = Self::parse(parser, Precedence::Or)?;
                parser.expect_keyword(KW::Else, "expected 'else' in conditional")?;
                let orelse = Self::parse(parser, Precedence::Conditional)?;
                Ok(Expr::new(
                    ExprKind::IfExp {
                        test: Box::new(test),
                        body: Box::new(left),
                        orelse: Box::new(orelse),
                    },
                    parser.span_from(start),
                ))
            }

            // === Named Expression (Walrus) ===
            TokenKind::ColonEqual => {
                if left.as_name().is_none() {
                    return Err(parser.error_at_current("cannot use assignment expressions here"));
                }
                parser.advance();
                let value = Self::parse(parser, Precedence::NamedExpr)?;
                Ok(Expr::new(
                    ExprKind::NamedExpr {
                        target: Box::new(with_context(left, ExprContext::Store)),
                        value: Box::new(value),
                    },
                    parser.span_from(start),
                ))
            }

            // === Attribute Access ===
            TokenKind::Dot => {
                parser.advance();
                let attr = parser.expect_identifier("expected attribute name")?;
                Ok(Expr::new(
                    ExprKind::Attribute {
                        value: Box::new(left),
                        attr,
                    },
                    parser.span_from(start),
                ))
            }

            TokenKind::LeftBracket => Self::parse_subscript(parser, left, start),
            TokenKind::LeftParen => Self::parse_call(parser, left, start),

            _ => Err(parser.error_at_current("unexpected token in expression")),
        }
    }

    /// Get the precedence of the current token as an infix operator.
    fn infix_precedence(parser: &Parser<'_>) -> Option<Precedence> {
        Some(match &parser.current().kind {
            TokenKind::Less
            | TokenKind::Greater
            | TokenKind::LessEqual
            | TokenKind::GreaterEqual
            | TokenKind::EqualEqual
            | TokenKind::NotEqual => Precedence::Comparison,

            TokenKind::Keyword(kw) => match kw {
                KW::Is | KW::In => Precedence::Comparison,
                // Only `not in` continues an expression.
                KW::Not if parser.peek().kind == TokenKind::Keyword(KW::In) => {
                    Precedence::Comparison
                }
                KW::And => Precedence::And,
                KW::Or => Precedence::Or,
                KW::If => Precedence::Conditional,
                _ => return None,
            },

            TokenKind::Pipe => Precedence::BitwiseOr,
            TokenKind::Caret => Precedence::BitwiseXor,
            TokenKind::Ampersand => Precedence::BitwiseAnd,
            TokenKind::LeftShift | TokenKind::RightShift => Precedence::Shift,
            TokenKind::Plus | TokenKind::Minus => Precedence::Additive,
            TokenKind::Star
            | TokenKind::At
            | TokenKind::Slash
            | TokenKind::DoubleSlash
            | TokenKind::Percent => Precedence::Multiplicative,
            TokenKind::DoubleStar => Precedence::Power,
            TokenKind::ColonEqual => Precedence::NamedExpr,
            TokenKind::LeftParen | TokenKind::LeftBracket | TokenKind::Dot => Precedence::Primary,

            _ => return None,
        })
    }

    // =========================================================================
    // Complex Expression Parsers
    // =========================================================================

    /// Parse a comparison chain.
    fn parse_comparison(parser: &mut Parser<'_>, left: Expr, start: Pos) -> ShroudResult<Expr> {
        let mut ops = Vec::new();
        let mut comparators = Vec::new();

        loop {
            let op = match &parser.current().kind {
                TokenKind::Less => CmpOp::Lt,
                TokenKind::Greater => CmpOp::Gt,
                TokenKind::LessEqual => CmpOp::LtE,
                TokenKind::GreaterEqual => CmpOp::GtE,
                TokenKind::EqualEqual => CmpOp::Eq,
                TokenKind::NotEqual => CmpOp::NotEq,
                TokenKind::Keyword(KW::In) => CmpOp::In,
                TokenKind::Keyword(KW::Is) => {
                    if parser.peek().kind == TokenKind::Keyword(KW::Not) {
                        parser.advance();
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                TokenKind::Keyword(KW::Not) if parser.peek().kind == TokenKind::Keyword(KW::In) => {
                    parser.advance();
                    CmpOp::NotIn
                }
                _ => break,
            };
            parser.advance();

            ops.push(op);
            comparators.push(Self::parse(parser, Precedence::Comparison.next())?);
        }

        Ok(Expr::new(
            ExprKind::Compare {
                left: Box::new(left),
                ops,
                comparators,
            },
            parser.span_from(start),
        ))
    }

    /// Parse a parenthesized expression, tuple, or generator.
    fn parse_paren_expr(parser: &mut Parser<'_>, start: Pos) -> ShroudResult<Expr> {
        parser.advance(); // consume '('

        if parser.match_token(TokenKind::RightParen) {
            return Ok(Expr::new(ExprKind::Tuple(vec![]), parser.span_from(start)));
        }

        if parser.check_keyword(KW::Yield) {
            let inner_start = parser.start_span();
            let value = Self::parse_yield(parser, inner_start)?;
            parser.expect(TokenKind::RightParen, "expected ')'")?;
            return Ok(value);
        }

        let first = Self::parse(parser, Precedence::Lowest)?;

        if parser.check_keyword(KW::For) || parser.check_keyword(KW::Async) {
            let generators = Self::parse_comprehension_clauses(parser)?;
            parser.expect(TokenKind::RightParen, "expected ')'")?;
            return Ok(Expr::new(
                ExprKind::GeneratorExp {
                    elt: Box::new(first),
                    generators,
                },
                parser.span_from(start),
            ));
        }

        if parser.match_token(TokenKind::Comma) {
            let mut elements = vec![first];
            while !parser.check(TokenKind::RightParen) {
                elements.push(Self::parse(parser, Precedence::Lowest)?);
                if !parser.match_token(TokenKind::Comma) {
                    break;
                }
            }
            parser.expect(TokenKind::RightParen, "expected ')'")?;
            return Ok(Expr::new(ExprKind::Tuple(elements), parser.span_from(start)));
        }

        // Just a parenthesized expression
        parser.expect(TokenKind::RightParen, "expected ')'")?;
        Ok(first)
    }

    /// Parse a list or list comprehension.
    fn parse_list_expr(parser: &mut Parser<'_>, start: Pos) -> ShroudResult<Expr> {
        parser.advance(); // consume '['

        if parser.match_token(TokenKind::RightBracket) {
            return Ok(Expr::new(ExprKind::List(vec![]), parser.span_from(start)));
        }

        let first = Self::parse(parser, Precedence::Lowest)?;

        if parser.check_keyword(KW::For) || parser.check_keyword(KW::Async) {
            let generators = Self::parse_comprehension_clauses(parser)?;
            parser.expect(TokenKind::RightBracket, "expected ']'")?;
            return Ok(Expr::new(
                ExprKind::ListComp {
                    elt: Box::new(first),
                    generators,
                },
                parser.span_from(start),
            ));
        }

        let mut elements = vec![first];
        while parser.match_token(TokenKind::Comma) {
            if parser.check(TokenKind::RightBracket) {
                break;
            }
            elements.push(Self::parse(parser, Precedence::Lowest)?);
        }
        parser.expect(TokenKind::RightBracket, "expected ']'")?;
        Ok(Expr::new(ExprKind::List(elements), parser.span_from(start)))
    }

    /// Parse a dict, set, or comprehension.
    fn parse_brace_expr(parser: &mut Parser<'_>, start: Pos) -> ShroudResult<Expr> {
        parser.advance(); // consume '{'

        if parser.match_token(TokenKind::RightBrace) {
            return Ok(Expr::new(
                ExprKind::Dict {
                    keys: vec![],
                    values: vec![],
                },
                parser.span_from(start),
            ));
        }

        let first_is_splat = parser.match_token(TokenKind::DoubleStar);
        let first = if first_is_splat {
            Self::parse(parser, Precedence::BitwiseOr)?
        } else {
            Self::parse(parser, Precedence::Lowest)?
        };

        if first_is_splat || parser.check(TokenKind::Colon) {
            let (first_key, first_value) = if first_is_splat {
                (None, first)
            } else {
                parser.advance(); // consume ':'
                (Some(first), Self::parse(parser, Precedence::Lowest)?)
            };

            if let Some(key) = &first_key {
                if parser.check_keyword(KW::For) || parser.check_keyword(KW::Async) {
                    let generators = Self::parse_comprehension_clauses(parser)?;
                    parser.expect(TokenKind::RightBrace, "expected '}'")?;
                    return Ok(Expr::new(
                        ExprKind::DictComp {
                            key: Box::new(key.clone()),
                            value: Box::new(first_value),
                            generators,
                        },
                        parser.span_from(start),
                    ));
                }
            }

            let mut keys = vec![first_key];
            let mut values = vec![first_value];
            while parser.match_token(TokenKind::Comma) {
                if parser.check(TokenKind::RightBrace) {
                    break;
                }
                if parser.match_token(TokenKind::DoubleStar) {
                    keys.push(None);
                    values.push(Self::parse(parser, Precedence::BitwiseOr)?);
                } else {
                    let key = Self::parse(parser, Precedence::Lowest)?;
                    parser.expect(TokenKind::Colon, "expected ':' in dict")?;
                    keys.push(Some(key));
                    values.push(Self::parse(parser, Precedence::Lowest)?);
                }
            }

            parser.expect(TokenKind::RightBrace, "expected '}'")?;
            return Ok(Expr::new(
                ExprKind::Dict { keys, values },
                parser.span_from(start),
            ));
        }

        if parser.check_keyword(KW::For) || parser.check_keyword(KW::Async) {
            let generators = Self::parse_comprehension_clauses(parser)?;
            parser.expect(TokenKind::RightBrace, "expected '}'")?;
            return Ok(Expr::new(
                ExprKind::SetComp {
                    elt: Box::new(first),
                    generators,
                },
                parser.span_from(start),
            ));
        }

        let mut elements = vec![first];
        while parser.match_token(TokenKind::Comma) {
            if parser.check(TokenKind::RightBrace) {
                break;
            }
            elements.push(Self::parse(parser, Precedence::Lowest)?);
        }
        parser.expect(TokenKind::RightBrace, "expected '}'")?;
        Ok(Expr::new(ExprKind::Set(elements), parser.span_from(start)))
    }

    /// Parse comprehension clauses (for ... if ...).
    fn parse_comprehension_clauses(parser: &mut Parser<'_>) -> ShroudResult<Vec<Comprehension>> {
        let mut generators = Vec::new();

        while parser.check_keyword(KW::For) || parser.check_keyword(KW::Async) {
            let is_async = parser.match_keyword(KW::Async);
            parser.expect_keyword(KW::For, "expected 'for'")?;

            let target = Self::parse_target_list(parser)?;
            parser.expect_keyword(KW::In, "expected 'in'")?;
            let iter = Self::parse(parser, Precedence::Or)?;

            let mut ifs = Vec::new();
            while parser.match_keyword(KW::If) {
                ifs.push(Self::parse(parser, Precedence::Or)?);
            }

            generators.push(Comprehension {
                target,
                iter,
                ifs,
                is_async,
            });
        }

        Ok(generators)
    }

    /// Parse a `for` target list up to the `in` keyword.
    pub(crate) fn parse_target_list(parser: &mut Parser<'_>) -> ShroudResult<Expr> {
        let start = parser.start_span();
        let first = Self::parse(parser, Precedence::BitwiseOr)?;

        let target = if parser.match_token(TokenKind::Comma) {
            let mut elements = vec![first];
            while !parser.check_keyword(KW::In) {
                elements.push(Self::parse(parser, Precedence::BitwiseOr)?);
                if !parser.match_token(TokenKind::Comma) {
                    break;
                }
            }
            Expr::new(ExprKind::Tuple(elements), parser.span_from(start))
        } else {
            first
        };
        Ok(with_context(target, ExprContext::Store))
    }

    /// Parse a subscript expression.
    fn parse_subscript(parser: &mut Parser<'_>, value: Expr, start: Pos) -> ShroudResult<Expr> {
        parser.advance(); // consume '['

        let slice_start = parser.start_span();
        let first = Self::parse_slice_or_index(parser)?;
        let slice = if parser.match_token(TokenKind::Comma) {
            let mut elements = vec![first];
            while !parser.check(TokenKind::RightBracket) {
                elements.push(Self::parse_slice_or_index(parser)?);
                if !parser.match_token(TokenKind::Comma) {
                    break;
                }
            }
            Expr::new(ExprKind::Tuple(elements), parser.span_from(slice_start))
        } else {
            first
        };
        parser.expect(TokenKind::RightBracket, "expected ']'")?;

        Ok(Expr::new(
            ExprKind::Subscript {
                value: Box::new(value),
                slice: Box::new(slice),
            },
            parser.span_from(start),
        ))
    }

    /// Parse a slice or index expression.
    fn parse_slice_or_index(parser: &mut Parser<'_>) -> ShroudResult<Expr> {
        let start = parser.start_span();

        let lower = if parser.check(TokenKind::Colon) {
            None
        } else {
            let index = Self::parse(parser, Precedence::Lowest)?;
            if !parser.check(TokenKind::Colon) {
                return Ok(index);
            }
            Some(Box::new(index))
        };
        parser.expect(TokenKind::Colon, "expected ':'")?;

        let ends_part = |p: &Parser<'_>| {
            p.check(TokenKind::Colon) || p.check(TokenKind::RightBracket) || p.check(TokenKind::Comma)
        };

        let upper = if ends_part(parser) {
            None
        } else {
            Some(Box::new(Self::parse(parser, Precedence::Lowest)?))
        };

        let step = if parser.match_token(TokenKind::Colon) && !ends_part(parser) {
            Some(Box::new(Self::parse(parser, Precedence::Lowest)?))
        } else {
            None
        };

        Ok(Expr::new(
            ExprKind::Slice { lower, upper, step },
            parser.span_from(start),
        ))
    }

    /// Parse a function call.
    fn parse_call(parser: &mut Parser<'_>, func: Expr, start: Pos) -> ShroudResult<Expr> {
        parser.advance(); // consume '('

        let mut args = Vec::new();
        let mut keywords = Vec::new();

        while !parser.check(TokenKind::RightParen) {
            let arg_start = parser.start_span();

            if parser.match_token(TokenKind::DoubleStar) {
                let value = Self::parse(parser, Precedence::Lowest)?;
                keywords.push(Keyword {
                    arg: None,
                    value,
                    span: parser.span_from(arg_start),
                });
            } else if parser.match_token(TokenKind::Star) {
                let value = Self::parse(parser, Precedence::Lowest)?;
                args.push(Expr::new(
                    ExprKind::Starred(Box::new(value)),
                    parser.span_from(arg_start),
                ));
            } else {
                let expr = Self::parse(parser, Precedence::Lowest)?;

                // A generator expression may drop its parentheses when it is
                // the sole argument: sum(x for x in items)
                if args.is_empty()
                    && keywords.is_empty()
                    && (parser.check_keyword(KW::For) || parser.check_keyword(KW::Async))
                {
                    let generators = Self::parse_comprehension_clauses(parser)?;
                    parser.expect(TokenKind::RightParen, "expected ')'")?;
                    let genexp = Expr::new(
                        ExprKind::GeneratorExp {
                            elt: Box::new(expr),
                            generators,
                        },
                        parser.span_from(arg_start),
                    );
                    return Ok(Expr::new(
                        ExprKind::Call {
                            func: Box::new(func),
                            args: vec![genexp],
                            keywords: vec![],
                        },
                        parser.span_from(start),
                    ));
                }

                if parser.match_token(TokenKind::Equal) {
                    let ExprKind::Name { id, .. } = expr.kind else {
                        return Err(
                            parser.error_at_previous("keyword argument name must be identifier")
                        );
                    };
                    let value = Self::parse(parser, Precedence::Lowest)?;
                    keywords.push(Keyword {
                        arg: Some(id),
                        value,
                        span: parser.span_from(arg_start),
                    });
                } else {
                    args.push(expr);
                }
            }

            if !parser.match_token(TokenKind::Comma) {
                break;
            }
        }

        parser.expect(TokenKind::RightParen, "expected ')'")?;

        Ok(Expr::new(
            ExprKind::Call {
                func: Box::new(func),
                args,
                keywords,
            },
            parser.span_from(start),
        ))
    }

    /// Parse a lambda expression.
    fn parse_lambda(parser: &mut Parser<'_>, start: Pos) -> ShroudResult<Expr> {
        parser.advance(); // consume 'lambda'

        let args = Self::parse_lambda_params(parser)?;
        parser.expect(TokenKind::Colon, "expected ':' in lambda")?;
        let body = Self::parse(parser, Precedence::Conditional)?;

        Ok(Expr::new(
            ExprKind::Lambda {
                args: Box::new(args),
                body: Box::new(body),
            },
            parser.span_from(start),
        ))
    }

    /// Parse lambda parameters.
    fn parse_lambda_params(parser: &mut Parser<'_>) -> ShroudResult<Arguments> {
        let mut args = Arguments::default();
        let mut seen_star = false;

        while !parser.check(TokenKind::Colon) {
            let arg_start = parser.start_span();

            if parser.match_token(TokenKind::DoubleStar) {
                let name = parser.expect_identifier("expected identifier after **")?;
                args.kwarg = Some(Arg {
                    arg: name,
                    annotation: None,
                    span: parser.span_from(arg_start),
                });
            } else if parser.match_token(TokenKind::Star) {
                if seen_star {
                    return Err(parser.error_at_previous("duplicate *"));
                }
                seen_star = true;
                if let TokenKind::Ident(name) = &parser.current().kind {
                    let name = name.clone();
                    parser.advance();
                    args.vararg = Some(Arg {
                        arg: name,
                        annotation: None,
                        span: parser.span_from(arg_start),
                    });
                }
            } else if parser.match_token(TokenKind::Slash) {
                args.posonlyargs.append(&mut args.args);
            } else {
                let name = parser.expect_identifier("expected parameter name")?;
                let arg = Arg {
                    arg: name,
                    annotation: None,
                    span: parser.span_from(arg_start),
                };
                let default = if parser.match_token(TokenKind::Equal) {
                    Some(Self::parse(parser, Precedence::Lowest)?)
                } else {
                    None
                };
                if seen_star {
                    args.kwonlyargs.push(arg);
                    args.kw_defaults.push(default);
                } else {
                    args.args.push(arg);
                    args.defaults.extend(default);
                }
            }

            if !parser.match_token(TokenKind::Comma) {
                break;
            }
        }

        Ok(args)
    }

    /// Parse a yield expression.
    pub(crate) fn parse_yield(parser: &mut Parser<'_>, start: Pos) -> ShroudResult<Expr> {
        parser.advance(); // consume 'yield'

        if parser.match_keyword(KW::From) {
            let value = Self::parse(parser, Precedence::Lowest)?;
            return Ok(Expr::new(
                ExprKind::YieldFrom(Box::new(value)),
                parser.span_from(start),
            ));
        }
        if parser.check(TokenKind::Newline)
            || parser.check(TokenKind::RightParen)
            || parser.check(TokenKind::Equal)
            || parser.check(TokenKind::Eof)
        {
            return Ok(Expr::new(ExprKind::Yield(None), parser.span_from(start)));
        }

        let value_start = parser.start_span();
        let first = Self::parse(parser, Precedence::Lowest)?;
        let value = if parser.match_token(TokenKind::Comma) {
            let mut elements = vec![first];
            while !parser.check(TokenKind::Newline)
                && !parser.check(TokenKind::RightParen)
                && !parser.check(TokenKind::Eof)
            {
                elements.push(Self::parse(parser, Precedence::Lowest)?);
                if !parser.match_token(TokenKind::Comma) {
                    break;
                }
            }
            Expr::new(ExprKind::Tuple(elements), parser.span_from(value_start))
        } else {
            first
        };
        Ok(Expr::new(
            ExprKind::Yield(Some(Box::new(value))),
            parser.span_from(start),
        ))
    }
}

/// Set the context of every name in an assignment target.
#[must_use]
pub fn with_context(mut expr: Expr, ctx: ExprContext) -> Expr {
    set_context(&mut expr, ctx);
    expr
}

fn set_context(expr: &mut Expr, ctx: ExprContext) {
    match &mut expr.kind {
        ExprKind::Name { ctx: c, .. } => *c = ctx,
        ExprKind::Tuple(elts) | ExprKind::List(elts) => {
            for elt in elts {
                set_context(elt, ctx);
            }
        }
        ExprKind::Starred(inner) => set_context(inner, ctx),
        _ => {}
    }
}

/// Merge adjacent literal parts of a joined string.
fn merge_literals(parts: Vec<Expr>) -> Vec<Expr> {
    let mut out: Vec<Expr> = Vec::with_capacity(parts.len());
    for part in parts {
        if let ExprKind::String(s) = &part.kind {
            if s.is_empty() {
                continue;
            }
            if let Some(Expr {
                kind: ExprKind::String(prev),
                ..
            }) = out.last_mut()
            {
                prev.push_str(s);
                continue;
            }
        }
        out.push(part);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expression;

    fn parse(s: &str) -> Expr {
        parse_expression(s).expect("parse failed")
    }

    #[test]
    fn test_integer() {
        assert_eq!(parse("42").kind, ExprKind::Int(42));
    }

    #[test]
    fn test_float() {
        let expr = parse("3.25");
        assert_eq!(expr.kind, ExprKind::Float(3.25));
    }

    #[test]
    fn test_identifier() {
        let expr = parse("foo");
        assert_eq!(expr.as_name(), Some("foo"));
    }

    #[test]
    fn test_precedence() {
        let expr = parse("1 + 2 * 3");
        let ExprKind::BinOp { op, right, .. } = expr.kind else {
            panic!("expected BinOp");
        };
        assert_eq!(op, BinOp::Add);
        assert!(matches!(right.kind, ExprKind::BinOp { op: BinOp::Mult, .. }));
    }

    #[test]
    fn test_power_right_assoc_and_unary() {
        let expr = parse("-2 ** -1 ** 2");
        let ExprKind::UnaryOp { op: UnaryOp::USub, operand } = expr.kind else {
            panic!("expected unary minus");
        };
        let ExprKind::BinOp { op: BinOp::Pow, right, .. } = operand.kind else {
            panic!("expected power");
        };
        assert!(matches!(right.kind, ExprKind::UnaryOp { op: UnaryOp::USub, .. }));
    }

    #[test]
    fn test_chained_comparison() {
        let ExprKind::Compare { ops, comparators, .. } = parse("a < b <= c").kind else {
            panic!("expected Compare");
        };
        assert_eq!(ops, vec![CmpOp::Lt, CmpOp::LtE]);
        assert_eq!(comparators.len(), 2);
    }

    #[test]
    fn test_not_in_and_is_not() {
        let ExprKind::Compare { ops, .. } = parse("a not in b is not c").kind else {
            panic!("expected Compare");
        };
        assert_eq!(ops, vec![CmpOp::NotIn, CmpOp::IsNot]);
    }

    #[test]
    fn test_bool_ops_flatten() {
        let ExprKind::BoolOp { op, values } = parse("a and b and c").kind else {
            panic!("expected BoolOp");
        };
        assert_eq!(op, BoolOp::And);
        assert_eq!(values.len(), 3);
    }

    #[test]
    fn test_or_of_ands() {
        let ExprKind::BoolOp { op, values } = parse("a and b or c").kind else {
            panic!("expected BoolOp");
        };
        assert_eq!(op, BoolOp::Or);
        assert!(matches!(values[0].kind, ExprKind::BoolOp { op: BoolOp::And, .. }));
    }

    #[test]
    fn test_conditional() {
        assert!(matches!(parse("a if b else c").kind, ExprKind::IfExp { .. }));
    }

    #[test]
    fn test_walrus_sets_store() {
        let ExprKind::NamedExpr { target, .. } = parse("(y := f(x))").kind else {
            panic!("expected NamedExpr");
        };
        assert!(matches!(
            target.kind,
            ExprKind::Name {
                ctx: ExprContext::Store,
                ..
            }
        ));
    }

    #[test]
    fn test_call_with_keywords_and_splats() {
        let ExprKind::Call { args, keywords, .. } = parse("f(a, *b, c=1, **d)").kind else {
            panic!("expected Call");
        };
        assert_eq!(args.len(), 2);
        assert_eq!(keywords.len(), 2);
        assert_eq!(keywords[0].arg.as_deref(), Some("c"));
        assert!(keywords[1].arg.is_none());
    }

    #[test]
    fn test_call_bare_generator() {
        let ExprKind::Call { args, .. } = parse("sum(x for x in y)").kind else {
            panic!("expected Call");
        };
        assert!(matches!(args[0].kind, ExprKind::GeneratorExp { .. }));
    }

    #[test]
    fn test_slices() {
        let ExprKind::Subscript { slice, .. } = parse("a[1:]").kind else {
            panic!("expected Subscript");
        };
        assert!(matches!(
            slice.kind,
            ExprKind::Slice {
                lower: Some(_),
                upper: None,
                step: None
            }
        ));
        let ExprKind::Subscript { slice, .. } = parse("a[::2, 0]").kind else {
            panic!("expected Subscript");
        };
        assert!(matches!(slice.kind, ExprKind::Tuple(ref e) if e.len() == 2));
    }

    #[test]
    fn test_comprehensions() {
        assert!(matches!(parse("[x for x in y if x]").kind, ExprKind::ListComp { .. }));
        assert!(matches!(parse("{x for x in y}").kind, ExprKind::SetComp { .. }));
        assert!(matches!(parse("{k: v for k, v in y}").kind, ExprKind::DictComp { .. }));
    }

    #[test]
    fn test_dict_with_unpacking() {
        let ExprKind::Dict { keys, values } = parse("{**a, 'b': 1}").kind else {
            panic!("expected Dict");
        };
        assert!(keys[0].is_none());
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_lambda_params() {
        let ExprKind::Lambda { args, .. } = parse("lambda a, b=1, *c, d, **e: a").kind else {
            panic!("expected Lambda");
        };
        assert_eq!(args.args.len(), 2);
        assert_eq!(args.defaults.len(), 1);
        assert!(args.vararg.is_some());
        assert_eq!(args.kwonlyargs.len(), 1);
        assert!(args.kwarg.is_some());
    }

    #[test]
    fn test_adjacent_strings() {
        assert_eq!(parse("'a' \"b\"").kind, ExprKind::String("ab".into()));
        assert_eq!(parse("b'a' b'b'").kind, ExprKind::Bytes(b"ab".to_vec()));
    }

    #[test]
    fn test_mixed_bytes_rejected() {
        assert!(parse_expression("'a' b'b'").is_err());
    }

    #[test]
    fn test_fstring_concat() {
        let ExprKind::JoinedStr(parts) = parse("'a' f'{x}b' 'c'").kind else {
            panic!("expected JoinedStr");
        };
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].kind, ExprKind::String("a".into()));
        assert_eq!(parts[2].kind, ExprKind::String("bc".into()));
    }

    #[test]
    fn test_imaginary() {
        assert_eq!(
            parse("2j").kind,
            ExprKind::Complex {
                real: 0.0,
                imag: 2.0
            }
        );
    }
}
