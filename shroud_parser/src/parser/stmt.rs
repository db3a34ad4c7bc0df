//! Statement parser.
//!
//! Handles all supported Python statement types including compound statements.

use super::expr::with_context;
use crate::ast::{
    Alias, Arg, Arguments, BinOp, ExceptHandler, Expr, ExprContext, ExprKind, Keyword, MatchCase,
    Pattern, PatternKind, Stmt, StmtKind, WithItem,
};
use crate::parser::{ExprParser, Parser, Precedence};
use crate::token::{Keyword as KW, TokenKind};
use shroud_core::{Pos, ShroudResult};

/// Statement parser.
pub struct StmtParser;

impl StmtParser {
    /// Parse one logical line: a compound statement, or one or more simple
    /// statements separated by `;`.
    pub fn parse_line(parser: &mut Parser<'_>) -> ShroudResult<Vec<Stmt>> {
        let start = parser.start_span();

        if let TokenKind::Keyword(kw) = parser.current().kind {
            let compound = match kw {
                KW::If => Some(Self::parse_if(parser, start)?),
                KW::While => Some(Self::parse_while(parser, start)?),
                KW::For => Some(Self::parse_for(parser, start, false)?),
                KW::Try => Some(Self::parse_try(parser, start)?),
                KW::With => Some(Self::parse_with(parser, start, false)?),
                KW::Def => Some(Self::parse_function_def(parser, start, false)?),
                KW::Class => Some(Self::parse_class_def(parser, start)?),
                KW::Async => Some(Self::parse_async(parser, start)?),
                _ => None,
            };
            if let Some(stmt) = compound {
                return Ok(vec![stmt]);
            }
        }

        if parser.check(TokenKind::At) {
            return Ok(vec![Self::parse_decorated(parser, start)?]);
        }

        if parser.check_soft_keyword("match")
            && let Some(stmt) = Self::try_parse_match(parser, start)?
        {
            return Ok(vec![stmt]);
        }

        Self::parse_simple_line(parser)
    }

    /// Parse `simple_stmt (';' simple_stmt)* [';'] NEWLINE`.
    fn parse_simple_line(parser: &mut Parser<'_>) -> ShroudResult<Vec<Stmt>> {
        let mut stmts = vec![Self::parse_simple_statement(parser)?];
        while parser.match_token(TokenKind::Semicolon) {
            if parser.check(TokenKind::Newline) || parser.check(TokenKind::Eof) {
                break;
            }
            stmts.push(Self::parse_simple_statement(parser)?);
        }
        if !parser.match_token(TokenKind::Newline) && !parser.check(TokenKind::Eof) {
            return Err(parser.error_at_current("expected newline"));
        }
        Ok(stmts)
    }

    /// Parse a simple statement.
    fn parse_simple_statement(parser: &mut Parser<'_>) -> ShroudResult<Stmt> {
        let start = parser.start_span();
        let simple = match &parser.current().kind {
            TokenKind::Keyword(KW::Pass) => Some(StmtKind::Pass),
            TokenKind::Keyword(KW::Break) => Some(StmtKind::Break),
            TokenKind::Keyword(KW::Continue) => Some(StmtKind::Continue),
            _ => None,
        };
        if let Some(kind) = simple {
            parser.advance();
            return Ok(Stmt::new(kind, parser.span_from(start)));
        }

        match &parser.current().kind.clone() {
            TokenKind::Keyword(KW::Return) => Self::parse_return(parser, start),
            TokenKind::Keyword(KW::Raise) => Self::parse_raise(parser, start),
            TokenKind::Keyword(KW::Assert) => Self::parse_assert(parser, start),
            TokenKind::Keyword(KW::Del) => Self::parse_delete(parser, start),
            TokenKind::Keyword(KW::Global) => {
                parser.advance();
                let names = Self::parse_name_list(parser)?;
                Ok(Stmt::new(StmtKind::Global(names), parser.span_from(start)))
            }
            TokenKind::Keyword(KW::Nonlocal) => {
                parser.advance();
                let names = Self::parse_name_list(parser)?;
                Ok(Stmt::new(StmtKind::Nonlocal(names), parser.span_from(start)))
            }
            TokenKind::Keyword(KW::Import) => Self::parse_import(parser, start),
            TokenKind::Keyword(KW::From) => Self::parse_from_import(parser, start),
            _ => Self::parse_expression_statement(parser, start),
        }
    }

    // =========================================================================
    // Simple Statements
    // =========================================================================

    /// Parse an expression statement (possibly assignment).
    fn parse_expression_statement(parser: &mut Parser<'_>, start: Pos) -> ShroudResult<Stmt> {
        let first = Self::parse_star_expressions(parser)?;

        if parser.check(TokenKind::Equal) {
            let mut targets = vec![first];
            let mut value = None;
            while parser.match_token(TokenKind::Equal) {
                let next = if parser.check_keyword(KW::Yield) {
                    let yield_start = parser.start_span();
                    ExprParser::parse_yield(parser, yield_start)?
                } else {
                    Self::parse_star_expressions(parser)?
                };
                if let Some(prev) = value.replace(next) {
                    targets.push(prev);
                }
            }
            let value = value.ok_or_else(|| parser.error_at_current("expected expression"))?;
            let targets = targets
                .into_iter()
                .map(|t| with_context(t, ExprContext::Store))
                .collect();
            return Ok(Stmt::new(
                StmtKind::Assign {
                    targets,
                    value: Box::new(value),
                },
                parser.span_from(start),
            ));
        }

        if let Some(op) = Self::match_aug_assign(parser) {
            let value = Self::parse_star_expressions(parser)?;
            return Ok(Stmt::new(
                StmtKind::AugAssign {
                    target: Box::new(with_context(first, ExprContext::Store)),
                    op,
                    value: Box::new(value),
                },
                parser.span_from(start),
            ));
        }

        if parser.match_token(TokenKind::Colon) {
            let annotation = ExprParser::parse(parser, Precedence::Lowest)?;
            let value = if parser.match_token(TokenKind::Equal) {
                Some(Box::new(Self::parse_star_expressions(parser)?))
            } else {
                None
            };
            let simple = first.as_name().is_some();
            return Ok(Stmt::new(
                StmtKind::AnnAssign {
                    target: Box::new(with_context(first, ExprContext::Store)),
                    annotation: Box::new(annotation),
                    value,
                    simple,
                },
                parser.span_from(start),
            ));
        }

        Ok(Stmt::new(
            StmtKind::Expr(Box::new(first)),
            parser.span_from(start),
        ))
    }

    /// Parse an expression list, turning `a, b` into a tuple.
    pub(crate) fn parse_star_expressions(parser: &mut Parser<'_>) -> ShroudResult<Expr> {
        let start = parser.start_span();
        let first = ExprParser::parse(parser, Precedence::Lowest)?;
        if !parser.match_token(TokenKind::Comma) {
            return Ok(first);
        }

        let mut elements = vec![first];
        while Self::starts_expression(parser) {
            elements.push(ExprParser::parse(parser, Precedence::Lowest)?);
            if !parser.match_token(TokenKind::Comma) {
                break;
            }
        }

        Ok(Expr::new(ExprKind::Tuple(elements), parser.span_from(start)))
    }

    fn starts_expression(parser: &Parser<'_>) -> bool {
        !matches!(
            parser.current().kind,
            TokenKind::Newline
                | TokenKind::Eof
                | TokenKind::Equal
                | TokenKind::Semicolon
                | TokenKind::Colon
                | TokenKind::RightParen
                | TokenKind::RightBracket
                | TokenKind::RightBrace
        ) && Self::match_aug_kind(&parser.current().kind).is_none()
    }

    fn match_aug_kind(kind: &TokenKind) -> Option<BinOp> {
        Some(match kind {
            TokenKind::PlusEqual => BinOp::Add,
            TokenKind::MinusEqual => BinOp::Sub,
            TokenKind::StarEqual => BinOp::Mult,
            TokenKind::AtEqual => BinOp::MatMult,
            TokenKind::SlashEqual => BinOp::Div,
            TokenKind::DoubleSlashEqual => BinOp::FloorDiv,
            TokenKind::PercentEqual => BinOp::Mod,
            TokenKind::DoubleStarEqual => BinOp::Pow,
            TokenKind::LeftShiftEqual => BinOp::LShift,
            TokenKind::RightShiftEqual => BinOp::RShift,
            TokenKind::AmpersandEqual => BinOp::BitAnd,
            TokenKind::PipeEqual => BinOp::BitOr,
            TokenKind::CaretEqual => BinOp::BitXor,
            _ => return None,
        })
    }

    /// Match an augmented assignment operator.
    fn match_aug_assign(parser: &mut Parser<'_>) -> Option<BinOp> {
        let op = Self::match_aug_kind(&parser.current().kind)?;
        parser.advance();
        Some(op)
    }

    fn at_statement_end(parser: &Parser<'_>) -> bool {
        parser.check(TokenKind::Newline) || parser.check(TokenKind::Eof) || parser.check(TokenKind::Semicolon)
    }

    /// Parse a return statement.
    fn parse_return(parser: &mut Parser<'_>, start: Pos) -> ShroudResult<Stmt> {
        parser.advance(); // consume 'return'

        let value = if Self::at_statement_end(parser) {
            None
        } else {
            Some(Box::new(Self::parse_star_expressions(parser)?))
        };

        Ok(Stmt::new(StmtKind::Return(value), parser.span_from(start)))
    }

    /// Parse a raise statement.
    fn parse_raise(parser: &mut Parser<'_>, start: Pos) -> ShroudResult<Stmt> {
        parser.advance(); // consume 'raise'

        if Self::at_statement_end(parser) {
            return Ok(Stmt::new(
                StmtKind::Raise {
                    exc: None,
                    cause: None,
                },
                parser.span_from(start),
            ));
        }

        let exc = Some(Box::new(ExprParser::parse(parser, Precedence::Lowest)?));
        let cause = if parser.match_keyword(KW::From) {
            Some(Box::new(ExprParser::parse(parser, Precedence::Lowest)?))
        } else {
            None
        };

        Ok(Stmt::new(
            StmtKind::Raise { exc, cause },
            parser.span_from(start),
        ))
    }

    /// Parse an assert statement.
    fn parse_assert(parser: &mut Parser<'_>, start: Pos) -> ShroudResult<Stmt> {
        parser.advance(); // consume 'assert'

        let test = ExprParser::parse(parser, Precedence::Lowest)?;
        let msg = if parser.match_token(TokenKind::Comma) {
            Some(Box::new(ExprParser::parse(parser, Precedence::Lowest)?))
        } else {
            None
        };

        Ok(Stmt::new(
            StmtKind::Assert {
                test: Box::new(test),
                msg,
            },
            parser.span_from(start),
        ))
    }

    /// Parse a delete statement.
    fn parse_delete(parser: &mut Parser<'_>, start: Pos) -> ShroudResult<Stmt> {
        parser.advance(); // consume 'del'

        let mut targets = vec![with_context(
            ExprParser::parse(parser, Precedence::BitwiseOr)?,
            ExprContext::Del,
        )];
        while parser.match_token(TokenKind::Comma) {
            if Self::at_statement_end(parser) {
                break;
            }
            targets.push(with_context(
                ExprParser::parse(parser, Precedence::BitwiseOr)?,
                ExprContext::Del,
            ));
        }

        Ok(Stmt::new(StmtKind::Delete(targets), parser.span_from(start)))
    }

    fn parse_name_list(parser: &mut Parser<'_>) -> ShroudResult<Vec<String>> {
        let mut names = vec![parser.expect_identifier("expected identifier")?];
        while parser.match_token(TokenKind::Comma) {
            names.push(parser.expect_identifier("expected identifier")?);
        }
        Ok(names)
    }

    /// Parse an import statement.
    fn parse_import(parser: &mut Parser<'_>, start: Pos) -> ShroudResult<Stmt> {
        parser.advance(); // consume 'import'

        let mut names = vec![Self::parse_alias(parser, true)?];
        while parser.match_token(TokenKind::Comma) {
            names.push(Self::parse_alias(parser, true)?);
        }

        Ok(Stmt::new(StmtKind::Import(names), parser.span_from(start)))
    }

    /// Parse a from-import statement.
    fn parse_from_import(parser: &mut Parser<'_>, start: Pos) -> ShroudResult<Stmt> {
        parser.advance(); // consume 'from'

        // Count leading dots for relative imports
        let mut level = 0;
        loop {
            if parser.match_token(TokenKind::Dot) {
                level += 1;
            } else if parser.match_token(TokenKind::Ellipsis) {
                level += 3;
            } else {
                break;
            }
        }

        let module = if let TokenKind::Ident(_) = &parser.current().kind {
            Some(Self::parse_dotted_name(parser)?)
        } else if level == 0 {
            return Err(parser.error_at_current("expected module name"));
        } else {
            None
        };

        parser.expect_keyword(KW::Import, "expected 'import'")?;

        if parser.check(TokenKind::Star) {
            let star_start = parser.start_span();
            parser.advance();
            return Ok(Stmt::new(
                StmtKind::ImportFrom {
                    module,
                    names: vec![Alias {
                        name: "*".to_string(),
                        asname: None,
                        span: parser.span_from(star_start),
                    }],
                    level,
                },
                parser.span_from(start),
            ));
        }

        let has_paren = parser.match_token(TokenKind::LeftParen);
        let mut names = vec![Self::parse_alias(parser, false)?];
        while parser.match_token(TokenKind::Comma) {
            if has_paren && parser.check(TokenKind::RightParen) {
                break;
            }
            names.push(Self::parse_alias(parser, false)?);
        }
        if has_paren {
            parser.expect(TokenKind::RightParen, "expected ')'")?;
        }

        Ok(Stmt::new(
            StmtKind::ImportFrom {
                module,
                names,
                level,
            },
            parser.span_from(start),
        ))
    }

    /// Parse a dotted name (module path).
    fn parse_dotted_name(parser: &mut Parser<'_>) -> ShroudResult<String> {
        let mut name = parser.expect_identifier("expected module name")?;
        while parser.match_token(TokenKind::Dot) {
            name.push('.');
            name.push_str(&parser.expect_identifier("expected identifier")?);
        }
        Ok(name)
    }

    /// Parse an import alias.
    fn parse_alias(parser: &mut Parser<'_>, dotted: bool) -> ShroudResult<Alias> {
        let start = parser.start_span();
        let name = if dotted {
            Self::parse_dotted_name(parser)?
        } else {
            parser.expect_identifier("expected identifier")?
        };

        let asname = if parser.match_keyword(KW::As) {
            Some(parser.expect_identifier("expected identifier")?)
        } else {
            None
        };

        Ok(Alias {
            name,
            asname,
            span: parser.span_from(start),
        })
    }

    // =========================================================================
    // Compound Statements
    // =========================================================================

    /// Parse an if statement.
    fn parse_if(parser: &mut Parser<'_>, start: Pos) -> ShroudResult<Stmt> {
        parser.advance(); // consume 'if' / 'elif'

        let test = ExprParser::parse(parser, Precedence::Lowest)?;
        parser.expect(TokenKind::Colon, "expected ':'")?;
        let body = Self::parse_block(parser)?;

        let orelse = if parser.check_keyword(KW::Elif) {
            let elif_start = parser.start_span();
            vec![Self::parse_if(parser, elif_start)?]
        } else if parser.match_keyword(KW::Else) {
            parser.expect(TokenKind::Colon, "expected ':'")?;
            Self::parse_block(parser)?
        } else {
            Vec::new()
        };

        Ok(Stmt::new(
            StmtKind::If {
                test: Box::new(test),
                body,
                orelse,
            },
            parser.span_from(start),
        ))
    }

    fn parse_else_block(parser: &mut Parser<'_>) -> ShroudResult<Vec<Stmt>> {
        if parser.match_keyword(KW::Else) {
            parser.expect(TokenKind::Colon, "expected ':'")?;
            Self::parse_block(parser)
        } else {
            Ok(Vec::new())
        }
    }

    /// Parse a while statement.
    fn parse_while(parser: &mut Parser<'_>, start: Pos) -> ShroudResult<Stmt> {
        parser.advance(); // consume 'while'

        let test = ExprParser::parse(parser, Precedence::Lowest)?;
        parser.expect(TokenKind::Colon, "expected ':'")?;
        let body = Self::parse_block(parser)?;
        let orelse = Self::parse_else_block(parser)?;

        Ok(Stmt::new(
            StmtKind::While {
                test: Box::new(test),
                body,
                orelse,
            },
            parser.span_from(start),
        ))
    }

    /// Parse a for statement.
    fn parse_for(parser: &mut Parser<'_>, start: Pos, is_async: bool) -> ShroudResult<Stmt> {
        parser.advance(); // consume 'for'

        let target = ExprParser::parse_target_list(parser)?;
        parser.expect_keyword(KW::In, "expected 'in'")?;
        let iter = Self::parse_star_expressions(parser)?;
        parser.expect(TokenKind::Colon, "expected ':'")?;
        let body = Self::parse_block(parser)?;
        let orelse = Self::parse_else_block(parser)?;

        Ok(Stmt::new(
            StmtKind::For {
                target: Box::new(target),
                iter: Box::new(iter),
                body,
                orelse,
                is_async,
            },
            parser.span_from(start),
        ))
    }

    /// Parse a try statement.
    fn parse_try(parser: &mut Parser<'_>, start: Pos) -> ShroudResult<Stmt> {
        parser.advance(); // consume 'try'
        parser.expect(TokenKind::Colon, "expected ':'")?;
        let body = Self::parse_block(parser)?;

        let mut handlers = Vec::new();
        let mut is_star = None;
        while parser.check_keyword(KW::Except) {
            let handler_start = parser.start_span();
            parser.advance();
            let star = parser.match_token(TokenKind::Star);
            if *is_star.get_or_insert(star) != star {
                return Err(parser.error_at_previous("cannot mix 'except' and 'except*'"));
            }
            if star && parser.check(TokenKind::Colon) {
                return Err(parser.error_at_current("expected an exception type after 'except*'"));
            }

            let (typ, name) = if parser.check(TokenKind::Colon) {
                (None, None)
            } else {
                let typ = Some(Box::new(ExprParser::parse(parser, Precedence::Lowest)?));
                let name = if parser.match_keyword(KW::As) {
                    Some(parser.expect_identifier("expected identifier")?)
                } else {
                    None
                };
                (typ, name)
            };

            parser.expect(TokenKind::Colon, "expected ':'")?;
            let handler_body = Self::parse_block(parser)?;

            handlers.push(ExceptHandler {
                typ,
                name,
                body: handler_body,
                span: parser.span_from(handler_start),
            });
        }

        let orelse = Self::parse_else_block(parser)?;
        let finalbody = if parser.match_keyword(KW::Finally) {
            parser.expect(TokenKind::Colon, "expected ':'")?;
            Self::parse_block(parser)?
        } else {
            Vec::new()
        };

        if handlers.is_empty() && finalbody.is_empty() {
            return Err(parser.error_at_current("expected 'except' or 'finally' block"));
        }

        let kind = if is_star == Some(true) {
            StmtKind::TryStar {
                body,
                handlers,
                orelse,
                finalbody,
            }
        } else {
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            }
        };
        Ok(Stmt::new(kind, parser.span_from(start)))
    }

    /// Parse a with statement.
    fn parse_with(parser: &mut Parser<'_>, start: Pos, is_async: bool) -> ShroudResult<Stmt> {
        parser.advance(); // consume 'with'

        let mut items = Vec::new();
        loop {
            let context_expr = ExprParser::parse(parser, Precedence::Lowest)?;
            let optional_vars = if parser.match_keyword(KW::As) {
                let target = ExprParser::parse(parser, Precedence::BitwiseOr)?;
                Some(Box::new(with_context(target, ExprContext::Store)))
            } else {
                None
            };
            items.push(WithItem {
                context_expr,
                optional_vars,
            });

            if !parser.match_token(TokenKind::Comma) {
                break;
            }
        }

        parser.expect(TokenKind::Colon, "expected ':'")?;
        let body = Self::parse_block(parser)?;

        Ok(Stmt::new(
            StmtKind::With {
                items,
                body,
                is_async,
            },
            parser.span_from(start),
        ))
    }

    /// Parse a function definition.
    fn parse_function_def(parser: &mut Parser<'_>, start: Pos, is_async: bool) -> ShroudResult<Stmt> {
        parser.advance(); // consume 'def'

        let name = parser.expect_identifier("expected function name")?;

        parser.expect(TokenKind::LeftParen, "expected '('")?;
        let args = Self::parse_function_params(parser)?;
        parser.expect(TokenKind::RightParen, "expected ')'")?;

        let returns = if parser.match_token(TokenKind::Arrow) {
            Some(Box::new(ExprParser::parse(parser, Precedence::Lowest)?))
        } else {
            None
        };

        parser.expect(TokenKind::Colon, "expected ':'")?;
        let body = Self::parse_block(parser)?;

        Ok(Stmt::new(
            StmtKind::FunctionDef {
                name,
                args: Box::new(args),
                body,
                decorator_list: Vec::new(),
                returns,
                is_async,
            },
            parser.span_from(start),
        ))
    }

    /// Parse function parameters.
    fn parse_function_params(parser: &mut Parser<'_>) -> ShroudResult<Arguments> {
        let mut args = Arguments::default();
        let mut seen_star = false;

        while !parser.check(TokenKind::RightParen) {
            let arg_start = parser.start_span();

            if parser.match_token(TokenKind::Slash) {
                args.posonlyargs.append(&mut args.args);
            } else if parser.match_token(TokenKind::Star) {
                if let TokenKind::Ident(_) = &parser.current().kind {
                    args.vararg = Some(Self::parse_param(parser, arg_start)?);
                }
                seen_star = true;
            } else if parser.match_token(TokenKind::DoubleStar) {
                args.kwarg = Some(Self::parse_param(parser, arg_start)?);
            } else {
                let arg = Self::parse_param(parser, arg_start)?;
                let default = if parser.match_token(TokenKind::Equal) {
                    Some(ExprParser::parse(parser, Precedence::Lowest)?)
                } else {
                    None
                };
                if seen_star {
                    args.kwonlyargs.push(arg);
                    args.kw_defaults.push(default);
                } else {
                    if default.is_none() && !args.defaults.is_empty() {
                        return Err(parser.error_at_previous(
                            "non-default argument follows default argument",
                        ));
                    }
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

    /// Parse `name[: annotation]`.
    fn parse_param(parser: &mut Parser<'_>, start: Pos) -> ShroudResult<Arg> {
        let name = parser.expect_identifier("expected parameter name")?;
        let annotation = if parser.match_token(TokenKind::Colon) {
            Some(Box::new(ExprParser::parse(parser, Precedence::Lowest)?))
        } else {
            None
        };
        Ok(Arg {
            arg: name,
            annotation,
            span: parser.span_from(start),
        })
    }

    /// Parse a class definition.
    fn parse_class_def(parser: &mut Parser<'_>, start: Pos) -> ShroudResult<Stmt> {
        parser.advance(); // consume 'class'

        let name = parser.expect_identifier("expected class name")?;

        let (bases, keywords) = if parser.match_token(TokenKind::LeftParen) {
            let parsed = Self::parse_class_args(parser)?;
            parser.expect(TokenKind::RightParen, "expected ')'")?;
            parsed
        } else {
            (Vec::new(), Vec::new())
        };

        parser.expect(TokenKind::Colon, "expected ':'")?;
        let body = Self::parse_block(parser)?;

        Ok(Stmt::new(
            StmtKind::ClassDef {
                name,
                bases,
                keywords,
                body,
                decorator_list: Vec::new(),
            },
            parser.span_from(start),
        ))
    }

    /// Parse class arguments (bases and keywords).
    fn parse_class_args(parser: &mut Parser<'_>) -> ShroudResult<(Vec<Expr>, Vec<Keyword>)> {
        let mut bases = Vec::new();
        let mut keywords = Vec::new();

        while !parser.check(TokenKind::RightParen) {
            let arg_start = parser.start_span();

            if parser.match_token(TokenKind::DoubleStar) {
                let value = ExprParser::parse(parser, Precedence::Lowest)?;
                keywords.push(Keyword {
                    arg: None,
                    value,
                    span: parser.span_from(arg_start),
                });
            } else {
                let expr = ExprParser::parse(parser, Precedence::Lowest)?;
                if parser.match_token(TokenKind::Equal) {
                    let ExprKind::Name { id, .. } = expr.kind else {
                        return Err(
                            parser.error_at_previous("keyword argument name must be identifier")
                        );
                    };
                    let value = ExprParser::parse(parser, Precedence::Lowest)?;
                    keywords.push(Keyword {
                        arg: Some(id),
                        value,
                        span: parser.span_from(arg_start),
                    });
                } else {
                    bases.push(expr);
                }
            }

            if !parser.match_token(TokenKind::Comma) {
                break;
            }
        }

        Ok((bases, keywords))
    }

    /// Parse an async statement (async def, async for, async with).
    fn parse_async(parser: &mut Parser<'_>, start: Pos) -> ShroudResult<Stmt> {
        parser.advance(); // consume 'async'

        match &parser.current().kind {
            TokenKind::Keyword(KW::Def) => Self::parse_function_def(parser, start, true),
            TokenKind::Keyword(KW::For) => Self::parse_for(parser, start, true),
            TokenKind::Keyword(KW::With) => Self::parse_with(parser, start, true),
            _ => Err(parser.error_at_current("expected 'def', 'for', or 'with' after 'async'")),
        }
    }

    /// Parse a decorated definition.
    fn parse_decorated(parser: &mut Parser<'_>, start: Pos) -> ShroudResult<Stmt> {
        let mut decorators = Vec::new();

        while parser.match_token(TokenKind::At) {
            decorators.push(ExprParser::parse(parser, Precedence::Lowest)?);
            parser.expect(TokenKind::Newline, "expected newline after decorator")?;
        }

        let def_start = parser.start_span();
        let mut stmt = match &parser.current().kind {
            TokenKind::Keyword(KW::Def) => Self::parse_function_def(parser, def_start, false)?,
            TokenKind::Keyword(KW::Async) => {
                parser.advance();
                Self::parse_function_def(parser, def_start, true)?
            }
            TokenKind::Keyword(KW::Class) => Self::parse_class_def(parser, def_start)?,
            _ => return Err(parser.error_at_current("expected 'def' or 'class' after decorator")),
        };

        if let StmtKind::FunctionDef { decorator_list, .. } | StmtKind::ClassDef { decorator_list, .. } =
            &mut stmt.kind
        {
            *decorator_list = decorators;
        }

        stmt.span = parser.span_from(start);
        Ok(stmt)
    }

    // =========================================================================
    // Match Statements
    // =========================================================================

    /// Parse `match subject:` and its cases. `match` is a soft keyword: when
    /// the line does not have that shape the parser is rewound and `None`
    /// returned, so the line parses as an ordinary statement.
    fn try_parse_match(parser: &mut Parser<'_>, start: Pos) -> ShroudResult<Option<Stmt>> {
        let checkpoint = parser.checkpoint();
        parser.advance(); // consume 'match'
        let subject = if Self::starts_expression(parser) {
            Self::parse_star_expressions(parser).ok()
        } else {
            None
        };
        let Some(subject) = subject.filter(|_| {
            parser.check(TokenKind::Colon) && parser.peek().kind == TokenKind::Newline
        }) else {
            parser.rewind(checkpoint);
            return Ok(None);
        };
        parser.advance(); // consume ':'
        parser.expect(TokenKind::Newline, "expected newline")?;
        parser.expect(TokenKind::Indent, "expected an indented block")?;

        let mut cases = Vec::new();
        loop {
            parser.skip_newlines();
            if parser.check(TokenKind::Dedent) || parser.check(TokenKind::Eof) {
                break;
            }
            if !parser.check_soft_keyword("case") {
                return Err(parser.error_at_current("expected 'case' block"));
            }
            parser.advance();
            let pattern = Self::parse_case_patterns(parser)?;
            let guard = if parser.match_keyword(KW::If) {
                Some(Box::new(ExprParser::parse(parser, Precedence::Lowest)?))
            } else {
                None
            };
            parser.expect(TokenKind::Colon, "expected ':'")?;
            let body = Self::parse_block(parser)?;
            cases.push(MatchCase { pattern, guard, body });
        }
        parser.expect(TokenKind::Dedent, "expected dedent")?;
        if cases.is_empty() {
            return Err(parser.error_at_previous("expected 'case' block"));
        }

        Ok(Some(Stmt::new(
            StmtKind::Match {
                subject: Box::new(subject),
                cases,
            },
            parser.span_from(start),
        )))
    }

    /// The pattern after `case`: one pattern, or an unparenthesized sequence.
    fn parse_case_patterns(parser: &mut Parser<'_>) -> ShroudResult<Pattern> {
        let start = parser.start_span();
        let first = Self::parse_maybe_star_pattern(parser)?;
        if !parser.check(TokenKind::Comma) {
            if matches!(first.kind, PatternKind::Star(_)) {
                return Err(parser.error_at_previous("star pattern outside a sequence"));
            }
            return Ok(first);
        }
        let mut items = vec![first];
        while parser.match_token(TokenKind::Comma) {
            if parser.check(TokenKind::Colon) || parser.check_keyword(KW::If) {
                break;
            }
            items.push(Self::parse_maybe_star_pattern(parser)?);
        }
        Ok(Pattern::new(PatternKind::Sequence(items), parser.span_from(start)))
    }

    fn parse_maybe_star_pattern(parser: &mut Parser<'_>) -> ShroudResult<Pattern> {
        let start = parser.start_span();
        if parser.match_token(TokenKind::Star) {
            let name = parser.expect_identifier("expected name after '*'")?;
            let name = (name != "_").then_some(name);
            return Ok(Pattern::new(PatternKind::Star(name), parser.span_from(start)));
        }
        Self::parse_pattern(parser)
    }

    /// `or_pattern ['as' NAME]`
    fn parse_pattern(parser: &mut Parser<'_>) -> ShroudResult<Pattern> {
        let start = parser.start_span();
        let pattern = Self::parse_or_pattern(parser)?;
        if !parser.match_keyword(KW::As) {
            return Ok(pattern);
        }
        let name = parser.expect_identifier("expected name after 'as'")?;
        if name == "_" {
            return Err(parser.error_at_previous("cannot use '_' as a target"));
        }
        Ok(Pattern::new(
            PatternKind::As {
                pattern: Some(Box::new(pattern)),
                name: Some(name),
            },
            parser.span_from(start),
        ))
    }

    fn parse_or_pattern(parser: &mut Parser<'_>) -> ShroudResult<Pattern> {
        let start = parser.start_span();
        let first = Self::parse_closed_pattern(parser)?;
        if !parser.check(TokenKind::Pipe) {
            return Ok(first);
        }
        let mut alternatives = vec![first];
        while parser.match_token(TokenKind::Pipe) {
            alternatives.push(Self::parse_closed_pattern(parser)?);
        }
        Ok(Pattern::new(PatternKind::Or(alternatives), parser.span_from(start)))
    }

    fn parse_closed_pattern(parser: &mut Parser<'_>) -> ShroudResult<Pattern> {
        let start = parser.start_span();
        let kind = match parser.current().kind.clone() {
            TokenKind::Keyword(KW::None) => {
                parser.advance();
                PatternKind::Singleton(None)
            }
            TokenKind::Keyword(KW::True) => {
                parser.advance();
                PatternKind::Singleton(Some(true))
            }
            TokenKind::Keyword(KW::False) => {
                parser.advance();
                PatternKind::Singleton(Some(false))
            }
            TokenKind::Int(_)
            | TokenKind::BigInt(_)
            | TokenKind::Float(_)
            | TokenKind::Imaginary(_)
            | TokenKind::String(_)
            | TokenKind::Bytes(_)
            | TokenKind::Minus => PatternKind::Value(Box::new(ExprParser::parse(parser, Precedence::Additive)?)),
            TokenKind::Ident(name) => {
                let (value, dotted) = Self::parse_dotted_value(parser)?;
                if parser.check(TokenKind::LeftParen) {
                    return Self::parse_class_pattern(parser, start, value);
                }
                if dotted {
                    PatternKind::Value(Box::new(value))
                } else {
                    PatternKind::As {
                        pattern: None,
                        name: (name != "_").then_some(name),
                    }
                }
            }
            TokenKind::LeftParen => {
                parser.advance();
                if parser.match_token(TokenKind::RightParen) {
                    PatternKind::Sequence(Vec::new())
                } else {
                    let first = Self::parse_maybe_star_pattern(parser)?;
                    if !matches!(first.kind, PatternKind::Star(_)) && parser.match_token(TokenKind::RightParen) {
                        return Ok(first);
                    }
                    let mut items = vec![first];
                    parser.expect(TokenKind::Comma, "expected ','")?;
                    while !parser.check(TokenKind::RightParen) {
                        items.push(Self::parse_maybe_star_pattern(parser)?);
                        if !parser.match_token(TokenKind::Comma) {
                            break;
                        }
                    }
                    parser.expect(TokenKind::RightParen, "expected ')'")?;
                    PatternKind::Sequence(items)
                }
            }
            TokenKind::LeftBracket => {
                parser.advance();
                let mut items = Vec::new();
                while !parser.check(TokenKind::RightBracket) {
                    items.push(Self::parse_maybe_star_pattern(parser)?);
                    if !parser.match_token(TokenKind::Comma) {
                        break;
                    }
                }
                parser.expect(TokenKind::RightBracket, "expected ']'")?;
                PatternKind::Sequence(items)
            }
            TokenKind::LeftBrace => Self::parse_mapping_pattern(parser)?,
            _ => return Err(parser.error_at_current("expected a pattern")),
        };
        Ok(Pattern::new(kind, parser.span_from(start)))
    }

    /// `NAME ('.' NAME)*` as a load expression, and whether it was dotted.
    fn parse_dotted_value(parser: &mut Parser<'_>) -> ShroudResult<(Expr, bool)> {
        let start = parser.start_span();
        let id = parser.expect_identifier("expected name")?;
        let mut value = Expr::new(
            ExprKind::Name {
                id,
                ctx: ExprContext::Load,
            },
            parser.span_from(start),
        );
        let mut dotted = false;
        while parser.match_token(TokenKind::Dot) {
            let attr = parser.expect_identifier("expected attribute name")?;
            value = Expr::new(
                ExprKind::Attribute {
                    value: Box::new(value),
                    attr,
                },
                parser.span_from(start),
            );
            dotted = true;
        }
        Ok((value, dotted))
    }

    fn parse_mapping_pattern(parser: &mut Parser<'_>) -> ShroudResult<PatternKind> {
        parser.advance(); // consume '{'
        let mut keys = Vec::new();
        let mut patterns = Vec::new();
        let mut rest = None;
        while !parser.check(TokenKind::RightBrace) {
            if parser.match_token(TokenKind::DoubleStar) {
                rest = Some(parser.expect_identifier("expected name after '**'")?);
                parser.match_token(TokenKind::Comma);
                break;
            }
            let key = if matches!(parser.current().kind, TokenKind::Ident(_)) {
                let (key, dotted) = Self::parse_dotted_value(parser)?;
                if !dotted {
                    return Err(parser.error_at_previous("mapping pattern keys must be literals or dotted names"));
                }
                key
            } else {
                ExprParser::parse(parser, Precedence::Additive)?
            };
            parser.expect(TokenKind::Colon, "expected ':'")?;
            patterns.push(Self::parse_pattern(parser)?);
            keys.push(key);
            if !parser.match_token(TokenKind::Comma) {
                break;
            }
        }
        parser.expect(TokenKind::RightBrace, "expected '}'")?;
        Ok(PatternKind::Mapping { keys, patterns, rest })
    }

    fn parse_class_pattern(parser: &mut Parser<'_>, start: Pos, cls: Expr) -> ShroudResult<Pattern> {
        parser.advance(); // consume '('
        let mut patterns = Vec::new();
        let mut kwd_attrs = Vec::new();
        let mut kwd_patterns = Vec::new();
        while !parser.check(TokenKind::RightParen) {
            if let TokenKind::Ident(attr) = &parser.current().kind
                && parser.peek().kind == TokenKind::Equal
            {
                kwd_attrs.push(attr.clone());
                parser.advance();
                parser.advance();
                kwd_patterns.push(Self::parse_pattern(parser)?);
            } else if kwd_attrs.is_empty() {
                patterns.push(Self::parse_pattern(parser)?);
            } else {
                return Err(parser.error_at_current("positional patterns follow keyword patterns"));
            }
            if !parser.match_token(TokenKind::Comma) {
                break;
            }
        }
        parser.expect(TokenKind::RightParen, "expected ')'")?;
        Ok(Pattern::new(
            PatternKind::Class {
                cls: Box::new(cls),
                patterns,
                kwd_attrs,
                kwd_patterns,
            },
            parser.span_from(start),
        ))
    }

    /// Parse a block of statements: an indented suite or simple statements
    /// on the header line.
    fn parse_block(parser: &mut Parser<'_>) -> ShroudResult<Vec<Stmt>> {
        if !parser.match_token(TokenKind::Newline) {
            return Self::parse_simple_line(parser);
        }
        parser.expect(TokenKind::Indent, "expected an indented block")?;

        let mut stmts = Vec::new();
        loop {
            parser.skip_newlines();
            if parser.check(TokenKind::Dedent) || parser.check(TokenKind::Eof) {
                break;
            }
            stmts.extend(Self::parse_line(parser)?);
        }

        parser.expect(TokenKind::Dedent, "expected dedent")?;
        Ok(stmts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn parse_stmt(s: &str) -> Stmt {
        let module = parse(s).expect("parse failed");
        module.body.into_iter().next().expect("no statements")
    }

    #[test]
    fn test_pass() {
        assert!(matches!(parse_stmt("pass").kind, StmtKind::Pass));
    }

    #[test]
    fn test_return_tuple() {
        let StmtKind::Return(Some(value)) = parse_stmt("return 1, 2").kind else {
            panic!("expected return");
        };
        assert!(matches!(value.kind, ExprKind::Tuple(ref e) if e.len() == 2));
    }

    #[test]
    fn test_return_none() {
        assert!(matches!(parse_stmt("return").kind, StmtKind::Return(None)));
    }

    #[test]
    fn test_assignment_sets_store() {
        let StmtKind::Assign { targets, .. } = parse_stmt("x = 1").kind else {
            panic!("expected assign");
        };
        assert!(matches!(
            targets[0].kind,
            ExprKind::Name {
                ctx: ExprContext::Store,
                ..
            }
        ));
    }

    #[test]
    fn test_tuple_unpacking_assignment() {
        let StmtKind::Assign { targets, value } = parse_stmt("a, *b = c, d").kind else {
            panic!("expected assign");
        };
        let ExprKind::Tuple(elts) = &targets[0].kind else {
            panic!("expected tuple target");
        };
        assert!(matches!(elts[1].kind, ExprKind::Starred(_)));
        assert!(matches!(value.kind, ExprKind::Tuple(_)));
    }

    #[test]
    fn test_chained_assignment() {
        let StmtKind::Assign { targets, value } = parse_stmt("a = b = 1, 2").kind else {
            panic!("expected assign");
        };
        assert_eq!(targets.len(), 2);
        assert!(matches!(value.kind, ExprKind::Tuple(_)));
    }

    #[test]
    fn test_aug_assign() {
        assert!(matches!(
            parse_stmt("x += 1").kind,
            StmtKind::AugAssign { op: BinOp::Add, .. }
        ));
    }

    #[test]
    fn test_ann_assign() {
        let StmtKind::AnnAssign { simple, value, .. } = parse_stmt("x: int = 5").kind else {
            panic!("expected annassign");
        };
        assert!(simple);
        assert!(value.is_some());
    }

    #[test]
    fn test_semicolons() {
        let module = parse("a = 1; b = 2;\nc").unwrap();
        assert_eq!(module.body.len(), 3);
    }

    #[test]
    fn test_imports() {
        let StmtKind::Import(names) = parse_stmt("import os.path as p, sys").kind else {
            panic!("expected import");
        };
        assert_eq!(names[0].name, "os.path");
        assert_eq!(names[0].asname.as_deref(), Some("p"));

        let StmtKind::ImportFrom { module, names, level } =
            parse_stmt("from ..pkg import (a as b, c,)").kind
        else {
            panic!("expected import from");
        };
        assert_eq!(module.as_deref(), Some("pkg"));
        assert_eq!(level, 2);
        assert_eq!(names.len(), 2);

        let StmtKind::ImportFrom { module, names, level } = parse_stmt("from . import *").kind
        else {
            panic!("expected import from");
        };
        assert!(module.is_none());
        assert_eq!(level, 1);
        assert_eq!(names[0].name, "*");
    }

    #[test]
    fn test_if_elif_else() {
        let StmtKind::If { orelse, .. } = parse_stmt("if a:\n  x\nelif b:\n  y\nelse:\n  z\n").kind
        else {
            panic!("expected if");
        };
        let StmtKind::If { orelse: inner, .. } = &orelse[0].kind else {
            panic!("expected nested if");
        };
        assert_eq!(inner.len(), 1);
    }

    #[test]
    fn test_inline_suite() {
        let StmtKind::While { body, .. } = parse_stmt("while x: a; b\n").kind else {
            panic!("expected while");
        };
        assert_eq!(body.len(), 2);
    }

    #[test]
    fn test_for_tuple_target() {
        let StmtKind::For { target, .. } = parse_stmt("for k, v in d.items():\n  pass").kind else {
            panic!("expected for");
        };
        assert!(matches!(target.kind, ExprKind::Tuple(_)));
    }

    #[test]
    fn test_function_def() {
        let StmtKind::FunctionDef { name, args, returns, .. } =
            parse_stmt("def f(a, /, b: int = 1, *c, d, **e) -> str:\n    return a\n").kind
        else {
            panic!("expected def");
        };
        assert_eq!(name, "f");
        assert_eq!(args.posonlyargs.len(), 1);
        assert_eq!(args.args.len(), 1);
        assert!(args.args[0].annotation.is_some());
        assert_eq!(args.kwonlyargs.len(), 1);
        assert!(args.kwarg.is_some());
        assert!(returns.is_some());
    }

    #[test]
    fn test_decorated_class() {
        let stmt = parse_stmt("@dec\nclass A(B, metaclass=M):\n    x = 1\n");
        let StmtKind::ClassDef {
            bases,
            keywords,
            decorator_list,
            ..
        } = stmt.kind
        else {
            panic!("expected class");
        };
        assert_eq!(bases.len(), 1);
        assert_eq!(keywords.len(), 1);
        assert_eq!(decorator_list.len(), 1);
        assert_eq!(stmt.span.line(), 1);
    }

    #[test]
    fn test_try() {
        let StmtKind::Try { handlers, finalbody, .. } =
            parse_stmt("try:\n  a\nexcept E as e:\n  b\nexcept:\n  c\nfinally:\n  d\n").kind
        else {
            panic!("expected try");
        };
        assert_eq!(handlers.len(), 2);
        assert_eq!(handlers[0].name.as_deref(), Some("e"));
        assert_eq!(finalbody.len(), 1);
    }

    #[test]
    fn test_try_star() {
        let StmtKind::TryStar { handlers, .. } =
            parse_stmt("try:\n  a\nexcept* ValueError as eg:\n  b\nexcept* (TypeError, KeyError):\n  c\n").kind
        else {
            panic!("expected try/except*");
        };
        assert_eq!(handlers.len(), 2);
        assert_eq!(handlers[0].name.as_deref(), Some("eg"));
        assert!(parse("try:\n  a\nexcept* E:\n  b\nexcept F:\n  c\n").is_err());
        assert!(parse("try:\n  a\nexcept*:\n  b\n").is_err());
    }

    #[test]
    fn test_match_cases() {
        let src = "match cmd.split():\n    case [\"go\", *rest] if rest:\n        a\n    case Point(x=0, y=yy) | {\"k\": 1, **kw}:\n        b\n    case -1 | Color.RED | None:\n        c\n    case (p, q) as pair:\n        d\n    case _:\n        e\n";
        let StmtKind::Match { cases, .. } = parse_stmt(src).kind else {
            panic!("expected match");
        };
        assert_eq!(cases.len(), 5);
        assert!(cases[0].guard.is_some());
        assert_eq!(cases[0].pattern.captures(), ["rest"]);
        assert!(matches!(cases[1].pattern.kind, PatternKind::Or(ref alts) if alts.len() == 2));
        assert_eq!(cases[1].pattern.captures(), ["yy", "kw"]);
        let PatternKind::Or(alts) = &cases[2].pattern.kind else {
            panic!("expected alternatives");
        };
        assert!(matches!(alts[0].kind, PatternKind::Value(_)));
        assert!(matches!(alts[2].kind, PatternKind::Singleton(None)));
        assert_eq!(cases[3].pattern.captures(), ["p", "q", "pair"]);
        assert!(matches!(
            cases[4].pattern.kind,
            PatternKind::As {
                pattern: None,
                name: None
            }
        ));
    }

    #[test]
    fn test_match_is_a_soft_keyword() {
        let module = parse("match = [1]\nmatch[0] = 2\nmatch(x)\nprint(match)\n").unwrap();
        assert_eq!(module.body.len(), 4);
        assert!(module.body.iter().all(|s| !matches!(s.kind, StmtKind::Match { .. })));
        let case = parse("case = 1\n").unwrap();
        assert!(matches!(case.body[0].kind, StmtKind::Assign { .. }));
    }

    #[test]
    fn test_with() {
        let StmtKind::With { items, .. } = parse_stmt("with open(f) as fh, g():\n  pass").kind
        else {
            panic!("expected with");
        };
        assert_eq!(items.len(), 2);
        assert!(items[0].optional_vars.is_some());
    }

    #[test]
    fn test_global_nonlocal() {
        assert!(matches!(parse_stmt("global a, b").kind, StmtKind::Global(ref n) if n.len() == 2));
        assert!(matches!(parse_stmt("nonlocal a").kind, StmtKind::Nonlocal(_)));
    }

    #[test]
    fn test_nested_blocks_and_comments() {
        let src = "def f():\n    # comment\n    if x:\n        return 1\n\n    return 2\n";
        let StmtKind::FunctionDef { body, .. } = parse_stmt(src).kind else {
            panic!("expected def");
        };
        assert_eq!(body.len(), 2);
    }
}
