//! Recursive-descent parser with Pratt expression parsing.

mod expr;
mod fstring;
mod stmt;

pub use expr::ExprParser;
pub use stmt::StmtParser;

use crate::ast::{Expr, Module};
use crate::lexer::Lexer;
use crate::token::{Keyword, Token, TokenKind};
use shroud_core::{Pos, ShroudError, ShroudResult, Span};

/// Operator precedence levels, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    /// Entry level: any expression.
    Lowest,
    /// `:=`
    NamedExpr,
    /// `x if c else y`
    Conditional,
    /// `or`
    Or,
    /// `and`
    And,
    /// `not`
    Not,
    /// `<`, `==`, `in`, `is`, ...
    Comparison,
    /// `|`
    BitwiseOr,
    /// `^`
    BitwiseXor,
    /// `&`
    BitwiseAnd,
    /// `<<`, `>>`
    Shift,
    /// `+`, `-`
    Additive,
    /// `*`, `/`, `//`, `%`, `@`
    Multiplicative,
    /// Unary `-`, `+`, `~`
    Unary,
    /// `**`
    Power,
    /// `await`
    Await,
    /// Calls, subscripts, attributes.
    Primary,
}

impl Precedence {
    /// The next-higher level (used for left-associative operands).
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Self::Lowest => Self::NamedExpr,
            Self::NamedExpr => Self::Conditional,
            Self::Conditional => Self::Or,
            Self::Or => Self::And,
            Self::And => Self::Not,
            Self::Not => Self::Comparison,
            Self::Comparison => Self::BitwiseOr,
            Self::BitwiseOr => Self::BitwiseXor,
            Self::BitwiseXor => Self::BitwiseAnd,
            Self::BitwiseAnd => Self::Shift,
            Self::Shift => Self::Additive,
            Self::Additive => Self::Multiplicative,
            Self::Multiplicative => Self::Unary,
            Self::Unary => Self::Power,
            Self::Power => Self::Await,
            Self::Await | Self::Primary => Self::Primary,
        }
    }
}

/// Token-stream parser state.
pub struct Parser<'src> {
    tokens: Vec<Token>,
    index: usize,
    eof: Token,
    _source: &'src str,
}

impl<'src> Parser<'src> {
    /// Tokenize `source` and position the parser on the first token.
    #[must_use]
    pub fn new(source: &'src str) -> Self {
        Self::new_at(source, Pos::new(1, 0))
    }

    /// Like [`Parser::new`], but token positions are reported relative to
    /// `origin` (used for source embedded in f-string replacement fields).
    #[must_use]
    pub fn new_at(source: &'src str, origin: Pos) -> Self {
        let mut tokens = Lexer::tokenize(source);
        if origin != Pos::new(1, 0) {
            let shift = |p: Pos| {
                if p.line == 1 {
                    Pos::new(origin.line, origin.col + p.col)
                } else {
                    Pos::new(origin.line + p.line - 1, p.col)
                }
            };
            for token in &mut tokens {
                token.span = Span::new(shift(token.span.start), shift(token.span.end));
            }
        }
        let eof_span = tokens.last().map_or(Span::point(origin.line, origin.col), |t| t.span);
        Self {
            tokens,
            index: 0,
            eof: Token::new(TokenKind::Eof, eof_span),
            _source: source,
        }
    }

    // =========================================================================
    // Token navigation
    // =========================================================================

    /// The current token.
    #[must_use]
    pub fn current(&self) -> &Token {
        self.tokens.get(self.index).unwrap_or(&self.eof)
    }

    /// The token after the current one.
    #[must_use]
    pub fn peek(&self) -> &Token {
        self.tokens.get(self.index + 1).unwrap_or(&self.eof)
    }

    /// The most recently consumed token.
    #[must_use]
    pub fn previous(&self) -> &Token {
        self.index
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .unwrap_or(&self.eof)
    }

    /// Consume the current token.
    pub fn advance(&mut self) {
        if self.index < self.tokens.len() {
            self.index += 1;
        }
    }

    /// Whether the current token has the given kind.
    #[must_use]
    pub fn check(&self, kind: TokenKind) -> bool {
        self.current().kind == kind
    }

    /// Consume the current token if it has the given kind.
    pub fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Consume a token of the given kind or fail with `message`.
    pub fn expect(&mut self, kind: TokenKind, message: &str) -> ShroudResult<()> {
        if self.match_token(kind) {
            Ok(())
        } else {
            Err(self.error_at_current(message))
        }
    }

    /// Whether the current token is the given keyword.
    #[must_use]
    pub fn check_keyword(&self, kw: Keyword) -> bool {
        self.current().kind == TokenKind::Keyword(kw)
    }

    /// Consume the given keyword if present.
    pub fn match_keyword(&mut self, kw: Keyword) -> bool {
        self.match_token(TokenKind::Keyword(kw))
    }

    /// Consume the given keyword or fail with `message`.
    pub fn expect_keyword(&mut self, kw: Keyword, message: &str) -> ShroudResult<()> {
        self.expect(TokenKind::Keyword(kw), message)
    }

    /// Consume an identifier and return its name.
    pub fn expect_identifier(&mut self, message: &str) -> ShroudResult<String> {
        if let TokenKind::Ident(name) = &self.current().kind {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.error_at_current(message))
        }
    }

    /// Whether the current token is the identifier `word`, used as a soft
    /// keyword (`match`, `case`).
    #[must_use]
    pub fn check_soft_keyword(&self, word: &str) -> bool {
        matches!(&self.current().kind, TokenKind::Ident(name) if name == word)
    }

    /// Position in the token stream, for [`Parser::rewind`].
    #[must_use]
    pub fn checkpoint(&self) -> usize {
        self.index
    }

    /// Return to a position taken with [`Parser::checkpoint`].
    pub fn rewind(&mut self, checkpoint: usize) {
        self.index = checkpoint;
    }

    /// Skip blank logical lines.
    pub fn skip_newlines(&mut self) {
        while self.match_token(TokenKind::Newline) {}
    }

    // =========================================================================
    // Spans and errors
    // =========================================================================

    /// Start position of the current token.
    #[must_use]
    pub fn start_span(&self) -> Pos {
        self.current().span.start
    }

    /// Span from `start` to the end of the previously consumed token.
    #[must_use]
    pub fn span_from(&self, start: Pos) -> Span {
        Span::new(start, self.previous().span.end.max(start))
    }

    /// Error located at the current token.
    #[must_use]
    pub fn error_at_current(&self, message: &str) -> ShroudError {
        Self::error_at(self.current(), message)
    }

    /// Error located at the previously consumed token.
    #[must_use]
    pub fn error_at_previous(&self, message: &str) -> ShroudError {
        Self::error_at(self.previous(), message)
    }

    fn error_at(token: &Token, message: &str) -> ShroudError {
        match &token.kind {
            TokenKind::Error(lex_message) => ShroudError::lex(lex_message.clone(), token.span),
            kind => ShroudError::syntax(format!("{message}, found {kind}"), token.span),
        }
    }
}

/// Parse a whole source file.
pub fn parse(source: &str) -> ShroudResult<Module> {
    let mut parser = Parser::new(source);
    let mut body = Vec::new();
    parser.skip_newlines();
    while !parser.check(TokenKind::Eof) {
        body.extend(StmtParser::parse_line(&mut parser)?);
        parser.skip_newlines();
    }
    Ok(Module::new(body))
}

/// Parse a single expression (surrounding whitespace and a trailing newline
/// are allowed).
pub fn parse_expression(source: &str) -> ShroudResult<Expr> {
    parse_expression_at(source, Pos::new(1, 0))
}

pub(crate) fn parse_expression_at(source: &str, origin: Pos) -> ShroudResult<Expr> {
    let mut parser = Parser::new_at(source, origin);
    let expr = StmtParser::parse_star_expressions(&mut parser)?;
    parser.skip_newlines();
    if !parser.check(TokenKind::Eof) {
        return Err(parser.error_at_current("unexpected trailing input"));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_order() {
        assert!(Precedence::Or < Precedence::And);
        assert!(Precedence::Additive.next() == Precedence::Multiplicative);
        assert_eq!(Precedence::Primary.next(), Precedence::Primary);
    }

    #[test]
    fn test_lex_error_surfaces() {
        let err = parse("x = 'abc").unwrap_err();
        assert!(matches!(err, ShroudError::LexError { .. }));
    }

    #[test]
    fn test_syntax_error_location() {
        let err = parse("x = (1,\n").unwrap_err();
        assert!(err.span().is_some());
    }

    #[test]
    fn test_origin_shifts_positions() {
        let expr = parse_expression_at("a", Pos::new(7, 4)).unwrap();
        assert_eq!(expr.span.start, Pos::new(7, 4));
    }
}
