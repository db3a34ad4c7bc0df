//! Python lexer.
//!
//! Produces the token stream the parser consumes:
//! - All operators and delimiters
//! - INDENT/DEDENT tracking
//! - Numeric formats (int, float, complex, hex, octal, binary)
//! - String formats (raw, bytes, f-strings, triple-quoted)
//! - Line continuation and comment stripping

pub mod cursor;
pub mod identifier;
pub mod indent;
pub mod number;
pub mod string;

use cursor::Cursor;
use identifier::{is_id_start, parse_identifier};
use indent::IndentStack;
use number::parse_number;
use shroud_core::{Pos, Span};
use string::{StringPrefix, is_string_prefix, parse_string};

use crate::token::{Token, TokenKind};

/// The Python lexer.
#[derive(Debug)]
pub struct Lexer<'src> {
    /// Character cursor.
    cursor: Cursor<'src>,
    /// Indentation tracker.
    indent: IndentStack,
    /// Whether we've reached EOF.
    at_eof: bool,
    /// Whether the last emitted token ended a logical line.
    last_was_newline: bool,
    /// Token start position for the current token.
    token_start: Pos,
}

impl<'src> Lexer<'src> {
    /// Create a new lexer for the given source code.
    #[must_use]
    pub fn new(source: &'src str) -> Self {
        Self {
            cursor: Cursor::new(source),
            indent: IndentStack::new(),
            at_eof: false,
            last_was_newline: true,
            token_start: Pos::new(1, 0),
        }
    }

    /// Get the next token.
    pub fn next_token(&mut self) -> Token {
        let token = self.scan_token();
        self.last_was_newline = matches!(
            token.kind,
            TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent
        );
        token
    }

    fn scan_token(&mut self) -> Token {
        // Handle pending DEDENT tokens
        if self.indent.has_pending_dedents() {
            self.indent.consume_dedent();
            return self.make_token(TokenKind::Dedent);
        }

        if self.at_eof {
            return self.make_token(TokenKind::Eof);
        }

        // Process line start (indentation)
        if self.indent.at_line_start() && self.indent.tracking_indent() {
            let token = self.handle_line_start();
            self.indent.consumed_content();
            if let Some(token) = token {
                return token;
            }
        }

        // Skip whitespace (but not newlines)
        self.skip_whitespace();
        self.token_start = self.cursor.location();

        let first = self.cursor.first();
        if self.cursor.is_eof() {
            return self.finish();
        }

        // Strings start without consuming the quote
        if first == '"' || first == '\'' {
            let kind = parse_string(&mut self.cursor, StringPrefix::default());
            return self.make_token(kind);
        }

        let Some(c) = self.cursor.bump() else {
            return self.finish();
        };

        let kind = match c {
            // Newline
            '\n' => match self.handle_newline() {
                Some(kind) => kind,
                None => return self.scan_token(),
            },
            '\r' => {
                self.cursor.eat('\n');
                match self.handle_newline() {
                    Some(kind) => kind,
                    None => return self.scan_token(),
                }
            }

            // Comments
            '#' => {
                self.skip_comment();
                return self.scan_token();
            }

            // Line continuation
            '\\' if matches!(self.cursor.first(), '\n' | '\r') => {
                self.cursor.eat('\r');
                self.cursor.eat('\n');
                return self.scan_token();
            }

            // Operators and delimiters
            '(' => {
                self.indent.open_bracket();
                TokenKind::LeftParen
            }
            ')' => {
                self.indent.close_bracket();
                TokenKind::RightParen
            }
            '[' => {
                self.indent.open_bracket();
                TokenKind::LeftBracket
            }
            ']' => {
                self.indent.close_bracket();
                TokenKind::RightBracket
            }
            '{' => {
                self.indent.open_bracket();
                TokenKind::LeftBrace
            }
            '}' => {
                self.indent.close_bracket();
                TokenKind::RightBrace
            }
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            '~' => TokenKind::Tilde,
            ':' => self.with_equal(TokenKind::Colon, TokenKind::ColonEqual),
            '@' => self.with_equal(TokenKind::At, TokenKind::AtEqual),
            '.' => {
                if self.cursor.first() == '.' && self.cursor.second() == '.' {
                    self.cursor.bump();
                    self.cursor.bump();
                    TokenKind::Ellipsis
                } else if self.cursor.first().is_ascii_digit() {
                    parse_number(&mut self.cursor, c)
                } else {
                    TokenKind::Dot
                }
            }
            '+' => self.with_equal(TokenKind::Plus, TokenKind::PlusEqual),
            '-' => {
                if self.cursor.eat('>') {
                    TokenKind::Arrow
                } else {
                    self.with_equal(TokenKind::Minus, TokenKind::MinusEqual)
                }
            }
            '*' => {
                if self.cursor.eat('*') {
                    self.with_equal(TokenKind::DoubleStar, TokenKind::DoubleStarEqual)
                } else {
                    self.with_equal(TokenKind::Star, TokenKind::StarEqual)
                }
            }
            '/' => {
                if self.cursor.eat('/') {
                    self.with_equal(TokenKind::DoubleSlash, TokenKind::DoubleSlashEqual)
                } else {
                    self.with_equal(TokenKind::Slash, TokenKind::SlashEqual)
                }
            }
            '%' => self.with_equal(TokenKind::Percent, TokenKind::PercentEqual),
            '<' => {
                if self.cursor.eat('<') {
                    self.with_equal(TokenKind::LeftShift, TokenKind::LeftShiftEqual)
                } else {
                    self.with_equal(TokenKind::Less, TokenKind::LessEqual)
                }
            }
            '>' => {
                if self.cursor.eat('>') {
                    self.with_equal(TokenKind::RightShift, TokenKind::RightShiftEqual)
                } else {
                    self.with_equal(TokenKind::Greater, TokenKind::GreaterEqual)
                }
            }
            '=' => self.with_equal(TokenKind::Equal, TokenKind::EqualEqual),
            '!' => {
                if self.cursor.eat('=') {
                    TokenKind::NotEqual
                } else {
                    TokenKind::Error("unexpected '!'".to_string())
                }
            }
            '&' => self.with_equal(TokenKind::Ampersand, TokenKind::AmpersandEqual),
            '|' => self.with_equal(TokenKind::Pipe, TokenKind::PipeEqual),
            '^' => self.with_equal(TokenKind::Caret, TokenKind::CaretEqual),

            // Identifiers, keywords, and prefixed strings
            _ if is_id_start(c) => self.handle_identifier_or_string(c),

            // Numbers
            _ if c.is_ascii_digit() => parse_number(&mut self.cursor, c),

            _ => TokenKind::Error(format!("unexpected character: {c:?}")),
        };

        self.make_token(kind)
    }

    /// End of input: close the last logical line, then drain DEDENTs.
    fn finish(&mut self) -> Token {
        self.at_eof = true;
        self.indent.close_all();
        if !self.last_was_newline {
            return self.make_token(TokenKind::Newline);
        }
        if self.indent.has_pending_dedents() {
            self.indent.consume_dedent();
            return self.make_token(TokenKind::Dedent);
        }
        self.make_token(TokenKind::Eof)
    }

    fn with_equal(&mut self, plain: TokenKind, with_eq: TokenKind) -> TokenKind {
        if self.cursor.eat('=') { with_eq } else { plain }
    }

    /// Handle the start of a logical line (indentation processing).
    fn handle_line_start(&mut self) -> Option<Token> {
        let mut indent = 0;
        while !self.cursor.is_eof() {
            match self.cursor.first() {
                ' ' => {
                    indent += 1;
                    self.cursor.bump();
                }
                '\t' => {
                    // Tabs align to 8-space boundaries
                    indent = (indent / 8 + 1) * 8;
                    self.cursor.bump();
                }
                '\x0c' => {
                    indent = 0;
                    self.cursor.bump();
                }
                '#' => {
                    self.skip_comment();
                }
                '\n' | '\r' => {
                    // Blank line
                    self.cursor.eat('\r');
                    self.cursor.eat('\n');
                    indent = 0;
                }
                '\\' if matches!(self.cursor.second(), '\n' | '\r') => {
                    self.cursor.bump();
                    self.cursor.eat('\r');
                    self.cursor.eat('\n');
                }
                _ => break,
            }
        }

        if self.cursor.is_eof() {
            return None;
        }

        self.token_start = self.cursor.location();
        match self.indent.process_indent(indent) {
            Ok(Some(true)) => Some(self.make_token(TokenKind::Indent)),
            Ok(Some(false)) => {
                self.indent.consume_dedent();
                Some(self.make_token(TokenKind::Dedent))
            }
            Ok(None) => None,
            Err(msg) => Some(self.make_token(TokenKind::Error(msg.to_string()))),
        }
    }

    /// Handle a newline character. `None` means it was insignificant.
    fn handle_newline(&mut self) -> Option<TokenKind> {
        if self.indent.tracking_indent() {
            self.indent.new_line();
            Some(TokenKind::Newline)
        } else {
            None
        }
    }

    /// Skip a comment (everything until end of line).
    fn skip_comment(&mut self) {
        self.cursor.eat_while(|c| c != '\n' && c != '\r');
    }

    /// Skip whitespace (but not newlines).
    fn skip_whitespace(&mut self) {
        self.cursor.eat_while(|c| c == ' ' || c == '\t' || c == '\x0c');
    }

    /// Handle an identifier, keyword, or prefixed string.
    fn handle_identifier_or_string(&mut self, first: char) -> TokenKind {
        if is_string_prefix(first) {
            let mut prefix_chars = String::new();
            prefix_chars.push(first);
            let ahead = [self.cursor.first(), self.cursor.second()];
            for (pos, c) in ahead.into_iter().enumerate() {
                if c == '"' || c == '\'' {
                    for _ in 0..pos {
                        self.cursor.bump();
                    }
                    let prefix = StringPrefix::from_chars(&prefix_chars);
                    if !prefix.is_valid() {
                        return TokenKind::Error("invalid string prefix".to_string());
                    }
                    return parse_string(&mut self.cursor, prefix);
                }
                if is_string_prefix(c) && pos == 0 {
                    prefix_chars.push(c);
                } else {
                    break;
                }
            }
        }

        parse_identifier(&mut self.cursor, first)
    }

    /// Create a token spanning from the token start to the cursor.
    fn make_token(&self, kind: TokenKind) -> Token {
        Token::new(kind, Span::new(self.token_start, self.cursor.location()))
    }

    /// Tokenize the entire source into a vector.
    #[must_use]
    pub fn tokenize(source: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(source);
        let mut tokens = Vec::new();

        loop {
            let token = lexer.next_token();
            let is_eof = token.is_eof();
            tokens.push(token);
            if is_eof {
                break;
            }
        }

        tokens
    }
}

/// Convenience function to tokenize source code.
#[must_use]
pub fn tokenize(source: &str) -> Vec<Token> {
    Lexer::tokenize(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Keyword;

    fn lex(s: &str) -> Vec<TokenKind> {
        Lexer::tokenize(s).into_iter().map(|t| t.kind).collect()
    }

    fn lex_no_layout(s: &str) -> Vec<TokenKind> {
        lex(s)
            .into_iter()
            .filter(|k| !matches!(k, TokenKind::Eof | TokenKind::Newline))
            .collect()
    }

    #[test]
    fn test_empty() {
        assert_eq!(lex(""), vec![TokenKind::Eof]);
    }

    #[test]
    fn test_single_identifier() {
        assert_eq!(
            lex("hello"),
            vec![
                TokenKind::Ident("hello".to_string()),
                TokenKind::Newline,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            lex_no_layout("+ - * / // ** % @ << >> & | ^ ~"),
            vec![
                TokenKind::Plus,
                TokenKind::Minus,
                TokenKind::Star,
                TokenKind::Slash,
                TokenKind::DoubleSlash,
                TokenKind::DoubleStar,
                TokenKind::Percent,
                TokenKind::At,
                TokenKind::LeftShift,
                TokenKind::RightShift,
                TokenKind::Ampersand,
                TokenKind::Pipe,
                TokenKind::Caret,
                TokenKind::Tilde,
            ]
        );
    }

    #[test]
    fn test_comparison() {
        assert_eq!(
            lex_no_layout("< > <= >= == !="),
            vec![
                TokenKind::Less,
                TokenKind::Greater,
                TokenKind::LessEqual,
                TokenKind::GreaterEqual,
                TokenKind::EqualEqual,
                TokenKind::NotEqual,
            ]
        );
    }

    #[test]
    fn test_augmented_assign() {
        assert_eq!(
            lex_no_layout("+= -= *= /= //= **= >>="),
            vec![
                TokenKind::PlusEqual,
                TokenKind::MinusEqual,
                TokenKind::StarEqual,
                TokenKind::SlashEqual,
                TokenKind::DoubleSlashEqual,
                TokenKind::DoubleStarEqual,
                TokenKind::RightShiftEqual,
            ]
        );
    }

    #[test]
    fn test_punctuation() {
        assert_eq!(
            lex_no_layout(", : ; . ... -> :="),
            vec![
                TokenKind::Comma,
                TokenKind::Colon,
                TokenKind::Semicolon,
                TokenKind::Dot,
                TokenKind::Ellipsis,
                TokenKind::Arrow,
                TokenKind::ColonEqual,
            ]
        );
    }

    #[test]
    fn test_prefixed_strings() {
        assert_eq!(
            lex_no_layout("b'a' rb'\\n' f'{x}' u'z'"),
            vec![
                TokenKind::Bytes(b"a".to_vec()),
                TokenKind::Bytes(b"\\n".to_vec()),
                TokenKind::FString {
                    body: "{x}".into(),
                    raw: false
                },
                TokenKind::String("z".into()),
            ]
        );
    }

    #[test]
    fn test_prefix_letters_as_identifiers() {
        assert_eq!(
            lex_no_layout("rb fr"),
            vec![TokenKind::Ident("rb".into()), TokenKind::Ident("fr".into())]
        );
    }

    #[test]
    fn test_comment_skipped() {
        let tokens = lex_no_layout("x # this is a comment\ny");
        assert_eq!(
            tokens,
            vec![TokenKind::Ident("x".into()), TokenKind::Ident("y".into())]
        );
    }

    #[test]
    fn test_keywords() {
        let tokens = lex_no_layout("if else while for def class return");
        assert!(tokens.contains(&TokenKind::Keyword(Keyword::If)));
        assert!(tokens.contains(&TokenKind::Keyword(Keyword::Def)));
        assert!(tokens.contains(&TokenKind::Keyword(Keyword::Return)));
    }

    #[test]
    fn test_newline_ignored_in_brackets() {
        let tokens = lex("(\nx\n)");
        let newline_count = tokens.iter().filter(|t| matches!(t, TokenKind::Newline)).count();
        assert_eq!(newline_count, 1);
    }

    #[test]
    fn test_indent_dedent() {
        let tokens = lex("if x:\n    y\nz");
        assert_eq!(tokens.iter().filter(|t| matches!(t, TokenKind::Indent)).count(), 1);
        assert_eq!(tokens.iter().filter(|t| matches!(t, TokenKind::Dedent)).count(), 1);
    }

    #[test]
    fn test_dedent_at_eof_follows_newline() {
        let tokens = lex("if x:\n    y");
        let n = tokens.len();
        assert_eq!(
            &tokens[n - 3..],
            &[TokenKind::Newline, TokenKind::Dedent, TokenKind::Eof]
        );
    }

    #[test]
    fn test_multiple_indent_levels() {
        let tokens = lex("if x:\n    if y:\n        z\n    w\nv");
        assert_eq!(tokens.iter().filter(|t| matches!(t, TokenKind::Indent)).count(), 2);
        assert_eq!(tokens.iter().filter(|t| matches!(t, TokenKind::Dedent)).count(), 2);
    }

    #[test]
    fn test_blank_and_comment_lines() {
        let tokens = lex("x\n\n   # c\n\ny\n");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Ident("x".into()),
                TokenKind::Newline,
                TokenKind::Ident("y".into()),
                TokenKind::Newline,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_line_continuation() {
        let tokens = lex_no_layout("x + \\\ny");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Ident("x".into()),
                TokenKind::Plus,
                TokenKind::Ident("y".into())
            ]
        );
    }

    #[test]
    fn test_spans_have_lines() {
        let tokens = Lexer::tokenize("a\n  \nbc");
        let bc = tokens
            .iter()
            .find(|t| t.kind == TokenKind::Ident("bc".into()))
            .unwrap();
        assert_eq!(bc.span.start, Pos::new(3, 0));
        assert_eq!(bc.span.end, Pos::new(3, 2));
    }
}
