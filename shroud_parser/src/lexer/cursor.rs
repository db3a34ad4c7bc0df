//! Character cursor with line/column tracking.

use shroud_core::Pos;
use std::str::Chars;

/// Peekable character cursor over source text.
#[derive(Debug, Clone)]
pub struct Cursor<'src> {
    source: &'src str,
    chars: Chars<'src>,
    pos: usize,
    line: u32,
    col: u32,
}

impl<'src> Cursor<'src> {
    /// Create a cursor at the start of `source`.
    #[must_use]
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            chars: source.chars(),
            pos: 0,
            line: 1,
            col: 0,
        }
    }

    /// The full source text.
    #[must_use]
    pub fn source(&self) -> &'src str {
        self.source
    }

    /// Current byte offset.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Current line/column.
    #[must_use]
    pub fn location(&self) -> Pos {
        Pos::new(self.line, self.col)
    }

    /// Peek at the next character without consuming it (`'\0'` at EOF).
    #[must_use]
    pub fn first(&self) -> char {
        self.chars.clone().next().unwrap_or('\0')
    }

    /// Peek two characters ahead.
    #[must_use]
    pub fn second(&self) -> char {
        let mut it = self.chars.clone();
        it.next();
        it.next().unwrap_or('\0')
    }

    /// Peek three characters ahead.
    #[must_use]
    pub fn third(&self) -> char {
        let mut it = self.chars.clone();
        it.next();
        it.next();
        it.next().unwrap_or('\0')
    }

    /// Whether the cursor is exhausted.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.chars.as_str().is_empty()
    }

    /// Remaining, unconsumed text.
    #[must_use]
    pub fn rest(&self) -> &'src str {
        self.chars.as_str()
    }

    /// Consume one character.
    pub fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.col = 0;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    /// Consume `c` if it is next.
    pub fn eat(&mut self, c: char) -> bool {
        if self.first() == c && !self.is_eof() {
            self.bump();
            true
        } else {
            false
        }
    }

    /// Consume characters while `pred` holds.
    pub fn eat_while(&mut self, mut pred: impl FnMut(char) -> bool) {
        while !self.is_eof() && pred(self.first()) {
            self.bump();
        }
    }

    /// Slice of the source between two byte offsets.
    #[must_use]
    pub fn slice(&self, start: usize, end: usize) -> &'src str {
        &self.source[start..end]
    }
}
