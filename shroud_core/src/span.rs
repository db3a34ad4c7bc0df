//! Source span tracking for diagnostics.
//!
//! Spans carry line/column positions instead of byte offsets: every pass
//! reports warnings as `(file, line, column)` and synthesized nodes inherit
//! the position of the node they replace.

use std::fmt;

/// A position in source text. Lines are 1-based, columns are 0-based
/// character offsets within the line.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Pos {
    /// Line number (1-based, 0 means "unknown").
    pub line: u32,
    /// Column (0-based).
    pub col: u32,
}

impl Pos {
    /// Create a new position.
    #[inline]
    #[must_use]
    pub const fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

impl fmt::Debug for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// A range of source text, `[start, end)`.
///
/// A span whose start line is `0` is *missing*: the node was synthesized by
/// a pass and has not yet been given a location. The pipeline repairs these
/// after every pass.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    /// Start position (inclusive).
    pub start: Pos,
    /// End position (exclusive).
    pub end: Pos,
}

impl Span {
    /// Create a new span from start to end.
    #[inline]
    #[must_use]
    pub const fn new(start: Pos, end: Pos) -> Self {
        Self { start, end }
    }

    /// Create an empty span at a single position.
    #[inline]
    #[must_use]
    pub const fn point(line: u32, col: u32) -> Self {
        Self {
            start: Pos::new(line, col),
            end: Pos::new(line, col),
        }
    }

    /// The missing-location sentinel used for generated code.
    #[inline]
    #[must_use]
    pub const fn dummy() -> Self {
        Self {
            start: Pos::new(0, 0),
            end: Pos::new(0, 0),
        }
    }

    /// Check if this span is the missing-location sentinel.
    #[inline]
    #[must_use]
    pub const fn is_dummy(&self) -> bool {
        self.start.line == 0
    }

    /// Start line (1-based).
    #[inline]
    #[must_use]
    pub const fn line(&self) -> u32 {
        self.start.line
    }

    /// Start column (0-based).
    #[inline]
    #[must_use]
    pub const fn col(&self) -> u32 {
        self.start.col
    }

    /// Merge two spans into one covering both.
    #[must_use]
    pub fn merge(self, other: Span) -> Span {
        if self.is_dummy() {
            return other;
        }
        if other.is_dummy() {
            return self;
        }
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Return `self` unless it is missing, in which case `fallback`.
    #[inline]
    #[must_use]
    pub const fn or(self, fallback: Span) -> Span {
        if self.is_dummy() { fallback } else { self }
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}..{:?}", self.start, self.end)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.start.line, self.start.col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dummy_is_missing() {
        assert!(Span::dummy().is_dummy());
        assert!(!Span::point(1, 0).is_dummy());
    }

    #[test]
    fn test_merge_skips_dummy() {
        let a = Span::point(3, 4);
        assert_eq!(a.merge(Span::dummy()), a);
        assert_eq!(Span::dummy().merge(a), a);
    }

    #[test]
    fn test_merge_covers_both() {
        let a = Span::new(Pos::new(1, 2), Pos::new(1, 5));
        let b = Span::new(Pos::new(2, 0), Pos::new(2, 9));
        let m = a.merge(b);
        assert_eq!(m.start, Pos::new(1, 2));
        assert_eq!(m.end, Pos::new(2, 9));
    }

    #[test]
    fn test_or_fallback() {
        let parent = Span::point(7, 1);
        assert_eq!(Span::dummy().or(parent), parent);
        assert_eq!(Span::point(2, 2).or(parent), Span::point(2, 2));
    }

    #[test]
    fn test_display() {
        assert_eq!(Span::point(12, 4).to_string(), "12.4");
    }
}
