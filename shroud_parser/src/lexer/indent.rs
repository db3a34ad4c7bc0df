//! Indentation tracking for INDENT/DEDENT generation.

/// Stack of active indentation levels plus bracket nesting.
#[derive(Debug)]
pub struct IndentStack {
    levels: Vec<usize>,
    pending_dedents: usize,
    bracket_depth: usize,
    at_line_start: bool,
}

impl IndentStack {
    /// A stack at column zero, positioned at the start of a line.
    #[must_use]
    pub fn new() -> Self {
        Self {
            levels: vec![0],
            pending_dedents: 0,
            bracket_depth: 0,
            at_line_start: true,
        }
    }

    /// Whether DEDENT tokens are waiting to be emitted.
    #[must_use]
    pub fn has_pending_dedents(&self) -> bool {
        self.pending_dedents > 0
    }

    /// Consume one pending DEDENT.
    pub fn consume_dedent(&mut self) {
        self.pending_dedents = self.pending_dedents.saturating_sub(1);
    }

    /// Whether the lexer is at the start of a logical line.
    #[must_use]
    pub fn at_line_start(&self) -> bool {
        self.at_line_start
    }

    /// Indentation is only significant outside brackets.
    #[must_use]
    pub fn tracking_indent(&self) -> bool {
        self.bracket_depth == 0
    }

    /// Mark that content has been seen on the current line.
    pub fn consumed_content(&mut self) {
        self.at_line_start = false;
    }

    /// Mark the start of a new logical line.
    pub fn new_line(&mut self) {
        self.at_line_start = true;
    }

    /// Enter a bracket.
    pub fn open_bracket(&mut self) {
        self.bracket_depth += 1;
    }

    /// Leave a bracket.
    pub fn close_bracket(&mut self) {
        self.bracket_depth = self.bracket_depth.saturating_sub(1);
    }

    /// Process the indentation of a new line.
    ///
    /// Returns `Some(true)` for an indent, `Some(false)` when dedents were
    /// queued and `None` when the level is unchanged.
    pub fn process_indent(&mut self, indent: usize) -> Result<Option<bool>, &'static str> {
        let current = self.levels.last().copied().unwrap_or(0);
        if indent > current {
            self.levels.push(indent);
            return Ok(Some(true));
        }
        if indent == current {
            return Ok(None);
        }
        while let Some(&top) = self.levels.last() {
            if top <= indent {
                break;
            }
            self.levels.pop();
            self.pending_dedents += 1;
        }
        if self.levels.last().copied().unwrap_or(0) != indent {
            return Err("unindent does not match any outer indentation level");
        }
        Ok(Some(false))
    }

    /// Queue dedents for every open level (end of input).
    pub fn close_all(&mut self) -> usize {
        let open = self.levels.len().saturating_sub(1);
        self.levels.truncate(1);
        self.pending_dedents += open;
        open
    }
}

impl Default for IndentStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indent_then_dedent() {
        let mut s = IndentStack::new();
        assert_eq!(s.process_indent(4), Ok(Some(true)));
        assert_eq!(s.process_indent(4), Ok(None));
        assert_eq!(s.process_indent(0), Ok(Some(false)));
        assert!(s.has_pending_dedents());
    }

    #[test]
    fn test_inconsistent_dedent() {
        let mut s = IndentStack::new();
        s.process_indent(4).unwrap();
        assert!(s.process_indent(2).is_err());
    }

    #[test]
    fn test_close_all() {
        let mut s = IndentStack::new();
        s.process_indent(4).unwrap();
        s.process_indent(8).unwrap();
        assert_eq!(s.close_all(), 2);
    }
}
