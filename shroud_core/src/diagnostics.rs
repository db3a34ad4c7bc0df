//! Non-fatal diagnostics.
//!
//! Warnings never stop a run. Each one is logged through `tracing` as it is
//! raised and kept so callers can inspect what happened afterwards.

use crate::span::Span;
use std::fmt;

/// A recoverable problem tied to a source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    /// Source identifier of the affected tree, or a pass name for
    /// environment-level warnings.
    pub file: String,
    /// Line of the affected node (0 when not tied to a node).
    pub line: u32,
    /// Column of the affected node.
    pub col: u32,
    /// What happened.
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "warn({}:{}.{}): {}",
            self.file, self.line, self.col, self.message
        )
    }
}

/// Collector for warnings raised during a run.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    /// Create an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning about a node.
    pub fn warn(&mut self, file: &str, span: Span, message: impl Into<String>) {
        let warning = Warning {
            file: file.to_string(),
            line: span.line(),
            col: span.col(),
            message: message.into(),
        };
        tracing::warn!(
            file = %warning.file,
            line = warning.line,
            col = warning.col,
            "{}",
            warning.message
        );
        self.warnings.push(warning);
    }

    /// Record a warning that is not tied to any node.
    pub fn warn_simple(&mut self, source: &str, message: impl Into<String>) {
        self.warn(source, Span::dummy(), message);
    }

    /// All warnings so far, in the order they were raised.
    #[must_use]
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Whether any warning was raised.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Take all warnings, leaving the collector empty.
    pub fn drain(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_carries_location() {
        let mut diags = Diagnostics::new();
        diags.warn("/a.py", Span::point(3, 9), "too big");
        let w = &diags.warnings()[0];
        assert_eq!((w.line, w.col), (3, 9));
        assert_eq!(w.to_string(), "warn(/a.py:3.9): too big");
    }

    #[test]
    fn test_drain_empties() {
        let mut diags = Diagnostics::new();
        diags.warn_simple("code_units", "skipped");
        assert!(!diags.is_empty());
        assert_eq!(diags.drain().len(), 1);
        assert!(diags.is_empty());
    }
}
