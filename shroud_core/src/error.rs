//! Error types and result definitions for shroud.
//!
//! Errors are grouped by the phase that raises them:
//! - Lexical and syntax errors (reading the input program)
//! - Option errors (raised before any tree is touched)
//! - Input-shape errors (a pass met a construct it cannot rewrite)
//! - Compile and serialize errors (producing code units or final text)

use crate::span::Span;
use thiserror::Error;

/// The unified result type used throughout shroud.
pub type ShroudResult<T> = Result<T, ShroudError>;

/// Every fatal condition the obfuscator can report.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShroudError {
    /// Lexical analysis error.
    #[error("SyntaxError at {span}: {message}")]
    LexError {
        /// Error description.
        message: String,
        /// Source location.
        span: Span,
    },

    /// Syntax/parsing error.
    #[error("SyntaxError at {span}: {message}")]
    SyntaxError {
        /// Error description.
        message: String,
        /// Source location.
        span: Span,
    },

    /// A `{pass}.{option}` key that no registered pass declares.
    #[error("unknown option '{key}'")]
    UnknownOption {
        /// The offending key.
        key: String,
    },

    /// A known option with a value outside its domain.
    #[error("invalid value for option '{key}': {message}")]
    InvalidOption {
        /// The offending key.
        key: String,
        /// What was wrong with the value.
        message: String,
    },

    /// A pass met an input shape it refuses to rewrite.
    #[error("{file}:{span}: {message}")]
    InvalidInput {
        /// Source identifier of the tree.
        file: String,
        /// Location of the offending node.
        span: Span,
        /// Error description.
        message: String,
    },

    /// Compilation to a code unit failed.
    #[error("CompileError: {message}")]
    CompileError {
        /// Error description.
        message: String,
        /// Source location, when known.
        span: Option<Span>,
    },

    /// The serializer rejected a tree.
    #[error("cannot serialize {file}: {message}")]
    SerializeError {
        /// Source identifier of the tree.
        file: String,
        /// Error description.
        message: String,
    },

    /// File-system failure while reading inputs or writing outputs.
    #[error("{path}: {message}")]
    Io {
        /// The path involved.
        path: String,
        /// The underlying error text.
        message: String,
    },

    /// No pass was enabled; nothing was written.
    #[error("nothing to do: no passes are enabled")]
    NothingToDo,

    /// Internal invariant violation (should never occur).
    #[error("InternalError: {message}")]
    InternalError {
        /// Error description.
        message: String,
    },
}

impl ShroudError {
    /// Create a lex error with location.
    #[must_use]
    pub fn lex(message: impl Into<String>, span: Span) -> Self {
        Self::LexError {
            message: message.into(),
            span,
        }
    }

    /// Create a syntax error with location.
    #[must_use]
    pub fn syntax(message: impl Into<String>, span: Span) -> Self {
        Self::SyntaxError {
            message: message.into(),
            span,
        }
    }

    /// Create an unknown-option error.
    #[must_use]
    pub fn unknown_option(key: impl Into<String>) -> Self {
        Self::UnknownOption { key: key.into() }
    }

    /// Create an invalid-option error.
    #[must_use]
    pub fn invalid_option(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOption {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create an invalid-input error pointing into a source file.
    #[must_use]
    pub fn invalid_input(file: impl Into<String>, span: Span, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            file: file.into(),
            span,
            message: message.into(),
        }
    }

    /// Create a compile error.
    #[must_use]
    pub fn compile(message: impl Into<String>, span: Option<Span>) -> Self {
        Self::CompileError {
            message: message.into(),
            span,
        }
    }

    /// Create a serialization error.
    #[must_use]
    pub fn serialize(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SerializeError {
            file: file.into(),
            message: message.into(),
        }
    }

    /// Create an I/O error from a path and the underlying error.
    #[must_use]
    pub fn io(path: impl Into<String>, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// The source location attached to this error, if any.
    #[must_use]
    pub fn span(&self) -> Option<Span> {
        match self {
            Self::LexError { span, .. }
            | Self::SyntaxError { span, .. }
            | Self::InvalidInput { span, .. } => Some(*span),
            Self::CompileError { span, .. } => *span,
            _ => None,
        }
    }

    /// Whether this error was raised before any tree was mutated.
    #[must_use]
    pub const fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownOption { .. } | Self::InvalidOption { .. } | Self::NothingToDo
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_error_display() {
        let err = ShroudError::syntax("unexpected token", Span::point(3, 7));
        assert_eq!(err.to_string(), "SyntaxError at 3.7: unexpected token");
    }

    #[test]
    fn test_invalid_input_display_has_location() {
        let err = ShroudError::invalid_input("/src/a.py", Span::point(4, 2), "bad spec");
        assert_eq!(err.to_string(), "/src/a.py:4.2: bad spec");
        assert_eq!(err.span(), Some(Span::point(4, 2)));
    }

    #[test]
    fn test_option_errors_are_configuration_errors() {
        assert!(ShroudError::unknown_option("x.y").is_configuration_error());
        assert!(ShroudError::invalid_option("x.y", "bad").is_configuration_error());
        assert!(ShroudError::NothingToDo.is_configuration_error());
        assert!(!ShroudError::internal("oops").is_configuration_error());
    }

    #[test]
    fn test_io_error_keeps_path() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = ShroudError::io("out/a.py", &io);
        assert_eq!(err.to_string(), "out/a.py: missing");
        assert_eq!(err.span(), None);
    }
}
