//! Evaluation errors.
//!
//! Each variant corresponds to the Python exception a real interpreter
//! would raise; [`InterpError::kind_name`] gives that name so `except`
//! clauses can match on it.

use shroud_core::ShroudError;
use thiserror::Error;

/// Result of evaluating a program or expression.
pub type InterpResult<T> = Result<T, InterpError>;

/// A failed evaluation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterpError {
    /// The source did not parse.
    #[error(transparent)]
    Parse(#[from] ShroudError),

    /// Operation applied to values of the wrong type.
    #[error("TypeError: {message}")]
    TypeError {
        /// Error description.
        message: String,
    },

    /// Name not bound in any enclosing scope.
    #[error("NameError: name '{name}' is not defined")]
    NameError {
        /// The missing name.
        name: String,
    },

    /// Attribute not present.
    #[error("AttributeError: '{type_name}' object has no attribute '{attr}'")]
    AttributeError {
        /// Type of the receiver.
        type_name: String,
        /// Requested attribute.
        attr: String,
    },

    /// Sequence index out of range.
    #[error("IndexError: {type_name} index out of range")]
    IndexError {
        /// Type of the sequence.
        type_name: String,
    },

    /// Missing dictionary key.
    #[error("KeyError: {key}")]
    KeyError {
        /// `repr` of the key.
        key: String,
    },

    /// Right type, unusable value.
    #[error("ValueError: {message}")]
    ValueError {
        /// Error description.
        message: String,
    },

    /// Division or modulo by zero.
    #[error("ZeroDivisionError: division by zero")]
    ZeroDivision,

    /// Integer result outside the evaluator's range.
    #[error("OverflowError: {message}")]
    Overflow {
        /// Error description.
        message: String,
    },

    /// `assert` failed.
    #[error("AssertionError: {message}")]
    Assertion {
        /// The assertion message, if any.
        message: String,
    },

    /// An explicit `raise`.
    #[error("{kind}: {message}")]
    Raised {
        /// Exception class name.
        kind: String,
        /// Exception message.
        message: String,
        /// Ancestor class names, nearest first.
        bases: Vec<String>,
    },

    /// A construct the evaluator does not model.
    #[error("unsupported: {feature}")]
    Unsupported {
        /// What was attempted.
        feature: String,
    },
}

impl InterpError {
    /// Build a type error.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::TypeError {
            message: message.into(),
        }
    }

    /// Build a value error.
    pub fn value_error(message: impl Into<String>) -> Self {
        Self::ValueError {
            message: message.into(),
        }
    }

    /// Build an unsupported-construct error.
    pub fn unsupported(feature: impl Into<String>) -> Self {
        Self::Unsupported {
            feature: feature.into(),
        }
    }

    /// Build an attribute error.
    pub fn attribute(type_name: &str, attr: &str) -> Self {
        Self::AttributeError {
            type_name: type_name.to_string(),
            attr: attr.to_string(),
        }
    }

    /// Python exception class this error stands for.
    #[must_use]
    pub fn kind_name(&self) -> &str {
        match self {
            Self::Parse(_) => "SyntaxError",
            Self::TypeError { .. } => "TypeError",
            Self::NameError { .. } => "NameError",
            Self::AttributeError { .. } => "AttributeError",
            Self::IndexError { .. } => "IndexError",
            Self::KeyError { .. } => "KeyError",
            Self::ValueError { .. } => "ValueError",
            Self::ZeroDivision => "ZeroDivisionError",
            Self::Overflow { .. } => "OverflowError",
            Self::Assertion { .. } => "AssertionError",
            Self::Raised { kind, .. } => kind,
            Self::Unsupported { .. } => "NotImplementedError",
        }
    }

    /// Whether an `except <name>` clause catches this error.
    #[must_use]
    pub fn caught_by(&self, name: &str) -> bool {
        if matches!(self, Self::Parse(_) | Self::Unsupported { .. }) {
            return false;
        }
        match name {
            "Exception" | "BaseException" => true,
            "ArithmeticError" => matches!(self, Self::ZeroDivision | Self::Overflow { .. }),
            "LookupError" => matches!(self, Self::IndexError { .. } | Self::KeyError { .. }),
            other => {
                self.kind_name() == other
                    || matches!(self, Self::Raised { bases, .. } if bases.iter().any(|b| b == other))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_hierarchy() {
        assert!(InterpError::ZeroDivision.caught_by("ArithmeticError"));
        assert!(InterpError::ZeroDivision.caught_by("Exception"));
        assert!(!InterpError::ZeroDivision.caught_by("ValueError"));
        let raised = InterpError::Raised {
            kind: "MyError".into(),
            message: String::new(),
            bases: vec!["ValueError".into(), "Exception".into()],
        };
        assert!(raised.caught_by("MyError"));
        assert!(raised.caught_by("ValueError"));
        assert!(!raised.caught_by("KeyError"));
        assert!(!InterpError::unsupported("yield").caught_by("Exception"));
    }
}
