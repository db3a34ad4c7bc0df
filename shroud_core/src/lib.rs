//! # Shroud Core
//!
//! Types shared by every shroud crate:
//!
//! - **Spans**: line/column locations with a missing-location sentinel
//! - **Errors**: the fatal error hierarchy and result alias
//! - **Options**: the flat `{pass}.{option}` registry with validation
//! - **Diagnostics**: located, non-fatal warnings
//! - **Rng**: the seedable random source passes draw from

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod diagnostics;
pub mod error;
pub mod options;
pub mod rng;
pub mod span;

pub use diagnostics::{Diagnostics, Warning};
pub use error::{ShroudError, ShroudResult};
pub use options::{Config, OptionDomain, OptionSpec, OptionValue, PassOptions};
pub use rng::Rng;
pub use span::{Pos, Span};

/// Shroud version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bytecode format version emitted by the code-unit compiler.
pub const TARGET_PYTHON_VERSION: (u8, u8) = (3, 11);
