//! Literal and structural rewrite passes.
//!
//! Each pass is independent; they compose in pipeline order, every pass
//! seeing the output of the ones before it.
//!
//! - **numeric**: integer literals as bit expressions or decoded byte codes
//! - **floats**: numbers as magnitudes of complex values
//! - **strings**: string and bytes literals as base64/zlib, char arrays or
//!   XOR-table lookups
//! - **string_collector**: every string moved into one shared list
//! - **logic**: branch tests wrapped in opaque predicates
//! - **attrib_set**: attribute stores as `setattr` calls
//! - **type_hints**: annotations removed
//! - **type_alias**: builtin types reached through chains of alias classes
//! - **fstrings**: f-strings lowered to `str.format`
//! - **unicode_names**: identifiers respelled with mathematical letters

pub mod attrib_set;
pub mod floats;
pub mod fstrings;
pub mod logic;
pub mod numeric;
pub mod string_collector;
pub mod strings;
pub mod type_alias;
pub mod type_hints;
pub mod unicode_names;

pub use attrib_set::AttribSet;
pub use floats::Floats;
pub use fstrings::Fstrings;
pub use logic::Logic;
pub use numeric::Numeric;
pub use string_collector::StringCollector;
pub use strings::Strings;
pub use type_alias::TypeAlias;
pub use type_hints::TypeHints;
pub use unicode_names::UnicodeNames;
