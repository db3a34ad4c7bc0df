//! Tree-walking evaluator for the Python subset shroud reads and writes.
//!
//! Rewrites must not change what a program does. This crate runs source
//! before and after a pass so tests can compare the results: globals,
//! printed output and raised exceptions.
//!
//! # Architecture
//!
//! ```text
//! source → parse → Interpreter (Scope chain) → Value / InterpError
//!                        │
//!                        └── builtins (functions, type methods, modules)
//! ```
//!
//! Values are plain data. Lists, dicts and sets are copied on assignment;
//! a mutating method call stores the changed receiver back into the
//! expression it was read from. Objects, classes and iterators are shared.
//!
//! # Example
//!
//! ```
//! use shroud_interp::{Interpreter, Value};
//!
//! let interp = Interpreter::run_source("v = sum(x * x for x in range(4))\n").unwrap();
//! assert_eq!(interp.global("v"), Some(&Value::Int(14)));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]

pub mod builtins;
pub mod error;
pub mod eval;
pub mod format;
pub mod ops;
pub mod scope;
pub mod value;

pub use error::{InterpError, InterpResult};
pub use eval::{Flow, Interpreter};
pub use value::Value;

/// Evaluate a single expression in a fresh interpreter.
pub fn eval_source(source: &str) -> InterpResult<Value> {
    Interpreter::new().eval_source(source)
}
