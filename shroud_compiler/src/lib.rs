//! Code-unit compiler for shroud.
//!
//! Turns a parsed module into CPython 3.11 code units that the obfuscated
//! output rebuilds at run time through the code constructor.
//!
//! # Architecture
//!
//! ```text
//! AST → Scope Analysis → Instruction Sequence → Assembly → CodeUnit → marshal
//! ```
//!
//! # Key Types
//!
//! - [`CodeUnit`] - the eighteen constructor arguments of one code object
//! - [`Encoder`] - raw instruction, pool and exception-table writer
//! - [`Compiler`] - AST to code-unit compiler
//! - [`SymbolTable`] - per-scope name resolution
//!
//! # Example
//!
//! ```
//! use shroud_compiler::{Opcode, compile_module};
//! use shroud_parser::parse;
//!
//! let module = parse("x = 1\n").unwrap();
//! let code = compile_module(&module, "demo.py").unwrap();
//! assert_eq!(code.code[0], Opcode::Resume.as_u8());
//! ```

#![warn(missing_docs)]

pub mod assemble;
pub mod bytecode;
pub mod compiler;
pub mod marshal;
pub mod repr;
pub mod symtable;

pub use assemble::{Handler, Instr, InstrArg, InstrSeq, Label, assemble};
pub use bytecode::{
    BinaryOpArg, CodeFlags, CodeHeader, CodeUnit, CompareOpArg, Constant, Encoder, ExceptionEntry,
    Opcode, decode_table, make_function,
};
pub use compiler::Compiler;
pub use repr::py_repr;
pub use symtable::{Binding, Scope, ScopeKind, SymbolTable};

use shroud_core::ShroudResult;
use shroud_parser::ast::Module;

/// Compile `module` into its top-level code unit.
pub fn compile_module(module: &Module, filename: &str) -> ShroudResult<CodeUnit> {
    Compiler::compile_module(module, filename)
}
