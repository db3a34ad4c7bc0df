//! Python source front end for shroud.
//!
//! Turns Python 3.11 source into an [`ast::Module`] and back:
//!
//! ```text
//! source → Lexer → Tokens → Parser → AST → (passes) → unparse → source
//! ```
//!
//! # Example
//!
//! ```
//! use shroud_parser::{parse, unparse};
//!
//! let module = parse("x = (1 + 2) * y\n").unwrap();
//! assert_eq!(unparse(&module), "x = (1 + 2) * y\n");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;
pub mod unparse;
pub mod visit;

pub use ast::{Expr, ExprContext, ExprKind, Module, Stmt, StmtKind};
pub use lexer::{Lexer, tokenize};
pub use parser::{parse, parse_expression};
pub use token::{Keyword, Token, TokenKind};
pub use unparse::{unparse, unparse_expr, unparse_stmt};
pub use visit::{Transformer, Visitor, fix_missing_locations};
