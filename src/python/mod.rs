//! Static structure checks for generated Python.
//!
//! Generated code is never executed to discover what it defines. It is
//! scanned as text: logical lines, bracket and string balance, block
//! indentation, then the shape of the top level.

pub mod callable;
pub mod lexer;

pub use callable::{parse_callable, CallableDef, Decorator, FlowDecorator};
pub use lexer::{check_indentation, logical_lines, normalize_newlines, LogicalLine};
