//! Infix arithmetic expression parsing.
//!
//! Turns a string such as `"2+3*(4-1)"` into a topologically-ordered list of
//! [`Operation`] rows whose operands are either numeric literals or
//! references (`ref:<uuid>`) to an earlier operation's result.

mod parser;
mod tokenizer;

pub use parser::{ParseError, parse, set_calculation_id, validate};

/// Hard ceiling on the number of operations a single expression may expand
/// into. Enforced by the use-case after parsing, not by the parser itself.
pub const MAX_OPERATIONS: usize = 500;
