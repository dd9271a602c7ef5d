//! `calc`: the bundled execution engine for Knitwork.
//!
//! A line-oriented calculator over numeric, character, and logical vectors.
//! Variables persist across chunks of a run; evaluated code reaches the
//! pipeline through builtins such as `knit_child`, `knit_exit`, and
//! `opts_chunk`.
//!
//! ```text
//! x <- c(1, 2, 3)
//! mean(x)          # [1] 2
//! plot(x, main = "rising")
//! ```

mod builtins;
mod engine;
mod syntax;
mod value;

#[cfg(test)]
mod testing;

pub use engine::CalcEngine;
pub use syntax::{Arg, BinOp, Expr, Statement, statements};
pub use value::{Value, format_num};
