pub mod ast;
pub mod eval;
pub mod pattern;

pub use ast::{ArithmeticOp, Assignments, CompareOp, Expr, bound, col, lit, param};
pub use eval::RowEvaluator;
