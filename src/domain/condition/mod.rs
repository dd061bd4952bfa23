//! Closed predicate language over the per-turn dialogue context.
//!
//! Trigger and applicability conditions are authored as small
//! MongoDB-style JSON documents (`{"turn_count_in_phase": {"$gte": 3}}`).
//! They are parsed ONCE at catalog load into a fixed AST of comparison
//! clauses over a closed field set, and evaluated by walking that tree.
//! No general-purpose expression evaluation ever touches authored strings.
//!
//! Evaluation is fail-closed: a type mismatch or unknown variable is an
//! error that reads as "condition not satisfied", never a crash.

mod ast;
mod eval;
mod parse;

pub use ast::{Clause, Comparison, Condition, Field, Scalar};
pub use eval::{ConditionError, EvalContext};
pub use parse::ConditionParseError;
