//! Candidate reply validation against the selected rule set.

mod validator;
mod violation;

pub use validator::{OutputValidator, PredicateFn, PredicateInput};
pub use violation::{Severity, ValidationOutcome, Violation};
