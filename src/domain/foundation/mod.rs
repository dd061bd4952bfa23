//! Foundation module - Shared domain primitives.
//!
//! Contains the value objects, error types, and traits that form the
//! vocabulary of the Persona Director domain.

mod errors;
mod ids;
mod state_machine;
mod timestamp;

pub use errors::ValidationError;
pub use ids::UserId;
pub use state_machine::StateMachine;
pub use timestamp::utc_now;
