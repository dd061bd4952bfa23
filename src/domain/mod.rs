//! Domain layer containing the policy and transition logic.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (value objects, errors, traits)
//! - `affect` - Continuous PAD affect model
//! - `scenario` - Scenario position and per-user conversation state
//! - `condition` - Closed predicate language over turn context
//! - `rules` - Rule catalog and per-turn rule selection
//! - `transition` - Scenario script and phase transition engine
//! - `validation` - Candidate output validation against selected rules
//! - `repair` - Deterministic and service-backed output repair

pub mod affect;
pub mod condition;
pub mod foundation;
pub mod repair;
pub mod rules;
pub mod scenario;
pub mod transition;
pub mod validation;
