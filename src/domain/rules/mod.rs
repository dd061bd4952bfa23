//! Behavioral rule catalog and per-turn rule selection.
//!
//! Rules come in three enforcement tiers:
//! - mandatory: always checked, violations must be fixed or blocked
//! - advisory: best-effort, filtered by an optional applicability condition
//! - conditional: gated on scenario state, may require text elements or
//!   unlock restricted content for the current phase

mod catalog;
mod selector;
mod types;

pub use catalog::{CatalogError, PersonaCore, RuleCatalog};
pub use selector::{RuleSelector, SelectedRuleSet};
pub use types::{
    AdvisoryRule, ConditionalRule, LocalFinding, MandatoryRule, Rule, RuleAction, RuleCheck,
};
