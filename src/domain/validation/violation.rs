//! Violation records and the per-candidate validation outcome.

use serde::{Deserialize, Serialize};

use crate::domain::rules::RuleAction;

/// How serious a violation is. `Critical` aborts the turn; everything
/// else feeds the repair loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// One rule violation found in a candidate reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub rule_id: String,
    pub detail: String,
    pub severity: Severity,
    pub action: RuleAction,
    pub fix_instruction: String,
    /// The offending span, for pattern violations.
    pub matched: Option<String>,
}

/// The full validation result for one candidate reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationOutcome {
    pub violations: Vec<Violation>,
}

impl ValidationOutcome {
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    /// True if any violation carries a `block` action.
    pub fn has_critical(&self) -> bool {
        self.violations
            .iter()
            .any(|v| v.severity == Severity::Critical)
    }

    /// True if a critical or high violation exists. Medium and low
    /// violations are advisory and never force a repair on their own.
    pub fn needs_fix(&self) -> bool {
        self.violations
            .iter()
            .any(|v| v.severity >= Severity::High)
    }

    /// Fix instructions for the retry prompt, most severe first,
    /// deduplicated, empty instructions dropped.
    pub fn fix_instructions(&self) -> Vec<&str> {
        let mut ordered: Vec<&Violation> = self.violations.iter().collect();
        ordered.sort_by(|a, b| b.severity.cmp(&a.severity));
        let mut seen = Vec::new();
        for violation in ordered {
            let instruction = violation.fix_instruction.as_str();
            if !instruction.is_empty() && !seen.contains(&instruction) {
                seen.push(instruction);
            }
        }
        seen
    }
}
