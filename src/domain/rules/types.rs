//! Rule variants and their check machinery.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::condition::Condition;

/// What to do with the candidate text when a rule is violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    /// Ask the generation service to rewrite the reply.
    Rewrite,
    /// Strip the offending span deterministically.
    Remove,
    /// Cut the reply down to length.
    Trim,
    /// Never serve the reply; the turn fails.
    Block,
}

/// How a rule is checked against candidate text.
///
/// Pattern and length checks are local and deterministic. `Predicate`
/// names a registered deterministic function evaluated against the text
/// and recent history. `Semantic` defers to the classification service.
#[derive(Debug, Clone)]
pub enum RuleCheck {
    ForbiddenPattern(Regex),
    RequiredPattern(Regex),
    MaxLength(usize),
    MinLength(usize),
    Predicate { name: String, params: Value },
    Semantic,
    /// No check at all; the rule only contributes prompt context.
    None,
}

/// A local check result: human-readable detail plus the matched span for
/// pattern checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFinding {
    pub detail: String,
    pub matched: Option<String>,
}

impl RuleCheck {
    /// Runs the deterministic part of the check against the candidate
    /// text. Predicate and semantic checks are handled by the validator
    /// and return nothing here.
    pub fn local_violation(&self, text: &str) -> Option<LocalFinding> {
        match self {
            RuleCheck::ForbiddenPattern(pattern) => pattern.find(text).map(|m| LocalFinding {
                detail: format!("forbidden pattern matched: '{}'", m.as_str()),
                matched: Some(m.as_str().to_string()),
            }),
            RuleCheck::RequiredPattern(pattern) => {
                if pattern.is_match(text) {
                    None
                } else {
                    Some(LocalFinding {
                        detail: format!("required pattern not found: {}", pattern.as_str()),
                        matched: None,
                    })
                }
            }
            RuleCheck::MaxLength(max) => {
                let len = text.chars().count();
                (len > *max).then(|| LocalFinding {
                    detail: format!("too long: {} > {} chars", len, max),
                    matched: None,
                })
            }
            RuleCheck::MinLength(min) => {
                let len = text.chars().count();
                (len < *min).then(|| LocalFinding {
                    detail: format!("too short: {} < {} chars", len, min),
                    matched: None,
                })
            }
            RuleCheck::Predicate { .. } | RuleCheck::Semantic | RuleCheck::None => None,
        }
    }
}

/// A rule that is always in force. Violations must be repaired, and a
/// `block` action makes the violation critical.
#[derive(Debug, Clone)]
pub struct MandatoryRule {
    pub id: String,
    pub description: String,
    pub check: RuleCheck,
    pub action: RuleAction,
    pub fix_instruction: String,
}

/// A best-effort rule, included only when its applicability condition
/// holds (no condition means always applicable).
#[derive(Debug, Clone)]
pub struct AdvisoryRule {
    pub id: String,
    pub description: String,
    pub check: RuleCheck,
    pub action: RuleAction,
    pub fix_instruction: String,
    pub condition: Option<Condition>,
    pub prompt_hint: Option<String>,
}

impl AdvisoryRule {
    /// True if this rule needs the classification service to judge,
    /// rather than a local check.
    pub fn is_semantic(&self) -> bool {
        matches!(self.check, RuleCheck::Semantic)
    }
}

/// A rule gated on scenario state: may require text elements to appear,
/// unlock restricted content, and feed a hint into generation.
#[derive(Debug, Clone)]
pub struct ConditionalRule {
    pub id: String,
    pub description: String,
    pub condition: Condition,
    pub required_elements: Vec<String>,
    pub allow_restricted: bool,
    pub prompt_hint: Option<String>,
    pub action: Option<RuleAction>,
    pub fix_instruction: Option<String>,
}

/// The three rule tiers as one tagged union, as they appear in the
/// catalog document.
#[derive(Debug, Clone)]
pub enum Rule {
    Mandatory(MandatoryRule),
    Advisory(AdvisoryRule),
    Conditional(ConditionalRule),
}

impl Rule {
    pub fn id(&self) -> &str {
        match self {
            Rule::Mandatory(rule) => &rule.id,
            Rule::Advisory(rule) => &rule.id,
            Rule::Conditional(rule) => &rule.id,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Rule::Mandatory(rule) => &rule.description,
            Rule::Advisory(rule) => &rule.description,
            Rule::Conditional(rule) => &rule.description,
        }
    }
}
