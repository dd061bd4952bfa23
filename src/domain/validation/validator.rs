//! The four-pass candidate reply validator.
//!
//! Passes run cheapest first: local mandatory checks, registered
//! deterministic predicates, required scene elements, then one batched
//! semantic audit. The audit is skipped when an earlier pass already
//! found a critical violation, since the candidate is dead either way.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::rules::{
    AdvisoryRule, LocalFinding, MandatoryRule, RuleAction, RuleCheck, SelectedRuleSet,
};
use crate::ports::classification::{ClassificationService, SemanticCheckRequest};
use crate::ports::generation::MessageRole;
use crate::ports::memory_store::HistoryEntry;

use super::violation::{Severity, ValidationOutcome, Violation};

/// Input handed to a registered predicate.
pub struct PredicateInput<'a> {
    pub text: &'a str,
    pub params: &'a Value,
    /// Recent turns, oldest first.
    pub recent_history: &'a [HistoryEntry],
}

/// A deterministic named check evaluated locally against the candidate
/// text and recent history.
pub type PredicateFn = fn(&PredicateInput<'_>) -> Option<LocalFinding>;

/// Validates candidate replies against the rules selected for the turn.
pub struct OutputValidator {
    classification: Arc<dyn ClassificationService>,
    predicates: HashMap<String, PredicateFn>,
}

impl OutputValidator {
    pub fn new(classification: Arc<dyn ClassificationService>) -> Self {
        let mut predicates: HashMap<String, PredicateFn> = HashMap::new();
        predicates.insert("catchphrase_overuse".into(), catchphrase_overuse);
        predicates.insert("reply_length".into(), reply_length);
        Self {
            classification,
            predicates,
        }
    }

    /// Adds (or replaces) a named predicate.
    pub fn register_predicate(&mut self, name: impl Into<String>, predicate: PredicateFn) {
        self.predicates.insert(name.into(), predicate);
    }

    /// Full validation: local passes plus the batched semantic audit.
    pub async fn validate(
        &self,
        text: &str,
        rules: &SelectedRuleSet<'_>,
        recent_history: &[HistoryEntry],
    ) -> ValidationOutcome {
        let mut outcome = self.validate_local(text, rules, recent_history);

        if outcome.has_critical() {
            tracing::debug!("critical violation found, skipping semantic audit");
            return outcome;
        }

        let checks: Vec<SemanticCheckRequest> = rules
            .advisory
            .iter()
            .filter(|rule| rule.is_semantic())
            .map(|rule| SemanticCheckRequest {
                rule_id: rule.id.clone(),
                description: rule.description.clone(),
            })
            .collect();
        if checks.is_empty() {
            return outcome;
        }

        match self.classification.audit(text, &checks).await {
            Ok(findings) => {
                for finding in findings {
                    let Some(rule) = rules.advisory.iter().find(|r| r.id == finding.rule_id)
                    else {
                        tracing::warn!(rule_id = %finding.rule_id, "audit named an unknown rule");
                        continue;
                    };
                    outcome.violations.push(Violation {
                        rule_id: rule.id.clone(),
                        detail: finding.detail,
                        severity: Severity::Medium,
                        action: rule.action,
                        fix_instruction: rule.fix_instruction.clone(),
                        matched: None,
                    });
                }
            }
            // Best-effort pass: an audit failure never fails the turn.
            Err(err) => {
                tracing::warn!(error = %err, "semantic audit failed, skipping");
            }
        }

        outcome
    }

    /// The deterministic passes only. Used to recheck repaired text
    /// without another round of service calls.
    pub fn validate_local(
        &self,
        text: &str,
        rules: &SelectedRuleSet<'_>,
        recent_history: &[HistoryEntry],
    ) -> ValidationOutcome {
        let mut violations = Vec::new();

        for rule in &rules.mandatory {
            if let Some(finding) = self.check_rule(&rule.check, text, recent_history) {
                violations.push(mandatory_violation(rule, finding));
            }
        }

        for rule in &rules.advisory {
            if let Some(finding) = self.check_rule(&rule.check, text, recent_history) {
                violations.push(advisory_violation(rule, finding));
            }
        }

        for rule in &rules.conditional {
            for element in &rule.required_elements {
                if !text.contains(element.as_str()) {
                    violations.push(Violation {
                        rule_id: rule.id.clone(),
                        detail: format!("required element missing: '{}'", element),
                        severity: Severity::High,
                        action: rule.action.unwrap_or(RuleAction::Rewrite),
                        fix_instruction: rule
                            .fix_instruction
                            .clone()
                            .unwrap_or_else(|| format!("Work '{}' into the reply", element)),
                        matched: None,
                    });
                }
            }
        }

        ValidationOutcome { violations }
    }

    fn check_rule(
        &self,
        check: &RuleCheck,
        text: &str,
        recent_history: &[HistoryEntry],
    ) -> Option<LocalFinding> {
        match check {
            RuleCheck::Predicate { name, params } => match self.predicates.get(name) {
                Some(predicate) => predicate(&PredicateInput {
                    text,
                    params,
                    recent_history,
                }),
                None => {
                    tracing::warn!(predicate = %name, "unknown predicate, skipping check");
                    None
                }
            },
            other => other.local_violation(text),
        }
    }
}

fn mandatory_violation(rule: &MandatoryRule, finding: LocalFinding) -> Violation {
    let severity = if rule.action == RuleAction::Block {
        Severity::Critical
    } else {
        Severity::High
    };
    Violation {
        rule_id: rule.id.clone(),
        detail: finding.detail,
        severity,
        action: rule.action,
        fix_instruction: rule.fix_instruction.clone(),
        matched: finding.matched,
    }
}

fn advisory_violation(rule: &AdvisoryRule, finding: LocalFinding) -> Violation {
    Violation {
        rule_id: rule.id.clone(),
        detail: finding.detail,
        severity: Severity::Medium,
        action: rule.action,
        fix_instruction: rule.fix_instruction.clone(),
        matched: finding.matched,
    }
}

/// Flags a signature phrase used more than `max_count` times in one
/// reply, or reused while it still appeared in the last `min_interval`
/// assistant replies.
fn catchphrase_overuse(input: &PredicateInput<'_>) -> Option<LocalFinding> {
    let phrase = input.params.get("phrase")?.as_str()?;
    let max_count = input
        .params
        .get("max_count")
        .and_then(Value::as_u64)
        .unwrap_or(1) as usize;
    let min_interval = input
        .params
        .get("min_interval")
        .and_then(Value::as_u64)
        .unwrap_or(2) as usize;

    let count = input.text.matches(phrase).count();
    if count > max_count {
        return Some(LocalFinding {
            detail: format!("'{}' used {} times in one reply", phrase, count),
            matched: Some(phrase.to_string()),
        });
    }
    if count >= 1 {
        let reused = input
            .recent_history
            .iter()
            .rev()
            .filter(|entry| entry.role == MessageRole::Assistant)
            .take(min_interval)
            .any(|entry| entry.content.contains(phrase));
        if reused {
            return Some(LocalFinding {
                detail: format!("'{}' was already used in a recent reply", phrase),
                matched: Some(phrase.to_string()),
            });
        }
    }
    None
}

/// Character-count bounds as a predicate, so scenarios can tune them
/// per rule without a new check kind.
fn reply_length(input: &PredicateInput<'_>) -> Option<LocalFinding> {
    let len = input.text.chars().count();
    if let Some(max) = input.params.get("max_chars").and_then(Value::as_u64) {
        if len > max as usize {
            return Some(LocalFinding {
                detail: format!("too long: {} > {} chars", len, max),
                matched: None,
            });
        }
    }
    if let Some(min) = input.params.get("min_chars").and_then(Value::as_u64) {
        if len < min as usize {
            return Some(LocalFinding {
                detail: format!("too short: {} < {} chars", len, min),
                matched: None,
            });
        }
    }
    None
}
