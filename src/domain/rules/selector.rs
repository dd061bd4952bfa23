//! Per-turn rule selection.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::domain::condition::EvalContext;
use crate::domain::scenario::ConversationState;

use super::catalog::RuleCatalog;
use super::types::{AdvisoryRule, ConditionalRule, MandatoryRule};

/// Selects the rules in force for one turn from the shared catalog.
#[derive(Debug, Clone)]
pub struct RuleSelector {
    catalog: Arc<RuleCatalog>,
}

/// The rules applicable to a single turn, borrowed from the catalog,
/// plus a prompt-ready summary of the active constraints.
#[derive(Debug)]
pub struct SelectedRuleSet<'a> {
    pub mandatory: Vec<&'a MandatoryRule>,
    pub advisory: Vec<&'a AdvisoryRule>,
    pub conditional: Vec<&'a ConditionalRule>,
    /// True if any matched conditional rule unlocks restricted content
    /// for this turn.
    pub allow_restricted_content: bool,
    pub summary: String,
}

impl<'a> SelectedRuleSet<'a> {
    /// All text elements the matched conditional rules require to appear
    /// in the reply.
    pub fn required_elements(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.conditional.iter().flat_map(|rule| {
            rule.required_elements
                .iter()
                .map(move |element| (rule.id.as_str(), element.as_str()))
        })
    }
}

impl RuleSelector {
    pub fn new(catalog: Arc<RuleCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Arc<RuleCatalog> {
        &self.catalog
    }

    /// Picks the rules in force for this turn. Mandatory rules are always
    /// included; advisory and conditional rules are filtered by their
    /// conditions, fail-closed on evaluation errors.
    pub fn select(&self, state: &ConversationState, utterance: &str) -> SelectedRuleSet<'_> {
        let ctx = EvalContext::new(state, utterance);

        let mandatory: Vec<&MandatoryRule> = self.catalog.mandatory_rules().iter().collect();

        let advisory: Vec<&AdvisoryRule> = self
            .catalog
            .advisory_rules()
            .iter()
            .filter(|rule| match &rule.condition {
                Some(condition) => condition.holds(&ctx),
                None => true,
            })
            .collect();

        let conditional: Vec<&ConditionalRule> = self
            .catalog
            .conditional_rules()
            .iter()
            .filter(|rule| rule.condition.holds(&ctx))
            .collect();

        let allow_restricted_content = conditional.iter().any(|rule| rule.allow_restricted);

        let summary = build_summary(
            state,
            &mandatory,
            &advisory,
            &conditional,
            allow_restricted_content,
        );

        tracing::debug!(
            mandatory = mandatory.len(),
            advisory = advisory.len(),
            conditional = conditional.len(),
            restricted = allow_restricted_content,
            "rules selected for turn"
        );

        SelectedRuleSet {
            mandatory,
            advisory,
            conditional,
            allow_restricted_content,
            summary,
        }
    }
}

const SUMMARY_MANDATORY_CAP: usize = 5;
const SUMMARY_ADVISORY_CAP: usize = 3;

fn build_summary(
    state: &ConversationState,
    mandatory: &[&MandatoryRule],
    advisory: &[&AdvisoryRule],
    conditional: &[&ConditionalRule],
    allow_restricted: bool,
) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "[State] phase={} scene={} turn={} P={:.1} A={:.1} D={:.1}",
        state.scenario.current_phase,
        state.scenario.current_scene,
        state.scenario.turn_count_in_phase,
        state.affect.pleasure,
        state.affect.arousal,
        state.affect.dominance,
    );

    if !mandatory.is_empty() {
        out.push_str("[Hard constraints]\n");
        for rule in mandatory.iter().take(SUMMARY_MANDATORY_CAP) {
            let _ = writeln!(out, "- {}", rule.description);
        }
        if mandatory.len() > SUMMARY_MANDATORY_CAP {
            let _ = writeln!(out, "...and {} more", mandatory.len() - SUMMARY_MANDATORY_CAP);
        }
    }

    if !advisory.is_empty() {
        out.push_str("[Soft guidance]\n");
        for rule in advisory.iter().take(SUMMARY_ADVISORY_CAP) {
            match &rule.prompt_hint {
                Some(hint) => {
                    let _ = writeln!(out, "- {}", hint);
                }
                None => {
                    let _ = writeln!(out, "- {}", rule.description);
                }
            }
        }
        if advisory.len() > SUMMARY_ADVISORY_CAP {
            let _ = writeln!(out, "...and {} more", advisory.len() - SUMMARY_ADVISORY_CAP);
        }
    }

    if !conditional.is_empty() {
        out.push_str("[Scene directives]\n");
        for rule in conditional {
            match &rule.prompt_hint {
                Some(hint) => {
                    let _ = writeln!(out, "- {}", hint);
                }
                None => {
                    let _ = writeln!(out, "- {}", rule.description);
                }
            }
            for element in &rule.required_elements {
                let _ = writeln!(out, "  must include: {}", element);
            }
        }
    }

    if allow_restricted {
        out.push_str("[Restricted content is permitted in this scene]\n");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::UserId;
    use crate::domain::rules::RuleCatalog;

    fn catalog() -> Arc<RuleCatalog> {
        let doc = r#"{
            "persona": {"name": "Mira"},
            "mandatory_rules": [
                {"id": "m1", "description": "No stage directions", "check_kind": "forbidden_pattern", "pattern": "\\*[^*]*\\*", "action": "remove", "fix_instruction": "Dialogue only"}
            ],
            "advisory_rules": [
                {"id": "a_always", "description": "Stay playful", "check_kind": "semantic", "fix_instruction": "Lighten up"},
                {"id": "a_intro", "description": "Stay reserved", "check_kind": "semantic", "condition": {"current_phase": "phase_introduction"}, "fix_instruction": "Keep distance"},
                {"id": "a_sad", "description": "Be gentle when the user is upset", "check_kind": "semantic", "condition": {"context_keywords": ["sad", "lonely"]}, "fix_instruction": "Soften the tone"}
            ],
            "conditional_rules": [
                {"id": "c_date", "description": "Date mood", "condition": {"current_phase": "phase_date"}, "required_elements": ["a toast"], "allow_restricted": true, "prompt_hint": "You are on a date"},
                {"id": "c_gift", "description": "Thank for the gift", "condition": {"variables": {"gift_received": true}}, "required_elements": [], "allow_restricted": false}
            ]
        }"#;
        Arc::new(RuleCatalog::from_json_str(doc).unwrap())
    }

    fn state(phase: &str) -> ConversationState {
        ConversationState::new(UserId::new("user-1").unwrap(), phase, "scene_cafe")
    }

    #[test]
    fn mandatory_rules_are_always_selected() {
        let selector = RuleSelector::new(catalog());
        let selected = selector.select(&state("phase_anything"), "hi");
        assert_eq!(selected.mandatory.len(), 1);
        assert_eq!(selected.mandatory[0].id, "m1");
    }

    #[test]
    fn advisory_rules_filter_on_condition() {
        let selector = RuleSelector::new(catalog());

        let selected = selector.select(&state("phase_introduction"), "hi");
        let ids: Vec<&str> = selected.advisory.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a_always", "a_intro"]);

        let selected = selector.select(&state("phase_date"), "hi");
        let ids: Vec<&str> = selected.advisory.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a_always"]);
    }

    #[test]
    fn keyword_condition_reads_the_utterance() {
        let selector = RuleSelector::new(catalog());
        let selected = selector.select(&state("phase_date"), "I feel so lonely today");
        assert!(selected.advisory.iter().any(|r| r.id == "a_sad"));
    }

    #[test]
    fn conditional_rules_gate_restricted_content() {
        let selector = RuleSelector::new(catalog());

        let selected = selector.select(&state("phase_introduction"), "hi");
        assert!(selected.conditional.is_empty());
        assert!(!selected.allow_restricted_content);

        let selected = selector.select(&state("phase_date"), "hi");
        assert_eq!(selected.conditional.len(), 1);
        assert!(selected.allow_restricted_content);
    }

    #[test]
    fn unknown_variable_in_condition_drops_the_rule() {
        // c_gift references a variable that is never set; fail-closed.
        let selector = RuleSelector::new(catalog());
        let selected = selector.select(&state("phase_date"), "hi");
        assert!(!selected.conditional.iter().any(|r| r.id == "c_gift"));
    }

    #[test]
    fn required_elements_carry_their_rule_id() {
        let selector = RuleSelector::new(catalog());
        let selected = selector.select(&state("phase_date"), "hi");
        let elements: Vec<(&str, &str)> = selected.required_elements().collect();
        assert_eq!(elements, vec![("c_date", "a toast")]);
    }

    mod summary {
        use super::*;

        #[test]
        fn includes_state_header_and_sections() {
            let selector = RuleSelector::new(catalog());
            let selected = selector.select(&state("phase_date"), "hi");

            assert!(selected.summary.contains("phase=phase_date"));
            assert!(selected.summary.contains("P=0.0 A=0.0 D=0.0"));
            assert!(selected.summary.contains("[Hard constraints]"));
            assert!(selected.summary.contains("- No stage directions"));
            assert!(selected.summary.contains("You are on a date"));
            assert!(selected.summary.contains("must include: a toast"));
            assert!(selected.summary.contains("[Restricted content is permitted"));
        }

        #[test]
        fn advisory_overflow_is_elided() {
            let mut doc = serde_json::json!({
                "advisory_rules": []
            });
            let rules = doc["advisory_rules"].as_array_mut().unwrap();
            for i in 0..5 {
                rules.push(serde_json::json!({
                    "id": format!("a{}", i),
                    "description": format!("guidance {}", i),
                    "check_kind": "semantic",
                    "fix_instruction": "x"
                }));
            }
            let catalog = Arc::new(RuleCatalog::from_json_str(&doc.to_string()).unwrap());
            let selector = RuleSelector::new(catalog);
            let selected = selector.select(&state("phase_x"), "hi");

            assert!(selected.summary.contains("- guidance 2"));
            assert!(!selected.summary.contains("- guidance 3"));
            assert!(selected.summary.contains("...and 2 more"));
        }
    }
}
