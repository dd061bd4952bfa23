//! Rule catalog loading.
//!
//! The catalog is one declarative JSON document holding the persona core,
//! narration style patterns, and the three rule tiers. Every entry is
//! validated into its typed form at load; malformed entries are rejected
//! here rather than discovered mid-turn.

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::condition::{Condition, ConditionParseError};

use super::types::{AdvisoryRule, ConditionalRule, MandatoryRule, Rule, RuleAction, RuleCheck};

/// Errors raised while loading the catalog or scenario script. Fatal at
/// startup; a process with a broken catalog must not serve.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("catalog document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rule '{id}': {reason}")]
    InvalidRule { id: String, reason: String },

    #[error("rule '{id}': invalid pattern: {source}")]
    InvalidPattern {
        id: String,
        #[source]
        source: regex::Error,
    },

    #[error("rule '{id}': invalid condition: {source}")]
    InvalidCondition {
        id: String,
        #[source]
        source: ConditionParseError,
    },

    #[error("duplicate rule id '{0}'")]
    DuplicateRuleId(String),

    #[error("style pattern {index} is not a valid regex: {source}")]
    InvalidStylePattern {
        index: usize,
        #[source]
        source: regex::Error,
    },

    #[error("phase '{id}': {reason}")]
    InvalidPhase { id: String, reason: String },

    #[error("phase '{phase}': next_phase '{next}' is not defined")]
    UnknownNextPhase { phase: String, next: String },

    #[error(
        "phase '{phase}': trigger condition pins consent_for_next_phase to false; \
         the proposal handshake could never complete"
    )]
    NonMonotonicConsent { phase: String },

    #[error("scenario script: initial phase '{0}' is not defined")]
    UnknownInitialPhase(String),
}

/// The persona's identity, carried into rewrite prompts so repairs keep
/// the character's voice. Opaque text from the engine's point of view.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersonaCore {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub speech_style: String,
}

#[derive(Debug, Deserialize, Default)]
struct RawStyle {
    #[serde(default)]
    narration_patterns: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    id: String,
    description: String,
    #[serde(default)]
    check_kind: Option<String>,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    max_chars: Option<usize>,
    #[serde(default)]
    min_chars: Option<usize>,
    #[serde(default)]
    predicate: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    action: Option<RuleAction>,
    #[serde(default)]
    fix_instruction: Option<String>,
    #[serde(default)]
    condition: Option<Value>,
    #[serde(default)]
    prompt_hint: Option<String>,
    #[serde(default)]
    required_elements: Vec<String>,
    #[serde(default)]
    allow_restricted: bool,
}

#[derive(Debug, Deserialize)]
struct RawCatalog {
    #[serde(default)]
    persona: PersonaCore,
    #[serde(default)]
    style: RawStyle,
    #[serde(default)]
    mandatory_rules: Vec<RawRule>,
    #[serde(default)]
    advisory_rules: Vec<RawRule>,
    #[serde(default)]
    conditional_rules: Vec<RawRule>,
}

/// The loaded, validated rule catalog. Immutable after load and shared
/// across concurrent turns.
#[derive(Debug)]
pub struct RuleCatalog {
    persona: PersonaCore,
    narration_patterns: Vec<Regex>,
    mandatory: Vec<MandatoryRule>,
    advisory: Vec<AdvisoryRule>,
    conditional: Vec<ConditionalRule>,
    path: Option<PathBuf>,
}

impl RuleCatalog {
    /// Loads and validates the catalog from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut catalog = Self::from_json_str(&text)?;
        catalog.path = Some(path.to_path_buf());
        Ok(catalog)
    }

    /// Parses and validates the catalog from a JSON string.
    pub fn from_json_str(text: &str) -> Result<Self, CatalogError> {
        let raw: RawCatalog = serde_json::from_str(text)?;
        Self::from_raw(raw)
    }

    /// Re-reads the backing file, producing a fresh catalog. Callers own
    /// the swap; existing turns keep the snapshot they started with.
    pub fn reload(&self) -> Result<Self, CatalogError> {
        match &self.path {
            Some(path) => Self::load(path),
            None => Err(CatalogError::InvalidRule {
                id: "<catalog>".into(),
                reason: "catalog was not loaded from a file".into(),
            }),
        }
    }

    fn from_raw(raw: RawCatalog) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        let mut check_unique = |id: &str| -> Result<(), CatalogError> {
            if !seen.insert(id.to_string()) {
                return Err(CatalogError::DuplicateRuleId(id.to_string()));
            }
            Ok(())
        };

        let mut mandatory = Vec::with_capacity(raw.mandatory_rules.len());
        for rule in raw.mandatory_rules {
            check_unique(&rule.id)?;
            mandatory.push(build_mandatory(rule)?);
        }

        let mut advisory = Vec::with_capacity(raw.advisory_rules.len());
        for rule in raw.advisory_rules {
            check_unique(&rule.id)?;
            advisory.push(build_advisory(rule)?);
        }

        let mut conditional = Vec::with_capacity(raw.conditional_rules.len());
        for rule in raw.conditional_rules {
            check_unique(&rule.id)?;
            conditional.push(build_conditional(rule)?);
        }

        let narration_patterns = raw
            .style
            .narration_patterns
            .iter()
            .enumerate()
            .map(|(index, pattern)| {
                Regex::new(pattern)
                    .map_err(|source| CatalogError::InvalidStylePattern { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(
            mandatory = mandatory.len(),
            advisory = advisory.len(),
            conditional = conditional.len(),
            "rule catalog loaded"
        );

        Ok(Self {
            persona: raw.persona,
            narration_patterns,
            mandatory,
            advisory,
            conditional,
            path: None,
        })
    }

    pub fn persona(&self) -> &PersonaCore {
        &self.persona
    }

    /// Narration patterns the repairer strips during `remove` repairs.
    pub fn narration_patterns(&self) -> &[Regex] {
        &self.narration_patterns
    }

    pub fn mandatory_rules(&self) -> &[MandatoryRule] {
        &self.mandatory
    }

    pub fn advisory_rules(&self) -> &[AdvisoryRule] {
        &self.advisory
    }

    pub fn conditional_rules(&self) -> &[ConditionalRule] {
        &self.conditional
    }

    /// Every rule across the three tiers as the tagged union, in catalog
    /// order. For callers that inspect the catalog wholesale (tooling,
    /// diagnostics) rather than one tier at a time.
    pub fn iter_rules(&self) -> impl Iterator<Item = Rule> + '_ {
        self.mandatory
            .iter()
            .cloned()
            .map(Rule::Mandatory)
            .chain(self.advisory.iter().cloned().map(Rule::Advisory))
            .chain(self.conditional.iter().cloned().map(Rule::Conditional))
    }
}

fn build_check(rule: &RawRule) -> Result<RuleCheck, CatalogError> {
    let kind = rule.check_kind.as_deref().unwrap_or("semantic");
    match kind {
        "forbidden_pattern" => {
            let pattern = required_field(rule, rule.pattern.as_deref(), "pattern")?;
            Regex::new(pattern)
                .map(RuleCheck::ForbiddenPattern)
                .map_err(|source| CatalogError::InvalidPattern {
                    id: rule.id.clone(),
                    source,
                })
        }
        "required_pattern" => {
            let pattern = required_field(rule, rule.pattern.as_deref(), "pattern")?;
            Regex::new(pattern)
                .map(RuleCheck::RequiredPattern)
                .map_err(|source| CatalogError::InvalidPattern {
                    id: rule.id.clone(),
                    source,
                })
        }
        "max_length" => {
            let max = rule.max_chars.ok_or_else(|| missing(rule, "max_chars"))?;
            Ok(RuleCheck::MaxLength(max))
        }
        "min_length" => {
            let min = rule.min_chars.ok_or_else(|| missing(rule, "min_chars"))?;
            Ok(RuleCheck::MinLength(min))
        }
        "predicate" => {
            let name = required_field(rule, rule.predicate.as_deref(), "predicate")?;
            Ok(RuleCheck::Predicate {
                name: name.to_string(),
                params: rule.params.clone().unwrap_or(Value::Null),
            })
        }
        "semantic" => Ok(RuleCheck::Semantic),
        "none" => Ok(RuleCheck::None),
        other => Err(CatalogError::InvalidRule {
            id: rule.id.clone(),
            reason: format!("unknown check_kind '{}'", other),
        }),
    }
}

fn required_field<'a>(
    rule: &RawRule,
    value: Option<&'a str>,
    field: &str,
) -> Result<&'a str, CatalogError> {
    value.ok_or_else(|| missing(rule, field))
}

fn missing(rule: &RawRule, field: &str) -> CatalogError {
    CatalogError::InvalidRule {
        id: rule.id.clone(),
        reason: format!("check_kind requires '{}'", field),
    }
}

fn build_condition(rule: &RawRule) -> Result<Option<Condition>, CatalogError> {
    rule.condition
        .as_ref()
        .map(|doc| {
            Condition::from_json(doc).map_err(|source| CatalogError::InvalidCondition {
                id: rule.id.clone(),
                source,
            })
        })
        .transpose()
}

fn build_mandatory(rule: RawRule) -> Result<MandatoryRule, CatalogError> {
    let check = build_check(&rule)?;
    if matches!(check, RuleCheck::Semantic) {
        return Err(CatalogError::InvalidRule {
            id: rule.id,
            reason: "mandatory rules must be locally checkable".into(),
        });
    }
    Ok(MandatoryRule {
        check,
        action: rule.action.unwrap_or(RuleAction::Rewrite),
        fix_instruction: rule.fix_instruction.unwrap_or_default(),
        id: rule.id,
        description: rule.description,
    })
}

fn build_advisory(rule: RawRule) -> Result<AdvisoryRule, CatalogError> {
    let check = build_check(&rule)?;
    let condition = build_condition(&rule)?;
    Ok(AdvisoryRule {
        check,
        condition,
        action: rule.action.unwrap_or(RuleAction::Rewrite),
        fix_instruction: rule.fix_instruction.unwrap_or_default(),
        prompt_hint: rule.prompt_hint,
        id: rule.id,
        description: rule.description,
    })
}

fn build_conditional(rule: RawRule) -> Result<ConditionalRule, CatalogError> {
    let condition = build_condition(&rule)?.ok_or_else(|| CatalogError::InvalidRule {
        id: rule.id.clone(),
        reason: "conditional rules require a condition".into(),
    })?;
    Ok(ConditionalRule {
        condition,
        required_elements: rule.required_elements,
        allow_restricted: rule.allow_restricted,
        prompt_hint: rule.prompt_hint,
        action: rule.action,
        fix_instruction: rule.fix_instruction,
        id: rule.id,
        description: rule.description,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_catalog() -> &'static str {
        r#"{
            "persona": {"name": "Mira", "role": "street performer", "speech_style": "bright, polite"},
            "style": {"narration_patterns": ["\\([^)]*\\)"]},
            "mandatory_rules": [
                {
                    "id": "no_meta",
                    "description": "Never mention being an AI",
                    "check_kind": "forbidden_pattern",
                    "pattern": "(?i)as an ai",
                    "action": "block",
                    "fix_instruction": "Stay in character"
                },
                {
                    "id": "reply_cap",
                    "description": "Keep replies short",
                    "check_kind": "max_length",
                    "max_chars": 300,
                    "action": "trim",
                    "fix_instruction": "Shorten the reply"
                }
            ],
            "advisory_rules": [
                {
                    "id": "no_parrot",
                    "description": "Do not repeat the user's words back",
                    "check_kind": "semantic",
                    "fix_instruction": "Respond with your own words"
                },
                {
                    "id": "early_shyness",
                    "description": "Stay reserved early in the story",
                    "check_kind": "semantic",
                    "condition": {"current_phase": "phase_introduction"},
                    "fix_instruction": "Keep some distance"
                }
            ],
            "conditional_rules": [
                {
                    "id": "date_mood",
                    "description": "On the date, be openly affectionate",
                    "condition": {"current_phase": "phase_date"},
                    "required_elements": [],
                    "allow_restricted": true,
                    "prompt_hint": "You are on a date; relax and be warm"
                }
            ]
        }"#
    }

    #[test]
    fn loads_all_three_tiers() {
        let catalog = RuleCatalog::from_json_str(minimal_catalog()).unwrap();
        assert_eq!(catalog.mandatory_rules().len(), 2);
        assert_eq!(catalog.advisory_rules().len(), 2);
        assert_eq!(catalog.conditional_rules().len(), 1);
        assert_eq!(catalog.persona().name, "Mira");
        assert_eq!(catalog.narration_patterns().len(), 1);
    }

    #[test]
    fn typed_checks_are_built() {
        let catalog = RuleCatalog::from_json_str(minimal_catalog()).unwrap();
        assert!(matches!(
            catalog.mandatory_rules()[0].check,
            RuleCheck::ForbiddenPattern(_)
        ));
        assert!(matches!(
            catalog.mandatory_rules()[1].check,
            RuleCheck::MaxLength(300)
        ));
        assert!(catalog.advisory_rules()[0].is_semantic());
        assert!(catalog.advisory_rules()[0].condition.is_none());
        assert!(catalog.advisory_rules()[1].condition.is_some());
        assert!(catalog.conditional_rules()[0].allow_restricted);
    }

    #[test]
    fn iter_rules_walks_all_tiers_in_order() {
        let catalog = RuleCatalog::from_json_str(minimal_catalog()).unwrap();
        let ids: Vec<String> = catalog.iter_rules().map(|r| r.id().to_string()).collect();
        assert_eq!(
            ids,
            vec!["no_meta", "reply_cap", "no_parrot", "early_shyness", "date_mood"]
        );
        assert!(matches!(
            catalog.iter_rules().next(),
            Some(Rule::Mandatory(_))
        ));
    }

    #[test]
    fn missing_pattern_is_rejected() {
        let doc = r#"{
            "mandatory_rules": [
                {"id": "broken", "description": "x", "check_kind": "forbidden_pattern"}
            ]
        }"#;
        let err = RuleCatalog::from_json_str(doc).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidRule { id, .. } if id == "broken"));
    }

    #[test]
    fn bad_regex_is_rejected() {
        let doc = r#"{
            "mandatory_rules": [
                {"id": "broken", "description": "x", "check_kind": "forbidden_pattern", "pattern": "("}
            ]
        }"#;
        let err = RuleCatalog::from_json_str(doc).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidPattern { .. }));
    }

    #[test]
    fn duplicate_ids_are_rejected_across_tiers() {
        let doc = r#"{
            "mandatory_rules": [
                {"id": "dup", "description": "x", "check_kind": "max_length", "max_chars": 10}
            ],
            "advisory_rules": [
                {"id": "dup", "description": "y", "check_kind": "semantic"}
            ]
        }"#;
        let err = RuleCatalog::from_json_str(doc).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateRuleId(id) if id == "dup"));
    }

    #[test]
    fn semantic_mandatory_rule_is_rejected() {
        let doc = r#"{
            "mandatory_rules": [
                {"id": "vague", "description": "x", "check_kind": "semantic"}
            ]
        }"#;
        assert!(RuleCatalog::from_json_str(doc).is_err());
    }

    #[test]
    fn conditional_rule_without_condition_is_rejected() {
        let doc = r#"{
            "conditional_rules": [
                {"id": "floating", "description": "x"}
            ]
        }"#;
        assert!(RuleCatalog::from_json_str(doc).is_err());
    }

    #[test]
    fn malformed_condition_is_rejected_at_load() {
        let doc = r#"{
            "conditional_rules": [
                {"id": "bad_cond", "description": "x", "condition": {"mood": 5}}
            ]
        }"#;
        let err = RuleCatalog::from_json_str(doc).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidCondition { .. }));
    }
}
