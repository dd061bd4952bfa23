//! Violation repair for candidate replies.
//!
//! Repairs run in two stages: a deterministic pass (narration stripping,
//! sentence-boundary trimming) handles `remove` and `trim` actions
//! without another model call, then the remaining violations go to the
//! generation service as one batched rewrite. A `block` action is never
//! repaired.

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

use crate::domain::rules::{PersonaCore, RuleAction, RuleCatalog};
use crate::domain::validation::{ValidationOutcome, Violation};
use crate::ports::generation::{GenerationIntent, GenerationRequest, GenerationService, Message};
use crate::ports::ServiceError;

/// Fallback stage-direction patterns, used when the catalog does not
/// author its own.
static DEFAULT_NARRATION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"\*[^*]*\*", r"\([^)]*\)", r"（[^）]*）", r"\[[^\]]*\]"]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
});

/// Appended when a trim cannot end on a sentence boundary.
const TRIM_ELLIPSIS: &str = "…";

/// What the repairer did with the candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum RepairOutcome {
    /// The candidate was repaired (possibly unchanged if nothing
    /// actionable remained). `applied` names the steps taken.
    Repaired { text: String, applied: Vec<String> },
    /// A `block` violation was present; the candidate must not be served.
    Blocked { violations: Vec<Violation> },
}

/// Repairs rule violations in candidate replies.
pub struct OutputRepairer {
    catalog: Arc<RuleCatalog>,
    generation: Arc<dyn GenerationService>,
    trim_max_chars: usize,
}

impl OutputRepairer {
    pub fn new(
        catalog: Arc<RuleCatalog>,
        generation: Arc<dyn GenerationService>,
        trim_max_chars: usize,
    ) -> Self {
        Self {
            catalog,
            generation,
            trim_max_chars,
        }
    }

    /// Repairs the candidate according to the violations' actions.
    pub async fn repair(
        &self,
        text: &str,
        outcome: &ValidationOutcome,
    ) -> Result<RepairOutcome, ServiceError> {
        let blocked: Vec<Violation> = outcome
            .violations
            .iter()
            .filter(|v| v.action == RuleAction::Block)
            .cloned()
            .collect();
        if !blocked.is_empty() {
            return Ok(RepairOutcome::Blocked { violations: blocked });
        }

        let mut repaired = text.to_string();
        let mut applied = Vec::new();

        if outcome
            .violations
            .iter()
            .any(|v| v.action == RuleAction::Remove)
        {
            let stripped = self.strip_narration(&repaired);
            if stripped != repaired {
                repaired = stripped;
                applied.push("removed_narration".to_string());
            }
        }

        if outcome
            .violations
            .iter()
            .any(|v| v.action == RuleAction::Trim)
        {
            let trimmed = trim_to_sentence(&repaired, self.trim_max_chars);
            if trimmed != repaired {
                repaired = trimmed;
                applied.push("trimmed".to_string());
            }
        }

        let rewrite_instructions: Vec<&str> = outcome
            .violations
            .iter()
            .filter(|v| v.action == RuleAction::Rewrite && !v.fix_instruction.is_empty())
            .map(|v| v.fix_instruction.as_str())
            .collect();
        if !rewrite_instructions.is_empty() {
            let rewritten = self.rewrite(&repaired, &rewrite_instructions).await?;
            if let Some(rewritten) = rewritten {
                repaired = rewritten;
                applied.push("rewrote".to_string());
            }
        }

        tracing::debug!(steps = ?applied, "repair pass finished");
        Ok(RepairOutcome::Repaired {
            text: repaired,
            applied,
        })
    }

    /// Strips stage directions using the catalog's patterns, falling back
    /// to the defaults. Whitespace is only normalized when something was
    /// actually stripped, so clean text passes through untouched.
    pub fn strip_narration(&self, text: &str) -> String {
        let patterns: &[Regex] = if self.catalog.narration_patterns().is_empty() {
            &DEFAULT_NARRATION_PATTERNS
        } else {
            self.catalog.narration_patterns()
        };

        let mut stripped = text.to_string();
        let mut matched = false;
        for pattern in patterns {
            if pattern.is_match(&stripped) {
                matched = true;
                stripped = pattern.replace_all(&stripped, "").into_owned();
            }
        }
        if !matched {
            return stripped;
        }
        collapse_whitespace(&stripped)
    }

    async fn rewrite(
        &self,
        text: &str,
        instructions: &[&str],
    ) -> Result<Option<String>, ServiceError> {
        let request = GenerationRequest {
            system_prompt: rewrite_prompt(self.catalog.persona(), instructions),
            messages: vec![Message::user(text)],
            intent: GenerationIntent::Rewrite,
        };
        let output = self.generation.generate(request).await?;
        let cleaned = normalize_rewrite(&output);
        if cleaned.is_empty() {
            tracing::warn!("rewrite came back empty, keeping previous text");
            return Ok(None);
        }
        Ok(Some(cleaned))
    }
}

fn rewrite_prompt(persona: &PersonaCore, instructions: &[&str]) -> String {
    let mut prompt = String::new();
    prompt.push_str("Rewrite the following reply so it keeps its meaning and voice.\n");
    if !persona.name.is_empty() {
        prompt.push_str(&format!(
            "The speaker is {}, {}. Speech style: {}.\n",
            persona.name, persona.role, persona.speech_style
        ));
    }
    prompt.push_str("Apply every correction below. Output only the rewritten reply.\n");
    for instruction in instructions {
        prompt.push_str("- ");
        prompt.push_str(instruction);
        prompt.push('\n');
    }
    prompt
}

/// Strips wrapping quotes and normalizes whitespace in rewrite output.
fn normalize_rewrite(output: &str) -> String {
    let trimmed = output.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| {
            trimmed
                .strip_prefix('「')
                .and_then(|s| s.strip_suffix('」'))
        })
        .unwrap_or(trimmed);
    unquoted.trim().to_string()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cuts the text to at most `max_chars` characters, preferring the last
/// sentence boundary within the limit. A mid-sentence cut gets an
/// ellipsis. Text already within the limit is returned unchanged.
pub fn trim_to_sentence(text: &str, max_chars: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return text.to_string();
    }

    let window = &chars[..max_chars];
    let boundary = window
        .iter()
        .rposition(|c| matches!(c, '.' | '!' | '?' | '。' | '！' | '？'));
    match boundary {
        Some(idx) => window[..=idx].iter().collect(),
        None => {
            let mut cut: String = window.iter().collect();
            cut.truncate(cut.trim_end().len());
            cut.push_str(TRIM_ELLIPSIS);
            cut
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rules::RuleCatalog;
    use crate::domain::validation::Severity;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StubGenerator {
        replies: Mutex<Vec<Result<String, ServiceError>>>,
    }

    impl StubGenerator {
        fn scripted(replies: Vec<Result<String, ServiceError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
            })
        }

        fn unreachable() -> Arc<Self> {
            Self::scripted(vec![])
        }
    }

    #[async_trait]
    impl GenerationService for StubGenerator {
        async fn generate(&self, _request: GenerationRequest) -> Result<String, ServiceError> {
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(ServiceError::Unavailable("not scripted".into())))
        }
    }

    fn catalog() -> Arc<RuleCatalog> {
        Arc::new(RuleCatalog::from_json_str(r#"{"persona": {"name": "Mira"}}"#).unwrap())
    }

    fn violation(action: RuleAction, fix: &str) -> Violation {
        Violation {
            rule_id: "r".into(),
            detail: "x".into(),
            severity: Severity::High,
            action,
            fix_instruction: fix.into(),
            matched: None,
        }
    }

    fn outcome_of(violations: Vec<Violation>) -> ValidationOutcome {
        ValidationOutcome { violations }
    }

    #[tokio::test]
    async fn block_violation_is_never_repaired() {
        let repairer = OutputRepairer::new(catalog(), StubGenerator::unreachable(), 200);
        let outcome = outcome_of(vec![
            violation(RuleAction::Block, "unfixable"),
            violation(RuleAction::Remove, ""),
        ]);

        let result = repairer.repair("bad reply", &outcome).await.unwrap();
        assert!(matches!(
            result,
            RepairOutcome::Blocked { violations } if violations.len() == 1
        ));
    }

    #[tokio::test]
    async fn remove_strips_stage_directions() {
        let repairer = OutputRepairer::new(catalog(), StubGenerator::unreachable(), 200);
        let outcome = outcome_of(vec![violation(RuleAction::Remove, "")]);

        let result = repairer
            .repair("Hello! *waves shyly* Nice to (finally) meet you.", &outcome)
            .await
            .unwrap();
        assert_eq!(
            result,
            RepairOutcome::Repaired {
                text: "Hello! Nice to meet you.".into(),
                applied: vec!["removed_narration".into()],
            }
        );
    }

    #[tokio::test]
    async fn trim_cuts_at_a_sentence_boundary() {
        let repairer = OutputRepairer::new(catalog(), StubGenerator::unreachable(), 30);
        let outcome = outcome_of(vec![violation(RuleAction::Trim, "")]);

        let result = repairer
            .repair(
                "First sentence here. Second one runs much longer than allowed.",
                &outcome,
            )
            .await
            .unwrap();
        assert_eq!(
            result,
            RepairOutcome::Repaired {
                text: "First sentence here.".into(),
                applied: vec!["trimmed".into()],
            }
        );
    }

    #[tokio::test]
    async fn rewrite_uses_the_generation_service() {
        let repairer = OutputRepairer::new(
            catalog(),
            StubGenerator::scripted(vec![Ok("  \"A warmer reply.\"  ".into())]),
            200,
        );
        let outcome = outcome_of(vec![violation(RuleAction::Rewrite, "Warm it up")]);

        let result = repairer.repair("A cold reply.", &outcome).await.unwrap();
        assert_eq!(
            result,
            RepairOutcome::Repaired {
                text: "A warmer reply.".into(),
                applied: vec!["rewrote".into()],
            }
        );
    }

    #[tokio::test]
    async fn empty_rewrite_keeps_the_previous_text() {
        let repairer = OutputRepairer::new(
            catalog(),
            StubGenerator::scripted(vec![Ok("   ".into())]),
            200,
        );
        let outcome = outcome_of(vec![violation(RuleAction::Rewrite, "Warm it up")]);

        let result = repairer.repair("A cold reply.", &outcome).await.unwrap();
        assert_eq!(
            result,
            RepairOutcome::Repaired {
                text: "A cold reply.".into(),
                applied: vec![],
            }
        );
    }

    #[tokio::test]
    async fn rewrite_failure_propagates() {
        let repairer = OutputRepairer::new(
            catalog(),
            StubGenerator::scripted(vec![Err(ServiceError::Timeout(30))]),
            200,
        );
        let outcome = outcome_of(vec![violation(RuleAction::Rewrite, "Warm it up")]);

        assert!(repairer.repair("A cold reply.", &outcome).await.is_err());
    }

    mod deterministic {
        use super::*;

        #[test]
        fn strip_narration_is_idempotent() {
            let repairer = OutputRepairer::new(catalog(), StubGenerator::unreachable(), 200);
            let once = repairer.strip_narration("Hi! *grins* Welcome back.");
            let twice = repairer.strip_narration(&once);
            assert_eq!(once, twice);
            assert_eq!(once, "Hi! Welcome back.");
        }

        #[test]
        fn strip_narration_leaves_clean_text_untouched() {
            let repairer = OutputRepairer::new(catalog(), StubGenerator::unreachable(), 200);
            let text = "Two  spaces stay  as they are.";
            assert_eq!(repairer.strip_narration(text), text);
        }

        #[test]
        fn trim_within_limit_is_identity() {
            assert_eq!(trim_to_sentence("Short.", 50), "Short.");
        }

        #[test]
        fn trim_without_boundary_appends_ellipsis() {
            let trimmed = trim_to_sentence("no boundaries in this text at all", 10);
            assert_eq!(trimmed, format!("no boundar{}", TRIM_ELLIPSIS));
        }

        #[test]
        fn trim_counts_chars_not_bytes() {
            let trimmed = trim_to_sentence("こんにちは。今日はいい天気ですね。", 8);
            assert_eq!(trimmed, "こんにちは。");
        }

        #[test]
        fn rewrite_normalization_strips_quotes() {
            assert_eq!(normalize_rewrite("\"quoted\""), "quoted");
            assert_eq!(normalize_rewrite("「かぎかっこ」"), "かぎかっこ");
            assert_eq!(normalize_rewrite("  plain  "), "plain");
        }
    }
}
