//! The turn pipeline: one user utterance in, one validated reply out.
//!
//! A turn runs as: load state, classify the utterance, advance the
//! scenario state, select rules, then a bounded generate-validate-repair
//! loop. State and history commit once, after the loop settles, so a
//! failed turn leaves no trace.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::EngineConfig;
use crate::domain::foundation::{utc_now, UserId};
use crate::domain::repair::{OutputRepairer, RepairOutcome};
use crate::domain::rules::{RuleCatalog, RuleSelector, SelectedRuleSet};
use crate::domain::scenario::ConversationState;
use crate::domain::transition::{
    PhaseTransitionEngine, ScenarioScript, TransitionReport, TurnObservation,
};
use crate::domain::validation::{OutputValidator, ValidationOutcome, Violation};
use crate::ports::classification::{Classification, ClassificationService};
use crate::ports::generation::{
    GenerationIntent, GenerationRequest, GenerationService, Message, MessageRole,
};
use crate::ports::memory_store::{HistoryEntry, MemoryStore, MemoryStoreError};
use crate::ports::state_store::{StateStore, StateStoreError};
use crate::ports::ServiceError;

#[derive(Debug, Error)]
pub enum TurnError {
    /// A blocking rule violation survived every attempt; nothing was
    /// committed and no reply may be served.
    #[error("reply blocked by rule violations")]
    Blocked { violations: Vec<Violation> },

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    State(#[from] StateStoreError),

    #[error(transparent)]
    Memory(#[from] MemoryStoreError),
}

/// How the served reply got through validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The reply passed validation cleanly.
    Accepted,
    /// The retry budget ran out; the least-bad repaired candidate was
    /// served with non-blocking violations outstanding.
    BestEffort,
}

/// The result of one processed turn.
#[derive(Debug, Clone)]
pub struct TurnReply {
    pub text: String,
    pub outcome: TurnOutcome,
    /// Candidate generations spent (1 means the first attempt passed).
    pub attempts: u32,
    pub transition: TransitionReport,
    /// Violations still outstanding on a best-effort reply.
    pub violations: Vec<Violation>,
}

/// Drives one dialogue turn end to end. Shared across tasks; turns for
/// the same user are serialized, turns for different users run freely.
pub struct TurnPipeline {
    config: EngineConfig,
    script: Arc<ScenarioScript>,
    selector: RuleSelector,
    engine: PhaseTransitionEngine,
    validator: OutputValidator,
    repairer: OutputRepairer,
    generation: Arc<dyn GenerationService>,
    classification: Arc<dyn ClassificationService>,
    state_store: Arc<dyn StateStore>,
    memory_store: Arc<dyn MemoryStore>,
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TurnPipeline {
    pub fn new(
        config: EngineConfig,
        catalog: Arc<RuleCatalog>,
        script: Arc<ScenarioScript>,
        generation: Arc<dyn GenerationService>,
        classification: Arc<dyn ClassificationService>,
        state_store: Arc<dyn StateStore>,
        memory_store: Arc<dyn MemoryStore>,
    ) -> Self {
        let selector = RuleSelector::new(Arc::clone(&catalog));
        let engine = PhaseTransitionEngine::new(
            Arc::clone(&script),
            config.consent_threshold,
            config.decay_rate,
        );
        let validator = OutputValidator::new(Arc::clone(&classification));
        let repairer = OutputRepairer::new(
            Arc::clone(&catalog),
            Arc::clone(&generation),
            config.trim_max_chars,
        );
        Self {
            config,
            script,
            selector,
            engine,
            validator,
            repairer,
            generation,
            classification,
            state_store,
            memory_store,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Processes one turn for the user. Concurrent calls for the same
    /// user are serialized to prevent lost state updates.
    pub async fn process_turn(
        &self,
        user_id: &UserId,
        utterance: &str,
    ) -> Result<TurnReply, TurnError> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        let mut state = match self.state_store.get(user_id).await? {
            Some(state) => state,
            None => {
                let initial = self.script.initial_phase();
                ConversationState::new(
                    user_id.clone(),
                    initial.id.clone(),
                    initial.first_scene().to_string(),
                )
            }
        };

        let history = self
            .memory_store
            .recent_history(user_id, self.config.history_limit)
            .await?;

        let classification = self.classify(utterance, &state).await;
        let consent = if state.scenario.awaiting_consent() {
            self.judge_consent(utterance, &state).await
        } else {
            None
        };

        let observation = TurnObservation {
            affect_delta: classification.affect_delta,
            extracted_variables: classification.extracted_variables,
            consent,
        };
        let transition = self.engine.advance(&mut state, utterance, &observation);

        state.context_memories = self
            .memory_store
            .retrieve_relevant(user_id, utterance, self.config.memory_limit)
            .await?;

        // Rules are selected against the post-transition state, so the
        // reply already speaks from the new phase.
        let rules = self.selector.select(&state, utterance);

        let (reply, outcome, attempts, violations) = self
            .generation_loop(utterance, &state, &rules, &transition, &history)
            .await?;

        self.commit(&state, utterance, &reply).await?;

        tracing::info!(
            user = %user_id,
            attempts,
            outcome = ?outcome,
            stage = ?transition.stage,
            "turn committed"
        );

        Ok(TurnReply {
            text: reply,
            outcome,
            attempts,
            transition,
            violations,
        })
    }

    /// Drops the user's state; the next turn starts from the scenario's
    /// initial phase.
    pub async fn reset(&self, user_id: &UserId) -> Result<(), TurnError> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;
        self.state_store.reset(user_id).await?;
        Ok(())
    }

    async fn generation_loop(
        &self,
        utterance: &str,
        state: &ConversationState,
        rules: &SelectedRuleSet<'_>,
        transition: &TransitionReport,
        history: &[HistoryEntry],
    ) -> Result<(String, TurnOutcome, u32, Vec<Violation>), TurnError> {
        let base_prompt = self.assemble_prompt(state, rules, transition);
        let messages = prompt_messages(history, utterance);

        let max_attempts = self.config.max_retries + 1;
        let mut feedback: Vec<String> = Vec::new();
        let mut best_effort: Option<(String, ValidationOutcome)> = None;

        for attempt in 1..=max_attempts {
            let mut system_prompt = base_prompt.clone();
            if !feedback.is_empty() {
                system_prompt.push_str("\n[Corrections from the previous attempt]\n");
                for instruction in &feedback {
                    system_prompt.push_str("- ");
                    system_prompt.push_str(instruction);
                    system_prompt.push('\n');
                }
            }

            let generated = self
                .with_timeout(self.generation.generate(GenerationRequest {
                    system_prompt,
                    messages: messages.clone(),
                    intent: GenerationIntent::Reply,
                }))
                .await
                .and_then(|text| {
                    if text.trim().is_empty() {
                        Err(ServiceError::EmptyOutput)
                    } else {
                        Ok(text)
                    }
                });
            let candidate = match generated {
                Ok(candidate) => candidate,
                // Service failures consume the attempt; a previously
                // repaired candidate can still be served at the end.
                Err(err) if attempt < max_attempts => {
                    tracing::warn!(attempt, error = %err, "generation failed, retrying");
                    continue;
                }
                Err(err) => match best_effort.take() {
                    Some((text, outcome)) => {
                        tracing::warn!(error = %err, "generation failed on final attempt");
                        return Ok((text, TurnOutcome::BestEffort, attempt, outcome.violations));
                    }
                    None => return Err(err.into()),
                },
            };

            let validation = self.validator.validate(&candidate, rules, history).await;
            if validation.is_valid() {
                return Ok((candidate, TurnOutcome::Accepted, attempt, Vec::new()));
            }

            let repaired = match self.repairer.repair(&candidate, &validation).await {
                // A blocking violation aborts the whole turn at once; it
                // is never patched around or regenerated past.
                Ok(RepairOutcome::Blocked { violations }) => {
                    tracing::warn!(attempt, "candidate blocked, aborting turn");
                    return Err(TurnError::Blocked { violations });
                }
                Ok(RepairOutcome::Repaired { text, .. }) => text,
                // A failed rewrite leaves the unrepaired candidate; it
                // still has violations, so it only survives as a last
                // resort.
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "repair failed");
                    candidate
                }
            };

            let recheck = self.validator.validate_local(&repaired, rules, history);
            if recheck.is_valid() {
                return Ok((repaired, TurnOutcome::Accepted, attempt, Vec::new()));
            }
            if recheck.has_critical() {
                // Text with a blocking violation is never served.
                return Err(TurnError::Blocked {
                    violations: recheck.violations,
                });
            }

            feedback = recheck
                .fix_instructions()
                .into_iter()
                .map(str::to_string)
                .collect();
            best_effort = Some((repaired, recheck));
            tracing::warn!(attempt, "repaired candidate still violates, retrying");
        }

        // Retry budget exhausted; serve the last repaired candidate.
        let (text, remaining) = match best_effort {
            Some((text, outcome)) => (text, outcome.violations),
            // Unreachable with max_attempts >= 1, but never panic here.
            None => (String::new(), Vec::new()),
        };
        Ok((text, TurnOutcome::BestEffort, max_attempts, remaining))
    }

    fn assemble_prompt(
        &self,
        state: &ConversationState,
        rules: &SelectedRuleSet<'_>,
        transition: &TransitionReport,
    ) -> String {
        let persona = self.selector.catalog().persona();
        let mut prompt = String::new();
        if !persona.name.is_empty() {
            prompt.push_str(&format!(
                "You are {}, {}. Speech style: {}.\n",
                persona.name, persona.role, persona.speech_style
            ));
        }
        prompt.push_str(&rules.summary);
        if let Some(proposal) = &transition.proposal {
            prompt.push_str("[This turn]\n");
            prompt.push_str(proposal);
            prompt.push('\n');
        }
        if !state.context_memories.is_empty() {
            prompt.push_str("[Things you remember]\n");
            for memory in &state.context_memories {
                prompt.push_str("- ");
                prompt.push_str(memory);
                prompt.push('\n');
            }
        }
        prompt
    }

    async fn classify(&self, utterance: &str, state: &ConversationState) -> Classification {
        match self
            .with_timeout(self.classification.classify(utterance, state))
            .await
        {
            Ok(classification) => classification,
            // Classification is an enrichment; a failure degrades the
            // turn rather than failing it.
            Err(err) => {
                tracing::warn!(error = %err, "classification failed, using neutral defaults");
                Classification::default()
            }
        }
    }

    async fn judge_consent(
        &self,
        utterance: &str,
        state: &ConversationState,
    ) -> Option<crate::domain::transition::ConsentJudgment> {
        let proposal_context = self
            .script
            .phase(&state.scenario.current_phase)
            .and_then(|phase| phase.proposal_prompt.clone())
            .unwrap_or_default();
        match self
            .with_timeout(
                self.classification
                    .judge_consent(utterance, &proposal_context),
            )
            .await
        {
            Ok(judgment) => Some(judgment),
            // Leave the proposal pending rather than guessing.
            Err(err) => {
                tracing::warn!(error = %err, "consent judgment failed, proposal stays pending");
                None
            }
        }
    }

    async fn commit(
        &self,
        state: &ConversationState,
        utterance: &str,
        reply: &str,
    ) -> Result<(), TurnError> {
        self.state_store.put(state).await?;
        self.memory_store
            .append(
                &state.user_id,
                HistoryEntry {
                    role: MessageRole::User,
                    content: utterance.to_string(),
                    recorded_at: utc_now(),
                },
            )
            .await?;
        self.memory_store
            .append(
                &state.user_id,
                HistoryEntry {
                    role: MessageRole::Assistant,
                    content: reply.to_string(),
                    recorded_at: utc_now(),
                },
            )
            .await?;
        Ok(())
    }

    async fn with_timeout<T>(
        &self,
        call: impl Future<Output = Result<T, ServiceError>>,
    ) -> Result<T, ServiceError> {
        let limit = Duration::from_secs(self.config.service_timeout_secs);
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Timeout(self.config.service_timeout_secs)),
        }
    }

    async fn user_lock(&self, user_id: &UserId) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        // Entries only the map still holds belong to idle users; prune
        // them so the map tracks in-flight turns, not the whole user
        // population.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(
            locks
                .entry(user_id.as_str().to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    #[cfg(test)]
    async fn lock_entries(&self) -> usize {
        self.user_locks.lock().await.len()
    }
}

fn prompt_messages(history: &[HistoryEntry], utterance: &str) -> Vec<Message> {
    let mut messages: Vec<Message> = history
        .iter()
        .map(|entry| Message {
            role: entry.role,
            content: entry.content.clone(),
        })
        .collect();
    messages.push(Message::user(utterance));
    messages
}
