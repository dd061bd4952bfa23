//! Per-turn state observation and the phase consent handshake.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::affect::AffectDelta;
use crate::domain::condition::EvalContext;
use crate::domain::foundation::StateMachine;
use crate::domain::scenario::ConversationState;

use super::script::ScenarioScript;

/// The classification service's verdict on a pending phase proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentJudgment {
    pub consent: bool,
    /// In `[0.0, 1.0]`; verdicts below the engine threshold are ignored.
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

/// Everything observed about the incoming utterance that the engine
/// folds into the state this turn.
#[derive(Debug, Clone, Default)]
pub struct TurnObservation {
    pub affect_delta: AffectDelta,
    pub extracted_variables: HashMap<String, Value>,
    /// Present only when a proposal was pending and the classifier was
    /// asked to judge the user's answer.
    pub consent: Option<ConsentJudgment>,
}

/// Where the turn left the phase machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionStage {
    /// No transition activity this turn.
    Active,
    /// A phase proposal is pending the user's answer.
    Proposing,
    /// The phase changed this turn.
    Transitioned,
}

impl StateMachine for TransitionStage {
    fn can_transition_to(&self, target: &Self) -> bool {
        use TransitionStage::*;
        matches!(
            (self, target),
            (Active, Proposing) | (Active, Transitioned) | (Proposing, Active) | (Proposing, Transitioned)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use TransitionStage::*;
        match self {
            Active => vec![Proposing, Transitioned],
            Proposing => vec![Active, Transitioned],
            Transitioned => vec![],
        }
    }
}

/// What the transition engine did this turn, for prompt assembly and
/// the turn reply.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionReport {
    pub stage: TransitionStage,
    /// Authored prompt for a proposal raised this turn.
    pub proposal: Option<String>,
    /// The phase entered this turn, if any.
    pub transitioned_to: Option<String>,
}

impl TransitionReport {
    fn active() -> Self {
        Self {
            stage: TransitionStage::Active,
            proposal: None,
            transitioned_to: None,
        }
    }
}

/// Applies one turn's observation to the conversation state and drives
/// phase transitions through the two-step propose-then-consent handshake.
#[derive(Debug, Clone)]
pub struct PhaseTransitionEngine {
    script: Arc<ScenarioScript>,
    consent_threshold: f64,
    decay_rate: f64,
}

impl PhaseTransitionEngine {
    pub fn new(script: Arc<ScenarioScript>, consent_threshold: f64, decay_rate: f64) -> Self {
        Self {
            script,
            consent_threshold,
            decay_rate,
        }
    }

    pub fn script(&self) -> &Arc<ScenarioScript> {
        &self.script
    }

    /// Folds the observation into the state and advances the phase
    /// machinery. The state is mutated exactly once per turn, here:
    ///
    /// 1. affect delta applied, then decay
    /// 2. extracted variables merged (reserved keys ignored)
    /// 3. a pending proposal resolved against the consent judgment
    /// 4. the phase trigger evaluated; transition, or proposal when
    ///    consent is the only missing ingredient
    /// 5. turn counter incremented
    pub fn advance(
        &self,
        state: &mut ConversationState,
        utterance: &str,
        observation: &TurnObservation,
    ) -> TransitionReport {
        state.affect.apply(observation.affect_delta);
        state.affect.decay(self.decay_rate);
        state.scenario.merge_variables(&observation.extracted_variables);

        if state.scenario.awaiting_consent() {
            self.resolve_pending_proposal(state, observation.consent.as_ref());
        }

        let report = self.evaluate_trigger(state, utterance);

        state.scenario.turn_count_in_phase += 1;
        state.touch();
        report
    }

    fn resolve_pending_proposal(
        &self,
        state: &mut ConversationState,
        judgment: Option<&ConsentJudgment>,
    ) {
        let Some(judgment) = judgment else {
            return;
        };
        if judgment.consent && judgment.confidence >= self.consent_threshold {
            state.scenario.set_consent_for_next_phase(true);
        } else {
            // Anything short of a confident yes (a refusal, or an answer
            // the classifier could not read) withdraws the proposal; it
            // may be raised again on a later turn.
            state.scenario.set_awaiting_consent(false);
            state.scenario.set_consent_for_next_phase(false);
            tracing::info!(
                consent = judgment.consent,
                confidence = judgment.confidence,
                reasoning = %judgment.reasoning,
                "phase proposal withdrawn"
            );
        }
    }

    fn evaluate_trigger(&self, state: &mut ConversationState, utterance: &str) -> TransitionReport {
        let Some(phase) = self.script.phase(&state.scenario.current_phase) else {
            tracing::warn!(
                phase = %state.scenario.current_phase,
                "state references a phase missing from the script"
            );
            return TransitionReport::active();
        };
        let (Some(trigger), Some(next_id)) = (&phase.trigger, &phase.next_phase) else {
            return TransitionReport::active();
        };

        let ctx = EvalContext::new(state, utterance);
        if trigger.holds(&ctx) {
            // Existence of next_id is validated at script load.
            let Some(next) = self.script.phase(next_id) else {
                return TransitionReport::active();
            };
            let entered = next.id.clone();
            let first_scene = next.first_scene().to_string();
            state.scenario.enter_phase(entered.clone(), first_scene);
            tracing::info!(from = %phase.id, to = %entered, "phase transition");
            return TransitionReport {
                stage: TransitionStage::Transitioned,
                proposal: None,
                transitioned_to: Some(entered),
            };
        }

        if state.scenario.awaiting_consent() {
            return TransitionReport {
                stage: TransitionStage::Proposing,
                proposal: None,
                transitioned_to: None,
            };
        }

        // Propose only when consent is the sole missing ingredient.
        if trigger.holds(&ctx.assuming_consent()) {
            state.scenario.set_awaiting_consent(true);
            tracing::info!(phase = %phase.id, "raising phase proposal");
            return TransitionReport {
                stage: TransitionStage::Proposing,
                proposal: phase.proposal_prompt.clone(),
                transitioned_to: None,
            };
        }

        TransitionReport::active()
    }
}
