//! Scenario position and per-user conversation state.
//!
//! `ScenarioState` tracks where the dialogue sits inside the authored
//! scenario (phase, scene, turn counter, free-form variables), and
//! `ConversationState` is the full per-user record the pipeline loads,
//! mutates once per turn, and persists.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::affect::AffectState;
use super::foundation::{utc_now, UserId};

/// Reserved variable: a phase proposal has been made and the engine is
/// waiting for an explicit user answer.
pub const VAR_AWAITING_CONSENT: &str = "awaiting_consent";
/// Reserved variable: the user affirmed the pending phase proposal.
pub const VAR_CONSENT_FOR_NEXT_PHASE: &str = "consent_for_next_phase";

/// Position within the authored scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioState {
    /// Coarse scenario position (phase identifier).
    pub current_phase: String,
    /// Fine scenario position within the phase (scene identifier).
    pub current_scene: String,
    /// Turns processed since the phase was entered.
    #[serde(default)]
    pub turn_count_in_phase: u32,
    /// Free-form scalar variables and flags set by the scenario or
    /// extracted from utterances. Two keys are reserved for the consent
    /// handshake; use the typed accessors instead of string lookups.
    #[serde(default)]
    pub variables: HashMap<String, Value>,
}

impl ScenarioState {
    /// Creates a scenario state positioned at the given phase and scene.
    pub fn at(phase: impl Into<String>, scene: impl Into<String>) -> Self {
        Self {
            current_phase: phase.into(),
            current_scene: scene.into(),
            turn_count_in_phase: 0,
            variables: HashMap::new(),
        }
    }

    fn flag(&self, key: &str) -> bool {
        matches!(self.variables.get(key), Some(Value::Bool(true)))
    }

    fn set_flag(&mut self, key: &str, value: bool) {
        self.variables.insert(key.to_string(), Value::Bool(value));
    }

    /// True if a phase proposal is pending a user answer.
    pub fn awaiting_consent(&self) -> bool {
        self.flag(VAR_AWAITING_CONSENT)
    }

    /// Marks a phase proposal as pending (or clears it).
    pub fn set_awaiting_consent(&mut self, value: bool) {
        self.set_flag(VAR_AWAITING_CONSENT, value);
    }

    /// True if the user affirmed the pending phase proposal.
    pub fn consent_for_next_phase(&self) -> bool {
        self.flag(VAR_CONSENT_FOR_NEXT_PHASE)
    }

    /// Records (or clears) the user's answer to the pending proposal.
    pub fn set_consent_for_next_phase(&mut self, value: bool) {
        self.set_flag(VAR_CONSENT_FOR_NEXT_PHASE, value);
    }

    /// Moves to a new phase: updates phase and scene, zeroes the turn
    /// counter, and clears both consent flags.
    pub fn enter_phase(&mut self, phase: impl Into<String>, first_scene: impl Into<String>) {
        self.current_phase = phase.into();
        self.current_scene = first_scene.into();
        self.turn_count_in_phase = 0;
        self.set_awaiting_consent(false);
        self.set_consent_for_next_phase(false);
    }

    /// Merges extracted variables into the state. Reserved consent keys
    /// are ignored; only the transition engine may touch those.
    pub fn merge_variables(&mut self, extracted: &HashMap<String, Value>) {
        for (key, value) in extracted {
            if key == VAR_AWAITING_CONSENT || key == VAR_CONSENT_FOR_NEXT_PHASE {
                continue;
            }
            self.variables.insert(key.clone(), value.clone());
        }
    }
}

/// The full per-user dialogue state record.
///
/// Created with defaults on a user's first turn, mutated exactly once per
/// turn by the transition engine, and persisted by the state store after
/// the turn commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    /// The user this record belongs to.
    pub user_id: UserId,
    /// ISO 8601 UTC timestamp of the last mutation.
    pub updated_at: String,
    /// Current affective state.
    #[serde(default)]
    pub affect: AffectState,
    /// Current scenario position.
    pub scenario: ScenarioState,
    /// Retrieved long-term facts cached for prompt injection this turn.
    #[serde(default)]
    pub context_memories: Vec<String>,
}

impl ConversationState {
    /// Creates a fresh state for a user at the given scenario position
    /// with neutral affect.
    pub fn new(user_id: UserId, phase: impl Into<String>, scene: impl Into<String>) -> Self {
        Self {
            user_id,
            updated_at: utc_now(),
            affect: AffectState::neutral(),
            scenario: ScenarioState::at(phase, scene),
            context_memories: Vec::new(),
        }
    }

    /// Clears affect and scenario back to defaults, keeping the user
    /// binding. Used by an explicit session reset.
    pub fn reset(&mut self, phase: impl Into<String>, scene: impl Into<String>) {
        self.affect = AffectState::neutral();
        self.scenario = ScenarioState::at(phase, scene);
        self.context_memories.clear();
        self.touch();
    }

    /// Refreshes the last-updated timestamp.
    pub fn touch(&mut self) {
        self.updated_at = utc_now();
    }
}
