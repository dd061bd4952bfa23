//! The authored scenario script: an ordered graph of phases and scenes.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::domain::condition::Condition;
use crate::domain::rules::CatalogError;

#[derive(Debug, Deserialize)]
struct RawPhase {
    id: String,
    /// Scenes in authored order; the first is the entry scene.
    scenes: Vec<String>,
    #[serde(default)]
    trigger: Option<Value>,
    #[serde(default)]
    next_phase: Option<String>,
    #[serde(default)]
    proposal_prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawScript {
    initial_phase: String,
    phases: Vec<RawPhase>,
}

/// One phase of the scenario: its scenes, and how it advances.
///
/// A phase with a `trigger` and `next_phase` can advance; a phase with
/// neither is terminal. The combinations in between are rejected at load.
#[derive(Debug, Clone)]
pub struct PhaseDefinition {
    pub id: String,
    pub scenes: Vec<String>,
    pub trigger: Option<Condition>,
    pub next_phase: Option<String>,
    pub proposal_prompt: Option<String>,
}

impl PhaseDefinition {
    pub fn first_scene(&self) -> &str {
        // Non-empty is enforced at load.
        &self.scenes[0]
    }

    pub fn is_terminal(&self) -> bool {
        self.next_phase.is_none()
    }
}

/// The loaded, validated scenario script. Immutable after load.
#[derive(Debug)]
pub struct ScenarioScript {
    initial_phase: String,
    phases: Vec<PhaseDefinition>,
}

impl ScenarioScript {
    /// Loads and validates the script from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: PathBuf::from(path),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Parses and validates the script from a JSON string.
    pub fn from_json_str(text: &str) -> Result<Self, CatalogError> {
        let raw: RawScript = serde_json::from_str(text)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawScript) -> Result<Self, CatalogError> {
        let mut ids = HashSet::new();
        for phase in &raw.phases {
            if !ids.insert(phase.id.clone()) {
                return Err(CatalogError::InvalidPhase {
                    id: phase.id.clone(),
                    reason: "duplicate phase id".into(),
                });
            }
        }

        let mut phases = Vec::with_capacity(raw.phases.len());
        for phase in raw.phases {
            if phase.scenes.is_empty() {
                return Err(CatalogError::InvalidPhase {
                    id: phase.id,
                    reason: "phase has no scenes".into(),
                });
            }
            match (&phase.trigger, &phase.next_phase) {
                (Some(_), None) => {
                    return Err(CatalogError::InvalidPhase {
                        id: phase.id,
                        reason: "trigger without next_phase".into(),
                    })
                }
                (None, Some(_)) => {
                    return Err(CatalogError::InvalidPhase {
                        id: phase.id,
                        reason: "next_phase without trigger".into(),
                    })
                }
                _ => {}
            }
            if let Some(next) = &phase.next_phase {
                if !ids.contains(next) {
                    return Err(CatalogError::UnknownNextPhase {
                        phase: phase.id,
                        next: next.clone(),
                    });
                }
            }

            let trigger = phase
                .trigger
                .as_ref()
                .map(|doc| {
                    Condition::from_json(doc).map_err(|source| CatalogError::InvalidCondition {
                        id: phase.id.clone(),
                        source,
                    })
                })
                .transpose()?;

            // A trigger that requires consent to stay false can never be
            // satisfied once a proposal has been accepted.
            if let Some(trigger) = &trigger {
                if trigger.pins_consent_false() {
                    return Err(CatalogError::NonMonotonicConsent {
                        phase: phase.id,
                    });
                }
            }

            phases.push(PhaseDefinition {
                id: phase.id,
                scenes: phase.scenes,
                trigger,
                next_phase: phase.next_phase,
                proposal_prompt: phase.proposal_prompt,
            });
        }

        if !ids.contains(&raw.initial_phase) {
            return Err(CatalogError::UnknownInitialPhase(raw.initial_phase));
        }

        tracing::info!(
            phases = phases.len(),
            initial = %raw.initial_phase,
            "scenario script loaded"
        );

        Ok(Self {
            initial_phase: raw.initial_phase,
            phases,
        })
    }

    /// The phase a fresh conversation starts in.
    pub fn initial_phase(&self) -> &PhaseDefinition {
        // Existence is enforced at load.
        self.phases
            .iter()
            .find(|p| p.id == self.initial_phase)
            .unwrap_or(&self.phases[0])
    }

    pub fn phase(&self, id: &str) -> Option<&PhaseDefinition> {
        self.phases.iter().find(|p| p.id == id)
    }

    pub fn phases(&self) -> &[PhaseDefinition] {
        &self.phases
    }
}
