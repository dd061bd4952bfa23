//! Scenario script and phase transition engine.
//!
//! The script declares the authored phase graph; the engine applies one
//! turn's worth of observations to the conversation state and drives the
//! propose-then-consent handshake between phases.

mod engine;
mod script;

pub use engine::{
    ConsentJudgment, PhaseTransitionEngine, TransitionReport, TransitionStage, TurnObservation,
};
pub use script::{PhaseDefinition, ScenarioScript};
