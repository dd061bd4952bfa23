//! Continuous affect model.
//!
//! Three bounded scalars following the PAD (Pleasure-Arousal-Dominance)
//! representation. Pleasure and arousal are transient moods that decay
//! toward zero between turns; dominance is treated as a stable trait and
//! never decays.

use serde::{Deserialize, Serialize};

/// Lower bound of every affect axis.
pub const AFFECT_MIN: f64 = -10.0;
/// Upper bound of every affect axis.
pub const AFFECT_MAX: f64 = 10.0;

/// The persona's current affective state.
///
/// All three axes are kept inside `[AFFECT_MIN, AFFECT_MAX]`; every
/// mutating method clamps before returning.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AffectState {
    /// Pleasure (+10) vs displeasure (-10).
    #[serde(default)]
    pub pleasure: f64,
    /// Arousal (+10) vs calm (-10).
    #[serde(default)]
    pub arousal: f64,
    /// Dominance (+10) vs submission (-10).
    #[serde(default)]
    pub dominance: f64,
}

/// A signed adjustment to apply to the affect state, typically extracted
/// from the user utterance by the classification service.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AffectDelta {
    #[serde(default)]
    pub pleasure: f64,
    #[serde(default)]
    pub arousal: f64,
    #[serde(default)]
    pub dominance: f64,
}

impl AffectState {
    /// Creates a neutral affect state (all axes at zero).
    pub fn neutral() -> Self {
        Self::default()
    }

    /// Creates an affect state from raw axis values, clamped into range.
    pub fn new(pleasure: f64, arousal: f64, dominance: f64) -> Self {
        let mut state = Self {
            pleasure,
            arousal,
            dominance,
        };
        state.clamp();
        state
    }

    /// Clamps every axis into `[AFFECT_MIN, AFFECT_MAX]`.
    pub fn clamp(&mut self) {
        self.pleasure = self.pleasure.clamp(AFFECT_MIN, AFFECT_MAX);
        self.arousal = self.arousal.clamp(AFFECT_MIN, AFFECT_MAX);
        self.dominance = self.dominance.clamp(AFFECT_MIN, AFFECT_MAX);
    }

    /// Adds a signed delta to each axis, then clamps.
    pub fn apply(&mut self, delta: AffectDelta) {
        self.pleasure += delta.pleasure;
        self.arousal += delta.arousal;
        self.dominance += delta.dominance;
        self.clamp();
    }

    /// Decays pleasure and arousal toward zero by a factor of
    /// `1 - rate * 0.1`. Dominance is a trait, not a mood, and is left
    /// untouched.
    pub fn decay(&mut self, rate: f64) {
        let factor = 1.0 - rate * 0.1;
        self.pleasure *= factor;
        self.arousal *= factor;
        self.clamp();
    }

    /// Returns true if every axis is within the model bounds.
    pub fn in_bounds(&self) -> bool {
        let within = |v: f64| (AFFECT_MIN..=AFFECT_MAX).contains(&v);
        within(self.pleasure) && within(self.arousal) && within(self.dominance)
    }
}
