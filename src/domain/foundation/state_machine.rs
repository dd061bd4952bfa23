//! State machine trait for status enums.
//!
//! Provides a consistent interface for validating and performing state
//! transitions on the small lifecycle enums in this crate (the per-phase
//! transition stage in particular).

use super::ValidationError;

/// Trait for status enums that represent state machines.
///
/// Implementors define valid state transitions and get validated
/// transition methods for free.
pub trait StateMachine: Sized + Copy + PartialEq + std::fmt::Debug {
    /// Returns true if transition from self to target is valid.
    fn can_transition_to(&self, target: &Self) -> bool;

    /// Returns all valid target states from current state.
    fn valid_transitions(&self) -> Vec<Self>;

    /// Performs transition with validation, returning error if invalid.
    fn transition_to(&self, target: Self) -> Result<Self, ValidationError> {
        if self.can_transition_to(&target) {
            Ok(target)
        } else {
            Err(ValidationError::invalid_format(
                "state_transition",
                format!("Cannot transition from {:?} to {:?}", self, target),
            ))
        }
    }

    /// Checks if current state is terminal (no valid outgoing transitions).
    fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Stage {
        Idle,
        Pending,
        Done,
    }

    impl StateMachine for Stage {
        fn can_transition_to(&self, target: &Self) -> bool {
            use Stage::*;
            matches!(
                (self, target),
                (Idle, Pending) | (Pending, Idle) | (Idle, Done) | (Pending, Done)
            )
        }

        fn valid_transitions(&self) -> Vec<Self> {
            use Stage::*;
            match self {
                Idle => vec![Pending, Done],
                Pending => vec![Idle, Done],
                Done => vec![],
            }
        }
    }

    #[test]
    fn transition_to_succeeds_for_valid_transition() {
        assert_eq!(Stage::Idle.transition_to(Stage::Pending), Ok(Stage::Pending));
    }

    #[test]
    fn transition_to_fails_for_invalid_transition() {
        assert!(Stage::Done.transition_to(Stage::Idle).is_err());
    }

    #[test]
    fn is_terminal_only_for_done() {
        assert!(Stage::Done.is_terminal());
        assert!(!Stage::Idle.is_terminal());
        assert!(!Stage::Pending.is_terminal());
    }

    #[test]
    fn can_transition_to_is_consistent_with_valid_transitions() {
        for stage in [Stage::Idle, Stage::Pending, Stage::Done] {
            for target in stage.valid_transitions() {
                assert!(
                    stage.can_transition_to(&target),
                    "can_transition_to should return true for {:?} -> {:?}",
                    stage,
                    target
                );
            }
        }
    }
}
