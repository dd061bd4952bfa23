//! AST node types for the condition language.

use std::fmt;

/// A scalar value a condition clause can compare against.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Number(f64),
    Text(String),
    Flag(bool),
}

impl Scalar {
    /// Human-readable type name for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Scalar::Number(_) => "number",
            Scalar::Text(_) => "text",
            Scalar::Flag(_) => "flag",
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Number(n) => write!(f, "{}", n),
            Scalar::Text(s) => write!(f, "{}", s),
            Scalar::Flag(b) => write!(f, "{}", b),
        }
    }
}

/// The closed set of fields a condition may reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    TurnCountInPhase,
    Pleasure,
    Arousal,
    Dominance,
    ConsentForNextPhase,
    CurrentPhase,
    CurrentScene,
    /// A scenario variable by key (`variables.<key>` in document form).
    Variable(String),
    /// Keyword match against the user utterance.
    ContextKeywords,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::TurnCountInPhase => write!(f, "turn_count_in_phase"),
            Field::Pleasure => write!(f, "pleasure"),
            Field::Arousal => write!(f, "arousal"),
            Field::Dominance => write!(f, "dominance"),
            Field::ConsentForNextPhase => write!(f, "consent_for_next_phase"),
            Field::CurrentPhase => write!(f, "current_phase"),
            Field::CurrentScene => write!(f, "current_scene"),
            Field::Variable(key) => write!(f, "variables.{}", key),
            Field::ContextKeywords => write!(f, "context_keywords"),
        }
    }
}

/// A comparison applied to a resolved field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    /// Equality against a scalar (bare values and `$eq`).
    Eq(Scalar),
    /// Membership in a list (`$in`); for `context_keywords`, any listed
    /// keyword appearing in the utterance.
    In(Vec<Scalar>),
    /// Numeric orderings.
    Lte(f64),
    Gte(f64),
    Lt(f64),
    Gt(f64),
}

/// One field/comparison pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub field: Field,
    pub cmp: Comparison,
}

/// A condition: the conjunction of its clauses.
///
/// The language has no disjunction or negation on purpose; this keeps
/// consent relaxation monotonic (see [`Condition::pins_consent_false`])
/// and the evaluator trivially total.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Condition {
    pub(super) clauses: Vec<Clause>,
}

impl Condition {
    /// A condition with no clauses, which always holds.
    pub fn always() -> Self {
        Self::default()
    }

    /// Builds a condition from explicit clauses (mainly for tests).
    pub fn from_clauses(clauses: Vec<Clause>) -> Self {
        Self { clauses }
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// True if some clause on `consent_for_next_phase` can never be
    /// satisfied while consent is granted.
    ///
    /// Since conditions are pure conjunctions, this is the only shape in
    /// which granting consent could fail to relax the predicate. Trigger
    /// conditions with this shape would propose forever without ever
    /// transitioning, so the scenario loader rejects them.
    pub fn pins_consent_false(&self) -> bool {
        self.clauses
            .iter()
            .filter(|clause| clause.field == Field::ConsentForNextPhase)
            .any(|clause| match &clause.cmp {
                Comparison::Eq(Scalar::Flag(true)) => false,
                Comparison::In(values) => !values.contains(&Scalar::Flag(true)),
                // Equality to false, to a non-flag, or a numeric ordering
                // on a flag: none of these can hold with consent granted.
                _ => true,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_condition_is_always() {
        assert!(Condition::always().is_empty());
    }

    #[test]
    fn consent_eq_true_is_monotonic() {
        let cond = Condition::from_clauses(vec![Clause {
            field: Field::ConsentForNextPhase,
            cmp: Comparison::Eq(Scalar::Flag(true)),
        }]);
        assert!(!cond.pins_consent_false());
    }

    #[test]
    fn consent_eq_false_is_pinned() {
        let cond = Condition::from_clauses(vec![Clause {
            field: Field::ConsentForNextPhase,
            cmp: Comparison::Eq(Scalar::Flag(false)),
        }]);
        assert!(cond.pins_consent_false());
    }

    #[test]
    fn consent_in_without_true_is_pinned() {
        let cond = Condition::from_clauses(vec![Clause {
            field: Field::ConsentForNextPhase,
            cmp: Comparison::In(vec![Scalar::Flag(false)]),
        }]);
        assert!(cond.pins_consent_false());
    }

    #[test]
    fn clauses_on_other_fields_are_not_pinned() {
        let cond = Condition::from_clauses(vec![Clause {
            field: Field::TurnCountInPhase,
            cmp: Comparison::Gte(3.0),
        }]);
        assert!(!cond.pins_consent_false());
    }
}
