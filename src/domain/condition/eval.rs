//! Condition evaluation against the per-turn context.

use serde_json::Value;
use thiserror::Error;

use super::ast::{Clause, Comparison, Condition, Field, Scalar};
use crate::domain::scenario::ConversationState;

/// Errors raised while evaluating a condition. Evaluation errors are
/// fail-closed: callers log them and treat the condition as unsatisfied.
#[derive(Debug, Clone, Error)]
pub enum ConditionError {
    #[error("variable '{0}' is not set")]
    UnknownVariable(String),

    #[error("type mismatch on '{field}': cannot compare {actual} with {expected}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("variable '{field}' holds a non-scalar value")]
    NonScalarVariable { field: String },
}

/// The fixed variable set a condition is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    state: &'a ConversationState,
    utterance: &'a str,
    assume_consent: bool,
}

impl<'a> EvalContext<'a> {
    /// Context over the current state and the incoming utterance.
    pub fn new(state: &'a ConversationState, utterance: &'a str) -> Self {
        Self {
            state,
            utterance,
            assume_consent: false,
        }
    }

    /// The same context with `consent_for_next_phase` hypothetically
    /// forced true. Used by the transition engine to detect conditions
    /// where consent is the only missing ingredient.
    pub fn assuming_consent(self) -> Self {
        Self {
            assume_consent: true,
            ..self
        }
    }

    fn resolve(&self, field: &Field) -> Result<Scalar, ConditionError> {
        match field {
            Field::TurnCountInPhase => Ok(Scalar::Number(
                f64::from(self.state.scenario.turn_count_in_phase),
            )),
            Field::Pleasure => Ok(Scalar::Number(self.state.affect.pleasure)),
            Field::Arousal => Ok(Scalar::Number(self.state.affect.arousal)),
            Field::Dominance => Ok(Scalar::Number(self.state.affect.dominance)),
            Field::ConsentForNextPhase => Ok(Scalar::Flag(
                self.assume_consent || self.state.scenario.consent_for_next_phase(),
            )),
            Field::CurrentPhase => Ok(Scalar::Text(self.state.scenario.current_phase.clone())),
            Field::CurrentScene => Ok(Scalar::Text(self.state.scenario.current_scene.clone())),
            Field::Variable(key) => {
                let value = self
                    .state
                    .scenario
                    .variables
                    .get(key)
                    .ok_or_else(|| ConditionError::UnknownVariable(key.clone()))?;
                scalar_from_value(field, value)
            }
            Field::ContextKeywords => Ok(Scalar::Text(self.utterance.to_string())),
        }
    }
}

impl Condition {
    /// Evaluates the condition, surfacing type mismatches and unknown
    /// variables as errors. Prefer [`Condition::holds`] unless the caller
    /// needs to distinguish "false" from "broken".
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<bool, ConditionError> {
        for clause in self.clauses() {
            if !evaluate_clause(clause, ctx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Fail-closed evaluation: an evaluation error is logged and reads as
    /// "not satisfied".
    pub fn holds(&self, ctx: &EvalContext<'_>) -> bool {
        match self.evaluate(ctx) {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(error = %err, "condition evaluation failed, treating as false");
                false
            }
        }
    }
}

fn evaluate_clause(clause: &Clause, ctx: &EvalContext<'_>) -> Result<bool, ConditionError> {
    let actual = ctx.resolve(&clause.field)?;

    // Keyword clauses are substring matches against the utterance, not
    // scalar equality.
    if clause.field == Field::ContextKeywords {
        return match (&actual, &clause.cmp) {
            (Scalar::Text(utterance), Comparison::In(keywords)) => Ok(keywords.iter().any(
                |keyword| matches!(keyword, Scalar::Text(kw) if utterance.contains(kw.as_str())),
            )),
            _ => Err(mismatch(&clause.field, "keyword list", actual.kind())),
        };
    }

    match &clause.cmp {
        Comparison::Eq(expected) => scalars_equal(&clause.field, &actual, expected),
        Comparison::In(values) => {
            for value in values {
                if scalars_equal(&clause.field, &actual, value)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Comparison::Lte(bound) => Ok(numeric(&clause.field, &actual)? <= *bound),
        Comparison::Gte(bound) => Ok(numeric(&clause.field, &actual)? >= *bound),
        Comparison::Lt(bound) => Ok(numeric(&clause.field, &actual)? < *bound),
        Comparison::Gt(bound) => Ok(numeric(&clause.field, &actual)? > *bound),
    }
}

fn scalars_equal(field: &Field, actual: &Scalar, expected: &Scalar) -> Result<bool, ConditionError> {
    match (actual, expected) {
        (Scalar::Number(a), Scalar::Number(b)) => Ok(a == b),
        (Scalar::Text(a), Scalar::Text(b)) => Ok(a == b),
        (Scalar::Flag(a), Scalar::Flag(b)) => Ok(a == b),
        _ => Err(mismatch(field, expected.kind(), actual.kind())),
    }
}

fn numeric(field: &Field, actual: &Scalar) -> Result<f64, ConditionError> {
    match actual {
        Scalar::Number(n) => Ok(*n),
        other => Err(mismatch(field, "number", other.kind())),
    }
}

fn scalar_from_value(field: &Field, value: &Value) -> Result<Scalar, ConditionError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .map(Scalar::Number)
            .ok_or_else(|| ConditionError::NonScalarVariable {
                field: field.to_string(),
            }),
        Value::String(s) => Ok(Scalar::Text(s.clone())),
        Value::Bool(b) => Ok(Scalar::Flag(*b)),
        _ => Err(ConditionError::NonScalarVariable {
            field: field.to_string(),
        }),
    }
}

fn mismatch(field: &Field, expected: &'static str, actual: &'static str) -> ConditionError {
    ConditionError::TypeMismatch {
        field: field.to_string(),
        expected,
        actual,
    }
}
