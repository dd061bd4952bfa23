//! Load-time parsing of the JSON document form into the condition AST.

use serde_json::Value;
use thiserror::Error;

use super::ast::{Clause, Comparison, Condition, Field, Scalar};

/// Errors raised while parsing a condition document. These are
/// configuration errors: they surface at catalog load and prevent serving.
#[derive(Debug, Clone, Error)]
pub enum ConditionParseError {
    #[error("condition must be a JSON object, got {0}")]
    NotAnObject(String),

    #[error("unknown condition field '{0}'")]
    UnknownField(String),

    #[error("unknown operator '{op}' on field '{field}'")]
    UnknownOperator { field: String, op: String },

    #[error("operator '{op}' on field '{field}' requires a numeric operand")]
    NonNumericOperand { field: String, op: String },

    #[error("field '{field}' has an unsupported operand: {reason}")]
    InvalidOperand { field: String, reason: String },
}

impl Condition {
    /// Parses the MongoDB-style JSON document form.
    ///
    /// `{}` parses to the always-true condition. Each key contributes one
    /// or more clauses; an operator object may carry several operators
    /// (`{"$gte": 1, "$lte": 5}` becomes two clauses).
    pub fn from_json(doc: &Value) -> Result<Self, ConditionParseError> {
        let map = doc
            .as_object()
            .ok_or_else(|| ConditionParseError::NotAnObject(type_name(doc).to_string()))?;

        let mut clauses = Vec::new();
        for (key, value) in map {
            match key.as_str() {
                "turn_count_in_phase" => {
                    parse_comparisons(Field::TurnCountInPhase, value, &mut clauses)?
                }
                "pleasure" => parse_comparisons(Field::Pleasure, value, &mut clauses)?,
                "arousal" => parse_comparisons(Field::Arousal, value, &mut clauses)?,
                "dominance" => parse_comparisons(Field::Dominance, value, &mut clauses)?,
                "consent_for_next_phase" => {
                    parse_comparisons(Field::ConsentForNextPhase, value, &mut clauses)?
                }
                "current_phase" => parse_comparisons(Field::CurrentPhase, value, &mut clauses)?,
                "current_scene" => parse_comparisons(Field::CurrentScene, value, &mut clauses)?,
                "context_keywords" => clauses.push(parse_context_keywords(value)?),
                "variables" => parse_variables(value, &mut clauses)?,
                other => return Err(ConditionParseError::UnknownField(other.to_string())),
            }
        }
        Ok(Condition::from_clauses(clauses))
    }
}

fn parse_comparisons(
    field: Field,
    value: &Value,
    out: &mut Vec<Clause>,
) -> Result<(), ConditionParseError> {
    match value {
        Value::Object(ops) => {
            for (op, operand) in ops {
                out.push(Clause {
                    cmp: parse_operator(&field, op, operand)?,
                    field: field.clone(),
                });
            }
            Ok(())
        }
        // Bare scalar means plain equality.
        other => {
            out.push(Clause {
                cmp: Comparison::Eq(parse_scalar(&field, other)?),
                field,
            });
            Ok(())
        }
    }
}

fn parse_operator(
    field: &Field,
    op: &str,
    operand: &Value,
) -> Result<Comparison, ConditionParseError> {
    match op {
        "$eq" => Ok(Comparison::Eq(parse_scalar(field, operand)?)),
        "$in" => {
            let items = operand.as_array().ok_or_else(|| {
                ConditionParseError::InvalidOperand {
                    field: field.to_string(),
                    reason: "$in requires a list".to_string(),
                }
            })?;
            let values = items
                .iter()
                .map(|item| parse_scalar(field, item))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Comparison::In(values))
        }
        "$lte" => Ok(Comparison::Lte(numeric_operand(field, op, operand)?)),
        "$gte" => Ok(Comparison::Gte(numeric_operand(field, op, operand)?)),
        "$lt" => Ok(Comparison::Lt(numeric_operand(field, op, operand)?)),
        "$gt" => Ok(Comparison::Gt(numeric_operand(field, op, operand)?)),
        other => Err(ConditionParseError::UnknownOperator {
            field: field.to_string(),
            op: other.to_string(),
        }),
    }
}

fn numeric_operand(field: &Field, op: &str, operand: &Value) -> Result<f64, ConditionParseError> {
    operand
        .as_f64()
        .ok_or_else(|| ConditionParseError::NonNumericOperand {
            field: field.to_string(),
            op: op.to_string(),
        })
}

fn parse_scalar(field: &Field, value: &Value) -> Result<Scalar, ConditionParseError> {
    match value {
        Value::Number(n) => n.as_f64().map(Scalar::Number).ok_or_else(|| {
            ConditionParseError::InvalidOperand {
                field: field.to_string(),
                reason: "number out of f64 range".to_string(),
            }
        }),
        Value::String(s) => Ok(Scalar::Text(s.clone())),
        Value::Bool(b) => Ok(Scalar::Flag(*b)),
        other => Err(ConditionParseError::InvalidOperand {
            field: field.to_string(),
            reason: format!("expected scalar, got {}", type_name(other)),
        }),
    }
}

fn parse_context_keywords(value: &Value) -> Result<Clause, ConditionParseError> {
    let field = Field::ContextKeywords;
    let items = value
        .as_array()
        .ok_or_else(|| ConditionParseError::InvalidOperand {
            field: field.to_string(),
            reason: "context_keywords requires a list of strings".to_string(),
        })?;
    let keywords = items
        .iter()
        .map(|item| match item {
            Value::String(s) => Ok(Scalar::Text(s.clone())),
            other => Err(ConditionParseError::InvalidOperand {
                field: field.to_string(),
                reason: format!("keyword must be a string, got {}", type_name(other)),
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Clause {
        field,
        cmp: Comparison::In(keywords),
    })
}

fn parse_variables(value: &Value, out: &mut Vec<Clause>) -> Result<(), ConditionParseError> {
    let map = value
        .as_object()
        .ok_or_else(|| ConditionParseError::InvalidOperand {
            field: "variables".to_string(),
            reason: "variables requires a nested object".to_string(),
        })?;
    for (key, nested) in map {
        parse_comparisons(Field::Variable(key.clone()), nested, out)?;
    }
    Ok(())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_object_parses_to_always() {
        let cond = Condition::from_json(&json!({})).unwrap();
        assert!(cond.is_empty());
    }

    #[test]
    fn bare_scalar_parses_to_equality() {
        let cond = Condition::from_json(&json!({"current_phase": "phase_date"})).unwrap();
        assert_eq!(
            cond.clauses(),
            &[Clause {
                field: Field::CurrentPhase,
                cmp: Comparison::Eq(Scalar::Text("phase_date".into())),
            }]
        );
    }

    #[test]
    fn operator_object_parses_each_operator() {
        let cond =
            Condition::from_json(&json!({"turn_count_in_phase": {"$gte": 1, "$lte": 5}})).unwrap();
        assert_eq!(cond.clauses().len(), 2);
        assert!(cond.clauses().contains(&Clause {
            field: Field::TurnCountInPhase,
            cmp: Comparison::Gte(1.0),
        }));
        assert!(cond.clauses().contains(&Clause {
            field: Field::TurnCountInPhase,
            cmp: Comparison::Lte(5.0),
        }));
    }

    #[test]
    fn in_operator_parses_list() {
        let cond =
            Condition::from_json(&json!({"current_phase": {"$in": ["phase_a", "phase_b"]}}))
                .unwrap();
        assert_eq!(
            cond.clauses(),
            &[Clause {
                field: Field::CurrentPhase,
                cmp: Comparison::In(vec![
                    Scalar::Text("phase_a".into()),
                    Scalar::Text("phase_b".into())
                ]),
            }]
        );
    }

    #[test]
    fn variables_parse_as_nested_fields() {
        let cond =
            Condition::from_json(&json!({"variables": {"gift_received": true}})).unwrap();
        assert_eq!(
            cond.clauses(),
            &[Clause {
                field: Field::Variable("gift_received".into()),
                cmp: Comparison::Eq(Scalar::Flag(true)),
            }]
        );
    }

    #[test]
    fn context_keywords_parse_as_membership() {
        let cond =
            Condition::from_json(&json!({"context_keywords": ["angry", "shut up"]})).unwrap();
        assert_eq!(cond.clauses().len(), 1);
        assert!(matches!(
            &cond.clauses()[0].cmp,
            Comparison::In(values) if values.len() == 2
        ));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err = Condition::from_json(&json!({"mood": 5})).unwrap_err();
        assert!(matches!(err, ConditionParseError::UnknownField(f) if f == "mood"));
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let err = Condition::from_json(&json!({"pleasure": {"$near": 5}})).unwrap_err();
        assert!(matches!(err, ConditionParseError::UnknownOperator { .. }));
    }

    #[test]
    fn ordering_with_string_operand_is_rejected() {
        let err = Condition::from_json(&json!({"arousal": {"$gte": "warm"}})).unwrap_err();
        assert!(matches!(err, ConditionParseError::NonNumericOperand { .. }));
    }

    #[test]
    fn non_object_document_is_rejected() {
        let err = Condition::from_json(&json!("pleasure >= 5")).unwrap_err();
        assert!(matches!(err, ConditionParseError::NotAnObject(_)));
    }
}
