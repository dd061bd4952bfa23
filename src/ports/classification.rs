//! Utterance classification and semantic audit port.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::domain::affect::AffectDelta;
use crate::domain::scenario::ConversationState;
use crate::domain::transition::ConsentJudgment;

use super::ServiceError;

/// What the classifier extracted from one user utterance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Classification {
    /// Coarse utterance category (greeting, question, gift, ...).
    #[serde(default)]
    pub category: String,
    /// In `[0.0, 1.0]`.
    #[serde(default)]
    pub confidence: f64,
    /// Scenario variables the utterance establishes.
    #[serde(default)]
    pub extracted_variables: HashMap<String, Value>,
    /// Suggested affect adjustment for this utterance.
    #[serde(default)]
    pub affect_delta: AffectDelta,
    #[serde(default)]
    pub reasoning: String,
}

/// One semantic rule sent out for audit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticCheckRequest {
    pub rule_id: String,
    pub description: String,
}

/// A semantic rule the audit judged violated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticFinding {
    pub rule_id: String,
    pub detail: String,
}

/// The model-backed classifier: utterance analysis, consent verdicts on
/// pending phase proposals, and batched semantic rule audits.
#[async_trait]
pub trait ClassificationService: Send + Sync {
    async fn classify(
        &self,
        utterance: &str,
        state: &ConversationState,
    ) -> Result<Classification, ServiceError>;

    /// Judges whether the utterance answers a pending phase proposal.
    async fn judge_consent(
        &self,
        utterance: &str,
        proposal_context: &str,
    ) -> Result<ConsentJudgment, ServiceError>;

    /// Audits the candidate text against semantic rules in one batched
    /// call, returning only the rules judged violated.
    async fn audit(
        &self,
        text: &str,
        checks: &[SemanticCheckRequest],
    ) -> Result<Vec<SemanticFinding>, ServiceError>;
}
