//! Text generation port.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ServiceError;

/// Who produced a message in the dialogue history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

/// One turn of dialogue history as sent to the generation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Why the generation service is being called. Candidate replies count
/// against the turn's retry budget; repair rewrites do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationIntent {
    /// A fresh candidate reply to the user's utterance.
    Reply,
    /// A constrained rewrite of an already generated reply.
    Rewrite,
}

/// A fully assembled request for the generation service.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub intent: GenerationIntent,
}

/// The model-backed text generator behind candidate replies and
/// violation rewrites.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ServiceError>;
}
