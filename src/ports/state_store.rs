//! Conversation state persistence port.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::foundation::UserId;
use crate::domain::scenario::ConversationState;

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("state backend failure: {0}")]
    Backend(String),

    #[error("stored state for '{user_id}' is corrupt: {reason}")]
    Corrupt { user_id: String, reason: String },
}

/// Durable per-user conversation state. One record per user, replaced
/// atomically at turn commit.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, user_id: &UserId) -> Result<Option<ConversationState>, StateStoreError>;

    async fn put(&self, state: &ConversationState) -> Result<(), StateStoreError>;

    /// Deletes the record; the next turn starts from scenario defaults.
    async fn reset(&self, user_id: &UserId) -> Result<(), StateStoreError>;
}
