//! Dialogue history and long-term memory port.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::foundation::UserId;

use super::generation::MessageRole;

#[derive(Debug, Error)]
pub enum MemoryStoreError {
    #[error("memory backend failure: {0}")]
    Backend(String),
}

/// One persisted dialogue turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: MessageRole,
    pub content: String,
    /// ISO 8601 UTC timestamp.
    pub recorded_at: String,
}

/// Short-term dialogue history plus long-term fact retrieval.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// The most recent `limit` turns, oldest first.
    async fn recent_history(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, MemoryStoreError>;

    /// Long-term facts relevant to the query, best first.
    async fn retrieve_relevant(
        &self,
        user_id: &UserId,
        query: &str,
        limit: usize,
    ) -> Result<Vec<String>, MemoryStoreError>;

    async fn append(&self, user_id: &UserId, entry: HistoryEntry)
        -> Result<(), MemoryStoreError>;
}
