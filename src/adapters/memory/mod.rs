//! In-memory store adapters.
//!
//! Process-local implementations of the persistence ports, used in tests
//! and single-node deployments. Both are cheap to clone and safe to share
//! across tasks.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::foundation::UserId;
use crate::domain::scenario::ConversationState;
use crate::ports::memory_store::{HistoryEntry, MemoryStore, MemoryStoreError};
use crate::ports::state_store::{StateStore, StateStoreError};

/// Conversation state held in a process-local map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStateStore {
    states: Arc<RwLock<HashMap<String, ConversationState>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, user_id: &UserId) -> Result<Option<ConversationState>, StateStoreError> {
        Ok(self.states.read().await.get(user_id.as_str()).cloned())
    }

    async fn put(&self, state: &ConversationState) -> Result<(), StateStoreError> {
        self.states
            .write()
            .await
            .insert(state.user_id.as_str().to_string(), state.clone());
        Ok(())
    }

    async fn reset(&self, user_id: &UserId) -> Result<(), StateStoreError> {
        self.states.write().await.remove(user_id.as_str());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct UserMemory {
    history: Vec<HistoryEntry>,
    facts: Vec<String>,
}

/// Dialogue history and long-term facts held in process-local maps.
/// Retrieval is naive keyword overlap; good enough for tests and demos.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMemoryStore {
    users: Arc<RwLock<HashMap<String, UserMemory>>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a long-term fact for a user.
    pub async fn add_fact(&self, user_id: &UserId, fact: impl Into<String>) {
        self.users
            .write()
            .await
            .entry(user_id.as_str().to_string())
            .or_default()
            .facts
            .push(fact.into());
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn recent_history(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, MemoryStoreError> {
        let users = self.users.read().await;
        let Some(memory) = users.get(user_id.as_str()) else {
            return Ok(Vec::new());
        };
        let skip = memory.history.len().saturating_sub(limit);
        Ok(memory.history[skip..].to_vec())
    }

    async fn retrieve_relevant(
        &self,
        user_id: &UserId,
        query: &str,
        limit: usize,
    ) -> Result<Vec<String>, MemoryStoreError> {
        let users = self.users.read().await;
        let Some(memory) = users.get(user_id.as_str()) else {
            return Ok(Vec::new());
        };
        let query = query.to_lowercase();
        let tokens: Vec<&str> = query
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
            .collect();
        Ok(memory
            .facts
            .iter()
            .filter(|fact| {
                let fact = fact.to_lowercase();
                tokens.iter().any(|token| fact.contains(token))
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn append(
        &self,
        user_id: &UserId,
        entry: HistoryEntry,
    ) -> Result<(), MemoryStoreError> {
        self.users
            .write()
            .await
            .entry(user_id.as_str().to_string())
            .or_default()
            .history
            .push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::utc_now;
    use crate::ports::generation::MessageRole;

    fn user() -> UserId {
        UserId::new("user-1").unwrap()
    }

    fn entry(role: MessageRole, content: &str) -> HistoryEntry {
        HistoryEntry {
            role,
            content: content.into(),
            recorded_at: utc_now(),
        }
    }

    #[tokio::test]
    async fn state_round_trips_and_resets() {
        let store = InMemoryStateStore::new();
        let user = user();
        assert!(store.get(&user).await.unwrap().is_none());

        let state = ConversationState::new(user.clone(), "phase_a", "scene_a");
        store.put(&state).await.unwrap();
        assert_eq!(store.get(&user).await.unwrap(), Some(state));

        store.reset(&user).await.unwrap();
        assert!(store.get(&user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recent_history_returns_the_tail_oldest_first() {
        let store = InMemoryMemoryStore::new();
        let user = user();
        for i in 0..5 {
            store
                .append(&user, entry(MessageRole::User, &format!("turn {}", i)))
                .await
                .unwrap();
        }

        let recent = store.recent_history(&user, 2).await.unwrap();
        let contents: Vec<&str> = recent.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["turn 3", "turn 4"]);
    }

    #[tokio::test]
    async fn retrieval_matches_on_keyword_overlap() {
        let store = InMemoryMemoryStore::new();
        let user = user();
        store.add_fact(&user, "Likes black coffee").await;
        store.add_fact(&user, "Afraid of thunderstorms").await;

        let facts = store
            .retrieve_relevant(&user, "want some coffee?", 5)
            .await
            .unwrap();
        assert_eq!(facts, vec!["Likes black coffee".to_string()]);
    }

    #[tokio::test]
    async fn unknown_user_reads_as_empty() {
        let store = InMemoryMemoryStore::new();
        let user = user();
        assert!(store.recent_history(&user, 10).await.unwrap().is_empty());
        assert!(store
            .retrieve_relevant(&user, "anything", 10)
            .await
            .unwrap()
            .is_empty());
    }
}
