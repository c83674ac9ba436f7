//! Conversation persistence
//!
//! The chat pipeline never reads from here; history always arrives in the
//! request. The store only backs the `/api/chats` routes that replace the
//! browser's local storage.

use super::Message;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Listing entry for a stored conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    pub message_count: usize,
}

/// Keyed storage for conversations
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Messages stored under `id`, if any
    async fn get(&self, id: &str) -> AppResult<Option<Vec<Message>>>;

    /// Replace the conversation stored under `id`
    async fn set(&self, id: &str, messages: Vec<Message>) -> AppResult<()>;

    /// Remove `id`, returning whether it existed
    async fn delete(&self, id: &str) -> AppResult<bool>;

    /// All stored conversations, sorted by id
    async fn list(&self) -> AppResult<Vec<ConversationSummary>>;
}

/// Process-local store; contents are lost on restart
///
/// Unbounded unless built with [`with_max_conversations`](Self::with_max_conversations).
/// Replacing an existing conversation never counts against the cap.
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    chats: RwLock<HashMap<String, Vec<Message>>>,
    max_conversations: Option<usize>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that refuses new ids once `max` conversations are held
    pub fn with_max_conversations(max: usize) -> Self {
        Self {
            chats: RwLock::default(),
            max_conversations: Some(max),
        }
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get(&self, id: &str) -> AppResult<Option<Vec<Message>>> {
        Ok(self.chats.read().await.get(id).cloned())
    }

    async fn set(&self, id: &str, messages: Vec<Message>) -> AppResult<()> {
        let mut chats = self.chats.write().await;
        if let Some(max) = self.max_conversations
            && chats.len() >= max
            && !chats.contains_key(id)
        {
            tracing::warn!(conversation_id = %id, max_conversations = max, "Conversation store is full");
            return Err(AppError::Validation(format!(
                "Conversation limit of {} reached",
                max
            )));
        }
        chats.insert(id.to_string(), messages);
        Ok(())
    }

    async fn delete(&self, id: &str) -> AppResult<bool> {
        Ok(self.chats.write().await.remove(id).is_some())
    }

    async fn list(&self) -> AppResult<Vec<ConversationSummary>> {
        let chats = self.chats.read().await;
        let mut summaries: Vec<ConversationSummary> = chats
            .iter()
            .map(|(id, messages)| ConversationSummary {
                id: id.clone(),
                message_count: messages.len(),
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(summaries)
    }
}
