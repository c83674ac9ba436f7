//! Saved conversation endpoints
//!
//! Conversations live in the [`ConversationStore`](crate::conversation::ConversationStore)
//! held by [`AppState`]. Replacing a conversation stores exactly what the client
//! sends; budgeting only applies to what is forwarded upstream.

use crate::conversation::{ConversationSummary, Message};
use crate::error::AppError;
use crate::handlers::AppState;
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct ConversationBody {
    pub id: String,
    pub messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
pub struct ReplaceConversation {
    pub messages: Vec<Message>,
}

/// GET /api/chats
pub async fn list(
    State(state): State<AppState>,
) -> Result<Json<Vec<ConversationSummary>>, AppError> {
    Ok(Json(state.store().list().await?))
}

/// GET /api/chats/{id}
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationBody>, AppError> {
    match state.store().get(&id).await? {
        Some(messages) => Ok(Json(ConversationBody { id, messages })),
        None => Err(AppError::NotFound(format!("Conversation '{}' not found", id))),
    }
}

/// PUT /api/chats/{id}
pub async fn put(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<ReplaceConversation>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let Json(body) = payload.map_err(|rejection| {
        AppError::Validation(format!("Invalid conversation: {}", rejection.body_text()))
    })?;

    tracing::debug!(conversation_id = %id, message_count = body.messages.len(), "Saving conversation");
    state.store().set(&id, body.messages).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/chats/{id}
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.store().delete(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Conversation '{}' not found", id)))
    }
}
