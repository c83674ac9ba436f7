//! Conversation model shared by the chat pipeline
//!
//! Browser payloads arrive as [`IncomingMessage`]s with free-form role strings.
//! [`canonicalize`] turns them into typed [`Message`]s, dropping entries whose role
//! the backends would not understand. Everything downstream (system prompt
//! injection, history budgeting, request normalization) works on owned
//! `Vec<Message>` values derived from the request, never on the request itself.

pub mod budget;
pub mod store;
pub mod system_prompt;

pub use budget::{BudgetOutcome, HistoryBudgeter, TokenBudget, TrimPolicy};
pub use store::{ConversationStore, ConversationSummary, InMemoryConversationStore};
pub use system_prompt::inject;

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Message role in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Wire representation of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Parse a wire role, returning `None` for roles the backends don't accept
    pub fn from_wire(role: &str) -> Option<Self> {
        match role {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// A single canonical message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    role: Role,
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<serde_json::Value>,
}

impl Message {
    /// Create a message without a timestamp
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Attach the browser-supplied timestamp
    pub fn with_created_at(mut self, created_at: serde_json::Value) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn created_at(&self) -> Option<&serde_json::Value> {
        self.created_at.as_ref()
    }

    pub(crate) fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
    }
}

/// Message exactly as the browser sent it
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub created_at: Option<serde_json::Value>,
}

/// Map browser messages onto canonical roles
///
/// Messages with unrecognized roles are dropped here, so they are never counted
/// against the token budget nor forwarded upstream.
pub fn canonicalize(messages: Vec<IncomingMessage>) -> Vec<Message> {
    messages
        .into_iter()
        .filter_map(|incoming| match Role::from_wire(&incoming.role) {
            Some(role) => {
                let message = Message::new(role, incoming.content);
                Some(match incoming.created_at {
                    Some(created_at) => message.with_created_at(created_at),
                    None => message,
                })
            }
            None => {
                tracing::debug!(role = %incoming.role, "Dropping message with unrecognized role");
                None
            }
        })
        .collect()
}

/// Per-request chat options sent by the browser
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatOptions {
    #[serde(default)]
    selected_model: Option<String>,
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    temperature: Option<f64>,
}

impl ChatOptions {
    pub fn new(selected_model: impl Into<String>) -> Self {
        Self {
            selected_model: Some(selected_model.into()),
            ..Self::default()
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// The selected model, rejecting a missing or blank value
    pub fn selected_model(&self) -> AppResult<&str> {
        match self.selected_model.as_deref() {
            Some(model) if !model.trim().is_empty() => Ok(model),
            _ => Err(AppError::Validation(
                "Selected model is required".to_string(),
            )),
        }
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    pub fn temperature(&self) -> Option<f64> {
        self.temperature
    }

    /// Validate every option before any network call is made
    pub fn validate(&self) -> AppResult<()> {
        self.selected_model()?;

        if let Some(temp) = self.temperature {
            if !temp.is_finite() {
                return Err(AppError::Validation(
                    "temperature must be a finite number".to_string(),
                ));
            }
            if !(0.0..=2.0).contains(&temp) {
                return Err(AppError::Validation(
                    "temperature must be between 0.0 and 2.0".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Body of `POST /api/chat`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    messages: Option<Vec<IncomingMessage>>,
    #[serde(default)]
    chat_options: Option<ChatOptions>,
}

impl ChatRequest {
    /// Split into raw messages and options, treating absent fields as empty
    pub fn into_parts(self) -> (Vec<IncomingMessage>, ChatOptions) {
        (
            self.messages.unwrap_or_default(),
            self.chat_options.unwrap_or_default(),
        )
    }
}
