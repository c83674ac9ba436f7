//! Request normalization
//!
//! Turns the budgeted conversation plus the browser's options into the exact
//! request the configured backend expects. Only `role` and `content` survive;
//! timestamps and any other per-message fields are dropped here.

use super::BackendKind;
use crate::config::BackendConfig;
use crate::conversation::{ChatOptions, Message};
use crate::error::{AppError, AppResult};
use serde::Serialize;

/// A message as sent upstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role().as_str().to_string(),
            content: message.content().to_string(),
        }
    }
}

/// Body of `POST {base}/chat/completions`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenAiChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    pub stream: bool,
}

/// Body of `POST {base}/chat`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimpleChatRequest {
    pub messages: Vec<WireMessage>,
    pub model: String,
    pub stream: bool,
}

/// A fully shaped upstream request, one variant per backend kind
#[derive(Debug, Clone, PartialEq)]
pub enum BackendRequest {
    OpenAi {
        url: String,
        api_key: String,
        body: OpenAiChatRequest,
    },
    Simple {
        url: String,
        api_key: Option<String>,
        body: SimpleChatRequest,
    },
}

impl BackendRequest {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::OpenAi { .. } => BackendKind::OpenAi,
            Self::Simple { .. } => BackendKind::Simple,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Self::OpenAi { url, .. } | Self::Simple { url, .. } => url,
        }
    }

    pub fn bearer_token(&self) -> Option<&str> {
        match self {
            Self::OpenAi { api_key, .. } => Some(api_key),
            Self::Simple { api_key, .. } => api_key.as_deref(),
        }
    }

    pub fn message_count(&self) -> usize {
        match self {
            Self::OpenAi { body, .. } => body.messages.len(),
            Self::Simple { body, .. } => body.messages.len(),
        }
    }
}

/// Join a base URL and a path without doubling the slash
pub fn endpoint_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Shape `messages` for the configured backend
///
/// # Errors
///
/// - `AppError::Validation` if no model is selected. Checked first, so nothing
///   else is inspected for such a request.
/// - `AppError::Config` if the backend lacks a base URL, or an OpenAI backend
///   lacks an API key.
pub fn normalize(
    messages: &[Message],
    options: &ChatOptions,
    backend: &BackendConfig,
) -> AppResult<BackendRequest> {
    let model = options.selected_model()?.to_string();
    let base_url = backend.require_base_url()?;
    let wire: Vec<WireMessage> = messages.iter().map(WireMessage::from).collect();

    match backend.kind() {
        BackendKind::OpenAi => {
            let api_key = backend.api_key().ok_or_else(|| {
                AppError::Config("API key is not configured for the openai backend".to_string())
            })?;
            Ok(BackendRequest::OpenAi {
                url: endpoint_url(base_url, "chat/completions"),
                api_key: api_key.to_string(),
                body: OpenAiChatRequest {
                    model,
                    messages: wire,
                    temperature: options.temperature(),
                    stream: true,
                },
            })
        }
        BackendKind::Simple => Ok(BackendRequest::Simple {
            url: endpoint_url(base_url, "chat"),
            api_key: backend.api_key().map(str::to_string),
            body: SimpleChatRequest {
                messages: wire,
                model,
                stream: true,
            },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn openai_backend() -> BackendConfig {
        BackendConfig::new(BackendKind::OpenAi)
            .with_base_url("https://api.openai.com/v1")
            .with_api_key("sk-test")
    }

    fn simple_backend() -> BackendConfig {
        BackendConfig::new(BackendKind::Simple).with_base_url("http://localhost:8000/")
    }

    #[test]
    fn test_single_message_scenario() {
        let messages = vec![Message::user("hi")];
        let request = normalize(&messages, &ChatOptions::new("gpt-x"), &openai_backend()).unwrap();
        assert_eq!(request.message_count(), 1);

        let BackendRequest::OpenAi { url, api_key, body } = request else {
            panic!("expected an openai request");
        };
        assert_eq!(url, "https://api.openai.com/v1/chat/completions");
        assert_eq!(api_key, "sk-test");
        assert_eq!(body.model, "gpt-x");
        assert_eq!(
            body.messages,
            vec![WireMessage {
                role: "user".to_string(),
                content: "hi".to_string()
            }]
        );
        assert!(body.stream);
    }

    #[test]
    fn test_openai_body_shape() {
        let messages = vec![Message::system("be brief"), Message::user("hi")];
        let options = ChatOptions::new("gpt-4o").with_temperature(0.3);
        let request = normalize(&messages, &options, &openai_backend()).unwrap();

        let BackendRequest::OpenAi { body, .. } = request else {
            panic!("expected an openai request");
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({
                "model": "gpt-4o",
                "messages": [
                    {"role": "system", "content": "be brief"},
                    {"role": "user", "content": "hi"}
                ],
                "temperature": 0.3,
                "stream": true
            })
        );
    }

    #[test]
    fn test_openai_body_omits_absent_temperature() {
        let request = normalize(
            &[Message::user("hi")],
            &ChatOptions::new("gpt-4o"),
            &openai_backend(),
        )
        .unwrap();
        let BackendRequest::OpenAi { body, .. } = request else {
            panic!("expected an openai request");
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn test_simple_body_shape_drops_timestamps() {
        let messages = vec![
            Message::user("hi").with_created_at(serde_json::json!("2024-05-01T10:00:00Z")),
            Message::assistant("hello"),
        ];
        let request = normalize(&messages, &ChatOptions::new("llama3"), &simple_backend()).unwrap();

        assert_eq!(request.kind(), BackendKind::Simple);
        assert_eq!(request.url(), "http://localhost:8000/chat");
        assert_eq!(request.bearer_token(), None);

        let BackendRequest::Simple { body, .. } = request else {
            panic!("expected a simple request");
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({
                "messages": [
                    {"role": "user", "content": "hi"},
                    {"role": "assistant", "content": "hello"}
                ],
                "model": "llama3",
                "stream": true
            })
        );
    }

    #[test]
    fn test_simple_backend_forwards_optional_key() {
        let backend = simple_backend().with_api_key("local-key");
        let request = normalize(&[Message::user("hi")], &ChatOptions::new("m"), &backend).unwrap();
        assert_eq!(request.bearer_token(), Some("local-key"));
    }

    #[test]
    fn test_missing_model_is_validation_error_even_without_base_url() {
        let backend = BackendConfig::new(BackendKind::OpenAi);
        let err = normalize(&[Message::user("hi")], &ChatOptions::default(), &backend).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_missing_base_url_is_config_error() {
        let backend = BackendConfig::new(BackendKind::Simple);
        let err = normalize(&[Message::user("hi")], &ChatOptions::new("m"), &backend).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_openai_without_api_key_is_config_error() {
        let backend = BackendConfig::new(BackendKind::OpenAi).with_base_url("https://x.test/v1");
        let err = normalize(&[Message::user("hi")], &ChatOptions::new("m"), &backend).unwrap_err();
        assert!(matches!(err, AppError::Config(ref msg) if msg.contains("API key")));
    }

    #[test]
    fn test_endpoint_url_joins_cleanly() {
        assert_eq!(endpoint_url("http://a/v1", "models"), "http://a/v1/models");
        assert_eq!(endpoint_url("http://a/v1/", "/models"), "http://a/v1/models");
    }

    #[test]
    fn test_input_messages_are_not_consumed() {
        let messages = vec![Message::user("hi")];
        let _ = normalize(&messages, &ChatOptions::new("m"), &openai_backend()).unwrap();
        assert_eq!(messages, vec![Message::user("hi")]);
    }
}
