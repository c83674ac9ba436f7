//! HTTP client for the upstream completion service
//!
//! Only a connect timeout is set. The overall request deadline belongs to the
//! caller, and dropping a returned `reqwest::Response` releases the upstream
//! connection.

use super::BackendKind;
use super::request::{BackendRequest, endpoint_url};
use crate::config::BackendConfig;
use crate::error::{AppError, AppResult, GENERIC_UPSTREAM_ERROR, UploadError};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Object type for list responses
pub const OBJECT_LIST: &str = "list";

/// One model in a `/models` listing; unknown fields are relayed untouched
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ModelEntry {
    pub id: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ModelEntry {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            extra: serde_json::Map::new(),
        }
    }
}

/// `{object: "list", data: [...]}`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ModelList {
    #[serde(default = "default_object")]
    pub object: String,
    pub data: Vec<ModelEntry>,
}

fn default_object() -> String {
    OBJECT_LIST.to_string()
}

impl ModelList {
    pub fn new(data: Vec<ModelEntry>) -> Self {
        Self {
            object: default_object(),
            data,
        }
    }
}

/// Whether an OpenAI model id is a chat model
fn is_chat_model(id: &str) -> bool {
    id.contains("gpt") && !id.contains("instruct")
}

/// A file received by `/api/upload`, ready to forward
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Pull a human-readable message out of an upstream error body
///
/// Tries `detail`, then `error.message`, then a string `error`. Anything else
/// (including non-JSON bodies) yields the generic message.
pub fn extract_detail(body: &str) -> String {
    let Ok(json) = serde_json::from_str::<serde_json::Value>(body) else {
        return GENERIC_UPSTREAM_ERROR.to_string();
    };

    json.get("detail")
        .and_then(serde_json::Value::as_str)
        .or_else(|| {
            json.pointer("/error/message")
                .and_then(serde_json::Value::as_str)
        })
        .or_else(|| json.get("error").and_then(serde_json::Value::as_str))
        .filter(|detail| !detail.is_empty())
        .unwrap_or(GENERIC_UPSTREAM_ERROR)
        .to_string()
}

/// Shared connection pool for every upstream call
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
}

impl UpstreamClient {
    /// Build a client with the given connect timeout
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` if the TLS backend fails to initialize.
    pub fn new(connect_timeout: Duration) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to build upstream HTTP client");
                AppError::Internal(format!("Failed to build HTTP client: {}", e))
            })?;
        Ok(Self { http })
    }

    /// Send a chat request and return the streaming response
    ///
    /// The body has not been read yet; hand the response to
    /// [`crate::stream::reshape`].
    pub async fn open_stream(&self, request: &BackendRequest) -> AppResult<reqwest::Response> {
        let mut builder = self
            .http
            .post(request.url())
            .header(ACCEPT, "text/event-stream");
        if let Some(token) = request.bearer_token() {
            builder = builder.bearer_auth(token);
        }
        builder = match request {
            BackendRequest::OpenAi { body, .. } => builder.json(body),
            BackendRequest::Simple { body, .. } => builder.json(body),
        };

        let response = builder.send().await.map_err(|e| {
            tracing::error!(
                backend = %request.kind(),
                error = %e,
                "Upstream chat request failed before a response arrived"
            );
            AppError::upstream_unreachable()
        })?;

        ensure_success(response).await
    }

    /// List models the UI may offer
    ///
    /// A configured fixed model is returned as-is with no network call. OpenAI
    /// listings are narrowed to chat models.
    pub async fn list_models(&self, backend: &BackendConfig) -> AppResult<ModelList> {
        if let Some(model) = backend.model() {
            tracing::debug!(model = %model, "Returning configured fixed model");
            return Ok(ModelList::new(vec![ModelEntry::new(model)]));
        }

        let url = endpoint_url(backend.require_base_url()?, "models");
        let mut builder = self
            .http
            .get(&url)
            .header(CONTENT_TYPE, "application/json");

        match backend.kind() {
            BackendKind::OpenAi => {
                let api_key = backend.api_key().ok_or_else(|| {
                    AppError::Config(
                        "API key is not configured for the openai backend".to_string(),
                    )
                })?;
                builder = builder.bearer_auth(api_key);
            }
            BackendKind::Simple => {
                if let Some(api_key) = backend.api_key() {
                    builder = builder.bearer_auth(api_key);
                }
            }
        }

        let response = builder.send().await.map_err(|e| {
            tracing::error!(backend = %backend.kind(), error = %e, "Model listing request failed");
            AppError::upstream_unreachable()
        })?;
        let response = ensure_success(response).await?;

        let mut list: ModelList = response.json().await.map_err(|e| {
            tracing::error!(backend = %backend.kind(), error = %e, "Model listing was not a model list");
            AppError::Upstream {
                status: None,
                detail: GENERIC_UPSTREAM_ERROR.to_string(),
            }
        })?;

        if backend.kind() == BackendKind::OpenAi {
            list.data.retain(|entry| is_chat_model(&entry.id));
        }
        list.object = default_object();
        Ok(list)
    }

    /// Forward an upload to `{base}/upload?user_id=<user_id>`
    ///
    /// Returns the backend's JSON reply unchanged.
    pub async fn upload(
        &self,
        backend: &BackendConfig,
        user_id: &str,
        file: UploadedFile,
    ) -> AppResult<serde_json::Value> {
        let url = format!(
            "{}?user_id={}",
            endpoint_url(backend.require_base_url()?, "upload"),
            user_id
        );

        let part = reqwest::multipart::Part::bytes(file.bytes)
            .file_name(file.name)
            .mime_str(&file.content_type)
            .map_err(|e| UploadError::Multipart(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let mut builder = self.http.post(&url).multipart(form);
        if let Some(api_key) = backend.api_key() {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await.map_err(|e| {
            tracing::error!(user_id = %user_id, error = %e, "Upload forward failed");
            UploadError::Rejected
        })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(user_id = %user_id, status = %status, "Backend rejected upload");
            return Err(UploadError::Rejected.into());
        }

        response.json().await.map_err(|e| {
            tracing::error!(user_id = %user_id, error = %e, "Backend upload reply was not JSON");
            AppError::from(UploadError::Rejected)
        })
    }
}

/// Pass 2xx responses through; turn anything else into `AppError::Upstream`
async fn ensure_success(response: reqwest::Response) -> AppResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = extract_detail(&body);
    tracing::warn!(
        status = %status,
        detail = %detail,
        "Upstream returned an error status"
    );
    Err(AppError::Upstream {
        status: Some(status.as_u16()),
        detail,
    })
}
