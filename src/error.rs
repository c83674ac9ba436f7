//! Error types for chat-relay
//!
//! All errors implement `IntoResponse` for Axum handlers. Response bodies use the
//! `{"success": false, "error": "<message>"}` shape the chat UI already understands.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Message shown when an upstream failure carries no usable detail
pub const GENERIC_UPSTREAM_ERROR: &str = "Failed to get response from server";

/// Upload rejections raised at the edge before anything is forwarded
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("No file provided")]
    MissingFile,

    #[error("File exceeds the upload limit of {limit} bytes")]
    TooLarge { limit: usize },

    #[error("Unsupported file type '{0}'")]
    UnsupportedType(String),

    #[error("Malformed upload: {0}")]
    Multipart(String),

    #[error("Failed to upload to backend")]
    Rejected,
}

impl UploadError {
    /// HTTP status for this rejection
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingFile | Self::Multipart(_) => StatusCode::BAD_REQUEST,
            Self::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnsupportedType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Rejected => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Main error type for the application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read config file {path}: {source}")]
    ConfigFileRead {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ConfigParseFailed {
        path: String,
        source: toml::de::Error,
    },

    #[error("Invalid configuration in {path}: {reason}")]
    ConfigValidationFailed { path: String, reason: String },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Upstream request failed{}: {detail}", status_suffix(.status))]
    Upstream { status: Option<u16>, detail: String },

    #[error("Upload failed: {0}")]
    Upload(#[from] UploadError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status
        .map(|code| format!(" with status {}", code))
        .unwrap_or_default()
}

impl AppError {
    /// Build an upstream error for a transport-level failure (no HTTP status)
    pub fn upstream_unreachable() -> Self {
        Self::Upstream {
            status: None,
            detail: GENERIC_UPSTREAM_ERROR.to_string(),
        }
    }

    /// Message safe to return to the browser
    ///
    /// Never includes source-error chains, file paths, or upstream URLs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Config(msg) | Self::Validation(msg) | Self::NotFound(msg) => msg.clone(),
            Self::ConfigFileRead { .. }
            | Self::ConfigParseFailed { .. }
            | Self::ConfigValidationFailed { .. } => "Server configuration error".to_string(),
            Self::Upstream { detail, .. } => detail.clone(),
            Self::Upload(err) => err.to_string(),
            Self::Internal(_) => "Internal server error".to_string(),
        }
    }

    /// HTTP status for this error
    ///
    /// Chat, models and configuration failures all answer 500, matching what the
    /// chat UI has always received. Only upload edge checks and missing
    /// conversations use 4xx codes.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Upload(err) => err.status(),
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "success": false,
            "error": self.public_message(),
        }));

        (self.status(), body).into_response()
    }
}

/// Convenience type alias for Results
pub type AppResult<T> = Result<T, AppError>;
