//! File upload passthrough
//!
//! `POST /api/upload` accepts a multipart form with a `file` part, checks it at
//! the edge, then forwards it unchanged to `{base_url}/upload`. The backend's
//! JSON reply is returned verbatim.

use crate::backend::UploadedFile;
use crate::error::{AppError, AppResult, UploadError};
use crate::handlers::AppState;
use crate::metrics::UploadOutcome;
use crate::middleware::RequestId;
use axum::{
    Extension, Json,
    extract::{Multipart, State, multipart::MultipartRejection},
    http::StatusCode,
};

const FILE_FIELD: &str = "file";
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// POST /api/upload handler
pub async fn handler(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let result = forward_upload(&state, request_id, multipart).await;

    let outcome = match &result {
        Ok(_) => UploadOutcome::Forwarded,
        Err(AppError::Upload(UploadError::Rejected)) => UploadOutcome::Failed,
        Err(AppError::Upload(_)) => UploadOutcome::Refused,
        Err(_) => UploadOutcome::Failed,
    };
    state.metrics().record_upload(outcome);

    if let Err(e) = &result {
        tracing::warn!(request_id = %request_id, outcome = outcome.as_str(), error = %e, "Upload not forwarded");
    }

    result.map(Json)
}

async fn forward_upload(
    state: &AppState,
    request_id: RequestId,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<serde_json::Value> {
    let limits = &state.config().upload;
    let mut multipart =
        multipart.map_err(|rejection| UploadError::Multipart(rejection.body_text()))?;

    let mut file = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| UploadError::Multipart(e.body_text()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let content_type = field
            .content_type()
            .unwrap_or(FALLBACK_CONTENT_TYPE)
            .to_string();
        if !limits.allows(&content_type) {
            return Err(UploadError::UnsupportedType(content_type).into());
        }

        let name = field.file_name().unwrap_or(FILE_FIELD).to_string();
        let bytes = field.bytes().await.map_err(|e| {
            if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                UploadError::TooLarge {
                    limit: limits.max_bytes,
                }
            } else {
                UploadError::Multipart(e.body_text())
            }
        })?;

        if bytes.len() > limits.max_bytes {
            return Err(UploadError::TooLarge {
                limit: limits.max_bytes,
            }
            .into());
        }

        file = Some(UploadedFile {
            name,
            content_type,
            bytes: bytes.to_vec(),
        });
        break;
    }

    let file = file.ok_or(UploadError::MissingFile)?;

    tracing::info!(
        request_id = %request_id,
        file_name = %file.name,
        content_type = %file.content_type,
        size = file.bytes.len(),
        "Forwarding upload"
    );

    state
        .client()
        .upload(&state.config().backend, &request_id.to_string(), file)
        .await
}
