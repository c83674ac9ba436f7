//! Models endpoint handler
//!
//! `GET /api/models` lists the models the chat UI may offer.

use crate::backend::ModelList;
use crate::error::AppError;
use crate::handlers::AppState;
use crate::middleware::RequestId;
use axum::{Extension, Json, extract::State};

/// GET /api/models handler
///
/// Returns `{object:"list", data:[{id, ...}]}`. A configured fixed model is
/// returned without contacting the backend.
pub async fn handler(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
) -> Result<Json<ModelList>, AppError> {
    let backend = &state.config().backend;

    let list = state.client().list_models(backend).await.map_err(|e| {
        tracing::error!(
            request_id = %request_id,
            backend = %backend.kind(),
            error = %e,
            "Failed to list models"
        );
        e
    })?;

    tracing::debug!(
        request_id = %request_id,
        model_count = list.data.len(),
        "Listed models"
    );
    Ok(Json(list))
}
