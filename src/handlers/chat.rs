//! Chat streaming handler
//!
//! `POST /api/chat` runs the full pipeline:
//!
//! 1. validate `chatOptions`
//! 2. canonicalize roles
//! 3. inject the system prompt
//! 4. fit history into the token budget
//! 5. shape the request for the configured backend
//! 6. open the upstream stream and reshape it into canonical SSE
//!
//! Failures before the stream opens answer 500 with `{success:false, error}`.
//! Failures after that point arrive as a terminal error event inside the stream.

use crate::backend::normalize;
use crate::conversation::{ChatRequest, canonicalize, inject};
use crate::error::{AppError, AppResult};
use crate::handlers::AppState;
use crate::metrics::Outcome;
use crate::middleware::RequestId;
use crate::stream::reshape;
use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    http::header,
    response::{
        IntoResponse, Response,
        sse::{KeepAlive, Sse},
    },
};
use futures::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// POST /api/chat handler
///
/// Returns a Server-Sent Events stream:
///
/// ```text
/// data: {"content":"Hi","role":"assistant"}
///
/// data: [DONE]
///
/// ```
pub async fn handler(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let backend = state.config().backend.kind();

    let result = open_chat_stream(&state, request_id, payload).await;
    let outcome = match &result {
        Ok(_) => Outcome::Streamed,
        Err(err) => {
            tracing::error!(
                request_id = %request_id,
                backend = %backend,
                error = %err,
                "Chat request failed"
            );
            if matches!(err, AppError::Upstream { .. }) {
                state.metrics().upstream_error(backend);
            }
            Outcome::from_error(err)
        }
    };

    if let Err(e) = state.metrics().record_request(backend, outcome) {
        tracing::warn!(request_id = %request_id, error = %e, "Failed to record request metric");
    }

    result
}

async fn open_chat_stream(
    state: &AppState,
    request_id: RequestId,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> AppResult<Response> {
    let Json(request) = payload.map_err(|rejection| {
        AppError::Validation(format!("Invalid chat request: {}", rejection.body_text()))
    })?;
    let (incoming, options) = request.into_parts();

    // Nothing below may run for an invalid request
    options.validate()?;

    let messages_in = incoming.len();
    let messages = canonicalize(incoming);
    let messages = inject(messages, options.system_prompt());
    let budgeted = state.budgeter().fit(messages, state.estimator());
    state.metrics().record_trimmed(budgeted.removed);

    let backend = &state.config().backend;
    let upstream_request = normalize(&budgeted.messages, &options, backend)?;

    tracing::info!(
        request_id = %request_id,
        backend = %backend.kind(),
        model = %options.selected_model()?,
        messages_in = messages_in,
        messages_out = upstream_request.message_count(),
        removed = budgeted.removed,
        estimated_tokens = budgeted.estimated_tokens,
        "Forwarding chat request"
    );

    let response = state.client().open_stream(&upstream_request).await?;

    let events = reshape(
        backend.kind(),
        response.bytes_stream(),
        Some(Arc::clone(state.metrics())),
    )
    .map(|event| Ok::<_, Infallible>(event.to_event()));

    let sse = Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    );

    Ok(([(header::CONNECTION, "keep-alive")], sse).into_response())
}
