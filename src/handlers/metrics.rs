//! Prometheus metrics endpoint
//!
//! Exposes the relay's counters in Prometheus text format for scraping.

use axum::{extract::State, http::StatusCode};

use crate::handlers::AppState;

/// GET /metrics handler
///
/// # Response
///
/// - `200 OK` with metrics in Prometheus text format
/// - `500 Internal Server Error` if encoding fails
///
/// ```bash
/// curl http://localhost:3000/metrics
/// # HELP chat_relay_requests_total Total chat requests by backend and outcome
/// # TYPE chat_relay_requests_total counter
/// chat_relay_requests_total{backend="openai",outcome="streamed"} 42
/// ```
pub async fn handler(State(state): State<AppState>) -> (StatusCode, String) {
    match state.metrics().gather() {
        Ok(output) => (StatusCode::OK, output),
        Err(e) => {
            tracing::error!(error = %e, "Failed to gather metrics for Prometheus scraping");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to gather metrics: {}", e),
            )
        }
    }
}
