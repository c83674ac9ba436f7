//! Health check endpoint
//!
//! Liveness only; the upstream backend is not probed.

use axum::Json;
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// GET /health handler
pub async fn handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "OK" })
}
