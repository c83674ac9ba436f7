//! Client settings endpoint
//!
//! `GET /api/settings` tells the chat UI which token limit the server enforces,
//! so its own counter matches what the budgeter will do.

use crate::handlers::AppState;
use axum::{Json, extract::State};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsResponse {
    pub token_limit: usize,
}

/// GET /api/settings handler
pub async fn handler(State(state): State<AppState>) -> Json<SettingsResponse> {
    Json(SettingsResponse {
        token_limit: state.config().budget.token_limit,
    })
}
