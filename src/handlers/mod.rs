//! HTTP request handlers for the chat-relay API

use crate::backend::UpstreamClient;
use crate::config::Config;
use crate::conversation::{ConversationStore, HistoryBudgeter, InMemoryConversationStore};
use crate::error::{AppError, AppResult};
use crate::metrics::Metrics;
use crate::middleware::request_id_middleware;
use crate::tokenizer::TokenEstimator;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod chat;
pub mod chats;
pub mod health;
pub mod metrics;
pub mod models;
pub mod settings;
pub mod upload;

/// Room for multipart boundaries and part headers on top of the file itself
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Application state shared across all handlers
///
/// Everything is either immutable or internally synchronized, so cloning per
/// request is cheap and no handler holds a lock across the upstream call.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    client: UpstreamClient,
    estimator: Arc<dyn TokenEstimator>,
    budgeter: HistoryBudgeter,
    store: Arc<dyn ConversationStore>,
    metrics: Arc<Metrics>,
}

impl AppState {
    /// Build state from validated configuration
    ///
    /// # Errors
    ///
    /// Fails if the tokenizer tables, HTTP client or metrics registry cannot be
    /// initialized, or if the budget settings are invalid.
    pub fn new(config: Arc<Config>) -> AppResult<Self> {
        let estimator = config.budget.tokenizer.build()?;
        let budgeter = config.budget.budgeter()?;
        let client = UpstreamClient::new(config.server.connect_timeout())?;
        let metrics = Metrics::new().map_err(|e| {
            tracing::error!(error = %e, "Failed to register Prometheus metrics");
            AppError::Internal(format!("Failed to initialize metrics: {}", e))
        })?;

        let store: Arc<dyn ConversationStore> = Arc::new(
            InMemoryConversationStore::with_max_conversations(config.store.max_conversations),
        );

        Ok(Self {
            config,
            client,
            estimator,
            budgeter,
            store,
            metrics: Arc::new(metrics),
        })
    }

    /// Replace the conversation store
    pub fn with_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = store;
        self
    }

    /// Replace the token estimator
    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn client(&self) -> &UpstreamClient {
        &self.client
    }

    pub fn estimator(&self) -> &dyn TokenEstimator {
        self.estimator.as_ref()
    }

    pub fn budgeter(&self) -> &HistoryBudgeter {
        &self.budgeter
    }

    pub fn store(&self) -> &dyn ConversationStore {
        self.store.as_ref()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}

/// Build the HTTP router with every route and middleware layer
pub fn router(state: AppState) -> Router {
    let upload_body_limit = state
        .config()
        .upload
        .max_bytes
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .route("/api/chat", post(chat::handler))
        .route("/api/models", get(models::handler))
        .route("/api/settings", get(settings::handler))
        .route(
            "/api/upload",
            post(upload::handler).layer(DefaultBodyLimit::max(upload_body_limit)),
        )
        .route("/api/chats", get(chats::list))
        .route(
            "/api/chats/{id}",
            get(chats::get).put(chats::put).delete(chats::delete),
        )
        .route("/health", get(health::handler))
        .route("/metrics", get(metrics::handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
}
