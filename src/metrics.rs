//! Prometheus metrics collection for chat-relay
//!
//! Tracks:
//! - Chat requests by backend and outcome
//! - Messages removed by history budgeting
//! - Stream events emitted and lines that failed to parse
//! - Upstream failures and upload results
//!
//! Metrics are exposed via the `/metrics` endpoint in Prometheus text format.

use crate::backend::BackendKind;
use crate::error::AppError;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// How a chat request ended, as a bounded metrics label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Stream opened and handed to the browser
    Streamed,
    /// Rejected before any network call
    Invalid,
    /// Server-side configuration was missing or wrong
    Misconfigured,
    /// Upstream refused or could not be reached
    UpstreamError,
    /// Anything else
    InternalError,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Streamed => "streamed",
            Outcome::Invalid => "invalid",
            Outcome::Misconfigured => "misconfigured",
            Outcome::UpstreamError => "upstream_error",
            Outcome::InternalError => "internal_error",
        }
    }

    /// Classify a failed request
    pub fn from_error(error: &AppError) -> Self {
        match error {
            AppError::Validation(_) => Outcome::Invalid,
            AppError::Config(_)
            | AppError::ConfigFileRead { .. }
            | AppError::ConfigParseFailed { .. }
            | AppError::ConfigValidationFailed { .. } => Outcome::Misconfigured,
            AppError::Upstream { .. } => Outcome::UpstreamError,
            AppError::Upload(_) | AppError::NotFound(_) | AppError::Internal(_) => {
                Outcome::InternalError
            }
        }
    }
}

/// Result of an `/api/upload` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Forwarded,
    /// Failed an edge check (missing, too large, wrong type, malformed)
    Refused,
    /// Backend rejected or could not be reached
    Failed,
}

impl UploadOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadOutcome::Forwarded => "forwarded",
            UploadOutcome::Refused => "refused",
            UploadOutcome::Failed => "failed",
        }
    }
}

const STREAM_PARSE_FAILURES: &str = "chat_relay_stream_parse_failures_total";

/// Metrics collector for chat-relay
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    requests_total: IntCounterVec,
    history_messages_trimmed: IntCounter,
    stream_parse_failures: IntCounterVec,
    stream_events: IntCounterVec,
    upstream_errors: IntCounterVec,
    uploads_total: IntCounterVec,
}

impl Metrics {
    /// Create a new Metrics instance with its own registry
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Cardinality: 2 backends x 5 outcomes
        let requests_total = IntCounterVec::new(
            Opts::new(
                "chat_relay_requests_total",
                "Total chat requests by backend and outcome",
            ),
            &["backend", "outcome"],
        )?;

        let history_messages_trimmed = IntCounter::new(
            "chat_relay_history_messages_trimmed_total",
            "Messages removed from conversation history to fit the token budget",
        )?;

        let stream_parse_failures = IntCounterVec::new(
            Opts::new(
                STREAM_PARSE_FAILURES,
                "Upstream stream lines that could not be decoded (skipped, stream continued)",
            ),
            &["backend"],
        )?;

        let stream_events = IntCounterVec::new(
            Opts::new(
                "chat_relay_stream_events_total",
                "Message events relayed to the browser",
            ),
            &["backend"],
        )?;

        let upstream_errors = IntCounterVec::new(
            Opts::new(
                "chat_relay_upstream_errors_total",
                "Upstream failures, before or during streaming",
            ),
            &["backend"],
        )?;

        let uploads_total = IntCounterVec::new(
            Opts::new("chat_relay_uploads_total", "File uploads by outcome"),
            &["outcome"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(history_messages_trimmed.clone()))?;
        registry.register(Box::new(stream_parse_failures.clone()))?;
        registry.register(Box::new(stream_events.clone()))?;
        registry.register(Box::new(upstream_errors.clone()))?;
        registry.register(Box::new(uploads_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            requests_total,
            history_messages_trimmed,
            stream_parse_failures,
            stream_events,
            upstream_errors,
            uploads_total,
        })
    }

    /// Record a chat request outcome
    pub fn record_request(
        &self,
        backend: BackendKind,
        outcome: Outcome,
    ) -> Result<(), prometheus::Error> {
        self.requests_total
            .get_metric_with_label_values(&[backend.as_str(), outcome.as_str()])?
            .inc();
        Ok(())
    }

    /// Record messages dropped by the history budgeter
    pub fn record_trimmed(&self, removed: usize) {
        if removed > 0 {
            self.history_messages_trimmed.inc_by(removed as u64);
        }
    }

    pub fn stream_event(&self, backend: BackendKind) {
        self.stream_events.with_label_values(&[backend.as_str()]).inc();
    }

    pub fn stream_parse_failure(&self, backend: BackendKind) {
        self.stream_parse_failures
            .with_label_values(&[backend.as_str()])
            .inc();
    }

    pub fn upstream_error(&self, backend: BackendKind) {
        self.upstream_errors
            .with_label_values(&[backend.as_str()])
            .inc();
    }

    pub fn record_upload(&self, outcome: UploadOutcome) {
        self.uploads_total.with_label_values(&[outcome.as_str()]).inc();
    }

    pub fn requests_count(&self, backend: BackendKind, outcome: Outcome) -> u64 {
        self.requests_total
            .with_label_values(&[backend.as_str(), outcome.as_str()])
            .get()
    }

    pub fn trimmed_count(&self) -> u64 {
        self.history_messages_trimmed.get()
    }

    pub fn stream_parse_failures_count(&self, backend: BackendKind) -> u64 {
        self.stream_parse_failures
            .with_label_values(&[backend.as_str()])
            .get()
    }

    pub fn stream_events_count(&self, backend: BackendKind) -> u64 {
        self.stream_events.with_label_values(&[backend.as_str()]).get()
    }

    pub fn upstream_errors_count(&self, backend: BackendKind) -> u64 {
        self.upstream_errors
            .with_label_values(&[backend.as_str()])
            .get()
    }

    pub fn uploads_count(&self, outcome: UploadOutcome) -> u64 {
        self.uploads_total.with_label_values(&[outcome.as_str()]).get()
    }

    /// Gather all metrics and encode them in Prometheus text format
    ///
    /// # Errors
    ///
    /// Returns an error if metric encoding fails.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();
        let metric_count = metric_families.len();

        tracing::debug!(
            metric_family_count = metric_count,
            "Encoding metrics to Prometheus text format"
        );

        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        encoder.encode(&metric_families, &mut buffer).map_err(|e| {
            tracing::error!(
                error = %e,
                metric_family_count = metric_count,
                "Prometheus text encoder failed"
            );
            e
        })?;

        String::from_utf8(buffer).map_err(|e| {
            prometheus::Error::Msg(format!("Prometheus output was not valid UTF-8: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new_registers_everything() {
        let metrics = Metrics::new().unwrap();
        metrics
            .record_request(BackendKind::OpenAi, Outcome::Streamed)
            .unwrap();
        metrics.record_trimmed(2);
        metrics.stream_event(BackendKind::OpenAi);
        metrics.stream_parse_failure(BackendKind::Simple);
        metrics.upstream_error(BackendKind::Simple);
        metrics.record_upload(UploadOutcome::Forwarded);

        let output = metrics.gather().unwrap();
        for name in [
            "chat_relay_requests_total",
            "chat_relay_history_messages_trimmed_total",
            STREAM_PARSE_FAILURES,
            "chat_relay_stream_events_total",
            "chat_relay_upstream_errors_total",
            "chat_relay_uploads_total",
        ] {
            assert!(output.contains(name), "missing {name} in:\n{output}");
        }
        assert!(output.contains(r#"chat_relay_requests_total{backend="openai",outcome="streamed"} 1"#));
    }

    #[test]
    fn test_counts_are_per_label() {
        let metrics = Metrics::new().unwrap();
        metrics.stream_parse_failure(BackendKind::OpenAi);
        metrics.stream_parse_failure(BackendKind::OpenAi);
        metrics.stream_parse_failure(BackendKind::Simple);

        assert_eq!(metrics.stream_parse_failures_count(BackendKind::OpenAi), 2);
        assert_eq!(metrics.stream_parse_failures_count(BackendKind::Simple), 1);
    }

    #[test]
    fn test_record_trimmed_ignores_zero() {
        let metrics = Metrics::new().unwrap();
        metrics.record_trimmed(0);
        metrics.record_trimmed(3);
        assert_eq!(metrics.trimmed_count(), 3);
    }

    #[test]
    fn test_outcome_from_error() {
        assert_eq!(
            Outcome::from_error(&AppError::Validation("x".into())),
            Outcome::Invalid
        );
        assert_eq!(
            Outcome::from_error(&AppError::Config("x".into())),
            Outcome::Misconfigured
        );
        assert_eq!(
            Outcome::from_error(&AppError::upstream_unreachable()),
            Outcome::UpstreamError
        );
        assert_eq!(
            Outcome::from_error(&AppError::Internal("x".into())),
            Outcome::InternalError
        );
    }

    #[test]
    fn test_separate_instances_do_not_share_registries() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_upload(UploadOutcome::Refused);
        assert_eq!(a.uploads_count(UploadOutcome::Refused), 1);
        assert_eq!(b.uploads_count(UploadOutcome::Refused), 0);
    }
}
