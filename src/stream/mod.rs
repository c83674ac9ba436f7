//! Response reshaping
//!
//! Converts the upstream's streamed reply, in whichever dialect the configured
//! backend speaks, into one canonical event stream for the browser:
//!
//! ```text
//! data: {"content":"Hel","role":"assistant"}
//! data: {"content":"lo","role":"assistant"}
//! data: [DONE]
//! ```
//!
//! The stream is pull based: an upstream chunk is read only after every event
//! decoded from the previous chunk has been consumed. Dropping the stream drops
//! the upstream body, which closes the connection.

use crate::backend::BackendKind;
use crate::error::GENERIC_UPSTREAM_ERROR;
use crate::metrics::Metrics;
use axum::response::sse::Event;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde::de::IgnoredAny;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;

/// Longest line kept while waiting for its terminator
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Payload marking the end of the stream
pub const DONE_SENTINEL: &str = "[DONE]";

const DATA_PREFIX: &str = "data:";

/// One canonical event sent to the browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Message { role: String, content: String },
    Done,
    /// Upstream failed after the stream started
    Error { message: String },
}

impl StreamEvent {
    pub fn message(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Message {
            role: role.into(),
            content: content.into(),
        }
    }

    /// SSE `data:` payload for this event
    pub fn data(&self) -> String {
        match self {
            Self::Message { role, content } => {
                serde_json::json!({ "content": content, "role": role }).to_string()
            }
            Self::Done => DONE_SENTINEL.to_string(),
            Self::Error { message } => {
                serde_json::json!({ "success": false, "error": message }).to_string()
            }
        }
    }

    pub fn to_event(&self) -> Event {
        Event::default().data(self.data())
    }

    /// Whether nothing may follow this event
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Message { .. })
    }
}

/// Non-fatal decoding failure for a single line
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid JSON in stream payload: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("stream line of {len} bytes exceeds the line length limit")]
    LineTooLong { len: usize },
}

/// Splits a byte stream into `\n`-terminated lines
///
/// A trailing partial line is carried over to the next chunk. Lines are decoded
/// as UTF-8 only once complete, so multi-byte characters may straddle chunks.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
    /// Inside an oversized line; drop bytes until the next terminator
    discarding: bool,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every line it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<String, FrameError>> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];

            if self.discarding {
                self.discarding = false;
                self.buffer.clear();
                continue;
            }

            let len = self.buffer.len() + head.len();
            if len > MAX_LINE_BYTES {
                self.buffer.clear();
                lines.push(Err(FrameError::LineTooLong { len }));
                continue;
            }

            self.buffer.extend_from_slice(head);
            lines.push(Ok(self.take_line()));
        }

        if !rest.is_empty() && !self.discarding {
            let len = self.buffer.len() + rest.len();
            if len > MAX_LINE_BYTES {
                self.buffer.clear();
                self.discarding = true;
                lines.push(Err(FrameError::LineTooLong { len }));
            } else {
                self.buffer.extend_from_slice(rest);
            }
        }

        lines
    }

    /// Flush an unterminated final line
    pub fn finish(&mut self) -> Option<String> {
        let discarding = std::mem::take(&mut self.discarding);
        if discarding || self.buffer.is_empty() {
            self.buffer.clear();
            return None;
        }
        Some(self.take_line())
    }

    fn take_line(&mut self) -> String {
        if self.buffer.last() == Some(&b'\r') {
            self.buffer.pop();
        }
        let line = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        line
    }
}

/// `{"choices":[{"delta":{"role":..,"content":..}}]}`
#[derive(Debug, Deserialize)]
struct DeltaChunk {
    choices: Vec<DeltaChoice>,
}

#[derive(Debug, Deserialize)]
struct DeltaChoice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

impl DeltaChunk {
    fn into_event(self) -> Option<StreamEvent> {
        let delta = self.choices.into_iter().next()?.delta.unwrap_or_default();
        let has_role = delta.role.as_deref().is_some_and(|r| !r.is_empty());
        let has_content = delta.content.as_deref().is_some_and(|c| !c.is_empty());
        if !has_role && !has_content {
            return None;
        }
        Some(StreamEvent::Message {
            role: delta
                .role
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| "assistant".to_string()),
            content: delta.content.unwrap_or_default(),
        })
    }
}

/// `{"role":..,"content":..}` as sent by role/content inference servers
#[derive(Debug, Deserialize)]
struct DirectChunk {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SimplePayload {
    Direct(DirectChunk),
    Delta(DeltaChunk),
    Other(IgnoredAny),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OpenAiPayload {
    Delta(DeltaChunk),
    Other(IgnoredAny),
}

/// Decode one `data:` payload with the decoder for `kind`
///
/// `Ok(None)` means the payload was valid JSON carrying nothing to emit.
pub fn decode_payload(kind: BackendKind, payload: &str) -> Result<Option<StreamEvent>, FrameError> {
    match kind {
        BackendKind::OpenAi => match serde_json::from_str::<OpenAiPayload>(payload)? {
            OpenAiPayload::Delta(chunk) => Ok(chunk.into_event()),
            OpenAiPayload::Other(_) => Ok(None),
        },
        BackendKind::Simple => match serde_json::from_str::<SimplePayload>(payload)? {
            SimplePayload::Direct(DirectChunk { role, content }) => {
                if role.is_empty() || content.is_empty() {
                    // An empty direct pair defers to a delta in the same payload
                    return Ok(serde_json::from_str::<DeltaChunk>(payload)
                        .ok()
                        .and_then(DeltaChunk::into_event));
                }
                Ok(Some(StreamEvent::Message { role, content }))
            }
            SimplePayload::Delta(chunk) => Ok(chunk.into_event()),
            SimplePayload::Other(_) => Ok(None),
        },
    }
}

/// Incremental decoder from upstream bytes to canonical events
pub struct Reshaper {
    kind: BackendKind,
    lines: LineDecoder,
    done: bool,
    parse_failures: u64,
    metrics: Option<Arc<Metrics>>,
}

impl Reshaper {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            lines: LineDecoder::new(),
            done: false,
            parse_failures: 0,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Whether `Done` has been produced
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Lines that failed to decode so far
    pub fn parse_failures(&self) -> u64 {
        self.parse_failures
    }

    /// Decode one upstream chunk
    ///
    /// Processing stops at the done sentinel; later lines in the same chunk and
    /// any later chunks are ignored.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }

        for line in self.lines.push(chunk) {
            let event = match line {
                Ok(line) => self.process_line(&line),
                Err(e) => {
                    self.record_failure(&e);
                    None
                }
            };
            if let Some(event) = event {
                let terminal = event.is_terminal();
                events.push(event);
                if terminal {
                    break;
                }
            }
        }

        events
    }

    /// Upstream ended: flush the last partial line and guarantee a `Done`
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }

        if let Some(line) = self.lines.finish()
            && let Some(event) = self.process_line(&line)
        {
            events.push(event);
        }

        if !self.done {
            tracing::debug!(backend = %self.kind, "Upstream ended without done sentinel");
            self.done = true;
            events.push(StreamEvent::Done);
        }

        events
    }

    fn process_line(&mut self, line: &str) -> Option<StreamEvent> {
        let payload = line.strip_prefix(DATA_PREFIX)?.trim();
        if payload.is_empty() {
            return None;
        }

        if payload == DONE_SENTINEL {
            self.done = true;
            return Some(StreamEvent::Done);
        }

        match decode_payload(self.kind, payload) {
            Ok(Some(event)) => {
                if let Some(metrics) = &self.metrics {
                    metrics.stream_event(self.kind);
                }
                Some(event)
            }
            Ok(None) => {
                tracing::debug!(backend = %self.kind, "Skipping stream payload with no message");
                None
            }
            Err(e) => {
                self.record_failure(&e);
                None
            }
        }
    }

    fn record_failure(&mut self, error: &FrameError) {
        self.parse_failures += 1;
        tracing::warn!(
            backend = %self.kind,
            error = %error,
            "Failed to parse upstream stream line, continuing"
        );
        if let Some(metrics) = &self.metrics {
            metrics.stream_parse_failure(self.kind);
        }
    }
}

struct ReshapeState<S> {
    upstream: std::pin::Pin<Box<S>>,
    reshaper: Reshaper,
    pending: VecDeque<StreamEvent>,
    finished: bool,
}

/// Reshape an upstream byte stream into canonical events
///
/// Always ends with exactly one terminal event: `Done`, or `Error` if the
/// upstream read failed.
pub fn reshape<S, B, E>(
    kind: BackendKind,
    upstream: S,
    metrics: Option<Arc<Metrics>>,
) -> impl Stream<Item = StreamEvent> + Send + 'static
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let reshaper = match metrics {
        Some(metrics) => Reshaper::new(kind).with_metrics(metrics),
        None => Reshaper::new(kind),
    };
    let state = ReshapeState {
        upstream: Box::pin(upstream),
        reshaper,
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((event, state));
            }
            if state.finished {
                return None;
            }

            match state.upstream.next().await {
                Some(Ok(chunk)) => {
                    let events = state.reshaper.push_chunk(chunk.as_ref());
                    state.pending.extend(events);
                    state.finished = state.reshaper.is_done();
                }
                Some(Err(e)) => {
                    tracing::error!(
                        backend = %state.reshaper.kind,
                        error = %e,
                        "Upstream stream failed mid-response"
                    );
                    if let Some(metrics) = &state.reshaper.metrics {
                        metrics.upstream_error(state.reshaper.kind);
                    }
                    state.pending.push_back(StreamEvent::Error {
                        message: GENERIC_UPSTREAM_ERROR.to_string(),
                    });
                    state.finished = true;
                }
                None => {
                    state.pending.extend(state.reshaper.finish());
                    state.finished = true;
                }
            }
        }
    })
}
