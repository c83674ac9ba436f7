//! Upstream completion backends
//!
//! [`BackendKind`] is chosen once in configuration and drives both request
//! shaping ([`request`]) and stream decoding ([`crate::stream`]).

pub mod client;
pub mod request;

pub use client::{ModelEntry, ModelList, UploadedFile, UpstreamClient};
pub use request::{BackendRequest, WireMessage, normalize};

use serde::{Deserialize, Serialize};

/// Wire dialect spoken by the upstream service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum BackendKind {
    /// OpenAI-compatible `/chat/completions` with `choices[0].delta` chunks
    #[serde(rename = "openai")]
    OpenAi,
    /// Inference server speaking `{role, content}` SSE at `/chat`
    #[serde(rename = "simple")]
    Simple,
}

impl BackendKind {
    /// Label used in config, logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Simple => "simple",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
