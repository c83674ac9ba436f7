//! Token estimation for conversation history
//!
//! The history budgeter uses an estimator as its loop-termination oracle, so every
//! implementation must be deterministic and monotonic: adding text or messages
//! never lowers the estimate.
//!
//! Sequence estimates are defined as a fixed reply-priming cost plus the sum of
//! per-message costs, which keeps per-message bookkeeping and whole-sequence
//! estimates exactly consistent.

use crate::conversation::Message;
use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tiktoken_rs::CoreBPE;

/// Tokens the backend adds to prime the assistant reply
pub const REPLY_PRIMING_TOKENS: usize = 3;

/// Framing tokens around every chat message (start, separator, end markers)
pub const MESSAGE_FRAMING_TOKENS: usize = 3;

/// Characters per token for the heuristic estimator
const CHARS_PER_TOKEN: usize = 4;

/// Estimates token counts for chat messages
pub trait TokenEstimator: Send + Sync {
    /// Tokens needed to encode a piece of text
    fn text_tokens(&self, text: &str) -> usize;

    /// Tokens for a single message, including role and framing
    fn message_tokens(&self, message: &Message) -> usize {
        MESSAGE_FRAMING_TOKENS
            + self.text_tokens(message.role().as_str())
            + self.text_tokens(message.content())
    }

    /// Tokens for a whole conversation
    fn estimate(&self, messages: &[Message]) -> usize {
        sequence_tokens(messages.iter().map(|m| self.message_tokens(m)))
    }
}

/// Combine per-message counts into a sequence estimate
///
/// An empty sequence costs nothing; any non-empty one pays the reply priming once.
pub fn sequence_tokens(per_message: impl IntoIterator<Item = usize>) -> usize {
    let mut iter = per_message.into_iter().peekable();
    if iter.peek().is_none() {
        return 0;
    }
    REPLY_PRIMING_TOKENS + iter.sum::<usize>()
}

/// Which estimator the service uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenizerKind {
    /// cl100k_base BPE encoding
    #[default]
    Cl100k,
    /// ~4 characters per token
    Heuristic,
}

impl TokenizerKind {
    /// Build the configured estimator
    pub fn build(self) -> AppResult<Arc<dyn TokenEstimator>> {
        Ok(match self {
            Self::Cl100k => Arc::new(Cl100kEstimator::new()?),
            Self::Heuristic => Arc::new(CharEstimator),
        })
    }
}

/// Estimator backed by the cl100k_base vocabulary
pub struct Cl100kEstimator {
    bpe: CoreBPE,
}

impl Cl100kEstimator {
    /// Load the cl100k_base encoding tables
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` if the embedded vocabulary fails to load.
    pub fn new() -> AppResult<Self> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| {
            tracing::error!(error = %e, "Failed to load cl100k_base encoding");
            AppError::Internal(format!("Failed to load tokenizer: {}", e))
        })?;
        Ok(Self { bpe })
    }
}

impl TokenEstimator for Cl100kEstimator {
    fn text_tokens(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

/// Character-count heuristic: ceil(chars / 4)
#[derive(Debug, Clone, Copy, Default)]
pub struct CharEstimator;

impl TokenEstimator for CharEstimator {
    fn text_tokens(&self, text: &str) -> usize {
        text.chars().count().div_ceil(CHARS_PER_TOKEN)
    }
}
