//! History budgeting
//!
//! Selects the subset of a conversation that fits the model's context window
//! before the request goes upstream. The result always satisfies:
//!
//! ```text
//! estimate(result) <= limit - reserved   OR   result.len() == 1
//! ```
//!
//! Two trimming policies exist and produce different results for the same
//! input, so the active one is chosen explicitly in configuration.

use super::Message;
use crate::error::{AppError, AppResult};
use crate::tokenizer::{TokenEstimator, sequence_tokens};
use serde::{Deserialize, Serialize};

/// Token ceiling for a request, with room set aside for the model's reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    limit: usize,
    reserved: usize,
}

impl TokenBudget {
    pub const DEFAULT_LIMIT: usize = 4096;
    pub const DEFAULT_RESERVED: usize = 512;

    /// Create a budget
    ///
    /// # Errors
    ///
    /// Returns an error if `limit` is zero.
    pub fn new(limit: usize, reserved: usize) -> AppResult<Self> {
        if limit == 0 {
            return Err(AppError::Config(
                "token limit must be greater than 0".to_string(),
            ));
        }
        Ok(Self { limit, reserved })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn reserved(&self) -> usize {
        self.reserved
    }

    /// Ceiling available to input history (`limit - reserved`)
    pub fn usable(&self) -> usize {
        self.limit.saturating_sub(self.reserved)
    }
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self {
            limit: Self::DEFAULT_LIMIT,
            reserved: Self::DEFAULT_RESERVED,
        }
    }
}

/// Which messages get dropped when the history is over budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrimPolicy {
    /// Drop the oldest message after position 0, re-estimating each round
    Front,
    /// Drop the message at the midpoint of the original sequence, using
    /// per-message counts computed once up front
    #[default]
    Middle,
}

/// Result of fitting a conversation into a budget
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetOutcome {
    pub messages: Vec<Message>,
    /// Number of messages removed
    pub removed: usize,
    /// Estimated tokens of `messages`
    pub estimated_tokens: usize,
}

/// Trims conversation history to a token budget
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryBudgeter {
    budget: TokenBudget,
    policy: TrimPolicy,
}

impl HistoryBudgeter {
    pub fn new(budget: TokenBudget, policy: TrimPolicy) -> Self {
        Self { budget, policy }
    }

    pub fn budget(&self) -> TokenBudget {
        self.budget
    }

    pub fn policy(&self) -> TrimPolicy {
        self.policy
    }

    /// Fit `messages` into the budget
    ///
    /// Never removes the last surviving message, even when it alone exceeds the
    /// ceiling. Running `fit` on its own output removes nothing.
    pub fn fit(&self, messages: Vec<Message>, estimator: &dyn TokenEstimator) -> BudgetOutcome {
        let original_len = messages.len();
        let (messages, estimated_tokens) = match self.policy {
            TrimPolicy::Front => self.trim_front(messages, estimator),
            TrimPolicy::Middle => self.trim_middle(messages, estimator),
        };

        BudgetOutcome {
            removed: original_len - messages.len(),
            estimated_tokens,
            messages,
        }
    }

    fn trim_front(
        &self,
        mut messages: Vec<Message>,
        estimator: &dyn TokenEstimator,
    ) -> (Vec<Message>, usize) {
        let ceiling = self.budget.usable();
        let mut total = estimator.estimate(&messages);

        while total > ceiling && messages.len() > 1 {
            messages.remove(1);
            total = estimator.estimate(&messages);
        }

        (messages, total)
    }

    fn trim_middle(
        &self,
        mut messages: Vec<Message>,
        estimator: &dyn TokenEstimator,
    ) -> (Vec<Message>, usize) {
        let ceiling = self.budget.usable();
        let mut counts: Vec<usize> = messages
            .iter()
            .map(|m| estimator.message_tokens(m))
            .collect();
        let mut total = sequence_tokens(counts.iter().copied());

        // The midpoint is fixed by the original length. Once the sequence
        // shrinks past it, the last message goes instead. Index 0 is never
        // removed while more than one message remains.
        let midpoint = messages.len() / 2;
        while total > ceiling && messages.len() > 1 {
            let index = midpoint.min(messages.len() - 1);
            messages.remove(index);
            total -= counts.remove(index);
        }

        (messages, total)
    }
}
