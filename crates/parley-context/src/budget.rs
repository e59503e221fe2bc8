//! Token budget and history-fetch settings.

use crate::error::ContextError;
use crate::estimator::estimate_tokens;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default total context size of the deployed model.
pub const DEFAULT_MAX_CONTEXT_TOKENS: u64 = 24_000;

/// Default tokens held back for the model's reply.
pub const DEFAULT_RESPONSE_RESERVE_TOKENS: u64 = 4_000;

/// Default allowance for the fixed system instruction.
pub const DEFAULT_SYSTEM_PROMPT_TOKENS: u64 = 50;

/// Default hard cap for a single incoming message.
pub const DEFAULT_MAX_MESSAGE_TOKENS: u64 = 15_000;

/// Default number of most-recent turns scanned when building a window.
pub const DEFAULT_RECENT_TURN_LIMIT: usize = 100;

/// Token budget constants for a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetConfig {
    pub max_context_tokens: u64,
    pub response_reserve_tokens: u64,
    pub system_prompt_tokens: u64,
    /// Messages estimated above this are rejected before they are appended.
    pub max_message_tokens: u64,
}

impl BudgetConfig {
    /// Tokens available for the request itself: total context minus the reply reserve.
    pub fn effective_budget(&self) -> u64 {
        self.max_context_tokens
            .saturating_sub(self.response_reserve_tokens)
    }

    /// Check that `content` may be appended as one message, returning its
    /// estimated size.
    pub fn check_message(&self, content: &str) -> Result<u64, ContextError> {
        if content.is_empty() {
            return Err(ContextError::EmptyMessage);
        }
        let estimated = estimate_tokens(content);
        if estimated > self.max_message_tokens {
            return Err(ContextError::MessageTooLarge {
                estimated,
                cap: self.max_message_tokens,
            });
        }
        Ok(estimated)
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: DEFAULT_MAX_CONTEXT_TOKENS,
            response_reserve_tokens: DEFAULT_RESPONSE_RESERVE_TOKENS,
            system_prompt_tokens: DEFAULT_SYSTEM_PROMPT_TOKENS,
            max_message_tokens: DEFAULT_MAX_MESSAGE_TOKENS,
        }
    }
}

/// How history is fetched from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Upper bound on turns scanned for window building and usage.
    pub recent_turn_limit: usize,
    /// Deadline for a single store fetch; `None` waits indefinitely.
    pub fetch_timeout_ms: Option<u64>,
}

impl HistoryConfig {
    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            recent_turn_limit: DEFAULT_RECENT_TURN_LIMIT,
            fetch_timeout_ms: None,
        }
    }
}
