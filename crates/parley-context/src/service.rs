//! One chat turn, end to end.

use crate::advisor::exclusion_warning;
use crate::attachments::{Attachment, merge};
use crate::error::ContextError;
use crate::locks::ConversationLocks;
use crate::manager::ContextManager;
use crate::usage::TokenUsage;
use parley_types::{BackendError, CompletionRequest, ModelBackend, Role};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// What the caller gets back after a chat turn.
#[derive(Debug, Clone, Serialize)]
pub struct ChatTurnResult {
    pub reply_text: String,
    pub token_usage: TokenUsage,
    /// Older turns were left out of the request window.
    pub trimmed_history: bool,
    /// Older turns the next request would leave out.
    pub messages_advised_excluded: usize,
    /// The newest turn was cut down to fit the request window.
    pub truncated: bool,
    pub warning: Option<String>,
}

/// Runs chat turns against a model backend with per-conversation serialization.
pub struct ChatService {
    manager: ContextManager,
    backend: Arc<dyn ModelBackend>,
    locks: ConversationLocks,
    system_instruction: String,
}

impl ChatService {
    pub fn new(
        manager: ContextManager,
        backend: Arc<dyn ModelBackend>,
        system_instruction: impl Into<String>,
    ) -> Self {
        Self {
            manager,
            backend,
            locks: ConversationLocks::new(),
            system_instruction: system_instruction.into(),
        }
    }

    /// Share a lock table with other services touching the same store.
    pub fn with_locks(mut self, locks: ConversationLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn manager(&self) -> &ContextManager {
        &self.manager
    }

    /// Merge, validate and append the user's turn, send the budgeted window
    /// to the backend, append the reply and report usage.
    ///
    /// If the backend fails, the user's turn stays in the log.
    pub async fn send_turn(
        &self,
        id: Uuid,
        user_text: &str,
        attachments: &[Attachment],
    ) -> Result<ChatTurnResult, ContextError> {
        let guard = self.locks.acquire(id).await;
        let result = self.run_turn(id, user_text, attachments).await;
        drop(guard);
        self.locks.release(id);
        result
    }

    async fn run_turn(
        &self,
        id: Uuid,
        user_text: &str,
        attachments: &[Attachment],
    ) -> Result<ChatTurnResult, ContextError> {
        let budget = *self.manager.budget();
        let log = self.manager.log();

        let composite = merge(user_text, attachments);
        budget.check_message(&composite)?;

        let user_turn = log
            .append(id, Role::User, composite, !attachments.is_empty())
            .await?;

        let window = self
            .manager
            .build_window(id, budget.effective_budget())
            .await?;
        // A truncated newest turn is reported as truncation, not trimming.
        let trimmed_history = !window.truncated && (window.len() as u64) < user_turn.seq + 1;

        let request = CompletionRequest {
            system: self.system_instruction.clone(),
            messages: window.to_messages(),
            max_tokens: budget.response_reserve_tokens,
        };
        debug!(
            conversation = %id,
            backend = self.backend.name(),
            messages = request.messages.len(),
            tokens = window.total_tokens,
            "Sending window to backend"
        );

        let reply_text = self.backend.complete(&request).await?;
        if reply_text.trim().is_empty() {
            return Err(BackendError::EmptyReply.into());
        }
        log.append(id, Role::Assistant, reply_text.clone(), false)
            .await?;

        let token_usage = self.manager.usage(id).await?;
        let messages_advised_excluded = self
            .manager
            .advisory_trim_count(id, budget.effective_budget())
            .await?;
        let warning = turn_warning(window.truncated, messages_advised_excluded, &token_usage);

        info!(
            conversation = %id,
            usage = token_usage.usage_percentage,
            trimmed_history,
            advised_excluded = messages_advised_excluded,
            "Chat turn complete"
        );

        Ok(ChatTurnResult {
            reply_text,
            token_usage,
            trimmed_history,
            messages_advised_excluded,
            truncated: window.truncated,
            warning,
        })
    }
}

/// The single most relevant warning for the caller, if any.
fn turn_warning(truncated: bool, advised_excluded: usize, usage: &TokenUsage) -> Option<String> {
    if truncated {
        return Some(
            "Your message was too long for the context window and was truncated".to_string(),
        );
    }
    if let Some(warning) = exclusion_warning(advised_excluded) {
        return Some(warning);
    }
    if usage.is_near_limit {
        return Some(format!(
            "Conversation is using {:.1}% of the context window; older messages will soon be excluded",
            usage.usage_percentage
        ));
    }
    None
}
