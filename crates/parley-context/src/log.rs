//! Append-only, per-conversation message log.

use crate::error::ContextError;
use crate::store::{TurnOrder, TurnStore};
use crate::types::{Conversation, ConversationStatus, ConversationSummary, Turn};
use chrono::Utc;
use parley_types::{Role, StorageError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Visibility-checked access to conversations and their turns.
///
/// The log never rewrites or removes turns. Callers that append must
/// serialize writers per conversation (see [`crate::ConversationLocks`]).
#[derive(Clone)]
pub struct MessageLog {
    store: Arc<dyn TurnStore>,
    fetch_timeout: Option<Duration>,
}

impl MessageLog {
    pub fn new(store: Arc<dyn TurnStore>) -> Self {
        Self {
            store,
            fetch_timeout: None,
        }
    }

    /// Fail any read that takes longer than `timeout` instead of waiting.
    pub fn with_fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Start a new conversation for `owner`.
    pub async fn create(
        &self,
        owner: &str,
        title: Option<String>,
    ) -> Result<Conversation, ContextError> {
        let conversation = Conversation::new(owner, title);
        self.store.create(conversation.clone()).await?;
        info!(
            "Created conversation {} for {}",
            conversation.short_id(),
            owner
        );
        Ok(conversation)
    }

    /// Fetch an active conversation. Deleted conversations are not visible.
    pub async fn conversation(&self, id: Uuid) -> Result<Conversation, ContextError> {
        let conversation = self.fetch(id, self.store.conversation(id)).await?;
        match conversation.status {
            ConversationStatus::Active => Ok(conversation),
            ConversationStatus::Deleted => Err(ContextError::Deleted { id }),
        }
    }

    /// Append a turn and return it with its computed token count,
    /// fingerprint, position and timestamp.
    pub async fn append(
        &self,
        id: Uuid,
        role: Role,
        content: String,
        has_attachments: bool,
    ) -> Result<Turn, ContextError> {
        if content.is_empty() {
            return Err(ContextError::EmptyMessage);
        }
        self.conversation(id).await?;

        let last = self
            .fetch(id, self.store.turns(id, Some(1), TurnOrder::NewestFirst))
            .await?
            .pop();
        let (seq, created_at) = match &last {
            Some(prev) => (prev.seq + 1, Utc::now().max(prev.created_at)),
            None => (0, Utc::now()),
        };

        let turn = Turn::new(id, seq, role, content, has_attachments, created_at);
        self.store
            .append(turn.clone())
            .await
            .map_err(storage_error)?;
        info!(
            conversation = %id,
            seq,
            role = %role,
            tokens = turn.token_count,
            "Appended turn"
        );
        Ok(turn)
    }

    /// The most recent `limit` turns of an active conversation.
    pub async fn recent(
        &self,
        id: Uuid,
        limit: usize,
        order: TurnOrder,
    ) -> Result<Vec<Turn>, ContextError> {
        self.conversation(id).await?;
        self.fetch(id, self.store.turns(id, Some(limit), order)).await
    }

    /// The full history of an active conversation.
    pub async fn history(&self, id: Uuid, order: TurnOrder) -> Result<Vec<Turn>, ContextError> {
        self.conversation(id).await?;
        self.fetch(id, self.store.turns(id, None, order)).await
    }

    /// Hide a conversation. Its turns stay in the store.
    pub async fn delete(&self, id: Uuid) -> Result<Conversation, ContextError> {
        let conversation = self.conversation(id).await?;
        let updated = self
            .store
            .set_status(conversation.id, ConversationStatus::Deleted)
            .await
            .map_err(storage_error)?;
        info!("Soft-deleted conversation {}", updated.short_id());
        Ok(updated)
    }

    /// Make a soft-deleted conversation visible again.
    pub async fn restore(&self, id: Uuid) -> Result<Conversation, ContextError> {
        let conversation = self.fetch(id, self.store.conversation(id)).await?;
        if conversation.is_active() {
            return Ok(conversation);
        }
        let updated = self
            .store
            .set_status(id, ConversationStatus::Active)
            .await
            .map_err(storage_error)?;
        info!("Restored conversation {}", updated.short_id());
        Ok(updated)
    }

    /// Active conversations, most recently updated first.
    pub async fn list(
        &self,
        owner: Option<&str>,
    ) -> Result<Vec<ConversationSummary>, ContextError> {
        let summaries = self.store.list(owner).await?;
        Ok(summaries
            .into_iter()
            .filter(|s| s.status == ConversationStatus::Active)
            .collect())
    }

    /// Find an active conversation by ID prefix. Errors if ambiguous.
    pub async fn find_by_prefix(&self, prefix: &str) -> Result<Conversation, ContextError> {
        let prefix_lower = prefix.to_lowercase();
        let matches: Vec<Uuid> = self
            .list(None)
            .await?
            .into_iter()
            .filter(|s| s.id.to_string().starts_with(&prefix_lower))
            .map(|s| s.id)
            .collect();

        match matches.len() {
            0 => Err(ContextError::PrefixNotFound {
                prefix: prefix.to_string(),
            }),
            1 => self.conversation(matches[0]).await,
            count => Err(ContextError::AmbiguousPrefix {
                prefix: prefix.to_string(),
                count,
            }),
        }
    }

    /// Await a store read, applying the fetch deadline.
    async fn fetch<T>(
        &self,
        id: Uuid,
        fut: impl Future<Output = Result<T, StorageError>>,
    ) -> Result<T, ContextError> {
        let result = match self.fetch_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, fut).await {
                Ok(result) => result,
                Err(_) => {
                    let timeout_ms = timeout.as_millis() as u64;
                    warn!(conversation = %id, timeout_ms, "Store fetch timed out");
                    return Err(ContextError::Timeout { timeout_ms });
                }
            },
            None => fut.await,
        };
        result.map_err(storage_error)
    }
}

/// Map visibility failures reported by the store to their log-level errors.
fn storage_error(err: StorageError) -> ContextError {
    match err {
        StorageError::ConversationNotFound { id } => {
            debug!(conversation = %id, "Conversation not in store");
            ContextError::NotFound { id }
        }
        StorageError::ConversationDeleted { id } => ContextError::Deleted { id },
        other => other.into(),
    }
}
