//! Context-manager error types.

use parley_types::{BackendError, StorageError};
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur while managing a conversation's context.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Conversation not found: {id}")]
    NotFound { id: Uuid },

    #[error("Conversation {id} has been deleted")]
    Deleted { id: Uuid },

    #[error("Ambiguous conversation prefix '{prefix}': matches {count} conversations")]
    AmbiguousPrefix { prefix: String, count: usize },

    #[error("No conversations match prefix '{prefix}'")]
    PrefixNotFound { prefix: String },

    #[error("Message is empty: provide text or at least one attachment")]
    EmptyMessage,

    #[error("Message is too large: ~{estimated} tokens exceeds the limit of {cap} tokens")]
    MessageTooLarge { estimated: u64, cap: u64 },

    #[error("Storage fetch timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Model backend failed: {0}")]
    Backend(#[from] BackendError),
}

impl ContextError {
    /// Whether the error was caused by the caller's input rather than infrastructure.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            ContextError::EmptyMessage | ContextError::MessageTooLarge { .. }
        )
    }
}
