//! Error hierarchy for Parley.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by a conversation storage backend.
///
/// These are infrastructure failures. They are passed through to callers
/// untouched; retry policy belongs to whoever owns the store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Conversation not found in store: {id}")]
    ConversationNotFound { id: Uuid },

    #[error("Conversation {id} is deleted and does not accept new turns")]
    ConversationDeleted { id: Uuid },

    #[error("Append conflict on conversation {id}: expected seq {expected}, got {actual}")]
    Conflict { id: Uuid, expected: u64, actual: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Errors from the model backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("Rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Backend error: {status} {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Backend returned an empty reply")]
    EmptyReply,

    #[error("Request timeout")]
    Timeout,
}

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file parse error at {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_names_positions() {
        let id = Uuid::nil();
        let err = StorageError::Conflict {
            id,
            expected: 3,
            actual: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("expected seq 3"));
        assert!(msg.contains("got 2"));
    }

    #[test]
    fn parse_error_names_the_file() {
        let err = ConfigError::Parse {
            path: "/home/a/.parley/config.toml".into(),
            message: "expected `]`".into(),
        };
        assert_eq!(
            err.to_string(),
            "Config file parse error at /home/a/.parley/config.toml: expected `]`"
        );
    }
}
