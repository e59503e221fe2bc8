//! Conversation log and context-window management for Parley.

pub mod advisor;
pub mod attachments;
pub mod budget;
pub mod error;
pub mod estimator;
pub mod locks;
pub mod log;
pub mod manager;
pub mod memory;
pub mod service;
pub mod store;
pub mod types;
pub mod usage;
pub mod window;

pub use advisor::{advisory_trim_count, exclusion_warning};
pub use attachments::{Attachment, merge};
pub use budget::{BudgetConfig, HistoryConfig};
pub use error::ContextError;
pub use estimator::estimate_tokens;
pub use locks::ConversationLocks;
pub use log::MessageLog;
pub use manager::ContextManager;
pub use memory::MemoryStore;
pub use service::{ChatService, ChatTurnResult};
pub use store::{ConversationRecord, FileStore, TurnOrder, TurnStore};
pub use types::{Conversation, ConversationStatus, ConversationSummary, Turn};
pub use usage::TokenUsage;
pub use window::{ContextWindow, TRUNCATION_MARKER, select_window, truncate_to_tokens};
