//! Storage collaborator contract and a JSON-file implementation.

use crate::locks::ConversationLocks;
use crate::types::{Conversation, ConversationStatus, ConversationSummary, Turn};
use parley_types::StorageError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use uuid::Uuid;

/// A boxed future returned by [`TurnStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Order in which turns are returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOrder {
    OldestFirst,
    NewestFirst,
}

/// Persistence for conversations and their append-only turn logs.
///
/// Stores only persist and order; token accounting and visibility rules live
/// above this trait. Dyn-compatible so the log can hold an `Arc<dyn TurnStore>`.
pub trait TurnStore: Send + Sync {
    /// Persist a new, empty conversation.
    fn create(&self, conversation: Conversation) -> StoreFuture<'_, ()>;

    /// Fetch conversation metadata regardless of status.
    fn conversation(&self, id: Uuid) -> StoreFuture<'_, Conversation>;

    /// Change the visibility status, returning the updated conversation.
    fn set_status(&self, id: Uuid, status: ConversationStatus) -> StoreFuture<'_, Conversation>;

    /// Append a turn. Fails with [`StorageError::Conflict`] unless `turn.seq`
    /// is exactly the next position in the log, and with
    /// [`StorageError::ConversationDeleted`] if the conversation is deleted.
    fn append(&self, turn: Turn) -> StoreFuture<'_, Conversation>;

    /// Fetch turns, optionally only the most recent `limit`, in `order`.
    fn turns(
        &self,
        id: Uuid,
        limit: Option<usize>,
        order: TurnOrder,
    ) -> StoreFuture<'_, Vec<Turn>>;

    /// Summaries of all conversations (optionally for one owner), most recent first.
    fn list<'a>(&'a self, owner: Option<&'a str>) -> StoreFuture<'a, Vec<ConversationSummary>>;

    /// Store name for logging/display.
    fn name(&self) -> &str;
}

/// A conversation together with its full turn log, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub conversation: Conversation,
    pub turns: Vec<Turn>,
}

impl ConversationRecord {
    pub fn new(conversation: Conversation) -> Self {
        Self {
            conversation,
            turns: Vec::new(),
        }
    }

    /// Decode a persisted record. Cached counters are rebuilt from the turns.
    pub fn from_json(data: &str) -> Result<Self, StorageError> {
        let mut record: ConversationRecord = serde_json::from_str(data)?;
        record.conversation.recompute_counters(&record.turns);
        Ok(record)
    }

    /// Append a turn at the next position and fold it into the counters.
    pub fn push(&mut self, turn: Turn) -> Result<(), StorageError> {
        let id = self.conversation.id;
        if self.conversation.status == ConversationStatus::Deleted {
            return Err(StorageError::ConversationDeleted { id });
        }
        let expected = self.turns.len() as u64;
        if turn.conversation_id != id || turn.seq != expected {
            return Err(StorageError::Conflict {
                id,
                expected,
                actual: turn.seq,
            });
        }
        self.conversation.apply_turn(&turn);
        self.turns.push(turn);
        Ok(())
    }

    /// The most recent `limit` turns (all if `None`) in the requested order.
    pub fn select(&self, limit: Option<usize>, order: TurnOrder) -> Vec<Turn> {
        let start = limit.map_or(0, |n| self.turns.len().saturating_sub(n));
        let mut turns = self.turns[start..].to_vec();
        if order == TurnOrder::NewestFirst {
            turns.reverse();
        }
        turns
    }

    pub fn to_summary(&self) -> ConversationSummary {
        self.conversation.to_summary(&self.turns)
    }
}

/// File-based store. Each conversation is a JSON file in `conversations_dir`.
///
/// Writes to one conversation are serialized in-process, so a status change
/// and an append never overwrite each other's load/modify/save.
pub struct FileStore {
    conversations_dir: PathBuf,
    writers: ConversationLocks,
}

impl FileStore {
    /// Create a new store, ensuring the conversations directory exists.
    pub async fn new(data_dir: PathBuf) -> Result<Self, StorageError> {
        let conversations_dir = data_dir.join("conversations");
        tokio::fs::create_dir_all(&conversations_dir).await?;
        Ok(Self {
            conversations_dir,
            writers: ConversationLocks::new(),
        })
    }

    /// Save a record to disk (atomic write: .tmp → rename).
    async fn save(&self, record: &ConversationRecord) -> Result<(), StorageError> {
        let id = record.conversation.id;
        let path = self.record_path(id);
        let tmp_path = self
            .conversations_dir
            .join(format!("{id}.{}.tmp", Uuid::new_v4().simple()));
        let json = serde_json::to_string_pretty(record)?;
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<ConversationRecord, StorageError> {
        let path = self.record_path(id);
        if !tokio::fs::try_exists(&path).await? {
            return Err(StorageError::ConversationNotFound { id });
        }
        let data = tokio::fs::read_to_string(&path).await?;
        ConversationRecord::from_json(&data)
    }

    /// Load, modify and save one record while holding its writer lock.
    async fn update<T>(
        &self,
        id: Uuid,
        modify: impl FnOnce(&mut ConversationRecord) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let guard = self.writers.acquire(id).await;
        let result = async {
            let mut record = self.load(id).await?;
            let value = modify(&mut record)?;
            self.save(&record).await?;
            Ok::<T, StorageError>(value)
        }
        .await;
        drop(guard);
        self.writers.release(id);
        result
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.conversations_dir.join(format!("{id}.json"))
    }
}

impl TurnStore for FileStore {
    fn create(&self, conversation: Conversation) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.save(&ConversationRecord::new(conversation)).await })
    }

    fn conversation(&self, id: Uuid) -> StoreFuture<'_, Conversation> {
        Box::pin(async move { Ok(self.load(id).await?.conversation) })
    }

    fn set_status(&self, id: Uuid, status: ConversationStatus) -> StoreFuture<'_, Conversation> {
        Box::pin(async move {
            self.update(id, |record| {
                record.conversation.status = status;
                Ok(record.conversation.clone())
            })
            .await
        })
    }

    fn append(&self, turn: Turn) -> StoreFuture<'_, Conversation> {
        Box::pin(async move {
            self.update(turn.conversation_id, |record| {
                record.push(turn)?;
                Ok(record.conversation.clone())
            })
            .await
        })
    }

    fn turns(
        &self,
        id: Uuid,
        limit: Option<usize>,
        order: TurnOrder,
    ) -> StoreFuture<'_, Vec<Turn>> {
        Box::pin(async move { Ok(self.load(id).await?.select(limit, order)) })
    }

    fn list<'a>(&'a self, owner: Option<&'a str>) -> StoreFuture<'a, Vec<ConversationSummary>> {
        Box::pin(async move {
            let mut summaries = Vec::new();

            let mut entries = tokio::fs::read_dir(&self.conversations_dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                let name_str = name.to_string_lossy();
                if !name_str.ends_with(".json") {
                    continue;
                }
                let data = match tokio::fs::read_to_string(entry.path()).await {
                    Ok(data) => data,
                    Err(e) => {
                        tracing::warn!("Failed to read conversation {}: {}", name_str, e);
                        continue;
                    }
                };
                match ConversationRecord::from_json(&data) {
                    Ok(record) => {
                        if owner.is_none_or(|o| record.conversation.owner == o) {
                            summaries.push(record.to_summary());
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse conversation {}: {}", name_str, e);
                    }
                }
            }

            summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            Ok(summaries)
        })
    }

    fn name(&self) -> &str {
        "file"
    }
}
