//! In-memory store, used for tests and ephemeral deployments.

use crate::store::{ConversationRecord, StoreFuture, TurnOrder, TurnStore};
use crate::types::{Conversation, ConversationStatus, ConversationSummary, Turn};
use parley_types::StorageError;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Keeps every conversation record in a process-local map.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<Uuid, ConversationRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TurnStore for MemoryStore {
    fn create(&self, conversation: Conversation) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.records
                .write()
                .await
                .insert(conversation.id, ConversationRecord::new(conversation));
            Ok(())
        })
    }

    fn conversation(&self, id: Uuid) -> StoreFuture<'_, Conversation> {
        Box::pin(async move {
            self.records
                .read()
                .await
                .get(&id)
                .map(|r| r.conversation.clone())
                .ok_or(StorageError::ConversationNotFound { id })
        })
    }

    fn set_status(&self, id: Uuid, status: ConversationStatus) -> StoreFuture<'_, Conversation> {
        Box::pin(async move {
            let mut records = self.records.write().await;
            let record = records
                .get_mut(&id)
                .ok_or(StorageError::ConversationNotFound { id })?;
            record.conversation.status = status;
            Ok(record.conversation.clone())
        })
    }

    fn append(&self, turn: Turn) -> StoreFuture<'_, Conversation> {
        Box::pin(async move {
            let id = turn.conversation_id;
            let mut records = self.records.write().await;
            let record = records
                .get_mut(&id)
                .ok_or(StorageError::ConversationNotFound { id })?;
            record.push(turn)?;
            Ok(record.conversation.clone())
        })
    }

    fn turns(
        &self,
        id: Uuid,
        limit: Option<usize>,
        order: TurnOrder,
    ) -> StoreFuture<'_, Vec<Turn>> {
        Box::pin(async move {
            self.records
                .read()
                .await
                .get(&id)
                .map(|r| r.select(limit, order))
                .ok_or(StorageError::ConversationNotFound { id })
        })
    }

    fn list<'a>(&'a self, owner: Option<&'a str>) -> StoreFuture<'a, Vec<ConversationSummary>> {
        Box::pin(async move {
            let records = self.records.read().await;
            let mut summaries: Vec<ConversationSummary> = records
                .values()
                .filter(|r| owner.is_none_or(|o| r.conversation.owner == o))
                .map(ConversationRecord::to_summary)
                .collect();
            summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            Ok(summaries)
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parley_types::Role;

    #[tokio::test]
    async fn append_to_missing_conversation_fails() {
        let store = MemoryStore::new();
        let turn = Turn::new(Uuid::new_v4(), 0, Role::User, "hi".into(), false, Utc::now());
        let result = store.append(turn).await;
        assert!(matches!(
            result,
            Err(StorageError::ConversationNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn append_updates_counters() {
        let store = MemoryStore::new();
        let conv = Conversation::new("alice", None);
        store.create(conv.clone()).await.unwrap();
        let turn = Turn::new(conv.id, 0, Role::User, "hi".into(), false, Utc::now());
        let updated = store.append(turn).await.unwrap();
        assert_eq!(updated.total_messages, 1);
        assert_eq!(store.conversation(conv.id).await.unwrap().total_messages, 1);
    }
}
