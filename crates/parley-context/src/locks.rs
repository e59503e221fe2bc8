//! Per-conversation mutual exclusion.
//!
//! A chat turn appends, builds a window, calls the backend and appends again.
//! Holding the conversation's lock for the whole sequence keeps the log's
//! positions and cached counters consistent when requests race.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Async locks keyed by conversation id. Cheap to clone; clones share locks.
#[derive(Clone, Default)]
pub struct ConversationLocks {
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`. Released when the guard drops.
    pub async fn acquire(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(id).or_default().clone();
        lock.lock_owned().await
    }

    /// Forget `id`'s lock if nobody holds or waits on it. Call after the
    /// guard is dropped.
    pub fn release(&self, id: Uuid) {
        self.locks.remove_if(&id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Drop lock entries nobody holds or waits on.
    pub fn prune(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Number of tracked conversations.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
