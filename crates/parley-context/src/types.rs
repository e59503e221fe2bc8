//! Conversation and turn data types.

use crate::estimator::estimate_tokens;
use chrono::{DateTime, Utc};
use parley_types::Role;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// One role-tagged entry in a conversation's message log.
///
/// `token_count` and `fingerprint` are computed once from `content` when the
/// turn is created and never recomputed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: Uuid,
    pub conversation_id: Uuid,
    /// Zero-based position in the conversation.
    pub seq: u64,
    pub role: Role,
    pub content: String,
    pub token_count: u64,
    pub created_at: DateTime<Utc>,
    pub fingerprint: String,
    pub has_attachments: bool,
}

impl Turn {
    pub fn new(
        conversation_id: Uuid,
        seq: u64,
        role: Role,
        content: String,
        has_attachments: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            seq,
            role,
            token_count: estimate_tokens(&content),
            fingerprint: fingerprint(&content),
            content,
            created_at,
            has_attachments,
        }
    }

    /// Check that the stored content still matches its fingerprint.
    pub fn verify_fingerprint(&self) -> bool {
        fingerprint(&self.content) == self.fingerprint
    }
}

/// Hex-encoded SHA-256 of the content.
pub fn fingerprint(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Visibility state of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Deleted,
}

/// A conversation owned by exactly one user.
///
/// `total_messages` and `updated_at` are caches derived from the turn log;
/// [`Conversation::recompute_counters`] rebuilds them from scratch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub owner: String,
    pub title: Option<String>,
    pub status: ConversationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub total_messages: u64,
}

impl Conversation {
    /// Create a new empty, active conversation.
    pub fn new(owner: impl Into<String>, title: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            title,
            status: ConversationStatus::Active,
            created_at: now,
            updated_at: now,
            total_messages: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ConversationStatus::Active
    }

    /// Short hex prefix of the conversation ID for display.
    pub fn short_id(&self) -> String {
        self.id.to_string()[..8].to_string()
    }

    /// Fold a newly appended turn into the cached counters.
    /// Sets the title from the first user message if none is set.
    pub fn apply_turn(&mut self, turn: &Turn) {
        self.total_messages = turn.seq + 1;
        if turn.created_at > self.updated_at {
            self.updated_at = turn.created_at;
        }
        if self.title.is_none() && turn.role == Role::User && !turn.has_attachments {
            let trimmed = turn.content.trim();
            if !trimmed.is_empty() {
                self.title = Some(parley_types::truncate_str(trimmed, 60).to_string());
            }
        }
    }

    /// Rebuild the cached counters from the full, oldest-first turn log.
    pub fn recompute_counters(&mut self, turns: &[Turn]) {
        let created = self.created_at;
        self.total_messages = turns.len() as u64;
        self.updated_at = turns
            .iter()
            .map(|t| t.created_at)
            .max()
            .map_or(created, |latest| latest.max(created));
    }

    /// Build a summary for listing.
    pub fn to_summary(&self, turns: &[Turn]) -> ConversationSummary {
        ConversationSummary {
            id: self.id,
            owner: self.owner.clone(),
            title: self.title.clone(),
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            message_count: turns.len(),
            total_tokens: turns.iter().map(|t| t.token_count).sum(),
            preview: preview(turns),
        }
    }
}

/// Preview string from the first user turn.
fn preview(turns: &[Turn]) -> String {
    match turns.iter().find(|t| t.role == Role::User) {
        Some(turn) => {
            let trimmed = turn.content.trim();
            if trimmed.len() > 80 {
                format!("{}...", parley_types::truncate_str(trimmed, 77))
            } else {
                trimmed.to_string()
            }
        }
        None => String::new(),
    }
}

/// Lightweight summary for conversation listing.
#[derive(Debug, Clone)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub owner: String,
    pub title: Option<String>,
    pub status: ConversationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
    pub total_tokens: u64,
    pub preview: String,
}

impl ConversationSummary {
    /// Short hex prefix of the conversation ID for display.
    pub fn short_id(&self) -> String {
        self.id.to_string()[..8].to_string()
    }

    /// Human-readable age string (e.g. "2h ago", "3d ago").
    pub fn age(&self) -> String {
        let duration = Utc::now() - self.updated_at;
        let minutes = duration.num_minutes();
        if minutes < 1 {
            "just now".to_string()
        } else if minutes < 60 {
            format!("{minutes}m ago")
        } else if minutes < 1440 {
            format!("{}h ago", minutes / 60)
        } else {
            format!("{}d ago", minutes / 1440)
        }
    }
}
