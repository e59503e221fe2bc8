//! Budget-aware operations over a conversation's log.

use crate::advisor::advisory_trim_count;
use crate::budget::{BudgetConfig, HistoryConfig};
use crate::error::ContextError;
use crate::log::MessageLog;
use crate::store::{TurnOrder, TurnStore};
use crate::usage::TokenUsage;
use crate::window::{ContextWindow, select_window};
use std::sync::Arc;
use uuid::Uuid;

/// Builds windows, reports usage and computes advisory trim counts.
///
/// Every operation reads the log and never writes to it.
#[derive(Clone)]
pub struct ContextManager {
    log: MessageLog,
    budget: BudgetConfig,
    history: HistoryConfig,
}

impl ContextManager {
    pub fn new(store: Arc<dyn TurnStore>, budget: BudgetConfig, history: HistoryConfig) -> Self {
        let log = MessageLog::new(store).with_fetch_timeout(history.fetch_timeout());
        Self {
            log,
            budget,
            history,
        }
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn budget(&self) -> &BudgetConfig {
        &self.budget
    }

    pub fn history(&self) -> &HistoryConfig {
        &self.history
    }

    /// Select the turns that accompany the next request under `budget_tokens`.
    pub async fn build_window(
        &self,
        id: Uuid,
        budget_tokens: u64,
    ) -> Result<ContextWindow, ContextError> {
        let recent = self
            .log
            .recent(id, self.history.recent_turn_limit, TurnOrder::NewestFirst)
            .await?;
        Ok(select_window(
            recent,
            budget_tokens,
            self.budget.system_prompt_tokens,
        ))
    }

    /// Current usage over the bounded recent slice.
    pub async fn usage(&self, id: Uuid) -> Result<TokenUsage, ContextError> {
        let recent = self
            .log
            .recent(id, self.history.recent_turn_limit, TurnOrder::NewestFirst)
            .await?;
        Ok(TokenUsage::from_turns(&recent, &self.budget))
    }

    /// How many older turns a window of `target_tokens` would leave out.
    pub async fn advisory_trim_count(
        &self,
        id: Uuid,
        target_tokens: u64,
    ) -> Result<usize, ContextError> {
        let history = self.log.history(id, TurnOrder::NewestFirst).await?;
        Ok(advisory_trim_count(
            &history,
            target_tokens,
            self.budget.system_prompt_tokens,
        ))
    }
}
