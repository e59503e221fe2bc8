//! Context usage reporting.

use crate::budget::BudgetConfig;
use crate::types::Turn;
use serde::Serialize;

/// Usage above this percentage of the effective budget is "near the limit".
pub const NEAR_LIMIT_PERCENT: f64 = 75.0;

/// Usage above this percentage of the effective budget is "at the limit".
pub const AT_LIMIT_PERCENT: f64 = 90.0;

/// Current context usage against the effective budget.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenUsage {
    pub current_tokens: u64,
    pub max_tokens: u64,
    /// Percentage of `max_tokens`, rounded to one decimal.
    pub usage_percentage: f64,
    pub is_near_limit: bool,
    pub is_at_limit: bool,
    pub remaining_tokens: u64,
}

impl TokenUsage {
    /// Compute usage for `turns` (the bounded recent slice) under `budget`.
    pub fn from_turns(turns: &[Turn], budget: &BudgetConfig) -> Self {
        let turn_tokens: u64 = turns.iter().map(|t| t.token_count).sum();
        Self::from_total(budget.system_prompt_tokens + turn_tokens, budget)
    }

    /// Derive the pressure flags for an already-summed token total.
    pub fn from_total(current_tokens: u64, budget: &BudgetConfig) -> Self {
        let max_tokens = budget.effective_budget();
        let usage_percentage = if max_tokens == 0 {
            0.0
        } else {
            let raw = current_tokens as f64 / max_tokens as f64 * 100.0;
            (raw * 10.0).round() / 10.0
        };
        Self {
            current_tokens,
            max_tokens,
            usage_percentage,
            is_near_limit: usage_percentage > NEAR_LIMIT_PERCENT,
            is_at_limit: usage_percentage > AT_LIMIT_PERCENT,
            remaining_tokens: max_tokens.saturating_sub(current_tokens),
        }
    }

    /// Format a brief one-line usage summary.
    pub fn format_brief(&self) -> String {
        let cur_k = self.current_tokens as f64 / 1000.0;
        let max_k = self.max_tokens as f64 / 1000.0;
        format!(
            "Context: {cur_k:.1}k/{max_k:.0}k tokens ({:.1}%)",
            self.usage_percentage
        )
    }

    /// Format a multi-line usage breakdown.
    pub fn format_detailed(&self) -> String {
        let mut lines = vec![self.format_brief()];
        lines.push(format!("  Remaining: ~{} tokens", self.remaining_tokens));
        if self.is_at_limit {
            lines.push("  Status:    at limit".to_string());
        } else if self.is_near_limit {
            lines.push("  Status:    near limit".to_string());
        }
        lines.join("\n")
    }
}
