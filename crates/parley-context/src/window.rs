//! Context window selection.
//!
//! The window is the newest contiguous run of turns that fits the budget.
//! Turns are scanned newest-first so recent context is never dropped to make
//! room for older context, then returned oldest-first. If even the newest
//! turn does not fit on its own, it is included with its content cut down,
//! so a non-empty log always yields a non-empty window.

use crate::estimator::{CHARS_PER_TOKEN, estimate_tokens};
use crate::types::Turn;
use parley_types::{WindowMessage, char_prefix};
use tracing::{debug, warn};

/// Appended to content that was cut to fit the window.
pub const TRUNCATION_MARKER: &str = "\n\n[... message truncated to fit the context window ...]";

/// The turns selected for one outgoing model request.
#[derive(Debug, Clone)]
pub struct ContextWindow {
    /// Selected turns, oldest first.
    pub turns: Vec<Turn>,
    /// Estimated request size: system allowance plus every selected turn.
    pub total_tokens: u64,
    pub budget_tokens: u64,
    /// The single selected turn had its content cut down.
    pub truncated: bool,
    /// Older turns of the scanned slice that did not fit.
    pub excluded: usize,
}

impl ContextWindow {
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Messages in the shape the model backend expects.
    pub fn to_messages(&self) -> Vec<WindowMessage> {
        self.turns
            .iter()
            .map(|t| WindowMessage::new(t.role, t.content.clone()))
            .collect()
    }
}

/// Select the window from turns ordered newest-first.
///
/// The selected turns plus `system_prompt_tokens` never exceed
/// `budget_tokens`, except through the approximation inherent in truncating
/// a single oversized turn.
pub fn select_window(
    newest_first: Vec<Turn>,
    budget_tokens: u64,
    system_prompt_tokens: u64,
) -> ContextWindow {
    let scanned = newest_first.len();
    let mut running = system_prompt_tokens;
    let mut selected: Vec<Turn> = Vec::new();
    let mut truncated = false;

    for mut turn in newest_first {
        let next = running.saturating_add(turn.token_count);
        if next <= budget_tokens {
            running = next;
            selected.push(turn);
            continue;
        }

        if selected.is_empty() {
            let remaining = budget_tokens.saturating_sub(running);
            warn!(
                seq = turn.seq,
                tokens = turn.token_count,
                remaining,
                "Newest turn exceeds the budget on its own; truncating"
            );
            turn.content = truncate_to_tokens(&turn.content, remaining);
            turn.token_count = estimate_tokens(&turn.content);
            running = running.saturating_add(turn.token_count);
            selected.push(turn);
            truncated = true;
        }
        break;
    }

    let excluded = scanned - selected.len();
    selected.reverse();
    debug!(
        selected = selected.len(),
        excluded,
        total_tokens = running,
        budget_tokens,
        "Built context window"
    );

    ContextWindow {
        turns: selected,
        total_tokens: running,
        budget_tokens,
        truncated,
        excluded,
    }
}

/// Cut `content` to an estimated `max_tokens`, appending [`TRUNCATION_MARKER`].
///
/// Content already within budget is returned unchanged. The kept prefix
/// starts at `max_tokens * 4` characters less the marker; word-dense text
/// that still estimates over budget is shrunk further.
pub fn truncate_to_tokens(content: &str, max_tokens: u64) -> String {
    if estimate_tokens(content) <= max_tokens {
        return content.to_string();
    }

    let marker_chars = TRUNCATION_MARKER.chars().count() as u64;
    let max_chars = max_tokens.saturating_mul(CHARS_PER_TOKEN);
    let mut keep = max_chars.saturating_sub(marker_chars) as usize;

    loop {
        let candidate = format!("{}{}", char_prefix(content, keep), TRUNCATION_MARKER);
        let tokens = estimate_tokens(&candidate);
        if tokens <= max_tokens || keep == 0 {
            return candidate;
        }
        let scaled = (keep as u64).saturating_mul(max_tokens) / tokens;
        keep = (scaled as usize).min(keep - 1);
    }
}
