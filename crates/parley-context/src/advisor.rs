//! Advisory trim count: how many older turns a budget would leave out.
//!
//! Purely informational. Nothing is hidden or removed; the window builder
//! already enforces the budget on every request.

use crate::types::Turn;

/// Count the oldest turns that fall outside a window of `target_tokens`.
///
/// `newest_first` is the full history, newest turn first. Accumulation starts
/// at `system_prompt_tokens` and stops at the first turn that does not fit,
/// matching the window builder (minus its truncation fallback). The count is
/// non-increasing as `target_tokens` grows.
pub fn advisory_trim_count(
    newest_first: &[Turn],
    target_tokens: u64,
    system_prompt_tokens: u64,
) -> usize {
    let total: u64 = system_prompt_tokens
        + newest_first.iter().map(|t| t.token_count).sum::<u64>();
    if total <= target_tokens {
        return 0;
    }

    let mut running = system_prompt_tokens;
    let mut kept = 0;
    for turn in newest_first {
        let next = running.saturating_add(turn.token_count);
        if next > target_tokens {
            break;
        }
        running = next;
        kept += 1;
    }
    newest_first.len() - kept
}

/// User-facing warning for a non-zero advisory count.
pub fn exclusion_warning(count: usize) -> Option<String> {
    match count {
        0 => None,
        1 => Some("1 older message would be excluded from context".to_string()),
        n => Some(format!("{n} older messages would be excluded from context")),
    }
}
