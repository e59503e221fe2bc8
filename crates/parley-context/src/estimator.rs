//! Heuristic token estimation.
//!
//! There is no access to the model's real tokenizer, so cost is estimated
//! from two cheap signals: roughly four characters per token, and roughly
//! 1.3 tokens per whitespace-separated word. The larger of the two wins.
//! Callers must never treat the result as exact.

/// Characters per token for the character heuristic.
pub const CHARS_PER_TOKEN: u64 = 4;

/// Tokens per word, in tenths (1.3 tokens per word).
const TOKENS_PER_WORD_TENTHS: u64 = 13;

/// Estimate the token cost of `text`.
///
/// Pure and deterministic. Empty text costs 0; any non-empty text costs at
/// least 1. Integer arithmetic keeps the rounding exact.
pub fn estimate_tokens(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    let chars = text.chars().count() as u64;
    let words = text.split_whitespace().count() as u64;

    let by_chars = chars.div_ceil(CHARS_PER_TOKEN);
    let by_words = (words * TOKENS_PER_WORD_TENTHS).div_ceil(10);
    by_chars.max(by_words)
}
