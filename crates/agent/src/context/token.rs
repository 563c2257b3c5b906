//! Token estimation utilities.
//!
//! Uses a character-based heuristic tuned per model family. This
//! approximation is accurate within ~10% for BPE tokenizers on English
//! text, which the safety buffer in the prompt budget absorbs.

use tokenwise_core::Message;

/// Per-message overhead for role name, delimiters, and formatting markers
/// in the API wire format.
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// `(text, model) -> token count`.
///
/// Implementations must be deterministic, return 0 for empty text, and be
/// monotonic: appending text never lowers the count.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str, model: &str) -> usize;
}

/// Character-ratio estimator. Rounds up.
#[derive(Debug, Clone)]
pub struct HeuristicTokenCounter {
    default_chars_per_token: f64,
}

impl HeuristicTokenCounter {
    pub fn new() -> Self {
        Self {
            default_chars_per_token: 4.0,
        }
    }

    fn chars_per_token(&self, model: &str) -> f64 {
        let model = model.to_ascii_lowercase();
        if model.contains("claude") {
            3.5
        } else {
            self.default_chars_per_token
        }
    }
}

impl Default for HeuristicTokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter for HeuristicTokenCounter {
    fn count(&self, text: &str, model: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        let chars = text.chars().count() as f64;
        (chars / self.chars_per_token(model)).ceil() as usize
    }
}

/// Estimate tokens for a single message including per-message overhead.
pub fn estimate_message_tokens(
    counter: &dyn TokenCounter,
    message: &Message,
    model: &str,
) -> usize {
    MESSAGE_OVERHEAD_TOKENS + counter.count(&message.content, model)
}

/// Estimate tokens for a slice of messages.
pub fn estimate_messages_tokens(
    counter: &dyn TokenCounter,
    messages: &[Message],
    model: &str,
) -> usize {
    messages
        .iter()
        .map(|m| estimate_message_tokens(counter, m, model))
        .sum()
}

/// Longest char-boundary prefix of `text` that fits in `max_tokens`.
pub fn truncate_to_tokens(
    counter: &dyn TokenCounter,
    text: &str,
    max_tokens: usize,
    model: &str,
) -> String {
    if counter.count(text, model) <= max_tokens {
        return text.to_string();
    }
    if max_tokens == 0 {
        return String::new();
    }

    // Byte offsets of every char boundary, including the end.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();

    // Largest prefix length (in chars) whose count fits. Monotonic counters
    // make this a binary search.
    let (mut lo, mut hi) = (0usize, boundaries.len() - 1);
    while lo < hi {
        let mid = (lo + hi).div_ceil(2);
        if counter.count(&text[..boundaries[mid]], model) <= max_tokens {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    text[..boundaries[lo]].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> HeuristicTokenCounter {
        HeuristicTokenCounter::new()
    }

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(counter().count("", "openai/gpt-4o"), 0);
    }

    #[test]
    fn four_chars_is_one_token() {
        assert_eq!(counter().count("test", ""), 1);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(counter().count("hello", ""), 2);
    }

    #[test]
    fn claude_models_count_denser() {
        let text = "a".repeat(70);
        assert_eq!(counter().count(&text, "openai/gpt-4o"), 18);
        assert_eq!(counter().count(&text, "anthropic/claude-sonnet-4"), 20);
    }

    #[test]
    fn counting_is_monotonic() {
        let c = counter();
        let base = "compliance evidence for storage accounts";
        let mut text = base.to_string();
        let mut last = c.count(&text, "");
        for suffix in [" a", "b", " encryption at rest", "é"] {
            text.push_str(suffix);
            let next = c.count(&text, "");
            assert!(next >= last);
            last = next;
        }
    }

    #[test]
    fn message_includes_overhead() {
        let msg = Message::user("test"); // 1 token + 4 overhead
        assert_eq!(estimate_message_tokens(&counter(), &msg, ""), 5);
    }

    #[test]
    fn multiple_messages() {
        let msgs = vec![Message::user("hello"), Message::assistant("world")];
        assert_eq!(estimate_messages_tokens(&counter(), &msgs, ""), 12);
    }

    #[test]
    fn truncate_fits_budget() {
        let c = counter();
        let text = "word ".repeat(100);
        let cut = truncate_to_tokens(&c, &text, 10, "");
        assert_eq!(c.count(&cut, ""), 10);
        assert_eq!(cut.len(), 40);
        assert!(text.starts_with(&cut));
    }

    #[test]
    fn truncate_keeps_short_text() {
        let c = counter();
        assert_eq!(truncate_to_tokens(&c, "short", 10, ""), "short");
        assert_eq!(truncate_to_tokens(&c, "short", 0, ""), "");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let c = counter();
        let text = "日本語のテキスト".repeat(10);
        let cut = truncate_to_tokens(&c, &text, 3, "");
        assert_eq!(cut.chars().count(), 12);
    }
}
