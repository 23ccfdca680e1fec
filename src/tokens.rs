//! Character-ratio token estimation.
//!
//! The analysis pipeline never tokenizes for real: every budget decision is
//! made against `chars / CHARS_PER_TOKEN`. Three characters per token
//! over-estimates typical source code (prose sits closer to four), which keeps
//! the budgets on the safe side of the model's true limit.

use crate::gateway::Message;

pub const CHARS_PER_TOKEN: usize = 3;

/// Estimated token count of `text`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / CHARS_PER_TOKEN
}

/// Estimated token count of a whole message list, contents joined by spaces.
pub fn estimate_messages(messages: &[Message]) -> usize {
    let chars: usize = messages.iter().map(|m| m.content.chars().count()).sum();
    let separators = messages.len().saturating_sub(1);
    (chars + separators) / CHARS_PER_TOKEN
}

/// Character ceiling that corresponds to a token budget.
pub fn max_chars_for(tokens: usize) -> usize {
    tokens.saturating_mul(CHARS_PER_TOKEN)
}

/// Cut `text` down to roughly `max_tokens`, appending `notice` on its own line
/// when anything was dropped. Cuts always land on a char boundary.
pub fn truncate_to_tokens(text: &str, max_tokens: usize, notice: &str) -> String {
    let max_chars = max_chars_for(max_tokens);
    let cut = match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => byte_idx,
        None => return text.to_string(),
    };

    let mut out = String::with_capacity(cut + notice.len() + 1);
    out.push_str(&text[..cut]);
    if !notice.is_empty() {
        out.push('\n');
        out.push_str(notice);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_is_floor_of_chars_over_three() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("ab"), 0);
        assert_eq!(estimate_tokens("abcdefg"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(300_000)), 100_000);
    }

    #[test]
    fn estimate_counts_chars_not_bytes() {
        // Three 3-byte chars.
        assert_eq!(estimate_tokens("│├└"), 1);
    }

    #[test]
    fn messages_are_estimated_as_one_joined_string() {
        let messages = vec![Message::system("aaaa"), Message::user("bbbb")];
        // "aaaa bbbb" is 9 chars.
        assert_eq!(estimate_messages(&messages), 3);
        assert_eq!(estimate_messages(&[]), 0);
    }

    #[test]
    fn truncate_is_noop_within_budget() {
        let text = "fn main() {}\n";
        assert_eq!(truncate_to_tokens(text, 100, "[cut]"), text);
    }

    #[test]
    fn truncate_appends_notice_on_new_line() {
        let text = "a".repeat(40);
        let out = truncate_to_tokens(&text, 10, "[truncated]");
        assert_eq!(out, format!("{}\n[truncated]", "a".repeat(30)));
    }

    #[test]
    fn truncate_without_notice_and_on_char_boundary() {
        let text = "é".repeat(10);
        let out = truncate_to_tokens(&text, 2, "");
        assert_eq!(out, "é".repeat(6));
    }
}
