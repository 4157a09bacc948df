//! Token estimation.
//!
//! Character heuristic, ~4 characters per token, rounded up. Every cap the
//! loop enforces (R_cap, the observation cap, delegate targets) is measured
//! with these functions so the bounds are mutually consistent.

use veritas_core::message::Message;
use veritas_core::provider::ToolDefinition;

/// Estimate the token count for a string.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.len().div_ceil(4)
}

/// Estimate tokens for a single message, including ~4 tokens of role and
/// delimiter overhead.
pub fn estimate_message_tokens(message: &Message) -> usize {
    4 + estimate_tokens(&message.content)
}

pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Estimate tokens for the serialized tool schemas sent with a request.
pub fn estimate_tools_tokens(tools: &[ToolDefinition]) -> usize {
    tools
        .iter()
        .map(|t| estimate_tokens(&serde_json::to_string(t).unwrap_or_default()))
        .sum()
}

/// Cut `text` so that `estimate_tokens` of the result is at most
/// `max_tokens`. Cuts on a char boundary; returns the input unchanged when
/// it already fits.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> &str {
    if estimate_tokens(text) <= max_tokens {
        return text;
    }
    let mut end = max_tokens.saturating_mul(4).min(text.len());
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
