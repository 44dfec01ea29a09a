//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 bytes per token, rounded up.
//! Every layer and the final assembly count with the same function, so
//! per-layer ceilings and the total ceiling are always comparable.

/// Estimate the token count for a string.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.len().div_ceil(4)
}

/// Largest char boundary at or below `idx`.
fn floor_char_boundary(text: &str, idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    let mut i = idx;
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Hard-truncate `text` so that it estimates to at most `max_tokens`.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    if estimate_tokens(text) <= max_tokens {
        return text.to_string();
    }
    let end = floor_char_boundary(text, max_tokens.saturating_mul(4));
    text[..end].trim_end().to_string()
}

/// Compress `text` to at most `max_tokens`, cutting at the last sentence
/// boundary that fits. Falls back to a hard cut when not even the first
/// sentence fits.
pub fn compress_to_sentences(text: &str, max_tokens: usize) -> String {
    if estimate_tokens(text) <= max_tokens {
        return text.to_string();
    }
    let limit = floor_char_boundary(text, max_tokens.saturating_mul(4));
    let head = &text[..limit];
    let cut = head
        .char_indices()
        .filter(|(i, c)| {
            matches!(c, '.' | '!' | '?')
                && text[i + c.len_utf8()..]
                    .chars()
                    .next()
                    .is_none_or(char::is_whitespace)
        })
        .map(|(i, c)| i + c.len_utf8())
        .last();

    match cut {
        Some(end) => text[..end].to_string(),
        None => truncate_to_tokens(text, max_tokens),
    }
}
