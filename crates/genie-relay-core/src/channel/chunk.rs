//! Length-bounded message chunking for Telegram.
//!
//! Telegram limits text messages to 4096 characters. Responses are cut into
//! fixed-size slices on character boundaries so that joining the chunks gives
//! back the input text exactly.

/// Default split threshold, leaves headroom below Telegram's 4096.
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Character counts are Unicode scalar values, so multi-byte text is never
/// cut in the middle of a character. A limit of zero is treated as one.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let limit = max_chars.max(1);

    if text.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::with_capacity(text.len() / limit + 1);
    let mut remaining = text;

    while !remaining.is_empty() {
        let split_at = remaining
            .char_indices()
            .nth(limit)
            .map(|(i, _)| i)
            .unwrap_or(remaining.len());
        let (head, tail) = remaining.split_at(split_at);
        chunks.push(head.to_string());
        remaining = tail;
    }

    chunks
}
