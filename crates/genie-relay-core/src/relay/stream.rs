//! Reassembly of the AI-chat response stream.
//!
//! The chat endpoint answers with newline-delimited fragments of the form
//! `<tag>:<json-payload>`. Text-delta fragments (`0`, `1`) carry a JSON string
//! (or an object with a `text` field) and are concatenated in arrival order;
//! every other fragment is informational. The tag set is open: anything not
//! recognised is skipped, never rejected.

use futures::{Stream, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::channel::{MAX_MESSAGE_CHARS, chunk_text};
use crate::error::{RelayError, Result};

/// Sent when the stream carried no text at all.
pub const EMPTY_RESPONSE_FALLBACK: &str = "I processed your message, but I don't have a specific response. How can I help you further?";

/// Kind of a stream fragment, taken from its line prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentTag {
    /// `0` / `1`: incremental response text
    TextDelta,
    /// `2`: structured data event
    Data,
    /// `8`: message annotation
    Annotation,
    /// `9`: tool call
    ToolCall,
    /// Any other tag the upstream may add later
    Other(String),
}

impl FragmentTag {
    pub fn parse(tag: &str) -> Self {
        match tag {
            "0" | "1" => Self::TextDelta,
            "2" => Self::Data,
            "8" => Self::Annotation,
            "9" => Self::ToolCall,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Self::TextDelta)
    }
}

/// One `<tag>:<payload>` line of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFragment<'a> {
    pub tag: FragmentTag,
    pub payload: &'a str,
}

impl<'a> StreamFragment<'a> {
    /// Split a line into tag and payload.
    ///
    /// Tags are one or two ASCII alphanumerics; lines without such a prefix
    /// are not fragments.
    pub fn parse_line(line: &'a str) -> Option<Self> {
        let (tag, payload) = line.split_once(':')?;
        if tag.is_empty() || tag.len() > 2 || !tag.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return None;
        }
        Some(Self {
            tag: FragmentTag::parse(tag),
            payload,
        })
    }

    /// Decode the text carried by a text-delta payload.
    pub fn text(&self) -> std::result::Result<Option<String>, serde_json::Error> {
        let value: Value = serde_json::from_str(self.payload)?;
        Ok(match value {
            Value::String(text) => Some(text),
            Value::Object(mut map) => match map.remove("text") {
                Some(Value::String(text)) => Some(text),
                _ => None,
            },
            _ => None,
        })
    }
}

/// Accumulates text deltas from a chunked byte stream.
///
/// Bytes are buffered until a line break so fragments (and multi-byte
/// characters) split across chunks are reassembled before decoding.
#[derive(Debug)]
pub struct StreamReassembler {
    pending: Vec<u8>,
    response: String,
    max_chars: usize,
    lines_seen: usize,
    lines_skipped: usize,
}

impl Default for StreamReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamReassembler {
    pub fn new() -> Self {
        Self::with_max_chars(MAX_MESSAGE_CHARS)
    }

    /// Use a different per-message limit for `finalize`.
    pub fn with_max_chars(max_chars: usize) -> Self {
        Self {
            pending: Vec::new(),
            response: String::new(),
            max_chars,
            lines_seen: 0,
            lines_skipped: 0,
        }
    }

    /// Text accumulated so far (untrimmed).
    pub fn response(&self) -> &str {
        &self.response
    }

    /// Feed the next chunk of the upstream body.
    pub fn ingest(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);

        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return;
        };

        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);
        let text = String::from_utf8_lossy(&complete);
        for line in text.split('\n') {
            self.process_line(line);
        }
    }

    /// Process whatever is left after the final line break.
    pub fn finish_input(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let rest = std::mem::take(&mut self.pending);
        let text = String::from_utf8_lossy(&rest);
        self.process_line(&text);
    }

    fn process_line(&mut self, line: &str) {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            return;
        }
        self.lines_seen += 1;

        let Some(fragment) = StreamFragment::parse_line(line) else {
            trace!("Ignoring untagged stream line");
            return;
        };

        match &fragment.tag {
            FragmentTag::TextDelta => match fragment.text() {
                Ok(Some(text)) => self.response.push_str(&text),
                Ok(None) => {
                    self.lines_skipped += 1;
                    debug!(payload = %preview(fragment.payload, 100), "Text delta without text");
                }
                Err(e) => {
                    self.lines_skipped += 1;
                    debug!(
                        error = %e,
                        line = %preview(line, 100),
                        "Skipping undecodable text delta"
                    );
                }
            },
            FragmentTag::Other(tag) => {
                trace!(tag = %tag, "Ignoring unknown stream tag");
            }
            tag => match serde_json::from_str::<Value>(fragment.payload) {
                Ok(value) => debug!(?tag, payload = %preview(&value.to_string(), 200), "Stream event"),
                Err(e) => debug!(?tag, error = %e, "Undecodable stream event"),
            },
        }
    }

    /// Close the stream and produce the messages to send, in order.
    ///
    /// Never empty: a blank response yields the fallback sentence.
    pub fn finalize(self) -> Vec<String> {
        self.into_chunks()
            .unwrap_or_else(|| vec![EMPTY_RESPONSE_FALLBACK.to_string()])
    }

    /// Like `finalize`, but `None` when the response carried no text.
    pub fn into_chunks(mut self) -> Option<Vec<String>> {
        self.finish_input();
        debug!(
            lines = self.lines_seen,
            skipped = self.lines_skipped,
            len = self.response.len(),
            "Stream reassembled"
        );

        let trimmed = self.response.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(chunk_text(trimmed, self.max_chars))
    }
}

/// Read `stream` to the end and return the reply chunks, or `None` when the
/// response carried no text.
///
/// The whole read is bounded by `timeout` and aborted when `cancel` fires.
/// A transport error on any chunk fails the read.
pub async fn reassemble<S, B, E>(
    mut stream: S,
    max_chars: usize,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Option<Vec<String>>>
where
    S: Stream<Item = std::result::Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut reassembler = StreamReassembler::with_max_chars(max_chars);
    let mut chunks = 0usize;

    let read = async {
        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| RelayError::Stream(e.to_string()))?;
            chunks += 1;
            trace!(chunk = chunks, len = bytes.as_ref().len(), "Stream chunk");
            reassembler.ingest(bytes.as_ref());
        }
        Ok::<(), RelayError>(())
    };

    let outcome = tokio::select! {
        _ = cancel.cancelled() => Err(RelayError::Cancelled),
        result = tokio::time::timeout(timeout, read) => match result {
            Ok(read_result) => read_result,
            Err(_) => Err(RelayError::Timeout(timeout)),
        },
    };
    outcome?;

    debug!(chunks, "Upstream stream complete");
    Ok(reassembler.into_chunks())
}

/// First `max` characters of `text`, for logs.
pub(crate) fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn run(chunks: &[&str]) -> Vec<String> {
        let mut reassembler = StreamReassembler::new();
        for chunk in chunks {
            reassembler.ingest(chunk.as_bytes());
        }
        reassembler.finalize()
    }

    #[test]
    fn test_two_deltas() {
        assert_eq!(run(&["0:\"Hi \"\n", "0:\"there!\"\n"]), vec!["Hi there!"]);
    }

    #[test]
    fn test_string_delta_contributes_text() {
        let mut reassembler = StreamReassembler::new();
        reassembler.ingest(b"0:\"hello\"\n");
        assert_eq!(reassembler.response(), "hello");
    }

    #[test]
    fn test_non_json_delta_is_skipped() {
        let mut reassembler = StreamReassembler::new();
        reassembler.ingest(b"0:not-json\n0:\"ok\"\n");
        assert_eq!(reassembler.response(), "ok");
    }

    #[test]
    fn test_object_delta_uses_text_field() {
        assert_eq!(
            run(&["1:{\"text\":\"from object\"}\n", "0:{\"value\":\"no text\"}\n"]),
            vec!["from object"]
        );
    }

    #[test]
    fn test_auxiliary_tags_never_contribute() {
        let chunks = run(&[
            "2:[{\"type\":\"status\"}]\n",
            "2:\"a string payload\"\n",
            "8:{\"text\":\"annotation\"}\n",
            "9:{\"toolCallId\":\"x\",\"toolName\":\"search\",\"args\":{}}\n",
            "0:\"answer\"\n",
        ]);
        assert_eq!(chunks, vec!["answer"]);
    }

    #[test]
    fn test_unknown_tags_and_noise_ignored() {
        let chunks = run(&[
            "e:{\"finishReason\":\"stop\"}\n",
            "d:{\"finishReason\":\"stop\"}\n",
            "\n\n",
            "plain text without tag\n",
            "abc:\"too long a tag\"\n",
            "0:\"kept\"\n",
        ]);
        assert_eq!(chunks, vec!["kept"]);
    }

    #[test]
    fn test_line_split_across_chunks() {
        assert_eq!(
            run(&["0:\"Hel", "lo, wor", "ld\"\n0:", "\"!\"\n"]),
            vec!["Hello, world!"]
        );
    }

    #[test]
    fn test_multibyte_split_across_chunks() {
        let line = "0:\"héllo 🚀\"\n".as_bytes();
        // Cut inside the 4-byte rocket.
        let cut = line.len() - 4;
        let mut reassembler = StreamReassembler::new();
        reassembler.ingest(&line[..cut]);
        reassembler.ingest(&line[cut..]);
        assert_eq!(reassembler.finalize(), vec!["héllo 🚀"]);
    }

    #[test]
    fn test_crlf_lines() {
        assert_eq!(run(&["0:\"a\"\r\n0:\"b\"\r\n"]), vec!["ab"]);
    }

    #[test]
    fn test_trailing_line_without_newline() {
        assert_eq!(run(&["0:\"first \"\n0:\"last\""]), vec!["first last"]);
    }

    #[test]
    fn test_escaped_json_text() {
        assert_eq!(
            run(&["0:\"line one\\nline \\\"two\\\"\"\n"]),
            vec!["line one\nline \"two\""]
        );
    }

    #[test]
    fn test_empty_response_falls_back() {
        assert_eq!(run(&[]), vec![EMPTY_RESPONSE_FALLBACK]);
        assert_eq!(run(&["2:[]\n", "0:\"   \"\n"]), vec![EMPTY_RESPONSE_FALLBACK]);
    }

    #[test]
    fn test_response_is_trimmed() {
        assert_eq!(run(&["0:\"\\n  padded  \\n\"\n"]), vec!["padded"]);
    }

    #[test]
    fn test_long_response_is_chunked() {
        let body = "x".repeat(25);
        let mut reassembler = StreamReassembler::with_max_chars(10);
        for ch in body.chars() {
            reassembler.ingest(format!("0:\"{}\"\n", ch).as_bytes());
        }
        let chunks = reassembler.finalize();
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks.concat(), body);
    }

    #[test]
    fn test_concatenation_matches_deltas_in_order() {
        let deltas = ["  The ", "quick ", "brown ", "fox 🦊 ", "jumps.  "];
        let mut reassembler = StreamReassembler::with_max_chars(4);
        for (i, delta) in deltas.iter().enumerate() {
            let line = format!("0:{}\n", serde_json::to_string(delta).unwrap());
            reassembler.ingest(line.as_bytes());
            if i % 2 == 0 {
                reassembler.ingest(b"0:broken\n9:{}\n");
            }
        }
        let expected = deltas.concat().trim().to_string();
        let chunks = reassembler.finalize();
        assert_eq!(chunks.concat(), expected);
        assert_eq!(chunks.len(), expected.chars().count().div_ceil(4));
    }

    #[test]
    fn test_fragment_parse_line() {
        let fragment = StreamFragment::parse_line("0:\"hi\"").unwrap();
        assert_eq!(fragment.tag, FragmentTag::TextDelta);
        assert_eq!(fragment.payload, "\"hi\"");

        let other = StreamFragment::parse_line("f:{}").unwrap();
        assert_eq!(other.tag, FragmentTag::Other("f".to_string()));
        assert!(!other.tag.is_text());

        assert!(StreamFragment::parse_line("no tag here").is_none());
        assert!(StreamFragment::parse_line(":\"empty tag\"").is_none());
    }

    #[tokio::test]
    async fn test_reassemble_stream() {
        let body = stream::iter(vec![
            Ok::<_, std::io::Error>(b"0:\"Hi \"\n".to_vec()),
            Ok(b"0:\"there!\"\n".to_vec()),
        ]);
        let chunks = reassemble(
            body,
            MAX_MESSAGE_CHARS,
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(chunks, Some(vec!["Hi there!".to_string()]));
    }

    #[tokio::test]
    async fn test_reassemble_without_text_is_none() {
        let body = stream::iter(vec![Ok::<_, std::io::Error>(b"2:[{}]\n0:\"  \"\n".to_vec())]);
        let chunks = reassemble(
            body,
            MAX_MESSAGE_CHARS,
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(chunks, None);
    }

    #[tokio::test]
    async fn test_reassemble_transport_error() {
        let body = stream::iter(vec![
            Ok(b"0:\"partial\"\n".to_vec()),
            Err(std::io::Error::other("connection reset")),
        ]);
        let err = reassemble(
            body,
            MAX_MESSAGE_CHARS,
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RelayError::Stream(msg) if msg.contains("connection reset")));
    }

    #[tokio::test]
    async fn test_reassemble_timeout() {
        let body = stream::iter(vec![Ok::<_, std::io::Error>(b"0:\"slow\"\n".to_vec())])
            .chain(stream::pending());
        let err = reassemble(
            body,
            MAX_MESSAGE_CHARS,
            Duration::from_millis(50),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RelayError::Timeout(d) if d == Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn test_reassemble_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let body = stream::pending::<std::result::Result<Vec<u8>, std::io::Error>>();
        let err = reassemble(body, MAX_MESSAGE_CHARS, Duration::from_secs(5), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Cancelled));
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("abcdef", 3), "abc...");
    }
}
