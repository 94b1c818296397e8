//! Incremental decoder for the chat token stream.
//!
//! The chat endpoint replies with newline-delimited Server-Sent Events; each
//! event's `data:` payload is JSON `{ "response": "<token>" }`. The stream
//! terminates on a literal `[DONE]` payload or transport close. Malformed
//! payloads are skipped — a bad frame never aborts the stream.

use serde::Deserialize;

/// One decoded item from the token stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenEvent {
    /// A model token (may be a fragment of a word).
    Token(String),

    /// The literal `[DONE]` terminator.
    Done,
}

/// The JSON shape of a `data:` payload.
#[derive(Debug, Deserialize)]
struct TokenFrame {
    response: Option<String>,
}

/// Incremental SSE decoder.
///
/// Bytes are fed as they arrive off the wire; events split across network
/// chunks (including mid-UTF-8-character splits) are buffered until
/// complete. [`finish`](Self::finish) flushes a trailing partial event at
/// transport close.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return every completed event's tokens.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<TokenEvent> {
        // CR is insignificant for our frames (payloads are JSON with escaped
        // control characters), so dropping it unifies \r\n\r\n and \n\n
        // event separators.
        self.buf.extend(bytes.iter().filter(|&&b| b != b'\r'));

        let mut events = Vec::new();
        while let Some(pos) = find_separator(&self.buf) {
            let event: Vec<u8> = self.buf.drain(..pos + 2).collect();
            decode_event(&event, &mut events);
        }
        events
    }

    /// Flush any buffered partial event at transport close.
    pub fn finish(&mut self) -> Vec<TokenEvent> {
        let rest = std::mem::take(&mut self.buf);
        let mut events = Vec::new();
        decode_event(&rest, &mut events);
        events
    }
}

/// Find the first `\n\n` event separator.
fn find_separator(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

/// Decode one raw event block, appending its tokens to `out`.
fn decode_event(event: &[u8], out: &mut Vec<TokenEvent>) {
    // An event split mid-character would fail here; that only happens for
    // truncated trailing garbage, which counts as malformed.
    let Ok(text) = std::str::from_utf8(event) else {
        tracing::debug!("Skipping non-UTF-8 stream event");
        return;
    };

    for line in text.lines() {
        let Some(payload) = line.strip_prefix("data:") else {
            continue;
        };
        let payload = payload.trim();
        if payload.is_empty() {
            continue;
        }
        if payload == "[DONE]" {
            out.push(TokenEvent::Done);
            continue;
        }

        match serde_json::from_str::<TokenFrame>(payload) {
            Ok(TokenFrame {
                response: Some(token),
            }) if !token.is_empty() => out.push(TokenEvent::Token(token)),
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed stream frame");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(events: &[TokenEvent]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|e| match e {
                TokenEvent::Token(t) => Some(t.as_str()),
                TokenEvent::Done => None,
            })
            .collect()
    }

    #[test]
    fn decodes_single_event() {
        let mut dec = SseDecoder::new();
        let events = dec.feed(b"data: {\"response\": \"Hello\"}\n\n");
        assert_eq!(events, vec![TokenEvent::Token("Hello".to_string())]);
    }

    #[test]
    fn buffers_event_split_across_feeds() {
        let mut dec = SseDecoder::new();
        assert!(dec.feed(b"data: {\"respo").is_empty());
        let events = dec.feed(b"nse\": \"Hi\"}\n\ndata: {\"response\": \"!\"}\n\n");
        assert_eq!(tokens(&events), vec!["Hi", "!"]);
    }

    #[test]
    fn handles_mid_character_utf8_split() {
        let frame = "data: {\"response\": \"è bello\"}\n\n".as_bytes();
        // Split inside the two-byte "è".
        let cut = frame.iter().position(|&b| b >= 0x80).unwrap() + 1;
        let mut dec = SseDecoder::new();
        assert!(dec.feed(&frame[..cut]).is_empty());
        let events = dec.feed(&frame[cut..]);
        assert_eq!(tokens(&events), vec!["è bello"]);
    }

    #[test]
    fn skips_malformed_json() {
        let mut dec = SseDecoder::new();
        let events = dec.feed(b"data: {not json}\n\ndata: {\"response\": \"ok\"}\n\n");
        assert_eq!(tokens(&events), vec!["ok"]);
    }

    #[test]
    fn done_marker_is_surfaced() {
        let mut dec = SseDecoder::new();
        let events = dec.feed(b"data: [DONE]\n\n");
        assert_eq!(events, vec![TokenEvent::Done]);
    }

    #[test]
    fn crlf_separators_are_accepted() {
        let mut dec = SseDecoder::new();
        let events = dec.feed(b"data: {\"response\": \"a\"}\r\n\r\ndata: {\"response\": \"b\"}\r\n\r\n");
        assert_eq!(tokens(&events), vec!["a", "b"]);
    }

    #[test]
    fn finish_flushes_trailing_event_without_separator() {
        let mut dec = SseDecoder::new();
        assert!(dec.feed(b"data: {\"response\": \"tail\"}").is_empty());
        let events = dec.finish();
        assert_eq!(tokens(&events), vec!["tail"]);
    }

    #[test]
    fn non_data_lines_are_ignored() {
        let mut dec = SseDecoder::new();
        let events = dec.feed(b"event: message\nid: 3\ndata: {\"response\": \"x\"}\n\n");
        assert_eq!(tokens(&events), vec!["x"]);
    }

    #[test]
    fn empty_response_field_is_skipped() {
        let mut dec = SseDecoder::new();
        let events = dec.feed(b"data: {\"response\": \"\"}\n\ndata: {\"other\": 1}\n\n");
        assert!(events.is_empty());
    }
}
