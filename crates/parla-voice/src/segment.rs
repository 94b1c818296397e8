//! Sentence segmentation for streaming TTS.
//!
//! Tokens arrive incrementally from the model stream; the segmenter buffers
//! them and emits discrete speakable chunks as soon as a sentence boundary
//! appears, so synthesis can start long before the reply is complete.

/// Incremental sentence segmenter.
///
/// [`feed`](Self::feed) appends a token to the internal buffer and extracts
/// every complete chunk; [`flush`](Self::flush) drains the remainder at
/// stream end. Chunks pass through an acceptance filter that drops
/// punctuation noise from stream start-up while still letting very short
/// greetings ("Hi!") through.
#[derive(Debug, Default)]
pub struct SentenceSegmenter {
    buf: String,
}

impl SentenceSegmenter {
    /// Create an empty segmenter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a token and return every speakable chunk it completes.
    ///
    /// A rejected chunk is discarded silently and does not block extraction
    /// of the chunks behind it.
    pub fn feed(&mut self, token: &str) -> Vec<String> {
        self.buf.push_str(token);

        let mut chunks = Vec::new();
        while let Some(end) = find_boundary(&self.buf) {
            let raw: String = self.buf.drain(..end).collect();
            if let Some(chunk) = clean_and_accept(&raw) {
                chunks.push(chunk);
            }
        }
        chunks
    }

    /// Drain any buffered remainder at stream end.
    ///
    /// The remainder goes through the same acceptance filter as boundary
    /// chunks.
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        clean_and_accept(&rest)
    }

    /// Discard all buffered text (turn cancelled or replaced).
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

/// Find the end (byte offset) of the first complete chunk in `buf`.
///
/// A chunk ends at a newline, or at a sentence terminator (`.` `!` `?`)
/// followed by whitespace or the end of the buffer. Trailing whitespace
/// after a terminator is consumed into the chunk — normalization trims it.
fn find_boundary(buf: &str) -> Option<usize> {
    let mut chars = buf.char_indices().peekable();

    while let Some((pos, ch)) = chars.next() {
        if ch == '\n' {
            return Some(pos + ch.len_utf8());
        }

        if matches!(ch, '.' | '!' | '?') {
            match chars.peek() {
                // Terminator at buffer end counts as a boundary.
                None => return Some(buf.len()),

                Some(&(_, next)) if next.is_whitespace() => {
                    // Consume the whole whitespace run.
                    while chars.next_if(|&(_, c)| c.is_whitespace()).is_some() {}
                    return Some(chars.peek().map_or(buf.len(), |&(p, _)| p));
                }

                // Terminator mid-word ("3.14") — not a boundary.
                Some(_) => {}
            }
        }
    }

    None
}

/// Whitespace-normalize a raw chunk and apply the acceptance filter.
///
/// Accepted chunks are non-empty, contain at least one letter or digit, and
/// satisfy: length ≥ 8, OR ≥ 2 words, OR (contains a letter AND length ≤ 6).
/// The last clause lets very short greetings through while rejecting stray
/// punctuation and partial-token noise from stream start.
fn clean_and_accept(raw: &str) -> Option<String> {
    let cleaned = collapse_whitespace(raw);
    if cleaned.is_empty() {
        return None;
    }

    // Punctuation-only chunks are never speakable.
    if !cleaned.chars().any(char::is_alphanumeric) {
        return None;
    }

    let len = cleaned.chars().count();
    let words = cleaned.split_whitespace().count();
    let has_letter = cleaned.chars().any(char::is_alphabetic);

    let ok = len >= 8 || words >= 2 || (has_letter && len <= 6);
    ok.then_some(cleaned)
}

/// Collapse whitespace runs to single spaces and trim.
fn collapse_whitespace(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut prev_space = false;

    for c in text.chars() {
        if c.is_whitespace() {
            if !prev_space {
                result.push(' ');
                prev_space = true;
            }
        } else {
            result.push(c);
            prev_space = false;
        }
    }

    result.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(tokens: &[&str]) -> Vec<String> {
        let mut seg = SentenceSegmenter::new();
        let mut chunks = Vec::new();
        for token in tokens {
            chunks.extend(seg.feed(token));
        }
        chunks.extend(seg.flush());
        chunks
    }

    #[test]
    fn emits_sentence_on_terminator() {
        let mut seg = SentenceSegmenter::new();
        let chunks = seg.feed("Hello there. And");
        assert_eq!(chunks, vec!["Hello there."]);
    }

    #[test]
    fn terminator_at_buffer_end_is_a_boundary() {
        let mut seg = SentenceSegmenter::new();
        assert_eq!(seg.feed("How are you?"), vec!["How are you?"]);
    }

    #[test]
    fn newline_is_a_boundary() {
        let chunks = feed_all(&["first line\nsecond line"]);
        assert_eq!(chunks, vec!["first line", "second line"]);
    }

    #[test]
    fn token_split_mid_sentence() {
        let chunks = feed_all(&["Hello. ", "How are ", "you?"]);
        assert_eq!(chunks, vec!["Hello.", "How are you?"]);
    }

    #[test]
    fn punctuation_only_chunk_is_never_emitted() {
        assert!(feed_all(&["..."]).is_empty());
        assert!(feed_all(&["!? ", "..."]).is_empty());
    }

    #[test]
    fn short_greeting_is_emitted() {
        // ≤ 6 chars but has letters — allowed through.
        assert_eq!(feed_all(&["Hi!"]), vec!["Hi!"]);
        assert_eq!(feed_all(&["Ciao! "]), vec!["Ciao!"]);
    }

    #[test]
    fn decimal_number_does_not_split() {
        let chunks = feed_all(&["Pi is 3.14 exactly."]);
        assert_eq!(chunks, vec!["Pi is 3.14 exactly."]);
    }

    #[test]
    fn whitespace_is_normalized() {
        let chunks = feed_all(&["Hello   there.\t Bye  now."]);
        assert_eq!(chunks, vec!["Hello there.", "Bye now."]);
    }

    #[test]
    fn rejected_chunk_does_not_block_later_chunks() {
        // "..." is rejected; the sentence behind it must still come out.
        let chunks = feed_all(&["...\nHow are you today?"]);
        assert_eq!(chunks, vec!["How are you today?"]);
    }

    #[test]
    fn flush_drains_remainder() {
        let mut seg = SentenceSegmenter::new();
        assert!(seg.feed("trailing words without").is_empty());
        assert_eq!(seg.flush(), Some("trailing words without".to_string()));
        assert_eq!(seg.flush(), None);
    }

    #[test]
    fn reset_discards_buffered_text() {
        let mut seg = SentenceSegmenter::new();
        let _ = seg.feed("half a sent");
        seg.reset();
        assert_eq!(seg.flush(), None);
    }

    #[test]
    fn concatenation_reproduces_text_modulo_whitespace() {
        let tokens = ["One two", " three. ", "Four five six!\n", "Seven  eight", " nine?"];
        let chunks = feed_all(&tokens);
        let joined = chunks.join(" ");
        assert_eq!(joined, "One two three. Four five six! Seven eight nine?");
    }

    #[test]
    fn multibyte_text_around_boundaries_splits_cleanly() {
        let chunks = feed_all(&["Héllo wörld.  Ça va? ", "Oui, très bien."]);
        assert_eq!(chunks, vec!["Héllo wörld.", "Ça va?", "Oui, très bien."]);
    }

    #[test]
    fn many_sentences_in_one_feed_all_extract() {
        let text = "First one here. Second one here. Third one here. Fourth one here. ";
        let chunks = feed_all(&[text]);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0], "First one here.");
        assert_eq!(chunks[3], "Fourth one here.");
    }

    #[test]
    fn non_latin_text_is_accepted() {
        let chunks = feed_all(&["Привет, как дела?"]);
        assert_eq!(chunks, vec!["Привет, как дела?"]);
    }
}
