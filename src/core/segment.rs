//! Sentence segmentation over an append-only text buffer.
//!
//! The LLM stream arrives in arbitrary fragments; callers accumulate them in
//! a buffer, call [`split_sentences`], enqueue the returned sentences for
//! synthesis and keep the residual as the new buffer.

/// Minimum number of visible (non-whitespace) characters a sentence must
/// have to be worth synthesizing. Anything shorter is punctuation noise.
const MIN_SENTENCE_CHARS: usize = 3;

/// Split `buffer` into the prefix of complete sentences and the residual
/// partial sentence.
///
/// A sentence is a maximal prefix ending in `.`, `!` or `?` followed by
/// whitespace or the end of the buffer. Sentences are trimmed; sentences
/// with fewer than three visible characters are dropped. The function is
/// pure and idempotent: the same buffer always yields the same result.
pub fn split_sentences(buffer: &str) -> (Vec<String>, String) {
    let mut sentences = Vec::new();
    let mut start = 0usize;

    let mut chars = buffer.char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        if !matches!(ch, '.' | '!' | '?') {
            continue;
        }
        // Terminator counts only when followed by whitespace or end-of-buffer,
        // so "3.14" stays intact.
        let boundary = match chars.peek() {
            Some((_, next)) => next.is_whitespace(),
            None => true,
        };
        if !boundary {
            continue;
        }

        let end = idx + ch.len_utf8();
        let sentence = buffer[start..end].trim();
        if visible_len(sentence) >= MIN_SENTENCE_CHARS {
            sentences.push(sentence.to_string());
        }
        start = end;
    }

    let residual = buffer[start..].trim_start().to_string();
    (sentences, residual)
}

/// Whether a fragment is long enough to be worth synthesizing.
pub fn speakable(text: &str) -> bool {
    visible_len(text.trim()) >= MIN_SENTENCE_CHARS
}

fn visible_len(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}
