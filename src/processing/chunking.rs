//! Sentence-aware chunking.
//!
//! Text is segmented with the Unicode sentence boundary rules (UAX #29) and sentences are
//! packed greedily into chunks of at most `max_words` whitespace-separated words. Sentences are
//! never split: one that alone exceeds the budget becomes its own oversized chunk.

use super::types::ChunkingError;
use unicode_segmentation::UnicodeSegmentation;

/// Split `text` into trimmed, non-empty sentences.
pub fn split_sentences(text: &str) -> Vec<&str> {
    text.unicode_sentences()
        .map(str::trim)
        .filter(|sentence| !sentence.is_empty())
        .collect()
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Pack sentences of `text` into chunks of at most `max_words` words.
///
/// Whitespace-only input yields no chunks. Sentences inside a chunk are joined by one space.
pub fn chunk_text(text: &str, max_words: usize) -> Result<Vec<String>, ChunkingError> {
    if max_words == 0 {
        return Err(ChunkingError::InvalidChunkSize);
    }

    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_words = 0;

    for sentence in split_sentences(text) {
        let words = word_count(sentence);
        if current_words + words > max_words && !current.is_empty() {
            chunks.push(current.join(" "));
            current.clear();
            current_words = 0;
        }
        current.push(sentence);
        current_words += words;
    }

    if !current.is_empty() {
        chunks.push(current.join(" "));
    }

    Ok(chunks)
}
