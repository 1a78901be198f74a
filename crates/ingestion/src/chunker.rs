//! Text chunking module
//!
//! Groups consecutive sentences into chunks of about `chunk_size`
//! characters. A chunk closes once the next sentence would push it past the
//! budget; the next chunk starts with the last `overlap` sentences of the
//! closed one, so consecutive chunks share text. Chunks never split a
//! sentence, and carried sentences may take a chunk past the budget.

use crate::sentencer::{segment_sentences, Sentence};
use ragforge_common::config::ChunkingConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A text chunk located in its document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    /// Exactly `text[start_char..end_char]`
    pub content: String,
    /// Start byte offset in the source text
    pub start_char: usize,
    /// End byte offset (exclusive)
    pub end_char: usize,
}

/// Chunk a document with the configured size and overlap
pub fn chunk_document(text: &str, config: &ChunkingConfig) -> Vec<TextChunk> {
    chunk_text(text, config.chunk_size, config.overlap)
}

/// Split text into sentence-aligned chunks
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<TextChunk> {
    let sentences = segment_sentences(text, 0);
    if sentences.is_empty() {
        return Vec::new();
    }

    // Characters spanned from the start of sentence `first` to the end of `last`
    let span_len = |first: usize, last: usize| {
        text[sentences[first].start_char..sentences[last].end_char]
            .chars()
            .count()
    };

    let mut chunks = Vec::new();
    let mut group: Vec<usize> = Vec::new();

    for next in 0..sentences.len() {
        if let Some(&first) = group.first() {
            if span_len(first, next) > chunk_size {
                chunks.push(flush(text, &sentences, &group));
                group.drain(..group.len().saturating_sub(overlap));
            }
        }
        group.push(next);
    }

    if !group.is_empty() {
        chunks.push(flush(text, &sentences, &group));
    }

    debug!(
        input_len = text.len(),
        sentence_count = sentences.len(),
        chunk_count = chunks.len(),
        chunk_size,
        overlap,
        "Text chunked"
    );

    chunks
}

fn flush(text: &str, sentences: &[Sentence], group: &[usize]) -> TextChunk {
    let start_char = sentences[group[0]].start_char;
    let end_char = sentences[group[group.len() - 1]].end_char;
    TextChunk {
        content: text[start_char..end_char].to_string(),
        start_char,
        end_char,
    }
}
