//! Lexical tokenizer for BM25
//!
//! Lower-cases, replaces everything but ASCII letters, digits and whitespace
//! with spaces, then drops tokens shorter than two characters and stop words.

const STOP_WORDS: &[&str] = &[
    "a", "above", "after", "again", "all", "am", "an", "and", "are", "as", "at", "be", "been",
    "before", "being", "below", "between", "both", "but", "by", "can", "could", "d", "did",
    "do", "does", "during", "each", "few", "for", "from", "further", "had", "has", "have",
    "he", "here", "how", "i", "if", "in", "into", "is", "it", "its", "just", "ll", "m", "may",
    "me", "might", "more", "most", "my", "no", "nor", "not", "of", "off", "on", "once", "only",
    "or", "other", "our", "out", "over", "own", "re", "s", "same", "shall", "she", "should",
    "so", "some", "such", "t", "than", "that", "the", "their", "them", "then", "there",
    "these", "they", "this", "those", "through", "to", "too", "under", "ve", "very", "was",
    "we", "were", "what", "when", "where", "which", "while", "who", "why", "will", "with",
    "would", "you", "your",
];

/// True for words carrying no lexical signal
pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.binary_search(&token).is_ok()
}

/// Split `text` into index terms
pub fn tokenize(text: &str) -> Vec<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();

    cleaned
        .split_whitespace()
        .filter(|token| token.len() >= 2 && !is_stop_word(token))
        .map(str::to_string)
        .collect()
}
