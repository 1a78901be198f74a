//! Lexical retrieval with Okapi BM25

mod index;
mod tokenizer;

pub use index::{Bm25Hit, Bm25Index, B, K1};
pub use tokenizer::{is_stop_word, tokenize};
