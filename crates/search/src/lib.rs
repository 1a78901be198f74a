//! RagForge Search
//!
//! - BM25 lexical index
//! - Cosine / euclidean similarity strategies
//! - Document, chunk, sentence, and hybrid retrieval
//! - Listwise LLM reranking
//! - Retrieval-augmented answering with general-knowledge fallback
//! - Evaluation harness

pub mod bm25;
pub mod eval;
pub mod rag;
pub mod rerank;
pub mod retrieval;
pub mod similarity;

pub use rag::{AnswerRequest, RagAnswer, RagEngine, Sources};
pub use rerank::Reranker;
pub use retrieval::{Granularity, SearchHit, SearchService, SearchType};
pub use similarity::Similarity;
