//! RagForge Ingestion
//!
//! Turns stored documents into retrievable units:
//! - Sentence segmentation with byte offsets
//! - Sentence-aligned chunking with sentence overlap
//! - Contextual chunk enrichment through the generation service
//! - The document indexer that embeds and persists chunks and sentences

pub mod chunker;
pub mod contextualizer;
pub mod errors;
pub mod processor;
pub mod sentencer;

pub use chunker::{chunk_document, chunk_text, TextChunk};
pub use contextualizer::{Contextualizer, EnrichedChunk};
pub use errors::IngestionError;
pub use processor::{DocumentIndexer, IndexReport};
pub use sentencer::{segment_sentences, Sentence};
