//! Multi-granularity retrieval
//!
//! Provides four retrieval pipelines:
//! - Document search (full-document vectors)
//! - Chunk search (chunk vectors, cosine or euclidean)
//! - Sentence search (best document, then best chunk, then its sentences)
//! - Hybrid search (normalized fusion of cosine and BM25 over chunks)
//!
//! Every pipeline embeds the normalized query, scores candidates holding a
//! usable vector, thresholds, sorts, deduplicates by content, and truncates.
//! A failed query embedding yields no results; store errors propagate.

mod chunk;
mod dedup;
mod document;
mod hybrid;
mod sentence;

#[cfg(test)]
pub(crate) mod fixtures;

pub use chunk::ChunkRetriever;
pub use dedup::deduplicate;
pub use document::DocumentRetriever;
pub use hybrid::{fuse, HybridRetriever, DEFAULT_ALPHA};
pub use sentence::SentenceRetriever;

use crate::similarity::Similarity;
use ragforge_common::config::RetrievalConfig;
use ragforge_common::embeddings::{validate_embedding, Embedder};
use ragforge_common::errors::{AppError, Result};
use ragforge_common::metrics;
use ragforge_common::store::{ChunkRecord, CorpusStore, DocumentRecord, SentenceRecord};
use ragforge_common::text::normalize;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{instrument, warn};
use uuid::Uuid;

/// A retrieved passage with its relevance score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub content: String,
    pub score: f32,
    pub document_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_char: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_char: Option<usize>,
    /// Listwise relevance in `[0, 10]`, set by the reranker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<u8>,
}

impl SearchHit {
    pub(crate) fn document(document: DocumentRecord, score: f32) -> Self {
        Self {
            document_id: document.id,
            content: document.content,
            score,
            chunk_id: None,
            start_char: None,
            end_char: None,
            rerank_score: None,
        }
    }

    pub(crate) fn chunk(chunk: &ChunkRecord, content: String, score: f32) -> Self {
        Self {
            content,
            score,
            document_id: chunk.document_id,
            chunk_id: Some(chunk.id),
            start_char: Some(chunk.start_char),
            end_char: Some(chunk.end_char),
            rerank_score: None,
        }
    }

    pub(crate) fn sentence(sentence: SentenceRecord, score: f32) -> Self {
        Self {
            document_id: sentence.document_id,
            chunk_id: sentence.chunk_id,
            start_char: Some(sentence.start_char),
            end_char: Some(sentence.end_char),
            content: sentence.content,
            score,
            rerank_score: None,
        }
    }
}

/// Retrieval strategy selected by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    #[default]
    Cosine,
    Euclidean,
    Hybrid,
}

impl SearchType {
    /// `"hybrid"` selects fusion; anything else resolves as a similarity name
    pub fn resolve(name: Option<&str>) -> Self {
        match name {
            Some("hybrid") => SearchType::Hybrid,
            other => match Similarity::resolve(other) {
                Similarity::Cosine => SearchType::Cosine,
                Similarity::Euclidean => SearchType::Euclidean,
            },
        }
    }

    /// Similarity used by the vector pipelines; hybrid fusion is cosine-based
    pub fn similarity(&self) -> Similarity {
        match self {
            SearchType::Euclidean => Similarity::Euclidean,
            SearchType::Cosine | SearchType::Hybrid => Similarity::Cosine,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchType::Cosine => "cosine",
            SearchType::Euclidean => "euclidean",
            SearchType::Hybrid => "hybrid",
        }
    }
}

/// Retrieval unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Document,
    Chunk,
    Sentence,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Document => "document",
            Granularity::Chunk => "chunk",
            Granularity::Sentence => "sentence",
        }
    }
}

impl FromStr for Granularity {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "document" => Ok(Granularity::Document),
            "chunk" => Ok(Granularity::Chunk),
            "sentence" => Ok(Granularity::Sentence),
            other => Err(AppError::Validation {
                message: format!("unknown granularity '{}'", other),
                field: Some("granularity".to_string()),
            }),
        }
    }
}

/// An item paired with its score
#[derive(Debug, Clone)]
pub(crate) struct Scored<T> {
    pub item: T,
    pub score: f32,
}

/// Sort best first; ties keep their relative order
pub(crate) fn rank<T>(scored: &mut [Scored<T>]) {
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
}

/// Highest-scored item, the earliest one on ties
pub(crate) fn best<T>(scored: impl IntoIterator<Item = Scored<T>>) -> Option<Scored<T>> {
    scored.into_iter().fold(None, |best, candidate| match best {
        Some(current) if current.score >= candidate.score => Some(current),
        _ => Some(candidate),
    })
}

/// The stored vector when it can be compared with the query vector
pub(crate) fn usable<'a>(vector: Option<&'a [f32]>, query: &[f32]) -> Option<&'a [f32]> {
    vector.filter(|v| !v.is_empty() && v.len() == query.len())
}

/// Embed the normalized query, or `None` when the embedding is unusable
pub(crate) async fn embed_query(embedder: &dyn Embedder, query: &str) -> Option<Vec<f32>> {
    let normalized = normalize(query);
    if normalized.is_empty() {
        return None;
    }
    match embedder.embed(&normalized).await {
        Ok(vector) => {
            let vector = validate_embedding(vector, embedder.dimension());
            if vector.is_none() {
                warn!(model = embedder.model_name(), "Query embedding malformed");
            }
            vector
        }
        Err(e) => {
            warn!(error = %e, transient = e.is_transient(), "Query embedding failed");
            None
        }
    }
}

/// Search facade over the retrieval pipelines
pub struct SearchService {
    documents: DocumentRetriever,
    chunks: ChunkRetriever,
    sentences: SentenceRetriever,
    hybrid: HybridRetriever,
    config: RetrievalConfig,
}

impl SearchService {
    pub fn new(
        store: Arc<dyn CorpusStore>,
        embedder: Arc<dyn Embedder>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            documents: DocumentRetriever::new(store.clone(), embedder.clone()),
            chunks: ChunkRetriever::new(store.clone(), embedder.clone()),
            sentences: SentenceRetriever::new(store.clone(), embedder.clone()),
            hybrid: HybridRetriever::new(store, embedder),
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Search at `granularity`. Hybrid applies to chunks; documents and
    /// sentences use its cosine similarity.
    #[instrument(skip(self))]
    pub async fn search(
        &self,
        query: &str,
        granularity: Granularity,
        search_type: SearchType,
        top: Option<usize>,
    ) -> Result<Vec<SearchHit>> {
        let start = Instant::now();
        let top = top.unwrap_or(self.config.default_top);
        let similarity = search_type.similarity();

        let hits = match granularity {
            Granularity::Document => {
                self.documents
                    .search(query, similarity, top, self.config.document_threshold)
                    .await?
            }
            Granularity::Chunk if search_type == SearchType::Hybrid => {
                self.hybrid
                    .search(query, top, self.config.hybrid_alpha, self.config.hybrid_threshold)
                    .await?
            }
            Granularity::Chunk => {
                self.chunks
                    .search(query, similarity, top, self.config.chunk_threshold)
                    .await?
            }
            Granularity::Sentence => self.sentences.search(query, similarity, top).await?,
        };

        let mode = format!("{}:{}", granularity.as_str(), search_type.as_str());
        metrics::record_search(start.elapsed().as_secs_f64(), &mode, hits.len());
        Ok(hits)
    }

    /// Hybrid chunk search with an explicit semantic weight
    pub async fn hybrid_search(
        &self,
        query: &str,
        top: Option<usize>,
        alpha: Option<f32>,
    ) -> Result<Vec<SearchHit>> {
        let start = Instant::now();
        let hits = self
            .hybrid
            .search(
                query,
                top.unwrap_or(self.config.default_top),
                alpha.unwrap_or(self.config.hybrid_alpha),
                self.config.hybrid_threshold,
            )
            .await?;
        metrics::record_search(start.elapsed().as_secs_f64(), "chunk:hybrid", hits.len());
        Ok(hits)
    }
}
