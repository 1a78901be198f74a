//! Hybrid chunk retrieval
//!
//! Fuses cosine similarity with BM25 relevance over the same chunk set:
//! `score = alpha * semantic / max(semantic) + (1 - alpha) * bm25 / max(bm25)`.
//! A query that cannot be embedded yields no results rather than falling
//! back to BM25 alone.

use super::{deduplicate, embed_query, rank, usable, Scored, SearchHit};
use crate::bm25::Bm25Index;
use crate::similarity::cosine;
use ragforge_common::embeddings::Embedder;
use ragforge_common::errors::Result;
use ragforge_common::store::CorpusStore;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Semantic weight used when none is configured
pub const DEFAULT_ALPHA: f32 = 0.7;

/// Scale scores into `[0, 1]` by their maximum; an all-zero or all-negative
/// list maps to zeros.
fn normalize_scores(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(0.0f32, f32::max);
    if max <= 0.0 {
        return vec![0.0; scores.len()];
    }
    scores.iter().map(|s| (s / max).clamp(0.0, 1.0)).collect()
}

/// Weighted fusion of two score lists of equal length, each in `[0, 1]`
/// after normalization. `alpha` is clamped to `[0, 1]`.
pub fn fuse(semantic: &[f32], lexical: &[f32], alpha: f32) -> Vec<f32> {
    let alpha = if alpha.is_nan() {
        DEFAULT_ALPHA
    } else {
        alpha.clamp(0.0, 1.0)
    };
    let semantic = normalize_scores(semantic);
    let lexical = normalize_scores(lexical);

    semantic
        .iter()
        .zip(&lexical)
        .map(|(s, l)| (alpha * s + (1.0 - alpha) * l).clamp(0.0, 1.0))
        .collect()
}

/// Cosine + BM25 retriever over chunks
pub struct HybridRetriever {
    store: Arc<dyn CorpusStore>,
    embedder: Arc<dyn Embedder>,
}

impl HybridRetriever {
    pub fn new(store: Arc<dyn CorpusStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Chunks whose fused score is strictly above `threshold`, best first
    #[instrument(skip(self))]
    pub async fn search(
        &self,
        query: &str,
        top: usize,
        alpha: f32,
        threshold: f32,
    ) -> Result<Vec<SearchHit>> {
        let chunks = self.store.chunks_with_vectors(None).await?;
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let Some(query_vector) = embed_query(self.embedder.as_ref(), query).await else {
            return Ok(Vec::new());
        };

        let semantic: Vec<f32> = chunks
            .iter()
            .map(|chunk| {
                usable(chunk.embedding.as_deref(), &query_vector)
                    .map_or(0.0, |vector| cosine(&query_vector, vector))
            })
            .collect();

        let index = Bm25Index::new(
            chunks
                .iter()
                .enumerate()
                .map(|(idx, chunk)| (idx, chunk.content.as_str())),
        );
        let mut lexical = vec![0.0f32; chunks.len()];
        for hit in index.score(query, None) {
            lexical[hit.id] = hit.score as f32;
        }

        let fused = fuse(&semantic, &lexical, alpha);
        let candidates = chunks.len();

        let mut scored: Vec<Scored<_>> = chunks
            .into_iter()
            .zip(fused)
            .map(|(item, score)| Scored { item, score })
            .filter(|s| s.score > threshold)
            .collect();
        rank(&mut scored);

        let hits: Vec<SearchHit> = deduplicate(scored, |s| s.item.content.as_str())
            .into_iter()
            .take(top)
            .map(|s| SearchHit::chunk(&s.item, s.item.content.clone(), s.score))
            .collect();

        debug!(candidates, results = hits.len(), "Hybrid search complete");
        Ok(hits)
    }
}
