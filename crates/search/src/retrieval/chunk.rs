//! Chunk-level vector search

use super::{deduplicate, embed_query, rank, usable, Scored, SearchHit};
use crate::similarity::Similarity;
use ragforge_common::embeddings::Embedder;
use ragforge_common::errors::Result;
use ragforge_common::store::CorpusStore;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Scores chunk vectors against the query
pub struct ChunkRetriever {
    store: Arc<dyn CorpusStore>,
    embedder: Arc<dyn Embedder>,
}

impl ChunkRetriever {
    pub fn new(store: Arc<dyn CorpusStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Chunks scoring strictly above `threshold`, best first.
    ///
    /// Hits carry the contextualized content; duplicates are judged on the
    /// bare document slice.
    #[instrument(skip(self))]
    pub async fn search(
        &self,
        query: &str,
        similarity: Similarity,
        top: usize,
        threshold: f32,
    ) -> Result<Vec<SearchHit>> {
        let Some(query_vector) = embed_query(self.embedder.as_ref(), query).await else {
            return Ok(Vec::new());
        };

        let chunks = self.store.chunks_with_vectors(None).await?;
        let candidates = chunks.len();

        let mut scored: Vec<Scored<_>> = chunks
            .into_iter()
            .filter_map(|chunk| {
                let vector = usable(chunk.embedding.as_deref(), &query_vector)?;
                let score = similarity.score(&query_vector, vector);
                Some(Scored { item: chunk, score })
            })
            .filter(|s| s.score > threshold)
            .collect();
        rank(&mut scored);

        let hits: Vec<SearchHit> = deduplicate(scored, |s| s.item.content.as_str())
            .into_iter()
            .take(top)
            .map(|s| SearchHit::chunk(&s.item, s.item.contextualized_content(), s.score))
            .collect();

        debug!(candidates, results = hits.len(), "Chunk search complete");
        Ok(hits)
    }
}
