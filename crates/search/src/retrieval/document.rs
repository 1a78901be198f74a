//! Document-level vector search

use super::{deduplicate, embed_query, rank, usable, Scored, SearchHit};
use crate::similarity::Similarity;
use ragforge_common::embeddings::Embedder;
use ragforge_common::errors::Result;
use ragforge_common::store::CorpusStore;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Scores full-document vectors against the query
pub struct DocumentRetriever {
    store: Arc<dyn CorpusStore>,
    embedder: Arc<dyn Embedder>,
}

impl DocumentRetriever {
    pub fn new(store: Arc<dyn CorpusStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Documents scoring strictly above `threshold`, best first
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

        let documents = self.store.documents_with_vectors().await?;
        let candidates = documents.len();

        let mut scored: Vec<Scored<_>> = documents
            .into_iter()
            .filter_map(|document| {
                let vector = usable(document.embedding.as_deref(), &query_vector)?;
                let score = similarity.score(&query_vector, vector);
                Some(Scored { item: document, score })
            })
            .filter(|s| s.score > threshold)
            .collect();
        rank(&mut scored);

        let hits: Vec<SearchHit> = deduplicate(scored, |s| s.item.content.as_str())
            .into_iter()
            .take(top)
            .map(|s| SearchHit::document(s.item, s.score))
            .collect();

        debug!(candidates, results = hits.len(), "Document search complete");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragforge_common::embeddings::MockEmbedder;
    use ragforge_common::store::{InMemoryStore, IndexStatus};

    async fn seed(store: &InMemoryStore, embedder: &MockEmbedder, text: &str) {
        let document = store.create_document(text, IndexStatus::Completed).await.unwrap();
        let vector = embedder
            .embed(&ragforge_common::text::normalize(text))
            .await
            .unwrap();
        store.update_document_embedding(document.id, vector).await.unwrap();
    }

    #[tokio::test]
    async fn test_finds_matching_document() {
        let store = Arc::new(InMemoryStore::new());
        let embedder = MockEmbedder::new(64);
        seed(&store, &embedder, "Rails web framework").await;
        seed(&store, &embedder, "Gardening tips for tomatoes").await;

        let retriever = DocumentRetriever::new(store, Arc::new(embedder));
        let hits = retriever
            .search("rails web framework", Similarity::Cosine, 5, 0.6)
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "Rails web framework");
        assert!(hits[0].score > 0.99);
        assert!(hits[0].chunk_id.is_none());
    }

    #[tokio::test]
    async fn test_embedding_failure_gives_empty() {
        let store = Arc::new(InMemoryStore::new());
        seed(&store, &MockEmbedder::new(64), "Rails web framework").await;

        let retriever = DocumentRetriever::new(store, Arc::new(MockEmbedder::unavailable(64)));
        let hits = retriever
            .search("rails", Similarity::Cosine, 5, 0.0)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_mismatched_dimension_skipped() {
        let store = Arc::new(InMemoryStore::new());
        seed(&store, &MockEmbedder::new(16), "Rails web framework").await;

        let retriever = DocumentRetriever::new(store, Arc::new(MockEmbedder::new(64)));
        let hits = retriever
            .search("rails web framework", Similarity::Euclidean, 5, 0.0)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
