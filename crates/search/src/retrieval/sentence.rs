//! Sentence-level search
//!
//! Narrows hierarchically: the best-scoring document, then its best-scoring
//! chunk, then the top sentences of that chunk. Sentences carry no stored
//! vectors, so the winning chunk's sentences are embedded at query time in
//! one batch.

use super::{best, deduplicate, embed_query, rank, usable, Scored, SearchHit};
use crate::similarity::Similarity;
use ragforge_common::embeddings::{validate_embedding, Embedder};
use ragforge_common::errors::Result;
use ragforge_common::store::{ChunkRecord, CorpusStore, DocumentRecord, SentenceRecord};
use ragforge_common::text::normalize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Three-stage sentence retriever
pub struct SentenceRetriever {
    store: Arc<dyn CorpusStore>,
    embedder: Arc<dyn Embedder>,
}

impl SentenceRetriever {
    pub fn new(store: Arc<dyn CorpusStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    #[instrument(skip(self))]
    pub async fn search(
        &self,
        query: &str,
        similarity: Similarity,
        top: usize,
    ) -> Result<Vec<SearchHit>> {
        let Some(query_vector) = embed_query(self.embedder.as_ref(), query).await else {
            return Ok(Vec::new());
        };

        let Some(best_document) = self.best_document(&query_vector, similarity).await? else {
            debug!("No document with a usable vector");
            return Ok(Vec::new());
        };

        let Some(best_chunk) = self
            .best_chunk(&best_document.item, &query_vector, similarity)
            .await?
        else {
            debug!(document_id = %best_document.item.id, "Best document has no usable chunk");
            return Ok(Vec::new());
        };

        debug!(
            document_id = %best_document.item.id,
            document_score = best_document.score,
            chunk_id = %best_chunk.item.id,
            chunk_score = best_chunk.score,
            "Sentence search narrowed to chunk"
        );

        self.best_sentences(&best_chunk.item, &query_vector, similarity, top)
            .await
    }

    async fn best_document(
        &self,
        query_vector: &[f32],
        similarity: Similarity,
    ) -> Result<Option<Scored<DocumentRecord>>> {
        let documents = self.store.documents_with_vectors().await?;
        Ok(best(documents.into_iter().filter_map(|document| {
            let vector = usable(document.embedding.as_deref(), query_vector)?;
            let score = similarity.score(query_vector, vector);
            Some(Scored { item: document, score })
        })))
    }

    async fn best_chunk(
        &self,
        document: &DocumentRecord,
        query_vector: &[f32],
        similarity: Similarity,
    ) -> Result<Option<Scored<ChunkRecord>>> {
        let chunks = self.store.chunks_with_vectors(Some(document.id)).await?;
        Ok(best(chunks.into_iter().filter_map(|chunk| {
            let vector = usable(chunk.embedding.as_deref(), query_vector)?;
            let score = similarity.score(query_vector, vector);
            Some(Scored { item: chunk, score })
        })))
    }

    async fn best_sentences(
        &self,
        chunk: &ChunkRecord,
        query_vector: &[f32],
        similarity: Similarity,
        top: usize,
    ) -> Result<Vec<SearchHit>> {
        let sentences = self.store.sentences_for_chunk(chunk.id).await?;

        let Some(vectors) = self.embed_sentences(&sentences).await else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<Scored<SentenceRecord>> = sentences
            .into_iter()
            .zip(vectors)
            .filter_map(|(sentence, vector)| {
                let vector = usable(vector.as_deref(), query_vector)?;
                let score = similarity.score(query_vector, vector);
                Some(Scored { item: sentence, score })
            })
            .collect();
        rank(&mut scored);

        Ok(deduplicate(scored, |s| s.item.content.as_str())
            .into_iter()
            .take(top)
            .map(|s| SearchHit::sentence(s.item, s.score))
            .collect())
    }

    /// One validated vector per sentence, or `None` when the batch failed
    async fn embed_sentences(&self, sentences: &[SentenceRecord]) -> Option<Vec<Option<Vec<f32>>>> {
        if sentences.is_empty() {
            return Some(Vec::new());
        }
        let texts: Vec<String> = sentences.iter().map(|s| normalize(&s.content)).collect();
        match self.embedder.embed_batch(&texts).await {
            Ok(vectors) if vectors.len() == texts.len() => Some(
                vectors
                    .into_iter()
                    .map(|v| validate_embedding(v, self.embedder.dimension()))
                    .collect(),
            ),
            Ok(vectors) => {
                warn!(expected = texts.len(), got = vectors.len(), "Sentence embedding count mismatch");
                None
            }
            Err(e) => {
                warn!(error = %e, transient = e.is_transient(), "Sentence embedding failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::fixtures::{seed, DIMENSION};
    use async_trait::async_trait;
    use ragforge_common::embeddings::MockEmbedder;
    use ragforge_common::errors::AppError;
    use ragforge_common::store::InMemoryStore;

    /// Embeds single texts but fails every batch
    struct NoBatchEmbedder(MockEmbedder);

    #[async_trait]
    impl Embedder for NoBatchEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.0.embed(text).await
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(AppError::EmbeddingTimeout { timeout_ms: 30_000 })
        }

        fn model_name(&self) -> &str {
            "no-batch"
        }

        fn dimension(&self) -> usize {
            self.0.dimension()
        }
    }

    fn retriever(store: Arc<InMemoryStore>) -> SentenceRetriever {
        SentenceRetriever::new(store, Arc::new(MockEmbedder::new(DIMENSION)))
    }

    #[tokio::test]
    async fn test_narrows_to_best_chunk() {
        let store = Arc::new(InMemoryStore::new());
        let rails = seed(
            &store,
            &[
                &["Rails uses migrations.", "Rails routing maps URLs."],
                &["Active Record models tables.", "Validations guard models."],
            ],
        )
        .await;
        seed(&store, &[&["Tomatoes need full sun.", "Water them daily."]]).await;

        let hits = retriever(store.clone())
            .search("rails routing maps urls", Similarity::Cosine, 5)
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, "Rails routing maps URLs.");
        assert_eq!(hits[1].content, "Rails uses migrations.");
        assert!(hits.iter().all(|h| h.document_id == rails));

        let document = store.find_document(rails).await.unwrap().unwrap();
        let hit = &hits[0];
        assert_eq!(
            &document.content[hit.start_char.unwrap()..hit.end_char.unwrap()],
            hit.content
        );
    }

    #[tokio::test]
    async fn test_top_limits_sentences() {
        let store = Arc::new(InMemoryStore::new());
        seed(&store, &[&["Rails one.", "Rails two.", "Rails three."]]).await;

        let hits = retriever(store)
            .search("rails", Similarity::Euclidean, 1)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_corpus_and_failed_embedding() {
        let hits = retriever(Arc::new(InMemoryStore::new()))
            .search("rails", Similarity::Cosine, 5)
            .await
            .unwrap();
        assert!(hits.is_empty());

        let store = Arc::new(InMemoryStore::new());
        seed(&store, &[&["Rails one."]]).await;
        let retriever = SentenceRetriever::new(store, Arc::new(MockEmbedder::unavailable(DIMENSION)));
        assert!(retriever
            .search("rails", Similarity::Cosine, 5)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_failed_sentence_batch_yields_nothing() {
        let store = Arc::new(InMemoryStore::new());
        seed(&store, &[&["Rails one.", "Rails two."]]).await;

        let retriever =
            SentenceRetriever::new(store, Arc::new(NoBatchEmbedder(MockEmbedder::new(DIMENSION))));
        let hits = retriever.search("rails", Similarity::Cosine, 5).await.unwrap();
        assert!(hits.is_empty());
    }
}
