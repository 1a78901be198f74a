//! Retrieval-augmented answering
//!
//! `retrieve -> [rerank] -> build context -> generate -> attach sources`.
//! An empty retrieval answers from general knowledge and reports the
//! `"Internet"` source marker; that answer may be written back into the
//! corpus once per query within the dedup window.

use crate::rerank::Reranker;
use crate::retrieval::{Granularity, SearchHit, SearchService, SearchType};
use ragforge_common::cache::{keys, DedupCache};
use ragforge_common::config::RagConfig;
use ragforge_common::errors::{AppError, Result};
use ragforge_common::generation::Generator;
use ragforge_common::metrics;
use ragforge_common::security::PromptGuard;
use ragforge_common::store::{CorpusStore, IndexStatus};
use ragforge_common::text::fingerprint;
use serde::ser::{Serialize, Serializer};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Source marker for answers not grounded in the corpus
pub const INTERNET: &str = "Internet";

/// Parameters of one answer request
#[derive(Debug, Clone, Default)]
pub struct AnswerRequest {
    pub query: String,
    pub search_type: SearchType,
    pub rerank: bool,
    /// Overrides the configured rerank threshold
    pub rerank_threshold: Option<u8>,
    /// Overrides the configured result count
    pub top: Option<usize>,
}

impl AnswerRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn search_type(mut self, search_type: SearchType) -> Self {
        self.search_type = search_type;
        self
    }

    pub fn rerank(mut self, threshold: Option<u8>) -> Self {
        self.rerank = true;
        self.rerank_threshold = threshold;
        self
    }

    pub fn top(mut self, top: usize) -> Self {
        self.top = Some(top);
        self
    }
}

/// Where an answer came from
#[derive(Debug, Clone, PartialEq)]
pub enum Sources {
    /// General knowledge, nothing was retrieved
    Internet,
    Hits(Vec<SearchHit>),
}

impl Sources {
    pub fn is_internet(&self) -> bool {
        matches!(self, Sources::Internet)
    }

    /// Retrieved passages, empty for general-knowledge answers
    pub fn hits(&self) -> &[SearchHit] {
        match self {
            Sources::Internet => &[],
            Sources::Hits(hits) => hits,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Sources::Internet => "internet",
            Sources::Hits(_) => "corpus",
        }
    }
}

impl Serialize for Sources {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Sources::Internet => serializer.serialize_str(INTERNET),
            Sources::Hits(hits) => hits.serialize(serializer),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RagAnswer {
    pub answer: String,
    pub sources: Sources,
}

/// Answers questions over the corpus
pub struct RagEngine {
    search: SearchService,
    generator: Arc<dyn Generator>,
    reranker: Reranker,
    store: Arc<dyn CorpusStore>,
    dedup: Arc<dyn DedupCache>,
    config: RagConfig,
}

impl RagEngine {
    pub fn new(
        search: SearchService,
        generator: Arc<dyn Generator>,
        store: Arc<dyn CorpusStore>,
        dedup: Arc<dyn DedupCache>,
        config: RagConfig,
    ) -> Self {
        let reranker = Reranker::new(generator.clone(), search.config().rerank_threshold);
        Self {
            search,
            generator,
            reranker,
            store,
            dedup,
            config,
        }
    }

    pub fn search_service(&self) -> &SearchService {
        &self.search
    }

    #[instrument(skip(self, request), fields(search_type = request.search_type.as_str(), rerank = request.rerank))]
    pub async fn answer(&self, request: &AnswerRequest) -> Result<RagAnswer> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(AppError::Validation {
                message: "query must not be blank".to_string(),
                field: Some("query".to_string()),
            });
        }
        if self.config.guard_queries {
            PromptGuard::check(query)?;
        }

        let mut hits = self.retrieve(query, request).await?;
        if request.rerank && !hits.is_empty() {
            hits = match request.rerank_threshold {
                Some(threshold) => self.reranker.with_threshold(threshold).rerank(query, hits).await,
                None => self.reranker.rerank(query, hits).await,
            };
        }

        if hits.is_empty() && !self.config.allow_general_knowledge {
            return Err(AppError::NoRelevantContent);
        }

        let prompt = build_prompt(query, &build_context(&hits));
        let answer = self.generator.generate(&prompt).await?;

        let sources = if hits.is_empty() {
            if self.config.persist_fallback_answers {
                self.persist_fallback(query, &answer).await;
            }
            Sources::Internet
        } else {
            Sources::Hits(hits)
        };

        metrics::record_answer(sources.kind());
        info!(
            sources = sources.hits().len(),
            grounded = !sources.is_internet(),
            "Answer generated"
        );
        Ok(RagAnswer { answer, sources })
    }

    async fn retrieve(&self, query: &str, request: &AnswerRequest) -> Result<Vec<SearchHit>> {
        match request.search_type {
            SearchType::Hybrid => self.search.hybrid_search(query, request.top, None).await,
            search_type => {
                self.search
                    .search(query, Granularity::Chunk, search_type, request.top)
                    .await
            }
        }
    }

    /// Store a general-knowledge answer as a pending document, at most once
    /// per normalized query within the dedup window. Failures are logged only.
    async fn persist_fallback(&self, query: &str, answer: &str) {
        if answer.trim().is_empty() {
            return;
        }

        let key = keys::fallback_answer(&fingerprint(query));
        match self.dedup.claim(&key, self.config.fallback_ttl()).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(key = %key, "Fallback answer already persisted");
                return;
            }
            Err(e) => {
                warn!(error = %e, transient = e.is_transient(), "Fallback dedup check failed, skipping persistence");
                return;
            }
        }

        match self.store.create_document(answer, IndexStatus::Pending).await {
            Ok(document) => info!(document_id = %document.id, "Persisted fallback answer"),
            Err(e) => warn!(error = %e, "Failed to persist fallback answer"),
        }
    }
}

/// `[1] first\n\n[2] second`, empty without hits
fn build_context(hits: &[SearchHit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| format!("[{}] {}", i + 1, hit.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn build_prompt(query: &str, context: &str) -> String {
    if context.is_empty() {
        format!(
            "Answer following question shortly based on your knowledge\n\nQuestion: {}\n",
            query
        )
    } else {
        format!(
            "Answer the question using only the context provided below.\n\nContext:\n{}\n\nQuestion: {}\n",
            context, query
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn hit(content: &str) -> SearchHit {
        SearchHit {
            content: content.to_string(),
            score: 0.9,
            document_id: Uuid::nil(),
            chunk_id: Some(Uuid::nil()),
            start_char: Some(0),
            end_char: Some(content.len()),
            rerank_score: None,
        }
    }

    #[test]
    fn test_context_is_numbered_from_one() {
        let context = build_context(&[hit("Rails is MVC."), hit("Ruby is dynamic.")]);
        assert_eq!(context, "[1] Rails is MVC.\n\n[2] Ruby is dynamic.");
        assert!(build_context(&[]).is_empty());
    }

    #[test]
    fn test_prompt_variants() {
        let open = build_prompt("What is Rails?", "");
        assert_eq!(
            open,
            "Answer following question shortly based on your knowledge\n\nQuestion: What is Rails?\n"
        );

        let grounded = build_prompt("What is Rails?", "[1] Rails is MVC.");
        assert!(grounded.starts_with("Answer the question using only the context provided below."));
        assert!(grounded.contains("Context:\n[1] Rails is MVC.\n\nQuestion: What is Rails?"));
    }

    #[test]
    fn test_sources_serialization() {
        let internet = serde_json::to_value(Sources::Internet).unwrap();
        assert_eq!(internet, serde_json::json!("Internet"));

        let hits = serde_json::to_value(Sources::Hits(vec![hit("Rails")])).unwrap();
        assert_eq!(hits[0]["content"], "Rails");
        assert_eq!(hits[0]["start_char"], 0);
        assert!(hits[0].get("rerank_score").is_none());
    }

    #[test]
    fn test_request_builder() {
        let request = AnswerRequest::new("q")
            .search_type(SearchType::Hybrid)
            .rerank(Some(7))
            .top(3);
        assert_eq!(request.search_type, SearchType::Hybrid);
        assert!(request.rerank);
        assert_eq!(request.rerank_threshold, Some(7));
        assert_eq!(request.top, Some(3));
    }
}
