//! Contextual chunk enrichment
//!
//! Each chunk gets a short LLM-written context that situates it in its
//! document. The document is uploaded once as cached content; if caching or
//! the cached pass fails, every chunk is prompted directly with the document
//! inline, and a chunk whose direct prompt fails gets an empty context.

use crate::chunker::TextChunk;
use ragforge_common::generation::{CacheHandle, Generator};
use ragforge_common::store::contextualize;
use ragforge_common::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const INSTRUCTION: &str = "Give a short, succinct context (1-2 sentences) to situate this chunk \
within the overall document for search retrieval purposes.\n\
Return ONLY the contextual description, nothing else.";

/// A chunk with its generated context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichedChunk {
    pub chunk: TextChunk,
    /// Trimmed context, empty when generation failed
    pub context: String,
}

impl EnrichedChunk {
    /// Content used for embedding and search
    pub fn contextualized_content(&self) -> String {
        contextualize(Some(&self.context), &self.chunk.content)
    }
}

/// Generates situating contexts for the chunks of one document
pub struct Contextualizer {
    generator: Arc<dyn Generator>,
    cache_ttl: Duration,
}

impl Contextualizer {
    pub fn new(generator: Arc<dyn Generator>, cache_ttl: Duration) -> Self {
        Self {
            generator,
            cache_ttl,
        }
    }

    /// Attach a context to every chunk, preserving order
    #[instrument(skip_all, fields(chunks = chunks.len()))]
    pub async fn contextualize(&self, document: &str, chunks: Vec<TextChunk>) -> Vec<EnrichedChunk> {
        if chunks.is_empty() {
            return Vec::new();
        }

        let cache = match self
            .generator
            .create_cache(&cache_body(document), self.cache_ttl)
            .await
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "Content caching failed, falling back to direct prompts");
                None
            }
        };

        let cached = match &cache {
            Some(handle) => {
                let result = self.with_cache(handle, &chunks).await;
                self.release(handle).await;
                match result {
                    Ok(contexts) => Some(contexts),
                    Err(e) => {
                        warn!(error = %e, "Cached generation failed, falling back to direct prompts");
                        None
                    }
                }
            }
            None => None,
        };

        let contexts = match cached {
            Some(contexts) => contexts,
            None => self.directly(document, &chunks).await,
        };

        chunks
            .into_iter()
            .zip(contexts)
            .map(|(chunk, context)| EnrichedChunk { chunk, context })
            .collect()
    }

    async fn with_cache(&self, handle: &CacheHandle, chunks: &[TextChunk]) -> Result<Vec<String>> {
        let mut contexts = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let context = self
                .generator
                .generate_with_cache(handle, &chunk_prompt(&chunk.content))
                .await?;
            contexts.push(context.trim().to_string());
        }
        Ok(contexts)
    }

    async fn directly(&self, document: &str, chunks: &[TextChunk]) -> Vec<String> {
        let mut contexts = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let context = match self
                .generator
                .generate(&direct_prompt(document, &chunk.content))
                .await
            {
                Ok(context) => context.trim().to_string(),
                Err(e) => {
                    warn!(error = %e, transient = e.is_transient(), start_char = chunk.start_char, "Skipping context for chunk");
                    String::new()
                }
            };
            contexts.push(context);
        }
        contexts
    }

    async fn release(&self, handle: &CacheHandle) {
        match self.generator.delete_cache(handle).await {
            Ok(()) => debug!(cache = handle.name(), "Released cached content"),
            Err(e) => warn!(cache = handle.name(), error = %e, "Failed to delete cached content"),
        }
    }
}

fn cache_body(document: &str) -> String {
    format!("<document>\n{}\n</document>", document)
}

fn chunk_prompt(chunk: &str) -> String {
    format!(
        "Here is a chunk from the document provided earlier:\n\n<chunk>\n{}\n</chunk>\n\n{}",
        chunk, INSTRUCTION
    )
}

fn direct_prompt(document: &str, chunk: &str) -> String {
    format!(
        "<document>\n{}\n</document>\n\nHere is a chunk from the above document:\n\n<chunk>\n{}\n</chunk>\n\n{}",
        document, chunk, INSTRUCTION
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragforge_common::errors::AppError;
    use ragforge_common::generation::MockGenerator;

    fn chunks() -> Vec<TextChunk> {
        vec![
            TextChunk {
                content: "Rails is a framework.".into(),
                start_char: 0,
                end_char: 21,
            },
            TextChunk {
                content: "It uses MVC.".into(),
                start_char: 22,
                end_char: 34,
            },
        ]
    }

    const DOC: &str = "Rails is a framework. It uses MVC.";

    fn contextualizer(generator: Arc<MockGenerator>) -> Contextualizer {
        Contextualizer::new(generator, Duration::from_secs(300))
    }

    #[tokio::test]
    async fn test_empty_chunks_unchanged() {
        let generator = Arc::new(MockGenerator::new());
        let enriched = contextualizer(generator.clone()).contextualize(DOC, Vec::new()).await;
        assert!(enriched.is_empty());
        assert_eq!(generator.caches_created(), 0);
    }

    #[tokio::test]
    async fn test_cached_pass_trims_and_releases() {
        let generator = Arc::new(MockGenerator::with_response("  About Rails.\n"));
        let enriched = contextualizer(generator.clone()).contextualize(DOC, chunks()).await;

        assert_eq!(enriched.len(), 2);
        assert!(enriched.iter().all(|c| c.context == "About Rails."));
        assert_eq!(enriched[0].contextualized_content(), "About Rails. Rails is a framework.");
        assert_eq!(generator.caches_created(), 1);
        assert_eq!(generator.caches_deleted(), 1);
        assert!(generator.prompts()[0].starts_with("Here is a chunk from the document provided earlier"));
    }

    #[tokio::test]
    async fn test_cache_failure_falls_back_to_direct_prompts() {
        let generator = Arc::new(MockGenerator::with_response("Direct.").without_cache());
        let enriched = contextualizer(generator.clone()).contextualize(DOC, chunks()).await;

        assert!(enriched.iter().all(|c| c.context == "Direct."));
        assert_eq!(generator.caches_deleted(), 0);
        let prompts = generator.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].starts_with("<document>\nRails is a framework. It uses MVC.\n</document>"));
    }

    #[tokio::test]
    async fn test_cached_failure_still_releases_cache() {
        // Cached prompts fail, direct prompts succeed
        let generator = Arc::new(MockGenerator::from_fn(|prompt| {
            if prompt.starts_with("Here is a chunk") {
                Err(AppError::GenerationError {
                    message: "quota".into(),
                })
            } else {
                Ok("Direct.".into())
            }
        }));
        let enriched = contextualizer(generator.clone()).contextualize(DOC, chunks()).await;

        assert!(enriched.iter().all(|c| c.context == "Direct."));
        assert_eq!(generator.caches_created(), 1);
        assert_eq!(generator.caches_deleted(), 1);
    }

    #[tokio::test]
    async fn test_total_failure_gives_empty_context() {
        let generator = Arc::new(MockGenerator::unavailable());
        let enriched = contextualizer(generator).contextualize(DOC, chunks()).await;

        assert_eq!(enriched.len(), 2);
        assert!(enriched.iter().all(|c| c.context.is_empty()));
        assert_eq!(enriched[1].contextualized_content(), "It uses MVC.");
    }
}
