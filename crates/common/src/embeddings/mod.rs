//! Embedding service abstraction
//!
//! Provides a unified interface for embedding providers:
//! - Ollama (nomic-embed-text and other local models)
//! - Mock (deterministic feature hashing, for tests and offline runs)
//!
//! Vectors coming back from a provider are untrusted: callers check them with
//! [`validate_embedding`] before scoring or storing.

use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// Check a provider vector for the expected shape.
///
/// Returns `None` for empty vectors, dimension mismatches, and vectors holding
/// NaN or infinite components.
pub fn validate_embedding(vector: Vec<f32>, dimension: usize) -> Option<Vec<f32>> {
    if vector.is_empty() || vector.len() != dimension {
        return None;
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(vector)
}

/// Ollama embedding client
pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimension: usize,
    timeout: Duration,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    error: Option<String>,
}

impl OllamaEmbedder {
    /// Create a new Ollama embedder
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimension: config.dimension,
            timeout: config.timeout(),
        })
    }

    async fn make_request(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&OllamaRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;

        let parsed: OllamaResponse =
            serde_json::from_str(&body).map_err(|e| AppError::EmbeddingError {
                message: format!("Invalid JSON response from Ollama ({}): {}", status, e),
            })?;

        match (parsed.embedding, parsed.error) {
            (Some(embedding), _) if !embedding.is_empty() => Ok(embedding),
            (_, Some(error)) => Err(AppError::EmbeddingError {
                message: format!("Ollama error: {}", error),
            }),
            _ => Err(AppError::EmbeddingError {
                message: format!("Unexpected response format from Ollama ({})", status),
            }),
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> AppError {
        if err.is_timeout() {
            AppError::EmbeddingTimeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            AppError::EmbeddingError {
                message: format!("Request to Ollama failed: {}", err),
            }
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let start = Instant::now();
        let result = self.make_request(text).await;

        metrics::record_embedding(start.elapsed().as_secs_f64(), &self.model, result.is_ok());
        if let Err(ref e) = result {
            tracing::warn!(model = %self.model, error = %e, "Embedding request failed");
        }

        result
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Mock embedder for testing
///
/// Hashes each word into one of `dimension` buckets, so texts sharing words
/// get similar vectors. Deterministic across runs.
pub struct MockEmbedder {
    dimension: usize,
    available: bool,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            available: true,
        }
    }

    /// An embedder whose every call fails, as if the service were down
    pub fn unavailable(dimension: usize) -> Self {
        Self {
            dimension,
            available: false,
        }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if !self.available {
            return Err(AppError::EmbeddingError {
                message: "Cannot connect to embedding service".to_string(),
            });
        }

        let mut vector = vec![0.0_f32; self.dimension];
        if self.dimension == 0 {
            return Ok(vector);
        }

        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let digest = Sha256::digest(word.to_lowercase().as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let idx = (u64::from_le_bytes(bucket) % self.dimension as u64) as usize;
            vector[idx] += 1.0;
        }

        Ok(vector)
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        "mock" => Ok(Arc::new(MockEmbedder::new(config.dimension))),
        other => Err(AppError::Configuration {
            message: format!("Unknown embedding provider '{}'", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_embedder() {
        let embedder = MockEmbedder::new(768);
        let embedding = embedder.embed("test text").await.unwrap();
        assert_eq!(embedding.len(), 768);
        assert_eq!(embedding.iter().sum::<f32>(), 2.0);
    }

    #[tokio::test]
    async fn test_mock_is_deterministic_and_case_insensitive() {
        let embedder = MockEmbedder::new(64);
        let a = embedder.embed("Rails web framework").await.unwrap();
        let b = embedder.embed("rails WEB framework").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_mock_batch() {
        let embedder = MockEmbedder::new(768);
        let texts = vec!["text1".to_string(), "text2".to_string()];
        let embeddings = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0].len(), 768);
    }

    #[tokio::test]
    async fn test_unavailable_embedder_fails() {
        let embedder = MockEmbedder::unavailable(8);
        tokio_test::assert_err!(embedder.embed("anything").await);
    }

    #[test]
    fn test_validate_embedding() {
        assert!(validate_embedding(vec![0.1, 0.2, 0.3], 3).is_some());
        assert!(validate_embedding(vec![], 3).is_none());
        assert!(validate_embedding(vec![0.1, 0.2], 3).is_none());
        assert!(validate_embedding(vec![0.1, f32::NAN, 0.3], 3).is_none());
        assert!(validate_embedding(vec![0.1, f32::INFINITY, 0.3], 3).is_none());
    }

    #[test]
    fn test_unknown_provider_fails_fast() {
        let config = EmbeddingConfig {
            provider: "nonexistent".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(
            create_embedder(&config),
            Err(AppError::Configuration { .. })
        ));
    }
}
