//! Configuration management for RagForge services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Redis configuration
    #[serde(default)]
    pub redis: RedisConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Generation service configuration
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Retrieval thresholds and defaults
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Chunking and ingestion configuration
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Answer orchestration policy
    #[serde(default)]
    pub rag: RagConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    /// Redis URL; the fallback dedup cache stays in-process when unset
    pub url: Option<String>,

    /// Key prefix for namespacing
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: ollama, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API base URL
    #[serde(default = "default_embedding_base")]
    pub api_base: String,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Expected embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    /// Generation provider: gemini, mock
    #[serde(default = "default_generation_provider")]
    pub provider: String,

    /// API key for the generation service (falls back to GOOGLE_API_KEY)
    pub api_key: Option<String>,

    /// API base URL
    #[serde(default = "default_generation_base")]
    pub api_base: String,

    /// Model used for plain generation
    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Model used for cached-content generation
    #[serde(default = "default_cache_model")]
    pub cache_model: String,

    /// Lifetime of server-side cached content in seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Request timeout in seconds
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Minimum chunk similarity (exclusive)
    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold: f32,

    /// Minimum document similarity (exclusive)
    #[serde(default = "default_document_threshold")]
    pub document_threshold: f32,

    /// Minimum fused hybrid score (exclusive)
    #[serde(default = "default_hybrid_threshold")]
    pub hybrid_threshold: f32,

    /// Semantic weight in hybrid fusion
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f32,

    /// Default number of results
    #[serde(default = "default_top")]
    pub default_top: usize,

    /// Minimum rerank score kept (0-10)
    #[serde(default = "default_rerank_threshold")]
    pub rerank_threshold: u8,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChunkingConfig {
    /// Target chunk size in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Sentences carried over between consecutive chunks
    #[serde(default = "default_overlap")]
    pub overlap: usize,

    /// Concurrent chunk embedding requests during ingestion
    #[serde(default = "default_embed_concurrency")]
    pub embed_concurrency: usize,

    /// Reject documents whose content trips the prompt guard
    #[serde(default)]
    pub guard_content: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RagConfig {
    /// Answer from general knowledge when retrieval is empty
    #[serde(default = "default_true")]
    pub allow_general_knowledge: bool,

    /// Store general-knowledge answers back into the corpus
    #[serde(default = "default_true")]
    pub persist_fallback_answers: bool,

    /// Dedup window for persisted fallback answers in seconds
    #[serde(default = "default_fallback_ttl")]
    pub fallback_ttl_secs: u64,

    /// Run the prompt guard over incoming queries
    #[serde(default = "default_true")]
    pub guard_queries: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_true")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default)]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_key_prefix() -> String { "ragforge".to_string() }
fn default_embedding_provider() -> String { "ollama".to_string() }
fn default_embedding_base() -> String { "http://localhost:11434".to_string() }
fn default_embedding_model() -> String { crate::DEFAULT_EMBEDDING_MODEL.to_string() }
fn default_embedding_dimension() -> usize { crate::DEFAULT_EMBEDDING_DIMENSION }
fn default_embedding_timeout() -> u64 { 30 }
fn default_generation_provider() -> String { "gemini".to_string() }
fn default_generation_base() -> String { "https://generativelanguage.googleapis.com".to_string() }
fn default_generation_model() -> String { "gemma-3-27b-it".to_string() }
fn default_cache_model() -> String { "gemini-2.0-flash-lite".to_string() }
fn default_cache_ttl() -> u64 { 300 }
fn default_generation_timeout() -> u64 { 60 }
fn default_chunk_threshold() -> f32 { 0.4 }
fn default_document_threshold() -> f32 { 0.6 }
fn default_hybrid_threshold() -> f32 { 0.0 }
fn default_hybrid_alpha() -> f32 { 0.7 }
fn default_top() -> usize { 5 }
fn default_rerank_threshold() -> u8 { 5 }
fn default_chunk_size() -> usize { 500 }
fn default_overlap() -> usize { 1 }
fn default_embed_concurrency() -> usize { 4 }
fn default_fallback_ttl() -> u64 { 86_400 }
fn default_log_level() -> String { "info".to_string() }
fn default_service_name() -> String { "ragforge".to_string() }
fn default_true() -> bool { true }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("database.url", "postgres://localhost/ragforge")?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__RETRIEVAL__HYBRID_ALPHA=0.5
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }
}

impl EmbeddingConfig {
    /// Get request timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl GenerationConfig {
    /// Get request timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Get cached-content lifetime as Duration
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Configured API key, falling back to the GOOGLE_API_KEY variable
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
            .filter(|key| !key.trim().is_empty())
    }
}

impl RagConfig {
    /// Get fallback dedup window as Duration
    pub fn fallback_ttl(&self) -> Duration {
        Duration::from_secs(self.fallback_ttl_secs)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            key_prefix: default_key_prefix(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_base: default_embedding_base(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            api_key: None,
            api_base: default_generation_base(),
            model: default_generation_model(),
            cache_model: default_cache_model(),
            cache_ttl_secs: default_cache_ttl(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            chunk_threshold: default_chunk_threshold(),
            document_threshold: default_document_threshold(),
            hybrid_threshold: default_hybrid_threshold(),
            hybrid_alpha: default_hybrid_alpha(),
            default_top: default_top(),
            rerank_threshold: default_rerank_threshold(),
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            embed_concurrency: default_embed_concurrency(),
            guard_content: false,
        }
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            allow_general_knowledge: true,
            persist_fallback_answers: true,
            fallback_ttl_secs: default_fallback_ttl(),
            guard_queries: true,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: true,
            metrics_port: 0,
            service_name: default_service_name(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgres://localhost/ragforge".to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            redis: RedisConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            retrieval: RetrievalConfig::default(),
            chunking: ChunkingConfig::default(),
            rag: RagConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.embedding.model, "nomic-embed-text");
        assert_eq!(config.embedding.dimension, 768);
        assert_eq!(config.retrieval.chunk_threshold, 0.4);
        assert_eq!(config.retrieval.document_threshold, 0.6);
        assert_eq!(config.retrieval.hybrid_alpha, 0.7);
        assert_eq!(config.retrieval.rerank_threshold, 5);
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.overlap, 1);
    }

    #[test]
    fn test_blank_api_key_is_ignored() {
        let generation = GenerationConfig {
            api_key: Some("  ".to_string()),
            ..GenerationConfig::default()
        };
        assert!(generation.resolved_api_key().is_none());
    }

    #[test]
    fn test_partial_sections_use_defaults() {
        let config: AppConfig = serde_json::from_value(serde_json::json!({
            "database": { "url": "postgres://db/ragforge" },
            "retrieval": { "hybrid_alpha": 0.5 }
        }))
        .unwrap();

        assert_eq!(config.retrieval.hybrid_alpha, 0.5);
        assert_eq!(config.retrieval.chunk_threshold, 0.4);
        assert!(config.rag.allow_general_knowledge);
        assert_eq!(config.database.max_connections, 20);
    }
}
