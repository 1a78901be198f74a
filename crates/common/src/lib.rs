//! RagForge Common Library
//!
//! Shared code for the RagForge crates including:
//! - Error types and handling
//! - Configuration management
//! - Text normalization and content fingerprints
//! - Embedding and generation client abstractions
//! - Corpus store trait, in-memory store, and SeaORM repository
//! - Fallback dedup cache (Redis / in-process)
//! - Prompt-injection guard
//! - Metrics

pub mod cache;
pub mod config;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod generation;
pub mod metrics;
pub mod security;
pub mod store;
pub mod text;

// Re-export commonly used types
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use generation::Generator;
pub use store::CorpusStore;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 768;
