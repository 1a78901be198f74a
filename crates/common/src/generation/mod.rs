//! Text generation service abstraction
//!
//! Two providers:
//! - Gemini (Google Generative Language REST API, with cached contents)
//! - Mock (scriptable, for tests and offline runs)
//!
//! Every call is a single attempt bounded by the client timeout. Callers own
//! the fallback for a failed call.

use crate::config::GenerationConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Acknowledgement turn stored after the document in a content cache
const CACHE_ACK: &str = "Document loaded. Ready to provide context for chunks.";

/// Handle to a server-side content cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHandle(pub String);

impl CacheHandle {
    pub fn name(&self) -> &str {
        &self.0
    }
}

/// Trait for text generation
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate a completion for a prompt
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Upload `content` as cached context living for `ttl`
    async fn create_cache(&self, content: &str, ttl: Duration) -> Result<CacheHandle>;

    /// Generate a completion against previously cached context
    async fn generate_with_cache(&self, cache: &CacheHandle, prompt: &str) -> Result<String>;

    /// Release cached context
    async fn delete_cache(&self, cache: &CacheHandle) -> Result<()>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Google Gemini client
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    cache_model: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct CacheResponse {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

impl GeminiClient {
    /// Create a new Gemini client. Fails without an API key.
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = config.resolved_api_key().ok_or_else(|| AppError::Configuration {
            message: "GOOGLE_API_KEY environment variable is not set".to_string(),
        })?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            cache_model: config.cache_model.clone(),
            timeout: config.timeout(),
        })
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<String> {
        let url = format!("{}/v1beta/{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|envelope| envelope.error.message)
                .unwrap_or_else(|_| format!("HTTP {}", status));
            return Err(AppError::GenerationError {
                message: format!("Google Gemini API error: {}", message),
            });
        }

        Ok(text)
    }

    async fn generate_content(&self, model: &str, body: serde_json::Value) -> Result<String> {
        let start = Instant::now();
        let result = self
            .post(&format!("models/{}:generateContent", model), body)
            .await
            .and_then(|text| parse_generate_response(&text));

        metrics::record_generation(start.elapsed().as_secs_f64(), model, result.is_ok());
        result
    }

    fn transport_error(&self, err: reqwest::Error) -> AppError {
        if err.is_timeout() {
            AppError::GenerationTimeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else if err.is_connect() {
            AppError::GenerationError {
                message: "Cannot connect to Google Gemini API".to_string(),
            }
        } else {
            AppError::HttpClient(err)
        }
    }
}

fn parse_generate_response(body: &str) -> Result<String> {
    let parsed: GenerateResponse =
        serde_json::from_str(body).map_err(|e| AppError::GenerationError {
            message: format!("Invalid JSON response from Google Gemini: {}", e),
        })?;

    if let Some(error) = parsed.error {
        return Err(AppError::GenerationError {
            message: format!("Google Gemini API error: {}", error.message),
        });
    }

    let candidate = parsed
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| AppError::GenerationError {
            message: "No candidates returned by Google Gemini API".to_string(),
        })?;

    candidate
        .content
        .and_then(|content| content.parts.into_iter().next())
        .and_then(|part| part.text)
        .ok_or_else(|| AppError::GenerationError {
            message: "Unexpected response format from Google Gemini".to_string(),
        })
}

#[async_trait]
impl Generator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });
        self.generate_content(&self.model, body).await
    }

    async fn create_cache(&self, content: &str, ttl: Duration) -> Result<CacheHandle> {
        let body = json!({
            "model": format!("models/{}", self.cache_model),
            "contents": [
                { "role": "user", "parts": [{ "text": content }] },
                { "role": "model", "parts": [{ "text": CACHE_ACK }] }
            ],
            "ttl": format!("{}s", ttl.as_secs()),
        });

        let text = self.post("cachedContents", body).await?;
        let parsed: CacheResponse = serde_json::from_str(&text)?;

        parsed
            .name
            .map(CacheHandle)
            .ok_or_else(|| AppError::GenerationError {
                message: "Failed to create cached content".to_string(),
            })
    }

    async fn generate_with_cache(&self, cache: &CacheHandle, prompt: &str) -> Result<String> {
        let body = json!({
            "cachedContent": cache.name(),
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }]
        });
        self.generate_content(&self.cache_model, body).await
    }

    async fn delete_cache(&self, cache: &CacheHandle) -> Result<()> {
        let url = format!("{}/v1beta/{}", self.base_url, cache.name());

        let response = self
            .client
            .delete(&url)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            return Err(AppError::GenerationError {
                message: format!("Failed to delete cached content: HTTP {}", response.status()),
            });
        }
        Ok(())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

type Responder = dyn Fn(&str) -> Result<String> + Send + Sync;

/// Mock generator for testing
///
/// Answers every prompt through a responder closure and records what it saw.
pub struct MockGenerator {
    responder: Box<Responder>,
    cache_enabled: bool,
    prompts: Mutex<Vec<String>>,
    caches_created: AtomicUsize,
    caches_deleted: AtomicUsize,
}

impl MockGenerator {
    /// A generator that answers every prompt with a fixed placeholder
    pub fn new() -> Self {
        Self::with_response("Mock answer")
    }

    /// A generator that answers every prompt with `response`
    pub fn with_response(response: impl Into<String>) -> Self {
        let response = response.into();
        Self::from_fn(move |_| Ok(response.clone()))
    }

    /// A generator driven by a closure over the prompt
    pub fn from_fn<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            cache_enabled: true,
            prompts: Mutex::new(Vec::new()),
            caches_created: AtomicUsize::new(0),
            caches_deleted: AtomicUsize::new(0),
        }
    }

    /// A generator whose every call fails, as if the service were down
    pub fn unavailable() -> Self {
        Self::from_fn(|_| {
            Err(AppError::GenerationError {
                message: "Cannot connect to Google Gemini API".to_string(),
            })
        })
        .without_cache()
    }

    /// Make cache creation fail, as for content too small to cache
    pub fn without_cache(mut self) -> Self {
        self.cache_enabled = false;
        self
    }

    /// Prompts received so far, in call order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn caches_created(&self) -> usize {
        self.caches_created.load(Ordering::SeqCst)
    }

    pub fn caches_deleted(&self) -> usize {
        self.caches_deleted.load(Ordering::SeqCst)
    }

    fn respond(&self, prompt: &str) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        (self.responder)(prompt)
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.respond(prompt)
    }

    async fn create_cache(&self, _content: &str, _ttl: Duration) -> Result<CacheHandle> {
        if !self.cache_enabled {
            return Err(AppError::GenerationError {
                message: "Cached content is too small".to_string(),
            });
        }
        let n = self.caches_created.fetch_add(1, Ordering::SeqCst);
        Ok(CacheHandle(format!("cachedContents/mock-{}", n)))
    }

    async fn generate_with_cache(&self, _cache: &CacheHandle, prompt: &str) -> Result<String> {
        self.respond(prompt)
    }

    async fn delete_cache(&self, _cache: &CacheHandle) -> Result<()> {
        self.caches_deleted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn model_name(&self) -> &str {
        "mock-generation"
    }
}

/// Create a generator based on configuration
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiClient::new(config)?)),
        "mock" => Ok(Arc::new(MockGenerator::new())),
        other => Err(AppError::Configuration {
            message: format!("Unknown generation provider '{}'", other),
        }),
    }
}
