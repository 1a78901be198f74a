//! Corpus persistence interface
//!
//! Documents own their text. Chunks and sentences are half-open byte ranges
//! into it, and their content is always read back as the document slice.

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Document indexing lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl IndexStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexStatus::Pending => "pending",
            IndexStatus::Processing => "processing",
            IndexStatus::Completed => "completed",
            IndexStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(IndexStatus::Pending),
            "processing" => Ok(IndexStatus::Processing),
            "completed" => Ok(IndexStatus::Completed),
            "failed" => Ok(IndexStatus::Failed),
            other => Err(AppError::Validation {
                message: format!("unknown index status '{}'", other),
                field: Some("index_status".to_string()),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: Uuid,
    pub content: String,
    pub status: IndexStatus,
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: Uuid,
    pub document_id: Uuid,
    pub start_char: usize,
    pub end_char: usize,
    /// Document slice `[start_char, end_char)`
    pub content: String,
    pub context: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

impl ChunkRecord {
    /// Content with its generated context prepended, when there is one
    pub fn contextualized_content(&self) -> String {
        contextualize(self.context.as_deref(), &self.content)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentenceRecord {
    pub id: Uuid,
    pub document_id: Uuid,
    pub chunk_id: Option<Uuid>,
    pub start_char: usize,
    pub end_char: usize,
    pub content: String,
}

/// Chunk to be persisted
#[derive(Debug, Clone, Default)]
pub struct NewChunk {
    pub start_char: usize,
    pub end_char: usize,
    pub context: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

/// Sentence to be persisted
#[derive(Debug, Clone, Default)]
pub struct NewSentence {
    pub chunk_id: Option<Uuid>,
    pub start_char: usize,
    pub end_char: usize,
}

/// `context + " " + content`, or just `content` when context is blank
pub fn contextualize(context: Option<&str>, content: &str) -> String {
    match context.map(str::trim) {
        Some(ctx) if !ctx.is_empty() => format!("{} {}", ctx, content),
        _ => content.to_string(),
    }
}

/// Slice `[start, end)` of `content`, or `None` when the range is empty, out
/// of bounds, or not on char boundaries.
pub fn slice(content: &str, start: usize, end: usize) -> Option<&str> {
    if start >= end {
        return None;
    }
    content.get(start..end)
}

pub(crate) fn check_range(content: &str, start: usize, end: usize) -> Result<()> {
    if slice(content, start, end).is_none() {
        return Err(AppError::Validation {
            message: format!(
                "invalid range [{}, {}) for document of {} bytes",
                start,
                end,
                content.len()
            ),
            field: Some("start_char".to_string()),
        });
    }
    Ok(())
}

/// Persistence operations the engine needs
#[async_trait]
pub trait CorpusStore: Send + Sync {
    async fn create_document(&self, content: &str, status: IndexStatus) -> Result<DocumentRecord>;

    async fn find_document(&self, id: Uuid) -> Result<Option<DocumentRecord>>;

    async fn documents_with_status(&self, status: IndexStatus) -> Result<Vec<DocumentRecord>>;

    /// Documents holding a vector
    async fn documents_with_vectors(&self) -> Result<Vec<DocumentRecord>>;

    async fn update_document_status(&self, id: Uuid, status: IndexStatus) -> Result<()>;

    async fn update_document_embedding(&self, id: Uuid, embedding: Vec<f32>) -> Result<()>;

    /// Persist chunks of a document, in order
    async fn create_chunks(&self, document_id: Uuid, chunks: Vec<NewChunk>)
        -> Result<Vec<ChunkRecord>>;

    /// Chunks holding a vector, across the corpus or within one document
    async fn chunks_with_vectors(&self, document_id: Option<Uuid>) -> Result<Vec<ChunkRecord>>;

    async fn update_chunk_context(&self, chunk_id: Uuid, context: &str) -> Result<()>;

    /// Persist sentences of a document; returns how many were stored
    async fn create_sentences(&self, document_id: Uuid, sentences: Vec<NewSentence>)
        -> Result<usize>;

    async fn sentences_for_chunk(&self, chunk_id: Uuid) -> Result<Vec<SentenceRecord>>;
}

#[derive(Debug, Clone)]
struct StoredChunk {
    id: Uuid,
    document_id: Uuid,
    start_char: usize,
    end_char: usize,
    context: Option<String>,
    embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone)]
struct StoredSentence {
    id: Uuid,
    document_id: Uuid,
    chunk_id: Option<Uuid>,
    start_char: usize,
    end_char: usize,
}

#[derive(Default)]
struct Tables {
    documents: Vec<DocumentRecord>,
    chunks: Vec<StoredChunk>,
    sentences: Vec<StoredSentence>,
}

impl Tables {
    fn document(&self, id: Uuid) -> Option<&DocumentRecord> {
        self.documents.iter().find(|d| d.id == id)
    }

    fn materialize_chunk(&self, chunk: &StoredChunk, docs: &HashMap<Uuid, &str>) -> Option<ChunkRecord> {
        let text = docs.get(&chunk.document_id)?;
        Some(ChunkRecord {
            id: chunk.id,
            document_id: chunk.document_id,
            start_char: chunk.start_char,
            end_char: chunk.end_char,
            content: slice(text, chunk.start_char, chunk.end_char)?.to_string(),
            context: chunk.context.clone(),
            embedding: chunk.embedding.clone(),
        })
    }

    fn content_index(&self) -> HashMap<Uuid, &str> {
        self.documents
            .iter()
            .map(|d| (d.id, d.content.as_str()))
            .collect()
    }
}

/// Process-local corpus store
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CorpusStore for InMemoryStore {
    async fn create_document(&self, content: &str, status: IndexStatus) -> Result<DocumentRecord> {
        if content.trim().is_empty() {
            return Err(AppError::Validation {
                message: "content can't be blank".to_string(),
                field: Some("content".to_string()),
            });
        }

        let record = DocumentRecord {
            id: Uuid::new_v4(),
            content: content.to_string(),
            status,
            embedding: None,
            created_at: Utc::now(),
        };
        self.tables.write().await.documents.push(record.clone());
        Ok(record)
    }

    async fn find_document(&self, id: Uuid) -> Result<Option<DocumentRecord>> {
        Ok(self.tables.read().await.document(id).cloned())
    }

    async fn documents_with_status(&self, status: IndexStatus) -> Result<Vec<DocumentRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .documents
            .iter()
            .filter(|d| d.status == status)
            .cloned()
            .collect())
    }

    async fn documents_with_vectors(&self) -> Result<Vec<DocumentRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .documents
            .iter()
            .filter(|d| d.embedding.is_some())
            .cloned()
            .collect())
    }

    async fn update_document_status(&self, id: Uuid, status: IndexStatus) -> Result<()> {
        let mut tables = self.tables.write().await;
        let doc = tables
            .documents
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| AppError::DocumentNotFound { id: id.to_string() })?;
        doc.status = status;
        Ok(())
    }

    async fn update_document_embedding(&self, id: Uuid, embedding: Vec<f32>) -> Result<()> {
        let mut tables = self.tables.write().await;
        let doc = tables
            .documents
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| AppError::DocumentNotFound { id: id.to_string() })?;
        doc.embedding = Some(embedding);
        Ok(())
    }

    async fn create_chunks(
        &self,
        document_id: Uuid,
        chunks: Vec<NewChunk>,
    ) -> Result<Vec<ChunkRecord>> {
        let mut tables = self.tables.write().await;
        let content = tables
            .document(document_id)
            .map(|d| d.content.clone())
            .ok_or_else(|| AppError::DocumentNotFound {
                id: document_id.to_string(),
            })?;

        for chunk in &chunks {
            check_range(&content, chunk.start_char, chunk.end_char)?;
        }

        let mut created = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let stored = StoredChunk {
                id: Uuid::new_v4(),
                document_id,
                start_char: chunk.start_char,
                end_char: chunk.end_char,
                context: chunk.context,
                embedding: chunk.embedding,
            };
            created.push(ChunkRecord {
                id: stored.id,
                document_id,
                start_char: stored.start_char,
                end_char: stored.end_char,
                content: content[stored.start_char..stored.end_char].to_string(),
                context: stored.context.clone(),
                embedding: stored.embedding.clone(),
            });
            tables.chunks.push(stored);
        }
        Ok(created)
    }

    async fn chunks_with_vectors(&self, document_id: Option<Uuid>) -> Result<Vec<ChunkRecord>> {
        let tables = self.tables.read().await;
        let docs = tables.content_index();
        Ok(tables
            .chunks
            .iter()
            .filter(|c| c.embedding.is_some())
            .filter(|c| document_id.map_or(true, |id| c.document_id == id))
            .filter_map(|c| tables.materialize_chunk(c, &docs))
            .collect())
    }

    async fn update_chunk_context(&self, chunk_id: Uuid, context: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        let chunk = tables
            .chunks
            .iter_mut()
            .find(|c| c.id == chunk_id)
            .ok_or_else(|| AppError::NotFound {
                resource_type: "chunk".to_string(),
                id: chunk_id.to_string(),
            })?;
        chunk.context = Some(context.to_string());
        Ok(())
    }

    async fn create_sentences(
        &self,
        document_id: Uuid,
        sentences: Vec<NewSentence>,
    ) -> Result<usize> {
        let mut tables = self.tables.write().await;
        let content = tables
            .document(document_id)
            .map(|d| d.content.clone())
            .ok_or_else(|| AppError::DocumentNotFound {
                id: document_id.to_string(),
            })?;

        for sentence in &sentences {
            check_range(&content, sentence.start_char, sentence.end_char)?;
        }

        let count = sentences.len();
        tables
            .sentences
            .extend(sentences.into_iter().map(|s| StoredSentence {
                id: Uuid::new_v4(),
                document_id,
                chunk_id: s.chunk_id,
                start_char: s.start_char,
                end_char: s.end_char,
            }));
        Ok(count)
    }

    async fn sentences_for_chunk(&self, chunk_id: Uuid) -> Result<Vec<SentenceRecord>> {
        let tables = self.tables.read().await;
        let docs = tables.content_index();
        Ok(tables
            .sentences
            .iter()
            .filter(|s| s.chunk_id == Some(chunk_id))
            .filter_map(|s| {
                let text = docs.get(&s.document_id)?;
                Some(SentenceRecord {
                    id: s.id,
                    document_id: s.document_id,
                    chunk_id: s.chunk_id,
                    start_char: s.start_char,
                    end_char: s.end_char,
                    content: slice(text, s.start_char, s.end_char)?.to_string(),
                })
            })
            .collect())
    }
}
