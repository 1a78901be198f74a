//! PostgreSQL corpus store
//!
//! Reads go to the replica when one is configured; writes always go to the
//! primary.

use crate::db::models::*;
use crate::db::{format_embedding, parse_embedding, DbPool};
use crate::errors::{AppError, Result};
use crate::store::{
    check_range, slice, ChunkRecord, CorpusStore, DocumentRecord, IndexStatus, NewChunk, NewSentence,
    SentenceRecord,
};
use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    async fn document_contents(&self, ids: Vec<Uuid>) -> Result<HashMap<Uuid, String>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let documents = DocumentEntity::find()
            .filter(DocumentColumn::Id.is_in(ids))
            .all(self.read_conn())
            .await?;
        Ok(documents.into_iter().map(|d| (d.id, d.content)).collect())
    }

    async fn require_document(&self, id: Uuid) -> Result<Document> {
        DocumentEntity::find_by_id(id)
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::DocumentNotFound { id: id.to_string() })
    }
}

fn to_document_record(model: Document) -> Option<DocumentRecord> {
    let status = match model.index_status.parse::<IndexStatus>() {
        Ok(status) => status,
        Err(_) => {
            warn!(document_id = %model.id, status = %model.index_status, "Skipping document with unknown status");
            return None;
        }
    };

    Some(DocumentRecord {
        id: model.id,
        embedding: model.embedding.as_deref().and_then(parse_embedding),
        content: model.content,
        status,
        created_at: model.created_at.into(),
    })
}

fn to_chunk_record(model: Chunk, document: &str) -> Option<ChunkRecord> {
    let start = usize::try_from(model.start_char).ok()?;
    let end = usize::try_from(model.end_char).ok()?;
    let Some(content) = slice(document, start, end) else {
        warn!(chunk_id = %model.id, start, end, "Skipping chunk with invalid range");
        return None;
    };

    Some(ChunkRecord {
        id: model.id,
        document_id: model.document_id,
        start_char: start,
        end_char: end,
        content: content.to_string(),
        context: model.context,
        embedding: model.embedding.as_deref().and_then(parse_embedding),
    })
}

fn offset(value: usize) -> Result<i32> {
    i32::try_from(value).map_err(|_| AppError::Validation {
        message: format!("offset {} out of range", value),
        field: Some("start_char".to_string()),
    })
}

#[async_trait]
impl CorpusStore for Repository {
    async fn create_document(&self, content: &str, status: IndexStatus) -> Result<DocumentRecord> {
        if content.trim().is_empty() {
            return Err(AppError::Validation {
                message: "content can't be blank".to_string(),
                field: Some("content".to_string()),
            });
        }

        let now = chrono::Utc::now();
        let document = DocumentActiveModel {
            id: Set(Uuid::new_v4()),
            content: Set(content.to_string()),
            index_status: Set(status.as_str().to_string()),
            embedding: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        let model = document.insert(self.write_conn()).await?;
        to_document_record(model).ok_or_else(|| AppError::Internal {
            message: "inserted document could not be read back".to_string(),
        })
    }

    async fn find_document(&self, id: Uuid) -> Result<Option<DocumentRecord>> {
        let model = DocumentEntity::find_by_id(id).one(self.read_conn()).await?;
        Ok(model.and_then(to_document_record))
    }

    async fn documents_with_status(&self, status: IndexStatus) -> Result<Vec<DocumentRecord>> {
        let models = DocumentEntity::find()
            .filter(DocumentColumn::IndexStatus.eq(status.as_str()))
            .order_by_asc(DocumentColumn::CreatedAt)
            .all(self.read_conn())
            .await?;
        Ok(models.into_iter().filter_map(to_document_record).collect())
    }

    async fn documents_with_vectors(&self) -> Result<Vec<DocumentRecord>> {
        let models = DocumentEntity::find()
            .filter(DocumentColumn::Embedding.is_not_null())
            .all(self.read_conn())
            .await?;
        Ok(models
            .into_iter()
            .filter_map(to_document_record)
            .filter(|d| d.embedding.is_some())
            .collect())
    }

    async fn update_document_status(&self, id: Uuid, status: IndexStatus) -> Result<()> {
        let result = DocumentEntity::update_many()
            .col_expr(DocumentColumn::IndexStatus, Expr::value(status.as_str()))
            .col_expr(DocumentColumn::UpdatedAt, Expr::value(chrono::Utc::now()))
            .filter(DocumentColumn::Id.eq(id))
            .exec(self.write_conn())
            .await?;

        if result.rows_affected == 0 {
            return Err(AppError::DocumentNotFound { id: id.to_string() });
        }
        Ok(())
    }

    async fn update_document_embedding(&self, id: Uuid, embedding: Vec<f32>) -> Result<()> {
        let result = DocumentEntity::update_many()
            .col_expr(DocumentColumn::Embedding, Expr::value(format_embedding(&embedding)))
            .col_expr(DocumentColumn::UpdatedAt, Expr::value(chrono::Utc::now()))
            .filter(DocumentColumn::Id.eq(id))
            .exec(self.write_conn())
            .await?;

        if result.rows_affected == 0 {
            return Err(AppError::DocumentNotFound { id: id.to_string() });
        }
        Ok(())
    }

    async fn create_chunks(
        &self,
        document_id: Uuid,
        chunks: Vec<NewChunk>,
    ) -> Result<Vec<ChunkRecord>> {
        let document = self.require_document(document_id).await?;
        for chunk in &chunks {
            check_range(&document.content, chunk.start_char, chunk.end_char)?;
        }

        let txn = self.write_conn().begin().await?;
        let mut created = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let model = ChunkActiveModel {
                id: Set(Uuid::new_v4()),
                document_id: Set(document_id),
                start_char: Set(offset(chunk.start_char)?),
                end_char: Set(offset(chunk.end_char)?),
                context: Set(chunk.context),
                embedding: Set(chunk.embedding.as_deref().map(format_embedding)),
                created_at: Set(chrono::Utc::now().into()),
            }
            .insert(&txn)
            .await?;

            if let Some(record) = to_chunk_record(model, &document.content) {
                created.push(record);
            }
        }

        txn.commit().await?;
        Ok(created)
    }

    async fn chunks_with_vectors(&self, document_id: Option<Uuid>) -> Result<Vec<ChunkRecord>> {
        let mut query = ChunkEntity::find().filter(ChunkColumn::Embedding.is_not_null());
        if let Some(id) = document_id {
            query = query.filter(ChunkColumn::DocumentId.eq(id));
        }

        let chunks = query
            .order_by_asc(ChunkColumn::DocumentId)
            .order_by_asc(ChunkColumn::StartChar)
            .all(self.read_conn())
            .await?;

        let mut document_ids: Vec<Uuid> = chunks.iter().map(|c| c.document_id).collect();
        document_ids.sort();
        document_ids.dedup();
        let contents = self.document_contents(document_ids).await?;

        Ok(chunks
            .into_iter()
            .filter_map(|chunk| {
                let content = contents.get(&chunk.document_id)?;
                to_chunk_record(chunk, content)
            })
            .collect())
    }

    async fn update_chunk_context(&self, chunk_id: Uuid, context: &str) -> Result<()> {
        let result = ChunkEntity::update_many()
            .col_expr(ChunkColumn::Context, Expr::value(context.to_string()))
            .filter(ChunkColumn::Id.eq(chunk_id))
            .exec(self.write_conn())
            .await?;

        if result.rows_affected == 0 {
            return Err(AppError::NotFound {
                resource_type: "chunk".to_string(),
                id: chunk_id.to_string(),
            });
        }
        Ok(())
    }

    async fn create_sentences(
        &self,
        document_id: Uuid,
        sentences: Vec<NewSentence>,
    ) -> Result<usize> {
        if sentences.is_empty() {
            return Ok(0);
        }

        let document = self.require_document(document_id).await?;
        let now = chrono::Utc::now();
        let mut models = Vec::with_capacity(sentences.len());

        for sentence in &sentences {
            check_range(&document.content, sentence.start_char, sentence.end_char)?;
            models.push(SentenceActiveModel {
                id: Set(Uuid::new_v4()),
                document_id: Set(document_id),
                chunk_id: Set(sentence.chunk_id),
                start_char: Set(offset(sentence.start_char)?),
                end_char: Set(offset(sentence.end_char)?),
                created_at: Set(now.into()),
            });
        }

        let count = models.len();
        SentenceEntity::insert_many(models)
            .exec(self.write_conn())
            .await?;
        Ok(count)
    }

    async fn sentences_for_chunk(&self, chunk_id: Uuid) -> Result<Vec<SentenceRecord>> {
        let sentences = SentenceEntity::find()
            .filter(SentenceColumn::ChunkId.eq(chunk_id))
            .order_by_asc(SentenceColumn::StartChar)
            .all(self.read_conn())
            .await?;

        let Some(document_id) = sentences.first().map(|s| s.document_id) else {
            return Ok(Vec::new());
        };
        let contents = self.document_contents(vec![document_id]).await?;
        let Some(content) = contents.get(&document_id) else {
            return Ok(Vec::new());
        };

        Ok(sentences
            .into_iter()
            .filter_map(|s| {
                let start = usize::try_from(s.start_char).ok()?;
                let end = usize::try_from(s.end_char).ok()?;
                Some(SentenceRecord {
                    id: s.id,
                    document_id: s.document_id,
                    chunk_id: s.chunk_id,
                    start_char: start,
                    end_char: end,
                    content: slice(content, start, end)?.to_string(),
                })
            })
            .collect())
    }
}
