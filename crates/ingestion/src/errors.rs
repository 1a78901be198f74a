//! Ingestion service error types

use ragforge_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Document {id} rejected: {message}")]
    Rejected { id: String, message: String },

    #[error(transparent)]
    App(#[from] AppError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

