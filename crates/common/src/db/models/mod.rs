//! SeaORM entity models
//!
//! Vectors are stored as `"[f1,f2,...]"` text columns.

mod chunk;
mod document;
mod sentence;

pub use document::{
    ActiveModel as DocumentActiveModel,
    Column as DocumentColumn,
    Entity as DocumentEntity,
    Model as Document,
};

pub use chunk::{
    ActiveModel as ChunkActiveModel,
    Column as ChunkColumn,
    Entity as ChunkEntity,
    Model as Chunk,
};

pub use sentence::{
    ActiveModel as SentenceActiveModel,
    Column as SentenceColumn,
    Entity as SentenceEntity,
    Model as Sentence,
};
