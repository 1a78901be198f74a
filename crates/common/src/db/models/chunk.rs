//! Chunk entity
//!
//! Content is not stored; it is the document slice `[start_char, end_char)`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "chunks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub document_id: Uuid,

    /// Byte offset of the first character
    pub start_char: i32,

    /// Byte offset one past the last character
    pub end_char: i32,

    /// Generated situating context
    #[sea_orm(column_type = "Text", nullable)]
    pub context: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub embedding: Option<String>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::document::Entity",
        from = "Column::DocumentId",
        to = "super::document::Column::Id",
        on_delete = "Cascade"
    )]
    Document,

    #[sea_orm(has_many = "super::sentence::Entity")]
    Sentences,
}

impl Related<super::document::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Document.def()
    }
}

impl Related<super::sentence::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sentences.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
