//! Conversation turn entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One (query, response) pair; rows are append-only and ordered by `id`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "chat_history")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub user_id: i64,

    #[sea_orm(column_type = "Text")]
    pub query: String,

    #[sea_orm(column_type = "Text")]
    pub response: String,

    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

pub use Model as ConversationTurn;
