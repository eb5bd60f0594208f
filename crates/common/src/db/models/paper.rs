//! Paper entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "papers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub epaper_id: Uuid,

    pub tenant_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    /// Calendar date only; unique per epaper when present
    pub schedule_date: Option<Date>,

    #[sea_orm(column_type = "Text", nullable)]
    pub schedule_time: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub source_document_ref: Option<String>,

    pub source_document_size: Option<i64>,

    pub page_count: i32,

    /// Ordered `[{pageNumber, imageRef}]` as JSONB
    #[sea_orm(column_type = "JsonBinary")]
    pub pages: serde_json::Value,

    #[sea_orm(column_type = "Text")]
    pub render_status: String,

    pub is_published: bool,

    pub views: i64,

    pub downloads: i64,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::epaper::Entity",
        from = "Column::EpaperId",
        to = "super::epaper::Column::Id",
        on_delete = "Cascade"
    )]
    Epaper,
}

impl Related<super::epaper::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Epaper.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
