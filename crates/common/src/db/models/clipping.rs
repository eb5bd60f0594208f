//! Clipping entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "clippings")]
pub struct Model {
    /// Issued by the `clip` sequence, never by the database
    #[sea_orm(primary_key, auto_increment = false)]
    pub clip_id: i64,

    pub owner_tenant_id: Option<Uuid>,

    pub paper_id: Uuid,

    pub page_number: i32,

    pub region_x: f64,
    pub region_y: f64,
    pub region_width: f64,
    pub region_height: f64,

    #[sea_orm(column_type = "Text")]
    pub image_ref: String,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
