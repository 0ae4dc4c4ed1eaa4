//! Generated report entity.
//!
//! `status` holds values from [`crate::domain::ReportStatus`]. `file_path` points
//! at the rendered artifact under the configured reports directory once the
//! generation completes.

use sea_orm::entity::prelude::*;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "reports")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub type_id: i32,
    pub title: String,
    pub description: String,
    pub params: Option<String>,
    pub requested_at: i64,
    pub generated_at: Option<i64>,
    pub status: String,
    pub error_message: String,
    pub file_path: Option<String>,
    pub is_active: bool,
    pub requested_by: Option<i32>,
    pub is_public: bool,
    pub download_count: i32,
    /// Optional organization scope for the aggregation.
    pub organization_id: Option<i32>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::report_type::Entity",
        from = "Column::TypeId",
        to = "super::report_type::Column::Id"
    )]
    Type,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::RequestedBy",
        to = "super::user::Column::Id"
    )]
    RequestedBy,
}

impl Related<super::report_type::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Type.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
