//! Audit entry entity - one row per audited event.
//!
//! `user_id = NULL` means the action was taken by the system itself.
//! `target_kind`/`target_id` are written from [`crate::audit::AuditTarget`];
//! rows are append-only and never updated or deleted.

use sea_orm::entity::prelude::*;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "audit_entries")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: Option<i32>,
    pub at: i64,
    pub action: String,
    pub description: String,
    pub target_kind: Option<String>,
    pub target_id: Option<i32>,
    pub ip: Option<String>,
    pub user_agent: String,
    /// Free-form JSON bag (request metadata, deep links, timings).
    pub extra: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
    #[sea_orm(has_many = "super::change_detail::Entity")]
    Details,
}

impl Related<super::change_detail::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Details.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
