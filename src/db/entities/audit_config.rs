//! Per-target-kind audit configuration.
//!
//! `audited_fields` is a JSON array of field names; empty or NULL audits all
//! fields. Unique per target kind.

use sea_orm::entity::prelude::*;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "audit_configs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub target_kind: String,
    pub log_create: bool,
    pub log_update: bool,
    pub log_delete: bool,
    pub audited_fields: Option<String>,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
