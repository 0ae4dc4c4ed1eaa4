//! Measure entity ("medida") - a compliance obligation tracked by the plan.
//!
//! `status` and `priority` hold values from [`crate::domain::MeasureStatus`] and
//! [`crate::domain::Priority`]. `progress_percent` is a percentage in [0, 100],
//! kept in sync with the latest progress record by the write path (last writer
//! wins, no locking).

use sea_orm::entity::prelude::*;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "measures")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub code: String,
    pub name: String,
    pub description: String,
    pub component_id: i32,
    pub start_date: Date,
    pub end_date: Date,
    pub status: String,
    pub priority: String,
    pub progress_percent: f64,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::component::Entity",
        from = "Column::ComponentId",
        to = "super::component::Column::Id"
    )]
    Component,
    #[sea_orm(has_many = "super::assignment::Entity")]
    Assignments,
    #[sea_orm(has_many = "super::progress_record::Entity")]
    ProgressRecords,
}

impl Related<super::component::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Component.def()
    }
}

impl Related<super::assignment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Assignments.def()
    }
}

impl Related<super::progress_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProgressRecords.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
