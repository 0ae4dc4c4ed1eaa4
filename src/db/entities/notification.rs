//! Notification entity - a message delivered to one user, optionally mirrored
//! by email. Created only as a side effect of domain events.

use sea_orm::entity::prelude::*;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "notifications")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub type_id: i32,
    pub user_id: i32,
    pub title: String,
    pub message: String,
    /// Deep link to the relevant detail view, e.g. "/medidas/12/".
    pub link: String,
    pub measure_id: Option<i32>,
    pub organization_id: Option<i32>,
    pub sent_at: i64,
    pub is_read: bool,
    pub read_at: Option<i64>,
    pub email_sent: bool,
    pub email_sent_at: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::notification_type::Entity",
        from = "Column::TypeId",
        to = "super::notification_type::Column::Id"
    )]
    Type,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
}

impl Related<super::notification_type::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Type.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
