//! The caller's notification feed and the deadline sweep trigger.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, IntoActiveModel, QueryFilter, QueryOrder, Set,
};
use serde::Serialize;
use serde_json::json;

use super::context;
use super::AppState;
use crate::db::entities::{notification, notification_type};
use crate::db::now_ts;
use crate::error::{Result, ServerError};
use crate::notify;

#[derive(Serialize)]
pub struct NotificationRow {
    pub id: i32,
    #[serde(rename = "tipo")]
    pub type_code: String,
    #[serde(rename = "titulo")]
    pub title: String,
    #[serde(rename = "mensaje")]
    pub message: String,
    pub link: String,
    #[serde(rename = "medida")]
    pub measure_id: Option<i32>,
    #[serde(rename = "leida")]
    pub is_read: bool,
    #[serde(rename = "fecha_envio")]
    pub sent_at: i64,
}

/// GET /api/notifications
pub async fn list(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;
    let (actor, _) = ctx.actor()?;

    let rows = notification::Entity::find()
        .filter(notification::Column::UserId.eq(actor.id))
        .order_by_desc(notification::Column::SentAt)
        .order_by_desc(notification::Column::Id)
        .all(&state.db)
        .await?;

    let type_codes: HashMap<i32, String> = notification_type::Entity::find()
        .all(&state.db)
        .await?
        .into_iter()
        .map(|t| (t.id, t.code))
        .collect();

    let rows: Vec<NotificationRow> = rows
        .into_iter()
        .map(|n| NotificationRow {
            id: n.id,
            type_code: type_codes.get(&n.type_id).cloned().unwrap_or_default(),
            title: n.title,
            message: n.message,
            link: n.link,
            measure_id: n.measure_id,
            is_read: n.is_read,
            sent_at: n.sent_at,
        })
        .collect();

    Ok(Json(rows).into_response())
}

/// POST /api/notifications/:id/read
pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    headers: HeaderMap,
) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;
    let (actor, _) = ctx.actor()?;

    let row = notification::Entity::find_by_id(id)
        .filter(notification::Column::UserId.eq(actor.id))
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Notificación".to_string()))?;

    if !row.is_read {
        let mut active = row.into_active_model();
        active.is_read = Set(true);
        active.read_at = Set(Some(now_ts()));
        active.update(&state.db).await?;
    }

    Ok(StatusCode::NO_CONTENT.into_response())
}

/// POST /api/notifications/sweep-deadlines (admin)
///
/// Runs the deadline-approaching sweep on demand. Meant to be called by an
/// external scheduler once a day.
pub async fn sweep(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;
    ctx.require_admin()?;

    let created =
        notify::sweep_deadlines(&state.db, &state.mailer, Utc::now().date_naive()).await?;
    Ok(Json(json!({ "creadas": created })).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fixtures;
    use crate::domain::Role;
    use chrono::Duration;
    use sea_orm::PaginatorTrait;

    #[tokio::test]
    async fn test_mark_read_is_scoped_to_owner() {
        let state = fixtures::state().await;
        let comp = fixtures::component(&state.db, "AIRE", "Calidad del Aire").await;
        let m = fixtures::measure(&state.db, "MED-001", comp.id).await;
        let org = fixtures::organization(&state.db, "Depto Aire").await;
        fixtures::assignment(&state.db, m.id, org.id).await;
        let member = fixtures::user(&state.db, "func", Role::Organism, Some(org.id)).await;
        crate::notify::notify_new_assignment(&state.db, &state.mailer, &m, &org).await;

        let row = notification::Entity::find().one(&state.db).await.unwrap().unwrap();
        assert_eq!(row.user_id, member.id);

        // Another user cannot mark it.
        let other_headers = fixtures::login(&state, "otro", Role::SmaAdmin, None).await;
        let err = mark_read(State(state.clone()), Path(row.id), other_headers).await.unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));

        // The owner can.
        let headers = fixtures::login_existing(&state, "func").await;
        mark_read(State(state.clone()), Path(row.id), headers).await.unwrap();
        let stored = notification::Entity::find_by_id(row.id)
            .one(&state.db)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.is_read);
        assert!(stored.read_at.is_some());
    }

    #[tokio::test]
    async fn test_sweep_twice_creates_no_duplicates() {
        let state = fixtures::state().await;
        let comp = fixtures::component(&state.db, "AIRE", "Calidad del Aire").await;
        let m = fixtures::measure(&state.db, "MED-001", comp.id).await;
        let org = fixtures::organization(&state.db, "Depto Aire").await;
        fixtures::assignment(&state.db, m.id, org.id).await;
        fixtures::user(&state.db, "func", Role::Organism, Some(org.id)).await;

        // Due in ten days.
        let mut active = m.into_active_model();
        active.end_date = Set(Utc::now().date_naive() + Duration::days(10));
        active.update(&state.db).await.unwrap();

        let today = Utc::now().date_naive();
        let first = crate::notify::sweep_deadlines(&state.db, &state.mailer, today).await.unwrap();
        assert_eq!(first, 1);

        let second = crate::notify::sweep_deadlines(&state.db, &state.mailer, today).await.unwrap();
        assert_eq!(second, 0);
        assert_eq!(notification::Entity::find().count(&state.db).await.unwrap(), 1);
    }
}
