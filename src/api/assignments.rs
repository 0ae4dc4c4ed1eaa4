//! Measure assignments: which organization is responsible for which measure.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde::Deserialize;

use super::context;
use super::AppState;
use crate::audit::{self, AuditTarget};
use crate::db::entities::{assignment, measure, organization};
use crate::db::now_ts;
use crate::error::{Result, ServerError};
use crate::notify;

#[derive(Deserialize, Default)]
pub struct AssignmentPayload {
    #[serde(rename = "medida")]
    pub measure_id: Option<i32>,
    #[serde(rename = "organismo")]
    pub organization_id: Option<i32>,
    #[serde(rename = "es_coordinador", default)]
    pub is_coordinator: bool,
    #[serde(rename = "responsabilidad")]
    pub responsibility: Option<String>,
}

/// POST /api/assignments (admin)
pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<AssignmentPayload>,
) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;
    ctx.require_admin()?;

    let measure_id = body
        .measure_id
        .ok_or_else(|| ServerError::field("medida", "Este campo es obligatorio."))?;
    let organization_id = body
        .organization_id
        .ok_or_else(|| ServerError::field("organismo", "Este campo es obligatorio."))?;

    let m = measure::Entity::find_by_id(measure_id)
        .filter(measure::Column::IsActive.eq(true))
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Medida".to_string()))?;
    let org = organization::Entity::find_by_id(organization_id)
        .filter(organization::Column::IsActive.eq(true))
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Organismo".to_string()))?;

    let duplicate = assignment::Entity::find()
        .filter(assignment::Column::MeasureId.eq(measure_id))
        .filter(assignment::Column::OrganizationId.eq(organization_id))
        .one(&state.db)
        .await?;
    if duplicate.is_some() {
        return Err(ServerError::Conflict(
            "La medida ya está asignada a este organismo".to_string(),
        ));
    }

    let now = now_ts();
    let created = assignment::ActiveModel {
        measure_id: Set(measure_id),
        organization_id: Set(organization_id),
        is_coordinator: Set(body.is_coordinator),
        responsibility: Set(body.responsibility.unwrap_or_default()),
        assigned_on: Set(Utc::now().date_naive()),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    audit::record_created(
        &state.db,
        &ctx.meta,
        AuditTarget::Assignment(created.id),
        &format!("{} → {}", m.code, org.name),
    )
    .await;
    notify::notify_new_assignment(&state.db, &state.mailer, &m, &org).await;

    Ok((StatusCode::CREATED, Json(created)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fixtures;
    use crate::db::entities::notification;
    use crate::domain::Role;

    #[tokio::test]
    async fn test_duplicate_assignment_conflicts() {
        let state = fixtures::state().await;
        let comp = fixtures::component(&state.db, "AIRE", "Calidad del Aire").await;
        let m = fixtures::measure(&state.db, "MED-001", comp.id).await;
        let org = fixtures::organization(&state.db, "Depto Aire").await;
        let headers = fixtures::login(&state, "admin", Role::SmaAdmin, None).await;

        let payload = AssignmentPayload {
            measure_id: Some(m.id),
            organization_id: Some(org.id),
            ..Default::default()
        };
        let first = create(
            State(state.clone()),
            headers.clone(),
            Json(AssignmentPayload {
                measure_id: Some(m.id),
                organization_id: Some(org.id),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);

        let err = create(State(state.clone()), headers, Json(payload)).await.unwrap_err();
        assert!(matches!(err, ServerError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_assignment_notifies_organization_users() {
        let state = fixtures::state().await;
        let comp = fixtures::component(&state.db, "AIRE", "Calidad del Aire").await;
        let m = fixtures::measure(&state.db, "MED-001", comp.id).await;
        let org = fixtures::organization(&state.db, "Depto Aire").await;
        let member = fixtures::user(&state.db, "func", Role::Organism, Some(org.id)).await;
        let headers = fixtures::login(&state, "admin", Role::SmaAdmin, None).await;

        create(
            State(state.clone()),
            headers,
            Json(AssignmentPayload {
                measure_id: Some(m.id),
                organization_id: Some(org.id),
                ..Default::default()
            }),
        )
        .await
        .unwrap();

        let rows = notification::Entity::find().all(&state.db).await.unwrap();
        assert!(rows.iter().any(|n| n.user_id == member.id && n.title.contains("MED-001")));
    }
}
