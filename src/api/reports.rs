//! Report generation and download.
//!
//! POST runs the aggregation synchronously, walking the row through
//! pendiente → generando → completado (or error) so the status history reads
//! the same whether generation is inline or ever moved to a worker.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::context::{self, RequestContext};
use super::AppState;
use crate::audit::{self, AuditTarget};
use crate::db::entities::{organization, report, report_type};
use crate::db::now_ts;
use crate::domain::{AuditAction, ReportStatus};
use crate::error::{Result, ServerError};
use crate::reports::ProgressSummary;

#[derive(Serialize)]
pub struct ReportTypeRow {
    pub id: i32,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "descripcion")]
    pub description: String,
    pub slug: String,
    #[serde(rename = "es_publico")]
    pub is_public: bool,
}

fn type_row(t: &report_type::Model) -> ReportTypeRow {
    ReportTypeRow {
        id: t.id,
        name: t.name.clone(),
        description: t.description.clone(),
        slug: t.slug.clone(),
        is_public: t.is_public,
    }
}

#[derive(Serialize)]
pub struct ReportRow {
    pub id: i32,
    #[serde(rename = "tipo")]
    pub type_id: i32,
    #[serde(rename = "titulo")]
    pub title: String,
    #[serde(rename = "descripcion")]
    pub description: String,
    #[serde(rename = "fecha_solicitud")]
    pub requested_at: i64,
    #[serde(rename = "fecha_generacion")]
    pub generated_at: Option<i64>,
    #[serde(rename = "estado")]
    pub status: String,
    #[serde(rename = "mensaje_error")]
    pub error_message: String,
    #[serde(rename = "archivo")]
    pub file_path: Option<String>,
    #[serde(rename = "solicitado_por")]
    pub requested_by: Option<i32>,
    #[serde(rename = "es_publico")]
    pub is_public: bool,
    #[serde(rename = "descargas")]
    pub download_count: i32,
    #[serde(rename = "organismo")]
    pub organization_id: Option<i32>,
}

fn row(r: &report::Model) -> ReportRow {
    ReportRow {
        id: r.id,
        type_id: r.type_id,
        title: r.title.clone(),
        description: r.description.clone(),
        requested_at: r.requested_at,
        generated_at: r.generated_at,
        status: r.status.clone(),
        error_message: r.error_message.clone(),
        file_path: r.file_path.clone(),
        requested_by: r.requested_by,
        is_public: r.is_public,
        download_count: r.download_count,
        organization_id: r.organization_id,
    }
}

/// GET /api/report-types
pub async fn list_types(State(state): State<Arc<AppState>>) -> Result<Response> {
    let rows: Vec<ReportTypeRow> = report_type::Entity::find()
        .filter(report_type::Column::IsActive.eq(true))
        .order_by_asc(report_type::Column::Name)
        .all(&state.db)
        .await?
        .iter()
        .map(type_row)
        .collect();
    Ok(Json(rows).into_response())
}

/// GET /api/report-types/:id
pub async fn get_type(State(state): State<Arc<AppState>>, Path(id): Path<i32>) -> Result<Response> {
    let kind = report_type::Entity::find_by_id(id)
        .filter(report_type::Column::IsActive.eq(true))
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Tipo de reporte".to_string()))?;
    Ok(Json(type_row(&kind)).into_response())
}

/// Visibility condition for the report listing: admins see everything,
/// authenticated users public reports plus their own, anonymous public only.
fn visibility(ctx: &RequestContext) -> Option<Condition> {
    if ctx.is_admin() {
        return None;
    }
    let mut condition = Condition::any().add(report::Column::IsPublic.eq(true));
    if let Some(u) = &ctx.user {
        condition = condition.add(report::Column::RequestedBy.eq(u.id));
    }
    Some(condition)
}

/// GET /api/reports
pub async fn list(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;

    let mut query = report::Entity::find().filter(report::Column::IsActive.eq(true));
    if let Some(condition) = visibility(&ctx) {
        query = query.filter(condition);
    }
    let rows: Vec<ReportRow> =
        query.order_by_desc(report::Column::RequestedAt).all(&state.db).await?.iter().map(row).collect();
    Ok(Json(rows).into_response())
}

async fn find_visible(state: &AppState, ctx: &RequestContext, id: i32) -> Result<report::Model> {
    let mut query = report::Entity::find_by_id(id).filter(report::Column::IsActive.eq(true));
    if let Some(condition) = visibility(ctx) {
        query = query.filter(condition);
    }
    query
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Reporte".to_string()))
}

/// GET /api/reports/:id
pub async fn retrieve(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    headers: HeaderMap,
) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;
    let report = find_visible(&state, &ctx, id).await?;
    Ok(Json(row(&report)).into_response())
}

#[derive(Deserialize, Default)]
pub struct ReportPayload {
    #[serde(rename = "tipo")]
    pub type_id: Option<i32>,
    #[serde(rename = "titulo")]
    pub title: Option<String>,
    #[serde(rename = "descripcion")]
    pub description: Option<String>,
    #[serde(rename = "formato")]
    pub format: Option<String>,
    #[serde(rename = "organismo")]
    pub organization_id: Option<i32>,
    #[serde(rename = "es_publico")]
    pub is_public: Option<bool>,
}

/// POST /api/reports (admin)
pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ReportPayload>,
) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;
    let actor_id = ctx.require_admin()?.id;

    let type_id = body
        .type_id
        .ok_or_else(|| ServerError::field("tipo", "Este campo es obligatorio."))?;
    let kind = report_type::Entity::find_by_id(type_id)
        .filter(report_type::Column::IsActive.eq(true))
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::field("tipo", "Tipo de reporte inexistente."))?;

    let format = body.format.as_deref().unwrap_or("pdf");
    if format != "pdf" && format != "csv" {
        return Err(ServerError::field("formato", "Formato desconocido, use pdf o csv."));
    }

    let scope = match body.organization_id {
        Some(org_id) => {
            let org = organization::Entity::find_by_id(org_id)
                .filter(organization::Column::IsActive.eq(true))
                .one(&state.db)
                .await?
                .ok_or_else(|| ServerError::field("organismo", "Organismo inexistente."))?;
            Some((org.id, org.name))
        }
        None => None,
    };

    let now = now_ts();
    let created = report::ActiveModel {
        type_id: Set(kind.id),
        title: Set(body.title.unwrap_or_else(|| kind.name.clone())),
        description: Set(body.description.unwrap_or_default()),
        params: Set(Some(
            json!({ "formato": format, "organismo": scope.as_ref().map(|(id, _)| id) }).to_string(),
        )),
        requested_at: Set(now),
        generated_at: Set(None),
        status: Set(ReportStatus::Pending.as_str().to_string()),
        error_message: Set(String::new()),
        file_path: Set(None),
        is_active: Set(true),
        requested_by: Set(Some(actor_id)),
        is_public: Set(body.is_public.unwrap_or(false)),
        download_count: Set(0),
        organization_id: Set(scope.as_ref().map(|(id, _)| *id)),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    audit::record_created(&state.db, &ctx.meta, AuditTarget::Report(created.id), &created.title)
        .await;

    let generated = generate(&state, created.clone(), scope, format).await;
    match generated {
        Ok(report) => Ok((StatusCode::CREATED, Json(row(&report))).into_response()),
        Err(e) => {
            let mut active = created.into_active_model();
            active.status = Set(ReportStatus::Failed.as_str().to_string());
            active.error_message = Set(e.to_string());
            active.updated_at = Set(now_ts());
            if let Err(update_err) = active.update(&state.db).await {
                tracing::warn!("failed to mark report as errored: {update_err}");
            }
            Err(e)
        }
    }
}

async fn generate(
    state: &AppState,
    row: report::Model,
    scope: Option<(i32, String)>,
    format: &str,
) -> Result<report::Model> {
    let mut active = row.clone().into_active_model();
    active.status = Set(ReportStatus::Generating.as_str().to_string());
    active.updated_at = Set(now_ts());
    let row = active.update(&state.db).await?;

    let summary = ProgressSummary::compute(&state.db, scope, Utc::now().date_naive()).await?;
    let bytes = match format {
        "csv" => summary.to_csv()?,
        _ => summary.to_pdf()?,
    };

    let dir = state.config.reports_dir();
    std::fs::create_dir_all(&dir)?;
    let filename = format!("reporte_{}.{}", row.id, format);
    std::fs::write(dir.join(&filename), &bytes)?;

    let mut active = row.into_active_model();
    active.status = Set(ReportStatus::Completed.as_str().to_string());
    active.generated_at = Set(Some(now_ts()));
    active.file_path = Set(Some(filename));
    active.updated_at = Set(now_ts());
    Ok(active.update(&state.db).await?)
}

/// GET /api/reports/:id/download
pub async fn download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    headers: HeaderMap,
) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;
    let row = find_visible(&state, &ctx, id).await?;

    if row.status != ReportStatus::Completed.as_str() {
        return Err(ServerError::NotReady("El reporte aún no está listo".to_string()));
    }
    if row.file_path.is_none() {
        return Err(ServerError::NotFound("Archivo del reporte".to_string()));
    }

    let mut active = row.clone().into_active_model();
    active.download_count = Set(row.download_count + 1);
    active.updated_at = Set(now_ts());
    active.update(&state.db).await?;

    audit::record_action(
        &state.db,
        &ctx.meta,
        AuditAction::Download,
        format!("Descarga de reporte: {}", row.title),
        Some(AuditTarget::Report(row.id)),
        None,
    )
    .await;

    Ok(Json(json!({
        "file_url": format!("{}/api/reports/{}/file", state.config.site_url, row.id),
    }))
    .into_response())
}

/// GET /api/reports/:id/file
pub async fn file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    headers: HeaderMap,
) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;
    let row = find_visible(&state, &ctx, id).await?;
    let filename = row
        .file_path
        .ok_or_else(|| ServerError::NotFound("Archivo del reporte".to_string()))?;

    let bytes = tokio::fs::read(state.config.reports_dir().join(&filename)).await?;
    let content_type = if filename.ends_with(".csv") {
        "text/csv; charset=utf-8"
    } else {
        "application/pdf"
    };

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\"")),
        ],
        bytes,
    )
        .into_response())
}

/// DELETE /api/reports/:id (soft)
pub async fn destroy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    headers: HeaderMap,
) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;
    ctx.require_admin()?;

    let row = find_visible(&state, &ctx, id).await?;
    let title = row.title.clone();

    let mut active = row.into_active_model();
    active.is_active = Set(false);
    active.updated_at = Set(now_ts());
    active.update(&state.db).await?;

    audit::record_deleted(&state.db, &ctx.meta, AuditTarget::Report(id), &title).await;

    Ok(StatusCode::NO_CONTENT.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fixtures;
    use crate::domain::Role;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn test_generation_walks_status_and_writes_file() {
        let state = fixtures::state().await;
        let kind = fixtures::report_type(&state.db, "avance_global").await;
        let comp = fixtures::component(&state.db, "AIRE", "Calidad del Aire").await;
        fixtures::measure(&state.db, "MED-001", comp.id).await;
        let headers = fixtures::login(&state, "admin", Role::SmaAdmin, None).await;

        let response = create(
            State(state.clone()),
            headers.clone(),
            Json(ReportPayload {
                type_id: Some(kind.id),
                format: Some("pdf".to_string()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let row: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(row["estado"], "completado");

        let filename = row["archivo"].as_str().unwrap();
        let bytes = std::fs::read(state.config.reports_dir().join(filename)).unwrap();
        assert!(bytes.starts_with(b"%PDF"));

        // Download hands back a file URL and counts.
        let id = row["id"].as_i64().unwrap() as i32;
        let response = download(State(state.clone()), Path(id), headers).await.unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(payload["file_url"].as_str().unwrap().ends_with("/file"));

        let stored = report::Entity::find_by_id(id).one(&state.db).await.unwrap().unwrap();
        assert_eq!(stored.download_count, 1);
    }

    #[tokio::test]
    async fn test_download_before_completion_is_rejected() {
        let state = fixtures::state().await;
        let kind = fixtures::report_type(&state.db, "avance_global").await;
        let admin = fixtures::user(&state.db, "admin", Role::SmaAdmin, None).await;

        let now = crate::db::now_ts();
        let pending = report::ActiveModel {
            type_id: Set(kind.id),
            title: Set("Pendiente".to_string()),
            description: Set(String::new()),
            params: Set(None),
            requested_at: Set(now),
            generated_at: Set(None),
            status: Set("pendiente".to_string()),
            error_message: Set(String::new()),
            file_path: Set(None),
            is_active: Set(true),
            requested_by: Set(Some(admin.id)),
            is_public: Set(false),
            download_count: Set(0),
            organization_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&state.db)
        .await
        .unwrap();

        let headers = fixtures::login_existing(&state, "admin").await;
        let err = download(State(state.clone()), Path(pending.id), headers).await.unwrap_err();
        assert!(matches!(err, ServerError::NotReady(_)));
    }

    #[tokio::test]
    async fn test_listing_visibility() {
        let state = fixtures::state().await;
        let kind = fixtures::report_type(&state.db, "avance_global").await;
        let headers = fixtures::login(&state, "admin", Role::SmaAdmin, None).await;

        // One public, one private.
        for public in [true, false] {
            create(
                State(state.clone()),
                headers.clone(),
                Json(ReportPayload {
                    type_id: Some(kind.id),
                    format: Some("csv".to_string()),
                    is_public: Some(public),
                    ..Default::default()
                }),
            )
            .await
            .unwrap();
        }

        // Anonymous sees only the public one.
        let response = list(State(state.clone()), HeaderMap::new()).await.unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let rows: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["es_publico"], true);

        // The admin sees both.
        let response = list(State(state.clone()), headers).await.unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let rows: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
        assert_eq!(rows.len(), 2);
    }
}
