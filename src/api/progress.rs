//! Progress records ("registros de avance").
//!
//! Anonymous callers get an empty list, organism users see their own
//! organization's records, admins see everything. Creating a record against a
//! measure the caller's organization is not assigned to is a 403, distinct
//! from the 404 of a measure that does not exist.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, IntoActiveModel, ModelTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};

use super::context::{self, RequestContext};
use super::measures;
use super::AppState;
use crate::audit::{self, AuditSnapshot, AuditTarget};
use crate::db::entities::{assignment, measure, organization, progress_record};
use crate::db::now_ts;
use crate::domain::{AuditAction, Role};
use crate::error::{Result, ServerError};
use crate::notify;
use crate::templates;

#[derive(Serialize)]
pub struct ProgressRow {
    pub id: i32,
    #[serde(rename = "medida")]
    pub measure_id: i32,
    #[serde(rename = "medida_codigo")]
    pub measure_code: String,
    #[serde(rename = "medida_nombre")]
    pub measure_name: String,
    #[serde(rename = "organismo")]
    pub organization_id: i32,
    #[serde(rename = "organismo_nombre")]
    pub organization_name: String,
    #[serde(rename = "fecha_registro")]
    pub record_date: NaiveDate,
    #[serde(rename = "porcentaje_avance")]
    pub progress_percent: f64,
    #[serde(rename = "descripcion")]
    pub description: String,
    #[serde(rename = "evidencia")]
    pub evidence_path: Option<String>,
}

struct NameMaps {
    measures: HashMap<i32, (String, String)>,
    organizations: HashMap<i32, String>,
}

async fn name_maps(state: &AppState, records: &[progress_record::Model]) -> Result<NameMaps> {
    let measure_ids: Vec<i32> = records.iter().map(|r| r.measure_id).collect();
    let org_ids: Vec<i32> = records.iter().map(|r| r.organization_id).collect();

    let measures = measure::Entity::find()
        .filter(measure::Column::Id.is_in(measure_ids))
        .all(&state.db)
        .await?
        .into_iter()
        .map(|m| (m.id, (m.code, m.name)))
        .collect();
    let organizations = organization::Entity::find()
        .filter(organization::Column::Id.is_in(org_ids))
        .all(&state.db)
        .await?
        .into_iter()
        .map(|o| (o.id, o.name))
        .collect();

    Ok(NameMaps { measures, organizations })
}

fn row(r: &progress_record::Model, names: &NameMaps) -> ProgressRow {
    let (code, name) = names.measures.get(&r.measure_id).cloned().unwrap_or_default();
    ProgressRow {
        id: r.id,
        measure_id: r.measure_id,
        measure_code: code,
        measure_name: name,
        organization_id: r.organization_id,
        organization_name: names.organizations.get(&r.organization_id).cloned().unwrap_or_default(),
        record_date: r.record_date,
        progress_percent: r.progress_percent,
        description: r.description.clone(),
        evidence_path: r.evidence_path.clone(),
    }
}

#[derive(Deserialize, Default)]
pub struct ProgressFilter {
    pub measure: Option<i32>,
    pub organization: Option<i32>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub progress_min: Option<f64>,
    pub progress_max: Option<f64>,
    pub format: Option<String>,
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| ServerError::field(field, "Fecha inválida, use el formato YYYY-MM-DD."))
}

/// The caller's record queryset: none for anonymous, own organization for
/// organism users, everything for both admin roles and citizens see none.
async fn visible(
    state: &AppState,
    ctx: &RequestContext,
    filter: &ProgressFilter,
) -> Result<Vec<progress_record::Model>> {
    let mut query = progress_record::Entity::find();

    match ctx.role {
        None | Some(Role::Citizen) => return Ok(Vec::new()),
        Some(Role::Organism) => {
            let Some(org_id) = ctx.organization_scope() else {
                return Ok(Vec::new());
            };
            query = query.filter(progress_record::Column::OrganizationId.eq(org_id));
        }
        Some(Role::SuperAdmin) | Some(Role::SmaAdmin) => {}
    }

    if let Some(v) = filter.measure {
        query = query.filter(progress_record::Column::MeasureId.eq(v));
    }
    if let Some(v) = filter.organization {
        query = query.filter(progress_record::Column::OrganizationId.eq(v));
    }
    if let Some(v) = &filter.date_from {
        query = query.filter(progress_record::Column::RecordDate.gte(parse_date("date_from", v)?));
    }
    if let Some(v) = &filter.date_to {
        query = query.filter(progress_record::Column::RecordDate.lte(parse_date("date_to", v)?));
    }
    if let Some(v) = filter.progress_min {
        query = query.filter(progress_record::Column::ProgressPercent.gte(v));
    }
    if let Some(v) = filter.progress_max {
        query = query.filter(progress_record::Column::ProgressPercent.lte(v));
    }

    Ok(query
        .order_by_desc(progress_record::Column::RecordDate)
        .order_by_desc(progress_record::Column::Id)
        .all(&state.db)
        .await?)
}

/// The `limit` most recent records visible to the caller, for the dashboard.
pub(super) async fn recent(
    state: &AppState,
    ctx: &RequestContext,
    limit: u64,
) -> Result<Vec<ProgressRow>> {
    let mut records = visible(state, ctx, &ProgressFilter::default()).await?;
    records.truncate(limit as usize);
    let names = name_maps(state, &records).await?;
    Ok(records.iter().map(|r| row(r, &names)).collect())
}

const CSV_HEADERS: [&str; 6] =
    ["Código Medida", "Medida", "Organismo", "Fecha", "Avance (%)", "Descripción"];

fn to_csv(rows: &[ProgressRow]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(CSV_HEADERS)
        .map_err(|e| ServerError::Internal(format!("csv error: {e}")))?;
    for r in rows {
        let date = r.record_date.format("%Y-%m-%d").to_string();
        let progress = format!("{:.1}", r.progress_percent);
        writer
            .write_record([
                r.measure_code.as_str(),
                r.measure_name.as_str(),
                r.organization_name.as_str(),
                date.as_str(),
                progress.as_str(),
                r.description.as_str(),
            ])
            .map_err(|e| ServerError::Internal(format!("csv error: {e}")))?;
    }
    writer.into_inner().map_err(|e| ServerError::Internal(e.to_string()))
}

fn render(rows: Vec<ProgressRow>, format: Option<&str>) -> Result<Response> {
    match format {
        None | Some("json") => Ok(Json(rows).into_response()),
        Some("csv") => Ok(measures::csv_response(to_csv(&rows)?, "avances.csv")),
        Some("html") => {
            let mut tera_ctx = tera::Context::new();
            tera_ctx.insert("records", &rows);
            let page = templates::render("progress.html", &tera_ctx)
                .map_err(|e| ServerError::Internal(format!("template error: {e}")))?;
            Ok(axum::response::Html(page).into_response())
        }
        Some(_) => Err(ServerError::field("format", "Formato desconocido, use json, csv o html.")),
    }
}

/// GET /api/progress-records
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ProgressFilter>,
    headers: HeaderMap,
) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;
    let records = visible(&state, &ctx, &filter).await?;
    let names = name_maps(&state, &records).await?;
    let rows: Vec<ProgressRow> = records.iter().map(|r| row(r, &names)).collect();

    if filter.format.as_deref() == Some("csv") {
        audit::record_action(
            &state.db,
            &ctx.meta,
            AuditAction::Export,
            "Exportación de registros de avance a CSV".to_string(),
            None,
            None,
        )
        .await;
    }
    render(rows, filter.format.as_deref())
}

/// GET /api/measures/:id/progress-records
pub async fn list_for_measure(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    headers: HeaderMap,
) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;
    measures::find_visible(&state, &ctx, id).await?;
    let filter = ProgressFilter { measure: Some(id), ..Default::default() };
    let records = visible(&state, &ctx, &filter).await?;
    let names = name_maps(&state, &records).await?;
    let rows: Vec<ProgressRow> = records.iter().map(|r| row(r, &names)).collect();
    Ok(Json(rows).into_response())
}

#[derive(Deserialize, Default)]
pub struct ProgressPayload {
    #[serde(rename = "medida")]
    pub measure_id: Option<i32>,
    #[serde(rename = "fecha_registro")]
    pub record_date: Option<String>,
    #[serde(rename = "porcentaje_avance")]
    pub progress_percent: Option<f64>,
    #[serde(rename = "descripcion")]
    pub description: Option<String>,
    #[serde(rename = "evidencia")]
    pub evidence_path: Option<String>,
}

fn validated_percent(value: Option<f64>) -> Result<f64> {
    let percent = value
        .ok_or_else(|| ServerError::field("porcentaje_avance", "Este campo es obligatorio."))?;
    if !(0.0..=100.0).contains(&percent) {
        return Err(ServerError::field(
            "porcentaje_avance",
            "El porcentaje debe estar entre 0 y 100.",
        ));
    }
    Ok(percent)
}

/// POST /api/measures/:id/progress-records
pub async fn create_for_measure(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    headers: HeaderMap,
    Json(body): Json<ProgressPayload>,
) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;
    let (actor, role) = ctx.actor()?;

    if role != Role::Organism {
        return Err(ServerError::Forbidden(
            "Solo los organismos pueden registrar avances.".to_string(),
        ));
    }
    let org_id = actor.organization_id.ok_or_else(|| {
        ServerError::Forbidden("Tu cuenta no está asociada a un organismo.".to_string())
    })?;

    // 404 before 403: a measure that does not exist is not an assignment problem.
    let m = measure::Entity::find_by_id(id)
        .filter(measure::Column::IsActive.eq(true))
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Medida".to_string()))?;

    create_record(&state, &ctx, m, org_id, body).await
}

/// POST /api/progress-records
///
/// Same rule as the nested route: only organism users report progress, always
/// for their own organization.
pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ProgressPayload>,
) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;
    let (actor, role) = ctx.actor()?;

    if role != Role::Organism {
        return Err(ServerError::Forbidden(
            "Solo los organismos pueden registrar avances.".to_string(),
        ));
    }
    let org_id = actor.organization_id.ok_or_else(|| {
        ServerError::Forbidden("Tu cuenta no está asociada a un organismo.".to_string())
    })?;

    let measure_id = body
        .measure_id
        .ok_or_else(|| ServerError::field("medida", "Este campo es obligatorio."))?;

    let m = measure::Entity::find_by_id(measure_id)
        .filter(measure::Column::IsActive.eq(true))
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Medida".to_string()))?;

    create_record(&state, &ctx, m, org_id, body).await
}

async fn create_record(
    state: &Arc<AppState>,
    ctx: &RequestContext,
    m: measure::Model,
    org_id: i32,
    body: ProgressPayload,
) -> Result<Response> {
    let assigned = assignment::Entity::find()
        .filter(assignment::Column::MeasureId.eq(m.id))
        .filter(assignment::Column::OrganizationId.eq(org_id))
        .one(&state.db)
        .await?;
    if assigned.is_none() {
        return Err(ServerError::Forbidden(
            "Tu organismo no está asignado a esta medida.".to_string(),
        ));
    }

    let org = organization::Entity::find_by_id(org_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Organismo".to_string()))?;

    let percent = validated_percent(body.progress_percent)?;
    let record_date = match body.record_date.as_deref() {
        Some(v) => parse_date("fecha_registro", v)?,
        None => Utc::now().date_naive(),
    };

    let now = now_ts();
    let record = progress_record::ActiveModel {
        measure_id: Set(m.id),
        organization_id: Set(org_id),
        record_date: Set(record_date),
        progress_percent: Set(percent),
        description: Set(body.description.unwrap_or_default()),
        evidence_path: Set(body.evidence_path),
        created_by: Set(ctx.meta.user_id),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    // The measure mirrors its latest reported percent. Last writer wins.
    let before = m.snapshot();
    let mut active = m.clone().into_active_model();
    active.progress_percent = Set(percent);
    active.updated_at = Set(now);
    let updated_measure = active.update(&state.db).await?;

    audit::record_created(
        &state.db,
        &ctx.meta,
        AuditTarget::ProgressRecord(record.id),
        &format!("{} ({}%)", m.code, percent),
    )
    .await;
    audit::record_updated(
        &state.db,
        &ctx.meta,
        AuditTarget::Measure(updated_measure.id),
        &updated_measure.code,
        &before,
        &updated_measure.snapshot(),
    )
    .await;
    notify::notify_new_progress(&state.db, &state.mailer, &updated_measure, &org, percent).await;

    let names = name_maps(&state, std::slice::from_ref(&record)).await?;
    Ok((StatusCode::CREATED, Json(row(&record, &names))).into_response())
}

async fn find_editable(
    state: &AppState,
    ctx: &RequestContext,
    id: i32,
) -> Result<progress_record::Model> {
    let record = progress_record::Entity::find_by_id(id)
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Registro de avance".to_string()))?;

    if !ctx.is_admin() {
        let (_, role) = ctx.actor()?;
        if role != Role::Organism || ctx.organization_scope() != Some(record.organization_id) {
            return Err(ServerError::Forbidden(
                "No puedes modificar avances de otro organismo.".to_string(),
            ));
        }
    }
    Ok(record)
}

/// GET /api/progress-records/:id
pub async fn retrieve(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    headers: HeaderMap,
) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;
    let record = find_editable(&state, &ctx, id).await?;
    let names = name_maps(&state, std::slice::from_ref(&record)).await?;
    Ok(Json(row(&record, &names)).into_response())
}

/// PUT /api/progress-records/:id
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    headers: HeaderMap,
    Json(body): Json<ProgressPayload>,
) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;
    let record = find_editable(&state, &ctx, id).await?;
    let before = record.snapshot();

    let mut active = record.clone().into_active_model();
    if let Some(v) = &body.record_date {
        active.record_date = Set(parse_date("fecha_registro", v)?);
    }
    if body.progress_percent.is_some() {
        active.progress_percent = Set(validated_percent(body.progress_percent)?);
    }
    if let Some(v) = body.description {
        active.description = Set(v);
    }
    if let Some(v) = body.evidence_path {
        active.evidence_path = Set(Some(v));
    }
    active.updated_at = Set(now_ts());
    let updated = active.update(&state.db).await?;

    audit::record_updated(
        &state.db,
        &ctx.meta,
        AuditTarget::ProgressRecord(updated.id),
        &format!("registro #{}", updated.id),
        &before,
        &updated.snapshot(),
    )
    .await;

    let names = name_maps(&state, std::slice::from_ref(&updated)).await?;
    Ok(Json(row(&updated, &names)).into_response())
}

/// DELETE /api/progress-records/:id (admin, hard delete)
pub async fn destroy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    headers: HeaderMap,
) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;
    ctx.require_admin()?;

    let record = progress_record::Entity::find_by_id(id)
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Registro de avance".to_string()))?;
    let display = format!("registro #{}", record.id);
    record.delete(&state.db).await?;

    audit::record_deleted(&state.db, &ctx.meta, AuditTarget::ProgressRecord(id), &display).await;

    Ok(StatusCode::NO_CONTENT.into_response())
}
