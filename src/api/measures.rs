//! Measures ("medidas") and plan components.
//!
//! Listing is public but scoped: organism users only see measures assigned to
//! their organization. The list endpoint renders JSON, CSV or HTML from the
//! same filtered queryset.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, IntoActiveModel, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};

use super::context::{self, RequestContext};
use super::AppState;
use crate::audit::{self, AuditSnapshot, AuditTarget};
use crate::db::entities::{assignment, component, measure, organization};
use crate::db::now_ts;
use crate::domain::{AuditAction, MeasureStatus, Priority};
use crate::error::{Result, ServerError};
use crate::templates;

#[derive(Serialize)]
pub struct MeasureRow {
    pub id: i32,
    #[serde(rename = "codigo")]
    pub code: String,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "componente")]
    pub component_id: i32,
    #[serde(rename = "componente_nombre")]
    pub component_name: String,
    #[serde(rename = "estado")]
    pub status: String,
    #[serde(rename = "prioridad")]
    pub priority: String,
    #[serde(rename = "porcentaje_avance")]
    pub progress_percent: f64,
    #[serde(rename = "fecha_inicio")]
    pub start_date: NaiveDate,
    #[serde(rename = "fecha_termino")]
    pub end_date: NaiveDate,
}

#[derive(Serialize)]
pub struct MeasureDetail {
    #[serde(flatten)]
    pub row: MeasureRow,
    #[serde(rename = "descripcion")]
    pub description: String,
    #[serde(rename = "organismos")]
    pub organizations: Vec<String>,
}

fn row(m: &measure::Model, component_names: &HashMap<i32, String>) -> MeasureRow {
    MeasureRow {
        id: m.id,
        code: m.code.clone(),
        name: m.name.clone(),
        component_id: m.component_id,
        component_name: component_names.get(&m.component_id).cloned().unwrap_or_default(),
        status: m.status.clone(),
        priority: m.priority.clone(),
        progress_percent: m.progress_percent,
        start_date: m.start_date,
        end_date: m.end_date,
    }
}

async fn component_names(state: &AppState) -> Result<HashMap<i32, String>> {
    Ok(component::Entity::find()
        .all(&state.db)
        .await?
        .into_iter()
        .map(|c| (c.id, c.name))
        .collect())
}

/// The measure ids assigned to one organization.
async fn assigned_measure_ids(state: &AppState, organization_id: i32) -> Result<Vec<i32>> {
    Ok(assignment::Entity::find()
        .filter(assignment::Column::OrganizationId.eq(organization_id))
        .all(&state.db)
        .await?
        .into_iter()
        .map(|a| a.measure_id)
        .collect())
}

#[derive(Deserialize, Default)]
pub struct MeasureFilter {
    pub code_contains: Option<String>,
    pub name_contains: Option<String>,
    pub progress_min: Option<f64>,
    pub progress_max: Option<f64>,
    pub start_from: Option<String>,
    pub start_to: Option<String>,
    pub end_from: Option<String>,
    pub end_to: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub component: Option<i32>,
    pub organization: Option<i32>,
    pub overdue: Option<bool>,
    pub format: Option<String>,
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| ServerError::field(field, "Fecha inválida, use el formato YYYY-MM-DD."))
}

/// Apply the query-string filters to a measure select. Membership filters
/// reject unknown vocabulary values instead of silently matching nothing.
async fn filtered(
    state: &AppState,
    ctx: &RequestContext,
    filter: &MeasureFilter,
) -> Result<Vec<measure::Model>> {
    let mut query = measure::Entity::find().filter(measure::Column::IsActive.eq(true));

    if let Some(org_id) = ctx.organization_scope() {
        query = query.filter(measure::Column::Id.is_in(assigned_measure_ids(state, org_id).await?));
    }

    if let Some(v) = &filter.code_contains {
        query = query.filter(measure::Column::Code.contains(v));
    }
    if let Some(v) = &filter.name_contains {
        query = query.filter(measure::Column::Name.contains(v));
    }
    if let Some(v) = filter.progress_min {
        query = query.filter(measure::Column::ProgressPercent.gte(v));
    }
    if let Some(v) = filter.progress_max {
        query = query.filter(measure::Column::ProgressPercent.lte(v));
    }
    if let Some(v) = &filter.start_from {
        query = query.filter(measure::Column::StartDate.gte(parse_date("start_from", v)?));
    }
    if let Some(v) = &filter.start_to {
        query = query.filter(measure::Column::StartDate.lte(parse_date("start_to", v)?));
    }
    if let Some(v) = &filter.end_from {
        query = query.filter(measure::Column::EndDate.gte(parse_date("end_from", v)?));
    }
    if let Some(v) = &filter.end_to {
        query = query.filter(measure::Column::EndDate.lte(parse_date("end_to", v)?));
    }
    if let Some(v) = &filter.status {
        let mut statuses = Vec::new();
        for part in v.split(',') {
            let status = MeasureStatus::parse(part.trim())
                .ok_or_else(|| ServerError::field("status", "Estado desconocido."))?;
            statuses.push(status.as_str());
        }
        query = query.filter(measure::Column::Status.is_in(statuses));
    }
    if let Some(v) = &filter.priority {
        let mut priorities = Vec::new();
        for part in v.split(',') {
            let priority = Priority::parse(part.trim())
                .ok_or_else(|| ServerError::field("priority", "Prioridad desconocida."))?;
            priorities.push(priority.as_str());
        }
        query = query.filter(measure::Column::Priority.is_in(priorities));
    }
    if let Some(v) = filter.component {
        query = query.filter(measure::Column::ComponentId.eq(v));
    }
    if let Some(v) = filter.organization {
        query = query.filter(measure::Column::Id.is_in(assigned_measure_ids(state, v).await?));
    }
    if filter.overdue == Some(true) {
        let terminal: Vec<&str> = MeasureStatus::ALL
            .iter()
            .filter(|s| s.is_terminal())
            .map(|s| s.as_str())
            .collect();
        query = query
            .filter(measure::Column::EndDate.lt(Utc::now().date_naive()))
            .filter(measure::Column::Status.is_not_in(terminal));
    }

    Ok(query.order_by_asc(measure::Column::Code).all(&state.db).await?)
}

const CSV_HEADERS: [&str; 7] = [
    "Código",
    "Nombre de la Medida",
    "Componente",
    "Estado",
    "Avance (%)",
    "Fecha Inicio",
    "Fecha Término",
];

fn to_csv(rows: &[MeasureRow]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(CSV_HEADERS)
        .map_err(|e| ServerError::Internal(format!("csv error: {e}")))?;
    for r in rows {
        let status = MeasureStatus::parse(&r.status).map(|s| s.label()).unwrap_or(r.status.as_str());
        let progress = format!("{:.1}", r.progress_percent);
        let start = r.start_date.format("%Y-%m-%d").to_string();
        let end = r.end_date.format("%Y-%m-%d").to_string();
        writer
            .write_record([
                r.code.as_str(),
                r.name.as_str(),
                r.component_name.as_str(),
                status,
                progress.as_str(),
                start.as_str(),
                end.as_str(),
            ])
            .map_err(|e| ServerError::Internal(format!("csv error: {e}")))?;
    }
    writer.into_inner().map_err(|e| ServerError::Internal(e.to_string()))
}

pub(super) fn csv_response(bytes: Vec<u8>, filename: &str) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
        .into_response()
}

/// GET /api/measures
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<MeasureFilter>,
    headers: HeaderMap,
) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;
    let measures = filtered(&state, &ctx, &filter).await?;
    let names = component_names(&state).await?;
    let rows: Vec<MeasureRow> = measures.iter().map(|m| row(m, &names)).collect();

    match filter.format.as_deref() {
        None | Some("json") => Ok(Json(rows).into_response()),
        Some("csv") => {
            audit::record_action(
                &state.db,
                &ctx.meta,
                AuditAction::Export,
                "Exportación de medidas a CSV".to_string(),
                None,
                None,
            )
            .await;
            Ok(csv_response(to_csv(&rows)?, "medidas.csv"))
        }
        Some("html") => {
            let mut tera_ctx = tera::Context::new();
            tera_ctx.insert("measures", &rows);
            let page = templates::render("measures.html", &tera_ctx)
                .map_err(|e| ServerError::Internal(format!("template error: {e}")))?;
            Ok(axum::response::Html(page).into_response())
        }
        Some(_) => Err(ServerError::field("format", "Formato desconocido, use json, csv o html.")),
    }
}

pub(super) async fn find_visible(
    state: &AppState,
    ctx: &RequestContext,
    id: i32,
) -> Result<measure::Model> {
    let m = measure::Entity::find_by_id(id)
        .filter(measure::Column::IsActive.eq(true))
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Medida".to_string()))?;

    if let Some(org_id) = ctx.organization_scope() {
        if !assigned_measure_ids(state, org_id).await?.contains(&m.id) {
            return Err(ServerError::NotFound("Medida".to_string()));
        }
    }
    Ok(m)
}

/// GET /api/measures/:id
pub async fn retrieve(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    headers: HeaderMap,
) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;
    let m = find_visible(&state, &ctx, id).await?;
    Ok(Json(detail(&state, &m).await?).into_response())
}

async fn detail(state: &AppState, m: &measure::Model) -> Result<MeasureDetail> {
    let names = component_names(state).await?;

    let org_ids: Vec<i32> = assignment::Entity::find()
        .filter(assignment::Column::MeasureId.eq(m.id))
        .all(&state.db)
        .await?
        .into_iter()
        .map(|a| a.organization_id)
        .collect();
    let organizations = organization::Entity::find()
        .filter(organization::Column::Id.is_in(org_ids))
        .order_by_asc(organization::Column::Name)
        .all(&state.db)
        .await?
        .into_iter()
        .map(|o| o.name)
        .collect();

    Ok(MeasureDetail {
        row: row(m, &names),
        description: m.description.clone(),
        organizations,
    })
}

#[derive(Deserialize, Default)]
pub struct MeasurePayload {
    #[serde(rename = "codigo")]
    pub code: Option<String>,
    #[serde(rename = "nombre")]
    pub name: Option<String>,
    #[serde(rename = "descripcion")]
    pub description: Option<String>,
    #[serde(rename = "componente")]
    pub component_id: Option<i32>,
    #[serde(rename = "fecha_inicio")]
    pub start_date: Option<String>,
    #[serde(rename = "fecha_termino")]
    pub end_date: Option<String>,
    #[serde(rename = "estado")]
    pub status: Option<String>,
    #[serde(rename = "prioridad")]
    pub priority: Option<String>,
}

fn parse_status(value: &str) -> Result<MeasureStatus> {
    MeasureStatus::parse(value).ok_or_else(|| ServerError::field("estado", "Estado desconocido."))
}

fn parse_priority(value: &str) -> Result<Priority> {
    Priority::parse(value).ok_or_else(|| ServerError::field("prioridad", "Prioridad desconocida."))
}

async fn validated_component(state: &AppState, id: i32) -> Result<component::Model> {
    component::Entity::find_by_id(id)
        .filter(component::Column::IsActive.eq(true))
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::field("componente", "Componente inexistente."))
}

/// POST /api/measures
pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<MeasurePayload>,
) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;
    ctx.require_admin()?;

    let code = body
        .code
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ServerError::field("codigo", "Este campo es obligatorio."))?;
    let name = body
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ServerError::field("nombre", "Este campo es obligatorio."))?;
    let component_id = body
        .component_id
        .ok_or_else(|| ServerError::field("componente", "Este campo es obligatorio."))?;
    validated_component(&state, component_id).await?;

    let start_date = parse_date(
        "fecha_inicio",
        body.start_date
            .as_deref()
            .ok_or_else(|| ServerError::field("fecha_inicio", "Este campo es obligatorio."))?,
    )?;
    let end_date = parse_date(
        "fecha_termino",
        body.end_date
            .as_deref()
            .ok_or_else(|| ServerError::field("fecha_termino", "Este campo es obligatorio."))?,
    )?;
    if end_date < start_date {
        return Err(ServerError::field(
            "fecha_termino",
            "La fecha de término debe ser posterior a la fecha de inicio.",
        ));
    }

    let duplicate = measure::Entity::find()
        .filter(measure::Column::Code.eq(code))
        .one(&state.db)
        .await?;
    if duplicate.is_some() {
        return Err(ServerError::field("codigo", "Ya existe una medida con este código."));
    }

    let status = match body.status.as_deref() {
        Some(v) => parse_status(v)?,
        None => MeasureStatus::Pending,
    };
    let priority = match body.priority.as_deref() {
        Some(v) => parse_priority(v)?,
        None => Priority::Medium,
    };

    let now = now_ts();
    let created = measure::ActiveModel {
        code: Set(code.to_string()),
        name: Set(name.to_string()),
        description: Set(body.description.unwrap_or_default()),
        component_id: Set(component_id),
        start_date: Set(start_date),
        end_date: Set(end_date),
        status: Set(status.as_str().to_string()),
        priority: Set(priority.as_str().to_string()),
        progress_percent: Set(0.0),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    audit::record_created(&state.db, &ctx.meta, AuditTarget::Measure(created.id), &created.code)
        .await;

    Ok((StatusCode::CREATED, Json(detail(&state, &created).await?)).into_response())
}

/// PUT /api/measures/:id
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    headers: HeaderMap,
    Json(body): Json<MeasurePayload>,
) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;
    ctx.require_admin()?;

    let m = find_visible(&state, &ctx, id).await?;
    let before = m.snapshot();

    if let Some(component_id) = body.component_id {
        validated_component(&state, component_id).await?;
    }

    let mut active = m.clone().into_active_model();
    if let Some(name) = body.name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(ServerError::field("nombre", "Este campo es obligatorio."));
        }
        active.name = Set(name);
    }
    if let Some(v) = body.description {
        active.description = Set(v);
    }
    if let Some(v) = body.component_id {
        active.component_id = Set(v);
    }
    if let Some(v) = &body.start_date {
        active.start_date = Set(parse_date("fecha_inicio", v)?);
    }
    if let Some(v) = &body.end_date {
        active.end_date = Set(parse_date("fecha_termino", v)?);
    }
    if let Some(v) = &body.status {
        active.status = Set(parse_status(v)?.as_str().to_string());
    }
    if let Some(v) = &body.priority {
        active.priority = Set(parse_priority(v)?.as_str().to_string());
    }
    active.updated_at = Set(now_ts());
    let updated = active.update(&state.db).await?;

    audit::record_updated(
        &state.db,
        &ctx.meta,
        AuditTarget::Measure(updated.id),
        &updated.code,
        &before,
        &updated.snapshot(),
    )
    .await;

    Ok(Json(detail(&state, &updated).await?).into_response())
}

/// DELETE /api/measures/:id (soft)
pub async fn destroy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    headers: HeaderMap,
) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;
    ctx.require_admin()?;

    let m = find_visible(&state, &ctx, id).await?;
    let code = m.code.clone();

    let mut active = m.into_active_model();
    active.is_active = Set(false);
    active.updated_at = Set(now_ts());
    active.update(&state.db).await?;

    audit::record_deleted(&state.db, &ctx.meta, AuditTarget::Measure(id), &code).await;

    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Serialize)]
pub struct ComponentRow {
    pub id: i32,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "descripcion")]
    pub description: String,
    #[serde(rename = "codigo")]
    pub code: String,
    pub color: String,
}

fn component_row(c: component::Model) -> ComponentRow {
    ComponentRow {
        id: c.id,
        name: c.name,
        description: c.description,
        code: c.code,
        color: c.color,
    }
}

/// GET /api/components
pub async fn list_components(State(state): State<Arc<AppState>>) -> Result<Response> {
    let rows: Vec<ComponentRow> = component::Entity::find()
        .filter(component::Column::IsActive.eq(true))
        .order_by_asc(component::Column::Code)
        .all(&state.db)
        .await?
        .into_iter()
        .map(component_row)
        .collect();
    Ok(Json(rows).into_response())
}

/// GET /api/components/:id
pub async fn get_component(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Response> {
    let c = component::Entity::find_by_id(id)
        .filter(component::Column::IsActive.eq(true))
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Componente".to_string()))?;
    Ok(Json(component_row(c)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fixtures;
    use crate::domain::Role;
    use axum::body::to_bytes;

    async fn listed_codes(
        state: &Arc<AppState>,
        headers: HeaderMap,
        filter: MeasureFilter,
    ) -> Vec<String> {
        let response = list(State(state.clone()), Query(filter), headers).await.unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let rows: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
        rows.iter().map(|r| r["codigo"].as_str().unwrap().to_string()).collect()
    }

    #[tokio::test]
    async fn test_anonymous_sees_active_measures() {
        let state = fixtures::state().await;
        let comp = fixtures::component(&state.db, "AIRE", "Calidad del Aire").await;
        fixtures::measure(&state.db, "MED-001", comp.id).await;
        let inactive = fixtures::measure(&state.db, "MED-002", comp.id).await;
        let mut active = inactive.into_active_model();
        active.is_active = Set(false);
        active.update(&state.db).await.unwrap();

        let codes = listed_codes(&state, HeaderMap::new(), MeasureFilter::default()).await;
        assert_eq!(codes, vec!["MED-001"]);
    }

    #[tokio::test]
    async fn test_organism_scope_limits_listing() {
        let state = fixtures::state().await;
        let comp = fixtures::component(&state.db, "AIRE", "Calidad del Aire").await;
        let mine = fixtures::measure(&state.db, "MED-001", comp.id).await;
        fixtures::measure(&state.db, "MED-002", comp.id).await;

        let org = fixtures::organization(&state.db, "Depto Aire").await;
        fixtures::assignment(&state.db, mine.id, org.id).await;
        let headers = fixtures::login(&state, "func", Role::Organism, Some(org.id)).await;

        let codes = listed_codes(&state, headers.clone(), MeasureFilter::default()).await;
        assert_eq!(codes, vec!["MED-001"]);

        // Retrieval of an unassigned measure is a 404, not a 403.
        let ctx = context::extract(&state, &headers).await.unwrap();
        let other = measure::Entity::find()
            .filter(measure::Column::Code.eq("MED-002"))
            .one(&state.db)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            find_visible(&state, &ctx, other.id).await,
            Err(ServerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_status_membership_and_overdue_filters() {
        let state = fixtures::state().await;
        let comp = fixtures::component(&state.db, "AIRE", "Calidad del Aire").await;
        let m1 = fixtures::measure(&state.db, "MED-001", comp.id).await;
        let m2 = fixtures::measure(&state.db, "MED-002", comp.id).await;
        fixtures::measure(&state.db, "MED-003", comp.id).await;

        let mut a = m1.into_active_model();
        a.status = Set("en_proceso".to_string());
        a.end_date = Set(Utc::now().date_naive() - chrono::Duration::days(10));
        a.update(&state.db).await.unwrap();

        let mut a = m2.into_active_model();
        a.status = Set("completada".to_string());
        a.end_date = Set(Utc::now().date_naive() - chrono::Duration::days(10));
        a.update(&state.db).await.unwrap();

        let codes = listed_codes(
            &state,
            HeaderMap::new(),
            MeasureFilter { status: Some("en_proceso,completada".to_string()), ..Default::default() },
        )
        .await;
        assert_eq!(codes, vec!["MED-001", "MED-002"]);

        // Overdue excludes terminal statuses.
        let codes = listed_codes(
            &state,
            HeaderMap::new(),
            MeasureFilter { overdue: Some(true), ..Default::default() },
        )
        .await;
        assert_eq!(codes, vec!["MED-001"]);
    }

    #[tokio::test]
    async fn test_csv_format_uses_localized_headers() {
        let state = fixtures::state().await;
        let comp = fixtures::component(&state.db, "AIRE", "Calidad del Aire").await;
        fixtures::measure(&state.db, "MED-001", comp.id).await;

        let response = list(
            State(state.clone()),
            Query(MeasureFilter { format: Some("csv".to_string()), ..Default::default() }),
            HeaderMap::new(),
        )
        .await
        .unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.starts_with("Código,Nombre de la Medida,Componente"));
        assert!(text.contains("MED-001"));
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_code() {
        let state = fixtures::state().await;
        let comp = fixtures::component(&state.db, "AIRE", "Calidad del Aire").await;
        fixtures::measure(&state.db, "MED-001", comp.id).await;
        let headers = fixtures::login(&state, "admin", Role::SmaAdmin, None).await;

        let err = create(
            State(state.clone()),
            headers,
            Json(MeasurePayload {
                code: Some("MED-001".to_string()),
                name: Some("Duplicada".to_string()),
                component_id: Some(comp.id),
                start_date: Some("2026-01-01".to_string()),
                end_date: Some("2026-12-31".to_string()),
                ..Default::default()
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));
    }
}
