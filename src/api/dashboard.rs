//! Public dashboard summary.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::{Html, IntoResponse, Response},
    Json,
};
use chrono::Utc;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use serde::Deserialize;
use serde_json::json;

use super::context;
use super::AppState;
use crate::db::entities::measure;
use crate::error::{Result, ServerError};
use crate::reports::ProgressSummary;

const RECENT_LIMIT: u64 = 5;

#[derive(Deserialize, Default)]
pub struct DashboardQuery {
    pub format: Option<String>,
}

/// GET /api/dashboard
///
/// Aggregates plus the five most recently updated measures and, for callers
/// with progress visibility, the five latest progress records. `?format=html`
/// renders the aggregation as the report page instead.
pub async fn summary(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DashboardQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;
    let today = Utc::now().date_naive();

    let aggregate = ProgressSummary::compute(&state.db, None, today).await?;

    match query.format.as_deref() {
        None | Some("json") => {}
        Some("html") => return Ok(Html(aggregate.to_html()?).into_response()),
        Some(_) => return Err(ServerError::field("format", "Formato desconocido, use json o html.")),
    }

    let recent_measures = measure::Entity::find()
        .filter(measure::Column::IsActive.eq(true))
        .order_by_desc(measure::Column::UpdatedAt)
        .limit(RECENT_LIMIT)
        .all(&state.db)
        .await?;
    let recent_measures: Vec<serde_json::Value> = recent_measures
        .iter()
        .map(|m| {
            json!({
                "id": m.id,
                "codigo": m.code,
                "nombre": m.name,
                "estado": m.status,
                "porcentaje_avance": m.progress_percent,
            })
        })
        .collect();

    let recent_progress = super::progress::recent(&state, &ctx, RECENT_LIMIT).await?;

    Ok(Json(json!({
        "resumen": {
            "total_medidas": aggregate.total_measures,
            "avance_global": aggregate.mean_progress,
        },
        "estado_medidas": aggregate.by_status,
        "avance_componentes": aggregate.by_component,
        "medidas_recientes": recent_measures,
        "avances_recientes": recent_progress,
    }))
    .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fixtures;
    use crate::domain::Role;
    use axum::body::to_bytes;

    async fn fetch(state: &Arc<AppState>, headers: HeaderMap) -> serde_json::Value {
        let response = summary(State(state.clone()), Query(DashboardQuery::default()), headers)
            .await
            .unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_dashboard_totals_and_anonymous_progress() {
        let state = fixtures::state().await;
        let comp = fixtures::component(&state.db, "AIRE", "Calidad del Aire").await;
        let m = fixtures::measure(&state.db, "MED-001", comp.id).await;
        fixtures::measure(&state.db, "MED-002", comp.id).await;
        let org = fixtures::organization(&state.db, "Depto Aire").await;
        fixtures::assignment(&state.db, m.id, org.id).await;
        fixtures::progress(&state.db, m.id, org.id, 40.0).await;

        let body = fetch(&state, HeaderMap::new()).await;
        assert_eq!(body["resumen"]["total_medidas"], 2);
        assert_eq!(body["medidas_recientes"].as_array().unwrap().len(), 2);
        // Anonymous callers get no progress records.
        assert!(body["avances_recientes"].as_array().unwrap().is_empty());

        let headers = fixtures::login(&state, "admin", Role::SmaAdmin, None).await;
        let body = fetch(&state, headers).await;
        assert_eq!(body["avances_recientes"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_html_format_renders_report_page() {
        let state = fixtures::state().await;
        let comp = fixtures::component(&state.db, "AIRE", "Calidad del Aire").await;
        fixtures::measure(&state.db, "MED-001", comp.id).await;

        let response = summary(
            State(state.clone()),
            Query(DashboardQuery { format: Some("html".to_string()) }),
            HeaderMap::new(),
        )
        .await
        .unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let page = String::from_utf8(body.to_vec()).unwrap();
        assert!(page.contains("Reporte de Avance Global"));
    }
}
