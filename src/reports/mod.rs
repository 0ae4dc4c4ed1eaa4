//! Read-side reporting.
//!
//! One aggregation pass ([`ProgressSummary::compute`]) feeds every output
//! format; JSON, HTML, CSV and PDF are renderings of the same struct, never
//! recomputed per format.

pub mod pdf;

use chrono::NaiveDate;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::Serialize;

use crate::db::entities::{assignment, component, measure};
use crate::domain::MeasureStatus;
use crate::error::Result;
use crate::templates;

/// Aggregate progress for one status.
#[derive(Clone, Debug, Serialize)]
pub struct StatusRow {
    #[serde(rename = "estado")]
    pub status: String,
    #[serde(rename = "cantidad")]
    pub count: u64,
    #[serde(rename = "avance_promedio")]
    pub mean_progress: f64,
}

/// Aggregate progress for one plan component.
#[derive(Clone, Debug, Serialize)]
pub struct ComponentRow {
    pub id: i32,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "codigo")]
    pub code: String,
    pub color: String,
    #[serde(rename = "total_medidas")]
    pub count: u64,
    #[serde(rename = "avance_promedio")]
    pub mean_progress: f64,
}

/// The aggregation every report format derives from.
#[derive(Clone, Debug, Serialize)]
pub struct ProgressSummary {
    #[serde(rename = "titulo")]
    pub title: String,
    #[serde(rename = "fecha")]
    pub generated_on: NaiveDate,
    #[serde(rename = "organismo", skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(rename = "total_medidas")]
    pub total_measures: u64,
    #[serde(rename = "avance_global")]
    pub mean_progress: f64,
    #[serde(rename = "estado_medidas")]
    pub by_status: Vec<StatusRow>,
    #[serde(rename = "avance_componentes")]
    pub by_component: Vec<ComponentRow>,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        // Empty scope reports zero progress, not an undefined value.
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

impl ProgressSummary {
    /// Run the aggregation over active measures, optionally scoped to the
    /// measures assigned to one organization.
    pub async fn compute(
        db: &DatabaseConnection,
        scope: Option<(i32, String)>,
        today: NaiveDate,
    ) -> Result<ProgressSummary> {
        let mut query = measure::Entity::find().filter(measure::Column::IsActive.eq(true));

        if let Some((org_id, _)) = &scope {
            let assigned: Vec<i32> = assignment::Entity::find()
                .filter(assignment::Column::OrganizationId.eq(*org_id))
                .all(db)
                .await?
                .into_iter()
                .map(|a| a.measure_id)
                .collect();
            query = query.filter(measure::Column::Id.is_in(assigned));
        }

        let measures = query.all(db).await?;
        let components = component::Entity::find()
            .filter(component::Column::IsActive.eq(true))
            .all(db)
            .await?;

        let all_progress: Vec<f64> = measures.iter().map(|m| m.progress_percent).collect();

        let by_status = MeasureStatus::ALL
            .iter()
            .filter_map(|status| {
                let progress: Vec<f64> = measures
                    .iter()
                    .filter(|m| m.status == status.as_str())
                    .map(|m| m.progress_percent)
                    .collect();
                if progress.is_empty() {
                    return None;
                }
                Some(StatusRow {
                    status: status.as_str().to_string(),
                    count: progress.len() as u64,
                    mean_progress: mean(&progress),
                })
            })
            .collect();

        let by_component = components
            .iter()
            .map(|c| {
                let progress: Vec<f64> = measures
                    .iter()
                    .filter(|m| m.component_id == c.id)
                    .map(|m| m.progress_percent)
                    .collect();
                ComponentRow {
                    id: c.id,
                    name: c.name.clone(),
                    code: c.code.clone(),
                    color: c.color.clone(),
                    count: progress.len() as u64,
                    mean_progress: mean(&progress),
                }
            })
            .collect();

        let (organization, title) = match scope {
            Some((_, name)) => (Some(name.clone()), format!("Reporte de Avance: {name}")),
            None => (None, "Reporte de Avance Global".to_string()),
        };

        Ok(ProgressSummary {
            title,
            generated_on: today,
            organization,
            total_measures: measures.len() as u64,
            mean_progress: mean(&all_progress),
            by_status,
            by_component,
        })
    }

    /// Flattened CSV with a fixed localized header. One row per section line.
    pub fn to_csv(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(["Sección", "Nombre", "Total Medidas", "Avance (%)"])
            .map_err(csv_err)?;
        writer
            .write_record([
                "Resumen",
                "Total",
                &self.total_measures.to_string(),
                &format!("{:.1}", self.mean_progress),
            ])
            .map_err(csv_err)?;
        for row in &self.by_status {
            let label = MeasureStatus::parse(&row.status)
                .map(|s| s.label().to_string())
                .unwrap_or_else(|| row.status.clone());
            writer
                .write_record([
                    "Estado",
                    &label,
                    &row.count.to_string(),
                    &format!("{:.1}", row.mean_progress),
                ])
                .map_err(csv_err)?;
        }
        for row in &self.by_component {
            writer
                .write_record([
                    "Componente",
                    &row.name,
                    &row.count.to_string(),
                    &format!("{:.1}", row.mean_progress),
                ])
                .map_err(csv_err)?;
        }
        writer.into_inner().map_err(|e| crate::error::ServerError::Internal(e.to_string()))
    }

    /// HTML rendering via the embedded template.
    pub fn to_html(&self) -> Result<String> {
        let mut context = tera::Context::new();
        context.insert("summary", self);
        context.insert(
            "status_labels",
            &self
                .by_status
                .iter()
                .map(|row| {
                    MeasureStatus::parse(&row.status)
                        .map(|s| s.label().to_string())
                        .unwrap_or_else(|| row.status.clone())
                })
                .collect::<Vec<_>>(),
        );
        templates::render("report.html", &context)
            .map_err(|e| crate::error::ServerError::Internal(format!("template error: {e}")))
    }

    /// PDF rendering: title, generation date, one bordered table per section.
    pub fn to_pdf(&self) -> Result<Vec<u8>> {
        pdf::render(self)
    }
}

fn csv_err(e: csv::Error) -> crate::error::ServerError {
    crate::error::ServerError::Internal(format!("csv error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::entities::component;
    use crate::db::{init_test_database, now_ts};
    use sea_orm::{ActiveModelTrait, Set};

    async fn seed_component(db: &DatabaseConnection, name: &str) -> component::Model {
        let now = now_ts();
        component::ActiveModel {
            name: Set(name.to_string()),
            description: Set(String::new()),
            code: Set(name.to_uppercase()),
            color: Set("#3366FF".to_string()),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap()
    }

    async fn seed_measure(
        db: &DatabaseConnection,
        component_id: i32,
        code: &str,
        status: &str,
        progress: f64,
    ) {
        let now = now_ts();
        measure::ActiveModel {
            code: Set(code.to_string()),
            name: Set(format!("Medida {code}")),
            description: Set(String::new()),
            component_id: Set(component_id),
            start_date: Set(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()),
            end_date: Set(NaiveDate::from_ymd_opt(2025, 12, 31).unwrap()),
            status: Set(status.to_string()),
            priority: Set("media".to_string()),
            progress_percent: Set(progress),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_empty_dataset_reports_zero_mean() {
        let db = init_test_database().await.unwrap();
        let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let summary = ProgressSummary::compute(&db, None, today).await.unwrap();
        assert_eq!(summary.total_measures, 0);
        assert_eq!(summary.mean_progress, 0.0);
        assert!(summary.by_status.is_empty());
    }

    #[tokio::test]
    async fn test_aggregation_and_formats_agree() {
        let db = init_test_database().await.unwrap();
        let air = seed_component(&db, "Calidad del Aire").await;
        seed_measure(&db, air.id, "MED-001", "en_proceso", 65.0).await;
        seed_measure(&db, air.id, "MED-002", "pendiente", 0.0).await;
        seed_measure(&db, air.id, "MED-003", "completada", 100.0).await;

        let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let summary = ProgressSummary::compute(&db, None, today).await.unwrap();

        assert_eq!(summary.total_measures, 3);
        assert!((summary.mean_progress - 55.0).abs() < 1e-9);
        assert_eq!(summary.by_status.len(), 3);
        assert_eq!(summary.by_component.len(), 1);
        assert_eq!(summary.by_component[0].count, 3);

        // Every format carries the same totals.
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["total_medidas"], 3);
        assert_eq!(json["avance_global"].as_f64().unwrap(), 55.0);

        let csv_text = String::from_utf8(summary.to_csv().unwrap()).unwrap();
        assert!(csv_text.contains("Resumen,Total,3,55.0"));

        let html = summary.to_html().unwrap();
        assert!(html.contains("Reporte de Avance Global"));
        assert!(html.contains("55.0"));

        let pdf_bytes = summary.to_pdf().unwrap();
        assert!(pdf_bytes.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn test_inactive_measures_excluded() {
        let db = init_test_database().await.unwrap();
        let air = seed_component(&db, "Aire").await;
        seed_measure(&db, air.id, "MED-001", "en_proceso", 50.0).await;

        let now = now_ts();
        measure::ActiveModel {
            code: Set("MED-OLD".to_string()),
            name: Set("Medida retirada".to_string()),
            description: Set(String::new()),
            component_id: Set(air.id),
            start_date: Set(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
            end_date: Set(NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()),
            status: Set("suspendida".to_string()),
            priority: Set("baja".to_string()),
            progress_percent: Set(10.0),
            is_active: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&db)
        .await
        .unwrap();

        let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let summary = ProgressSummary::compute(&db, None, today).await.unwrap();
        assert_eq!(summary.total_measures, 1);
    }
}
