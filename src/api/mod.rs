//! HTTP API.

pub mod assignments;
pub mod auth;
pub mod context;
pub mod dashboard;
pub mod measures;
pub mod notifications;
pub mod organizations;
pub mod progress;
pub mod reports;
pub mod users;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use sea_orm::DatabaseConnection;
use serde_json::json;

pub use auth::AuthManager;

use crate::audit::{self, RequestMeta};
use crate::config::Config;
use crate::domain::AuditAction;
use crate::notify::Mailer;

/// Application state shared across handlers
pub struct AppState {
    pub db: DatabaseConnection,
    pub auth: AuthManager,
    pub mailer: Mailer,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config, db: DatabaseConnection) -> Self {
        let mailer = Mailer::new(config.smtp.clone(), config.site_url.clone());
        Self { db, auth: AuthManager::new(), mailer, config }
    }
}

/// GET /health
pub async fn health() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

/// Record one `api_call` audit entry per API request. Best-effort; the
/// response is never delayed by more than the single insert.
pub async fn log_api_call(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    if !path.starts_with("/api") {
        return next.run(request).await;
    }

    let user_id = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| state.auth.resolve(auth::token_value(v)));
    let meta = RequestMeta {
        user_id,
        ip: context::client_ip(request.headers()),
        user_agent: context::user_agent(request.headers()),
    };

    let started = Instant::now();
    let response = next.run(request).await;

    audit::record_action(
        &state.db,
        &meta,
        AuditAction::ApiCall,
        format!("{method} {path}"),
        None,
        Some(json!({
            "status": response.status().as_u16(),
            "duration_ms": started.elapsed().as_millis() as u64,
        })),
    )
    .await;

    response
}

/// Build the full application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/organizations", get(organizations::list).post(organizations::create))
        .route(
            "/api/organizations/:id",
            get(organizations::retrieve)
                .put(organizations::update)
                .delete(organizations::destroy),
        )
        .route(
            "/api/organizations/:id/contacts",
            get(organizations::list_contacts).post(organizations::create_contact),
        )
        .route("/api/organization-types", get(organizations::list_types))
        .route("/api/components", get(measures::list_components))
        .route("/api/components/:id", get(measures::get_component))
        .route("/api/measures", get(measures::list).post(measures::create))
        .route(
            "/api/measures/:id",
            get(measures::retrieve).put(measures::update).delete(measures::destroy),
        )
        .route(
            "/api/measures/:id/progress-records",
            get(progress::list_for_measure).post(progress::create_for_measure),
        )
        .route("/api/progress-records", get(progress::list).post(progress::create))
        .route(
            "/api/progress-records/:id",
            get(progress::retrieve).put(progress::update).delete(progress::destroy),
        )
        .route("/api/assignments", post(assignments::create))
        .route("/api/notifications", get(notifications::list))
        .route("/api/notifications/:id/read", post(notifications::mark_read))
        .route("/api/notifications/sweep-deadlines", post(notifications::sweep))
        .route("/api/dashboard", get(dashboard::summary))
        .route("/api/users", get(users::list).post(users::create))
        .route("/api/users/:id", get(users::retrieve).put(users::update))
        .route("/api/report-types", get(reports::list_types))
        .route("/api/report-types/:id", get(reports::get_type))
        .route("/api/reports", get(reports::list).post(reports::create))
        .route("/api/reports/:id", get(reports::retrieve).delete(reports::destroy))
        .route("/api/reports/:id/download", get(reports::download))
        .route("/api/reports/:id/file", get(reports::file))
        .route("/health", get(health))
        .layer(middleware::from_fn_with_state(state.clone(), log_api_call))
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Shared builders for handler tests.

    use std::sync::Arc;

    use axum::http::{header, HeaderMap};
    use chrono::{Duration, Utc};
    use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};

    use super::auth::hash_password;
    use super::{AppState, AuthManager};
    use crate::config::Config;
    use crate::db::entities::{
        assignment, component, measure, organization, organization_type, progress_record,
        report_type, user,
    };
    use crate::db::now_ts;
    use crate::domain::Role;
    use crate::notify::Mailer;

    pub const PASSWORD: &str = "password123";

    pub async fn state() -> Arc<AppState> {
        let db = crate::db::init_test_database().await.unwrap();
        let config = Config {
            storage_path: tempfile::tempdir().unwrap().into_path(),
            ..Config::default()
        };
        Arc::new(AppState { db, auth: AuthManager::new(), mailer: Mailer::disabled(), config })
    }

    pub async fn user(
        db: &DatabaseConnection,
        username: &str,
        role: Role,
        organization_id: Option<i32>,
    ) -> user::Model {
        let now = now_ts();
        user::ActiveModel {
            username: Set(username.to_string()),
            password_hash: Set(hash_password(PASSWORD)),
            full_name: Set(format!("Usuario {username}")),
            email: Set(format!("{username}@example.cl")),
            position: Set(String::new()),
            phone: Set(String::new()),
            role: Set(role.as_str().to_string()),
            organization_id: Set(organization_id),
            email_notifications: Set(true),
            system_notifications: Set(true),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap()
    }

    /// Create a user and return headers carrying a live token for it.
    pub async fn login(
        state: &Arc<AppState>,
        username: &str,
        role: Role,
        organization_id: Option<i32>,
    ) -> HeaderMap {
        user(&state.db, username, role, organization_id).await;
        login_existing(state, username).await
    }

    pub async fn login_existing(state: &Arc<AppState>, username: &str) -> HeaderMap {
        let (token, _) = state.auth.login(&state.db, username, PASSWORD).await.unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, format!("Token {token}").parse().unwrap());
        headers
    }

    pub async fn organization(db: &DatabaseConnection, name: &str) -> organization::Model {
        let now = now_ts();
        let kind = organization_type::ActiveModel {
            name: Set("Servicio Público".to_string()),
            description: Set(String::new()),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap();

        organization::ActiveModel {
            name: Set(name.to_string()),
            type_id: Set(kind.id),
            tax_id: Set(String::new()),
            address: Set(String::new()),
            commune: Set(String::new()),
            region: Set(String::new()),
            phone: Set(String::new()),
            contact_email: Set(String::new()),
            website: Set(String::new()),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap()
    }

    pub async fn component(db: &DatabaseConnection, code: &str, name: &str) -> component::Model {
        let now = now_ts();
        component::ActiveModel {
            name: Set(name.to_string()),
            description: Set(String::new()),
            code: Set(code.to_string()),
            color: Set("#0066CC".to_string()),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap()
    }

    pub async fn measure(db: &DatabaseConnection, code: &str, component_id: i32) -> measure::Model {
        let now = now_ts();
        let today = Utc::now().date_naive();
        measure::ActiveModel {
            code: Set(code.to_string()),
            name: Set(format!("Medida {code}")),
            description: Set(String::new()),
            component_id: Set(component_id),
            start_date: Set(today - Duration::days(30)),
            end_date: Set(today + Duration::days(180)),
            status: Set("pendiente".to_string()),
            priority: Set("media".to_string()),
            progress_percent: Set(0.0),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap()
    }

    pub async fn assignment(
        db: &DatabaseConnection,
        measure_id: i32,
        organization_id: i32,
    ) -> assignment::Model {
        let now = now_ts();
        assignment::ActiveModel {
            measure_id: Set(measure_id),
            organization_id: Set(organization_id),
            is_coordinator: Set(false),
            responsibility: Set(String::new()),
            assigned_on: Set(Utc::now().date_naive()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap()
    }

    pub async fn progress(
        db: &DatabaseConnection,
        measure_id: i32,
        organization_id: i32,
        percent: f64,
    ) -> progress_record::Model {
        let now = now_ts();
        progress_record::ActiveModel {
            measure_id: Set(measure_id),
            organization_id: Set(organization_id),
            record_date: Set(Utc::now().date_naive()),
            progress_percent: Set(percent),
            description: Set(String::new()),
            evidence_path: Set(None),
            created_by: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap()
    }

    pub async fn report_type(db: &DatabaseConnection, slug: &str) -> report_type::Model {
        let now = now_ts();
        report_type::ActiveModel {
            name: Set("Reporte de Avance".to_string()),
            description: Set(String::new()),
            slug: Set(slug.to_string()),
            is_active: Set(true),
            is_public: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::extract::{Path, State};
    use axum::http::HeaderMap;
    use axum::Json;
    use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};

    use crate::db::entities::{audit_entry, notification};
    use crate::domain::Role;

    /// End to end over the handlers: an admin sets up an organization, a
    /// measure and its assignment, the organism reports progress, and the
    /// dashboard, audit trail and notifications all reflect it.
    #[tokio::test]
    async fn test_full_reporting_flow() {
        let state = fixtures::state().await;
        let comp = fixtures::component(&state.db, "AIRE", "Calidad del Aire").await;
        let seed = fixtures::organization(&state.db, "Organismo semilla").await;
        let admin_headers = fixtures::login(&state, "admin", Role::SmaAdmin, None).await;

        // Organization via the API.
        let response = organizations::create(
            State(state.clone()),
            admin_headers.clone(),
            Json(organizations::OrganizationPayload {
                name: Some("Departamento de Aire".to_string()),
                type_id: Some(seed.type_id),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let org: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let org_id = org["id"].as_i64().unwrap() as i32;

        // Measure via the API.
        let response = measures::create(
            State(state.clone()),
            admin_headers.clone(),
            Json(measures::MeasurePayload {
                code: Some("MED-001".to_string()),
                name: Some("Reducción de emisiones".to_string()),
                component_id: Some(comp.id),
                start_date: Some("2026-01-01".to_string()),
                end_date: Some("2026-12-31".to_string()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let m: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let measure_id = m["id"].as_i64().unwrap() as i32;

        // Organism user and assignment.
        let response = users::create(
            State(state.clone()),
            admin_headers.clone(),
            Json(users::UserPayload {
                username: Some("depto_aire".to_string()),
                password: Some(fixtures::PASSWORD.to_string()),
                role: Some("organismo".to_string()),
                organization_id: Some(org_id),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::CREATED);

        assignments::create(
            State(state.clone()),
            admin_headers.clone(),
            Json(assignments::AssignmentPayload {
                measure_id: Some(measure_id),
                organization_id: Some(org_id),
                ..Default::default()
            }),
        )
        .await
        .unwrap();

        // The organism reports 60%.
        let org_headers = fixtures::login_existing(&state, "depto_aire").await;
        progress::create_for_measure(
            State(state.clone()),
            Path(measure_id),
            org_headers,
            Json(progress::ProgressPayload {
                progress_percent: Some(60.0),
                description: Some("Primer informe".to_string()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();

        // Dashboard reflects the new percent.
        let response = dashboard::summary(
            State(state.clone()),
            axum::extract::Query(dashboard::DashboardQuery::default()),
            HeaderMap::new(),
        )
        .await
        .unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let dash: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(dash["resumen"]["avance_global"].as_f64().unwrap(), 60.0);

        // The trail recorded the whole story.
        let creations = audit_entry::Entity::find()
            .filter(audit_entry::Column::Action.eq("creacion"))
            .count(&state.db)
            .await
            .unwrap();
        assert!(creations >= 4); // organization, measure, user, assignment, record

        // The admin got notified of the progress; the organism of the assignment.
        let rows = notification::Entity::find().all(&state.db).await.unwrap();
        assert!(rows.iter().any(|n| n.title.starts_with("Nuevo avance")));
        assert!(rows.iter().any(|n| n.title.starts_with("Nueva medida asignada")));
    }
}
