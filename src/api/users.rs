//! User administration. Admin-only; organism-role accounts must name their
//! organization, and nobody else may.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, IntoActiveModel, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};

use super::auth::hash_password;
use super::context;
use super::AppState;
use crate::audit::{self, AuditSnapshot, AuditTarget};
use crate::db::entities::{organization, user};
use crate::db::now_ts;
use crate::domain::Role;
use crate::error::{Result, ServerError};
use crate::notify;

#[derive(Serialize)]
pub struct UserRow {
    pub id: i32,
    pub username: String,
    #[serde(rename = "nombre_completo")]
    pub full_name: String,
    pub email: String,
    #[serde(rename = "cargo")]
    pub position: String,
    #[serde(rename = "telefono")]
    pub phone: String,
    #[serde(rename = "rol")]
    pub role: String,
    #[serde(rename = "organismo")]
    pub organization_id: Option<i32>,
    #[serde(rename = "notificaciones_email")]
    pub email_notifications: bool,
    #[serde(rename = "notificaciones_sistema")]
    pub system_notifications: bool,
}

fn row(u: &user::Model) -> UserRow {
    UserRow {
        id: u.id,
        username: u.username.clone(),
        full_name: u.full_name.clone(),
        email: u.email.clone(),
        position: u.position.clone(),
        phone: u.phone.clone(),
        role: u.role.clone(),
        organization_id: u.organization_id,
        email_notifications: u.email_notifications,
        system_notifications: u.system_notifications,
    }
}

#[derive(Deserialize, Default)]
pub struct UserPayload {
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(rename = "nombre_completo")]
    pub full_name: Option<String>,
    pub email: Option<String>,
    #[serde(rename = "cargo")]
    pub position: Option<String>,
    #[serde(rename = "telefono")]
    pub phone: Option<String>,
    #[serde(rename = "rol")]
    pub role: Option<String>,
    #[serde(rename = "organismo")]
    pub organization_id: Option<i32>,
    #[serde(rename = "notificaciones_email")]
    pub email_notifications: Option<bool>,
    #[serde(rename = "notificaciones_sistema")]
    pub system_notifications: Option<bool>,
}

fn parse_role(value: &str) -> Result<Role> {
    Role::parse(value).ok_or_else(|| ServerError::field("rol", "Rol desconocido."))
}

/// Organism accounts require an organization; other roles must not carry one.
fn check_role_organization(role: Role, organization_id: Option<i32>) -> Result<()> {
    match (role, organization_id) {
        (Role::Organism, None) => Err(ServerError::field(
            "organismo",
            "Los usuarios de organismo deben tener un organismo asociado.",
        )),
        (Role::Organism, Some(_)) => Ok(()),
        (_, Some(_)) => Err(ServerError::field(
            "organismo",
            "Solo los usuarios de organismo pueden tener un organismo asociado.",
        )),
        (_, None) => Ok(()),
    }
}

async fn validated_organization(state: &AppState, id: i32) -> Result<()> {
    organization::Entity::find_by_id(id)
        .filter(organization::Column::IsActive.eq(true))
        .one(&state.db)
        .await?
        .map(|_| ())
        .ok_or_else(|| ServerError::field("organismo", "Organismo inexistente."))
}

/// GET /api/users (admin)
pub async fn list(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;
    ctx.require_admin()?;

    let rows: Vec<UserRow> = user::Entity::find()
        .filter(user::Column::IsActive.eq(true))
        .order_by_asc(user::Column::Username)
        .all(&state.db)
        .await?
        .iter()
        .map(row)
        .collect();
    Ok(Json(rows).into_response())
}

/// GET /api/users/:id (admin)
pub async fn retrieve(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    headers: HeaderMap,
) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;
    ctx.require_admin()?;

    let account = user::Entity::find_by_id(id)
        .filter(user::Column::IsActive.eq(true))
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Usuario".to_string()))?;
    Ok(Json(row(&account)).into_response())
}

/// POST /api/users (admin)
pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<UserPayload>,
) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;
    ctx.require_admin()?;

    let username = body
        .username
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ServerError::field("username", "Este campo es obligatorio."))?;
    let password = body
        .password
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ServerError::field("password", "Este campo es obligatorio."))?;
    let role = parse_role(
        body.role
            .as_deref()
            .ok_or_else(|| ServerError::field("rol", "Este campo es obligatorio."))?,
    )?;
    check_role_organization(role, body.organization_id)?;
    if let Some(org_id) = body.organization_id {
        validated_organization(&state, org_id).await?;
    }

    let duplicate = user::Entity::find()
        .filter(user::Column::Username.eq(username))
        .one(&state.db)
        .await?;
    if duplicate.is_some() {
        return Err(ServerError::field("username", "Ya existe un usuario con este nombre."));
    }

    let now = now_ts();
    let created = user::ActiveModel {
        username: Set(username.to_string()),
        password_hash: Set(hash_password(password)),
        full_name: Set(body.full_name.unwrap_or_default()),
        email: Set(body.email.unwrap_or_default()),
        position: Set(body.position.unwrap_or_default()),
        phone: Set(body.phone.unwrap_or_default()),
        role: Set(role.as_str().to_string()),
        organization_id: Set(body.organization_id),
        email_notifications: Set(body.email_notifications.unwrap_or(true)),
        system_notifications: Set(body.system_notifications.unwrap_or(true)),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    if let Err(e) = notify::setup_user_config(&state.db, &created, role).await {
        tracing::warn!("failed to create notification config for {}: {e}", created.username);
    }

    let display =
        if created.full_name.is_empty() { created.username.clone() } else { created.full_name.clone() };
    audit::record_created(&state.db, &ctx.meta, AuditTarget::User(created.id), &display).await;

    Ok((StatusCode::CREATED, Json(row(&created))).into_response())
}

/// PUT /api/users/:id (admin)
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    headers: HeaderMap,
    Json(body): Json<UserPayload>,
) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;
    ctx.require_admin()?;

    let account = user::Entity::find_by_id(id)
        .filter(user::Column::IsActive.eq(true))
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Usuario".to_string()))?;
    let before = account.snapshot();

    let role = match body.role.as_deref() {
        Some(v) => parse_role(v)?,
        None => Role::parse(&account.role)
            .ok_or_else(|| ServerError::Internal(format!("unknown role '{}'", account.role)))?,
    };
    let organization_id = match body.organization_id {
        Some(v) => Some(v),
        None => account.organization_id,
    };
    check_role_organization(role, organization_id)?;
    if let Some(org_id) = body.organization_id {
        validated_organization(&state, org_id).await?;
    }

    let mut active = account.clone().into_active_model();
    if let Some(password) = body.password.as_deref().filter(|p| !p.is_empty()) {
        active.password_hash = Set(hash_password(password));
    }
    if let Some(v) = body.full_name {
        active.full_name = Set(v);
    }
    if let Some(v) = body.email {
        active.email = Set(v);
    }
    if let Some(v) = body.position {
        active.position = Set(v);
    }
    if let Some(v) = body.phone {
        active.phone = Set(v);
    }
    active.role = Set(role.as_str().to_string());
    active.organization_id = Set(organization_id);
    if let Some(v) = body.email_notifications {
        active.email_notifications = Set(v);
    }
    if let Some(v) = body.system_notifications {
        active.system_notifications = Set(v);
    }
    active.updated_at = Set(now_ts());
    let updated = active.update(&state.db).await?;

    let display =
        if updated.full_name.is_empty() { updated.username.clone() } else { updated.full_name.clone() };
    audit::record_updated(
        &state.db,
        &ctx.meta,
        AuditTarget::User(updated.id),
        &display,
        &before,
        &updated.snapshot(),
    )
    .await;

    Ok(Json(row(&updated)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fixtures;
    use crate::db::entities::notification_config;
    use axum::body::to_bytes;

    fn base_payload(role: &str, org: Option<i32>) -> UserPayload {
        UserPayload {
            username: Some("nuevo".to_string()),
            password: Some("secreto1".to_string()),
            full_name: Some("Usuario Nuevo".to_string()),
            role: Some(role.to_string()),
            organization_id: org,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_organism_user_requires_organization() {
        let state = fixtures::state().await;
        let headers = fixtures::login(&state, "admin", Role::SmaAdmin, None).await;

        let err = create(State(state.clone()), headers, Json(base_payload("organismo", None)))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_non_organism_user_rejects_organization() {
        let state = fixtures::state().await;
        let org = fixtures::organization(&state.db, "Depto Aire").await;
        let headers = fixtures::login(&state, "admin", Role::SmaAdmin, None).await;

        let err = create(
            State(state.clone()),
            headers,
            Json(base_payload("admin_sma", Some(org.id))),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_create_hashes_password_and_creates_config() {
        let state = fixtures::state().await;
        let org = fixtures::organization(&state.db, "Depto Aire").await;
        let headers = fixtures::login(&state, "admin", Role::SmaAdmin, None).await;

        let response = create(
            State(state.clone()),
            headers,
            Json(base_payload("organismo", Some(org.id))),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let row: serde_json::Value = serde_json::from_slice(&body).unwrap();
        // The hash never leaves the server, and fields go out in Spanish.
        assert!(row.get("password_hash").is_none());
        assert_eq!(row["rol"], "organismo");
        assert_eq!(row["organismo"].as_i64().unwrap() as i32, org.id);

        let stored = user::Entity::find()
            .filter(user::Column::Username.eq("nuevo"))
            .one(&state.db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.password_hash, hash_password("secreto1"));

        let config = notification_config::Entity::find()
            .filter(notification_config::Column::UserId.eq(stored.id))
            .one(&state.db)
            .await
            .unwrap();
        assert!(config.is_some());
    }
}
