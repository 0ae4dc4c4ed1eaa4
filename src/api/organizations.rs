//! Organizations ("organismos"), their types and their contact people.

use std::collections::HashMap;
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

use super::context;
use super::AppState;
use crate::audit::{self, AuditSnapshot, AuditTarget};
use crate::db::entities::{contact, organization, organization_type};
use crate::db::now_ts;
use crate::error::{Result, ServerError};

#[derive(Serialize)]
pub struct OrganizationRow {
    pub id: i32,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "tipo")]
    pub type_id: i32,
    #[serde(rename = "tipo_nombre")]
    pub type_name: String,
    #[serde(rename = "rut")]
    pub tax_id: String,
    #[serde(rename = "direccion")]
    pub address: String,
    #[serde(rename = "comuna")]
    pub commune: String,
    #[serde(rename = "region")]
    pub region: String,
    #[serde(rename = "telefono")]
    pub phone: String,
    #[serde(rename = "email_contacto")]
    pub contact_email: String,
    #[serde(rename = "sitio_web")]
    pub website: String,
}

fn row(org: &organization::Model, type_names: &HashMap<i32, String>) -> OrganizationRow {
    OrganizationRow {
        id: org.id,
        name: org.name.clone(),
        type_id: org.type_id,
        type_name: type_names.get(&org.type_id).cloned().unwrap_or_default(),
        tax_id: org.tax_id.clone(),
        address: org.address.clone(),
        commune: org.commune.clone(),
        region: org.region.clone(),
        phone: org.phone.clone(),
        contact_email: org.contact_email.clone(),
        website: org.website.clone(),
    }
}

async fn type_names(state: &AppState) -> Result<HashMap<i32, String>> {
    Ok(organization_type::Entity::find()
        .all(&state.db)
        .await?
        .into_iter()
        .map(|t| (t.id, t.name))
        .collect())
}

/// GET /api/organizations
pub async fn list(State(state): State<Arc<AppState>>) -> Result<Response> {
    let orgs = organization::Entity::find()
        .filter(organization::Column::IsActive.eq(true))
        .order_by_asc(organization::Column::Name)
        .all(&state.db)
        .await?;

    let names = type_names(&state).await?;
    let rows: Vec<OrganizationRow> = orgs.iter().map(|o| row(o, &names)).collect();
    Ok(Json(rows).into_response())
}

/// GET /api/organizations/:id
pub async fn retrieve(State(state): State<Arc<AppState>>, Path(id): Path<i32>) -> Result<Response> {
    let org = find_active(&state, id).await?;
    let names = type_names(&state).await?;
    Ok(Json(row(&org, &names)).into_response())
}

async fn find_active(state: &AppState, id: i32) -> Result<organization::Model> {
    organization::Entity::find_by_id(id)
        .filter(organization::Column::IsActive.eq(true))
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Organismo".to_string()))
}

#[derive(Deserialize, Default)]
pub struct OrganizationPayload {
    #[serde(rename = "nombre")]
    pub name: Option<String>,
    #[serde(rename = "tipo")]
    pub type_id: Option<i32>,
    #[serde(rename = "rut")]
    pub tax_id: Option<String>,
    #[serde(rename = "direccion")]
    pub address: Option<String>,
    #[serde(rename = "comuna")]
    pub commune: Option<String>,
    #[serde(rename = "region")]
    pub region: Option<String>,
    #[serde(rename = "telefono")]
    pub phone: Option<String>,
    #[serde(rename = "email_contacto")]
    pub contact_email: Option<String>,
    #[serde(rename = "sitio_web")]
    pub website: Option<String>,
}

async fn validated_type(state: &AppState, type_id: i32) -> Result<organization_type::Model> {
    organization_type::Entity::find_by_id(type_id)
        .filter(organization_type::Column::IsActive.eq(true))
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::field("tipo", "Tipo de organismo inexistente."))
}

/// POST /api/organizations
pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<OrganizationPayload>,
) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;
    ctx.require_admin()?;

    let name = body
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ServerError::field("nombre", "Este campo es obligatorio."))?;
    let type_id = body
        .type_id
        .ok_or_else(|| ServerError::field("tipo", "Este campo es obligatorio."))?;
    validated_type(&state, type_id).await?;

    let now = now_ts();
    let org = organization::ActiveModel {
        name: Set(name.to_string()),
        type_id: Set(type_id),
        tax_id: Set(body.tax_id.unwrap_or_default()),
        address: Set(body.address.unwrap_or_default()),
        commune: Set(body.commune.unwrap_or_default()),
        region: Set(body.region.unwrap_or_default()),
        phone: Set(body.phone.unwrap_or_default()),
        contact_email: Set(body.contact_email.unwrap_or_default()),
        website: Set(body.website.unwrap_or_default()),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    audit::record_created(&state.db, &ctx.meta, AuditTarget::Organization(org.id), &org.name).await;

    let names = type_names(&state).await?;
    Ok((StatusCode::CREATED, Json(row(&org, &names))).into_response())
}

/// PUT /api/organizations/:id
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    headers: HeaderMap,
    Json(body): Json<OrganizationPayload>,
) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;
    ctx.require_admin()?;

    let org = find_active(&state, id).await?;
    let before = org.snapshot();

    if let Some(type_id) = body.type_id {
        validated_type(&state, type_id).await?;
    }

    let mut active = org.clone().into_active_model();
    if let Some(name) = body.name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(ServerError::field("nombre", "Este campo es obligatorio."));
        }
        active.name = Set(name);
    }
    if let Some(type_id) = body.type_id {
        active.type_id = Set(type_id);
    }
    if let Some(v) = body.tax_id {
        active.tax_id = Set(v);
    }
    if let Some(v) = body.address {
        active.address = Set(v);
    }
    if let Some(v) = body.commune {
        active.commune = Set(v);
    }
    if let Some(v) = body.region {
        active.region = Set(v);
    }
    if let Some(v) = body.phone {
        active.phone = Set(v);
    }
    if let Some(v) = body.contact_email {
        active.contact_email = Set(v);
    }
    if let Some(v) = body.website {
        active.website = Set(v);
    }
    active.updated_at = Set(now_ts());
    let updated = active.update(&state.db).await?;

    audit::record_updated(
        &state.db,
        &ctx.meta,
        AuditTarget::Organization(updated.id),
        &updated.name,
        &before,
        &updated.snapshot(),
    )
    .await;

    let names = type_names(&state).await?;
    Ok(Json(row(&updated, &names)).into_response())
}

/// DELETE /api/organizations/:id (soft)
pub async fn destroy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    headers: HeaderMap,
) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;
    ctx.require_admin()?;

    let org = find_active(&state, id).await?;
    let name = org.name.clone();

    let mut active = org.into_active_model();
    active.is_active = Set(false);
    active.updated_at = Set(now_ts());
    active.update(&state.db).await?;

    audit::record_deleted(&state.db, &ctx.meta, AuditTarget::Organization(id), &name).await;

    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Serialize)]
pub struct TypeRow {
    pub id: i32,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "descripcion")]
    pub description: String,
}

/// GET /api/organization-types
pub async fn list_types(State(state): State<Arc<AppState>>) -> Result<Response> {
    let rows: Vec<TypeRow> = organization_type::Entity::find()
        .filter(organization_type::Column::IsActive.eq(true))
        .order_by_asc(organization_type::Column::Name)
        .all(&state.db)
        .await?
        .into_iter()
        .map(|t| TypeRow { id: t.id, name: t.name, description: t.description })
        .collect();
    Ok(Json(rows).into_response())
}

#[derive(Deserialize)]
pub struct ContactPayload {
    #[serde(rename = "nombres")]
    pub first_name: String,
    #[serde(rename = "apellidos")]
    pub last_name: String,
    #[serde(rename = "cargo", default)]
    pub position: Option<String>,
    pub email: String,
    #[serde(rename = "telefono", default)]
    pub phone: Option<String>,
    #[serde(rename = "es_principal", default)]
    pub is_primary: bool,
}

/// GET /api/organizations/:id/contacts
pub async fn list_contacts(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    headers: HeaderMap,
) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;
    ctx.require_admin()?;
    find_active(&state, id).await?;

    let rows = contact::Entity::find()
        .filter(contact::Column::OrganizationId.eq(id))
        .filter(contact::Column::IsActive.eq(true))
        .order_by_asc(contact::Column::LastName)
        .all(&state.db)
        .await?;
    Ok(Json(rows).into_response())
}

/// POST /api/organizations/:id/contacts
pub async fn create_contact(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    headers: HeaderMap,
    Json(body): Json<ContactPayload>,
) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;
    ctx.require_admin()?;
    find_active(&state, id).await?;

    if body.first_name.trim().is_empty() {
        return Err(ServerError::field("nombres", "Este campo es obligatorio."));
    }

    let now = now_ts();
    let created = contact::ActiveModel {
        organization_id: Set(id),
        first_name: Set(body.first_name.trim().to_string()),
        last_name: Set(body.last_name.trim().to_string()),
        position: Set(body.position.unwrap_or_default()),
        email: Set(body.email),
        phone: Set(body.phone.unwrap_or_default()),
        is_primary: Set(body.is_primary),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(created)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fixtures;
    use crate::db::entities::audit_entry;
    use crate::domain::Role;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn test_soft_delete_keeps_row_and_audits() {
        let state = fixtures::state().await;
        let org = fixtures::organization(&state.db, "Municipalidad de Quintero").await;
        let headers = fixtures::login(&state, "admin", Role::SmaAdmin, None).await;

        let response =
            destroy(State(state.clone()), Path(org.id), headers).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        // Row survives with is_active cleared.
        let stored = organization::Entity::find_by_id(org.id)
            .one(&state.db)
            .await
            .unwrap()
            .unwrap();
        assert!(!stored.is_active);

        // Gone from the listing.
        let listing = list(State(state.clone())).await.unwrap();
        let body = to_bytes(listing.into_body(), usize::MAX).await.unwrap();
        let rows: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
        assert!(rows.iter().all(|r| r["id"] != org.id));

        // Audited as an elimination.
        let entries = audit_entry::Entity::find().all(&state.db).await.unwrap();
        assert!(entries
            .iter()
            .any(|e| e.action == "eliminacion" && e.target_kind.as_deref() == Some("organismo")));
    }

    #[tokio::test]
    async fn test_writes_require_admin() {
        let state = fixtures::state().await;
        let org = fixtures::organization(&state.db, "Org").await;
        let headers = fixtures::login(&state, "func", Role::Organism, Some(org.id)).await;

        let err = create(
            State(state.clone()),
            headers,
            Json(OrganizationPayload { name: Some("X".into()), type_id: Some(1), ..Default::default() }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServerError::Forbidden(_)));
    }
}
