//! Per-request context: the authenticated actor (if any) and the metadata the
//! audit trail records. Extracted once at the top of each handler and passed
//! down explicitly.

use axum::http::{header, HeaderMap};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

use super::auth;
use super::AppState;
use crate::audit::RequestMeta;
use crate::db::entities::user;
use crate::domain::Role;
use crate::error::{Result, ServerError};

pub struct RequestContext {
    pub user: Option<user::Model>,
    pub role: Option<Role>,
    pub meta: RequestMeta,
}

impl RequestContext {
    /// The authenticated actor, or 401 for anonymous callers.
    pub fn actor(&self) -> Result<(&user::Model, Role)> {
        match (&self.user, self.role) {
            (Some(u), Some(r)) => Ok((u, r)),
            _ => Err(ServerError::AuthRequired),
        }
    }

    /// The actor, who must additionally hold an administrative role.
    pub fn require_admin(&self) -> Result<&user::Model> {
        let (actor, role) = self.actor()?;
        if !role.is_admin() {
            return Err(ServerError::Forbidden(
                "No tienes permisos para realizar esta acción".to_string(),
            ));
        }
        Ok(actor)
    }

    pub fn is_admin(&self) -> bool {
        self.role.map(|r| r.is_admin()).unwrap_or(false)
    }

    /// The organization an organism-role actor is scoped to.
    pub fn organization_scope(&self) -> Option<i32> {
        match (self.role, &self.user) {
            (Some(Role::Organism), Some(u)) => u.organization_id,
            _ => None,
        }
    }
}

/// Client IP: first entry of `x-forwarded-for` when present. The server sits
/// behind a reverse proxy in every deployment, so there is no socket fallback.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers.get("x-forwarded-for")?.to_str().ok()?;
    let first = forwarded.split(',').next()?.trim();
    if first.is_empty() {
        None
    } else {
        Some(first.to_string())
    }
}

pub fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

/// Resolve the request's actor and audit metadata.
///
/// A missing `Authorization` header means an anonymous caller; a header that
/// does not resolve to a live session is rejected rather than downgraded.
pub async fn extract(state: &AppState, headers: &HeaderMap) -> Result<RequestContext> {
    let mut account = None;

    if let Some(value) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        let token = auth::token_value(value);
        let user_id = state.auth.resolve(token).ok_or(ServerError::AuthRequired)?;
        let found = user::Entity::find_by_id(user_id)
            .filter(user::Column::IsActive.eq(true))
            .one(&state.db)
            .await?
            .ok_or(ServerError::AuthRequired)?;
        account = Some(found);
    }

    let role = match &account {
        Some(u) => Some(
            Role::parse(&u.role)
                .ok_or_else(|| ServerError::Internal(format!("unknown role '{}'", u.role)))?,
        ),
        None => None,
    };

    let meta = RequestMeta {
        user_id: account.as_ref().map(|u| u.id),
        ip: client_ip(headers),
        user_agent: user_agent(headers),
    };

    Ok(RequestContext { user: account, role, meta })
}
