//! Token authentication.
//!
//! Credentials live in the `users` table; issued tokens are opaque values held
//! in an in-memory session store. Restarting the server logs everyone out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use parking_lot::RwLock;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use super::context;
use super::AppState;
use crate::audit;
use crate::db::entities::user;
use crate::domain::AuditAction;
use crate::error::{Result, ServerError};

/// Hash a password with salt
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"ppda-server-salt:");
    hasher.update(password.as_bytes());
    let result = hasher.finalize();
    result.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Generate an opaque session token.
fn generate_token() -> String {
    let mut hasher = Sha256::new();

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    hasher.update(timestamp.to_le_bytes());

    let thread_id = std::thread::current().id();
    hasher.update(format!("{:?}", thread_id).as_bytes());

    let stack_addr = &timestamp as *const _ as usize;
    hasher.update(stack_addr.to_le_bytes());

    let result = hasher.finalize();
    BASE64.encode(&result[..24])
}

/// The token value of an `Authorization` header. Accepts `Token <t>`,
/// `Bearer <t>` or a bare token.
pub fn token_value(header: &str) -> &str {
    header
        .strip_prefix("Token ")
        .or_else(|| header.strip_prefix("Bearer "))
        .unwrap_or(header)
        .trim()
}

#[derive(Clone, Debug)]
struct Session {
    user_id: i32,
    expires_at: SystemTime,
}

impl Session {
    fn is_expired(&self) -> bool {
        SystemTime::now() > self.expires_at
    }
}

/// In-memory session store over database-backed credentials.
pub struct AuthManager {
    sessions: RwLock<HashMap<String, Session>>,
    token_ttl: Duration,
}

impl AuthManager {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            token_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Verify credentials against the `users` table and issue a token.
    pub async fn login(
        &self,
        db: &DatabaseConnection,
        username: &str,
        password: &str,
    ) -> Result<(String, user::Model)> {
        let account = user::Entity::find()
            .filter(user::Column::Username.eq(username))
            .filter(user::Column::IsActive.eq(true))
            .one(db)
            .await?
            .ok_or(ServerError::AuthFailed)?;

        if hash_password(password) != account.password_hash {
            return Err(ServerError::AuthFailed);
        }

        // Logins are rare enough to double as the expiry sweep.
        self.cleanup_expired();

        let token = generate_token();
        self.sessions.write().insert(
            token.clone(),
            Session {
                user_id: account.id,
                expires_at: SystemTime::now() + self.token_ttl,
            },
        );

        Ok((token, account))
    }

    /// Resolve a token to its user id, if the session is live.
    pub fn resolve(&self, token: &str) -> Option<i32> {
        let sessions = self.sessions.read();
        let session = sessions.get(token)?;
        if session.is_expired() {
            return None;
        }
        Some(session.user_id)
    }

    pub fn revoke(&self, token: &str) {
        self.sessions.write().remove(token);
    }

    pub fn cleanup_expired(&self) {
        self.sessions.write().retain(|_, s| !s.is_expired());
    }
}

impl Default for AuthManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Create the bootstrap superadmin account if no administrative user exists.
pub async fn ensure_admin_user(
    db: &DatabaseConnection,
    username: &str,
    password: &str,
) -> Result<()> {
    use crate::domain::Role;
    use sea_orm::{ActiveModelTrait, Set};

    let existing = user::Entity::find()
        .filter(user::Column::Role.is_in([Role::SuperAdmin.as_str(), Role::SmaAdmin.as_str()]))
        .filter(user::Column::IsActive.eq(true))
        .one(db)
        .await?;
    if existing.is_some() {
        return Ok(());
    }

    let now = crate::db::now_ts();
    let created = user::ActiveModel {
        username: Set(username.to_string()),
        password_hash: Set(hash_password(password)),
        full_name: Set("Administrador".to_string()),
        email: Set(String::new()),
        position: Set(String::new()),
        phone: Set(String::new()),
        role: Set(Role::SuperAdmin.as_str().to_string()),
        organization_id: Set(None),
        email_notifications: Set(false),
        system_notifications: Set(true),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;
    tracing::info!("Created bootstrap admin user '{}'", created.username);
    Ok(())
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<Response> {
    let (token, account) = state.auth.login(&state.db, &body.username, &body.password).await?;

    let meta = audit::RequestMeta {
        user_id: Some(account.id),
        ip: context::client_ip(&headers),
        user_agent: context::user_agent(&headers),
    };
    audit::record_action(
        &state.db,
        &meta,
        AuditAction::Login,
        format!("Inicio de sesión de {}", account.username),
        None,
        None,
    )
    .await;

    Ok(Json(json!({
        "token": token,
        "user_id": account.id,
        "username": account.username,
        "role": account.role,
    }))
    .into_response())
}

/// POST /api/auth/logout
pub async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Response> {
    let ctx = context::extract(&state, &headers).await?;
    let (actor, _) = ctx.actor()?;

    if let Some(value) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        state.auth.revoke(token_value(value));
    }

    audit::record_action(
        &state.db,
        &ctx.meta,
        AuditAction::Logout,
        format!("Cierre de sesión de {}", actor.username),
        None,
        None,
    )
    .await;

    Ok(StatusCode::NO_CONTENT.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fixtures;
    use crate::db::init_test_database;
    use crate::domain::Role;

    #[test]
    fn test_password_hash() {
        let hash1 = hash_password("test123");
        let hash2 = hash_password("test123");
        let hash3 = hash_password("different");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
    }

    #[test]
    fn test_token_value_formats() {
        assert_eq!(token_value("Token abc123"), "abc123");
        assert_eq!(token_value("Bearer abc123"), "abc123");
        assert_eq!(token_value("abc123"), "abc123");
    }

    #[tokio::test]
    async fn test_login_and_resolve() {
        let db = init_test_database().await.unwrap();
        let admin = fixtures::user(&db, "admin", Role::SmaAdmin, None).await;

        let auth = AuthManager::new();
        let (token, account) = auth.login(&db, "admin", "password123").await.unwrap();
        assert_eq!(account.id, admin.id);
        assert_eq!(auth.resolve(&token), Some(admin.id));

        auth.revoke(&token);
        assert_eq!(auth.resolve(&token), None);
    }

    #[tokio::test]
    async fn test_login_rejects_bad_credentials() {
        let db = init_test_database().await.unwrap();
        fixtures::user(&db, "admin", Role::SmaAdmin, None).await;

        let auth = AuthManager::new();
        assert!(matches!(
            auth.login(&db, "admin", "wrong").await,
            Err(ServerError::AuthFailed)
        ));
        assert!(matches!(
            auth.login(&db, "nobody", "password123").await,
            Err(ServerError::AuthFailed)
        ));
    }
}
