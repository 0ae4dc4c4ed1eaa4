//! Audit trail.
//!
//! Every create/update/delete of a domain entity is recorded through the
//! explicit functions here, called by the write path right after a successful
//! save. The request context (acting user, client IP, user agent) is threaded
//! in as an argument; nothing is stashed on entity instances.
//!
//! Audit writes are best-effort: a failure is logged for operators and never
//! fails or rolls back the triggering business operation.

mod snapshot;

pub use snapshot::AuditSnapshot;

use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
};

use crate::db::entities::{audit_config, audit_entry, change_detail};
use crate::db::now_ts;
use crate::domain::AuditAction;

/// Reference to the audited row. A closed set of target kinds instead of a
/// free-form (type, id) pointer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AuditTarget {
    Measure(i32),
    Organization(i32),
    User(i32),
    ProgressRecord(i32),
    Assignment(i32),
    Report(i32),
}

impl AuditTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            AuditTarget::Measure(_) => "medida",
            AuditTarget::Organization(_) => "organismo",
            AuditTarget::User(_) => "usuario",
            AuditTarget::ProgressRecord(_) => "registro_avance",
            AuditTarget::Assignment(_) => "asignacion_medida",
            AuditTarget::Report(_) => "reporte",
        }
    }

    pub fn id(&self) -> i32 {
        match self {
            AuditTarget::Measure(id)
            | AuditTarget::Organization(id)
            | AuditTarget::User(id)
            | AuditTarget::ProgressRecord(id)
            | AuditTarget::Assignment(id)
            | AuditTarget::Report(id) => *id,
        }
    }

    /// Human-readable singular label used in descriptions.
    pub fn label(&self) -> &'static str {
        match self {
            AuditTarget::Measure(_) => "Medida",
            AuditTarget::Organization(_) => "Organismo",
            AuditTarget::User(_) => "Usuario",
            AuditTarget::ProgressRecord(_) => "Registro de avance",
            AuditTarget::Assignment(_) => "Asignación de medida",
            AuditTarget::Report(_) => "Reporte",
        }
    }

    /// Critical kinds get a default audit config auto-created on first sight;
    /// everything else is silently skipped until configured by hand.
    fn is_critical(&self) -> bool {
        matches!(
            self,
            AuditTarget::Measure(_)
                | AuditTarget::Organization(_)
                | AuditTarget::User(_)
                | AuditTarget::ProgressRecord(_)
        )
    }
}

/// Request-scoped context for audit writes. `user_id = None` means "system".
#[derive(Clone, Debug, Default)]
pub struct RequestMeta {
    pub user_id: Option<i32>,
    pub ip: Option<String>,
    pub user_agent: String,
}

impl RequestMeta {
    pub fn system() -> Self {
        Self::default()
    }
}

/// Record a create event for `target`. Best-effort.
pub async fn record_created(
    db: &DatabaseConnection,
    meta: &RequestMeta,
    target: AuditTarget,
    display: &str,
) {
    let description = format!("Creación de {}: {}", target.label(), display_or_fallback(target, display));
    if let Err(e) = try_record(db, meta, AuditAction::Create, target, description, None, None).await
    {
        tracing::warn!("audit write failed for {} #{}: {e}", target.kind(), target.id());
    }
}

/// Record an update event for `target`, diffing the field snapshots captured
/// before and after the save. Best-effort.
pub async fn record_updated(
    db: &DatabaseConnection,
    meta: &RequestMeta,
    target: AuditTarget,
    display: &str,
    before: &[(&'static str, Option<String>)],
    after: &[(&'static str, Option<String>)],
) {
    let description = format!(
        "Modificación de {}: {}",
        target.label(),
        display_or_fallback(target, display)
    );
    if let Err(e) =
        try_record(db, meta, AuditAction::Update, target, description, Some((before, after)), None)
            .await
    {
        tracing::warn!("audit write failed for {} #{}: {e}", target.kind(), target.id());
    }
}

/// Record a delete (including soft-delete) event for `target`. Best-effort.
pub async fn record_deleted(
    db: &DatabaseConnection,
    meta: &RequestMeta,
    target: AuditTarget,
    display: &str,
) {
    let description = format!(
        "Eliminación de {}: {}",
        target.label(),
        display_or_fallback(target, display)
    );
    if let Err(e) = try_record(db, meta, AuditAction::Delete, target, description, None, None).await
    {
        tracing::warn!("audit write failed for {} #{}: {e}", target.kind(), target.id());
    }
}

/// Record a non-CRUD event (login, logout, download, api_call). These are not
/// subject to per-kind configuration. Best-effort.
pub async fn record_action(
    db: &DatabaseConnection,
    meta: &RequestMeta,
    action: AuditAction,
    description: String,
    target: Option<AuditTarget>,
    extra: Option<serde_json::Value>,
) {
    let entry = audit_entry::ActiveModel {
        user_id: Set(meta.user_id),
        at: Set(now_ts()),
        action: Set(action.as_str().to_string()),
        description: Set(description),
        target_kind: Set(target.map(|t| t.kind().to_string())),
        target_id: Set(target.map(|t| t.id())),
        ip: Set(meta.ip.clone()),
        user_agent: Set(meta.user_agent.clone()),
        extra: Set(extra.map(|v| v.to_string())),
        ..Default::default()
    };
    if let Err(e) = entry.insert(db).await {
        tracing::warn!("audit write failed for action {}: {e}", action.as_str());
    }
}

fn display_or_fallback(target: AuditTarget, display: &str) -> String {
    if display.trim().is_empty() {
        format!("{} #{}", target.label(), target.id())
    } else {
        display.to_string()
    }
}

/// Look up the audit config for a target kind, auto-creating the default for
/// critical kinds. Returns `None` when the kind is not audited at all.
async fn config_for(
    db: &DatabaseConnection,
    target: AuditTarget,
) -> Result<Option<audit_config::Model>, DbErr> {
    let existing = audit_config::Entity::find()
        .filter(audit_config::Column::TargetKind.eq(target.kind()))
        .one(db)
        .await?;

    // A deactivated config means the kind was audited once and switched off;
    // it must not be resurrected by the critical-kind default.
    if let Some(config) = existing {
        return Ok(config.is_active.then_some(config));
    }
    if !target.is_critical() {
        return Ok(None);
    }

    let now = now_ts();
    let default = audit_config::ActiveModel {
        target_kind: Set(target.kind().to_string()),
        log_create: Set(true),
        log_update: Set(true),
        log_delete: Set(true),
        audited_fields: Set(None),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    match default.insert(db).await {
        Ok(config) => Ok(Some(config)),
        // Concurrent first-time audits race on the unique target_kind key;
        // treat the violation as "already configured" and refetch.
        Err(_) => Ok(audit_config::Entity::find()
            .filter(audit_config::Column::TargetKind.eq(target.kind()))
            .one(db)
            .await?
            .filter(|c| c.is_active)),
    }
}

type Snapshots<'a> =
    (&'a [(&'static str, Option<String>)], &'a [(&'static str, Option<String>)]);

async fn try_record(
    db: &DatabaseConnection,
    meta: &RequestMeta,
    action: AuditAction,
    target: AuditTarget,
    description: String,
    snapshots: Option<Snapshots<'_>>,
    extra: Option<serde_json::Value>,
) -> Result<(), DbErr> {
    let Some(config) = config_for(db, target).await? else {
        return Ok(());
    };

    let enabled = match action {
        AuditAction::Create => config.log_create,
        AuditAction::Update => config.log_update,
        AuditAction::Delete => config.log_delete,
        _ => true,
    };
    if !enabled {
        return Ok(());
    }

    let entry = audit_entry::ActiveModel {
        user_id: Set(meta.user_id),
        at: Set(now_ts()),
        action: Set(action.as_str().to_string()),
        description: Set(description),
        target_kind: Set(Some(target.kind().to_string())),
        target_id: Set(Some(target.id())),
        ip: Set(meta.ip.clone()),
        user_agent: Set(meta.user_agent.clone()),
        extra: Set(extra.map(|v| v.to_string())),
        ..Default::default()
    };
    let entry = entry.insert(db).await?;

    if let Some((before, after)) = snapshots {
        let allowed = allowed_fields(&config);
        for (field, old, new) in diff_snapshots(before, after) {
            if let Some(allowed) = &allowed {
                if !allowed.iter().any(|f| f == field) {
                    continue;
                }
            }
            let detail = change_detail::ActiveModel {
                audit_entry_id: Set(entry.id),
                field: Set(field.to_string()),
                old_value: Set(old),
                new_value: Set(new),
                ..Default::default()
            };
            detail.insert(db).await?;
        }
    }

    Ok(())
}

/// Parse the configured field allow-list; `None` means "all fields".
fn allowed_fields(config: &audit_config::Model) -> Option<Vec<String>> {
    let raw = config.audited_fields.as_deref()?;
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(fields) if !fields.is_empty() => Some(fields),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!("unparseable audited_fields for {}: {e}", config.target_kind);
            None
        }
    }
}

/// Fields present in `after` whose value differs from `before`. Only changed
/// fields produce a delta.
fn diff_snapshots(
    before: &[(&'static str, Option<String>)],
    after: &[(&'static str, Option<String>)],
) -> Vec<(&'static str, Option<String>, Option<String>)> {
    after
        .iter()
        .filter_map(|(field, new)| {
            let old = before
                .iter()
                .find(|(f, _)| f == field)
                .map(|(_, v)| v.clone())
                .unwrap_or(None);
            if old != *new {
                Some((*field, old, new.clone()))
            } else {
                None
            }
        })
        .collect()
}
