//! Notification fan-out.
//!
//! Explicit application-service calls invoked after a successful domain write
//! (new progress record, new assignment) plus the externally triggered
//! deadline sweep. Each notification is a per-user row, optionally mirrored by
//! email on a best-effort basis.

pub mod email;

pub use email::Mailer;

use chrono::{Duration, NaiveDate};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, Set,
};

use crate::db::entities::{
    assignment, measure, notification, notification_config, notification_type, organization, user,
};
use crate::db::now_ts;
use crate::domain::{MeasureStatus, Role};
use crate::error::Result;

/// How far ahead the deadline sweep looks.
const DEADLINE_WINDOW_DAYS: i64 = 30;

pub const TYPE_NEW_PROGRESS: &str = "nuevo_avance";
pub const TYPE_NEW_ASSIGNMENT: &str = "nueva_asignacion";
pub const TYPE_DEADLINE: &str = "medida_proxima_vencer";

/// Get or create a notification type by code with its default audience flags.
async fn ensure_type(
    db: &DatabaseConnection,
    code: &str,
) -> std::result::Result<notification_type::Model, DbErr> {
    if let Some(existing) = notification_type::Entity::find()
        .filter(notification_type::Column::Code.eq(code))
        .one(db)
        .await?
    {
        return Ok(existing);
    }

    let (name, description, icon, color, for_admin_sma, for_organisms) = match code {
        TYPE_NEW_PROGRESS => (
            "Nuevo avance registrado",
            "Se ha registrado un nuevo avance en una medida",
            "chart-line",
            "#28a745",
            true,
            false,
        ),
        TYPE_NEW_ASSIGNMENT => (
            "Nueva medida asignada",
            "Se ha asignado una nueva medida a tu organismo",
            "clipboard-check",
            "#007bff",
            false,
            true,
        ),
        TYPE_DEADLINE => (
            "Medida próxima a vencer",
            "Una medida está próxima a alcanzar su fecha límite",
            "clock",
            "#ffc107",
            true,
            true,
        ),
        other => (other, "", "", "", false, false),
    };

    let now = now_ts();
    let new_type = notification_type::ActiveModel {
        code: Set(code.to_string()),
        name: Set(name.to_string()),
        description: Set(description.to_string()),
        icon: Set(icon.to_string()),
        color: Set(color.to_string()),
        is_active: Set(true),
        for_superadmin: Set(false),
        for_admin_sma: Set(for_admin_sma),
        for_organisms: Set(for_organisms),
        for_citizens: Set(false),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    match new_type.insert(db).await {
        Ok(t) => Ok(t),
        // Lost a get-or-create race on the unique code; refetch.
        Err(_) => notification_type::Entity::find()
            .filter(notification_type::Column::Code.eq(code))
            .one(db)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("notification type {code}"))),
    }
}

async fn deliver(
    db: &DatabaseConnection,
    mailer: &Mailer,
    kind: &notification_type::Model,
    recipient: &user::Model,
    title: String,
    message: String,
    measure_id: Option<i32>,
    organization_id: Option<i32>,
) -> std::result::Result<(), DbErr> {
    let link = measure_id.map(|id| format!("/medidas/{id}/")).unwrap_or_default();
    let row = notification::ActiveModel {
        type_id: Set(kind.id),
        user_id: Set(recipient.id),
        title: Set(title),
        message: Set(message),
        link: Set(link),
        measure_id: Set(measure_id),
        organization_id: Set(organization_id),
        sent_at: Set(now_ts()),
        is_read: Set(false),
        read_at: Set(None),
        email_sent: Set(false),
        email_sent_at: Set(None),
        ..Default::default()
    };
    let row = row.insert(db).await?;
    mailer.dispatch(db.clone(), recipient.clone(), row);
    Ok(())
}

/// Fan out a "new progress record" event to every SMA admin. Best-effort: a
/// failed delivery is logged and does not fail the write that triggered it.
pub async fn notify_new_progress(
    db: &DatabaseConnection,
    mailer: &Mailer,
    m: &measure::Model,
    org: &organization::Model,
    progress_percent: f64,
) {
    if let Err(e) = try_notify_new_progress(db, mailer, m, org, progress_percent).await {
        tracing::warn!("notification fan-out failed for measure {}: {e}", m.code);
    }
}

async fn try_notify_new_progress(
    db: &DatabaseConnection,
    mailer: &Mailer,
    m: &measure::Model,
    org: &organization::Model,
    progress_percent: f64,
) -> std::result::Result<(), DbErr> {
    let kind = ensure_type(db, TYPE_NEW_PROGRESS).await?;
    let admins = user::Entity::find()
        .filter(user::Column::Role.eq(Role::SmaAdmin.as_str()))
        .filter(user::Column::IsActive.eq(true))
        .all(db)
        .await?;

    for admin in &admins {
        deliver(
            db,
            mailer,
            &kind,
            admin,
            format!("Nuevo avance en {}", m.code),
            format!(
                "El organismo {} ha registrado un avance del {}% en la medida {}.",
                org.name, progress_percent, m.name
            ),
            Some(m.id),
            Some(org.id),
        )
        .await?;
    }
    Ok(())
}

/// Fan out a "new assignment" event to every user of the assigned organization.
pub async fn notify_new_assignment(
    db: &DatabaseConnection,
    mailer: &Mailer,
    m: &measure::Model,
    org: &organization::Model,
) {
    if let Err(e) = try_notify_new_assignment(db, mailer, m, org).await {
        tracing::warn!("notification fan-out failed for assignment of {}: {e}", m.code);
    }
}

async fn try_notify_new_assignment(
    db: &DatabaseConnection,
    mailer: &Mailer,
    m: &measure::Model,
    org: &organization::Model,
) -> std::result::Result<(), DbErr> {
    let kind = ensure_type(db, TYPE_NEW_ASSIGNMENT).await?;
    let members = user::Entity::find()
        .filter(user::Column::OrganizationId.eq(org.id))
        .filter(user::Column::IsActive.eq(true))
        .all(db)
        .await?;

    for member in &members {
        deliver(
            db,
            mailer,
            &kind,
            member,
            format!("Nueva medida asignada: {}", m.code),
            format!(
                "Se ha asignado a tu organismo la medida '{}'. Fecha límite: {}",
                m.name,
                m.end_date.format("%d/%m/%Y")
            ),
            Some(m.id),
            Some(org.id),
        )
        .await?;
    }
    Ok(())
}

/// Deadline-approaching sweep. For every active, non-terminal measure whose end
/// date falls within the next 30 days, notify every user of every assigned
/// organization plus every SMA admin, skipping any (user, measure) pair that
/// already has an unread notification of this type.
///
/// Designed for single-owner invocation: the exists-then-create dedup check is
/// not atomic, so concurrent sweeps may duplicate a few rows.
pub async fn sweep_deadlines(
    db: &DatabaseConnection,
    mailer: &Mailer,
    today: NaiveDate,
) -> Result<usize> {
    let kind = ensure_type(db, TYPE_DEADLINE).await?;
    let horizon = today + Duration::days(DEADLINE_WINDOW_DAYS);

    let due = measure::Entity::find()
        .filter(measure::Column::IsActive.eq(true))
        .filter(measure::Column::EndDate.gt(today))
        .filter(measure::Column::EndDate.lte(horizon))
        .filter(
            measure::Column::Status
                .is_in([MeasureStatus::Pending.as_str(), MeasureStatus::InProgress.as_str()]),
        )
        .all(db)
        .await?;

    let admins = user::Entity::find()
        .filter(user::Column::Role.eq(Role::SmaAdmin.as_str()))
        .filter(user::Column::IsActive.eq(true))
        .all(db)
        .await?;

    let mut created = 0usize;
    for m in &due {
        let days_left = (m.end_date - today).num_days();
        let message = format!(
            "La medida '{}' vence en {} días. El avance actual es del {}%.",
            m.name, days_left, m.progress_percent
        );

        let assignments = assignment::Entity::find()
            .filter(assignment::Column::MeasureId.eq(m.id))
            .all(db)
            .await?;

        for a in &assignments {
            let members = user::Entity::find()
                .filter(user::Column::OrganizationId.eq(a.organization_id))
                .filter(user::Column::IsActive.eq(true))
                .all(db)
                .await?;
            for member in &members {
                if has_unread(db, &kind, member.id, m.id).await? {
                    continue;
                }
                deliver(
                    db,
                    mailer,
                    &kind,
                    member,
                    format!("Medida próxima a vencer: {}", m.code),
                    message.clone(),
                    Some(m.id),
                    Some(a.organization_id),
                )
                .await?;
                created += 1;
            }
        }

        for admin in &admins {
            if has_unread(db, &kind, admin.id, m.id).await? {
                continue;
            }
            deliver(
                db,
                mailer,
                &kind,
                admin,
                format!("Medida próxima a vencer: {}", m.code),
                message.clone(),
                Some(m.id),
                None,
            )
            .await?;
            created += 1;
        }
    }

    Ok(created)
}

async fn has_unread(
    db: &DatabaseConnection,
    kind: &notification_type::Model,
    user_id: i32,
    measure_id: i32,
) -> std::result::Result<bool, DbErr> {
    let count = notification::Entity::find()
        .filter(notification::Column::TypeId.eq(kind.id))
        .filter(notification::Column::UserId.eq(user_id))
        .filter(notification::Column::MeasureId.eq(measure_id))
        .filter(notification::Column::IsRead.eq(false))
        .count(db)
        .await?;
    Ok(count > 0)
}

/// Create the notification config for a new user, enabling the type codes
/// whose audience flags match the user's role.
pub async fn setup_user_config(
    db: &DatabaseConnection,
    u: &user::Model,
    role: Role,
) -> std::result::Result<(), DbErr> {
    let types = notification_type::Entity::find()
        .filter(notification_type::Column::IsActive.eq(true))
        .all(db)
        .await?;

    let enabled: Vec<&str> = types
        .iter()
        .filter(|t| match role {
            Role::SuperAdmin => t.for_superadmin,
            Role::SmaAdmin => t.for_admin_sma,
            Role::Organism => t.for_organisms,
            Role::Citizen => t.for_citizens,
        })
        .map(|t| t.code.as_str())
        .collect();

    let now = now_ts();
    let config = notification_config::ActiveModel {
        user_id: Set(u.id),
        receive_email: Set(u.email_notifications),
        receive_system: Set(u.system_notifications),
        email_frequency: Set("inmediata".to_string()),
        enabled_types: Set(serde_json::to_string(&enabled).unwrap_or_else(|_| "[]".to_string())),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    config.insert(db).await?;
    Ok(())
}
