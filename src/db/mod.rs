//! SQLite persistence using SeaORM.

pub mod entities;

use std::path::Path;

use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr, Statement};

/// Current UTC time as epoch seconds, the timestamp representation used across
/// all tables.
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Initialize database connection and create tables
pub async fn init_database(db_path: &Path) -> Result<DatabaseConnection, DbErr> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
    tracing::info!("Connecting to database: {}", db_url);

    let db = Database::connect(&db_url).await?;
    create_tables(&db).await?;

    Ok(db)
}

/// In-memory database for tests.
pub async fn init_test_database() -> Result<DatabaseConnection, DbErr> {
    let db = Database::connect("sqlite::memory:").await?;
    create_tables(&db).await?;
    Ok(db)
}

async fn execute(db: &DatabaseConnection, sql: &str) -> Result<(), DbErr> {
    db.execute(Statement::from_string(db.get_database_backend(), sql.to_string()))
        .await?;
    Ok(())
}

/// Create all tables if they don't exist
async fn create_tables(db: &DatabaseConnection) -> Result<(), DbErr> {
    execute(
        db,
        r#"
        CREATE TABLE IF NOT EXISTS organization_types (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .await?;

    execute(
        db,
        r#"
        CREATE TABLE IF NOT EXISTS organizations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            type_id INTEGER NOT NULL,
            tax_id TEXT NOT NULL DEFAULT '',
            address TEXT NOT NULL DEFAULT '',
            commune TEXT NOT NULL DEFAULT '',
            region TEXT NOT NULL DEFAULT '',
            phone TEXT NOT NULL DEFAULT '',
            contact_email TEXT NOT NULL DEFAULT '',
            website TEXT NOT NULL DEFAULT '',
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (type_id) REFERENCES organization_types(id)
        )
        "#,
    )
    .await?;

    execute(
        db,
        r#"
        CREATE TABLE IF NOT EXISTS contacts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            organization_id INTEGER NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            position TEXT NOT NULL DEFAULT '',
            email TEXT NOT NULL,
            phone TEXT NOT NULL DEFAULT '',
            is_primary INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (organization_id) REFERENCES organizations(id) ON DELETE CASCADE
        )
        "#,
    )
    .await?;

    execute(
        db,
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL DEFAULT '',
            full_name TEXT NOT NULL DEFAULT '',
            email TEXT NOT NULL DEFAULT '',
            position TEXT NOT NULL DEFAULT '',
            phone TEXT NOT NULL DEFAULT '',
            role TEXT NOT NULL DEFAULT 'ciudadano',
            organization_id INTEGER,
            email_notifications INTEGER NOT NULL DEFAULT 1,
            system_notifications INTEGER NOT NULL DEFAULT 1,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (organization_id) REFERENCES organizations(id)
        )
        "#,
    )
    .await?;
    execute(db, "CREATE INDEX IF NOT EXISTS idx_users_org ON users(organization_id)").await?;
    execute(db, "CREATE INDEX IF NOT EXISTS idx_users_role ON users(role)").await?;

    execute(
        db,
        r#"
        CREATE TABLE IF NOT EXISTS components (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            code TEXT NOT NULL DEFAULT '',
            color TEXT NOT NULL DEFAULT '',
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .await?;

    execute(
        db,
        r#"
        CREATE TABLE IF NOT EXISTS measures (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            component_id INTEGER NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pendiente',
            priority TEXT NOT NULL DEFAULT 'media',
            progress_percent REAL NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (component_id) REFERENCES components(id) ON DELETE CASCADE
        )
        "#,
    )
    .await?;
    execute(db, "CREATE INDEX IF NOT EXISTS idx_measures_component ON measures(component_id)")
        .await?;
    execute(db, "CREATE INDEX IF NOT EXISTS idx_measures_status ON measures(status)").await?;

    execute(
        db,
        r#"
        CREATE TABLE IF NOT EXISTS assignments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            measure_id INTEGER NOT NULL,
            organization_id INTEGER NOT NULL,
            is_coordinator INTEGER NOT NULL DEFAULT 0,
            responsibility TEXT NOT NULL DEFAULT '',
            assigned_on TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (measure_id) REFERENCES measures(id) ON DELETE CASCADE,
            FOREIGN KEY (organization_id) REFERENCES organizations(id) ON DELETE CASCADE,
            UNIQUE(measure_id, organization_id)
        )
        "#,
    )
    .await?;
    execute(db, "CREATE INDEX IF NOT EXISTS idx_assignments_measure ON assignments(measure_id)")
        .await?;
    execute(db, "CREATE INDEX IF NOT EXISTS idx_assignments_org ON assignments(organization_id)")
        .await?;

    execute(
        db,
        r#"
        CREATE TABLE IF NOT EXISTS progress_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            measure_id INTEGER NOT NULL,
            organization_id INTEGER NOT NULL,
            record_date TEXT NOT NULL,
            progress_percent REAL NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            evidence_path TEXT,
            created_by INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (measure_id) REFERENCES measures(id) ON DELETE CASCADE,
            FOREIGN KEY (organization_id) REFERENCES organizations(id) ON DELETE CASCADE,
            FOREIGN KEY (created_by) REFERENCES users(id) ON DELETE SET NULL
        )
        "#,
    )
    .await?;
    execute(
        db,
        "CREATE INDEX IF NOT EXISTS idx_progress_measure ON progress_records(measure_id)",
    )
    .await?;
    execute(
        db,
        "CREATE INDEX IF NOT EXISTS idx_progress_org ON progress_records(organization_id)",
    )
    .await?;

    execute(
        db,
        r#"
        CREATE TABLE IF NOT EXISTS audit_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER,
            at INTEGER NOT NULL,
            action TEXT NOT NULL,
            description TEXT NOT NULL,
            target_kind TEXT,
            target_id INTEGER,
            ip TEXT,
            user_agent TEXT NOT NULL DEFAULT '',
            extra TEXT,
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE SET NULL
        )
        "#,
    )
    .await?;
    execute(
        db,
        "CREATE INDEX IF NOT EXISTS idx_audit_target ON audit_entries(target_kind, target_id)",
    )
    .await?;

    execute(
        db,
        r#"
        CREATE TABLE IF NOT EXISTS change_details (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            audit_entry_id INTEGER NOT NULL,
            field TEXT NOT NULL,
            old_value TEXT,
            new_value TEXT,
            FOREIGN KEY (audit_entry_id) REFERENCES audit_entries(id) ON DELETE CASCADE
        )
        "#,
    )
    .await?;

    execute(
        db,
        r#"
        CREATE TABLE IF NOT EXISTS audit_configs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            target_kind TEXT NOT NULL UNIQUE,
            log_create INTEGER NOT NULL DEFAULT 1,
            log_update INTEGER NOT NULL DEFAULT 1,
            log_delete INTEGER NOT NULL DEFAULT 1,
            audited_fields TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .await?;

    execute(
        db,
        r#"
        CREATE TABLE IF NOT EXISTS notification_types (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            icon TEXT NOT NULL DEFAULT '',
            color TEXT NOT NULL DEFAULT '',
            is_active INTEGER NOT NULL DEFAULT 1,
            for_superadmin INTEGER NOT NULL DEFAULT 0,
            for_admin_sma INTEGER NOT NULL DEFAULT 0,
            for_organisms INTEGER NOT NULL DEFAULT 0,
            for_citizens INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .await?;

    execute(
        db,
        r#"
        CREATE TABLE IF NOT EXISTS notifications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            type_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            message TEXT NOT NULL,
            link TEXT NOT NULL DEFAULT '',
            measure_id INTEGER,
            organization_id INTEGER,
            sent_at INTEGER NOT NULL,
            is_read INTEGER NOT NULL DEFAULT 0,
            read_at INTEGER,
            email_sent INTEGER NOT NULL DEFAULT 0,
            email_sent_at INTEGER,
            FOREIGN KEY (type_id) REFERENCES notification_types(id) ON DELETE CASCADE,
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
        )
        "#,
    )
    .await?;
    execute(
        db,
        "CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, is_read)",
    )
    .await?;

    execute(
        db,
        r#"
        CREATE TABLE IF NOT EXISTS notification_configs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL UNIQUE,
            receive_email INTEGER NOT NULL DEFAULT 1,
            receive_system INTEGER NOT NULL DEFAULT 1,
            email_frequency TEXT NOT NULL DEFAULT 'inmediata',
            enabled_types TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
        )
        "#,
    )
    .await?;

    execute(
        db,
        r#"
        CREATE TABLE IF NOT EXISTS report_types (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            slug TEXT NOT NULL UNIQUE,
            is_active INTEGER NOT NULL DEFAULT 1,
            is_public INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .await?;

    execute(
        db,
        r#"
        CREATE TABLE IF NOT EXISTS reports (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            type_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            params TEXT,
            requested_at INTEGER NOT NULL,
            generated_at INTEGER,
            status TEXT NOT NULL DEFAULT 'pendiente',
            error_message TEXT NOT NULL DEFAULT '',
            file_path TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            requested_by INTEGER,
            is_public INTEGER NOT NULL DEFAULT 0,
            download_count INTEGER NOT NULL DEFAULT 0,
            organization_id INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (type_id) REFERENCES report_types(id) ON DELETE CASCADE,
            FOREIGN KEY (requested_by) REFERENCES users(id) ON DELETE SET NULL
        )
        "#,
    )
    .await?;

    Ok(())
}

/// Seed the rows the API exposes read-only. Idempotent.
pub async fn seed_defaults(db: &DatabaseConnection) -> Result<(), DbErr> {
    use entities::report_type;
    use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};

    let defaults = [
        ("Reporte de Avance Global", "avance_global", true),
        ("Reporte de Avance por Organismo", "avance_organismo", false),
    ];

    for (name, slug, is_public) in defaults {
        let existing = report_type::Entity::find()
            .filter(report_type::Column::Slug.eq(slug))
            .one(db)
            .await?;
        if existing.is_some() {
            continue;
        }
        let now = now_ts();
        report_type::ActiveModel {
            name: Set(name.to_string()),
            description: Set(String::new()),
            slug: Set(slug.to_string()),
            is_active: Set(true),
            is_public: Set(is_public),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{EntityTrait, PaginatorTrait};

    #[tokio::test]
    async fn test_seed_defaults_is_idempotent() {
        let db = init_test_database().await.unwrap();
        seed_defaults(&db).await.unwrap();
        seed_defaults(&db).await.unwrap();
        let count = entities::report_type::Entity::find().count(&db).await.unwrap();
        assert_eq!(count, 2);
    }
}
