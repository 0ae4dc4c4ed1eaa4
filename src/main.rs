mod api;
mod audit;
mod config;
mod db;
mod domain;
mod error;
mod notify;
mod reports;
mod templates;

use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::AppState;
use config::Config;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ppda_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    let db_path = config.storage_path.join("ppda.db");
    let db = db::init_database(&db_path)
        .await
        .expect("Failed to initialize database");
    tracing::info!("Database initialized at {:?}", db_path);

    db::seed_defaults(&db)
        .await
        .expect("Failed to seed default rows");

    // Bootstrap admin (change the password after first login)
    api::auth::ensure_admin_user(&db, "admin", "admin")
        .await
        .expect("Failed to create admin user");

    let bind = config.bind;
    let state = Arc::new(AppState::new(config, db));

    let app = api::router(state).layer(TraceLayer::new_for_http());

    tracing::info!("PPDA server starting on http://{}", bind);
    tracing::info!("Default admin: admin/admin");

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .expect("Failed to bind address");
    axum::serve(listener, app).await.expect("Server error");
}
