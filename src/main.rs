//! SensorVault - telemetry storage with retention-based downsampling

mod backup;
mod cleaner;
mod config;
mod db;
mod error;
mod models;
mod retention;
mod routes;
mod scheduler;
mod service;
mod state;
mod tasks;

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::backup::{BackupTrigger, WebhookBackup};
use crate::config::Config;
use crate::db::Database;
use crate::routes::{cleanup, health};
use crate::scheduler::JobScheduler;
use crate::service::CleanupService;
use crate::state::AppState;
use crate::tasks::cleanup::scheduled_cleanup_task;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sensor_vault=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let listen_addr: SocketAddr = config
        .listen_addr
        .parse()
        .expect("Invalid listen_addr in settings");

    // The schedule was validated at config load time.
    let schedule = match config.cleanup.parse_schedule() {
        Ok(schedule) => schedule,
        Err(e) => {
            error!(error = %e, "Invalid cleanup schedule");
            std::process::exit(1);
        }
    };

    // Connect to database
    let db = match Database::new(&config.database_url).await {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            std::process::exit(1);
        }
    };
    if let Err(e) = db.migrate().await {
        error!(error = %e, "Failed to migrate database schema");
        std::process::exit(1);
    }
    let db = Arc::new(db);

    // Optional backup webhook
    let backup_trigger: Option<Arc<dyn BackupTrigger>> = match &config.backup {
        Some(backup) => match WebhookBackup::new(backup.url.clone()) {
            Ok(webhook) => Some(Arc::new(webhook)),
            Err(e) => {
                warn!(error = %e, "Backup webhook disabled");
                None
            }
        },
        None => None,
    };

    // Create application state
    let scheduler = Arc::new(JobScheduler::new(schedule.clone()));
    let cleanup_service = Arc::new(CleanupService::new(
        Arc::clone(&db),
        config.cleanup.clone(),
        backup_trigger,
    ));
    let state = AppState::new(Arc::clone(&db), Arc::clone(&scheduler), Arc::clone(&cleanup_service));

    // Spawn the scheduled cleanup task
    tokio::spawn(async move {
        scheduled_cleanup_task(schedule, scheduler, cleanup_service).await;
    });

    // Build router
    let app = Router::new()
        // Health (Kubernetes probes)
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        // Cleanup trigger and status
        .route("/api/v1/cleanup", post(cleanup::trigger_cleanup))
        .route("/api/v1/cleanup/status", get(cleanup::cleanup_status))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!(
        "SensorVault v{} starting on {}",
        env!("CARGO_PKG_VERSION"),
        listen_addr
    );
    info!(
        "Database: {}",
        config.database_url.split('@').last().unwrap_or("***")
    );
    info!(
        "Retention policies: {}",
        config.cleanup.retention_policies.len()
    );

    // Start server
    let listener = tokio::net::TcpListener::bind(listen_addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
