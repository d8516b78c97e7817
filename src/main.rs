//! schemaflow-migrate - Oracle/PostgreSQL to PostgreSQL migration service
//!
//! Copies table definitions and data from an Oracle or PostgreSQL source
//! schema into a PostgreSQL destination schema. Runs are started over HTTP,
//! execute in the background and publish a report that can be polled until
//! the run finishes.
//!
//! Per table, a run:
//! - introspects source and destination catalogs
//! - reconciles expected columns against source columns
//! - maps types and recreates backing sequences
//! - creates the destination table
//! - copies rows in transactional batches

mod config;
mod connection;
mod error;
mod introspection;
mod migration;
mod models;
mod routes;
mod state;

use crate::config::Settings;
use crate::routes::create_router;
use crate::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("🚀 Starting schemaflow-migrate...");

    let settings = Settings::load()?;
    info!(
        "📋 Configuration loaded (batch size {}, connect timeout {}s, ODBC driver '{}')",
        settings.migration.batch_size, settings.migration.connect_timeout_secs, settings.migration.odbc_driver
    );

    let state = Arc::new(AppState::new(settings.migration.clone()));
    let app = create_router(state, &settings);

    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("🌐 Server listening on http://{}", addr);
    info!("");
    info!("📚 API Endpoints:");
    info!("   GET  /health                       - Liveness check");
    info!("");
    info!("   ─── Endpoints ───");
    info!("   POST /api/connections/test         - Test a source or destination");
    info!("   POST /api/tables                   - List tables of a source schema");
    info!("   POST /api/compare                  - Compare source and destination schemas");
    info!("");
    info!("   ─── Migrations ───");
    info!("   POST /api/migrations               - Start a migration run");
    info!("   GET  /api/migrations               - List runs");
    info!("   GET  /api/migrations/{{id}}          - Run report");
    info!("   POST /api/migrations/{{id}}/cancel   - Cancel before the next table");
    info!("");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,schemaflow_migrate=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}
