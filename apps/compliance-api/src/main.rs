//! Compliance API Server - fleet document compliance and alerting
//!
//! Provides REST endpoints for:
//! - Driver, batch and tenant compliance evaluation
//! - Alert candidates and idempotent alert reconciliation
//! - Compliance snapshots
//! - The multi-tenant cron sweep

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use compliance_engine::EngineConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

mod config;
mod error;
mod handlers;
mod models;
mod state;
mod store;
mod sweep;
#[cfg(test)]
mod test_support;

use config::ServerConfig;
use state::AppState;

fn app(state: Arc<AppState>) -> Router {
    // CORS configuration for dashboard clients
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handlers::health))
        // Rules
        .route("/api/tenants/:tenant/rules/:role", get(handlers::get_rules))
        // Evaluation
        .route(
            "/api/tenants/:tenant/drivers/:driver/compliance",
            get(handlers::evaluate_driver),
        )
        .route(
            "/api/tenants/:tenant/compliance/batch",
            post(handlers::evaluate_batch),
        )
        .route("/api/tenants/:tenant/compliance", get(handlers::evaluate_tenant))
        // Alerts
        .route(
            "/api/tenants/:tenant/alerts/candidates",
            get(handlers::alert_candidates),
        )
        .route(
            "/api/tenants/:tenant/alerts/reconcile",
            post(handlers::reconcile_alerts),
        )
        // Snapshots
        .route("/api/tenants/:tenant/snapshots", post(handlers::create_snapshot))
        .route("/api/tenants/:tenant/snapshots/all", post(handlers::snapshot_all))
        // Scheduled sweep
        .route("/api/cron/compliance", post(handlers::compliance_cron))
        // Add middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("compliance_api=info".parse()?)
                .add_directive("compliance_engine=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let engine_config = EngineConfig::from_env()?;
    info!(
        required_docs = ?engine_config.required_docs,
        alert_windows = ?engine_config.alert_windows,
        sweep_timeout_ms = config.sweep_timeout.as_millis() as u64,
        "Initializing Compliance API..."
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = Arc::new(AppState::new(config, engine_config).await?);
    let app = app(state);

    info!("Starting Compliance API on http://{}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
