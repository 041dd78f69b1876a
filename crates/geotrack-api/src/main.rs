//! # geotrack-api — Binary Entry Point
//!
//! Starts the Axum HTTP server over the tracking engine.
//! Binds to configurable port (default 8080).

use std::sync::Arc;

use anyhow::Context;
use geotrack_api::db::{self, PgRepository};
use geotrack_api::state::{AppConfig, AppState};
use geotrack_engine::{EngineConfig, InMemoryRepository, Repositories, TrackingEngine};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Structured tracing; LOG_FORMAT=json for log shippers.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = AppConfig::from_env().context("invalid service configuration")?;
    let engine_config = EngineConfig::from_env().context("invalid engine configuration")?;
    tracing::info!(?config, ?engine_config, "configuration loaded");

    let prometheus = if config.metrics_enabled {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("failed to install Prometheus recorder")?;
        geotrack_engine::telemetry::describe_metrics();
        geotrack_api::middleware::metrics::describe_metrics();
        Some(handle)
    } else {
        None
    };

    // Database pool is optional; absent means in-memory only.
    let db_pool = db::init_pool(config.database_url.as_deref())
        .await
        .map_err(|e| {
            tracing::error!("Database initialization failed: {e}");
            e
        })?;

    let repos = match &db_pool {
        Some(pool) => PgRepository::repositories(pool.clone()),
        None => Repositories::shared(Arc::new(InMemoryRepository::new())),
    };

    let engine = Arc::new(TrackingEngine::start(engine_config, repos));
    engine.spawn_retention();

    let mut state = AppState::new(Arc::clone(&engine), config.clone());
    if let Some(pool) = db_pool {
        state = state.with_db_pool(pool);
    }
    if let Some(handle) = prometheus {
        state = state.with_prometheus(handle);
    }

    let app = geotrack_api::app(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("geotrack API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    engine.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
