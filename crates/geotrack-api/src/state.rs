//! # Application State
//!
//! Shared state for the Axum application: the tracking engine, the
//! optional database pool, the Prometheus handle, and service configuration.

use std::sync::Arc;

use geotrack_engine::{EngineConfig, InMemoryRepository, TrackingEngine};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;
use thiserror::Error;

/// Error loading [`AppConfig`] from the environment.
#[derive(Error, Debug)]
pub enum AppConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: String, value: String },
}

/// HTTP service configuration.
#[derive(Clone)]
pub struct AppConfig {
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Shared bearer secret. `None` disables authentication.
    pub auth_token: Option<String>,
    /// Postgres connection string. `None` selects the in-memory repository.
    pub database_url: Option<String>,
    pub metrics_enabled: bool,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("metrics_enabled", &self.metrics_enabled)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            auth_token: None,
            database_url: None,
            metrics_enabled: true,
        }
    }
}

impl AppConfig {
    /// Read `PORT`, `AUTH_TOKEN`, `DATABASE_URL`, and
    /// `GEOTRACK_METRICS_ENABLED`.
    pub fn from_env() -> Result<Self, AppConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppConfigError> {
        let defaults = Self::default();
        let port = match lookup("PORT") {
            Some(raw) => raw.trim().parse().map_err(|_| AppConfigError::Invalid {
                var: "PORT".into(),
                value: raw,
            })?,
            None => defaults.port,
        };
        let metrics_enabled = lookup("GEOTRACK_METRICS_ENABLED")
            .map(|v| !v.trim().eq_ignore_ascii_case("false"))
            .unwrap_or(defaults.metrics_enabled);
        Ok(Self {
            port,
            auth_token: lookup("AUTH_TOKEN").filter(|t| !t.is_empty()),
            database_url: lookup("DATABASE_URL").filter(|u| !u.is_empty()),
            metrics_enabled,
        })
    }
}

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<TrackingEngine>,
    pub config: AppConfig,
    pub db_pool: Option<PgPool>,
    /// Installed by the binary. Without it `/metrics` is not mounted.
    pub prometheus: Option<PrometheusHandle>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("engine", &self.engine)
            .field("config", &self.config)
            .field("database", &self.db_pool.is_some())
            .field("prometheus", &self.prometheus.is_some())
            .finish()
    }
}

impl AppState {
    pub fn new(engine: Arc<TrackingEngine>, config: AppConfig) -> Self {
        Self {
            engine,
            config,
            db_pool: None,
            prometheus: None,
        }
    }

    /// State over a fresh in-memory engine. Must be called inside a Tokio
    /// runtime because the engine spawns its shard workers.
    pub fn in_memory(config: AppConfig, engine_config: EngineConfig) -> (Self, Arc<InMemoryRepository>) {
        let (engine, repo) = TrackingEngine::in_memory(engine_config);
        (Self::new(Arc::new(engine), config), repo)
    }

    pub fn with_db_pool(mut self, pool: PgPool) -> Self {
        self.db_pool = Some(pool);
        self
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }
}
