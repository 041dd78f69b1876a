//! # geotrack-api — HTTP Service for the Tracking Engine
//!
//! Axum front end over [`geotrack_engine::TrackingEngine`]: agents report
//! positions, supervisors watch live locations and violations, admins
//! manage site zones and retention.
//!
//! ## API Surface
//!
//! | Prefix                        | Module                   | Domain                 |
//! |-------------------------------|--------------------------|------------------------|
//! | `/v1/locations*`              | [`routes::locations`]    | Ingestion, live view   |
//! | `/v1/agents/{id}/history`     | [`routes::locations`]    | Position history       |
//! | `/v1/geofences/validate`      | [`routes::geofences`]    | Ad hoc containment     |
//! | `/v1/sites/{id}/geofences*`   | [`routes::geofences`]    | Zone administration    |
//! | `/v1/violations*`             | [`routes::violations`]   | Violation review       |
//! | `/v1/tracking/*`              | [`routes::tracking`]     | Stats and retention    |
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! TraceLayer → MetricsMiddleware → AuthMiddleware → Handler
//! ```
//!
//! ## OpenAPI
//!
//! Generated with utoipa derive macros, served at `/openapi.json`.

pub mod auth;
pub mod db;
pub mod envelope;
pub mod error;
pub mod extractors;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod state;

pub use error::AppError;
pub use state::{AppConfig, AppState};

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, StatusCode};
use axum::middleware::from_fn;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Router};
use tower_http::trace::TraceLayer;

use crate::auth::AuthConfig;

/// Location reports are small; zone replacement is the largest body.
const BODY_LIMIT_BYTES: usize = 1024 * 1024;

/// Assemble the full application router with all routes and middleware.
///
/// Health probes (`/health/*`) and `/metrics` are mounted outside the auth
/// middleware so they remain accessible without credentials.
pub fn app(state: AppState) -> Router {
    let auth_config = AuthConfig {
        token: state.config.auth_token.clone(),
    };
    let metrics_on = state.config.metrics_enabled;

    let mut api = Router::new()
        .merge(routes::locations::router())
        .merge(routes::geofences::router())
        .merge(routes::violations::router())
        .merge(routes::tracking::router())
        .merge(openapi::router())
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(from_fn(auth::auth_middleware));

    if metrics_on {
        api = api.layer(from_fn(middleware::metrics::metrics_middleware));
    }

    let api = api
        .layer(TraceLayer::new_for_http())
        .layer(Extension(auth_config))
        .with_state(state.clone());

    let mut unauthenticated = Router::new()
        .route("/health/liveness", get(liveness))
        .route("/health/readiness", get(readiness));

    if metrics_on && state.prometheus.is_some() {
        unauthenticated = unauthenticated.route("/metrics", get(prometheus_metrics));
    }

    let unauthenticated = unauthenticated.with_state(state);

    Router::new().merge(unauthenticated).merge(api)
}

/// GET /metrics — Prometheus scrape endpoint.
async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.prometheus {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

/// Liveness probe — always returns 200 if the process is running.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe.
///
/// Fails when the evaluation dispatcher has shut down or the database
/// (when configured) does not answer.
async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    if state.engine.dispatcher().is_closed() {
        return (StatusCode::SERVICE_UNAVAILABLE, "evaluation workers stopped").into_response();
    }

    if let Some(pool) = &state.db_pool {
        if let Err(e) = sqlx::query("SELECT 1").execute(pool).await {
            tracing::warn!("Database health check failed: {e}");
            return (StatusCode::SERVICE_UNAVAILABLE, "database unreachable").into_response();
        }
    }

    (StatusCode::OK, "ready").into_response()
}
