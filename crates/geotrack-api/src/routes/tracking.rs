//! # Tracking Statistics and Retention
//!
//! Routes:
//! - GET    /v1/tracking/stats — Aggregate counters (supervisor)
//! - DELETE /v1/tracking/cleanup?days_to_keep=N — Retention sweep (admin)

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::routing::{delete, get};
use axum::Router;
use chrono::{DateTime, Utc};
use geotrack_engine::{CleanupReport, TrackingStats};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::auth::{require_role, CallerIdentity, Role};
use crate::envelope::Envelope;
use crate::error::AppError;
use crate::extractors::extract_query;
use crate::state::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    pub active_agents: u64,
    pub samples_last_24h: u64,
    pub open_violations: u64,
    pub avg_samples_per_agent: f64,
    pub generated_at: DateTime<Utc>,
}

impl From<TrackingStats> for StatsResponse {
    fn from(s: TrackingStats) -> Self {
        Self {
            active_agents: s.active_agents,
            samples_last_24h: s.samples_last_24h,
            open_violations: s.open_violations,
            avg_samples_per_agent: s.avg_samples_per_agent,
            generated_at: s.generated_at,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CleanupParams {
    /// Retention horizon in days. Defaults to the configured horizon.
    #[serde(default, alias = "daysToKeep")]
    pub days_to_keep: Option<u32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CleanupResponse {
    pub days_to_keep: u32,
    /// Rows recorded strictly before this instant were eligible.
    pub cutoff: DateTime<Utc>,
    pub samples_deleted: u64,
    pub validations_deleted: u64,
    pub deleted_count: u64,
}

impl From<CleanupReport> for CleanupResponse {
    fn from(r: CleanupReport) -> Self {
        Self {
            days_to_keep: r.days_to_keep,
            cutoff: r.cutoff,
            samples_deleted: r.samples_deleted,
            validations_deleted: r.validations_deleted,
            deleted_count: r.samples_deleted + r.validations_deleted,
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/tracking/stats", get(tracking_stats))
        .route("/v1/tracking/cleanup", delete(cleanup))
}

/// GET /v1/tracking/stats — Aggregate tracking counters.
#[utoipa::path(
    get,
    path = "/v1/tracking/stats",
    responses(
        (status = 200, description = "Tracking statistics", body = Envelope<StatsResponse>),
        (status = 403, description = "Supervisor role required", body = crate::error::ErrorBody),
    ),
    tag = "tracking"
)]
pub async fn tracking_stats(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Envelope<StatsResponse>, AppError> {
    require_role(&caller, Role::Supervisor)?;
    let stats = state.engine.queries().stats().await?;
    Ok(Envelope::ok(stats.into()))
}

/// DELETE /v1/tracking/cleanup — Run the retention sweep now.
#[utoipa::path(
    delete,
    path = "/v1/tracking/cleanup",
    params(CleanupParams),
    responses(
        (status = 200, description = "Rows removed", body = Envelope<CleanupResponse>),
        (status = 403, description = "Admin role required", body = crate::error::ErrorBody),
        (status = 422, description = "Horizon of zero days", body = crate::error::ErrorBody),
    ),
    tag = "tracking"
)]
pub async fn cleanup(
    State(state): State<AppState>,
    caller: CallerIdentity,
    params: Result<Query<CleanupParams>, QueryRejection>,
) -> Result<Envelope<CleanupResponse>, AppError> {
    require_role(&caller, Role::Admin)?;
    let days = extract_query(params)?
        .days_to_keep
        .unwrap_or(state.engine.config().retention_days);
    tracing::info!(days_to_keep = days, "retention sweep requested");
    let report = state.engine.janitor().cleanup(days).await?;
    Ok(Envelope::ok(report.into()))
}
