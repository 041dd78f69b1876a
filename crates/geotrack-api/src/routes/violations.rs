//! # Geofence Violations
//!
//! Routes:
//! - GET  /v1/violations — List violations, newest first
//! - POST /v1/violations/{violation_id}/resolve — Close a violation (supervisor)

use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use geotrack_core::{AgentId, GeofenceViolation, SiteId, ViolationId};
use geotrack_engine::ViolationFilter;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::{require_role, CallerIdentity, Role};
use crate::envelope::Envelope;
use crate::error::AppError;
use crate::extractors::{extract_path, extract_query};
use crate::state::AppState;

const DEFAULT_LIST_LIMIT: usize = 100;

#[derive(Debug, Serialize, ToSchema)]
pub struct ViolationResponse {
    pub id: Uuid,
    pub agent_id: Uuid,
    /// Zone nearest to the sample that confirmed the excursion.
    pub geofence_id: Uuid,
    pub site_id: Uuid,
    pub sample_id: Uuid,
    pub distance_outside_m: f64,
    pub occurred_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    /// The agent is back inside and the violation awaits a supervisor.
    pub auto_resolvable: bool,
}

impl From<GeofenceViolation> for ViolationResponse {
    fn from(v: GeofenceViolation) -> Self {
        Self {
            id: *v.id.as_uuid(),
            agent_id: *v.agent_id.as_uuid(),
            geofence_id: *v.geofence_id.as_uuid(),
            site_id: *v.site_id.as_uuid(),
            sample_id: *v.sample_id.as_uuid(),
            distance_outside_m: v.distance_outside_m,
            occurred_at: v.occurred_at,
            resolved: v.resolved,
            resolved_at: v.resolved_at,
            auto_resolvable: v.auto_resolvable,
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListViolationsParams {
    /// Only unresolved violations.
    #[serde(default)]
    pub open: Option<bool>,
    #[serde(default)]
    pub agent_id: Option<Uuid>,
    #[serde(default)]
    pub site_id: Option<Uuid>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl ListViolationsParams {
    fn into_filter(self, max_limit: usize) -> Result<ViolationFilter, AppError> {
        let limit = self.limit.unwrap_or(DEFAULT_LIST_LIMIT);
        if limit == 0 {
            return Err(AppError::Validation("limit must be at least 1".into()));
        }
        Ok(ViolationFilter {
            open_only: self.open.unwrap_or(false),
            agent_id: self.agent_id.map(AgentId::from),
            site_id: self.site_id.map(SiteId::from),
            limit: limit.min(max_limit),
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ViolationListResponse {
    pub count: usize,
    pub violations: Vec<ViolationResponse>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/violations", get(list_violations))
        .route("/v1/violations/{violation_id}/resolve", post(resolve_violation))
}

/// GET /v1/violations — List violations.
#[utoipa::path(
    get,
    path = "/v1/violations",
    params(ListViolationsParams),
    responses(
        (status = 200, description = "Violations, most recent first", body = Envelope<ViolationListResponse>),
        (status = 403, description = "Supervisor role required", body = crate::error::ErrorBody),
    ),
    tag = "violations"
)]
pub async fn list_violations(
    State(state): State<AppState>,
    caller: CallerIdentity,
    params: Result<Query<ListViolationsParams>, QueryRejection>,
) -> Result<Envelope<ViolationListResponse>, AppError> {
    require_role(&caller, Role::Supervisor)?;
    let filter = extract_query(params)?.into_filter(state.engine.config().history_max_limit)?;
    let violations = state.engine.list_violations(&filter).await?;
    Ok(Envelope::ok(ViolationListResponse {
        count: violations.len(),
        violations: violations.into_iter().map(ViolationResponse::from).collect(),
    }))
}

/// POST /v1/violations/{violation_id}/resolve — Close a violation.
///
/// Resolving an already closed violation returns it unchanged.
#[utoipa::path(
    post,
    path = "/v1/violations/{violation_id}/resolve",
    params(("violation_id" = Uuid, Path, description = "Violation ID")),
    responses(
        (status = 200, description = "Resolved violation", body = Envelope<ViolationResponse>),
        (status = 403, description = "Supervisor role required", body = crate::error::ErrorBody),
        (status = 404, description = "Unknown violation", body = crate::error::ErrorBody),
    ),
    tag = "violations"
)]
pub async fn resolve_violation(
    State(state): State<AppState>,
    caller: CallerIdentity,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Envelope<ViolationResponse>, AppError> {
    require_role(&caller, Role::Supervisor)?;
    let id = ViolationId::from(extract_path(path)?);
    let violation = state.engine.resolve_violation(id).await?;
    Ok(Envelope::ok(violation.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_defaults_and_clamps() {
        let filter = ListViolationsParams::default().into_filter(1000).unwrap();
        assert!(!filter.open_only);
        assert_eq!(filter.limit, DEFAULT_LIST_LIMIT);

        let filter = ListViolationsParams {
            open: Some(true),
            limit: Some(5000),
            ..Default::default()
        }
        .into_filter(1000)
        .unwrap();
        assert!(filter.open_only);
        assert_eq!(filter.limit, 1000);
    }

    #[test]
    fn zero_limit_is_rejected() {
        let params = ListViolationsParams {
            limit: Some(0),
            ..Default::default()
        };
        assert!(matches!(params.into_filter(1000), Err(AppError::Validation(_))));
    }
}
