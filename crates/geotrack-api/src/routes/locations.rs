//! # Location Ingestion and Tracking Queries
//!
//! Routes:
//! - POST /v1/locations — Record a position report
//! - GET  /v1/locations/current — Last known position of every active agent
//! - GET  /v1/agents/{agent_id}/history — Trajectory of one agent, newest first
//!
//! The ingest response only acknowledges storage. Geofence evaluation runs
//! afterwards on the engine's shard workers.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use geotrack_core::{AgentId, AgentStatus, LocationSample, SampleTelemetry, SiteId};
use geotrack_engine::{AgentLocationSnapshot, HistoryRequest, IngestReceipt, IngestRequest};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::{require_role, CallerIdentity, Role};
use crate::envelope::{Envelope, WithStatus};
use crate::error::AppError;
use crate::extractors::{extract_path, extract_query, extract_validated_json, Validate};
use crate::state::AppState;

// ── DTOs ────────────────────────────────────────────────────────────────────

/// A position report from a field agent.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RecordLocationRequest {
    /// Agent the report is for. Agents report for themselves and may omit
    /// it; supervisors and admins must name one.
    #[serde(default)]
    pub agent_id: Option<Uuid>,
    /// Site the agent is assigned to. Without a site the sample is stored
    /// but not validated.
    #[serde(default)]
    pub site_id: Option<Uuid>,
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in meters.
    #[serde(alias = "accuracy")]
    pub accuracy_m: f64,
    /// Device timestamp. Defaults to the receive time.
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "speed")]
    pub speed_mps: Option<f64>,
    #[serde(default, alias = "heading")]
    pub heading_deg: Option<f64>,
    /// Battery charge in percent.
    #[serde(default)]
    pub battery_level: Option<u8>,
    /// `ACTIVE`, `IDLE` or `OFFLINE`.
    #[serde(default)]
    pub status: Option<String>,
    /// Client-generated key that makes retries idempotent.
    #[serde(default)]
    pub dedup_key: Option<String>,
}

impl RecordLocationRequest {
    fn agent_status(&self) -> Result<AgentStatus, String> {
        match &self.status {
            Some(raw) => raw.trim().to_ascii_uppercase().parse(),
            None => Ok(AgentStatus::default()),
        }
    }
}

impl Validate for RecordLocationRequest {
    fn validate(&self) -> Result<(), String> {
        self.agent_status().map(|_| ())
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LocationReceiptResponse {
    pub sample_id: Uuid,
    pub agent_id: Uuid,
    pub accepted_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    /// Accuracy exceeded the trust ceiling; the sample is not validated.
    pub low_confidence: bool,
    /// The dedup key matched an earlier report; this is its receipt.
    pub duplicate: bool,
    /// `DISPATCHED` or the reason evaluation was skipped.
    pub validation: String,
}

impl From<IngestReceipt> for LocationReceiptResponse {
    fn from(r: IngestReceipt) -> Self {
        Self {
            sample_id: *r.sample_id.as_uuid(),
            agent_id: *r.agent_id.as_uuid(),
            accepted_at: r.accepted_at,
            recorded_at: r.recorded_at,
            low_confidence: r.low_confidence,
            duplicate: r.duplicate,
            validation: r.validation.as_str().to_string(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AgentLocationResponse {
    pub agent_id: Uuid,
    pub site_id: Option<Uuid>,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: f64,
    pub recorded_at: DateTime<Utc>,
    pub status: String,
    pub battery_level: Option<u8>,
    pub low_confidence: bool,
    /// `INSIDE` or `OUTSIDE` once the agent has been evaluated.
    pub containment: Option<String>,
    pub consecutive_outside: u32,
    pub open_violation_id: Option<Uuid>,
}

impl From<AgentLocationSnapshot> for AgentLocationResponse {
    fn from(s: AgentLocationSnapshot) -> Self {
        Self {
            agent_id: *s.agent_id.as_uuid(),
            site_id: s.site_id.map(|id| *id.as_uuid()),
            latitude: s.coordinate.latitude(),
            longitude: s.coordinate.longitude(),
            accuracy_m: s.accuracy_m,
            recorded_at: s.recorded_at,
            status: s.status.as_str().to_string(),
            battery_level: s.battery_level,
            low_confidence: s.low_confidence,
            containment: s.containment.map(|c| c.as_str().to_string()),
            consecutive_outside: s.consecutive_outside,
            open_violation_id: s.open_violation.map(|id| *id.as_uuid()),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SampleResponse {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub site_id: Option<Uuid>,
    pub recorded_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: f64,
    pub speed_mps: Option<f64>,
    pub heading_deg: Option<f64>,
    pub battery_level: Option<u8>,
    pub status: String,
    pub low_confidence: bool,
}

impl From<LocationSample> for SampleResponse {
    fn from(s: LocationSample) -> Self {
        Self {
            id: *s.id.as_uuid(),
            agent_id: *s.agent_id.as_uuid(),
            site_id: s.site_id.map(|id| *id.as_uuid()),
            recorded_at: s.recorded_at,
            received_at: s.received_at,
            latitude: s.coordinate.latitude(),
            longitude: s.coordinate.longitude(),
            accuracy_m: s.accuracy_m,
            speed_mps: s.telemetry.speed_mps,
            heading_deg: s.telemetry.heading_deg,
            battery_level: s.telemetry.battery_level,
            status: s.telemetry.status.as_str().to_string(),
            low_confidence: s.low_confidence,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryParams {
    /// Inclusive lower bound on `recorded_at`.
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `recorded_at`.
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    /// Page size. Values above the configured cap are clamped.
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HistoryResponse {
    pub agent_id: Uuid,
    pub count: usize,
    pub samples: Vec<SampleResponse>,
}

// ── Router ──────────────────────────────────────────────────────────────────

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/locations", post(record_location))
        .route("/v1/locations/current", get(current_locations))
        .route("/v1/agents/{agent_id}/history", get(agent_history))
}

/// Which agent a report is for. Agents cannot report for someone else.
fn reporting_agent(caller: &CallerIdentity, named: Option<Uuid>) -> Result<AgentId, AppError> {
    let named = named.map(AgentId::from);
    match (caller.role, caller.agent_id, named) {
        (Role::Agent, Some(own), Some(other)) if own != other => Err(AppError::Forbidden(
            "agents may only report their own location".into(),
        )),
        (Role::Agent, Some(own), _) => Ok(own),
        (_, _, Some(agent_id)) => Ok(agent_id),
        (_, _, None) => Err(AppError::Validation(
            "agent_id is required when reporting on behalf of an agent".into(),
        )),
    }
}

/// POST /v1/locations — Record a position report.
#[utoipa::path(
    post,
    path = "/v1/locations",
    request_body = RecordLocationRequest,
    responses(
        (status = 201, description = "Sample stored", body = Envelope<LocationReceiptResponse>),
        (status = 200, description = "Duplicate of an earlier report", body = Envelope<LocationReceiptResponse>),
        (status = 422, description = "Invalid sample", body = crate::error::ErrorBody),
        (status = 503, description = "Storage unavailable, retry", body = crate::error::ErrorBody),
        (status = 504, description = "Not acknowledged in time, retry", body = crate::error::ErrorBody),
    ),
    tag = "locations"
)]
pub async fn record_location(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<RecordLocationRequest>, JsonRejection>,
) -> Result<WithStatus<LocationReceiptResponse>, AppError> {
    require_role(&caller, Role::Agent)?;
    let req = extract_validated_json(body)?;
    let agent_id = reporting_agent(&caller, req.agent_id)?;
    let status = req.agent_status().map_err(AppError::Validation)?;

    let receipt = state
        .engine
        .ingestor()
        .ingest(IngestRequest {
            agent_id,
            site_id: req.site_id.map(SiteId::from),
            latitude: req.latitude,
            longitude: req.longitude,
            accuracy_m: req.accuracy_m,
            recorded_at: req.recorded_at,
            telemetry: SampleTelemetry {
                speed_mps: req.speed_mps,
                heading_deg: req.heading_deg,
                battery_level: req.battery_level,
                status,
            },
            dedup_key: req.dedup_key,
        })
        .await?;

    let code = if receipt.duplicate {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok(WithStatus(code, Envelope::ok(receipt.into())))
}

/// GET /v1/locations/current — Last known position of every active agent.
#[utoipa::path(
    get,
    path = "/v1/locations/current",
    responses(
        (status = 200, description = "Active agents, most recent first", body = Envelope<Vec<AgentLocationResponse>>),
        (status = 403, description = "Supervisor role required", body = crate::error::ErrorBody),
    ),
    tag = "locations"
)]
pub async fn current_locations(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Envelope<Vec<AgentLocationResponse>>, AppError> {
    require_role(&caller, Role::Supervisor)?;
    let snapshots = state.engine.queries().current_locations().await?;
    Ok(Envelope::ok(
        snapshots.into_iter().map(AgentLocationResponse::from).collect(),
    ))
}

/// GET /v1/agents/{agent_id}/history — Trajectory of one agent.
#[utoipa::path(
    get,
    path = "/v1/agents/{agent_id}/history",
    params(("agent_id" = Uuid, Path, description = "Agent ID"), HistoryParams),
    responses(
        (status = 200, description = "Samples, most recent first", body = Envelope<HistoryResponse>),
        (status = 403, description = "Another agent's history", body = crate::error::ErrorBody),
        (status = 422, description = "Start after end or zero limit", body = crate::error::ErrorBody),
    ),
    tag = "locations"
)]
pub async fn agent_history(
    State(state): State<AppState>,
    caller: CallerIdentity,
    path: Result<Path<Uuid>, PathRejection>,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<Envelope<HistoryResponse>, AppError> {
    let agent_id = AgentId::from(extract_path(path)?);
    if !caller.can_act_for(agent_id) {
        return Err(AppError::Forbidden(
            "agents may only read their own history".into(),
        ));
    }
    let params = extract_query(params)?;

    let samples = state
        .engine
        .queries()
        .history(
            agent_id,
            HistoryRequest {
                from: params.start,
                to: params.end,
                limit: params.limit,
            },
        )
        .await?;

    Ok(Envelope::ok(HistoryResponse {
        agent_id: *agent_id.as_uuid(),
        count: samples.len(),
        samples: samples.into_iter().map(SampleResponse::from).collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(id: AgentId) -> CallerIdentity {
        CallerIdentity {
            role: Role::Agent,
            agent_id: Some(id),
        }
    }

    #[test]
    fn agents_report_for_themselves() {
        let me = AgentId::new();
        assert_eq!(reporting_agent(&agent(me), None).unwrap(), me);
        assert_eq!(
            reporting_agent(&agent(me), Some(*me.as_uuid())).unwrap(),
            me
        );
        assert!(matches!(
            reporting_agent(&agent(me), Some(Uuid::new_v4())),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn supervisors_must_name_the_agent() {
        let caller = CallerIdentity {
            role: Role::Supervisor,
            agent_id: None,
        };
        assert!(matches!(
            reporting_agent(&caller, None),
            Err(AppError::Validation(_))
        ));
        let named = Uuid::new_v4();
        assert_eq!(
            reporting_agent(&caller, Some(named)).unwrap(),
            AgentId::from(named)
        );
    }

    #[test]
    fn status_is_case_insensitive_and_checked() {
        let mut req: RecordLocationRequest = serde_json::from_value(serde_json::json!({
            "latitude": 1.0, "longitude": 2.0, "accuracy": 5.0, "status": "idle"
        }))
        .unwrap();
        assert_eq!(req.agent_status().unwrap(), AgentStatus::Idle);
        req.status = Some("SLEEPING".into());
        assert!(req.validate().is_err());
    }
}
