//! # Geofence Checks and Zone Administration
//!
//! Routes:
//! - POST /v1/geofences/validate — "Am I allowed here?" check, persists nothing
//! - PUT  /v1/sites/{site_id}/geofences — Replace a site's zone set (admin)
//! - POST /v1/sites/{site_id}/geofences/invalidate — Drop a site's cached zones (admin)

use std::collections::HashSet;

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::routing::{post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use geotrack_core::{Coordinate, Geofence, GeofenceId, SiteId, ValidationError, ZoneShape};
use geotrack_engine::{AdHocCheck, ZoneCheck};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{require_role, CallerIdentity, Role};
use crate::envelope::Envelope;
use crate::error::AppError;
use crate::extractors::{extract_json, extract_path, extract_validated_json, Validate};
use crate::state::AppState;

/// Upper bound on zones in one replacement request.
pub const MAX_ZONES_PER_SITE: usize = 256;

// ── DTOs ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct CoordinateDto {
    pub latitude: f64,
    pub longitude: f64,
}

impl CoordinateDto {
    fn to_coordinate(self) -> Result<Coordinate, ValidationError> {
        Coordinate::new(self.latitude, self.longitude)
    }
}

impl From<Coordinate> for CoordinateDto {
    fn from(c: Coordinate) -> Self {
        Self {
            latitude: c.latitude(),
            longitude: c.longitude(),
        }
    }
}

/// Zone geometry on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ZoneShapeDto {
    Circle {
        center: CoordinateDto,
        radius_m: f64,
    },
    /// Vertices in ring order; the first vertex is not repeated.
    Polygon { vertices: Vec<CoordinateDto> },
}

impl ZoneShapeDto {
    fn into_shape(self) -> Result<ZoneShape, ValidationError> {
        match self {
            Self::Circle { center, radius_m } => ZoneShape::circle(center.to_coordinate()?, radius_m),
            Self::Polygon { vertices } => ZoneShape::polygon(
                vertices
                    .into_iter()
                    .map(CoordinateDto::to_coordinate)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        }
    }
}

impl From<&ZoneShape> for ZoneShapeDto {
    fn from(shape: &ZoneShape) -> Self {
        match shape {
            ZoneShape::Circle { center, radius_m } => Self::Circle {
                center: (*center).into(),
                radius_m: *radius_m,
            },
            ZoneShape::Polygon { vertices } => Self::Polygon {
                vertices: vertices.iter().copied().map(CoordinateDto::from).collect(),
            },
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ValidateLocationRequest {
    pub site_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ZoneCheckResponse {
    pub geofence_id: Uuid,
    pub label: String,
    pub result: String,
    pub distance_outside_m: f64,
}

impl From<ZoneCheck> for ZoneCheckResponse {
    fn from(c: ZoneCheck) -> Self {
        Self {
            geofence_id: *c.geofence_id.as_uuid(),
            label: c.label,
            result: c.result.as_str().to_string(),
            distance_outside_m: c.distance_outside_m,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ValidateLocationResponse {
    pub site_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    /// `INSIDE` when the point is in any active zone, or the site has none.
    pub result: String,
    pub allowed: bool,
    pub zones_configured: usize,
    /// Distance to the nearest zone, zero when inside.
    pub distance_outside_m: f64,
    pub zones: Vec<ZoneCheckResponse>,
}

impl From<AdHocCheck> for ValidateLocationResponse {
    fn from(c: AdHocCheck) -> Self {
        Self {
            site_id: *c.site_id.as_uuid(),
            latitude: c.coordinate.latitude(),
            longitude: c.coordinate.longitude(),
            result: c.result.as_str().to_string(),
            allowed: c.result.is_inside(),
            zones_configured: c.zones_configured,
            distance_outside_m: c.distance_outside_m,
            zones: c.zones.into_iter().map(ZoneCheckResponse::from).collect(),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ZoneInput {
    /// Keep an existing zone's id; a new id is generated when absent.
    #[serde(default)]
    pub id: Option<Uuid>,
    pub label: String,
    pub shape: ZoneShapeDto,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReplaceZonesRequest {
    pub zones: Vec<ZoneInput>,
}

impl Validate for ReplaceZonesRequest {
    fn validate(&self) -> Result<(), String> {
        if self.zones.len() > MAX_ZONES_PER_SITE {
            return Err(format!(
                "at most {MAX_ZONES_PER_SITE} zones per site, got {}",
                self.zones.len()
            ));
        }
        let mut seen = HashSet::new();
        for id in self.zones.iter().filter_map(|z| z.id) {
            if !seen.insert(id) {
                return Err(format!("zone id {id} appears more than once"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GeofenceResponse {
    pub id: Uuid,
    pub site_id: Uuid,
    pub label: String,
    pub shape: ZoneShapeDto,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

impl From<&Geofence> for GeofenceResponse {
    fn from(g: &Geofence) -> Self {
        Self {
            id: *g.id.as_uuid(),
            site_id: *g.site_id.as_uuid(),
            label: g.label.clone(),
            shape: (&g.shape).into(),
            active: g.active,
            updated_at: g.updated_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InvalidateResponse {
    pub site_id: Uuid,
    pub invalidated: bool,
}

// ── Router ──────────────────────────────────────────────────────────────────

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/geofences/validate", post(validate_location))
        .route("/v1/sites/{site_id}/geofences", put(replace_site_zones))
        .route(
            "/v1/sites/{site_id}/geofences/invalidate",
            post(invalidate_site_zones),
        )
}

/// POST /v1/geofences/validate — One-off containment check.
#[utoipa::path(
    post,
    path = "/v1/geofences/validate",
    request_body = ValidateLocationRequest,
    responses(
        (status = 200, description = "Containment result", body = Envelope<ValidateLocationResponse>),
        (status = 422, description = "Invalid coordinate", body = crate::error::ErrorBody),
        (status = 503, description = "Zone configuration unavailable", body = crate::error::ErrorBody),
    ),
    tag = "geofences"
)]
pub async fn validate_location(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<ValidateLocationRequest>, JsonRejection>,
) -> Result<Envelope<ValidateLocationResponse>, AppError> {
    require_role(&caller, Role::Agent)?;
    let req = extract_json(body)?;
    let coordinate = Coordinate::new(req.latitude, req.longitude)?;
    let check = state
        .engine
        .detector()
        .check(SiteId::from(req.site_id), coordinate)
        .await?;
    Ok(Envelope::ok(check.into()))
}

/// PUT /v1/sites/{site_id}/geofences — Replace the zone set of a site.
#[utoipa::path(
    put,
    path = "/v1/sites/{site_id}/geofences",
    params(("site_id" = Uuid, Path, description = "Site ID")),
    request_body = ReplaceZonesRequest,
    responses(
        (status = 200, description = "Stored zones", body = Envelope<Vec<GeofenceResponse>>),
        (status = 403, description = "Admin role required", body = crate::error::ErrorBody),
        (status = 422, description = "Invalid zone", body = crate::error::ErrorBody),
    ),
    tag = "geofences"
)]
pub async fn replace_site_zones(
    State(state): State<AppState>,
    caller: CallerIdentity,
    path: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<ReplaceZonesRequest>, JsonRejection>,
) -> Result<Envelope<Vec<GeofenceResponse>>, AppError> {
    require_role(&caller, Role::Admin)?;
    let site_id = SiteId::from(extract_path(path)?);
    let req = extract_validated_json(body)?;

    let mut zones = Vec::with_capacity(req.zones.len());
    for input in req.zones {
        let mut zone = Geofence::new(site_id, input.label, input.shape.into_shape()?)?;
        if let Some(id) = input.id {
            zone.id = GeofenceId::from(id);
        }
        zone.active = input.active;
        zones.push(zone);
    }
    let response = zones.iter().map(GeofenceResponse::from).collect();

    state.engine.replace_site_zones(site_id, zones).await?;
    Ok(Envelope::ok(response))
}

/// POST /v1/sites/{site_id}/geofences/invalidate — Drop cached zones.
#[utoipa::path(
    post,
    path = "/v1/sites/{site_id}/geofences/invalidate",
    params(("site_id" = Uuid, Path, description = "Site ID")),
    responses(
        (status = 200, description = "Cache entry dropped", body = Envelope<InvalidateResponse>),
        (status = 403, description = "Admin role required", body = crate::error::ErrorBody),
    ),
    tag = "geofences"
)]
pub async fn invalidate_site_zones(
    State(state): State<AppState>,
    caller: CallerIdentity,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Envelope<InvalidateResponse>, AppError> {
    require_role(&caller, Role::Admin)?;
    let site_id = SiteId::from(extract_path(path)?);
    state.engine.zones().invalidate(site_id);
    tracing::info!(site_id = %site_id, "zone cache invalidated");
    Ok(Envelope::ok(InvalidateResponse {
        site_id: *site_id.as_uuid(),
        invalidated: true,
    }))
}
