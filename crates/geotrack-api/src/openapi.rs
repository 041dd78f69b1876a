//! # OpenAPI Specification Assembly
//!
//! Assembles the utoipa-documented routes into one OpenAPI document,
//! served at `/openapi.json`. Response envelopes are resolved from the
//! generic `Envelope<T>` bodies declared on each path.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "geotrack API",
        version = "0.1.0",
        description = "Agent location ingestion, live positions, geofence checks, violation handling, and retention."
    ),
    paths(
        // Locations
        crate::routes::locations::record_location,
        crate::routes::locations::current_locations,
        crate::routes::locations::agent_history,
        // Geofences
        crate::routes::geofences::validate_location,
        crate::routes::geofences::replace_site_zones,
        crate::routes::geofences::invalidate_site_zones,
        // Violations
        crate::routes::violations::list_violations,
        crate::routes::violations::resolve_violation,
        // Tracking
        crate::routes::tracking::tracking_stats,
        crate::routes::tracking::cleanup,
    ),
    components(schemas(
        crate::error::ErrorBody,
        crate::error::ErrorDetail,
        crate::auth::Role,
        crate::routes::locations::RecordLocationRequest,
        crate::routes::locations::LocationReceiptResponse,
        crate::routes::locations::AgentLocationResponse,
        crate::routes::locations::SampleResponse,
        crate::routes::locations::HistoryResponse,
        crate::routes::geofences::CoordinateDto,
        crate::routes::geofences::ZoneShapeDto,
        crate::routes::geofences::ValidateLocationRequest,
        crate::routes::geofences::ValidateLocationResponse,
        crate::routes::geofences::ZoneCheckResponse,
        crate::routes::geofences::ZoneInput,
        crate::routes::geofences::ReplaceZonesRequest,
        crate::routes::geofences::GeofenceResponse,
        crate::routes::geofences::InvalidateResponse,
        crate::routes::violations::ViolationResponse,
        crate::routes::violations::ViolationListResponse,
        crate::routes::tracking::StatsResponse,
        crate::routes::tracking::CleanupResponse,
    )),
    tags(
        (name = "locations", description = "Position ingestion and tracking queries"),
        (name = "geofences", description = "Containment checks and zone administration"),
        (name = "violations", description = "Debounced geofence violations"),
        (name = "tracking", description = "Statistics and retention"),
    )
)]
pub struct ApiDoc;

/// Serves the OpenAPI JSON document at `/openapi.json`.
pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
