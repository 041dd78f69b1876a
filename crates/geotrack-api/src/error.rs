//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Maps engine errors to HTTP status codes and renders the failure half of
//! the response envelope. Internal details never reach the client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use geotrack_engine::TrackingError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Failure envelope: `{"success": false, "error": {...}}`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub success: bool,
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "NOT_FOUND", "VALIDATION_ERROR").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Whether repeating the same request may succeed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
}

impl ErrorBody {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: ErrorDetail {
                code: code.to_string(),
                message: message.into(),
                retryable: false,
            },
        }
    }
}

/// Application-level error type that implements [`IntoResponse`] for Axum.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Request content failed validation (422).
    #[error("validation error: {0}")]
    Validation(String),

    /// Request body or query string could not be parsed (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Missing or invalid token (401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Insufficient role or acting on another agent (403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Storage or zone configuration temporarily unavailable (503).
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The ingest deadline elapsed (504).
    #[error("timed out: {0}")]
    Timeout(String),

    /// Internal server error (500). Message is logged but not returned to client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Return the HTTP status code and machine-readable error code for this error.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
            Self::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::ServiceUnavailable(_) | Self::Timeout(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Never expose internal error messages to clients.
        let message = match &self {
            Self::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        if matches!(&self, Self::Internal(_)) {
            tracing::error!(error = %self, "internal server error");
        }

        let mut body = ErrorBody::new(code, message);
        body.error.retryable = self.is_retryable();

        (status, Json(body)).into_response()
    }
}

impl From<geotrack_core::ValidationError> for AppError {
    fn from(err: geotrack_core::ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<TrackingError> for AppError {
    fn from(err: TrackingError) -> Self {
        match err {
            TrackingError::InvalidSample(e) => Self::Validation(e.to_string()),
            TrackingError::InvalidQuery(msg) => Self::Validation(msg),
            TrackingError::NotFound(what) => Self::NotFound(what),
            TrackingError::Timeout(after) => {
                Self::Timeout(format!("request not acknowledged within {after:?}, retry"))
            }
            TrackingError::PersistenceFailure(e) => {
                // Storage detail stays in the logs.
                tracing::error!(error = %e, "persistence failure surfaced to client");
                Self::ServiceUnavailable("storage temporarily unavailable, retry".into())
            }
            TrackingError::ZoneLookupFailure { site_id, reason } => {
                tracing::warn!(site_id = %site_id, reason = %reason, "zone lookup failed");
                Self::ServiceUnavailable(format!("zone configuration for site {site_id} unavailable"))
            }
            err @ TrackingError::AgentStateCorruption { .. } => Self::Internal(err.to_string()),
        }
    }
}
