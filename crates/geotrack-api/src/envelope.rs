//! # Response Envelope
//!
//! Every successful response is wrapped as `{"success": true, "data": ...}`.
//! Failures use [`crate::error::ErrorBody`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// Envelope with a non-200 success status, e.g. `201 Created`.
#[derive(Debug)]
pub struct WithStatus<T>(pub StatusCode, pub Envelope<T>);

impl<T: Serialize> IntoResponse for WithStatus<T> {
    fn into_response(self) -> Response {
        (self.0, Json(self.1)).into_response()
    }
}
