//! # Engine Errors
//!
//! [`TrackingError`] is the taxonomy surfaced to callers of the engine.
//! [`RepositoryError`] is what storage backends report; it is folded into
//! `TrackingError` at the component boundary.

use std::time::Duration;

use geotrack_core::{AgentId, SiteId, ValidationError};
use thiserror::Error;

/// Failure reported by a repository implementation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    /// The backing store could not be reached or the statement failed.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The addressed record does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// A uniqueness constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A stored row could not be mapped back into a domain value.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Errors surfaced by engine operations.
#[derive(Error, Debug)]
pub enum TrackingError {
    /// Malformed coordinate, accuracy, telemetry, or timestamp. Not retried.
    #[error("invalid sample: {0}")]
    InvalidSample(#[from] ValidationError),

    /// Zone configuration could not be loaded. The detector fails open on
    /// this; it only reaches callers of the ad hoc check.
    #[error("zone lookup failed for site {site_id}: {reason}")]
    ZoneLookupFailure { site_id: SiteId, reason: String },

    /// In-memory tracking state failed its consistency check. Logged and
    /// repaired by rebuilding from storage; never fails ingestion.
    #[error("tracking state for agent {agent_id} is inconsistent: {reason}")]
    AgentStateCorruption { agent_id: AgentId, reason: String },

    /// A storage write or read failed. Retryable by the client.
    #[error("persistence failure: {0}")]
    PersistenceFailure(RepositoryError),

    /// The ingest deadline elapsed before the sample was acknowledged.
    #[error("ingest timed out after {0:?}")]
    Timeout(Duration),

    /// Query parameters are out of range.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("{0} not found")]
    NotFound(String),
}

impl From<RepositoryError> for TrackingError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => TrackingError::NotFound(what),
            other => TrackingError::PersistenceFailure(other),
        }
    }
}

impl TrackingError {
    /// Whether the client should retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TrackingError::PersistenceFailure(_) | TrackingError::Timeout(_)
        )
    }
}
