//! # Repository Interfaces
//!
//! Storage is injected into every component as trait objects. The API crate
//! provides Postgres implementations; [`crate::memory::InMemoryRepository`]
//! implements all three traits for tests and database-less deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use geotrack_core::{
    AgentId, Geofence, GeofenceValidation, GeofenceViolation, LocationSample, SampleId, SiteId,
    ViolationId,
};

use crate::error::RepositoryError;

/// Time-bounded history lookup. `limit` has already been clamped by the
/// query service.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryQuery {
    pub agent_id: AgentId,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: usize,
}

/// Sample volume over a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleActivity {
    pub samples: u64,
    pub agents: u64,
}

/// Change to the violation table applied in the same write as a batch of
/// validation rows.
#[derive(Debug, Clone, PartialEq)]
pub enum ViolationChange {
    /// Insert a new unresolved violation.
    Open(GeofenceViolation),
    /// Close an unresolved violation. No-op if it is already resolved.
    Resolve { id: ViolationId, at: DateTime<Utc> },
    /// Update the `auto_resolvable` flag of an unresolved violation.
    MarkAutoResolvable { id: ViolationId, auto_resolvable: bool },
}

/// Filter for violation listings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViolationFilter {
    pub open_only: bool,
    pub agent_id: Option<AgentId>,
    pub site_id: Option<SiteId>,
    pub limit: usize,
}

#[async_trait]
pub trait LocationRepository: Send + Sync {
    /// Persist a sample. A repeated `(agent_id, dedup_key)` pair must fail
    /// with [`RepositoryError::Conflict`].
    async fn insert_sample(&self, sample: &LocationSample) -> Result<(), RepositoryError>;

    async fn find_by_dedup_key(
        &self,
        agent_id: AgentId,
        dedup_key: &str,
    ) -> Result<Option<LocationSample>, RepositoryError>;

    /// Most recent sample of one agent by `recorded_at`.
    async fn latest_sample(
        &self,
        agent_id: AgentId,
    ) -> Result<Option<LocationSample>, RepositoryError>;

    /// Most recent sample of every agent that reported at or after `since`.
    async fn latest_samples_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<LocationSample>, RepositoryError>;

    /// Samples ordered by `recorded_at` descending, at most `query.limit`.
    async fn history(&self, query: &HistoryQuery) -> Result<Vec<LocationSample>, RepositoryError>;

    async fn sample_activity_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<SampleActivity, RepositoryError>;

    /// Delete at most `batch_size` samples recorded strictly before
    /// `cutoff`, returning how many were removed.
    async fn delete_samples_before(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait GeofenceRepository: Send + Sync {
    /// Active zones of a site.
    async fn active_zones_for_site(&self, site_id: SiteId)
        -> Result<Vec<Geofence>, RepositoryError>;

    /// Replace the full zone set of a site.
    async fn replace_site_zones(
        &self,
        site_id: SiteId,
        zones: Vec<Geofence>,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ValidationRepository: Send + Sync {
    /// Write validation rows and an optional violation change atomically.
    async fn record_evaluation(
        &self,
        validations: &[GeofenceValidation],
        change: Option<&ViolationChange>,
    ) -> Result<(), RepositoryError>;

    /// The unresolved violation of an agent at a site, if any.
    async fn open_violation(
        &self,
        agent_id: AgentId,
        site_id: SiteId,
    ) -> Result<Option<GeofenceViolation>, RepositoryError>;

    async fn get_violation(
        &self,
        id: ViolationId,
    ) -> Result<Option<GeofenceViolation>, RepositoryError>;

    /// Close a violation on behalf of a supervisor. Resolving an already
    /// resolved violation returns it unchanged.
    async fn resolve_violation(
        &self,
        id: ViolationId,
        at: DateTime<Utc>,
    ) -> Result<GeofenceViolation, RepositoryError>;

    /// Violations ordered by `occurred_at` descending.
    async fn list_violations(
        &self,
        filter: &ViolationFilter,
    ) -> Result<Vec<GeofenceViolation>, RepositoryError>;

    async fn count_open_violations(&self) -> Result<u64, RepositoryError>;

    async fn validations_for_sample(
        &self,
        sample_id: SampleId,
    ) -> Result<Vec<GeofenceValidation>, RepositoryError>;

    /// Delete at most `batch_size` validation rows written strictly before
    /// `cutoff`.
    async fn delete_validations_before(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<u64, RepositoryError>;
}
