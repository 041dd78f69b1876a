//! # In-Memory Repository
//!
//! Implements all three repository traits over `parking_lot` locks. Used
//! when no database is configured and as the storage backend in tests.
//!
//! Locks are never held across `.await` points. When a method needs more
//! than one lock it takes them in field declaration order.
//!
//! Storage faults can be injected with [`InMemoryRepository::fail_writes`]
//! and [`InMemoryRepository::fail_zone_lookups`] to exercise the engine's
//! failure paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use geotrack_core::{
    AgentId, Geofence, GeofenceValidation, GeofenceViolation, LocationSample, SampleId, SiteId,
    ViolationId,
};
use parking_lot::RwLock;

use crate::error::RepositoryError;
use crate::repository::{
    GeofenceRepository, HistoryQuery, LocationRepository, SampleActivity, ValidationRepository,
    ViolationChange, ViolationFilter,
};

#[derive(Debug, Default)]
pub struct InMemoryRepository {
    /// Per-agent samples kept sorted by `recorded_at` ascending.
    samples: RwLock<HashMap<AgentId, Vec<LocationSample>>>,
    dedup: RwLock<HashMap<(AgentId, String), SampleId>>,
    zones: RwLock<HashMap<SiteId, Vec<Geofence>>>,
    validations: RwLock<Vec<GeofenceValidation>>,
    violations: RwLock<HashMap<ViolationId, GeofenceViolation>>,
    fail_writes: AtomicBool,
    fail_zone_lookups: AtomicBool,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail with [`RepositoryError::Unavailable`].
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make zone lookups fail with [`RepositoryError::Unavailable`].
    pub fn fail_zone_lookups(&self, fail: bool) {
        self.fail_zone_lookups.store(fail, Ordering::SeqCst);
    }

    /// Total stored samples across all agents.
    pub fn sample_count(&self) -> usize {
        self.samples.read().values().map(Vec::len).sum()
    }

    /// Total stored validation rows.
    pub fn validation_count(&self) -> usize {
        self.validations.read().len()
    }

    /// All violations, oldest first.
    pub fn all_violations(&self) -> Vec<GeofenceViolation> {
        let mut all: Vec<_> = self.violations.read().values().cloned().collect();
        all.sort_by_key(|v| v.occurred_at);
        all
    }

    fn check_writable(&self) -> Result<(), RepositoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("injected write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LocationRepository for InMemoryRepository {
    async fn insert_sample(&self, sample: &LocationSample) -> Result<(), RepositoryError> {
        self.check_writable()?;
        let mut samples = self.samples.write();
        let mut dedup = self.dedup.write();
        if let Some(key) = &sample.dedup_key {
            let slot = (sample.agent_id, key.clone());
            if dedup.contains_key(&slot) {
                return Err(RepositoryError::Conflict(format!(
                    "dedup key {key:?} already used by agent {}",
                    sample.agent_id
                )));
            }
            dedup.insert(slot, sample.id);
        }
        let rows = samples.entry(sample.agent_id).or_default();
        let at = rows.partition_point(|s| s.recorded_at <= sample.recorded_at);
        rows.insert(at, sample.clone());
        Ok(())
    }

    async fn find_by_dedup_key(
        &self,
        agent_id: AgentId,
        dedup_key: &str,
    ) -> Result<Option<LocationSample>, RepositoryError> {
        let samples = self.samples.read();
        let dedup = self.dedup.read();
        let Some(id) = dedup.get(&(agent_id, dedup_key.to_string())) else {
            return Ok(None);
        };
        Ok(samples
            .get(&agent_id)
            .and_then(|rows| rows.iter().find(|s| s.id == *id))
            .cloned())
    }

    async fn latest_sample(
        &self,
        agent_id: AgentId,
    ) -> Result<Option<LocationSample>, RepositoryError> {
        Ok(self
            .samples
            .read()
            .get(&agent_id)
            .and_then(|rows| rows.last())
            .cloned())
    }

    async fn latest_samples_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<LocationSample>, RepositoryError> {
        Ok(self
            .samples
            .read()
            .values()
            .filter_map(|rows| rows.last())
            .filter(|s| s.recorded_at >= since)
            .cloned()
            .collect())
    }

    async fn history(&self, query: &HistoryQuery) -> Result<Vec<LocationSample>, RepositoryError> {
        let samples = self.samples.read();
        let Some(rows) = samples.get(&query.agent_id) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .iter()
            .rev()
            .filter(|s| query.from.map_or(true, |from| s.recorded_at >= from))
            .filter(|s| query.to.map_or(true, |to| s.recorded_at <= to))
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn sample_activity_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<SampleActivity, RepositoryError> {
        let samples = self.samples.read();
        let mut activity = SampleActivity::default();
        for rows in samples.values() {
            let recent = rows.len() - rows.partition_point(|s| s.recorded_at < since);
            if recent > 0 {
                activity.samples += recent as u64;
                activity.agents += 1;
            }
        }
        Ok(activity)
    }

    async fn delete_samples_before(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<u64, RepositoryError> {
        self.check_writable()?;
        let mut samples = self.samples.write();
        let mut dedup = self.dedup.write();
        let mut remaining = batch_size;
        for rows in samples.values_mut() {
            if remaining == 0 {
                break;
            }
            let expired = rows
                .partition_point(|s| s.recorded_at < cutoff)
                .min(remaining);
            for gone in rows.drain(..expired) {
                if let Some(key) = gone.dedup_key {
                    dedup.remove(&(gone.agent_id, key));
                }
            }
            remaining -= expired;
        }
        samples.retain(|_, rows| !rows.is_empty());
        Ok((batch_size - remaining) as u64)
    }
}

#[async_trait]
impl GeofenceRepository for InMemoryRepository {
    async fn active_zones_for_site(
        &self,
        site_id: SiteId,
    ) -> Result<Vec<Geofence>, RepositoryError> {
        if self.fail_zone_lookups.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("injected zone lookup failure".into()));
        }
        Ok(self
            .zones
            .read()
            .get(&site_id)
            .map(|zones| zones.iter().filter(|z| z.active).cloned().collect())
            .unwrap_or_default())
    }

    async fn replace_site_zones(
        &self,
        site_id: SiteId,
        zones: Vec<Geofence>,
    ) -> Result<(), RepositoryError> {
        self.check_writable()?;
        self.zones.write().insert(site_id, zones);
        Ok(())
    }
}

#[async_trait]
impl ValidationRepository for InMemoryRepository {
    async fn record_evaluation(
        &self,
        validations: &[GeofenceValidation],
        change: Option<&ViolationChange>,
    ) -> Result<(), RepositoryError> {
        self.check_writable()?;
        let mut rows = self.validations.write();
        let mut violations = self.violations.write();

        // Apply the violation change first so a rejected change leaves the
        // validation rows unwritten.
        match change {
            None => {}
            Some(ViolationChange::Open(v)) => {
                let duplicate = violations
                    .values()
                    .any(|o| o.is_open() && o.agent_id == v.agent_id && o.site_id == v.site_id);
                if duplicate {
                    return Err(RepositoryError::Conflict(format!(
                        "agent {} already has an open violation at site {}",
                        v.agent_id, v.site_id
                    )));
                }
                violations.insert(v.id, v.clone());
            }
            Some(ViolationChange::Resolve { id, at }) => {
                let v = violations
                    .get_mut(id)
                    .ok_or_else(|| RepositoryError::NotFound(format!("violation {id}")))?;
                v.resolve(*at);
            }
            Some(ViolationChange::MarkAutoResolvable {
                id,
                auto_resolvable,
            }) => {
                let v = violations
                    .get_mut(id)
                    .ok_or_else(|| RepositoryError::NotFound(format!("violation {id}")))?;
                if v.is_open() {
                    v.auto_resolvable = *auto_resolvable;
                }
            }
        }
        rows.extend_from_slice(validations);
        Ok(())
    }

    async fn open_violation(
        &self,
        agent_id: AgentId,
        site_id: SiteId,
    ) -> Result<Option<GeofenceViolation>, RepositoryError> {
        Ok(self
            .violations
            .read()
            .values()
            .find(|v| v.is_open() && v.agent_id == agent_id && v.site_id == site_id)
            .cloned())
    }

    async fn get_violation(
        &self,
        id: ViolationId,
    ) -> Result<Option<GeofenceViolation>, RepositoryError> {
        Ok(self.violations.read().get(&id).cloned())
    }

    async fn resolve_violation(
        &self,
        id: ViolationId,
        at: DateTime<Utc>,
    ) -> Result<GeofenceViolation, RepositoryError> {
        self.check_writable()?;
        let mut violations = self.violations.write();
        let v = violations
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("violation {id}")))?;
        v.resolve(at);
        Ok(v.clone())
    }

    async fn list_violations(
        &self,
        filter: &ViolationFilter,
    ) -> Result<Vec<GeofenceViolation>, RepositoryError> {
        let mut matching: Vec<_> = self
            .violations
            .read()
            .values()
            .filter(|v| !filter.open_only || v.is_open())
            .filter(|v| filter.agent_id.map_or(true, |a| v.agent_id == a))
            .filter(|v| filter.site_id.map_or(true, |s| v.site_id == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        matching.truncate(filter.limit);
        Ok(matching)
    }

    async fn count_open_violations(&self) -> Result<u64, RepositoryError> {
        Ok(self
            .violations
            .read()
            .values()
            .filter(|v| v.is_open())
            .count() as u64)
    }

    async fn validations_for_sample(
        &self,
        sample_id: SampleId,
    ) -> Result<Vec<GeofenceValidation>, RepositoryError> {
        Ok(self
            .validations
            .read()
            .iter()
            .filter(|v| v.sample_id == sample_id)
            .cloned()
            .collect())
    }

    async fn delete_validations_before(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<u64, RepositoryError> {
        self.check_writable()?;
        let mut rows = self.validations.write();
        let mut deleted = 0usize;
        rows.retain(|v| {
            if deleted < batch_size && v.validated_at < cutoff {
                deleted += 1;
                false
            } else {
                true
            }
        });
        Ok(deleted as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use geotrack_core::{Containment, Coordinate, GeofenceId, SampleTelemetry, ValidationId};

    fn sample(agent: AgentId, recorded_at: DateTime<Utc>, key: Option<&str>) -> LocationSample {
        LocationSample {
            id: SampleId::new(),
            agent_id: agent,
            site_id: None,
            recorded_at,
            received_at: recorded_at,
            coordinate: Coordinate::new(24.86, 67.01).unwrap(),
            accuracy_m: 5.0,
            telemetry: SampleTelemetry::default(),
            low_confidence: false,
            dedup_key: key.map(str::to_string),
        }
    }

    fn validation(at: DateTime<Utc>) -> GeofenceValidation {
        GeofenceValidation {
            id: ValidationId::new(),
            agent_id: AgentId::new(),
            geofence_id: GeofenceId::new(),
            site_id: SiteId::new(),
            sample_id: SampleId::new(),
            result: Containment::Inside,
            validated_at: at,
        }
    }

    fn open_violation(agent: AgentId, site: SiteId) -> GeofenceViolation {
        GeofenceViolation {
            id: ViolationId::new(),
            agent_id: agent,
            geofence_id: GeofenceId::new(),
            site_id: site,
            sample_id: SampleId::new(),
            distance_outside_m: 12.0,
            occurred_at: Utc::now(),
            resolved: false,
            resolved_at: None,
            auto_resolvable: false,
        }
    }

    #[tokio::test]
    async fn out_of_order_inserts_stay_sorted() {
        let repo = InMemoryRepository::new();
        let agent = AgentId::new();
        let now = Utc::now();
        for offset in [5, 1, 3] {
            repo.insert_sample(&sample(agent, now - Duration::minutes(offset), None))
                .await
                .unwrap();
        }
        let latest = repo.latest_sample(agent).await.unwrap().unwrap();
        assert_eq!(latest.recorded_at, now - Duration::minutes(1));

        let query = HistoryQuery {
            agent_id: agent,
            from: None,
            to: None,
            limit: 10,
        };
        let rows = repo.history(&query).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.windows(2).all(|w| w[0].recorded_at >= w[1].recorded_at));
    }

    #[tokio::test]
    async fn duplicate_dedup_key_conflicts() {
        let repo = InMemoryRepository::new();
        let agent = AgentId::new();
        let first = sample(agent, Utc::now(), Some("k1"));
        repo.insert_sample(&first).await.unwrap();
        let err = repo
            .insert_sample(&sample(agent, Utc::now(), Some("k1")))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));

        let found = repo.find_by_dedup_key(agent, "k1").await.unwrap().unwrap();
        assert_eq!(found.id, first.id);
        // Same key for another agent is independent.
        repo.insert_sample(&sample(AgentId::new(), Utc::now(), Some("k1")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn batched_sample_delete_respects_cutoff_and_batch() {
        let repo = InMemoryRepository::new();
        let agent = AgentId::new();
        let now = Utc::now();
        for days in [10, 9, 8, 1] {
            repo.insert_sample(&sample(agent, now - Duration::days(days), None))
                .await
                .unwrap();
        }
        let cutoff = now - Duration::days(5);
        assert_eq!(repo.delete_samples_before(cutoff, 2).await.unwrap(), 2);
        assert_eq!(repo.delete_samples_before(cutoff, 2).await.unwrap(), 1);
        assert_eq!(repo.delete_samples_before(cutoff, 2).await.unwrap(), 0);
        assert_eq!(repo.sample_count(), 1);
    }

    #[tokio::test]
    async fn batched_validation_delete() {
        let repo = InMemoryRepository::new();
        let now = Utc::now();
        let rows = vec![
            validation(now - Duration::days(40)),
            validation(now - Duration::days(35)),
            validation(now),
        ];
        repo.record_evaluation(&rows, None).await.unwrap();
        let cutoff = now - Duration::days(30);
        assert_eq!(repo.delete_validations_before(cutoff, 1).await.unwrap(), 1);
        assert_eq!(repo.delete_validations_before(cutoff, 10).await.unwrap(), 1);
        assert_eq!(repo.validation_count(), 1);
    }

    #[tokio::test]
    async fn second_open_violation_for_same_site_is_rejected_atomically() {
        let repo = InMemoryRepository::new();
        let (agent, site) = (AgentId::new(), SiteId::new());
        repo.record_evaluation(&[], Some(&ViolationChange::Open(open_violation(agent, site))))
            .await
            .unwrap();

        let rows = vec![validation(Utc::now())];
        let err = repo
            .record_evaluation(
                &rows,
                Some(&ViolationChange::Open(open_violation(agent, site))),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
        assert_eq!(repo.validation_count(), 0);
        assert_eq!(repo.count_open_violations().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn resolve_and_list() {
        let repo = InMemoryRepository::new();
        let (agent, site) = (AgentId::new(), SiteId::new());
        let v = open_violation(agent, site);
        repo.record_evaluation(&[], Some(&ViolationChange::Open(v.clone())))
            .await
            .unwrap();

        let resolved = repo.resolve_violation(v.id, Utc::now()).await.unwrap();
        assert!(resolved.resolved);
        assert!(repo.open_violation(agent, site).await.unwrap().is_none());

        let filter = ViolationFilter {
            open_only: true,
            limit: 10,
            ..Default::default()
        };
        assert!(repo.list_violations(&filter).await.unwrap().is_empty());
        let filter = ViolationFilter {
            agent_id: Some(agent),
            limit: 10,
            ..Default::default()
        };
        assert_eq!(repo.list_violations(&filter).await.unwrap().len(), 1);

        let missing = repo.resolve_violation(ViolationId::new(), Utc::now()).await;
        assert!(matches!(missing, Err(RepositoryError::NotFound(_))));
    }

    #[tokio::test]
    async fn injected_failures() {
        let repo = InMemoryRepository::new();
        repo.fail_writes(true);
        let err = repo
            .insert_sample(&sample(AgentId::new(), Utc::now(), None))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Unavailable(_)));
        repo.fail_writes(false);

        repo.fail_zone_lookups(true);
        assert!(repo.active_zones_for_site(SiteId::new()).await.is_err());
    }
}
