//! Storage faults, corrupted state, back-pressure and shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use geotrack_core::geometry::destination;
use geotrack_core::{
    AgentId, Containment, Coordinate, Geofence, GeofenceValidation, GeofenceViolation,
    SampleId, SampleTelemetry, SiteId, ViolationId, ZoneShape,
};
use geotrack_engine::{
    DebounceState, EngineConfig, IngestRequest, InMemoryRepository, Repositories,
    RepositoryError, TrackingEngine, TrackingError, ValidationDisposition, ValidationRepository,
    ViolationChange, ViolationFilter,
};

/// Delegates to the in-memory repository but can refuse evaluation writes.
struct FlakyValidations {
    inner: Arc<InMemoryRepository>,
    failing: AtomicBool,
}

impl FlakyValidations {
    fn new(inner: Arc<InMemoryRepository>) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
        }
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ValidationRepository for FlakyValidations {
    async fn record_evaluation(
        &self,
        validations: &[GeofenceValidation],
        change: Option<&ViolationChange>,
    ) -> Result<(), RepositoryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("disk full".into()));
        }
        self.inner.record_evaluation(validations, change).await
    }

    async fn open_violation(
        &self,
        agent_id: AgentId,
        site_id: SiteId,
    ) -> Result<Option<GeofenceViolation>, RepositoryError> {
        self.inner.open_violation(agent_id, site_id).await
    }

    async fn get_violation(
        &self,
        id: ViolationId,
    ) -> Result<Option<GeofenceViolation>, RepositoryError> {
        self.inner.get_violation(id).await
    }

    async fn resolve_violation(
        &self,
        id: ViolationId,
        at: DateTime<Utc>,
    ) -> Result<GeofenceViolation, RepositoryError> {
        self.inner.resolve_violation(id, at).await
    }

    async fn list_violations(
        &self,
        filter: &ViolationFilter,
    ) -> Result<Vec<GeofenceViolation>, RepositoryError> {
        self.inner.list_violations(filter).await
    }

    async fn count_open_violations(&self) -> Result<u64, RepositoryError> {
        self.inner.count_open_violations().await
    }

    async fn validations_for_sample(
        &self,
        sample_id: SampleId,
    ) -> Result<Vec<GeofenceValidation>, RepositoryError> {
        self.inner.validations_for_sample(sample_id).await
    }

    async fn delete_validations_before(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<u64, RepositoryError> {
        self.inner.delete_validations_before(cutoff, batch_size).await
    }
}

fn gate() -> Coordinate {
    Coordinate::new(51.5007, -0.1246).unwrap()
}

fn request(agent: AgentId, site: SiteId, point: Coordinate) -> IngestRequest {
    IngestRequest {
        agent_id: agent,
        site_id: Some(site),
        latitude: point.latitude(),
        longitude: point.longitude(),
        accuracy_m: 4.0,
        recorded_at: None,
        telemetry: SampleTelemetry::default(),
        dedup_key: None,
    }
}

async fn seed_site(engine: &TrackingEngine) -> SiteId {
    let site = SiteId::new();
    let zone = Geofence::new(site, "Yard", ZoneShape::circle(gate(), 50.0).unwrap()).unwrap();
    engine.replace_site_zones(site, vec![zone]).await.unwrap();
    site
}

async fn send(engine: &TrackingEngine, agent: AgentId, site: SiteId, point: Coordinate) {
    engine
        .ingestor()
        .ingest(request(agent, site, point))
        .await
        .unwrap();
    engine.quiesce().await;
}

#[tokio::test]
async fn zone_lookup_failure_fails_open() {
    let (engine, repo) = TrackingEngine::in_memory(EngineConfig::default());
    let site = seed_site(&engine).await;
    let agent = AgentId::new();
    let outside = destination(&gate(), 0.0, 500.0);

    repo.fail_zone_lookups(true);
    for _ in 0..3 {
        let receipt = engine
            .ingestor()
            .ingest(request(agent, site, outside))
            .await
            .unwrap();
        assert_eq!(receipt.validation, ValidationDisposition::Dispatched);
    }
    engine.quiesce().await;

    assert_eq!(repo.sample_count(), 3);
    assert_eq!(repo.validation_count(), 0);
    assert!(repo.all_violations().is_empty());
    assert!(engine.tracking().debounce(agent).is_none());

    // Ad hoc checks have no sample to fall back on and surface the failure.
    let err = engine.detector().check(site, outside).await.unwrap_err();
    assert!(matches!(err, TrackingError::ZoneLookupFailure { .. }));

    repo.fail_zone_lookups(false);
    send(&engine, agent, site, outside).await;
    assert_eq!(engine.tracking().debounce(agent).unwrap().consecutive_outside, 1);
}

#[tokio::test]
async fn failed_evaluation_write_leaves_state_untouched() {
    let repo = Arc::new(InMemoryRepository::new());
    let flaky = Arc::new(FlakyValidations::new(Arc::clone(&repo)));
    let engine = TrackingEngine::start(
        EngineConfig::default(),
        Repositories {
            locations: repo.clone(),
            geofences: repo.clone(),
            validations: flaky.clone(),
        },
    );
    let site = seed_site(&engine).await;
    let agent = AgentId::new();
    let outside = destination(&gate(), 90.0, 300.0);

    send(&engine, agent, site, outside).await;
    assert_eq!(engine.tracking().debounce(agent).unwrap().consecutive_outside, 1);

    flaky.set_failing(true);
    send(&engine, agent, site, outside).await;
    // Sample stored, evaluation not committed.
    assert_eq!(repo.sample_count(), 2);
    assert_eq!(engine.tracking().debounce(agent).unwrap().consecutive_outside, 1);
    assert!(repo.all_violations().is_empty());

    flaky.set_failing(false);
    send(&engine, agent, site, outside).await;
    assert_eq!(engine.tracking().debounce(agent).unwrap().consecutive_outside, 2);
    assert_eq!(repo.all_violations().len(), 1);
}

#[tokio::test]
async fn sample_write_failure_is_returned_to_the_caller() {
    let (engine, repo) = TrackingEngine::in_memory(EngineConfig::default());
    let site = seed_site(&engine).await;
    repo.fail_writes(true);
    let err = engine
        .ingestor()
        .ingest(request(AgentId::new(), site, gate()))
        .await
        .unwrap_err();
    assert!(matches!(err, TrackingError::PersistenceFailure(_)));
    assert_eq!(repo.sample_count(), 0);
}

#[tokio::test]
async fn corrupted_state_is_rebuilt() {
    let (engine, repo) = TrackingEngine::in_memory(EngineConfig::default());
    let site = seed_site(&engine).await;
    let agent = AgentId::new();

    engine.tracking().commit_debounce(
        agent,
        DebounceState {
            site_id: Some(site),
            last_containment: Some(Containment::Inside),
            consecutive_outside: 7,
            ..Default::default()
        },
    );

    send(&engine, agent, site, destination(&gate(), 180.0, 400.0)).await;
    let state = engine.tracking().debounce(agent).unwrap();
    assert_eq!(state.consecutive_outside, 1);
    assert!(state.check_consistency().is_ok());
    assert!(repo.all_violations().is_empty());
}

#[tokio::test]
async fn full_queue_stores_sample_and_reports_skip() {
    let (engine, repo) = TrackingEngine::in_memory(EngineConfig {
        shard_count: 1,
        shard_queue_capacity: 1,
        ..EngineConfig::default()
    });
    let site = seed_site(&engine).await;
    let agent = AgentId::new();

    let mut dispositions = Vec::new();
    for _ in 0..5 {
        let receipt = engine
            .ingestor()
            .ingest(request(agent, site, gate()))
            .await
            .unwrap();
        dispositions.push(receipt.validation);
    }
    engine.quiesce().await;

    assert_eq!(repo.sample_count(), 5);
    assert_eq!(dispositions[0], ValidationDisposition::Dispatched);
    assert!(dispositions.contains(&ValidationDisposition::SkippedQueueFull));
}

#[tokio::test]
async fn shutdown_drains_and_stops_dispatching() {
    let (engine, repo) = TrackingEngine::in_memory(EngineConfig::default());
    let site = seed_site(&engine).await;
    let agent = AgentId::new();

    engine
        .ingestor()
        .ingest(request(agent, site, gate()))
        .await
        .unwrap();
    engine.spawn_retention();
    engine.shutdown().await;
    assert_eq!(repo.validation_count(), 1);

    let receipt = engine
        .ingestor()
        .ingest(request(agent, site, gate()))
        .await
        .unwrap();
    assert_eq!(receipt.validation, ValidationDisposition::SkippedShuttingDown);
    assert_eq!(repo.sample_count(), 2);
}

#[tokio::test]
async fn janitor_keeps_recent_rows() {
    let (engine, repo) = TrackingEngine::in_memory(EngineConfig::default());
    let site = seed_site(&engine).await;
    let agent = AgentId::new();

    send(&engine, agent, site, gate()).await;
    let mut old = request(agent, site, gate());
    old.recorded_at = Some(Utc::now() - Duration::days(45));
    engine.ingestor().ingest(old).await.unwrap();
    engine.quiesce().await;
    assert_eq!(repo.sample_count(), 2);

    let report = engine.janitor().cleanup(30).await.unwrap();
    assert_eq!(report.samples_deleted, 1);
    assert_eq!(repo.sample_count(), 1);
    // Validation rows are stamped at evaluation time, so both are recent.
    assert_eq!(report.validations_deleted, 0);

    assert!(matches!(
        engine.janitor().cleanup(0).await,
        Err(TrackingError::InvalidQuery(_))
    ));
}

#[tokio::test]
async fn resolving_unknown_violation_is_not_found() {
    let (engine, _repo) = TrackingEngine::in_memory(EngineConfig::default());
    let err = engine.resolve_violation(ViolationId::new()).await.unwrap_err();
    assert!(matches!(err, TrackingError::NotFound(_)));
}
