//! # Tracking Engine
//!
//! Wires the components together around one set of repositories and owns
//! the background tasks (shard workers and the retention janitor).

use std::sync::Arc;

use chrono::Utc;
use geotrack_core::{Geofence, GeofenceViolation, SiteId, ValidationError, ViolationId};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::detector::ViolationDetector;
use crate::dispatch::ShardDispatcher;
use crate::error::TrackingError;
use crate::events::{EventBus, TrackingEvent};
use crate::ingest::LocationIngestor;
use crate::janitor::RetentionJanitor;
use crate::memory::InMemoryRepository;
use crate::query::TrackingQueryService;
use crate::repository::{
    GeofenceRepository, LocationRepository, ValidationRepository, ViolationFilter,
};
use crate::store::GeofenceStore;
use crate::telemetry;
use crate::tracking::TrackingTable;

/// The storage backends the engine runs against.
#[derive(Clone)]
pub struct Repositories {
    pub locations: Arc<dyn LocationRepository>,
    pub geofences: Arc<dyn GeofenceRepository>,
    pub validations: Arc<dyn ValidationRepository>,
}

impl Repositories {
    /// Use one value for all three repositories.
    pub fn shared<R>(repo: Arc<R>) -> Self
    where
        R: LocationRepository + GeofenceRepository + ValidationRepository + 'static,
    {
        Self {
            locations: repo.clone(),
            geofences: repo.clone(),
            validations: repo,
        }
    }
}

impl std::fmt::Debug for Repositories {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repositories").finish_non_exhaustive()
    }
}

pub struct TrackingEngine {
    config: EngineConfig,
    repos: Repositories,
    events: EventBus,
    tracking: Arc<TrackingTable>,
    zones: Arc<GeofenceStore>,
    detector: Arc<ViolationDetector>,
    dispatcher: Arc<ShardDispatcher>,
    ingestor: LocationIngestor,
    queries: TrackingQueryService,
    janitor: Arc<RetentionJanitor>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    janitor_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for TrackingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingEngine")
            .field("config", &self.config)
            .field("tracked_agents", &self.tracking.len())
            .field("pending_evaluations", &self.dispatcher.pending())
            .finish()
    }
}

impl TrackingEngine {
    /// Build the engine and spawn its shard workers.
    ///
    /// Must be called from within a Tokio runtime. The retention janitor is
    /// not started; see [`TrackingEngine::spawn_retention`].
    pub fn start(config: EngineConfig, repos: Repositories) -> Self {
        let events = EventBus::new(config.event_capacity);
        let tracking = Arc::new(TrackingTable::new());
        let zones = Arc::new(GeofenceStore::new(
            Arc::clone(&repos.geofences),
            config.zone_cache_ttl,
        ));
        let detector = Arc::new(ViolationDetector::new(
            Arc::clone(&zones),
            Arc::clone(&repos.locations),
            Arc::clone(&repos.validations),
            Arc::clone(&tracking),
            events.clone(),
            config.debounce_threshold,
            config.require_manual_resolution,
        ));
        let (dispatcher, workers) = ShardDispatcher::spawn(
            Arc::clone(&detector),
            config.shard_count,
            config.shard_queue_capacity,
        );
        let dispatcher = Arc::new(dispatcher);
        let ingestor = LocationIngestor::new(
            Arc::clone(&repos.locations),
            Arc::clone(&tracking),
            Arc::clone(&dispatcher),
            events.clone(),
            config.accuracy_ceiling_m,
            config.ingest_timeout,
        );
        let queries = TrackingQueryService::new(
            Arc::clone(&repos.locations),
            Arc::clone(&repos.validations),
            Arc::clone(&tracking),
            config.freshness_window,
            config.history_default_limit,
            config.history_max_limit,
        );
        let janitor = Arc::new(RetentionJanitor::new(
            Arc::clone(&repos.locations),
            Arc::clone(&repos.validations),
            config.retention_batch_size,
        ));
        let (shutdown, _) = watch::channel(false);

        tracing::info!(
            shards = config.shard_count,
            debounce_threshold = config.debounce_threshold,
            manual_resolution = config.require_manual_resolution,
            "tracking engine started"
        );

        Self {
            config,
            repos,
            events,
            tracking,
            zones,
            detector,
            dispatcher,
            ingestor,
            queries,
            janitor,
            workers: Mutex::new(workers),
            janitor_task: Mutex::new(None),
            shutdown,
        }
    }

    /// Engine over a fresh [`InMemoryRepository`]. The repository is
    /// returned as well so callers can seed zones or inspect rows.
    pub fn in_memory(config: EngineConfig) -> (Self, Arc<InMemoryRepository>) {
        let repo = Arc::new(InMemoryRepository::new());
        let engine = Self::start(config, Repositories::shared(Arc::clone(&repo)));
        (engine, repo)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    pub fn ingestor(&self) -> &LocationIngestor {
        &self.ingestor
    }

    pub fn detector(&self) -> &ViolationDetector {
        &self.detector
    }

    pub fn queries(&self) -> &TrackingQueryService {
        &self.queries
    }

    pub fn janitor(&self) -> &RetentionJanitor {
        &self.janitor
    }

    pub fn zones(&self) -> &GeofenceStore {
        &self.zones
    }

    pub fn tracking(&self) -> &TrackingTable {
        &self.tracking
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn dispatcher(&self) -> &ShardDispatcher {
        &self.dispatcher
    }

    /// Wait until every dispatched sample has been evaluated.
    pub async fn quiesce(&self) {
        self.dispatcher.quiesce().await;
    }

    /// Close a violation on behalf of a supervisor.
    ///
    /// # Errors
    ///
    /// [`TrackingError::NotFound`] for an unknown id.
    pub async fn resolve_violation(
        &self,
        id: ViolationId,
    ) -> Result<GeofenceViolation, TrackingError> {
        let before = self
            .repos
            .validations
            .get_violation(id)
            .await?
            .ok_or_else(|| TrackingError::NotFound(format!("violation {id}")))?;
        let violation = self.repos.validations.resolve_violation(id, Utc::now()).await?;
        self.tracking.forget_violation(violation.agent_id, id);
        if before.is_open() {
            tracing::info!(
                violation_id = %id,
                agent_id = %violation.agent_id,
                site_id = %violation.site_id,
                "violation resolved by supervisor"
            );
            metrics::counter!(telemetry::VIOLATIONS_RESOLVED, "mode" => "manual").increment(1);
            if let Some(resolved_at) = violation.resolved_at {
                self.events.publish(TrackingEvent::ViolationResolved {
                    violation_id: id,
                    agent_id: violation.agent_id,
                    site_id: violation.site_id,
                    resolved_at,
                    manual: true,
                });
            }
        }
        Ok(violation)
    }

    pub async fn list_violations(
        &self,
        filter: &ViolationFilter,
    ) -> Result<Vec<GeofenceViolation>, TrackingError> {
        Ok(self.repos.validations.list_violations(filter).await?)
    }

    /// Replace the zone set of a site and drop its cache entry.
    ///
    /// # Errors
    ///
    /// [`TrackingError::InvalidSample`] when a zone has an invalid shape or
    /// blank label, [`TrackingError::InvalidQuery`] when it belongs to
    /// another site.
    pub async fn replace_site_zones(
        &self,
        site_id: SiteId,
        zones: Vec<Geofence>,
    ) -> Result<(), TrackingError> {
        for zone in &zones {
            zone.shape.validate()?;
            if zone.site_id != site_id {
                return Err(TrackingError::InvalidQuery(format!(
                    "zone {} belongs to site {}, not {site_id}",
                    zone.id, zone.site_id
                )));
            }
            if zone.label.trim().is_empty() {
                return Err(ValidationError::EmptyLabel.into());
            }
        }
        let count = zones.len();
        self.repos.geofences.replace_site_zones(site_id, zones).await?;
        self.zones.invalidate(site_id);
        tracing::info!(site_id = %site_id, zones = count, "site zones replaced");
        Ok(())
    }

    /// Start the scheduled retention sweep. Calling this twice has no
    /// further effect.
    pub fn spawn_retention(&self) {
        let mut task = self.janitor_task.lock();
        if task.is_some() {
            return;
        }
        *task = Some(Arc::clone(&self.janitor).spawn(
            self.config.retention_interval,
            self.config.retention_days,
            self.shutdown.subscribe(),
        ));
        tracing::info!(
            retention_days = self.config.retention_days,
            interval = ?self.config.retention_interval,
            "retention janitor scheduled"
        );
    }

    /// Stop accepting dispatches, drain the shard queues, and stop the
    /// janitor.
    pub async fn shutdown(&self) {
        self.dispatcher.close();
        let _ = self.shutdown.send(true);

        let workers: Vec<_> = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "evaluation worker ended abnormally");
            }
        }
        let janitor = self.janitor_task.lock().take();
        if let Some(handle) = janitor {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "retention janitor ended abnormally");
            }
        }
        tracing::info!("tracking engine stopped");
    }
}
