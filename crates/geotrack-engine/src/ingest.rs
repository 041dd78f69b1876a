//! # Location Ingestor
//!
//! The write path. A sample is validated, persisted, recorded as the
//! agent's last known position, and handed to the shard dispatcher. The
//! caller waits for persistence only, never for geofence evaluation.
//!
//! Samples whose accuracy exceeds the configured ceiling are stored with
//! `low_confidence = true` for trajectory display and are not evaluated.
//! A client-supplied `dedup_key` makes retries idempotent: the retry gets
//! the original receipt back with `duplicate = true`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use geotrack_core::sample::{validate_accuracy, validate_dedup_key, validate_recorded_at};
use geotrack_core::{AgentId, Coordinate, LocationSample, SampleId, SampleTelemetry, SiteId};
use serde::{Deserialize, Serialize};

use crate::dispatch::{DispatchError, ShardDispatcher};
use crate::error::{RepositoryError, TrackingError};
use crate::events::{EventBus, TrackingEvent};
use crate::repository::LocationRepository;
use crate::telemetry;
use crate::tracking::TrackingTable;

/// An unvalidated position report as received from a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRequest {
    pub agent_id: AgentId,
    pub site_id: Option<SiteId>,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: f64,
    /// Device timestamp. Defaults to the receive time.
    pub recorded_at: Option<DateTime<Utc>>,
    pub telemetry: SampleTelemetry,
    pub dedup_key: Option<String>,
}

/// What happened to the evaluation of an accepted sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationDisposition {
    Dispatched,
    SkippedLowConfidence,
    SkippedNoSite,
    SkippedQueueFull,
    SkippedDuplicate,
    SkippedShuttingDown,
}

impl ValidationDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dispatched => "DISPATCHED",
            Self::SkippedLowConfidence => "SKIPPED_LOW_CONFIDENCE",
            Self::SkippedNoSite => "SKIPPED_NO_SITE",
            Self::SkippedQueueFull => "SKIPPED_QUEUE_FULL",
            Self::SkippedDuplicate => "SKIPPED_DUPLICATE",
            Self::SkippedShuttingDown => "SKIPPED_SHUTTING_DOWN",
        }
    }
}

/// Acknowledgment returned once a sample is durably stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReceipt {
    pub sample_id: SampleId,
    pub agent_id: AgentId,
    pub accepted_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    pub low_confidence: bool,
    pub duplicate: bool,
    pub validation: ValidationDisposition,
}

impl IngestReceipt {
    fn duplicate_of(sample: &LocationSample) -> Self {
        Self {
            sample_id: sample.id,
            agent_id: sample.agent_id,
            accepted_at: sample.received_at,
            recorded_at: sample.recorded_at,
            low_confidence: sample.low_confidence,
            duplicate: true,
            validation: ValidationDisposition::SkippedDuplicate,
        }
    }
}

pub struct LocationIngestor {
    locations: Arc<dyn LocationRepository>,
    tracking: Arc<TrackingTable>,
    dispatcher: Arc<ShardDispatcher>,
    events: EventBus,
    accuracy_ceiling_m: f64,
    timeout: Duration,
}

impl std::fmt::Debug for LocationIngestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationIngestor")
            .field("accuracy_ceiling_m", &self.accuracy_ceiling_m)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl LocationIngestor {
    pub fn new(
        locations: Arc<dyn LocationRepository>,
        tracking: Arc<TrackingTable>,
        dispatcher: Arc<ShardDispatcher>,
        events: EventBus,
        accuracy_ceiling_m: f64,
        timeout: Duration,
    ) -> Self {
        Self {
            locations,
            tracking,
            dispatcher,
            events,
            accuracy_ceiling_m,
            timeout,
        }
    }

    /// Accept a position report.
    ///
    /// # Errors
    ///
    /// - [`TrackingError::InvalidSample`] for malformed input. Nothing is stored.
    /// - [`TrackingError::PersistenceFailure`] when the sample could not be
    ///   stored. The client should retry, ideally with a `dedup_key`.
    /// - [`TrackingError::Timeout`] when the deadline elapsed first.
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestReceipt, TrackingError> {
        tokio::time::timeout(self.timeout, self.ingest_inner(request, Utc::now()))
            .await
            .map_err(|_| {
                tracing::warn!(timeout = ?self.timeout, "ingest deadline exceeded");
                TrackingError::Timeout(self.timeout)
            })?
    }

    async fn ingest_inner(
        &self,
        request: IngestRequest,
        now: DateTime<Utc>,
    ) -> Result<IngestReceipt, TrackingError> {
        let agent_id = request.agent_id;
        let sample = self.build_sample(request, now).map_err(|err| {
            tracing::debug!(agent_id = %agent_id, error = %err, "sample rejected");
            metrics::counter!(telemetry::SAMPLES_REJECTED, "reason" => "invalid_sample")
                .increment(1);
            TrackingError::InvalidSample(err)
        })?;

        if let Some(key) = &sample.dedup_key {
            if let Some(original) = self.locations.find_by_dedup_key(agent_id, key).await? {
                tracing::debug!(agent_id = %agent_id, sample_id = %original.id, "duplicate sample");
                return Ok(IngestReceipt::duplicate_of(&original));
            }
        }

        match self.locations.insert_sample(&sample).await {
            Ok(()) => {}
            Err(RepositoryError::Conflict(_)) if sample.dedup_key.is_some() => {
                // A concurrent retry with the same key won the insert.
                let key = sample.dedup_key.as_deref().unwrap_or_default();
                if let Some(original) = self.locations.find_by_dedup_key(agent_id, key).await? {
                    return Ok(IngestReceipt::duplicate_of(&original));
                }
                return Err(TrackingError::PersistenceFailure(RepositoryError::Conflict(
                    format!("dedup key {key:?} conflicted but no sample was found"),
                )));
            }
            Err(err) => {
                tracing::error!(agent_id = %agent_id, error = %err, "failed to persist sample");
                return Err(TrackingError::PersistenceFailure(err));
            }
        }

        self.tracking.record_sample(&sample);
        self.events.publish(TrackingEvent::LocationUpdated {
            agent_id,
            site_id: sample.site_id,
            sample_id: sample.id,
            coordinate: sample.coordinate,
            recorded_at: sample.recorded_at,
            low_confidence: sample.low_confidence,
        });
        metrics::counter!(telemetry::SAMPLES_INGESTED).increment(1);

        let mut receipt = IngestReceipt {
            sample_id: sample.id,
            agent_id,
            accepted_at: sample.received_at,
            recorded_at: sample.recorded_at,
            low_confidence: sample.low_confidence,
            duplicate: false,
            validation: ValidationDisposition::Dispatched,
        };
        receipt.validation = if sample.low_confidence {
            ValidationDisposition::SkippedLowConfidence
        } else if sample.site_id.is_none() {
            ValidationDisposition::SkippedNoSite
        } else {
            match self.dispatcher.dispatch(sample) {
                Ok(()) => ValidationDisposition::Dispatched,
                Err(DispatchError::QueueFull(shard)) => {
                    tracing::warn!(
                        agent_id = %agent_id,
                        sample_id = %receipt.sample_id,
                        shard,
                        "evaluation queue full, sample stored without validation"
                    );
                    ValidationDisposition::SkippedQueueFull
                }
                Err(DispatchError::Closed) => ValidationDisposition::SkippedShuttingDown,
            }
        };
        if receipt.validation != ValidationDisposition::Dispatched {
            metrics::counter!(telemetry::EVALUATIONS_DROPPED, "reason" => receipt.validation.as_str())
                .increment(1);
        }
        Ok(receipt)
    }

    fn build_sample(
        &self,
        request: IngestRequest,
        now: DateTime<Utc>,
    ) -> Result<LocationSample, geotrack_core::ValidationError> {
        let coordinate = Coordinate::new(request.latitude, request.longitude)?;
        validate_accuracy(request.accuracy_m)?;
        request.telemetry.validate()?;
        let recorded_at = request.recorded_at.unwrap_or(now);
        validate_recorded_at(recorded_at, now)?;
        if let Some(key) = &request.dedup_key {
            validate_dedup_key(key)?;
        }
        Ok(LocationSample {
            id: SampleId::new(),
            agent_id: request.agent_id,
            site_id: request.site_id,
            recorded_at,
            received_at: now,
            coordinate,
            accuracy_m: request.accuracy_m,
            telemetry: request.telemetry,
            low_confidence: request.accuracy_m > self.accuracy_ceiling_m,
            dedup_key: request.dedup_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::ViolationDetector;
    use crate::memory::InMemoryRepository;
    use crate::store::GeofenceStore;
    use geotrack_core::ValidationError;

    fn ingestor(repo: Arc<InMemoryRepository>) -> (LocationIngestor, Arc<TrackingTable>) {
        let tracking = Arc::new(TrackingTable::new());
        let events = EventBus::new(16);
        let detector = Arc::new(ViolationDetector::new(
            Arc::new(GeofenceStore::new(repo.clone(), Duration::from_secs(60))),
            repo.clone(),
            repo.clone(),
            Arc::clone(&tracking),
            events.clone(),
            2,
            false,
        ));
        let (dispatcher, _) = ShardDispatcher::spawn(detector, 2, 8);
        let ingestor = LocationIngestor::new(
            repo,
            Arc::clone(&tracking),
            Arc::new(dispatcher),
            events,
            100.0,
            Duration::from_secs(5),
        );
        (ingestor, tracking)
    }

    fn request(agent: AgentId) -> IngestRequest {
        IngestRequest {
            agent_id: agent,
            site_id: Some(SiteId::new()),
            latitude: 24.8607,
            longitude: 67.0011,
            accuracy_m: 8.0,
            recorded_at: None,
            telemetry: SampleTelemetry::default(),
            dedup_key: None,
        }
    }

    #[tokio::test]
    async fn accepted_sample_is_stored_and_tracked() {
        let repo = Arc::new(InMemoryRepository::new());
        let (ingestor, tracking) = ingestor(repo.clone());
        let agent = AgentId::new();
        let receipt = ingestor.ingest(request(agent)).await.unwrap();
        assert!(!receipt.duplicate);
        assert!(!receipt.low_confidence);
        assert_eq!(receipt.validation, ValidationDisposition::Dispatched);
        assert_eq!(repo.sample_count(), 1);
        let held = tracking.get(agent).unwrap().last_sample.unwrap();
        assert_eq!(held.id, receipt.sample_id);
    }

    #[tokio::test]
    async fn out_of_range_latitude_is_rejected_without_storing() {
        let repo = Arc::new(InMemoryRepository::new());
        let (ingestor, _) = ingestor(repo.clone());
        let mut req = request(AgentId::new());
        req.latitude = 91.0;
        let err = ingestor.ingest(req).await.unwrap_err();
        assert!(matches!(
            err,
            TrackingError::InvalidSample(ValidationError::LatitudeOutOfRange(_))
        ));
        assert_eq!(repo.sample_count(), 0);
    }

    #[tokio::test]
    async fn inaccurate_sample_is_stored_low_confidence() {
        let repo = Arc::new(InMemoryRepository::new());
        let (ingestor, _) = ingestor(repo.clone());
        let mut req = request(AgentId::new());
        req.accuracy_m = 500.0;
        let receipt = ingestor.ingest(req).await.unwrap();
        assert!(receipt.low_confidence);
        assert_eq!(receipt.validation, ValidationDisposition::SkippedLowConfidence);
        assert_eq!(repo.sample_count(), 1);
    }

    #[tokio::test]
    async fn sample_without_site_is_not_dispatched() {
        let repo = Arc::new(InMemoryRepository::new());
        let (ingestor, _) = ingestor(repo);
        let mut req = request(AgentId::new());
        req.site_id = None;
        let receipt = ingestor.ingest(req).await.unwrap();
        assert_eq!(receipt.validation, ValidationDisposition::SkippedNoSite);
    }

    #[tokio::test]
    async fn retry_with_dedup_key_returns_original_receipt() {
        let repo = Arc::new(InMemoryRepository::new());
        let (ingestor, _) = ingestor(repo.clone());
        let mut req = request(AgentId::new());
        req.dedup_key = Some("device-42:1001".into());

        let first = ingestor.ingest(req.clone()).await.unwrap();
        let retry = ingestor.ingest(req).await.unwrap();
        assert!(retry.duplicate);
        assert_eq!(retry.sample_id, first.sample_id);
        assert_eq!(retry.validation, ValidationDisposition::SkippedDuplicate);
        assert_eq!(repo.sample_count(), 1);
    }

    #[tokio::test]
    async fn storage_failure_is_reported_as_persistence_failure() {
        let repo = Arc::new(InMemoryRepository::new());
        let (ingestor, tracking) = ingestor(repo.clone());
        repo.fail_writes(true);
        let agent = AgentId::new();
        let err = ingestor.ingest(request(agent)).await.unwrap_err();
        assert!(matches!(err, TrackingError::PersistenceFailure(_)));
        assert!(err.is_retryable());
        assert!(tracking.get(agent).is_none());
    }
}
