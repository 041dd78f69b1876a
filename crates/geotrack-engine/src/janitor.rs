//! # Retention Janitor
//!
//! Deletes samples and validation rows older than a horizon. Deletes are
//! issued in bounded batches by timestamp range so concurrent ingestion is
//! never blocked for long. Violations are kept: they are the actionable
//! record and reference samples by id only.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::TrackingError;
use crate::repository::{LocationRepository, ValidationRepository};
use crate::telemetry;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanupReport {
    pub days_to_keep: u32,
    /// Rows strictly older than this were removed.
    pub cutoff: DateTime<Utc>,
    pub samples_deleted: u64,
    pub validations_deleted: u64,
}

pub struct RetentionJanitor {
    locations: Arc<dyn LocationRepository>,
    validations: Arc<dyn ValidationRepository>,
    batch_size: usize,
}

impl RetentionJanitor {
    pub fn new(
        locations: Arc<dyn LocationRepository>,
        validations: Arc<dyn ValidationRepository>,
        batch_size: usize,
    ) -> Self {
        Self {
            locations,
            validations,
            batch_size: batch_size.max(1),
        }
    }

    /// Delete everything older than `days_to_keep` days.
    pub async fn cleanup(&self, days_to_keep: u32) -> Result<CleanupReport, TrackingError> {
        self.cleanup_at(days_to_keep, Utc::now()).await
    }

    /// [`cleanup`](Self::cleanup) relative to an explicit `now`.
    ///
    /// Rows with a timestamp at or after `now - days_to_keep` are never
    /// touched.
    ///
    /// # Errors
    ///
    /// [`TrackingError::InvalidQuery`] when `days_to_keep` is zero or the
    /// horizon lies before the representable time range.
    pub async fn cleanup_at(
        &self,
        days_to_keep: u32,
        now: DateTime<Utc>,
    ) -> Result<CleanupReport, TrackingError> {
        if days_to_keep == 0 {
            return Err(TrackingError::InvalidQuery(
                "days_to_keep must be at least 1".into(),
            ));
        }
        let cutoff = chrono::Duration::try_days(i64::from(days_to_keep))
            .and_then(|d| now.checked_sub_signed(d))
            .ok_or_else(|| {
                TrackingError::InvalidQuery(format!("days_to_keep {days_to_keep} is out of range"))
            })?;

        let mut samples_deleted = 0;
        loop {
            let n = self
                .locations
                .delete_samples_before(cutoff, self.batch_size)
                .await?;
            samples_deleted += n;
            if (n as usize) < self.batch_size {
                break;
            }
            tokio::task::yield_now().await;
        }

        let mut validations_deleted = 0;
        loop {
            let n = self
                .validations
                .delete_validations_before(cutoff, self.batch_size)
                .await?;
            validations_deleted += n;
            if (n as usize) < self.batch_size {
                break;
            }
            tokio::task::yield_now().await;
        }

        metrics::counter!(telemetry::RETENTION_DELETED, "table" => "location_samples")
            .increment(samples_deleted);
        metrics::counter!(telemetry::RETENTION_DELETED, "table" => "geofence_validations")
            .increment(validations_deleted);
        tracing::info!(
            days_to_keep,
            cutoff = %cutoff,
            samples_deleted,
            validations_deleted,
            "retention sweep complete"
        );
        Ok(CleanupReport {
            days_to_keep,
            cutoff,
            samples_deleted,
            validations_deleted,
        })
    }

    /// Run [`cleanup`](Self::cleanup) every `interval` until `shutdown`
    /// flips to `true`. The first sweep runs one full interval after start.
    pub fn spawn(
        self: Arc<Self>,
        interval: Duration,
        days_to_keep: u32,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.cleanup(days_to_keep).await {
                            tracing::error!(error = %err, "scheduled retention sweep failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("retention janitor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRepository;
    use chrono::Duration as ChronoDuration;
    use geotrack_core::{AgentId, Coordinate, LocationSample, SampleId, SampleTelemetry};
    use proptest::prelude::*;

    fn sample(recorded_at: DateTime<Utc>) -> LocationSample {
        LocationSample {
            id: SampleId::new(),
            agent_id: AgentId::new(),
            site_id: None,
            recorded_at,
            received_at: recorded_at,
            coordinate: Coordinate::new(0.0, 0.0).unwrap(),
            accuracy_m: 1.0,
            telemetry: SampleTelemetry::default(),
            low_confidence: false,
            dedup_key: None,
        }
    }

    #[tokio::test]
    async fn zero_days_is_rejected() {
        let repo = Arc::new(InMemoryRepository::new());
        let janitor = RetentionJanitor::new(repo.clone(), repo, 10);
        assert!(matches!(
            janitor.cleanup(0).await,
            Err(TrackingError::InvalidQuery(_))
        ));
    }

    #[tokio::test]
    async fn sweeps_in_batches_until_done() {
        let repo = Arc::new(InMemoryRepository::new());
        let now = Utc::now();
        for i in 0..25 {
            repo.insert_sample(&sample(now - ChronoDuration::days(40) - ChronoDuration::minutes(i)))
                .await
                .unwrap();
        }
        repo.insert_sample(&sample(now - ChronoDuration::days(1)))
            .await
            .unwrap();
        let janitor = RetentionJanitor::new(repo.clone(), repo.clone(), 4);
        let report = janitor.cleanup_at(30, now).await.unwrap();
        assert_eq!(report.samples_deleted, 25);
        assert_eq!(repo.sample_count(), 1);
        assert_eq!(report.cutoff, now - ChronoDuration::days(30));
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_loop_stops_on_shutdown() {
        let repo = Arc::new(InMemoryRepository::new());
        let janitor = Arc::new(RetentionJanitor::new(repo.clone(), repo, 10));
        let (tx, rx) = watch::channel(false);
        let handle = janitor.spawn(Duration::from_secs(3600), 30, rx);
        tokio::time::advance(Duration::from_secs(7200)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    proptest! {
        #[test]
        fn never_deletes_inside_the_horizon(
            ages_hours in proptest::collection::vec(0i64..2_000, 1..40),
            days_to_keep in 1u32..60,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let repo = Arc::new(InMemoryRepository::new());
                let now = Utc::now();
                for age in &ages_hours {
                    repo.insert_sample(&sample(now - ChronoDuration::hours(*age))).await.unwrap();
                }
                let janitor = RetentionJanitor::new(repo.clone(), repo.clone(), 3);
                let report = janitor.cleanup_at(days_to_keep, now).await.unwrap();

                let horizon = now - ChronoDuration::days(i64::from(days_to_keep));
                let expected_kept = ages_hours
                    .iter()
                    .filter(|age| now - ChronoDuration::hours(**age) >= horizon)
                    .count();
                prop_assert_eq!(repo.sample_count(), expected_kept);
                prop_assert_eq!(
                    report.samples_deleted as usize,
                    ages_hours.len() - expected_kept
                );
                Ok(())
            })?;
        }
    }
}
