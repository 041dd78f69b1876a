//! # Violation Detector
//!
//! Evaluates a stored sample against the active zones of its site, writes
//! the audit trail, and runs the debounce that turns consecutive OUTSIDE
//! results into a single violation episode.
//!
//! ## Algorithm
//!
//! 1. Load the site's active zones. With none configured, write one INSIDE
//!    validation against [`GeofenceId::NO_ZONES_CONFIGURED`].
//! 2. Check every zone; write one validation per (sample, zone).
//! 3. The agent is contained if it is inside at least one zone.
//! 4. OUTSIDE increments the counter. Reaching the threshold with no open
//!    violation opens one against the nearest zone. INSIDE resets the
//!    counter and resolves the open violation, or with manual resolution
//!    only flags it `auto_resolvable`.
//! 5. Validation rows and the violation change are written together; the
//!    in-memory state is committed only after that write succeeds.
//!
//! A failed zone lookup skips the sample (fails open). A sample older than
//! the last one evaluated is audited but does not move the counter.
//!
//! Evaluations for one agent must not run concurrently. The
//! [`crate::dispatch::ShardDispatcher`] guarantees this by pinning each
//! agent to one worker.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use geotrack_core::{
    AgentId, Containment, Coordinate, Geofence, GeofenceId, GeofenceValidation,
    GeofenceViolation, LocationSample, SampleId, SiteId, ValidationId, ViolationId,
};
use serde::Serialize;

use crate::error::{RepositoryError, TrackingError};
use crate::events::{EventBus, TrackingEvent};
use crate::repository::{LocationRepository, ValidationRepository, ViolationChange};
use crate::store::GeofenceStore;
use crate::telemetry;
use crate::tracking::{DebounceState, TrackingTable};

/// Why a sample was stored but not evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    NoSite,
    LowConfidence,
    ZoneLookupFailure,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoSite => "no_site",
            Self::LowConfidence => "low_confidence",
            Self::ZoneLookupFailure => "zone_lookup_failure",
        }
    }
}

/// Result of checking one point against one zone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneCheck {
    pub geofence_id: GeofenceId,
    pub label: String,
    pub result: Containment,
    pub distance_outside_m: f64,
}

/// What happened to one sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationOutcome {
    pub sample_id: SampleId,
    pub agent_id: AgentId,
    pub site_id: Option<SiteId>,
    /// Site-level result. `None` when the sample was skipped.
    pub result: Option<Containment>,
    pub zones_checked: usize,
    pub consecutive_outside: u32,
    pub violation_opened: Option<ViolationId>,
    pub violation_resolved: Option<ViolationId>,
    /// The sample predates the last evaluated one and only produced audit rows.
    pub stale: bool,
    pub skipped: Option<SkipReason>,
}

impl ValidationOutcome {
    fn skipped(sample: &LocationSample, reason: SkipReason) -> Self {
        Self {
            sample_id: sample.id,
            agent_id: sample.agent_id,
            site_id: sample.site_id,
            result: None,
            zones_checked: 0,
            consecutive_outside: 0,
            violation_opened: None,
            violation_resolved: None,
            stale: false,
            skipped: Some(reason),
        }
    }

    pub fn violation_created(&self) -> bool {
        self.violation_opened.is_some()
    }
}

/// Answer to a one-off "am I allowed here" question. Nothing is persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdHocCheck {
    pub site_id: SiteId,
    pub coordinate: Coordinate,
    pub result: Containment,
    pub zones_configured: usize,
    /// Distance to the nearest zone, zero when inside.
    pub distance_outside_m: f64,
    pub zones: Vec<ZoneCheck>,
}

/// Check `point` against every zone. An empty zone set contains everything.
pub fn check_zones(zones: &[Geofence], point: &Coordinate) -> (Containment, Vec<ZoneCheck>) {
    let checks: Vec<ZoneCheck> = zones
        .iter()
        .map(|zone| {
            let inside = zone.contains(point);
            ZoneCheck {
                geofence_id: zone.id,
                label: zone.label.clone(),
                result: Containment::from_inside(inside),
                distance_outside_m: if inside {
                    0.0
                } else {
                    zone.distance_outside_m(point)
                },
            }
        })
        .collect();
    let contained = checks.is_empty() || checks.iter().any(|c| c.result.is_inside());
    (Containment::from_inside(contained), checks)
}

fn nearest(checks: &[ZoneCheck]) -> Option<&ZoneCheck> {
    checks
        .iter()
        .min_by(|a, b| a.distance_outside_m.total_cmp(&b.distance_outside_m))
}

pub struct ViolationDetector {
    store: Arc<GeofenceStore>,
    locations: Arc<dyn LocationRepository>,
    validations: Arc<dyn ValidationRepository>,
    tracking: Arc<TrackingTable>,
    events: EventBus,
    threshold: u32,
    manual_resolution: bool,
}

impl std::fmt::Debug for ViolationDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViolationDetector")
            .field("threshold", &self.threshold)
            .field("manual_resolution", &self.manual_resolution)
            .finish()
    }
}

impl ViolationDetector {
    pub fn new(
        store: Arc<GeofenceStore>,
        locations: Arc<dyn LocationRepository>,
        validations: Arc<dyn ValidationRepository>,
        tracking: Arc<TrackingTable>,
        events: EventBus,
        threshold: u32,
        manual_resolution: bool,
    ) -> Self {
        Self {
            store,
            locations,
            validations,
            tracking,
            events,
            threshold: threshold.max(1),
            manual_resolution,
        }
    }

    /// Evaluate a persisted sample.
    ///
    /// # Errors
    ///
    /// [`TrackingError::PersistenceFailure`] when the audit write fails. The
    /// agent's debounce state is left untouched in that case.
    pub async fn evaluate(&self, sample: &LocationSample) -> Result<ValidationOutcome, TrackingError> {
        let Some(site_id) = sample.site_id else {
            return Ok(ValidationOutcome::skipped(sample, SkipReason::NoSite));
        };
        if sample.low_confidence {
            return Ok(ValidationOutcome::skipped(sample, SkipReason::LowConfidence));
        }

        let zones = match self.store.zones_for_site(site_id).await {
            Ok(zones) => zones,
            Err(err) => {
                tracing::warn!(
                    agent_id = %sample.agent_id,
                    site_id = %site_id,
                    sample_id = %sample.id,
                    error = %err,
                    "zone lookup failed, skipping validation"
                );
                metrics::counter!(telemetry::ZONE_LOOKUP_FAILURES).increment(1);
                metrics::counter!(telemetry::EVALUATIONS_DROPPED, "reason" => SkipReason::ZoneLookupFailure.as_str())
                    .increment(1);
                return Ok(ValidationOutcome::skipped(sample, SkipReason::ZoneLookupFailure));
            }
        };

        let now = Utc::now();
        let (result, checks) = check_zones(&zones, &sample.coordinate);
        let rows = validation_rows(sample, site_id, result, &checks, now);
        let prior = self.load_debounce(sample, site_id).await?;

        let mut outcome = ValidationOutcome {
            sample_id: sample.id,
            agent_id: sample.agent_id,
            site_id: Some(site_id),
            result: Some(result),
            zones_checked: zones.len(),
            consecutive_outside: prior.consecutive_outside,
            violation_opened: None,
            violation_resolved: None,
            stale: false,
            skipped: None,
        };

        if prior
            .last_evaluated_at
            .is_some_and(|last| sample.recorded_at < last)
        {
            self.validations.record_evaluation(&rows, None).await?;
            metrics::counter!(telemetry::VALIDATIONS, "result" => result.as_str()).increment(1);
            tracing::debug!(
                agent_id = %sample.agent_id,
                sample_id = %sample.id,
                "out-of-order sample audited without moving debounce state"
            );
            outcome.stale = true;
            return Ok(outcome);
        }

        let mut next = prior.clone();
        next.last_evaluated_at = Some(sample.recorded_at);
        next.last_containment = Some(result);
        next.zone_results = checks.iter().map(|c| (c.geofence_id, c.result)).collect();

        let mut change = None;
        if result.is_inside() {
            next.consecutive_outside = 0;
            if let Some(open) = &prior.open_violation {
                if !self.manual_resolution {
                    change = Some(ViolationChange::Resolve { id: open.id, at: now });
                    next.open_violation = None;
                    outcome.violation_resolved = Some(open.id);
                } else if !open.auto_resolvable {
                    change = Some(ViolationChange::MarkAutoResolvable {
                        id: open.id,
                        auto_resolvable: true,
                    });
                    if let Some(v) = next.open_violation.as_mut() {
                        v.auto_resolvable = true;
                    }
                }
            }
        } else {
            next.consecutive_outside = prior.consecutive_outside.saturating_add(1);
            let crossed = prior.consecutive_outside < self.threshold
                && next.consecutive_outside >= self.threshold;
            match &prior.open_violation {
                None if next.consecutive_outside >= self.threshold => {
                    if let Some(target) = nearest(&checks) {
                        let violation = new_violation(sample, site_id, target);
                        next.open_violation = Some(violation.clone());
                        next.last_violation_at = Some(violation.occurred_at);
                        change = Some(ViolationChange::Open(violation));
                    }
                }
                Some(open) if crossed && open.auto_resolvable => {
                    // Left again while the previous episode awaits a
                    // supervisor. Storage decides whether it is still open.
                    match self
                        .validations
                        .open_violation(sample.agent_id, site_id)
                        .await?
                    {
                        Some(mut current) => {
                            current.auto_resolvable = false;
                            change = Some(ViolationChange::MarkAutoResolvable {
                                id: current.id,
                                auto_resolvable: false,
                            });
                            next.open_violation = Some(current);
                        }
                        None => {
                            if let Some(target) = nearest(&checks) {
                                let violation = new_violation(sample, site_id, target);
                                next.open_violation = Some(violation.clone());
                                next.last_violation_at = Some(violation.occurred_at);
                                change = Some(ViolationChange::Open(violation));
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        match self
            .validations
            .record_evaluation(&rows, change.as_ref())
            .await
        {
            Ok(()) => {}
            Err(RepositoryError::Conflict(reason))
                if matches!(change, Some(ViolationChange::Open(_))) =>
            {
                tracing::warn!(
                    agent_id = %sample.agent_id,
                    site_id = %site_id,
                    reason = %reason,
                    "violation already open in storage, adopting it"
                );
                let existing = self
                    .validations
                    .open_violation(sample.agent_id, site_id)
                    .await?;
                self.validations.record_evaluation(&rows, None).await?;
                next.last_violation_at = existing.as_ref().map(|v| v.occurred_at);
                next.open_violation = existing;
                change = None;
            }
            Err(err) => return Err(err.into()),
        }

        outcome.consecutive_outside = next.consecutive_outside;
        if let Some(ViolationChange::Open(v)) = &change {
            outcome.violation_opened = Some(v.id);
        }
        self.tracking.commit_debounce(sample.agent_id, next);
        self.announce(sample, site_id, &outcome, change.as_ref(), now);
        Ok(outcome)
    }

    /// One-off containment check for a coordinate. Writes nothing and does
    /// not touch any agent's state.
    ///
    /// # Errors
    ///
    /// [`TrackingError::ZoneLookupFailure`] when zones cannot be loaded.
    pub async fn check(
        &self,
        site_id: SiteId,
        coordinate: Coordinate,
    ) -> Result<AdHocCheck, TrackingError> {
        let zones = self.store.zones_for_site(site_id).await?;
        let (result, checks) = check_zones(&zones, &coordinate);
        let distance_outside_m = if result.is_inside() {
            0.0
        } else {
            nearest(&checks).map_or(0.0, |c| c.distance_outside_m)
        };
        Ok(AdHocCheck {
            site_id,
            coordinate,
            result,
            zones_configured: zones.len(),
            distance_outside_m,
            zones: checks,
        })
    }

    /// Debounce state for the sample's agent at `site_id`, rebuilt from
    /// storage when absent, inconsistent, or tracking a different site.
    ///
    /// A rebuild takes `last_evaluated_at` from the agent's newest stored
    /// sample that was received no later than `sample`, so samples that
    /// predate it stay audit-only after a restart. Newer arrivals are still
    /// queued behind `sample` and have not been evaluated yet.
    async fn load_debounce(
        &self,
        sample: &LocationSample,
        site_id: SiteId,
    ) -> Result<DebounceState, TrackingError> {
        let agent_id = sample.agent_id;
        let cause = match self.tracking.debounce(agent_id) {
            None => "cold",
            Some(state) => match state.check_consistency() {
                Ok(()) if state.site_id == Some(site_id) => return Ok(state),
                Ok(()) => {
                    tracing::debug!(
                        agent_id = %agent_id,
                        site_id = %site_id,
                        "site changed, debounce state reset"
                    );
                    "site_change"
                }
                Err(reason) => {
                    let err = TrackingError::AgentStateCorruption { agent_id, reason };
                    tracing::warn!(error = %err, "discarding tracking state");
                    "corruption"
                }
            },
        };
        metrics::counter!(telemetry::STATE_REBUILDS, "cause" => cause).increment(1);
        let open = self.validations.open_violation(agent_id, site_id).await?;
        let mut state = DebounceState::rebuilt(site_id, open, self.threshold);

        let latest = self
            .locations
            .latest_sample(agent_id)
            .await?
            .filter(|latest| latest.received_at <= sample.received_at);
        if let Some(latest) = latest {
            state.last_evaluated_at = Some(latest.recorded_at);
            self.tracking.record_sample(&latest);
        }
        Ok(state)
    }

    fn announce(
        &self,
        sample: &LocationSample,
        site_id: SiteId,
        outcome: &ValidationOutcome,
        change: Option<&ViolationChange>,
        now: DateTime<Utc>,
    ) {
        let result = outcome.result.unwrap_or(Containment::Inside);
        metrics::counter!(telemetry::VALIDATIONS, "result" => result.as_str()).increment(1);
        self.events.publish(TrackingEvent::SampleValidated {
            agent_id: sample.agent_id,
            site_id,
            sample_id: sample.id,
            result,
            consecutive_outside: outcome.consecutive_outside,
        });

        match change {
            Some(ViolationChange::Open(v)) => {
                tracing::info!(
                    agent_id = %v.agent_id,
                    site_id = %v.site_id,
                    violation_id = %v.id,
                    geofence_id = %v.geofence_id,
                    distance_outside_m = v.distance_outside_m,
                    "geofence violation opened"
                );
                metrics::counter!(telemetry::VIOLATIONS_OPENED).increment(1);
                self.events
                    .publish(TrackingEvent::ViolationOpened { violation: v.clone() });
            }
            Some(ViolationChange::Resolve { id, .. }) => {
                tracing::info!(
                    agent_id = %sample.agent_id,
                    site_id = %site_id,
                    violation_id = %id,
                    "geofence violation resolved"
                );
                metrics::counter!(telemetry::VIOLATIONS_RESOLVED, "mode" => "auto").increment(1);
                self.events.publish(TrackingEvent::ViolationResolved {
                    violation_id: *id,
                    agent_id: sample.agent_id,
                    site_id,
                    resolved_at: now,
                    manual: false,
                });
            }
            Some(ViolationChange::MarkAutoResolvable {
                id,
                auto_resolvable,
            }) => {
                tracing::info!(
                    agent_id = %sample.agent_id,
                    violation_id = %id,
                    auto_resolvable,
                    "violation awaiting manual resolution updated"
                );
            }
            None => {}
        }
    }
}

fn validation_rows(
    sample: &LocationSample,
    site_id: SiteId,
    site_result: Containment,
    checks: &[ZoneCheck],
    now: DateTime<Utc>,
) -> Vec<GeofenceValidation> {
    let row = |geofence_id: GeofenceId, result: Containment| GeofenceValidation {
        id: ValidationId::new(),
        agent_id: sample.agent_id,
        geofence_id,
        site_id,
        sample_id: sample.id,
        result,
        validated_at: now,
    };
    if checks.is_empty() {
        return vec![row(GeofenceId::NO_ZONES_CONFIGURED, site_result)];
    }
    checks.iter().map(|c| row(c.geofence_id, c.result)).collect()
}

fn new_violation(sample: &LocationSample, site_id: SiteId, target: &ZoneCheck) -> GeofenceViolation {
    GeofenceViolation {
        id: ViolationId::new(),
        agent_id: sample.agent_id,
        geofence_id: target.geofence_id,
        site_id,
        sample_id: sample.id,
        distance_outside_m: target.distance_outside_m,
        occurred_at: sample.recorded_at,
        resolved: false,
        resolved_at: None,
        auto_resolvable: false,
    }
}
