//! # Tracking Queries
//!
//! Read side of the engine: current positions of active agents, bounded
//! per-agent history, and aggregate counters.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use geotrack_core::{
    AgentId, AgentStatus, Containment, Coordinate, LocationSample, SiteId, ViolationId,
};
use serde::Serialize;

use crate::error::TrackingError;
use crate::repository::{HistoryQuery, LocationRepository, ValidationRepository};
use crate::tracking::{AgentTrackingState, TrackingTable};

/// Last known position of one active agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentLocationSnapshot {
    pub agent_id: AgentId,
    pub site_id: Option<SiteId>,
    pub coordinate: Coordinate,
    pub accuracy_m: f64,
    pub recorded_at: DateTime<Utc>,
    pub status: AgentStatus,
    pub battery_level: Option<u8>,
    pub low_confidence: bool,
    /// Last site-level result, when the agent has been evaluated since the
    /// process started.
    pub containment: Option<Containment>,
    pub consecutive_outside: u32,
    pub open_violation: Option<ViolationId>,
}

impl AgentLocationSnapshot {
    fn from_sample(sample: &LocationSample) -> Self {
        Self {
            agent_id: sample.agent_id,
            site_id: sample.site_id,
            coordinate: sample.coordinate,
            accuracy_m: sample.accuracy_m,
            recorded_at: sample.recorded_at,
            status: sample.telemetry.status,
            battery_level: sample.telemetry.battery_level,
            low_confidence: sample.low_confidence,
            containment: None,
            consecutive_outside: 0,
            open_violation: None,
        }
    }

    fn with_state(mut self, state: &AgentTrackingState) -> Self {
        if let Some(debounce) = &state.debounce {
            if debounce.site_id == self.site_id {
                self.containment = debounce.last_containment;
                self.consecutive_outside = debounce.consecutive_outside;
                self.open_violation = debounce.open_violation.as_ref().map(|v| v.id);
            }
        }
        self
    }
}

/// History bounds as supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryRequest {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingStats {
    /// Agents that reported within the freshness window.
    pub active_agents: u64,
    pub samples_last_24h: u64,
    pub open_violations: u64,
    /// Samples in the last 24 hours per agent that reported in that period.
    pub avg_samples_per_agent: f64,
    pub generated_at: DateTime<Utc>,
}

pub struct TrackingQueryService {
    locations: Arc<dyn LocationRepository>,
    validations: Arc<dyn ValidationRepository>,
    tracking: Arc<TrackingTable>,
    freshness_window: Duration,
    default_limit: usize,
    max_limit: usize,
}

impl TrackingQueryService {
    pub fn new(
        locations: Arc<dyn LocationRepository>,
        validations: Arc<dyn ValidationRepository>,
        tracking: Arc<TrackingTable>,
        freshness_window: Duration,
        default_limit: usize,
        max_limit: usize,
    ) -> Self {
        Self {
            locations,
            validations,
            tracking,
            freshness_window,
            default_limit,
            max_limit,
        }
    }

    /// One snapshot per agent that reported within the freshness window,
    /// most recent first.
    ///
    /// In-memory state wins when it holds a newer sample than storage;
    /// agents unknown to this process are served from their latest
    /// persisted sample.
    pub async fn current_locations(&self) -> Result<Vec<AgentLocationSnapshot>, TrackingError> {
        self.current_locations_at(Utc::now()).await
    }

    pub async fn current_locations_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<AgentLocationSnapshot>, TrackingError> {
        let since = window_start(now, self.freshness_window);
        let mut latest: HashMap<AgentId, LocationSample> = self
            .locations
            .latest_samples_since(since)
            .await?
            .into_iter()
            .map(|s| (s.agent_id, s))
            .collect();

        let states: HashMap<AgentId, AgentTrackingState> =
            self.tracking.snapshot().into_iter().collect();
        for state in states.values() {
            let Some(sample) = &state.last_sample else {
                continue;
            };
            if sample.recorded_at < since {
                continue;
            }
            let newer = latest
                .get(&sample.agent_id)
                .map_or(true, |held| sample.recorded_at >= held.recorded_at);
            if newer {
                latest.insert(sample.agent_id, sample.clone());
            }
        }

        let mut snapshots: Vec<AgentLocationSnapshot> = latest
            .values()
            .map(|sample| {
                let snapshot = AgentLocationSnapshot::from_sample(sample);
                match states.get(&sample.agent_id) {
                    Some(state) => snapshot.with_state(state),
                    None => snapshot,
                }
            })
            .collect();
        snapshots.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        Ok(snapshots)
    }

    /// Samples of one agent, most recent first.
    ///
    /// # Errors
    ///
    /// [`TrackingError::InvalidQuery`] when `from` is after `to` or the
    /// limit is zero. Limits above the cap are clamped, not rejected.
    pub async fn history(
        &self,
        agent_id: AgentId,
        request: HistoryRequest,
    ) -> Result<Vec<LocationSample>, TrackingError> {
        if let (Some(from), Some(to)) = (request.from, request.to) {
            if from > to {
                return Err(TrackingError::InvalidQuery(format!(
                    "start {from} is after end {to}"
                )));
            }
        }
        let limit = request.limit.unwrap_or(self.default_limit);
        if limit == 0 {
            return Err(TrackingError::InvalidQuery("limit must be at least 1".into()));
        }
        let query = HistoryQuery {
            agent_id,
            from: request.from,
            to: request.to,
            limit: limit.min(self.max_limit),
        };
        let mut rows = self.locations.history(&query).await?;
        rows.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        rows.truncate(query.limit);
        Ok(rows)
    }

    pub async fn stats(&self) -> Result<TrackingStats, TrackingError> {
        let now = Utc::now();
        let active_agents = self.current_locations_at(now).await?.len() as u64;
        let day = self
            .locations
            .sample_activity_since(now - chrono::Duration::hours(24))
            .await?;
        let open_violations = self.validations.count_open_violations().await?;
        let avg_samples_per_agent = if day.agents == 0 {
            0.0
        } else {
            day.samples as f64 / day.agents as f64
        };
        Ok(TrackingStats {
            active_agents,
            samples_last_24h: day.samples,
            open_violations,
            avg_samples_per_agent,
            generated_at: now,
        })
    }
}

fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
