//! # Agent Tracking State
//!
//! Per-agent transient state, keyed 1:1 by agent. It is a cache over
//! persisted data: losing it costs nothing but a rebuild on the agent's
//! next sample.
//!
//! Two writers touch an entry, each owning a disjoint part:
//! - the ingestor sets `last_sample`;
//! - the agent's shard worker owns `debounce`.
//!
//! Both write through [`DashMap`] entry guards, so neither overwrites the
//! other's fields.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use geotrack_core::{
    AgentId, Containment, GeofenceId, GeofenceViolation, LocationSample, SiteId, ViolationId,
};

/// Debounce context of an agent at one site.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DebounceState {
    pub site_id: Option<SiteId>,
    /// Last result per zone of the site.
    pub zone_results: HashMap<GeofenceId, Containment>,
    /// Last site-level result (union of zones).
    pub last_containment: Option<Containment>,
    pub consecutive_outside: u32,
    /// The unresolved violation the detector currently tracks.
    pub open_violation: Option<GeofenceViolation>,
    pub last_violation_at: Option<DateTime<Utc>>,
    /// `recorded_at` of the newest sample that moved this state.
    pub last_evaluated_at: Option<DateTime<Utc>>,
}

impl DebounceState {
    /// Fresh state for `site_id`, seeded with the agent's unresolved
    /// violation there, if any.
    ///
    /// An open violation that is not yet `auto_resolvable` means the agent
    /// was last seen outside, so the counter starts at the threshold.
    pub fn rebuilt(site_id: SiteId, open: Option<GeofenceViolation>, threshold: u32) -> Self {
        let mut state = DebounceState {
            site_id: Some(site_id),
            ..Default::default()
        };
        if let Some(v) = open {
            state.last_violation_at = Some(v.occurred_at);
            if v.auto_resolvable {
                state.last_containment = Some(Containment::Inside);
            } else {
                state.last_containment = Some(Containment::Outside);
                state.consecutive_outside = threshold;
            }
            state.open_violation = Some(v);
        }
        state
    }

    /// Check internal consistency.
    pub fn check_consistency(&self) -> Result<(), String> {
        if self.consecutive_outside > 0 && self.last_containment != Some(Containment::Outside) {
            return Err(format!(
                "consecutive_outside is {} but the last result was {:?}",
                self.consecutive_outside, self.last_containment
            ));
        }
        if let Some(v) = &self.open_violation {
            if self.site_id != Some(v.site_id) {
                return Err(format!(
                    "open violation {} belongs to site {} but state tracks {:?}",
                    v.id, v.site_id, self.site_id
                ));
            }
            if !v.is_open() {
                return Err(format!("tracked violation {} is already resolved", v.id));
            }
            if self.last_violation_at.is_none() {
                return Err("open violation without a violation timestamp".into());
            }
        }
        if self.site_id.is_none() && self.last_containment.is_some() {
            return Err("containment recorded without a site".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentTrackingState {
    pub last_sample: Option<LocationSample>,
    /// `None` until the agent's first evaluated sample.
    pub debounce: Option<DebounceState>,
}

/// Sharded map of per-agent state.
#[derive(Debug, Default)]
pub struct TrackingTable {
    agents: DashMap<AgentId, AgentTrackingState>,
}

impl TrackingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `sample` as the agent's last known position unless a newer
    /// one is already held.
    pub fn record_sample(&self, sample: &LocationSample) {
        let mut entry = self.agents.entry(sample.agent_id).or_default();
        let newer = entry
            .last_sample
            .as_ref()
            .map_or(true, |held| sample.recorded_at >= held.recorded_at);
        if newer {
            entry.last_sample = Some(sample.clone());
        }
    }

    pub fn get(&self, agent_id: AgentId) -> Option<AgentTrackingState> {
        self.agents.get(&agent_id).map(|e| e.clone())
    }

    pub fn debounce(&self, agent_id: AgentId) -> Option<DebounceState> {
        self.agents.get(&agent_id).and_then(|e| e.debounce.clone())
    }

    /// Replace the debounce state of an agent.
    pub fn commit_debounce(&self, agent_id: AgentId, state: DebounceState) {
        self.agents.entry(agent_id).or_default().debounce = Some(state);
    }

    /// Forget an agent's debounce state if it still tracks `violation_id`,
    /// so the next evaluation rebuilds it from storage. Returns whether the
    /// state was dropped.
    pub fn forget_violation(&self, agent_id: AgentId, violation_id: ViolationId) -> bool {
        let Some(mut entry) = self.agents.get_mut(&agent_id) else {
            return false;
        };
        let tracked = entry
            .debounce
            .as_ref()
            .and_then(|d| d.open_violation.as_ref())
            .is_some_and(|v| v.id == violation_id);
        if tracked {
            entry.debounce = None;
        }
        tracked
    }

    pub fn snapshot(&self) -> Vec<(AgentId, AgentTrackingState)> {
        self.agents
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
