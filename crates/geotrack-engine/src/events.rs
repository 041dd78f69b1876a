//! # Tracking Events
//!
//! Fire-and-forget notifications for downstream consumers such as a live
//! map or the notification service. Backed by a `tokio::sync::broadcast`
//! channel: publishing never blocks, and slow subscribers lose the oldest
//! events instead of applying back-pressure to ingestion.

use chrono::{DateTime, Utc};
use geotrack_core::{
    AgentId, Containment, Coordinate, GeofenceViolation, SampleId, SiteId, ViolationId,
};
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrackingEvent {
    LocationUpdated {
        agent_id: AgentId,
        site_id: Option<SiteId>,
        sample_id: SampleId,
        coordinate: Coordinate,
        recorded_at: DateTime<Utc>,
        low_confidence: bool,
    },
    SampleValidated {
        agent_id: AgentId,
        site_id: SiteId,
        sample_id: SampleId,
        result: Containment,
        consecutive_outside: u32,
    },
    ViolationOpened {
        violation: GeofenceViolation,
    },
    ViolationResolved {
        violation_id: ViolationId,
        agent_id: AgentId,
        site_id: SiteId,
        resolved_at: DateTime<Utc>,
        /// Closed by a supervisor rather than by the agent returning.
        manual: bool,
    },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TrackingEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: TrackingEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackingEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
