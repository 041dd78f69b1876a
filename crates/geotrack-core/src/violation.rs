//! # Validation and Violation Records
//!
//! A [`GeofenceValidation`] is written for every (sample, zone) check and
//! forms the complete audit trail. A [`GeofenceViolation`] is the derived,
//! actionable subset: one record per debounced excursion outside all
//! active zones of a site.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{AgentId, GeofenceId, SampleId, SiteId, ValidationId, ViolationId};

/// Result of a single containment check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Containment {
    Inside,
    Outside,
}

impl Containment {
    pub fn from_inside(inside: bool) -> Self {
        if inside {
            Self::Inside
        } else {
            Self::Outside
        }
    }

    pub fn is_inside(&self) -> bool {
        matches!(self, Self::Inside)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inside => "INSIDE",
            Self::Outside => "OUTSIDE",
        }
    }
}

impl std::fmt::Display for Containment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Containment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSIDE" => Ok(Self::Inside),
            "OUTSIDE" => Ok(Self::Outside),
            other => Err(format!("unknown containment result: {other}")),
        }
    }
}

/// One containment check of one sample against one zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceValidation {
    pub id: ValidationId,
    pub agent_id: AgentId,
    /// [`GeofenceId::NO_ZONES_CONFIGURED`] when the site had no active zones.
    pub geofence_id: GeofenceId,
    pub site_id: SiteId,
    pub sample_id: SampleId,
    pub result: Containment,
    pub validated_at: DateTime<Utc>,
}

/// A confirmed, debounced excursion of an agent outside every active zone
/// of its site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceViolation {
    pub id: ViolationId,
    pub agent_id: AgentId,
    /// The active zone nearest to the triggering sample.
    pub geofence_id: GeofenceId,
    pub site_id: SiteId,
    /// The sample that confirmed the excursion.
    pub sample_id: SampleId,
    pub distance_outside_m: f64,
    pub occurred_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    /// The agent is back inside, but closing the violation is left to a
    /// supervisor.
    pub auto_resolvable: bool,
}

impl GeofenceViolation {
    /// Whether the violation still awaits resolution.
    pub fn is_open(&self) -> bool {
        !self.resolved
    }

    /// Close the violation. Resolving twice keeps the first timestamp.
    pub fn resolve(&mut self, at: DateTime<Utc>) {
        if !self.resolved {
            self.resolved = true;
            self.resolved_at = Some(at);
        }
    }
}
