//! # Location Samples
//!
//! A position report from a field agent. Samples are immutable once
//! written and are only ever removed by retention cleanup.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::coordinate::Coordinate;
use crate::error::ValidationError;
use crate::identity::{AgentId, SampleId, SiteId};

/// Longest accepted client deduplication key.
pub const MAX_DEDUP_KEY_LEN: usize = 128;

/// Tolerated device clock skew for client-supplied timestamps.
pub const MAX_CLOCK_SKEW_SECS: i64 = 300;

/// Activity status reported by the agent device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    #[default]
    Active,
    Idle,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Idle => "IDLE",
            Self::Offline => "OFFLINE",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "IDLE" => Ok(Self::Idle),
            "OFFLINE" => Ok(Self::Offline),
            other => Err(format!("unknown agent status: {other}")),
        }
    }
}

/// Optional device readings accompanying a position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleTelemetry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_mps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading_deg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<u8>,
    #[serde(default)]
    pub status: AgentStatus,
}

impl SampleTelemetry {
    /// Check speed, heading and battery ranges.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(speed) = self.speed_mps {
            if !speed.is_finite() || speed < 0.0 {
                return Err(ValidationError::InvalidSpeed(speed));
            }
        }
        if let Some(heading) = self.heading_deg {
            if !heading.is_finite() || !(0.0..360.0).contains(&heading) {
                return Err(ValidationError::InvalidHeading(heading));
            }
        }
        if let Some(battery) = self.battery_level {
            if battery > 100 {
                return Err(ValidationError::InvalidBattery(battery));
            }
        }
        Ok(())
    }
}

/// A persisted position report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub id: SampleId,
    pub agent_id: AgentId,
    /// Site the agent was assigned to when the sample was taken.
    pub site_id: Option<SiteId>,
    /// Device timestamp (or receive time when the device sent none).
    pub recorded_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub coordinate: Coordinate,
    /// Horizontal accuracy radius in meters.
    pub accuracy_m: f64,
    #[serde(flatten)]
    pub telemetry: SampleTelemetry,
    /// Set when accuracy exceeded the trust ceiling. Such samples are kept
    /// for trajectory display but never validated.
    pub low_confidence: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_key: Option<String>,
}

/// Check a horizontal accuracy value.
pub fn validate_accuracy(accuracy_m: f64) -> Result<(), ValidationError> {
    if !accuracy_m.is_finite() || accuracy_m < 0.0 {
        return Err(ValidationError::InvalidAccuracy(accuracy_m));
    }
    Ok(())
}

/// Check a client deduplication key.
pub fn validate_dedup_key(key: &str) -> Result<(), ValidationError> {
    let len = key.chars().count();
    if len == 0 || len > MAX_DEDUP_KEY_LEN {
        return Err(ValidationError::InvalidDedupKey {
            len,
            max: MAX_DEDUP_KEY_LEN,
        });
    }
    Ok(())
}

/// Reject device timestamps further ahead of `now` than the allowed skew.
pub fn validate_recorded_at(
    recorded_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), ValidationError> {
    if recorded_at > now + Duration::seconds(MAX_CLOCK_SKEW_SECS) {
        return Err(ValidationError::TimestampInFuture(recorded_at.to_rfc3339()));
    }
    Ok(())
}
