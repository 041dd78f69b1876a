//! Metric names recorded by the engine through the `metrics` facade.
//!
//! Nothing is exported unless the host process installs a recorder; the
//! API binary installs the Prometheus exporter and calls
//! [`describe_metrics`] once at startup.

pub const SAMPLES_INGESTED: &str = "geotrack_samples_ingested_total";
pub const SAMPLES_REJECTED: &str = "geotrack_samples_rejected_total";
pub const VALIDATIONS: &str = "geotrack_validations_total";
pub const VIOLATIONS_OPENED: &str = "geotrack_violations_opened_total";
pub const VIOLATIONS_RESOLVED: &str = "geotrack_violations_resolved_total";
pub const EVALUATIONS_DROPPED: &str = "geotrack_evaluations_dropped_total";
pub const ZONE_LOOKUP_FAILURES: &str = "geotrack_zone_lookup_failures_total";
pub const STATE_REBUILDS: &str = "geotrack_state_rebuilds_total";
pub const RETENTION_DELETED: &str = "geotrack_retention_deleted_total";

/// Register help text for every engine metric.
pub fn describe_metrics() {
    metrics::describe_counter!(SAMPLES_INGESTED, "Location samples accepted and persisted");
    metrics::describe_counter!(
        SAMPLES_REJECTED,
        "Location samples rejected before persistence, by reason"
    );
    metrics::describe_counter!(VALIDATIONS, "Site-level containment results, by result");
    metrics::describe_counter!(VIOLATIONS_OPENED, "Geofence violations opened");
    metrics::describe_counter!(
        VIOLATIONS_RESOLVED,
        "Geofence violations resolved, by mode (auto or manual)"
    );
    metrics::describe_counter!(
        EVALUATIONS_DROPPED,
        "Samples stored but not evaluated, by reason"
    );
    metrics::describe_counter!(ZONE_LOOKUP_FAILURES, "Failed zone lookups (detector failed open)");
    metrics::describe_counter!(
        STATE_REBUILDS,
        "Agent tracking states rebuilt from storage, by cause"
    );
    metrics::describe_counter!(RETENTION_DELETED, "Rows removed by retention sweeps, by table");
}
