//! # geotrack-core — Foundational Types for Agent Tracking
//!
//! Defines the domain primitives shared by the tracking engine and the API
//! layer. Everything here is pure: no I/O, no async, no global state.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype wrappers for identifiers.** `AgentId`, `SiteId`,
//!    `GeofenceId`, `SampleId`, `ViolationId`, `ValidationId` are distinct
//!    types. You cannot pass a site where an agent is expected.
//!
//! 2. **Validated coordinates.** A [`Coordinate`] can only be built from a
//!    finite latitude in `[-90, 90]` and longitude in `[-180, 180]`. Every
//!    deserialization path goes through the same check.
//!
//! 3. **Pure geometry.** [`geometry::contains`] and friends are deterministic
//!    functions of their inputs; boundary points count as inside.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `geotrack-*` crates (leaf of the DAG).
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod coordinate;
pub mod error;
pub mod geofence;
pub mod geometry;
pub mod identity;
pub mod sample;
pub mod violation;

pub use coordinate::Coordinate;
pub use error::ValidationError;
pub use geofence::{Geofence, ZoneShape};
pub use identity::{AgentId, GeofenceId, SampleId, SiteId, ValidationId, ViolationId};
pub use sample::{AgentStatus, LocationSample, SampleTelemetry, MAX_DEDUP_KEY_LEN};
pub use violation::{Containment, GeofenceValidation, GeofenceViolation};
