//! # API Route Modules
//!
//! - `locations` — position ingestion, live positions, and agent history.
//! - `geofences` — ad hoc containment checks and zone administration.
//! - `violations` — violation listing and supervisor resolution.
//! - `tracking` — aggregate statistics and the retention sweep.

pub mod geofences;
pub mod locations;
pub mod tracking;
pub mod violations;
