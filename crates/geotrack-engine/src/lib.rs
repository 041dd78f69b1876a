//! # geotrack-engine — Location Ingestion and Geofence Validation
//!
//! The stateful half of the tracking stack. Position reports enter through
//! the [`LocationIngestor`], are persisted, and are handed to per-shard
//! workers that run the [`ViolationDetector`] against the site's active
//! zones. Queries over current positions, history, and aggregate counters
//! are served by the [`TrackingQueryService`]; old rows are aged out by the
//! [`RetentionJanitor`].
//!
//! ## Data Flow
//!
//! ```text
//! ingest ──► LocationRepository ──► ShardDispatcher ──► ViolationDetector
//!                                        (hash(agent) % N)      │
//!                                                  GeofenceStore + geometry
//!                                                               │
//!                                                  ValidationRepository
//! ```
//!
//! ## Concurrency
//!
//! Every agent is pinned to one shard, so evaluations for a single agent run
//! strictly in arrival order and the debounce counter has exactly one
//! writer. Shards share nothing except the zone cache (read-mostly) and the
//! repositories.
//!
//! Storage is reached only through the traits in [`repository`]. The
//! [`memory::InMemoryRepository`] backs tests and database-less deployments.

pub mod config;
pub mod detector;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod events;
pub mod ingest;
pub mod janitor;
pub mod memory;
pub mod query;
pub mod repository;
pub mod store;
pub mod telemetry;
pub mod tracking;

pub use config::{ConfigError, EngineConfig};
pub use detector::{AdHocCheck, SkipReason, ValidationOutcome, ViolationDetector, ZoneCheck};
pub use dispatch::{DispatchError, ShardDispatcher};
pub use engine::{Repositories, TrackingEngine};
pub use error::{RepositoryError, TrackingError};
pub use events::{EventBus, TrackingEvent};
pub use ingest::{IngestReceipt, IngestRequest, LocationIngestor, ValidationDisposition};
pub use janitor::{CleanupReport, RetentionJanitor};
pub use memory::InMemoryRepository;
pub use query::{AgentLocationSnapshot, HistoryRequest, TrackingQueryService, TrackingStats};
pub use repository::{
    GeofenceRepository, HistoryQuery, LocationRepository, SampleActivity, ValidationRepository,
    ViolationChange, ViolationFilter,
};
pub use store::GeofenceStore;
pub use tracking::{AgentTrackingState, DebounceState, TrackingTable};
