//! # Geofence Store
//!
//! Read-through cache of active zones per site over a
//! [`GeofenceRepository`]. Entries expire after a fixed TTL so that edits
//! made elsewhere propagate within a bounded time; [`GeofenceStore::invalidate`]
//! gives the site-management service immediate effect.
//!
//! Reads are lock-free for cache hits. A miss loads from the repository
//! without holding any map guard across the `.await`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use geotrack_core::{Geofence, SiteId};
use tokio::time::Instant;

use crate::error::TrackingError;
use crate::repository::GeofenceRepository;

#[derive(Debug, Clone)]
struct CachedZones {
    zones: Arc<[Geofence]>,
    fetched_at: Instant,
}

pub struct GeofenceStore {
    repo: Arc<dyn GeofenceRepository>,
    ttl: Duration,
    entries: DashMap<SiteId, CachedZones>,
    /// Bumped on every invalidation. A load that started under an older
    /// generation does not populate the cache.
    generation: AtomicU64,
}

impl std::fmt::Debug for GeofenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeofenceStore")
            .field("ttl", &self.ttl)
            .field("cached_sites", &self.entries.len())
            .finish()
    }
}

impl GeofenceStore {
    pub fn new(repo: Arc<dyn GeofenceRepository>, ttl: Duration) -> Self {
        Self {
            repo,
            ttl,
            entries: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Active zones of `site_id`, served from cache when fresh.
    ///
    /// # Errors
    ///
    /// [`TrackingError::ZoneLookupFailure`] when the repository fails.
    pub async fn zones_for_site(&self, site_id: SiteId) -> Result<Arc<[Geofence]>, TrackingError> {
        if let Some(cached) = self.fresh_entry(site_id) {
            return Ok(cached);
        }

        let generation = self.generation.load(Ordering::Acquire);
        let loaded = self
            .repo
            .active_zones_for_site(site_id)
            .await
            .map_err(|e| TrackingError::ZoneLookupFailure {
                site_id,
                reason: e.to_string(),
            })?;
        let zones: Arc<[Geofence]> = loaded
            .into_iter()
            .filter(|z| z.active && z.site_id == site_id)
            .collect();

        if self.generation.load(Ordering::Acquire) == generation {
            self.entries.insert(
                site_id,
                CachedZones {
                    zones: Arc::clone(&zones),
                    fetched_at: Instant::now(),
                },
            );
        }
        tracing::debug!(site_id = %site_id, zones = zones.len(), "zone cache loaded");
        Ok(zones)
    }

    /// Drop the cached zones of one site.
    pub fn invalidate(&self, site_id: SiteId) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.entries.remove(&site_id);
        tracing::info!(site_id = %site_id, "zone cache invalidated");
    }

    /// Number of sites currently cached, fresh or not.
    pub fn cached_sites(&self) -> usize {
        self.entries.len()
    }

    fn fresh_entry(&self, site_id: SiteId) -> Option<Arc<[Geofence]>> {
        let entry = self.entries.get(&site_id)?;
        if entry.fetched_at.elapsed() < self.ttl {
            Some(Arc::clone(&entry.zones))
        } else {
            None
        }
    }
}
