//! Geofence persistence.
//!
//! Zone geometry is stored as JSONB in the tagged `ZoneShape` encoding, so
//! circles and polygons share one table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use geotrack_core::{Geofence, GeofenceId, SiteId, ZoneShape};
use geotrack_engine::{GeofenceRepository, RepositoryError};
use sqlx::types::Json;
use uuid::Uuid;

use super::{storage_error, PgRepository};

#[async_trait]
impl GeofenceRepository for PgRepository {
    async fn active_zones_for_site(
        &self,
        site_id: SiteId,
    ) -> Result<Vec<Geofence>, RepositoryError> {
        let rows = sqlx::query_as::<_, GeofenceRow>(
            "SELECT id, site_id, label, shape, active, updated_at FROM geofences
             WHERE site_id = $1 AND active
             ORDER BY label",
        )
        .bind(site_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.into_iter().map(GeofenceRow::into_geofence).collect()
    }

    async fn replace_site_zones(
        &self,
        site_id: SiteId,
        zones: Vec<Geofence>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        sqlx::query("DELETE FROM geofences WHERE site_id = $1")
            .bind(site_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;

        for zone in &zones {
            sqlx::query(
                "INSERT INTO geofences (id, site_id, label, shape, active, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(zone.id.as_uuid())
            .bind(zone.site_id.as_uuid())
            .bind(&zone.label)
            .bind(Json(&zone.shape))
            .bind(zone.active)
            .bind(zone.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        }

        tx.commit().await.map_err(storage_error)?;
        Ok(())
    }
}

/// Internal row type for SQLx mapping.
#[derive(sqlx::FromRow)]
struct GeofenceRow {
    id: Uuid,
    site_id: Uuid,
    label: String,
    shape: Json<ZoneShape>,
    active: bool,
    updated_at: DateTime<Utc>,
}

impl GeofenceRow {
    fn into_geofence(self) -> Result<Geofence, RepositoryError> {
        let shape = self.shape.0;
        shape
            .validate()
            .map_err(|e| RepositoryError::Corrupt(format!("geofence {}: {e}", self.id)))?;
        Ok(Geofence {
            id: GeofenceId::from(self.id),
            site_id: SiteId::from(self.site_id),
            label: self.label,
            shape,
            active: self.active,
            updated_at: self.updated_at,
        })
    }
}
