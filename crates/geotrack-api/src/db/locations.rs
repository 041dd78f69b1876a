//! Location sample persistence.
//!
//! All operations act on the `location_samples` table. Samples are
//! immutable once written; only retention removes them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use geotrack_core::{
    AgentId, AgentStatus, Coordinate, LocationSample, SampleId, SampleTelemetry, SiteId,
};
use geotrack_engine::{HistoryQuery, LocationRepository, RepositoryError, SampleActivity};
use uuid::Uuid;

use super::{storage_error, to_i64, to_u64, PgRepository};

const SAMPLE_COLUMNS: &str = "id, agent_id, site_id, recorded_at, received_at, latitude, \
     longitude, accuracy_m, speed_mps, heading_deg, battery_level, status, low_confidence, \
     dedup_key";

#[async_trait]
impl LocationRepository for PgRepository {
    async fn insert_sample(&self, sample: &LocationSample) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO location_samples (id, agent_id, site_id, recorded_at, received_at,
             latitude, longitude, accuracy_m, speed_mps, heading_deg, battery_level, status,
             low_confidence, dedup_key)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(sample.id.as_uuid())
        .bind(sample.agent_id.as_uuid())
        .bind(sample.site_id.map(|s| *s.as_uuid()))
        .bind(sample.recorded_at)
        .bind(sample.received_at)
        .bind(sample.coordinate.latitude())
        .bind(sample.coordinate.longitude())
        .bind(sample.accuracy_m)
        .bind(sample.telemetry.speed_mps)
        .bind(sample.telemetry.heading_deg)
        .bind(sample.telemetry.battery_level.map(i16::from))
        .bind(sample.telemetry.status.as_str())
        .bind(sample.low_confidence)
        .bind(sample.dedup_key.as_deref())
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(())
    }

    async fn find_by_dedup_key(
        &self,
        agent_id: AgentId,
        dedup_key: &str,
    ) -> Result<Option<LocationSample>, RepositoryError> {
        let row = sqlx::query_as::<_, SampleRow>(&format!(
            "SELECT {SAMPLE_COLUMNS} FROM location_samples
             WHERE agent_id = $1 AND dedup_key = $2"
        ))
        .bind(agent_id.as_uuid())
        .bind(dedup_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        row.map(SampleRow::into_sample).transpose()
    }

    async fn latest_sample(
        &self,
        agent_id: AgentId,
    ) -> Result<Option<LocationSample>, RepositoryError> {
        let row = sqlx::query_as::<_, SampleRow>(&format!(
            "SELECT {SAMPLE_COLUMNS} FROM location_samples
             WHERE agent_id = $1 ORDER BY recorded_at DESC LIMIT 1"
        ))
        .bind(agent_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        row.map(SampleRow::into_sample).transpose()
    }

    async fn latest_samples_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<LocationSample>, RepositoryError> {
        let rows = sqlx::query_as::<_, SampleRow>(&format!(
            "SELECT DISTINCT ON (agent_id) {SAMPLE_COLUMNS} FROM location_samples
             WHERE recorded_at >= $1
             ORDER BY agent_id, recorded_at DESC"
        ))
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.into_iter().map(SampleRow::into_sample).collect()
    }

    async fn history(&self, query: &HistoryQuery) -> Result<Vec<LocationSample>, RepositoryError> {
        let rows = sqlx::query_as::<_, SampleRow>(&format!(
            "SELECT {SAMPLE_COLUMNS} FROM location_samples
             WHERE agent_id = $1
               AND ($2::timestamptz IS NULL OR recorded_at >= $2)
               AND ($3::timestamptz IS NULL OR recorded_at <= $3)
             ORDER BY recorded_at DESC
             LIMIT $4"
        ))
        .bind(query.agent_id.as_uuid())
        .bind(query.from)
        .bind(query.to)
        .bind(to_i64(query.limit))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.into_iter().map(SampleRow::into_sample).collect()
    }

    async fn sample_activity_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<SampleActivity, RepositoryError> {
        let (samples, agents): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(DISTINCT agent_id) FROM location_samples
             WHERE recorded_at >= $1",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(SampleActivity {
            samples: to_u64(samples),
            agents: to_u64(agents),
        })
    }

    async fn delete_samples_before(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "DELETE FROM location_samples WHERE id IN (
                 SELECT id FROM location_samples WHERE recorded_at < $1 LIMIT $2
             )",
        )
        .bind(cutoff)
        .bind(to_i64(batch_size))
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(result.rows_affected())
    }
}

/// Internal row type for SQLx mapping.
#[derive(sqlx::FromRow)]
struct SampleRow {
    id: Uuid,
    agent_id: Uuid,
    site_id: Option<Uuid>,
    recorded_at: DateTime<Utc>,
    received_at: DateTime<Utc>,
    latitude: f64,
    longitude: f64,
    accuracy_m: f64,
    speed_mps: Option<f64>,
    heading_deg: Option<f64>,
    battery_level: Option<i16>,
    status: String,
    low_confidence: bool,
    dedup_key: Option<String>,
}

impl SampleRow {
    fn into_sample(self) -> Result<LocationSample, RepositoryError> {
        let coordinate = Coordinate::new(self.latitude, self.longitude)
            .map_err(|e| RepositoryError::Corrupt(format!("sample {}: {e}", self.id)))?;
        let status: AgentStatus = self
            .status
            .parse()
            .map_err(|e| RepositoryError::Corrupt(format!("sample {}: {e}", self.id)))?;
        let battery_level = self
            .battery_level
            .map(u8::try_from)
            .transpose()
            .map_err(|_| {
                RepositoryError::Corrupt(format!("sample {}: battery level out of range", self.id))
            })?;

        Ok(LocationSample {
            id: SampleId::from(self.id),
            agent_id: AgentId::from(self.agent_id),
            site_id: self.site_id.map(SiteId::from),
            recorded_at: self.recorded_at,
            received_at: self.received_at,
            coordinate,
            accuracy_m: self.accuracy_m,
            telemetry: SampleTelemetry {
                speed_mps: self.speed_mps,
                heading_deg: self.heading_deg,
                battery_level,
                status,
            },
            low_confidence: self.low_confidence,
            dedup_key: self.dedup_key,
        })
    }
}
