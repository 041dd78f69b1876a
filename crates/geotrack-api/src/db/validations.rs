//! Validation audit rows and violation records.
//!
//! `record_evaluation` writes one evaluation (its validation rows and at
//! most one violation change) in a single transaction. The partial unique
//! index on unresolved violations turns a concurrent second open into a
//! `Conflict`, which the detector treats as "adopt the existing one".

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use geotrack_core::{
    AgentId, Containment, GeofenceId, GeofenceValidation, GeofenceViolation, SampleId, SiteId,
    ValidationId, ViolationId,
};
use geotrack_engine::{RepositoryError, ValidationRepository, ViolationChange, ViolationFilter};
use sqlx::{Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use super::{storage_error, to_i64, to_u64, PgRepository};

const VIOLATION_COLUMNS: &str = "id, agent_id, geofence_id, site_id, sample_id, \
     distance_outside_m, occurred_at, resolved, resolved_at, auto_resolvable";

async fn apply_change(
    tx: &mut Transaction<'_, Postgres>,
    change: &ViolationChange,
) -> Result<(), RepositoryError> {
    match change {
        ViolationChange::Open(v) => {
            sqlx::query(
                "INSERT INTO geofence_violations (id, agent_id, geofence_id, site_id, sample_id,
                 distance_outside_m, occurred_at, resolved, resolved_at, auto_resolvable)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(v.id.as_uuid())
            .bind(v.agent_id.as_uuid())
            .bind(v.geofence_id.as_uuid())
            .bind(v.site_id.as_uuid())
            .bind(v.sample_id.as_uuid())
            .bind(v.distance_outside_m)
            .bind(v.occurred_at)
            .bind(v.resolved)
            .bind(v.resolved_at)
            .bind(v.auto_resolvable)
            .execute(&mut **tx)
            .await
            .map_err(storage_error)?;
        }
        ViolationChange::Resolve { id, at } => {
            sqlx::query(
                "UPDATE geofence_violations SET resolved = TRUE, resolved_at = $2
                 WHERE id = $1 AND NOT resolved",
            )
            .bind(id.as_uuid())
            .bind(*at)
            .execute(&mut **tx)
            .await
            .map_err(storage_error)?;
        }
        ViolationChange::MarkAutoResolvable {
            id,
            auto_resolvable,
        } => {
            sqlx::query(
                "UPDATE geofence_violations SET auto_resolvable = $2
                 WHERE id = $1 AND NOT resolved",
            )
            .bind(id.as_uuid())
            .bind(*auto_resolvable)
            .execute(&mut **tx)
            .await
            .map_err(storage_error)?;
        }
    }
    Ok(())
}

#[async_trait]
impl ValidationRepository for PgRepository {
    async fn record_evaluation(
        &self,
        validations: &[GeofenceValidation],
        change: Option<&ViolationChange>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        // A failed statement aborts the transaction; dropping `tx` rolls back.
        if let Some(change) = change {
            apply_change(&mut tx, change).await?;
        }

        if !validations.is_empty() {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO geofence_validations
                 (id, agent_id, geofence_id, site_id, sample_id, result, validated_at) ",
            );
            builder.push_values(validations, |mut row, v| {
                row.push_bind(*v.id.as_uuid())
                    .push_bind(*v.agent_id.as_uuid())
                    .push_bind(*v.geofence_id.as_uuid())
                    .push_bind(*v.site_id.as_uuid())
                    .push_bind(*v.sample_id.as_uuid())
                    .push_bind(v.result.as_str())
                    .push_bind(v.validated_at);
            });
            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(storage_error)?;
        }

        tx.commit().await.map_err(storage_error)?;
        Ok(())
    }

    async fn open_violation(
        &self,
        agent_id: AgentId,
        site_id: SiteId,
    ) -> Result<Option<GeofenceViolation>, RepositoryError> {
        let row = sqlx::query_as::<_, ViolationRow>(&format!(
            "SELECT {VIOLATION_COLUMNS} FROM geofence_violations
             WHERE agent_id = $1 AND site_id = $2 AND NOT resolved"
        ))
        .bind(agent_id.as_uuid())
        .bind(site_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(row.map(ViolationRow::into_violation))
    }

    async fn get_violation(
        &self,
        id: ViolationId,
    ) -> Result<Option<GeofenceViolation>, RepositoryError> {
        let row = sqlx::query_as::<_, ViolationRow>(&format!(
            "SELECT {VIOLATION_COLUMNS} FROM geofence_violations WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(row.map(ViolationRow::into_violation))
    }

    async fn resolve_violation(
        &self,
        id: ViolationId,
        at: DateTime<Utc>,
    ) -> Result<GeofenceViolation, RepositoryError> {
        sqlx::query(
            "UPDATE geofence_violations SET resolved = TRUE, resolved_at = $2
             WHERE id = $1 AND NOT resolved",
        )
        .bind(id.as_uuid())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        self.get_violation(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("violation {id}")))
    }

    async fn list_violations(
        &self,
        filter: &ViolationFilter,
    ) -> Result<Vec<GeofenceViolation>, RepositoryError> {
        let rows = sqlx::query_as::<_, ViolationRow>(&format!(
            "SELECT {VIOLATION_COLUMNS} FROM geofence_violations
             WHERE (NOT $1 OR NOT resolved)
               AND ($2::uuid IS NULL OR agent_id = $2)
               AND ($3::uuid IS NULL OR site_id = $3)
             ORDER BY occurred_at DESC
             LIMIT $4"
        ))
        .bind(filter.open_only)
        .bind(filter.agent_id.map(|a| *a.as_uuid()))
        .bind(filter.site_id.map(|s| *s.as_uuid()))
        .bind(to_i64(filter.limit))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(rows.into_iter().map(ViolationRow::into_violation).collect())
    }

    async fn count_open_violations(&self) -> Result<u64, RepositoryError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM geofence_violations WHERE NOT resolved")
                .fetch_one(&self.pool)
                .await
                .map_err(storage_error)?;
        Ok(to_u64(count))
    }

    async fn validations_for_sample(
        &self,
        sample_id: SampleId,
    ) -> Result<Vec<GeofenceValidation>, RepositoryError> {
        let rows = sqlx::query_as::<_, ValidationRow>(
            "SELECT id, agent_id, geofence_id, site_id, sample_id, result, validated_at
             FROM geofence_validations WHERE sample_id = $1
             ORDER BY validated_at",
        )
        .bind(sample_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.into_iter().map(ValidationRow::into_validation).collect()
    }

    async fn delete_validations_before(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "DELETE FROM geofence_validations WHERE id IN (
                 SELECT id FROM geofence_validations WHERE validated_at < $1 LIMIT $2
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
struct ValidationRow {
    id: Uuid,
    agent_id: Uuid,
    geofence_id: Uuid,
    site_id: Uuid,
    sample_id: Uuid,
    result: String,
    validated_at: DateTime<Utc>,
}

impl ValidationRow {
    fn into_validation(self) -> Result<GeofenceValidation, RepositoryError> {
        let result: Containment = self
            .result
            .parse()
            .map_err(|e| RepositoryError::Corrupt(format!("validation {}: {e}", self.id)))?;
        Ok(GeofenceValidation {
            id: ValidationId::from(self.id),
            agent_id: AgentId::from(self.agent_id),
            geofence_id: GeofenceId::from(self.geofence_id),
            site_id: SiteId::from(self.site_id),
            sample_id: SampleId::from(self.sample_id),
            result,
            validated_at: self.validated_at,
        })
    }
}

/// Internal row type for SQLx mapping.
#[derive(sqlx::FromRow)]
struct ViolationRow {
    id: Uuid,
    agent_id: Uuid,
    geofence_id: Uuid,
    site_id: Uuid,
    sample_id: Uuid,
    distance_outside_m: f64,
    occurred_at: DateTime<Utc>,
    resolved: bool,
    resolved_at: Option<DateTime<Utc>>,
    auto_resolvable: bool,
}

impl ViolationRow {
    fn into_violation(self) -> GeofenceViolation {
        GeofenceViolation {
            id: ViolationId::from(self.id),
            agent_id: AgentId::from(self.agent_id),
            geofence_id: GeofenceId::from(self.geofence_id),
            site_id: SiteId::from(self.site_id),
            sample_id: SampleId::from(self.sample_id),
            distance_outside_m: self.distance_outside_m,
            occurred_at: self.occurred_at,
            resolved: self.resolved,
            resolved_at: self.resolved_at,
            auto_resolvable: self.auto_resolvable,
        }
    }
}
