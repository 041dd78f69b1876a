//! # Database Persistence Layer
//!
//! Postgres implementations of the engine's repository traits via SQLx.
//!
//! ## Architecture
//!
//! The database layer is **optional**. When `DATABASE_URL` is set, samples,
//! zones, validations, and violations are stored in PostgreSQL. When absent,
//! the API runs on the engine's in-memory repository (development and
//! testing); state does not survive restarts.
//!
//! Queries are checked at runtime (`sqlx::query_as` with `FromRow` row
//! types) so the crate builds without a live database.

pub mod geofences;
pub mod locations;
pub mod validations;

use std::sync::Arc;

use geotrack_engine::{RepositoryError, Repositories};
use sqlx::postgres::{PgPool, PgPoolOptions};

/// Connect and run the embedded migrations.
///
/// Returns `None` when no URL is configured (in-memory mode).
pub async fn init_pool(database_url: Option<&str>) -> Result<Option<PgPool>, sqlx::Error> {
    let Some(url) = database_url else {
        tracing::warn!(
            "DATABASE_URL not set, running in-memory only mode. \
             State will not survive restarts."
        );
        return Ok(None);
    };

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(url)
        .await?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    Ok(Some(pool))
}

/// Postgres-backed location, geofence, and validation repository.
#[derive(Debug, Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// All three engine repositories over one pool.
    pub fn repositories(pool: PgPool) -> Repositories {
        Repositories::shared(Arc::new(Self::new(pool)))
    }
}

/// Translate a driver error into the engine's storage taxonomy.
pub(crate) fn storage_error(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound("row".into()),
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::Conflict(db.message().to_string())
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            RepositoryError::Corrupt(err.to_string())
        }
        _ => {
            tracing::error!(error = %err, "database operation failed");
            RepositoryError::Unavailable(err.to_string())
        }
    }
}

/// Row counts come back as `i64`; negative values cannot occur.
pub(crate) fn to_u64(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

/// Limits are bounded by configuration well below `i64::MAX`.
pub(crate) fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
