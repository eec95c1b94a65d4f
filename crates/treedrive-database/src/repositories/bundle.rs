//! Bundle repository implementation.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use treedrive_core::error::{AppError, ErrorKind};
use treedrive_core::result::AppResult;
use treedrive_entity::bundle::model::BundleJob;

/// Repository for folder bundle rows.
#[derive(Debug, Clone)]
pub struct BundleRepository {
    pool: PgPool,
}

impl BundleRepository {
    /// Create a new bundle repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find a bundle by ID.
    pub async fn find_by_id(&self, id: Uuid) -> AppResult<Option<BundleJob>> {
        sqlx::query_as::<_, BundleJob>("SELECT * FROM bundle_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find bundle", e))
    }

    /// Create a PENDING bundle row for a folder.
    ///
    /// `size_bytes` is the declared total of the entries collected at
    /// request time; completion replaces it with the archive's size.
    pub async fn create(
        &self,
        node_id: Uuid,
        requested_by: Uuid,
        storage_key: &str,
        size_bytes: i64,
        expires_at: DateTime<Utc>,
    ) -> AppResult<BundleJob> {
        sqlx::query_as::<_, BundleJob>(
            "INSERT INTO bundle_jobs (node_id, requested_by, storage_key, size_bytes, expires_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING *",
        )
        .bind(node_id)
        .bind(requested_by)
        .bind(storage_key)
        .bind(size_bytes)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to create bundle", e))
    }

    /// Mark a bundle COMPLETED with its final archive size.
    pub async fn complete(&self, id: Uuid, size_bytes: i64) -> AppResult<BundleJob> {
        sqlx::query_as::<_, BundleJob>(
            "UPDATE bundle_jobs SET status = 'COMPLETED', size_bytes = $2 \
             WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(size_bytes)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to complete bundle", e))?
        .ok_or_else(|| AppError::not_found(format!("Bundle {id} not found")))
    }

    /// Mark a bundle FAILED after its job exhausted retries.
    pub async fn fail(&self, id: Uuid) -> AppResult<()> {
        sqlx::query("UPDATE bundle_jobs SET status = 'FAILED' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to fail bundle", e))?;
        Ok(())
    }

    /// Completed bundles whose download window has ended.
    pub async fn find_expired(&self, now: DateTime<Utc>) -> AppResult<Vec<BundleJob>> {
        sqlx::query_as::<_, BundleJob>(
            "SELECT * FROM bundle_jobs WHERE status = 'COMPLETED' AND expires_at < $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to list expired", e))
    }

    /// Mark a bundle DELETED after its archive object was removed.
    pub async fn mark_deleted(&self, id: Uuid) -> AppResult<()> {
        sqlx::query("UPDATE bundle_jobs SET status = 'DELETED' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to mark bundle deleted", e)
            })?;
        Ok(())
    }
}
