//! Access grant repository implementation.

use sqlx::PgPool;
use uuid::Uuid;

use treedrive_core::error::{AppError, ErrorKind};
use treedrive_core::result::AppResult;
use treedrive_entity::grant::model::{AccessGrant, AccessLevel};

/// A grant joined with its grantee, for share listings.
#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct SharedWith {
    /// The grantee.
    pub user_id: Uuid,
    /// Grantee login name.
    pub username: String,
    /// Grantee email.
    pub email: String,
    /// Capability level conferred.
    pub level: AccessLevel,
    /// When the grant was created.
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Repository for direct access grants.
#[derive(Debug, Clone)]
pub struct GrantRepository {
    pool: PgPool,
}

impl GrantRepository {
    /// Create a new grant repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create or replace the grant for one user on one node.
    pub async fn upsert(
        &self,
        node_id: Uuid,
        user_id: Uuid,
        level: AccessLevel,
        granted_by: Uuid,
    ) -> AppResult<AccessGrant> {
        sqlx::query_as::<_, AccessGrant>(
            "INSERT INTO access_grants (node_id, user_id, level, granted_by) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (node_id, user_id) DO UPDATE SET level = $3, granted_by = $4 \
             RETURNING *",
        )
        .bind(node_id)
        .bind(user_id)
        .bind(level)
        .bind(granted_by)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to upsert grant", e))
    }

    /// Remove a user's grant on a node.
    pub async fn revoke(&self, node_id: Uuid, user_id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM access_grants WHERE node_id = $1 AND user_id = $2")
            .bind(node_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to revoke grant", e))?;
        Ok(result.rows_affected() > 0)
    }

    /// List a node's grants joined with grantee details.
    pub async fn find_shared_with(&self, node_id: Uuid) -> AppResult<Vec<SharedWith>> {
        sqlx::query_as::<_, SharedWith>(
            "SELECT g.user_id, u.username, u.email, g.level, g.created_at \
             FROM access_grants g JOIN users u ON u.id = g.user_id \
             WHERE g.node_id = $1 ORDER BY g.created_at ASC",
        )
        .bind(node_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to list shares", e))
    }

    /// A user's grants on any of the given node paths.
    ///
    /// Paths are a node's own path plus its ancestor chain, so the result
    /// is everything that can contribute to the effective level.
    pub async fn find_for_paths(
        &self,
        user_id: Uuid,
        paths: &[String],
    ) -> AppResult<Vec<AccessGrant>> {
        sqlx::query_as::<_, AccessGrant>(
            "SELECT g.* FROM access_grants g \
             JOIN nodes n ON n.id = g.node_id \
             WHERE g.user_id = $1 AND n.path = ANY($2)",
        )
        .bind(user_id)
        .bind(paths)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to resolve grants", e))
    }
}
