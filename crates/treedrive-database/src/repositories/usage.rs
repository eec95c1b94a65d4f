//! Usage counter repository implementation.

use sqlx::PgPool;
use uuid::Uuid;

use treedrive_core::error::{AppError, ErrorKind};
use treedrive_core::result::AppResult;
use treedrive_entity::usage::UsageCounter;

/// Repository for per-user storage usage counters.
#[derive(Debug, Clone)]
pub struct UsageRepository {
    pool: PgPool,
}

impl UsageRepository {
    /// Create a new usage repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a user's counter.
    pub async fn find_by_user(&self, user_id: Uuid) -> AppResult<Option<UsageCounter>> {
        sqlx::query_as::<_, UsageCounter>("SELECT * FROM usage_counters WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to read usage", e))
    }

    /// Create a zeroed counter for a user if none exists.
    pub async fn ensure(&self, user_id: Uuid) -> AppResult<UsageCounter> {
        sqlx::query_as::<_, UsageCounter>(
            "INSERT INTO usage_counters (user_id, used_bytes) VALUES ($1, 0) \
             ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id \
             RETURNING *",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to init usage", e))
    }
}
