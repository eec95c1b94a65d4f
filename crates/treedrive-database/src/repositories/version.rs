//! Version repository: the per-node version ledger.
//!
//! Version numbers are allocated under a row lock on the owning node, so
//! two concurrent uploads to the same file can never claim the same
//! number. Activation commits the version, flips the node, and adjusts
//! the owner's usage counter in one transaction.

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use treedrive_core::error::{AppError, ErrorKind};
use treedrive_core::result::AppResult;
use treedrive_core::types::pagination::{PageRequest, PageResponse};
use treedrive_entity::node::model::Node;
use treedrive_entity::version::model::{BeginVersion, NodeVersion};

/// Repository for node version reads and lifecycle transitions.
#[derive(Debug, Clone)]
pub struct VersionRepository {
    pool: PgPool,
}

impl VersionRepository {
    /// Create a new version repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find a version by ID.
    pub async fn find_by_id(&self, id: Uuid) -> AppResult<Option<NodeVersion>> {
        sqlx::query_as::<_, NodeVersion>("SELECT * FROM node_versions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find version", e))
    }

    /// Fetch several versions by ID.
    pub async fn find_by_ids(&self, ids: &[Uuid]) -> AppResult<Vec<NodeVersion>> {
        sqlx::query_as::<_, NodeVersion>("SELECT * FROM node_versions WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to load versions", e))
    }

    /// List a node's versions, newest first.
    pub async fn find_by_node(
        &self,
        node_id: Uuid,
        page: &PageRequest,
    ) -> AppResult<PageResponse<NodeVersion>> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM node_versions WHERE node_id = $1")
                .bind(node_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    AppError::with_source(ErrorKind::Database, "Failed to count versions", e)
                })?;

        let versions = sqlx::query_as::<_, NodeVersion>(
            "SELECT * FROM node_versions WHERE node_id = $1 \
             ORDER BY version_number DESC LIMIT $2 OFFSET $3",
        )
        .bind(node_id)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to list versions", e))?;

        Ok(PageResponse::new(
            versions,
            page.page,
            page.page_size,
            total as u64,
        ))
    }

    /// Allocate the next version of a node in UPLOADING state.
    ///
    /// The node row is locked for the duration of the allocation, which
    /// serializes concurrent uploads and keeps numbers strictly
    /// increasing. Gaps are allowed: a failed version keeps its number.
    pub async fn begin(&self, node_id: Uuid, data: &BeginVersion) -> AppResult<NodeVersion> {
        let mut tx = self.begin_tx().await?;

        let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM nodes WHERE id = $1 FOR UPDATE")
            .bind(node_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to lock node", e))?;
        if exists.is_none() {
            return Err(AppError::not_found(format!("Node {node_id} not found")));
        }

        let version = sqlx::query_as::<_, NodeVersion>(
            "INSERT INTO node_versions \
             (node_id, version_number, storage_provider, storage_key, size_bytes, mime_type, checksum, status) \
             SELECT $1, COALESCE(MAX(version_number), 0) + 1, $2, $3, $4, $5, $6, 'UPLOADING' \
             FROM node_versions WHERE node_id = $1 \
             RETURNING *",
        )
        .bind(node_id)
        .bind(&data.storage_provider)
        .bind(&data.storage_key)
        .bind(data.size_bytes)
        .bind(&data.mime_type)
        .bind(&data.checksum)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to create version", e))?;

        self.commit(tx).await?;
        Ok(version)
    }

    /// Commit a verified version: mark it ACTIVE, make it the node's
    /// current version, activate the node, and adjust the owner's usage
    /// by the delta against the superseded version.
    pub async fn activate(&self, version_id: Uuid) -> AppResult<NodeVersion> {
        let mut tx = self.begin_tx().await?;

        let version = sqlx::query_as::<_, NodeVersion>(
            "SELECT * FROM node_versions WHERE id = $1 FOR UPDATE",
        )
        .bind(version_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to lock version", e))?
        .ok_or_else(|| AppError::not_found(format!("Version {version_id} not found")))?;

        let node = sqlx::query_as::<_, Node>("SELECT * FROM nodes WHERE id = $1 FOR UPDATE")
            .bind(version.node_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to lock node", e))?
            .ok_or_else(|| {
                AppError::not_found(format!("Node {} not found", version.node_id))
            })?;

        let superseded_bytes: i64 = match node.current_version_id {
            Some(current_id) => {
                sqlx::query_scalar("SELECT size_bytes FROM node_versions WHERE id = $1")
                    .bind(current_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| {
                        AppError::with_source(
                            ErrorKind::Database,
                            "Failed to read superseded version",
                            e,
                        )
                    })?
                    .unwrap_or(0)
            }
            None => 0,
        };

        let version = sqlx::query_as::<_, NodeVersion>(
            "UPDATE node_versions SET status = 'ACTIVE', updated_at = NOW() \
             WHERE id = $1 RETURNING *",
        )
        .bind(version_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to activate version", e))?;

        sqlx::query(
            "UPDATE nodes SET status = 'ACTIVE', current_version_id = $2, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(node.id)
        .bind(version_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to activate node", e))?;

        let delta = version.size_bytes - superseded_bytes;
        sqlx::query(
            "INSERT INTO usage_counters (user_id, used_bytes) VALUES ($1, GREATEST($2, 0)) \
             ON CONFLICT (user_id) DO UPDATE \
             SET used_bytes = GREATEST(usage_counters.used_bytes + $2, 0), updated_at = NOW()",
        )
        .bind(node.owner_id)
        .bind(delta)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to adjust usage", e))?;

        self.commit(tx).await?;
        Ok(version)
    }

    /// Record a failed finalize: the version becomes FAILED and the node
    /// drops to DRAFT only when this was its first upload. A node with a
    /// committed version keeps serving it.
    pub async fn fail(&self, version_id: Uuid) -> AppResult<NodeVersion> {
        let mut tx = self.begin_tx().await?;

        let version = sqlx::query_as::<_, NodeVersion>(
            "UPDATE node_versions SET status = 'FAILED', updated_at = NOW() \
             WHERE id = $1 RETURNING *",
        )
        .bind(version_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to fail version", e))?
        .ok_or_else(|| AppError::not_found(format!("Version {version_id} not found")))?;

        sqlx::query(
            "UPDATE nodes SET status = 'DRAFT', updated_at = NOW() \
             WHERE id = $1 AND status = 'UPLOADING'",
        )
        .bind(version.node_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to draft node", e))?;

        self.commit(tx).await?;
        Ok(version)
    }

    async fn begin_tx(&self) -> AppResult<Transaction<'static, Postgres>> {
        self.pool.begin().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to begin transaction", e)
        })
    }

    async fn commit(&self, tx: Transaction<'static, Postgres>) -> AppResult<()> {
        tx.commit().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to commit transaction", e)
        })
    }
}
