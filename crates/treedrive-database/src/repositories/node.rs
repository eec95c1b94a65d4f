//! Node repository: tree reads and structural writes.
//!
//! Structural writes (child creation, root creation, subtree trash) run
//! in a transaction that locks the relevant parent row first, so sibling
//! segment allocation and status fan-out never race.

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use treedrive_core::error::{AppError, ErrorKind};
use treedrive_core::result::AppResult;
use treedrive_core::types::pagination::{PageRequest, PageResponse};
use treedrive_entity::node::model::{CreateNode, Node, NodeKind};
use treedrive_entity::node::tree;

/// Repository for tree node CRUD and subtree queries.
#[derive(Debug, Clone)]
pub struct NodeRepository {
    pool: PgPool,
}

impl NodeRepository {
    /// Create a new node repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find a node by ID.
    pub async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Node>> {
        sqlx::query_as::<_, Node>("SELECT * FROM nodes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find node", e))
    }

    /// Find a user's root folder.
    pub async fn find_root(&self, owner_id: Uuid) -> AppResult<Option<Node>> {
        sqlx::query_as::<_, Node>("SELECT * FROM nodes WHERE owner_id = $1 AND depth = 1")
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find root", e))
    }

    /// Get a user's root folder, creating it if it does not exist yet.
    ///
    /// Root path segments come from a global sequence, so concurrent
    /// first-touch requests for different users never collide. For the
    /// same user the partial unique index on `(owner_id) WHERE depth = 1`
    /// makes the insert a no-op and we re-read the winner's row.
    pub async fn ensure_root(&self, owner_id: Uuid, name: &str) -> AppResult<Node> {
        if let Some(root) = self.find_root(owner_id).await? {
            return Ok(root);
        }

        let ordinal: i64 = sqlx::query_scalar("SELECT nextval('node_root_seq')")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to allocate root segment", e)
            })?;
        let segment = tree::encode_segment(u32::try_from(ordinal).map_err(|_| {
            AppError::conflict(format!("Root segment ordinal {ordinal} out of range"))
        })?)?;

        sqlx::query(
            "INSERT INTO nodes (owner_id, name, kind, status, path, depth) \
             VALUES ($1, $2, 'folder', 'ACTIVE', $3, 1) \
             ON CONFLICT DO NOTHING",
        )
        .bind(owner_id)
        .bind(name)
        .bind(&segment)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to create root", e))?;

        self.find_root(owner_id)
            .await?
            .ok_or_else(|| AppError::internal(format!("Root missing after insert for {owner_id}")))
    }

    /// Direct children of a folder visible to a given user: owned,
    /// public, or inside any subtree the user holds a grant on.
    pub async fn find_children_visible(
        &self,
        parent: &Node,
        user_id: Uuid,
        page: &PageRequest,
    ) -> AppResult<PageResponse<Node>> {
        let prefix = format!("{}%", parent.path);
        let child_depth = parent.depth + 1;
        let visible = "(n.owner_id = $3 OR n.is_public OR EXISTS ( \
             SELECT 1 FROM access_grants g JOIN nodes gn ON gn.id = g.node_id \
             WHERE g.user_id = $3 AND n.path LIKE gn.path || '%'))";

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM nodes n \
             WHERE n.path LIKE $1 AND n.depth = $2 \
             AND n.status = 'ACTIVE' AND n.deleted_at IS NULL AND {visible}"
        ))
        .bind(&prefix)
        .bind(child_depth)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to count children", e))?;

        let nodes = sqlx::query_as::<_, Node>(&format!(
            "SELECT n.* FROM nodes n \
             WHERE n.path LIKE $1 AND n.depth = $2 \
             AND n.status = 'ACTIVE' AND n.deleted_at IS NULL AND {visible} \
             ORDER BY n.name ASC LIMIT $4 OFFSET $5"
        ))
        .bind(&prefix)
        .bind(child_depth)
        .bind(user_id)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to list children", e))?;

        Ok(PageResponse::new(
            nodes,
            page.page,
            page.page_size,
            total as u64,
        ))
    }

    /// Usable nodes the user holds a direct grant on.
    pub async fn find_granted(&self, user_id: Uuid) -> AppResult<Vec<Node>> {
        sqlx::query_as::<_, Node>(
            "SELECT n.* FROM nodes n JOIN access_grants g ON g.node_id = n.id \
             WHERE g.user_id = $1 AND n.status = 'ACTIVE' AND n.deleted_at IS NULL \
             ORDER BY n.path ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to list granted nodes", e))
    }

    /// Create a child node under a folder.
    ///
    /// Locks the parent row, verifies it can receive children, then
    /// allocates the next sibling segment from the current maximum child
    /// path under the lock.
    pub async fn create_child(&self, parent_id: Uuid, data: &CreateNode) -> AppResult<Node> {
        let mut tx = self.begin().await?;

        let parent = sqlx::query_as::<_, Node>("SELECT * FROM nodes WHERE id = $1 FOR UPDATE")
            .bind(parent_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to lock parent", e))?
            .ok_or_else(|| AppError::not_found(format!("Parent node {parent_id} not found")))?;

        if parent.kind != NodeKind::Folder || !parent.is_usable() {
            return Err(AppError::invalid_parent(format!(
                "Node {parent_id} cannot receive children"
            )));
        }

        let last_sibling: Option<String> = sqlx::query_scalar(
            "SELECT path FROM nodes WHERE path LIKE $1 AND depth = $2 \
             ORDER BY path DESC LIMIT 1",
        )
        .bind(format!("{}%", parent.path))
        .bind(parent.depth + 1)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to read siblings", e))?;

        let segment = tree::next_sibling_segment(last_sibling.as_deref())?;
        let path = tree::child_path(&parent.path, &segment);

        let node = sqlx::query_as::<_, Node>(
            "INSERT INTO nodes (owner_id, name, kind, status, path, depth) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
        )
        .bind(data.owner_id)
        .bind(&data.name)
        .bind(data.kind)
        .bind(data.status)
        .bind(&path)
        .bind(parent.depth + 1)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.constraint() == Some("nodes_path_key") => {
                AppError::conflict(format!("Node path '{path}' already exists"))
            }
            _ => AppError::with_source(ErrorKind::Database, "Failed to create node", e),
        })?;

        self.commit(tx).await?;
        Ok(node)
    }

    /// Rename a node.
    pub async fn rename(&self, node_id: Uuid, new_name: &str) -> AppResult<Node> {
        sqlx::query_as::<_, Node>(
            "UPDATE nodes SET name = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(node_id)
        .bind(new_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to rename node", e))?
        .ok_or_else(|| AppError::not_found(format!("Node {node_id} not found")))
    }

    /// Put a DRAFT file back into UPLOADING for a retry.
    pub async fn mark_uploading(&self, node_id: Uuid) -> AppResult<()> {
        sqlx::query(
            "UPDATE nodes SET status = 'UPLOADING', updated_at = NOW() \
             WHERE id = $1 AND status = 'DRAFT'",
        )
        .bind(node_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to update node", e))?;
        Ok(())
    }

    /// Toggle public visibility.
    pub async fn set_public(&self, node_id: Uuid, is_public: bool) -> AppResult<Node> {
        sqlx::query_as::<_, Node>(
            "UPDATE nodes SET is_public = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(node_id)
        .bind(is_public)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to update node", e))?
        .ok_or_else(|| AppError::not_found(format!("Node {node_id} not found")))
    }

    /// Soft-delete a node and every descendant, releasing usage bytes
    /// held by affected current versions.
    ///
    /// Files in a shared subtree may belong to several uploaders, so the
    /// release is attributed per file owner, not to the subtree root's
    /// owner. Returns the number of nodes trashed and the total bytes
    /// released.
    pub async fn trash_subtree(&self, node_id: Uuid) -> AppResult<(u64, i64)> {
        let mut tx = self.begin().await?;

        let node = sqlx::query_as::<_, Node>("SELECT * FROM nodes WHERE id = $1 FOR UPDATE")
            .bind(node_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to lock node", e))?
            .ok_or_else(|| AppError::not_found(format!("Node {node_id} not found")))?;

        let prefix = format!("{}%", node.path);

        let held: Vec<(Uuid, i64)> = sqlx::query_as(
            "SELECT n.owner_id, v.size_bytes FROM nodes n \
             JOIN node_versions v ON v.id = n.current_version_id \
             WHERE n.path LIKE $1 AND n.status = 'ACTIVE' AND n.deleted_at IS NULL",
        )
        .bind(&prefix)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to sum released bytes", e)
        })?;

        let result = sqlx::query(
            "UPDATE nodes SET status = 'TRASHED', deleted_at = NOW(), updated_at = NOW() \
             WHERE path LIKE $1 AND status <> 'TRASHED'",
        )
        .bind(&prefix)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to trash subtree", e))?;

        let released = released_by_owner(&held);
        let mut freed = 0i64;
        for (owner_id, bytes) in &released {
            sqlx::query(
                "UPDATE usage_counters \
                 SET used_bytes = GREATEST(used_bytes - $2, 0), updated_at = NOW() \
                 WHERE user_id = $1",
            )
            .bind(owner_id)
            .bind(bytes)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to release usage", e)
            })?;
            freed += bytes;
        }

        self.commit(tx).await?;
        Ok((result.rows_affected(), freed))
    }

    /// Fetch nodes by exact path, used to load an ancestor chain.
    pub async fn find_by_paths(&self, paths: &[String]) -> AppResult<Vec<Node>> {
        sqlx::query_as::<_, Node>("SELECT * FROM nodes WHERE path = ANY($1) ORDER BY depth ASC")
            .bind(paths)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to load ancestors", e))
    }

    /// All usable descendants strictly below a path, shallowest first.
    pub async fn find_active_descendants(&self, path: &str) -> AppResult<Vec<Node>> {
        sqlx::query_as::<_, Node>(
            "SELECT * FROM nodes \
             WHERE path LIKE $1 AND path <> $2 AND status = 'ACTIVE' AND deleted_at IS NULL \
             ORDER BY depth ASC, path ASC",
        )
        .bind(format!("{path}%"))
        .bind(path)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to list descendants", e))
    }

    async fn begin(&self) -> AppResult<Transaction<'static, Postgres>> {
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

/// Aggregate per-version byte holdings into one release per owner.
///
/// Counter updates run in owner order so two overlapping trashes never
/// deadlock on each other's rows.
fn released_by_owner(held: &[(Uuid, i64)]) -> Vec<(Uuid, i64)> {
    let mut totals = std::collections::BTreeMap::new();
    for (owner_id, bytes) in held {
        *totals.entry(*owner_id).or_insert(0i64) += bytes;
    }
    totals.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_released_bytes_attributed_per_owner() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        // A folder owned by `a` holding a file `b` uploaded must release
        // b's bytes to b, never to a.
        let released = released_by_owner(&[(a, 10), (b, 5), (a, 7)]);
        let mut by_owner = std::collections::HashMap::new();
        for (owner, bytes) in &released {
            by_owner.insert(*owner, *bytes);
        }
        assert_eq!(by_owner[&a], 17);
        assert_eq!(by_owner[&b], 5);
        assert_eq!(released.len(), 2);
    }

    #[test]
    fn test_released_bytes_empty_subtree() {
        assert!(released_by_owner(&[]).is_empty());
    }
}
