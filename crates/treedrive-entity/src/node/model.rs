//! Node entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Whether a node is a file or a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "node_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// A file node; carries content versions.
    File,
    /// A folder node; may have children, never a current version.
    Folder,
}

/// Lifecycle status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "node_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeStatus {
    /// A file whose upload has been initialized but not finalized.
    Uploading,
    /// Visible and usable.
    Active,
    /// Logically removed by the user.
    Trashed,
    /// A file whose upload finalization failed; retained without content.
    Draft,
}

/// A file or folder in the user hierarchy.
///
/// Position in the tree is encoded by `path`: one fixed-width segment per
/// level, so ancestor and descendant lookups are plain prefix matches
/// (see [`super::tree`]).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Node {
    /// Unique node identifier.
    pub id: Uuid,
    /// The node owner.
    pub owner_id: Uuid,
    /// Display name.
    pub name: String,
    /// File or folder.
    pub kind: NodeKind,
    /// Lifecycle status.
    pub status: NodeStatus,
    /// Whether the node is publicly viewable.
    pub is_public: bool,
    /// Materialized path: fixed-width segments, one per tree level.
    pub path: String,
    /// Depth in the tree (1 for roots).
    pub depth: i32,
    /// The current content version (files only, null until first finalize).
    pub current_version_id: Option<Uuid>,
    /// Soft-delete timestamp; deleted nodes stay in the table.
    pub deleted_at: Option<DateTime<Utc>>,
    /// When the node was created.
    pub created_at: DateTime<Utc>,
    /// When the node was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Node {
    /// Check if this node is a folder.
    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }

    /// Check if this node is active and not soft-deleted.
    pub fn is_usable(&self) -> bool {
        self.status == NodeStatus::Active && self.deleted_at.is_none()
    }
}

/// Data required to create a new child node.
#[derive(Debug, Clone)]
pub struct CreateNode {
    /// The node owner.
    pub owner_id: Uuid,
    /// Display name.
    pub name: String,
    /// File or folder.
    pub kind: NodeKind,
    /// Initial lifecycle status (UPLOADING for files, ACTIVE for folders).
    pub status: NodeStatus,
}
