//! Node version entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle status of a content version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "version_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum VersionStatus {
    /// Allocated at upload init; content not yet verified.
    Uploading,
    /// Verified against the object store and committed.
    Active,
    /// Finalize validation failed; never usable.
    Failed,
}

/// One immutable content revision of a file node.
///
/// Rows are never mutated in place except for `status`; every re-upload
/// creates a new row with the next `version_number`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NodeVersion {
    /// Unique version identifier.
    pub id: Uuid,
    /// The owning file node.
    pub node_id: Uuid,
    /// Monotonically increasing per-node number, starting at 1.
    pub version_number: i32,
    /// Which object-store backend holds the content.
    pub storage_provider: String,
    /// Opaque storage key within the provider.
    pub storage_key: String,
    /// Declared size in bytes.
    pub size_bytes: i64,
    /// Declared IANA media type.
    pub mime_type: String,
    /// Declared content checksum (hex MD5).
    pub checksum: String,
    /// Lifecycle status.
    pub status: VersionStatus,
    /// When the version was created.
    pub created_at: DateTime<Utc>,
    /// When the version was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Declared metadata for a version being initialized.
#[derive(Debug, Clone)]
pub struct BeginVersion {
    /// Which object-store backend will hold the content.
    pub storage_provider: String,
    /// Opaque storage key the client will upload to.
    pub storage_key: String,
    /// Declared size in bytes.
    pub size_bytes: i64,
    /// Declared IANA media type.
    pub mime_type: String,
    /// Declared content checksum (hex MD5).
    pub checksum: String,
}
