//! Folder bundle entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle status of a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "bundle_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum BundleStatus {
    /// Requested; the archive job has not completed yet.
    Pending,
    /// The archive is built and downloadable until it expires.
    Completed,
    /// The archive job exhausted its retries.
    Failed,
    /// The archive expired and its object was removed.
    Deleted,
}

/// A zip archive of a folder subtree, built asynchronously.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BundleJob {
    /// Unique bundle identifier.
    pub id: Uuid,
    /// The folder the bundle was built from; None if it was since removed.
    pub node_id: Option<Uuid>,
    /// The user who requested the bundle.
    pub requested_by: Uuid,
    /// Storage key of the finished archive.
    pub storage_key: String,
    /// Archive size in bytes once completed.
    pub size_bytes: i64,
    /// Lifecycle status.
    pub status: BundleStatus,
    /// When the bundle was requested.
    pub created_at: DateTime<Utc>,
    /// When the archive stops being downloadable.
    pub expires_at: DateTime<Utc>,
}

/// One file to include in an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleEntry {
    /// Storage key of the file's current version.
    pub storage_key: String,
    /// Relative path inside the archive, `/`-separated.
    pub archive_path: String,
}

/// Payload carried by a `folder_bundle` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundlePayload {
    /// The bundle row this job builds.
    pub bundle_id: Uuid,
    /// Storage key to write the finished archive to.
    pub dest_key: String,
    /// Files to include, snapshotted at request time.
    pub entries: Vec<BundleEntry>,
}
