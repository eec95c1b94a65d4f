//! Downloads: direct file credentials and asynchronous folder bundles.
//!
//! A file download is synchronous: a time-boxed read credential on the
//! current version's key. A folder download snapshots the visible
//! subtree into archive entries, records a PENDING bundle, and enqueues
//! a durable `folder_bundle` job; the client polls the bundle until it
//! is COMPLETED and then follows the returned credential.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use treedrive_core::config::{StorageConfig, WorkerConfig};
use treedrive_core::error::AppError;
use treedrive_core::result::AppResult;
use treedrive_core::traits::ObjectStore;
use treedrive_database::repositories::bundle::BundleRepository;
use treedrive_database::repositories::job::JobRepository;
use treedrive_database::repositories::node::NodeRepository;
use treedrive_database::repositories::version::VersionRepository;
use treedrive_entity::bundle::model::{BundleEntry, BundleJob, BundlePayload, BundleStatus};
use treedrive_entity::grant::model::AccessLevel;
use treedrive_entity::job::model::CreateJob;
use treedrive_entity::node::model::{Node, NodeStatus};
use treedrive_entity::node::tree;
use treedrive_entity::version::model::VersionStatus;

use crate::access::AccessResolver;

/// A time-boxed credential handed to the client.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadTicket {
    /// Read-only URL for the object.
    pub download_url: String,
    /// Credential lifetime in seconds.
    pub expires_in_seconds: u64,
}

/// A bundle's state as seen by a poller.
#[derive(Debug, Clone, Serialize)]
pub struct BundleView {
    /// The bundle record.
    pub bundle: BundleJob,
    /// Read credential, present once the bundle is COMPLETED.
    pub download_url: Option<String>,
}

/// Reconstruct archive-relative paths for the files under a folder.
///
/// `descendants` is the active subtree below `base`, shallowest first;
/// `keys` maps file node IDs to their current version's storage key.
/// Files without a committed version are skipped.
pub fn archive_entries(
    base: &Node,
    descendants: &[Node],
    keys: &HashMap<Uuid, String>,
) -> Vec<BundleEntry> {
    let names: HashMap<&str, &str> = descendants
        .iter()
        .map(|n| (n.path.as_str(), n.name.as_str()))
        .collect();

    let mut entries = Vec::new();
    for node in descendants {
        let Some(key) = keys.get(&node.id) else {
            continue;
        };
        let Some(segments) = tree::segments_below(&base.path, &node.path) else {
            continue;
        };

        let mut parts: Vec<&str> = Vec::with_capacity(segments.len());
        let mut prefix = base.path.clone();
        for segment in &segments[..segments.len() - 1] {
            prefix.push_str(segment);
            // A file under a folder outside the snapshot (raced trash)
            // is silently dropped rather than misplaced in the archive.
            match names.get(prefix.as_str()) {
                Some(name) => parts.push(name),
                None => break,
            }
        }
        if parts.len() != segments.len() - 1 {
            continue;
        }
        parts.push(&node.name);

        entries.push(BundleEntry {
            storage_key: key.clone(),
            archive_path: parts.join("/"),
        });
    }
    entries
}

/// Total declared size of the entries going into a bundle.
///
/// `sizes` maps storage keys to version sizes; entries without one are
/// counted as zero rather than dropped.
pub fn declared_size(entries: &[BundleEntry], sizes: &HashMap<String, i64>) -> i64 {
    entries
        .iter()
        .filter_map(|e| sizes.get(&e.storage_key))
        .sum()
}

/// Download coordination for files and folder bundles.
#[derive(Debug, Clone)]
pub struct DownloadService {
    node_repo: Arc<NodeRepository>,
    version_repo: Arc<VersionRepository>,
    bundle_repo: Arc<BundleRepository>,
    job_repo: Arc<JobRepository>,
    store: Arc<dyn ObjectStore>,
    resolver: Arc<AccessResolver>,
    storage_config: StorageConfig,
    worker_config: WorkerConfig,
}

impl DownloadService {
    /// Create a new download service.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_repo: Arc<NodeRepository>,
        version_repo: Arc<VersionRepository>,
        bundle_repo: Arc<BundleRepository>,
        job_repo: Arc<JobRepository>,
        store: Arc<dyn ObjectStore>,
        resolver: Arc<AccessResolver>,
        storage_config: StorageConfig,
        worker_config: WorkerConfig,
    ) -> Self {
        Self {
            node_repo,
            version_repo,
            bundle_repo,
            job_repo,
            store,
            resolver,
            storage_config,
            worker_config,
        }
    }

    /// Issue a read credential for a file's current content.
    pub async fn download_file(&self, user_id: Uuid, node_id: Uuid) -> AppResult<DownloadTicket> {
        let node = self.require_usable(node_id).await?;
        if node.is_folder() {
            return Err(AppError::invalid_state(
                "Folders are downloaded as bundles",
            ));
        }
        self.resolver
            .require(user_id, &node, AccessLevel::Viewer)
            .await?;

        let version_id = node
            .current_version_id
            .ok_or_else(|| AppError::not_found(format!("Node {node_id} has no content")))?;
        let version = self
            .version_repo
            .find_by_id(version_id)
            .await?
            .filter(|v| v.status == VersionStatus::Active)
            .ok_or_else(|| AppError::not_found(format!("Version {version_id} not found")))?;

        let ttl = Duration::from_secs(self.storage_config.download_credential_ttl_seconds);
        let download_url = self
            .store
            .issue_read_credential(&version.storage_key, ttl)
            .await?;
        Ok(DownloadTicket {
            download_url,
            expires_in_seconds: ttl.as_secs(),
        })
    }

    /// Request a zip bundle of a folder subtree. Returns immediately with
    /// the PENDING bundle; the archive is built by a background worker.
    pub async fn request_bundle(&self, user_id: Uuid, folder_id: Uuid) -> AppResult<BundleJob> {
        let folder = self.require_usable(folder_id).await?;
        if !folder.is_folder() {
            return Err(AppError::invalid_state(
                "Only folders can be bundled",
            ));
        }
        self.resolver
            .require(user_id, &folder, AccessLevel::Viewer)
            .await?;

        let descendants = self.node_repo.find_active_descendants(&folder.path).await?;
        let version_ids: Vec<Uuid> = descendants
            .iter()
            .filter_map(|n| n.current_version_id)
            .collect();
        let versions = self.version_repo.find_by_ids(&version_ids).await?;
        let keys: HashMap<Uuid, String> = versions
            .iter()
            .filter(|v| v.status == VersionStatus::Active)
            .map(|v| (v.node_id, v.storage_key.clone()))
            .collect();
        let entries = archive_entries(&folder, &descendants, &keys);
        let sizes: HashMap<String, i64> = versions
            .iter()
            .map(|v| (v.storage_key.clone(), v.size_bytes))
            .collect();
        let total_bytes = declared_size(&entries, &sizes);

        let dest_key = format!("bundles/{}.zip", Uuid::new_v4().simple());
        let expires_at = Utc::now() + ChronoDuration::hours(self.storage_config.bundle_ttl_hours);
        let bundle = self
            .bundle_repo
            .create(folder.id, user_id, &dest_key, total_bytes, expires_at)
            .await?;

        let payload = BundlePayload {
            bundle_id: bundle.id,
            dest_key,
            entries,
        };
        self.job_repo
            .create(&CreateJob {
                job_type: "folder_bundle".to_string(),
                payload: serde_json::to_value(&payload)?,
                max_attempts: self.worker_config.max_attempts,
                scheduled_at: None,
            })
            .await?;

        info!(
            bundle_id = %bundle.id,
            folder_id = %folder_id,
            entries = payload.entries.len(),
            "Bundle requested"
        );
        Ok(bundle)
    }

    /// Poll a bundle. Only the requester may poll; a COMPLETED bundle
    /// inside its download window carries a read credential.
    pub async fn bundle_status(&self, user_id: Uuid, bundle_id: Uuid) -> AppResult<BundleView> {
        let bundle = self
            .bundle_repo
            .find_by_id(bundle_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Bundle {bundle_id} not found")))?;
        if bundle.requested_by != user_id {
            return Err(AppError::forbidden("Bundle belongs to another user"));
        }

        let download_url = if bundle.status == BundleStatus::Completed
            && bundle.expires_at > Utc::now()
        {
            let ttl = Duration::from_secs(self.storage_config.download_credential_ttl_seconds);
            Some(
                self.store
                    .issue_read_credential(&bundle.storage_key, ttl)
                    .await?,
            )
        } else {
            None
        };

        Ok(BundleView {
            bundle,
            download_url,
        })
    }

    async fn require_usable(&self, node_id: Uuid) -> AppResult<Node> {
        self.node_repo
            .find_by_id(node_id)
            .await?
            .filter(|n| n.deleted_at.is_none() && n.status != NodeStatus::Trashed)
            .ok_or_else(|| AppError::not_found(format!("Node {node_id} not found")))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use treedrive_entity::node::model::NodeKind;

    use super::*;

    fn make_node(name: &str, path: &str, kind: NodeKind) -> Node {
        Node {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            name: name.to_string(),
            kind,
            status: NodeStatus::Active,
            is_public: false,
            path: path.to_string(),
            depth: (path.len() / 4) as i32,
            current_version_id: None,
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_archive_entries_nested_paths() {
        let base = make_node("Home", "0001", NodeKind::Folder);
        let docs = make_node("docs", "00010001", NodeKind::Folder);
        let readme = make_node("README.md", "000100010001", NodeKind::File);
        let photo = make_node("photo.png", "00010002", NodeKind::File);

        let mut keys = HashMap::new();
        keys.insert(readme.id, "users/u/k1".to_string());
        keys.insert(photo.id, "users/u/k2".to_string());

        let descendants = vec![docs, readme, photo];
        let entries = archive_entries(&base, &descendants, &keys);

        let paths: Vec<&str> = entries.iter().map(|e| e.archive_path.as_str()).collect();
        assert_eq!(paths, vec!["docs/README.md", "photo.png"]);
    }

    #[test]
    fn test_archive_entries_skips_files_without_content() {
        let base = make_node("Home", "0001", NodeKind::Folder);
        let draft = make_node("draft.txt", "00010001", NodeKind::File);

        let entries = archive_entries(&base, &[draft], &HashMap::new());
        assert!(entries.is_empty());
    }

    #[test]
    fn test_declared_size_sums_included_entries() {
        let base = make_node("Home", "0001", NodeKind::Folder);
        let kept = make_node("a.txt", "00010001", NodeKind::File);
        let orphan = make_node("deep.txt", "000100020001", NodeKind::File);

        let mut keys = HashMap::new();
        keys.insert(kept.id, "users/u/a".to_string());
        keys.insert(orphan.id, "users/u/deep".to_string());
        let mut sizes = HashMap::new();
        sizes.insert("users/u/a".to_string(), 7i64);
        sizes.insert("users/u/deep".to_string(), 100i64);

        // The orphan is excluded from the archive, so its bytes do not
        // count toward the declared total.
        let entries = archive_entries(&base, &[kept, orphan], &keys);
        assert_eq!(declared_size(&entries, &sizes), 7);
    }

    #[test]
    fn test_archive_entries_drops_orphaned_files() {
        // A file whose parent folder is missing from the snapshot.
        let base = make_node("Home", "0001", NodeKind::Folder);
        let orphan = make_node("deep.txt", "000100010001", NodeKind::File);

        let mut keys = HashMap::new();
        keys.insert(orphan.id, "users/u/k".to_string());

        let entries = archive_entries(&base, &[orphan], &keys);
        assert!(entries.is_empty());
    }
}
