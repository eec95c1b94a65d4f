//! Two-phase upload coordination.
//!
//! Clients upload bytes directly to the object store with a time-boxed
//! write credential; the server only sees declared metadata at init and
//! reconciles it against the stored object at finalize. Activation is
//! atomic with the usage update, so a node never points at content that
//! failed validation.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use treedrive_core::config::StorageConfig;
use treedrive_core::error::AppError;
use treedrive_core::result::AppResult;
use treedrive_core::traits::{ObjectMetadata, ObjectStore};
use treedrive_database::repositories::node::NodeRepository;
use treedrive_database::repositories::usage::UsageRepository;
use treedrive_database::repositories::version::VersionRepository;
use treedrive_entity::grant::model::AccessLevel;
use treedrive_entity::node::model::{CreateNode, Node, NodeKind, NodeStatus};
use treedrive_entity::version::model::{BeginVersion, NodeVersion, VersionStatus};

use crate::access::AccessResolver;

/// Declared metadata for an upload being initialized.
#[derive(Debug, Clone)]
pub struct InitUpload {
    /// File name as the client will display it.
    pub filename: String,
    /// Declared size in bytes.
    pub size_bytes: i64,
    /// Declared IANA media type.
    pub mime_type: String,
    /// Declared content checksum (hex MD5).
    pub checksum: String,
}

/// Everything the client needs to perform and then finalize an upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadTicket {
    /// The file node the upload belongs to.
    pub node_id: Uuid,
    /// The version allocated for this upload.
    pub version_id: Uuid,
    /// The allocated version number.
    pub version_number: i32,
    /// Time-boxed write-only URL for the client-direct upload.
    pub upload_url: String,
    /// Credential lifetime in seconds.
    pub expires_in_seconds: u64,
}

/// Storage key for a new upload: owner-scoped, collision-free.
pub fn storage_key(owner_id: Uuid, filename: &str) -> String {
    format!("users/{owner_id}/{}-{filename}", Uuid::new_v4().simple())
}

/// Reconcile stored object metadata against the declared version.
///
/// Returns whether the checksum was actually compared; stores that do
/// not report a content hash skip that check.
pub fn validate_object(declared: &NodeVersion, actual: &ObjectMetadata) -> AppResult<bool> {
    if actual.size_bytes <= 0 {
        return Err(AppError::integrity_mismatch("Stored object is empty"));
    }
    if actual.size_bytes != declared.size_bytes {
        return Err(AppError::integrity_mismatch(format!(
            "Size mismatch: declared {} but stored {}",
            declared.size_bytes, actual.size_bytes
        )));
    }
    match &actual.content_type {
        Some(content_type) if content_type == &declared.mime_type => {}
        Some(content_type) => {
            return Err(AppError::integrity_mismatch(format!(
                "MIME mismatch: declared {} but stored {content_type}",
                declared.mime_type
            )));
        }
        // The store always records a content type for a completed
        // upload, so its absence means the object cannot be what the
        // client declared.
        None => {
            return Err(AppError::integrity_mismatch(
                "Stored object has no content type",
            ));
        }
    }
    match &actual.content_md5 {
        Some(hash) => {
            if !hash.eq_ignore_ascii_case(&declared.checksum) {
                return Err(AppError::integrity_mismatch(
                    "Checksum does not match declared value",
                ));
            }
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Lifecycle preconditions for finalizing a version.
///
/// The node may be UPLOADING (first upload) or ACTIVE (revision); the
/// version itself must still be awaiting finalize. Ownership is not
/// required here — access is the resolver's concern.
pub fn finalize_gate(node: &Node, version: &NodeVersion) -> AppResult<()> {
    if !matches!(node.status, NodeStatus::Uploading | NodeStatus::Active) {
        return Err(AppError::invalid_state(format!(
            "Node {} is not accepting a finalize",
            node.id
        )));
    }
    if version.status != VersionStatus::Uploading {
        return Err(AppError::invalid_state(format!(
            "Version {} is not awaiting finalize",
            version.id
        )));
    }
    Ok(())
}

/// Coordinates the init/finalize upload protocol.
#[derive(Debug, Clone)]
pub struct UploadService {
    node_repo: Arc<NodeRepository>,
    version_repo: Arc<VersionRepository>,
    usage_repo: Arc<UsageRepository>,
    store: Arc<dyn ObjectStore>,
    resolver: Arc<AccessResolver>,
    config: StorageConfig,
}

impl UploadService {
    /// Create a new upload service.
    pub fn new(
        node_repo: Arc<NodeRepository>,
        version_repo: Arc<VersionRepository>,
        usage_repo: Arc<UsageRepository>,
        store: Arc<dyn ObjectStore>,
        resolver: Arc<AccessResolver>,
        config: StorageConfig,
    ) -> Self {
        Self {
            node_repo,
            version_repo,
            usage_repo,
            store,
            resolver,
            config,
        }
    }

    /// Initialize an upload of a new file under `parent_id` (the caller's
    /// root when absent). Creates the UPLOADING node and version and
    /// returns a write credential.
    pub async fn init(
        &self,
        user_id: Uuid,
        parent_id: Option<Uuid>,
        upload: InitUpload,
    ) -> AppResult<UploadTicket> {
        self.validate_declared(&upload)?;

        let parent = match parent_id {
            Some(id) => self
                .node_repo
                .find_by_id(id)
                .await?
                .filter(|n| n.is_folder() && n.is_usable())
                .ok_or_else(|| {
                    AppError::invalid_parent(format!("Node {id} is not an active folder"))
                })?,
            None => {
                let root = self
                    .node_repo
                    .ensure_root(user_id, &format!("{user_id}Home"))
                    .await?;
                self.usage_repo.ensure(user_id).await?;
                root
            }
        };
        self.resolver
            .require(user_id, &parent, AccessLevel::Editor)
            .await?;

        let node = self
            .node_repo
            .create_child(
                parent.id,
                &CreateNode {
                    owner_id: user_id,
                    name: upload.filename.clone(),
                    kind: NodeKind::File,
                    status: NodeStatus::Uploading,
                },
            )
            .await?;

        self.issue_ticket(&node, &upload).await
    }

    /// Initialize a new version of an existing file node.
    ///
    /// Allowed on ACTIVE files (revision) and DRAFT files (retry after a
    /// failed finalize).
    pub async fn init_revision(
        &self,
        user_id: Uuid,
        node_id: Uuid,
        upload: InitUpload,
    ) -> AppResult<UploadTicket> {
        self.validate_declared(&upload)?;

        let node = self
            .node_repo
            .find_by_id(node_id)
            .await?
            .filter(|n| n.deleted_at.is_none())
            .ok_or_else(|| AppError::not_found(format!("Node {node_id} not found")))?;
        if node.is_folder() {
            return Err(AppError::invalid_state("Cannot upload content to a folder"));
        }
        if !matches!(node.status, NodeStatus::Active | NodeStatus::Draft) {
            return Err(AppError::invalid_state(format!(
                "Node {node_id} cannot accept a new version"
            )));
        }
        self.resolver
            .require(user_id, &node, AccessLevel::Editor)
            .await?;

        if node.status == NodeStatus::Draft {
            self.node_repo.mark_uploading(node.id).await?;
        }
        self.issue_ticket(&node, &upload).await
    }

    /// Finalize an upload: verify the stored object against the declared
    /// metadata and commit or fail the version.
    ///
    /// Any editor of the node may finalize, matching `init_revision`:
    /// a grantee who initiated a version must be able to complete it.
    pub async fn finalize(
        &self,
        user_id: Uuid,
        node_id: Uuid,
        version_id: Uuid,
    ) -> AppResult<NodeVersion> {
        let node = self
            .node_repo
            .find_by_id(node_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Node {node_id} not found")))?;
        let version = self
            .version_repo
            .find_by_id(version_id)
            .await?
            .filter(|v| v.node_id == node_id)
            .ok_or_else(|| AppError::not_found(format!("Version {version_id} not found")))?;

        self.resolver
            .require(user_id, &node, AccessLevel::Editor)
            .await?;
        finalize_gate(&node, &version)?;

        let meta = self.store.get_metadata(&version.storage_key).await?;
        let Some(meta) = meta else {
            self.version_repo.fail(version_id).await?;
            return Err(AppError::not_found(format!(
                "No object stored at {}",
                version.storage_key
            )));
        };

        match validate_object(&version, &meta) {
            Ok(hash_checked) => {
                if !hash_checked {
                    warn!(
                        version_id = %version_id,
                        key = %version.storage_key,
                        "Store reported no content hash; checksum not verified"
                    );
                }
            }
            Err(err) => {
                self.version_repo.fail(version_id).await?;
                return Err(err);
            }
        }

        let version = self.version_repo.activate(version_id).await?;
        info!(
            node_id = %node_id,
            version_id = %version_id,
            version_number = version.version_number,
            "Upload finalized"
        );
        Ok(version)
    }

    async fn issue_ticket(&self, node: &Node, upload: &InitUpload) -> AppResult<UploadTicket> {
        let key = storage_key(node.owner_id, &upload.filename);
        let version = self
            .version_repo
            .begin(
                node.id,
                &BeginVersion {
                    storage_provider: self.store.provider_name().to_string(),
                    storage_key: key.clone(),
                    size_bytes: upload.size_bytes,
                    mime_type: upload.mime_type.clone(),
                    checksum: upload.checksum.clone(),
                },
            )
            .await?;

        let ttl = Duration::from_secs(self.config.upload_credential_ttl_seconds);
        let upload_url = self.store.issue_write_credential(&key, ttl).await?;

        Ok(UploadTicket {
            node_id: node.id,
            version_id: version.id,
            version_number: version.version_number,
            upload_url,
            expires_in_seconds: ttl.as_secs(),
        })
    }

    fn validate_declared(&self, upload: &InitUpload) -> AppResult<()> {
        if upload.filename.is_empty() || upload.filename.contains('/') {
            return Err(AppError::validation("Invalid filename"));
        }
        if upload.size_bytes <= 0 {
            return Err(AppError::validation("Declared size must be positive"));
        }
        if upload.size_bytes as u64 > self.config.max_upload_size_bytes {
            return Err(AppError::validation(format!(
                "Declared size exceeds the {} byte limit",
                self.config.max_upload_size_bytes
            )));
        }
        if upload.mime_type.is_empty() || upload.checksum.is_empty() {
            return Err(AppError::validation("MIME type and checksum are required"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use treedrive_core::error::ErrorKind;

    use super::*;

    fn declared(size: i64, mime: &str, checksum: &str) -> NodeVersion {
        NodeVersion {
            id: Uuid::new_v4(),
            node_id: Uuid::new_v4(),
            version_number: 1,
            storage_provider: "memory".to_string(),
            storage_key: "users/x/y".to_string(),
            size_bytes: size,
            mime_type: mime.to_string(),
            checksum: checksum.to_string(),
            status: VersionStatus::Uploading,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn stored(size: i64, mime: Option<&str>, md5: Option<&str>) -> ObjectMetadata {
        ObjectMetadata {
            size_bytes: size,
            content_type: mime.map(str::to_string),
            content_md5: md5.map(str::to_string),
            last_modified: None,
        }
    }

    #[test]
    fn test_validate_object_accepts_matching() {
        let v = declared(10, "text/plain", "abc123");
        let checked = validate_object(&v, &stored(10, Some("text/plain"), Some("ABC123"))).unwrap();
        assert!(checked);
    }

    #[test]
    fn test_validate_object_skips_missing_hash() {
        let v = declared(10, "text/plain", "abc123");
        let checked = validate_object(&v, &stored(10, Some("text/plain"), None)).unwrap();
        assert!(!checked);
    }

    #[test]
    fn test_validate_object_rejects_empty() {
        let v = declared(10, "text/plain", "abc123");
        let err = validate_object(&v, &stored(0, None, None)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::IntegrityMismatch);
    }

    #[test]
    fn test_validate_object_rejects_size_mismatch() {
        let v = declared(10, "text/plain", "abc123");
        let err = validate_object(&v, &stored(11, Some("text/plain"), None)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::IntegrityMismatch);
    }

    #[test]
    fn test_validate_object_rejects_mime_mismatch() {
        let v = declared(10, "text/plain", "abc123");
        let err = validate_object(&v, &stored(10, Some("image/png"), None)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::IntegrityMismatch);
    }

    #[test]
    fn test_validate_object_rejects_missing_content_type() {
        // Unlike a missing hash, a missing content type is a mismatch.
        let v = declared(10, "text/plain", "abc123");
        let err = validate_object(&v, &stored(10, None, Some("abc123"))).unwrap_err();
        assert_eq!(err.kind, ErrorKind::IntegrityMismatch);
    }

    #[test]
    fn test_validate_object_rejects_hash_mismatch() {
        let v = declared(10, "text/plain", "abc123");
        let err = validate_object(&v, &stored(10, Some("text/plain"), Some("zzz"))).unwrap_err();
        assert_eq!(err.kind, ErrorKind::IntegrityMismatch);
    }

    fn make_node(status: NodeStatus) -> Node {
        Node {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            name: "report.pdf".to_string(),
            kind: NodeKind::File,
            status,
            is_public: false,
            path: "00010001".to_string(),
            depth: 2,
            current_version_id: None,
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_finalize_gate_ignores_ownership() {
        // A grantee who initiated a revision finalizes it; the gate only
        // checks lifecycle state.
        let node = make_node(NodeStatus::Active);
        let version = declared(10, "text/plain", "abc123");
        assert!(finalize_gate(&node, &version).is_ok());

        let node = make_node(NodeStatus::Uploading);
        assert!(finalize_gate(&node, &version).is_ok());
    }

    #[test]
    fn test_finalize_gate_rejects_wrong_states() {
        let version = declared(10, "text/plain", "abc123");
        let err = finalize_gate(&make_node(NodeStatus::Draft), &version).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidState);

        let mut active = declared(10, "text/plain", "abc123");
        active.status = VersionStatus::Active;
        let err = finalize_gate(&make_node(NodeStatus::Active), &active).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidState);
    }

    #[test]
    fn test_storage_key_is_owner_scoped() {
        let owner = Uuid::new_v4();
        let key = storage_key(owner, "report.pdf");
        assert!(key.starts_with(&format!("users/{owner}/")));
        assert!(key.ends_with("-report.pdf"));
    }
}
