//! Tree operations: roots, folders, listing, renaming, trashing.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use treedrive_core::error::AppError;
use treedrive_core::result::AppResult;
use treedrive_core::types::pagination::{PageRequest, PageResponse};
use treedrive_database::repositories::grant::{GrantRepository, SharedWith};
use treedrive_database::repositories::node::NodeRepository;
use treedrive_database::repositories::usage::UsageRepository;
use treedrive_database::repositories::user::UserRepository;
use treedrive_database::repositories::version::VersionRepository;
use treedrive_entity::grant::model::AccessLevel;
use treedrive_entity::node::model::{CreateNode, Node, NodeKind, NodeStatus};
use treedrive_entity::node::tree;
use treedrive_entity::usage::UsageCounter;

use crate::access::AccessResolver;

/// Human-readable `/a/b/c` display path from a node's ancestor chain.
///
/// `chain` must be the ancestors plus the node itself, shallowest first.
pub fn display_path(chain: &[Node]) -> String {
    let mut out = String::new();
    for node in chain {
        out.push('/');
        out.push_str(&node.name);
    }
    out
}

/// A node with everything the detail view shows.
#[derive(Debug, Clone, Serialize)]
pub struct NodeDetail {
    /// The node itself.
    pub node: Node,
    /// Owner's email address.
    pub owner_email: String,
    /// Number of the current version, for files with committed content.
    pub current_version_number: Option<i32>,
    /// Display path from the root, `/`-separated names.
    pub display_path: String,
    /// Who the node is shared with.
    pub shared_with: Vec<SharedWith>,
}

/// Tree store operations with access enforcement.
#[derive(Debug, Clone)]
pub struct TreeService {
    node_repo: Arc<NodeRepository>,
    version_repo: Arc<VersionRepository>,
    grant_repo: Arc<GrantRepository>,
    user_repo: Arc<UserRepository>,
    usage_repo: Arc<UsageRepository>,
    resolver: Arc<AccessResolver>,
}

impl TreeService {
    /// Create a new tree service.
    pub fn new(
        node_repo: Arc<NodeRepository>,
        version_repo: Arc<VersionRepository>,
        grant_repo: Arc<GrantRepository>,
        user_repo: Arc<UserRepository>,
        usage_repo: Arc<UsageRepository>,
        resolver: Arc<AccessResolver>,
    ) -> Self {
        Self {
            node_repo,
            version_repo,
            grant_repo,
            user_repo,
            usage_repo,
            resolver,
        }
    }

    /// Get the caller's root folder, creating it on first touch along
    /// with a zeroed usage counter.
    pub async fn ensure_root(&self, user_id: Uuid) -> AppResult<Node> {
        let root = self
            .node_repo
            .ensure_root(user_id, &format!("{user_id}Home"))
            .await?;
        self.usage_repo.ensure(user_id).await?;
        Ok(root)
    }

    /// List a folder's children the caller can see.
    pub async fn list_children(
        &self,
        user_id: Uuid,
        folder_id: Uuid,
        page: PageRequest,
    ) -> AppResult<PageResponse<Node>> {
        let folder = self.require_usable(folder_id).await?;
        if !folder.is_folder() {
            return Err(AppError::invalid_parent(format!(
                "Node {folder_id} is not a folder"
            )));
        }
        self.resolver
            .require(user_id, &folder, AccessLevel::Viewer)
            .await?;
        self.node_repo
            .find_children_visible(&folder, user_id, &page)
            .await
    }

    /// Create a folder under a parent the caller can edit.
    pub async fn create_folder(
        &self,
        user_id: Uuid,
        parent_id: Uuid,
        name: &str,
    ) -> AppResult<Node> {
        validate_name(name)?;
        let parent = self.require_usable(parent_id).await?;
        self.resolver
            .require(user_id, &parent, AccessLevel::Editor)
            .await?;

        let node = self
            .node_repo
            .create_child(
                parent_id,
                &CreateNode {
                    owner_id: user_id,
                    name: name.to_string(),
                    kind: NodeKind::Folder,
                    status: NodeStatus::Active,
                },
            )
            .await?;
        info!(node_id = %node.id, parent_id = %parent_id, "Created folder");
        Ok(node)
    }

    /// Full detail view of a node.
    pub async fn node_detail(&self, user_id: Uuid, node_id: Uuid) -> AppResult<NodeDetail> {
        let node = self.require_usable(node_id).await?;
        self.resolver
            .require(user_id, &node, AccessLevel::Viewer)
            .await?;

        let owner = self
            .user_repo
            .find_by_id(node.owner_id)
            .await?
            .ok_or_else(|| AppError::internal(format!("Owner {} missing", node.owner_id)))?;

        let current_version_number = match node.current_version_id {
            Some(version_id) => self
                .version_repo
                .find_by_id(version_id)
                .await?
                .map(|v| v.version_number),
            None => None,
        };

        let mut paths = tree::ancestor_paths(&node.path);
        paths.push(node.path.clone());
        let chain = self.node_repo.find_by_paths(&paths).await?;

        let shared_with = self.grant_repo.find_shared_with(node_id).await?;

        Ok(NodeDetail {
            display_path: display_path(&chain),
            node,
            owner_email: owner.email,
            current_version_number,
            shared_with,
        })
    }

    /// List a file's versions, newest first.
    pub async fn list_versions(
        &self,
        user_id: Uuid,
        node_id: Uuid,
        page: PageRequest,
    ) -> AppResult<PageResponse<treedrive_entity::version::model::NodeVersion>> {
        let node = self.require_usable(node_id).await?;
        if node.is_folder() {
            return Err(AppError::invalid_state("Folders have no versions"));
        }
        self.resolver
            .require(user_id, &node, AccessLevel::Viewer)
            .await?;
        self.version_repo.find_by_node(node_id, &page).await
    }

    /// Rename a node the caller can edit.
    pub async fn rename(&self, user_id: Uuid, node_id: Uuid, new_name: &str) -> AppResult<Node> {
        validate_name(new_name)?;
        let node = self.require_usable(node_id).await?;
        self.resolver
            .require(user_id, &node, AccessLevel::Editor)
            .await?;
        self.node_repo.rename(node_id, new_name).await
    }

    /// Toggle public visibility; owner only.
    pub async fn set_public(
        &self,
        user_id: Uuid,
        node_id: Uuid,
        is_public: bool,
    ) -> AppResult<Node> {
        let node = self.require_usable(node_id).await?;
        if node.owner_id != user_id {
            return Err(AppError::forbidden(
                "Only the owner can change visibility",
            ));
        }
        self.node_repo.set_public(node_id, is_public).await
    }

    /// Trash a node and its whole subtree, releasing owned usage bytes.
    pub async fn trash(&self, user_id: Uuid, node_id: Uuid) -> AppResult<u64> {
        let node = self.require_usable(node_id).await?;
        self.resolver
            .require(user_id, &node, AccessLevel::Editor)
            .await?;
        if node.depth == 1 {
            return Err(AppError::invalid_state("Cannot trash a root folder"));
        }
        let (trashed, freed) = self.node_repo.trash_subtree(node_id).await?;
        info!(node_id = %node_id, trashed, freed, "Trashed subtree");
        Ok(trashed)
    }

    /// The caller's storage usage.
    pub async fn usage(&self, user_id: Uuid) -> AppResult<UsageCounter> {
        if let Some(counter) = self.usage_repo.find_by_user(user_id).await? {
            return Ok(counter);
        }
        self.usage_repo.ensure(user_id).await
    }

    async fn require_usable(&self, node_id: Uuid) -> AppResult<Node> {
        self.node_repo
            .find_by_id(node_id)
            .await?
            .filter(|n| n.deleted_at.is_none() && n.status != NodeStatus::Trashed)
            .ok_or_else(|| AppError::not_found(format!("Node {node_id} not found")))
    }
}

fn validate_name(name: &str) -> AppResult<()> {
    if name.is_empty() || name.len() > 255 {
        return Err(AppError::validation("Name must be 1-255 characters"));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(AppError::validation("Name contains invalid characters"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn make_node(name: &str, path: &str) -> Node {
        Node {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            name: name.to_string(),
            kind: NodeKind::Folder,
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
    fn test_display_path() {
        let chain = vec![
            make_node("Home", "0001"),
            make_node("docs", "00010001"),
            make_node("report.pdf", "000100010002"),
        ];
        assert_eq!(display_path(&chain), "/Home/docs/report.pdf");
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("report.pdf").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name(&"x".repeat(256)).is_err());
    }
}
