//! Access control: effective level resolution and share management.
//!
//! Grants attach to single nodes but apply to whole subtrees: the
//! effective level on a node is reduced from the caller's grants on the
//! node itself and every ancestor. Owners hold full control without a
//! grant row; public nodes are viewable by anyone.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use treedrive_core::error::AppError;
use treedrive_core::result::AppResult;
use treedrive_database::repositories::grant::{GrantRepository, SharedWith};
use treedrive_database::repositories::node::NodeRepository;
use treedrive_database::repositories::user::UserRepository;
use treedrive_entity::grant::model::AccessLevel;
use treedrive_entity::node::model::Node;
use treedrive_entity::node::tree;

/// Reduce a caller's standing on a node to an effective level.
///
/// Owner wins outright; otherwise the strongest grant on the node or
/// any ancestor applies; a public node grants view to everyone.
pub fn effective_level(
    is_owner: bool,
    is_public: bool,
    granted: &[AccessLevel],
) -> Option<AccessLevel> {
    if is_owner {
        return Some(AccessLevel::Editor);
    }
    let strongest = granted.iter().copied().max_by_key(AccessLevel::rank);
    match strongest {
        Some(level) => Some(level),
        None if is_public => Some(AccessLevel::Viewer),
        None => None,
    }
}

/// Drop shared nodes that sit inside another shared node's subtree.
///
/// Used by the shared-with-me listing so a grant on a folder does not
/// also surface every descendant the same grant already covers.
pub fn top_level_shared(nodes: &[Node]) -> Vec<&Node> {
    nodes
        .iter()
        .filter(|n| {
            !nodes
                .iter()
                .any(|m| tree::is_ancestor(&m.path, &n.path))
        })
        .collect()
}

/// Resolves a caller's effective access level on nodes.
#[derive(Debug, Clone)]
pub struct AccessResolver {
    grant_repo: Arc<GrantRepository>,
}

impl AccessResolver {
    /// Create a new resolver.
    pub fn new(grant_repo: Arc<GrantRepository>) -> Self {
        Self { grant_repo }
    }

    /// The caller's effective level on a node, if any.
    pub async fn level_for(&self, user_id: Uuid, node: &Node) -> AppResult<Option<AccessLevel>> {
        if node.owner_id == user_id {
            return Ok(Some(AccessLevel::Editor));
        }
        let mut paths = tree::ancestor_paths(&node.path);
        paths.push(node.path.clone());
        let grants = self.grant_repo.find_for_paths(user_id, &paths).await?;
        let levels: Vec<AccessLevel> = grants.iter().map(|g| g.level).collect();
        Ok(effective_level(false, node.is_public, &levels))
    }

    /// Fail with `Forbidden` unless the caller holds `required` on the node.
    pub async fn require(
        &self,
        user_id: Uuid,
        node: &Node,
        required: AccessLevel,
    ) -> AppResult<()> {
        match self.level_for(user_id, node).await? {
            Some(level) if level.satisfies(required) => Ok(()),
            _ => Err(AppError::forbidden(format!(
                "User {user_id} lacks {required:?} access on node {}",
                node.id
            ))),
        }
    }
}

/// Share management: granting, revoking, and listing access.
#[derive(Debug, Clone)]
pub struct AccessService {
    node_repo: Arc<NodeRepository>,
    grant_repo: Arc<GrantRepository>,
    user_repo: Arc<UserRepository>,
    resolver: Arc<AccessResolver>,
}

impl AccessService {
    /// Create a new access service.
    pub fn new(
        node_repo: Arc<NodeRepository>,
        grant_repo: Arc<GrantRepository>,
        user_repo: Arc<UserRepository>,
        resolver: Arc<AccessResolver>,
    ) -> Self {
        Self {
            node_repo,
            grant_repo,
            user_repo,
            resolver,
        }
    }

    /// Grant `level` on a node to each recipient (username or email).
    ///
    /// The whole call fails before any grant is written when a recipient
    /// does not resolve to an account or the list contains duplicates.
    pub async fn grant(
        &self,
        user_id: Uuid,
        node_id: Uuid,
        recipients: &[String],
        level: AccessLevel,
    ) -> AppResult<()> {
        let node = self.require_node(node_id).await?;
        if node.owner_id != user_id {
            return Err(AppError::forbidden("Only the owner can share a node"));
        }

        let mut seen = std::collections::HashSet::new();
        for recipient in recipients {
            if !seen.insert(recipient.as_str()) {
                return Err(AppError::validation(format!(
                    "Duplicate recipient '{recipient}'"
                )));
            }
        }

        let mut resolved = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let user = self
                .user_repo
                .find_by_identifier(recipient)
                .await?
                .ok_or_else(|| {
                    AppError::unknown_recipient(format!("No account for '{recipient}'"))
                })?;
            if user.id == node.owner_id {
                return Err(AppError::validation(
                    "Cannot grant access to the node owner",
                ));
            }
            resolved.push(user);
        }

        for user in &resolved {
            self.grant_repo
                .upsert(node.id, user.id, level, user_id)
                .await?;
        }
        info!(
            node_id = %node.id,
            count = resolved.len(),
            ?level,
            "Granted access"
        );
        Ok(())
    }

    /// Revoke a user's grant on a node.
    pub async fn revoke(&self, user_id: Uuid, node_id: Uuid, grantee: Uuid) -> AppResult<bool> {
        let node = self.require_node(node_id).await?;
        if node.owner_id != user_id {
            return Err(AppError::forbidden("Only the owner can revoke access"));
        }
        self.grant_repo.revoke(node_id, grantee).await
    }

    /// List who a node is shared with.
    pub async fn shared_with(&self, user_id: Uuid, node_id: Uuid) -> AppResult<Vec<SharedWith>> {
        let node = self.require_node(node_id).await?;
        self.resolver
            .require(user_id, &node, AccessLevel::Viewer)
            .await?;
        self.grant_repo.find_shared_with(node_id).await
    }

    /// Nodes shared with the caller, collapsed to subtree roots.
    pub async fn shared_with_me(&self, user_id: Uuid) -> AppResult<Vec<Node>> {
        let granted = self.node_repo.find_granted(user_id).await?;
        Ok(top_level_shared(&granted).into_iter().cloned().collect())
    }

    async fn require_node(&self, node_id: Uuid) -> AppResult<Node> {
        self.node_repo
            .find_by_id(node_id)
            .await?
            .filter(|n| n.deleted_at.is_none())
            .ok_or_else(|| AppError::not_found(format!("Node {node_id} not found")))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use treedrive_entity::node::model::{NodeKind, NodeStatus};

    use super::*;

    fn make_node(path: &str) -> Node {
        Node {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            name: path.to_string(),
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
    fn test_owner_is_always_editor() {
        assert_eq!(
            effective_level(true, false, &[]),
            Some(AccessLevel::Editor)
        );
    }

    #[test]
    fn test_public_grants_view_only() {
        assert_eq!(
            effective_level(false, true, &[]),
            Some(AccessLevel::Viewer)
        );
    }

    #[test]
    fn test_strongest_grant_wins() {
        assert_eq!(
            effective_level(false, false, &[AccessLevel::Viewer, AccessLevel::Editor]),
            Some(AccessLevel::Editor)
        );
        assert_eq!(
            effective_level(false, false, &[AccessLevel::Viewer]),
            Some(AccessLevel::Viewer)
        );
    }

    #[test]
    fn test_no_grant_no_access() {
        assert_eq!(effective_level(false, false, &[]), None);
    }

    #[test]
    fn test_grant_beats_public_downgrade() {
        // An editor grant on a public node stays editor.
        assert_eq!(
            effective_level(false, true, &[AccessLevel::Editor]),
            Some(AccessLevel::Editor)
        );
    }

    #[test]
    fn test_top_level_shared_drops_covered_descendants() {
        let nodes = vec![
            make_node("0001"),
            make_node("00010002"),
            make_node("000100020003"),
            make_node("0005"),
        ];
        let top: Vec<&str> = top_level_shared(&nodes)
            .into_iter()
            .map(|n| n.path.as_str())
            .collect();
        assert_eq!(top, vec!["0001", "0005"]);
    }
}
