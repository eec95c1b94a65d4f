//! Access grant entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Capability level conferred by a grant.
///
/// Levels are ordered: editor implies everything viewer can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "access_level", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    /// Read-only: list, download, bundle.
    Viewer,
    /// Read-write: everything viewer can, plus create, upload, rename, trash.
    Editor,
}

impl AccessLevel {
    /// Numeric rank used to compare levels (higher = more capable).
    pub fn rank(&self) -> u8 {
        match self {
            Self::Viewer => 1,
            Self::Editor => 2,
        }
    }

    /// Whether this level satisfies a required level.
    pub fn satisfies(&self, required: AccessLevel) -> bool {
        self.rank() >= required.rank()
    }
}

/// A direct access grant on one node for one user.
///
/// Grants are inherited down the tree: a grant on a folder applies to
/// every descendant unless a deeper grant raises the level further.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AccessGrant {
    /// Unique grant identifier.
    pub id: Uuid,
    /// The node the grant is attached to.
    pub node_id: Uuid,
    /// The user receiving access.
    pub user_id: Uuid,
    /// Capability level conferred.
    pub level: AccessLevel,
    /// User who created the grant.
    pub granted_by: Uuid,
    /// When the grant was created.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(AccessLevel::Editor.satisfies(AccessLevel::Viewer));
        assert!(AccessLevel::Editor.satisfies(AccessLevel::Editor));
        assert!(AccessLevel::Viewer.satisfies(AccessLevel::Viewer));
        assert!(!AccessLevel::Viewer.satisfies(AccessLevel::Editor));
    }
}
