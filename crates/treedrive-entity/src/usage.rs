//! Per-user storage usage counter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Running total of finalized content bytes owned by one user.
///
/// Created lazily alongside the user's root folder and adjusted inside
/// the same transaction as every finalize and trash.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UsageCounter {
    /// The user the counter belongs to.
    pub user_id: Uuid,
    /// Total bytes across active current versions.
    pub used_bytes: i64,
    /// When the counter was last adjusted.
    pub updated_at: DateTime<Utc>,
}
