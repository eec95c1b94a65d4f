//! User lookup model.
//!
//! Accounts are provisioned elsewhere; this crate only reads them to
//! resolve grant recipients and own the tree roots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A registered user.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    /// Unique user identifier.
    pub id: Uuid,
    /// Login name, unique.
    pub username: String,
    /// Email address, unique.
    pub email: String,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
}
