//! Job status enumeration.

use serde::{Deserialize, Serialize};

/// Lifecycle of a durable job row.
///
/// `pending` covers both fresh jobs and transient failures rescheduled
/// for a later `scheduled_at`; `completed`, `failed`, and `cancelled`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}
