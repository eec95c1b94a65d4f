//! Bundle expiry and queue maintenance handler.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use treedrive_core::traits::ObjectStore;
use treedrive_database::repositories::bundle::BundleRepository;
use treedrive_database::repositories::job::JobRepository;
use treedrive_entity::job::model::Job;

use crate::executor::{JobExecutionError, JobHandler};

/// How long terminal jobs are kept before being pruned.
const JOB_RETENTION_DAYS: i64 = 7;

/// Handles periodic `bundle_expiry` jobs: removes expired archive
/// objects, marks their bundles DELETED, and prunes old terminal jobs.
#[derive(Debug)]
pub struct BundleExpiryHandler {
    bundle_repo: Arc<BundleRepository>,
    job_repo: Arc<JobRepository>,
    store: Arc<dyn ObjectStore>,
}

impl BundleExpiryHandler {
    /// Create a new expiry handler.
    pub fn new(
        bundle_repo: Arc<BundleRepository>,
        job_repo: Arc<JobRepository>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            bundle_repo,
            job_repo,
            store,
        }
    }
}

#[async_trait]
impl JobHandler for BundleExpiryHandler {
    fn job_type(&self) -> &str {
        "bundle_expiry"
    }

    async fn execute(&self, _job: &Job) -> Result<(), JobExecutionError> {
        let expired = self.bundle_repo.find_expired(Utc::now()).await?;
        let mut removed = 0usize;

        for bundle in &expired {
            if let Err(err) = self.store.delete(&bundle.storage_key).await {
                // Leave the bundle COMPLETED; the next run retries it.
                tracing::warn!(
                    bundle_id = %bundle.id,
                    key = %bundle.storage_key,
                    error = %err,
                    "Failed to delete expired archive"
                );
                continue;
            }
            self.bundle_repo.mark_deleted(bundle.id).await?;
            removed += 1;
        }

        let pruned = self
            .job_repo
            .cleanup_old(Utc::now() - Duration::days(JOB_RETENTION_DAYS))
            .await?;

        if removed > 0 || pruned > 0 {
            tracing::info!(removed, pruned, "Expiry cleanup finished");
        }
        Ok(())
    }
}
