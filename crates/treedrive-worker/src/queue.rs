//! Job queue facade over the durable job table.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use treedrive_core::error::AppError;
use treedrive_database::repositories::job::JobRepository;
use treedrive_entity::job::model::{CreateJob, Job};

/// Queue for enqueuing and claiming background work.
#[derive(Debug, Clone)]
pub struct JobQueue {
    repo: Arc<JobRepository>,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(repo: Arc<JobRepository>) -> Self {
        Self { repo }
    }

    /// Enqueue a new job.
    pub async fn enqueue(&self, params: CreateJob) -> Result<Job, AppError> {
        let job = self.repo.create(&params).await?;
        tracing::debug!(job_id = %job.id, job_type = %job.job_type, "Enqueued job");
        Ok(job)
    }

    /// Claim the next runnable job, if any.
    pub async fn dequeue(&self) -> Result<Option<Job>, AppError> {
        let job = self.repo.dequeue().await?;
        if let Some(job) = &job {
            tracing::debug!(job_id = %job.id, job_type = %job.job_type, "Dequeued job");
        }
        Ok(job)
    }

    /// Mark a job as completed successfully.
    pub async fn complete(&self, job_id: Uuid) -> Result<(), AppError> {
        self.repo.complete(job_id).await?;
        tracing::debug!(job_id = %job_id, "Job completed");
        Ok(())
    }

    /// Put a job back in the queue for a later attempt.
    pub async fn reschedule(
        &self,
        job_id: Uuid,
        error: &str,
        run_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.repo.reschedule(job_id, error, run_at).await?;
        tracing::debug!(job_id = %job_id, run_at = %run_at, "Job rescheduled");
        Ok(())
    }

    /// Mark a job as permanently failed.
    pub async fn fail(&self, job_id: Uuid, error: &str) -> Result<(), AppError> {
        self.repo.fail(job_id, error).await?;
        tracing::debug!(job_id = %job_id, error, "Job failed");
        Ok(())
    }

    /// Cancel a job that has not started yet.
    pub async fn cancel(&self, job_id: Uuid) -> Result<(), AppError> {
        self.repo.cancel(job_id).await?;
        tracing::debug!(job_id = %job_id, "Job cancelled");
        Ok(())
    }
}
