//! Job executor — dispatches jobs to registered handlers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use treedrive_core::error::AppError;
use treedrive_entity::job::model::Job;

/// Trait for job handler implementations.
#[async_trait]
pub trait JobHandler: Send + Sync + std::fmt::Debug {
    /// Get the job type this handler processes.
    fn job_type(&self) -> &str;

    /// Execute the job with the given payload.
    async fn execute(&self, job: &Job) -> Result<(), JobExecutionError>;
}

/// Error from job execution.
#[derive(Debug, thiserror::Error)]
pub enum JobExecutionError {
    /// Permanent failure — do not retry.
    #[error("Permanent job failure: {0}")]
    Permanent(String),

    /// Transient failure — may retry with backoff.
    #[error("Transient job failure: {0}")]
    Transient(String),

    /// Internal error — treated as permanent.
    #[error("Internal error: {0}")]
    Internal(#[from] AppError),
}

/// Dispatches jobs to the appropriate handler based on `job_type`.
#[derive(Debug, Default)]
pub struct JobExecutor {
    /// Registered job handlers by type.
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobExecutor {
    /// Create a new job executor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job handler.
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        let job_type = handler.job_type().to_string();
        tracing::info!("Registered job handler for type '{job_type}'");
        self.handlers.insert(job_type, handler);
    }

    /// Execute a job by dispatching to the correct handler.
    pub async fn execute(&self, job: &Job) -> Result<(), JobExecutionError> {
        let handler = self.handlers.get(&job.job_type).ok_or_else(|| {
            JobExecutionError::Permanent(format!(
                "No handler registered for job type '{}'",
                job.job_type
            ))
        })?;

        tracing::info!(
            job_id = %job.id,
            job_type = %job.job_type,
            attempt = job.attempts,
            max_attempts = job.max_attempts,
            "Executing job"
        );

        handler.execute(job).await
    }

    /// Check if a handler is registered for a job type.
    pub fn has_handler(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use treedrive_entity::job::status::JobStatus;
    use uuid::Uuid;

    use super::*;

    #[derive(Debug)]
    struct StubHandler {
        job_type: &'static str,
        fail_transient: bool,
    }

    #[async_trait]
    impl JobHandler for StubHandler {
        fn job_type(&self) -> &str {
            self.job_type
        }

        async fn execute(&self, _job: &Job) -> Result<(), JobExecutionError> {
            if self.fail_transient {
                Err(JobExecutionError::Transient("flaky".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn make_job(job_type: &str) -> Job {
        Job {
            id: Uuid::new_v4(),
            job_type: job_type.to_string(),
            payload: serde_json::json!({}),
            error_message: None,
            status: JobStatus::Running,
            attempts: 1,
            max_attempts: 3,
            scheduled_at: None,
            started_at: Some(Utc::now()),
            completed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_dispatch_to_registered_handler() {
        let mut executor = JobExecutor::new();
        executor.register(Arc::new(StubHandler {
            job_type: "noop",
            fail_transient: false,
        }));

        assert!(executor.has_handler("noop"));
        assert!(executor.execute(&make_job("noop")).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_job_type_is_permanent() {
        let executor = JobExecutor::new();
        let err = executor.execute(&make_job("mystery")).await.unwrap_err();
        assert!(matches!(err, JobExecutionError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_transient_error_propagates() {
        let mut executor = JobExecutor::new();
        executor.register(Arc::new(StubHandler {
            job_type: "flaky",
            fail_transient: true,
        }));

        let err = executor.execute(&make_job("flaky")).await.unwrap_err();
        assert!(matches!(err, JobExecutionError::Transient(_)));
    }
}
