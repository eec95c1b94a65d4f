//! Polling worker loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time;

use treedrive_core::config::WorkerConfig;
use treedrive_entity::job::model::Job;

use crate::executor::{JobExecutionError, JobExecutor};
use crate::queue::JobQueue;

/// Polls the queue and fans claimed jobs out to the executor, bounded
/// by a concurrency semaphore.
#[derive(Debug)]
pub struct WorkerRunner {
    queue: Arc<JobQueue>,
    executor: Arc<JobExecutor>,
    config: WorkerConfig,
}

impl WorkerRunner {
    pub fn new(queue: Arc<JobQueue>, executor: Arc<JobExecutor>, config: WorkerConfig) -> Self {
        Self {
            queue,
            executor,
            config,
        }
    }

    /// Run until the cancel signal flips, then drain in-flight jobs.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) {
        tracing::info!(
            concurrency = self.config.concurrency,
            poll_interval = self.config.poll_interval_seconds,
            "Worker started"
        );

        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.config.concurrency));
        let poll_interval = Duration::from_secs(self.config.poll_interval_seconds);

        loop {
            tokio::select! {
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        tracing::info!("Worker received shutdown signal");
                        break;
                    }
                }
                _ = self.poll_once(&semaphore) => {
                    tokio::select! {
                        _ = cancel.changed() => {
                            if *cancel.borrow() {
                                tracing::info!("Worker shutting down");
                                break;
                            }
                        }
                        _ = time::sleep(poll_interval) => {}
                    }
                }
            }
        }

        // Re-acquiring every permit proves no job task still runs.
        tracing::info!("Worker draining in-flight jobs...");
        let all = self.config.concurrency as u32;
        let _ = time::timeout(Duration::from_secs(30), semaphore.acquire_many(all)).await;
        tracing::info!("Worker stopped");
    }

    /// Claim at most one job and hand it to a spawned task.
    async fn poll_once(&self, semaphore: &Arc<tokio::sync::Semaphore>) {
        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                tracing::trace!("All worker slots occupied");
                return;
            }
        };

        match self.queue.dequeue().await {
            Ok(Some(job)) => {
                let queue = Arc::clone(&self.queue);
                let executor = Arc::clone(&self.executor);
                let backoff = chrono::Duration::seconds(self.config.retry_backoff_seconds);

                tokio::spawn(async move {
                    let _permit = permit;
                    tracing::debug!(job_id = %job.id, job_type = %job.job_type, "Executing job");
                    let outcome = executor.execute(&job).await;
                    settle(&queue, &job, outcome, backoff).await;
                });
            }
            Ok(None) => {
                drop(permit);
                tracing::trace!("No jobs available");
            }
            Err(e) => {
                drop(permit);
                tracing::error!(error = %e, "Failed to dequeue job");
            }
        }
    }
}

/// Record a finished execution back on the queue. Transient failures
/// reschedule with a fixed backoff while the retry budget lasts;
/// everything else is terminal.
async fn settle(
    queue: &JobQueue,
    job: &Job,
    outcome: Result<(), JobExecutionError>,
    backoff: chrono::Duration,
) {
    let result = match outcome {
        Ok(()) => queue.complete(job.id).await,
        Err(JobExecutionError::Transient(msg)) => {
            tracing::warn!(job_id = %job.id, error = %msg, "Job failed (transient)");
            if job.can_retry() {
                queue.reschedule(job.id, &msg, Utc::now() + backoff).await
            } else {
                queue.fail(job.id, &msg).await
            }
        }
        Err(JobExecutionError::Permanent(msg)) => {
            tracing::error!(job_id = %job.id, error = %msg, "Job failed permanently");
            queue.fail(job.id, &msg).await
        }
        Err(JobExecutionError::Internal(err)) => {
            let msg = err.to_string();
            tracing::error!(job_id = %job.id, error = %msg, "Job internal error");
            queue.fail(job.id, &msg).await
        }
    };

    if let Err(e) = result {
        tracing::error!(job_id = %job.id, error = %e, "Failed to record job outcome");
    }
}
