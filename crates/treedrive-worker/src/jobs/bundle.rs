//! Folder bundle job handler.
//!
//! Builds the zip archive for a bundle request. The handler is
//! idempotent: re-running it re-stages blocks for the same destination
//! key, and the final commit replaces the object. Transient store
//! failures are retried by the runner while attempts remain; the bundle
//! row only goes FAILED once they are exhausted.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use treedrive_core::result::AppResult;
use treedrive_database::repositories::bundle::BundleRepository;
use treedrive_entity::bundle::model::BundlePayload;
use treedrive_entity::job::model::Job;
use treedrive_storage::ArchiveBuilder;

use crate::executor::{JobExecutionError, JobHandler};

/// Terminal-state recording for bundle rows.
///
/// The handler only ever settles a bundle, so this is the whole surface
/// it needs from the repository.
#[async_trait]
pub trait BundleLedger: Send + Sync + fmt::Debug {
    /// Mark the bundle COMPLETED with its final archive size.
    async fn complete(&self, id: Uuid, size_bytes: i64) -> AppResult<()>;

    /// Mark the bundle FAILED.
    async fn fail(&self, id: Uuid) -> AppResult<()>;
}

#[async_trait]
impl BundleLedger for BundleRepository {
    async fn complete(&self, id: Uuid, size_bytes: i64) -> AppResult<()> {
        BundleRepository::complete(self, id, size_bytes).await?;
        Ok(())
    }

    async fn fail(&self, id: Uuid) -> AppResult<()> {
        BundleRepository::fail(self, id).await
    }
}

/// Handles `folder_bundle` jobs.
#[derive(Debug)]
pub struct BundleHandler {
    ledger: Arc<dyn BundleLedger>,
    builder: ArchiveBuilder,
}

impl BundleHandler {
    /// Create a new bundle handler.
    pub fn new(ledger: Arc<dyn BundleLedger>, builder: ArchiveBuilder) -> Self {
        Self { ledger, builder }
    }
}

#[async_trait]
impl JobHandler for BundleHandler {
    fn job_type(&self) -> &str {
        "folder_bundle"
    }

    async fn execute(&self, job: &Job) -> Result<(), JobExecutionError> {
        let payload: BundlePayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobExecutionError::Permanent(format!("Malformed bundle payload: {e}")))?;

        tracing::info!(
            bundle_id = %payload.bundle_id,
            dest_key = %payload.dest_key,
            entries = payload.entries.len(),
            "Building bundle"
        );

        match self.builder.build(&payload.dest_key, &payload.entries).await {
            Ok(size_bytes) => {
                self.ledger.complete(payload.bundle_id, size_bytes).await?;
                tracing::info!(bundle_id = %payload.bundle_id, size_bytes, "Bundle completed");
                Ok(())
            }
            Err(err) if err.kind.is_transient() && job.can_retry() => {
                Err(JobExecutionError::Transient(err.to_string()))
            }
            Err(err) => {
                self.ledger.fail(payload.bundle_id).await?;
                Err(JobExecutionError::Permanent(err.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;
    use chrono::Utc;

    use treedrive_core::traits::ObjectStore;
    use treedrive_entity::bundle::model::BundleEntry;
    use treedrive_entity::job::status::JobStatus;
    use treedrive_storage::MemoryObjectStore;

    use super::*;

    #[derive(Debug, Default)]
    struct RecordingLedger {
        completed: Mutex<Vec<(Uuid, i64)>>,
        failed: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl BundleLedger for RecordingLedger {
        async fn complete(&self, id: Uuid, size_bytes: i64) -> AppResult<()> {
            self.completed.lock().unwrap().push((id, size_bytes));
            Ok(())
        }

        async fn fail(&self, id: Uuid) -> AppResult<()> {
            self.failed.lock().unwrap().push(id);
            Ok(())
        }
    }

    fn make_job(payload: &BundlePayload, attempts: i32, max_attempts: i32) -> Job {
        Job {
            id: Uuid::new_v4(),
            job_type: "folder_bundle".to_string(),
            payload: serde_json::to_value(payload).unwrap(),
            error_message: None,
            status: JobStatus::Running,
            attempts,
            max_attempts,
            scheduled_at: None,
            started_at: Some(Utc::now()),
            completed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    struct Fixture {
        store: Arc<MemoryObjectStore>,
        ledger: Arc<RecordingLedger>,
        handler: BundleHandler,
        payload: BundlePayload,
        _spool: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryObjectStore::new());
        store.put_object("src/a", Bytes::from_static(b"alpha contents"), None, None);

        let spool = tempfile::tempdir().unwrap();
        let builder = ArchiveBuilder::new(store.clone(), spool.path(), 1024);
        let ledger = Arc::new(RecordingLedger::default());
        let handler = BundleHandler::new(ledger.clone(), builder);

        let payload = BundlePayload {
            bundle_id: Uuid::new_v4(),
            dest_key: "bundles/out.zip".to_string(),
            entries: vec![BundleEntry {
                storage_key: "src/a".to_string(),
                archive_path: "a.txt".to_string(),
            }],
        };
        Fixture {
            store,
            ledger,
            handler,
            payload,
            _spool: spool,
        }
    }

    #[tokio::test]
    async fn test_success_completes_bundle() {
        let Fixture { store, ledger, handler, payload, _spool } = fixture();
        let job = make_job(&payload, 1, 3);

        handler.execute(&job).await.unwrap();

        let completed = ledger.completed.lock().unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].0, payload.bundle_id);
        let meta = store.get_metadata("bundles/out.zip").await.unwrap().unwrap();
        assert_eq!(meta.size_bytes, completed[0].1);
    }

    #[tokio::test]
    async fn test_transient_failure_leaves_bundle_pending() {
        let Fixture { store, ledger, handler, payload, _spool } = fixture();
        store.fail_next_reads(1);
        let job = make_job(&payload, 1, 3);

        let err = handler.execute(&job).await.unwrap_err();
        assert!(matches!(err, JobExecutionError::Transient(_)));

        // The bundle row is untouched until the attempt budget runs out.
        assert!(ledger.completed.lock().unwrap().is_empty());
        assert!(ledger.failed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_attempts_fail_bundle() {
        let Fixture { store, ledger, handler, payload, _spool } = fixture();
        store.fail_next_reads(1);
        let job = make_job(&payload, 3, 3);

        let err = handler.execute(&job).await.unwrap_err();
        assert!(matches!(err, JobExecutionError::Permanent(_)));
        assert_eq!(*ledger.failed.lock().unwrap(), vec![payload.bundle_id]);
    }

    #[tokio::test]
    async fn test_retry_after_transient_failure_succeeds() {
        let Fixture { store, ledger, handler, payload, _spool } = fixture();
        store.fail_next_reads(1);

        let first = handler.execute(&make_job(&payload, 1, 3)).await.unwrap_err();
        assert!(matches!(first, JobExecutionError::Transient(_)));

        handler.execute(&make_job(&payload, 2, 3)).await.unwrap();

        let completed = ledger.completed.lock().unwrap();
        assert_eq!(completed.len(), 1);
        assert!(ledger.failed.lock().unwrap().is_empty());
        assert!(store.get_metadata("bundles/out.zip").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_permanent() {
        let Fixture { ledger, handler, payload, _spool, .. } = fixture();
        let mut job = make_job(&payload, 1, 3);
        job.payload = serde_json::json!({"bundle_id": "not-a-uuid"});

        let err = handler.execute(&job).await.unwrap_err();
        assert!(matches!(err, JobExecutionError::Permanent(_)));
        assert!(ledger.failed.lock().unwrap().is_empty());
    }
}
