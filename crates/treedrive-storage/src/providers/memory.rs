//! In-memory object store.
//!
//! Used by tests and single-process deployments. Credentials are
//! synthetic URLs; nothing enforces them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use dashmap::DashMap;

use treedrive_core::error::AppError;
use treedrive_core::result::AppResult;
use treedrive_core::traits::{ByteStream, ObjectMetadata, ObjectStore};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: Option<String>,
    content_md5: Option<String>,
    last_modified: chrono::DateTime<Utc>,
}

/// Object store backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: DashMap<String, StoredObject>,
    staged: DashMap<String, HashMap<String, Bytes>>,
    fail_next_reads: AtomicUsize,
    fail_next_stages: AtomicUsize,
}

impl MemoryObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Put an object directly, as an out-of-band client upload would.
    pub fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
        content_md5: Option<&str>,
    ) {
        self.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.map(str::to_string),
                content_md5: content_md5.map(str::to_string),
                last_modified: Utc::now(),
            },
        );
    }

    /// Make the next `count` reads fail with a transient storage error.
    pub fn fail_next_reads(&self, count: usize) {
        self.fail_next_reads.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` block stagings fail with a transient error.
    pub fn fail_next_stages(&self, count: usize) {
        self.fail_next_stages.store(count, Ordering::SeqCst);
    }

    /// Number of stored objects.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Number of blocks currently staged for a key.
    pub fn staged_block_count(&self, key: &str) -> usize {
        self.staged.get(key).map(|blocks| blocks.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn provider_name(&self) -> &str {
        "memory"
    }

    async fn issue_write_credential(&self, key: &str, ttl: Duration) -> AppResult<String> {
        Ok(format!("memory://{key}?mode=write&ttl={}", ttl.as_secs()))
    }

    async fn issue_read_credential(&self, key: &str, ttl: Duration) -> AppResult<String> {
        Ok(format!("memory://{key}?mode=read&ttl={}", ttl.as_secs()))
    }

    async fn get_metadata(&self, key: &str) -> AppResult<Option<ObjectMetadata>> {
        Ok(self.objects.get(key).map(|obj| ObjectMetadata {
            size_bytes: obj.data.len() as i64,
            content_type: obj.content_type.clone(),
            content_md5: obj.content_md5.clone(),
            last_modified: Some(obj.last_modified),
        }))
    }

    async fn read(&self, key: &str) -> AppResult<ByteStream> {
        if self
            .fail_next_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AppError::storage(format!("Injected read failure for {key}")));
        }
        let data = self
            .objects
            .get(key)
            .map(|obj| obj.data.clone())
            .ok_or_else(|| AppError::not_found(format!("Object {key} not found")))?;
        Ok(Box::pin(futures::stream::once(async move { Ok(data) })))
    }

    async fn stage_block(&self, key: &str, block_id: &str, data: Bytes) -> AppResult<()> {
        if self
            .fail_next_stages
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AppError::storage(format!("Injected stage failure for {key}")));
        }
        self.staged
            .entry(key.to_string())
            .or_default()
            .insert(block_id.to_string(), data);
        Ok(())
    }

    async fn commit_blocks(&self, key: &str, block_ids: &[String]) -> AppResult<()> {
        let (_, blocks) = self
            .staged
            .remove(key)
            .ok_or_else(|| AppError::storage(format!("No staged blocks for {key}")))?;

        let mut data = BytesMut::new();
        for id in block_ids {
            let block = blocks
                .get(id)
                .ok_or_else(|| AppError::storage(format!("Missing staged block {id}")))?;
            data.extend_from_slice(block);
        }

        self.objects.insert(
            key.to_string(),
            StoredObject {
                data: data.freeze(),
                content_type: Some("application/zip".to_string()),
                content_md5: None,
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    // Also discards staged blocks, so an abandoned staging pass never
    // bleeds into a later one for the same key.
    async fn delete(&self, key: &str) -> AppResult<()> {
        self.objects.remove(key);
        self.staged.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_put_read_roundtrip() {
        let store = MemoryObjectStore::new();
        store.put_object("a/b", Bytes::from_static(b"hello"), Some("text/plain"), None);

        let meta = store.get_metadata("a/b").await.unwrap().unwrap();
        assert_eq!(meta.size_bytes, 5);

        let mut stream = store.read("a/b").await.unwrap();
        let chunk = stream.next().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b"hello");
    }

    #[tokio::test]
    async fn test_block_commit_order() {
        let store = MemoryObjectStore::new();
        store
            .stage_block("k", "b2", Bytes::from_static(b"world"))
            .await
            .unwrap();
        store
            .stage_block("k", "b1", Bytes::from_static(b"hello "))
            .await
            .unwrap();
        store
            .commit_blocks("k", &["b1".to_string(), "b2".to_string()])
            .await
            .unwrap();

        let meta = store.get_metadata("k").await.unwrap().unwrap();
        assert_eq!(meta.size_bytes, 11);
    }

    #[tokio::test]
    async fn test_injected_read_failure() {
        let store = MemoryObjectStore::new();
        store.put_object("k", Bytes::from_static(b"x"), None, None);
        store.fail_next_reads(1);

        assert!(store.read("k").await.is_err());
        assert!(store.read("k").await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_discards_staged_blocks() {
        let store = MemoryObjectStore::new();
        store
            .stage_block("k", "b1", Bytes::from_static(b"stale"))
            .await
            .unwrap();
        store.delete("k").await.unwrap();
        assert_eq!(store.staged_block_count("k"), 0);

        // A fresh pass commits only its own blocks.
        store
            .stage_block("k", "b2", Bytes::from_static(b"fresh"))
            .await
            .unwrap();
        store.commit_blocks("k", &["b2".to_string()]).await.unwrap();
        let meta = store.get_metadata("k").await.unwrap().unwrap();
        assert_eq!(meta.size_bytes, 5);
    }
}
