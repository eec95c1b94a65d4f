//! Object store trait for the external blob service the engine relies on.
//!
//! Clients never stream file bytes through the engine. Uploads go directly
//! from the client to the object store using a time-boxed write credential,
//! and the engine later reconciles declared metadata against what actually
//! landed ([`ObjectStore::get_metadata`]). Bulk archive output is staged in
//! blocks and committed as one object.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use crate::result::AppResult;

/// Metadata the store reports about a committed object.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ObjectMetadata {
    /// Size in bytes.
    pub size_bytes: i64,
    /// Content type the object was stored with.
    pub content_type: Option<String>,
    /// Content hash (hex MD5), if the store can report one.
    ///
    /// Stores cannot always report this (e.g. multipart uploads), so
    /// validation treats it as best-effort.
    pub content_md5: Option<String>,
    /// Last modified timestamp.
    pub last_modified: Option<chrono::DateTime<chrono::Utc>>,
}

/// A byte stream type used for reading object contents in bounded chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Trait for object-store backends.
///
/// The trait is defined here in `treedrive-core` and implemented in
/// `treedrive-storage` (S3-compatible and in-memory providers). All
/// operations are scoped to a single opaque storage key; the engine never
/// holds long-lived connections to the store.
#[async_trait]
pub trait ObjectStore: Send + Sync + std::fmt::Debug + 'static {
    /// Return the provider name recorded on version rows (e.g. `"s3"`).
    fn provider_name(&self) -> &str;

    /// Issue a time-boxed, write-only credential URL scoped to one key.
    async fn issue_write_credential(&self, key: &str, ttl: Duration) -> AppResult<String>;

    /// Issue a time-boxed, read-only credential URL scoped to one key.
    async fn issue_read_credential(&self, key: &str, ttl: Duration) -> AppResult<String>;

    /// Fetch metadata for a committed object, or `None` if absent.
    async fn get_metadata(&self, key: &str) -> AppResult<Option<ObjectMetadata>>;

    /// Read an object's content as a stream of bounded chunks.
    async fn read(&self, key: &str) -> AppResult<ByteStream>;

    /// Stage one block of a multi-block object under the given block id.
    ///
    /// Staged blocks are not visible until [`ObjectStore::commit_blocks`]
    /// runs; re-staging the same key is safe (at-least-once handlers).
    async fn stage_block(&self, key: &str, block_id: &str, data: Bytes) -> AppResult<()>;

    /// Commit previously staged blocks, in order, as one visible object.
    async fn commit_blocks(&self, key: &str, block_ids: &[String]) -> AppResult<()>;

    /// Delete an object. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> AppResult<()>;
}
