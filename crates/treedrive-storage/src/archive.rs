//! Zip archive builder for folder bundles.
//!
//! The zip format patches entry headers after the fact, so the archive
//! is written to a seekable scratch file in the spool directory rather
//! than held in memory. Source objects are streamed straight from the
//! object store into the encoder, and the finished file is staged back
//! to the store in fixed-size blocks. Peak memory stays at one block
//! regardless of archive size.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio_util::io::{StreamReader, SyncIoBridge};
use uuid::Uuid;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use treedrive_core::error::{AppError, ErrorKind};
use treedrive_core::result::AppResult;
use treedrive_core::traits::ObjectStore;
use treedrive_entity::bundle::model::BundleEntry;

/// Streams object-store files into a zip archive and uploads the result.
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    store: Arc<dyn ObjectStore>,
    spool_dir: PathBuf,
    block_size: usize,
}

impl ArchiveBuilder {
    /// Create a builder writing scratch files under `spool_dir`.
    pub fn new(store: Arc<dyn ObjectStore>, spool_dir: impl Into<PathBuf>, block_size: usize) -> Self {
        Self {
            store,
            spool_dir: spool_dir.into(),
            block_size,
        }
    }

    /// Build an archive of `entries` and upload it to `dest_key`.
    ///
    /// Returns the archive size in bytes. The scratch file is removed on
    /// both success and failure.
    pub async fn build(&self, dest_key: &str, entries: &[BundleEntry]) -> AppResult<i64> {
        tokio::fs::create_dir_all(&self.spool_dir).await?;
        let scratch = self.spool_dir.join(format!("{}.zip", Uuid::new_v4().simple()));

        let result = self.build_inner(&scratch, dest_key, entries).await;
        if tokio::fs::remove_file(&scratch).await.is_err() && result.is_ok() {
            tracing::warn!(scratch = %scratch.display(), "Failed to remove scratch file");
        }
        if result.is_err() {
            // Discard any blocks staged before the failure. A retry of
            // the same destination must not commit a mix of passes.
            if let Err(err) = self.store.delete(dest_key).await {
                tracing::warn!(dest_key = %dest_key, error = %err, "Failed to discard staged blocks");
            }
        }
        result
    }

    async fn build_inner(
        &self,
        scratch: &Path,
        dest_key: &str,
        entries: &[BundleEntry],
    ) -> AppResult<i64> {
        let file = tokio::fs::File::create(scratch).await?.into_std().await;
        let mut writer = ZipWriter::new(file);

        for entry in entries {
            let stream = self.store.read(&entry.storage_key).await?;
            let mut reader = SyncIoBridge::new(StreamReader::new(stream));
            let archive_path = entry.archive_path.clone();

            // The zip encoder and the bridged reader both block, so one
            // entry is copied per blocking task; the writer moves with it.
            writer = tokio::task::spawn_blocking(move || -> AppResult<ZipWriter<std::fs::File>> {
                writer
                    .start_file(archive_path.as_str(), SimpleFileOptions::default())
                    .map_err(|e| {
                        AppError::with_source(ErrorKind::Storage, "Failed to start zip entry", e)
                    })?;
                std::io::copy(&mut reader, &mut writer)?;
                Ok(writer)
            })
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Internal, "Archive task panicked", e)
            })??;
        }

        let file = tokio::task::spawn_blocking(move || {
            writer.finish().map_err(|e| {
                AppError::with_source(ErrorKind::Storage, "Failed to finish archive", e)
            })
        })
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Internal, "Archive task panicked", e))??;
        drop(file);

        let size = tokio::fs::metadata(scratch).await?.len() as i64;
        self.upload_blocks(scratch, dest_key).await?;
        Ok(size)
    }

    /// Stage the scratch file to the store in fixed-size blocks.
    async fn upload_blocks(&self, scratch: &Path, dest_key: &str) -> AppResult<()> {
        let mut file = tokio::fs::File::open(scratch).await?;
        let mut block_ids = Vec::new();
        let mut block = vec![0u8; self.block_size];
        let mut filled = 0usize;
        let mut eof = false;

        while !eof {
            while filled < self.block_size {
                let n = file.read(&mut block[filled..]).await?;
                if n == 0 {
                    eof = true;
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                break;
            }
            let block_id = Uuid::new_v4().simple().to_string();
            self.store
                .stage_block(dest_key, &block_id, bytes::Bytes::copy_from_slice(&block[..filled]))
                .await?;
            block_ids.push(block_id);
            filled = 0;
        }

        if block_ids.is_empty() {
            // Zero-length archive (no entries): stage one empty block so
            // the commit still materializes the object.
            let block_id = Uuid::new_v4().simple().to_string();
            self.store
                .stage_block(dest_key, &block_id, bytes::Bytes::new())
                .await?;
            block_ids.push(block_id);
        }

        self.store.commit_blocks(dest_key, &block_ids).await
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use bytes::Bytes;
    use futures::StreamExt;

    use crate::providers::memory::MemoryObjectStore;

    use super::*;

    async fn collect(store: &MemoryObjectStore, key: &str) -> Vec<u8> {
        let mut stream = store.read(key).await.unwrap();
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    fn entry(key: &str, path: &str) -> BundleEntry {
        BundleEntry {
            storage_key: key.to_string(),
            archive_path: path.to_string(),
        }
    }

    #[tokio::test]
    async fn test_build_archives_entries() {
        let store = Arc::new(MemoryObjectStore::new());
        store.put_object("src/a", Bytes::from_static(b"alpha contents"), None, None);
        store.put_object("src/b", Bytes::from_static(b"beta"), None, None);

        let spool = tempfile::tempdir().unwrap();
        // Tiny blocks to force a multi-block upload.
        let builder = ArchiveBuilder::new(store.clone(), spool.path(), 16);

        let size = builder
            .build(
                "bundles/out.zip",
                &[entry("src/a", "docs/a.txt"), entry("src/b", "b.txt")],
            )
            .await
            .unwrap();

        let data = collect(&store, "bundles/out.zip").await;
        assert_eq!(data.len() as i64, size);

        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(data)).unwrap();
        assert_eq!(archive.len(), 2);
        let mut contents = String::new();
        archive
            .by_name("docs/a.txt")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "alpha contents");
    }

    #[tokio::test]
    async fn test_build_empty_archive() {
        let store = Arc::new(MemoryObjectStore::new());
        let spool = tempfile::tempdir().unwrap();
        let builder = ArchiveBuilder::new(store.clone(), spool.path(), 1024);

        let size = builder.build("bundles/empty.zip", &[]).await.unwrap();
        assert!(size > 0);

        let data = collect(&store, "bundles/empty.zip").await;
        let archive = zip::ZipArchive::new(std::io::Cursor::new(data)).unwrap();
        assert_eq!(archive.len(), 0);
    }

    #[tokio::test]
    async fn test_build_fails_when_source_read_fails() {
        let store = Arc::new(MemoryObjectStore::new());
        store.put_object("src/a", Bytes::from_static(b"alpha"), None, None);
        store.fail_next_reads(1);

        let spool = tempfile::tempdir().unwrap();
        let builder = ArchiveBuilder::new(store.clone(), spool.path(), 1024);

        let err = builder
            .build("bundles/out.zip", &[entry("src/a", "a.txt")])
            .await
            .unwrap_err();
        assert!(err.kind.is_transient());
        assert!(store.get_metadata("bundles/out.zip").await.unwrap().is_none());

        // Scratch file was cleaned up even on failure.
        assert_eq!(std::fs::read_dir(spool.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_retry_after_staging_failure_builds_clean_archive() {
        let store = Arc::new(MemoryObjectStore::new());
        store.put_object("src/a", Bytes::from_static(b"alpha contents"), None, None);

        let spool = tempfile::tempdir().unwrap();
        let builder = ArchiveBuilder::new(store.clone(), spool.path(), 1024);
        let entries = [entry("src/a", "a.txt")];

        // A block left behind by an interrupted earlier pass.
        store
            .stage_block("bundles/out.zip", "stale", Bytes::from_static(b"junk"))
            .await
            .unwrap();

        store.fail_next_stages(1);
        let err = builder.build("bundles/out.zip", &entries).await.unwrap_err();
        assert!(err.kind.is_transient());

        // The failed pass discarded every staged block, its own and the
        // leftover, so the retry commits only what it stages itself.
        assert_eq!(store.staged_block_count("bundles/out.zip"), 0);

        let size = builder.build("bundles/out.zip", &entries).await.unwrap();
        let data = collect(&store, "bundles/out.zip").await;
        assert_eq!(data.len() as i64, size);

        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(data)).unwrap();
        let mut contents = String::new();
        archive
            .by_name("a.txt")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "alpha contents");
    }
}
