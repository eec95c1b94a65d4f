//! S3-compatible object store.
//!
//! Client uploads and downloads go through presigned URLs; the server
//! itself only touches objects when verifying uploads, streaming archive
//! sources, and staging archive blocks via multipart upload.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::io::ReaderStream;

use treedrive_core::config::S3StorageConfig;
use treedrive_core::error::{AppError, ErrorKind};
use treedrive_core::result::AppResult;
use treedrive_core::traits::{ByteStream, ObjectMetadata, ObjectStore};

/// In-flight multipart upload state for one destination key.
///
/// Blocks for a given key must be staged from a single task; the map
/// only guards against lookups racing with completion.
#[derive(Debug)]
struct MultipartState {
    upload_id: String,
    next_part: i32,
    parts: Vec<CompletedPart>,
}

/// Object store backed by an S3-compatible service.
#[derive(Debug)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    uploads: DashMap<String, MultipartState>,
}

impl S3ObjectStore {
    /// Create a store from configuration.
    pub async fn new(config: &S3StorageConfig) -> AppResult<Self> {
        tracing::info!(
            endpoint = %config.endpoint,
            region = %config.region,
            bucket = %config.bucket,
            "Initializing S3 object store"
        );

        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "treedrive-config",
        );
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            uploads: DashMap::new(),
        })
    }

    fn presign_config(ttl: Duration) -> AppResult<PresigningConfig> {
        PresigningConfig::expires_in(ttl).map_err(|e| {
            AppError::with_source(ErrorKind::Configuration, "Invalid credential TTL", e)
        })
    }

    /// Best-effort abort of a multipart upload. Parts left behind after
    /// a failed abort are reclaimed by the bucket's lifecycle rules.
    async fn abort_upload(&self, key: &str, upload_id: &str) {
        let aborted = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await;
        if let Err(err) = aborted {
            tracing::warn!(key = %key, error = %err, "Failed to abort multipart upload");
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn provider_name(&self) -> &str {
        "s3"
    }

    async fn issue_write_credential(&self, key: &str, ttl: Duration) -> AppResult<String> {
        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(Self::presign_config(ttl)?)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Storage, "Failed to presign upload", e)
            })?;
        Ok(presigned.uri().to_string())
    }

    async fn issue_read_credential(&self, key: &str, ttl: Duration) -> AppResult<String> {
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(Self::presign_config(ttl)?)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Storage, "Failed to presign download", e)
            })?;
        Ok(presigned.uri().to_string())
    }

    async fn get_metadata(&self, key: &str) -> AppResult<Option<ObjectMetadata>> {
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match head {
            Ok(output) => {
                // A plain-PUT ETag is the object's MD5; multipart ETags
                // carry a part-count suffix and are not comparable.
                let content_md5 = output
                    .e_tag()
                    .map(|t| t.trim_matches('"').to_string())
                    .filter(|t| !t.contains('-'));
                let last_modified: Option<DateTime<Utc>> = output
                    .last_modified()
                    .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()));
                Ok(Some(ObjectMetadata {
                    size_bytes: output.content_length().unwrap_or(0),
                    content_type: output.content_type().map(str::to_string),
                    content_md5,
                    last_modified,
                }))
            }
            Err(err) => {
                if err
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(None)
                } else {
                    Err(AppError::with_source(
                        ErrorKind::Storage,
                        format!("Failed to stat object {key}"),
                        err,
                    ))
                }
            }
        }
    }

    async fn read(&self, key: &str) -> AppResult<ByteStream> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Storage, format!("Failed to read {key}"), e)
            })?;
        Ok(Box::pin(ReaderStream::new(output.body.into_async_read())))
    }

    async fn stage_block(&self, key: &str, _block_id: &str, data: Bytes) -> AppResult<()> {
        let upload_id = match self.uploads.get(key) {
            Some(state) => state.upload_id.clone(),
            None => {
                let created = self
                    .client
                    .create_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .content_type("application/zip")
                    .send()
                    .await
                    .map_err(|e| {
                        AppError::with_source(
                            ErrorKind::Storage,
                            "Failed to start multipart upload",
                            e,
                        )
                    })?;
                let upload_id = created
                    .upload_id()
                    .ok_or_else(|| AppError::storage("Multipart upload missing ID"))?
                    .to_string();
                self.uploads.insert(
                    key.to_string(),
                    MultipartState {
                        upload_id: upload_id.clone(),
                        next_part: 0,
                        parts: Vec::new(),
                    },
                );
                upload_id
            }
        };

        let part_number = {
            let mut state = self
                .uploads
                .get_mut(key)
                .ok_or_else(|| AppError::storage(format!("Multipart state lost for {key}")))?;
            state.next_part += 1;
            state.next_part
        };

        let uploaded = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(&upload_id)
            .part_number(part_number)
            .body(data.into())
            .send()
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Storage, "Failed to upload part", e)
            })?;

        let mut state = self
            .uploads
            .get_mut(key)
            .ok_or_else(|| AppError::storage(format!("Multipart state lost for {key}")))?;
        state.parts.push(
            CompletedPart::builder()
                .part_number(part_number)
                .set_e_tag(uploaded.e_tag().map(str::to_string))
                .build(),
        );
        Ok(())
    }

    async fn commit_blocks(&self, key: &str, block_ids: &[String]) -> AppResult<()> {
        let (_, mut state) = self
            .uploads
            .remove(key)
            .ok_or_else(|| AppError::storage(format!("No staged blocks for {key}")))?;

        if state.parts.len() != block_ids.len() {
            self.abort_upload(key, &state.upload_id).await;
            return Err(AppError::storage(format!(
                "Staged {} parts but commit lists {} blocks",
                state.parts.len(),
                block_ids.len()
            )));
        }
        state
            .parts
            .sort_by_key(|p| p.part_number().unwrap_or(i32::MAX));

        let completed = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(&state.upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(state.parts))
                    .build(),
            )
            .send()
            .await;
        if let Err(err) = completed {
            self.abort_upload(key, &state.upload_id).await;
            return Err(AppError::with_source(
                ErrorKind::Storage,
                "Failed to complete multipart upload",
                err,
            ));
        }
        Ok(())
    }

    // Also aborts any multipart upload in flight for the key, so a
    // retried staging pass starts from a clean slate.
    async fn delete(&self, key: &str) -> AppResult<()> {
        if let Some((_, state)) = self.uploads.remove(key) {
            self.abort_upload(key, &state.upload_id).await;
        }
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Storage, format!("Failed to delete {key}"), e)
            })?;
        Ok(())
    }
}
