//! Object storage configuration.

use serde::{Deserialize, Serialize};

/// Top-level object storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Object store backend to use: `"s3"` or `"memory"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Maximum declared upload size in bytes (default 5 GB).
    #[serde(default = "default_max_upload")]
    pub max_upload_size_bytes: u64,
    /// Lifetime of write credentials issued at upload init, in seconds.
    #[serde(default = "default_upload_ttl")]
    pub upload_credential_ttl_seconds: u64,
    /// Lifetime of read credentials issued for downloads, in seconds.
    #[serde(default = "default_download_ttl")]
    pub download_credential_ttl_seconds: u64,
    /// Block size in bytes for staged archive uploads (default 4 MiB).
    #[serde(default = "default_block_size")]
    pub block_size_bytes: u64,
    /// Hours until a finished folder bundle expires (default 24).
    #[serde(default = "default_bundle_ttl")]
    pub bundle_ttl_hours: i64,
    /// Scratch directory for archives being assembled.
    #[serde(default = "default_spool_dir")]
    pub spool_dir: String,
    /// S3-compatible storage configuration.
    #[serde(default)]
    pub s3: S3StorageConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            max_upload_size_bytes: default_max_upload(),
            upload_credential_ttl_seconds: default_upload_ttl(),
            download_credential_ttl_seconds: default_download_ttl(),
            block_size_bytes: default_block_size(),
            bundle_ttl_hours: default_bundle_ttl(),
            spool_dir: default_spool_dir(),
            s3: S3StorageConfig::default(),
        }
    }
}

/// S3-compatible object storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct S3StorageConfig {
    /// S3 endpoint URL (for non-AWS services like MinIO).
    #[serde(default)]
    pub endpoint: String,
    /// AWS region.
    #[serde(default = "default_region")]
    pub region: String,
    /// S3 bucket name.
    #[serde(default)]
    pub bucket: String,
    /// Access key ID.
    #[serde(default)]
    pub access_key: String,
    /// Secret access key.
    #[serde(default)]
    pub secret_key: String,
}

fn default_provider() -> String {
    "s3".to_string()
}

fn default_max_upload() -> u64 {
    5_368_709_120 // 5 GB
}

fn default_upload_ttl() -> u64 {
    3600
}

fn default_download_ttl() -> u64 {
    3600
}

fn default_block_size() -> u64 {
    4_194_304 // 4 MiB
}

fn default_bundle_ttl() -> i64 {
    24
}

fn default_spool_dir() -> String {
    "./data/spool".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}
