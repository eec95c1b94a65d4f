//! Object store provider implementations.

pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;

use std::sync::Arc;

use treedrive_core::config::StorageConfig;
use treedrive_core::error::AppError;
use treedrive_core::result::AppResult;
use treedrive_core::traits::ObjectStore;

/// Build the configured object store.
pub async fn create_object_store(config: &StorageConfig) -> AppResult<Arc<dyn ObjectStore>> {
    match config.provider.as_str() {
        "memory" => Ok(Arc::new(memory::MemoryObjectStore::new())),
        #[cfg(feature = "s3")]
        "s3" => {
            let store = s3::S3ObjectStore::new(&config.s3).await?;
            Ok(Arc::new(store))
        }
        other => Err(AppError::configuration(format!(
            "Unknown storage provider '{other}'"
        ))),
    }
}
