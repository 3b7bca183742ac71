//! Storage factory for creating object store instances

use std::sync::Arc;

use super::backends::{FileObjectStore, MemoryObjectStore};
#[cfg(feature = "s3")]
use super::backends::S3ObjectStore;
use super::config::{BackendType, StorageConfig};
use super::error::StorageResult;
use super::traits::ObjectStore;

/// Factory for creating object stores
pub struct StorageFactory;

impl StorageFactory {
    /// Create an object store from explicit configuration
    pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
        if config.page_size == 0 {
            return Err(super::error::StorageError::configuration(
                "page_size must be greater than zero",
            ));
        }

        match &config.backend {
            BackendType::File => {
                let store = FileObjectStore::new(&config.base_dir, config.page_size).await?;
                Ok(Arc::new(store))
            }
            BackendType::Memory => Ok(Arc::new(MemoryObjectStore::with_page_size(
                config.page_size,
            ))),
            #[cfg(feature = "s3")]
            BackendType::S3 => {
                let store = S3ObjectStore::new(&config.s3).await?;
                Ok(Arc::new(store))
            }
            #[cfg(not(feature = "s3"))]
            BackendType::S3 => Err(super::error::StorageError::configuration(
                "S3 backend not enabled. Enable with --features s3",
            )),
        }
    }
}
