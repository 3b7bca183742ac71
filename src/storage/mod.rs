//! Object store abstraction layer
//!
//! Source objects, checkpoints, reducer outputs and coordinator markers all
//! live in a bucketed object store. Backends: in-memory (tests), local
//! files, and S3 behind the `s3` feature.

pub mod backends;
pub mod config;
pub mod error;
pub mod factory;
pub mod job_store;
pub mod traits;
pub mod types;


pub use backends::{FileObjectStore, MemoryObjectStore};
pub use config::{BackendType, S3Config, StorageConfig};
pub use error::{StorageError, StorageResult};
pub use factory::StorageFactory;
pub use job_store::JobStore;
pub use traits::ObjectStore;
pub use types::{ListPage, ObjectInfo};

/// List every object under `prefix`, following continuation tokens
pub async fn list_all(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
) -> StorageResult<Vec<ObjectInfo>> {
    let mut objects = Vec::new();
    let mut token = None;
    loop {
        let page = store.list_page(bucket, prefix, token).await?;
        objects.extend(page.objects);
        match page.next_token {
            Some(next) => token = Some(next),
            None => return Ok(objects),
        }
    }
}
