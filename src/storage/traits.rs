//! Core trait definition for the object store abstraction

use async_trait::async_trait;
use std::ops::Range;

use super::error::StorageResult;
use super::types::ListPage;

/// Bucketed blob storage used for source objects, checkpoints, outputs and
/// idempotency markers
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write an object, replacing any previous content
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> StorageResult<()>;

    /// Read a whole object, `None` when absent
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Read the half-open byte range `[start, end)` of an object
    async fn get_range(
        &self,
        bucket: &str,
        key: &str,
        range: Range<u64>,
    ) -> StorageResult<Vec<u8>>;

    /// Size of an object, `None` when absent
    async fn head(&self, bucket: &str, key: &str) -> StorageResult<Option<u64>>;

    /// Whether an object exists
    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        Ok(self.head(bucket, key).await?.is_some())
    }

    /// Delete an object; deleting a missing object is not an error
    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// List one page of objects under `prefix`, ordered by key
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> StorageResult<ListPage>;

    /// Short backend identifier for diagnostics
    fn backend_name(&self) -> &'static str;
}
