//! In-memory object store for testing

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::storage::{
    error::{StorageError, StorageResult},
    traits::ObjectStore,
    types::{page_after, ListPage},
};

type Buckets = BTreeMap<String, BTreeMap<String, Vec<u8>>>;

/// In-memory object store
#[derive(Clone)]
pub struct MemoryObjectStore {
    buckets: Arc<RwLock<Buckets>>,
    page_size: usize,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    /// Create a new memory store
    pub fn new() -> Self {
        Self::with_page_size(1000)
    }

    /// Create a memory store that lists `page_size` objects per page
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            buckets: Arc::new(RwLock::new(BTreeMap::new())),
            page_size,
        }
    }

    /// Number of objects currently stored in a bucket
    pub async fn object_count(&self, bucket: &str) -> usize {
        self.buckets
            .read()
            .await
            .get(bucket)
            .map_or(0, |objects| objects.len())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> StorageResult<()> {
        self.buckets
            .write()
            .await
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), body);
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self
            .buckets
            .read()
            .await
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .cloned())
    }

    async fn get_range(
        &self,
        bucket: &str,
        key: &str,
        range: Range<u64>,
    ) -> StorageResult<Vec<u8>> {
        let buckets = self.buckets.read().await;
        let body = buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .ok_or_else(|| StorageError::not_found(format!("{}/{}", bucket, key)))?;

        let len = body.len() as u64;
        if range.start > range.end || range.start > len {
            return Err(StorageError::invalid_range(format!(
                "{}..{} of {}/{} ({} bytes)",
                range.start, range.end, bucket, key, len
            )));
        }
        let end = range.end.min(len);
        Ok(body[range.start as usize..end as usize].to_vec())
    }

    async fn head(&self, bucket: &str, key: &str) -> StorageResult<Option<u64>> {
        Ok(self
            .buckets
            .read()
            .await
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|body| body.len() as u64))
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        if let Some(objects) = self.buckets.write().await.get_mut(bucket) {
            objects.remove(key);
        }
        Ok(())
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> StorageResult<ListPage> {
        let buckets = self.buckets.read().await;
        let Some(objects) = buckets.get(bucket) else {
            return Ok(ListPage::default());
        };
        let matching = objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, body)| (key.clone(), body.len() as u64));
        Ok(page_after(
            bucket,
            matching,
            continuation.as_deref(),
            self.page_size,
        ))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
