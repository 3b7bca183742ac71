//! S3 object store implementation

use super::super::config::S3Config;
use super::super::error::{StorageError, StorageResult};
use super::super::traits::ObjectStore;
use super::super::types::{ListPage, ObjectInfo};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, info};

/// S3 object store
pub struct S3ObjectStore {
    client: Arc<Client>,
}

impl S3ObjectStore {
    /// Create new S3 store
    pub async fn new(config: &S3Config) -> StorageResult<Self> {
        info!("Initializing S3 object store");

        let aws_config = if let Some(ref endpoint) = config.endpoint {
            aws_config::from_env()
                .endpoint_url(endpoint)
                .load()
                .await
        } else {
            aws_config::load_from_env().await
        };

        Ok(Self {
            client: Arc::new(Client::new(&aws_config)),
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> StorageResult<()> {
        debug!(bucket, key, bytes = body.len(), "Putting object");

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| StorageError::unavailable(format!("Failed to put {}/{}: {}", bucket, key, e)))?;

        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        debug!(bucket, key, "Getting object");

        match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(result) => {
                let bytes = result
                    .body
                    .collect()
                    .await
                    .map_err(|e| StorageError::unavailable(format!("Failed to read {}/{}: {}", bucket, key, e)))?
                    .into_bytes();
                Ok(Some(bytes.to_vec()))
            }
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(StorageError::unavailable(format!(
                        "Failed to get {}/{}: {}",
                        bucket, key, service_error
                    )))
                }
            }
        }
    }

    async fn get_range(
        &self,
        bucket: &str,
        key: &str,
        range: Range<u64>,
    ) -> StorageResult<Vec<u8>> {
        if range.start > range.end {
            return Err(StorageError::invalid_range(format!(
                "{}..{} of {}/{}",
                range.start, range.end, bucket, key
            )));
        }
        if range.start == range.end {
            return Ok(Vec::new());
        }

        // HTTP ranges are inclusive at both ends
        let header = format!("bytes={}-{}", range.start, range.end - 1);
        let result = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .range(header)
            .send()
            .await
            .map_err(|e| StorageError::unavailable(format!("Failed to get range of {}/{}: {}", bucket, key, e)))?;

        let bytes = result
            .body
            .collect()
            .await
            .map_err(|e| StorageError::unavailable(format!("Failed to read {}/{}: {}", bucket, key, e)))?
            .into_bytes();
        Ok(bytes.to_vec())
    }

    async fn head(&self, bucket: &str, key: &str) -> StorageResult<Option<u64>> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(result) => Ok(Some(result.content_length().unwrap_or(0).max(0) as u64)),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(None)
                } else {
                    Err(StorageError::unavailable(format!(
                        "Failed to head {}/{}: {}",
                        bucket, key, service_error
                    )))
                }
            }
        }
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        debug!(bucket, key, "Deleting object");

        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::unavailable(format!("Failed to delete {}/{}: {}", bucket, key, e)))?;

        Ok(())
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> StorageResult<ListPage> {
        let result = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_continuation_token(continuation)
            .send()
            .await
            .map_err(|e| StorageError::unavailable(format!("Failed to list {}/{}: {}", bucket, prefix, e)))?;

        let objects = result
            .contents()
            .iter()
            .filter_map(|object| {
                let key = object.key()?;
                let size = object.size().unwrap_or(0).max(0) as u64;
                Some(ObjectInfo::new(bucket, key, size))
            })
            .collect();

        Ok(ListPage {
            objects,
            next_token: result.next_continuation_token().map(str::to_string),
        })
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}
