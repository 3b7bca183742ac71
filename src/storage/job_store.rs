//! Per-job view over an object store
//!
//! All durable job state lives under `<job_id>/` in the state bucket. This
//! wrapper adds the job root to relative keys and offers typed JSON and
//! marker helpers on top of the raw [`ObjectStore`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use super::error::{StorageError, StorageResult};
use super::traits::ObjectStore;
use crate::job::layout::Marker;

#[derive(Clone)]
pub struct JobStore {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    job_id: String,
}

impl JobStore {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        job_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            job_id: job_id.into(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// The underlying store, for reading source objects in other buckets
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Absolute key of a job-relative key
    pub fn full_key(&self, key: &str) -> String {
        format!("{}/{}", self.job_id, key)
    }

    pub async fn write_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> StorageResult<()> {
        let body = serde_json::to_vec(value)?;
        self.store.put(&self.bucket, &self.full_key(key), body).await
    }

    pub async fn read_json<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        match self.store.get(&self.bucket, &self.full_key(key)).await? {
            Some(body) => serde_json::from_slice(&body)
                .map(Some)
                .map_err(|e| StorageError::serialization(format!("{}: {}", key, e))),
            None => Ok(None),
        }
    }

    /// Read a JSON object that must exist
    pub async fn require_json<T: DeserializeOwned>(&self, key: &str) -> StorageResult<T> {
        self.read_json(key)
            .await?
            .ok_or_else(|| StorageError::not_found(self.full_key(key)))
    }

    pub async fn marker_exists(&self, marker: Marker) -> StorageResult<bool> {
        self.store
            .exists(&self.bucket, &self.full_key(marker.key()))
            .await
    }

    /// Write a zero-byte marker.
    ///
    /// Markers are immutable, so a marker that already exists is left alone.
    pub async fn write_marker(&self, marker: Marker) -> StorageResult<()> {
        if self.marker_exists(marker).await? {
            debug!(job_id = %self.job_id, marker = marker.key(), "Marker already present");
            return Ok(());
        }
        self.store
            .put(&self.bucket, &self.full_key(marker.key()), Vec::new())
            .await
    }
}
