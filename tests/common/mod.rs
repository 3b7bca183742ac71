//! Common test utilities: an in-process cluster over the memory backends

#![allow(dead_code)]

use async_trait::async_trait;
use serverless_mr::driver::{read_output, JobDriver, SourcePrefix};
use serverless_mr::invoker::LocalInvoker;
use serverless_mr::job::JobDefinition;
use serverless_mr::queue::InMemoryQueue;
use serverless_mr::storage::{
    JobStore, ListPage, MemoryObjectStore, ObjectStore, StorageError, StorageResult,
};
use serverless_mr::EngineConfig;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const SOURCE: &str = "source";

/// Tunables small enough for tests to finish quickly
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        receive_wait: Duration::from_millis(20),
        poll_interval: Duration::from_millis(5),
        send_retry_backoff: Duration::from_millis(1),
        visibility_timeout: Duration::from_millis(200),
        state_bucket: "state".to_string(),
        ..EngineConfig::default()
    }
}

/// Store, broker and invoker shared by every worker of a test job
pub struct Cluster {
    pub store: Arc<dyn ObjectStore>,
    pub broker: InMemoryQueue,
    pub invoker: LocalInvoker,
    pub config: EngineConfig,
    pub definition: JobDefinition,
}

impl Cluster {
    pub fn new(store: Arc<dyn ObjectStore>, config: EngineConfig, definition: JobDefinition) -> Self {
        let broker = InMemoryQueue::new(config.visibility_timeout);
        let invoker = LocalInvoker::new(
            Arc::clone(&store),
            Arc::new(broker.clone()),
            config.clone(),
            definition.clone(),
        );
        Self {
            store,
            broker,
            invoker,
            config,
            definition,
        }
    }

    pub fn driver(&self) -> JobDriver {
        JobDriver::new(
            Arc::clone(&self.store),
            Arc::new(self.invoker.clone()),
            self.config.clone(),
            self.definition.clone(),
        )
    }

    pub fn job(&self, job_id: &str) -> JobStore {
        JobStore::new(
            Arc::clone(&self.store),
            self.config.state_bucket.clone(),
            job_id,
        )
    }

    /// Start a job over the whole source bucket and wait for every worker
    pub async fn run_job(&self, job_id: &str, partitions: usize) -> BTreeMap<String, f64> {
        self.driver()
            .start(job_id, &[SourcePrefix::bucket(SOURCE)], partitions)
            .await
            .unwrap();
        self.invoker.wait_idle().await;
        let failures = self.invoker.failures().await;
        assert!(failures.is_empty(), "failed invocations: {:?}", failures);
        read_output(&self.job(job_id), self.definition.strategy, partitions)
            .await
            .unwrap()
    }
}

/// Memory store seeded with text objects in the source bucket
pub async fn text_store(objects: &[(&str, &str)]) -> MemoryObjectStore {
    let store = MemoryObjectStore::new();
    for (key, text) in objects {
        store
            .put(SOURCE, key, text.as_bytes().to_vec())
            .await
            .unwrap();
    }
    store
}

/// Word counts computed directly, for comparison with job output
pub fn expected_counts(objects: &[(&str, &str)]) -> BTreeMap<String, f64> {
    let mut counts = BTreeMap::new();
    for (_, text) in objects {
        for word in text.split_whitespace() {
            *counts.entry(word.to_lowercase()).or_insert(0.0) += 1.0;
        }
    }
    counts
}

/// Store that fails the first `failures` writes whose key ends with a suffix
pub struct FlakyStore {
    pub inner: MemoryObjectStore,
    pub fail_suffix: String,
    pub remaining: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: MemoryObjectStore, fail_suffix: &str, failures: usize) -> Self {
        Self {
            inner,
            fail_suffix: fail_suffix.to_string(),
            remaining: AtomicUsize::new(failures),
        }
    }

    pub fn exhausted(&self) -> bool {
        self.remaining.load(Ordering::SeqCst) == 0
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> StorageResult<()> {
        if key.ends_with(&self.fail_suffix)
            && self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(StorageError::unavailable("injected write failure"));
        }
        self.inner.put(bucket, key, body).await
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.inner.get(bucket, key).await
    }

    async fn get_range(
        &self,
        bucket: &str,
        key: &str,
        range: Range<u64>,
    ) -> StorageResult<Vec<u8>> {
        self.inner.get_range(bucket, key, range).await
    }

    async fn head(&self, bucket: &str, key: &str) -> StorageResult<Option<u64>> {
        self.inner.head(bucket, key).await
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.inner.delete(bucket, key).await
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> StorageResult<ListPage> {
        self.inner.list_page(bucket, prefix, continuation).await
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}
