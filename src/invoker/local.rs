//! In-process invoker
//!
//! Runs every worker as a tokio task in the current process, standing in for
//! an asynchronous function platform. Failing invocations are re-run up to
//! `invocation_attempts` times, the way a platform retries an async
//! invocation that returned an error. With `invocation_timeout` set, an
//! attempt that runs too long is dropped and counts as a failed attempt.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{Invocation, WorkerInvoker, ACCEPTED};
use crate::config::EngineConfig;
use crate::coordinator::Coordinator;
use crate::error::{MapReduceError, MapReduceResult};
use crate::job::JobDefinition;
use crate::mapper::Mapper;
use crate::queue::MessageQueue;
use crate::reducer::CheckpointedReducer;
use crate::storage::{JobStore, ObjectStore};

/// An invocation that failed on every attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationFailure {
    pub worker: String,
    pub attempts: u32,
    pub error: String,
}

struct Inner {
    store: Arc<dyn ObjectStore>,
    queue: Arc<dyn MessageQueue>,
    config: EngineConfig,
    definition: JobDefinition,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    invocations: Mutex<Vec<Invocation>>,
    failures: Mutex<Vec<InvocationFailure>>,
}

#[derive(Clone)]
pub struct LocalInvoker {
    inner: Arc<Inner>,
}

impl LocalInvoker {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        queue: Arc<dyn MessageQueue>,
        config: EngineConfig,
        definition: JobDefinition,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                queue,
                config,
                definition,
                tasks: Mutex::new(Vec::new()),
                invocations: Mutex::new(Vec::new()),
                failures: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Wait until every spawned worker, including workers spawned by other
    /// workers, has finished
    pub async fn wait_idle(&self) {
        loop {
            let handles = std::mem::take(&mut *self.inner.tasks.lock().await);
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task panicked");
                }
            }
        }
    }

    /// Every invocation received, in order
    pub async fn invocations(&self) -> Vec<Invocation> {
        self.inner.invocations.lock().await.clone()
    }

    pub async fn failures(&self) -> Vec<InvocationFailure> {
        self.inner.failures.lock().await.clone()
    }

    fn job_store(&self, job_id: &str) -> JobStore {
        JobStore::new(
            Arc::clone(&self.inner.store),
            self.inner.config.state_bucket.clone(),
            job_id,
        )
    }

    async fn run_with_retries(self, invocation: Invocation) {
        let worker = invocation.worker_name();
        let max_attempts = self.inner.config.invocation_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.run_attempt(&worker, invocation.clone()).await {
                Ok(()) => {
                    debug!(%worker, attempt, "Invocation finished");
                    return;
                }
                Err(err) => {
                    if !err.is_retryable() || attempt >= max_attempts {
                        error!(%worker, attempt, error = %err, "Invocation failed");
                        self.inner.failures.lock().await.push(InvocationFailure {
                            worker,
                            attempts: attempt,
                            error: err.to_string(),
                        });
                        return;
                    }
                    let delay = retry_delay(self.inner.config.send_retry_backoff, attempt);
                    warn!(
                        "Retrying {} (attempt {}/{}) after {:?}: {}",
                        worker, attempt, max_attempts, delay, err
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn run_attempt(&self, worker: &str, invocation: Invocation) -> MapReduceResult<()> {
        match self.inner.config.invocation_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.run_once(invocation))
                .await
                .map_err(|_| MapReduceError::InvocationTimedOut {
                    worker: worker.to_string(),
                    timeout,
                })?,
            None => self.run_once(invocation).await,
        }
    }

    async fn run_once(&self, invocation: Invocation) -> MapReduceResult<()> {
        let inner = &self.inner;
        match invocation {
            Invocation::Mapper(input) => {
                let job = self.job_store(&input.job_id);
                Mapper::new(
                    input,
                    job,
                    Arc::clone(&inner.queue),
                    inner.config.clone(),
                    inner.definition.clone(),
                )
                .run()
                .await?;
            }
            Invocation::Reducer(input) => {
                let job = self.job_store(&input.job_id);
                CheckpointedReducer::new(
                    input,
                    job,
                    Arc::clone(&inner.queue),
                    inner.config.clone(),
                    &inner.definition,
                )
                .run()
                .await?;
            }
            Invocation::Coordinator(input) => {
                let job = self.job_store(&input.job_id);
                Coordinator::new(
                    input,
                    job,
                    Arc::clone(&inner.queue),
                    Arc::new(self.clone()),
                    inner.config.clone(),
                    inner.definition.strategy,
                )
                .run()
                .await?;
            }
        }
        Ok(())
    }
}

/// Linear backoff between invocation attempts
fn retry_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(attempt)
}

#[async_trait]
impl WorkerInvoker for LocalInvoker {
    async fn invoke(&self, invocation: Invocation) -> MapReduceResult<u16> {
        info!(worker = %invocation.worker_name(), "Invoking worker");
        self.inner.invocations.lock().await.push(invocation.clone());
        let handle = tokio::spawn(self.clone().run_with_retries(invocation));
        self.inner.tasks.lock().await.push(handle);
        Ok(ACCEPTED)
    }
}
