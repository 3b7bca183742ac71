//! Coordinator restarts never repeat a phase guarded by a marker

mod common;

use async_trait::async_trait;
use common::{expected_counts, fast_config, text_store, Cluster, SOURCE};
use serverless_mr::coordinator::Coordinator;
use serverless_mr::driver::{read_output, SourcePrefix};
use serverless_mr::error::{ErrorCategory, MapReduceResult};
use serverless_mr::invoker::{Invocation, LocalInvoker, WorkerInvoker};
use serverless_mr::job::layout::MAPPINGS_KEY;
use serverless_mr::job::{CoordinatorInput, JobDefinition, Marker, PartitionStrategy};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const TEXTS: &[(&str, &str)] = &[
    ("one.txt", "red green blue red"),
    ("two.txt", "green green yellow"),
];

/// Rejects the first reducer invocation, forwards everything else
struct RejectFirstReducer {
    inner: LocalInvoker,
    rejected: AtomicBool,
}

#[async_trait]
impl WorkerInvoker for RejectFirstReducer {
    async fn invoke(&self, invocation: Invocation) -> MapReduceResult<u16> {
        let is_reducer = matches!(invocation, Invocation::Reducer(_));
        if is_reducer && !self.rejected.swap(true, Ordering::SeqCst) {
            return Ok(503);
        }
        self.inner.invoke(invocation).await
    }
}

#[tokio::test]
async fn test_completed_job_restart_is_a_no_op() {
    let store = text_store(TEXTS).await;
    let cluster = Cluster::new(Arc::new(store), fast_config(), JobDefinition::word_count());

    let output = cluster.run_job("again", 2).await;
    assert_eq!(output, expected_counts(TEXTS));
    let before = cluster.invoker.invocations().await.len();

    // restarting the whole job reuses its mappings and stops at job-complete
    let second = cluster.run_job("again", 2).await;
    assert_eq!(second, output);
    assert_eq!(cluster.invoker.invocations().await.len(), before + 1);
}

#[tokio::test]
async fn test_rejected_reducer_dispatch_is_retried_by_restart() {
    let store = text_store(TEXTS).await;
    let cluster = Cluster::new(Arc::new(store), fast_config(), JobDefinition::word_count());
    let job = cluster.job("flaky-dispatch");

    let plan = cluster
        .driver()
        .plan(&[SourcePrefix::bucket(SOURCE)])
        .await
        .unwrap();
    job.write_json(MAPPINGS_KEY, &plan.mappings).await.unwrap();

    let invoker = Arc::new(RejectFirstReducer {
        inner: cluster.invoker.clone(),
        rejected: AtomicBool::new(false),
    });
    let coordinator = || {
        Coordinator::new(
            CoordinatorInput {
                job_id: "flaky-dispatch".to_string(),
                num_mappers: plan.mappings.len(),
                num_queues: 2,
            },
            job.clone(),
            Arc::new(cluster.broker.clone()),
            invoker.clone(),
            cluster.config.clone(),
            PartitionStrategy::Hashed,
        )
    };

    let err = coordinator().run().await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Dispatch);
    assert!(job.marker_exists(Marker::MappersInvoked).await.unwrap());
    assert!(!job.marker_exists(Marker::ReducersInvoked).await.unwrap());

    // the restart skips the mappers and re-reads their undeleted signals
    let summary = coordinator().run().await.unwrap();
    assert!(!summary.mappers_invoked);
    assert!(summary.reducers_invoked);
    cluster.invoker.wait_idle().await;

    let invocations = cluster.invoker.invocations().await;
    let mappers = invocations
        .iter()
        .filter(|i| matches!(i, Invocation::Mapper(_)))
        .count();
    let reducers = invocations
        .iter()
        .filter(|i| matches!(i, Invocation::Reducer(_)))
        .count();
    assert_eq!(mappers, plan.mappings.len());
    assert_eq!(reducers, 2);

    let output = read_output(&job, PartitionStrategy::Hashed, 2).await.unwrap();
    assert_eq!(output, expected_counts(TEXTS));
}
