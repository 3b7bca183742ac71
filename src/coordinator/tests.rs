use super::*;
use crate::error::ErrorCategory;
use crate::invoker::ACCEPTED;
use crate::job::ReduceTarget;
use crate::partition::{partition_objects, ObjectMode};
use crate::queue::InMemoryQueue;
use crate::storage::{MemoryObjectStore, ObjectInfo};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;

/// Records invocations and plays the workers' part by posting their
/// completion signals straight away
struct ScriptedInvoker {
    broker: InMemoryQueue,
    names: QueueNames,
    status: u16,
    repeat_signals: bool,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedInvoker {
    fn new(broker: &InMemoryQueue, status: u16) -> Self {
        Self {
            broker: broker.clone(),
            names: QueueNames::new("job"),
            status,
            repeat_signals: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    async fn reducer_calls(&self) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| matches!(c, Invocation::Reducer(_)))
            .count()
    }

    async fn mapper_calls(&self) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| matches!(c, Invocation::Mapper(_)))
            .count()
    }
}

#[async_trait]
impl WorkerInvoker for ScriptedInvoker {
    async fn invoke(&self, invocation: Invocation) -> MapReduceResult<u16> {
        self.calls.lock().await.push(invocation.clone());
        if self.status != ACCEPTED {
            return Ok(self.status);
        }
        let (queue, worker) = match &invocation {
            Invocation::Mapper(input) => {
                (self.names.mappers_done(), input.mapping.map_id.to_string())
            }
            Invocation::Reducer(input) => match input.queue_partition {
                ReduceTarget::Partition(_) => (self.names.reducers_done(), input.reducer_id.clone()),
                ReduceTarget::Final => (self.names.final_done(), input.reducer_id.clone()),
            },
            Invocation::Coordinator(_) => return Ok(ACCEPTED),
        };
        let copies = if self.repeat_signals { 2 } else { 1 };
        for _ in 0..copies {
            self.broker
                .send(&queue, CompletionSignal::new(&worker).to_message()?)
                .await?;
        }
        Ok(ACCEPTED)
    }
}

struct Fixture {
    store: MemoryObjectStore,
    broker: InMemoryQueue,
}

impl Fixture {
    async fn with_mappings(count: u64) -> Self {
        let fixture = Self {
            store: MemoryObjectStore::new(),
            broker: InMemoryQueue::new(Duration::from_secs(30)),
        };
        let objects: Vec<ObjectInfo> = (0..count)
            .map(|i| ObjectInfo::new("source", format!("obj-{}", i), 100))
            .collect();
        let mappings = partition_objects(&objects, 100, ObjectMode::Ranged);
        fixture
            .job_store()
            .write_json(MAPPINGS_KEY, &mappings)
            .await
            .unwrap();
        fixture
    }

    fn job_store(&self) -> JobStore {
        JobStore::new(Arc::new(self.store.clone()), "state", "job")
    }

    fn coordinator(
        &self,
        invoker: Arc<ScriptedInvoker>,
        num_mappers: usize,
        strategy: PartitionStrategy,
    ) -> Coordinator {
        let config = EngineConfig {
            receive_wait: Duration::from_millis(10),
            poll_interval: Duration::from_millis(5),
            progress_log_interval: 1,
            ..EngineConfig::default()
        };
        Coordinator::new(
            CoordinatorInput {
                job_id: "job".to_string(),
                num_mappers,
                num_queues: 3,
            },
            self.job_store(),
            Arc::new(self.broker.clone()),
            invoker,
            config,
            strategy,
        )
    }
}

#[tokio::test]
async fn test_reducers_invoked_once_across_restart() {
    let fixture = Fixture::with_mappings(2).await;
    let invoker = Arc::new(ScriptedInvoker::new(&fixture.broker, ACCEPTED));

    let first = fixture.coordinator(invoker.clone(), 2, PartitionStrategy::Hashed);
    assert!(first.invoke_reducers().await.unwrap());

    // a restarted coordinator sees the marker and issues nothing
    let second = fixture.coordinator(invoker.clone(), 2, PartitionStrategy::Hashed);
    assert!(!second.invoke_reducers().await.unwrap());

    assert_eq!(invoker.reducer_calls().await, 3);
    assert!(fixture
        .job_store()
        .marker_exists(Marker::ReducersInvoked)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_rejected_dispatch_leaves_marker_unwritten() {
    let fixture = Fixture::with_mappings(2).await;
    let rejecting = Arc::new(ScriptedInvoker::new(&fixture.broker, 429));
    let err = fixture
        .coordinator(rejecting, 2, PartitionStrategy::Hashed)
        .invoke_reducers()
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Dispatch);
    assert!(!fixture
        .job_store()
        .marker_exists(Marker::ReducersInvoked)
        .await
        .unwrap());

    let accepting = Arc::new(ScriptedInvoker::new(&fixture.broker, ACCEPTED));
    assert!(fixture
        .coordinator(accepting.clone(), 2, PartitionStrategy::Hashed)
        .invoke_reducers()
        .await
        .unwrap());
    assert_eq!(accepting.reducer_calls().await, 3);
}

#[tokio::test]
async fn test_full_run_counts_distinct_workers() {
    let fixture = Fixture::with_mappings(4).await;
    let mut invoker = ScriptedInvoker::new(&fixture.broker, ACCEPTED);
    invoker.repeat_signals = true;
    let invoker = Arc::new(invoker);

    let summary = fixture
        .coordinator(invoker.clone(), 4, PartitionStrategy::Hashed)
        .run()
        .await
        .unwrap();
    assert!(summary.mappers_invoked);
    assert!(summary.reducers_invoked);
    assert!(!summary.final_reducer_invoked);
    assert_eq!(invoker.mapper_calls().await, 4);
    assert_eq!(invoker.reducer_calls().await, 3);

    let job = fixture.job_store();
    for marker in [
        Marker::MappersInvoked,
        Marker::ReducersInvoked,
        Marker::JobComplete,
    ] {
        assert!(job.marker_exists(marker).await.unwrap(), "{:?}", marker);
    }
    assert!(!job.marker_exists(Marker::FinalReducerInvoked).await.unwrap());
    assert_eq!(fixture.broker.in_flight_count("job-mappers-done").await, 0);
    assert_eq!(fixture.broker.in_flight_count("job-reducers-done").await, 0);
}

#[tokio::test]
async fn test_randomized_run_invokes_final_reducer() {
    let fixture = Fixture::with_mappings(2).await;
    let invoker = Arc::new(ScriptedInvoker::new(&fixture.broker, ACCEPTED));

    let summary = fixture
        .coordinator(invoker.clone(), 2, PartitionStrategy::Randomized)
        .run()
        .await
        .unwrap();
    assert!(summary.final_reducer_invoked);
    assert_eq!(invoker.reducer_calls().await, 4);
    assert!(fixture
        .job_store()
        .marker_exists(Marker::JobComplete)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_restart_after_reducers_invoked_skips_mapper_phase() {
    let fixture = Fixture::with_mappings(2).await;
    let job = fixture.job_store();
    job.write_marker(Marker::MappersInvoked).await.unwrap();
    job.write_marker(Marker::ReducersInvoked).await.unwrap();
    for index in 0..3 {
        fixture
            .broker
            .send(
                "job-reducers-done",
                CompletionSignal::new(format!("partition-{}", index))
                    .to_message()
                    .unwrap(),
            )
            .await
            .unwrap();
    }

    let invoker = Arc::new(ScriptedInvoker::new(&fixture.broker, ACCEPTED));
    let summary = fixture
        .coordinator(invoker.clone(), 2, PartitionStrategy::Hashed)
        .run()
        .await
        .unwrap();
    assert!(!summary.mappers_invoked);
    assert!(!summary.reducers_invoked);
    assert!(invoker.calls.lock().await.is_empty());
    assert!(job.marker_exists(Marker::JobComplete).await.unwrap());
}

#[tokio::test]
async fn test_completed_job_is_left_alone() {
    let fixture = Fixture::with_mappings(1).await;
    fixture
        .job_store()
        .write_marker(Marker::JobComplete)
        .await
        .unwrap();
    let invoker = Arc::new(ScriptedInvoker::new(&fixture.broker, ACCEPTED));
    let summary = fixture
        .coordinator(invoker.clone(), 1, PartitionStrategy::Hashed)
        .run()
        .await
        .unwrap();
    assert!(summary.already_complete);
    assert!(invoker.calls.lock().await.is_empty());
}

#[tokio::test]
async fn test_mapping_count_mismatch_is_rejected() {
    let fixture = Fixture::with_mappings(2).await;
    let invoker = Arc::new(ScriptedInvoker::new(&fixture.broker, ACCEPTED));
    let err = fixture
        .coordinator(invoker, 5, PartitionStrategy::Hashed)
        .invoke_mappers()
        .await
        .unwrap_err();
    assert!(matches!(err, MapReduceError::InvalidJob { .. }));
}

#[tokio::test]
async fn test_restart_after_final_reducer_invoked_waits_only_for_final_signal() {
    let fixture = Fixture::with_mappings(2).await;
    let job = fixture.job_store();
    for marker in [
        Marker::MappersInvoked,
        Marker::ReducersInvoked,
        Marker::FinalReducerInvoked,
    ] {
        job.write_marker(marker).await.unwrap();
    }
    // the reducers-done signals were discarded by the previous coordinator
    fixture
        .broker
        .send(
            "job-final-done",
            CompletionSignal::new(ReduceTarget::Final.reducer_id())
                .to_message()
                .unwrap(),
        )
        .await
        .unwrap();

    let invoker = Arc::new(ScriptedInvoker::new(&fixture.broker, ACCEPTED));
    let summary = tokio::time::timeout(
        Duration::from_secs(3),
        fixture
            .coordinator(invoker.clone(), 2, PartitionStrategy::Randomized)
            .run(),
    )
    .await
    .expect("coordinator waited for discarded reducer signals")
    .unwrap();

    assert!(!summary.mappers_invoked);
    assert!(!summary.reducers_invoked);
    assert!(!summary.final_reducer_invoked);
    assert!(invoker.calls.lock().await.is_empty());
    assert!(job.marker_exists(Marker::JobComplete).await.unwrap());
    assert_eq!(fixture.broker.in_flight_count("job-final-done").await, 0);
}
