//! Mapper worker
//!
//! Downloads each range of its mapping, runs the job's transform over the
//! bytes, and shuffles the emitted values. A download or transform failure
//! aborts the invocation; the platform's retry re-runs the whole mapping,
//! which re-sends identical batches. A key emitted under two aggregator
//! kinds fails the mapper before that range's values are shuffled.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, info_span, Instrument};

use crate::config::EngineConfig;
use crate::error::MapReduceResult;
use crate::job::layout::mapper_metadata_key;
use crate::job::{JobDefinition, MapperInput, QueueNames};
use crate::queue::MessageQueue;
use crate::shuffle::{CompletionSignal, ShuffleWriter};
use crate::storage::JobStore;

/// What one mapper invocation produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapperSummary {
    #[serde(rename = "mapID")]
    pub map_id: String,
    pub ranges: usize,
    pub bytes_read: u64,
    pub values_emitted: u64,
    /// Batches sent per reduce target
    pub batch_counts: BTreeMap<String, u64>,
}

pub struct Mapper {
    input: MapperInput,
    job: JobStore,
    queue: Arc<dyn MessageQueue>,
    config: EngineConfig,
    definition: JobDefinition,
}

impl Mapper {
    pub fn new(
        input: MapperInput,
        job: JobStore,
        queue: Arc<dyn MessageQueue>,
        config: EngineConfig,
        definition: JobDefinition,
    ) -> Self {
        Self {
            input,
            job,
            queue,
            config,
            definition,
        }
    }

    pub async fn run(self) -> MapReduceResult<MapperSummary> {
        let span = info_span!(
            "mapper",
            job_id = %self.input.job_id,
            map_id = %self.input.mapping.map_id
        );
        self.execute().instrument(span).await
    }

    async fn execute(self) -> MapReduceResult<MapperSummary> {
        let map_id = self.input.mapping.map_id.to_string();
        let names = QueueNames::new(self.input.job_id.clone());
        let mut writer = ShuffleWriter::for_partitions(
            Arc::clone(&self.queue),
            names.clone(),
            map_id.clone(),
            self.input.num_queues,
            self.definition.strategy,
            self.definition.aggregator,
            &self.config,
        );

        let mut emitter = self.definition.emitter();
        let mut bytes_read = 0u64;
        let mut values_emitted = 0u64;
        for range in &self.input.mapping.objects {
            let bytes = if range.is_empty() {
                Vec::new()
            } else {
                self.job
                    .store()
                    .get_range(
                        &range.bucket,
                        &range.key,
                        range.initial_byte..range.final_byte,
                    )
                    .await?
            };
            bytes_read += bytes.len() as u64;

            let values = self.definition.map_range(range, &bytes, &mut emitter)?;
            debug!(
                key = %range.key,
                start = range.initial_byte,
                end = range.final_byte,
                values = values.len(),
                "Mapped range"
            );
            values_emitted += values.len() as u64;
            writer.write_all(values).await?;
        }

        let ledger = writer.finish().await?;
        let summary = MapperSummary {
            map_id: map_id.clone(),
            ranges: self.input.mapping.objects.len(),
            bytes_read,
            values_emitted,
            batch_counts: ledger
                .into_iter()
                .map(|(target, count)| (target.to_string(), count))
                .collect(),
        };
        self.job
            .write_json(&mapper_metadata_key(&map_id), &summary)
            .await?;

        self.queue
            .send(
                &names.mappers_done(),
                CompletionSignal::new(map_id).to_message()?,
            )
            .await?;
        info!(
            ranges = summary.ranges,
            bytes_read, values_emitted, "Mapper finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::AggregatorType;
    use crate::error::MapReduceError;
    use crate::partition::{partition_objects, ObjectMode};
    use crate::queue::InMemoryQueue;
    use crate::shuffle::wire::decode_slot;
    use crate::storage::{MemoryObjectStore, ObjectInfo, ObjectStore};
    use std::time::Duration;

    async fn seeded_store() -> MemoryObjectStore {
        let store = MemoryObjectStore::new();
        store
            .put("source", "a.txt", b"red green red".to_vec())
            .await
            .unwrap();
        store.put("source", "empty.txt", Vec::new()).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_mapper_shuffles_ranges_and_signals() {
        let store = seeded_store().await;
        let broker = InMemoryQueue::new(Duration::from_secs(30));
        let objects = vec![
            ObjectInfo::new("source", "a.txt", 13),
            ObjectInfo::new("source", "empty.txt", 0),
        ];
        let mapping = partition_objects(&objects, 1024, ObjectMode::Ranged).remove(0);
        let map_id = mapping.map_id.to_string();

        let mapper = Mapper::new(
            MapperInput {
                job_id: "job".to_string(),
                mapping,
                num_queues: 2,
            },
            JobStore::new(Arc::new(store.clone()), "state", "job"),
            Arc::new(broker.clone()),
            EngineConfig::default(),
            JobDefinition::word_count(),
        );
        let summary = mapper.run().await.unwrap();
        assert_eq!(summary.ranges, 2);
        assert_eq!(summary.bytes_read, 13);
        assert_eq!(summary.values_emitted, 3);
        assert_eq!(summary.batch_counts.len(), 2);
        let batches: u64 = summary.batch_counts.values().sum();
        assert!((1..=2).contains(&batches));

        let mut real = Vec::new();
        for partition in 0..2 {
            let queue = format!("job-partition-{}", partition);
            for message in broker.receive(&queue, 10, Duration::ZERO).await.unwrap() {
                let slot = decode_slot(&queue, &message, AggregatorType::Sum).unwrap();
                assert_eq!(slot.map_id, map_id);
                if !slot.message.empty {
                    real.push(slot.message.key);
                }
            }
        }
        real.sort();
        assert_eq!(real, vec!["green", "red", "red"]);

        let done = broker
            .receive("job-mappers-done", 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(
            CompletionSignal::decode("q", &done[0]).unwrap().worker_id,
            map_id
        );
        assert!(store
            .exists("state", &format!("job/metadata/{}", map_id))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_missing_source_aborts_invocation() {
        let store = MemoryObjectStore::new();
        let broker = InMemoryQueue::new(Duration::from_secs(30));
        let objects = vec![ObjectInfo::new("source", "gone.txt", 10)];
        let mapping = partition_objects(&objects, 1024, ObjectMode::Ranged).remove(0);

        let mapper = Mapper::new(
            MapperInput {
                job_id: "job".to_string(),
                mapping,
                num_queues: 1,
            },
            JobStore::new(Arc::new(store), "state", "job"),
            Arc::new(broker.clone()),
            EngineConfig::default(),
            JobDefinition::word_count(),
        );
        assert!(mapper.run().await.is_err());
        assert_eq!(
            broker.approximate_depth("job-mappers-done").await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_mixed_aggregator_fails_before_any_send() {
        let store = seeded_store().await;
        let broker = InMemoryQueue::new(Duration::from_secs(30));
        let objects = vec![ObjectInfo::new("source", "a.txt", 13)];
        let mapping = partition_objects(&objects, 1024, ObjectMode::Ranged).remove(0);
        let definition = JobDefinition::from_fn("mixed", |_range, _bytes, emitter| {
            for _ in 0..25 {
                emitter.emit("k", 1.0)?;
            }
            emitter.emit_as("k", 2.0, AggregatorType::Avg)
        });
        let config = EngineConfig {
            batch_size: 10,
            ..EngineConfig::default()
        };

        let mapper = Mapper::new(
            MapperInput {
                job_id: "job".to_string(),
                mapping,
                num_queues: 1,
            },
            JobStore::new(Arc::new(store), "state", "job"),
            Arc::new(broker.clone()),
            config,
            definition,
        );
        let err = mapper.run().await.unwrap_err();
        assert!(matches!(err, MapReduceError::MixedAggregator { .. }));

        for queue in ["job-partition-0", "job-partition-0-metadata", "job-mappers-done"] {
            assert_eq!(broker.approximate_depth(queue).await.unwrap(), 0, "{}", queue);
        }
    }
}
