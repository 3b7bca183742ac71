//! Job start
//!
//! Lists the source buckets page by page, packs the listing into mappings,
//! persists them as the job's `mappings` object and hands the job to a
//! coordinator. Restarting a job whose mappings are already stored reuses
//! them, so mapping ids stay stable across driver retries.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{MapReduceError, MapReduceResult};
use crate::invoker::{invoke_accepted, Invocation, WorkerInvoker};
use crate::job::layout::{output_key, MAPPINGS_KEY};
use crate::job::{CoordinatorInput, JobDefinition, PartitionStrategy, ReduceTarget};
use crate::partition::{Mapping, Partitioner};
use crate::storage::{JobStore, ObjectInfo, ObjectStore};

/// Objects under `prefix` in `bucket`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePrefix {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
}

impl SourcePrefix {
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    /// Every object in the bucket
    pub fn bucket(bucket: impl Into<String>) -> Self {
        Self::new(bucket, "")
    }
}

/// Result of planning a job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPlan {
    pub mappings: Vec<Mapping>,
    /// Objects left out because they cannot be assigned whole
    pub skipped: Vec<ObjectInfo>,
}

impl JobPlan {
    pub fn total_bytes(&self) -> u64 {
        self.mappings.iter().map(|m| m.size).sum()
    }
}

pub struct JobDriver {
    store: Arc<dyn ObjectStore>,
    invoker: Arc<dyn WorkerInvoker>,
    config: EngineConfig,
    definition: JobDefinition,
}

impl JobDriver {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        invoker: Arc<dyn WorkerInvoker>,
        config: EngineConfig,
        definition: JobDefinition,
    ) -> Self {
        Self {
            store,
            invoker,
            config,
            definition,
        }
    }

    /// Partition every object under `sources` without touching job state
    pub async fn plan(&self, sources: &[SourcePrefix]) -> MapReduceResult<JobPlan> {
        let mut partitioner =
            Partitioner::new(self.config.chunk_size, self.definition.object_mode);
        let mut mappings = Vec::new();

        for source in sources {
            let mut token = None;
            loop {
                let page = self
                    .store
                    .list_page(&source.bucket, &source.prefix, token)
                    .await?;
                debug!(
                    bucket = %source.bucket,
                    objects = page.objects.len(),
                    "Listed source page"
                );
                mappings.extend(partitioner.push_page(&page.objects));
                match page.next_token {
                    Some(next) => token = Some(next),
                    None => break,
                }
            }
        }

        let skipped = partitioner.skipped().to_vec();
        mappings.extend(partitioner.finish());
        for object in &skipped {
            warn!(
                bucket = %object.bucket,
                key = %object.key,
                size = object.size,
                chunk_size = self.config.chunk_size,
                "Object larger than one mapping skipped"
            );
        }
        Ok(JobPlan { mappings, skipped })
    }

    /// Plan the job (or reuse its stored mappings), persist the mappings and
    /// invoke the coordinator
    pub async fn start(
        &self,
        job_id: &str,
        sources: &[SourcePrefix],
        num_queues: usize,
    ) -> MapReduceResult<JobPlan> {
        if num_queues == 0 {
            return Err(MapReduceError::invalid_job(
                job_id,
                "at least one reduce partition is required",
            ));
        }
        let job = JobStore::new(
            Arc::clone(&self.store),
            self.config.state_bucket.clone(),
            job_id,
        );

        let plan = match job.read_json::<Vec<Mapping>>(MAPPINGS_KEY).await? {
            Some(mappings) => {
                info!(job_id, mappings = mappings.len(), "Reusing stored mappings");
                JobPlan {
                    mappings,
                    skipped: Vec::new(),
                }
            }
            None => {
                let plan = self.plan(sources).await?;
                job.write_json(MAPPINGS_KEY, &plan.mappings).await?;
                plan
            }
        };
        if plan.mappings.is_empty() {
            warn!(job_id, "No source bytes to map");
        }

        let input = CoordinatorInput {
            job_id: job_id.to_string(),
            num_mappers: plan.mappings.len(),
            num_queues,
        };
        invoke_accepted(self.invoker.as_ref(), Invocation::Coordinator(input)).await?;
        info!(
            job_id,
            mappers = plan.mappings.len(),
            partitions = num_queues,
            bytes = plan.total_bytes(),
            "Job started"
        );
        Ok(plan)
    }
}

/// Read the output of a finished job.
///
/// Hashed jobs keep each key on exactly one partition, so the partition
/// outputs are disjoint and are combined by union. Randomized jobs have a
/// single output written by the final reducer.
pub async fn read_output(
    job: &JobStore,
    strategy: PartitionStrategy,
    num_queues: usize,
) -> MapReduceResult<BTreeMap<String, f64>> {
    if strategy.needs_final_stage() {
        let key = output_key(&ReduceTarget::Final.reducer_id());
        return Ok(job.require_json(&key).await?);
    }

    let mut output = BTreeMap::new();
    for index in 0..num_queues {
        let key = output_key(&ReduceTarget::Partition(index).reducer_id());
        let part: BTreeMap<String, f64> = job.require_json(&key).await?;
        output.extend(part);
    }
    Ok(output)
}
