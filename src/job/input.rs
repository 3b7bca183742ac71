//! Worker invocation payloads
//!
//! These are the only inputs a worker receives from whoever invokes it.
//! Field names follow the JSON contract shared with the deploy tooling.

use super::layout::ReduceTarget;
use crate::partition::Mapping;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapperInput {
    #[serde(rename = "jobID")]
    pub job_id: String,
    pub mapping: Mapping,
    pub num_queues: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReducerInput {
    #[serde(rename = "jobID")]
    pub job_id: String,
    #[serde(rename = "reducerID")]
    pub reducer_id: String,
    pub queue_partition: ReduceTarget,
    /// Distinct producers feeding this reducer: mappers for a partition
    /// reducer, first-stage reducers for the final reducer
    #[serde(alias = "numReducers")]
    pub num_mappers: usize,
}

impl ReducerInput {
    pub fn for_partition(job_id: impl Into<String>, index: usize, num_mappers: usize) -> Self {
        let target = ReduceTarget::Partition(index);
        Self {
            job_id: job_id.into(),
            reducer_id: target.reducer_id(),
            queue_partition: target,
            num_mappers,
        }
    }

    pub fn for_final(job_id: impl Into<String>, num_reducers: usize) -> Self {
        Self {
            job_id: job_id.into(),
            reducer_id: ReduceTarget::Final.reducer_id(),
            queue_partition: ReduceTarget::Final,
            num_mappers: num_reducers,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorInput {
    #[serde(rename = "jobID")]
    pub job_id: String,
    pub num_mappers: usize,
    pub num_queues: usize,
}
