//! Durable key layout and queue naming for a job
//!
//! Object keys are relative to the job root (see [`JobStore`]); queue names
//! are derived from the job id so concurrent jobs never share a queue.
//!
//! [`JobStore`]: crate::storage::JobStore

use serde::{Deserialize, Serialize};
use std::fmt;

/// Mapping list written by whoever starts the job
pub const MAPPINGS_KEY: &str = "mappings";

/// Idempotency markers read by the coordinator on restart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    MappersInvoked,
    ReducersInvoked,
    FinalReducerInvoked,
    JobComplete,
}

impl Marker {
    pub fn key(&self) -> &'static str {
        match self {
            Self::MappersInvoked => "mappers-invoked",
            Self::ReducersInvoked => "reducers-invoked",
            Self::FinalReducerInvoked => "final-reducer-invoked",
            Self::JobComplete => "job-complete",
        }
    }
}

/// Which reduce stage a reducer belongs to.
///
/// Serialized as the partition index or `"final"`, the same text used in
/// checkpoint keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ReduceTarget {
    /// First-stage reducer of one shuffle partition
    Partition(usize),
    /// Second-stage reducer merging first-stage outputs
    Final,
}

impl fmt::Display for ReduceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Partition(index) => write!(f, "{}", index),
            Self::Final => write!(f, "final"),
        }
    }
}

impl From<ReduceTarget> for String {
    fn from(target: ReduceTarget) -> Self {
        target.to_string()
    }
}

impl TryFrom<String> for ReduceTarget {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == "final" {
            return Ok(Self::Final);
        }
        value
            .parse()
            .map(Self::Partition)
            .map_err(|_| format!("invalid reduce target {:?}", value))
    }
}

impl ReduceTarget {
    /// Deterministic identity of the reducer consuming this target
    pub fn reducer_id(&self) -> String {
        match self {
            Self::Partition(index) => format!("partition-{}", index),
            Self::Final => "final".to_string(),
        }
    }
}

/// Legacy per-mapper metadata blob
pub fn mapper_metadata_key(map_id: &str) -> String {
    format!("metadata/{}", map_id)
}

/// One part of a checkpoint snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointPart {
    Dedupe,
    Output,
}

impl CheckpointPart {
    fn name(&self) -> &'static str {
        match self {
            Self::Dedupe => "dedupe",
            Self::Output => "output",
        }
    }
}

pub fn checkpoint_key(target: ReduceTarget, ordinal: u64, part: CheckpointPart) -> String {
    format!("checkpoints/{}/{}/{}", target, ordinal, part.name())
}

/// Pointer naming the newest fully written checkpoint of a reducer
pub fn checkpoint_pointer_key(target: ReduceTarget) -> String {
    format!("checkpoints/{}/latest", target)
}

/// Per-mapper batch counts collected from the metadata channel
pub fn batch_counts_key(target: ReduceTarget) -> String {
    format!("checkpoints/{}/batch-counts", target)
}

pub fn output_key(reducer_id: &str) -> String {
    format!("output/{}", reducer_id)
}

/// Queue names of one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    job_id: String,
}

impl QueueNames {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
        }
    }

    /// Shuffle queue consumed by one reducer
    pub fn shuffle(&self, target: ReduceTarget) -> String {
        match target {
            ReduceTarget::Partition(index) => format!("{}-partition-{}", self.job_id, index),
            ReduceTarget::Final => format!("{}-final", self.job_id),
        }
    }

    /// Metadata channel carrying per-mapper batch counts for one reducer
    pub fn metadata(&self, target: ReduceTarget) -> String {
        format!("{}-metadata", self.shuffle(target))
    }

    pub fn mappers_done(&self) -> String {
        format!("{}-mappers-done", self.job_id)
    }

    pub fn reducers_done(&self) -> String {
        format!("{}-reducers-done", self.job_id)
    }

    pub fn final_done(&self) -> String {
        format!("{}-final-done", self.job_id)
    }
}
