//! Durable reducer checkpoints
//!
//! A checkpoint is written as two parts under its ordinal, then published
//! by rewriting the `latest` pointer. A crash between the part writes and
//! the pointer leaves the previous checkpoint in force, so a reader never
//! sees a half-written snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::aggregation::MapAggregator;
use crate::dedupe::DedupeLedger;
use crate::error::{MapReduceError, MapReduceResult};
use crate::job::layout::{
    batch_counts_key, checkpoint_key, checkpoint_pointer_key, CheckpointPart,
};
use crate::job::ReduceTarget;
use crate::storage::JobStore;

/// Names the newest fully written checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointPointer {
    pub ordinal: u64,
    pub completed_batches: u64,
    pub written_at: DateTime<Utc>,
}

/// Point-in-time reducer progress.
///
/// `output` is the cumulative merged output up to this checkpoint, so the
/// latest snapshot alone is enough to resume.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointSnapshot {
    pub ordinal: u64,
    pub dedupe: DedupeLedger,
    pub output: MapAggregator,
}

impl CheckpointSnapshot {
    pub async fn load_latest(
        job: &JobStore,
        target: ReduceTarget,
    ) -> MapReduceResult<Option<Self>> {
        let Some(pointer) = job
            .read_json::<CheckpointPointer>(&checkpoint_pointer_key(target))
            .await?
        else {
            return Ok(None);
        };

        let dedupe_key = checkpoint_key(target, pointer.ordinal, CheckpointPart::Dedupe);
        let output_key = checkpoint_key(target, pointer.ordinal, CheckpointPart::Output);
        let (dedupe, output) = tokio::try_join!(
            job.require_json::<DedupeLedger>(&dedupe_key),
            job.require_json::<MapAggregator>(&output_key),
        )?;

        if dedupe.completed_batches() != pointer.completed_batches {
            return Err(MapReduceError::invalid_job(
                job.job_id(),
                format!(
                    "checkpoint {} of reducer {} records {} completed batches, ledger has {}",
                    pointer.ordinal,
                    target,
                    pointer.completed_batches,
                    dedupe.completed_batches()
                ),
            ));
        }

        Ok(Some(Self {
            ordinal: pointer.ordinal,
            dedupe,
            output,
        }))
    }

    /// Write both parts, publish the pointer, then drop the superseded
    /// checkpoint.
    ///
    /// Pruning is best effort. A failed delete only leaves an unreferenced
    /// ordinal behind; loads go through the `latest` pointer and never read
    /// it, and the next checkpoint writes a higher ordinal.
    pub async fn persist(&self, job: &JobStore, target: ReduceTarget) -> MapReduceResult<()> {
        let dedupe_key = checkpoint_key(target, self.ordinal, CheckpointPart::Dedupe);
        let output_key = checkpoint_key(target, self.ordinal, CheckpointPart::Output);
        tokio::try_join!(
            job.write_json(&dedupe_key, &self.dedupe),
            job.write_json(&output_key, &self.output),
        )?;

        let pointer = CheckpointPointer {
            ordinal: self.ordinal,
            completed_batches: self.dedupe.completed_batches(),
            written_at: Utc::now(),
        };
        job.write_json(&checkpoint_pointer_key(target), &pointer)
            .await?;
        debug!(
            reducer = %target,
            ordinal = self.ordinal,
            completed_batches = pointer.completed_batches,
            keys = self.output.len(),
            "Checkpoint written"
        );

        if let Some(previous) = self.ordinal.checked_sub(1) {
            for part in [CheckpointPart::Dedupe, CheckpointPart::Output] {
                let key = job.full_key(&checkpoint_key(target, previous, part));
                if let Err(e) = job.store().delete(job.bucket(), &key).await {
                    warn!(key = %key, error = %e, "Failed to remove superseded checkpoint");
                }
            }
        }
        Ok(())
    }
}

/// Batch counts announced by each producer feeding one reducer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCountLedger {
    counts: BTreeMap<String, u64>,
}

impl BatchCountLedger {
    pub async fn load(job: &JobStore, target: ReduceTarget) -> MapReduceResult<Self> {
        Ok(job
            .read_json(&batch_counts_key(target))
            .await?
            .unwrap_or_default())
    }

    pub async fn save(&self, job: &JobStore, target: ReduceTarget) -> MapReduceResult<()> {
        Ok(job.write_json(&batch_counts_key(target), self).await?)
    }

    /// Record a producer's count; a repeated announcement is ignored
    pub fn insert(&mut self, producer: &str, num_batches: u64) -> bool {
        if self.counts.contains_key(producer) {
            return false;
        }
        self.counts.insert(producer.to_string(), num_batches);
        true
    }

    /// Producers heard from
    pub fn producers(&self) -> usize {
        self.counts.len()
    }

    pub fn total_batches(&self) -> u64 {
        self.counts.values().sum()
    }
}
