//! Checkpointed reducer
//!
//! One reducer consumes one shuffle queue. The consume loop owns the dedupe
//! ledger and the interval accumulator; every `checkpoint_interval` messages
//! it hands the interval's values, a copy of the ledger, and the receipts
//! consumed so far to a background flush, then keeps consuming into a fresh
//! accumulator. The flush merges into the running output, writes the
//! checkpoint, and only then deletes the covered messages. The running output
//! is owned by whichever side currently holds it and comes back through the
//! flush's join handle.
//!
//! Failures are not retried here. The hosting platform re-invokes the
//! reducer, which resumes from the latest checkpoint.

pub mod checkpoint;
pub mod triggers;


pub use checkpoint::{BatchCountLedger, CheckpointPointer, CheckpointSnapshot};

use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::aggregation::{Aggregate, AggregatorType, MapAggregator};
use crate::config::EngineConfig;
use crate::dedupe::DedupeLedger;
use crate::error::{MapReduceError, MapReduceResult};
use crate::job::layout::output_key;
use crate::job::{JobDefinition, QueueNames, ReduceTarget, ReducerInput};
use crate::queue::{delete_all, MessageQueue};
use crate::shuffle::wire::decode_slot;
use crate::shuffle::{BatchCount, CompletionSignal, ShuffleWriter};
use crate::storage::JobStore;

/// Lifecycle of one reducer invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReducerState {
    Initializing,
    ResumingFromCheckpoint,
    Consuming,
    CheckpointFlushing,
    Draining,
    Finalizing,
    Done,
}

impl fmt::Display for ReducerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::ResumingFromCheckpoint => "resuming",
            Self::Consuming => "consuming",
            Self::CheckpointFlushing => "checkpoint-flushing",
            Self::Draining => "draining",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
        };
        write!(f, "{}", name)
    }
}

/// What one invocation did
#[derive(Debug, Clone, PartialEq)]
pub struct ReducerSummary {
    pub reducer_id: String,
    pub expected_batches: u64,
    pub resumed_from: Option<u64>,
    pub checkpoints_written: u64,
    pub messages_consumed: u64,
    pub duplicates_discarded: u64,
    pub keys: usize,
}

/// Background checkpoint flush. Owns everything it touches.
struct Flush {
    job: JobStore,
    queue: Arc<dyn MessageQueue>,
    queue_name: String,
    target: ReduceTarget,
    ordinal: u64,
    dedupe: DedupeLedger,
    interval: MapAggregator,
    running: MapAggregator,
    receipts: Vec<String>,
    delete_batch_size: usize,
}

impl Flush {
    async fn run(self) -> MapReduceResult<MapAggregator> {
        let Flush {
            job,
            queue,
            queue_name,
            target,
            ordinal,
            dedupe,
            interval,
            mut running,
            receipts,
            delete_batch_size,
        } = self;

        running.merge(interval)?;
        let snapshot = CheckpointSnapshot {
            ordinal,
            dedupe,
            output: running,
        };
        snapshot.persist(&job, target).await?;

        let deleted = receipts.len();
        delete_all(queue.as_ref(), &queue_name, receipts, delete_batch_size).await?;
        debug!(reducer = %target, ordinal, deleted, "Deleted checkpointed messages");
        Ok(snapshot.output)
    }
}

struct InFlightFlush {
    handle: JoinHandle<MapReduceResult<MapAggregator>>,
    covered: usize,
}

pub struct CheckpointedReducer {
    input: ReducerInput,
    job: JobStore,
    queue: Arc<dyn MessageQueue>,
    names: QueueNames,
    config: EngineConfig,
    default_kind: AggregatorType,
    forward_to_final: bool,
    state: ReducerState,
}

impl CheckpointedReducer {
    pub fn new(
        input: ReducerInput,
        job: JobStore,
        queue: Arc<dyn MessageQueue>,
        config: EngineConfig,
        definition: &JobDefinition,
    ) -> Self {
        let forward_to_final = definition.strategy.needs_final_stage()
            && matches!(input.queue_partition, ReduceTarget::Partition(_));
        Self {
            names: QueueNames::new(input.job_id.clone()),
            input,
            job,
            queue,
            config,
            default_kind: definition.aggregator,
            forward_to_final,
            state: ReducerState::Initializing,
        }
    }

    fn transition(&mut self, next: ReducerState) {
        debug!(from = %self.state, to = %next, "Reducer state");
        self.state = next;
    }

    pub async fn run(self) -> MapReduceResult<ReducerSummary> {
        let span = info_span!(
            "reducer",
            job_id = %self.input.job_id,
            reducer = %self.input.reducer_id
        );
        self.execute().instrument(span).await
    }

    async fn execute(mut self) -> MapReduceResult<ReducerSummary> {
        let target = self.input.queue_partition;
        info!(producers = self.input.num_mappers, "Reducer starting");

        // Initializing
        let expected_batches = self.collect_batch_counts(target).await?;
        let (mut ledger, mut running, resumed_from) =
            match CheckpointSnapshot::load_latest(&self.job, target).await? {
                Some(snapshot) => {
                    self.transition(ReducerState::ResumingFromCheckpoint);
                    if snapshot.dedupe.batch_size() != self.config.batch_size {
                        return Err(MapReduceError::invalid_config(
                            "batch_size",
                            self.config.batch_size,
                            format!(
                                "checkpoint {} was written with batch size {}",
                                snapshot.ordinal,
                                snapshot.dedupe.batch_size()
                            ),
                        ));
                    }
                    info!(
                        ordinal = snapshot.ordinal,
                        completed_batches = snapshot.dedupe.completed_batches(),
                        "Resuming from checkpoint"
                    );
                    (snapshot.dedupe, snapshot.output, Some(snapshot.ordinal))
                }
                None => (
                    DedupeLedger::new(self.config.batch_size),
                    MapAggregator::new(),
                    None,
                ),
            };
        let mut next_ordinal = resumed_from.map_or(0, |ordinal| ordinal + 1);

        // Consuming
        self.transition(ReducerState::Consuming);
        let queue_name = self.names.shuffle(target);
        let mut interval = MapAggregator::new();
        let mut pending: Vec<String> = Vec::new();
        let mut in_flight: Option<InFlightFlush> = None;
        let mut checkpoints_written = 0u64;
        let mut messages_consumed = 0u64;
        let mut duplicates_discarded = 0u64;

        while !triggers::is_drained(ledger.completed_batches(), expected_batches) {
            if triggers::must_wait_for_flush(
                in_flight.as_ref().map(|f| f.covered),
                pending.len(),
                self.config.backpressure_threshold,
            ) {
                debug!(pending = pending.len(), "Backpressure: waiting for checkpoint");
                if let Some(flush) = in_flight.take() {
                    running = flush.handle.await??;
                    checkpoints_written += 1;
                }
            }

            let received = self
                .queue
                .receive(
                    &queue_name,
                    self.config.receive_max_messages,
                    self.config.receive_wait,
                )
                .await?;
            for message in received {
                let slot = decode_slot(&queue_name, &message, self.default_kind)?;
                if slot.slot >= self.config.batch_size {
                    return Err(MapReduceError::malformed(
                        &queue_name,
                        format!(
                            "message {} addresses slot {} of a {}-slot batch",
                            message.message_id, slot.slot, self.config.batch_size
                        ),
                    ));
                }
                let outcome = ledger.observe(&slot.map_id, slot.batch_id, slot.slot);
                if outcome.is_accepted() {
                    interval.reduce(&slot.message)?;
                } else {
                    duplicates_discarded += 1;
                }
                messages_consumed += 1;
                pending.push(message.receipt_handle);
            }

            if triggers::should_flush(pending.len(), self.config.checkpoint_interval) {
                self.transition(ReducerState::CheckpointFlushing);
                if let Some(flush) = in_flight.take() {
                    running = flush.handle.await??;
                    checkpoints_written += 1;
                }
                in_flight = Some(self.spawn_flush(
                    target,
                    next_ordinal,
                    &ledger,
                    &mut interval,
                    std::mem::take(&mut running),
                    &mut pending,
                ));
                next_ordinal += 1;
                self.transition(ReducerState::Consuming);
            }
        }

        // Draining
        self.transition(ReducerState::Draining);
        if let Some(flush) = in_flight.take() {
            running = flush.handle.await??;
            checkpoints_written += 1;
        }
        if !pending.is_empty() || !interval.is_empty() {
            let flush = self.spawn_flush(
                target,
                next_ordinal,
                &ledger,
                &mut interval,
                std::mem::take(&mut running),
                &mut pending,
            );
            running = flush.handle.await??;
            checkpoints_written += 1;
        }

        // Finalizing
        self.transition(ReducerState::Finalizing);
        self.job
            .write_json(&output_key(&self.input.reducer_id), &running.to_scalars())
            .await?;
        if self.forward_to_final {
            self.forward(&running).await?;
        }
        let done_queue = match target {
            ReduceTarget::Partition(_) => self.names.reducers_done(),
            ReduceTarget::Final => self.names.final_done(),
        };
        self.queue
            .send(
                &done_queue,
                CompletionSignal::new(&self.input.reducer_id).to_message()?,
            )
            .await?;

        self.transition(ReducerState::Done);
        let summary = ReducerSummary {
            reducer_id: self.input.reducer_id.clone(),
            expected_batches,
            resumed_from,
            checkpoints_written,
            messages_consumed,
            duplicates_discarded,
            keys: running.len(),
        };
        info!(?summary, "Reducer finished");
        Ok(summary)
    }

    fn spawn_flush(
        &self,
        target: ReduceTarget,
        ordinal: u64,
        ledger: &DedupeLedger,
        interval: &mut MapAggregator,
        running: MapAggregator,
        pending: &mut Vec<String>,
    ) -> InFlightFlush {
        let receipts = std::mem::take(pending);
        let covered = receipts.len();
        let flush = Flush {
            job: self.job.clone(),
            queue: Arc::clone(&self.queue),
            queue_name: self.names.shuffle(target),
            target,
            ordinal,
            dedupe: ledger.clone(),
            interval: std::mem::take(interval),
            running,
            receipts,
            delete_batch_size: self.config.delete_batch_size,
        };
        debug!(ordinal, covered, "Starting checkpoint flush");
        InFlightFlush {
            handle: tokio::spawn(flush.run()),
            covered,
        }
    }

    /// Read producer batch counts from the metadata channel until every
    /// producer has reported, persisting them before the metadata messages
    /// are deleted
    async fn collect_batch_counts(&self, target: ReduceTarget) -> MapReduceResult<u64> {
        let mut counts = BatchCountLedger::load(&self.job, target).await?;
        if counts.producers() >= self.input.num_mappers {
            return Ok(counts.total_batches());
        }

        let metadata_queue = self.names.metadata(target);
        let mut receipts = Vec::new();
        while counts.producers() < self.input.num_mappers {
            let received = self
                .queue
                .receive(
                    &metadata_queue,
                    self.config.receive_max_messages,
                    self.config.receive_wait,
                )
                .await?;
            if received.is_empty() {
                debug!(
                    heard = counts.producers(),
                    expected = self.input.num_mappers,
                    "Waiting for batch counts"
                );
            }
            for message in received {
                let count = BatchCount::decode(&metadata_queue, &message)?;
                if !counts.insert(&count.map_id, count.num_batches) {
                    debug!(producer = %count.map_id, "Repeated batch count ignored");
                }
                receipts.push(message.receipt_handle);
            }
        }
        if counts.producers() > self.input.num_mappers {
            warn!(
                heard = counts.producers(),
                expected = self.input.num_mappers,
                "More producers reported than expected"
            );
        }

        counts.save(&self.job, target).await?;
        delete_all(
            self.queue.as_ref(),
            &metadata_queue,
            receipts,
            self.config.delete_batch_size,
        )
        .await?;
        info!(
            producers = counts.producers(),
            batches = counts.total_batches(),
            "Batch counts collected"
        );
        Ok(counts.total_batches())
    }

    /// Re-emit the merged partials into the final reducer's queue
    async fn forward(&self, running: &MapAggregator) -> MapReduceResult<()> {
        let mut writer = ShuffleWriter::for_final(
            Arc::clone(&self.queue),
            self.names.clone(),
            &self.input.reducer_id,
            self.default_kind,
            &self.config,
        );
        writer.write_all(running.to_messages()).await?;
        let ledger = writer.finish().await?;
        debug!(?ledger, "Forwarded partial result to final reducer");
        Ok(())
    }
}
