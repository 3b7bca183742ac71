//! Job coordinator
//!
//! Sequences mappers, reducers and (in randomized mode) the final reducer.
//! The only durable facts it trusts on restart are the marker objects; every
//! counter is rebuilt from the signal queues. Signal messages are deleted
//! only after the marker of the following phase is written, so a crash in
//! between redelivers them to the restarted coordinator.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, info_span, Instrument};

use crate::config::EngineConfig;
use crate::error::{MapReduceError, MapReduceResult};
use crate::invoker::{invoke_accepted, Invocation, WorkerInvoker};
use crate::job::layout::MAPPINGS_KEY;
use crate::job::{
    CoordinatorInput, MapperInput, Marker, PartitionStrategy, QueueNames, ReducerInput,
};
use crate::partition::Mapping;
use crate::queue::{delete_all, MessageQueue};
use crate::shuffle::CompletionSignal;
use crate::storage::JobStore;

/// What one coordinator invocation did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorSummary {
    pub mappers_invoked: bool,
    pub reducers_invoked: bool,
    pub final_reducer_invoked: bool,
    /// The job was already complete when this invocation started
    pub already_complete: bool,
}

pub struct Coordinator {
    input: CoordinatorInput,
    job: JobStore,
    queue: Arc<dyn MessageQueue>,
    invoker: Arc<dyn WorkerInvoker>,
    config: EngineConfig,
    strategy: PartitionStrategy,
    names: QueueNames,
}

impl Coordinator {
    pub fn new(
        input: CoordinatorInput,
        job: JobStore,
        queue: Arc<dyn MessageQueue>,
        invoker: Arc<dyn WorkerInvoker>,
        config: EngineConfig,
        strategy: PartitionStrategy,
    ) -> Self {
        Self {
            names: QueueNames::new(input.job_id.clone()),
            input,
            job,
            queue,
            invoker,
            config,
            strategy,
        }
    }

    pub async fn run(self) -> MapReduceResult<CoordinatorSummary> {
        let span = info_span!("coordinator", job_id = %self.input.job_id);
        self.execute().instrument(span).await
    }

    async fn execute(self) -> MapReduceResult<CoordinatorSummary> {
        let mut summary = CoordinatorSummary::default();
        if self.job.marker_exists(Marker::JobComplete).await? {
            info!("Job already complete");
            summary.already_complete = true;
            return Ok(summary);
        }

        if !self.job.marker_exists(Marker::ReducersInvoked).await? {
            summary.mappers_invoked = self.invoke_mappers().await?;
            let mapper_receipts = self
                .await_signals(&self.names.mappers_done(), self.input.num_mappers, "mappers")
                .await?;
            summary.reducers_invoked = self.invoke_reducers().await?;
            self.discard_signals(&self.names.mappers_done(), mapper_receipts)
                .await?;
        } else {
            info!("Reducers already invoked, skipping mapper phase");
        }

        if self.strategy.needs_final_stage() {
            // the reducers-done signals are gone once the final reducer was
            // invoked, so only its own signal is left to wait for
            if self.job.marker_exists(Marker::FinalReducerInvoked).await? {
                info!("Final reducer already invoked, skipping reducer phase");
            } else {
                let reducer_receipts = self
                    .await_signals(
                        &self.names.reducers_done(),
                        self.input.num_queues,
                        "reducers",
                    )
                    .await?;
                summary.final_reducer_invoked = self.invoke_final_reducer().await?;
                self.discard_signals(&self.names.reducers_done(), reducer_receipts)
                    .await?;
            }
            let final_receipts = self
                .await_signals(&self.names.final_done(), 1, "final reducer")
                .await?;
            self.job.write_marker(Marker::JobComplete).await?;
            self.discard_signals(&self.names.final_done(), final_receipts)
                .await?;
        } else {
            let reducer_receipts = self
                .await_signals(&self.names.reducers_done(), self.input.num_queues, "reducers")
                .await?;
            self.job.write_marker(Marker::JobComplete).await?;
            self.discard_signals(&self.names.reducers_done(), reducer_receipts)
                .await?;
        }

        info!(?summary, "Job complete");
        Ok(summary)
    }

    /// Invoke one mapper per mapping unless `mappers-invoked` exists.
    /// Returns whether invocations were issued.
    pub async fn invoke_mappers(&self) -> MapReduceResult<bool> {
        if self.job.marker_exists(Marker::MappersInvoked).await? {
            debug!("Mappers already invoked");
            return Ok(false);
        }
        let mappings: Vec<Mapping> = self.job.require_json(MAPPINGS_KEY).await?;
        if mappings.len() != self.input.num_mappers {
            return Err(MapReduceError::invalid_job(
                &self.input.job_id,
                format!(
                    "{} mappings stored but {} mappers expected",
                    mappings.len(),
                    self.input.num_mappers
                ),
            ));
        }

        for mapping in mappings {
            let input = MapperInput {
                job_id: self.input.job_id.clone(),
                mapping,
                num_queues: self.input.num_queues,
            };
            invoke_accepted(self.invoker.as_ref(), Invocation::Mapper(input)).await?;
        }
        self.job.write_marker(Marker::MappersInvoked).await?;
        info!(mappers = self.input.num_mappers, "Mappers invoked");
        Ok(true)
    }

    /// Invoke one reducer per partition unless `reducers-invoked` exists.
    /// Returns whether invocations were issued.
    pub async fn invoke_reducers(&self) -> MapReduceResult<bool> {
        if self.job.marker_exists(Marker::ReducersInvoked).await? {
            debug!("Reducers already invoked");
            return Ok(false);
        }
        for index in 0..self.input.num_queues {
            let input =
                ReducerInput::for_partition(&self.input.job_id, index, self.input.num_mappers);
            invoke_accepted(self.invoker.as_ref(), Invocation::Reducer(input)).await?;
        }
        self.job.write_marker(Marker::ReducersInvoked).await?;
        info!(reducers = self.input.num_queues, "Reducers invoked");
        Ok(true)
    }

    /// Invoke the final reducer once, guarded by `final-reducer-invoked`
    pub async fn invoke_final_reducer(&self) -> MapReduceResult<bool> {
        if self.job.marker_exists(Marker::FinalReducerInvoked).await? {
            debug!("Final reducer already invoked");
            return Ok(false);
        }
        let input = ReducerInput::for_final(&self.input.job_id, self.input.num_queues);
        invoke_accepted(self.invoker.as_ref(), Invocation::Reducer(input)).await?;
        self.job.write_marker(Marker::FinalReducerInvoked).await?;
        info!("Final reducer invoked");
        Ok(true)
    }

    /// Poll a completion queue until `expected` distinct workers reported.
    /// Returns the receipts of every signal consumed, duplicates included.
    async fn await_signals(
        &self,
        queue_name: &str,
        expected: usize,
        phase: &str,
    ) -> MapReduceResult<Vec<String>> {
        let mut finished: HashSet<String> = HashSet::new();
        let mut receipts = Vec::new();
        let mut received = 0usize;

        while finished.len() < expected {
            let messages = self
                .queue
                .receive(
                    queue_name,
                    self.config.receive_max_messages,
                    self.config.receive_wait,
                )
                .await?;
            if messages.is_empty() {
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            }

            for message in messages {
                let signal = CompletionSignal::decode(queue_name, &message)?;
                if !finished.insert(signal.worker_id.clone()) {
                    debug!(phase, worker = %signal.worker_id, "Repeated completion signal");
                }
                receipts.push(message.receipt_handle);
                received += 1;
                if received % self.config.progress_log_interval == 0 {
                    self.log_progress(queue_name, phase, finished.len(), expected)
                        .await;
                }
            }
        }
        info!(phase, finished = finished.len(), "All workers finished");
        Ok(receipts)
    }

    async fn log_progress(
        &self,
        queue_name: &str,
        phase: &str,
        finished: usize,
        expected: usize,
    ) {
        match self.queue.approximate_depth(queue_name).await {
            Ok(depth) => {
                info!(phase, finished, expected, queued = depth, "Waiting for workers")
            }
            Err(e) => debug!(phase, error = %e, "Queue depth unavailable"),
        }
    }

    async fn discard_signals(
        &self,
        queue_name: &str,
        receipts: Vec<String>,
    ) -> MapReduceResult<()> {
        delete_all(
            self.queue.as_ref(),
            queue_name,
            receipts,
            self.config.delete_batch_size,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
