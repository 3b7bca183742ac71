//! Batching shuffle writer

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::wire::{encode_slot, BatchCount};
use super::KeyRouter;
use crate::aggregation::{AggregatorType, ReduceMessage};
use crate::config::EngineConfig;
use crate::error::{MapReduceError, MapReduceResult};
use crate::job::{PartitionStrategy, QueueNames, ReduceTarget};
use crate::queue::{MessageQueue, OutgoingMessage};

/// Buffers keyed values per destination and sends them as K-slot batches.
///
/// Every batch holds exactly `batch_size` slots. Only the last batch of a
/// destination is padded, when [`ShuffleWriter::finish`] flushes it.
pub struct ShuffleWriter {
    queue: Arc<dyn MessageQueue>,
    names: QueueNames,
    producer_id: String,
    destinations: Vec<ReduceTarget>,
    router: KeyRouter,
    padding_kind: AggregatorType,
    batch_size: usize,
    retry_attempts: u32,
    retry_backoff: Duration,
    buffers: Vec<Vec<ReduceMessage>>,
    /// Batches sent per destination; also the next batch id
    batch_counts: Vec<u64>,
}

impl ShuffleWriter {
    /// Writer for a mapper feeding `partitions` first-stage reducers
    pub fn for_partitions(
        queue: Arc<dyn MessageQueue>,
        names: QueueNames,
        map_id: impl Into<String>,
        partitions: usize,
        strategy: PartitionStrategy,
        padding_kind: AggregatorType,
        config: &EngineConfig,
    ) -> Self {
        let map_id = map_id.into();
        let router = KeyRouter::new(strategy, partitions, &map_id);
        let destinations = (0..router.partitions())
            .map(ReduceTarget::Partition)
            .collect();
        Self::new(queue, names, map_id, destinations, router, padding_kind, config)
    }

    /// Writer for a first-stage reducer forwarding its result to the final
    /// reducer; the reducer id stands in for the map id
    pub fn for_final(
        queue: Arc<dyn MessageQueue>,
        names: QueueNames,
        reducer_id: impl Into<String>,
        padding_kind: AggregatorType,
        config: &EngineConfig,
    ) -> Self {
        let reducer_id = reducer_id.into();
        let router = KeyRouter::new(PartitionStrategy::Hashed, 1, &reducer_id);
        Self::new(
            queue,
            names,
            reducer_id,
            vec![ReduceTarget::Final],
            router,
            padding_kind,
            config,
        )
    }

    fn new(
        queue: Arc<dyn MessageQueue>,
        names: QueueNames,
        producer_id: String,
        destinations: Vec<ReduceTarget>,
        router: KeyRouter,
        padding_kind: AggregatorType,
        config: &EngineConfig,
    ) -> Self {
        let count = destinations.len();
        Self {
            queue,
            names,
            producer_id,
            destinations,
            router,
            padding_kind,
            batch_size: config.batch_size,
            retry_attempts: config.send_retry_attempts,
            retry_backoff: config.send_retry_backoff,
            buffers: vec![Vec::with_capacity(config.batch_size); count],
            batch_counts: vec![0; count],
        }
    }

    pub fn producer_id(&self) -> &str {
        &self.producer_id
    }

    /// Route one value, sending its destination's batch once it is full
    pub async fn write(&mut self, message: ReduceMessage) -> MapReduceResult<()> {
        let index = self.router.route(&message.key);
        self.buffers[index].push(message);
        if self.buffers[index].len() == self.batch_size {
            self.flush(index).await?;
        }
        Ok(())
    }

    pub async fn write_all(
        &mut self,
        messages: impl IntoIterator<Item = ReduceMessage>,
    ) -> MapReduceResult<()> {
        for message in messages {
            self.write(message).await?;
        }
        Ok(())
    }

    /// Flush partial batches with padding and publish the per-destination
    /// batch counts on the metadata channels. Destinations that received
    /// nothing still get a count of zero so their reducer can finish.
    pub async fn finish(mut self) -> MapReduceResult<Vec<(ReduceTarget, u64)>> {
        for index in 0..self.destinations.len() {
            if !self.buffers[index].is_empty() {
                self.flush(index).await?;
            }
        }

        let mut ledger = Vec::with_capacity(self.destinations.len());
        for (target, num_batches) in self.destinations.iter().zip(&self.batch_counts) {
            let count = BatchCount {
                map_id: self.producer_id.clone(),
                num_batches: *num_batches,
            };
            let queue_name = self.names.metadata(*target);
            self.send_with_retry(&queue_name, vec![count.to_message()?], *num_batches)
                .await?;
            ledger.push((*target, *num_batches));
        }
        debug!(producer = %self.producer_id, ?ledger, "Published batch counts");
        Ok(ledger)
    }

    async fn flush(&mut self, index: usize) -> MapReduceResult<()> {
        let mut slots = std::mem::take(&mut self.buffers[index]);
        slots.resize_with(self.batch_size, || {
            ReduceMessage::padding(self.padding_kind)
        });

        let batch_id = self.batch_counts[index];
        let entries = slots
            .iter()
            .enumerate()
            .map(|(slot, message)| encode_slot(&self.producer_id, batch_id, slot, message))
            .collect::<MapReduceResult<Vec<_>>>()?;

        let queue_name = self.names.shuffle(self.destinations[index]);
        self.send_with_retry(&queue_name, entries, batch_id).await?;
        self.batch_counts[index] += 1;
        Ok(())
    }

    /// Send until every entry is accepted, resending only rejected entries
    /// with doubling backoff
    async fn send_with_retry(
        &self,
        queue_name: &str,
        mut pending: Vec<OutgoingMessage>,
        batch_id: u64,
    ) -> MapReduceResult<()> {
        let mut backoff = self.retry_backoff;
        for attempt in 1..=self.retry_attempts {
            match self.queue.send_batch(queue_name, pending.clone()).await {
                Ok(outcome) if outcome.all_accepted() => return Ok(()),
                Ok(outcome) => {
                    warn!(
                        queue = queue_name,
                        producer = %self.producer_id,
                        batch_id,
                        attempt,
                        rejected = outcome.failed.len(),
                        "Batch partially rejected"
                    );
                    pending = outcome
                        .failed
                        .iter()
                        .filter_map(|&i| pending.get(i).cloned())
                        .collect();
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        queue = queue_name,
                        producer = %self.producer_id,
                        batch_id,
                        attempt,
                        error = %e,
                        "Batch send failed"
                    );
                }
                Err(e) => return Err(e.into()),
            }
            if attempt < self.retry_attempts {
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
        }
        Err(MapReduceError::SendFailed {
            queue: queue_name.to_string(),
            map_id: self.producer_id.clone(),
            batch_id,
            attempts: self.retry_attempts,
        })
    }
}
