//! Message queue abstraction
//!
//! The shuffle runs over at-least-once queues: a received message stays
//! invisible for a visibility timeout and is redelivered unless its receipt
//! handle is deleted first. Batch operations are capped at
//! [`MAX_BATCH_ENTRIES`] entries, matching hosted queue service limits.

pub mod error;
pub mod memory;

pub use error::{QueueError, QueueResult};
pub use memory::InMemoryQueue;

use async_trait::async_trait;
use futures::future::try_join_all;
use std::collections::BTreeMap;
use std::time::Duration;

/// Maximum entries in one send, receive or delete call
pub const MAX_BATCH_ENTRIES: usize = 10;

/// A message to enqueue
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub body: String,
    pub attributes: BTreeMap<String, String>,
}

impl OutgoingMessage {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.attributes.insert(name.into(), value.to_string());
        self
    }
}

/// A delivered message
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: String,
    /// Handle used to delete this delivery; a redelivery gets a new one
    pub receipt_handle: String,
    pub body: String,
    pub attributes: BTreeMap<String, String>,
    /// How many times this message has been delivered, including this one
    pub receive_count: u32,
}

/// Per-entry result of a batch send
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendOutcome {
    /// Indices (into the request) of entries that were not accepted
    pub failed: Vec<usize>,
}

impl SendOutcome {
    pub fn all_accepted(&self) -> bool {
        self.failed.is_empty()
    }
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Enqueue up to [`MAX_BATCH_ENTRIES`] messages
    async fn send_batch(
        &self,
        queue: &str,
        messages: Vec<OutgoingMessage>,
    ) -> QueueResult<SendOutcome>;

    /// Receive up to `max_messages`, waiting at most `wait` for the first one
    async fn receive(
        &self,
        queue: &str,
        max_messages: usize,
        wait: Duration,
    ) -> QueueResult<Vec<ReceivedMessage>>;

    /// Delete deliveries by receipt handle; stale handles are ignored
    async fn delete_batch(&self, queue: &str, receipts: Vec<String>) -> QueueResult<()>;

    /// Approximate number of visible messages. Not a correctness signal.
    async fn approximate_depth(&self, queue: &str) -> QueueResult<usize>;

    /// Enqueue a single message
    async fn send(&self, queue: &str, message: OutgoingMessage) -> QueueResult<()> {
        let outcome = self.send_batch(queue, vec![message]).await?;
        if outcome.all_accepted() {
            Ok(())
        } else {
            Err(QueueError::unavailable(format!(
                "message to {} was not accepted",
                queue
            )))
        }
    }
}

/// Delete receipts in chunks of at most `chunk_size`, issuing the chunk
/// calls concurrently
pub async fn delete_all(
    queue: &dyn MessageQueue,
    name: &str,
    receipts: Vec<String>,
    chunk_size: usize,
) -> QueueResult<()> {
    let chunk_size = chunk_size.clamp(1, MAX_BATCH_ENTRIES);
    try_join_all(
        receipts
            .chunks(chunk_size)
            .map(|chunk| queue.delete_batch(name, chunk.to_vec())),
    )
    .await?;
    Ok(())
}
