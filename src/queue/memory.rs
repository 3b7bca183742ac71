//! In-memory at-least-once queue broker
//!
//! Emulates a hosted queue service closely enough to exercise redelivery:
//! deliveries hide a message for the visibility timeout, undeleted messages
//! reappear, and messages received too often are moved to a dead-letter
//! queue. Fault injection hooks let tests reject sends.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    MessageQueue, OutgoingMessage, QueueError, QueueResult, ReceivedMessage, SendOutcome,
    MAX_BATCH_ENTRIES,
};

/// Upper bound on a single wait slice while long-polling, so visibility
/// expiry is noticed without a send to wake the poller
const POLL_SLICE: Duration = Duration::from_millis(25);

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    body: String,
    attributes: std::collections::BTreeMap<String, String>,
    receive_count: u32,
}

#[derive(Debug)]
struct InFlight {
    message: StoredMessage,
    visible_at: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<StoredMessage>,
    in_flight: HashMap<String, InFlight>,
    /// Number of upcoming send entries to reject
    failing_sends: usize,
}

impl QueueState {
    fn requeue_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.visible_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();
        for receipt in expired {
            if let Some(flight) = self.in_flight.remove(&receipt) {
                self.ready.push_back(flight.message);
            }
        }
    }
}

#[derive(Clone)]
pub struct InMemoryQueue {
    queues: Arc<Mutex<HashMap<String, QueueState>>>,
    notify: Arc<Notify>,
    visibility_timeout: Duration,
    max_receive_count: Option<u32>,
}

impl InMemoryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
            notify: Arc::new(Notify::new()),
            visibility_timeout,
            max_receive_count: None,
        }
    }

    /// Route messages delivered more than `max_receives` times to
    /// `<queue>-dlq` instead of delivering them again
    pub fn with_dead_letter(mut self, max_receives: u32) -> Self {
        self.max_receive_count = Some(max_receives);
        self
    }

    /// Name of the dead-letter queue paired with `queue`
    pub fn dead_letter_queue(queue: &str) -> String {
        format!("{}-dlq", queue)
    }

    /// Reject the next `count` send entries on `queue`
    pub async fn fail_next_sends(&self, queue: &str, count: usize) {
        self.queues
            .lock()
            .await
            .entry(queue.to_string())
            .or_default()
            .failing_sends = count;
    }

    /// Make every in-flight message on `queue` visible again, as if its
    /// visibility timeout had elapsed
    pub async fn expire_in_flight(&self, queue: &str) {
        let mut queues = self.queues.lock().await;
        if let Some(state) = queues.get_mut(queue) {
            let flights: Vec<InFlight> = state.in_flight.drain().map(|(_, f)| f).collect();
            state.ready.extend(flights.into_iter().map(|f| f.message));
        }
        drop(queues);
        self.notify.notify_waiters();
    }

    /// Messages received but neither deleted nor returned to the queue
    pub async fn in_flight_count(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .await
            .get(queue)
            .map_or(0, |state| state.in_flight.len())
    }

    fn check_limit(operation: &str, len: usize) -> QueueResult<()> {
        if len > MAX_BATCH_ENTRIES {
            return Err(QueueError::limit_exceeded(format!(
                "{} of {} entries exceeds the limit of {}",
                operation, len, MAX_BATCH_ENTRIES
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn send_batch(
        &self,
        queue: &str,
        messages: Vec<OutgoingMessage>,
    ) -> QueueResult<SendOutcome> {
        Self::check_limit("send", messages.len())?;

        let mut outcome = SendOutcome::default();
        {
            let mut queues = self.queues.lock().await;
            let state = queues.entry(queue.to_string()).or_default();
            for (index, message) in messages.into_iter().enumerate() {
                if state.failing_sends > 0 {
                    state.failing_sends -= 1;
                    outcome.failed.push(index);
                    continue;
                }
                state.ready.push_back(StoredMessage {
                    id: Uuid::new_v4().to_string(),
                    body: message.body,
                    attributes: message.attributes,
                    receive_count: 0,
                });
            }
        }
        self.notify.notify_waiters();
        Ok(outcome)
    }

    async fn receive(
        &self,
        queue: &str,
        max_messages: usize,
        wait: Duration,
    ) -> QueueResult<Vec<ReceivedMessage>> {
        Self::check_limit("receive", max_messages)?;
        let deadline = Instant::now() + wait;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut queues = self.queues.lock().await;
                let state = queues.entry(queue.to_string()).or_default();
                let now = Instant::now();
                state.requeue_expired(now);

                let mut delivered = Vec::new();
                let mut dead = Vec::new();
                while delivered.len() < max_messages {
                    let Some(mut message) = state.ready.pop_front() else {
                        break;
                    };
                    if self
                        .max_receive_count
                        .is_some_and(|max| message.receive_count >= max)
                    {
                        dead.push(message);
                        continue;
                    }
                    message.receive_count += 1;
                    let receipt = Uuid::new_v4().to_string();
                    delivered.push(ReceivedMessage {
                        message_id: message.id.clone(),
                        receipt_handle: receipt.clone(),
                        body: message.body.clone(),
                        attributes: message.attributes.clone(),
                        receive_count: message.receive_count,
                    });
                    state.in_flight.insert(
                        receipt,
                        InFlight {
                            message,
                            visible_at: now + self.visibility_timeout,
                        },
                    );
                }

                if !dead.is_empty() {
                    warn!(queue, count = dead.len(), "Moving messages to dead-letter queue");
                    queues
                        .entry(Self::dead_letter_queue(queue))
                        .or_default()
                        .ready
                        .extend(dead);
                }

                if !delivered.is_empty() {
                    debug!(queue, count = delivered.len(), "Delivered messages");
                    return Ok(delivered);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let _ = tokio::time::timeout((deadline - now).min(POLL_SLICE), notified).await;
        }
    }

    async fn delete_batch(&self, queue: &str, receipts: Vec<String>) -> QueueResult<()> {
        Self::check_limit("delete", receipts.len())?;
        let mut queues = self.queues.lock().await;
        if let Some(state) = queues.get_mut(queue) {
            for receipt in receipts {
                state.in_flight.remove(&receipt);
            }
        }
        Ok(())
    }

    async fn approximate_depth(&self, queue: &str) -> QueueResult<usize> {
        Ok(self
            .queues
            .lock()
            .await
            .get(queue)
            .map_or(0, |state| state.ready.len()))
    }
}
