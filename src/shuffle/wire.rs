//! Queue wire format
//!
//! A batch is sent as K independent queue messages, one per slot. Each slot
//! carries its batch coordinates as message attributes so the reducer can
//! account for slots individually:
//!
//! ```text
//! body:       {"key": "...", "value": 1.0, "empty": false, "aggregator": "sum", "count": 1}
//! attributes: map-id = <mapID>, batch-id = <n>, message-id = <slot 0..K-1>
//! ```
//!
//! `aggregator` and `count` are optional on decode; absent fields take the
//! job's declared kind and a weight of one.

use crate::aggregation::{AggregatorType, ReduceMessage};
use crate::error::{MapReduceError, MapReduceResult};
use crate::queue::{OutgoingMessage, ReceivedMessage};
use serde::{Deserialize, Serialize};

pub const MAP_ID_ATTRIBUTE: &str = "map-id";
pub const BATCH_ID_ATTRIBUTE: &str = "batch-id";
pub const MESSAGE_ID_ATTRIBUTE: &str = "message-id";

#[derive(Debug, Serialize, Deserialize)]
struct SlotBody {
    key: String,
    value: f64,
    empty: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    aggregator: Option<AggregatorType>,
    #[serde(default = "default_count", skip_serializing_if = "is_default_count")]
    count: u64,
}

fn default_count() -> u64 {
    1
}

fn is_default_count(count: &u64) -> bool {
    *count == 1
}

/// A decoded slot and its batch coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct SlotEnvelope {
    pub map_id: String,
    pub batch_id: u64,
    pub slot: usize,
    pub message: ReduceMessage,
}

/// Encode one slot of a batch
pub fn encode_slot(
    map_id: &str,
    batch_id: u64,
    slot: usize,
    message: &ReduceMessage,
) -> MapReduceResult<OutgoingMessage> {
    let body = SlotBody {
        key: message.key.clone(),
        value: message.value,
        empty: message.empty,
        aggregator: Some(message.aggregator),
        count: message.count,
    };
    Ok(OutgoingMessage::new(serde_json::to_string(&body)?)
        .with_attribute(MAP_ID_ATTRIBUTE, map_id)
        .with_attribute(BATCH_ID_ATTRIBUTE, batch_id)
        .with_attribute(MESSAGE_ID_ATTRIBUTE, slot))
}

/// Decode a delivered slot. Any missing or unparseable part is a data error.
pub fn decode_slot(
    queue: &str,
    received: &ReceivedMessage,
    default_kind: AggregatorType,
) -> MapReduceResult<SlotEnvelope> {
    let body: SlotBody = serde_json::from_str(&received.body).map_err(|e| {
        MapReduceError::malformed(queue, format!("message {}: {}", received.message_id, e))
    })?;
    let map_id = attribute(queue, received, MAP_ID_ATTRIBUTE)?.to_string();
    let batch_id = parse_attribute(queue, received, BATCH_ID_ATTRIBUTE)?;
    let slot = parse_attribute(queue, received, MESSAGE_ID_ATTRIBUTE)?;

    let message = ReduceMessage {
        key: body.key,
        value: body.value,
        aggregator: body.aggregator.unwrap_or(default_kind),
        count: body.count,
        empty: body.empty,
    };
    Ok(SlotEnvelope {
        map_id,
        batch_id,
        slot,
        message,
    })
}

fn attribute<'a>(
    queue: &str,
    received: &'a ReceivedMessage,
    name: &str,
) -> MapReduceResult<&'a str> {
    received
        .attributes
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| {
            MapReduceError::malformed(
                queue,
                format!("message {} lacks attribute {}", received.message_id, name),
            )
        })
}

fn parse_attribute<T: std::str::FromStr>(
    queue: &str,
    received: &ReceivedMessage,
    name: &str,
) -> MapReduceResult<T> {
    let raw = attribute(queue, received, name)?;
    raw.parse().map_err(|_| {
        MapReduceError::malformed(
            queue,
            format!(
                "message {} has non-numeric {} {:?}",
                received.message_id, name, raw
            ),
        )
    })
}

/// Number of batches one producer sent to one reducer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCount {
    #[serde(rename = "mapID")]
    pub map_id: String,
    #[serde(rename = "numBatches")]
    pub num_batches: u64,
}

impl BatchCount {
    pub fn to_message(&self) -> MapReduceResult<OutgoingMessage> {
        Ok(OutgoingMessage::new(serde_json::to_string(self)?))
    }

    pub fn decode(queue: &str, received: &ReceivedMessage) -> MapReduceResult<Self> {
        serde_json::from_str(&received.body).map_err(|e| {
            MapReduceError::malformed(queue, format!("metadata {}: {}", received.message_id, e))
        })
    }
}

/// "Worker finished" signal sent to the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionSignal {
    #[serde(rename = "workerID")]
    pub worker_id: String,
}

impl CompletionSignal {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
        }
    }

    pub fn to_message(&self) -> MapReduceResult<OutgoingMessage> {
        Ok(OutgoingMessage::new(serde_json::to_string(self)?))
    }

    pub fn decode(queue: &str, received: &ReceivedMessage) -> MapReduceResult<Self> {
        serde_json::from_str(&received.body).map_err(|e| {
            MapReduceError::malformed(queue, format!("signal {}: {}", received.message_id, e))
        })
    }
}
