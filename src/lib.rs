//! # serverless-mr
//!
//! A fault-tolerant MapReduce engine for ephemeral workers.
//!
//! A driver packs source objects into size-bounded mappings; mappers shuffle
//! keyed values through message queues in fixed-size padded batches;
//! checkpointed reducers deduplicate redelivered slots and merge partial
//! aggregates; a coordinator sequences the phases behind idempotency markers
//! so any worker can crash and be re-invoked.
//!
//! ## Modules
//!
//! - `aggregation` - Sum/Max/Min/Avg merge algebra and keyed aggregation
//! - `partition` - Size-bounded mapping planner
//! - `shuffle` - Key routing, slot wire format and the batching shuffle writer
//! - `dedupe` - Per-batch slot ledger
//! - `reducer` - Checkpointed reducer and its durable snapshots
//! - `coordinator` - Marker-guarded phase sequencing
//! - `mapper` - Mapper worker
//! - `job` - Typed job definitions, invocation payloads, key layout
//! - `driver` - Job planning and start
//! - `invoker` - Worker invocation seam and the in-process invoker
//! - `storage` - Object store abstraction and backends
//! - `queue` - Message queue abstraction and in-memory broker
//! - `config` - Engine tunables
//! - `error` - Error taxonomy
pub mod aggregation;
pub mod config;
pub mod coordinator;
pub mod dedupe;
pub mod driver;
pub mod error;
pub mod invoker;
pub mod job;
pub mod mapper;
pub mod partition;
pub mod queue;
pub mod reducer;
pub mod shuffle;
pub mod storage;

pub use config::EngineConfig;
pub use error::{MapReduceError, MapReduceResult};
