//! Engine tunables
//!
//! Every threshold the shuffle/reduce pipeline depends on lives here rather
//! than in the algorithms. The defaults sit below hosted queue backlog limits:
//! a reducer never holds more than `backpressure_threshold` undeleted
//! messages, and queue batch calls never exceed ten entries.

use crate::error::{MapReduceError, MapReduceResult};
use crate::queue::MAX_BATCH_ENTRIES;
use crate::storage::StorageConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 64 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 64 * 1024 * 1024;

/// Configuration shared by every worker of a job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Slots per shuffle batch (K)
    pub batch_size: usize,

    /// Upper bound on the bytes assigned to one mapping (C)
    pub chunk_size: u64,

    /// Messages consumed between reducer checkpoints
    pub checkpoint_interval: usize,

    /// Messages consumed since the last completed checkpoint at which the
    /// reducer stops consuming until that checkpoint finishes
    pub backpressure_threshold: usize,

    /// Long-poll wait for queue receives
    #[serde(with = "humantime_serde")]
    pub receive_wait: Duration,

    /// Messages requested per receive call
    pub receive_max_messages: usize,

    /// Sleep between empty polls of the coordinator's signal queues
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Log coordinator progress every N received signals
    pub progress_log_interval: usize,

    /// Attempts to deliver one shuffle batch before failing the mapper
    pub send_retry_attempts: u32,

    /// Initial backoff between batch send attempts, doubled each retry
    #[serde(with = "humantime_serde")]
    pub send_retry_backoff: Duration,

    /// Receipt handles per queue delete call
    pub delete_batch_size: usize,

    /// Visibility timeout of the in-memory broker
    #[serde(with = "humantime_serde")]
    pub visibility_timeout: Duration,

    /// Times the in-process invoker runs a failing invocation
    pub invocation_attempts: u32,

    /// Wall-clock limit the in-process invoker puts on one attempt, the way
    /// a function platform aborts a long-running invocation. Unlimited when
    /// unset.
    #[serde(with = "humantime_serde")]
    pub invocation_timeout: Option<Duration>,

    /// Bucket holding per-job state (mappings, checkpoints, outputs, markers)
    pub state_bucket: String,

    /// Object store settings
    pub storage: StorageConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            chunk_size: DEFAULT_CHUNK_SIZE,
            checkpoint_interval: 100_000,
            backpressure_threshold: 115_000,
            receive_wait: Duration::from_secs(5),
            receive_max_messages: 10,
            poll_interval: Duration::from_secs(1),
            progress_log_interval: 100,
            send_retry_attempts: 5,
            send_retry_backoff: Duration::from_millis(200),
            delete_batch_size: 10,
            visibility_timeout: Duration::from_secs(30),
            invocation_attempts: 3,
            invocation_timeout: None,
            state_bucket: "serverless-mr".to_string(),
            storage: StorageConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load a TOML configuration file; absent fields take their defaults
    pub fn from_file(path: &Path) -> MapReduceResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MapReduceError::invalid_config("config", path.display(), e.to_string())
        })?;
        Self::from_toml(&content)
    }

    /// Parse a TOML document
    pub fn from_toml(content: &str) -> MapReduceResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| MapReduceError::invalid_config("config", "<toml>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> MapReduceResult<()> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_ENTRIES {
            return Err(MapReduceError::invalid_config(
                "batch_size",
                self.batch_size,
                format!("must be between 1 and {}", MAX_BATCH_ENTRIES),
            ));
        }
        if self.chunk_size == 0 {
            return Err(MapReduceError::invalid_config(
                "chunk_size",
                self.chunk_size,
                "must be greater than zero",
            ));
        }
        if self.checkpoint_interval == 0 {
            return Err(MapReduceError::invalid_config(
                "checkpoint_interval",
                self.checkpoint_interval,
                "must be greater than zero",
            ));
        }
        if self.backpressure_threshold < self.checkpoint_interval {
            return Err(MapReduceError::invalid_config(
                "backpressure_threshold",
                self.backpressure_threshold,
                format!(
                    "must be at least checkpoint_interval ({})",
                    self.checkpoint_interval
                ),
            ));
        }
        if self.receive_max_messages == 0 || self.receive_max_messages > MAX_BATCH_ENTRIES {
            return Err(MapReduceError::invalid_config(
                "receive_max_messages",
                self.receive_max_messages,
                format!("must be between 1 and {}", MAX_BATCH_ENTRIES),
            ));
        }
        if self.delete_batch_size == 0 || self.delete_batch_size > MAX_BATCH_ENTRIES {
            return Err(MapReduceError::invalid_config(
                "delete_batch_size",
                self.delete_batch_size,
                format!("must be between 1 and {}", MAX_BATCH_ENTRIES),
            ));
        }
        if self.send_retry_attempts == 0 {
            return Err(MapReduceError::invalid_config(
                "send_retry_attempts",
                self.send_retry_attempts,
                "must be greater than zero",
            ));
        }
        if self.progress_log_interval == 0 {
            return Err(MapReduceError::invalid_config(
                "progress_log_interval",
                self.progress_log_interval,
                "must be greater than zero",
            ));
        }
        if self.state_bucket.is_empty() {
            return Err(MapReduceError::invalid_config(
                "state_bucket",
                "\"\"",
                "must not be empty",
            ));
        }
        Ok(())
    }
}
