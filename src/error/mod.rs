//! Structured error types for the shuffle/reduce engine
//!
//! Every failure is classified into one of four categories so callers can
//! decide between surfacing the failure to the hosting platform (which will
//! re-invoke the worker) and rejecting the job outright.

use crate::aggregation::AggregatorType;
use crate::queue::QueueError;
use crate::storage::StorageError;
use std::time::Duration;
use thiserror::Error;


/// Result type for engine operations
pub type MapReduceResult<T> = Result<T, MapReduceError>;

/// Broad classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Queue or store unreachable, throttled, timed out
    Transient,
    /// Malformed message body or attribute
    Data,
    /// Misconfigured job (mixed aggregators, bad tunables)
    Validation,
    /// A downstream worker invocation was not accepted
    Dispatch,
}

/// Main error type for MapReduce operations
#[derive(Debug, Error)]
pub enum MapReduceError {
    #[error("Storage operation failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue operation failed: {0}")]
    Queue(#[from] QueueError),

    #[error("Malformed message on queue {queue}: {reason}")]
    MalformedMessage { queue: String, reason: String },

    #[error("Mixed aggregator for key {key:?}: bound to {existing}, requested {requested}")]
    MixedAggregator {
        key: String,
        existing: AggregatorType,
        requested: AggregatorType,
    },

    #[error("Cannot merge {left} aggregator with {right} aggregator")]
    IncompatibleMerge {
        left: AggregatorType,
        right: AggregatorType,
    },

    #[error("Invalid configuration: {field} = {value}: {reason}")]
    InvalidConfiguration {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Invocation of {worker} was not accepted (status {status})")]
    DispatchRejected { worker: String, status: u16 },

    #[error("Invocation of {worker} timed out after {timeout:?}")]
    InvocationTimedOut { worker: String, timeout: Duration },

    #[error("Batch {batch_id} of mapping {map_id} could not be sent to {queue} after {attempts} attempts")]
    SendFailed {
        queue: String,
        map_id: String,
        batch_id: u64,
        attempts: u32,
    },

    #[error("Job {job_id}: {reason}")]
    InvalidJob { job_id: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl MapReduceError {
    /// Create a malformed message error
    pub fn malformed(queue: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            queue: queue.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(
        field: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Create an invalid job error
    pub fn invalid_job(job_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidJob {
            job_id: job_id.into(),
            reason: reason.into(),
        }
    }

    /// Classify this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Storage(_)
            | Self::Queue(_)
            | Self::SendFailed { .. }
            | Self::InvocationTimedOut { .. }
            | Self::Join(_) => ErrorCategory::Transient,
            Self::MalformedMessage { .. } | Self::Serialization(_) => ErrorCategory::Data,
            Self::MixedAggregator { .. }
            | Self::IncompatibleMerge { .. }
            | Self::InvalidConfiguration { .. }
            | Self::InvalidJob { .. } => ErrorCategory::Validation,
            Self::DispatchRejected { .. } => ErrorCategory::Dispatch,
        }
    }

    /// Whether re-invoking the failed worker can be expected to make progress
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::Dispatch
        )
    }
}
