//! Error types for the queue layer

use std::fmt;
use thiserror::Error;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Error, Debug)]
pub enum QueueError {
    /// Queue does not exist
    #[error("Queue not found: {0}")]
    NotFound(String),

    /// Request violates a service limit (batch size, message size)
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    /// Broker unreachable or throttling
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    /// Timeout occurred
    #[error("Timeout: operation took longer than {0:?}")]
    Timeout(std::time::Duration),
}

impl QueueError {
    pub fn limit_exceeded<E: fmt::Display>(msg: E) -> Self {
        Self::LimitExceeded(msg.to_string())
    }

    pub fn unavailable<E: fmt::Display>(msg: E) -> Self {
        Self::Unavailable(msg.to_string())
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}
