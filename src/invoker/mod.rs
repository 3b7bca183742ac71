//! Worker invocation
//!
//! Workers are started asynchronously: the invoker hands over an input
//! payload and gets back a platform status code. Only
//! [`ACCEPTED`] means the platform took the invocation; anything else is a
//! dispatch failure the caller must treat as fatal to its current phase.

pub mod local;

pub use local::LocalInvoker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{MapReduceError, MapReduceResult};
use crate::job::{CoordinatorInput, MapperInput, ReducerInput};

/// Status of an accepted asynchronous invocation
pub const ACCEPTED: u16 = 202;

/// A worker invocation and its payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "worker", content = "input", rename_all = "lowercase")]
pub enum Invocation {
    Mapper(MapperInput),
    Reducer(ReducerInput),
    Coordinator(CoordinatorInput),
}

impl Invocation {
    /// Human-readable identity used in logs and dispatch errors
    pub fn worker_name(&self) -> String {
        match self {
            Self::Mapper(input) => format!("mapper {}", input.mapping.map_id),
            Self::Reducer(input) => format!("reducer {}", input.reducer_id),
            Self::Coordinator(input) => format!("coordinator {}", input.job_id),
        }
    }
}

#[async_trait]
pub trait WorkerInvoker: Send + Sync {
    /// Start a worker asynchronously and return the platform status code
    async fn invoke(&self, invocation: Invocation) -> MapReduceResult<u16>;
}

/// Invoke and fail unless the platform accepted the invocation
pub async fn invoke_accepted(
    invoker: &dyn WorkerInvoker,
    invocation: Invocation,
) -> MapReduceResult<()> {
    let worker = invocation.worker_name();
    let status = invoker.invoke(invocation).await?;
    if status != ACCEPTED {
        return Err(MapReduceError::DispatchRejected { worker, status });
    }
    Ok(())
}
