//! Typed job definitions
//!
//! A job declares its transform and aggregator kind as values at compile
//! time. Workers receive the definition by construction, so there is no
//! runtime inspection of user functions.

pub mod input;
pub mod layout;

pub use input::{CoordinatorInput, MapperInput, ReducerInput};
pub use layout::{Marker, QueueNames, ReduceTarget};

use crate::aggregation::{AggregatorType, ReduceMessage};
use crate::error::{MapReduceError, MapReduceResult};
use crate::partition::{ObjectMode, ObjectRange};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// How mapper output keys are assigned to reduce partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionStrategy {
    /// Stable content hash of the key, so a key always lands on one reducer
    #[default]
    Hashed,
    /// Uniformly random partition per value; a final reducer merges the
    /// per-partition results
    Randomized,
}

impl PartitionStrategy {
    pub fn needs_final_stage(&self) -> bool {
        matches!(self, Self::Randomized)
    }
}

/// Collects the keyed values a transform produces
///
/// Each key is bound to the aggregator kind of its first emission. A later
/// emission under another kind is rejected here, in the mapper, before any
/// of its values reach a queue.
#[derive(Debug)]
pub struct Emitter {
    default_kind: AggregatorType,
    bindings: HashMap<String, AggregatorType>,
    messages: Vec<ReduceMessage>,
}

impl Emitter {
    pub fn new(default_kind: AggregatorType) -> Self {
        Self {
            default_kind,
            bindings: HashMap::new(),
            messages: Vec::new(),
        }
    }

    /// Emit a value aggregated with the job's declared kind
    pub fn emit(&mut self, key: impl Into<String>, value: f64) -> MapReduceResult<()> {
        let kind = self.default_kind;
        self.emit_as(key, value, kind)
    }

    /// Emit a value bound to a specific aggregator kind
    pub fn emit_as(
        &mut self,
        key: impl Into<String>,
        value: f64,
        kind: AggregatorType,
    ) -> MapReduceResult<()> {
        let key = key.into();
        match self.bindings.get(&key) {
            Some(&existing) if existing != kind => {
                return Err(MapReduceError::MixedAggregator {
                    key,
                    existing,
                    requested: kind,
                });
            }
            Some(_) => {}
            None => {
                self.bindings.insert(key.clone(), kind);
            }
        }
        self.messages.push(ReduceMessage::new(key, value, kind));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Take everything emitted so far. Key bindings are kept.
    pub fn drain(&mut self) -> Vec<ReduceMessage> {
        std::mem::take(&mut self.messages)
    }
}

/// User transform run by mappers over each object range
pub trait MapFunction: Send + Sync {
    fn map(
        &self,
        range: &ObjectRange,
        bytes: &[u8],
        emitter: &mut Emitter,
    ) -> MapReduceResult<()>;
}

impl<F> MapFunction for F
where
    F: Fn(&ObjectRange, &[u8], &mut Emitter) -> MapReduceResult<()> + Send + Sync,
{
    fn map(
        &self,
        range: &ObjectRange,
        bytes: &[u8],
        emitter: &mut Emitter,
    ) -> MapReduceResult<()> {
        self(range, bytes, emitter)
    }
}

/// Counts whitespace-separated words
#[derive(Debug, Clone, Copy, Default)]
pub struct WordCount;

impl MapFunction for WordCount {
    fn map(
        &self,
        _range: &ObjectRange,
        bytes: &[u8],
        emitter: &mut Emitter,
    ) -> MapReduceResult<()> {
        let text = String::from_utf8_lossy(bytes);
        for word in text.split_whitespace() {
            emitter.emit(word.to_lowercase(), 1.0)?;
        }
        Ok(())
    }
}

/// Everything a worker needs to know about the job it runs
#[derive(Clone)]
pub struct JobDefinition {
    pub name: String,
    pub map: Arc<dyn MapFunction>,
    pub aggregator: AggregatorType,
    pub strategy: PartitionStrategy,
    pub object_mode: ObjectMode,
}

impl JobDefinition {
    pub fn new(name: impl Into<String>, map: Arc<dyn MapFunction>) -> Self {
        Self {
            name: name.into(),
            map,
            aggregator: AggregatorType::default(),
            strategy: PartitionStrategy::default(),
            object_mode: ObjectMode::default(),
        }
    }

    /// Build a job from a closure transform
    pub fn from_fn<F>(name: impl Into<String>, map: F) -> Self
    where
        F: Fn(&ObjectRange, &[u8], &mut Emitter) -> MapReduceResult<()> + Send + Sync + 'static,
    {
        Self::new(name, Arc::new(map))
    }

    /// Word count over whole objects, so no word is cut at a range boundary
    pub fn word_count() -> Self {
        Self::new("word-count", Arc::new(WordCount)).with_object_mode(ObjectMode::Complete)
    }

    pub fn with_aggregator(mut self, aggregator: AggregatorType) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn with_strategy(mut self, strategy: PartitionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_object_mode(mut self, object_mode: ObjectMode) -> Self {
        self.object_mode = object_mode;
        self
    }

    /// An emitter bound to the job's declared aggregator
    pub fn emitter(&self) -> Emitter {
        Emitter::new(self.aggregator)
    }

    /// Run the transform over one range, collecting into a shared emitter so
    /// key bindings hold across every range of a mapping
    pub fn map_range(
        &self,
        range: &ObjectRange,
        bytes: &[u8],
        emitter: &mut Emitter,
    ) -> MapReduceResult<Vec<ReduceMessage>> {
        self.map.map(range, bytes, emitter)?;
        Ok(emitter.drain())
    }

    /// Run the transform over one range
    pub fn run_map(
        &self,
        range: &ObjectRange,
        bytes: &[u8],
    ) -> MapReduceResult<Vec<ReduceMessage>> {
        self.map_range(range, bytes, &mut self.emitter())
    }
}

impl fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDefinition")
            .field("name", &self.name)
            .field("aggregator", &self.aggregator)
            .field("strategy", &self.strategy)
            .field("object_mode", &self.object_mode)
            .finish_non_exhaustive()
    }
}
