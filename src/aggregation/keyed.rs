//! Keyed map of aggregators
//!
//! Each key is bound to exactly one aggregator kind for the lifetime of a
//! job. Keys are kept ordered so that iteration (and therefore forwarding to
//! a second reduce stage) is deterministic across re-invocations.

use super::{Aggregate, Aggregator, AggregatorType, ReduceMessage};
use crate::error::{MapReduceError, MapReduceResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MapAggregator {
    entries: BTreeMap<String, Aggregator>,
}

impl MapAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Aggregator> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Aggregator)> {
        self.entries.iter()
    }

    /// Collapse every key to its scalar result
    pub fn to_scalars(&self) -> BTreeMap<String, f64> {
        self.entries
            .iter()
            .map(|(key, agg)| (key.clone(), agg.to_scalar()))
            .collect()
    }

    /// Re-express the accumulated partials as messages for another reduce
    /// stage, preserving Avg weights
    pub fn to_messages(&self) -> Vec<ReduceMessage> {
        self.entries
            .iter()
            .map(|(key, agg)| {
                let (value, count) = agg.forward_value();
                ReduceMessage::new(key.clone(), value, agg.kind()).with_count(count)
            })
            .collect()
    }

    fn check_binding(
        key: &str,
        existing: AggregatorType,
        requested: AggregatorType,
    ) -> MapReduceResult<()> {
        if existing != requested {
            return Err(MapReduceError::MixedAggregator {
                key: key.to_string(),
                existing,
                requested,
            });
        }
        Ok(())
    }
}

impl Aggregate for MapAggregator {
    fn reduce(&mut self, message: &ReduceMessage) -> MapReduceResult<()> {
        // Padding carries no key.
        if message.empty {
            return Ok(());
        }
        match self.entries.get_mut(&message.key) {
            Some(existing) => {
                Self::check_binding(&message.key, existing.kind(), message.aggregator)?;
                existing.reduce(message)
            }
            None => {
                let mut agg = Aggregator::new(message.aggregator);
                agg.reduce(message)?;
                self.entries.insert(message.key.clone(), agg);
                Ok(())
            }
        }
    }

    fn merge(&mut self, other: Self) -> MapReduceResult<()> {
        for (key, incoming) in other.entries {
            match self.entries.get_mut(&key) {
                Some(existing) => {
                    Self::check_binding(&key, existing.kind(), incoming.kind())?;
                    existing.merge(incoming)?;
                }
                None => {
                    self.entries.insert(key, incoming);
                }
            }
        }
        Ok(())
    }
}

impl FromIterator<(String, Aggregator)> for MapAggregator {
    fn from_iter<I: IntoIterator<Item = (String, Aggregator)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
