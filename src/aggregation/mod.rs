//! Aggregator merge algebra
//!
//! Partial values produced by mappers are folded into aggregators with
//! `reduce`, and partial aggregators produced by different reducer intervals
//! (or different reducers) are combined with `merge`. All operations are
//! commutative and associative, so no ordering between messages is assumed.

pub mod keyed;
pub mod message;

pub use keyed::MapAggregator;
pub use message::ReduceMessage;

use crate::error::{MapReduceError, MapReduceResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregator kinds a job can declare for its keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregatorType {
    Sum,
    Max,
    Min,
    Avg,
}

impl Default for AggregatorType {
    fn default() -> Self {
        Self::Sum
    }
}

impl fmt::Display for AggregatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sum => "sum",
            Self::Max => "max",
            Self::Min => "min",
            Self::Avg => "avg",
        };
        write!(f, "{}", name)
    }
}

/// Common contract of every aggregator in the algebra
pub trait Aggregate {
    /// Absorb one keyed observation
    fn reduce(&mut self, message: &ReduceMessage) -> MapReduceResult<()>;

    /// Combine another instance of the same kind into this one
    fn merge(&mut self, other: Self) -> MapReduceResult<()>
    where
        Self: Sized;
}

/// A single scalar aggregator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Aggregator {
    Sum { value: f64 },
    Max { value: Option<f64> },
    Min { value: Option<f64> },
    Avg { sum: f64, count: u64 },
}

impl Aggregator {
    /// Create an empty aggregator of the given kind
    pub fn new(kind: AggregatorType) -> Self {
        match kind {
            AggregatorType::Sum => Self::Sum { value: 0.0 },
            AggregatorType::Max => Self::Max { value: None },
            AggregatorType::Min => Self::Min { value: None },
            AggregatorType::Avg => Self::Avg { sum: 0.0, count: 0 },
        }
    }

    /// The kind tag of this aggregator
    pub fn kind(&self) -> AggregatorType {
        match self {
            Self::Sum { .. } => AggregatorType::Sum,
            Self::Max { .. } => AggregatorType::Max,
            Self::Min { .. } => AggregatorType::Min,
            Self::Avg { .. } => AggregatorType::Avg,
        }
    }

    /// Collapse to a single number.
    ///
    /// Empty Max/Min report 0 and an Avg with no observations reports 0, so
    /// the reduce loop never faults on a key that only saw partial merges.
    pub fn to_scalar(&self) -> f64 {
        match self {
            Self::Sum { value } => *value,
            Self::Max { value } | Self::Min { value } => value.unwrap_or(0.0),
            Self::Avg { sum, count } => {
                if *count == 0 {
                    0.0
                } else {
                    sum / *count as f64
                }
            }
        }
    }

    /// The value and weight to forward when this partial is re-emitted into
    /// another reduce stage
    pub fn forward_value(&self) -> (f64, u64) {
        match self {
            Self::Avg { sum, count } => (*sum, *count),
            other => (other.to_scalar(), 1),
        }
    }
}

impl Aggregate for Aggregator {
    fn reduce(&mut self, message: &ReduceMessage) -> MapReduceResult<()> {
        if message.empty {
            return Ok(());
        }
        match self {
            Self::Sum { value } => *value += message.value,
            Self::Max { value } => {
                if value.is_none_or(|current| message.value > current) {
                    *value = Some(message.value);
                }
            }
            Self::Min { value } => {
                if value.is_none_or(|current| message.value < current) {
                    *value = Some(message.value);
                }
            }
            Self::Avg { sum, count } => {
                *sum += message.value;
                *count += message.count;
            }
        }
        Ok(())
    }

    fn merge(&mut self, other: Self) -> MapReduceResult<()> {
        match (self, other) {
            (Self::Sum { value }, Self::Sum { value: other }) => *value += other,
            (Self::Max { value }, Self::Max { value: other }) => {
                *value = extremum(*value, other, f64::max);
            }
            (Self::Min { value }, Self::Min { value: other }) => {
                *value = extremum(*value, other, f64::min);
            }
            (
                Self::Avg { sum, count },
                Self::Avg {
                    sum: other_sum,
                    count: other_count,
                },
            ) => {
                *sum += other_sum;
                *count += other_count;
            }
            (left, right) => {
                return Err(MapReduceError::IncompatibleMerge {
                    left: left.kind(),
                    right: right.kind(),
                })
            }
        }
        Ok(())
    }
}

fn extremum(a: Option<f64>, b: Option<f64>, pick: fn(f64, f64) -> f64) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(pick(a, b)),
        (a, None) => a,
        (None, b) => b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fed(kind: AggregatorType, values: &[f64]) -> Aggregator {
        let mut agg = Aggregator::new(kind);
        for v in values {
            agg.reduce(&ReduceMessage::new("k", *v, kind)).unwrap();
        }
        agg
    }

    #[test]
    fn test_sum_ignores_padding() {
        let mut agg = fed(AggregatorType::Sum, &[1.0, 2.5]);
        agg.reduce(&ReduceMessage::padding(AggregatorType::Sum))
            .unwrap();
        assert_eq!(agg.to_scalar(), 3.5);
    }

    #[test]
    fn test_max_and_min_take_first_value() {
        assert_eq!(fed(AggregatorType::Max, &[-3.0]).to_scalar(), -3.0);
        assert_eq!(fed(AggregatorType::Min, &[7.0]).to_scalar(), 7.0);
        assert_eq!(fed(AggregatorType::Max, &[-3.0, -1.0, -9.0]).to_scalar(), -1.0);
        assert_eq!(fed(AggregatorType::Min, &[7.0, 2.0, 4.0]).to_scalar(), 2.0);
    }

    #[test]
    fn test_avg_empty_is_zero() {
        assert_eq!(Aggregator::new(AggregatorType::Avg).to_scalar(), 0.0);
    }

    #[test]
    fn test_avg_merge_with_empty_intermediate() {
        let mut agg = fed(AggregatorType::Avg, &[4.0, 8.0]);
        agg.merge(Aggregator::Avg { sum: 0.0, count: 0 }).unwrap();
        assert_eq!(agg, Aggregator::Avg { sum: 12.0, count: 2 });
        assert_eq!(agg.to_scalar(), 6.0);
    }

    #[test]
    fn test_merge_is_commutative_and_associative() {
        let groups: [&[f64]; 3] = [&[1.0, 9.0], &[4.0], &[-2.0, 3.0, 8.0]];
        for kind in [
            AggregatorType::Sum,
            AggregatorType::Max,
            AggregatorType::Min,
            AggregatorType::Avg,
        ] {
            let [a, b, c] = groups.map(|g| fed(kind, g));

            // (a + b) + c
            let mut left = a.clone();
            left.merge(b.clone()).unwrap();
            left.merge(c.clone()).unwrap();

            // a + (c + b)
            let mut inner = c.clone();
            inner.merge(b.clone()).unwrap();
            let mut right = a.clone();
            right.merge(inner).unwrap();

            assert_eq!(left, right, "merge laws violated for {}", kind);
        }
    }

    #[test]
    fn test_avg_mean_independent_of_grouping() {
        let values = [2.0, 4.0, 6.0, 8.0, 10.0];
        let whole = fed(AggregatorType::Avg, &values);

        let mut split = fed(AggregatorType::Avg, &values[..1]);
        split.merge(fed(AggregatorType::Avg, &values[3..])).unwrap();
        split.merge(fed(AggregatorType::Avg, &values[1..3])).unwrap();

        assert_eq!(whole.to_scalar(), 6.0);
        assert_eq!(split.to_scalar(), whole.to_scalar());
    }

    #[test]
    fn test_merge_different_kinds_fails() {
        let mut sum = Aggregator::new(AggregatorType::Sum);
        let err = sum.merge(Aggregator::new(AggregatorType::Min)).unwrap_err();
        assert!(matches!(
            err,
            MapReduceError::IncompatibleMerge {
                left: AggregatorType::Sum,
                right: AggregatorType::Min
            }
        ));
    }

    #[test]
    fn test_forwarded_avg_keeps_weight() {
        let partial = fed(AggregatorType::Avg, &[1.0, 2.0, 3.0]);
        let (value, count) = partial.forward_value();

        let mut downstream = fed(AggregatorType::Avg, &[10.0]);
        downstream
            .reduce(&ReduceMessage::new("k", value, AggregatorType::Avg).with_count(count))
            .unwrap();
        assert_eq!(downstream, Aggregator::Avg { sum: 16.0, count: 4 });
    }
}
