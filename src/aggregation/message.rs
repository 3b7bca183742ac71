//! Keyed partial values flowing from mappers to reducers

use super::AggregatorType;

/// One keyed partial value emitted by a mapper
#[derive(Debug, Clone, PartialEq)]
pub struct ReduceMessage {
    pub key: String,
    pub value: f64,
    pub aggregator: AggregatorType,
    /// Number of observations folded into `value` (only meaningful for Avg)
    pub count: u64,
    /// Padding sentinel, not a real observation
    pub empty: bool,
}

impl ReduceMessage {
    /// A single observation
    pub fn new(key: impl Into<String>, value: f64, aggregator: AggregatorType) -> Self {
        Self {
            key: key.into(),
            value,
            aggregator,
            count: 1,
            empty: false,
        }
    }

    /// A padding slot
    pub fn padding(aggregator: AggregatorType) -> Self {
        Self {
            key: String::new(),
            value: 0.0,
            aggregator,
            count: 0,
            empty: true,
        }
    }

    /// Attach an observation weight
    pub fn with_count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }
}
