//! Mapper-side shuffle
//!
//! Keyed values are routed to one of P reduce queues and sent as fixed-size
//! padded batches. Batch ids are per-partition counters, so a mapping that
//! is re-run produces the same `(mapID, batchID, slot)` coordinates and the
//! reducer's dedupe ledger absorbs the repeats.

pub mod wire;
pub mod writer;

pub use wire::{BatchCount, CompletionSignal, SlotEnvelope};
pub use writer::ShuffleWriter;

use crate::job::PartitionStrategy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Stable partition of a key: its MD5 digest, as a 128-bit integer, mod P
pub fn partition_for_key(key: &str, partitions: usize) -> usize {
    let digest = md5::compute(key.as_bytes());
    (u128::from_be_bytes(digest.0) % partitions.max(1) as u128) as usize
}

/// Chooses the destination partition of each emitted value
#[derive(Debug)]
pub enum KeyRouter {
    Hashed { partitions: usize },
    /// Random assignment seeded from the producer identity, so a retried
    /// invocation routes values exactly as the first attempt did
    Randomized { partitions: usize, rng: StdRng },
}

impl KeyRouter {
    pub fn new(strategy: PartitionStrategy, partitions: usize, producer_id: &str) -> Self {
        let partitions = partitions.max(1);
        match strategy {
            PartitionStrategy::Hashed => Self::Hashed { partitions },
            PartitionStrategy::Randomized => {
                let digest = md5::compute(producer_id.as_bytes());
                let mut seed = [0u8; 8];
                seed.copy_from_slice(&digest.0[..8]);
                Self::Randomized {
                    partitions,
                    rng: StdRng::seed_from_u64(u64::from_be_bytes(seed)),
                }
            }
        }
    }

    pub fn partitions(&self) -> usize {
        match self {
            Self::Hashed { partitions } | Self::Randomized { partitions, .. } => *partitions,
        }
    }

    pub fn route(&mut self, key: &str) -> usize {
        match self {
            Self::Hashed { partitions } => partition_for_key(key, *partitions),
            Self::Randomized { partitions, rng } => rng.random_range(0..*partitions),
        }
    }
}
