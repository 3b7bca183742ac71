//! Per-batch slot ledger
//!
//! Tracks which slots of each `(mapID, batchID)` batch a reducer has
//! consumed. A batch is complete once all K slots have been seen; its slot
//! set is then freed and only the completed count is kept, which is enough
//! to reject late redeliveries.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// What the ledger decided about one delivered slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOutcome {
    /// First sighting; the batch is still open
    Accepted,
    /// First sighting, and it was the last missing slot of the batch
    BatchCompleted,
    /// This slot of an open batch was already consumed
    DuplicateSlot,
    /// The whole batch was already consumed
    CompletedBatch,
}

impl SlotOutcome {
    /// Whether the slot's value must be aggregated
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted | Self::BatchCompleted)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupeRecord {
    pub processed_count: usize,
    /// Emptied once the batch completes
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub processed_slots: BTreeSet<usize>,
}

impl DedupeRecord {
    pub fn is_complete(&self, batch_size: usize) -> bool {
        self.processed_count >= batch_size
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupeLedger {
    batch_size: usize,
    completed_batches: u64,
    records: BTreeMap<String, BTreeMap<u64, DedupeRecord>>,
}

impl DedupeLedger {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            completed_batches: 0,
            records: BTreeMap::new(),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Batches whose every slot has been consumed
    pub fn completed_batches(&self) -> u64 {
        self.completed_batches
    }

    /// Batches seen at least once but not yet complete
    pub fn open_batches(&self) -> usize {
        self.records
            .values()
            .flat_map(BTreeMap::values)
            .filter(|record| !record.is_complete(self.batch_size))
            .count()
    }

    pub fn record(&self, map_id: &str, batch_id: u64) -> Option<&DedupeRecord> {
        self.records.get(map_id)?.get(&batch_id)
    }

    /// Account for one delivered slot. `slot` must be below the batch size.
    pub fn observe(&mut self, map_id: &str, batch_id: u64, slot: usize) -> SlotOutcome {
        let batch_size = self.batch_size;
        let record = self
            .records
            .entry(map_id.to_string())
            .or_default()
            .entry(batch_id)
            .or_default();

        if record.is_complete(batch_size) {
            return SlotOutcome::CompletedBatch;
        }
        if !record.processed_slots.insert(slot) {
            return SlotOutcome::DuplicateSlot;
        }
        record.processed_count += 1;
        if record.processed_count == batch_size {
            record.processed_slots = BTreeSet::new();
            self.completed_batches += 1;
            return SlotOutcome::BatchCompleted;
        }
        SlotOutcome::Accepted
    }
}
