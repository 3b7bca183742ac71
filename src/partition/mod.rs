//! Size-bounded partitioning of source objects into mappings
//!
//! A mapping is the unit of work handed to one mapper invocation. The
//! partitioner fills mappings up to the chunk bound, splitting objects that
//! straddle a boundary into consecutive byte ranges. Listings arrive page by
//! page, so the partially filled mapping is carried from one page to the
//! next instead of being closed early.

use crate::storage::ObjectInfo;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

#[cfg(test)]
mod tests;

/// Contiguous half-open byte slice `[initial_byte, final_byte)` of an object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRange {
    pub bucket: String,
    pub key: String,
    pub initial_byte: u64,
    pub final_byte: u64,
}

impl ObjectRange {
    pub fn len(&self) -> u64 {
        self.final_byte - self.initial_byte
    }

    pub fn is_empty(&self) -> bool {
        self.final_byte == self.initial_byte
    }
}

/// Unit of work for one mapper
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    #[serde(rename = "mapID")]
    pub map_id: Uuid,
    pub objects: Vec<ObjectRange>,
    pub size: u64,
}

impl Mapping {
    fn new() -> Self {
        Self {
            map_id: Uuid::new_v4(),
            objects: Vec::new(),
            size: 0,
        }
    }

    fn push(&mut self, object: &ObjectInfo, initial_byte: u64, final_byte: u64) {
        self.objects.push(ObjectRange {
            bucket: object.bucket.clone(),
            key: object.key.clone(),
            initial_byte,
            final_byte,
        });
        self.size += final_byte - initial_byte;
    }
}

/// How a mapper consumes its objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectMode {
    /// Objects may be split across mappings at arbitrary byte offsets
    #[default]
    Ranged,
    /// The mapper needs each object whole; oversized objects are skipped
    Complete,
}

/// Incremental partitioner
pub struct Partitioner {
    chunk_size: u64,
    mode: ObjectMode,
    current: Mapping,
    closed: Vec<Mapping>,
    skipped: Vec<ObjectInfo>,
}

impl Partitioner {
    /// `chunk_size` must be non-zero; [`EngineConfig::validate`] enforces it.
    ///
    /// [`EngineConfig::validate`]: crate::config::EngineConfig::validate
    pub fn new(chunk_size: u64, mode: ObjectMode) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            mode,
            current: Mapping::new(),
            closed: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// Add one object
    pub fn push(&mut self, object: &ObjectInfo) {
        match self.mode {
            ObjectMode::Ranged => self.push_ranged(object),
            ObjectMode::Complete => self.push_complete(object),
        }
    }

    /// Add one listing page and drain the mappings it closed. The open
    /// mapping stays pending for the next page.
    pub fn push_page(&mut self, objects: &[ObjectInfo]) -> Vec<Mapping> {
        for object in objects {
            self.push(object);
        }
        std::mem::take(&mut self.closed)
    }

    /// Close the open mapping and return everything not yet drained
    pub fn finish(mut self) -> Vec<Mapping> {
        if !self.current.objects.is_empty() {
            self.close_current();
        }
        self.closed
    }

    /// Objects rejected in complete-object mode
    pub fn skipped(&self) -> &[ObjectInfo] {
        &self.skipped
    }

    fn available(&self) -> u64 {
        self.chunk_size - self.current.size
    }

    fn close_current(&mut self) {
        let closed = std::mem::replace(&mut self.current, Mapping::new());
        debug!(
            map_id = %closed.map_id,
            ranges = closed.objects.len(),
            size = closed.size,
            "Closed mapping"
        );
        self.closed.push(closed);
    }

    fn close_if_full(&mut self) {
        if self.current.size == self.chunk_size {
            self.close_current();
        }
    }

    fn push_ranged(&mut self, object: &ObjectInfo) {
        let mut offset = 0;
        loop {
            let remaining = object.size - offset;
            let available = self.available();
            if remaining <= available {
                self.current.push(object, offset, object.size);
                self.close_if_full();
                return;
            }
            // The open mapping is never full here, so `available > 0`.
            self.current.push(object, offset, offset + available);
            offset += available;
            self.close_current();
        }
    }

    fn push_complete(&mut self, object: &ObjectInfo) {
        if object.size > self.chunk_size {
            warn!(
                bucket = %object.bucket,
                key = %object.key,
                size = object.size,
                chunk_size = self.chunk_size,
                "Skipping object larger than the chunk size in complete-object mode"
            );
            self.skipped.push(object.clone());
            return;
        }
        if object.size > self.available() {
            self.close_current();
        }
        self.current.push(object, 0, object.size);
        self.close_if_full();
    }
}

/// Partition a complete object list in one call
pub fn partition_objects(
    objects: &[ObjectInfo],
    chunk_size: u64,
    mode: ObjectMode,
) -> Vec<Mapping> {
    let mut partitioner = Partitioner::new(chunk_size, mode);
    let mut mappings = partitioner.push_page(objects);
    mappings.extend(partitioner.finish());
    mappings
}
