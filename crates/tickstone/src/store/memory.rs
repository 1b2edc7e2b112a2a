use crate::{BoundRecord, BoundStore, StoreError, Timestamp};
use parking_lot::Mutex;
use std::sync::Arc;

/// An in-process [`BoundStore`].
///
/// Clones share the same register, so several allocators can contend on one
/// namespace. Nothing survives the process; use it for tests and embedded
/// single-process setups.
#[derive(Clone, Debug, Default)]
pub struct MemoryBoundStore {
    record: Arc<Mutex<BoundRecord>>,
}

impl MemoryBoundStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds an active upper limit.
    pub fn with_upper_limit(upper_limit: Timestamp) -> Self {
        Self::from_record(BoundRecord::Active { upper_limit })
    }

    pub fn from_record(record: BoundRecord) -> Self {
        Self {
            record: Arc::new(Mutex::new(record)),
        }
    }

    /// Returns the current record without going through the async interface.
    pub fn snapshot(&self) -> BoundRecord {
        *self.record.lock()
    }
}

impl BoundStore for MemoryBoundStore {
    async fn get(&self) -> Result<BoundRecord, StoreError> {
        Ok(self.snapshot())
    }

    async fn compare_and_set(
        &self,
        expected: BoundRecord,
        new: BoundRecord,
    ) -> Result<bool, StoreError> {
        let mut record = self.record.lock();
        if *record != expected {
            return Ok(false);
        }
        *record = new;
        Ok(true)
    }
}
