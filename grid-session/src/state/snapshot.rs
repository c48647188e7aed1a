use std::collections::HashMap;

use shared_types::{Record, RecordId};

/// Last server-confirmed copy of each record that has unconfirmed edits
#[derive(Debug, Default)]
pub struct SnapshotCache {
    snapshots: HashMap<RecordId, Record>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `record` as the rollback point unless one is already held
    pub fn capture_if_absent(&mut self, record: &Record) {
        self.snapshots
            .entry(record.id)
            .or_insert_with(|| record.clone());
    }

    /// Move the rollback point to a newly confirmed server state
    pub fn rebase(&mut self, record: &Record) {
        self.snapshots.insert(record.id, record.clone());
    }

    pub fn contains(&self, record_id: RecordId) -> bool {
        self.snapshots.contains_key(&record_id)
    }

    pub fn take(&mut self, record_id: RecordId) -> Option<Record> {
        self.snapshots.remove(&record_id)
    }

    pub fn discard(&mut self, record_id: RecordId) {
        self.snapshots.remove(&record_id);
    }

    pub fn clear_all(&mut self) {
        self.snapshots.clear();
    }
}
