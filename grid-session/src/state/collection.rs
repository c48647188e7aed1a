use std::collections::HashMap;

use shared_types::{FieldChanges, Record, RecordId};

/// Ordered, normalized set of records the grid renders
#[derive(Debug, Default)]
pub struct RecordCollection {
    order: Vec<RecordId>,
    records: HashMap<RecordId, Record>,
}

impl RecordCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole collection, keeping the given order
    pub fn load(&mut self, records: Vec<Record>) {
        self.order.clear();
        self.records.clear();
        for record in records {
            self.insert(record);
        }
    }

    pub fn get(&self, record_id: RecordId) -> Option<&Record> {
        self.records.get(&record_id)
    }

    pub fn contains(&self, record_id: RecordId) -> bool {
        self.records.contains_key(&record_id)
    }

    /// Append a record, or replace it in place when the id is already present
    pub fn insert(&mut self, record: Record) {
        if !self.records.contains_key(&record.id) {
            self.order.push(record.id);
        }
        self.records.insert(record.id, record);
    }

    /// Replace an existing record. Returns false when the id is unknown.
    pub fn replace(&mut self, record: Record) -> bool {
        match self.records.get_mut(&record.id) {
            Some(slot) => {
                *slot = record;
                true
            }
            None => false,
        }
    }

    pub fn apply_changes(&mut self, record_id: RecordId, changes: &FieldChanges) -> bool {
        match self.records.get_mut(&record_id) {
            Some(record) => {
                record.apply(changes);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, record_id: RecordId) -> Option<Record> {
        let removed = self.records.remove(&record_id)?;
        self.order.retain(|id| *id != record_id);
        Some(removed)
    }

    pub fn ids(&self) -> &[RecordId] {
        &self.order
    }

    /// Records in display order
    pub fn records(&self) -> Vec<Record> {
        self.order
            .iter()
            .filter_map(|id| self.records.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
