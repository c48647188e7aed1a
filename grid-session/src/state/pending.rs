use std::collections::HashMap;

use shared_types::{FieldChanges, FieldValue, RecordId};

/// Edits staged per record that the server has not confirmed yet
#[derive(Debug, Default)]
pub struct PendingChangeBuffer {
    buffers: HashMap<RecordId, FieldChanges>,
}

impl PendingChangeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one field edit; the latest value per field wins
    pub fn stage(&mut self, record_id: RecordId, field: &str, value: FieldValue) {
        self.buffers
            .entry(record_id)
            .or_default()
            .insert(field.to_string(), value);
    }

    pub fn get(&self, record_id: RecordId) -> Option<&FieldChanges> {
        self.buffers.get(&record_id)
    }

    pub fn has_pending(&self, record_id: RecordId) -> bool {
        self.buffers.get(&record_id).is_some_and(|b| !b.is_empty())
    }

    /// Drain a record's buffer
    pub fn take(&mut self, record_id: RecordId) -> FieldChanges {
        self.buffers.remove(&record_id).unwrap_or_default()
    }

    /// Put older changes back underneath anything staged since.
    ///
    /// Fields already present in the buffer keep their newer value.
    pub fn restore_under(&mut self, record_id: RecordId, older: FieldChanges) {
        if older.is_empty() {
            return;
        }
        let buffer = self.buffers.entry(record_id).or_default();
        for (field, value) in older {
            buffer.entry(field).or_insert(value);
        }
    }

    pub fn clear(&mut self, record_id: RecordId) {
        self.buffers.remove(&record_id);
    }

    pub fn clear_all(&mut self) {
        self.buffers.clear();
    }
}
