use std::collections::HashMap;

use shared_types::{Record, RecordId, VersionToken};

/// Last version token observed from the server, per record.
///
/// Tokens only enter through [`VersionStore::observe`] with a value taken
/// from a server response; the store never derives one itself.
#[derive(Debug, Default)]
pub struct VersionStore {
    tokens: HashMap<RecordId, VersionToken>,
}

impl VersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all tokens with those of a fresh load
    pub fn seed(&mut self, records: &[Record]) {
        self.tokens.clear();
        for record in records {
            self.observe(record);
        }
    }

    pub fn observe(&mut self, record: &Record) {
        self.tokens.insert(record.id, record.version.clone());
    }

    pub fn get(&self, record_id: RecordId) -> Option<&VersionToken> {
        self.tokens.get(&record_id)
    }

    pub fn remove(&mut self, record_id: RecordId) {
        self.tokens.remove(&record_id);
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
