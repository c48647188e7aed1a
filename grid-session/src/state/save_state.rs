use std::collections::HashMap;

use shared_types::{FieldChanges, RecordId, SaveStatus};

/// Captured when a write is rejected because the record changed remotely
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictContext {
    pub record_id: RecordId,
    pub message: String,
    /// Every change the user had not yet persisted at conflict time
    pub pending: FieldChanges,
}

/// Autosave state of a single record
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SaveState {
    #[default]
    Idle,
    Saving,
    Saved,
    Conflict(ConflictContext),
    Error { message: String },
}

impl SaveState {
    pub fn status(&self) -> SaveStatus {
        match self {
            SaveState::Idle => SaveStatus::Idle,
            SaveState::Saving => SaveStatus::Saving,
            SaveState::Saved => SaveStatus::Saved,
            SaveState::Conflict(_) => SaveStatus::Conflict,
            SaveState::Error { .. } => SaveStatus::Error,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, SaveState::Error { .. })
    }

    pub fn conflict(&self) -> Option<&ConflictContext> {
        match self {
            SaveState::Conflict(ctx) => Some(ctx),
            _ => None,
        }
    }
}

/// Per-record [`SaveState`] map. Missing entries read as `Idle`.
#[derive(Debug, Default)]
pub struct SaveStates {
    states: HashMap<RecordId, SaveState>,
}

impl SaveStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, record_id: RecordId) -> SaveState {
        self.states.get(&record_id).cloned().unwrap_or_default()
    }

    /// Store a new state and return the one it replaced
    pub fn set(&mut self, record_id: RecordId, state: SaveState) -> SaveState {
        self.states.insert(record_id, state).unwrap_or_default()
    }

    pub fn remove(&mut self, record_id: RecordId) {
        self.states.remove(&record_id);
    }

    pub fn clear_all(&mut self) {
        self.states.clear();
    }
}
