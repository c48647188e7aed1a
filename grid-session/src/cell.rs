//! Commit semantics of one editable grid cell
//!
//! A [`CellEditor`] keeps the text being typed apart from the value last
//! committed to the session. Blur, Enter and Tab commit; Escape reverts.

use shared_types::{FieldValue, RecordId};

use crate::actors::SessionHandle;
use crate::error::SessionError;

#[derive(Debug, Clone, PartialEq)]
pub struct SelectOption {
    pub key: i64,
    pub label: String,
}

impl SelectOption {
    pub fn new(key: i64, label: impl Into<String>) -> Self {
        Self {
            key,
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// Empty or unparsable input commits as `0`
    Number,
    Text,
    /// Options keyed by number; the key is what gets stored
    Select { options: Vec<SelectOption> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// Parsed value equals the committed one; nothing staged
    Unchanged,
    Staged(FieldValue),
}

#[derive(Debug, Clone)]
pub struct CellEditor {
    record_id: RecordId,
    field: String,
    kind: FieldKind,
    committed: FieldValue,
    provisional: Option<String>,
}

impl CellEditor {
    pub fn new(
        record_id: RecordId,
        field: impl Into<String>,
        kind: FieldKind,
        committed: FieldValue,
    ) -> Self {
        Self {
            record_id,
            field: field.into(),
            kind,
            committed,
            provisional: None,
        }
    }

    pub fn record_id(&self) -> RecordId {
        self.record_id
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn committed(&self) -> &FieldValue {
        &self.committed
    }

    /// Text the cell currently shows
    pub fn text(&self) -> String {
        match &self.provisional {
            Some(text) => text.clone(),
            None => self.committed.display_text(),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.provisional.is_some()
    }

    pub fn input(&mut self, text: impl Into<String>) {
        self.provisional = Some(text.into());
    }

    /// Pick a select option by key
    pub fn select(&mut self, key: i64) {
        self.provisional = Some(key.to_string());
    }

    /// Discard typed text and show the committed value again
    pub fn escape(&mut self) {
        self.provisional = None;
    }

    /// Take a new committed value from outside, e.g. after a reload.
    /// Typed text is kept.
    pub fn sync_committed(&mut self, value: FieldValue) {
        self.committed = value;
    }

    /// Value the provisional text commits to. `None` means nothing to commit.
    pub fn parse(&self) -> Option<FieldValue> {
        let text = self.provisional.as_deref()?;
        match &self.kind {
            FieldKind::Number => {
                let number = text.trim().parse::<f64>().ok().filter(|n| n.is_finite());
                Some(FieldValue::Number(number.unwrap_or(0.0)))
            }
            FieldKind::Text => Some(FieldValue::Text(text.to_string())),
            FieldKind::Select { options } => {
                let text = text.trim();
                options
                    .iter()
                    .find(|o| o.key.to_string() == text || o.label == text)
                    .map(|o| FieldValue::Number(o.key as f64))
            }
        }
    }

    /// Re-read the committed value from the session.
    ///
    /// The session may have rolled the record back, refreshed or reloaded it
    /// since this editor last committed. Typed text is kept.
    pub async fn refresh(&mut self, session: &SessionHandle) -> Result<(), SessionError> {
        let record = session
            .record(self.record_id)
            .await?
            .ok_or(SessionError::UnknownRecord(self.record_id))?;
        let value = record.field(&self.field).cloned().unwrap_or(FieldValue::Null);
        self.sync_committed(value);
        Ok(())
    }

    /// Commit the provisional text into the session.
    ///
    /// Stages an edit only when the parsed value differs from what the
    /// session currently shows. The provisional text is cleared either way.
    pub async fn commit(&mut self, session: &SessionHandle) -> Result<CommitOutcome, SessionError> {
        let Some(value) = self.parse() else {
            self.provisional = None;
            return Ok(CommitOutcome::Unchanged);
        };
        self.refresh(session).await?;
        if value == self.committed {
            self.provisional = None;
            return Ok(CommitOutcome::Unchanged);
        }

        session
            .stage_edit(self.record_id, self.field.clone(), value.clone())
            .await?;
        tracing::debug!(record_id = %self.record_id, field = %self.field, "Cell committed");
        self.committed = value.clone();
        self.provisional = None;
        Ok(CommitOutcome::Staged(value))
    }
}
