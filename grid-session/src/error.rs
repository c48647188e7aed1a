use shared_types::RecordId;

use crate::api::ApiError;

/// Errors returned by [`crate::SessionHandle`] operations.
///
/// Autosave failures never show up here; they are absorbed by the session
/// and reported through save states and events instead.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum SessionError {
    #[error("Unknown record: {0}")]
    UnknownRecord(RecordId),

    #[error("Record {0} is locked by an open conflict")]
    RecordLocked(RecordId),

    #[error("Record {0} is no longer in conflict")]
    NotInConflict(RecordId),

    #[error("A write is already in flight for record {0}")]
    WriteInFlight(RecordId),

    #[error("{action} failed: {source}")]
    UserAction {
        action: &'static str,
        source: ApiError,
    },

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Session actor unavailable: {0}")]
    ActorUnavailable(String),
}

impl SessionError {
    pub(crate) fn user_action(action: &'static str, source: ApiError) -> Self {
        SessionError::UserAction { action, source }
    }
}
