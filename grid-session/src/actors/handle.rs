use std::sync::Arc;

use ractor::{Actor, ActorRef};
use shared_types::{FieldChanges, FieldValue, Record, RecordId, SessionId};
use tokio::sync::broadcast;

use super::autosave::{AutosaveActor, AutosaveArguments, AutosaveMsg, RecordInspection};
use crate::api::RecordApi;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::SessionEvent;
use crate::state::SaveState;

/// Cloneable client of one editing session
#[derive(Clone)]
pub struct SessionHandle {
    session_id: SessionId,
    actor: ActorRef<AutosaveMsg>,
    events: broadcast::Sender<SessionEvent>,
}

fn unavailable<E: std::fmt::Display>(e: E) -> SessionError {
    SessionError::ActorUnavailable(e.to_string())
}

impl SessionHandle {
    /// Start a session actor for `config.container_id`. The session is empty
    /// until [`SessionHandle::load`] or [`SessionHandle::initialize`].
    pub async fn spawn(
        config: SessionConfig,
        api: Arc<dyn RecordApi>,
    ) -> Result<Self, SessionError> {
        let session_id = SessionId::new();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let args = AutosaveArguments {
            session_id: session_id.clone(),
            config,
            api,
            events: events.clone(),
        };
        let (actor, _handle) = Actor::spawn(None, AutosaveActor, args)
            .await
            .map_err(unavailable)?;

        Ok(Self {
            session_id,
            actor,
            events,
        })
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Fetch the container and reset the session to it. Returns the record count.
    pub async fn load(&self) -> Result<usize, SessionError> {
        ractor::call!(self.actor, |reply| AutosaveMsg::Load { reply }).map_err(unavailable)?
    }

    /// Reset the session to `records`, discarding all unconfirmed work
    pub async fn initialize(&self, records: Vec<Record>) -> Result<(), SessionError> {
        ractor::call!(self.actor, |reply| AutosaveMsg::Initialize { records, reply })
            .map_err(unavailable)
    }

    /// Apply an edit optimistically and schedule its autosave
    pub async fn stage_edit(
        &self,
        record_id: RecordId,
        field: impl Into<String>,
        value: impl Into<FieldValue>,
    ) -> Result<(), SessionError> {
        let field = field.into();
        let value = value.into();
        ractor::call!(self.actor, |reply| AutosaveMsg::StageEdit {
            record_id,
            field,
            value,
            reply,
        })
        .map_err(unavailable)?
    }

    /// Write `changes` without a version precondition. Resolves when the
    /// server answers.
    pub async fn force_update(
        &self,
        record_id: RecordId,
        changes: FieldChanges,
    ) -> Result<Record, SessionError> {
        ractor::call!(self.actor, |reply| AutosaveMsg::ForceUpdate {
            record_id,
            changes,
            reply,
        })
        .map_err(unavailable)?
    }

    /// Re-read a record from the server. `None` when it no longer exists.
    pub async fn reconcile(&self, record_id: RecordId) -> Result<Option<Record>, SessionError> {
        ractor::call!(self.actor, |reply| AutosaveMsg::Reconcile { record_id, reply })
            .map_err(unavailable)?
    }

    /// Drop local edits of a record and replace it with the server copy
    pub async fn adopt_server_state(
        &self,
        record_id: RecordId,
    ) -> Result<Option<Record>, SessionError> {
        ractor::call!(self.actor, |reply| AutosaveMsg::AdoptServerState {
            record_id,
            reply
        })
        .map_err(unavailable)?
    }

    pub async fn cancel_conflict(&self, record_id: RecordId) -> Result<(), SessionError> {
        ractor::call!(self.actor, |reply| AutosaveMsg::CancelConflict {
            record_id,
            reply
        })
        .map_err(unavailable)
    }

    pub async fn create_record(&self, fields: FieldChanges) -> Result<Record, SessionError> {
        ractor::call!(self.actor, |reply| AutosaveMsg::CreateRecord { fields, reply })
            .map_err(unavailable)?
    }

    pub async fn delete_record(&self, record_id: RecordId) -> Result<(), SessionError> {
        ractor::call!(self.actor, |reply| AutosaveMsg::DeleteRecord { record_id, reply })
            .map_err(unavailable)?
    }

    pub async fn record(&self, record_id: RecordId) -> Result<Option<Record>, SessionError> {
        ractor::call!(self.actor, |reply| AutosaveMsg::GetRecord { record_id, reply })
            .map_err(unavailable)
    }

    /// Records in display order
    pub async fn records(&self) -> Result<Vec<Record>, SessionError> {
        ractor::call!(self.actor, |reply| AutosaveMsg::GetRecords { reply }).map_err(unavailable)
    }

    pub async fn save_state(&self, record_id: RecordId) -> Result<SaveState, SessionError> {
        ractor::call!(self.actor, |reply| AutosaveMsg::GetSaveState { record_id, reply })
            .map_err(unavailable)
    }

    pub async fn inspect(
        &self,
        record_id: RecordId,
    ) -> Result<Option<RecordInspection>, SessionError> {
        ractor::call!(self.actor, |reply| AutosaveMsg::Inspect { record_id, reply })
            .map_err(unavailable)
    }

    /// Cancel pending timers and stop the session. In-flight writes still
    /// reach the server but their results are discarded.
    pub fn dispose(&self) {
        tracing::info!(session_id = %self.session_id, "Disposing session");
        self.actor.stop(None);
    }
}
