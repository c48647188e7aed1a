//! Conflict resolution workflow
//!
//! Surfaces one [`ConflictContext`] at a time and resolves it either by
//! taking the server copy (refresh) or by writing the user's pending changes
//! unconditionally (overwrite). Contexts for other records wait in a queue.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use shared_types::{Record, RecordId};

use crate::actors::SessionHandle;
use crate::error::SessionError;
use crate::events::SessionEvent;
use crate::state::{ConflictContext, SaveState};

/// How an open conflict ended
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The server copy replaced local edits. `None` when the record was gone.
    Refreshed(Option<Record>),
    /// Local edits were written over the server copy
    Overwritten(Record),
    Cancelled,
}

#[derive(Debug, Default)]
struct WorkflowState {
    active: Option<ConflictContext>,
    queue: VecDeque<ConflictContext>,
    resolving: bool,
}

impl WorkflowState {
    fn is_known(&self, record_id: RecordId) -> bool {
        self.active.as_ref().is_some_and(|c| c.record_id == record_id)
            || self.queue.iter().any(|c| c.record_id == record_id)
    }

    fn close(&mut self) {
        self.resolving = false;
        self.active = self.queue.pop_front();
    }

    /// Drop whatever is held for `record_id`. Returns true when something was dropped.
    fn forget(&mut self, record_id: RecordId) -> bool {
        let queued = self.queue.len();
        self.queue.retain(|c| c.record_id != record_id);
        let mut dropped = self.queue.len() != queued;
        if self.active.as_ref().is_some_and(|c| c.record_id == record_id) {
            self.close();
            dropped = true;
        }
        dropped
    }

    fn reset(&mut self) -> bool {
        let had_any = self.active.is_some() || !self.queue.is_empty();
        self.active = None;
        self.queue.clear();
        self.resolving = false;
        had_any
    }
}

/// Conflict dialog state shared between the grid and its session
#[derive(Clone)]
pub struct ConflictWorkflow {
    session: SessionHandle,
    inner: Arc<Mutex<WorkflowState>>,
}

impl ConflictWorkflow {
    pub fn new(session: SessionHandle) -> Self {
        Self {
            session,
            inner: Arc::new(Mutex::new(WorkflowState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WorkflowState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Surface a conflict. Returns false when this record already has one.
    pub fn open(&self, ctx: ConflictContext) -> bool {
        let mut state = self.lock();
        if state.is_known(ctx.record_id) {
            tracing::debug!(record_id = %ctx.record_id, "Conflict already surfaced");
            return false;
        }
        tracing::info!(record_id = %ctx.record_id, "Conflict opened");
        if state.active.is_none() {
            state.active = Some(ctx);
        } else {
            state.queue.push_back(ctx);
        }
        true
    }

    /// Feed a session event. Returns true when the dialog state changed.
    ///
    /// A reload drops every context; a removed record drops its own.
    pub fn handle_event(&self, event: &SessionEvent) -> bool {
        match event {
            SessionEvent::ConflictDetected(ctx) => self.open(ctx.clone()),
            SessionEvent::Loaded { .. } => {
                let dropped = self.lock().reset();
                if dropped {
                    tracing::info!("Session reloaded, conflicts dropped");
                }
                dropped
            }
            SessionEvent::RecordRemoved { record_id, .. } => {
                let dropped = self.lock().forget(*record_id);
                if dropped {
                    tracing::info!(record_id = %record_id, "Record removed, conflict dropped");
                }
                dropped
            }
            _ => false,
        }
    }

    pub fn active(&self) -> Option<ConflictContext> {
        self.lock().active.clone()
    }

    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_resolving(&self) -> bool {
        self.lock().resolving
    }

    /// The dialog can be dismissed only while no action is running
    pub fn can_dismiss(&self) -> bool {
        let state = self.lock();
        state.active.is_some() && !state.resolving
    }

    fn begin(&self) -> Result<Option<ConflictContext>, SessionError> {
        let mut state = self.lock();
        let Some(ctx) = state.active.clone() else {
            return Ok(None);
        };
        if state.resolving {
            return Err(SessionError::WriteInFlight(ctx.record_id));
        }
        state.resolving = true;
        Ok(Some(ctx))
    }

    /// Make sure the session still holds the conflict before acting on it.
    /// A context the session has moved past is dropped from the dialog.
    async fn ensure_conflicted(&self, ctx: &ConflictContext) -> Result<(), SessionError> {
        let current = match self.session.save_state(ctx.record_id).await {
            Ok(current) => current,
            Err(e) => {
                self.lock().resolving = false;
                return Err(e);
            }
        };
        if matches!(current, SaveState::Conflict(_)) {
            return Ok(());
        }
        tracing::warn!(record_id = %ctx.record_id, status = ?current.status(), "Stale conflict dropped");
        self.lock().forget(ctx.record_id);
        Err(SessionError::NotInConflict(ctx.record_id))
    }

    /// Resolve the active conflict by taking the server copy
    pub async fn resolve_by_refresh(&self) -> Result<Option<Resolution>, SessionError> {
        let Some(ctx) = self.begin()? else {
            return Ok(None);
        };
        self.ensure_conflicted(&ctx).await?;
        let result = self.session.adopt_server_state(ctx.record_id).await;
        // A failed fetch leaves the record in conflict
        let keep_open = matches!(
            result,
            Err(SessionError::Api(_)) | Err(SessionError::ActorUnavailable(_))
        );
        self.finish(ctx.record_id, keep_open, result.map(Resolution::Refreshed))
            .map(Some)
    }

    /// Resolve the active conflict by writing every pending change unconditionally
    pub async fn resolve_by_overwrite(&self) -> Result<Option<Resolution>, SessionError> {
        let Some(ctx) = self.begin()? else {
            return Ok(None);
        };
        self.ensure_conflicted(&ctx).await?;
        let result = self
            .session
            .force_update(ctx.record_id, ctx.pending.clone())
            .await;
        // A failed overwrite has already rolled the record back to `error`
        let keep_open = matches!(
            result,
            Err(SessionError::WriteInFlight(_)) | Err(SessionError::ActorUnavailable(_))
        );
        self.finish(ctx.record_id, keep_open, result.map(Resolution::Overwritten))
            .map(Some)
    }

    fn finish(
        &self,
        record_id: RecordId,
        keep_open: bool,
        result: Result<Resolution, SessionError>,
    ) -> Result<Resolution, SessionError> {
        let mut state = self.lock();
        if keep_open {
            state.resolving = false;
        } else {
            tracing::info!(record_id = %record_id, ok = result.is_ok(), "Conflict closed");
            state.close();
        }
        result
    }

    /// Close the active conflict without resolving. Refused while an action runs.
    pub async fn cancel(&self) -> Result<Option<Resolution>, SessionError> {
        let record_id = {
            let state = self.lock();
            let Some(ctx) = state.active.as_ref() else {
                return Ok(None);
            };
            if state.resolving {
                return Err(SessionError::WriteInFlight(ctx.record_id));
            }
            ctx.record_id
        };
        self.session.cancel_conflict(record_id).await?;
        self.lock().close();
        Ok(Some(Resolution::Cancelled))
    }
}
