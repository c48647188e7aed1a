//! AutosaveActor - owns every piece of mutable state of one grid session
//!
//! The mailbox serializes all mutations. Network calls run in spawned tasks
//! and report back as `*Completed` messages tagged with the session epoch, so
//! a completion that arrives after a reload is dropped instead of applied.
//!
//! Per record the actor guarantees:
//! - at most one write in flight; a debounce that fires meanwhile is deferred
//! - version tokens only come from server responses
//! - one automatic reconcile per stretch of `error` status

use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use shared_types::{FieldChanges, FieldValue, Record, RecordId, SessionId, VersionToken};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::api::{ApiError, RecordApi};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::{RemovalReason, SessionEvent};
use crate::state::{
    ConflictContext, PendingChangeBuffer, RecordCollection, SaveState, SaveStates, SnapshotCache,
    VersionStore,
};

/// Actor that runs the autosave engine for one session
#[derive(Debug, Default)]
pub struct AutosaveActor;

/// Arguments for spawning AutosaveActor
#[derive(Clone)]
pub struct AutosaveArguments {
    pub session_id: SessionId,
    pub config: SessionConfig,
    pub api: Arc<dyn RecordApi>,
    pub events: broadcast::Sender<SessionEvent>,
}

/// Debounce or display timer. A firing whose `seq` no longer matches is stale.
struct ScheduledTask {
    seq: u64,
    handle: JoinHandle<()>,
}

/// State for AutosaveActor
pub struct AutosaveState {
    session_id: SessionId,
    container_id: String,
    debounce: Duration,
    saved_display: Duration,
    api: Arc<dyn RecordApi>,
    events: broadcast::Sender<SessionEvent>,
    epoch: u64,
    next_seq: u64,
    collection: RecordCollection,
    versions: VersionStore,
    pending: PendingChangeBuffer,
    snapshots: SnapshotCache,
    states: SaveStates,
    /// Changes of the write currently in flight, per record
    in_flight: HashMap<RecordId, FieldChanges>,
    /// Records whose debounce fired while a write was in flight
    deferred: HashSet<RecordId>,
    flush_timers: HashMap<RecordId, ScheduledTask>,
    saved_timers: HashMap<RecordId, ScheduledTask>,
    /// Records with an open conflict dialog
    locked: HashSet<RecordId>,
    /// Records whose conflict has already been announced
    open_conflicts: HashSet<RecordId>,
    /// Records that already triggered their automatic reconcile
    error_handled: HashSet<RecordId>,
}

/// Everything the session knows about one record
#[derive(Debug, Clone, PartialEq)]
pub struct RecordInspection {
    pub record: Record,
    pub state: SaveState,
    pub version: Option<VersionToken>,
    pub pending: FieldChanges,
    pub in_flight: Option<FieldChanges>,
    pub has_snapshot: bool,
    pub locked: bool,
}

/// Why a record is being re-read from the server
#[derive(Debug)]
pub enum ReconcileKind {
    /// Requested through the handle
    Requested(RpcReplyPort<Result<Option<Record>, SessionError>>),
    /// Triggered by a transient write failure
    Automatic,
    /// Refresh of a conflicted record: take the server copy wholesale
    Adopt(RpcReplyPort<Result<Option<Record>, SessionError>>),
}

// ============================================================================
// Messages
// ============================================================================

/// Messages handled by AutosaveActor
#[derive(Debug)]
pub enum AutosaveMsg {
    /// Replace the session contents with an already fetched record set
    Initialize {
        records: Vec<Record>,
        reply: RpcReplyPort<()>,
    },
    /// Fetch the container and initialize from it
    Load {
        reply: RpcReplyPort<Result<usize, SessionError>>,
    },
    LoadCompleted {
        result: Result<Vec<Record>, ApiError>,
        reply: RpcReplyPort<Result<usize, SessionError>>,
    },
    /// Buffer one field edit and restart the record's debounce timer
    StageEdit {
        record_id: RecordId,
        field: String,
        value: FieldValue,
        reply: RpcReplyPort<Result<(), SessionError>>,
    },
    /// Debounce timer fired
    FlushDue { record_id: RecordId, seq: u64 },
    WriteCompleted {
        epoch: u64,
        record_id: RecordId,
        sent: FieldChanges,
        result: Result<Record, ApiError>,
    },
    /// Unconditional write of `changes`, bypassing the debounce
    ForceUpdate {
        record_id: RecordId,
        changes: FieldChanges,
        reply: RpcReplyPort<Result<Record, SessionError>>,
    },
    ForceCompleted {
        epoch: u64,
        record_id: RecordId,
        result: Result<Record, ApiError>,
        reply: RpcReplyPort<Result<Record, SessionError>>,
    },
    Reconcile {
        record_id: RecordId,
        reply: RpcReplyPort<Result<Option<Record>, SessionError>>,
    },
    AdoptServerState {
        record_id: RecordId,
        reply: RpcReplyPort<Result<Option<Record>, SessionError>>,
    },
    ReconcileCompleted {
        epoch: u64,
        record_id: RecordId,
        kind: ReconcileKind,
        result: Result<Record, ApiError>,
    },
    /// Close the conflict dialog without resolving
    CancelConflict {
        record_id: RecordId,
        reply: RpcReplyPort<()>,
    },
    CreateRecord {
        fields: FieldChanges,
        reply: RpcReplyPort<Result<Record, SessionError>>,
    },
    CreateCompleted {
        epoch: u64,
        result: Result<Record, ApiError>,
        reply: RpcReplyPort<Result<Record, SessionError>>,
    },
    DeleteRecord {
        record_id: RecordId,
        reply: RpcReplyPort<Result<(), SessionError>>,
    },
    DeleteCompleted {
        epoch: u64,
        record_id: RecordId,
        result: Result<(), ApiError>,
        reply: RpcReplyPort<Result<(), SessionError>>,
    },
    /// `saved` display time elapsed
    SavedElapsed { record_id: RecordId, seq: u64 },
    GetRecord {
        record_id: RecordId,
        reply: RpcReplyPort<Option<Record>>,
    },
    GetRecords {
        reply: RpcReplyPort<Vec<Record>>,
    },
    GetSaveState {
        record_id: RecordId,
        reply: RpcReplyPort<SaveState>,
    },
    Inspect {
        record_id: RecordId,
        reply: RpcReplyPort<Option<RecordInspection>>,
    },
}

// ============================================================================
// Actor Implementation
// ============================================================================

#[async_trait]
impl Actor for AutosaveActor {
    type Msg = AutosaveMsg;
    type State = AutosaveState;
    type Arguments = AutosaveArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            actor_id = %myself.get_id(),
            session_id = %args.session_id,
            container_id = %args.config.container_id,
            "AutosaveActor starting"
        );

        Ok(AutosaveState {
            session_id: args.session_id,
            container_id: args.config.container_id,
            debounce: args.config.debounce,
            saved_display: args.config.saved_display,
            api: args.api,
            events: args.events,
            epoch: 0,
            next_seq: 0,
            collection: RecordCollection::new(),
            versions: VersionStore::new(),
            pending: PendingChangeBuffer::new(),
            snapshots: SnapshotCache::new(),
            states: SaveStates::new(),
            in_flight: HashMap::new(),
            deferred: HashSet::new(),
            flush_timers: HashMap::new(),
            saved_timers: HashMap::new(),
            locked: HashSet::new(),
            open_conflicts: HashSet::new(),
            error_handled: HashSet::new(),
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            AutosaveMsg::Initialize { records, reply } => {
                self.handle_initialize(records, state);
                let _ = reply.send(());
            }
            AutosaveMsg::Load { reply } => {
                let api = state.api.clone();
                let container_id = state.container_id.clone();
                tokio::spawn(async move {
                    let result = api.list(&container_id).await;
                    let _ = myself.cast(AutosaveMsg::LoadCompleted { result, reply });
                });
            }
            AutosaveMsg::LoadCompleted { result, reply } => {
                let result = match result {
                    Ok(records) => {
                        let count = records.len();
                        self.handle_initialize(records, state);
                        Ok(count)
                    }
                    Err(e) => {
                        tracing::warn!(
                            session_id = %state.session_id,
                            error = %e,
                            "Failed to load records"
                        );
                        Err(SessionError::Api(e))
                    }
                };
                let _ = reply.send(result);
            }
            AutosaveMsg::StageEdit {
                record_id,
                field,
                value,
                reply,
            } => {
                let result = self.handle_stage_edit(&myself, record_id, field, value, state);
                let _ = reply.send(result);
            }
            AutosaveMsg::FlushDue { record_id, seq } => {
                let current = state.flush_timers.get(&record_id).map(|t| t.seq);
                if current == Some(seq) {
                    state.flush_timers.remove(&record_id);
                    self.flush(&myself, record_id, state);
                }
            }
            AutosaveMsg::WriteCompleted {
                epoch,
                record_id,
                sent,
                result,
            } => {
                self.handle_write_completed(&myself, epoch, record_id, sent, result, state);
            }
            AutosaveMsg::ForceUpdate {
                record_id,
                changes,
                reply,
            } => {
                if let Err(e) = self.handle_force_update(&myself, record_id, changes, reply, state)
                {
                    tracing::debug!(record_id = %record_id, error = %e, "Force update refused");
                }
            }
            AutosaveMsg::ForceCompleted {
                epoch,
                record_id,
                result,
                reply,
            } => {
                let result = self.handle_force_completed(&myself, epoch, record_id, result, state);
                let _ = reply.send(result);
            }
            AutosaveMsg::Reconcile { record_id, reply } => {
                if !state.collection.contains(record_id) {
                    let _ = reply.send(Err(SessionError::UnknownRecord(record_id)));
                } else {
                    self.start_reconcile(&myself, record_id, ReconcileKind::Requested(reply), state);
                }
            }
            AutosaveMsg::AdoptServerState { record_id, reply } => {
                if !state.collection.contains(record_id) {
                    let _ = reply.send(Err(SessionError::UnknownRecord(record_id)));
                } else {
                    self.start_reconcile(&myself, record_id, ReconcileKind::Adopt(reply), state);
                }
            }
            AutosaveMsg::ReconcileCompleted {
                epoch,
                record_id,
                kind,
                result,
            } => {
                self.handle_reconcile_completed(epoch, record_id, kind, result, state);
            }
            AutosaveMsg::CancelConflict { record_id, reply } => {
                state.locked.remove(&record_id);
                state.open_conflicts.remove(&record_id);
                tracing::info!(record_id = %record_id, "Conflict dismissed without resolution");
                let _ = reply.send(());
            }
            AutosaveMsg::CreateRecord { fields, reply } => {
                let api = state.api.clone();
                let container_id = state.container_id.clone();
                let epoch = state.epoch;
                tokio::spawn(async move {
                    let result = api.create(&container_id, fields).await;
                    let _ = myself.cast(AutosaveMsg::CreateCompleted {
                        epoch,
                        result,
                        reply,
                    });
                });
            }
            AutosaveMsg::CreateCompleted {
                epoch,
                result,
                reply,
            } => {
                let result = self.handle_create_completed(epoch, result, state);
                let _ = reply.send(result);
            }
            AutosaveMsg::DeleteRecord { record_id, reply } => {
                if !state.collection.contains(record_id) {
                    let _ = reply.send(Err(SessionError::UnknownRecord(record_id)));
                } else {
                    let api = state.api.clone();
                    let container_id = state.container_id.clone();
                    let epoch = state.epoch;
                    tokio::spawn(async move {
                        let result = api.delete(&container_id, record_id).await;
                        let _ = myself.cast(AutosaveMsg::DeleteCompleted {
                            epoch,
                            record_id,
                            result,
                            reply,
                        });
                    });
                }
            }
            AutosaveMsg::DeleteCompleted {
                epoch,
                record_id,
                result,
                reply,
            } => {
                let result = match result {
                    // Already gone on the server counts as deleted
                    Ok(()) | Err(ApiError::NotFound) => {
                        if epoch == state.epoch && state.collection.contains(record_id) {
                            self.forget(record_id, state);
                            tracing::info!(record_id = %record_id, "Record deleted");
                            self.emit(
                                state,
                                SessionEvent::RecordRemoved {
                                    record_id,
                                    reason: RemovalReason::DeletedLocally,
                                },
                            );
                        }
                        Ok(())
                    }
                    Err(e) => Err(SessionError::user_action("delete", e)),
                };
                let _ = reply.send(result);
            }
            AutosaveMsg::SavedElapsed { record_id, seq } => {
                let current = state.saved_timers.get(&record_id).map(|t| t.seq);
                if current == Some(seq) {
                    state.saved_timers.remove(&record_id);
                    if state.states.get(record_id) == SaveState::Saved {
                        self.set_state(state, record_id, SaveState::Idle);
                    }
                }
            }
            AutosaveMsg::GetRecord { record_id, reply } => {
                let _ = reply.send(state.collection.get(record_id).cloned());
            }
            AutosaveMsg::GetRecords { reply } => {
                let _ = reply.send(state.collection.records());
            }
            AutosaveMsg::GetSaveState { record_id, reply } => {
                let _ = reply.send(state.states.get(record_id));
            }
            AutosaveMsg::Inspect { record_id, reply } => {
                let _ = reply.send(self.inspect(record_id, state));
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        cancel_all(&mut state.flush_timers);
        cancel_all(&mut state.saved_timers);
        tracing::info!(
            actor_id = %myself.get_id(),
            session_id = %state.session_id,
            "AutosaveActor stopped"
        );
        Ok(())
    }
}

fn cancel_all(timers: &mut HashMap<RecordId, ScheduledTask>) {
    for (_, task) in timers.drain() {
        task.handle.abort();
    }
}

fn cancel(timers: &mut HashMap<RecordId, ScheduledTask>, record_id: RecordId) {
    if let Some(task) = timers.remove(&record_id) {
        task.handle.abort();
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl AutosaveActor {
    fn emit(&self, state: &AutosaveState, event: SessionEvent) {
        // No subscribers is fine
        let _ = state.events.send(event);
    }

    /// Store a new save state, publishing a change of status.
    ///
    /// Leaving `error` re-arms the automatic reconcile; leaving `saved`
    /// cancels its decay timer.
    fn set_state(&self, state: &mut AutosaveState, record_id: RecordId, next: SaveState) {
        if !next.is_error() {
            state.error_handled.remove(&record_id);
        }
        if next != SaveState::Saved {
            cancel(&mut state.saved_timers, record_id);
        }
        let status = next.status();
        let previous = state.states.set(record_id, next);
        if previous.status() != status {
            self.emit(state, SessionEvent::StatusChanged { record_id, status });
        }
    }

    fn next_seq(&self, state: &mut AutosaveState) -> u64 {
        state.next_seq += 1;
        state.next_seq
    }

    fn schedule_flush(
        &self,
        myself: &ActorRef<AutosaveMsg>,
        record_id: RecordId,
        state: &mut AutosaveState,
    ) {
        let seq = self.next_seq(state);
        let delay = state.debounce;
        let actor = myself.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = actor.cast(AutosaveMsg::FlushDue { record_id, seq });
        });
        if let Some(previous) = state
            .flush_timers
            .insert(record_id, ScheduledTask { seq, handle })
        {
            previous.handle.abort();
        }
    }

    fn schedule_saved_decay(
        &self,
        myself: &ActorRef<AutosaveMsg>,
        record_id: RecordId,
        state: &mut AutosaveState,
    ) {
        let seq = self.next_seq(state);
        let delay = state.saved_display;
        let actor = myself.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = actor.cast(AutosaveMsg::SavedElapsed { record_id, seq });
        });
        if let Some(previous) = state
            .saved_timers
            .insert(record_id, ScheduledTask { seq, handle })
        {
            previous.handle.abort();
        }
    }

    fn handle_initialize(&self, records: Vec<Record>, state: &mut AutosaveState) {
        cancel_all(&mut state.flush_timers);
        cancel_all(&mut state.saved_timers);
        state.epoch += 1;
        state.pending.clear_all();
        state.snapshots.clear_all();
        state.states.clear_all();
        state.in_flight.clear();
        state.deferred.clear();
        state.locked.clear();
        state.open_conflicts.clear();
        state.error_handled.clear();

        state.versions.seed(&records);
        for record in &records {
            state.states.set(record.id, SaveState::Idle);
        }
        let record_count = records.len();
        state.collection.load(records);

        tracing::info!(
            session_id = %state.session_id,
            epoch = state.epoch,
            record_count,
            "Session initialized"
        );
        self.emit(state, SessionEvent::Loaded { record_count });
    }

    fn handle_stage_edit(
        &self,
        myself: &ActorRef<AutosaveMsg>,
        record_id: RecordId,
        field: String,
        value: FieldValue,
        state: &mut AutosaveState,
    ) -> Result<(), SessionError> {
        let Some(record) = state.collection.get(record_id) else {
            return Err(SessionError::UnknownRecord(record_id));
        };
        if state.locked.contains(&record_id) {
            return Err(SessionError::RecordLocked(record_id));
        }

        state.snapshots.capture_if_absent(record);
        state.pending.stage(record_id, &field, value.clone());
        let mut change = FieldChanges::new();
        change.insert(field, value);
        state.collection.apply_changes(record_id, &change);
        self.set_state(state, record_id, SaveState::Saving);
        self.schedule_flush(myself, record_id, state);
        Ok(())
    }

    fn flush(&self, myself: &ActorRef<AutosaveMsg>, record_id: RecordId, state: &mut AutosaveState) {
        if !state.collection.contains(record_id) || state.locked.contains(&record_id) {
            return;
        }
        if state.in_flight.contains_key(&record_id) {
            tracing::debug!(record_id = %record_id, "Write in flight, deferring flush");
            state.deferred.insert(record_id);
            return;
        }
        let changes = state.pending.take(record_id);
        if changes.is_empty() {
            return;
        }

        let precondition = state.versions.get(record_id).cloned();
        state.in_flight.insert(record_id, changes.clone());
        tracing::debug!(
            record_id = %record_id,
            fields = changes.len(),
            precondition = ?precondition.as_ref().map(VersionToken::as_str),
            "Flushing record"
        );

        let api = state.api.clone();
        let container_id = state.container_id.clone();
        let epoch = state.epoch;
        let actor = myself.clone();
        tokio::spawn(async move {
            let result = api
                .patch(&container_id, record_id, changes.clone(), precondition)
                .await;
            let _ = actor.cast(AutosaveMsg::WriteCompleted {
                epoch,
                record_id,
                sent: changes,
                result,
            });
        });
    }

    /// Show a confirmed server record, keeping edits staged since the write
    fn apply_confirmed(
        &self,
        myself: &ActorRef<AutosaveMsg>,
        server: &Record,
        state: &mut AutosaveState,
    ) {
        let record_id = server.id;
        state.versions.observe(server);

        let newer = state.pending.get(record_id).cloned().unwrap_or_default();
        let mut shown = server.clone();
        shown.apply(&newer);
        state.collection.replace(shown);

        if newer.is_empty() {
            state.snapshots.discard(record_id);
            self.set_state(state, record_id, SaveState::Saved);
            self.schedule_saved_decay(myself, record_id, state);
        } else {
            state.snapshots.rebase(server);
        }
        self.emit(state, SessionEvent::RecordUpdated { record_id });
    }

    /// Roll a record back to its last confirmed copy and report the failure
    fn fail_write(
        &self,
        myself: &ActorRef<AutosaveMsg>,
        record_id: RecordId,
        error: &ApiError,
        state: &mut AutosaveState,
    ) {
        cancel(&mut state.flush_timers, record_id);
        state.deferred.remove(&record_id);
        state.pending.clear(record_id);
        if let Some(snapshot) = state.snapshots.take(record_id) {
            state.collection.replace(snapshot);
        }
        self.set_state(
            state,
            record_id,
            SaveState::Error {
                message: error.to_string(),
            },
        );
        self.emit(state, SessionEvent::RecordUpdated { record_id });

        if state.error_handled.insert(record_id) {
            self.start_reconcile(myself, record_id, ReconcileKind::Automatic, state);
        }
    }

    fn handle_write_completed(
        &self,
        myself: &ActorRef<AutosaveMsg>,
        epoch: u64,
        record_id: RecordId,
        sent: FieldChanges,
        result: Result<Record, ApiError>,
        state: &mut AutosaveState,
    ) {
        if epoch != state.epoch {
            tracing::debug!(record_id = %record_id, epoch, "Dropping write from previous load");
            return;
        }
        state.in_flight.remove(&record_id);
        if !state.collection.contains(record_id) {
            state.deferred.remove(&record_id);
            return;
        }

        match result {
            Ok(server) => {
                tracing::debug!(
                    record_id = %record_id,
                    version = %server.version,
                    "Write confirmed"
                );
                self.apply_confirmed(myself, &server, state);
            }
            Err(ApiError::PreconditionFailed { message, .. }) => {
                cancel(&mut state.flush_timers, record_id);
                state.deferred.remove(&record_id);
                state.pending.restore_under(record_id, sent);
                state.locked.insert(record_id);

                let ctx = ConflictContext {
                    record_id,
                    message,
                    pending: state.pending.get(record_id).cloned().unwrap_or_default(),
                };
                tracing::warn!(
                    record_id = %record_id,
                    message = %ctx.message,
                    "Write rejected, record changed remotely"
                );
                self.set_state(state, record_id, SaveState::Conflict(ctx.clone()));
                if state.open_conflicts.insert(record_id) {
                    self.emit(state, SessionEvent::ConflictDetected(ctx));
                }
                return;
            }
            Err(e) => {
                tracing::warn!(record_id = %record_id, error = %e, "Write failed, rolling back");
                self.fail_write(myself, record_id, &e, state);
                return;
            }
        }

        if state.deferred.remove(&record_id) {
            self.flush(myself, record_id, state);
        }
    }

    fn handle_force_update(
        &self,
        myself: &ActorRef<AutosaveMsg>,
        record_id: RecordId,
        changes: FieldChanges,
        reply: RpcReplyPort<Result<Record, SessionError>>,
        state: &mut AutosaveState,
    ) -> Result<(), SessionError> {
        let refusal = match state.collection.get(record_id) {
            None => Some(SessionError::UnknownRecord(record_id)),
            Some(_) if state.in_flight.contains_key(&record_id) => {
                Some(SessionError::WriteInFlight(record_id))
            }
            Some(_) => None,
        };
        if let Some(e) = refusal {
            let _ = reply.send(Err(e.clone()));
            return Err(e);
        }

        cancel(&mut state.flush_timers, record_id);
        state.deferred.remove(&record_id);
        state.pending.clear(record_id);
        if let Some(record) = state.collection.get(record_id) {
            state.snapshots.capture_if_absent(record);
        }
        state.collection.apply_changes(record_id, &changes);
        state.in_flight.insert(record_id, changes.clone());
        self.set_state(state, record_id, SaveState::Saving);
        tracing::info!(record_id = %record_id, fields = changes.len(), "Overwriting record");

        let api = state.api.clone();
        let container_id = state.container_id.clone();
        let epoch = state.epoch;
        let actor = myself.clone();
        tokio::spawn(async move {
            let result = api.patch(&container_id, record_id, changes, None).await;
            let _ = actor.cast(AutosaveMsg::ForceCompleted {
                epoch,
                record_id,
                result,
                reply,
            });
        });
        Ok(())
    }

    fn handle_force_completed(
        &self,
        myself: &ActorRef<AutosaveMsg>,
        epoch: u64,
        record_id: RecordId,
        result: Result<Record, ApiError>,
        state: &mut AutosaveState,
    ) -> Result<Record, SessionError> {
        if epoch != state.epoch || !state.collection.contains(record_id) {
            return result.map_err(SessionError::Api);
        }
        state.in_flight.remove(&record_id);
        state.locked.remove(&record_id);
        state.open_conflicts.remove(&record_id);

        match result {
            Ok(server) => {
                self.apply_confirmed(myself, &server, state);
                if state.deferred.remove(&record_id) {
                    self.flush(myself, record_id, state);
                }
                Ok(server)
            }
            Err(e) => {
                // Not a second conflict: an unconditional write has nothing left to resolve
                tracing::warn!(record_id = %record_id, error = %e, "Overwrite failed");
                self.fail_write(myself, record_id, &e, state);
                Err(SessionError::Api(e))
            }
        }
    }

    fn start_reconcile(
        &self,
        myself: &ActorRef<AutosaveMsg>,
        record_id: RecordId,
        kind: ReconcileKind,
        state: &AutosaveState,
    ) {
        tracing::debug!(record_id = %record_id, kind = ?kind, "Reconciling record");
        let api = state.api.clone();
        let container_id = state.container_id.clone();
        let epoch = state.epoch;
        let actor = myself.clone();
        tokio::spawn(async move {
            let result = api.get(&container_id, record_id).await;
            let _ = actor.cast(AutosaveMsg::ReconcileCompleted {
                epoch,
                record_id,
                kind,
                result,
            });
        });
    }

    fn handle_reconcile_completed(
        &self,
        epoch: u64,
        record_id: RecordId,
        kind: ReconcileKind,
        result: Result<Record, ApiError>,
        state: &mut AutosaveState,
    ) {
        let outcome = if epoch != state.epoch || !state.collection.contains(record_id) {
            Ok(None)
        } else {
            match result {
                Ok(server) => Ok(Some(self.apply_reconciled(server, &kind, state))),
                Err(ApiError::NotFound) => {
                    tracing::warn!(record_id = %record_id, "Record no longer exists on the server");
                    self.forget(record_id, state);
                    self.emit(
                        state,
                        SessionEvent::RecordRemoved {
                            record_id,
                            reason: RemovalReason::DeletedRemotely,
                        },
                    );
                    Ok(None)
                }
                Err(e) => {
                    tracing::warn!(record_id = %record_id, error = %e, "Reconcile failed");
                    Err(SessionError::Api(e))
                }
            }
        };

        match kind {
            ReconcileKind::Requested(reply) | ReconcileKind::Adopt(reply) => {
                let _ = reply.send(outcome);
            }
            ReconcileKind::Automatic => {}
        }
    }

    fn apply_reconciled(
        &self,
        server: Record,
        kind: &ReconcileKind,
        state: &mut AutosaveState,
    ) -> Record {
        let record_id = server.id;
        state.versions.observe(&server);

        if let ReconcileKind::Adopt(_) = kind {
            cancel(&mut state.flush_timers, record_id);
            state.deferred.remove(&record_id);
            state.pending.clear(record_id);
            state.snapshots.discard(record_id);
            state.locked.remove(&record_id);
            state.open_conflicts.remove(&record_id);
            state.collection.replace(server.clone());
            self.set_state(state, record_id, SaveState::Idle);
            self.emit(state, SessionEvent::RecordUpdated { record_id });
            tracing::info!(record_id = %record_id, version = %server.version, "Adopted server copy");
            return server;
        }

        let unconfirmed = state.pending.has_pending(record_id)
            || state.in_flight.contains_key(&record_id)
            || state.locked.contains(&record_id);
        if unconfirmed {
            // User edits stay visible on top of the fresh baseline
            let mut shown = server.clone();
            if let Some(in_flight) = state.in_flight.get(&record_id) {
                shown.apply(in_flight);
            }
            if let Some(pending) = state.pending.get(record_id) {
                shown.apply(pending);
            }
            state.snapshots.rebase(&server);
            state.collection.replace(shown);
        } else {
            state.snapshots.discard(record_id);
            state.collection.replace(server.clone());
            self.set_state(state, record_id, SaveState::Idle);
        }
        self.emit(state, SessionEvent::RecordUpdated { record_id });
        server
    }

    fn handle_create_completed(
        &self,
        epoch: u64,
        result: Result<Record, ApiError>,
        state: &mut AutosaveState,
    ) -> Result<Record, SessionError> {
        let record = result.map_err(|e| SessionError::user_action("create", e))?;
        if epoch == state.epoch {
            let record_id = record.id;
            state.versions.observe(&record);
            state.states.set(record_id, SaveState::Idle);
            state.collection.insert(record.clone());
            tracing::info!(record_id = %record_id, version = %record.version, "Record created");
            self.emit(state, SessionEvent::RecordUpdated { record_id });
        }
        Ok(record)
    }

    /// Drop every piece of state held for a record
    fn forget(&self, record_id: RecordId, state: &mut AutosaveState) {
        cancel(&mut state.flush_timers, record_id);
        cancel(&mut state.saved_timers, record_id);
        state.collection.remove(record_id);
        state.versions.remove(record_id);
        state.pending.clear(record_id);
        state.snapshots.discard(record_id);
        state.states.remove(record_id);
        state.in_flight.remove(&record_id);
        state.deferred.remove(&record_id);
        state.locked.remove(&record_id);
        state.open_conflicts.remove(&record_id);
        state.error_handled.remove(&record_id);
    }

    fn inspect(&self, record_id: RecordId, state: &AutosaveState) -> Option<RecordInspection> {
        let record = state.collection.get(record_id)?.clone();
        Some(RecordInspection {
            record,
            state: state.states.get(record_id),
            version: state.versions.get(record_id).cloned(),
            pending: state.pending.get(record_id).cloned().unwrap_or_default(),
            in_flight: state.in_flight.get(&record_id).cloned(),
            has_snapshot: state.snapshots.contains(record_id),
            locked: state.locked.contains(&record_id),
        })
    }
}
