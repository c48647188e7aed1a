//! Conflict detection and resolution tests
//!
//! Two sessions share one `FakeRecordApi`, standing in for two users editing
//! the same container.

mod common;

use std::time::Duration;

use common::*;
use grid_session::{
    ConflictContext, ConflictWorkflow, RemovalReason, Resolution, SaveState, SessionError,
    SessionEvent, SessionHandle,
};
use shared_types::{FieldValue, RecordId, VersionToken};
use tokio::time::sleep;

const FLUSHED: Duration = Duration::from_millis(510);

/// A writes quantity 4 (`v2`), then B, still holding `v1`, writes 9
async fn conflicting_sessions() -> (
    std::sync::Arc<FakeRecordApi>,
    SessionHandle,
    SessionHandle,
    Vec<SessionEvent>,
) {
    let api = FakeRecordApi::with_records(vec![quantity_record(7, 1.0)]);
    let session_a = loaded_session(&api).await;
    let session_b = loaded_session(&api).await;
    let mut events_b = session_b.subscribe();

    session_a.stage_edit(RecordId(7), "quantity", 4.0).await.unwrap();
    sleep(FLUSHED).await;
    assert_eq!(api.record(RecordId(7)).unwrap().version, VersionToken::new("v2"));

    session_b.stage_edit(RecordId(7), "quantity", 9.0).await.unwrap();
    sleep(FLUSHED).await;

    let events = drain_events(&mut events_b);
    (api, session_a, session_b, events)
}

fn conflicts(events: &[SessionEvent]) -> Vec<ConflictContext> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::ConflictDetected(ctx) => Some(ctx.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_stale_write_opens_conflict() {
    let (api, _a, session_b, events) = conflicting_sessions().await;

    let detected = conflicts(&events);
    assert_eq!(detected.len(), 1);
    assert_eq!(detected[0].record_id, RecordId(7));
    assert_eq!(
        detected[0].pending,
        changes(&[("quantity", FieldValue::Number(9.0))])
    );

    let inspection = session_b.inspect(RecordId(7)).await.unwrap().unwrap();
    assert_eq!(inspection.state, SaveState::Conflict(detected[0].clone()));
    assert!(inspection.locked);
    assert!(inspection.has_snapshot);
    assert_eq!(inspection.version, Some(VersionToken::new("v1")));
    assert_eq!(inspection.pending, detected[0].pending);

    let err = session_b
        .stage_edit(RecordId(7), "quantity", 10.0)
        .await
        .unwrap_err();
    assert_eq!(err, SessionError::RecordLocked(RecordId(7)));

    // Conflicts are never retried on their own
    sleep(Duration::from_secs(10)).await;
    assert_eq!(api.patches().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_conflict_surfaces_once() {
    let (_api, _a, session_b, events) = conflicting_sessions().await;
    let workflow = ConflictWorkflow::new(session_b);
    let ctx = conflicts(&events).remove(0);

    assert!(workflow.open(ctx.clone()));
    assert!(!workflow.open(ctx.clone()));
    assert!(!workflow.handle_event(&SessionEvent::ConflictDetected(ctx.clone())));
    assert_eq!(workflow.active(), Some(ctx));
    assert_eq!(workflow.queued(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_takes_server_copy() {
    let (api, _a, session_b, events) = conflicting_sessions().await;
    let workflow = ConflictWorkflow::new(session_b.clone());
    for event in &events {
        workflow.handle_event(event);
    }

    let resolution = workflow.resolve_by_refresh().await.unwrap().unwrap();
    let Resolution::Refreshed(Some(server)) = resolution else {
        panic!("expected refreshed record, got {resolution:?}");
    };
    assert_eq!(server.version, VersionToken::new("v2"));

    let inspection = session_b.inspect(RecordId(7)).await.unwrap().unwrap();
    assert_eq!(inspection.record.field("quantity"), Some(&FieldValue::Number(4.0)));
    assert_eq!(inspection.version, Some(VersionToken::new("v2")));
    assert_eq!(inspection.state, SaveState::Idle);
    assert!(!inspection.locked);
    assert!(inspection.pending.is_empty());
    assert!(!inspection.has_snapshot);
    assert!(workflow.active().is_none());

    // Editing works again and uses the adopted token
    session_b.stage_edit(RecordId(7), "quantity", 6.0).await.unwrap();
    sleep(FLUSHED).await;
    assert_eq!(
        api.patches().last().unwrap().precondition,
        Some(VersionToken::new("v2"))
    );
    assert_eq!(session_b.save_state(RecordId(7)).await.unwrap(), SaveState::Saved);
}

#[tokio::test(start_paused = true)]
async fn test_overwrite_forces_pending_changes() {
    let (api, _a, session_b, events) = conflicting_sessions().await;
    let workflow = ConflictWorkflow::new(session_b.clone());
    for event in &events {
        workflow.handle_event(event);
    }

    let resolution = workflow.resolve_by_overwrite().await.unwrap().unwrap();
    let Resolution::Overwritten(server) = resolution else {
        panic!("expected overwrite, got {resolution:?}");
    };
    assert_eq!(server.version, VersionToken::new("v3"));

    let last = api.patches().last().cloned().unwrap();
    assert_eq!(last.precondition, None);
    assert_eq!(last.fields, changes(&[("quantity", FieldValue::Number(9.0))]));
    assert_eq!(
        api.record(RecordId(7)).unwrap().field("quantity"),
        Some(&FieldValue::Number(9.0))
    );

    let inspection = session_b.inspect(RecordId(7)).await.unwrap().unwrap();
    assert_eq!(inspection.state, SaveState::Saved);
    assert_eq!(inspection.version, Some(VersionToken::new("v3")));
    assert!(!inspection.locked);
    assert!(inspection.pending.is_empty());
    assert!(workflow.active().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_failed_overwrite_reports_error_not_conflict() {
    let (api, _a, session_b, events) = conflicting_sessions().await;
    let workflow = ConflictWorkflow::new(session_b.clone());
    for event in &events {
        workflow.handle_event(event);
    }
    api.fail_next_patch(grid_session::ApiError::PreconditionFailed {
        message: "still stale".to_string(),
        current: None,
    });
    api.fail_next_get(grid_session::ApiError::Transport("offline".to_string()));
    let mut events_b = session_b.subscribe();

    let err = workflow.resolve_by_overwrite().await.unwrap_err();
    assert!(matches!(err, SessionError::Api(_)));
    settle().await;

    assert!(session_b.save_state(RecordId(7)).await.unwrap().is_error());
    assert!(conflicts(&drain_events(&mut events_b)).is_empty());
    assert!(workflow.active().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_leaves_conflict_marked() {
    let (api, _a, session_b, events) = conflicting_sessions().await;
    let workflow = ConflictWorkflow::new(session_b.clone());
    for event in &events {
        workflow.handle_event(event);
    }

    assert!(workflow.can_dismiss());
    assert_eq!(workflow.cancel().await.unwrap(), Some(Resolution::Cancelled));
    assert!(workflow.active().is_none());

    let inspection = session_b.inspect(RecordId(7)).await.unwrap().unwrap();
    assert!(matches!(inspection.state, SaveState::Conflict(_)));
    assert!(!inspection.locked);
    assert_eq!(
        inspection.pending,
        changes(&[("quantity", FieldValue::Number(9.0))])
    );

    sleep(Duration::from_secs(10)).await;
    assert_eq!(api.patches().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_dismiss_disabled_while_resolving() {
    let (api, _a, session_b, events) = conflicting_sessions().await;
    let workflow = ConflictWorkflow::new(session_b.clone());
    for event in &events {
        workflow.handle_event(event);
    }
    api.hold_writes();

    let resolving = workflow.clone();
    let task = tokio::spawn(async move { resolving.resolve_by_overwrite().await });
    settle().await;

    assert!(workflow.is_resolving());
    assert!(!workflow.can_dismiss());
    assert!(workflow.cancel().await.is_err());
    assert!(workflow.resolve_by_refresh().await.is_err());

    api.release_writes();
    let resolution = task.await.unwrap().unwrap();
    assert!(matches!(resolution, Some(Resolution::Overwritten(_))));
    assert!(!workflow.can_dismiss());
}

#[tokio::test(start_paused = true)]
async fn test_conflicts_for_other_records_queue() {
    let api = FakeRecordApi::with_records(vec![quantity_record(1, 1.0), quantity_record(2, 1.0)]);
    let session = loaded_session(&api).await;
    let workflow = ConflictWorkflow::new(session.clone());
    let mut events = session.subscribe();

    api.server_update(RecordId(1), "quantity", 5.0);
    api.server_update(RecordId(2), "quantity", 5.0);
    session.stage_edit(RecordId(1), "quantity", 8.0).await.unwrap();
    session.stage_edit(RecordId(2), "quantity", 8.0).await.unwrap();
    sleep(FLUSHED).await;

    for event in drain_events(&mut events) {
        workflow.handle_event(&event);
    }
    let first = workflow.active().unwrap().record_id;
    assert_eq!(workflow.queued(), 1);

    workflow.resolve_by_refresh().await.unwrap();
    let second = workflow.active().unwrap().record_id;
    assert_ne!(first, second);
    assert_eq!(workflow.queued(), 0);

    workflow.resolve_by_refresh().await.unwrap();
    assert!(workflow.active().is_none());
    for record in session.records().await.unwrap() {
        assert_eq!(record.field("quantity"), Some(&FieldValue::Number(5.0)));
    }
}

// ============================================================================
// Stale Context Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_reload_closes_open_conflict() {
    let (api, _a, session_b, events) = conflicting_sessions().await;
    let workflow = ConflictWorkflow::new(session_b.clone());
    for event in &events {
        workflow.handle_event(event);
    }
    assert!(workflow.active().is_some());

    let mut events_b = session_b.subscribe();
    session_b.load().await.unwrap();
    for event in drain_events(&mut events_b) {
        workflow.handle_event(&event);
    }

    assert!(workflow.active().is_none());
    assert_eq!(workflow.queued(), 0);
    assert_eq!(workflow.resolve_by_overwrite().await.unwrap(), None);
    assert_eq!(api.patches().len(), 2);
    assert_eq!(
        api.record(RecordId(7)).unwrap().field("quantity"),
        Some(&FieldValue::Number(4.0))
    );
}

#[tokio::test(start_paused = true)]
async fn test_overwrite_refused_once_session_left_conflict() {
    let (api, _a, session_b, events) = conflicting_sessions().await;
    let workflow = ConflictWorkflow::new(session_b.clone());
    for event in &events {
        workflow.handle_event(event);
    }

    // The reload notification never reaches the workflow
    session_b.load().await.unwrap();
    assert_eq!(session_b.save_state(RecordId(7)).await.unwrap(), SaveState::Idle);

    let err = workflow.resolve_by_overwrite().await.unwrap_err();
    assert_eq!(err, SessionError::NotInConflict(RecordId(7)));
    assert!(workflow.active().is_none());
    assert!(!workflow.is_resolving());
    assert_eq!(api.patches().len(), 2);
    assert_eq!(
        api.record(RecordId(7)).unwrap().field("quantity"),
        Some(&FieldValue::Number(4.0))
    );
}

#[tokio::test(start_paused = true)]
async fn test_removed_record_drops_its_conflict() {
    let api = FakeRecordApi::with_records(vec![quantity_record(1, 1.0), quantity_record(2, 1.0)]);
    let session = loaded_session(&api).await;
    let workflow = ConflictWorkflow::new(session.clone());
    let mut events = session.subscribe();

    api.server_update(RecordId(1), "quantity", 5.0);
    api.server_update(RecordId(2), "quantity", 5.0);
    session.stage_edit(RecordId(1), "quantity", 8.0).await.unwrap();
    session.stage_edit(RecordId(2), "quantity", 8.0).await.unwrap();
    sleep(FLUSHED).await;
    for event in drain_events(&mut events) {
        workflow.handle_event(&event);
    }
    let first = workflow.active().unwrap().record_id;
    let second = if first == RecordId(1) { RecordId(2) } else { RecordId(1) };

    api.server_delete(first);
    assert_eq!(session.reconcile(first).await.unwrap(), None);
    let removed = drain_events(&mut events);
    assert!(removed.contains(&SessionEvent::RecordRemoved {
        record_id: first,
        reason: RemovalReason::DeletedRemotely,
    }));
    for event in &removed {
        workflow.handle_event(event);
    }

    assert_eq!(workflow.active().map(|c| c.record_id), Some(second));
    assert_eq!(workflow.queued(), 0);
}
