//! Notifications published by a grid session
//!
//! Subscribers get them through [`crate::SessionHandle::subscribe`]. A lagging
//! subscriber loses the oldest events; the session itself never blocks on
//! delivery.

use shared_types::{RecordId, SaveStatus};

use crate::state::ConflictContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Deleted through this session
    DeletedLocally,
    /// Found missing on the server while reconciling
    DeletedRemotely,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A fresh record set replaced the collection
    Loaded { record_count: usize },
    StatusChanged {
        record_id: RecordId,
        status: SaveStatus,
    },
    /// The displayed copy of a record changed after a server round trip
    RecordUpdated { record_id: RecordId },
    RecordRemoved {
        record_id: RecordId,
        reason: RemovalReason,
    },
    /// Published once per open conflict
    ConflictDetected(ConflictContext),
}
