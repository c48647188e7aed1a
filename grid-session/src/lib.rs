//! Optimistic autosave and conflict resolution for editable record grids
//!
//! A [`SessionHandle`] owns one editing session: the records the grid shows,
//! their version tokens, unconfirmed edits and per-record save states. Edits
//! are coalesced per record, written with a version precondition once the
//! debounce window closes, and rolled back when a write fails. Rejected
//! preconditions open a conflict that [`ConflictWorkflow`] resolves.

pub mod actors;
pub mod api;
pub mod cell;
pub mod config;
pub mod conflict;
pub mod error;
pub mod events;
pub mod navigation;
pub mod state;

pub use actors::{RecordInspection, SessionHandle};
pub use api::{ApiError, HttpRecordApi, RecordApi};
pub use cell::{CellEditor, CommitOutcome, FieldKind, SelectOption};
pub use config::SessionConfig;
pub use conflict::{ConflictWorkflow, Resolution};
pub use error::SessionError;
pub use events::{RemovalReason, SessionEvent};
pub use navigation::{
    CellAddress, Column, ColumnLayout, Direction, FocusOutcome, FocusRegistry, FocusTarget,
    GridNavigator, Viewport,
};
pub use state::{ConflictContext, SaveState};
