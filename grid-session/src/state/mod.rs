//! Per-session bookkeeping owned by the autosave actor
//!
//! Every structure here is plain synchronous state. The actor's mailbox is
//! the only writer, so none of them need locking.

mod collection;
mod pending;
mod save_state;
mod snapshot;
mod version_store;

pub use collection::RecordCollection;
pub use pending::PendingChangeBuffer;
pub use save_state::{ConflictContext, SaveState, SaveStates};
pub use snapshot::SnapshotCache;
pub use version_store::VersionStore;
