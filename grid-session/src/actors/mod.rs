//! Session actor and its client handle

pub mod autosave;
mod handle;

pub use autosave::{AutosaveActor, AutosaveArguments, AutosaveMsg, RecordInspection};
pub use handle::SessionHandle;
