//! Delta synchronization between the remote mailbox and the local store

mod changeset;
mod engine;
mod timing;

pub use changeset::ChangeSet;
pub use engine::{DeltaSyncEngine, SyncConfig, SyncMode, SyncStats};
pub use timing::{cooldown_elapsed, failure_backoff};
