//! Persisted sync cursor state per account

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tracks delta-sync progress for one account.
///
/// The cursor is an opaque remote-issued token meaning "all changes up
/// to this point are known". It is owned exclusively by the sync
/// engine and persisted between runs; when the remote reports it
/// expired it is treated as absent and a full sync rebuilds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    /// Account identifier
    pub account_id: String,
    /// Opaque remote sync cursor
    pub cursor: String,
    /// When the last successful sync pass completed
    pub last_sync_at: DateTime<Utc>,
}

impl SyncState {
    pub fn new(account_id: impl Into<String>, cursor: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            cursor: cursor.into(),
            last_sync_at: Utc::now(),
        }
    }

    /// Advance to a new cursor after a successful pass
    pub fn advanced(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = cursor.into();
        self.last_sync_at = Utc::now();
        self
    }
}
