//! Classified error taxonomy for remote calls and sync passes
//!
//! Every remote failure is wrapped in an `anyhow::Error` carrying a
//! `SyncError` at its root, so callers can recover the class with
//! `SyncError::classify` and decide whether to retry, refresh
//! credentials, or fall back to a full sync.

use std::time::Duration;

/// Classified failure for a remote mailbox operation
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The remote rejected the call with HTTP 429
    #[error("rate limited by remote service")]
    RateLimited {
        /// Server-suggested wait, when a Retry-After header was present
        retry_after: Option<Duration>,
    },

    /// A 5xx from the remote; safe to retry after a backoff
    #[error("transient server error (status {status})")]
    TransientServer { status: u16 },

    /// The access token was rejected; the caller must refresh credentials
    #[error("authentication expired")]
    AuthExpired,

    /// The response body could not be decoded; retrying will not help
    #[error("malformed remote response: {0}")]
    Malformed(String),

    /// Connection failure or timeout
    #[error("network error or timeout: {0}")]
    NetworkTimeout(String),

    /// An HTTP status outside the recognized classes. Kept structural
    /// so call sites can remap specific codes (404 on the changes feed
    /// means an expired cursor).
    #[error("unexpected status {0}")]
    UnexpectedStatus(u16),

    /// The sync cursor is expired or unrecognized by the remote
    #[error("sync cursor expired or unrecognized")]
    CursorExpired,

    /// An action was dispatched without the ids or payload it requires
    #[error("action is missing its target id or payload")]
    MissingTarget,

    /// Two conversations were created for one identity. The creation
    /// serializer makes this unreachable; surfacing it means a bug.
    #[error("duplicate conversation creation for identity {0}")]
    DuplicateCreationRace(String),
}

impl SyncError {
    /// Recover the classified error from an `anyhow::Error`, if any
    pub fn classify(err: &anyhow::Error) -> Option<&SyncError> {
        err.downcast_ref::<SyncError>()
    }

    /// Whether a failure of this class may succeed on a later attempt
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            SyncError::RateLimited { .. }
                | SyncError::TransientServer { .. }
                | SyncError::NetworkTimeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_classify_through_context() {
        let err: anyhow::Error = anyhow::Error::new(SyncError::CursorExpired)
            .context("listing changes")
            .context("sync pass");
        assert!(matches!(
            SyncError::classify(&err),
            Some(SyncError::CursorExpired)
        ));
    }

    #[test]
    fn test_classify_unclassified() {
        let err = anyhow::anyhow!("disk full");
        assert!(SyncError::classify(&err).is_none());
    }

    #[test]
    fn test_retriable_classes() {
        assert!(SyncError::RateLimited { retry_after: None }.is_retriable());
        assert!(SyncError::TransientServer { status: 503 }.is_retriable());
        assert!(SyncError::NetworkTimeout("reset".into()).is_retriable());
        assert!(!SyncError::AuthExpired.is_retriable());
        assert!(!SyncError::Malformed("bad json".into()).is_retriable());
        assert!(!SyncError::UnexpectedStatus(404).is_retriable());
        assert!(!SyncError::MissingTarget.is_retriable());
    }
}
