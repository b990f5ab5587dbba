//! Durable queue rows for user-initiated mutations

use super::{ConversationId, MessageId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned identifier for a pending action row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId(pub i64);

/// What the user asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    MarkRead,
    MarkUnread,
    Star,
    Unstar,
    Archive,
    ArchiveConversation,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::MarkRead => "mark-read",
            ActionKind::MarkUnread => "mark-unread",
            ActionKind::Star => "star",
            ActionKind::Unstar => "unstar",
            ActionKind::Archive => "archive",
            ActionKind::ArchiveConversation => "archive-conversation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mark-read" => Some(ActionKind::MarkRead),
            "mark-unread" => Some(ActionKind::MarkUnread),
            "star" => Some(ActionKind::Star),
            "unstar" => Some(ActionKind::Unstar),
            "archive" => Some(ActionKind::Archive),
            "archive-conversation" => Some(ActionKind::ArchiveConversation),
            _ => None,
        }
    }
}

/// The entity an action applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionTarget {
    Message(MessageId),
    Conversation(ConversationId),
}

impl ActionTarget {
    pub fn as_str(&self) -> &str {
        match self {
            ActionTarget::Message(id) => id.as_str(),
            ActionTarget::Conversation(id) => id.as_str(),
        }
    }
}

/// Lifecycle of a pending action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionStatus {
    /// Waiting for dispatch (or returned after a retriable failure)
    Pending,
    /// Currently being executed against the remote
    Executing,
    /// Terminal: retries exhausted or a non-retriable failure
    Failed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Executing => "executing",
            ActionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ActionStatus::Pending),
            "executing" => Some(ActionStatus::Executing),
            "failed" => Some(ActionStatus::Failed),
            _ => None,
        }
    }
}

/// A queued user intent, applied optimistically to the local store and
/// dispatched asynchronously to the remote. Rows are durable so that
/// in-flight actions survive a process restart; completed actions are
/// deleted rather than kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub id: ActionId,
    pub kind: ActionKind,
    pub target: ActionTarget,
    /// Kind-specific data recorded at optimistic-apply time. For
    /// `ArchiveConversation` this is the exact set of message ids the
    /// inbox label was removed from, so the inverse restores precisely
    /// those messages even if membership changed concurrently.
    pub payload: serde_json::Value,
    pub status: ActionStatus,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl PendingAction {
    /// Build a new, not-yet-persisted action. The store assigns the id.
    pub fn new(kind: ActionKind, target: ActionTarget, payload: serde_json::Value) -> Self {
        Self {
            id: ActionId(0),
            kind,
            target,
            payload,
            status: ActionStatus::Pending,
            retry_count: 0,
            created_at: Utc::now(),
            last_attempt_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            ActionKind::MarkRead,
            ActionKind::MarkUnread,
            ActionKind::Star,
            ActionKind::Unstar,
            ActionKind::Archive,
            ActionKind::ArchiveConversation,
        ] {
            assert_eq!(ActionKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            ActionStatus::Pending,
            ActionStatus::Executing,
            ActionStatus::Failed,
        ] {
            assert_eq!(ActionStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_new_action_starts_pending() {
        let action = PendingAction::new(
            ActionKind::MarkRead,
            ActionTarget::Message(MessageId::new("m1")),
            serde_json::Value::Null,
        );
        assert_eq!(action.status, ActionStatus::Pending);
        assert_eq!(action.retry_count, 0);
        assert!(action.last_attempt_at.is_none());
    }
}
