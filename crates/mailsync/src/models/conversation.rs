//! Conversation model keyed by participant identity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity hash of a conversation: a deterministic digest over the
/// normalized participant set plus the conversation kind. See
/// `crate::identity`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ConversationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Shape of a conversation's participant set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversationKind {
    /// One-on-one exchange (at most two unique participants)
    Direct,
    /// Three or more participants
    Group,
    /// Carries a List-Id header
    MailingList,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::Direct => "direct",
            ConversationKind::Group => "group",
            ConversationKind::MailingList => "mailing-list",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(ConversationKind::Direct),
            "group" => Some(ConversationKind::Group),
            "mailing-list" => Some(ConversationKind::MailingList),
            _ => None,
        }
    }
}

/// A conversation groups messages exchanged among one participant set.
///
/// Invariant: exactly one Conversation exists per identity hash. An
/// archived conversation is reactivated, never duplicated, when a new
/// message for the same identity arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Identity hash, also the primary key
    pub id: ConversationId,
    /// Participant-set shape used when deriving the identity
    pub kind: ConversationKind,
    /// Normalized participant addresses, sorted
    pub participants: Vec<String>,
    /// When the conversation was archived, if it is
    pub archived_at: Option<DateTime<Utc>>,
    /// Hidden from all views (stronger than archived)
    pub hidden: bool,
    /// Number of unread messages; recomputed by sync rollups
    pub unread_count: usize,
    /// Timestamp of the most recent message
    pub last_message_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(
        id: ConversationId,
        kind: ConversationKind,
        participants: Vec<String>,
        last_message_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            kind,
            participants,
            archived_at: None,
            hidden: false,
            unread_count: 0,
            last_message_at,
        }
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    /// Clear archived and hidden state. A new message always brings a
    /// conversation back into view.
    pub fn reactivate(&mut self) {
        self.archived_at = None;
        self.hidden = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reactivate_clears_archived_and_hidden() {
        let mut convo = Conversation::new(
            ConversationId::new("abc"),
            ConversationKind::Direct,
            vec!["a@x.com".into(), "b@x.com".into()],
            Utc::now(),
        );
        convo.archived_at = Some(Utc::now());
        convo.hidden = true;

        convo.reactivate();
        assert!(!convo.is_archived());
        assert!(!convo.hidden);
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            ConversationKind::Direct,
            ConversationKind::Group,
            ConversationKind::MailingList,
        ] {
            assert_eq!(ConversationKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ConversationKind::parse("other"), None);
    }
}
