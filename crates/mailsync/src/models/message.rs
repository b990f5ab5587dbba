//! Message model and participant addresses

use super::ConversationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a message (remote-assigned)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An email address with optional display name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailAddress {
    /// Display name (e.g., "Ada Lovelace")
    pub name: Option<String>,
    /// Address (e.g., "ada@example.com")
    pub email: String,
}

impl EmailAddress {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            name: None,
            email: email.into(),
        }
    }

    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            email: email.into(),
        }
    }

    /// Parse an address from a string like "Ada Lovelace <ada@example.com>"
    pub fn parse(s: &str) -> Self {
        let s = s.trim();

        if let Some(angle_start) = s.rfind('<')
            && let Some(angle_end) = s.rfind('>')
            && angle_start < angle_end
        {
            let name = s[..angle_start].trim();
            let email = s[angle_start + 1..angle_end].trim();
            return Self {
                name: if name.is_empty() {
                    None
                } else {
                    Some(name.to_string())
                },
                email: email.to_string(),
            };
        }

        Self {
            name: None,
            email: s.to_string(),
        }
    }

    /// Address normalized for identity hashing: trimmed and lowercased
    pub fn normalized(&self) -> String {
        self.email.trim().to_ascii_lowercase()
    }
}

/// A single mail message mirrored from the remote mailbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Remote message id
    pub id: MessageId,
    /// Identity hash of the conversation this message belongs to.
    /// Assigned during sync once participants have been resolved.
    pub conversation_id: Option<ConversationId>,
    /// Sender
    pub from: EmailAddress,
    /// To recipients
    pub to: Vec<EmailAddress>,
    /// CC recipients
    pub cc: Vec<EmailAddress>,
    /// Subject line
    pub subject: String,
    /// Short plain-text preview
    pub snippet: String,
    /// When the message was received
    pub received_at: DateTime<Utc>,
    /// Remote timestamp (milliseconds since epoch)
    pub internal_date: i64,
    /// Remote label ids (e.g., "INBOX", "UNREAD")
    pub label_ids: Vec<String>,
    /// Mailing-list id header value, when present
    pub list_id: Option<String>,
}

impl Message {
    pub fn builder(id: MessageId) -> MessageBuilder {
        MessageBuilder::new(id)
    }

    /// All participant addresses of this message (sender plus recipients)
    pub fn participants(&self) -> Vec<&EmailAddress> {
        std::iter::once(&self.from)
            .chain(self.to.iter())
            .chain(self.cc.iter())
            .collect()
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.label_ids.iter().any(|l| l == label)
    }

    pub fn is_unread(&self) -> bool {
        self.has_label(super::labels::UNREAD)
    }
}

/// Builder for creating Message instances
pub struct MessageBuilder {
    id: MessageId,
    conversation_id: Option<ConversationId>,
    from: Option<EmailAddress>,
    to: Vec<EmailAddress>,
    cc: Vec<EmailAddress>,
    subject: String,
    snippet: String,
    received_at: Option<DateTime<Utc>>,
    internal_date: i64,
    label_ids: Vec<String>,
    list_id: Option<String>,
}

impl MessageBuilder {
    fn new(id: MessageId) -> Self {
        Self {
            id,
            conversation_id: None,
            from: None,
            to: Vec::new(),
            cc: Vec::new(),
            subject: String::new(),
            snippet: String::new(),
            received_at: None,
            internal_date: 0,
            label_ids: Vec::new(),
            list_id: None,
        }
    }

    pub fn conversation_id(mut self, id: ConversationId) -> Self {
        self.conversation_id = Some(id);
        self
    }

    pub fn from(mut self, from: EmailAddress) -> Self {
        self.from = Some(from);
        self
    }

    pub fn to(mut self, to: Vec<EmailAddress>) -> Self {
        self.to = to;
        self
    }

    pub fn cc(mut self, cc: Vec<EmailAddress>) -> Self {
        self.cc = cc;
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    pub fn received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = Some(received_at);
        self
    }

    pub fn internal_date(mut self, internal_date: i64) -> Self {
        self.internal_date = internal_date;
        self
    }

    pub fn label_ids(mut self, label_ids: Vec<String>) -> Self {
        self.label_ids = label_ids;
        self
    }

    pub fn list_id(mut self, list_id: Option<String>) -> Self {
        self.list_id = list_id;
        self
    }

    pub fn build(self) -> Message {
        Message {
            id: self.id,
            conversation_id: self.conversation_id,
            from: self
                .from
                .unwrap_or_else(|| EmailAddress::new("unknown@unknown.invalid")),
            to: self.to,
            cc: self.cc,
            subject: self.subject,
            snippet: self.snippet,
            received_at: self.received_at.unwrap_or_else(Utc::now),
            internal_date: self.internal_date,
            label_ids: self.label_ids,
            list_id: self.list_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address_with_name() {
        let addr = EmailAddress::parse("Ada Lovelace <ada@example.com>");
        assert_eq!(addr.name, Some("Ada Lovelace".to_string()));
        assert_eq!(addr.email, "ada@example.com");
    }

    #[test]
    fn test_parse_bare_address() {
        let addr = EmailAddress::parse("ada@example.com");
        assert_eq!(addr.name, None);
        assert_eq!(addr.email, "ada@example.com");
    }

    #[test]
    fn test_parse_angle_brackets_without_name() {
        let addr = EmailAddress::parse("<ada@example.com>");
        assert_eq!(addr.name, None);
        assert_eq!(addr.email, "ada@example.com");
    }

    #[test]
    fn test_normalized_address() {
        let addr = EmailAddress::new("  Ada@Example.COM ");
        assert_eq!(addr.normalized(), "ada@example.com");
    }

    #[test]
    fn test_participants_include_sender_and_recipients() {
        let msg = Message::builder(MessageId::new("m1"))
            .from(EmailAddress::new("a@x.com"))
            .to(vec![EmailAddress::new("b@x.com")])
            .cc(vec![EmailAddress::new("c@x.com")])
            .build();
        let participants: Vec<&str> =
            msg.participants().iter().map(|a| a.email.as_str()).collect();
        assert_eq!(participants, vec!["a@x.com", "b@x.com", "c@x.com"]);
    }

    #[test]
    fn test_unread_follows_label() {
        let msg = Message::builder(MessageId::new("m1"))
            .label_ids(vec!["INBOX".into(), "UNREAD".into()])
            .build();
        assert!(msg.is_unread());
    }
}
