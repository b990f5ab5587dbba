//! Deterministic conversation identity derivation
//!
//! Two messages exchanged among the same set of addresses must land in
//! the same conversation, no matter how the headers order or case the
//! addresses. The identity is a SHA-256 digest over the normalized,
//! sorted, deduplicated participant set plus a kind discriminator, so
//! a 1:1 exchange and a mailing list with the same addresses stay
//! distinct.

use std::collections::BTreeSet;

use sha2::{Digest, Sha256};

use crate::models::{ConversationId, ConversationKind, EmailAddress};

/// Normalize a participant set: trim, lowercase, dedupe, sort
pub fn normalize_participants(participants: &[EmailAddress]) -> Vec<String> {
    let set: BTreeSet<String> = participants
        .iter()
        .map(|a| a.normalized())
        .filter(|a| !a.is_empty())
        .collect();
    set.into_iter().collect()
}

/// Derive the identity hash for a normalized participant set
pub fn conversation_identity(
    kind: ConversationKind,
    participants: &[EmailAddress],
) -> ConversationId {
    let normalized = normalize_participants(participants);

    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    for address in &normalized {
        hasher.update(b"\n");
        hasher.update(address.as_bytes());
    }

    ConversationId::new(format!("{:x}", hasher.finalize()))
}

/// Classify the conversation kind for a message's participant set.
///
/// A List-Id header wins over participant count; otherwise up to two
/// unique addresses is a 1:1 exchange and anything larger is a group.
pub fn classify_kind(
    participants: &[EmailAddress],
    list_id: Option<&str>,
) -> ConversationKind {
    if list_id.is_some_and(|l| !l.trim().is_empty()) {
        return ConversationKind::MailingList;
    }
    if normalize_participants(participants).len() <= 2 {
        ConversationKind::Direct
    } else {
        ConversationKind::Group
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs(emails: &[&str]) -> Vec<EmailAddress> {
        emails.iter().map(|e| EmailAddress::new(*e)).collect()
    }

    #[test]
    fn test_identity_ignores_ordering() {
        let a = conversation_identity(
            ConversationKind::Direct,
            &addrs(&["a@x.com", "b@x.com"]),
        );
        let b = conversation_identity(
            ConversationKind::Direct,
            &addrs(&["b@x.com", "a@x.com"]),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_identity_ignores_case_and_whitespace() {
        let a = conversation_identity(
            ConversationKind::Direct,
            &addrs(&["A@X.com ", "b@x.com"]),
        );
        let b = conversation_identity(
            ConversationKind::Direct,
            &addrs(&["a@x.com", " B@x.COM"]),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_identity_differs_for_subset() {
        let pair = conversation_identity(
            ConversationKind::Direct,
            &addrs(&["a@x.com", "b@x.com"]),
        );
        let solo = conversation_identity(ConversationKind::Direct, &addrs(&["a@x.com"]));
        assert_ne!(pair, solo);
    }

    #[test]
    fn test_identity_differs_by_kind() {
        let participants = addrs(&["a@x.com", "b@x.com"]);
        let direct = conversation_identity(ConversationKind::Direct, &participants);
        let list = conversation_identity(ConversationKind::MailingList, &participants);
        assert_ne!(direct, list);
    }

    #[test]
    fn test_identity_dedupes_participants() {
        let a = conversation_identity(
            ConversationKind::Direct,
            &addrs(&["a@x.com", "a@x.com", "b@x.com"]),
        );
        let b = conversation_identity(
            ConversationKind::Direct,
            &addrs(&["a@x.com", "b@x.com"]),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_classify_kind() {
        assert_eq!(
            classify_kind(&addrs(&["a@x.com", "b@x.com"]), None),
            ConversationKind::Direct
        );
        assert_eq!(
            classify_kind(&addrs(&["a@x.com", "b@x.com", "c@x.com"]), None),
            ConversationKind::Group
        );
        assert_eq!(
            classify_kind(&addrs(&["a@x.com", "b@x.com"]), Some("dev.lists.example.com")),
            ConversationKind::MailingList
        );
    }
}
