//! Normalization of remote messages into domain models

use anyhow::Result;
use chrono::{DateTime, Utc};

use super::api::RemoteMessage;
use crate::error::SyncError;
use crate::models::{EmailAddress, Message, MessageId};

/// Convert a remote message into the local [`Message`] model.
///
/// The conversation id is left unassigned; the sync engine resolves it
/// through the conversation creation serializer once the participant
/// set is known.
pub fn normalize_message(remote: RemoteMessage) -> Result<Message> {
    if remote.id.is_empty() {
        return Err(SyncError::Malformed("message without id".into()).into());
    }

    let internal_date: i64 = match &remote.internal_date {
        Some(raw) => raw
            .parse()
            .map_err(|_| SyncError::Malformed(format!("bad internalDate: {raw}")))?,
        None => 0,
    };

    let received_at: DateTime<Utc> = DateTime::from_timestamp_millis(internal_date)
        .ok_or_else(|| SyncError::Malformed(format!("internalDate out of range: {internal_date}")))?;

    let parse_all = |raw: Option<Vec<String>>| -> Vec<EmailAddress> {
        raw.unwrap_or_default()
            .iter()
            .map(|s| EmailAddress::parse(s))
            .collect()
    };

    Ok(Message::builder(MessageId::new(remote.id))
        .from(
            remote
                .from
                .as_deref()
                .map(EmailAddress::parse)
                .unwrap_or_else(|| EmailAddress::new("unknown@unknown.invalid")),
        )
        .to(parse_all(remote.to))
        .cc(parse_all(remote.cc))
        .subject(remote.subject.unwrap_or_default())
        .snippet(remote.snippet.unwrap_or_default())
        .received_at(received_at)
        .internal_date(internal_date)
        .label_ids(remote.label_ids.unwrap_or_default())
        .list_id(remote.list_id)
        .build())
}
