//! Remote mailbox API surface
//!
//! This module defines:
//! - the capability traits the engine consumes ([`TokenProvider`],
//!   [`MailApi`]),
//! - the wire types of the remote mailbox API,
//! - the HTTP client implementation and response normalization.
//!
//! Components receive `Arc<dyn MailApi>` at construction; tests drive
//! scripted fakes through the same trait.

mod http;
mod normalize;

pub use http::HttpMailClient;
pub use normalize::normalize_message;

use std::time::Duration;

use anyhow::Result;

use crate::models::MessageId;

/// Supplies the current access token for authenticated calls.
///
/// Sign-in and token refresh happen outside this crate; a provider
/// fails with `SyncError::AuthExpired` when no valid token exists.
pub trait TokenProvider: Send + Sync {
    fn current_token(&self) -> Result<String>;
}

/// The remote mailbox operations consumed by the sync engine,
/// fetch scheduler, and action executor.
pub trait MailApi: Send + Sync {
    /// Fetch the account profile, including a fresh sync cursor
    fn get_profile(&self) -> Result<api::Profile>;

    /// List the most recent message ids, optionally filtered by query
    fn list_messages(&self, max_results: usize, query: Option<&str>) -> Result<api::MessageList>;

    /// Fetch one full message. The timeout bounds this single call;
    /// batch retry policy lives in the fetch scheduler.
    fn get_message(&self, id: &MessageId, timeout: Duration) -> Result<api::RemoteMessage>;

    /// Page through changes recorded since `cursor`.
    ///
    /// Fails with `SyncError::CursorExpired` when the remote no longer
    /// recognizes the cursor.
    fn list_changes(&self, cursor: &str, page_token: Option<&str>) -> Result<api::ChangePage>;

    /// Add and remove labels on a single message
    fn modify_labels(&self, id: &MessageId, add: &[&str], remove: &[&str]) -> Result<()>;

    /// Add and remove labels on a batch of messages
    fn batch_modify_labels(&self, ids: &[MessageId], add: &[&str], remove: &[&str]) -> Result<()>;
}

/// Remote API response types
pub mod api {
    use serde::{Deserialize, Serialize};

    /// Account profile
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Profile {
        /// Current sync cursor for the mailbox
        pub cursor: String,
        pub email_address: String,
        pub messages_total: Option<u64>,
    }

    /// Response from listing messages
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageList {
        pub messages: Option<Vec<MessageRef>>,
        pub next_page_token: Option<String>,
        pub result_size_estimate: Option<u32>,
    }

    /// Reference to a message (id only)
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageRef {
        pub id: String,
    }

    /// Full message as returned by the remote
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RemoteMessage {
        pub id: String,
        pub label_ids: Option<Vec<String>>,
        pub snippet: Option<String>,
        /// Milliseconds since epoch, as a decimal string
        pub internal_date: Option<String>,
        pub from: Option<String>,
        pub to: Option<Vec<String>>,
        pub cc: Option<Vec<String>>,
        pub subject: Option<String>,
        pub list_id: Option<String>,
    }

    /// One page of the changes-since-cursor feed
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ChangePage {
        pub changes: Option<Vec<ChangeRecord>>,
        /// Cursor representing the mailbox state after this page
        pub cursor: Option<String>,
        pub next_page_token: Option<String>,
    }

    /// A single change record
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ChangeRecord {
        pub messages_added: Option<Vec<MessageRef>>,
        pub messages_deleted: Option<Vec<MessageRef>>,
        pub labels_added: Option<Vec<LabelChange>>,
        pub labels_removed: Option<Vec<LabelChange>>,
    }

    /// Label delta on one message
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct LabelChange {
        pub message: MessageRef,
        pub label_ids: Vec<String>,
    }
}
