//! Domain models for mail entities

mod conversation;
mod message;
mod pending_action;
mod sync_state;

pub use conversation::{Conversation, ConversationId, ConversationKind};
pub use message::{EmailAddress, Message, MessageId};
pub use pending_action::{ActionId, ActionKind, ActionStatus, ActionTarget, PendingAction};
pub use sync_state::SyncState;

/// Label ids used by the remote mailbox for common states
pub mod labels {
    pub const INBOX: &str = "INBOX";
    pub const UNREAD: &str = "UNREAD";
    pub const STARRED: &str = "STARRED";
    pub const SPAM: &str = "SPAM";
    pub const TRASH: &str = "TRASH";
}
