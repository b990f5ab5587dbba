//! Durable store abstraction
//!
//! The store is the single source of truth for mirrored mail data.
//! Each component uses its own calls (each call is its own
//! transaction); cross-component coordination happens in the
//! serialization regions, never through store-level locking.

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use anyhow::Result;

use crate::models::{
    ActionId, ActionStatus, Conversation, ConversationId, Message, MessageId, PendingAction,
    SyncState,
};

/// Typed persistence operations for the sync engine
pub trait Store: Send + Sync {
    // === Conversations ===

    /// Insert or update a conversation
    fn upsert_conversation(&self, conversation: Conversation) -> Result<()>;

    /// Get a conversation by identity hash
    fn get_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>>;

    /// Get a conversation by identity hash, reading only durably
    /// committed state (bypassing any in-memory write-through cache).
    /// Used by the creation serializer's durable-lookup step.
    fn get_conversation_committed(&self, id: &ConversationId) -> Result<Option<Conversation>>;

    /// List all conversations, newest first
    fn list_conversations(&self) -> Result<Vec<Conversation>>;

    // === Messages ===

    /// Insert or update a message
    fn upsert_message(&self, message: Message) -> Result<()>;

    /// Get a message by id
    fn get_message(&self, id: &MessageId) -> Result<Option<Message>>;

    /// Check whether a message exists
    fn has_message(&self, id: &MessageId) -> Result<bool>;

    /// Delete a batch of messages by id; returns how many existed
    fn delete_messages(&self, ids: &[MessageId]) -> Result<usize>;

    /// Replace the label set of a message
    fn update_message_labels(&self, id: &MessageId, labels: Vec<String>) -> Result<()>;

    /// List messages belonging to a conversation, oldest first
    fn list_messages_for_conversation(&self, id: &ConversationId) -> Result<Vec<Message>>;

    // === Pending actions ===

    /// Persist a new pending action; the store assigns its id
    fn insert_pending_action(&self, action: PendingAction) -> Result<PendingAction>;

    /// Update an existing pending action row
    fn update_pending_action(&self, action: &PendingAction) -> Result<()>;

    /// Delete a pending action row (successful completion)
    fn delete_pending_action(&self, id: ActionId) -> Result<()>;

    /// List actions with the given status, oldest first
    fn list_pending_actions(&self, status: ActionStatus) -> Result<Vec<PendingAction>>;

    // === Sync state ===

    /// Get the persisted sync state for an account
    fn get_sync_state(&self, account_id: &str) -> Result<Option<SyncState>>;

    /// Save sync state (upsert)
    fn save_sync_state(&self, state: SyncState) -> Result<()>;

    /// Clear all data (for testing)
    fn clear(&self) -> Result<()>;
}

/// Recompute a conversation's derived fields from its messages and
/// persist the result. No-op if the conversation does not exist.
pub fn refresh_conversation_rollup(store: &dyn Store, id: &ConversationId) -> Result<()> {
    let Some(mut conversation) = store.get_conversation(id)? else {
        return Ok(());
    };

    let messages = store.list_messages_for_conversation(id)?;
    conversation.unread_count = messages.iter().filter(|m| m.is_unread()).count();
    if let Some(latest) = messages.iter().map(|m| m.received_at).max() {
        conversation.last_message_at = latest;
    }
    store.upsert_conversation(conversation)
}
