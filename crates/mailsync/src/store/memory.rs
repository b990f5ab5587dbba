//! In-memory store implementation
//!
//! Hash maps behind RwLocks, used by tests and as a reference
//! implementation of the `Store` contract.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};

use anyhow::Result;

use super::Store;
use crate::models::{
    ActionId, ActionStatus, Conversation, ConversationId, Message, MessageId, PendingAction,
    SyncState,
};

pub struct InMemoryStore {
    conversations: RwLock<HashMap<String, Conversation>>,
    messages: RwLock<HashMap<String, Message>>,
    pending_actions: RwLock<HashMap<i64, PendingAction>>,
    sync_states: RwLock<HashMap<String, SyncState>>,
    next_action_id: AtomicI64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            messages: RwLock::new(HashMap::new()),
            pending_actions: RwLock::new(HashMap::new()),
            sync_states: RwLock::new(HashMap::new()),
            next_action_id: AtomicI64::new(1),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for InMemoryStore {
    fn upsert_conversation(&self, conversation: Conversation) -> Result<()> {
        let mut conversations = self.conversations.write().unwrap();
        conversations.insert(conversation.id.0.clone(), conversation);
        Ok(())
    }

    fn get_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>> {
        Ok(self.conversations.read().unwrap().get(&id.0).cloned())
    }

    fn get_conversation_committed(&self, id: &ConversationId) -> Result<Option<Conversation>> {
        // No write-through cache here; committed state is current state.
        self.get_conversation(id)
    }

    fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let mut all: Vec<Conversation> =
            self.conversations.read().unwrap().values().cloned().collect();
        all.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        Ok(all)
    }

    fn upsert_message(&self, message: Message) -> Result<()> {
        let mut messages = self.messages.write().unwrap();
        messages.insert(message.id.0.clone(), message);
        Ok(())
    }

    fn get_message(&self, id: &MessageId) -> Result<Option<Message>> {
        Ok(self.messages.read().unwrap().get(&id.0).cloned())
    }

    fn has_message(&self, id: &MessageId) -> Result<bool> {
        Ok(self.messages.read().unwrap().contains_key(&id.0))
    }

    fn delete_messages(&self, ids: &[MessageId]) -> Result<usize> {
        let mut messages = self.messages.write().unwrap();
        let mut removed = 0;
        for id in ids {
            if messages.remove(&id.0).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn update_message_labels(&self, id: &MessageId, labels: Vec<String>) -> Result<()> {
        let mut messages = self.messages.write().unwrap();
        if let Some(message) = messages.get_mut(&id.0) {
            message.label_ids = labels;
        }
        Ok(())
    }

    fn list_messages_for_conversation(&self, id: &ConversationId) -> Result<Vec<Message>> {
        let mut matching: Vec<Message> = self
            .messages
            .read()
            .unwrap()
            .values()
            .filter(|m| m.conversation_id.as_ref() == Some(id))
            .cloned()
            .collect();
        matching.sort_by_key(|m| m.received_at);
        Ok(matching)
    }

    fn insert_pending_action(&self, mut action: PendingAction) -> Result<PendingAction> {
        let id = self.next_action_id.fetch_add(1, Ordering::SeqCst);
        action.id = ActionId(id);
        self.pending_actions
            .write()
            .unwrap()
            .insert(id, action.clone());
        Ok(action)
    }

    fn update_pending_action(&self, action: &PendingAction) -> Result<()> {
        self.pending_actions
            .write()
            .unwrap()
            .insert(action.id.0, action.clone());
        Ok(())
    }

    fn delete_pending_action(&self, id: ActionId) -> Result<()> {
        self.pending_actions.write().unwrap().remove(&id.0);
        Ok(())
    }

    fn list_pending_actions(&self, status: ActionStatus) -> Result<Vec<PendingAction>> {
        let mut matching: Vec<PendingAction> = self
            .pending_actions
            .read()
            .unwrap()
            .values()
            .filter(|a| a.status == status)
            .cloned()
            .collect();
        matching.sort_by_key(|a| (a.created_at, a.id.0));
        Ok(matching)
    }

    fn get_sync_state(&self, account_id: &str) -> Result<Option<SyncState>> {
        Ok(self.sync_states.read().unwrap().get(account_id).cloned())
    }

    fn save_sync_state(&self, state: SyncState) -> Result<()> {
        self.sync_states
            .write()
            .unwrap()
            .insert(state.account_id.clone(), state);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.conversations.write().unwrap().clear();
        self.messages.write().unwrap().clear();
        self.pending_actions.write().unwrap().clear();
        self.sync_states.write().unwrap().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionKind, ActionTarget, ConversationKind, EmailAddress};
    use chrono::Utc;

    fn make_message(id: &str, conversation: &str, unread: bool) -> Message {
        let mut labels = vec!["INBOX".to_string()];
        if unread {
            labels.push("UNREAD".to_string());
        }
        Message::builder(MessageId::new(id))
            .conversation_id(ConversationId::new(conversation))
            .from(EmailAddress::new("a@x.com"))
            .to(vec![EmailAddress::new("b@x.com")])
            .label_ids(labels)
            .build()
    }

    #[test]
    fn test_message_round_trip_and_delete() {
        let store = InMemoryStore::new();
        store.upsert_message(make_message("m1", "c1", true)).unwrap();
        store.upsert_message(make_message("m2", "c1", false)).unwrap();

        assert!(store.has_message(&MessageId::new("m1")).unwrap());
        let removed = store
            .delete_messages(&[MessageId::new("m1"), MessageId::new("missing")])
            .unwrap();
        assert_eq!(removed, 1);
        assert!(!store.has_message(&MessageId::new("m1")).unwrap());
    }

    #[test]
    fn test_list_messages_for_conversation_sorted() {
        let store = InMemoryStore::new();
        for id in ["m1", "m2", "m3"] {
            store.upsert_message(make_message(id, "c1", false)).unwrap();
        }
        store.upsert_message(make_message("other", "c2", false)).unwrap();

        let messages = store
            .list_messages_for_conversation(&ConversationId::new("c1"))
            .unwrap();
        assert_eq!(messages.len(), 3);
    }

    #[test]
    fn test_pending_action_lifecycle() {
        let store = InMemoryStore::new();
        let action = PendingAction::new(
            ActionKind::MarkRead,
            ActionTarget::Message(MessageId::new("m1")),
            serde_json::Value::Null,
        );
        let stored = store.insert_pending_action(action).unwrap();
        assert!(stored.id.0 > 0);

        let pending = store.list_pending_actions(ActionStatus::Pending).unwrap();
        assert_eq!(pending.len(), 1);

        store.delete_pending_action(stored.id).unwrap();
        assert!(store
            .list_pending_actions(ActionStatus::Pending)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_rollup_refresh() {
        let store = InMemoryStore::new();
        let convo = Conversation::new(
            ConversationId::new("c1"),
            ConversationKind::Direct,
            vec!["a@x.com".into(), "b@x.com".into()],
            Utc::now(),
        );
        store.upsert_conversation(convo).unwrap();
        store.upsert_message(make_message("m1", "c1", true)).unwrap();
        store.upsert_message(make_message("m2", "c1", true)).unwrap();
        store.upsert_message(make_message("m3", "c1", false)).unwrap();

        super::super::refresh_conversation_rollup(&store, &ConversationId::new("c1")).unwrap();
        let convo = store
            .get_conversation(&ConversationId::new("c1"))
            .unwrap()
            .unwrap();
        assert_eq!(convo.unread_count, 2);
    }

    #[test]
    fn test_sync_state_upsert() {
        let store = InMemoryStore::new();
        assert!(store.get_sync_state("acct").unwrap().is_none());

        store.save_sync_state(SyncState::new("acct", "100")).unwrap();
        store.save_sync_state(SyncState::new("acct", "200")).unwrap();
        assert_eq!(store.get_sync_state("acct").unwrap().unwrap().cursor, "200");
    }
}
