//! Action queue: optimistic local apply plus durable remote dispatch
//!
//! Enqueuing an action applies its local mutation immediately and
//! records the exact inverse in the action's payload, so a failed
//! dispatch can revert precisely what it changed even when the store
//! moved underneath it. Rows are durable; actions interrupted by a
//! process exit are picked up by the next `process_pending` call.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::executor::RemoteActionExecutor;
use crate::error::SyncError;
use crate::models::{
    ActionKind, ActionStatus, ActionTarget, MessageId, PendingAction, labels,
};
use crate::store::{Store, refresh_conversation_rollup};

/// Inverse record for a single-message label flip
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LabelFlip {
    /// Whether the label was present before the action
    was_set: bool,
}

/// Inverse record for archiving a whole conversation
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversationArchive {
    /// Exactly the message ids the inbox label was removed from
    removed_from: Vec<String>,
    was_archived: bool,
}

/// Counters from one `process_pending` run
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProcessSummary {
    pub completed: usize,
    pub requeued: usize,
    pub failed: usize,
}

/// Durable queue of user-initiated mutations
pub struct ActionQueue {
    store: Arc<dyn Store>,
    executor: Arc<dyn RemoteActionExecutor>,
    max_retries: u32,
}

/// The label each kind flips, and the state it flips it to
fn label_flip(kind: ActionKind) -> Option<(&'static str, bool)> {
    match kind {
        ActionKind::MarkRead => Some((labels::UNREAD, false)),
        ActionKind::MarkUnread => Some((labels::UNREAD, true)),
        ActionKind::Star => Some((labels::STARRED, true)),
        ActionKind::Unstar => Some((labels::STARRED, false)),
        ActionKind::Archive => Some((labels::INBOX, false)),
        ActionKind::ArchiveConversation => None,
    }
}

impl ActionQueue {
    pub fn new(store: Arc<dyn Store>, executor: Arc<dyn RemoteActionExecutor>) -> Self {
        Self {
            store,
            executor,
            max_retries: 3,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Record an action, apply its local mutation, and return the
    /// persisted row. Fails with `SyncError::MissingTarget` when the
    /// target does not exist locally or does not match the kind.
    pub fn enqueue(&self, kind: ActionKind, target: ActionTarget) -> Result<PendingAction> {
        let payload = match (&kind, &target) {
            (ActionKind::ArchiveConversation, ActionTarget::Conversation(id)) => {
                let conversation = self
                    .store
                    .get_conversation(id)?
                    .ok_or(SyncError::MissingTarget)?;
                let removed_from: Vec<String> = self
                    .store
                    .list_messages_for_conversation(id)?
                    .iter()
                    .filter(|m| m.has_label(labels::INBOX))
                    .map(|m| m.id.as_str().to_string())
                    .collect();
                serde_json::to_value(ConversationArchive {
                    removed_from,
                    was_archived: conversation.is_archived(),
                })?
            }
            (kind, ActionTarget::Message(id)) => {
                let (label, _) = label_flip(*kind).ok_or(SyncError::MissingTarget)?;
                let message = self.store.get_message(id)?.ok_or(SyncError::MissingTarget)?;
                serde_json::to_value(LabelFlip {
                    was_set: message.has_label(label),
                })?
            }
            _ => return Err(SyncError::MissingTarget.into()),
        };

        let action = self
            .store
            .insert_pending_action(PendingAction::new(kind, target, payload))?;
        if let Err(err) = self.apply_forward(&action) {
            // Nothing was applied, so nothing may stay queued for
            // dispatch (a later revert would undo a mutation that
            // never happened).
            self.store.delete_pending_action(action.id)?;
            return Err(err);
        }
        debug!(
            "Enqueued action {} ({}) on {}",
            action.id.0,
            action.kind.as_str(),
            action.target.as_str()
        );
        Ok(action)
    }

    /// Dispatch every pending action, oldest first. Store errors abort
    /// the run; remote failures are absorbed into the per-row retry
    /// state.
    pub fn process_pending(&self) -> Result<ProcessSummary> {
        let mut summary = ProcessSummary::default();
        for action in self.store.list_pending_actions(ActionStatus::Pending)? {
            match self.dispatch(action)? {
                ActionStatus::Pending => summary.requeued += 1,
                ActionStatus::Failed => summary.failed += 1,
                ActionStatus::Executing => summary.completed += 1,
            }
        }
        Ok(summary)
    }

    /// Run one action to a terminal state for this pass. Returns the
    /// row's resulting status (`Executing` stands in for "completed and
    /// deleted", which has no row status).
    fn dispatch(&self, mut action: PendingAction) -> Result<ActionStatus> {
        // A retried action was reverted when its last attempt failed;
        // restore the optimistic state before going remote again.
        if action.retry_count > 0 {
            self.apply_forward(&action)?;
        }

        action.status = ActionStatus::Executing;
        action.last_attempt_at = Some(Utc::now());
        self.store.update_pending_action(&action)?;

        match self.execute_remote(&action) {
            Ok(()) => {
                self.store.delete_pending_action(action.id)?;
                debug!("Action {} ({}) completed", action.id.0, action.kind.as_str());
                Ok(ActionStatus::Executing)
            }
            Err(err) => {
                self.revert(&action)?;
                action.retry_count += 1;
                let retriable =
                    SyncError::classify(&err).is_some_and(|c| c.is_retriable());
                action.status = if retriable && action.retry_count <= self.max_retries {
                    ActionStatus::Pending
                } else {
                    ActionStatus::Failed
                };
                warn!(
                    "Action {} ({}) attempt {} failed ({}): {err:#}",
                    action.id.0,
                    action.kind.as_str(),
                    action.retry_count,
                    action.status.as_str()
                );
                self.store.update_pending_action(&action)?;
                Ok(action.status)
            }
        }
    }

    fn execute_remote(&self, action: &PendingAction) -> Result<()> {
        match (&action.kind, &action.target) {
            (ActionKind::MarkRead, ActionTarget::Message(id)) => self.executor.mark_read(id),
            (ActionKind::MarkUnread, ActionTarget::Message(id)) => self.executor.mark_unread(id),
            (ActionKind::Star, ActionTarget::Message(id)) => self.executor.star(id),
            (ActionKind::Unstar, ActionTarget::Message(id)) => self.executor.unstar(id),
            (ActionKind::Archive, ActionTarget::Message(id)) => self.executor.archive(id),
            (ActionKind::ArchiveConversation, ActionTarget::Conversation(_)) => {
                let payload: ConversationArchive = serde_json::from_value(action.payload.clone())
                    .context("decoding archive payload")?;
                if payload.removed_from.is_empty() {
                    // Nothing held the inbox label; locally archived only.
                    return Ok(());
                }
                let ids: Vec<MessageId> =
                    payload.removed_from.iter().map(MessageId::new).collect();
                self.executor.archive_conversation(&ids)
            }
            _ => Err(SyncError::MissingTarget.into()),
        }
    }

    /// Apply the action's local mutation, driven entirely by the
    /// recorded payload so a retry touches exactly what the first
    /// application touched.
    fn apply_forward(&self, action: &PendingAction) -> Result<()> {
        match (&action.kind, &action.target) {
            (ActionKind::ArchiveConversation, ActionTarget::Conversation(convo_id)) => {
                let payload: ConversationArchive = serde_json::from_value(action.payload.clone())
                    .context("decoding archive payload")?;
                for raw in &payload.removed_from {
                    self.set_label(&MessageId::new(raw), labels::INBOX, false)?;
                }
                if let Some(mut conversation) = self.store.get_conversation(convo_id)? {
                    conversation.archived_at = Some(Utc::now());
                    self.store.upsert_conversation(conversation)?;
                }
                Ok(())
            }
            (kind, ActionTarget::Message(id)) => {
                let (label, set) = label_flip(*kind).ok_or(SyncError::MissingTarget)?;
                self.set_label(id, label, set)
            }
            _ => Err(SyncError::MissingTarget.into()),
        }
    }

    /// Undo the action's local mutation from the recorded inverse
    fn revert(&self, action: &PendingAction) -> Result<()> {
        match (&action.kind, &action.target) {
            (ActionKind::ArchiveConversation, ActionTarget::Conversation(convo_id)) => {
                let payload: ConversationArchive = serde_json::from_value(action.payload.clone())
                    .context("decoding archive payload")?;
                for raw in &payload.removed_from {
                    self.set_label(&MessageId::new(raw), labels::INBOX, true)?;
                }
                if let Some(mut conversation) = self.store.get_conversation(convo_id)?
                    && !payload.was_archived
                {
                    conversation.archived_at = None;
                    self.store.upsert_conversation(conversation)?;
                }
                Ok(())
            }
            (kind, ActionTarget::Message(id)) => {
                let (label, _) = label_flip(*kind).ok_or(SyncError::MissingTarget)?;
                let payload: LabelFlip = serde_json::from_value(action.payload.clone())
                    .context("decoding label payload")?;
                self.set_label(id, label, payload.was_set)
            }
            _ => Err(SyncError::MissingTarget.into()),
        }
    }

    /// Set a label's presence on one message and refresh its
    /// conversation rollup. A missing message is a no-op: it may have
    /// been deleted by a sync pass since the action was enqueued.
    fn set_label(&self, id: &MessageId, label: &str, present: bool) -> Result<()> {
        let Some(message) = self.store.get_message(id)? else {
            return Ok(());
        };
        let mut updated = message.label_ids.clone();
        if present {
            if !updated.iter().any(|l| l == label) {
                updated.push(label.to_string());
            }
        } else {
            updated.retain(|l| l != label);
        }
        if updated != message.label_ids {
            self.store.update_message_labels(id, updated)?;
        }
        if let Some(convo) = message.conversation_id {
            refresh_conversation_rollup(self.store.as_ref(), &convo)?;
        }
        Ok(())
    }
}
