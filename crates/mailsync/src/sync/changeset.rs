//! Accumulated effect of a run of change records
//!
//! Pages of the changes feed are folded into one `ChangeSet` before
//! anything touches the store, so a message that is added and deleted
//! within the same run costs nothing, and each surviving message is
//! fetched at most once.

use std::collections::{BTreeMap, BTreeSet};

use crate::models::MessageId;
use crate::remote::api::ChangeRecord;

/// Net change to apply to the local mirror
#[derive(Debug, Default)]
pub struct ChangeSet {
    /// Messages to fetch in full (new, or label state unknown)
    pub to_fetch: BTreeSet<MessageId>,
    /// Messages to remove locally
    pub to_delete: BTreeSet<MessageId>,
    /// Labels added to messages we may already hold
    pub label_adds: BTreeMap<MessageId, BTreeSet<String>>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one change record into the accumulated set.
    ///
    /// A deletion wins over any earlier addition or label change for
    /// the same id. Label removals trigger a full re-fetch rather than
    /// a local subtraction: the feed reports removals without the
    /// resulting label set, and reconstructing it locally can drift.
    pub fn absorb(&mut self, record: &ChangeRecord) {
        for added in record.messages_added.iter().flatten() {
            let id = MessageId::new(added.id.clone());
            if !self.to_delete.contains(&id) {
                self.to_fetch.insert(id);
            }
        }

        for change in record.labels_added.iter().flatten() {
            let id = MessageId::new(change.message.id.clone());
            if self.to_delete.contains(&id) || self.to_fetch.contains(&id) {
                continue;
            }
            self.label_adds
                .entry(id)
                .or_default()
                .extend(change.label_ids.iter().cloned());
        }

        for change in record.labels_removed.iter().flatten() {
            let id = MessageId::new(change.message.id.clone());
            if self.to_delete.contains(&id) {
                continue;
            }
            self.label_adds.remove(&id);
            self.to_fetch.insert(id);
        }

        for deleted in record.messages_deleted.iter().flatten() {
            let id = MessageId::new(deleted.id.clone());
            self.to_fetch.remove(&id);
            self.label_adds.remove(&id);
            self.to_delete.insert(id);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_fetch.is_empty() && self.to_delete.is_empty() && self.label_adds.is_empty()
    }
}
