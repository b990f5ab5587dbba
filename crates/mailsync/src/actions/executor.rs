//! Remote side of action dispatch

use std::sync::Arc;

use anyhow::Result;

use crate::error::SyncError;
use crate::models::{MessageId, labels};
use crate::remote::MailApi;

/// Remote mutations the action queue can dispatch.
///
/// Each method is a single attempt; cross-attempt retry policy lives
/// in the queue's durable rows, not here.
pub trait RemoteActionExecutor: Send + Sync {
    fn mark_read(&self, id: &MessageId) -> Result<()>;
    fn mark_unread(&self, id: &MessageId) -> Result<()>;
    fn star(&self, id: &MessageId) -> Result<()>;
    fn unstar(&self, id: &MessageId) -> Result<()>;
    fn archive(&self, id: &MessageId) -> Result<()>;
    fn archive_conversation(&self, ids: &[MessageId]) -> Result<()>;
}

/// Executor backed by the remote mailbox API's label endpoints
pub struct ApiActionExecutor {
    api: Arc<dyn MailApi>,
}

impl ApiActionExecutor {
    pub fn new(api: Arc<dyn MailApi>) -> Self {
        Self { api }
    }
}

impl RemoteActionExecutor for ApiActionExecutor {
    fn mark_read(&self, id: &MessageId) -> Result<()> {
        self.api.modify_labels(id, &[], &[labels::UNREAD])
    }

    fn mark_unread(&self, id: &MessageId) -> Result<()> {
        self.api.modify_labels(id, &[labels::UNREAD], &[])
    }

    fn star(&self, id: &MessageId) -> Result<()> {
        self.api.modify_labels(id, &[labels::STARRED], &[])
    }

    fn unstar(&self, id: &MessageId) -> Result<()> {
        self.api.modify_labels(id, &[], &[labels::STARRED])
    }

    fn archive(&self, id: &MessageId) -> Result<()> {
        self.api.modify_labels(id, &[], &[labels::INBOX])
    }

    fn archive_conversation(&self, ids: &[MessageId]) -> Result<()> {
        if ids.is_empty() {
            return Err(SyncError::MissingTarget.into());
        }
        self.api.batch_modify_labels(ids, &[], &[labels::INBOX])
    }
}
