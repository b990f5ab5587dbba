//! Conversation creation serializer
//!
//! All find-or-create traffic for conversations funnels through a
//! single dispatch thread, so two syncs (or a sync and a user action)
//! resolving the same identity hash can never both miss the durable
//! lookup and insert twice. The thread also keeps a short-lived guard
//! map of identities it has recently resolved, which lets repeat
//! lookups during a sync pass skip the store entirely.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::models::{Conversation, ConversationId, ConversationKind};
use crate::store::Store;

/// Guard-map tuning for the creation serializer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// How long a resolved identity stays in the guard map before a
    /// fresh durable lookup is forced
    pub claim_expiry_secs: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            claim_expiry_secs: 30,
        }
    }
}

/// A request to resolve an identity hash to its single conversation
struct FindOrCreate {
    identity: ConversationId,
    kind: ConversationKind,
    participants: Vec<String>,
    message_at: DateTime<Utc>,
    reply: Sender<Result<Conversation>>,
}

enum Command {
    FindOrCreate(FindOrCreate),
    Shutdown,
}

struct GuardEntry {
    conversation: Conversation,
    claimed_at: Instant,
}

/// Handle to the serializer thread. Shared between components behind
/// an `Arc`; all callers funnel into the same dispatch thread.
pub struct ConversationSerializer {
    commands: Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl ConversationSerializer {
    pub fn new(store: Arc<dyn Store>, config: GuardConfig) -> Self {
        let (commands, inbox) = mpsc::channel();
        let worker = std::thread::Builder::new()
            .name("conversation-serializer".to_string())
            .spawn(move || dispatch_loop(store, config, inbox))
            .ok();
        if worker.is_none() {
            warn!("Failed to spawn conversation serializer thread");
        }
        Self { commands, worker }
    }

    /// Resolve an identity hash to its conversation, creating it if it
    /// does not exist. An archived conversation is reactivated in
    /// place. Serialized with all other callers.
    pub fn find_or_create(
        &self,
        identity: ConversationId,
        kind: ConversationKind,
        participants: Vec<String>,
        message_at: DateTime<Utc>,
    ) -> Result<Conversation> {
        let (reply, response) = mpsc::channel();
        self.commands
            .send(Command::FindOrCreate(FindOrCreate {
                identity,
                kind,
                participants,
                message_at,
                reply,
            }))
            .map_err(|_| anyhow::anyhow!("conversation serializer has shut down"))?;
        response
            .recv()
            .map_err(|_| anyhow::anyhow!("conversation serializer dropped request"))?
    }
}

impl Drop for ConversationSerializer {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn dispatch_loop(store: Arc<dyn Store>, config: GuardConfig, inbox: Receiver<Command>) {
    let expiry = Duration::from_secs(config.claim_expiry_secs);
    let mut guard: HashMap<ConversationId, GuardEntry> = HashMap::new();

    while let Ok(command) = inbox.recv() {
        match command {
            Command::FindOrCreate(request) => {
                guard.retain(|_, entry| entry.claimed_at.elapsed() < expiry);
                let result = resolve(store.as_ref(), &mut guard, request.identity, |identity| {
                    Conversation::new(
                        identity,
                        request.kind,
                        request.participants.clone(),
                        request.message_at,
                    )
                });
                let _ = request.reply.send(result);
            }
            Command::Shutdown => break,
        }
    }
}

fn resolve(
    store: &dyn Store,
    guard: &mut HashMap<ConversationId, GuardEntry>,
    identity: ConversationId,
    create: impl FnOnce(ConversationId) -> Conversation,
) -> Result<Conversation> {
    // Durable lookup must read committed state only. A write-through
    // cache answering here could report a conversation that a crashed
    // transaction never persisted. The lookup always runs, even with a
    // fresh guard entry, because archived state may have changed since
    // the claim and a new message must reactivate the conversation.
    if let Some(mut existing) = store.get_conversation_committed(&identity)? {
        if existing.is_archived() || existing.hidden {
            debug!("Reactivating conversation {}", identity.as_str());
            existing.reactivate();
            store.upsert_conversation(existing.clone())?;
        }
        guard.insert(
            identity,
            GuardEntry {
                conversation: existing.clone(),
                claimed_at: Instant::now(),
            },
        );
        return Ok(existing);
    }

    // Committed miss with a live claim: this identity was created
    // moments ago and the row is not yet durably visible. Reuse the
    // claimed conversation rather than inserting a second row.
    if let Some(entry) = guard.get(&identity) {
        debug!(
            "Conversation {} resolved from creation claim",
            identity.as_str()
        );
        return Ok(entry.conversation.clone());
    }

    let fresh = create(identity.clone());
    store.upsert_conversation(fresh.clone())?;
    debug!(
        "Created conversation {} ({})",
        identity.as_str(),
        fresh.kind.as_str()
    );
    guard.insert(
        identity,
        GuardEntry {
            conversation: fresh.clone(),
            claimed_at: Instant::now(),
        },
    );
    Ok(fresh)
}
