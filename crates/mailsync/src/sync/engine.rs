//! Cursor-based delta sync engine
//!
//! Each pass pages through the remote changes feed from the persisted
//! cursor, folds the records into a [`ChangeSet`], applies deletions,
//! fetches, and label updates against the store, then refreshes the
//! rollups of every touched conversation. The cursor advances only
//! after the pass has been applied in full, so an interrupted pass is
//! replayed rather than skipped. An expired cursor falls back to a
//! full mailbox crawl.
//!
//! Triggers are single-flight: a pass arriving while one is already
//! running waits for it and shares its outcome instead of starting a
//! second crawl.

use std::collections::BTreeSet;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::changeset::ChangeSet;
use super::timing::{cooldown_elapsed, failure_backoff};
use crate::cancel::CancelToken;
use crate::conversations::ConversationSerializer;
use crate::error::SyncError;
use crate::fetch::{FetchPriority, FetchScheduler};
use crate::identity::{classify_kind, conversation_identity, normalize_participants};
use crate::models::{ConversationId, Message, MessageId, SyncState, labels};
use crate::remote::{MailApi, normalize_message};
use crate::store::{Store, refresh_conversation_rollup};

/// What prompted a sync pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Background trigger (app foregrounded, push hint); subject to
    /// the cooldown and failure backoff
    Opportunistic,
    /// Explicit refresh; always runs
    Maintenance,
}

/// Tuning for [`DeltaSyncEngine`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Cap on changes-feed pages consumed by an explicit refresh
    pub maintenance_change_pages: usize,
    /// Smaller page cap for passes hit from a background trigger
    pub opportunistic_change_pages: usize,
    /// Message-list size for a full crawl during an explicit refresh
    pub maintenance_list_size: usize,
    /// Smaller list size for a full crawl hit from a background trigger
    pub opportunistic_list_size: usize,
    /// Minimum seconds between opportunistic passes
    pub cooldown_secs: u64,
    /// Base and ceiling for the consecutive-failure backoff, seconds
    pub failure_backoff_base_secs: u64,
    pub failure_backoff_max_secs: u64,
    /// Every Nth consecutive failure escalates to a full crawl
    pub full_sync_every_failures: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            maintenance_change_pages: 50,
            opportunistic_change_pages: 10,
            maintenance_list_size: 500,
            opportunistic_list_size: 100,
            cooldown_secs: 30,
            failure_backoff_base_secs: 5,
            failure_backoff_max_secs: 300,
            full_sync_every_failures: 3,
        }
    }
}

/// Outcome counters for one sync pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStats {
    pub fetched: usize,
    pub deleted: usize,
    pub label_updates: usize,
    pub conversations_touched: usize,
    /// The pass was a full mailbox crawl rather than a delta
    pub full_sync: bool,
    /// An opportunistic trigger that hit the cooldown and did nothing
    pub skipped: bool,
}

struct Flight {
    running: bool,
    generation: u64,
    last_outcome: Option<(u64, Result<SyncStats, String>)>,
    last_completed: Option<Instant>,
    consecutive_failures: u32,
}

/// The sync engine. One instance per account.
pub struct DeltaSyncEngine {
    api: Arc<dyn MailApi>,
    store: Arc<dyn Store>,
    fetcher: Arc<FetchScheduler>,
    conversations: Arc<ConversationSerializer>,
    config: SyncConfig,
    account_id: String,
    flight: Mutex<Flight>,
    done: Condvar,
}

impl DeltaSyncEngine {
    pub fn new(
        account_id: impl Into<String>,
        api: Arc<dyn MailApi>,
        store: Arc<dyn Store>,
        fetcher: Arc<FetchScheduler>,
        conversations: Arc<ConversationSerializer>,
        config: SyncConfig,
    ) -> Self {
        Self {
            api,
            store,
            fetcher,
            conversations,
            config,
            account_id: account_id.into(),
            flight: Mutex::new(Flight {
                running: false,
                generation: 0,
                last_outcome: None,
                last_completed: None,
                consecutive_failures: 0,
            }),
            done: Condvar::new(),
        }
    }

    /// Run (or join) a sync pass.
    ///
    /// If a pass is already in flight, this call blocks until it
    /// finishes and returns its outcome; it never starts a concurrent
    /// second pass. Opportunistic triggers inside the cooldown window
    /// (or a failure-backoff window) return immediately with
    /// `skipped` set.
    pub fn sync(&self, mode: SyncMode, cancel: &CancelToken) -> Result<SyncStats> {
        let force_full = {
            let mut flight = self.flight.lock().unwrap();

            if flight.running {
                let generation = flight.generation;
                while flight.running && flight.generation == generation {
                    flight = self.done.wait(flight).unwrap();
                }
                return match &flight.last_outcome {
                    Some((g, outcome)) if *g == generation => match outcome {
                        Ok(stats) => Ok(stats.clone()),
                        Err(message) => Err(anyhow::anyhow!("coalesced sync failed: {message}")),
                    },
                    _ => Err(anyhow::anyhow!("coalesced sync pass produced no outcome")),
                };
            }

            if mode == SyncMode::Opportunistic {
                // The backoff resets to its floor every full failure
                // cycle; the count itself keeps climbing.
                let cycle = self.config.full_sync_every_failures.max(1);
                let failures = flight.consecutive_failures;
                let effective = if failures == 0 {
                    0
                } else {
                    (failures - 1) % cycle + 1
                };
                let backoff = failure_backoff(
                    effective,
                    Duration::from_secs(self.config.failure_backoff_base_secs),
                    Duration::from_secs(self.config.failure_backoff_max_secs),
                );
                let hold = Duration::from_secs(self.config.cooldown_secs).max(backoff);
                if !cooldown_elapsed(flight.last_completed, hold) {
                    debug!("Skipping opportunistic sync: cooldown not elapsed");
                    return Ok(SyncStats {
                        skipped: true,
                        ..SyncStats::default()
                    });
                }
            }

            flight.running = true;
            flight.generation += 1;

            // Repeated delta failures may mean the incremental path
            // itself is wedged; periodically escalate to a full crawl.
            let failures = flight.consecutive_failures;
            failures > 0 && failures % self.config.full_sync_every_failures.max(1) == 0
        };

        let result = self.run_pass(force_full, mode, cancel);

        let mut flight = self.flight.lock().unwrap();
        flight.running = false;
        flight.last_completed = Some(Instant::now());
        match &result {
            Ok(stats) => {
                flight.consecutive_failures = 0;
                info!(
                    "Sync pass complete: {} fetched, {} deleted, {} label updates ({} conversations)",
                    stats.fetched, stats.deleted, stats.label_updates, stats.conversations_touched
                );
            }
            Err(err) => {
                flight.consecutive_failures += 1;
                warn!(
                    "Sync pass failed ({} consecutive): {err:#}",
                    flight.consecutive_failures
                );
            }
        }
        let shared = result
            .as_ref()
            .map(Clone::clone)
            .map_err(|e| format!("{e:#}"));
        flight.last_outcome = Some((flight.generation, shared));
        drop(flight);
        self.done.notify_all();

        result
    }

    fn run_pass(
        &self,
        force_full: bool,
        mode: SyncMode,
        cancel: &CancelToken,
    ) -> Result<SyncStats> {
        let state = self.store.get_sync_state(&self.account_id)?;
        match (state, force_full) {
            (Some(state), false) => match self.delta_pass(state, mode, cancel) {
                Err(err)
                    if matches!(SyncError::classify(&err), Some(SyncError::CursorExpired)) =>
                {
                    info!("Sync cursor expired, falling back to full sync");
                    self.full_pass(mode, cancel)
                }
                other => other,
            },
            _ => self.full_pass(mode, cancel),
        }
    }

    /// Page the changes feed from the persisted cursor and apply the
    /// accumulated set. The cursor advances to the last fully-consumed
    /// page, and only when everything applied cleanly.
    fn delta_pass(
        &self,
        state: SyncState,
        mode: SyncMode,
        cancel: &CancelToken,
    ) -> Result<SyncStats> {
        let mut change_set = ChangeSet::new();
        let mut cursor = state.cursor.clone();
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;
        let page_cap = match mode {
            SyncMode::Maintenance => self.config.maintenance_change_pages,
            SyncMode::Opportunistic => self.config.opportunistic_change_pages,
        };

        loop {
            if cancel.is_cancelled() {
                anyhow::bail!("sync cancelled");
            }
            let page = self
                .api
                .list_changes(&state.cursor, page_token.as_deref())?;
            pages += 1;
            for record in page.changes.iter().flatten() {
                change_set.absorb(record);
            }
            if let Some(page_cursor) = page.cursor {
                cursor = page_cursor;
            }
            page_token = page.next_page_token;
            if page_token.is_none() || pages >= page_cap {
                break;
            }
        }
        debug!(
            "Changes feed: {pages} page(s), {} to fetch, {} to delete",
            change_set.to_fetch.len(),
            change_set.to_delete.len()
        );

        let (stats, fetch_errors) = self.apply(change_set, mode, cancel)?;
        if fetch_errors > 0 {
            anyhow::bail!("{fetch_errors} message fetch(es) failed; cursor not advanced");
        }
        if cancel.is_cancelled() {
            anyhow::bail!("sync cancelled");
        }
        self.store.save_sync_state(state.advanced(cursor))?;
        Ok(stats)
    }

    /// Crawl the mailbox from scratch. The fresh cursor is taken from
    /// the profile before listing, so anything that changes during the
    /// crawl is replayed by the next delta pass.
    fn full_pass(&self, mode: SyncMode, cancel: &CancelToken) -> Result<SyncStats> {
        let profile = self.api.get_profile()?;
        let list_size = match mode {
            SyncMode::Maintenance => self.config.maintenance_list_size,
            SyncMode::Opportunistic => self.config.opportunistic_list_size,
        };
        let list = self.api.list_messages(list_size, Some("-in:spam"))?;

        let mut change_set = ChangeSet::new();
        for reference in list.messages.iter().flatten() {
            change_set.to_fetch.insert(MessageId::new(reference.id.clone()));
        }

        let (mut stats, fetch_errors) = self.apply(change_set, mode, cancel)?;
        stats.full_sync = true;
        if fetch_errors > 0 {
            anyhow::bail!("{fetch_errors} message fetch(es) failed during full sync");
        }
        if cancel.is_cancelled() {
            anyhow::bail!("sync cancelled");
        }
        self.store
            .save_sync_state(SyncState::new(&self.account_id, profile.cursor))?;
        Ok(stats)
    }

    /// Apply an accumulated change set: deletions first, then fetches,
    /// then label merges, then conversation rollups. Returns the stats
    /// plus the number of messages that could not be fetched.
    fn apply(
        &self,
        mut change_set: ChangeSet,
        mode: SyncMode,
        cancel: &CancelToken,
    ) -> Result<(SyncStats, usize)> {
        let mut stats = SyncStats::default();
        let mut touched: BTreeSet<ConversationId> = BTreeSet::new();

        let delete_ids: Vec<MessageId> = change_set.to_delete.iter().cloned().collect();
        for id in &delete_ids {
            if let Some(convo) = self.store.get_message(id)?.and_then(|m| m.conversation_id) {
                touched.insert(convo);
            }
        }
        stats.deleted = self.store.delete_messages(&delete_ids)?;

        // A label add for a message we do not hold needs the full
        // message anyway.
        let mut label_updates = Vec::new();
        for (id, added) in std::mem::take(&mut change_set.label_adds) {
            match self.store.get_message(&id)? {
                Some(message) => label_updates.push((message, added)),
                None => {
                    change_set.to_fetch.insert(id);
                }
            }
        }

        let priority = match mode {
            SyncMode::Opportunistic => FetchPriority::High,
            SyncMode::Maintenance => FetchPriority::Normal,
        };
        let fetch_ids: Vec<MessageId> = change_set.to_fetch.iter().cloned().collect();
        let mut fetch_errors = 0usize;
        for (id, result) in self.fetcher.fetch(&fetch_ids, priority, cancel) {
            let remote = match result {
                Ok(remote) => remote,
                Err(err) => {
                    warn!("Failed to fetch message {}: {err:#}", id.as_str());
                    fetch_errors += 1;
                    continue;
                }
            };
            match normalize_message(remote) {
                Ok(message) => {
                    // Spam is excluded from the mirror entirely; a
                    // message reclassified as spam loses its local copy
                    // and its conversation rollup is recomputed.
                    if message.has_label(labels::SPAM) {
                        if let Some(convo) = self
                            .store
                            .get_message(&message.id)?
                            .and_then(|m| m.conversation_id)
                        {
                            touched.insert(convo);
                        }
                        self.store.delete_messages(&[message.id.clone()])?;
                        continue;
                    }
                    let convo = self.link_and_store(message)?;
                    touched.insert(convo);
                    stats.fetched += 1;
                }
                Err(err) => {
                    warn!("Discarding malformed message {}: {err:#}", id.as_str());
                    fetch_errors += 1;
                }
            }
        }

        for (message, added) in label_updates {
            let mut merged: BTreeSet<String> = message.label_ids.iter().cloned().collect();
            merged.extend(added);
            self.store
                .update_message_labels(&message.id, merged.into_iter().collect())?;
            if let Some(convo) = message.conversation_id {
                touched.insert(convo);
            }
            stats.label_updates += 1;
        }

        for convo in &touched {
            refresh_conversation_rollup(self.store.as_ref(), convo)?;
        }
        stats.conversations_touched = touched.len();

        Ok((stats, fetch_errors))
    }

    /// Resolve the message's conversation through the creation
    /// serializer and persist the linked message.
    fn link_and_store(&self, mut message: Message) -> Result<ConversationId> {
        let participants: Vec<_> = message.participants().into_iter().cloned().collect();
        let kind = classify_kind(&participants, message.list_id.as_deref());
        let identity = conversation_identity(kind, &participants);

        let conversation = self.conversations.find_or_create(
            identity,
            kind,
            normalize_participants(&participants),
            message.received_at,
        )?;
        message.conversation_id = Some(conversation.id.clone());
        self.store.upsert_message(message)?;
        Ok(conversation.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::GuardConfig;
    use crate::fetch::FetchConfig;
    use crate::remote::api::{
        ChangePage, ChangeRecord, MessageList, MessageRef, Profile, RemoteMessage,
    };
    use crate::store::InMemoryStore;
    use std::collections::{HashMap, HashSet, VecDeque};

    /// Scripted remote: a fixed sequence of change pages plus a message
    /// body table.
    struct ScriptedApi {
        messages: Mutex<HashMap<String, RemoteMessage>>,
        pages: Mutex<VecDeque<ChangePage>>,
        cursor_expired: std::sync::atomic::AtomicBool,
        fail_fetches: Mutex<HashSet<String>>,
        profile_cursor: String,
        listed: Mutex<Vec<String>>,
    }

    impl ScriptedApi {
        fn new(profile_cursor: &str) -> Self {
            Self {
                messages: Mutex::new(HashMap::new()),
                pages: Mutex::new(VecDeque::new()),
                cursor_expired: std::sync::atomic::AtomicBool::new(false),
                fail_fetches: Mutex::new(HashSet::new()),
                profile_cursor: profile_cursor.to_string(),
                listed: Mutex::new(Vec::new()),
            }
        }

        fn with_message(self, id: &str, from: &str, to: &[&str], labels: &[&str]) -> Self {
            self.messages.lock().unwrap().insert(
                id.to_string(),
                RemoteMessage {
                    id: id.to_string(),
                    label_ids: Some(labels.iter().map(|l| l.to_string()).collect()),
                    snippet: Some("hi".into()),
                    internal_date: Some("1700000000000".into()),
                    from: Some(from.to_string()),
                    to: Some(to.iter().map(|t| t.to_string()).collect()),
                    cc: None,
                    subject: Some("subject".into()),
                    list_id: None,
                },
            );
            self
        }

        fn with_page(self, page: ChangePage) -> Self {
            self.pages.lock().unwrap().push_back(page);
            self
        }

        fn expire_cursor(self) -> Self {
            self.cursor_expired
                .store(true, std::sync::atomic::Ordering::SeqCst);
            self
        }
    }

    fn page(added: &[&str], deleted: &[&str], cursor: &str, next: Option<&str>) -> ChangePage {
        ChangePage {
            changes: Some(vec![ChangeRecord {
                messages_added: Some(
                    added
                        .iter()
                        .map(|id| MessageRef { id: id.to_string() })
                        .collect(),
                ),
                messages_deleted: Some(
                    deleted
                        .iter()
                        .map(|id| MessageRef { id: id.to_string() })
                        .collect(),
                ),
                ..ChangeRecord::default()
            }]),
            cursor: Some(cursor.to_string()),
            next_page_token: next.map(|t| t.to_string()),
        }
    }

    impl MailApi for ScriptedApi {
        fn get_profile(&self) -> Result<Profile> {
            Ok(Profile {
                cursor: self.profile_cursor.clone(),
                email_address: "me@x.com".into(),
                messages_total: None,
            })
        }

        fn list_messages(&self, _max: usize, query: Option<&str>) -> Result<MessageList> {
            self.listed
                .lock()
                .unwrap()
                .push(query.unwrap_or_default().to_string());
            let refs: Vec<MessageRef> = self
                .messages
                .lock()
                .unwrap()
                .keys()
                .map(|id| MessageRef { id: id.clone() })
                .collect();
            Ok(MessageList {
                messages: Some(refs),
                next_page_token: None,
                result_size_estimate: None,
            })
        }

        fn get_message(&self, id: &MessageId, _timeout: Duration) -> Result<RemoteMessage> {
            if self.fail_fetches.lock().unwrap().contains(id.as_str()) {
                return Err(SyncError::NetworkTimeout("scripted".into()).into());
            }
            self.messages
                .lock()
                .unwrap()
                .get(id.as_str())
                .cloned()
                .ok_or_else(|| SyncError::Malformed(format!("no such message {}", id.as_str())).into())
        }

        fn list_changes(&self, _cursor: &str, _page: Option<&str>) -> Result<ChangePage> {
            if self.cursor_expired.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(SyncError::CursorExpired.into());
            }
            Ok(self.pages.lock().unwrap().pop_front().unwrap_or(ChangePage {
                changes: None,
                cursor: None,
                next_page_token: None,
            }))
        }

        fn modify_labels(&self, _id: &MessageId, _add: &[&str], _remove: &[&str]) -> Result<()> {
            Ok(())
        }

        fn batch_modify_labels(
            &self,
            _ids: &[MessageId],
            _add: &[&str],
            _remove: &[&str],
        ) -> Result<()> {
            Ok(())
        }
    }

    fn engine_with(
        api: Arc<ScriptedApi>,
        store: Arc<InMemoryStore>,
        config: SyncConfig,
    ) -> DeltaSyncEngine {
        let fetcher = Arc::new(FetchScheduler::new(
            api.clone() as Arc<dyn MailApi>,
            FetchConfig {
                retry_step_ms: 1,
                item_retries: 0,
                ..FetchConfig::default()
            },
        ));
        let conversations = Arc::new(ConversationSerializer::new(
            store.clone() as Arc<dyn Store>,
            GuardConfig::default(),
        ));
        DeltaSyncEngine::new(
            "acct",
            api as Arc<dyn MailApi>,
            store as Arc<dyn Store>,
            fetcher,
            conversations,
            config,
        )
    }

    fn engine(api: Arc<ScriptedApi>, store: Arc<InMemoryStore>) -> DeltaSyncEngine {
        engine_with(
            api,
            store,
            SyncConfig {
                cooldown_secs: 0,
                ..SyncConfig::default()
            },
        )
    }

    #[test]
    fn test_first_sync_is_full_and_persists_profile_cursor() {
        let api = Arc::new(
            ScriptedApi::new("cursor-9")
                .with_message("m1", "a@x.com", &["b@x.com"], &["INBOX", "UNREAD"]),
        );
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(api, store.clone());

        let stats = engine
            .sync(SyncMode::Maintenance, &CancelToken::new())
            .unwrap();
        assert!(stats.full_sync);
        assert_eq!(stats.fetched, 1);

        assert_eq!(store.get_sync_state("acct").unwrap().unwrap().cursor, "cursor-9");
        let conversations = store.list_conversations().unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].unread_count, 1);
    }

    #[test]
    fn test_delta_pass_applies_adds_and_deletes() {
        let api = Arc::new(
            ScriptedApi::new("unused")
                .with_message("m2", "a@x.com", &["b@x.com"], &["INBOX"])
                .with_page(page(&["m2"], &["m1"], "cursor-2", None)),
        );
        let store = Arc::new(InMemoryStore::new());
        store.save_sync_state(SyncState::new("acct", "cursor-1")).unwrap();
        store
            .upsert_message(
                Message::builder(MessageId::new("m1"))
                    .conversation_id(ConversationId::new("c-old"))
                    .from(crate::models::EmailAddress::new("a@x.com"))
                    .build(),
            )
            .unwrap();

        let engine = engine(api, store.clone());
        let stats = engine
            .sync(SyncMode::Maintenance, &CancelToken::new())
            .unwrap();

        assert!(!stats.full_sync);
        assert_eq!(stats.fetched, 1);
        assert_eq!(stats.deleted, 1);
        assert!(!store.has_message(&MessageId::new("m1")).unwrap());
        assert!(store.has_message(&MessageId::new("m2")).unwrap());
        assert_eq!(store.get_sync_state("acct").unwrap().unwrap().cursor, "cursor-2");
    }

    #[test]
    fn test_delta_pages_follow_tokens() {
        let api = Arc::new(
            ScriptedApi::new("unused")
                .with_message("m1", "a@x.com", &["b@x.com"], &["INBOX"])
                .with_message("m2", "a@x.com", &["b@x.com"], &["INBOX"])
                .with_page(page(&["m1"], &[], "cursor-2", Some("t1")))
                .with_page(page(&["m2"], &[], "cursor-3", None)),
        );
        let store = Arc::new(InMemoryStore::new());
        store.save_sync_state(SyncState::new("acct", "cursor-1")).unwrap();

        let engine = engine(api, store.clone());
        let stats = engine
            .sync(SyncMode::Maintenance, &CancelToken::new())
            .unwrap();

        assert_eq!(stats.fetched, 2);
        assert_eq!(store.get_sync_state("acct").unwrap().unwrap().cursor, "cursor-3");
    }

    #[test]
    fn test_expired_cursor_falls_back_to_full_sync() {
        let api = Arc::new(
            ScriptedApi::new("cursor-fresh")
                .with_message("m1", "a@x.com", &["b@x.com"], &["INBOX"])
                .expire_cursor(),
        );
        let store = Arc::new(InMemoryStore::new());
        store.save_sync_state(SyncState::new("acct", "cursor-stale")).unwrap();

        let engine = engine(api.clone(), store.clone());
        let stats = engine
            .sync(SyncMode::Maintenance, &CancelToken::new())
            .unwrap();

        assert!(stats.full_sync);
        assert_eq!(store.get_sync_state("acct").unwrap().unwrap().cursor, "cursor-fresh");
        // The crawl excludes spam at the query level.
        assert_eq!(api.listed.lock().unwrap().as_slice(), ["-in:spam"]);
    }

    #[test]
    fn test_opportunistic_pass_uses_smaller_page_cap() {
        let api = Arc::new(
            ScriptedApi::new("unused")
                .with_message("m1", "a@x.com", &["b@x.com"], &["INBOX"])
                .with_message("m2", "a@x.com", &["b@x.com"], &["INBOX"])
                .with_page(page(&["m1"], &[], "cursor-2", Some("t1")))
                .with_page(page(&["m2"], &[], "cursor-3", None)),
        );
        let store = Arc::new(InMemoryStore::new());
        store.save_sync_state(SyncState::new("acct", "cursor-1")).unwrap();

        let engine = engine_with(
            api,
            store.clone(),
            SyncConfig {
                cooldown_secs: 0,
                opportunistic_change_pages: 1,
                ..SyncConfig::default()
            },
        );
        let stats = engine
            .sync(SyncMode::Opportunistic, &CancelToken::new())
            .unwrap();

        // One page consumed; the second waits for the next pass.
        assert_eq!(stats.fetched, 1);
        assert_eq!(store.get_sync_state("acct").unwrap().unwrap().cursor, "cursor-2");
    }

    #[test]
    fn test_spam_message_never_mirrored() {
        let api = Arc::new(
            ScriptedApi::new("unused")
                .with_message("m1", "a@x.com", &["b@x.com"], &["SPAM", "UNREAD"])
                .with_page(page(&["m1"], &[], "cursor-2", None)),
        );
        let store = Arc::new(InMemoryStore::new());
        store.save_sync_state(SyncState::new("acct", "cursor-1")).unwrap();

        let engine = engine(api, store.clone());
        let stats = engine
            .sync(SyncMode::Maintenance, &CancelToken::new())
            .unwrap();

        assert_eq!(stats.fetched, 0);
        assert!(!store.has_message(&MessageId::new("m1")).unwrap());
    }

    #[test]
    fn test_spam_reclassification_refreshes_conversation_rollup() {
        let api = Arc::new(
            ScriptedApi::new("cursor-1")
                .with_message("m1", "a@x.com", &["b@x.com"], &["INBOX", "UNREAD"]),
        );
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(api.clone(), store.clone());

        engine
            .sync(SyncMode::Maintenance, &CancelToken::new())
            .unwrap();
        assert_eq!(store.list_conversations().unwrap()[0].unread_count, 1);

        // The remote reclassifies m1 as spam and reports it changed.
        api.messages.lock().unwrap().get_mut("m1").unwrap().label_ids =
            Some(vec!["SPAM".into()]);
        api.pages
            .lock()
            .unwrap()
            .push_back(page(&["m1"], &[], "cursor-2", None));
        engine
            .sync(SyncMode::Maintenance, &CancelToken::new())
            .unwrap();

        assert!(!store.has_message(&MessageId::new("m1")).unwrap());
        assert_eq!(store.list_conversations().unwrap()[0].unread_count, 0);
    }

    #[test]
    fn test_failed_fetch_leaves_cursor_in_place() {
        let api = Arc::new(
            ScriptedApi::new("unused").with_page(page(&["m1"], &[], "cursor-2", None)),
        );
        api.fail_fetches.lock().unwrap().insert("m1".into());
        let store = Arc::new(InMemoryStore::new());
        store.save_sync_state(SyncState::new("acct", "cursor-1")).unwrap();

        let engine = engine(api, store.clone());
        let result = engine.sync(SyncMode::Maintenance, &CancelToken::new());

        assert!(result.is_err());
        assert_eq!(store.get_sync_state("acct").unwrap().unwrap().cursor, "cursor-1");
    }

    #[test]
    fn test_messages_group_by_participant_identity() {
        let api = Arc::new(
            ScriptedApi::new("cursor-1")
                .with_message("m1", "a@x.com", &["b@x.com"], &["INBOX"])
                .with_message("m2", "B@X.com", &["a@x.com"], &["INBOX"])
                .with_message("m3", "c@x.com", &["a@x.com", "b@x.com"], &["INBOX"]),
        );
        let store = Arc::new(InMemoryStore::new());

        let engine = engine(api, store.clone());
        engine
            .sync(SyncMode::Maintenance, &CancelToken::new())
            .unwrap();

        // m1 and m2 share a 1:1 identity; m3 is a three-way group.
        assert_eq!(store.list_conversations().unwrap().len(), 2);
    }

    #[test]
    fn test_opportunistic_trigger_respects_cooldown() {
        let api = Arc::new(ScriptedApi::new("cursor-1"));
        let store = Arc::new(InMemoryStore::new());
        let engine = engine_with(
            api,
            store,
            SyncConfig {
                cooldown_secs: 3600,
                ..SyncConfig::default()
            },
        );

        let first = engine
            .sync(SyncMode::Opportunistic, &CancelToken::new())
            .unwrap();
        assert!(!first.skipped);

        let second = engine
            .sync(SyncMode::Opportunistic, &CancelToken::new())
            .unwrap();
        assert!(second.skipped);

        // Maintenance ignores the cooldown.
        let third = engine
            .sync(SyncMode::Maintenance, &CancelToken::new())
            .unwrap();
        assert!(!third.skipped);
    }

    #[test]
    fn test_cancelled_pass_does_not_advance_cursor() {
        let api = Arc::new(
            ScriptedApi::new("unused")
                .with_message("m1", "a@x.com", &["b@x.com"], &["INBOX"])
                .with_page(page(&["m1"], &[], "cursor-2", None)),
        );
        let store = Arc::new(InMemoryStore::new());
        store.save_sync_state(SyncState::new("acct", "cursor-1")).unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let engine = engine(api, store.clone());
        let result = engine.sync(SyncMode::Maintenance, &cancel);

        assert!(result.is_err());
        assert_eq!(store.get_sync_state("acct").unwrap().unwrap().cursor, "cursor-1");
    }
}
