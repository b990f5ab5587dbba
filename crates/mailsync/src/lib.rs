//! Mailsync crate - Client-side mailbox synchronization engine
//!
//! This crate keeps a local mirror of a remote mailbox up to date:
//! - Domain models (Conversation, Message, EmailAddress)
//! - HTTP client for the remote mailbox API, with a classified error
//!   taxonomy and shared retry/backoff policy
//! - Bounded-concurrency, priority-ordered message fetcher
//! - Deterministic conversation identity and serialized creation
//! - Cursor-based delta sync with full-sync fallback
//! - Optimistic, durable action queue for user mutations
//!
//! This crate has zero UI dependencies; a frontend drives it through
//! the engine and queue types re-exported below.

pub mod actions;
pub mod cancel;
pub mod config;
pub mod conversations;
pub mod error;
pub mod fetch;
pub mod identity;
pub mod models;
pub mod remote;
pub mod retry;
pub mod store;
pub mod sync;

pub use actions::{ActionQueue, ApiActionExecutor, ProcessSummary, RemoteActionExecutor};
pub use cancel::CancelToken;
pub use config::EngineConfig;
pub use conversations::{ConversationSerializer, GuardConfig};
pub use error::SyncError;
pub use fetch::{FetchConfig, FetchMetrics, FetchPriority, FetchScheduler, FetchTuning};
pub use identity::{classify_kind, conversation_identity, normalize_participants};
pub use models::{
    ActionId, ActionKind, ActionStatus, ActionTarget, Conversation, ConversationId,
    ConversationKind, EmailAddress, Message, MessageId, PendingAction, SyncState, labels,
};
pub use remote::{HttpMailClient, MailApi, TokenProvider};
pub use retry::{RetryConfig, RetryPolicy};
pub use store::{InMemoryStore, SqliteStore, Store, refresh_conversation_rollup};
pub use sync::{
    // Sync execution
    DeltaSyncEngine, SyncConfig, SyncMode, SyncStats,
    // Sync timing (for trigger scheduling)
    cooldown_elapsed, failure_backoff,
};
