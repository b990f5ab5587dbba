//! SQLite-backed store implementation

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use rusqlite_migration::{M, Migrations};

use super::Store;
use crate::error::SyncError;
use crate::models::{
    ActionId, ActionKind, ActionStatus, ActionTarget, Conversation, ConversationId,
    ConversationKind, Message, MessageId, PendingAction, SyncState,
};

/// Database migrations, applied in order via the user_version pragma
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Sync cursor per account
            CREATE TABLE sync_state (
                account_id TEXT PRIMARY KEY,
                cursor TEXT NOT NULL,
                last_sync_at TEXT NOT NULL
            );

            -- Conversations keyed by identity hash
            CREATE TABLE conversations (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                participants TEXT NOT NULL,  -- JSON array
                archived_at TEXT,
                hidden INTEGER NOT NULL DEFAULT 0,
                unread_count INTEGER NOT NULL DEFAULT 0,
                last_message_at TEXT NOT NULL
            );

            CREATE INDEX idx_conversations_last_message_at
                ON conversations(last_message_at DESC);

            -- Mirrored messages
            CREATE TABLE messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT,
                from_name TEXT,
                from_email TEXT NOT NULL,
                to_json TEXT NOT NULL,
                cc_json TEXT NOT NULL,
                subject TEXT NOT NULL,
                snippet TEXT NOT NULL,
                received_at TEXT NOT NULL,
                internal_date INTEGER NOT NULL,
                label_ids TEXT NOT NULL,     -- JSON array
                list_id TEXT
            );

            CREATE INDEX idx_messages_conversation_id
                ON messages(conversation_id);

            -- Durable queue of user-initiated mutations
            CREATE TABLE pending_actions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                target_type TEXT NOT NULL,
                target_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                last_attempt_at TEXT
            );

            CREATE INDEX idx_pending_actions_status
                ON pending_actions(status, created_at);
            "#,
        ),
    ])
}

/// Durable store over a single SQLite database file
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        Self::init(conn)
    }

    /// Open an in-memory database (tests)
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("bad timestamp in database: {raw}"))?
        .with_timezone(&Utc))
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<(Conversation, String)> {
    let id: String = row.get("id")?;
    let kind: String = row.get("kind")?;
    let participants: String = row.get("participants")?;
    let archived_at: Option<String> = row.get("archived_at")?;
    let hidden: bool = row.get("hidden")?;
    let unread_count: i64 = row.get("unread_count")?;
    let last_message_at: String = row.get("last_message_at")?;

    // Timestamps and JSON are validated by the caller, which owns
    // anyhow-level error context.
    Ok((
        Conversation {
            id: ConversationId::new(id),
            kind: ConversationKind::parse(&kind).unwrap_or(ConversationKind::Group),
            participants: serde_json::from_str(&participants).unwrap_or_default(),
            archived_at: archived_at
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc)),
            hidden,
            unread_count: unread_count.max(0) as usize,
            last_message_at: Utc::now(),
        },
        last_message_at,
    ))
}

fn read_conversation(row: &Row<'_>) -> Result<Conversation> {
    let (mut conversation, last_message_at) = conversation_from_row(row)?;
    conversation.last_message_at = parse_timestamp(&last_message_at)?;
    Ok(conversation)
}

fn read_message(row: &Row<'_>) -> Result<Message> {
    let conversation_id: Option<String> = row.get("conversation_id")?;
    let from_name: Option<String> = row.get("from_name")?;
    let from_email: String = row.get("from_email")?;
    let to_json: String = row.get("to_json")?;
    let cc_json: String = row.get("cc_json")?;
    let received_at: String = row.get("received_at")?;
    let label_ids: String = row.get("label_ids")?;

    Ok(Message {
        id: MessageId::new(row.get::<_, String>("id")?),
        conversation_id: conversation_id.map(ConversationId::new),
        from: crate::models::EmailAddress {
            name: from_name,
            email: from_email,
        },
        to: serde_json::from_str(&to_json).context("bad to_json in database")?,
        cc: serde_json::from_str(&cc_json).context("bad cc_json in database")?,
        subject: row.get("subject")?,
        snippet: row.get("snippet")?,
        received_at: parse_timestamp(&received_at)?,
        internal_date: row.get("internal_date")?,
        label_ids: serde_json::from_str(&label_ids).context("bad label_ids in database")?,
        list_id: row.get("list_id")?,
    })
}

fn read_pending_action(row: &Row<'_>) -> Result<PendingAction> {
    let kind: String = row.get("kind")?;
    let target_type: String = row.get("target_type")?;
    let target_id: String = row.get("target_id")?;
    let payload: String = row.get("payload")?;
    let status: String = row.get("status")?;
    let retry_count: i64 = row.get("retry_count")?;
    let created_at: String = row.get("created_at")?;
    let last_attempt_at: Option<String> = row.get("last_attempt_at")?;

    let target = match target_type.as_str() {
        "message" => ActionTarget::Message(MessageId::new(target_id)),
        "conversation" => ActionTarget::Conversation(ConversationId::new(target_id)),
        other => anyhow::bail!("unknown action target type: {other}"),
    };

    Ok(PendingAction {
        id: ActionId(row.get("id")?),
        kind: ActionKind::parse(&kind)
            .ok_or_else(|| anyhow::anyhow!("unknown action kind: {kind}"))?,
        target,
        payload: serde_json::from_str(&payload).context("bad action payload in database")?,
        status: ActionStatus::parse(&status)
            .ok_or_else(|| anyhow::anyhow!("unknown action status: {status}"))?,
        retry_count: retry_count.max(0) as u32,
        created_at: parse_timestamp(&created_at)?,
        last_attempt_at: last_attempt_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

fn target_columns(target: &ActionTarget) -> (&'static str, &str) {
    match target {
        ActionTarget::Message(id) => ("message", id.as_str()),
        ActionTarget::Conversation(id) => ("conversation", id.as_str()),
    }
}

impl Store for SqliteStore {
    fn upsert_conversation(&self, conversation: Conversation) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO conversations
                (id, kind, participants, archived_at, hidden, unread_count, last_message_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                participants = excluded.participants,
                archived_at = excluded.archived_at,
                hidden = excluded.hidden,
                unread_count = excluded.unread_count,
                last_message_at = excluded.last_message_at
            "#,
            params![
                conversation.id.as_str(),
                conversation.kind.as_str(),
                serde_json::to_string(&conversation.participants)?,
                conversation.archived_at.map(|t| t.to_rfc3339()),
                conversation.hidden,
                conversation.unread_count as i64,
                conversation.last_message_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn get_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT * FROM conversations WHERE id = ?1",
                params![id.as_str()],
                |row| conversation_from_row(row),
            )
            .optional()?;
        row.map(|(mut conversation, raw)| {
            conversation.last_message_at = parse_timestamp(&raw)?;
            Ok(conversation)
        })
        .transpose()
    }

    fn get_conversation_committed(&self, id: &ConversationId) -> Result<Option<Conversation>> {
        // Every read here goes straight to the database; there is no
        // uncommitted in-memory layer to bypass.
        self.get_conversation(id)
    }

    fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM conversations ORDER BY last_message_at DESC")?;
        let mut rows = stmt.query([])?;
        let mut all = Vec::new();
        while let Some(row) = rows.next()? {
            all.push(read_conversation(row)?);
        }
        Ok(all)
    }

    fn upsert_message(&self, message: Message) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO messages
                (id, conversation_id, from_name, from_email, to_json, cc_json,
                 subject, snippet, received_at, internal_date, label_ids, list_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(id) DO UPDATE SET
                conversation_id = excluded.conversation_id,
                from_name = excluded.from_name,
                from_email = excluded.from_email,
                to_json = excluded.to_json,
                cc_json = excluded.cc_json,
                subject = excluded.subject,
                snippet = excluded.snippet,
                received_at = excluded.received_at,
                internal_date = excluded.internal_date,
                label_ids = excluded.label_ids,
                list_id = excluded.list_id
            "#,
            params![
                message.id.as_str(),
                message.conversation_id.as_ref().map(|c| c.as_str()),
                message.from.name,
                message.from.email,
                serde_json::to_string(&message.to)?,
                serde_json::to_string(&message.cc)?,
                message.subject,
                message.snippet,
                message.received_at.to_rfc3339(),
                message.internal_date,
                serde_json::to_string(&message.label_ids)?,
                message.list_id,
            ],
        )?;
        Ok(())
    }

    fn get_message(&self, id: &MessageId) -> Result<Option<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM messages WHERE id = ?1")?;
        let mut rows = stmt.query(params![id.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(read_message(row)?)),
            None => Ok(None),
        }
    }

    fn has_message(&self, id: &MessageId) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE id = ?1",
            params![id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn delete_messages(&self, ids: &[MessageId]) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut removed = 0;
        for id in ids {
            removed += tx.execute("DELETE FROM messages WHERE id = ?1", params![id.as_str()])?;
        }
        tx.commit()?;
        Ok(removed)
    }

    fn update_message_labels(&self, id: &MessageId, labels: Vec<String>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE messages SET label_ids = ?2 WHERE id = ?1",
            params![id.as_str(), serde_json::to_string(&labels)?],
        )?;
        Ok(())
    }

    fn list_messages_for_conversation(&self, id: &ConversationId) -> Result<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM messages WHERE conversation_id = ?1 ORDER BY received_at ASC",
        )?;
        let mut rows = stmt.query(params![id.as_str()])?;
        let mut all = Vec::new();
        while let Some(row) = rows.next()? {
            all.push(read_message(row)?);
        }
        Ok(all)
    }

    fn insert_pending_action(&self, mut action: PendingAction) -> Result<PendingAction> {
        let conn = self.conn.lock().unwrap();
        let (target_type, target_id) = target_columns(&action.target);
        conn.execute(
            r#"
            INSERT INTO pending_actions
                (kind, target_type, target_id, payload, status,
                 retry_count, created_at, last_attempt_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                action.kind.as_str(),
                target_type,
                target_id,
                serde_json::to_string(&action.payload)?,
                action.status.as_str(),
                action.retry_count as i64,
                action.created_at.to_rfc3339(),
                action.last_attempt_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        action.id = ActionId(conn.last_insert_rowid());
        Ok(action)
    }

    fn update_pending_action(&self, action: &PendingAction) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let (target_type, target_id) = target_columns(&action.target);
        let updated = conn.execute(
            r#"
            UPDATE pending_actions SET
                kind = ?2, target_type = ?3, target_id = ?4, payload = ?5,
                status = ?6, retry_count = ?7, last_attempt_at = ?8
            WHERE id = ?1
            "#,
            params![
                action.id.0,
                action.kind.as_str(),
                target_type,
                target_id,
                serde_json::to_string(&action.payload)?,
                action.status.as_str(),
                action.retry_count as i64,
                action.last_attempt_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        if updated == 0 {
            return Err(SyncError::MissingTarget.into());
        }
        Ok(())
    }

    fn delete_pending_action(&self, id: ActionId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM pending_actions WHERE id = ?1", params![id.0])?;
        Ok(())
    }

    fn list_pending_actions(&self, status: ActionStatus) -> Result<Vec<PendingAction>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM pending_actions WHERE status = ?1 ORDER BY created_at ASC, id ASC",
        )?;
        let mut rows = stmt.query(params![status.as_str()])?;
        let mut all = Vec::new();
        while let Some(row) = rows.next()? {
            all.push(read_pending_action(row)?);
        }
        Ok(all)
    }

    fn get_sync_state(&self, account_id: &str) -> Result<Option<SyncState>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT cursor, last_sync_at FROM sync_state WHERE account_id = ?1",
            params![account_id],
            |row| {
                let cursor: String = row.get(0)?;
                let last_sync_at: String = row.get(1)?;
                Ok((cursor, last_sync_at))
            },
        )
        .optional()?
        .map(|(cursor, last_sync_at)| {
            Ok(SyncState {
                account_id: account_id.to_string(),
                cursor,
                last_sync_at: parse_timestamp(&last_sync_at)?,
            })
        })
        .transpose()
    }

    fn save_sync_state(&self, state: SyncState) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO sync_state (account_id, cursor, last_sync_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(account_id) DO UPDATE SET
                cursor = excluded.cursor,
                last_sync_at = excluded.last_sync_at
            "#,
            params![
                state.account_id,
                state.cursor,
                state.last_sync_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "DELETE FROM messages;
             DELETE FROM conversations;
             DELETE FROM pending_actions;
             DELETE FROM sync_state;",
        )?;
        Ok(())
    }
}
