//! Durable conversation storage.
//!
//! # Storage layout
//!
//! Two tables are created (if they do not already exist):
//!
//! | table | column | type | description |
//! |---|---|---|---|
//! | `conversations` | id | TEXT | UUID v4 primary key |
//! | | created_at | TEXT | RFC-3339 (UTC, microseconds) |
//! | | updated_at | TEXT | RFC-3339 (UTC, microseconds) |
//! | | context_data | TEXT | JSON-encoded [`Context`][hearth_types::Context] |
//! | `messages` | id | TEXT | UUID v4 primary key |
//! | | conversation_id | TEXT | owning conversation, `ON DELETE CASCADE` |
//! | | role | TEXT | `user` / `assistant` / `system` |
//! | | content | TEXT | message body |
//! | | timestamp | TEXT | RFC-3339 (UTC, microseconds) |
//! | | metadata_data | TEXT | JSON-encoded [`MessageMetadata`] |
//!
//! # Example
//!
//! ```rust
//! use hearth_memory::{ConversationRepository, SqliteConversationRepository};
//! use hearth_types::{Conversation, Message};
//!
//! let repo = SqliteConversationRepository::open_in_memory().unwrap();
//!
//! let mut conv = Conversation::new();
//! conv.messages.push(Message::user("turn on the kitchen light"));
//! repo.save(&conv).unwrap();
//!
//! let loaded = repo.load(conv.id).unwrap().unwrap();
//! assert_eq!(loaded.messages.len(), 1);
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use hearth_types::{Conversation, HearthError, Message, MessageMetadata, Role};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from durable conversation storage.
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON column error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl From<RepositoryError> for HearthError {
    fn from(err: RepositoryError) -> Self {
        HearthError::Persistence(err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ConversationRepository
// ─────────────────────────────────────────────────────────────────────────────

/// Persistence collaborator of the [`ConversationStore`][crate::ConversationStore].
pub trait ConversationRepository: Send + Sync {
    /// Upsert the conversation and replace its full message list atomically.
    fn save(&self, conversation: &Conversation) -> Result<(), RepositoryError>;

    /// Fetch one conversation, or `None` when it was never saved.
    fn load(&self, id: Uuid) -> Result<Option<Conversation>, RepositoryError>;

    /// Remove a conversation and its messages.  Deleting an unknown id is not
    /// an error.
    fn delete(&self, id: Uuid) -> Result<(), RepositoryError>;

    /// Every saved conversation, most recently updated first.
    fn load_all(&self) -> Result<Vec<Conversation>, RepositoryError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Column helpers
// ─────────────────────────────────────────────────────────────────────────────

fn ts_to_text(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn text_to_ts(text: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Corrupt(format!("bad timestamp '{text}': {e}")))
}

fn text_to_uuid(text: &str) -> Result<Uuid, RepositoryError> {
    Uuid::parse_str(text).map_err(|e| RepositoryError::Corrupt(format!("bad id '{text}': {e}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// SqliteConversationRepository
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed [`ConversationRepository`].
pub struct SqliteConversationRepository {
    conn: Mutex<Connection>,
}

impl SqliteConversationRepository {
    /// Open (or create) a database file at `path`.
    pub fn open(path: &str) -> Result<Self, RepositoryError> {
        let repo = Self {
            conn: Mutex::new(Connection::open(path)?),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, RepositoryError> {
        let repo = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    fn init_schema(&self) -> Result<(), RepositoryError> {
        self.conn.lock().execute_batch(
            "PRAGMA foreign_keys = ON;
             CREATE TABLE IF NOT EXISTS conversations (
                 id           TEXT NOT NULL PRIMARY KEY,
                 created_at   TEXT NOT NULL,
                 updated_at   TEXT NOT NULL,
                 context_data TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS messages (
                 id              TEXT NOT NULL PRIMARY KEY,
                 conversation_id TEXT NOT NULL
                     REFERENCES conversations(id) ON DELETE CASCADE,
                 role            TEXT NOT NULL,
                 content         TEXT NOT NULL,
                 timestamp       TEXT NOT NULL,
                 metadata_data   TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_messages_conversation_id
                 ON messages(conversation_id);
             CREATE INDEX IF NOT EXISTS idx_messages_timestamp
                 ON messages(timestamp);
             CREATE INDEX IF NOT EXISTS idx_conversations_updated_at
                 ON conversations(updated_at);",
        )?;
        Ok(())
    }

    fn load_messages(conn: &Connection, id: &str) -> Result<Vec<Message>, RepositoryError> {
        let mut stmt = conn.prepare(
            "SELECT id, role, content, timestamp, metadata_data
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY timestamp ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (id, role, content, ts, metadata) = row?;
            let role = Role::parse(&role)
                .ok_or_else(|| RepositoryError::Corrupt(format!("unknown role '{role}'")))?;
            messages.push(Message {
                id: text_to_uuid(&id)?,
                role,
                content,
                timestamp: text_to_ts(&ts)?,
                metadata: serde_json::from_str::<MessageMetadata>(&metadata)?,
            });
        }
        Ok(messages)
    }

    fn row_to_conversation(
        conn: &Connection,
        (id, created_at, updated_at, context): (String, String, String, String),
    ) -> Result<Conversation, RepositoryError> {
        let messages = Self::load_messages(conn, &id)?;
        Ok(Conversation {
            id: text_to_uuid(&id)?,
            messages,
            created_at: text_to_ts(&created_at)?,
            updated_at: text_to_ts(&updated_at)?,
            context: serde_json::from_str(&context)?,
        })
    }
}

impl ConversationRepository for SqliteConversationRepository {
    fn save(&self, conversation: &Conversation) -> Result<(), RepositoryError> {
        let context = serde_json::to_string(&conversation.context)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let id = conversation.id.to_string();

        tx.execute(
            "INSERT INTO conversations (id, created_at, updated_at, context_data)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                 updated_at   = excluded.updated_at,
                 context_data = excluded.context_data",
            params![
                id,
                ts_to_text(&conversation.created_at),
                ts_to_text(&conversation.updated_at),
                context,
            ],
        )?;
        tx.execute("DELETE FROM messages WHERE conversation_id = ?1", params![id])?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO messages
                     (id, conversation_id, role, content, timestamp, metadata_data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for message in &conversation.messages {
                insert.execute(params![
                    message.id.to_string(),
                    id,
                    message.role.as_str(),
                    message.content,
                    ts_to_text(&message.timestamp),
                    serde_json::to_string(&message.metadata)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn load(&self, id: Uuid) -> Result<Option<Conversation>, RepositoryError> {
        let conn = self.conn.lock();
        let row: Option<(String, String, String, String)> = conn
            .query_row(
                "SELECT id, created_at, updated_at, context_data
                 FROM conversations WHERE id = ?1",
                params![id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;
        row.map(|r| Self::row_to_conversation(&conn, r)).transpose()
    }

    fn delete(&self, id: Uuid) -> Result<(), RepositoryError> {
        self.conn.lock().execute(
            "DELETE FROM conversations WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<Conversation>, RepositoryError> {
        let conn = self.conn.lock();
        let rows: Vec<(String, String, String, String)> = {
            let mut stmt = conn.prepare(
                "SELECT id, created_at, updated_at, context_data
                 FROM conversations
                 ORDER BY updated_at DESC",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        rows.into_iter()
            .map(|r| Self::row_to_conversation(&conn, r))
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
