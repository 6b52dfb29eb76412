//! libSQL backend for conversations, the work queue, and parameters.
//!
//! Supports local file and in-memory databases.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{
    Conversation, ConversationStore, ConversationUpdate, ParameterStore, QueuedMessage, WorkQueue,
};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(backend.conn()).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(backend.conn()).await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Fixed-width UTC timestamps so stored values sort lexicographically.
fn to_sql_time(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// JSON path addressing a single top-level key.
fn json_key_path(key: &str) -> String {
    format!("$.\"{}\"", key.replace('"', ""))
}

const CONVERSATION_COLUMNS: &str = "conversation_id, sender_email, email_domain, display_name, \
     subject, last_message_body, timestamp, first_contact_date, metadata";

fn row_to_conversation(row: &libsql::Row) -> Result<Conversation, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("read conversation row: {e}"));

    let metadata_str: String = row.get(8).map_err(get_err)?;
    let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata_str)
        .map_err(|e| DatabaseError::Serialization(format!("conversation metadata: {e}")))?;

    Ok(Conversation {
        conversation_id: row.get(0).map_err(get_err)?,
        sender_email: row.get(1).map_err(get_err)?,
        email_domain: row.get(2).map_err(get_err)?,
        display_name: row.get::<Option<String>>(3).map_err(get_err)?,
        subject: row.get(4).map_err(get_err)?,
        last_message_body: row.get(5).map_err(get_err)?,
        timestamp: parse_datetime(&row.get::<String>(6).map_err(get_err)?),
        first_contact_date: parse_datetime(&row.get::<String>(7).map_err(get_err)?),
        metadata,
    })
}

// ── Conversations ───────────────────────────────────────────────────

#[async_trait]
impl ConversationStore for LibSqlBackend {
    async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE conversation_id = ?1"
                ),
                params![conversation_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_conversation: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_conversation(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_conversation: {e}"))),
        }
    }

    async fn upsert_conversation(
        &self,
        update: &ConversationUpdate<'_>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO conversations (conversation_id, sender_email, email_domain,
                    display_name, subject, last_message_body, timestamp, first_contact_date, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, '{}')
                 ON CONFLICT (conversation_id) DO UPDATE SET
                    sender_email = excluded.sender_email,
                    email_domain = excluded.email_domain,
                    display_name = COALESCE(excluded.display_name, conversations.display_name),
                    subject = excluded.subject,
                    last_message_body = excluded.last_message_body,
                    timestamp = excluded.timestamp",
                params![
                    update.conversation_id,
                    update.sender_email,
                    update.email_domain,
                    opt_text(update.display_name),
                    update.subject,
                    update.last_message_body,
                    to_sql_time(update.timestamp),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_conversation: {e}")))?;

        debug!(conversation_id = update.conversation_id, "Conversation upserted");
        Ok(())
    }

    async fn merge_conversation_metadata(
        &self,
        conversation_id: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<bool, DatabaseError> {
        if metadata.is_empty() {
            return Ok(true);
        }

        let mut values = vec![libsql::Value::Text(conversation_id.to_string())];
        let mut placeholders = Vec::with_capacity(metadata.len());
        for (key, value) in metadata {
            let path_idx = values.len() + 1;
            placeholders.push(format!("?{}, ?{}", path_idx, path_idx + 1));
            values.push(libsql::Value::Text(json_key_path(key)));
            values.push(libsql::Value::Text(value.clone()));
        }

        let sql = format!(
            "UPDATE conversations SET metadata = json_set(metadata, {}) WHERE conversation_id = ?1",
            placeholders.join(", ")
        );
        let count = self
            .conn()
            .execute(&sql, libsql::params::Params::Positional(values))
            .await
            .map_err(|e| DatabaseError::Query(format!("merge_conversation_metadata: {e}")))?;

        Ok(count > 0)
    }
}

// ── Work queue ──────────────────────────────────────────────────────

#[async_trait]
impl WorkQueue for LibSqlBackend {
    async fn enqueue(&self, queue: &str, body: &str) -> Result<String, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let now = to_sql_time(Utc::now());
        self.conn()
            .execute(
                "INSERT INTO queue_messages (id, queue, body, status, receive_count, enqueued_at, visible_at)
                 VALUES (?1, ?2, ?3, 'pending', 0, ?4, ?4)",
                params![id.clone(), queue, body, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("enqueue: {e}")))?;

        debug!(queue, id = %id, "Message enqueued");
        Ok(id)
    }

    async fn receive(
        &self,
        queue: &str,
        visibility: Duration,
    ) -> Result<Option<QueuedMessage>, DatabaseError> {
        let now = Utc::now();
        let hidden_until = now
            + chrono::Duration::from_std(visibility)
                .map_err(|e| DatabaseError::Query(format!("receive: visibility out of range: {e}")))?;

        let mut rows = self
            .conn()
            .query(
                "UPDATE queue_messages
                 SET visible_at = ?1, receive_count = receive_count + 1
                 WHERE id = (
                    SELECT id FROM queue_messages
                    WHERE queue = ?2 AND status = 'pending' AND visible_at <= ?3
                    ORDER BY enqueued_at, rowid
                    LIMIT 1
                 )
                 RETURNING id, queue, body, receive_count",
                params![to_sql_time(hidden_until), queue, to_sql_time(now)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("receive: {e}")))?;

        let row = match rows.next().await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(None),
            Err(e) => return Err(DatabaseError::Query(format!("receive: {e}"))),
        };

        let get_err = |e: libsql::Error| DatabaseError::Query(format!("receive: {e}"));
        let receive_count: i64 = row.get(3).map_err(get_err)?;
        Ok(Some(QueuedMessage {
            id: row.get(0).map_err(get_err)?,
            queue: row.get(1).map_err(get_err)?,
            body: row.get(2).map_err(get_err)?,
            receive_count: u32::try_from(receive_count).unwrap_or(u32::MAX),
        }))
    }

    async fn ack(&self, id: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute("DELETE FROM queue_messages WHERE id = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("ack: {e}")))?;
        Ok(())
    }

    async fn dead_letter(&self, id: &str, error: &str) -> Result<(), DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE queue_messages SET status = 'dead', last_error = ?2 WHERE id = ?1",
                params![id, error],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("dead_letter: {e}")))?;

        if count == 0 {
            return Err(DatabaseError::NotFound {
                entity: "queue_message".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn pending_count(&self, queue: &str) -> Result<u64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM queue_messages WHERE queue = ?1 AND status = 'pending'",
                params![queue],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("pending_count: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row.get(0).unwrap_or(0);
                Ok(count.max(0) as u64)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("pending_count: {e}"))),
        }
    }
}

// ── Parameters ──────────────────────────────────────────────────────

#[async_trait]
impl ParameterStore for LibSqlBackend {
    async fn get_parameter(&self, name: &str) -> Result<Option<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT value FROM parameters WHERE name = ?1", params![name])
            .await
            .map_err(|e| DatabaseError::Query(format!("get_parameter: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row
                .get::<String>(0)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("get_parameter: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_parameter: {e}"))),
        }
    }

    async fn put_parameter(&self, name: &str, value: &str) -> Result<(), DatabaseError> {
        let now = to_sql_time(Utc::now());
        self.conn()
            .execute(
                "INSERT INTO parameters (name, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (name) DO UPDATE SET value = ?2, updated_at = ?3",
                params![name, value, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("put_parameter: {e}")))?;
        Ok(())
    }
}
