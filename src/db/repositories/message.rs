//! Message repository

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::embedding::decode_vector;
use super::{decode_time, encode_time, now};
use crate::db::Database;
use crate::llm::Role;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub message_id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Message {
    pub fn new(
        session_id: impl Into<String>,
        message_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            session_id: session_id.into(),
            role,
            content: content.into(),
            created_at: now(),
            embedding: None,
        }
    }
}

const MESSAGE_SELECT: &str = "SELECT m.message_id, m.session_id, m.role, m.content, m.created_at, e.vector
     FROM messages m
     LEFT JOIN message_embeddings e
       ON e.session_id = m.session_id AND e.message_id = m.message_id";

pub struct MessageRepository {
    db: Database,
}

impl MessageRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert, or overwrite role and content of an existing (session, message) row.
    /// Identity, session and creation time of an existing row are kept.
    pub fn upsert(conn: &Connection, message: &Message) -> Result<()> {
        conn.execute(
            "INSERT INTO messages (session_id, message_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(session_id, message_id)
             DO UPDATE SET role = excluded.role, content = excluded.content",
            params![
                message.session_id,
                message.message_id,
                message.role.as_str(),
                message.content,
                encode_time(&message.created_at),
            ],
        )
        .with_context(|| format!("Failed to upsert message {}", message.message_id))?;
        Ok(())
    }

    pub fn fetch(conn: &Connection, session_id: &str, message_id: &str) -> Result<Option<Message>> {
        conn.query_row(
            &format!(
                "{} WHERE m.session_id = ?1 AND m.message_id = ?2",
                MESSAGE_SELECT
            ),
            params![session_id, message_id],
            Self::map_row,
        )
        .optional()
        .context("Failed to get message")
    }

    /// Messages of a session in display order
    pub fn fetch_all(conn: &Connection, session_id: &str) -> Result<Vec<Message>> {
        let mut stmt = conn.prepare(&format!(
            "{} WHERE m.session_id = ?1 ORDER BY m.created_at ASC, m.rowid ASC",
            MESSAGE_SELECT
        ))?;
        let messages = stmt
            .query_map(params![session_id], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to collect messages")?;
        Ok(messages)
    }

    pub fn count(conn: &Connection, session_id: &str) -> Result<usize> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub async fn list(&self, session_id: &str) -> Result<Vec<Message>> {
        let conn = self.db.lock().await;
        Self::fetch_all(&conn, session_id)
    }

    pub async fn get(&self, session_id: &str, message_id: &str) -> Result<Option<Message>> {
        let conn = self.db.lock().await;
        Self::fetch(&conn, session_id, message_id)
    }

    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<Message> {
        let role_str = row.get::<_, String>(2)?;
        let vector: Option<Vec<u8>> = row.get(5)?;
        Ok(Message {
            message_id: row.get(0)?,
            session_id: row.get(1)?,
            role: Role::from_str(&role_str).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(2, Type::Text, e.into())
            })?,
            content: row.get(3)?,
            created_at: decode_time(4, &row.get::<_, String>(4)?)?,
            embedding: vector.map(|bytes| decode_vector(&bytes)),
        })
    }
}
