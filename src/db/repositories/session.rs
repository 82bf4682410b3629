//! Session repository

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{decode_time, encode_time, now};
use crate::db::Database;

/// Display name for sessions created without one
pub const DEFAULT_DISPLAY_NAME: &str = "Unknown";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub session_id: String,
    pub display_name: String,
    pub archived: bool,
    pub favorite: bool,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            session_id: session_id.into(),
            display_name: display_name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string()),
            archived: false,
            favorite: false,
            created_at: now(),
        }
    }
}

/// Filters for listing sessions; a `true` flag restricts to sessions with it set
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionFilter {
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub favorite: bool,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

const SESSION_COLUMNS: &str = "id, display_name, archived, favorite, created_at";

pub struct SessionRepository {
    db: Database,
}

impl SessionRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Get the database reference
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Look up a session inside an open connection or transaction
    pub fn fetch(conn: &Connection, id: &str) -> Result<Option<Session>> {
        conn.query_row(
            &format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS),
            params![id],
            Self::map_row,
        )
        .optional()
        .context("Failed to get session")
    }

    pub fn insert(conn: &Connection, session: &Session) -> Result<()> {
        conn.execute(
            "INSERT INTO sessions (id, display_name, archived, favorite, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.session_id,
                session.display_name,
                session.archived,
                session.favorite,
                encode_time(&session.created_at),
            ],
        )
        .context("Failed to insert session")?;
        Ok(())
    }

    /// Returns false when no session has this id
    pub fn set_display_name(conn: &Connection, id: &str, display_name: &str) -> Result<bool> {
        let changed = conn
            .execute(
                "UPDATE sessions SET display_name = ?1 WHERE id = ?2",
                params![display_name, id],
            )
            .context("Failed to rename session")?;
        Ok(changed > 0)
    }

    /// Create a new session
    pub async fn create(&self, session_id: &str, display_name: Option<String>) -> Result<Session> {
        let session = Session::new(session_id, display_name);
        let conn = self.db.lock().await;
        Self::insert(&conn, &session)?;

        tracing::debug!("Created session: {}", session.session_id);
        Ok(session)
    }

    /// Get a session by ID
    pub async fn get(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.db.lock().await;
        Self::fetch(&conn, id)
    }

    /// List sessions, oldest first
    pub async fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>> {
        let conn = self.db.lock().await;

        let mut query = format!("SELECT {} FROM sessions WHERE 1=1", SESSION_COLUMNS);
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if filter.archived {
            query.push_str(" AND archived = 1");
        }
        if filter.favorite {
            query.push_str(" AND favorite = 1");
        }
        if let Some(start) = &filter.start_date {
            params.push(Box::new(encode_time(start)));
            query.push_str(&format!(" AND created_at >= ?{}", params.len()));
        }
        if let Some(end) = &filter.end_date {
            params.push(Box::new(encode_time(end)));
            query.push_str(&format!(" AND created_at <= ?{}", params.len()));
        }
        query.push_str(" ORDER BY created_at ASC");

        let mut stmt = conn.prepare(&query)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let sessions = stmt
            .query_map(params_refs.as_slice(), Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to collect sessions")?;

        Ok(sessions)
    }

    /// Set the archived and favorite flags; returns false for an unknown session
    pub async fn update_flags(&self, id: &str, archived: bool, favorite: bool) -> Result<bool> {
        let conn = self.db.lock().await;
        let changed = conn.execute(
            "UPDATE sessions SET archived = ?1, favorite = ?2 WHERE id = ?3",
            params![archived, favorite, id],
        )?;

        tracing::debug!(
            "Updated session {} flags: archived={} favorite={}",
            id,
            archived,
            favorite
        );
        Ok(changed > 0)
    }

    pub async fn rename(&self, id: &str, display_name: &str) -> Result<bool> {
        let conn = self.db.lock().await;
        Self::set_display_name(&conn, id, display_name)
    }

    /// Delete a session and, by cascade, its messages and embeddings
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.db.lock().await;
        let changed = conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        tracing::debug!("Deleted session: {}", id);
        Ok(changed > 0)
    }

    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<Session> {
        Ok(Session {
            session_id: row.get(0)?,
            display_name: row.get(1)?,
            archived: row.get(2)?,
            favorite: row.get(3)?,
            created_at: decode_time(4, &row.get::<_, String>(4)?)?,
        })
    }
}
