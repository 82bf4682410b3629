//! Session manager: the read, update and delete side of sessions

use serde::Serialize;
use tracing::info;

use super::locks::SessionLocks;
use crate::db::{Database, Message, MessageRepository, Session, SessionFilter, SessionRepository};
use crate::error::{ChatError, Result};

/// A session with its messages in display order
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    #[serde(flatten)]
    pub session: Session,
    pub messages: Vec<Message>,
}

pub struct SessionManager {
    session_repo: SessionRepository,
    message_repo: MessageRepository,
    locks: SessionLocks,
}

impl SessionManager {
    /// `locks` must be shared with the reconciler so renames and commits do not interleave
    pub fn new(db: Database, locks: SessionLocks) -> Self {
        Self {
            session_repo: SessionRepository::new(db.clone()),
            message_repo: MessageRepository::new(db),
            locks,
        }
    }

    pub fn repository(&self) -> &SessionRepository {
        &self.session_repo
    }

    pub async fn get_conversation(&self, session_id: &str) -> Result<Conversation> {
        let session = self
            .session_repo
            .get(session_id)
            .await
            .map_err(ChatError::store)?
            .ok_or_else(|| ChatError::NotFound(session_id.to_string()))?;
        let messages = self
            .message_repo
            .list(session_id)
            .await
            .map_err(ChatError::store)?;

        Ok(Conversation { session, messages })
    }

    pub async fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>> {
        self.session_repo.list(filter).await.map_err(ChatError::store)
    }

    pub async fn update_flags(&self, session_id: &str, archived: bool, favorite: bool) -> Result<Session> {
        let _guard = self.locks.lock(session_id).await;
        let found = self
            .session_repo
            .update_flags(session_id, archived, favorite)
            .await
            .map_err(ChatError::store)?;
        self.found(session_id, found).await
    }

    pub async fn rename(&self, session_id: &str, display_name: &str) -> Result<Session> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(ChatError::InvalidMessage("display name must not be empty".to_string()));
        }

        let _guard = self.locks.lock(session_id).await;
        let found = self
            .session_repo
            .rename(session_id, display_name)
            .await
            .map_err(ChatError::store)?;
        info!("Renamed session {} to {}", session_id, display_name);
        self.found(session_id, found).await
    }

    /// Removes the session with its messages and their embeddings
    pub async fn delete(&self, session_id: &str) -> Result<()> {
        let _guard = self.locks.lock(session_id).await;
        let found = self
            .session_repo
            .delete(session_id)
            .await
            .map_err(ChatError::store)?;
        if !found {
            return Err(ChatError::NotFound(session_id.to_string()));
        }
        info!("Deleted session {}", session_id);
        Ok(())
    }

    async fn found(&self, session_id: &str, found: bool) -> Result<Session> {
        if !found {
            return Err(ChatError::NotFound(session_id.to_string()));
        }
        self.session_repo
            .get(session_id)
            .await
            .map_err(ChatError::store)?
            .ok_or_else(|| ChatError::NotFound(session_id.to_string()))
    }
}
