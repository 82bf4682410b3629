//! Semantic search over stored message vectors

use serde::Serialize;

use super::bridge::EmbeddingBridge;
use crate::config::EmbeddingConfig;
use crate::db::{Database, EmbeddingRepository, Message, MessageRepository};
use crate::error::{ChatError, Result};
use crate::llm::{Credential, ProviderKind, ProviderRouter};

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub score: f32,
    #[serde(flatten)]
    pub message: Message,
}

pub struct SearchService {
    db: Database,
    router: ProviderRouter,
    config: EmbeddingConfig,
}

impl SearchService {
    pub fn new(db: Database, router: ProviderRouter, config: EmbeddingConfig) -> Self {
        Self { db, router, config }
    }

    /// Top-`k` stored messages closest to `query`, optionally within one session
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        session_id: Option<&str>,
        credential: Option<Credential>,
    ) -> Result<Vec<SearchHit>> {
        let kind = ProviderKind::resolve(Some(&self.config.provider));
        let bridge = EmbeddingBridge::from_config(
            &self.router,
            &self.config,
            credential.map(|c| (kind, c)),
        )?;
        let vector = bridge.embed(query).await?;

        let similar = EmbeddingRepository::new(self.db.clone())
            .similarity_search(&vector, k, session_id)
            .await
            .map_err(ChatError::store)?;

        let messages = MessageRepository::new(self.db.clone());
        let mut hits = Vec::with_capacity(similar.len());
        for hit in similar {
            let message = messages
                .get(&hit.session_id, &hit.message_id)
                .await
                .map_err(ChatError::store)?;
            if let Some(message) = message {
                hits.push(SearchHit {
                    score: hit.score,
                    message,
                });
            }
        }
        Ok(hits)
    }
}
