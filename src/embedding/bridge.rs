//! Text to vector bridge over an `EmbeddingClient`

use std::sync::Arc;

use tracing::debug;

use super::splitter::TextSplitter;
use crate::config::EmbeddingConfig;
use crate::error::{ChatError, Result};
use crate::llm::{Credential, EmbeddingClient, ProviderKind, ProviderRouter};

pub struct EmbeddingBridge {
    client: Arc<dyn EmbeddingClient>,
    splitter: TextSplitter,
}

impl EmbeddingBridge {
    pub fn new(client: Arc<dyn EmbeddingClient>, splitter: TextSplitter) -> Self {
        Self { client, splitter }
    }

    /// Bind the configured embedding provider.
    ///
    /// The configured key wins; otherwise the request's key is reused, but
    /// only when the request targets the same provider.
    pub fn from_config(
        router: &ProviderRouter,
        config: &EmbeddingConfig,
        request: Option<(ProviderKind, Credential)>,
    ) -> Result<Self> {
        let kind = ProviderKind::resolve(Some(&config.provider));
        let credential = Credential::from_option(config.api_key.clone()).or_else(|| {
            request
                .filter(|(request_kind, _)| *request_kind == kind)
                .map(|(_, credential)| credential)
        });

        let client =
            router.select_embedding(Some(&config.provider), Some(&config.model), credential)?;
        let splitter = TextSplitter::new(config.chunk_size, config.chunk_overlap)?;
        Ok(Self::new(client, splitter))
    }

    pub fn splitter(&self) -> &TextSplitter {
        &self.splitter
    }

    /// One vector for the whole text: chunk, embed, mean-pool
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyInput);
        }

        let chunks = self.splitter.split(text);
        let vectors = self.embed_chunks(&chunks).await?;
        debug!(
            "Embedded {} chars as {} chunk(s) with {}",
            text.chars().count(),
            vectors.len(),
            self.client.model()
        );
        mean_pool(vectors)
    }

    /// One vector per chunk, in chunk order
    pub async fn embed_chunks(&self, chunks: &[String]) -> Result<Vec<Vec<f32>>> {
        if chunks.is_empty() {
            return Err(ChatError::EmptyInput);
        }

        let vectors = self
            .client
            .embed(chunks)
            .await
            .map_err(|e| ChatError::EmbeddingFailure(format!("{:#}", e)))?;

        if vectors.len() != chunks.len() {
            return Err(ChatError::EmbeddingFailure(format!(
                "{} returned {} vectors for {} chunks",
                self.client.kind(),
                vectors.len(),
                chunks.len()
            )));
        }
        if vectors.iter().any(|v| v.is_empty()) {
            return Err(ChatError::EmbeddingFailure(format!(
                "{} returned an empty vector",
                self.client.kind()
            )));
        }
        Ok(vectors)
    }
}

fn mean_pool(vectors: Vec<Vec<f32>>) -> Result<Vec<f32>> {
    let mut iter = vectors.into_iter();
    let mut sum = iter.next().ok_or(ChatError::EmptyInput)?;
    let mut count = 1usize;

    for vector in iter {
        if vector.len() != sum.len() {
            return Err(ChatError::EmbeddingFailure(format!(
                "chunk vectors disagree on dimensions ({} vs {})",
                sum.len(),
                vector.len()
            )));
        }
        for (acc, v) in sum.iter_mut().zip(vector) {
            *acc += v;
        }
        count += 1;
    }

    if count > 1 {
        let n = count as f32;
        sum.iter_mut().for_each(|v| *v /= n);
    }
    Ok(sum)
}
