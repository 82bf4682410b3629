//! Ollama (local inference) client.
//!
//! Chat streams newline-delimited JSON objects from `/api/chat`; embeddings
//! come from `/api/embed`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::prompt::Prompt;
use super::provider::{EmbeddingClient, FragmentStream, LlmClient, ProviderKind};
use super::stream::{decode_lines, ensure_success};

pub struct OllamaClient {
    http: Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(http: Client, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }
}

/// One NDJSON line of a chat stream; `None` for lines without text
pub fn parse_chat_line(line: &str) -> Result<Option<String>> {
    let chunk: ChatChunk =
        serde_json::from_str(line).context("Failed to parse Ollama stream line")?;

    if let Some(error) = chunk.error {
        anyhow::bail!("Ollama error: {}", error);
    }

    Ok(chunk
        .message
        .map(|m| m.content)
        .filter(|content| !content.is_empty()))
}

#[async_trait]
impl LlmClient for OllamaClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt) -> Result<FragmentStream> {
        let url = format!("{}/api/chat", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: prompt
                .entries
                .iter()
                .map(|e| ApiMessage {
                    role: e.role.as_str(),
                    content: &e.content,
                })
                .collect(),
            stream: true,
        };

        debug!("Requesting Ollama chat stream with model {}", self.model);

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to connect to Ollama")?;
        let response = ensure_success(response, "Ollama").await?;

        let fragments = decode_lines(Box::pin(response.bytes_stream())).filter_map(|line| {
            futures::future::ready(match line {
                Ok(line) => parse_chat_line(&line).transpose(),
                Err(e) => Some(Err(e)),
            })
        });

        Ok(Box::pin(fragments))
    }
}

#[async_trait]
impl EmbeddingClient for OllamaClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.base_url);
        let request = EmbedRequest {
            model: &self.model,
            input: inputs,
        };

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to connect to Ollama")?;
        let response = ensure_success(response, "Ollama").await?;

        let result: EmbedResponse = response
            .json()
            .await
            .context("Failed to parse Ollama embedding response")?;

        Ok(result.embeddings)
    }
}

// -----------------------------------------------------------------------------
// Ollama DTOs
// -----------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}
