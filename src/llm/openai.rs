//! OpenAI API client.
//!
//! Streams Chat Completions deltas over SSE and embeds through `/v1/embeddings`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::prompt::Prompt;
use super::provider::{Credential, EmbeddingClient, FragmentStream, LlmClient, ProviderKind};
use super::stream::{decode_lines, ensure_success, sse_data};

pub struct OpenAiClient {
    http: Client,
    base_url: String,
    api_key: Credential,
    model: String,
}

impl OpenAiClient {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        api_key: Credential,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        }
    }
}

/// One SSE line of a completion stream; `None` for lines without text
pub fn parse_sse_line(line: &str) -> Result<Option<String>> {
    let data = match sse_data(line) {
        Some(data) if data != "[DONE]" => data,
        _ => return Ok(None),
    };

    let chunk: StreamChunk =
        serde_json::from_str(data).context("Failed to parse OpenAI stream chunk")?;

    if let Some(error) = chunk.error {
        anyhow::bail!("OpenAI error: {}", error.message);
    }

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|content| !content.is_empty()))
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt) -> Result<FragmentStream> {
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

        debug!("Requesting OpenAI chat stream with model {}", self.model);

        let response = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose())
            .json(&request)
            .send()
            .await
            .context("Failed to send request to OpenAI")?;
        let response = ensure_success(response, "OpenAI").await?;

        let fragments = decode_lines(Box::pin(response.bytes_stream())).filter_map(|line| {
            futures::future::ready(match line {
                Ok(line) => parse_sse_line(&line).transpose(),
                Err(e) => Some(Err(e)),
            })
        });

        Ok(Box::pin(fragments))
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.model,
            input: inputs,
        };

        let response = self
            .http
            .post(format!("{}/v1/embeddings", self.base_url))
            .bearer_auth(self.api_key.expose())
            .json(&request)
            .send()
            .await
            .context("Failed to send request to OpenAI")?;
        let response = ensure_success(response, "OpenAI").await?;

        let mut result: EmbedResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI embedding response")?;

        result.data.sort_by_key(|d| d.index);
        Ok(result.data.into_iter().map(|d| d.embedding).collect())
    }
}

// -----------------------------------------------------------------------------
// OpenAI DTOs (Data Transfer Objects)
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
struct StreamChunk {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    delta: Delta,
}

#[derive(Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sse_line() {
        let line = r#"data: {"id":"c1","choices":[{"index":0,"delta":{"content":"lo"}}]}"#;
        assert_eq!(parse_sse_line(line).unwrap(), Some("lo".to_string()));

        let role_only = r#"data: {"id":"c1","choices":[{"index":0,"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_sse_line(role_only).unwrap(), None);

        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), None);
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), None);
    }
}
