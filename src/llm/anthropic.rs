//! Anthropic Messages API client (generation only).

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::prompt::Prompt;
use super::provider::{Credential, FragmentStream, LlmClient, ProviderKind};
use super::stream::{decode_lines, ensure_success, sse_data};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    http: Client,
    base_url: String,
    api_key: Credential,
    model: String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        api_key: Credential,
        model: impl Into<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            max_tokens,
        }
    }
}

/// One SSE line of a message stream; only text deltas carry fragments
pub fn parse_sse_line(line: &str) -> Result<Option<String>> {
    let data = match sse_data(line) {
        Some(data) => data,
        None => return Ok(None),
    };

    let event: StreamEvent =
        serde_json::from_str(data).context("Failed to parse Anthropic stream event")?;

    match event.kind.as_str() {
        "content_block_delta" => Ok(event
            .delta
            .and_then(|d| d.text)
            .filter(|text| !text.is_empty())),
        "error" => {
            let message = event
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| "unknown error".to_string());
            anyhow::bail!("Anthropic error: {}", message)
        }
        _ => Ok(None),
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt) -> Result<FragmentStream> {
        // System text travels outside the message list
        let system = prompt.system_text();
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: system.as_deref(),
            messages: prompt
                .conversation()
                .map(|e| ApiMessage {
                    role: e.role.as_str(),
                    content: &e.content,
                })
                .collect(),
            stream: true,
        };

        debug!("Requesting Anthropic message stream with model {}", self.model);

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Anthropic")?;
        let response = ensure_success(response, "Anthropic").await?;

        let fragments = decode_lines(Box::pin(response.bytes_stream())).filter_map(|line| {
            futures::future::ready(match line {
                Ok(line) => parse_sse_line(&line).transpose(),
                Err(e) => Some(Err(e)),
            })
        });

        Ok(Box::pin(fragments))
    }
}

// -----------------------------------------------------------------------------
// Anthropic DTOs
// -----------------------------------------------------------------------------

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<ApiMessage<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Delta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}
