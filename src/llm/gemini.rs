//! Google Gemini API client.
//!
//! The API key travels in the `x-goog-api-key` header so request URLs are
//! safe to log.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::prompt::{Prompt, Role};
use super::provider::{Credential, EmbeddingClient, FragmentStream, LlmClient, ProviderKind};
use super::stream::{decode_lines, ensure_success, sse_data};

pub struct GeminiClient {
    http: Client,
    base_url: String,
    api_key: Credential,
    model: String,
}

impl GeminiClient {
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

/// One SSE line of a `streamGenerateContent` response
pub fn parse_sse_line(line: &str) -> Result<Option<String>> {
    let data = match sse_data(line) {
        Some(data) => data,
        None => return Ok(None),
    };

    let chunk: GenerateResponse =
        serde_json::from_str(data).context("Failed to parse Gemini stream chunk")?;

    if let Some(error) = chunk.error {
        anyhow::bail!("Gemini error: {}", error.message);
    }

    let text: String = chunk
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    Ok(Some(text).filter(|t| !t.is_empty()))
}

#[async_trait]
impl LlmClient for GeminiClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt) -> Result<FragmentStream> {
        let request = GenerateRequest {
            contents: prompt
                .conversation()
                .map(|e| Content {
                    role: Some(match e.role {
                        Role::Assistant => "model",
                        _ => "user",
                    }),
                    parts: vec![Part {
                        text: e.content.clone(),
                    }],
                })
                .collect(),
            system_instruction: prompt.system_text().map(|text| Content {
                role: None,
                parts: vec![Part { text }],
            }),
        };

        debug!("Requesting Gemini content stream with model {}", self.model);

        let response = self
            .http
            .post(format!(
                "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", self.api_key.expose())
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Gemini")?;
        let response = ensure_success(response, "Gemini").await?;

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
impl EmbeddingClient for GeminiClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let model_path = format!("models/{}", self.model);
        let request = BatchEmbedRequest {
            requests: inputs
                .iter()
                .map(|text| EmbedContentRequest {
                    model: &model_path,
                    content: Content {
                        role: None,
                        parts: vec![Part { text: text.clone() }],
                    },
                })
                .collect(),
        };

        let response = self
            .http
            .post(format!(
                "{}/v1beta/models/{}:batchEmbedContents",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", self.api_key.expose())
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Gemini")?;
        let response = ensure_success(response, "Gemini").await?;

        let result: BatchEmbedResponse = response
            .json()
            .await
            .context("Failed to parse Gemini embedding response")?;

        Ok(result.embeddings.into_iter().map(|e| e.values).collect())
    }
}

// -----------------------------------------------------------------------------
// Gemini DTOs
// -----------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
}

#[derive(Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Serialize)]
struct EmbedContentRequest<'a> {
    model: &'a str,
    content: Content,
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}
