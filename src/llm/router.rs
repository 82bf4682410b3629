//! Provider routing.
//!
//! `ProviderRouter` validates a `(model, variant, credential)` triple into a
//! `ProviderSelection` and asks its `ClientFactory` for the bound client.
//! Adding a provider means a new `ProviderKind` variant and a new factory arm.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::Client;
use tracing::debug;

use super::anthropic::AnthropicClient;
use super::gemini::GeminiClient;
use super::ollama::OllamaClient;
use super::openai::OpenAiClient;
use super::provider::{Credential, EmbeddingClient, LlmClient, ProviderKind, ProviderSelection};
use crate::config::ProvidersConfig;
use crate::error::{ChatError, Result};

/// Builds concrete clients for validated selections
pub trait ClientFactory: Send + Sync {
    fn chat_client(&self, selection: &ProviderSelection) -> Result<Arc<dyn LlmClient>>;

    fn embedding_client(&self, selection: &ProviderSelection) -> Result<Arc<dyn EmbeddingClient>>;
}

#[derive(Clone)]
pub struct ProviderRouter {
    factory: Arc<dyn ClientFactory>,
}

impl ProviderRouter {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self { factory }
    }

    /// Router over the real HTTP providers
    pub fn http(config: &ProvidersConfig) -> anyhow::Result<Self> {
        Ok(Self::new(Arc::new(HttpClientFactory::new(config.clone())?)))
    }

    /// Bind a generation client for this request
    pub fn select(
        &self,
        model: Option<&str>,
        variant: Option<&str>,
        credential: Option<Credential>,
    ) -> Result<Arc<dyn LlmClient>> {
        let selection = ProviderSelection::resolve(model, variant, credential)?;
        let client = self.factory.chat_client(&selection)?;
        debug!(
            "Selected provider {} with model {}",
            client.kind(),
            client.model()
        );
        Ok(client)
    }

    /// Bind an embedding client; Anthropic has no embedding endpoint
    pub fn select_embedding(
        &self,
        provider: Option<&str>,
        model: Option<&str>,
        credential: Option<Credential>,
    ) -> Result<Arc<dyn EmbeddingClient>> {
        let selection = ProviderSelection::resolve_embedding(provider, model, credential)?;
        self.factory.embedding_client(&selection)
    }
}

/// Default embedding models per provider
fn default_embedding_model(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::OpenAi => "text-embedding-3-small",
        ProviderKind::Gemini => "text-embedding-004",
        _ => "nomic-embed-text",
    }
}

pub struct HttpClientFactory {
    http: Client,
    config: ProvidersConfig,
}

impl HttpClientFactory {
    pub fn new(config: ProvidersConfig) -> anyhow::Result<Self> {
        // No overall timeout: streams stay open as long as fragments arrive
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { http, config })
    }

    fn model_for(&self, selection: &ProviderSelection) -> String {
        selection.variant.clone().unwrap_or_else(|| {
            match selection.kind {
                ProviderKind::Local => &self.config.local_model,
                ProviderKind::OpenAi => &self.config.openai_model,
                ProviderKind::Anthropic => &self.config.anthropic_model,
                ProviderKind::Gemini => &self.config.gemini_model,
            }
            .clone()
        })
    }
}

impl ClientFactory for HttpClientFactory {
    fn chat_client(&self, selection: &ProviderSelection) -> Result<Arc<dyn LlmClient>> {
        let model = self.model_for(selection);
        let http = self.http.clone();

        let client: Arc<dyn LlmClient> = match selection.kind {
            ProviderKind::Local => Arc::new(OllamaClient::new(http, &self.config.ollama_url, model)),
            ProviderKind::OpenAi => Arc::new(OpenAiClient::new(
                http,
                &self.config.openai_url,
                selection.require_credential()?.clone(),
                model,
            )),
            ProviderKind::Anthropic => Arc::new(AnthropicClient::new(
                http,
                &self.config.anthropic_url,
                selection.require_credential()?.clone(),
                model,
                self.config.max_tokens,
            )),
            ProviderKind::Gemini => Arc::new(GeminiClient::new(
                http,
                &self.config.gemini_url,
                selection.require_credential()?.clone(),
                model,
            )),
        };
        Ok(client)
    }

    fn embedding_client(&self, selection: &ProviderSelection) -> Result<Arc<dyn EmbeddingClient>> {
        let model = selection
            .variant
            .clone()
            .unwrap_or_else(|| default_embedding_model(selection.kind).to_string());
        let http = self.http.clone();

        let client: Arc<dyn EmbeddingClient> = match selection.kind {
            ProviderKind::Local => Arc::new(OllamaClient::new(http, &self.config.ollama_url, model)),
            ProviderKind::OpenAi => Arc::new(OpenAiClient::new(
                http,
                &self.config.openai_url,
                selection.require_credential()?.clone(),
                model,
            )),
            ProviderKind::Gemini => Arc::new(GeminiClient::new(
                http,
                &self.config.gemini_url,
                selection.require_credential()?.clone(),
                model,
            )),
            ProviderKind::Anthropic => {
                return Err(ChatError::Configuration {
                    reason: "anthropic has no embedding endpoint".to_string(),
                    cause: None,
                })
            }
        };
        Ok(client)
    }
}
