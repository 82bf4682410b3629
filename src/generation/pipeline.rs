//! Generation pipeline
//!
//! `GenerationPipeline::stream` validates eagerly (prompt + provider) and
//! hands back a lazy `GenerationStream`. Nothing touches the network until
//! the first `next()`.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::GenerationConfig;
use crate::error::{ChatError, Result};
use crate::llm::{
    Credential, FragmentStream, LlmClient, Prompt, PromptBuilder, ProviderRouter, Topic, Turn,
};

/// The per-request `(model, variant, credential)` triple as clients send it
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelChoice {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl ModelChoice {
    pub fn credential(&self) -> Option<Credential> {
        Credential::from_option(self.api_key.clone())
    }
}

pub struct GenerationPipeline {
    router: ProviderRouter,
    fragment_timeout: Duration,
}

impl GenerationPipeline {
    pub fn new(router: ProviderRouter, config: &GenerationConfig) -> Self {
        Self::with_timeout(router, Duration::from_secs(config.fragment_timeout_secs))
    }

    pub fn with_timeout(router: ProviderRouter, fragment_timeout: Duration) -> Self {
        Self {
            router,
            fragment_timeout,
        }
    }

    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    /// Prepare a stream; fails with `Configuration` before anything is emitted
    pub fn stream(
        &self,
        messages: &[Turn<'_>],
        choice: &ModelChoice,
        topic: Option<&Topic>,
    ) -> Result<GenerationStream> {
        let prompt = PromptBuilder::build(messages, topic).map_err(ChatError::configuration)?;
        let client = self
            .router
            .select(
                choice.model.as_deref(),
                choice.variant.as_deref(),
                choice.credential(),
            )
            .map_err(ChatError::configuration)?;

        Ok(GenerationStream::new(client, prompt, self.fragment_timeout))
    }

    /// Short title for the conversation, whitespace-trimmed
    pub async fn generate_title(&self, messages: &[Turn<'_>], choice: &ModelChoice) -> Result<String> {
        self.complete(messages, choice, &Topic::Title).await
    }

    pub async fn summarize(&self, messages: &[Turn<'_>], choice: &ModelChoice) -> Result<String> {
        self.complete(messages, choice, &Topic::Summarize).await
    }

    async fn complete(
        &self,
        messages: &[Turn<'_>],
        choice: &ModelChoice,
        topic: &Topic,
    ) -> Result<String> {
        let mut stream = self.stream(messages, choice, Some(topic))?;
        while let Some(fragment) = stream.next().await {
            fragment?;
        }

        let text = stream.into_text();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ChatError::EmptyResponse);
        }
        Ok(trimmed.to_string())
    }
}

/// A finite, non-restartable sequence of fragments from one provider call.
///
/// Fragments are accumulated in emission order; `text()` is always the
/// concatenation of everything yielded so far.
pub struct GenerationStream {
    client: Arc<dyn LlmClient>,
    prompt: Option<Prompt>,
    inner: Option<FragmentStream>,
    text: String,
    fragment_timeout: Duration,
    cancel: CancellationToken,
    done: bool,
}

impl GenerationStream {
    pub fn new(client: Arc<dyn LlmClient>, prompt: Prompt, fragment_timeout: Duration) -> Self {
        Self {
            client,
            prompt: Some(prompt),
            inner: None,
            text: String::new(),
            fragment_timeout,
            cancel: CancellationToken::new(),
            done: false,
        }
    }

    /// Replace the cancellation signal, e.g. with a child of a request-wide token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    pub fn is_finished(&self) -> bool {
        self.done
    }

    /// Next fragment; `None` once the provider finished.
    ///
    /// A provider failure, a cancellation or a fragment timeout yields one
    /// `GenerationInterrupted` carrying the text emitted so far, then `None`.
    pub async fn next(&mut self) -> Option<Result<String>> {
        if self.done {
            return None;
        }

        if self.inner.is_none() {
            let Some(prompt) = self.prompt.take() else {
                // A previous `next()` was dropped while the provider was starting
                let err = anyhow::anyhow!("generation abandoned before the provider responded");
                return Some(Err(self.interrupt(err)));
            };
            let started = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(anyhow::anyhow!("generation cancelled")),
                started = tokio::time::timeout(self.fragment_timeout, self.client.generate(&prompt)) => {
                    started.unwrap_or_else(|_| Err(anyhow::anyhow!("provider did not respond in time")))
                }
            };
            match started {
                Ok(stream) => self.inner = Some(stream),
                Err(e) => return Some(Err(self.interrupt(e))),
            }
        }

        let inner = self.inner.as_mut()?;
        let next = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(anyhow::anyhow!("generation cancelled")),
            next = tokio::time::timeout(self.fragment_timeout, inner.next()) => {
                next.map_err(|_| anyhow::anyhow!("no fragment within {:?}", self.fragment_timeout))
            }
        };

        match next {
            Ok(Some(Ok(fragment))) => {
                self.text.push_str(&fragment);
                Some(Ok(fragment))
            }
            Ok(Some(Err(e))) | Err(e) => Some(Err(self.interrupt(e))),
            Ok(None) => {
                self.done = true;
                self.inner = None;
                debug!(
                    "Generation finished: {} bytes from {} ({})",
                    self.text.len(),
                    self.client.kind(),
                    self.client.model()
                );
                None
            }
        }
    }

    fn interrupt(&mut self, err: anyhow::Error) -> ChatError {
        self.done = true;
        // Dropping the provider stream closes the connection
        self.inner = None;
        warn!(
            "Generation interrupted after {} bytes from {}: {:#}",
            self.text.len(),
            self.client.kind(),
            err
        );
        ChatError::GenerationInterrupted {
            partial: self.text.clone(),
            reason: format!("{:#}", err),
        }
    }
}
