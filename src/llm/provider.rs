//! Provider capabilities and selection.
//!
//! Selection is a pure function of `(model, variant, credential)`: it names a
//! `ProviderKind` and enforces that provider's credential rule. Binding the
//! selection to a concrete client is the `ClientFactory`'s job.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use super::prompt::Prompt;
use crate::error::{ChatError, Result};

/// Incremental text fragments; an `Err` item ends the stream
pub type FragmentStream = Pin<Box<dyn Stream<Item = anyhow::Result<String>> + Send>>;

/// Text generation capability
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Concrete model name sent to the provider
    fn model(&self) -> &str;

    /// Start generating; the returned stream yields fragments in emission order
    async fn generate(&self, prompt: &Prompt) -> anyhow::Result<FragmentStream>;
}

/// Embedding capability
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn model(&self) -> &str;

    /// One vector per input, in input order
    async fn embed(&self, inputs: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Tags that select the on-device provider by equality
pub const LOCAL_TAGS: [&str; 3] = ["local", "ollama", "llama"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Local,
    OpenAi,
    Anthropic,
    Gemini,
}

impl ProviderKind {
    pub fn tag(&self) -> &'static str {
        match self {
            ProviderKind::Local => "local",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
        }
    }

    /// First match wins; unknown names fall back to the local provider
    pub fn resolve(model: Option<&str>) -> Self {
        let model = match model {
            Some(m) => m.trim().to_lowercase(),
            None => return ProviderKind::Local,
        };

        if LOCAL_TAGS.contains(&model.as_str()) {
            ProviderKind::Local
        } else if model.starts_with(ProviderKind::OpenAi.tag()) {
            ProviderKind::OpenAi
        } else if model.starts_with(ProviderKind::Anthropic.tag()) {
            ProviderKind::Anthropic
        } else if model.starts_with(ProviderKind::Gemini.tag()) {
            ProviderKind::Gemini
        } else {
            ProviderKind::Local
        }
    }

    pub fn requires_credential(&self) -> bool {
        !matches!(self, ProviderKind::Local)
    }

    pub fn supports_embeddings(&self) -> bool {
        !matches!(self, ProviderKind::Anthropic)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Provider API key; never printed
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Blank keys count as absent
    pub fn from_option(raw: Option<String>) -> Option<Self> {
        raw.filter(|key| !key.trim().is_empty()).map(Credential)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Validated per-request provider choice; never persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSelection {
    pub kind: ProviderKind,
    /// Provider-specific model name; `None` means the configured default
    pub variant: Option<String>,
    pub credential: Option<Credential>,
}

impl ProviderSelection {
    pub fn resolve(
        model: Option<&str>,
        variant: Option<&str>,
        credential: Option<Credential>,
    ) -> Result<Self> {
        let kind = ProviderKind::resolve(model);
        if kind.requires_credential() && credential.is_none() {
            return Err(ChatError::MissingCredential(kind.tag().to_string()));
        }

        Ok(Self {
            kind,
            variant: variant
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            credential: if kind.requires_credential() {
                credential
            } else {
                None
            },
        })
    }

    /// Same rules, restricted to providers with an embedding endpoint
    pub fn resolve_embedding(
        provider: Option<&str>,
        model: Option<&str>,
        credential: Option<Credential>,
    ) -> Result<Self> {
        let selection = Self::resolve(provider, model, credential)?;
        if !selection.kind.supports_embeddings() {
            return Err(ChatError::Configuration {
                reason: format!("{} has no embedding endpoint", selection.kind),
                cause: None,
            });
        }
        Ok(selection)
    }

    /// The credential, or `MissingCredential` for providers that need one
    pub fn require_credential(&self) -> Result<&Credential> {
        self.credential
            .as_ref()
            .ok_or_else(|| ChatError::MissingCredential(self.kind.tag().to_string()))
    }
}
