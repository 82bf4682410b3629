//! LLM layer
//!
//! Prompt construction, the provider capabilities (`LlmClient`,
//! `EmbeddingClient`), the HTTP providers and the router that binds one of
//! them per request.

pub mod anthropic;
pub mod gemini;
pub mod ollama;
pub mod openai;
pub mod prompt;
pub mod provider;
pub mod router;
pub mod stream;

pub use prompt::{Prompt, PromptBuilder, PromptEntry, Role, Topic, Turn, TITLE_INSTRUCTION};
pub use provider::{
    Credential, EmbeddingClient, FragmentStream, LlmClient, ProviderKind, ProviderSelection,
};
pub use router::{ClientFactory, HttpClientFactory, ProviderRouter};
