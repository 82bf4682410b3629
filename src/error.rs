//! Error types for the generation pipeline
//!
//! Plumbing code (repositories, HTTP clients, config IO) reports `anyhow`
//! errors with context. The core maps them into `ChatError` at the boundary
//! where the failure class matters to the caller.

use thiserror::Error;

/// Errors surfaced by the generation pipeline and its collaborators
#[derive(Debug, Error)]
pub enum ChatError {
    /// A message lacks a role or content, or carries an unknown role
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// The selected provider needs a credential and none was supplied
    #[error("Missing credential for provider: {0}")]
    MissingCredential(String),

    /// Generation could not be configured; nothing was streamed
    #[error("Configuration error: {reason}")]
    Configuration {
        reason: String,
        #[source]
        cause: Option<Box<ChatError>>,
    },

    /// The provider failed after the stream started
    #[error("Generation interrupted after {} bytes: {reason}", partial.len())]
    GenerationInterrupted { partial: String, reason: String },

    /// The provider produced no text
    #[error("Provider returned an empty response")]
    EmptyResponse,

    /// No text or chunks were given to embed
    #[error("Nothing to embed")]
    EmptyInput,

    #[error("Embedding failure: {0}")]
    EmbeddingFailure(String),

    /// Unknown session on read/update/delete
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Store commit failed: {0:#}")]
    StoreCommitFailure(anyhow::Error),
}

impl ChatError {
    /// Wrap a validation failure raised while preparing a generation
    pub fn configuration(err: ChatError) -> Self {
        ChatError::Configuration {
            reason: err.to_string(),
            cause: Some(Box::new(err)),
        }
    }

    pub fn store(err: anyhow::Error) -> Self {
        ChatError::StoreCommitFailure(err)
    }

    /// The innermost error, looking through `Configuration` wrappers
    pub fn root(&self) -> &ChatError {
        match self {
            ChatError::Configuration {
                cause: Some(cause), ..
            } => cause.root(),
            other => other,
        }
    }

    /// True for errors raised before any work became visible
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ChatError::InvalidMessage(_)
                | ChatError::MissingCredential(_)
                | ChatError::Configuration { .. }
                | ChatError::EmptyInput
        )
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_unwraps_configuration() {
        let err = ChatError::configuration(ChatError::MissingCredential("openai".into()));
        assert!(matches!(err.root(), ChatError::MissingCredential(_)));
        assert!(err.to_string().contains("openai"));
        assert!(err.is_validation());
    }

    #[test]
    fn test_interrupted_reports_partial_length() {
        let err = ChatError::GenerationInterrupted {
            partial: "AB".into(),
            reason: "connection reset".into(),
        };
        assert_eq!(
            err.to_string(),
            "Generation interrupted after 2 bytes: connection reset"
        );
        assert!(!err.is_validation());
    }
}
