//! Inbound request records

use serde::Deserialize;

use crate::generation::ModelChoice;
use crate::llm::{Topic, Turn};

/// One history entry as the client claims it exists
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncomingMessage {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

impl IncomingMessage {
    pub fn new(message_id: impl Into<String>, role: &str, content: impl Into<String>) -> Self {
        Self {
            message_id: Some(message_id.into()),
            role: Some(role.to_string()),
            content: Some(content.into()),
        }
    }

    pub fn turn(&self) -> Turn<'_> {
        Turn {
            role: self.role.as_deref(),
            content: self.content.as_deref(),
        }
    }
}

fn new_message_id() -> String {
    format!("msg_{}", uuid::Uuid::new_v4().simple())
}

/// A streamed chat turn: reconcile `messages` into the session, then answer
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    #[serde(default)]
    pub session_name: Option<String>,
    /// Id under which the assistant reply is stored
    #[serde(default = "new_message_id")]
    pub response_message_id: String,
    #[serde(default)]
    pub messages: Vec<IncomingMessage>,
    #[serde(flatten)]
    pub choice: ModelChoice,
    #[serde(default)]
    pub topic: Option<Topic>,
}

impl ChatRequest {
    pub fn new(session_id: impl Into<String>, messages: Vec<IncomingMessage>) -> Self {
        Self {
            session_id: session_id.into(),
            session_name: None,
            response_message_id: new_message_id(),
            messages,
            choice: ModelChoice::default(),
            topic: None,
        }
    }

    pub fn turns(&self) -> Vec<Turn<'_>> {
        self.messages.iter().map(IncomingMessage::turn).collect()
    }
}

/// Non-streaming title/summary request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionRequest {
    #[serde(default)]
    pub messages: Vec<IncomingMessage>,
    #[serde(flatten)]
    pub choice: ModelChoice,
}

impl CompletionRequest {
    pub fn turns(&self) -> Vec<Turn<'_>> {
        self.messages.iter().map(IncomingMessage::turn).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_from_json() {
        let raw = r#"{
            "session_id": "s1",
            "messages": [{"message_id": "m1", "role": "user", "content": "hi"}],
            "model": "openai",
            "variant": "gpt-4o",
            "api_key": "sk-test",
            "topic": "code"
        }"#;
        let request: ChatRequest = serde_json::from_str(raw).unwrap();

        assert_eq!(request.session_id, "s1");
        assert!(request.response_message_id.starts_with("msg_"));
        assert_eq!(request.choice.model.as_deref(), Some("openai"));
        assert_eq!(request.choice.variant.as_deref(), Some("gpt-4o"));
        assert!(request.choice.credential().is_some());
        assert_eq!(request.topic, Some(Topic::Tag("code".into())));
        assert_eq!(request.turns()[0], Turn::new("user", "hi"));
    }

    #[test]
    fn test_missing_fields_stay_unvalidated() {
        let raw = r#"{"session_id": "s1", "messages": [{"content": "orphan"}]}"#;
        let request: ChatRequest = serde_json::from_str(raw).unwrap();
        assert!(request.messages[0].message_id.is_none());
        assert!(request.turns()[0].role.is_none());
    }
}
