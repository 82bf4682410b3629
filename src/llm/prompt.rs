//! Provider-agnostic prompt construction.
//!
//! A prompt is the role-tagged conversation in order, optionally preceded by
//! one synthetic system instruction derived from the conversation topic.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, Result};

/// Instruction prepended when the caller asks for a conversation title
pub const TITLE_INSTRUCTION: &str =
    "Produce a concise 3-4 word title summarizing the conversation. Reply with the title only.";

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => anyhow::bail!("Unknown role: {}", s),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conversation topic tag.
///
/// Only `Title` and `Summarize` change control flow; every other tag is
/// carried opaquely into the generic topic instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Topic {
    Title,
    Summarize,
    Tag(String),
}

impl Topic {
    pub fn parse(tag: &str) -> Self {
        let tag = tag.trim().to_lowercase();
        match tag.as_str() {
            "title" => Topic::Title,
            "summarise" | "summarize" => Topic::Summarize,
            _ => Topic::Tag(tag),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Topic::Title => "title",
            Topic::Summarize => "summarise",
            Topic::Tag(tag) => tag,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Topic {
    fn from(tag: String) -> Self {
        Topic::parse(&tag)
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.as_str().to_string()
    }
}

/// An unvalidated history entry as the client sent it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Turn<'a> {
    pub role: Option<&'a str>,
    pub content: Option<&'a str>,
}

impl<'a> Turn<'a> {
    pub fn new(role: &'a str, content: &'a str) -> Self {
        Self {
            role: Some(role),
            content: Some(content),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptEntry {
    pub role: Role,
    pub content: String,
}

impl PromptEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Validated, ordered prompt handed to a provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub entries: Vec<PromptEntry>,
}

impl Prompt {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// System entries joined for providers that take them out of band
    pub fn system_text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .entries
            .iter()
            .filter(|e| e.role == Role::System)
            .map(|e| e.content.as_str())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }

    /// Non-system entries in order
    pub fn conversation(&self) -> impl Iterator<Item = &PromptEntry> {
        self.entries.iter().filter(|e| e.role != Role::System)
    }
}

pub struct PromptBuilder;

impl PromptBuilder {
    /// Build a prompt from `messages`, prefixed by the topic instruction if any.
    pub fn build(messages: &[Turn<'_>], topic: Option<&Topic>) -> Result<Prompt> {
        let mut entries = Vec::with_capacity(messages.len() + 1);

        match topic {
            Some(Topic::Title) => entries.push(PromptEntry::new(Role::System, TITLE_INSTRUCTION)),
            Some(other) => entries.push(PromptEntry::new(
                Role::System,
                format!("This is a {} related conversation.", other),
            )),
            None => {}
        }

        for (index, turn) in messages.iter().enumerate() {
            let role = turn.role.ok_or_else(|| {
                ChatError::InvalidMessage(format!("message {} has no role", index))
            })?;
            let content = turn.content.ok_or_else(|| {
                ChatError::InvalidMessage(format!("message {} has no content", index))
            })?;
            let role = Role::from_str(role).map_err(|_| {
                ChatError::InvalidMessage(format!(
                    "message {} has unsupported role '{}'",
                    index, role
                ))
            })?;
            entries.push(PromptEntry::new(role, content));
        }

        Ok(Prompt { entries })
    }
}
