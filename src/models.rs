//! Core data models shared across pipelines, handlers, and providers.
//!
//! These types define the shapes that flow through the system:
//!
//! ```text
//! source ──▶ Fetcher ──▶ ResultMapping ──▶ Payload ──▶ Handler
//!
//! Conversation (Vec<Message>) ──▶ ModelProvider ──▶ String / chunks
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Canonical output of a fetch: string key → list of strings or nested record.
///
/// Keys are unique within one fetch call. A missing key means the part was
/// not requested, never that it was empty. `BTreeMap` keeps serialized output
/// stable across runs.
pub type ResultMapping = BTreeMap<String, serde_json::Value>;

/// Data handed to a [`Handler`](crate::handler::Handler).
///
/// A `Serialized` payload is written as-is; a `Mapping` is preprocessed and
/// encoded by the handler's serializer first.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Mapping(ResultMapping),
    Serialized(String),
}

impl From<ResultMapping> for Payload {
    fn from(data: ResultMapping) -> Self {
        Payload::Mapping(data)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Serialized(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Serialized(text.to_string())
    }
}

/// Speaker of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
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
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Ordered sequence of messages sent to a provider.
///
/// A system message, when present, always precedes the single user message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// Builds `[system?, user]`. A blank system prompt is dropped.
    pub fn new(system: Option<String>, user: impl Into<String>) -> Self {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system.filter(|s| !s.trim().is_empty()) {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(user));
        Self { messages }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }

    /// Messages other than the system prompt, in order.
    pub fn dialogue(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role != Role::System)
    }
}

/// A provider-qualified model name. Validity is provider-relative.
pub type ModelDescriptor = String;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_puts_system_first() {
        let conv = Conversation::new(Some("be terse".into()), "hello");
        let roles: Vec<Role> = conv.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User]);
        assert_eq!(conv.system_prompt(), Some("be terse"));
        assert_eq!(conv.dialogue().count(), 1);
    }

    #[test]
    fn blank_system_prompt_is_dropped() {
        let conv = Conversation::new(Some("   ".into()), "hello");
        assert_eq!(conv.messages().len(), 1);
        assert!(conv.system_prompt().is_none());
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::user("x")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"x"}"#);
    }
}
