//! Finalized conversation messages

use murmur_ai::{ChatMessage, Role};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One finalized turn of the conversation.
///
/// Fields are private and there are no setters: once built, a message never
/// changes. Everything derived from `content` (the rendered form and the token
/// count) is computed before construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: Uuid,
    role: Role,
    content: String,
    rendered: String,
    token_count: usize,
    created_at: i64,
}

impl Message {
    /// Build a message from already-derived parts
    pub fn new(
        role: Role,
        content: impl Into<String>,
        rendered: impl Into<String>,
        token_count: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            rendered: rendered.into(),
            token_count,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Raw text: the preprocessed query for users, the joined deltas for the assistant
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Presentational form of the content
    pub fn rendered(&self) -> &str {
        &self.rendered
    }

    pub fn token_count(&self) -> usize {
        self.token_count
    }

    /// Creation time in unix milliseconds
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Whether the presentation layer shows this message
    pub fn is_visible(&self) -> bool {
        match self.role {
            Role::System => false,
            Role::User | Role::Assistant => true,
        }
    }

    /// Style hook for the presentation layer
    pub fn css_class(&self) -> &'static str {
        match self.role {
            Role::System => "system-message",
            Role::User => "user-message",
            Role::Assistant => "assistant-message",
        }
    }

    /// Strip derived fields for sending to the provider
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage::new(self.role, self.content.clone())
    }
}
