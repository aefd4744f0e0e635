//! Core types for chat-completion requests

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Default OpenAI-compatible endpoint
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Message roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Get the role as it appears on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A role-tagged message as sent to the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Model definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// Model identifier (e.g., "gpt-3.5-turbo")
    pub id: String,
    /// Base URL for API calls
    pub base_url: String,
    /// Additional headers for API calls
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Model {
    /// A model served from the default OpenAI endpoint
    pub fn openai(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_url: OPENAI_BASE_URL.to_string(),
            headers: HashMap::new(),
        }
    }

    /// Point this model at a different OpenAI-compatible endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Whether this is one of the known model identifiers
    pub fn is_known(&self) -> bool {
        crate::models::is_known_model(&self.id)
    }
}

/// A streaming completion request
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Model to sample from
    pub model: Model,
    /// Full history, system prompt first
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature (0.0 - 2.0)
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(model: Model, messages: Vec<ChatMessage>, temperature: f32) -> Self {
        Self {
            model,
            messages,
            temperature,
        }
    }
}
