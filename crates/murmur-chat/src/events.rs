//! Chat session event types

use serde::{Deserialize, Serialize};

use crate::message::Message;

/// Events emitted while a session runs a query
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// A submitted query was accepted
    QueryStart { query: String },

    /// The preprocessed query was recorded
    UserMessage { message: Message },

    /// The provider call started; the streaming buffer is live
    StreamStart,

    /// Text fragments appended to the streaming buffer, in order
    Batch { fragments: Vec<String> },

    /// The reply was finalized into the log
    MessageEnd { message: Message },

    /// The query was cancelled; any partial reply is still buffered
    Cancelled,

    /// Error occurred
    Error { message: String },
}

impl ChatEvent {
    /// Check if this event ends a query
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChatEvent::MessageEnd { .. } | ChatEvent::Cancelled | ChatEvent::Error { .. }
        )
    }
}
