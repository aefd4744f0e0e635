//! murmur-chat: Streaming chat session engine
//!
//! This crate turns a completion provider's token stream into an observable
//! conversation:
//! - a throttled batch collector that bounds how often stream updates land
//! - a conversation store holding the finalized log and the in-flight reply
//! - a session that runs one query at a time through preprocess, stream and
//!   finalize, with cancellation and explicit error states
//! - a scheduler for programmatic, delayed asks

pub mod collector;
pub mod config;
pub mod error;
pub mod events;
pub mod message;
pub mod render;
pub mod scheduler;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use collector::{Batch, Published, StreamHandle, collect_stream_throttled, collect_throttled};
pub use config::{ChatConfig, RenderSource, Setting};
pub use error::{Error, Result};
pub use events::ChatEvent;
pub use message::Message;
pub use render::{
    IdentityPreprocessor, MarkdownRenderer, PlainTextRenderer, QueryPreprocessor, Renderer,
    preprocess_fn, render_fn,
};
pub use scheduler::ScheduledAsk;
pub use session::{ChatSession, FailureStage, IgnoreReason, QueryFailure, QueryPhase, Submission};
pub use store::{ConversationState, ConversationStore};

// Re-export murmur-ai for convenience
pub use murmur_ai;
