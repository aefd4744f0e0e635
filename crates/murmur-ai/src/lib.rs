//! murmur-ai: Streaming chat-completion provider abstraction
//!
//! This crate models a completion provider as a single capability: given
//! role-tagged messages and sampling parameters, produce a stream of
//! incremental chunks that ends with a finish marker, or fail.

pub mod error;
pub mod models;
pub mod providers;
pub mod stream;
pub mod tokens;
pub mod types;

pub use error::{Error, Result};
pub use providers::CompletionProvider;
pub use stream::{ChatCompletionChunk, ChunkStream};
pub use tokens::{EstimatingTokenCounter, TokenCounter};
pub use types::*;
