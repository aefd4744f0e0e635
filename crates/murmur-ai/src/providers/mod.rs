//! Completion provider implementations

pub mod openai;

use crate::{ChunkStream, CompletionRequest, Error, Result};
use async_trait::async_trait;

/// Trait for streaming completion providers
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Start a streaming completion.
    ///
    /// Setup failures (bad credentials, unreachable endpoint) are returned
    /// directly; failures after the stream is established arrive as `Err`
    /// items on the returned stream.
    async fn complete(&self, request: CompletionRequest) -> Result<ChunkStream>;
}

/// Get an API key from a provided value or the environment
pub fn get_api_key(provided: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = provided {
        return Ok(key.to_string());
    }

    std::env::var(env_var).map_err(|_| Error::InvalidApiKey)
}
