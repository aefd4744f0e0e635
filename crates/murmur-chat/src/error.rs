//! Error types for murmur-chat

use std::sync::Arc;
use thiserror::Error;

/// Result type alias using murmur-chat Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a chat session
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The provider failed before or while streaming
    #[error("stream failed: {0}")]
    Stream(Arc<murmur_ai::Error>),

    /// The query preprocessor failed; the query was not sent
    #[error("query preprocessing failed: {0}")]
    Preprocess(String),

    /// A query is already in flight
    #[error("a query is already in flight")]
    Busy,
}

impl From<murmur_ai::Error> for Error {
    fn from(e: murmur_ai::Error) -> Self {
        Error::Stream(Arc::new(e))
    }
}

impl Error {
    /// Whether this error came from the provider
    pub fn is_stream_failure(&self) -> bool {
        matches!(self, Error::Stream(_))
    }
}
