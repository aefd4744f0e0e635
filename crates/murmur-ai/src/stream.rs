//! Streaming chunk types and the delta stream adapter

use crate::error::Result;
use crate::types::Role;
use async_stream::stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// Finish marker that terminates a turn
pub const FINISH_STOP: &str = "stop";

/// One raw event of a streaming chat completion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

/// A single choice within a chunk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Incremental payload of a choice
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ChatCompletionChunk {
    /// A chunk carrying a single text delta
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            choices: vec![ChunkChoice {
                delta: ChunkDelta {
                    role: None,
                    content: Some(text.into()),
                },
                finish_reason: None,
            }],
        }
    }

    /// A chunk carrying only a finish reason
    pub fn finished(reason: impl Into<String>) -> Self {
        Self {
            choices: vec![ChunkChoice {
                delta: ChunkDelta::default(),
                finish_reason: Some(reason.into()),
            }],
        }
    }

    /// A chunk carrying the `stop` finish marker
    pub fn stop() -> Self {
        Self::finished(FINISH_STOP)
    }

    /// Text deltas in this chunk, in arrival order
    pub fn deltas(&self) -> impl Iterator<Item = &str> {
        self.choices
            .iter()
            .filter_map(|c| c.delta.content.as_deref())
    }

    /// The first finish reason present in this chunk
    pub fn finish_reason(&self) -> Option<&str> {
        self.choices
            .iter()
            .find_map(|c| c.finish_reason.as_deref())
    }

    /// Whether this chunk carries the `stop` finish marker
    pub fn is_finished(&self) -> bool {
        self.finish_reason() == Some(FINISH_STOP)
    }
}

/// A stream of raw completion chunks
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChatCompletionChunk>> + Send>>;

/// Adapt a provider's raw chunk stream so it ends at the finish marker.
///
/// Chunks are passed through untouched, the finishing chunk included. Anything
/// the upstream emits after it is never pulled. An error item is forwarded
/// as-is and ends the adapted stream; there is no retry at this layer.
pub fn until_finish<S>(upstream: S) -> ChunkStream
where
    S: Stream<Item = Result<ChatCompletionChunk>> + Send + 'static,
{
    let mut upstream = Box::pin(upstream);
    Box::pin(stream! {
        while let Some(item) = upstream.next().await {
            match item {
                Ok(chunk) => {
                    let finished = chunk.is_finished();
                    yield Ok(chunk);
                    if finished {
                        tracing::debug!("Finish marker received, ending chunk stream");
                        return;
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    })
}
