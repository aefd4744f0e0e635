//! Scripted completion provider for session tests

use async_trait::async_trait;
use murmur_ai::{ChatCompletionChunk, ChunkStream, CompletionProvider, CompletionRequest};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

/// One scripted stream event
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Delta(&'static str),
    Stop,
    Fail(&'static str),
    Wait(Duration),
    /// Never yield again
    Hang,
}

/// How the provider answers one request
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Stream(Vec<Step>),
    /// Fail before any stream exists
    Reject(&'static str),
}

/// Deltas followed by the stop marker
pub(crate) fn answer(deltas: &[&'static str]) -> Reply {
    let mut steps: Vec<Step> = deltas.iter().copied().map(Step::Delta).collect();
    steps.push(Step::Stop);
    Reply::Stream(steps)
}

pub(crate) struct MockProvider {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockProvider {
    pub(crate) fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request received so far
    pub(crate) fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    async fn complete(&self, request: CompletionRequest) -> murmur_ai::Result<ChunkStream> {
        self.requests.lock().push(request);
        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| answer(&["done"]));

        let steps = match reply {
            Reply::Reject(message) => return Err(murmur_ai::Error::api("invalid_request_error", message)),
            Reply::Stream(steps) => steps,
        };

        Ok(Box::pin(async_stream::stream! {
            for step in steps {
                match step {
                    Step::Delta(text) => yield Ok(ChatCompletionChunk::delta(text)),
                    Step::Stop => yield Ok(ChatCompletionChunk::stop()),
                    Step::Fail(message) => yield Err(murmur_ai::Error::Sse(message.to_string())),
                    Step::Wait(duration) => tokio::time::sleep(duration).await,
                    Step::Hang => futures::future::pending::<()>().await,
                }
            }
        }))
    }
}
