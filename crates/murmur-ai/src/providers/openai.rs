//! OpenAI Chat Completions API provider (and compatible endpoints)

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    providers::CompletionProvider,
    stream::{ChatCompletionChunk, ChunkStream},
    types::{ChatMessage, CompletionRequest},
};

/// Environment variable holding the API key
pub const API_KEY_ENV_VAR: &str = "OPENAI_API_KEY";

/// OpenAI API client
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider with an API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }

    fn build_request(request: &CompletionRequest) -> OpenAIRequest<'_> {
        OpenAIRequest {
            model: &request.model.id,
            messages: &request.messages,
            stream: true,
            temperature: request.temperature,
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAIProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<ChunkStream> {
        if request.model.id.trim().is_empty() {
            return Err(Error::InvalidConfig("model id is empty".to_string()));
        }
        let url = format!(
            "{}/chat/completions",
            request.model.base_url.trim_end_matches('/')
        );
        tracing::debug!(
            "Starting completion: model={} messages={} url={}",
            request.model.id,
            request.messages.len(),
            url
        );

        let mut builder = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&Self::build_request(&request));

        // Add model-specific headers
        for (key, value) in &request.model.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        let event_source = EventSource::new(builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        Ok(Box::pin(create_stream(event_source)))
    }
}

fn create_stream(mut event_source: EventSource) -> impl futures::Stream<Item = Result<ChatCompletionChunk>> {
    stream! {
        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data == "[DONE]" {
                        break;
                    }

                    match serde_json::from_str::<ChatCompletionChunk>(&msg.data) {
                        Ok(chunk) => yield Ok(chunk),
                        Err(e) => {
                            yield Err(Error::UnexpectedResponse(format!(
                                "Failed to parse chunk: {}",
                                e
                            )));
                            break;
                        }
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                    let body = response.text().await.unwrap_or_default();
                    yield Err(api_error_from_body(status.as_u16(), &body));
                    break;
                }
                Err(reqwest_eventsource::Error::Transport(e)) => {
                    yield Err(Error::Http(e));
                    break;
                }
                Err(e) => {
                    yield Err(Error::Sse(e.to_string()));
                    break;
                }
            }
        }
        event_source.close();
    }
}

/// Turn an error response body into an API error, keeping the status when
/// the body is not in the documented shape.
fn api_error_from_body(status: u16, body: &str) -> Error {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => Error::api(
            envelope
                .error
                .error_type
                .or(envelope.error.code)
                .unwrap_or_else(|| status.to_string()),
            envelope.error.message,
        ),
        Err(_) => Error::api(status.to_string(), body.trim().to_string()),
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(rename = "type", default)]
    error_type: Option<String>,
    #[serde(default)]
    code: Option<String>,
}
