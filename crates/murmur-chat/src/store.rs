//! Conversation store: the finalized log plus the in-flight answer buffer.
//!
//! Both live in one `watch` cell so readers always see a consistent pair, and
//! every mutation replaces the shared slices wholesale. Rendering and token
//! counting happen before a message enters the cell; nothing derived is ever
//! recomputed afterwards.

use murmur_ai::{Role, TokenCounter};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::{ChatConfig, RenderSource};
use crate::message::Message;
use crate::render::{Renderer, render_or_raw};

/// A consistent view of the conversation
#[derive(Debug, Clone)]
pub struct ConversationState {
    /// Finalized messages in chronological order
    pub messages: Arc<[Arc<Message>]>,
    /// Raw pieces of the in-flight answer; empty when nothing is streaming
    pub streaming: Arc<[Arc<str>]>,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self {
            messages: Arc::from(Vec::new()),
            streaming: Arc::from(Vec::new()),
        }
    }
}

impl ConversationState {
    /// A non-empty buffer, even a lone placeholder, means a reply is in flight
    pub fn is_streaming(&self) -> bool {
        !self.streaming.is_empty()
    }

    /// The in-flight answer so far, or `None` when nothing is streaming
    pub fn streaming_text(&self) -> Option<String> {
        self.is_streaming().then(|| self.streaming.concat())
    }
}

/// Owns the conversation log and the streaming buffer
pub struct ConversationStore {
    state: watch::Sender<ConversationState>,
    input_renderer: Arc<dyn Renderer>,
    output_renderer: Arc<dyn Renderer>,
    token_counter: Arc<dyn TokenCounter>,
    user_render_source: RenderSource,
}

impl ConversationStore {
    pub fn new(config: &ChatConfig) -> Self {
        let (state, _) = watch::channel(ConversationState::default());
        Self {
            state,
            input_renderer: Arc::clone(&config.input_renderer),
            output_renderer: Arc::clone(&config.output_renderer),
            token_counter: Arc::clone(&config.token_counter),
            user_render_source: config.user_render_source,
        }
    }

    /// Append a user turn.
    ///
    /// The stored content is the preprocessed query. The rendered form comes
    /// from the raw or the preprocessed text depending on configuration.
    pub async fn append_user_message(
        &self,
        raw_query: &str,
        preprocessed: &str,
        model_id: &str,
    ) -> Arc<Message> {
        let source = match self.user_render_source {
            RenderSource::Raw => raw_query,
            RenderSource::Preprocessed => preprocessed,
        };
        let rendered = render_or_raw(self.input_renderer.as_ref(), source).await;
        let token_count = self.token_counter.count(preprocessed, model_id);
        let message = Arc::new(Message::new(Role::User, preprocessed, rendered, token_count));

        self.push_message(Arc::clone(&message));
        tracing::debug!("Appended user message ({} tokens)", token_count);
        message
    }

    /// Mark a reply as in flight by seeding the buffer with an empty piece.
    ///
    /// Returns `false` and leaves the buffer alone if one is already active.
    pub fn begin_streaming(&self) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_streaming() {
                tracing::warn!("begin_streaming called while a reply is already in flight");
                return false;
            }
            state.streaming = Arc::from(vec![Arc::<str>::from("")]);
            true
        })
    }

    pub fn append_streaming_fragment(&self, text: &str) {
        self.append_streaming_fragments([text]);
    }

    /// Append pieces in order. Existing pieces are never touched.
    pub fn append_streaming_fragments<I, S>(&self, fragments: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        self.append_fragments(None, fragments);
    }

    /// Append pieces unless `query` was cancelled; checked under the write lock
    pub(crate) fn append_streaming_fragments_for<I, S>(
        &self,
        query: &CancellationToken,
        fragments: I,
    ) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        self.append_fragments(Some(query), fragments)
    }

    fn append_fragments<I, S>(&self, query: Option<&CancellationToken>, fragments: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        let mut fragments = fragments.into_iter().map(Into::into).peekable();
        if fragments.peek().is_none() {
            return false;
        }
        self.state.send_if_modified(|state| {
            if query.is_some_and(CancellationToken::is_cancelled) {
                return false;
            }
            let mut pieces = state.streaming.to_vec();
            pieces.extend(fragments);
            state.streaming = pieces.into();
            true
        })
    }

    /// Drop the in-flight answer without recording it.
    ///
    /// Returns the discarded text, or `None` if nothing was streaming.
    pub fn discard_streaming(&self) -> Option<String> {
        let mut discarded = None;
        self.state.send_if_modified(|state| {
            discarded = state.streaming_text();
            if discarded.is_some() {
                state.streaming = Arc::from(Vec::new());
            }
            discarded.is_some()
        });
        discarded
    }

    /// Turn the in-flight answer into an assistant message and clear the buffer.
    ///
    /// A no-op returning `None` when nothing is streaming, so calling it twice
    /// records at most one message.
    pub async fn finalize_streaming_message(&self, model_id: &str) -> Option<Arc<Message>> {
        self.finalize(model_id, None).await
    }

    /// Finalize unless `query` was cancelled; checked under the write lock
    pub(crate) async fn finalize_streaming_message_for(
        &self,
        model_id: &str,
        query: &CancellationToken,
    ) -> Option<Arc<Message>> {
        self.finalize(model_id, Some(query)).await
    }

    async fn finalize(&self, model_id: &str, query: Option<&CancellationToken>) -> Option<Arc<Message>> {
        let pieces = Arc::clone(&self.state.borrow().streaming);
        if pieces.is_empty() {
            return None;
        }

        let content = pieces.concat();
        let rendered = render_or_raw(self.output_renderer.as_ref(), &content).await;
        let token_count = self.token_counter.count(&content, model_id);
        let message = Arc::new(Message::new(Role::Assistant, content, rendered, token_count));

        // Only commit if the buffer is still the one that was rendered; a
        // concurrent finalize or discard wins otherwise.
        let committed = self.state.send_if_modified(|state| {
            let cancelled = query.is_some_and(CancellationToken::is_cancelled);
            if cancelled || !Arc::ptr_eq(&state.streaming, &pieces) {
                return false;
            }
            let mut messages = state.messages.to_vec();
            messages.push(Arc::clone(&message));
            state.messages = messages.into();
            state.streaming = Arc::from(Vec::new());
            true
        });

        if !committed {
            tracing::debug!("Streaming buffer changed or query cancelled during finalize, skipping");
            return None;
        }
        tracing::debug!(
            "Finalized assistant message ({} chars, {} tokens)",
            message.content().len(),
            token_count
        );
        Some(message)
    }

    /// Snapshot of the finalized log
    pub fn messages(&self) -> Arc<[Arc<Message>]> {
        Arc::clone(&self.state.borrow().messages)
    }

    /// Finalized messages the presentation layer shows
    pub fn visible_messages(&self) -> Vec<Arc<Message>> {
        self.state
            .borrow()
            .messages
            .iter()
            .filter(|m| m.is_visible())
            .cloned()
            .collect()
    }

    pub fn streaming_text(&self) -> Option<String> {
        self.state.borrow().streaming_text()
    }

    pub fn is_streaming(&self) -> bool {
        self.state.borrow().is_streaming()
    }

    /// Consistent (log, buffer) pair
    pub fn snapshot(&self) -> ConversationState {
        self.state.borrow().clone()
    }

    /// Change-notifying view of the conversation
    pub fn subscribe(&self) -> watch::Receiver<ConversationState> {
        self.state.subscribe()
    }

    /// Block until any write in progress has landed
    pub(crate) fn fence(&self) {
        drop(self.state.borrow());
    }

    fn push_message(&self, message: Arc<Message>) {
        self.state.send_modify(|state| {
            let mut messages = state.messages.to_vec();
            messages.push(message);
            state.messages = messages.into();
        });
    }
}
