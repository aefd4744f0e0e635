//! Query orchestration.
//!
//! A [`ChatSession`] runs at most one query at a time. Each accepted query is
//! driven by its own task: preprocess, record the user turn, stream the reply
//! through the throttled collector into the store, and finalize it. Progress
//! is observable through the phase cell, the store, and the event feed.

use murmur_ai::{ChatMessage, CompletionProvider, CompletionRequest, Model, stream::until_finish};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::collector::collect_throttled;
use crate::config::ChatConfig;
use crate::error::{Error, Result};
use crate::events::ChatEvent;
use crate::message::Message;
use crate::render::render_or_raw;
use crate::scheduler::{self, ScheduledAsk};
use crate::store::ConversationStore;

/// Shown in place of the reply until the first fragment arrives
pub const STREAMING_PLACEHOLDER: &str = "…";

/// Where a query currently is
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum QueryPhase {
    #[default]
    Idle,
    Preprocessing,
    AwaitingFirstToken,
    Streaming,
    Finalizing,
    /// The last query failed; any partial reply is still buffered
    Errored(QueryFailure),
    /// The last query was cancelled; any partial reply is still buffered
    Cancelled,
}

impl QueryPhase {
    /// Whether a query is in flight
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            QueryPhase::Preprocessing
                | QueryPhase::AwaitingFirstToken
                | QueryPhase::Streaming
                | QueryPhase::Finalizing
        )
    }
}

/// Which step of a query failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Preprocess,
    Stream,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFailure {
    pub stage: FailureStage,
    pub message: String,
}

/// Outcome of [`ChatSession::submit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Started,
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The query had no content
    Empty,
    /// Another query is in flight
    Busy,
}

/// A chat conversation bound to one completion provider.
///
/// Cloning is cheap; clones share the same conversation.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: ChatConfig,
    provider: Arc<dyn CompletionProvider>,
    store: ConversationStore,
    phase: watch::Sender<QueryPhase>,
    input: watch::Sender<String>,
    trigger: watch::Sender<u64>,
    active: Mutex<Option<CancellationToken>>,
    event_tx: broadcast::Sender<ChatEvent>,
}

impl ChatSession {
    /// Create a new session
    pub fn new(config: ChatConfig, provider: Arc<dyn CompletionProvider>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let store = ConversationStore::new(&config);
        Self {
            inner: Arc::new(SessionInner {
                config,
                provider,
                store,
                phase: watch::channel(QueryPhase::Idle).0,
                input: watch::channel(String::new()).0,
                trigger: watch::channel(0).0,
                active: Mutex::new(None),
                event_tx,
            }),
        }
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn config(&self) -> &ChatConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &ConversationStore {
        &self.inner.store
    }

    /// Finalized conversation log
    pub fn messages(&self) -> Arc<[Arc<Message>]> {
        self.inner.store.messages()
    }

    pub fn visible_messages(&self) -> Vec<Arc<Message>> {
        self.inner.store.visible_messages()
    }

    pub fn phase(&self) -> QueryPhase {
        self.inner.phase.borrow().clone()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<QueryPhase> {
        self.inner.phase.subscribe()
    }

    /// Pending input, as a text field bound to the session would show it
    pub fn input(&self) -> String {
        self.inner.input.borrow().clone()
    }

    pub fn set_input(&self, text: impl Into<String>) {
        self.inner.input.send_replace(text.into());
    }

    /// Number of times a submit was triggered
    pub fn trigger_count(&self) -> u64 {
        *self.inner.trigger.borrow()
    }

    /// Bump the trigger counter and submit the pending input
    pub fn trigger_submit(&self) -> Submission {
        self.inner.trigger.send_modify(|n| *n += 1);
        let query = self.input();
        self.submit(query)
    }

    /// Submit a query.
    ///
    /// Blank queries are ignored, as are queries submitted while another is in
    /// flight. An accepted query clears the pending input and runs in the
    /// background; use [`wait_for_idle`](Self::wait_for_idle) or the event
    /// feed to follow it.
    pub fn submit(&self, query: impl Into<String>) -> Submission {
        let query = query.into();
        if query.trim().is_empty() {
            tracing::debug!("Ignoring empty query");
            return Submission::Ignored(IgnoreReason::Empty);
        }

        let cancel = CancellationToken::new();
        let accepted = self.inner.phase.send_if_modified(|phase| {
            if phase.is_busy() {
                return false;
            }
            *phase = QueryPhase::Preprocessing;
            *self.inner.active.lock() = Some(cancel.clone());
            true
        });
        if !accepted {
            tracing::debug!("Query already in flight, ignoring submit");
            return Submission::Ignored(IgnoreReason::Busy);
        }

        self.inner.input.send_replace(String::new());

        let session = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("Query task cancelled");
                }
                _ = session.run_query(query, &cancel) => {}
            }
        });

        Submission::Started
    }

    /// Schedule `query` to be typed in after `delay` and submitted shortly after
    pub fn ask(&self, query: impl Into<String>, delay: Duration) -> ScheduledAsk {
        scheduler::ask(self, query, delay)
    }

    /// Cancel the in-flight query.
    ///
    /// The partial reply stays in the streaming buffer; use
    /// [`commit_partial`](Self::commit_partial) or
    /// [`discard_partial`](Self::discard_partial) to resolve it. Returns
    /// `false` if nothing was in flight. Once this returns, the cancelled
    /// query no longer touches the store, the phase, or the event feed.
    pub fn cancel(&self) -> bool {
        let cancelled = self.inner.phase.send_if_modified(|phase| {
            if !phase.is_busy() {
                return false;
            }
            if let Some(token) = self.inner.active.lock().take() {
                token.cancel();
            }
            // A store write that passed its check before the token fired lands first
            self.inner.store.fence();
            *phase = QueryPhase::Cancelled;
            true
        });
        if !cancelled {
            return false;
        }

        tracing::debug!("Query cancelled");
        self.emit(ChatEvent::Cancelled);
        true
    }

    /// Record the partial reply left by a failed or cancelled query
    pub async fn commit_partial(&self) -> Result<Option<Arc<Message>>> {
        if self.phase().is_busy() {
            return Err(Error::Busy);
        }
        let message = self.commit_leftover(None).await;
        self.settle();
        Ok(message)
    }

    /// Drop the partial reply left by a failed or cancelled query
    pub fn discard_partial(&self) -> Result<Option<String>> {
        if self.phase().is_busy() {
            return Err(Error::Busy);
        }
        let discarded = self.inner.store.discard_streaming();
        self.settle();
        Ok(discarded)
    }

    /// Wait until no query is in flight
    pub async fn wait_for_idle(&self) {
        let mut rx = self.inner.phase.subscribe();
        let _ = rx.wait_for(|phase| !phase.is_busy()).await;
    }

    /// The partial reply through the streaming renderer.
    ///
    /// `None` when nothing is streaming; a placeholder until the first
    /// fragment arrives.
    pub async fn rendered_streaming_text(&self) -> Option<String> {
        let text = self.inner.store.streaming_text()?;
        if text.is_empty() {
            return Some(STREAMING_PLACEHOLDER.to_string());
        }
        Some(render_or_raw(self.inner.config.streaming_output_renderer.as_ref(), &text).await)
    }

    async fn run_query(&self, query: String, cancel: &CancellationToken) {
        let inner = &self.inner;
        let model = inner.config.model.get();

        if let Some(message) = self.commit_leftover(Some(cancel)).await {
            tracing::debug!("Committed partial reply from previous query");
            self.report(cancel, ChatEvent::MessageEnd {
                message: (*message).clone(),
            });
        }

        self.report(cancel, ChatEvent::QueryStart {
            query: query.clone(),
        });

        let preprocessed = match inner.config.query_preprocessor.preprocess(&query).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("Query preprocessing failed: {:#}", e);
                inner.input.send_replace(query);
                self.fail(cancel, FailureStage::Preprocess, Error::Preprocess(format!("{:#}", e)));
                return;
            }
        };

        if cancel.is_cancelled() {
            return;
        }
        let user = inner
            .store
            .append_user_message(&query, &preprocessed, &model.id)
            .await;
        self.report(cancel, ChatEvent::UserMessage {
            message: (*user).clone(),
        });

        inner.store.begin_streaming();
        self.advance(cancel, QueryPhase::AwaitingFirstToken);
        self.report(cancel, ChatEvent::StreamStart);

        let request = self.build_request(model.clone());
        let provider = Arc::clone(&inner.provider);
        let source = async move { provider.complete(request).await.map(until_finish) };
        let mut handle = collect_throttled(source, inner.config.throttle.get());

        let mut finished = false;
        while let Some(next) = handle.next_batch().await {
            let batch = match next {
                Ok(batch) => batch,
                Err(e) => {
                    self.fail(cancel, FailureStage::Stream, Error::Stream(e));
                    return;
                }
            };

            let mut fragments = Vec::new();
            for chunk in batch.iter() {
                fragments.extend(chunk.deltas().filter(|d| !d.is_empty()).map(str::to_owned));
                finished |= chunk.is_finished();
            }
            if !fragments.is_empty() {
                let appended = inner
                    .store
                    .append_streaming_fragments_for(cancel, fragments.iter().map(String::as_str));
                if !appended {
                    return;
                }
                self.advance(cancel, QueryPhase::Streaming);
                self.report(cancel, ChatEvent::Batch { fragments });
            }
            if finished {
                break;
            }
        }
        drop(handle);

        if !finished {
            tracing::warn!("Stream ended without a finish marker, finalizing what arrived");
        }

        self.advance(cancel, QueryPhase::Finalizing);
        let message = inner
            .store
            .finalize_streaming_message_for(&model.id, cancel)
            .await;
        if let Some(message) = message {
            self.report(cancel, ChatEvent::MessageEnd {
                message: (*message).clone(),
            });
        }
        self.advance(cancel, QueryPhase::Idle);
    }

    /// System prompt followed by the whole log
    fn build_request(&self, model: Model) -> CompletionRequest {
        let config = &self.inner.config;
        let log = self.inner.store.messages();

        let mut messages = Vec::with_capacity(log.len() + 1);
        messages.push(ChatMessage::system(config.system_prompt.get()));
        messages.extend(log.iter().map(|m| m.to_chat_message()));

        CompletionRequest::new(model, messages, config.temperature.get())
    }

    /// Finalize a leftover partial reply; a bare placeholder is dropped instead
    async fn commit_leftover(&self, query: Option<&CancellationToken>) -> Option<Arc<Message>> {
        let store = &self.inner.store;
        if query.is_some_and(CancellationToken::is_cancelled) {
            return None;
        }
        match store.streaming_text() {
            None => None,
            Some(text) if text.is_empty() => {
                store.discard_streaming();
                None
            }
            Some(_) => {
                let model = self.inner.config.model.get();
                match query {
                    Some(query) => store.finalize_streaming_message_for(&model.id, query).await,
                    None => store.finalize_streaming_message(&model.id).await,
                }
            }
        }
    }

    /// Move to `next` unless the query was cancelled. Returns whether the phase changed.
    fn advance(&self, query: &CancellationToken, next: QueryPhase) -> bool {
        self.inner.phase.send_if_modified(|phase| {
            if query.is_cancelled() || *phase == QueryPhase::Cancelled || *phase == next {
                return false;
            }
            tracing::debug!("Query phase {:?} -> {:?}", phase, next);
            *phase = next;
            true
        })
    }

    fn fail(&self, query: &CancellationToken, stage: FailureStage, error: Error) {
        tracing::warn!("Query failed: {}", error);
        let failure = QueryFailure {
            stage,
            message: error.to_string(),
        };
        if self.advance(query, QueryPhase::Errored(failure)) {
            self.emit(ChatEvent::Error {
                message: error.to_string(),
            });
        }
    }

    /// Return from a failed or cancelled state to idle
    fn settle(&self) {
        self.inner.phase.send_if_modified(|phase| {
            if matches!(phase, QueryPhase::Errored(_) | QueryPhase::Cancelled) {
                *phase = QueryPhase::Idle;
                return true;
            }
            false
        });
    }

    /// Emit on behalf of a query that has not been cancelled
    fn report(&self, query: &CancellationToken, event: ChatEvent) {
        if !query.is_cancelled() {
            self.emit(event);
        }
    }

    fn emit(&self, event: ChatEvent) {
        // No subscribers is fine
        let _ = self.inner.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{QueryPreprocessor, Renderer, preprocess_fn, render_fn};
    use crate::test_support::{MockProvider, Reply, Step, answer};
    use murmur_ai::Role;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn session_with(config: ChatConfig, replies: Vec<Reply>) -> (ChatSession, Arc<MockProvider>) {
        let provider = Arc::new(MockProvider::new(replies));
        let config = config.with_renderer(render_fn(|t| Ok(format!("<p>{}</p>", t))));
        (ChatSession::new(config, provider.clone()), provider)
    }

    fn session(replies: Vec<Reply>) -> (ChatSession, Arc<MockProvider>) {
        session_with(ChatConfig::default(), replies)
    }

    fn contents(session: &ChatSession) -> Vec<(Role, String)> {
        session
            .messages()
            .iter()
            .map(|m| (m.role(), m.content().to_string()))
            .collect()
    }

    async fn wait_for_text(session: &ChatSession, text: &str) {
        let mut rx = session.store().subscribe();
        let _ = rx
            .wait_for(|s| s.streaming_text().as_deref() == Some(text))
            .await;
    }

    #[tokio::test]
    async fn test_simple_query() {
        let (session, provider) = session(vec![answer(&["4"])]);

        assert_eq!(session.submit("2+2"), Submission::Started);
        session.wait_for_idle().await;

        assert_eq!(
            contents(&session),
            vec![(Role::User, "2+2".to_string()), (Role::Assistant, "4".to_string())]
        );
        assert_eq!(session.phase(), QueryPhase::Idle);
        assert_eq!(session.store().streaming_text(), None);

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model.id, "gpt-3.5-turbo");
        assert_eq!(requests[0].temperature, 0.7);
        assert_eq!(
            requests[0].messages,
            vec![
                ChatMessage::system("You are a helpful assistant."),
                ChatMessage::user("2+2"),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_submit_is_ignored() {
        let (session, provider) = session(vec![]);

        assert_eq!(session.submit(""), Submission::Ignored(IgnoreReason::Empty));
        assert_eq!(session.submit("   "), Submission::Ignored(IgnoreReason::Empty));
        assert_eq!(session.phase(), QueryPhase::Idle);
        assert!(session.messages().is_empty());
        assert!(provider.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_batches_finalize_in_order() {
        let reply = Reply::Stream(vec![
            Step::Wait(Duration::from_millis(150)),
            Step::Delta("The answer"),
            Step::Wait(Duration::from_millis(150)),
            Step::Delta(" is 4."),
            Step::Stop,
        ]);
        let (session, _) = session_with(
            ChatConfig::default().with_throttle(Duration::from_millis(100)),
            vec![reply],
        );
        let mut events = session.subscribe();

        session.submit("What is 2+2?");
        session.wait_for_idle().await;

        let mut batches = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ChatEvent::Batch { fragments } = event {
                batches.push(fragments);
            }
        }
        assert_eq!(
            batches,
            vec![vec!["The answer".to_string()], vec![" is 4.".to_string()]]
        );

        let messages = session.messages();
        assert_eq!(messages[1].content(), "The answer is 4.");
        assert_eq!(messages[1].rendered(), "<p>The answer is 4.</p>");
    }

    #[tokio::test]
    async fn test_submit_while_busy_is_ignored() {
        let (session, provider) = session(vec![Reply::Stream(vec![Step::Hang])]);

        assert_eq!(session.submit("first"), Submission::Started);
        assert_eq!(session.submit("second"), Submission::Ignored(IgnoreReason::Busy));
        assert!(session.phase().is_busy());

        assert!(session.cancel());
        session.wait_for_idle().await;
        assert_eq!(session.phase(), QueryPhase::Cancelled);
        assert!(provider.requests().len() <= 1);
    }

    #[tokio::test]
    async fn test_stream_failure_keeps_partial() {
        let reply = Reply::Stream(vec![
            Step::Delta("Hel"),
            Step::Delta("lo"),
            Step::Fail("connection reset"),
        ]);
        let (session, _) = session(vec![reply]);
        let mut events = session.subscribe();

        session.submit("hi");
        session.wait_for_idle().await;

        match session.phase() {
            QueryPhase::Errored(failure) => {
                assert_eq!(failure.stage, FailureStage::Stream);
                assert!(failure.message.contains("connection reset"), "{}", failure.message);
            }
            other => panic!("expected Errored, got {:?}", other),
        }
        assert_eq!(session.store().streaming_text().as_deref(), Some("Hello"));
        assert_eq!(contents(&session), vec![(Role::User, "hi".to_string())]);

        let mut saw_error = false;
        while let Ok(event) = events.try_recv() {
            saw_error |= matches!(event, ChatEvent::Error { .. });
        }
        assert!(saw_error);

        let committed = session.commit_partial().await.unwrap().unwrap();
        assert_eq!(committed.content(), "Hello");
        assert_eq!(session.phase(), QueryPhase::Idle);
        assert_eq!(session.store().streaming_text(), None);
    }

    #[tokio::test]
    async fn test_next_submit_commits_leftover_partial() {
        let (session, provider) = session(vec![
            Reply::Stream(vec![Step::Delta("Hel"), Step::Fail("reset")]),
            answer(&["ok"]),
        ]);

        session.submit("one");
        session.wait_for_idle().await;
        assert_eq!(session.submit("two"), Submission::Started);
        session.wait_for_idle().await;

        assert_eq!(
            contents(&session),
            vec![
                (Role::User, "one".to_string()),
                (Role::Assistant, "Hel".to_string()),
                (Role::User, "two".to_string()),
                (Role::Assistant, "ok".to_string()),
            ]
        );
        let second = &provider.requests()[1];
        assert_eq!(second.messages.len(), 4);
        assert_eq!(second.messages[2], ChatMessage::assistant("Hel"));
    }

    #[tokio::test]
    async fn test_setup_failure_leaves_no_empty_message() {
        let (session, _) = session(vec![Reply::Reject("model not found"), answer(&["4"])]);

        session.submit("2+2");
        session.wait_for_idle().await;
        match session.phase() {
            QueryPhase::Errored(failure) => assert_eq!(failure.stage, FailureStage::Stream),
            other => panic!("expected Errored, got {:?}", other),
        }

        session.submit("2+2");
        session.wait_for_idle().await;
        let roles: Vec<Role> = session.messages().iter().map(|m| m.role()).collect();
        assert_eq!(roles, vec![Role::User, Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn test_cancel_keeps_partial() {
        let (session, _) = session_with(
            ChatConfig::default().with_throttle(Duration::ZERO),
            vec![Reply::Stream(vec![Step::Delta("Hel"), Step::Hang])],
        );

        session.submit("hi");
        wait_for_text(&session, "Hel").await;

        assert!(session.cancel());
        assert!(!session.cancel());
        assert_eq!(session.phase(), QueryPhase::Cancelled);
        assert_eq!(session.store().streaming_text().as_deref(), Some("Hel"));
        assert_eq!(session.messages().len(), 1);

        assert_eq!(session.discard_partial().unwrap().as_deref(), Some("Hel"));
        assert_eq!(session.phase(), QueryPhase::Idle);
        assert_eq!(session.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_partial_cannot_be_resolved_while_busy() {
        let (session, _) = session(vec![Reply::Stream(vec![Step::Hang])]);
        session.submit("hi");

        assert!(matches!(session.discard_partial(), Err(Error::Busy)));
        assert!(matches!(session.commit_partial().await, Err(Error::Busy)));
        session.cancel();
    }

    #[tokio::test]
    async fn test_preprocess_failure_restores_input() {
        let (session, provider) = session_with(
            ChatConfig::default().with_query_preprocessor(preprocess_fn(|_| anyhow::bail!("offline"))),
            vec![],
        );

        session.set_input("2+2");
        assert_eq!(session.trigger_submit(), Submission::Started);
        assert_eq!(session.trigger_count(), 1);
        session.wait_for_idle().await;

        match session.phase() {
            QueryPhase::Errored(failure) => assert_eq!(failure.stage, FailureStage::Preprocess),
            other => panic!("expected Errored, got {:?}", other),
        }
        assert_eq!(session.input(), "2+2");
        assert!(session.messages().is_empty());
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn test_preprocessed_query_is_recorded_and_sent() {
        let (session, provider) = session_with(
            ChatConfig::default().with_query_preprocessor(preprocess_fn(|q| Ok(format!("Q: {}", q)))),
            vec![answer(&["4"])],
        );

        session.set_input("2+2");
        session.trigger_submit();
        assert_eq!(session.input(), "");
        session.wait_for_idle().await;

        let user = &session.messages()[0];
        assert_eq!(user.content(), "Q: 2+2");
        assert_eq!(user.rendered(), "<p>2+2</p>");
        assert_eq!(provider.requests()[0].messages[1], ChatMessage::user("Q: 2+2"));
    }

    #[tokio::test]
    async fn test_settings_are_read_per_query() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let config = ChatConfig::default()
            .with_temperature(crate::config::Setting::supplier(move || {
                counter.fetch_add(1, Ordering::SeqCst) as f32
            }))
            .with_system_prompt(crate::config::Setting::supplier(|| "Be brief.".to_string()));
        let (session, provider) = session_with(config, vec![answer(&["a"]), answer(&["b"])]);

        session.submit("one");
        session.wait_for_idle().await;
        session.submit("two");
        session.wait_for_idle().await;

        let temps: Vec<f32> = provider.requests().iter().map(|r| r.temperature).collect();
        assert_eq!(temps, vec![0.0, 1.0]);
        assert_eq!(provider.requests()[1].messages[0], ChatMessage::system("Be brief."));
    }

    #[tokio::test]
    async fn test_stream_without_stop_marker_still_finalizes() {
        let (session, _) = session(vec![Reply::Stream(vec![Step::Delta("4")])]);
        session.submit("2+2");
        session.wait_for_idle().await;

        assert_eq!(session.phase(), QueryPhase::Idle);
        assert_eq!(session.messages()[1].content(), "4");
    }

    #[tokio::test]
    async fn test_rendered_streaming_text() {
        let (session, _) = session_with(
            ChatConfig::default().with_throttle(Duration::ZERO),
            vec![Reply::Stream(vec![Step::Hang])],
        );
        assert_eq!(session.rendered_streaming_text().await, None);

        session.submit("hi");
        wait_for_text(&session, "").await;
        assert_eq!(session.rendered_streaming_text().await.as_deref(), Some("…"));

        session.store().append_streaming_fragment("**4**");
        assert_eq!(
            session.rendered_streaming_text().await.as_deref(),
            Some("<p>**4**</p>")
        );
        session.cancel();
    }

    #[tokio::test]
    async fn test_event_sequence() {
        let (session, _) = session(vec![answer(&["4"])]);
        let mut events = session.subscribe();

        session.submit("2+2");
        session.wait_for_idle().await;

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(match event {
                ChatEvent::QueryStart { .. } => "query_start",
                ChatEvent::UserMessage { .. } => "user_message",
                ChatEvent::StreamStart => "stream_start",
                ChatEvent::Batch { .. } => "batch",
                ChatEvent::MessageEnd { .. } => "message_end",
                ChatEvent::Cancelled => "cancelled",
                ChatEvent::Error { .. } => "error",
            });
        }
        assert_eq!(kinds.first(), Some(&"query_start"));
        assert_eq!(kinds.last(), Some(&"message_end"));
        assert!(kinds.contains(&"batch"));
        assert!(!kinds.contains(&"error"));
    }

    /// Passes text through after a fixed delay
    struct Slow(Duration);

    #[async_trait::async_trait]
    impl QueryPreprocessor for Slow {
        async fn preprocess(&self, query: &str) -> anyhow::Result<String> {
            tokio::time::sleep(self.0).await;
            Ok(query.to_string())
        }
    }

    #[async_trait::async_trait]
    impl Renderer for Slow {
        async fn render(&self, text: &str) -> anyhow::Result<String> {
            tokio::time::sleep(self.0).await;
            Ok(text.to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_phase_sequence() {
        let reply = Reply::Stream(vec![
            Step::Wait(Duration::from_millis(50)),
            Step::Delta(""),
            Step::Wait(Duration::from_millis(50)),
            Step::Delta("4"),
            Step::Wait(Duration::from_millis(50)),
            Step::Stop,
        ]);
        let provider = Arc::new(MockProvider::new(vec![reply]));
        let config = ChatConfig::default()
            .with_throttle(Duration::ZERO)
            .with_query_preprocessor(Slow(Duration::from_millis(50)))
            .with_renderer(Slow(Duration::from_millis(10)));
        let session = ChatSession::new(config, provider.clone());

        let mut phases = session.subscribe_phase();
        let recorder = tokio::spawn(async move {
            let mut seen = Vec::new();
            while phases.changed().await.is_ok() {
                let phase = phases.borrow_and_update().clone();
                let done = phase == QueryPhase::Idle;
                seen.push(phase);
                if done {
                    break;
                }
            }
            seen
        });

        assert_eq!(session.submit("2+2"), Submission::Started);
        assert_eq!(session.phase(), QueryPhase::Preprocessing);

        // The role-only delta has arrived but carried no text
        tokio::time::sleep(Duration::from_millis(135)).await;
        assert_eq!(provider.requests().len(), 1);
        assert_eq!(session.phase(), QueryPhase::AwaitingFirstToken);
        assert_eq!(session.store().streaming_text().as_deref(), Some(""));

        assert_eq!(
            recorder.await.unwrap(),
            vec![
                QueryPhase::Preprocessing,
                QueryPhase::AwaitingFirstToken,
                QueryPhase::Streaming,
                QueryPhase::Finalizing,
                QueryPhase::Idle,
            ]
        );
        assert_eq!(session.messages()[1].content(), "4");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_query_leaves_next_one_alone() {
        let first = Reply::Stream(vec![
            Step::Delta("Hel"),
            Step::Wait(Duration::from_millis(10)),
            Step::Delta("lo"),
            Step::Stop,
        ]);
        let (session, _) = session_with(
            ChatConfig::default().with_throttle(Duration::ZERO),
            vec![first, answer(&["ok"])],
        );

        session.submit("one");
        wait_for_text(&session, "Hel").await;
        assert!(session.cancel());
        assert_eq!(session.discard_partial().unwrap().as_deref(), Some("Hel"));

        assert_eq!(session.submit("two"), Submission::Started);
        session.wait_for_idle().await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(
            contents(&session),
            vec![
                (Role::User, "one".to_string()),
                (Role::User, "two".to_string()),
                (Role::Assistant, "ok".to_string()),
            ]
        );
        assert_eq!(session.phase(), QueryPhase::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_no_writes_after_cancel_returns() {
        for _ in 0..20 {
            let mut steps = vec![Step::Delta("x"); 200];
            steps.push(Step::Hang);
            let provider = Arc::new(MockProvider::new(vec![Reply::Stream(steps)]));
            let config = ChatConfig::default().with_throttle(Duration::ZERO);
            let session = ChatSession::new(config, provider);

            session.submit("go");
            let mut state = session.store().subscribe();
            let _ = state
                .wait_for(|s| s.streaming_text().is_some_and(|t| !t.is_empty()))
                .await;

            assert!(session.cancel());
            let frozen = session.store().snapshot();
            tokio::time::sleep(Duration::from_millis(20)).await;
            let later = session.store().snapshot();

            assert_eq!(later.streaming_text(), frozen.streaming_text());
            assert_eq!(later.messages.len(), 1);
            assert_eq!(session.phase(), QueryPhase::Cancelled);
        }
    }
}
