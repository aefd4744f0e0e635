//! Programmatic asks: type a query into the session after a delay, then submit it.

use std::time::Duration;
use tokio::task::JoinHandle;

use crate::session::{ChatSession, Submission};

/// Gap between filling the input and triggering the submit
pub const ASK_TRIGGER_DELAY: Duration = Duration::from_millis(200);

/// A pending programmatic ask.
///
/// The ask runs on its own; dropping the handle does not stop it. Use
/// [`cancel`](Self::cancel) for that.
pub struct ScheduledAsk {
    task: JoinHandle<Submission>,
}

impl ScheduledAsk {
    /// Cancel the ask. Returns `false` if it already fired.
    pub fn cancel(&self) -> bool {
        if self.task.is_finished() {
            return false;
        }
        self.task.abort();
        true
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the ask to fire. `None` if it was cancelled.
    pub async fn wait(self) -> Option<Submission> {
        self.task.await.ok()
    }
}

/// After `delay`, set the session's pending input to `query`; after a further
/// [`ASK_TRIGGER_DELAY`], trigger a submit of whatever the input then holds.
pub fn ask(session: &ChatSession, query: impl Into<String>, delay: Duration) -> ScheduledAsk {
    let session = session.clone();
    let query = query.into();
    let task = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        tracing::debug!("Scheduled ask filling input");
        session.set_input(query);
        tokio::time::sleep(ASK_TRIGGER_DELAY).await;
        let submission = session.trigger_submit();
        tracing::debug!("Scheduled ask submitted: {:?}", submission);
        submission
    });
    ScheduledAsk { task }
}
