//! Throttled batch collector.
//!
//! Bridges an asynchronous item stream into shared state with a bounded
//! update rate. A background task pulls items, accumulates them, and
//! publishes the accumulated batch at most once per throttle interval, plus
//! one final publish for whatever is left when the stream ends. Held items
//! wait at most one interval, even when the stream stalls. A stream failure
//! is published as the terminal value.
//!
//! Every publish goes to two places:
//! - a `watch` cell holding the latest value, for readers that only care
//!   about "what is current" (`read`, `subscribe`);
//! - an ordered queue, for the single consumer that must see every batch
//!   exactly once and in order (`next_batch`).

use futures::{Stream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// An immutable batch of items
pub type Batch<T> = Arc<[T]>;

/// A value published by the collector
#[derive(Debug)]
pub enum Published<T> {
    /// Items accumulated since the previous publish
    Batch(Batch<T>),
    /// The stream failed; nothing follows
    Failed(Arc<murmur_ai::Error>),
}

impl<T> Clone for Published<T> {
    fn clone(&self) -> Self {
        match self {
            Published::Batch(b) => Published::Batch(Arc::clone(b)),
            Published::Failed(e) => Published::Failed(Arc::clone(e)),
        }
    }
}

impl<T> Published<T> {
    /// Batches become `Ok`, a failure becomes `Err`
    pub fn into_result(self) -> Result<Batch<T>, Arc<murmur_ai::Error>> {
        match self {
            Published::Batch(b) => Ok(b),
            Published::Failed(e) => Err(e),
        }
    }
}

/// Handle to a running collector.
///
/// Dropping the handle cancels the collector task.
pub struct StreamHandle<T> {
    latest: watch::Receiver<Published<T>>,
    batches: mpsc::UnboundedReceiver<Published<T>>,
    task: JoinHandle<()>,
}

impl<T> StreamHandle<T> {
    /// Latest published batch.
    ///
    /// Returns `Err` once the stream has failed; that means the stream ended
    /// abnormally, not that it has no data.
    pub fn read(&self) -> Result<Batch<T>, Arc<murmur_ai::Error>> {
        self.latest.borrow().clone().into_result()
    }

    /// Change-notifying view of the latest published value
    pub fn subscribe(&self) -> watch::Receiver<Published<T>> {
        self.latest.clone()
    }

    /// Next published value in publish order.
    ///
    /// Every batch is delivered exactly once. Returns `None` after the
    /// collector has finished (or was cancelled) and everything was consumed.
    pub async fn next_batch(&mut self) -> Option<Result<Batch<T>, Arc<murmur_ai::Error>>> {
        self.batches.recv().await.map(Published::into_result)
    }

    /// Stop consuming the underlying stream.
    ///
    /// Returns `false` if the collector had already finished.
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
}

impl<T> Drop for StreamHandle<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start collecting from a deferred stream.
///
/// `source` is awaited inside the collector task; if it fails, the failure is
/// published as the terminal value. A zero `throttle` publishes every item on
/// its own.
pub fn collect_throttled<T, S, F>(source: F, throttle: Duration) -> StreamHandle<T>
where
    T: Send + Sync + 'static,
    S: Stream<Item = murmur_ai::Result<T>> + Send + 'static,
    F: Future<Output = murmur_ai::Result<S>> + Send + 'static,
{
    let (latest_tx, latest_rx) = watch::channel(Published::Batch(Arc::from(Vec::new())));
    let (batch_tx, batch_rx) = mpsc::unbounded_channel();
    let publisher = Publisher {
        latest: latest_tx,
        ordered: batch_tx,
        publishes: 0,
    };

    let task = tokio::spawn(run_collector(source, throttle, publisher));

    StreamHandle {
        latest: latest_rx,
        batches: batch_rx,
        task,
    }
}

/// Start collecting from a stream that is already available
pub fn collect_stream_throttled<T, S>(stream: S, throttle: Duration) -> StreamHandle<T>
where
    T: Send + Sync + 'static,
    S: Stream<Item = murmur_ai::Result<T>> + Send + 'static,
{
    collect_throttled(async move { Ok(stream) }, throttle)
}

struct Publisher<T> {
    latest: watch::Sender<Published<T>>,
    ordered: mpsc::UnboundedSender<Published<T>>,
    publishes: usize,
}

impl<T> Publisher<T> {
    async fn publish(&mut self, value: Published<T>) {
        // The ordered consumer may be gone (handle dropped mid-publish); the
        // watch cell still gets the value.
        let _ = self.ordered.send(value.clone());
        self.latest.send_replace(value);
        self.publishes += 1;
        // Let observers run before the next item is pulled.
        tokio::task::yield_now().await;
    }

    async fn publish_batch(&mut self, items: Vec<T>) {
        tracing::trace!("Publishing batch of {} items", items.len());
        self.publish(Published::Batch(items.into())).await;
    }
}

async fn run_collector<T, S, F>(source: F, throttle: Duration, mut publisher: Publisher<T>)
where
    S: Stream<Item = murmur_ai::Result<T>>,
    F: Future<Output = murmur_ai::Result<S>>,
{
    let stream = match source.await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!("Stream setup failed: {}", e);
            publisher.publish(Published::Failed(Arc::new(e))).await;
            return;
        }
    };
    let mut stream = std::pin::pin!(stream);

    let mut pending: Vec<T> = Vec::new();
    let mut last_flush = Instant::now();
    let mut failure = None;

    loop {
        // Held items go out once the interval passes, even if the stream stalls.
        let next = if pending.is_empty() {
            stream.next().await
        } else {
            tokio::select! {
                next = stream.next() => next,
                _ = tokio::time::sleep_until(last_flush + throttle) => {
                    publisher.publish_batch(std::mem::take(&mut pending)).await;
                    last_flush = Instant::now();
                    continue;
                }
            }
        };
        let Some(item) = next else {
            break;
        };

        match item {
            Ok(item) => {
                pending.push(item);
                if last_flush.elapsed() >= throttle {
                    publisher.publish_batch(std::mem::take(&mut pending)).await;
                    last_flush = Instant::now();
                }
            }
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    // Trailing items go out before any failure so nothing received is lost.
    if !pending.is_empty() {
        publisher.publish_batch(pending).await;
    }
    if let Some(e) = failure {
        tracing::warn!("Stream failed: {}", e);
        publisher.publish(Published::Failed(Arc::new(e))).await;
    }

    tracing::debug!("Collector finished after {} publishes", publisher.publishes);
}
