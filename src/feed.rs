//! Head subscription feeds
//!
//! A feed hands out a [`Subscription`]: a receiver of delivered headers plus
//! the handle needed to cancel the producer and wait for it to stop.

use crate::error::{MonitorError, Result};
use crate::polling_feed::PollingHeadFeed;
use crate::types::BlockRecord;
use crate::ws_feed::WsHeadFeed;
use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Buffered events per subscription before the producer waits
const EVENT_BUFFER: usize = 256;

/// One delivery from a feed: a header, or the error that ends the feed
pub type FeedEvent = Result<BlockRecord>;

/// A live head subscription
#[async_trait]
pub trait HeadFeed: Send + Sync {
    /// Label used in logs and the report
    fn name(&self) -> &str;

    /// Establish the subscription
    async fn subscribe(&self) -> Result<Subscription>;
}

/// Handle to a running subscription
pub struct Subscription {
    events: mpsc::Receiver<FeedEvent>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Spawn a producer task feeding a fresh subscription
    pub fn spawn<F, Fut>(producer: F) -> Self
    where
        F: FnOnce(mpsc::Sender<FeedEvent>, CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, events) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(producer(tx, cancel.clone()));
        Self {
            events,
            cancel,
            worker: Some(worker),
        }
    }

    /// Wait for the next delivery; `None` once the producer has gone away
    pub async fn next(&mut self) -> Option<FeedEvent> {
        self.events.recv().await
    }

    /// Take a delivery that is already buffered, without waiting
    pub fn try_next(&mut self) -> Option<FeedEvent> {
        self.events.try_recv().ok()
    }

    /// Cancel the producer and wait until it has acknowledged by exiting
    pub async fn unsubscribe(mut self) {
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                tracing::warn!("Subscription worker ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Send one event unless the subscription is cancelled first.
/// Returns `false` when the producer should stop.
pub(crate) async fn deliver(
    tx: &mpsc::Sender<FeedEvent>,
    cancel: &CancellationToken,
    event: FeedEvent,
) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        sent = tx.send(event) => sent.is_ok(),
    }
}

/// Build a feed from an endpoint URL.
///
/// `ws://` and `wss://` subscribe over WebSocket, `http://` and `https://`
/// poll the latest header every `poll_interval`.
pub fn feed_from_url(
    name: &str,
    url: &str,
    poll_interval: Duration,
) -> Result<Arc<dyn HeadFeed>> {
    if url.starts_with("ws://") || url.starts_with("wss://") {
        Ok(Arc::new(WsHeadFeed::new(name, url)))
    } else if url.starts_with("http://") || url.starts_with("https://") {
        Ok(Arc::new(PollingHeadFeed::new(name, url, poll_interval)?))
    } else {
        Err(MonitorError::Configuration(format!(
            "feed {} has unsupported endpoint {:?} (expected ws(s):// or http(s)://)",
            name, url
        )))
    }
}

/// Feed that replays a fixed sequence of headers.
///
/// After the script is exhausted the subscription stays open until
/// cancelled, like a live feed with no new blocks.
pub struct ScriptedFeed {
    name: String,
    records: Vec<BlockRecord>,
    interval: Duration,
    fail_after: Option<String>,
    fail_on_subscribe: Option<String>,
    subscriptions: Arc<AtomicUsize>,
}

impl ScriptedFeed {
    pub fn new(name: impl Into<String>, records: Vec<BlockRecord>) -> Self {
        Self {
            name: name.into(),
            records,
            interval: Duration::ZERO,
            fail_after: None,
            fail_on_subscribe: None,
            subscriptions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait this long before each delivery
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Raise a transport error once every record has been delivered
    pub fn then_fail(mut self, reason: impl Into<String>) -> Self {
        self.fail_after = Some(reason.into());
        self
    }

    /// Refuse the subscription outright
    pub fn fail_on_subscribe(mut self, reason: impl Into<String>) -> Self {
        self.fail_on_subscribe = Some(reason.into());
        self
    }

    /// Number of subscriptions established so far
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HeadFeed for ScriptedFeed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn subscribe(&self) -> Result<Subscription> {
        if let Some(reason) = &self.fail_on_subscribe {
            return Err(MonitorError::transport(&self.name, reason));
        }
        self.subscriptions.fetch_add(1, Ordering::SeqCst);

        let name = self.name.clone();
        let records = self.records.clone();
        let interval = self.interval;
        let fail_after = self.fail_after.clone();

        Ok(Subscription::spawn(move |tx, cancel| async move {
            for record in records {
                if !interval.is_zero() {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
                if !deliver(&tx, &cancel, Ok(record)).await {
                    return;
                }
            }
            if let Some(reason) = fail_after {
                deliver(&tx, &cancel, Err(MonitorError::transport(name, reason))).await;
                return;
            }
            cancel.cancelled().await;
        }))
    }
}
