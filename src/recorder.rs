//! Stream Recorder
//!
//! Owns one feed's append-only log for the duration of the window. Nothing
//! else reads or writes it until it is frozen into a [`FeedRecording`].

use crate::error::{MonitorError, Result};
use crate::feed::HeadFeed;
use crate::types::{BlockHash, BlockRecord, FeedId};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle of one feed within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FeedState {
    Idle,
    Accumulating,
    Analyzed,
    Reported,
}

impl FeedState {
    pub fn can_advance_to(self, next: FeedState) -> bool {
        matches!(
            (self, next),
            (FeedState::Idle, FeedState::Accumulating)
                | (FeedState::Accumulating, FeedState::Analyzed)
                | (FeedState::Analyzed, FeedState::Reported)
        )
    }
}

impl fmt::Display for FeedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

fn advance(feed: FeedId, state: &mut FeedState, next: FeedState) -> Result<()> {
    if !state.can_advance_to(next) {
        return Err(MonitorError::InvalidTransition {
            feed,
            from: state.to_string(),
            to: next.to_string(),
        });
    }
    *state = next;
    Ok(())
}

/// A frozen feed log, ready for analysis
#[derive(Debug, Clone)]
pub struct FeedRecording {
    pub feed: FeedId,
    pub name: String,
    pub state: FeedState,
    /// Every delivered header, in delivery order, duplicates included
    pub log: Vec<BlockRecord>,
    /// Distinct hashes in `log`
    pub hashes: HashSet<BlockHash>,
    /// Why accumulation ended early, if it did
    pub terminal_error: Option<MonitorError>,
}

impl FeedRecording {
    /// Build an already-frozen recording from a log, as if it had been
    /// observed without error
    pub fn from_log(feed: FeedId, name: impl Into<String>, log: Vec<BlockRecord>) -> Self {
        let hashes = log.iter().map(|r| r.hash).collect();
        Self {
            feed,
            name: name.into(),
            state: FeedState::Analyzed,
            log,
            hashes,
            terminal_error: None,
        }
    }

    pub fn with_error(mut self, error: MonitorError) -> Self {
        self.terminal_error = Some(error);
        self
    }

    /// Analyzed -> Reported
    pub fn mark_reported(&mut self) -> Result<()> {
        advance(self.feed, &mut self.state, FeedState::Reported)
    }
}

/// Accumulates one feed's deliveries
pub struct StreamRecorder {
    feed: FeedId,
    name: String,
    state: FeedState,
    log: Vec<BlockRecord>,
    hashes: HashSet<BlockHash>,
    terminal_error: Option<MonitorError>,
}

impl StreamRecorder {
    pub fn new(feed: FeedId, name: impl Into<String>) -> Self {
        Self {
            feed,
            name: name.into(),
            state: FeedState::Idle,
            log: Vec::new(),
            hashes: HashSet::new(),
            terminal_error: None,
        }
    }

    pub fn state(&self) -> FeedState {
        self.state
    }

    /// Idle -> Accumulating
    pub fn begin(&mut self) -> Result<()> {
        advance(self.feed, &mut self.state, FeedState::Accumulating)
    }

    /// Append a delivered header. The log keeps duplicates; the hash set
    /// collapses them.
    pub fn record(&mut self, record: BlockRecord) {
        debug!(
            "[{}] Block #{} hash={}... parent={}...",
            self.name,
            record.number,
            record.hash.short(),
            record.parent_hash.short()
        );
        self.hashes.insert(record.hash);
        self.log.push(record);
    }

    /// Note the error that ended this feed. The partial log is kept.
    pub fn fail(&mut self, error: MonitorError) {
        warn!("[{}] Subscription error: {}", self.name, error);
        if self.terminal_error.is_none() {
            self.terminal_error = Some(error);
        }
    }

    /// Accumulating -> Analyzed
    pub fn freeze(mut self) -> Result<FeedRecording> {
        advance(self.feed, &mut self.state, FeedState::Analyzed)?;
        Ok(FeedRecording {
            feed: self.feed,
            name: self.name,
            state: self.state,
            log: self.log,
            hashes: self.hashes,
            terminal_error: self.terminal_error,
        })
    }

    /// Observe `feed` for at most `window`, or until `cancel` fires.
    ///
    /// A transport error ends this feed only; whatever was delivered before
    /// it is returned alongside the error. Once `cancel` has fired no new
    /// subscription is attempted.
    pub async fn observe(
        mut self,
        feed: Arc<dyn HeadFeed>,
        window: Duration,
        cancel: CancellationToken,
    ) -> Result<FeedRecording> {
        self.begin()?;

        if cancel.is_cancelled() {
            info!("[{}] Cancelled before subscribing", self.name);
            return self.freeze();
        }

        let subscribed = tokio::select! {
            _ = cancel.cancelled() => {
                info!("[{}] Cancelled while subscribing", self.name);
                return self.freeze();
            }
            subscribed = feed.subscribe() => subscribed,
        };
        let mut subscription = match subscribed {
            Ok(subscription) => subscription,
            Err(e) => {
                self.fail(e);
                return self.freeze();
            }
        };
        info!("[{}] Accumulating for {:?}", self.name, window);

        let window_closed = tokio::time::sleep(window);
        tokio::pin!(window_closed);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = &mut window_closed => break,
                event = subscription.next() => match event {
                    Some(Ok(record)) => self.record(record),
                    Some(Err(e)) => {
                        self.fail(e);
                        break;
                    }
                    None => {
                        self.fail(MonitorError::transport(&self.name, "subscription closed"));
                        break;
                    }
                },
            }
        }

        // Deliveries already in flight when the window closed still count.
        if self.terminal_error.is_none() {
            while let Some(event) = subscription.try_next() {
                match event {
                    Ok(record) => self.record(record),
                    Err(e) => {
                        self.fail(e);
                        break;
                    }
                }
            }
        }

        subscription.unsubscribe().await;
        info!(
            "[{}] Unsubscribed after {} headers ({} unique)",
            self.name,
            self.log.len(),
            self.hashes.len()
        );
        self.freeze()
    }
}
