//! Chain-head consistency monitor
//!
//! Runs both recorders concurrently for the configured window, joins them,
//! then hands the frozen logs to the reporter. The whole run is bounded by
//! `window + timeout_buffer`; running past that is itself a failure.

use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::feed::HeadFeed;
use crate::recorder::{FeedRecording, StreamRecorder};
use crate::report::MonitorReport;
use crate::types::FeedId;
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct ChainHeadMonitor {
    config: MonitorConfig,
    feed_a: Arc<dyn HeadFeed>,
    feed_b: Arc<dyn HeadFeed>,
    cancel: CancellationToken,
}

impl ChainHeadMonitor {
    /// Validate the configuration; nothing is subscribed yet
    pub fn new(
        config: MonitorConfig,
        feed_a: Arc<dyn HeadFeed>,
        feed_b: Arc<dyn HeadFeed>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            feed_a,
            feed_b,
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Token that ends the observation window early when cancelled.
    /// Cancelling more than once is harmless.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Observe, analyse and report. One run, one verdict.
    pub async fn run(self) -> Result<MonitorReport> {
        let limit = self.config.hard_timeout();
        info!(
            "Starting dual subscription run for {:?} (hard limit {:?}, mode {})",
            self.config.window, limit, self.config.mode
        );

        match tokio::time::timeout(limit, self.observe_both()).await {
            Ok(recordings) => {
                let (a, b) = recordings?;
                info!("Both feeds unsubscribed, analysing");
                MonitorReport::build(&self.config, a, b)
            }
            Err(_) => {
                self.cancel.cancel();
                Err(MonitorError::Timeout { limit })
            }
        }
    }

    fn spawn_recorder(
        &self,
        id: FeedId,
        feed: &Arc<dyn HeadFeed>,
    ) -> JoinHandle<Result<FeedRecording>> {
        let recorder = StreamRecorder::new(id, feed.name());
        tokio::spawn(recorder.observe(Arc::clone(feed), self.config.window, self.cancel.clone()))
    }

    /// Accumulate both feeds and wait until both have unsubscribed
    async fn observe_both(&self) -> Result<(FeedRecording, FeedRecording)> {
        let window = self.config.window;
        let timer_cancel = self.cancel.clone();
        let timer = tokio::spawn(async move {
            tokio::select! {
                _ = timer_cancel.cancelled() => {}
                _ = tokio::time::sleep(window) => {
                    info!("Window of {:?} elapsed, cancelling subscriptions", window);
                    timer_cancel.cancel();
                }
            }
        });

        let task_a = self.spawn_recorder(FeedId::A, &self.feed_a);
        let task_b = self.spawn_recorder(FeedId::B, &self.feed_b);
        let (a, b) = tokio::join!(task_a, task_b);

        self.cancel.cancel();
        if let Err(e) = timer.await {
            warn!("Window timer ended abnormally: {}", e);
        }

        let a = a.map_err(|e| recorder_failed(&self.feed_a, e))??;
        let b = b.map_err(|e| recorder_failed(&self.feed_b, e))??;
        Ok((a, b))
    }
}

fn recorder_failed(feed: &Arc<dyn HeadFeed>, error: JoinError) -> MonitorError {
    MonitorError::transport(feed.name(), format!("recorder task failed: {error}"))
}
