//! Head feed for endpoints that only speak HTTP: polls the latest header
//! and emits it whenever the best hash changes.

use crate::error::{MonitorError, Result};
use crate::feed::{deliver, HeadFeed, Subscription};
use crate::rpc_client::{RpcClient, RpcConfig};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct PollingHeadFeed {
    name: String,
    client: Arc<RpcClient>,
    interval: Duration,
}

impl PollingHeadFeed {
    pub fn new(name: impl Into<String>, url: &str, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(MonitorError::Configuration(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            name: name.into(),
            client: Arc::new(RpcClient::new(RpcConfig::new(url))?),
            interval,
        })
    }
}

#[async_trait]
impl HeadFeed for PollingHeadFeed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn subscribe(&self) -> Result<Subscription> {
        // First poll doubles as the connectivity check.
        let first = self
            .client
            .latest_header()
            .await
            .map_err(|e| MonitorError::transport(&self.name, e))?;

        info!(
            "[{}] Polling {} every {:?} starting at #{}",
            self.name,
            self.client.url(),
            self.interval,
            first.number
        );

        let name = self.name.clone();
        let client = Arc::clone(&self.client);
        let interval = self.interval;

        Ok(Subscription::spawn(move |tx, cancel| async move {
            let mut last_hash = first.hash;
            if !deliver(&tx, &cancel, Ok(first)).await {
                return;
            }
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                match client.latest_header().await {
                    Ok(record) if record.hash == last_hash => {}
                    Ok(record) => {
                        last_hash = record.hash;
                        if !deliver(&tx, &cancel, Ok(record)).await {
                            return;
                        }
                    }
                    Err(e) => {
                        deliver(&tx, &cancel, Err(MonitorError::transport(&name, e))).await;
                        return;
                    }
                }
            }
        }))
    }
}
