//! `eth_subscribe("newHeads")` over WebSocket

use crate::error::{MonitorError, Result};
use crate::feed::{deliver, HeadFeed, Subscription};
use crate::rpc_client::{parse_notification, response_result};
use async_trait::async_trait;
use futures::{SinkExt, Stream, StreamExt};
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::connect_async;
use tracing::{info, warn};

const SUBSCRIBE_REQUEST_ID: u64 = 1;
const UNSUBSCRIBE_REQUEST_ID: u64 = 2;
/// Connect and `eth_subscribe` must complete within this
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Head feed backed by a WebSocket JSON-RPC endpoint
pub struct WsHeadFeed {
    name: String,
    url: String,
}

impl WsHeadFeed {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Read until the response to our `eth_subscribe` arrives
async fn await_subscription_id<S>(read: &mut S) -> std::result::Result<String, String>
where
    S: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(msg) = read.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                return Err("connection closed before subscription".to_string())
            }
            Ok(_) => continue,
            Err(e) => return Err(e.to_string()),
        };
        let json: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| format!("invalid JSON response: {e}"))?;
        if json.get("id").and_then(|v| v.as_u64()) != Some(SUBSCRIBE_REQUEST_ID) {
            continue;
        }
        let result = response_result(&json).map_err(|e| e.to_string())?;
        return result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| format!("unexpected subscription id {result}"));
    }
    Err("connection ended before subscription".to_string())
}

#[async_trait]
impl HeadFeed for WsHeadFeed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn subscribe(&self) -> Result<Subscription> {
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| MonitorError::transport(&self.name, e))?;
        let (mut write, mut read) = ws.split();

        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": SUBSCRIBE_REQUEST_ID,
            "method": "eth_subscribe",
            "params": ["newHeads"],
        });
        write
            .send(Message::Text(request.to_string()))
            .await
            .map_err(|e| MonitorError::transport(&self.name, e))?;

        let subscription_id = timeout(HANDSHAKE_TIMEOUT, await_subscription_id(&mut read))
            .await
            .map_err(|_| {
                MonitorError::transport(&self.name, "timed out waiting for eth_subscribe response")
            })?
            .map_err(|e| MonitorError::transport(&self.name, e))?;

        info!(
            "[{}] Subscribed to newHeads at {} (subscription {})",
            self.name, self.url, subscription_id
        );

        let name = self.name.clone();
        Ok(Subscription::spawn(move |tx, cancel| async move {
            loop {
                let msg = tokio::select! {
                    _ = cancel.cancelled() => break,
                    msg = read.next() => msg,
                };
                let failure = match msg {
                    Some(Ok(Message::Text(text))) => {
                        match parse_notification(&text, &subscription_id)
                            .and_then(|header| header.map(|h| h.into_record()).transpose())
                        {
                            Ok(Some(record)) => {
                                if !deliver(&tx, &cancel, Ok(record)).await {
                                    break;
                                }
                                continue;
                            }
                            Ok(None) => continue,
                            Err(e) => e.to_string(),
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(e) = write.send(Message::Pong(payload)).await {
                            warn!("[{}] Failed to answer ping: {}", name, e);
                        }
                        continue;
                    }
                    Some(Ok(Message::Close(_))) => "connection closed by remote".to_string(),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => e.to_string(),
                    None => "connection ended".to_string(),
                };
                deliver(&tx, &cancel, Err(MonitorError::transport(&name, failure))).await;
                return;
            }

            let request = serde_json::json!({
                "jsonrpc": "2.0",
                "id": UNSUBSCRIBE_REQUEST_ID,
                "method": "eth_unsubscribe",
                "params": [subscription_id],
            });
            if let Err(e) = write.send(Message::Text(request.to_string())).await {
                warn!("[{}] eth_unsubscribe failed: {}", name, e);
            }
            let _ = write.close().await;
        }))
    }
}
