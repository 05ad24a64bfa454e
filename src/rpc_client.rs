//! Ethereum JSON-RPC plumbing
//!
//! HTTP request/response client used by the polling feed, plus the header
//! and notification payload parsing shared with the WebSocket feed.

use crate::error::{MonitorError, Result};
use crate::types::{BlockHash, BlockRecord};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// RPC client configuration
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// RPC URL (e.g., "http://127.0.0.1:9944")
    pub url: String,
    /// Request timeout
    pub timeout: Duration,
}

impl RpcConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Header fields of an Ethereum block object or `newHeads` notification.
/// Everything beyond identity is ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcHeader {
    pub number: Option<String>,
    pub hash: Option<String>,
    pub parent_hash: String,
}

impl RpcHeader {
    /// Convert into a record stamped with the current time
    pub fn into_record(self) -> Result<BlockRecord> {
        let number = self
            .number
            .as_deref()
            .ok_or_else(|| MonitorError::Protocol("header without number".to_string()))
            .and_then(parse_quantity)?;
        let hash = self
            .hash
            .as_deref()
            .ok_or_else(|| MonitorError::Protocol(format!("header #{number} without hash")))
            .and_then(parse_hash)?;
        let parent_hash = parse_hash(&self.parent_hash)?;
        Ok(BlockRecord::new(number, hash, parent_hash))
    }
}

/// Parse a hex quantity such as `"0x1b4"`
pub fn parse_quantity(value: &str) -> Result<u64> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| MonitorError::Protocol(format!("quantity {value:?} lacks 0x prefix")))?;
    u64::from_str_radix(digits, 16)
        .map_err(|e| MonitorError::Protocol(format!("quantity {value:?}: {e}")))
}

fn parse_hash(value: &str) -> Result<BlockHash> {
    value.parse().map_err(MonitorError::Protocol)
}

/// Extract the header from an `eth_subscription` notification addressed to
/// `subscription_id`. Other messages yield `Ok(None)`.
pub fn parse_notification(text: &str, subscription_id: &str) -> Result<Option<RpcHeader>> {
    let json: Value = serde_json::from_str(text)
        .map_err(|e| MonitorError::Protocol(format!("invalid JSON message: {e}")))?;

    if json.get("method").and_then(Value::as_str) != Some("eth_subscription") {
        return Ok(None);
    }
    let Some(params) = json.get("params") else {
        return Err(MonitorError::Protocol("notification without params".to_string()));
    };
    if params.get("subscription").and_then(Value::as_str) != Some(subscription_id) {
        return Ok(None);
    }
    let result = params
        .get("result")
        .cloned()
        .ok_or_else(|| MonitorError::Protocol("notification without result".to_string()))?;
    serde_json::from_value(result)
        .map(Some)
        .map_err(|e| MonitorError::Protocol(format!("invalid header payload: {e}")))
}

/// Pull the `result` out of a JSON-RPC response, surfacing `error` objects
pub fn response_result(json: &Value) -> Result<Value> {
    if let Some(error) = json.get("error") {
        if !error.is_null() {
            return Err(MonitorError::Protocol(format!("RPC error: {}", error)));
        }
    }
    json.get("result")
        .cloned()
        .ok_or_else(|| MonitorError::Protocol("RPC response missing result".to_string()))
}

/// HTTP JSON-RPC client
pub struct RpcClient {
    client: Client,
    config: RpcConfig,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Create a new RPC client
    pub fn new(config: RpcConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                MonitorError::Configuration(format!("failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            config,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Make an RPC call. Failures are reported as plain strings so the
    /// caller can attribute them to its feed.
    pub async fn call(&self, method: &str, params: Value) -> std::result::Result<Value, String> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
        });

        let response = self
            .client
            .post(&self.config.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("RPC request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("RPC request failed with status: {}", status));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse RPC response: {e}"))?;

        response_result(&json).map_err(|e| e.to_string())
    }

    /// Current best header
    pub async fn latest_header(&self) -> std::result::Result<BlockRecord, String> {
        let result = self
            .call("eth_getBlockByNumber", serde_json::json!(["latest", false]))
            .await?;
        if result.is_null() {
            return Err("eth_getBlockByNumber returned null for latest".to_string());
        }
        let header: RpcHeader = serde_json::from_value(result)
            .map_err(|e| format!("invalid block payload: {e}"))?;
        header.into_record().map_err(|e| e.to_string())
    }
}
