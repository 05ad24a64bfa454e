use std::time::Duration;
use thiserror::Error;

use crate::types::FeedId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MonitorError {
    #[error("Transport error on feed {feed}: {reason}")]
    Transport { feed: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Monitor run exceeded hard timeout of {}ms", limit.as_millis())]
    Timeout { limit: Duration },

    #[error("Feed {feed} cannot move from {from} to {to}")]
    InvalidTransition {
        feed: FeedId,
        from: String,
        to: String,
    },

    #[error("Malformed payload: {0}")]
    Protocol(String),
}

impl MonitorError {
    pub fn transport(feed: impl Into<String>, reason: impl ToString) -> Self {
        MonitorError::Transport {
            feed: feed.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
