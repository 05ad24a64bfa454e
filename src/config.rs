//! Run configuration
//!
//! Validated up front: a bad window or threshold fails before any feed is
//! subscribed.

use crate::error::{MonitorError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How chain switches are judged by the assertion engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Any chain switch is a failure
    Strict,
    /// Chain switches are allowed when the feed re-emitted alternate headers
    Compliance,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Strict => f.write_str("strict"),
            Mode::Compliance => f.write_str("compliance"),
        }
    }
}

/// Monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// How long both feeds are observed
    pub window: Duration,
    /// Liveness floor per feed
    pub min_blocks_expected: usize,
    pub mode: Mode,
    /// Added to `window` to form the hard timeout of the whole run
    pub timeout_buffer: Duration,
    /// Treat blocks seen by only one feed as a failure
    pub fail_on_cross_feed_delta: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(5 * 60),
            min_blocks_expected: 10,
            mode: Mode::Compliance,
            timeout_buffer: Duration::from_secs(60),
            fail_on_cross_feed_delta: false,
        }
    }
}

impl MonitorConfig {
    pub fn from_millis(window_duration_ms: u64, min_blocks_expected: usize, mode: Mode) -> Self {
        Self {
            window: Duration::from_millis(window_duration_ms),
            min_blocks_expected,
            mode,
            ..Self::default()
        }
    }

    pub fn with_timeout_buffer(mut self, buffer: Duration) -> Self {
        self.timeout_buffer = buffer;
        self
    }

    pub fn with_cross_feed_failure(mut self, enabled: bool) -> Self {
        self.fail_on_cross_feed_delta = enabled;
        self
    }

    /// Reject values that make the run meaningless
    pub fn validate(&self) -> Result<()> {
        if self.window.is_zero() {
            return Err(MonitorError::Configuration(
                "window duration must be greater than zero".to_string(),
            ));
        }
        if self.timeout_buffer.is_zero() {
            return Err(MonitorError::Configuration(
                "timeout buffer must be greater than zero".to_string(),
            ));
        }
        if self.window.checked_add(self.timeout_buffer).is_none() {
            return Err(MonitorError::Configuration(format!(
                "window {:?} plus buffer {:?} overflows",
                self.window, self.timeout_buffer
            )));
        }
        Ok(())
    }

    /// Hard limit for the whole run, strictly greater than the window
    pub fn hard_timeout(&self) -> Duration {
        self.window.saturating_add(self.timeout_buffer)
    }
}
