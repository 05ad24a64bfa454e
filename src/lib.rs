//! chainhead-monitor - Chain-head consistency monitor
//!
//! Watches two independent head-subscription feeds of the same chain for a
//! bounded window and checks that both present a consistent, conformant
//! view of chain progress, in particular around reorgs.

/// Header identity types
pub mod types;

pub mod config;
pub mod error;

/// Feed abstraction and the concrete transports
pub mod feed;
pub mod polling_feed;
pub mod rpc_client;
pub mod ws_feed;

/// Accumulation phase
pub mod recorder;

/// Analysis phase (pure, single-threaded, over frozen logs)
pub mod analyzer;
pub mod compliance;
pub mod reconcile;
pub mod report;

pub mod monitor;
pub mod simulator;

pub use analyzer::{analyze, AnomalyEvent, SequenceAnalysis};
pub use compliance::{check_compliance, ComplianceReport, DuplicateHeightGroup};
pub use config::{Mode, MonitorConfig};
pub use error::{MonitorError, Result};
pub use feed::{feed_from_url, HeadFeed, ScriptedFeed, Subscription};
pub use monitor::ChainHeadMonitor;
pub use reconcile::{reconcile, CrossFeedDelta, MissingFromOtherFeed, Reconciliation};
pub use recorder::{FeedRecording, FeedState, StreamRecorder};
pub use report::{AssertionOutcome, Invariant, MonitorReport};
pub use types::{BlockHash, BlockRecord, FeedId};
