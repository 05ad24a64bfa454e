//! Cross-Feed Reconciler
//!
//! Compares which block hashes each feed delivered. Differences are
//! diagnostic by default: two feeds can legitimately lag each other at the
//! edges of the window.

use crate::recorder::FeedRecording;
use crate::types::{BlockHash, BlockRecord, FeedId};
use serde::Serialize;
use std::collections::BTreeSet;

/// Hashes present in exactly one of the two feeds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrossFeedDelta {
    pub only_in_a: BTreeSet<BlockHash>,
    pub only_in_b: BTreeSet<BlockHash>,
}

impl CrossFeedDelta {
    pub fn is_empty(&self) -> bool {
        self.only_in_a.is_empty() && self.only_in_b.is_empty()
    }

    pub fn len(&self) -> usize {
        self.only_in_a.len() + self.only_in_b.len()
    }
}

/// A block delivered by `feed` that the other feed never delivered
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingFromOtherFeed {
    pub feed: FeedId,
    pub feed_name: String,
    pub record: BlockRecord,
}

impl MissingFromOtherFeed {
    pub fn describe(&self) -> String {
        format!(
            "block #{} ({}...) delivered by {} but not by feed {}",
            self.record.number,
            self.record.hash.short(),
            self.feed_name,
            self.feed.other()
        )
    }
}

/// Output of reconciling both feeds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub delta: CrossFeedDelta,
    /// One finding per delta hash, A's first, each in its feed's delivery order
    pub findings: Vec<MissingFromOtherFeed>,
}

fn findings_for(
    recording: &FeedRecording,
    only_here: &BTreeSet<BlockHash>,
) -> Vec<MissingFromOtherFeed> {
    let mut reported = BTreeSet::new();
    recording
        .log
        .iter()
        .filter(|r| only_here.contains(&r.hash) && reported.insert(r.hash))
        .map(|r| MissingFromOtherFeed {
            feed: recording.feed,
            feed_name: recording.name.clone(),
            record: r.clone(),
        })
        .collect()
}

/// Diff the hash sets of two frozen recordings
pub fn reconcile(a: &FeedRecording, b: &FeedRecording) -> Reconciliation {
    let delta = CrossFeedDelta {
        only_in_a: a.hashes.difference(&b.hashes).copied().collect(),
        only_in_b: b.hashes.difference(&a.hashes).copied().collect(),
    };

    let mut findings = findings_for(a, &delta.only_in_a);
    findings.extend(findings_for(b, &delta.only_in_b));

    Reconciliation { delta, findings }
}
