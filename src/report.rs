//! Reporter / Assertion Engine
//!
//! Consumes both frozen recordings exactly once, runs every analysis stage
//! and evaluates the run's invariants. Failure details always carry the
//! literal block numbers and hash prefixes involved.

use crate::analyzer::{analyze, AnomalyEvent};
use crate::compliance::{check_compliance, ComplianceReport};
use crate::config::{Mode, MonitorConfig};
use crate::error::Result;
use crate::reconcile::{reconcile, Reconciliation};
use crate::recorder::{FeedRecording, FeedState};
use crate::types::{BlockRecord, FeedId};
use serde::Serialize;
use std::fmt::Write as _;
use tracing::{info, warn};

/// Entries listed per failing assertion before the message is elided
const MAX_DETAIL_ENTRIES: usize = 20;

/// Counting summary of one feed's log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedSummary {
    pub total_received: usize,
    pub unique_hashes: usize,
    pub unique_heights: usize,
    pub first_block: Option<u64>,
    pub last_block: Option<u64>,
    /// `last - first + 1`
    pub expected_range: u64,
    pub missing_from_range: u64,
}

impl FeedSummary {
    fn new(recording: &FeedRecording, compliance: &ComplianceReport) -> Self {
        let first_block = recording.log.first().map(|r| r.number);
        let last_block = recording.log.last().map(|r| r.number);
        let expected_range = match (first_block, last_block) {
            (Some(first), Some(last)) => last.saturating_sub(first).saturating_add(1),
            _ => 0,
        };
        Self {
            total_received: recording.log.len(),
            unique_hashes: recording.hashes.len(),
            unique_heights: compliance.unique_heights,
            first_block,
            last_block,
            expected_range,
            missing_from_range: expected_range.saturating_sub(recording.log.len() as u64),
        }
    }
}

/// Everything known about one feed after analysis
#[derive(Debug, Clone, Serialize)]
pub struct FeedReport {
    pub feed: FeedId,
    pub name: String,
    pub state: FeedState,
    pub summary: FeedSummary,
    pub terminal_error: Option<String>,
    pub anomalies: Vec<AnomalyEvent>,
    pub redeliveries: Vec<BlockRecord>,
    pub compliance: ComplianceReport,
}

impl FeedReport {
    pub fn gap_count(&self) -> usize {
        self.count(|a| matches!(a, AnomalyEvent::Gap { .. }))
    }

    pub fn chain_switch_count(&self) -> usize {
        self.count(|a| matches!(a, AnomalyEvent::ChainSwitch { .. }))
    }

    pub fn missing_parent_count(&self) -> usize {
        self.count(|a| matches!(a, AnomalyEvent::MissingParent { .. }))
    }

    fn count(&self, pred: impl Fn(&AnomalyEvent) -> bool) -> usize {
        self.anomalies.iter().filter(|a| pred(a)).count()
    }
}

/// Invariants checked at the end of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Invariant {
    /// received >= min_blocks_expected
    Liveness,
    NoGaps,
    NoMissingParents,
    /// strict mode: no chain switch at all
    NoChainSwitches,
    /// compliance mode: chain switches come with re-emitted heights
    ReorgReEmission,
    /// only when configured: both feeds delivered the same hashes
    CrossFeedAgreement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssertionOutcome {
    pub invariant: Invariant,
    pub feed: Option<FeedId>,
    pub passed: bool,
    /// Could not be answered from the data the feed delivered before it
    /// ended early. Never counts against the verdict.
    pub inconclusive: bool,
    pub detail: String,
}

impl AssertionOutcome {
    fn new(invariant: Invariant, feed: Option<FeedId>, passed: bool, detail: String) -> Self {
        Self {
            invariant,
            feed,
            passed,
            inconclusive: false,
            detail,
        }
    }

    fn inconclusive(invariant: Invariant, feed: Option<FeedId>, detail: String) -> Self {
        Self {
            invariant,
            feed,
            passed: false,
            inconclusive: true,
            detail,
        }
    }

    /// Failed outright
    pub fn failed(&self) -> bool {
        !self.passed && !self.inconclusive
    }
}

/// Final structured result of a run
#[derive(Debug, Clone, Serialize)]
pub struct MonitorReport {
    pub mode: Mode,
    pub min_blocks_expected: usize,
    pub feeds: Vec<FeedReport>,
    pub cross_feed: Reconciliation,
    pub assertions: Vec<AssertionOutcome>,
    /// A feed ended early; its invariants were evaluated on partial data
    pub degraded: bool,
    pub notes: Vec<String>,
    pub passed: bool,
}

fn join_limited(items: impl Iterator<Item = String>) -> String {
    let items: Vec<String> = items.collect();
    let total = items.len();
    let mut joined = items
        .into_iter()
        .take(MAX_DETAIL_ENTRIES)
        .collect::<Vec<_>>()
        .join("; ");
    if total > MAX_DETAIL_ENTRIES {
        let _ = write!(joined, "; ... {} more", total - MAX_DETAIL_ENTRIES);
    }
    joined
}

fn analyze_feed(recording: &FeedRecording) -> FeedReport {
    let analysis = analyze(&recording.log);
    let compliance = check_compliance(&recording.log, &analysis);

    for anomaly in &analysis.anomalies {
        match anomaly {
            AnomalyEvent::Gap { .. } => {
                warn!("[{}] ⚠️  REORG/GAP DETECTED: {}", recording.name, anomaly.describe())
            }
            AnomalyEvent::ChainSwitch { .. } => {
                warn!("[{}] ⚠️  CHAIN SWITCH: {}", recording.name, anomaly.describe())
            }
            AnomalyEvent::MissingParent { .. } => {
                warn!("[{}] ⚠️  MISSING PARENT: {}", recording.name, anomaly.describe())
            }
        }
    }

    FeedReport {
        feed: recording.feed,
        name: recording.name.clone(),
        state: recording.state,
        summary: FeedSummary::new(recording, &compliance),
        terminal_error: recording.terminal_error.as_ref().map(|e| e.to_string()),
        anomalies: analysis.anomalies,
        redeliveries: analysis.redeliveries,
        compliance,
    }
}

fn evaluate_feed(config: &MonitorConfig, report: &FeedReport) -> Vec<AssertionOutcome> {
    let feed = Some(report.feed);
    let mut outcomes = Vec::with_capacity(4);

    let received = report.summary.total_received;
    let min = config.min_blocks_expected;
    let liveness = match &report.terminal_error {
        _ if received >= min => AssertionOutcome::new(
            Invariant::Liveness,
            feed,
            true,
            format!("received {} >= {} blocks from {}", received, min, report.name),
        ),
        // The window was cut short, so the floor was never given a chance
        Some(error) => AssertionOutcome::inconclusive(
            Invariant::Liveness,
            feed,
            format!(
                "inconclusive: {} ended early after {} blocks ({} < {}): {}",
                report.name, received, received, min, error
            ),
        ),
        None => AssertionOutcome::new(
            Invariant::Liveness,
            feed,
            false,
            format!(
                "expected at least {} blocks from {}, received {} ({} < {})",
                min, report.name, received, received, min
            ),
        ),
    };
    outcomes.push(liveness);

    let gaps = report.gap_count();
    outcomes.push(AssertionOutcome::new(
        Invariant::NoGaps,
        feed,
        gaps == 0,
        if gaps == 0 {
            format!("no gaps in {} block sequence", report.name)
        } else {
            format!(
                "{} skipped blocks: {}",
                report.name,
                join_limited(report.anomalies.iter().filter_map(|a| match a {
                    AnomalyEvent::Gap {
                        expected, received, ..
                    } => Some(format!(
                        "expected #{}, got #{} (gap: {})",
                        expected,
                        received,
                        *received as i128 - *expected as i128
                    )),
                    _ => None,
                }))
            )
        },
    ));

    let missing = report.missing_parent_count();
    outcomes.push(AssertionOutcome::new(
        Invariant::NoMissingParents,
        feed,
        missing == 0,
        if missing == 0 {
            format!("all {} parent hashes reference delivered blocks", report.name)
        } else {
            format!(
                "{} blocks on {} reference parents that were never delivered: {}",
                missing,
                report.name,
                join_limited(report.anomalies.iter().filter_map(|a| match a {
                    AnomalyEvent::MissingParent {
                        record,
                        parent_hash,
                    } => Some(format!(
                        "#{} {}... (parent {}...)",
                        record.number,
                        record.hash.short(),
                        parent_hash.short()
                    )),
                    _ => None,
                }))
            )
        },
    ));

    let switches = report.chain_switch_count();
    let switch_list = || {
        join_limited(report.anomalies.iter().filter_map(|a| match a {
            AnomalyEvent::ChainSwitch { previous, new } => Some(format!(
                "#{} {}... -> #{} {}... (parent {}...)",
                previous.number,
                previous.hash.short(),
                new.number,
                new.hash.short(),
                new.parent_hash.short()
            )),
            _ => None,
        }))
    };
    match config.mode {
        Mode::Strict => outcomes.push(AssertionOutcome::new(
            Invariant::NoChainSwitches,
            feed,
            switches == 0,
            if switches == 0 {
                format!("no chain switches on {}", report.name)
            } else {
                format!("{} chain switches on {}: {}", switches, report.name, switch_list())
            },
        )),
        Mode::Compliance => {
            let groups = &report.compliance.duplicate_groups;
            let detail = if switches == 0 {
                format!("no chain switches on {}", report.name)
            } else if report.compliance.law_holds {
                format!(
                    "{} chain switches on {} with {} re-emitted heights: {}",
                    switches,
                    report.name,
                    groups.len(),
                    join_limited(groups.iter().map(|g| g.describe()))
                )
            } else {
                format!(
                    "detected {} chain switches on {} but NO block numbers were re-emitted \
                     with different hashes: {}",
                    switches,
                    report.name,
                    switch_list()
                )
            };
            outcomes.push(AssertionOutcome::new(
                Invariant::ReorgReEmission,
                feed,
                report.compliance.law_holds,
                detail,
            ));
        }
    }

    outcomes
}

impl MonitorReport {
    /// Analyse both frozen recordings and evaluate every invariant.
    /// Moves each feed from Analyzed to Reported.
    pub fn build(
        config: &MonitorConfig,
        mut a: FeedRecording,
        mut b: FeedRecording,
    ) -> Result<Self> {
        let cross_feed = reconcile(&a, &b);
        for finding in &cross_feed.findings {
            info!("[cross-feed] {}", finding.describe());
        }

        let mut notes = Vec::new();
        let mut feeds = Vec::with_capacity(2);
        let mut assertions = Vec::new();

        for recording in [&mut a, &mut b] {
            let mut report = analyze_feed(recording);
            if let Some(error) = &report.terminal_error {
                notes.push(format!(
                    "feed {} ({}) ended early after {} blocks: {}; its results are partial",
                    recording.feed,
                    recording.name,
                    report.summary.total_received,
                    error
                ));
            }
            assertions.extend(evaluate_feed(config, &report));
            recording.mark_reported()?;
            report.state = recording.state;
            feeds.push(report);
        }

        if !cross_feed.delta.is_empty() {
            let detail = format!(
                "{} hashes only in {}, {} only in {}: {}",
                cross_feed.delta.only_in_a.len(),
                a.name,
                cross_feed.delta.only_in_b.len(),
                b.name,
                join_limited(cross_feed.findings.iter().map(|f| f.describe()))
            );
            if config.fail_on_cross_feed_delta {
                assertions.push(AssertionOutcome::new(
                    Invariant::CrossFeedAgreement,
                    None,
                    false,
                    detail,
                ));
            } else {
                notes.push(format!("cross-feed differences (not asserted): {}", detail));
            }
        } else if config.fail_on_cross_feed_delta {
            assertions.push(AssertionOutcome::new(
                Invariant::CrossFeedAgreement,
                None,
                true,
                "both feeds delivered the same hashes".to_string(),
            ));
        }

        let degraded = feeds.iter().any(|f| f.terminal_error.is_some());
        let passed = assertions.iter().all(|o| !o.failed());

        Ok(Self {
            mode: config.mode,
            min_blocks_expected: config.min_blocks_expected,
            feeds,
            cross_feed,
            assertions,
            degraded,
            notes,
            passed,
        })
    }

    pub fn feed(&self, feed: FeedId) -> Option<&FeedReport> {
        self.feeds.iter().find(|f| f.feed == feed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &AssertionOutcome> {
        self.assertions.iter().filter(|o| o.failed())
    }

    /// Outcomes left open because their feed ended early
    pub fn inconclusive(&self) -> impl Iterator<Item = &AssertionOutcome> {
        self.assertions.iter().filter(|o| o.inconclusive)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable report
    pub fn render(&self) -> String {
        let rule = "=".repeat(80);
        let mut out = String::new();

        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "SUBSCRIPTION ANALYSIS (mode: {})", self.mode);
        let _ = writeln!(out, "{rule}");

        for feed in &self.feeds {
            let s = &feed.summary;
            let _ = writeln!(out, "\nfeed {} ({}) summary:", feed.feed, feed.name);
            let _ = writeln!(out, "  - Total blocks received: {}", s.total_received);
            let _ = writeln!(out, "  - Unique block hashes: {}", s.unique_hashes);
            let _ = writeln!(out, "  - Unique block numbers: {}", s.unique_heights);
            if let (Some(first), Some(last)) = (s.first_block, s.last_block) {
                let _ = writeln!(out, "  - First block: #{}", first);
                let _ = writeln!(out, "  - Last block: #{}", last);
                let _ = writeln!(out, "  - Expected range: {} blocks", s.expected_range);
                let _ = writeln!(out, "  - Missing from range: {} blocks", s.missing_from_range);
            }
            if let Some(error) = &feed.terminal_error {
                let _ = writeln!(out, "  - Ended early: {}", error);
            }

            if feed.anomalies.is_empty() {
                let _ = writeln!(out, "  ✓ No anomalies");
            } else {
                let _ = writeln!(out, "  ❌ Anomalies:");
                for anomaly in &feed.anomalies {
                    let _ = writeln!(out, "    - {}", anomaly.describe());
                }
            }
            for group in &feed.compliance.duplicate_groups {
                let _ = writeln!(out, "  ↺ Re-emitted: {}", group.describe());
            }
            for record in &feed.redeliveries {
                let _ = writeln!(
                    out,
                    "  [DUP] Duplicate delivery of block #{} ({}...)",
                    record.number,
                    record.hash.short()
                );
            }
        }

        if !self.cross_feed.findings.is_empty() {
            let _ = writeln!(out, "\nCross-feed differences:");
            for finding in &self.cross_feed.findings {
                let _ = writeln!(out, "  - {}", finding.describe());
            }
        }
        if !self.notes.is_empty() {
            let _ = writeln!(out, "\nNotes:");
            for note in &self.notes {
                let _ = writeln!(out, "  ⚠️  {}", note);
            }
        }

        let _ = writeln!(out, "\n{rule}");
        let _ = writeln!(out, "TEST ASSERTIONS");
        let _ = writeln!(out, "{rule}");
        for outcome in &self.assertions {
            let scope = outcome
                .feed
                .map(|f| format!("feed {}", f))
                .unwrap_or_else(|| "both feeds".to_string());
            let mark = match (outcome.passed, outcome.inconclusive) {
                (true, _) => "✅",
                (false, true) => "⚠️ ",
                (false, false) => "❌",
            };
            let _ = writeln!(
                out,
                "{} {:?} [{}]: {}",
                mark, outcome.invariant, scope, outcome.detail
            );
        }
        let verdict = match (self.passed, self.degraded) {
            (true, false) => "PASS",
            (true, true) => "PASS (degraded: a feed ended early)",
            (false, false) => "FAIL",
            (false, true) => "FAIL (degraded: a feed ended early)",
        };
        let _ = writeln!(out, "\nVerdict: {}", verdict);
        out
    }
}
