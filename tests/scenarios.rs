//! Scenario tests: canonical feed shapes run through analysis and the
//! assertion engine.

mod helpers {
    //! Test helpers for building feed logs

    use chainhead_monitor::{BlockHash, BlockRecord};
    use chrono::{TimeZone, Utc};

    /// Hash whose every byte is `tag`
    pub fn h(tag: u8) -> BlockHash {
        BlockHash::new([tag; 32])
    }

    /// `#number(hash, p:parent)`
    pub fn rec(number: u64, hash: u8, parent: u8) -> BlockRecord {
        let at = Utc
            .timestamp_opt(1_700_000_000 + number as i64, 0)
            .unwrap();
        BlockRecord::observed(number, h(hash), h(parent), at)
    }

    /// Contiguous chain `#from..=#to`, hash tag = height
    pub fn chain(from: u8, to: u8) -> Vec<BlockRecord> {
        (from..=to).map(|n| rec(n as u64, n, n - 1)).collect()
    }
}

use chainhead_monitor::{
    analyze, check_compliance, AnomalyEvent, FeedId, FeedRecording, Invariant, Mode,
    MonitorConfig, MonitorReport,
};
use helpers::*;

const H0: u8 = 0x00;
const H1: u8 = 0x01;
const H2: u8 = 0x02;
const H2B: u8 = 0x2b;
const H3: u8 = 0x03;
const HX: u8 = 0xee;

fn build(mode: Mode, min: usize, a: Vec<chainhead_monitor::BlockRecord>) -> MonitorReport {
    let b = a.clone();
    MonitorReport::build(
        &MonitorConfig::from_millis(1_000, min, mode),
        FeedRecording::from_log(FeedId::A, "eth", a),
        FeedRecording::from_log(FeedId::B, "substrate", b),
    )
    .unwrap()
}

#[test]
fn test_scenario_clean_chain() {
    let log = vec![rec(1, H1, H0), rec(2, H2, H1), rec(3, H3, H2)];
    let analysis = analyze(&log);

    assert!(analysis.anomalies.is_empty());
    let report = build(Mode::Strict, 3, log);
    assert!(report.passed, "{}", report.render());
    assert_eq!(report.feed(FeedId::A).unwrap().summary.total_received, 3);
}

#[test]
fn test_scenario_gap() {
    let log = vec![rec(1, H1, H0), rec(3, H3, H1)];
    let analysis = analyze(&log);

    assert_eq!(
        analysis.anomalies,
        vec![AnomalyEvent::Gap {
            expected: 2,
            received: 3,
            missing: vec![2],
        }]
    );

    let report = build(Mode::Compliance, 1, log);
    let failure = report
        .failures()
        .find(|o| o.invariant == Invariant::NoGaps && o.feed == Some(FeedId::A))
        .unwrap();
    assert!(
        failure.detail.contains("expected #2, got #3 (gap: 1)"),
        "{}",
        failure.detail
    );
}

#[test]
fn test_scenario_compliant_reorg() {
    let log = vec![rec(1, H1, H0), rec(2, H2, H1), rec(2, H2B, H1)];
    let analysis = analyze(&log);

    assert_eq!(analysis.gap_count(), 0);
    assert_eq!(analysis.missing_parent_count(), 0);
    // Any chain switch is against the re-emitted #2, never against #1
    for anomaly in analysis.chain_switches() {
        if let AnomalyEvent::ChainSwitch { previous, new } = anomaly {
            assert_eq!(previous.hash, h(H2));
            assert_eq!(new.hash, h(H2B));
        }
    }

    let compliance = check_compliance(&log, &analysis);
    assert_eq!(compliance.duplicate_groups.len(), 1);
    assert_eq!(compliance.duplicate_groups[0].number, 2);
    assert_eq!(
        compliance.duplicate_groups[0].hashes,
        [h(H2), h(H2B)]
            .into_iter()
            .collect::<std::collections::BTreeSet<_>>()
    );
    assert!(compliance.law_holds);

    let report = build(Mode::Compliance, 3, log);
    assert!(report.passed, "{}", report.render());
}

#[test]
fn test_scenario_fork_jump_violates_compliance() {
    let log = vec![rec(1, H1, H0), rec(2, H2, H1), rec(3, H3, HX)];
    let analysis = analyze(&log);

    assert_eq!(
        analysis.anomalies,
        vec![
            AnomalyEvent::ChainSwitch {
                previous: log[1].clone(),
                new: log[2].clone(),
            },
            AnomalyEvent::MissingParent {
                record: log[2].clone(),
                parent_hash: h(HX),
            },
        ]
    );

    let compliance = check_compliance(&log, &analysis);
    assert!(compliance.duplicate_groups.iter().all(|g| g.number != 3));
    assert!(!compliance.law_holds);

    let report = build(Mode::Compliance, 3, log);
    assert!(!report.passed);
    let failed: Vec<Invariant> = report
        .failures()
        .filter(|o| o.feed == Some(FeedId::A))
        .map(|o| o.invariant)
        .collect();
    assert_eq!(
        failed,
        vec![Invariant::NoMissingParents, Invariant::ReorgReEmission]
    );
    let detail = &report
        .failures()
        .find(|o| o.invariant == Invariant::ReorgReEmission)
        .unwrap()
        .detail;
    assert!(detail.contains("#2"), "{detail}");
    assert!(detail.contains(&h(HX).short()), "{detail}");
}

#[test]
fn test_scenario_liveness_failure() {
    let report = build(Mode::Compliance, 10, chain(1, 4));
    let failure = report
        .failures()
        .find(|o| o.invariant == Invariant::Liveness && o.feed == Some(FeedId::A))
        .unwrap();

    assert!(!report.passed);
    assert!(failure.detail.contains("4 < 10"), "{}", failure.detail);
    assert!(report.render().contains("4 < 10"));
}

#[test]
fn test_strict_mode_rejects_any_chain_switch() {
    let log = vec![rec(1, H1, H0), rec(2, H2, H1), rec(2, H2B, H1), rec(3, H3, H2B)];
    let report = build(Mode::Strict, 1, log);

    let failure = report
        .failures()
        .find(|o| o.invariant == Invariant::NoChainSwitches)
        .unwrap();
    assert!(failure.detail.contains("#2"), "{}", failure.detail);
    assert!(failure.detail.contains(&h(H2B).short()), "{}", failure.detail);
}
