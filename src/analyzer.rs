//! Sequence Analyzer
//!
//! One pass over a frozen feed log, comparing each delivered header with the
//! one delivered immediately before it. Anomalies are plain data; nothing in
//! here fails.

use crate::types::{BlockHash, BlockRecord};
use serde::Serialize;
use std::collections::HashSet;

/// Longest `missing` list carried by a single gap; the gap bounds are always exact.
pub const MAX_LISTED_MISSING: usize = 1024;

/// A protocol anomaly found in one feed's log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum AnomalyEvent {
    /// Heights did not advance by exactly one
    #[serde(rename = "GapAnomaly")]
    Gap {
        expected: u64,
        received: u64,
        missing: Vec<u64>,
    },
    /// The new header does not extend the header delivered just before it
    #[serde(rename = "ChainSwitchAnomaly")]
    ChainSwitch {
        previous: BlockRecord,
        new: BlockRecord,
    },
    /// The new header's parent was never delivered on this feed
    #[serde(rename = "MissingParentRecord")]
    MissingParent {
        record: BlockRecord,
        parent_hash: BlockHash,
    },
}

impl AnomalyEvent {
    fn gap(expected: u64, received: u64) -> Self {
        let missing = (expected..received).take(MAX_LISTED_MISSING).collect();
        AnomalyEvent::Gap {
            expected,
            received,
            missing,
        }
    }

    /// Signed distance between received and expected heights
    pub fn gap_size(&self) -> Option<i128> {
        match self {
            AnomalyEvent::Gap {
                expected, received, ..
            } => Some(*received as i128 - *expected as i128),
            _ => None,
        }
    }

    /// Literal one-line description, hash prefixes included
    pub fn describe(&self) -> String {
        match self {
            AnomalyEvent::Gap {
                expected,
                received,
                missing,
            } => {
                let listed: Vec<String> = missing.iter().map(u64::to_string).collect();
                format!(
                    "gap: expected #{}, received #{} (gap: {}, missing: [{}])",
                    expected,
                    received,
                    *received as i128 - *expected as i128,
                    listed.join(", ")
                )
            }
            AnomalyEvent::ChainSwitch { previous, new } => format!(
                "chain switch: #{} {}... does not extend #{} {}... (parent {}...)",
                new.number,
                new.hash.short(),
                previous.number,
                previous.hash.short(),
                new.parent_hash.short()
            ),
            AnomalyEvent::MissingParent {
                record,
                parent_hash,
            } => format!(
                "missing parent: #{} {}... references parent {}... which was never delivered",
                record.number,
                record.hash.short(),
                parent_hash.short()
            ),
        }
    }
}

/// Result of analysing one feed's log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SequenceAnalysis {
    /// Anomalies in log order; per pair: gap, then chain switch, then missing parent
    pub anomalies: Vec<AnomalyEvent>,
    /// Headers whose hash had already been delivered earlier on the same feed
    pub redeliveries: Vec<BlockRecord>,
    pub pairs_checked: usize,
}

impl SequenceAnalysis {
    pub fn gaps(&self) -> impl Iterator<Item = &AnomalyEvent> {
        self.anomalies
            .iter()
            .filter(|a| matches!(a, AnomalyEvent::Gap { .. }))
    }

    pub fn chain_switches(&self) -> impl Iterator<Item = &AnomalyEvent> {
        self.anomalies
            .iter()
            .filter(|a| matches!(a, AnomalyEvent::ChainSwitch { .. }))
    }

    pub fn missing_parents(&self) -> impl Iterator<Item = &AnomalyEvent> {
        self.anomalies
            .iter()
            .filter(|a| matches!(a, AnomalyEvent::MissingParent { .. }))
    }

    pub fn gap_count(&self) -> usize {
        self.gaps().count()
    }

    pub fn chain_switch_count(&self) -> usize {
        self.chain_switches().count()
    }

    pub fn missing_parent_count(&self) -> usize {
        self.missing_parents().count()
    }
}

/// Analyse a frozen log.
///
/// A header at the same height as the previous one, whose parent was
/// already delivered and is not the previous header, is a re-emission of an
/// alternate branch: it is reported as a chain switch but not as a gap. Any
/// other height change, a decrease included, is a gap.
pub fn analyze(log: &[BlockRecord]) -> SequenceAnalysis {
    let mut analysis = SequenceAnalysis::default();
    let mut seen: HashSet<BlockHash> = HashSet::with_capacity(log.len());

    let Some(first) = log.first() else {
        return analysis;
    };
    seen.insert(first.hash);

    for pair in log.windows(2) {
        let (prev, curr) = (&pair[0], &pair[1]);
        analysis.pairs_checked += 1;

        let expected = prev.number.saturating_add(1);
        let contiguous = prev.number.checked_add(1) == Some(curr.number);
        let extends = curr.parent_hash == prev.hash;
        let parent_known = seen.contains(&curr.parent_hash);
        let re_emission = curr.number == prev.number && parent_known && !extends;

        if !contiguous && !re_emission {
            analysis.anomalies.push(AnomalyEvent::gap(expected, curr.number));
        }
        if !extends {
            analysis.anomalies.push(AnomalyEvent::ChainSwitch {
                previous: prev.clone(),
                new: curr.clone(),
            });
        }
        if !parent_known {
            analysis.anomalies.push(AnomalyEvent::MissingParent {
                record: curr.clone(),
                parent_hash: curr.parent_hash,
            });
        }

        if !seen.insert(curr.hash) {
            analysis.redeliveries.push(curr.clone());
        }
    }

    analysis
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn h(tag: u8) -> BlockHash {
        BlockHash::new([tag; 32])
    }

    fn rec(number: u64, hash: u8, parent: u8) -> BlockRecord {
        let at = Utc.timestamp_opt(1_700_000_000 + number as i64, 0).unwrap();
        BlockRecord::observed(number, h(hash), h(parent), at)
    }

    #[test]
    fn test_empty_and_single_logs() {
        assert_eq!(analyze(&[]), SequenceAnalysis::default());
        let single = analyze(&[rec(5, 5, 4)]);
        assert!(single.anomalies.is_empty());
        assert_eq!(single.pairs_checked, 0);
    }

    #[test]
    fn test_forward_gap_lists_missing_heights() {
        let analysis = analyze(&[rec(10, 10, 9), rec(14, 14, 10)]);
        assert_eq!(
            analysis.anomalies,
            vec![AnomalyEvent::Gap {
                expected: 11,
                received: 14,
                missing: vec![11, 12, 13],
            }]
        );
        assert_eq!(analysis.anomalies[0].gap_size(), Some(3));
    }

    #[test]
    fn test_decrease_to_unknown_parent_is_gap() {
        let analysis = analyze(&[rec(1, 1, 0), rec(2, 2, 1), rec(1, 0xa1, 0xee)]);
        assert_eq!(analysis.gap_count(), 1);
        assert_eq!(analysis.chain_switch_count(), 1);
        assert_eq!(analysis.missing_parent_count(), 1);
        match &analysis.anomalies[0] {
            AnomalyEvent::Gap {
                expected,
                received,
                missing,
            } => {
                assert_eq!((*expected, *received), (3, 1));
                assert!(missing.is_empty());
            }
            other => panic!("unexpected anomaly {other:?}"),
        }
        assert_eq!(analysis.anomalies[0].gap_size(), Some(-2));
    }

    #[test]
    fn test_same_height_re_emission_is_not_gap() {
        let log = [rec(1, 1, 0), rec(2, 0x2a, 1), rec(2, 0x2b, 1), rec(3, 0x3b, 0x2b)];
        let analysis = analyze(&log);
        assert_eq!(analysis.gap_count(), 0);
        assert_eq!(analysis.missing_parent_count(), 0);
        assert_eq!(analysis.chain_switch_count(), 1);
    }

    #[test]
    fn test_deep_re_emission_drops_height_as_gap() {
        // 1 <- 2 <- 3, then the node re-emits 2b <- 3b <- 4b from the fork point
        let log = [
            rec(1, 1, 0),
            rec(2, 2, 1),
            rec(3, 3, 2),
            rec(2, 0x2b, 1),
            rec(3, 0x3b, 0x2b),
            rec(4, 0x4b, 0x3b),
        ];
        let analysis = analyze(&log);

        assert_eq!(
            analysis.gaps().collect::<Vec<_>>(),
            vec![&AnomalyEvent::Gap {
                expected: 4,
                received: 2,
                missing: vec![],
            }]
        );
        assert_eq!(analysis.missing_parent_count(), 0);
        assert_eq!(analysis.chain_switch_count(), 1);
    }

    #[test]
    fn test_redelivery_recorded() {
        let analysis = analyze(&[rec(1, 1, 0), rec(2, 2, 1), rec(2, 2, 1)]);
        assert_eq!(analysis.redeliveries.len(), 1);
        assert_eq!(analysis.redeliveries[0].number, 2);
    }

    #[test]
    fn test_huge_gap_is_capped() {
        let analysis = analyze(&[rec(1, 1, 0), rec(1_000_000, 2, 1)]);
        match &analysis.anomalies[0] {
            AnomalyEvent::Gap { missing, .. } => assert_eq!(missing.len(), MAX_LISTED_MISSING),
            other => panic!("unexpected anomaly {other:?}"),
        }
    }

    #[test]
    fn test_describe_embeds_literal_values() {
        let analysis = analyze(&[rec(1, 1, 0), rec(3, 3, 1)]);
        let text = analysis.anomalies[0].describe();
        assert!(text.contains("expected #2"), "{text}");
        assert!(text.contains("received #3"), "{text}");
        assert!(text.contains("missing: [2]"), "{text}");
    }
}
