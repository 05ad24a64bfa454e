//! Re-emission compliance checker
//!
//! Under the `newHeads` subscription rules a reorg is announced by emitting
//! the new branch's headers, which puts more than one hash at the same
//! height. A feed that switched chains without ever doing so dropped the
//! connecting headers of the new fork.

use crate::analyzer::SequenceAnalysis;
use crate::types::{BlockHash, BlockRecord};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// A height delivered with more than one distinct hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateHeightGroup {
    pub number: u64,
    pub hashes: BTreeSet<BlockHash>,
}

impl DuplicateHeightGroup {
    pub fn describe(&self) -> String {
        let listed: Vec<String> = self
            .hashes
            .iter()
            .map(|h| format!("{}...", h.short()))
            .collect();
        format!(
            "block #{} emitted with {} hashes: {}",
            self.number,
            self.hashes.len(),
            listed.join(", ")
        )
    }
}

/// Compliance verdict for one feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComplianceReport {
    pub chain_switches: usize,
    /// Sorted by height
    pub duplicate_groups: Vec<DuplicateHeightGroup>,
    pub unique_heights: usize,
    /// chain switches imply at least one duplicate-height group
    pub law_holds: bool,
}

/// Fold a log into height -> distinct hashes
pub fn height_to_hashes(log: &[BlockRecord]) -> BTreeMap<u64, BTreeSet<BlockHash>> {
    log.iter().fold(BTreeMap::new(), |mut map, record| {
        map.entry(record.number)
            .or_insert_with(BTreeSet::new)
            .insert(record.hash);
        map
    })
}

pub fn check_compliance(log: &[BlockRecord], analysis: &SequenceAnalysis) -> ComplianceReport {
    let heights = height_to_hashes(log);
    let duplicate_groups: Vec<DuplicateHeightGroup> = heights
        .iter()
        .filter(|(_, hashes)| hashes.len() > 1)
        .map(|(number, hashes)| DuplicateHeightGroup {
            number: *number,
            hashes: hashes.clone(),
        })
        .collect();

    let chain_switches = analysis.chain_switch_count();
    ComplianceReport {
        chain_switches,
        law_holds: chain_switches == 0 || !duplicate_groups.is_empty(),
        duplicate_groups,
        unique_heights: heights.len(),
    }
}
