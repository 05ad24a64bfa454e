//! Deterministic chain generator for offline runs
//!
//! Produces a block sequence with periodic reorgs and renders it the way a
//! conformant feed (re-emitting the new branch) or a non-conformant feed
//! (jumping straight to the new tip) would deliver it.

use crate::types::{BlockHash, BlockRecord};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

/// How a simulated feed announces a reorg
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ReorgPolicy {
    /// Emit every header of the new branch, starting at the fork height
    ReEmit,
    /// Emit only the new tip
    JumpToTip,
}

/// One step of chain progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    Extend(BlockRecord),
    Reorg {
        /// Blocks of the old chain that were abandoned
        depth: u64,
        /// New branch, from the fork point + 1 to the new tip
        branch: Vec<BlockRecord>,
    },
}

/// Generated chain history
#[derive(Debug, Clone, Default)]
pub struct SimulatedChain {
    pub events: Vec<ChainEvent>,
}

impl SimulatedChain {
    /// Headers in the order a feed with `policy` would deliver them
    pub fn deliveries(&self, policy: ReorgPolicy) -> Vec<BlockRecord> {
        let mut out = Vec::new();
        for event in &self.events {
            match event {
                ChainEvent::Extend(record) => out.push(record.clone()),
                ChainEvent::Reorg { branch, .. } => match policy {
                    ReorgPolicy::ReEmit => out.extend(branch.iter().cloned()),
                    ReorgPolicy::JumpToTip => out.extend(branch.last().cloned()),
                },
            }
        }
        out
    }

    pub fn reorg_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, ChainEvent::Reorg { .. }))
            .count()
    }
}

pub struct ChainSimulator {
    rng: StdRng,
    start_height: u64,
    /// Average blocks between reorgs; 0 disables reorgs
    reorg_every: u64,
    max_depth: u64,
    clock: DateTime<Utc>,
}

impl ChainSimulator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            start_height: 1,
            reorg_every: 0,
            max_depth: 1,
            clock: Utc
                .timestamp_opt(1_700_000_000, 0)
                .single()
                .unwrap_or_default(),
        }
    }

    pub fn starting_at(mut self, height: u64) -> Self {
        self.start_height = height;
        self
    }

    pub fn with_reorgs(mut self, every: u64, max_depth: u64) -> Self {
        self.reorg_every = every;
        self.max_depth = max_depth.max(1);
        self
    }

    fn hash(&mut self, parent: &BlockHash, number: u64) -> BlockHash {
        let salt: u64 = self.rng.gen();
        let mut hasher = Sha256::new();
        hasher.update(parent.0);
        hasher.update(number.to_be_bytes());
        hasher.update(salt.to_be_bytes());
        BlockHash::new(hasher.finalize().into())
    }

    fn next_record(&mut self, parent: &BlockHash, number: u64) -> BlockRecord {
        self.clock += ChronoDuration::seconds(6);
        let hash = self.hash(parent, number);
        BlockRecord::observed(number, hash, *parent, self.clock)
    }

    /// Generate `steps` progress events
    pub fn generate(&mut self, steps: usize) -> SimulatedChain {
        let genesis_parent = BlockHash::new(Sha256::digest(b"genesis").into());
        let mut canonical: Vec<BlockRecord> = Vec::with_capacity(steps);
        let mut events = Vec::with_capacity(steps);

        for _ in 0..steps {
            let reorg_due = self.reorg_every > 0
                && canonical.len() > 1
                && self.rng.gen_range(0..self.reorg_every) == 0;

            if reorg_due {
                let depth = self
                    .rng
                    .gen_range(1..=self.max_depth)
                    .min(canonical.len() as u64 - 1);
                let tip = canonical.len() - 1;
                let fork_index = tip - depth as usize;
                canonical.truncate(fork_index + 1);

                let mut branch = Vec::with_capacity(depth as usize + 1);
                for _ in 0..=depth {
                    let (parent_hash, parent_number) = match canonical.last() {
                        Some(parent) => (parent.hash, parent.number),
                        None => break,
                    };
                    let record = self.next_record(&parent_hash, parent_number + 1);
                    canonical.push(record.clone());
                    branch.push(record);
                }
                events.push(ChainEvent::Reorg { depth, branch });
            } else {
                let record = match canonical.last() {
                    Some(parent) => {
                        let (hash, number) = (parent.hash, parent.number);
                        self.next_record(&hash, number + 1)
                    }
                    None => self.next_record(&genesis_parent, self.start_height),
                };
                canonical.push(record.clone());
                events.push(ChainEvent::Extend(record));
            }
        }

        SimulatedChain { events }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze;
    use crate::compliance::check_compliance;

    #[test]
    fn test_same_seed_same_chain() {
        let a = ChainSimulator::new(7).with_reorgs(5, 3).generate(50);
        let b = ChainSimulator::new(7).with_reorgs(5, 3).generate(50);
        assert_eq!(a.events, b.events);
    }

    #[test]
    fn test_clean_chain_without_reorgs() {
        let chain = ChainSimulator::new(1).starting_at(100).generate(20);
        let log = chain.deliveries(ReorgPolicy::JumpToTip);
        assert_eq!(chain.reorg_count(), 0);
        assert_eq!(log.first().map(|r| r.number), Some(100));
        assert!(analyze(&log).anomalies.is_empty());
    }

    #[test]
    fn test_re_emit_policy_is_compliant() {
        let chain = ChainSimulator::new(42).with_reorgs(4, 1).generate(60);
        assert!(chain.reorg_count() > 0);

        let log = chain.deliveries(ReorgPolicy::ReEmit);
        let analysis = analyze(&log);
        assert_eq!(analysis.gap_count(), 0);
        assert_eq!(analysis.missing_parent_count(), 0);
        assert_eq!(analysis.chain_switch_count(), chain.reorg_count());
        assert!(check_compliance(&log, &analysis).law_holds);
    }

    #[test]
    fn test_deep_re_emission_reports_height_drop() {
        let chain = ChainSimulator::new(42).with_reorgs(4, 3).generate(60);
        let deep = chain
            .events
            .iter()
            .filter(|e| matches!(e, ChainEvent::Reorg { depth, .. } if *depth > 1))
            .count();

        let log = chain.deliveries(ReorgPolicy::ReEmit);
        let analysis = analyze(&log);
        assert_eq!(analysis.gap_count(), deep);
        assert!(analysis.gaps().all(|g| g.gap_size().is_some_and(|d| d < 0)));
        assert_eq!(analysis.missing_parent_count(), 0);
        assert!(check_compliance(&log, &analysis).law_holds);
    }

    #[test]
    fn test_jump_to_tip_policy_violates_compliance() {
        let chain = ChainSimulator::new(42).with_reorgs(4, 3).generate(60);
        let log = chain.deliveries(ReorgPolicy::JumpToTip);
        let analysis = analyze(&log);

        assert_eq!(analysis.gap_count(), 0);
        assert_eq!(analysis.chain_switch_count(), chain.reorg_count());
        assert_eq!(analysis.missing_parent_count(), chain.reorg_count());
        assert!(!check_compliance(&log, &analysis).law_holds);
    }
}
