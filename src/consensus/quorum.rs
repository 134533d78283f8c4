use crate::consensus::validator_set::{ValidatorSet, VotingPower};
use crate::types::{Address, Hash32};
use std::collections::BTreeMap;

/// Stake behind each block hash at one height.
#[derive(Clone, Debug, Default)]
pub struct VoteTally {
    pub per_block: BTreeMap<Hash32, VotingPower>,
}

impl VoteTally {
    pub fn add_vote(&mut self, vset: &ValidatorSet, voter: &Address, block_hash: &Hash32) -> VotingPower {
        let p = vset.power_of(voter);
        let entry = self.per_block.entry(*block_hash).or_insert(0);
        *entry = entry.saturating_add(p);
        *entry
    }

    pub fn power_for(&self, block_hash: &Hash32) -> VotingPower {
        self.per_block.get(block_hash).copied().unwrap_or(0)
    }

    pub fn best(&self) -> Option<(Hash32, VotingPower)> {
        self.per_block.iter().max_by_key(|(_, p)| **p).map(|(k, p)| (*k, *p))
    }
}

/// Strictly more than two thirds: `floor(2 * total / 3) + 1`.
pub fn quorum_threshold(total: VotingPower) -> VotingPower {
    ((total as u128 * 2 / 3) + 1) as VotingPower
}
