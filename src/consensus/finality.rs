//! Vote aggregation and finality certificates.
//!
//! One `HeightVotes` record exists per height whose validator snapshot has
//! been registered. Votes are counted against that snapshot only, so stake
//! changes applied later never move an earlier height's threshold.
//!
//! Votes for heights that have no snapshot yet are parked (bounded) and
//! replayed when the snapshot is registered.

use crate::consensus::messages::Vote;
use crate::consensus::quorum::{quorum_threshold, VoteTally};
use crate::consensus::validator_set::{ValidatorSet, VotingPower};
use crate::evidence::Evidence;
use crate::types::{Address, Hash32, Height};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Parked votes per height, and heights ahead of finality that may park.
const MAX_PARKED_PER_HEIGHT: usize = 1024;
const MAX_PARK_AHEAD: u64 = 64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FinalityError {
    #[error("vote signature invalid")]
    BadSignature,
    #[error("voter {0} is not in the validator set for this height")]
    UnknownValidator(Address),
    #[error("no validator snapshot for height {0}")]
    UnknownHeight(Height),
    #[error("height {height} already finalized at {finalized}")]
    ConflictsWithFinalized { height: Height, finalized: Hash32 },
    #[error("validator {voter} voted twice at height {height}")]
    Equivocation { voter: Address, height: Height },
    #[error("certificate has insufficient power: {signed} < {required}")]
    InsufficientPower { signed: VotingPower, required: VotingPower },
    #[error("certificate contains a vote for another block")]
    MixedVotes,
}

/// Proof that more than two thirds of the snapshot's stake voted for one block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalityCertificate {
    pub height: Height,
    pub block_hash: Hash32,
    pub votes: Vec<Vote>,
    pub signed_power: VotingPower,
    pub total_power: VotingPower,
}

impl FinalityCertificate {
    /// Re-check the certificate against the snapshot it claims to cover.
    pub fn verify(&self, vset: &ValidatorSet) -> Result<(), FinalityError> {
        let mut seen = BTreeMap::new();
        let mut power: VotingPower = 0;
        for v in &self.votes {
            if v.height != self.height || v.block_hash != self.block_hash {
                return Err(FinalityError::MixedVotes);
            }
            v.verify().map_err(|_| FinalityError::BadSignature)?;
            let voter = v.voter();
            let p = vset.power_of(&voter);
            if p == 0 {
                return Err(FinalityError::UnknownValidator(voter));
            }
            if seen.insert(voter, ()).is_none() {
                power = power.saturating_add(p);
            }
        }
        let required = quorum_threshold(vset.total_power());
        if power < required {
            return Err(FinalityError::InsufficientPower { signed: power, required });
        }
        Ok(())
    }
}

#[derive(Debug)]
struct HeightVotes {
    vset: Arc<ValidatorSet>,
    by_voter: BTreeMap<Address, Vote>,
    /// Votes against an already certified block. Never tallied.
    conflicting: BTreeMap<Address, Vote>,
    tally: VoteTally,
}

impl HeightVotes {
    fn new(vset: Arc<ValidatorSet>) -> Self {
        Self { vset, by_voter: BTreeMap::new(), conflicting: BTreeMap::new(), tally: VoteTally::default() }
    }

    fn retally(&mut self) {
        let vset = self.vset.clone();
        self.by_voter.retain(|addr, _| vset.contains(addr));
        self.tally = VoteTally::default();
        for (addr, v) in &self.by_voter {
            self.tally.add_vote(&vset, addr, &v.block_hash);
        }
    }
}

#[derive(Debug)]
pub struct FinalityManager {
    heights: BTreeMap<Height, HeightVotes>,
    parked: BTreeMap<Height, Vec<Vote>>,
    certificates: BTreeMap<Height, FinalityCertificate>,
    finalized_height: Height,
    finalized_hash: Hash32,
    evidence: Vec<Evidence>,
}

impl FinalityManager {
    /// Start with `height`/`hash` already final (genesis or a restored tip).
    pub fn new(finalized_height: Height, finalized_hash: Hash32) -> Self {
        Self {
            heights: BTreeMap::new(),
            parked: BTreeMap::new(),
            certificates: BTreeMap::new(),
            finalized_height,
            finalized_hash,
            evidence: Vec::new(),
        }
    }

    pub fn finalized_height(&self) -> Height {
        self.finalized_height
    }

    pub fn finalized_hash(&self) -> Hash32 {
        self.finalized_hash
    }

    pub fn is_finalized(&self, height: Height) -> bool {
        height <= self.finalized_height
    }

    pub fn certificate(&self, height: Height) -> Option<&FinalityCertificate> {
        self.certificates.get(&height)
    }

    pub fn restore_certificate(&mut self, cert: FinalityCertificate) {
        self.certificates.insert(cert.height, cert);
    }

    pub fn validator_set(&self, height: Height) -> Option<Arc<ValidatorSet>> {
        self.heights.get(&height).map(|h| h.vset.clone())
    }

    /// Stake currently voting for `block_hash` at `height`.
    pub fn tally(&self, height: Height, block_hash: &Hash32) -> VotingPower {
        self.heights.get(&height).map(|h| h.tally.power_for(block_hash)).unwrap_or(0)
    }

    /// Equivocation evidence discovered since the last call.
    pub fn take_evidence(&mut self) -> Vec<Evidence> {
        std::mem::take(&mut self.evidence)
    }

    /// Register the snapshot votes at `vset.height` are counted against.
    /// Re-registering replaces the snapshot and recounts existing votes.
    /// Returns true when parked votes finalize the height.
    pub fn register_validator_set(&mut self, vset: Arc<ValidatorSet>) -> bool {
        let height = vset.height;
        match self.heights.get_mut(&height) {
            Some(hv) if *hv.vset == *vset => {}
            Some(hv) => {
                debug!(height, "validator snapshot replaced, recounting votes");
                hv.vset = vset;
                hv.retally();
            }
            None => {
                self.heights.insert(height, HeightVotes::new(vset));
            }
        }

        let mut finalized = false;
        if let Some(parked) = self.parked.remove(&height) {
            for vote in parked {
                match self.record_vote(&vote) {
                    Ok(true) => finalized = true,
                    Ok(false) => {}
                    Err(e) => debug!(height, error = %e, "parked vote dropped"),
                }
            }
        }
        if !finalized {
            finalized = self.try_finalize(height);
        }
        finalized
    }

    /// Count a vote. `Ok(true)` means this vote finalized its height.
    pub fn record_vote(&mut self, vote: &Vote) -> Result<bool, FinalityError> {
        vote.verify().map_err(|_| FinalityError::BadSignature)?;
        let voter = vote.voter();
        let height = vote.height;

        let Some(hv) = self.heights.get_mut(&height) else {
            if height > self.finalized_height && height <= self.finalized_height + MAX_PARK_AHEAD {
                let slot = self.parked.entry(height).or_default();
                if slot.len() < MAX_PARKED_PER_HEIGHT && !slot.contains(vote) {
                    slot.push(vote.clone());
                }
                return Ok(false);
            }
            return Err(FinalityError::UnknownHeight(height));
        };

        if !hv.vset.contains(&voter) {
            return Err(FinalityError::UnknownValidator(voter));
        }

        if let Some(prev) = hv.by_voter.get(&voter).or_else(|| hv.conflicting.get(&voter)) {
            if prev.block_hash == vote.block_hash {
                return Ok(false);
            }
            warn!(voter = %voter, height, "conflicting votes from one validator");
            self.evidence.push(Evidence::double_vote(prev.clone(), vote.clone()));
            return Err(FinalityError::Equivocation { voter, height });
        }

        if let Some(cert) = self.certificates.get(&height) {
            if cert.block_hash != vote.block_hash {
                hv.conflicting.insert(voter, vote.clone());
                return Err(FinalityError::ConflictsWithFinalized { height, finalized: cert.block_hash });
            }
        }

        hv.by_voter.insert(voter, vote.clone());
        let vset = hv.vset.clone();
        hv.tally.add_vote(&vset, &voter, &vote.block_hash);

        if height <= self.finalized_height {
            return Ok(false);
        }
        Ok(self.try_finalize(height))
    }

    fn try_finalize(&mut self, height: Height) -> bool {
        if height <= self.finalized_height {
            return false;
        }
        let Some(hv) = self.heights.get(&height) else { return false };
        let total = hv.vset.total_power();
        let required = quorum_threshold(total);
        let Some((block_hash, power)) = hv.tally.best() else { return false };
        if power < required {
            return false;
        }

        let votes: Vec<Vote> = hv
            .by_voter
            .values()
            .filter(|v| v.block_hash == block_hash)
            .cloned()
            .collect();
        let cert = FinalityCertificate { height, block_hash, votes, signed_power: power, total_power: total };
        info!(height, block = %block_hash, signed = power, total, "block finalized");
        self.certificates.insert(height, cert);
        self.finalized_height = height;
        self.finalized_hash = block_hash;
        self.parked = self.parked.split_off(&(height + 1));
        true
    }

    /// Drop vote records and certificates more than `keep` heights below
    /// the finalized height.
    pub fn prune(&mut self, keep: u64) {
        let floor = self.finalized_height.saturating_sub(keep);
        self.heights = self.heights.split_off(&floor);
        self.certificates = self.certificates.split_off(&floor);
    }
}
