//! Evidence intake and penalty bookkeeping.
//!
//! Lifecycle of a piece of evidence:
//!
//! ```text
//! Submitted -> Verified -> Penalized
//!          \-> Rejected
//! ```
//!
//! Verified evidence waits in a queue until a proposer includes it in a block.
//! Penalties are applied by block execution against the ledger, so every node
//! burns the same stake at the same height; this manager only tracks status
//! and deduplicates.

use crate::evidence::{Evidence, EvidenceError};
use crate::ledger::{Ledger, LedgerError, LedgerParams, PenaltyOutcome};
use crate::types::{Address, Amount, Hash32, Height};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    #[error("evidence already known")]
    Duplicate,
    #[error("offense already recorded under evidence {0}")]
    OffenseAlreadyRecorded(Hash32),
    #[error("invalid evidence: {0}")]
    Invalid(EvidenceError),
    #[error("offender {0} is not a validator")]
    UnknownValidator(Address),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SlashingError {
    #[error("evidence {0} not found")]
    UnknownEvidence(Hash32),
    #[error("evidence {0} is not verified")]
    NotVerified(Hash32),
    #[error(transparent)]
    Invalid(#[from] EvidenceError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvidenceStatus {
    Submitted,
    Verified,
    Penalized { slashed: Amount, new_stake: Amount },
    Rejected(RejectReason),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted(Hash32),
    Rejected(RejectReason),
}

impl SubmitOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmitOutcome::Accepted(_))
    }
}

#[derive(Clone, Debug)]
pub struct EvidenceRecord {
    pub evidence: Evidence,
    pub status: EvidenceStatus,
}

/// Record of one applied penalty, handed to observers on commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenaltyRecord {
    pub evidence_id: Hash32,
    pub offender: Address,
    pub height: Height,
    pub slashed: Amount,
    pub new_stake: Amount,
    pub jailed_until: Height,
}

/// Check and apply one piece of evidence to `ledger` at `height`.
/// Deterministic: block execution calls this for every included evidence.
pub fn penalize(
    ledger: &mut Ledger,
    evidence: &Evidence,
    params: &LedgerParams,
    height: Height,
) -> Result<PenaltyOutcome, SlashingError> {
    evidence.verify()?;
    let outcome = ledger.apply_penalty(
        evidence.id(),
        &evidence.offender(),
        evidence.kind(),
        evidence.height(),
        params,
        height,
    )?;
    Ok(outcome)
}

#[derive(Debug, Default)]
pub struct SlashingManager {
    records: BTreeMap<Hash32, EvidenceRecord>,
    offenses: BTreeMap<(Address, Height), Hash32>,
    /// Verified ids in arrival order, waiting for block inclusion.
    queue: Vec<Hash32>,
}

impl SlashingManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, id: &Hash32) -> Option<&EvidenceStatus> {
        self.records.get(id).map(|r| &r.status)
    }

    /// Verify and queue evidence. `ledger` decides whether the offender is a
    /// known validator and whether the offense was already punished.
    pub fn submit_evidence(&mut self, evidence: Evidence, ledger: &Ledger) -> SubmitOutcome {
        let id = evidence.id();
        if let Some(EvidenceStatus::Rejected(reason)) = self.status(&id) {
            return SubmitOutcome::Rejected(reason.clone());
        }
        if self.records.contains_key(&id) || ledger.evidence_applied(&id) {
            debug!(evidence = %id, "duplicate evidence ignored");
            return SubmitOutcome::Rejected(RejectReason::Duplicate);
        }
        let mut record = EvidenceRecord { evidence, status: EvidenceStatus::Submitted };

        if let Err(e) = record.evidence.verify() {
            warn!(evidence = %id, error = %e, "evidence rejected");
            return self.reject(record, RejectReason::Invalid(e));
        }
        let offender = record.evidence.offender();
        if ledger.validator(&offender).is_none() {
            return self.reject(record, RejectReason::UnknownValidator(offender));
        }
        let offense = (offender, record.evidence.height());
        if let Some(prior) = self.offenses.get(&offense).copied() {
            debug!(evidence = %id, prior = %prior, "offense already recorded");
            return self.reject(record, RejectReason::OffenseAlreadyRecorded(prior));
        }

        record.status = EvidenceStatus::Verified;
        info!(
            evidence = %id,
            offender = %offender,
            height = offense.1,
            kind = ?record.evidence.kind(),
            "evidence verified"
        );
        self.records.insert(id, record);
        self.offenses.insert(offense, id);
        self.queue.push(id);
        SubmitOutcome::Accepted(id)
    }

    fn reject(&mut self, mut record: EvidenceRecord, reason: RejectReason) -> SubmitOutcome {
        record.status = EvidenceStatus::Rejected(reason.clone());
        self.records.insert(record.evidence.id(), record);
        SubmitOutcome::Rejected(reason)
    }

    /// Verified evidence not yet applied in `ledger`, oldest first, at most `max`.
    pub fn pending_evidence(&self, ledger: &Ledger, max: usize) -> Vec<Evidence> {
        self.queue
            .iter()
            .filter(|id| !ledger.evidence_applied(id))
            .filter_map(|id| self.records.get(id))
            .filter(|r| r.status == EvidenceStatus::Verified)
            .take(max)
            .map(|r| r.evidence.clone())
            .collect()
    }

    /// Apply the penalty for verified evidence `id` directly to `ledger` and
    /// return the offender's new stake. Repeat calls do not slash again.
    pub fn apply_penalty(
        &mut self,
        id: &Hash32,
        ledger: &mut Ledger,
        params: &LedgerParams,
        height: Height,
    ) -> Result<Amount, SlashingError> {
        let record = self.records.get(id).ok_or(SlashingError::UnknownEvidence(*id))?;
        match record.status {
            EvidenceStatus::Verified => {}
            EvidenceStatus::Penalized { .. } => {
                return Ok(ledger.voting_power(&record.evidence.offender()));
            }
            _ => return Err(SlashingError::NotVerified(*id)),
        }
        let outcome = penalize(ledger, &record.evidence, params, height)?;
        self.mark_penalized(id, &outcome);
        Ok(outcome.stake())
    }

    /// Record that a committed block applied the penalty for `id`.
    pub fn mark_penalized(&mut self, id: &Hash32, outcome: &PenaltyOutcome) {
        let status = match outcome {
            PenaltyOutcome::Applied { slashed, new_stake, .. } => {
                EvidenceStatus::Penalized { slashed: *slashed, new_stake: *new_stake }
            }
            PenaltyOutcome::AlreadyApplied { stake, .. } => {
                EvidenceStatus::Penalized { slashed: 0, new_stake: *stake }
            }
        };
        if let Some(rec) = self.records.get_mut(id) {
            rec.status = status;
        }
        self.queue.retain(|q| q != id);
    }

    /// Learn about evidence seen first inside a committed block.
    pub fn record_committed(&mut self, evidence: &Evidence, outcome: &PenaltyOutcome) {
        let id = evidence.id();
        self.offenses.entry((evidence.offender(), evidence.height())).or_insert(id);
        self.records
            .entry(id)
            .or_insert_with(|| EvidenceRecord { evidence: evidence.clone(), status: EvidenceStatus::Verified });
        self.mark_penalized(&id, outcome);
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}
