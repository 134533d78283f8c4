//! Account ledger: balances, nonces, stake, delegations, unbonding and
//! penalties.
//!
//! The ledger is a plain value. Block execution clones it, applies the block
//! to the copy and only hands the copy back when every step succeeded, so a
//! failed block never leaves a partial mutation behind.

use crate::consensus::validator_set::{Validator, ValidatorSet};
use crate::crypto::ed25519::verify;
use crate::crypto::tx::tx_sign_bytes;
use crate::crypto::PublicKeyBytes;
use crate::evidence::EvidenceKind;
use crate::gas::GasSchedule;
use crate::merkle::state_merkle_root;
use crate::types::{Address, Amount, Hash32, Height, Transaction, TxKind, TxReceipt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("wrong chain id: expected {expected}, got {got}")]
    WrongChain { expected: u64, got: u64 },
    #[error("nonce mismatch: expected {expected}, got {got}")]
    NonceMismatch { expected: u64, got: u64 },
    #[error("gas limit {limit} below required {required}")]
    InsufficientGas { required: u64, limit: u64 },
    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Amount, available: Amount },
    #[error("insufficient stake: need {needed}, staked {staked}")]
    InsufficientStake { needed: Amount, staked: Amount },
    #[error("amount must be non-zero")]
    ZeroAmount,
    #[error("balance overflow")]
    Overflow,
    #[error("unknown validator {0}")]
    UnknownValidator(Address),
    #[error("validator {0} already exists")]
    ValidatorExists(Address),
    #[error("insufficient delegation: need {needed}, delegated {delegated}")]
    InsufficientDelegation { needed: Amount, delegated: Amount },
    #[error("commission {0} bps above 10000")]
    InvalidCommission(u16),
    #[error("initial stake {amount} below minimum {minimum}")]
    StakeBelowMinimum { minimum: Amount, amount: Amount },
}

impl LedgerError {
    /// The nonce was already consumed: a replay of an applied transaction.
    pub fn is_replay(&self) -> bool {
        matches!(self, LedgerError::NonceMismatch { expected, got } if got < expected)
    }

    /// The nonce is ahead of the account: the tx may become valid later.
    pub fn is_future_nonce(&self) -> bool {
        matches!(self, LedgerError::NonceMismatch { expected, got } if got > expected)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub balance: Amount,
    pub staked: Amount,
    pub nonce: u64,
}

impl Account {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(24);
        out.extend_from_slice(&self.balance.to_le_bytes());
        out.extend_from_slice(&self.staked.to_le_bytes());
        out.extend_from_slice(&self.nonce.to_le_bytes());
        out
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidatorStatus {
    Active,
    Jailed { until: Height },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Infraction {
    pub evidence_id: Hash32,
    pub kind: EvidenceKind,
    pub offense_height: Height,
    pub applied_at: Height,
    pub slashed: Amount,
}

/// Commission for validators registered through `Stake` or genesis.
pub const DEFAULT_COMMISSION_BPS: u16 = 1_000;
const MAX_BPS: u16 = 10_000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorRecord {
    pub pk: PublicKeyBytes,
    pub status: ValidatorStatus,
    /// Share of delegator rewards kept by the validator, in basis points.
    pub commission_bps: u16,
    pub slashed_total: Amount,
    pub infractions: Vec<Infraction>,
}

impl ValidatorRecord {
    pub fn new(pk: PublicKeyBytes) -> Self {
        Self::with_commission(pk, DEFAULT_COMMISSION_BPS)
    }

    pub fn with_commission(pk: PublicKeyBytes, commission_bps: u16) -> Self {
        Self {
            pk,
            status: ValidatorStatus::Active,
            commission_bps,
            slashed_total: 0,
            infractions: Vec::new(),
        }
    }

    pub fn is_jailed_at(&self, height: Height) -> bool {
        matches!(self.status, ValidatorStatus::Jailed { until } if height < until)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnbondingEntry {
    /// Account credited on release.
    pub address: Address,
    /// Validator the stake was bonded to. Offenses by this validator at or
    /// before `created_at` still slash the entry.
    pub validator: Address,
    pub amount: Amount,
    pub created_at: Height,
    pub release_height: Height,
}

/// Result of a slashing application.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PenaltyOutcome {
    /// `new_stake` is the offender's remaining voting power.
    Applied { offender: Address, slashed: Amount, new_stake: Amount, jailed_until: Height },
    AlreadyApplied { offender: Address, stake: Amount },
}

impl PenaltyOutcome {
    pub fn stake(&self) -> Amount {
        match self {
            PenaltyOutcome::Applied { new_stake, .. } => *new_stake,
            PenaltyOutcome::AlreadyApplied { stake, .. } => *stake,
        }
    }
}

/// Parameters that change how transactions and penalties are applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerParams {
    pub chain_id: u64,
    pub gas: GasSchedule,
    pub unbonding_period_blocks: u64,
    /// Share of stake burned per offense, in basis points.
    pub slash_bps: u64,
    pub min_validator_stake: Amount,
}

impl Default for LedgerParams {
    fn default() -> Self {
        Self {
            chain_id: 1,
            gas: GasSchedule::default(),
            unbonding_period_blocks: 100,
            slash_bps: 5_000,
            min_validator_stake: 1,
        }
    }
}

/// Non-account ledger state, persisted as one record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerAggregates {
    /// Height of the last `begin_block`.
    pub height: Height,
    pub validators: BTreeMap<Address, ValidatorRecord>,
    /// validator -> delegator -> amount. Empty entries are removed.
    pub delegations: BTreeMap<Address, BTreeMap<Address, Amount>>,
    pub unbonding: Vec<UnbondingEntry>,
    pub fee_pool: Amount,
    pub burned: Amount,
    pub applied_evidence: BTreeSet<Hash32>,
    pub offenses: BTreeSet<(Address, Height)>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ledger {
    accounts: BTreeMap<Address, Account>,
    agg: LedgerAggregates,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(accounts: BTreeMap<Address, Account>, agg: LedgerAggregates) -> Self {
        Self { accounts, agg }
    }

    pub fn aggregates(&self) -> &LedgerAggregates {
        &self.agg
    }

    pub fn accounts(&self) -> &BTreeMap<Address, Account> {
        &self.accounts
    }

    pub fn account(&self, addr: &Address) -> Account {
        self.accounts.get(addr).cloned().unwrap_or_default()
    }

    pub fn balance(&self, addr: &Address) -> Amount {
        self.accounts.get(addr).map(|a| a.balance).unwrap_or(0)
    }

    pub fn nonce(&self, addr: &Address) -> u64 {
        self.accounts.get(addr).map(|a| a.nonce).unwrap_or(0)
    }

    pub fn staked(&self, addr: &Address) -> Amount {
        self.accounts.get(addr).map(|a| a.staked).unwrap_or(0)
    }

    pub fn delegation(&self, validator: &Address, delegator: &Address) -> Amount {
        self.agg
            .delegations
            .get(validator)
            .and_then(|d| d.get(delegator))
            .copied()
            .unwrap_or(0)
    }

    pub fn delegated_to(&self, validator: &Address) -> Amount {
        self.agg
            .delegations
            .get(validator)
            .map(|d| d.values().fold(0u64, |acc, a| acc.saturating_add(*a)))
            .unwrap_or(0)
    }

    /// Self-stake plus delegations.
    pub fn voting_power(&self, validator: &Address) -> Amount {
        self.staked(validator).saturating_add(self.delegated_to(validator))
    }

    pub fn validator(&self, addr: &Address) -> Option<&ValidatorRecord> {
        self.agg.validators.get(addr)
    }

    pub fn unbonding(&self) -> &[UnbondingEntry] {
        &self.agg.unbonding
    }

    pub fn fee_pool(&self) -> Amount {
        self.agg.fee_pool
    }

    pub fn burned(&self) -> Amount {
        self.agg.burned
    }

    pub fn evidence_applied(&self, id: &Hash32) -> bool {
        self.agg.applied_evidence.contains(id)
    }

    // ── Genesis ──────────────────────────────────────────────────────────

    pub fn credit_genesis(&mut self, addr: Address, amount: Amount) -> Result<(), LedgerError> {
        let acct = self.accounts.entry(addr).or_default();
        acct.balance = acct.balance.checked_add(amount).ok_or(LedgerError::Overflow)?;
        Ok(())
    }

    pub fn bond_genesis(&mut self, pk: PublicKeyBytes, stake: Amount) -> Result<(), LedgerError> {
        let addr = pk.address();
        let acct = self.accounts.entry(addr).or_default();
        acct.staked = acct.staked.checked_add(stake).ok_or(LedgerError::Overflow)?;
        self.agg.validators.entry(addr).or_insert_with(|| ValidatorRecord::new(pk));
        Ok(())
    }

    // ── Transactions ─────────────────────────────────────────────────────

    /// Full check then apply. All checks run before any field changes.
    pub fn apply_transaction(
        &mut self,
        tx: &Transaction,
        params: &LedgerParams,
    ) -> Result<TxReceipt, LedgerError> {
        verify(&tx.sender_pk, &tx_sign_bytes(tx), &tx.signature)
            .map_err(|_| LedgerError::InvalidSignature)?;
        self.apply_verified(tx, params)
    }

    /// Apply a transaction whose signature was already checked.
    pub fn apply_verified(
        &mut self,
        tx: &Transaction,
        params: &LedgerParams,
    ) -> Result<TxReceipt, LedgerError> {
        if tx.chain_id != params.chain_id {
            return Err(LedgerError::WrongChain { expected: params.chain_id, got: tx.chain_id });
        }
        let sender = tx.sender();
        let acct = self.account(&sender);
        if tx.nonce != acct.nonce {
            return Err(LedgerError::NonceMismatch { expected: acct.nonce, got: tx.nonce });
        }
        let gas = params.gas.estimate_cost(tx);
        if tx.gas_limit < gas {
            return Err(LedgerError::InsufficientGas { required: gas, limit: tx.gas_limit });
        }

        // Validate the whole effect first, then write.
        let mut next = acct.clone();
        let mut credit: Option<(Address, Amount)> = None;
        match &tx.kind {
            TxKind::Transfer { to, amount } => {
                let needed = amount.checked_add(tx.fee).ok_or(LedgerError::Overflow)?;
                if next.balance < needed {
                    return Err(LedgerError::InsufficientFunds { needed, available: next.balance });
                }
                next.balance -= needed;
                if *to == sender {
                    next.balance += amount;
                } else {
                    let recipient = self.balance(to);
                    recipient.checked_add(*amount).ok_or(LedgerError::Overflow)?;
                    credit = Some((*to, *amount));
                }
            }
            TxKind::Stake { amount } => {
                if *amount == 0 {
                    return Err(LedgerError::ZeroAmount);
                }
                let needed = amount.checked_add(tx.fee).ok_or(LedgerError::Overflow)?;
                if next.balance < needed {
                    return Err(LedgerError::InsufficientFunds { needed, available: next.balance });
                }
                next.balance -= needed;
                next.staked = next.staked.checked_add(*amount).ok_or(LedgerError::Overflow)?;
            }
            TxKind::Unstake { amount } => {
                if *amount == 0 {
                    return Err(LedgerError::ZeroAmount);
                }
                if next.balance < tx.fee {
                    return Err(LedgerError::InsufficientFunds { needed: tx.fee, available: next.balance });
                }
                if next.staked < *amount {
                    return Err(LedgerError::InsufficientStake { needed: *amount, staked: next.staked });
                }
                next.balance -= tx.fee;
                next.staked -= amount;
            }
            TxKind::Delegate { validator, amount } => {
                if *amount == 0 {
                    return Err(LedgerError::ZeroAmount);
                }
                if !self.agg.validators.contains_key(validator) {
                    return Err(LedgerError::UnknownValidator(*validator));
                }
                let needed = amount.checked_add(tx.fee).ok_or(LedgerError::Overflow)?;
                if next.balance < needed {
                    return Err(LedgerError::InsufficientFunds { needed, available: next.balance });
                }
                self.delegation(validator, &sender).checked_add(*amount).ok_or(LedgerError::Overflow)?;
                next.balance -= needed;
            }
            TxKind::Undelegate { validator, amount } => {
                if *amount == 0 {
                    return Err(LedgerError::ZeroAmount);
                }
                if next.balance < tx.fee {
                    return Err(LedgerError::InsufficientFunds { needed: tx.fee, available: next.balance });
                }
                let delegated = self.delegation(validator, &sender);
                if delegated < *amount {
                    return Err(LedgerError::InsufficientDelegation { needed: *amount, delegated });
                }
                next.balance -= tx.fee;
            }
            TxKind::CreateValidator { amount, commission_bps } => {
                if self.agg.validators.contains_key(&sender) {
                    return Err(LedgerError::ValidatorExists(sender));
                }
                if *commission_bps > MAX_BPS {
                    return Err(LedgerError::InvalidCommission(*commission_bps));
                }
                let minimum = params.min_validator_stake.max(1);
                if *amount < minimum {
                    return Err(LedgerError::StakeBelowMinimum { minimum, amount: *amount });
                }
                let needed = amount.checked_add(tx.fee).ok_or(LedgerError::Overflow)?;
                if next.balance < needed {
                    return Err(LedgerError::InsufficientFunds { needed, available: next.balance });
                }
                next.balance -= needed;
                next.staked = next.staked.checked_add(*amount).ok_or(LedgerError::Overflow)?;
            }
            TxKind::EditValidator { commission_bps } => {
                if !self.agg.validators.contains_key(&sender) {
                    return Err(LedgerError::UnknownValidator(sender));
                }
                if *commission_bps > MAX_BPS {
                    return Err(LedgerError::InvalidCommission(*commission_bps));
                }
                if next.balance < tx.fee {
                    return Err(LedgerError::InsufficientFunds { needed: tx.fee, available: next.balance });
                }
                next.balance -= tx.fee;
            }
        }
        let fee_pool = self.agg.fee_pool.checked_add(tx.fee).ok_or(LedgerError::Overflow)?;
        next.nonce += 1;

        // ── commit ──
        self.accounts.insert(sender, next);
        if let Some((to, amount)) = credit {
            let r = self.accounts.entry(to).or_default();
            r.balance += amount;
        }
        self.agg.fee_pool = fee_pool;
        match &tx.kind {
            TxKind::Stake { .. } => {
                self.agg
                    .validators
                    .entry(sender)
                    .or_insert_with(|| ValidatorRecord::new(tx.sender_pk.clone()));
            }
            TxKind::Unstake { amount } => self.start_unbonding(sender, sender, *amount, params),
            TxKind::Delegate { validator, amount } => {
                let slot = self.agg.delegations.entry(*validator).or_default().entry(sender).or_default();
                *slot += amount;
            }
            TxKind::Undelegate { validator, amount } => {
                if let Some(dels) = self.agg.delegations.get_mut(validator) {
                    if let Some(slot) = dels.get_mut(&sender) {
                        *slot -= amount;
                        if *slot == 0 {
                            dels.remove(&sender);
                        }
                    }
                    if dels.is_empty() {
                        self.agg.delegations.remove(validator);
                    }
                }
                self.start_unbonding(sender, *validator, *amount, params);
            }
            TxKind::CreateValidator { commission_bps, .. } => {
                self.agg
                    .validators
                    .insert(sender, ValidatorRecord::with_commission(tx.sender_pk.clone(), *commission_bps));
            }
            TxKind::EditValidator { commission_bps } => {
                if let Some(rec) = self.agg.validators.get_mut(&sender) {
                    rec.commission_bps = *commission_bps;
                }
            }
            TxKind::Transfer { .. } => {}
        }
        Ok(TxReceipt { tx_hash: tx.hash(), gas_used: gas, fee: tx.fee })
    }

    fn start_unbonding(&mut self, address: Address, validator: Address, amount: Amount, params: &LedgerParams) {
        let created_at = self.agg.height;
        self.agg.unbonding.push(UnbondingEntry {
            address,
            validator,
            amount,
            created_at,
            release_height: created_at.saturating_add(params.unbonding_period_blocks),
        });
    }

    // ── Block lifecycle ──────────────────────────────────────────────────

    /// Start-of-block housekeeping: release matured unbonding entries and
    /// lift expired jails.
    pub fn begin_block(&mut self, height: Height) {
        self.agg.height = height;
        let (matured, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.agg.unbonding)
            .into_iter()
            .partition(|e| e.release_height <= height);
        self.agg.unbonding = waiting;
        for e in matured {
            let acct = self.accounts.entry(e.address).or_default();
            acct.balance = acct.balance.saturating_add(e.amount);
        }
        for rec in self.agg.validators.values_mut() {
            if let ValidatorStatus::Jailed { until } = rec.status {
                if until <= height {
                    rec.status = ValidatorStatus::Active;
                }
            }
        }
    }

    /// Pay the accumulated fee pool to the block proposer.
    pub fn pay_fees(&mut self, proposer: &Address) -> Amount {
        let fees = std::mem::take(&mut self.agg.fee_pool);
        if fees > 0 {
            let acct = self.accounts.entry(*proposer).or_default();
            acct.balance = acct.balance.saturating_add(fees);
        }
        fees
    }

    /// Burn `slash_bps` of everything bonded to the offender at the offense
    /// height and jail them. That covers self-stake, delegations and unbonding
    /// entries started at or after `offense_height`. Applying the same
    /// evidence id, or a second id for an already punished offense, leaves the
    /// ledger unchanged.
    pub fn apply_penalty(
        &mut self,
        evidence_id: Hash32,
        offender: &Address,
        kind: EvidenceKind,
        offense_height: Height,
        params: &LedgerParams,
        height: Height,
    ) -> Result<PenaltyOutcome, LedgerError> {
        if !self.agg.validators.contains_key(offender) {
            return Err(LedgerError::UnknownValidator(*offender));
        }
        let offense = (*offender, offense_height);
        if self.agg.applied_evidence.contains(&evidence_id) || self.agg.offenses.contains(&offense) {
            self.agg.applied_evidence.insert(evidence_id);
            return Ok(PenaltyOutcome::AlreadyApplied { offender: *offender, stake: self.voting_power(offender) });
        }

        let bps = params.slash_bps.min(u64::from(MAX_BPS)) as u128;
        let cut = |amount: Amount| ((amount as u128 * bps) / 10_000) as Amount;

        let acct = self.accounts.entry(*offender).or_default();
        let mut slashed = cut(acct.staked);
        acct.staked -= slashed;

        if let Some(dels) = self.agg.delegations.get_mut(offender) {
            for amount in dels.values_mut() {
                let c = cut(*amount);
                *amount -= c;
                slashed = slashed.saturating_add(c);
            }
            dels.retain(|_, a| *a > 0);
            if dels.is_empty() {
                self.agg.delegations.remove(offender);
            }
        }
        for e in self
            .agg
            .unbonding
            .iter_mut()
            .filter(|e| e.validator == *offender && e.created_at >= offense_height && e.release_height > height)
        {
            let c = cut(e.amount);
            e.amount -= c;
            slashed = slashed.saturating_add(c);
        }
        self.agg.unbonding.retain(|e| e.amount > 0);

        let new_stake = self.voting_power(offender);
        self.agg.burned = self.agg.burned.saturating_add(slashed);

        let jailed_until = height.saturating_add(params.unbonding_period_blocks);
        if let Some(rec) = self.agg.validators.get_mut(offender) {
            rec.status = ValidatorStatus::Jailed { until: jailed_until };
            rec.slashed_total = rec.slashed_total.saturating_add(slashed);
            rec.infractions.push(Infraction {
                evidence_id,
                kind,
                offense_height,
                applied_at: height,
                slashed,
            });
        }
        self.agg.applied_evidence.insert(evidence_id);
        self.agg.offenses.insert(offense);

        warn!(
            validator = %offender,
            slashed,
            remaining = new_stake,
            jailed_until,
            "validator slashed and jailed"
        );
        Ok(PenaltyOutcome::Applied { offender: *offender, slashed, new_stake, jailed_until })
    }

    // ── Views ────────────────────────────────────────────────────────────

    /// Validators eligible to propose and vote at `height`.
    pub fn validator_set(&self, height: Height, min_stake: Amount) -> ValidatorSet {
        let vals = self
            .agg
            .validators
            .iter()
            .filter(|(_, rec)| !rec.is_jailed_at(height))
            .filter(|(addr, _)| self.staked(addr) > 0)
            .filter_map(|(addr, rec)| {
                let power = self.voting_power(addr);
                (power >= min_stake).then(|| Validator { address: *addr, pk: rec.pk.clone(), power })
            })
            .collect();
        ValidatorSet::new(height, vals)
    }

    fn total_delegated(&self) -> Amount {
        self.agg
            .delegations
            .values()
            .flat_map(|d| d.values())
            .fold(0u64, |acc, a| acc.saturating_add(*a))
    }

    /// Self-stake and delegations.
    pub fn total_staked(&self) -> Amount {
        self.accounts
            .values()
            .fold(0u64, |acc, a| acc.saturating_add(a.staked))
            .saturating_add(self.total_delegated())
    }

    /// Everything still owned by someone: balances, stake, delegations,
    /// unbonding, fee pool.
    pub fn total_supply(&self) -> Amount {
        let balances = self.accounts.values().fold(0u64, |acc, a| acc.saturating_add(a.balance));
        let unbonding = self.agg.unbonding.iter().fold(0u64, |acc, e| acc.saturating_add(e.amount));
        balances
            .saturating_add(self.total_staked())
            .saturating_add(unbonding)
            .saturating_add(self.agg.fee_pool)
    }

    /// Commitment over the full ledger state.
    pub fn state_root(&self) -> Hash32 {
        let mut kv: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        for (addr, acct) in &self.accounts {
            let mut k = b"acct/".to_vec();
            k.extend_from_slice(&addr.0);
            kv.insert(k, acct.encode());
        }
        for (addr, rec) in &self.agg.validators {
            let mut k = b"val/".to_vec();
            k.extend_from_slice(&addr.0);
            let mut v = Vec::with_capacity(rec.pk.0.len() + 24);
            v.extend_from_slice(&rec.pk.0);
            match rec.status {
                ValidatorStatus::Active => v.push(0),
                ValidatorStatus::Jailed { until } => {
                    v.push(1);
                    v.extend_from_slice(&until.to_le_bytes());
                }
            }
            v.extend_from_slice(&rec.commission_bps.to_le_bytes());
            v.extend_from_slice(&rec.slashed_total.to_le_bytes());
            kv.insert(k, v);
        }
        for (validator, dels) in &self.agg.delegations {
            for (delegator, amount) in dels {
                let mut k = b"dlg/".to_vec();
                k.extend_from_slice(&validator.0);
                k.extend_from_slice(&delegator.0);
                kv.insert(k, amount.to_le_bytes().to_vec());
            }
        }
        for (i, e) in self.agg.unbonding.iter().enumerate() {
            let mut k = b"unb/".to_vec();
            k.extend_from_slice(&(i as u64).to_be_bytes());
            let mut v = e.address.0.to_vec();
            v.extend_from_slice(&e.validator.0);
            v.extend_from_slice(&e.amount.to_le_bytes());
            v.extend_from_slice(&e.created_at.to_le_bytes());
            v.extend_from_slice(&e.release_height.to_le_bytes());
            kv.insert(k, v);
        }
        for id in &self.agg.applied_evidence {
            let mut k = b"evd/".to_vec();
            k.extend_from_slice(&id.0);
            kv.insert(k, Vec::new());
        }
        kv.insert(b"meta/fee_pool".to_vec(), self.agg.fee_pool.to_le_bytes().to_vec());
        kv.insert(b"meta/burned".to_vec(), self.agg.burned.to_le_bytes().to_vec());
        state_merkle_root(&kv)
    }

    /// Accounts whose contents differ from `base`.
    pub fn changed_accounts(&self, base: &Ledger) -> Vec<(Address, Account)> {
        self.accounts
            .iter()
            .filter(|(addr, acct)| base.accounts.get(addr) != Some(*acct))
            .map(|(addr, acct)| (*addr, acct.clone()))
            .collect()
    }

    pub fn log_summary(&self, height: Height) {
        info!(
            height,
            accounts = self.accounts.len(),
            validators = self.agg.validators.len(),
            staked = self.total_staked(),
            supply = self.total_supply(),
            burned = self.agg.burned,
            "ledger state"
        );
    }
}
