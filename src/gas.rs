//! Gas schedule and per-block gas metering.
//!
//! Costs are fixed per transaction kind plus a per-byte charge on the memo.
//! A block may not consume more than `block_gas_limit`.

use crate::types::{Transaction, TxKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GasError {
    #[error("gas limit exceeded: used {used} + cost {cost} > limit {limit}")]
    LimitExceeded { used: u64, cost: u64, limit: u64 },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasSchedule {
    pub transfer_base: u64,
    pub stake_base: u64,
    pub unstake_base: u64,
    /// Delegate and Undelegate.
    pub delegate_base: u64,
    /// CreateValidator and EditValidator.
    pub validator_base: u64,
    pub per_memo_byte: u64,
    pub block_gas_limit: u64,
}

impl Default for GasSchedule {
    fn default() -> Self {
        Self {
            transfer_base: 21_000,
            stake_base: 40_000,
            unstake_base: 40_000,
            delegate_base: 40_000,
            validator_base: 60_000,
            per_memo_byte: 16,
            block_gas_limit: 10_000_000,
        }
    }
}

impl GasSchedule {
    pub fn base_cost(&self, kind: &TxKind) -> u64 {
        match kind {
            TxKind::Transfer { .. } => self.transfer_base,
            TxKind::Stake { .. } => self.stake_base,
            TxKind::Unstake { .. } => self.unstake_base,
            TxKind::Delegate { .. } | TxKind::Undelegate { .. } => self.delegate_base,
            TxKind::CreateValidator { .. } | TxKind::EditValidator { .. } => self.validator_base,
        }
    }

    /// Pure function of kind and payload size.
    pub fn estimate_cost(&self, tx: &Transaction) -> u64 {
        let bytes = (tx.memo.len() as u64).saturating_mul(self.per_memo_byte);
        self.base_cost(&tx.kind).saturating_add(bytes)
    }

    /// Whether `tx` still fits a block that has already used `block_gas_used`.
    pub fn can_include(&self, block_gas_used: u64, tx: &Transaction) -> bool {
        block_gas_used
            .checked_add(self.estimate_cost(tx))
            .map(|total| total <= self.block_gas_limit)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GasMeter {
    pub limit: u64,
    pub used: u64,
}

impl GasMeter {
    pub fn new(limit: u64) -> Self {
        Self { limit, used: 0 }
    }

    /// Charge `cost`. On failure the meter is left unchanged.
    pub fn charge(&mut self, cost: u64) -> Result<(), GasError> {
        match self.used.checked_add(cost) {
            Some(new) if new <= self.limit => {
                self.used = new;
                Ok(())
            }
            _ => Err(GasError::LimitExceeded { used: self.used, cost, limit: self.limit }),
        }
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }
}
