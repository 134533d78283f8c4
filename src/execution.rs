//! Block building, execution and verification.
//!
//! Execution order inside a block is fixed:
//! 1. `begin_block`: matured unbonding is released, expired jails lifted.
//! 2. Evidence, in block order.
//! 3. Transactions, in block order, under the block gas limit.
//! 4. The fee pool is paid to the proposer.
//!
//! Everything runs on a clone of the parent ledger; the caller only receives
//! the new ledger when the whole block succeeded.

use crate::consensus::messages::{sign_header, verify_header_signature};
use crate::crypto::ed25519::verify;
use crate::crypto::tx::tx_sign_bytes;
use crate::crypto::Signer;
use crate::evidence::Evidence;
use crate::gas::{GasError, GasMeter};
use crate::ledger::{Ledger, LedgerError, LedgerParams, PenaltyOutcome};
use crate::merkle::{evidence_root, tx_root};
use crate::slashing::{penalize, SlashingError};
use crate::types::{Address, Block, BlockHeader, Hash32, Height, Transaction, TxReceipt};
use rayon::prelude::*;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::debug;

/// Below this many transactions signatures are checked inline.
const PARALLEL_VERIFY_THRESHOLD: usize = 16;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("unexpected height: expected {expected}, got {got}")]
    UnexpectedHeight { expected: Height, got: Height },
    #[error("parent mismatch: expected {expected}, got {got}")]
    ParentMismatch { expected: Hash32, got: Hash32 },
    #[error("timestamp {got} is before parent timestamp {parent}")]
    TimestampRegression { parent: u64, got: u64 },
    #[error("no eligible validators at height {0}")]
    NoValidators(Height),
    #[error("proposer {got} is not the selected proposer {expected}")]
    WrongProposer { expected: Address, got: Address },
    #[error("proposer signature invalid")]
    BadProposerSignature,
    #[error("tx root mismatch: header {header}, computed {computed}")]
    TxRootMismatch { header: Hash32, computed: Hash32 },
    #[error("evidence root mismatch: header {header}, computed {computed}")]
    EvidenceRootMismatch { header: Hash32, computed: Hash32 },
    #[error("state root mismatch: header {header}, computed {computed}")]
    StateRootMismatch { header: Hash32, computed: Hash32 },
    #[error("gas used mismatch: header {header}, computed {computed}")]
    GasUsedMismatch { header: u64, computed: u64 },
    #[error(transparent)]
    Gas(#[from] GasError),
    #[error("duplicate transaction {0} in block")]
    DuplicateTransaction(Hash32),
    #[error("transaction {index} invalid: {source}")]
    Transaction { index: usize, source: LedgerError },
    #[error("evidence {index} invalid: {source}")]
    Evidence { index: usize, source: SlashingError },
    #[error("height {0} is already finalized")]
    AlreadyFinalized(Height),
    #[error("unknown parent for height {0}")]
    UnknownParent(Height),
}

impl BlockError {
    /// Errors that only reflect the receiver's current head. The same block
    /// may become valid once the missing parent arrives or the head reverts.
    pub fn depends_on_head(&self) -> bool {
        matches!(
            self,
            BlockError::UnknownParent(_)
                | BlockError::UnexpectedHeight { .. }
                | BlockError::ParentMismatch { .. }
                | BlockError::NoValidators(_)
        )
    }
}

/// Result of executing a block body against a parent ledger.
#[derive(Clone, Debug)]
pub struct BlockOutcome {
    pub ledger: Ledger,
    pub receipts: Vec<TxReceipt>,
    pub gas_used: u64,
    pub fees: u64,
    pub penalties: Vec<(Evidence, PenaltyOutcome)>,
}

/// Steps 1 and 2: housekeeping and evidence.
fn prepare(
    prev: &Ledger,
    height: Height,
    evidence: &[Evidence],
    params: &LedgerParams,
) -> Result<(Ledger, Vec<(Evidence, PenaltyOutcome)>), BlockError> {
    let mut working = prev.clone();
    working.begin_block(height);
    let mut penalties = Vec::with_capacity(evidence.len());
    let mut seen = BTreeSet::new();
    for (index, ev) in evidence.iter().enumerate() {
        if !seen.insert(ev.id()) {
            continue;
        }
        let outcome = penalize(&mut working, ev, params, height)
            .map_err(|source| BlockError::Evidence { index, source })?;
        penalties.push((ev.clone(), outcome));
    }
    Ok((working, penalties))
}

fn verify_signatures(txs: &[Transaction]) -> Result<(), BlockError> {
    let check = |(index, tx): (usize, &Transaction)| {
        verify(&tx.sender_pk, &tx_sign_bytes(tx), &tx.signature)
            .map_err(|_| BlockError::Transaction { index, source: LedgerError::InvalidSignature })
    };
    if txs.len() > PARALLEL_VERIFY_THRESHOLD {
        txs.par_iter().enumerate().try_for_each(check)
    } else {
        txs.iter().enumerate().try_for_each(check)
    }
}

/// Execute a block body. Fails on the first invalid transaction or evidence.
pub fn execute_block(
    prev: &Ledger,
    height: Height,
    proposer: &Address,
    txs: &[Transaction],
    evidence: &[Evidence],
    params: &LedgerParams,
) -> Result<BlockOutcome, BlockError> {
    let mut seen = BTreeSet::new();
    for tx in txs {
        let h = tx.hash();
        if !seen.insert(h) {
            return Err(BlockError::DuplicateTransaction(h));
        }
    }
    verify_signatures(txs)?;

    let (mut working, penalties) = prepare(prev, height, evidence, params)?;
    let mut meter = GasMeter::new(params.gas.block_gas_limit);
    let mut receipts = Vec::with_capacity(txs.len());
    for (index, tx) in txs.iter().enumerate() {
        meter.charge(params.gas.estimate_cost(tx))?;
        let receipt = working
            .apply_verified(tx, params)
            .map_err(|source| BlockError::Transaction { index, source })?;
        receipts.push(receipt);
    }
    let fees = working.pay_fees(proposer);
    Ok(BlockOutcome { ledger: working, receipts, gas_used: meter.used, fees, penalties })
}

/// Pick transactions for a new block from `candidates` (arrival order).
///
/// Highest fee first, ties by arrival. Each candidate is dry-run against a
/// scratch ledger: future nonces are retried on the next pass, other failures
/// are dropped, and selection ends at the first candidate that would push the
/// block past its gas limit.
pub fn select_transactions(
    base: &Ledger,
    candidates: &[Transaction],
    params: &LedgerParams,
    max_txs: usize,
) -> Vec<Transaction> {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|a, b| candidates[*b].fee.cmp(&candidates[*a].fee).then(a.cmp(b)));

    let mut scratch = base.clone();
    let mut used = 0u64;
    let mut done = vec![false; candidates.len()];
    let mut picked = Vec::new();

    'passes: loop {
        let mut progressed = false;
        for &i in &order {
            if done[i] {
                continue;
            }
            if picked.len() >= max_txs {
                break 'passes;
            }
            let tx = &candidates[i];
            if !params.gas.can_include(used, tx) {
                break 'passes;
            }
            match scratch.apply_transaction(tx, params) {
                Ok(receipt) => {
                    used += receipt.gas_used;
                    done[i] = true;
                    picked.push(tx.clone());
                    progressed = true;
                }
                Err(e) if e.is_future_nonce() => {}
                Err(e) => {
                    debug!(tx = %tx.hash(), error = %e, "candidate dropped");
                    done[i] = true;
                }
            }
        }
        if !progressed {
            break;
        }
    }
    picked
}

/// Everything a proposer needs to assemble a block.
pub struct BuildRequest<'a> {
    pub height: Height,
    pub parent: Hash32,
    pub timestamp: u64,
    pub candidates: &'a [Transaction],
    pub evidence: Vec<Evidence>,
    pub max_txs: usize,
}

pub fn build_block<S: Signer + ?Sized>(
    signer: &S,
    prev: &Ledger,
    req: BuildRequest<'_>,
    params: &LedgerParams,
) -> Result<(Block, BlockOutcome), BlockError> {
    let (prepared, _) = prepare(prev, req.height, &req.evidence, params)?;
    let txs = select_transactions(&prepared, req.candidates, params, req.max_txs);

    let proposer_pk = signer.public_key();
    let outcome = execute_block(prev, req.height, &proposer_pk.address(), &txs, &req.evidence, params)?;
    let header = BlockHeader {
        height: req.height,
        parent: req.parent,
        tx_root: tx_root(&txs),
        evidence_root: evidence_root(&req.evidence),
        state_root: outcome.ledger.state_root(),
        gas_used: outcome.gas_used,
        proposer_pk,
        timestamp: req.timestamp,
    };
    let signature = sign_header(signer, &header);
    Ok((Block { header, signature, txs, evidence: req.evidence }, outcome))
}

/// Check a block's own commitments and re-execute it.
///
/// The roots are compared before anything runs, so a block with a wrong
/// tx root or evidence root is rejected without executing a single tx.
pub fn verify_block(prev: &Ledger, block: &Block, params: &LedgerParams) -> Result<BlockOutcome, BlockError> {
    verify_header_signature(&block.header, &block.signature).map_err(|_| BlockError::BadProposerSignature)?;

    let computed = tx_root(&block.txs);
    if computed != block.header.tx_root {
        return Err(BlockError::TxRootMismatch { header: block.header.tx_root, computed });
    }
    let computed = evidence_root(&block.evidence);
    if computed != block.header.evidence_root {
        return Err(BlockError::EvidenceRootMismatch { header: block.header.evidence_root, computed });
    }

    let outcome = execute_block(
        prev,
        block.header.height,
        &block.header.proposer(),
        &block.txs,
        &block.evidence,
        params,
    )?;
    if outcome.gas_used != block.header.gas_used {
        return Err(BlockError::GasUsedMismatch { header: block.header.gas_used, computed: outcome.gas_used });
    }
    let computed = outcome.ledger.state_root();
    if computed != block.header.state_root {
        return Err(BlockError::StateRootMismatch { header: block.header.state_root, computed });
    }
    Ok(outcome)
}
