/// Pending transaction pool.
///
/// - Per-sender nonce-ordered queues
/// - Admission checks: signature, chain id, stale nonce, gas allowance
/// - Replace-by-fee: same sender and nonce with a fee at least 10% higher
/// - TTL: transactions expire after `TTL_BLOCKS` finalized blocks
/// - Eviction: when full, the lowest-fee tx of another sender is dropped
///
/// Transactions stay in the pool until a finalized block consumes their
/// nonce, so a block that never finalizes does not lose them.
use crate::crypto::ed25519::verify;
use crate::crypto::tx::tx_sign_bytes;
use crate::ledger::{Ledger, LedgerParams};
use crate::types::{Address, Hash32, Height, Transaction};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

const TTL_BLOCKS: u64 = 300;
const MAX_PENDING_PER_SENDER: usize = 64;
const RBF_BUMP_PERCENT: u64 = 10;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("wrong chain id {0}")]
    WrongChain(u64),
    #[error("transaction already pending")]
    Duplicate,
    #[error("stale nonce {got}, account is at {expected}")]
    StaleNonce { expected: u64, got: u64 },
    #[error("gas limit {limit} below required {required}")]
    InsufficientGas { required: u64, limit: u64 },
    #[error("replacement fee too low: need at least {required}")]
    FeeTooLow { required: u64 },
    #[error("sender queue full")]
    SenderLimit,
    #[error("mempool full")]
    Full,
}

#[derive(Clone, Debug)]
struct PendingTx {
    tx: Transaction,
    hash: Hash32,
    seq: u64,
    inserted_height: Height,
}

impl PendingTx {
    fn is_expired(&self, current_height: Height) -> bool {
        current_height.saturating_sub(self.inserted_height) > TTL_BLOCKS
    }
}

#[derive(Default, Debug, Clone)]
pub struct MempoolMetrics {
    pub admitted: u64,
    pub rejected: u64,
    pub evicted: u64,
    pub expired: u64,
    pub rbf_replaced: u64,
    pub committed: u64,
}

pub struct Mempool {
    cap: usize,
    current_height: Height,
    next_seq: u64,
    queues: HashMap<Address, BTreeMap<u64, PendingTx>>,
    hashes: HashSet<Hash32>,
    pub metrics: MempoolMetrics,
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new(50_000)
    }
}

impl Mempool {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            current_height: 0,
            next_seq: 0,
            queues: HashMap::new(),
            hashes: HashSet::new(),
            metrics: MempoolMetrics::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn contains(&self, hash: &Hash32) -> bool {
        self.hashes.contains(hash)
    }

    /// Admit `tx` against the finalized `ledger`. `Ok(true)` for a new entry,
    /// `Ok(false)` when it replaced a pending tx with the same nonce.
    pub fn push(&mut self, tx: Transaction, ledger: &Ledger, params: &LedgerParams) -> Result<bool, MempoolError> {
        let res = self.admit(tx, ledger, params);
        if res.is_err() {
            self.metrics.rejected += 1;
        }
        res
    }

    fn admit(&mut self, tx: Transaction, ledger: &Ledger, params: &LedgerParams) -> Result<bool, MempoolError> {
        let hash = tx.hash();
        if self.hashes.contains(&hash) {
            return Err(MempoolError::Duplicate);
        }
        if tx.chain_id != params.chain_id {
            return Err(MempoolError::WrongChain(tx.chain_id));
        }
        let required = params.gas.estimate_cost(&tx);
        if tx.gas_limit < required {
            return Err(MempoolError::InsufficientGas { required, limit: tx.gas_limit });
        }
        let sender = tx.sender();
        let expected = ledger.nonce(&sender);
        if tx.nonce < expected {
            return Err(MempoolError::StaleNonce { expected, got: tx.nonce });
        }
        verify(&tx.sender_pk, &tx_sign_bytes(&tx), &tx.signature).map_err(|_| MempoolError::InvalidSignature)?;

        let seq = self.next_seq;
        let ptx = PendingTx { tx, hash, seq, inserted_height: self.current_height };

        if let Some(existing) = self.queues.get(&sender).and_then(|q| q.get(&ptx.tx.nonce)) {
            let old_fee = existing.tx.fee;
            let required = old_fee.saturating_add((old_fee.saturating_mul(RBF_BUMP_PERCENT) / 100).max(1));
            if ptx.tx.fee < required {
                return Err(MempoolError::FeeTooLow { required });
            }
            let old_hash = existing.hash;
            self.hashes.remove(&old_hash);
            self.hashes.insert(hash);
            self.next_seq += 1;
            self.queues.entry(sender).or_default().insert(ptx.tx.nonce, ptx);
            self.metrics.rbf_replaced += 1;
            return Ok(false);
        }

        if self.queues.get(&sender).map(|q| q.len()).unwrap_or(0) >= MAX_PENDING_PER_SENDER {
            return Err(MempoolError::SenderLimit);
        }
        if self.len() >= self.cap && !self.evict_worst(&sender) {
            return Err(MempoolError::Full);
        }

        self.hashes.insert(hash);
        self.next_seq += 1;
        self.queues.entry(sender).or_default().insert(ptx.tx.nonce, ptx);
        self.metrics.admitted += 1;
        Ok(true)
    }

    fn evict_worst(&mut self, protect: &Address) -> bool {
        let worst = self
            .queues
            .iter()
            .filter(|(s, _)| *s != protect)
            .filter_map(|(s, q)| q.iter().next_back().map(|(n, p)| (p.tx.fee, *s, *n)))
            .min_by_key(|(fee, _, _)| *fee);
        let Some((_, sender, nonce)) = worst else { return false };
        self.remove_entry(&sender, nonce);
        self.metrics.evicted += 1;
        true
    }

    fn remove_entry(&mut self, sender: &Address, nonce: u64) {
        if let Some(q) = self.queues.get_mut(sender) {
            if let Some(p) = q.remove(&nonce) {
                self.hashes.remove(&p.hash);
            }
            if q.is_empty() {
                self.queues.remove(sender);
            }
        }
    }

    /// Every pending tx in arrival order. Block building picks from these.
    pub fn candidates(&self) -> Vec<Transaction> {
        let mut all: Vec<&PendingTx> = self.queues.values().flat_map(|q| q.values()).collect();
        all.sort_by_key(|p| p.seq);
        all.into_iter().map(|p| p.tx.clone()).collect()
    }

    /// Drop everything the finalized `ledger` has consumed and expire old
    /// entries. Call after each finalized block.
    pub fn on_finalized(&mut self, height: Height, ledger: &Ledger) {
        self.current_height = height;
        let mut dropped = Vec::new();
        let mut committed = 0u64;
        let mut expired = 0u64;
        for (sender, q) in self.queues.iter_mut() {
            let floor = ledger.nonce(sender);
            q.retain(|&nonce, p| {
                if nonce < floor {
                    committed += 1;
                    dropped.push(p.hash);
                    false
                } else if p.is_expired(height) {
                    expired += 1;
                    dropped.push(p.hash);
                    false
                } else {
                    true
                }
            });
        }
        self.queues.retain(|_, q| !q.is_empty());
        for h in dropped {
            self.hashes.remove(&h);
        }
        self.metrics.committed += committed;
        self.metrics.expired += expired;
    }
}
