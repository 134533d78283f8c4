//! Chain orchestrator.
//!
//! Owns the finalized ledger, the pending (validated, not yet final) blocks,
//! the mempool and the store, and wires them to the finality and slashing
//! managers.
//!
//! Block lifecycle: `Proposed -> Validated -> Voted -> Finalized`, or
//! `Rejected` at any step. Pending blocks carry their post-state; the
//! finalized ledger only moves when a block (and all its pending ancestors)
//! has been written to the store in one batch per block.
//!
//! Locks are always taken in the order `core -> finality -> slashing ->
//! observer`. Observers run under these locks and must not call back into
//! the chain.

use crate::config::{ChainConfig, ConfigError, ConsensusSection};
use crate::consensus::finality::{FinalityCertificate, FinalityError, FinalityManager};
use crate::consensus::messages::{verify_header_signature, ConsensusMsg, Vote};
use crate::consensus::validator_set::{proposer_seed, select_proposer, Validator, ValidatorSet};
use crate::crypto::{PublicKeyBytes, SignatureBytes, Signer};
use crate::evidence::Evidence;
use crate::execution::{build_block, verify_block, BlockError, BlockOutcome, BuildRequest};
use crate::ledger::{Account, Ledger, LedgerParams, PenaltyOutcome, ValidatorRecord};
use crate::mempool::{Mempool, MempoolError};
use crate::merkle::empty_root;
use crate::slashing::{EvidenceStatus, PenaltyRecord, SlashingManager, SubmitOutcome};
use crate::storage::{ChainStore, KvStore, StorageError};
use crate::types::{Address, Amount, Block, BlockHeader, Hash32, Height, SignedHeader, Transaction};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

const STATUS_CACHE: usize = 4_096;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error(transparent)]
    Block(#[from] BlockError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Finality(#[from] FinalityError),
    #[error(transparent)]
    Mempool(#[from] MempoolError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{signer} is not the proposer for height {height}")]
    NotProposer { height: Height, signer: Address },
    #[error("block {0} equivocates with a known block at its height")]
    Equivocation(Hash32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockStatus {
    Proposed,
    Validated,
    Voted,
    Finalized,
    Rejected,
}

/// Outbound side of the chain: networking and monitoring hook in here.
pub trait ChainObserver: Send {
    fn on_block_finalized(&mut self, _block: &Block, _cert: Option<&FinalityCertificate>) {}
    fn on_validator_penalized(&mut self, _penalty: &PenaltyRecord) {}
    fn broadcast_vote(&mut self, _vote: &Vote) {}
}

pub struct NoopObserver;

impl ChainObserver for NoopObserver {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SupplyStats {
    pub total_supply: Amount,
    pub total_staked: Amount,
    pub burned: Amount,
    pub fee_pool: Amount,
}

struct PendingBlock {
    block: Block,
    hash: Hash32,
    outcome: BlockOutcome,
}

struct Core {
    ledger: Ledger,
    finalized: SignedHeader,
    finalized_hash: Hash32,
    pending: Vec<PendingBlock>,
    statuses: LruCache<Hash32, BlockStatus>,
    snapshots: BTreeMap<Height, Arc<ValidatorSet>>,
    recent_headers: BTreeMap<Height, SignedHeader>,
    /// Blocks the local validator has voted for, by height.
    own_votes: BTreeMap<Height, Hash32>,
    mempool: Mempool,
    store: ChainStore,
}

impl Core {
    fn finalized_height(&self) -> Height {
        self.finalized.header.height
    }

    /// Height, hash and timestamp of the newest known block.
    fn head(&self) -> (Height, Hash32, u64) {
        match self.pending.last() {
            Some(p) => (p.block.height(), p.hash, p.block.header.timestamp),
            None => (self.finalized_height(), self.finalized_hash, self.finalized.header.timestamp),
        }
    }

    fn head_ledger(&self) -> &Ledger {
        self.pending.last().map(|p| &p.outcome.ledger).unwrap_or(&self.ledger)
    }

    fn hash_at(&self, height: Height) -> Option<Hash32> {
        if height == self.finalized_height() {
            return Some(self.finalized_hash);
        }
        self.pending
            .iter()
            .find(|p| p.block.height() == height)
            .map(|p| p.hash)
            .or_else(|| self.recent_headers.get(&height).map(|h| h.hash()))
    }

    fn header_at(&self, height: Height) -> Option<SignedHeader> {
        self.pending
            .iter()
            .find(|p| p.block.height() == height)
            .map(|p| p.block.signed_header())
            .or_else(|| self.recent_headers.get(&height).cloned())
    }

    fn proposer_for(&self, height: Height) -> Option<Validator> {
        let parent = self.hash_at(height.checked_sub(1)?)?;
        let vset = self.snapshots.get(&height)?;
        select_proposer(vset, height, &proposer_seed(&parent, height)).cloned()
    }

    fn set_status(&mut self, hash: Hash32, status: BlockStatus) {
        self.statuses.put(hash, status);
    }

    /// Drop every pending block above the finalized height.
    fn revert_to_finalized(&mut self) {
        for p in std::mem::take(&mut self.pending) {
            self.statuses.put(p.hash, BlockStatus::Rejected);
        }
        let keep = self.finalized_height() + 2;
        self.snapshots.split_off(&keep);
    }
}

/// Height-0 block committing to the genesis ledger.
pub fn genesis_block(ledger: &Ledger, timestamp: u64) -> Block {
    Block {
        header: BlockHeader {
            height: 0,
            parent: Hash32::zero(),
            tx_root: empty_root(),
            evidence_root: empty_root(),
            state_root: ledger.state_root(),
            gas_used: 0,
            proposer_pk: PublicKeyBytes::default(),
            timestamp,
        },
        signature: SignatureBytes::default(),
        txs: Vec::new(),
        evidence: Vec::new(),
    }
}

pub struct Blockchain {
    params: LedgerParams,
    consensus: ConsensusSection,
    validator: Option<Arc<dyn Signer>>,
    core: Mutex<Core>,
    finality: Mutex<FinalityManager>,
    slashing: Mutex<SlashingManager>,
    observer: Mutex<Box<dyn ChainObserver>>,
}

impl Blockchain {
    /// Resume from `kv` if it holds a chain, otherwise commit genesis from `cfg`.
    pub fn open(
        cfg: &ChainConfig,
        kv: Arc<dyn KvStore>,
        validator: Option<Arc<dyn Signer>>,
        observer: Box<dyn ChainObserver>,
    ) -> Result<Self, ChainError> {
        cfg.validate()?;
        let store = ChainStore::new(kv);
        let params = cfg.ledger_params();

        let (ledger, tip) = match store.tip()? {
            Some((height, hash)) => {
                let ledger = store.load_ledger()?;
                let block = store
                    .block(height)?
                    .ok_or_else(|| StorageError::Corrupt(format!("tip block {height} missing")))?;
                if block.hash() != hash {
                    return Err(StorageError::Corrupt(format!("tip hash mismatch at {height}")).into());
                }
                if ledger.state_root() != block.header.state_root {
                    return Err(StorageError::Corrupt(format!("ledger does not match state root at {height}")).into());
                }
                info!(height, hash = %hash, "chain restored");
                (ledger, block)
            }
            None => {
                let ledger = cfg.genesis_ledger()?;
                let genesis = genesis_block(&ledger, cfg.genesis.timestamp);
                store.commit_genesis(&genesis, &ledger)?;
                info!(hash = %genesis.hash(), supply = ledger.total_supply(), "genesis committed");
                (ledger, genesis)
            }
        };

        let height = tip.height();
        let hash = tip.hash();
        let mut finality = FinalityManager::new(height, hash);
        if let Some(cert) = store.latest_certificate(height)? {
            finality.restore_certificate(cert);
        }
        let next = Arc::new(ledger.validator_set(height + 1, params.min_validator_stake));
        finality.register_validator_set(next.clone());

        let mut snapshots = BTreeMap::new();
        snapshots.insert(height + 1, next);
        let mut recent_headers = BTreeMap::new();
        recent_headers.insert(height, tip.signed_header());

        let cap = NonZeroUsize::new(STATUS_CACHE).unwrap_or(NonZeroUsize::MIN);
        let mut statuses = LruCache::new(cap);
        statuses.put(hash, BlockStatus::Finalized);

        let core = Core {
            ledger,
            finalized: tip.signed_header(),
            finalized_hash: hash,
            pending: Vec::new(),
            statuses,
            snapshots,
            recent_headers,
            own_votes: BTreeMap::new(),
            mempool: Mempool::new(cfg.mempool.capacity),
            store,
        };

        Ok(Self {
            params,
            consensus: cfg.consensus.clone(),
            validator,
            core: Mutex::new(core),
            finality: Mutex::new(finality),
            slashing: Mutex::new(SlashingManager::new()),
            observer: Mutex::new(observer),
        })
    }

    pub fn params(&self) -> &LedgerParams {
        &self.params
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn finalized_height(&self) -> Height {
        self.core.lock().finalized_height()
    }

    pub fn is_finalized(&self, height: Height) -> bool {
        height <= self.finalized_height()
    }

    pub fn finalized_hash(&self) -> Hash32 {
        self.core.lock().finalized_hash
    }

    /// Newest known block, pending or final.
    pub fn head(&self) -> (Height, Hash32) {
        let (h, hash, _) = self.core.lock().head();
        (h, hash)
    }

    /// Account as of the last finalized block.
    pub fn account(&self, addr: &Address) -> Account {
        self.core.lock().ledger.account(addr)
    }

    pub fn balance(&self, addr: &Address) -> Amount {
        self.account(addr).balance
    }

    pub fn validator(&self, addr: &Address) -> Option<ValidatorRecord> {
        self.core.lock().ledger.validator(addr).cloned()
    }

    pub fn supply(&self) -> SupplyStats {
        let core = self.core.lock();
        SupplyStats {
            total_supply: core.ledger.total_supply(),
            total_staked: core.ledger.total_staked(),
            burned: core.ledger.burned(),
            fee_pool: core.ledger.fee_pool(),
        }
    }

    pub fn validator_set(&self, height: Height) -> Option<Arc<ValidatorSet>> {
        self.core.lock().snapshots.get(&height).cloned()
    }

    pub fn expected_proposer(&self, height: Height) -> Option<Address> {
        self.core.lock().proposer_for(height).map(|v| v.address)
    }

    pub fn block(&self, height: Height) -> Result<Option<Block>, ChainError> {
        let core = self.core.lock();
        if let Some(p) = core.pending.iter().find(|p| p.block.height() == height) {
            return Ok(Some(p.block.clone()));
        }
        Ok(core.store.block(height)?)
    }

    pub fn block_status(&self, hash: &Hash32) -> Option<BlockStatus> {
        self.core.lock().statuses.peek(hash).copied()
    }

    pub fn certificate(&self, height: Height) -> Result<Option<FinalityCertificate>, ChainError> {
        if let Some(c) = self.finality.lock().certificate(height) {
            return Ok(Some(c.clone()));
        }
        Ok(self.core.lock().store.certificate(height)?)
    }

    pub fn evidence_status(&self, id: &Hash32) -> Option<EvidenceStatus> {
        self.slashing.lock().status(id).cloned()
    }

    /// Evidence carried by a finalized block.
    pub fn committed_evidence(&self, id: &Hash32) -> Result<Option<Evidence>, ChainError> {
        Ok(self.core.lock().store.evidence(id)?)
    }

    pub fn mempool_len(&self) -> usize {
        self.core.lock().mempool.len()
    }

    // ── Inputs ───────────────────────────────────────────────────────────

    pub fn submit_transaction(&self, tx: Transaction) -> Result<(), ChainError> {
        let mut core = self.core.lock();
        let core = &mut *core;
        let hash = tx.hash();
        core.mempool.push(tx, &core.ledger, &self.params)?;
        debug!(tx = %hash, pending = core.mempool.len(), "transaction admitted");
        Ok(())
    }

    /// Build and sign the next block on top of the head. The block is not
    /// applied; feed it back through `on_block_received` like any peer block.
    pub fn propose_block(&self, signer: &dyn Signer, timestamp: u64) -> Result<Block, ChainError> {
        let mut core = self.core.lock();
        let (head, parent, parent_ts) = core.head();
        let height = head + 1;
        let expected = core.proposer_for(height).ok_or(BlockError::NoValidators(height))?;
        if expected.address != signer.address() {
            return Err(ChainError::NotProposer { height, signer: signer.address() });
        }

        let candidates = core.mempool.candidates();
        let evidence = self
            .slashing
            .lock()
            .pending_evidence(core.head_ledger(), self.consensus.max_evidence_per_block);
        let req = BuildRequest {
            height,
            parent,
            timestamp: timestamp.max(parent_ts),
            candidates: &candidates,
            evidence,
            max_txs: self.consensus.max_txs_per_block,
        };
        let (block, outcome) = build_block(signer, core.head_ledger(), req, &self.params)?;
        info!(
            height,
            block = %block.hash(),
            txs = block.txs.len(),
            evidence = block.evidence.len(),
            gas = outcome.gas_used,
            "block proposed"
        );
        core.set_status(block.hash(), BlockStatus::Proposed);
        Ok(block)
    }

    pub fn on_block_received(&self, block: Block) -> Result<BlockStatus, ChainError> {
        let hash = block.hash();
        let height = block.height();
        let mut core = self.core.lock();
        match core.statuses.peek(&hash).copied() {
            None | Some(BlockStatus::Proposed) => {}
            Some(known) => return Ok(known),
        }

        let outcome = match self.validate_block(&mut core, &block, hash) {
            Ok(outcome) => outcome,
            Err(ChainError::Block(e)) if e.depends_on_head() => {
                debug!(height, block = %hash, error = %e, "block not applicable to current head");
                return Err(e.into());
            }
            Err(e) => {
                warn!(height, block = %hash, error = %e, "block rejected");
                core.set_status(hash, BlockStatus::Rejected);
                return Err(e);
            }
        };

        let next = Arc::new(outcome.ledger.validator_set(height + 1, self.params.min_validator_stake));
        let voters = core.snapshots.get(&height).cloned();
        core.snapshots.insert(height + 1, next.clone());
        core.pending.push(PendingBlock { block, hash, outcome });
        core.set_status(hash, BlockStatus::Validated);
        debug!(height, block = %hash, "block validated");

        self.finality.lock().register_validator_set(next);

        if let Some(signer) = &self.validator {
            let in_set = voters.map(|v| v.contains(&signer.address())).unwrap_or(false);
            let prior = core.own_votes.get(&height).copied();
            if let Some(prior) = prior.filter(|p| *p != hash) {
                warn!(height, voted = %prior, block = %hash, "already voted at this height, not voting again");
            } else if in_set {
                let vote = Vote::sign(signer.as_ref(), height, hash);
                core.own_votes.insert(height, hash);
                core.set_status(hash, BlockStatus::Voted);
                let recorded = self.finality.lock().record_vote(&vote);
                if let Err(e) = recorded {
                    warn!(height, error = %e, "own vote not counted");
                }
                self.observer.lock().broadcast_vote(&vote);
            }
        }

        self.forward_finality_evidence(&core);
        self.try_commit(&mut core)?;
        Ok(core.statuses.peek(&hash).copied().unwrap_or(BlockStatus::Validated))
    }

    fn validate_block(&self, core: &mut Core, block: &Block, hash: Hash32) -> Result<BlockOutcome, ChainError> {
        let height = block.height();
        let (head, head_hash, head_ts) = core.head();

        if height <= head {
            if let Some(ev) = self.double_proposal(core, block, hash) {
                let outcome = self.slashing.lock().submit_evidence(ev, core.head_ledger());
                warn!(height, block = %hash, ?outcome, "double proposal detected");
                if height > core.finalized_height() {
                    core.revert_to_finalized();
                }
                return Err(ChainError::Equivocation(hash));
            }
            if height <= core.finalized_height() {
                return Err(BlockError::AlreadyFinalized(height).into());
            }
            return Err(BlockError::UnexpectedHeight { expected: head + 1, got: height }.into());
        }
        if height > head + 1 {
            return Err(BlockError::UnknownParent(height).into());
        }
        if block.header.parent != head_hash {
            return Err(BlockError::ParentMismatch { expected: head_hash, got: block.header.parent }.into());
        }
        if block.header.timestamp < head_ts {
            return Err(BlockError::TimestampRegression { parent: head_ts, got: block.header.timestamp }.into());
        }
        let expected = core.proposer_for(height).ok_or(BlockError::NoValidators(height))?;
        let got = block.header.proposer();
        if expected.address != got {
            return Err(BlockError::WrongProposer { expected: expected.address, got }.into());
        }
        Ok(verify_block(core.head_ledger(), block, &self.params)?)
    }

    /// Evidence when `block` is a second, validly signed block from the
    /// proposer of a block we already hold at the same height.
    fn double_proposal(&self, core: &Core, block: &Block, hash: Hash32) -> Option<Evidence> {
        let ours = core.header_at(block.height())?;
        if ours.hash() == hash || ours.header.proposer_pk != block.header.proposer_pk {
            return None;
        }
        verify_header_signature(&block.header, &block.signature).ok()?;
        Some(Evidence::double_proposal(ours, block.signed_header()))
    }

    pub fn on_vote_received(&self, vote: Vote) -> Result<bool, ChainError> {
        let (result, evidence) = {
            let mut fin = self.finality.lock();
            let r = fin.record_vote(&vote);
            (r, fin.take_evidence())
        };
        if !evidence.is_empty() {
            let core = self.core.lock();
            self.submit_all(&core, evidence);
        }
        match result {
            Ok(true) => {
                let mut core = self.core.lock();
                self.try_commit(&mut core)?;
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(e) => {
                debug!(height = vote.height, voter = %vote.voter(), error = %e, "vote rejected");
                Err(e.into())
            }
        }
    }

    pub fn on_evidence_received(&self, evidence: Evidence) -> SubmitOutcome {
        let core = self.core.lock();
        self.slashing.lock().submit_evidence(evidence, core.head_ledger())
    }

    /// Dispatch one inbound message.
    pub fn handle(&self, msg: ConsensusMsg) -> Result<(), ChainError> {
        match msg {
            ConsensusMsg::Block(b) => self.on_block_received(b).map(|_| ()),
            ConsensusMsg::Vote(v) => self.on_vote_received(v).map(|_| ()),
            ConsensusMsg::Evidence(e) => {
                self.on_evidence_received(e);
                Ok(())
            }
        }
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn forward_finality_evidence(&self, core: &Core) {
        let evidence = self.finality.lock().take_evidence();
        self.submit_all(core, evidence);
    }

    fn submit_all(&self, core: &Core, evidence: Vec<Evidence>) {
        if evidence.is_empty() {
            return;
        }
        let mut slashing = self.slashing.lock();
        for ev in evidence {
            let outcome = slashing.submit_evidence(ev, core.head_ledger());
            debug!(?outcome, "equivocation evidence forwarded");
        }
    }

    /// Commit pending blocks up to the finality manager's finalized height.
    fn try_commit(&self, core: &mut Core) -> Result<(), ChainError> {
        let (height, hash, cert) = {
            let fin = self.finality.lock();
            let h = fin.finalized_height();
            (h, fin.finalized_hash(), fin.certificate(h).cloned())
        };
        if height <= core.finalized_height() {
            return Ok(());
        }
        let Some(idx) = core.pending.iter().position(|p| p.block.height() == height) else {
            debug!(height, "finalized block not held yet");
            return Ok(());
        };
        if core.pending[idx].hash != hash {
            warn!(height, finalized = %hash, local = %core.pending[idx].hash, "local fork discarded");
            for p in core.pending.drain(idx..) {
                core.statuses.put(p.hash, BlockStatus::Rejected);
            }
            let keep = height + 1;
            core.snapshots.split_off(&keep);
            return Ok(());
        }

        for _ in 0..=idx {
            let is_certified = core.pending[0].block.height() == height;
            let cert_ref = if is_certified { cert.as_ref() } else { None };
            {
                let p = &core.pending[0];
                core.store.commit_block(&p.block, cert_ref, &p.outcome.ledger, &core.ledger)?;
            }
            let p = core.pending.remove(0);
            let h = p.block.height();
            core.ledger = p.outcome.ledger;
            core.finalized = p.block.signed_header();
            core.finalized_hash = p.hash;
            core.recent_headers.insert(h, p.block.signed_header());
            core.statuses.put(p.hash, BlockStatus::Finalized);
            core.mempool.on_finalized(h, &core.ledger);
            core.ledger.log_summary(h);

            let penalties = self.record_penalties(h, &p.outcome.penalties);
            let mut observer = self.observer.lock();
            for rec in &penalties {
                observer.on_validator_penalized(rec);
            }
            observer.on_block_finalized(&p.block, cert_ref);
            info!(
                height = h,
                block = %p.hash,
                txs = p.block.txs.len(),
                fees = p.outcome.fees,
                "block committed"
            );
        }

        let retain = self.consensus.vote_retention_heights;
        let floor = core.finalized_height().saturating_sub(retain);
        core.snapshots = core.snapshots.split_off(&floor);
        core.recent_headers = core.recent_headers.split_off(&floor);
        core.own_votes = core.own_votes.split_off(&floor);
        self.finality.lock().prune(retain);
        Ok(())
    }

    fn record_penalties(&self, height: Height, penalties: &[(Evidence, PenaltyOutcome)]) -> Vec<PenaltyRecord> {
        let mut slashing = self.slashing.lock();
        let mut out = Vec::new();
        for (ev, outcome) in penalties {
            slashing.record_committed(ev, outcome);
            if let PenaltyOutcome::Applied { offender, slashed, new_stake, jailed_until } = outcome {
                out.push(PenaltyRecord {
                    evidence_id: ev.id(),
                    offender: *offender,
                    height,
                    slashed: *slashed,
                    new_stake: *new_stake,
                    jailed_until: *jailed_until,
                });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ed25519::Ed25519Keypair;
    use crate::storage::MemKvStore;

    fn single_node() -> (Blockchain, Arc<Ed25519Keypair>) {
        let cfg = ChainConfig::default();
        let key = Arc::new(Ed25519Keypair::from_label("validator-0"));
        let chain = Blockchain::open(&cfg, Arc::new(MemKvStore::new()), Some(key.clone() as Arc<dyn Signer>), Box::new(NoopObserver)).unwrap();
        (chain, key)
    }

    #[test]
    fn genesis_is_final() {
        let (chain, _) = single_node();
        assert_eq!(chain.finalized_height(), 0);
        assert_eq!(chain.block_status(&chain.finalized_hash()), Some(BlockStatus::Finalized));
        assert_eq!(chain.supply().total_supply, 101_000_000);
    }

    #[test]
    fn single_validator_finalizes_own_block() {
        let (chain, key) = single_node();
        let block = chain.propose_block(key.as_ref(), 10).unwrap();
        let hash = block.hash();
        assert_eq!(chain.block_status(&hash), Some(BlockStatus::Proposed));
        assert_eq!(chain.on_block_received(block.clone()).unwrap(), BlockStatus::Finalized);
        assert_eq!(chain.finalized_height(), 1);
        assert!(chain.certificate(1).unwrap().is_some());
        // redelivery is a no-op
        assert_eq!(chain.on_block_received(block).unwrap(), BlockStatus::Finalized);
    }

    #[test]
    fn wrong_proposer_cannot_propose() {
        let (chain, _) = single_node();
        let other = Ed25519Keypair::from_label("someone");
        assert!(matches!(chain.propose_block(&other, 1), Err(ChainError::NotProposer { height: 1, .. })));
    }
}
