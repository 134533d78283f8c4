//! End-to-end tests for the chain orchestrator.
//!
//! Every validator key lives in-process: `validator-0` is the local node
//! (votes automatically), the others vote through `on_vote_received`.
//!
//! Run with: cargo test --test integration

use std::sync::{Arc, Mutex};
use unicrium::config::{ChainConfig, GenesisValidator};
use unicrium::consensus::messages::sign_header;
use unicrium::consensus::{FinalityCertificate, FinalityError, Vote};
use unicrium::crypto::ed25519::Ed25519Keypair;
use unicrium::crypto::tx::sign_tx;
use unicrium::crypto::{PublicKeyBytes, SignatureBytes, Signer};
use unicrium::evidence::Evidence;
use unicrium::execution::{build_block, BlockError, BuildRequest};
use unicrium::ledger::{LedgerError, ValidatorStatus};
use unicrium::slashing::{EvidenceStatus, PenaltyRecord, RejectReason, SubmitOutcome};
use unicrium::storage::{FileKvStore, KvStore, MemKvStore};
use unicrium::types::{hash_bytes, Address, Block, Height, Transaction, TxKind};
use unicrium::{BlockStatus, Blockchain, ChainError, ChainObserver};

// ── Recording observer ────────────────────────────────────────────────────

#[derive(Default)]
struct Events {
    finalized: Vec<Height>,
    certified: Vec<Height>,
    penalized: Vec<PenaltyRecord>,
    broadcast_votes: usize,
}

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Events>>);

impl ChainObserver for Recorder {
    fn on_block_finalized(&mut self, block: &Block, cert: Option<&FinalityCertificate>) {
        let mut ev = self.0.lock().unwrap();
        ev.finalized.push(block.height());
        if cert.is_some() {
            ev.certified.push(block.height());
        }
    }
    fn on_validator_penalized(&mut self, penalty: &PenaltyRecord) {
        self.0.lock().unwrap().penalized.push(penalty.clone());
    }
    fn broadcast_vote(&mut self, _vote: &Vote) {
        self.0.lock().unwrap().broadcast_votes += 1;
    }
}

// ── Devnet harness ────────────────────────────────────────────────────────

fn config(validators: usize) -> ChainConfig {
    let mut cfg = ChainConfig::default();
    cfg.genesis.validators = (0..validators)
        .map(|i| GenesisValidator {
            public_key: None,
            label: Some(format!("validator-{i}")),
            stake: 1_000_000,
            balance: 0,
        })
        .collect();
    cfg
}

struct Devnet {
    chain: Blockchain,
    keys: Vec<Arc<Ed25519Keypair>>,
    events: Recorder,
}

impl Devnet {
    fn open(cfg: &ChainConfig, kv: Arc<dyn KvStore>) -> Self {
        let keys: Vec<Arc<Ed25519Keypair>> = cfg
            .genesis
            .validators
            .iter()
            .map(|v| Arc::new(Ed25519Keypair::from_label(v.label.as_deref().unwrap())))
            .collect();
        let events = Recorder::default();
        let local = keys[0].clone() as Arc<dyn Signer>;
        let chain = Blockchain::open(cfg, kv, Some(local), Box::new(events.clone())).unwrap();
        Self { chain, keys, events }
    }

    fn new(validators: usize) -> Self {
        Self::open(&config(validators), Arc::new(MemKvStore::new()))
    }

    fn key_of(&self, addr: &Address) -> &Ed25519Keypair {
        self.keys.iter().find(|k| k.address() == *addr).expect("validator key")
    }

    fn next_proposer(&self) -> &Ed25519Keypair {
        let height = self.chain.head().0 + 1;
        let addr = self.chain.expected_proposer(height).expect("proposer");
        self.key_of(&addr)
    }

    fn propose(&self, timestamp: u64) -> Block {
        self.chain.propose_block(self.next_proposer(), timestamp).unwrap()
    }

    /// Votes from every remote validator in the block's snapshot.
    fn remote_votes(&self, block: &Block) {
        let vset = self.chain.validator_set(block.height()).unwrap();
        for k in &self.keys[1..] {
            if vset.contains(&k.address()) {
                self.chain.on_vote_received(Vote::sign(k.as_ref(), block.height(), block.hash())).unwrap();
            }
        }
    }

    fn step(&self, timestamp: u64) -> Block {
        let block = self.propose(timestamp);
        self.chain.on_block_received(block.clone()).unwrap();
        self.remote_votes(&block);
        block
    }
}

fn transfer(from: &Ed25519Keypair, nonce: u64, to: Address, amount: u64, fee: u64) -> Transaction {
    sign_tx(
        from,
        Transaction {
            chain_id: 1,
            sender_pk: PublicKeyBytes::default(),
            nonce,
            fee,
            gas_limit: 21_000,
            kind: TxKind::Transfer { to, amount },
            memo: Vec::new(),
            signature: SignatureBytes::default(),
        },
    )
}

fn signed(from: &Ed25519Keypair, nonce: u64, kind: TxKind) -> Transaction {
    sign_tx(
        from,
        Transaction {
            chain_id: 1,
            sender_pk: PublicKeyBytes::default(),
            nonce,
            fee: 0,
            gas_limit: 60_000,
            kind,
            memo: Vec::new(),
            signature: SignatureBytes::default(),
        },
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[test]
fn genesis_transfer_end_to_end() {
    let net = Devnet::new(1);
    let founder = Ed25519Keypair::from_label("founder");
    let faucet = Ed25519Keypair::from_label("faucet").address();
    let proposer = net.keys[0].address();

    let tx = transfer(&founder, 0, faucet, 500, 1);
    net.chain.submit_transaction(tx.clone()).unwrap();
    let block = net.step(1);
    assert_eq!(block.txs, vec![tx.clone()]);
    assert_eq!(net.chain.block_status(&block.hash()), Some(BlockStatus::Finalized));

    assert_eq!(net.chain.balance(&founder.address()), 9_999_499);
    assert_eq!(net.chain.balance(&faucet), 1_000_500);
    assert_eq!(net.chain.account(&founder.address()).nonce, 1);
    assert_eq!(net.chain.balance(&proposer), 1);
    assert_eq!(net.chain.supply().total_supply, 101_000_000);

    // the same transaction again is a replay
    assert!(matches!(
        net.chain.submit_transaction(tx),
        Err(ChainError::Mempool(unicrium::mempool::MempoolError::StaleNonce { expected: 1, got: 0 }))
    ));
    assert_eq!(net.chain.mempool_len(), 0);
    assert_eq!(net.events.0.lock().unwrap().finalized, vec![1]);
}

#[test]
fn ledger_replay_is_nonce_mismatch() {
    let cfg = config(1);
    let mut ledger = cfg.genesis_ledger().unwrap();
    let founder = Ed25519Keypair::from_label("founder");
    let tx = transfer(&founder, 0, Address([9; 20]), 500, 1);
    ledger.apply_transaction(&tx, &cfg.ledger_params()).unwrap();
    let before = ledger.clone();
    assert_eq!(
        ledger.apply_transaction(&tx, &cfg.ledger_params()),
        Err(LedgerError::NonceMismatch { expected: 1, got: 0 })
    );
    assert_eq!(ledger, before);
}

#[test]
fn bad_tx_root_rejected_without_mutation() {
    let net = Devnet::new(1);
    let founder = Ed25519Keypair::from_label("founder");
    net.chain.submit_transaction(transfer(&founder, 0, Address([7; 20]), 10, 1)).unwrap();

    let mut block = net.propose(1);
    block.header.tx_root = hash_bytes(b"not the tx list");
    block.signature = sign_header(net.keys[0].as_ref(), &block.header);
    let hash = block.hash();

    let err = net.chain.on_block_received(block).unwrap_err();
    assert!(matches!(err, ChainError::Block(BlockError::TxRootMismatch { .. })));
    assert_eq!(net.chain.block_status(&hash), Some(BlockStatus::Rejected));
    assert_eq!(net.chain.head().0, 0);
    assert_eq!(net.chain.balance(&founder.address()), 10_000_000);

    // the transaction is still pending and lands in the next honest block
    let good = net.step(2);
    assert_eq!(good.txs.len(), 1);
    assert_eq!(net.chain.finalized_height(), 1);
}

#[test]
fn block_ahead_of_head_is_accepted_once_parent_arrives() {
    let source = Devnet::new(1);
    let b1 = source.step(1);
    let b2 = source.step(2);
    assert_eq!(source.chain.finalized_height(), 2);

    let net = Devnet::new(1);
    assert!(matches!(
        net.chain.on_block_received(b2.clone()),
        Err(ChainError::Block(BlockError::UnknownParent(2)))
    ));
    assert_eq!(net.chain.block_status(&b2.hash()), None);

    assert_eq!(net.chain.on_block_received(b1).unwrap(), BlockStatus::Finalized);
    assert_eq!(net.chain.on_block_received(b2.clone()).unwrap(), BlockStatus::Finalized);
    assert_eq!(net.chain.finalized_height(), 2);
    assert_eq!(net.chain.finalized_hash(), b2.hash());
}

#[test]
fn finality_needs_two_thirds_and_is_sticky() {
    let net = Devnet::new(4);
    let block = net.propose(1);
    let hash = block.hash();
    assert_eq!(net.chain.on_block_received(block).unwrap(), BlockStatus::Voted);
    assert_eq!(net.events.0.lock().unwrap().broadcast_votes, 1);

    assert!(!net.chain.on_vote_received(Vote::sign(net.keys[1].as_ref(), 1, hash)).unwrap());
    assert_eq!(net.chain.finalized_height(), 0);
    assert!(net.chain.on_vote_received(Vote::sign(net.keys[2].as_ref(), 1, hash)).unwrap());
    assert_eq!(net.chain.finalized_height(), 1);
    assert_eq!(net.chain.finalized_hash(), hash);

    let cert = net.chain.certificate(1).unwrap().unwrap();
    assert_eq!(cert.signed_power, 3_000_000);
    assert_eq!(cert.total_power, 4_000_000);
    cert.verify(&net.chain.validator_set(1).unwrap()).unwrap();

    let conflicting = Vote::sign(net.keys[3].as_ref(), 1, hash_bytes(b"other"));
    assert!(matches!(
        net.chain.on_vote_received(conflicting),
        Err(ChainError::Finality(FinalityError::ConflictsWithFinalized { height: 1, .. }))
    ));
    assert_eq!(net.chain.finalized_hash(), hash);
    assert_eq!(net.events.0.lock().unwrap().certified, vec![1]);
}

#[test]
fn votes_before_block_are_held() {
    let net = Devnet::new(4);
    let block = net.propose(1);
    // remote votes arrive first; finality waits for the block itself
    for k in &net.keys[1..] {
        net.chain.on_vote_received(Vote::sign(k.as_ref(), 1, block.hash())).unwrap();
    }
    assert_eq!(net.chain.finalized_height(), 0);
    assert_eq!(net.chain.on_block_received(block).unwrap(), BlockStatus::Finalized);
    assert_eq!(net.chain.finalized_height(), 1);
}

#[test]
fn chain_extends_over_many_heights() {
    let net = Devnet::new(3);
    let founder = Ed25519Keypair::from_label("founder");
    for h in 0..12u64 {
        net.chain.submit_transaction(transfer(&founder, h, Address([3; 20]), 1, 1)).unwrap();
        net.step(h + 1);
    }
    assert_eq!(net.chain.finalized_height(), 12);
    assert_eq!(net.chain.balance(&Address([3; 20])), 12);
    assert_eq!(net.chain.supply().total_supply, 103_000_000);
    let b5 = net.chain.block(5).unwrap().unwrap();
    assert_eq!(b5.header.parent, net.chain.block(4).unwrap().unwrap().hash());
}

#[test]
fn double_vote_slashes_once() {
    let net = Devnet::new(4);
    let offender = net.keys[1].clone();
    let block = net.propose(1);
    net.chain.on_block_received(block.clone()).unwrap();

    let honest = Vote::sign(offender.as_ref(), 1, block.hash());
    let other = Vote::sign(offender.as_ref(), 1, hash_bytes(b"fork"));
    assert!(!net.chain.on_vote_received(honest.clone()).unwrap());
    assert!(matches!(
        net.chain.on_vote_received(other.clone()),
        Err(ChainError::Finality(FinalityError::Equivocation { .. }))
    ));
    let evidence = Evidence::double_vote(honest, other);
    assert_eq!(net.chain.evidence_status(&evidence.id()), Some(EvidenceStatus::Verified));

    net.chain.on_vote_received(Vote::sign(net.keys[2].as_ref(), 1, block.hash())).unwrap();
    assert_eq!(net.chain.finalized_height(), 1);

    // the next block carries the evidence
    let b2 = net.step(2);
    assert_eq!(b2.evidence, vec![evidence.clone()]);
    assert_eq!(net.chain.finalized_height(), 2);
    assert_eq!(net.chain.account(&offender.address()).staked, 500_000);
    assert_eq!(net.chain.supply().burned, 500_000);

    // resubmitting changes nothing
    for _ in 0..3 {
        assert_eq!(net.chain.on_evidence_received(evidence.clone()), SubmitOutcome::Rejected(RejectReason::Duplicate));
    }
    net.step(3);
    assert_eq!(net.chain.account(&offender.address()).staked, 500_000);
    assert!(matches!(
        net.chain.evidence_status(&evidence.id()),
        Some(EvidenceStatus::Penalized { slashed: 500_000, new_stake: 500_000 })
    ));

    assert_eq!(net.chain.committed_evidence(&evidence.id()).unwrap(), Some(evidence.clone()));

    let penalized = &net.events.0.lock().unwrap().penalized;
    assert_eq!(penalized.len(), 1);
    assert_eq!(penalized[0].offender, offender.address());
    assert_eq!(penalized[0].jailed_until, 2 + 100);
    assert!(!net.chain.validator_set(3).unwrap().contains(&offender.address()));
}

#[test]
fn double_proposal_is_evidence() {
    let net = Devnet::new(4);
    let cfg = config(4);
    let genesis_hash = net.chain.finalized_hash();
    let proposer = net.next_proposer();

    let first = net.propose(1);
    assert_eq!(net.chain.on_block_received(first.clone()).unwrap(), BlockStatus::Voted);

    let genesis = cfg.genesis_ledger().unwrap();
    let req = BuildRequest {
        height: 1,
        parent: genesis_hash,
        timestamp: 2,
        candidates: &[],
        evidence: Vec::new(),
        max_txs: 16,
    };
    let (second, _) = build_block(proposer, &genesis, req, &cfg.ledger_params()).unwrap();
    assert_ne!(first.hash(), second.hash());

    assert!(matches!(net.chain.on_block_received(second.clone()), Err(ChainError::Equivocation(_))));
    let evidence = Evidence::double_proposal(first.signed_header(), second.signed_header());
    assert_eq!(net.chain.evidence_status(&evidence.id()), Some(EvidenceStatus::Verified));

    // pending state was dropped back to the finalized genesis
    assert_eq!(net.chain.head(), (0, genesis_hash));
    assert_eq!(net.chain.block_status(&first.hash()), Some(BlockStatus::Rejected));

    let offender = proposer.address();
    let b1 = net.step(3);
    assert_eq!(b1.evidence.len(), 1);
    assert_eq!(net.chain.finalized_height(), 1);
    assert_eq!(net.chain.account(&offender).staked, 500_000);
    assert!(matches!(
        net.chain.validator(&offender).map(|v| v.status),
        Some(ValidatorStatus::Jailed { until: 101 })
    ));
}

#[test]
fn wrong_proposer_rejected() {
    let net = Devnet::new(4);
    let expected = net.next_proposer().address();
    let imposter = net.keys.iter().find(|k| k.address() != expected).unwrap().clone();
    assert!(matches!(
        net.chain.propose_block(imposter.as_ref(), 1),
        Err(ChainError::NotProposer { height: 1, .. })
    ));

    let cfg = config(4);
    let req = BuildRequest {
        height: 1,
        parent: net.chain.finalized_hash(),
        timestamp: 1,
        candidates: &[],
        evidence: Vec::new(),
        max_txs: 16,
    };
    let (forged, _) = build_block(imposter.as_ref(), &cfg.genesis_ledger().unwrap(), req, &cfg.ledger_params()).unwrap();
    assert!(matches!(
        net.chain.on_block_received(forged),
        Err(ChainError::Block(BlockError::WrongProposer { .. }))
    ));
    assert_eq!(net.chain.head().0, 0);
}

#[test]
fn restart_resumes_from_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chain.db");
    let cfg = config(1);
    let founder = Ed25519Keypair::from_label("founder");

    let tip = {
        let net = Devnet::open(&cfg, Arc::new(FileKvStore::open(&path).unwrap()));
        for h in 0..3u64 {
            net.chain.submit_transaction(transfer(&founder, h, Address([5; 20]), 100, 2)).unwrap();
            net.step(h + 1);
        }
        assert_eq!(net.chain.finalized_height(), 3);
        net.chain.finalized_hash()
    };

    let net = Devnet::open(&cfg, Arc::new(FileKvStore::open(&path).unwrap()));
    assert_eq!(net.chain.finalized_height(), 3);
    assert_eq!(net.chain.finalized_hash(), tip);
    assert_eq!(net.chain.balance(&Address([5; 20])), 300);
    assert_eq!(net.chain.account(&founder.address()).nonce, 3);
    assert!(net.chain.certificate(3).unwrap().is_some());

    net.chain.submit_transaction(transfer(&founder, 3, Address([5; 20]), 100, 2)).unwrap();
    let b4 = net.step(4);
    assert_eq!(b4.header.parent, tip);
    assert_eq!(net.chain.finalized_height(), 4);
    assert_eq!(net.chain.balance(&Address([5; 20])), 400);
}

#[test]
fn storage_failure_keeps_last_good_height() {
    let kv = Arc::new(MemKvStore::new());
    let cfg = config(1);
    let net = Devnet::open(&cfg, kv.clone());
    let founder = Ed25519Keypair::from_label("founder");
    net.chain.submit_transaction(transfer(&founder, 0, Address([8; 20]), 50, 1)).unwrap();

    let block = net.propose(1);
    kv.set_fail_writes(true);
    assert!(matches!(net.chain.on_block_received(block), Err(ChainError::Storage(_))));
    assert_eq!(net.chain.finalized_height(), 0);
    assert_eq!(net.chain.balance(&founder.address()), 10_000_000);
    assert!(net.events.0.lock().unwrap().finalized.is_empty());

    // a restart replays from the last committed height
    kv.set_fail_writes(false);
    drop(net);
    let net = Devnet::open(&cfg, kv);
    assert_eq!(net.chain.finalized_height(), 0);
    assert_eq!(net.chain.balance(&founder.address()), 10_000_000);
    net.chain.submit_transaction(transfer(&founder, 0, Address([8; 20]), 50, 1)).unwrap();
    net.step(1);
    assert_eq!(net.chain.balance(&Address([8; 20])), 50);
}

#[test]
fn unstake_releases_after_unbonding_period() {
    let mut cfg = config(2);
    cfg.consensus.unbonding_period_blocks = 3;
    let net = Devnet::open(&cfg, Arc::new(MemKvStore::new()));
    let v1 = net.keys[1].clone();

    net.chain.submit_transaction(signed(&v1, 0, TxKind::Unstake { amount: 400_000 })).unwrap();
    net.step(1);
    assert_eq!(net.chain.account(&v1.address()).staked, 600_000);
    assert_eq!(net.chain.balance(&v1.address()), 0);
    assert_eq!(net.chain.validator_set(2).unwrap().power_of(&v1.address()), 600_000);

    for t in 2..=4 {
        net.step(t);
    }
    assert_eq!(net.chain.balance(&v1.address()), 400_000);
    assert_eq!(net.chain.supply().total_supply, 102_000_000);
}

#[test]
fn unstaking_before_evidence_does_not_escape_penalty() {
    let net = Devnet::new(4);
    let offender = net.keys[1].clone();
    let b1 = net.step(1);
    assert_eq!(net.chain.finalized_height(), 1);

    // the conflicting vote stays off-chain until the offender has unbonded
    let honest = Vote::sign(offender.as_ref(), 1, b1.hash());
    let fork = Vote::sign(offender.as_ref(), 1, hash_bytes(b"fork"));
    net.chain.submit_transaction(signed(&offender, 0, TxKind::Unstake { amount: 1_000_000 })).unwrap();
    net.step(2);
    assert_eq!(net.chain.account(&offender.address()).staked, 0);

    let evidence = Evidence::double_vote(honest, fork);
    assert!(net.chain.on_evidence_received(evidence.clone()).is_accepted());
    let b3 = net.step(3);
    assert_eq!(b3.evidence, vec![evidence.clone()]);
    assert_eq!(net.chain.finalized_height(), 3);

    assert_eq!(net.chain.supply().burned, 500_000);
    assert_eq!(
        net.chain.evidence_status(&evidence.id()),
        Some(EvidenceStatus::Penalized { slashed: 500_000, new_stake: 0 })
    );

    // only the unslashed half comes back after unbonding
    for t in 4..=102 {
        net.step(t);
    }
    assert_eq!(net.chain.balance(&offender.address()), 500_000);
}

#[test]
fn delegation_counts_toward_voting_power() {
    let net = Devnet::new(2);
    let founder = Ed25519Keypair::from_label("founder");
    let target = net.keys[1].address();

    net.chain
        .submit_transaction(signed(&founder, 0, TxKind::Delegate { validator: target, amount: 500_000 }))
        .unwrap();
    net.step(1);
    assert_eq!(net.chain.balance(&founder.address()), 9_500_000);
    assert_eq!(net.chain.validator_set(2).unwrap().power_of(&target), 1_500_000);
    assert_eq!(net.chain.supply().total_staked, 2_500_000);

    net.chain
        .submit_transaction(signed(&founder, 1, TxKind::Undelegate { validator: target, amount: 500_000 }))
        .unwrap();
    net.step(2);
    assert_eq!(net.chain.validator_set(3).unwrap().power_of(&target), 1_000_000);
    assert_eq!(net.chain.balance(&founder.address()), 9_500_000);
}
