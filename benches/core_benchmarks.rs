//! Criterion benchmarks for Unicrium core operations.
//!
//! Run: cargo bench --locked
//! Results written to target/criterion/

use std::sync::Arc;
use unicrium::consensus::finality::FinalityManager;
use unicrium::consensus::validator_set::{proposer_seed, select_proposer, Validator, ValidatorSet};
use unicrium::consensus::Vote;
use unicrium::crypto::ed25519::{verify, Ed25519Keypair};
use unicrium::crypto::tx::{sign_tx, tx_sign_bytes};
use unicrium::crypto::{PublicKeyBytes, SignatureBytes, Signer};
use unicrium::execution::execute_block;
use unicrium::ledger::{Ledger, LedgerParams};
use unicrium::mempool::Mempool;
use unicrium::merkle::{build_proof, build_tree, verify_proof};
use unicrium::types::{hash_bytes, Address, Hash32, Transaction, TxKind};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

// ── Helpers ──────────────────────────────────────────────────────────────

fn keypair(i: u64) -> Ed25519Keypair {
    Ed25519Keypair::from_label(&format!("bench-{i}"))
}

fn transfer(signer: &Ed25519Keypair, nonce: u64) -> Transaction {
    sign_tx(
        signer,
        Transaction {
            chain_id: 1,
            sender_pk: PublicKeyBytes::default(),
            nonce,
            fee: 1,
            gas_limit: 21_000,
            kind: TxKind::Transfer { to: Address([0xAB; 20]), amount: 1 },
            memo: Vec::new(),
            signature: SignatureBytes::default(),
        },
    )
}

fn funded_ledger(keys: &[Ed25519Keypair]) -> Ledger {
    let mut l = Ledger::new();
    for k in keys {
        l.credit_genesis(k.address(), 10_000_000_000).unwrap();
    }
    l
}

fn validator_set(n: u64) -> (Vec<Ed25519Keypair>, Arc<ValidatorSet>) {
    let keys: Vec<Ed25519Keypair> = (0..n).map(keypair).collect();
    let vals = keys
        .iter()
        .enumerate()
        .map(|(i, k)| Validator { address: k.address(), pk: k.public_key(), power: 100 + i as u64 })
        .collect();
    (keys, Arc::new(ValidatorSet::new(1, vals)))
}

// ── Finality benchmarks ─────────────────────────────────────────────────

fn bench_finality(c: &mut Criterion) {
    let mut group = c.benchmark_group("finality");

    for n in [4u64, 21, 100] {
        let (keys, vset) = validator_set(n);
        let block = hash_bytes(b"block");
        let votes: Vec<Vote> = keys.iter().map(|k| Vote::sign(k, 1, block)).collect();
        group.bench_with_input(BenchmarkId::new("record_votes", n), &votes, |b, votes| {
            b.iter(|| {
                let mut fm = FinalityManager::new(0, Hash32::zero());
                fm.register_validator_set(vset.clone());
                for v in votes {
                    if fm.record_vote(black_box(v)).unwrap() {
                        break;
                    }
                }
                fm.finalized_height()
            });
        });
    }

    group.finish();
}

// ── Execution benchmarks ────────────────────────────────────────────────

fn bench_execute_block(c: &mut Criterion) {
    let mut group = c.benchmark_group("execution");
    let params = LedgerParams::default();

    for n_txs in [1u64, 10, 64, 256] {
        let keys: Vec<Ed25519Keypair> = (0..n_txs).map(keypair).collect();
        let ledger = funded_ledger(&keys);
        let txs: Vec<Transaction> = keys.iter().map(|k| transfer(k, 0)).collect();
        group.bench_with_input(BenchmarkId::new("execute_block", n_txs), &txs, |b, txs| {
            b.iter(|| execute_block(black_box(&ledger), 1, &Address([1; 20]), txs, &[], &params).unwrap());
        });
    }

    group.finish();
}

fn bench_state_root(c: &mut Criterion) {
    let mut group = c.benchmark_group("state_root");

    for n in [10u64, 100, 1000] {
        let mut ledger = Ledger::new();
        for i in 0..n {
            let mut a = [0u8; 20];
            a[..8].copy_from_slice(&i.to_le_bytes());
            ledger.credit_genesis(Address(a), 1_000 + i).unwrap();
        }
        group.bench_with_input(BenchmarkId::new("compute", n), &ledger, |b, l| {
            b.iter(|| black_box(l.state_root()));
        });
    }

    group.finish();
}

// ── Signature verification benchmarks ───────────────────────────────────

fn bench_signature_verify(c: &mut Criterion) {
    let mut group = c.benchmark_group("signature");
    let tx = transfer(&keypair(99), 0);
    let msg = tx_sign_bytes(&tx);

    group.bench_function("verify_single", |b| {
        b.iter(|| verify(black_box(&tx.sender_pk), black_box(&msg), black_box(&tx.signature)).is_ok());
    });

    group.finish();
}

// ── Mempool benchmarks ──────────────────────────────────────────────────

fn bench_mempool(c: &mut Criterion) {
    let mut group = c.benchmark_group("mempool");
    let params = LedgerParams::default();
    let ledger = Ledger::new();
    let txs: Vec<Transaction> = (0..100u64).map(|i| transfer(&keypair(i), 0)).collect();

    group.bench_function("push_100", |b| {
        b.iter(|| {
            let mut pool = Mempool::new(10_000);
            for tx in &txs {
                pool.push(tx.clone(), &ledger, &params).unwrap();
            }
            black_box(pool.len())
        });
    });

    let mut pool = Mempool::new(10_000);
    for tx in &txs {
        pool.push(tx.clone(), &ledger, &params).unwrap();
    }
    group.bench_function("candidates_100", |b| {
        b.iter(|| black_box(pool.candidates()));
    });

    group.finish();
}

// ── Merkle / selection benchmarks ───────────────────────────────────────

fn bench_merkle(c: &mut Criterion) {
    let mut group = c.benchmark_group("merkle");
    let leaves: Vec<Hash32> = (0..1024u64).map(|i| hash_bytes(&i.to_le_bytes())).collect();

    group.bench_function("build_1024", |b| {
        b.iter(|| black_box(build_tree(&leaves).root()));
    });

    let tree = build_tree(&leaves);
    let root = tree.root();
    let proof = build_proof(&tree, 517).unwrap();
    group.bench_function("verify_proof_1024", |b| {
        b.iter(|| verify_proof(&root, black_box(&leaves[517]), &proof, 517));
    });

    group.finish();
}

fn bench_select_proposer(c: &mut Criterion) {
    let (_, vset) = validator_set(100);
    let seed = proposer_seed(&hash_bytes(b"parent"), 7);
    c.bench_function("select_proposer_100", |b| {
        b.iter(|| select_proposer(&vset, black_box(7), &seed).map(|v| v.address));
    });
}

criterion_group!(
    benches,
    bench_finality,
    bench_execute_block,
    bench_state_root,
    bench_signature_verify,
    bench_mempool,
    bench_merkle,
    bench_select_proposer,
);
criterion_main!(benches);
