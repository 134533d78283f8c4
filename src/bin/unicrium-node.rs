//! unicrium-node: local devnet driver.
//!
//! Runs a chain with every genesis validator key held in-process: each round
//! the selected proposer builds a block, the remaining validators vote on it,
//! and a faucet transfer is fed through the mempool.

use clap::Parser;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use unicrium::config::{ChainConfig, GenesisValidator};
use unicrium::consensus::{ConsensusMsg, FinalityCertificate, Vote};
use unicrium::crypto::ed25519::Ed25519Keypair;
use unicrium::crypto::tx::sign_tx;
use unicrium::crypto::{PublicKeyBytes, SignatureBytes, Signer};
use unicrium::slashing::PenaltyRecord;
use unicrium::storage::{FileKvStore, KvStore, MemKvStore};
use unicrium::types::{Address, Block, Transaction, TxKind};
use unicrium::{Blockchain, ChainObserver};

#[derive(Parser, Debug)]
#[command(name = "unicrium-node", about = "Unicrium proof-of-stake devnet node")]
struct Args {
    /// Path to TOML config file
    #[arg(long, default_value = "unicrium.toml")]
    config: String,

    /// Rounds to run before exiting
    #[arg(long, default_value_t = 10)]
    blocks: u64,

    /// Keep all state in memory instead of `node.data_dir`
    #[arg(long)]
    in_memory: bool,

    /// Replace genesis validators with `validator-0..N` dev keys of equal stake
    #[arg(long)]
    validators: Option<usize>,

    /// Write an annotated default config to `--config` and exit
    #[arg(long)]
    write_example: bool,

    /// Print a fresh validator seed and its address, then exit
    #[arg(long)]
    gen_key: bool,
}

struct LogObserver;

impl ChainObserver for LogObserver {
    fn on_block_finalized(&mut self, block: &Block, cert: Option<&FinalityCertificate>) {
        info!(
            height = block.height(),
            block = %block.hash(),
            signed_power = cert.map(|c| c.signed_power).unwrap_or(0),
            "finalized"
        );
    }

    fn on_validator_penalized(&mut self, p: &PenaltyRecord) {
        warn!(offender = %p.offender, slashed = p.slashed, jailed_until = p.jailed_until, "validator penalized");
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if args.gen_key {
        let kp = Ed25519Keypair::generate();
        println!("validator_seed = \"{}\"", hex::encode(kp.to_bytes()));
        println!("# address {}", kp.address());
        return Ok(());
    }
    if args.write_example {
        ChainConfig::write_example(&args.config)?;
        println!("wrote {}", args.config);
        return Ok(());
    }

    let mut cfg = ChainConfig::load(&args.config)?;
    if let Some(n) = args.validators {
        let stake = cfg.genesis.validators.first().map(|v| v.stake).unwrap_or(1_000_000);
        cfg.genesis.validators = (0..n.max(1))
            .map(|i| GenesisValidator { public_key: None, label: Some(format!("validator-{i}")), stake, balance: 0 })
            .collect();
    }

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.node.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let kv: Arc<dyn KvStore> = if args.in_memory {
        Arc::new(MemKvStore::new())
    } else {
        Arc::new(FileKvStore::open(&cfg.node.data_dir)?)
    };

    let mut keys: HashMap<Address, Arc<Ed25519Keypair>> = HashMap::new();
    for v in &cfg.genesis.validators {
        if let Some(label) = &v.label {
            let kp = Arc::new(Ed25519Keypair::from_label(label));
            keys.insert(kp.address(), kp);
        }
    }
    let local: Option<Arc<dyn Signer>> = match cfg.validator_key()? {
        Some(kp) => {
            let kp = Arc::new(kp);
            keys.insert(kp.address(), kp.clone());
            Some(kp as Arc<dyn Signer>)
        }
        None => None,
    };
    let local_addr = local.as_ref().map(|s| s.address());

    let chain = Blockchain::open(&cfg, kv, local, Box::new(LogObserver))?;
    info!(
        height = chain.finalized_height(),
        validators = cfg.genesis.validators.len(),
        chain_id = cfg.consensus.chain_id,
        "node started"
    );

    let faucet = Ed25519Keypair::from_label("faucet");
    let founder = Ed25519Keypair::from_label("founder").address();

    for round in 0..args.blocks {
        if let Err(e) = chain.submit_transaction(faucet_drip(&chain, &faucet, founder, round)) {
            warn!(error = %e, "faucet transfer not admitted");
        }

        let (head, _) = chain.head();
        let height = head + 1;
        let Some(proposer) = chain.expected_proposer(height) else {
            warn!(height, "no proposer available, stopping");
            break;
        };
        let Some(key) = keys.get(&proposer) else {
            warn!(height, %proposer, "proposer key not held locally, stopping");
            break;
        };
        let block = chain.propose_block(key.as_ref(), round + 1)?;
        let hash = block.hash();
        chain.on_block_received(block)?;

        if let Some(vset) = chain.validator_set(height) {
            for v in vset.vals.iter().filter(|v| Some(v.address) != local_addr) {
                if let Some(k) = keys.get(&v.address) {
                    chain.handle(ConsensusMsg::Vote(Vote::sign(k.as_ref(), height, hash)))?;
                }
            }
        }
    }

    let supply = chain.supply();
    let summary = serde_json::json!({
        "finalized_height": chain.finalized_height(),
        "finalized_hash": chain.finalized_hash().to_hex(),
        "total_supply": supply.total_supply,
        "total_staked": supply.total_staked,
        "burned": supply.burned,
        "mempool": chain.mempool_len(),
        "founder_balance": chain.balance(&founder),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn faucet_drip(chain: &Blockchain, faucet: &Ed25519Keypair, to: Address, round: u64) -> Transaction {
    let params = chain.params();
    let tx = Transaction {
        chain_id: params.chain_id,
        sender_pk: PublicKeyBytes::default(),
        nonce: chain.account(&faucet.address()).nonce,
        fee: 1,
        gas_limit: params.gas.transfer_base,
        kind: TxKind::Transfer { to, amount: 1 + round % 10 },
        memo: Vec::new(),
        signature: SignatureBytes::default(),
    };
    sign_tx(faucet, tx)
}
