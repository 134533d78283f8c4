//! TOML configuration for a Unicrium node.
//!
//! Loaded from `--config <path>`; a missing file means all defaults, which
//! describe a single-validator devnet. Every section is optional.

use crate::crypto::ed25519::Ed25519Keypair;
use crate::crypto::{PublicKeyBytes, Signer};
use crate::gas::GasSchedule;
use crate::ledger::{Ledger, LedgerError, LedgerParams};
use crate::types::{Address, Amount};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("parse: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid address {0:?}")]
    InvalidAddress(String),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("genesis entry needs exactly one of `{0}` or `label`")]
    Identity(&'static str),
    #[error("slash_double_sign_bps must be <= 10000, got {0}")]
    SlashBps(u64),
    #[error("genesis has no validators")]
    NoValidators,
    #[error("genesis: {0}")]
    Genesis(#[from] LedgerError),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub consensus: ConsensusSection,
    #[serde(default)]
    pub gas: GasSchedule,
    #[serde(default)]
    pub mempool: MempoolSection,
    #[serde(default)]
    pub genesis: GenesisSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    pub data_dir: String,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Hex ed25519 seed of the local validator.
    pub validator_seed: Option<String>,
    /// Dev key label of the local validator; ignored when a seed is set.
    pub validator_label: Option<String>,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            data_dir: "./data/unicrium".into(),
            log_level: "info".into(),
            validator_seed: None,
            validator_label: Some("validator-0".into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusSection {
    pub chain_id: u64,
    pub min_validator_stake: Amount,
    pub slash_double_sign_bps: u64,
    pub unbonding_period_blocks: u64,
    pub max_txs_per_block: usize,
    pub max_evidence_per_block: usize,
    /// Finalized heights of vote history kept in memory.
    pub vote_retention_heights: u64,
}

impl Default for ConsensusSection {
    fn default() -> Self {
        Self {
            chain_id: 1,
            min_validator_stake: 1,
            slash_double_sign_bps: 5_000,
            unbonding_period_blocks: 100,
            max_txs_per_block: 4_096,
            max_evidence_per_block: 16,
            vote_retention_heights: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolSection {
    pub capacity: usize,
}

impl Default for MempoolSection {
    fn default() -> Self {
        Self { capacity: 50_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisAccount {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    pub balance: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisValidator {
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    pub stake: Amount,
    #[serde(default)]
    pub balance: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisSection {
    pub timestamp: u64,
    pub accounts: Vec<GenesisAccount>,
    pub validators: Vec<GenesisValidator>,
}

impl Default for GenesisSection {
    fn default() -> Self {
        let acct = |label: &str, balance| GenesisAccount { address: None, label: Some(label.into()), balance };
        Self {
            timestamp: 0,
            accounts: vec![
                acct("faucet", 1_000_000),
                acct("founder", 10_000_000),
                acct("treasury", 89_000_000),
            ],
            validators: vec![GenesisValidator {
                public_key: None,
                label: Some("validator-0".into()),
                stake: 1_000_000,
                balance: 0,
            }],
        }
    }
}

impl GenesisAccount {
    pub fn resolve(&self) -> Result<Address, ConfigError> {
        match (&self.address, &self.label) {
            (Some(a), None) => Address::from_hex(a).ok_or_else(|| ConfigError::InvalidAddress(a.clone())),
            (None, Some(l)) => Ok(Ed25519Keypair::from_label(l).address()),
            _ => Err(ConfigError::Identity("address")),
        }
    }
}

impl GenesisValidator {
    pub fn resolve(&self) -> Result<PublicKeyBytes, ConfigError> {
        match (&self.public_key, &self.label) {
            (Some(pk), None) => {
                let pk = PublicKeyBytes::from_hex(pk).map_err(|e| ConfigError::InvalidKey(e.to_string()))?;
                if pk.0.len() != 32 {
                    return Err(ConfigError::InvalidKey(format!("expected 32 bytes, got {}", pk.0.len())));
                }
                Ok(pk)
            }
            (None, Some(l)) => Ok(Ed25519Keypair::from_label(l).public_key()),
            _ => Err(ConfigError::Identity("public_key")),
        }
    }
}

impl ChainConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        if !Path::new(path).exists() {
            return Ok(Self::default());
        }
        let s = std::fs::read_to_string(path)?;
        let cfg = Self::from_toml_str(&s)?;
        Ok(cfg)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: ChainConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.consensus.slash_double_sign_bps > 10_000 {
            return Err(ConfigError::SlashBps(self.consensus.slash_double_sign_bps));
        }
        if self.genesis.validators.is_empty() {
            return Err(ConfigError::NoValidators);
        }
        for a in &self.genesis.accounts {
            a.resolve()?;
        }
        for v in &self.genesis.validators {
            v.resolve()?;
        }
        Ok(())
    }

    pub fn ledger_params(&self) -> LedgerParams {
        LedgerParams {
            chain_id: self.consensus.chain_id,
            gas: self.gas.clone(),
            unbonding_period_blocks: self.consensus.unbonding_period_blocks,
            slash_bps: self.consensus.slash_double_sign_bps,
            min_validator_stake: self.consensus.min_validator_stake,
        }
    }

    pub fn genesis_ledger(&self) -> Result<Ledger, ConfigError> {
        let mut ledger = Ledger::new();
        for a in &self.genesis.accounts {
            ledger.credit_genesis(a.resolve()?, a.balance)?;
        }
        for v in &self.genesis.validators {
            let pk = v.resolve()?;
            ledger.credit_genesis(pk.address(), v.balance)?;
            ledger.bond_genesis(pk, v.stake)?;
        }
        Ok(ledger)
    }

    /// The local validator key, if one is configured.
    pub fn validator_key(&self) -> Result<Option<Ed25519Keypair>, ConfigError> {
        if let Some(seed) = &self.node.validator_seed {
            return Ed25519Keypair::from_seed_hex(seed)
                .map(Some)
                .map_err(|e| ConfigError::InvalidKey(e.to_string()));
        }
        Ok(self.node.validator_label.as_deref().map(Ed25519Keypair::from_label))
    }

    pub fn example_toml() -> &'static str {
        r#"# Unicrium node configuration
# All values shown are defaults.

[node]
data_dir        = "./data/unicrium"
log_level       = "info"              # overridden by RUST_LOG
validator_label = "validator-0"       # dev key; use validator_seed = "<64 hex>" otherwise

[consensus]
chain_id                = 1
min_validator_stake     = 1
slash_double_sign_bps   = 5000        # 50% of stake burned per offense
unbonding_period_blocks = 100         # also the jail length
max_txs_per_block       = 4096
max_evidence_per_block  = 16
vote_retention_heights  = 256

[gas]
transfer_base   = 21000
stake_base      = 40000
unstake_base    = 40000
delegate_base   = 40000
validator_base  = 60000
per_memo_byte   = 16
block_gas_limit = 10000000

[mempool]
capacity = 50000

[genesis]
timestamp = 0

[[genesis.accounts]]
label   = "faucet"
balance = 1000000

[[genesis.accounts]]
label   = "founder"
balance = 10000000

[[genesis.accounts]]
label   = "treasury"
balance = 89000000

[[genesis.validators]]
label = "validator-0"
stake = 1000000
"#
    }

    pub fn write_example(path: &str) -> std::io::Result<()> {
        std::fs::write(path, Self::example_toml())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_parses_to_defaults() {
        let cfg = ChainConfig::from_toml_str(ChainConfig::example_toml()).unwrap();
        let def = ChainConfig::default();
        assert_eq!(cfg.consensus.slash_double_sign_bps, def.consensus.slash_double_sign_bps);
        assert_eq!(cfg.gas, def.gas);
        assert_eq!(cfg.genesis.accounts.len(), 3);
        assert_eq!(
            cfg.genesis_ledger().unwrap().total_supply(),
            def.genesis_ledger().unwrap().total_supply()
        );
    }

    #[test]
    fn empty_file_is_default_devnet() {
        let cfg = ChainConfig::from_toml_str("").unwrap();
        let ledger = cfg.genesis_ledger().unwrap();
        assert_eq!(ledger.balance(&Ed25519Keypair::from_label("founder").address()), 10_000_000);
        assert_eq!(ledger.validator_set(1, 1).len(), 1);
        assert!(cfg.validator_key().unwrap().is_some());
    }

    #[test]
    fn rejects_bad_values() {
        let bad_bps = "[consensus]\nslash_double_sign_bps = 20000\n";
        assert!(matches!(ChainConfig::from_toml_str(bad_bps), Err(ConfigError::SlashBps(20000))));

        let bad_addr = "[[genesis.accounts]]\naddress = \"zz\"\nbalance = 1\n";
        assert!(matches!(ChainConfig::from_toml_str(bad_addr), Err(ConfigError::InvalidAddress(_))));

        let both = "[[genesis.accounts]]\naddress = \"00\"\nlabel = \"x\"\nbalance = 1\n";
        assert!(matches!(ChainConfig::from_toml_str(both), Err(ConfigError::Identity(_))));
    }
}
