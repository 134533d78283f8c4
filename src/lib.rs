//! Unicrium: a single-node proof-of-stake chain core.
//!
//! Accounts and stake live in the [`ledger`]; blocks are built and checked by
//! [`execution`]; [`consensus`] picks proposers and tracks 2/3 finality;
//! [`slashing`] turns equivocation [`evidence`] into stake burns. The
//! [`blockchain::Blockchain`] orchestrator ties them together over a
//! [`storage::KvStore`].

pub mod blockchain;
pub mod config;
pub mod consensus;
pub mod crypto;
pub mod evidence;
pub mod execution;
pub mod gas;
pub mod ledger;
pub mod mempool;
pub mod merkle;
pub mod slashing;
pub mod storage;
pub mod types;

pub use blockchain::{Blockchain, BlockStatus, ChainError, ChainObserver, NoopObserver};
pub use config::ChainConfig;
