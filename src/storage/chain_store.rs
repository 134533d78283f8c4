//! Typed chain layout on top of a `KvStore`.
//!
//! | key                    | value                          |
//! |------------------------|--------------------------------|
//! | `acct/<address>`       | `Account`                      |
//! | `blk/<height BE>`      | `Block`                        |
//! | `hash/<block hash>`    | height (BE)                    |
//! | `cert/<height BE>`     | `FinalityCertificate`          |
//! | `evd/<evidence id>`    | `Evidence`                     |
//! | `meta/ledger`          | `LedgerAggregates`             |
//! | `meta/tip`             | `(Height, Hash32)`             |
//!
//! Heights are big-endian so prefix scans return blocks in height order.

use super::{KvStore, StorageError, WriteBatch};
use crate::consensus::finality::FinalityCertificate;
use crate::evidence::Evidence;
use crate::ledger::{Account, Ledger, LedgerAggregates};
use crate::types::{Address, Block, Hash32, Height};
use lru::LruCache;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;

const ACCT: &[u8] = b"acct/";
const BLK: &[u8] = b"blk/";
const HASH: &[u8] = b"hash/";
const CERT: &[u8] = b"cert/";
const EVD: &[u8] = b"evd/";
const META_LEDGER: &[u8] = b"meta/ledger";
const META_TIP: &[u8] = b"meta/tip";

const CACHE_SIZE: usize = 256;

fn key(prefix: &[u8], suffix: &[u8]) -> Vec<u8> {
    let mut k = Vec::with_capacity(prefix.len() + suffix.len());
    k.extend_from_slice(prefix);
    k.extend_from_slice(suffix);
    k
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    Ok(bincode::deserialize(bytes)?)
}

pub struct ChainStore {
    kv: Arc<dyn KvStore>,
    cache: Mutex<LruCache<Height, Block>>,
}

impl ChainStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        let cap = NonZeroUsize::new(CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Self { kv, cache: Mutex::new(LruCache::new(cap)) }
    }

    pub fn tip(&self) -> Result<Option<(Height, Hash32)>, StorageError> {
        self.kv.get(META_TIP)?.map(|b| decode(&b)).transpose()
    }

    fn put_block(&self, batch: &mut WriteBatch, block: &Block) -> Result<(), StorageError> {
        let height = block.height().to_be_bytes();
        batch.put(key(BLK, &height), bincode::serialize(block)?);
        batch.put(key(HASH, &block.hash().0), height.to_vec());
        for ev in &block.evidence {
            batch.put(key(EVD, &ev.id().0), bincode::serialize(ev)?);
        }
        Ok(())
    }

    fn put_ledger(
        &self,
        batch: &mut WriteBatch,
        accounts: impl IntoIterator<Item = (Address, Account)>,
        agg: &LedgerAggregates,
    ) -> Result<(), StorageError> {
        for (addr, acct) in accounts {
            batch.put(key(ACCT, &addr.0), bincode::serialize(&acct)?);
        }
        batch.put(META_LEDGER.to_vec(), bincode::serialize(agg)?);
        Ok(())
    }

    pub fn commit_genesis(&self, block: &Block, ledger: &Ledger) -> Result<(), StorageError> {
        let mut batch = WriteBatch::new();
        self.put_block(&mut batch, block)?;
        let accounts = ledger.accounts().iter().map(|(a, acct)| (*a, acct.clone()));
        self.put_ledger(&mut batch, accounts, ledger.aggregates())?;
        batch.put(META_TIP.to_vec(), bincode::serialize(&(block.height(), block.hash()))?);
        self.kv.atomic_batch(batch)?;
        self.cache.lock().put(block.height(), block.clone());
        Ok(())
    }

    /// Persist one finalized block and its post-state in a single batch.
    /// Only accounts that differ from `base` are rewritten.
    pub fn commit_block(
        &self,
        block: &Block,
        cert: Option<&FinalityCertificate>,
        ledger: &Ledger,
        base: &Ledger,
    ) -> Result<(), StorageError> {
        let mut batch = WriteBatch::new();
        self.put_block(&mut batch, block)?;
        if let Some(cert) = cert {
            batch.put(key(CERT, &cert.height.to_be_bytes()), bincode::serialize(cert)?);
        }
        self.put_ledger(&mut batch, ledger.changed_accounts(base), ledger.aggregates())?;
        batch.put(META_TIP.to_vec(), bincode::serialize(&(block.height(), block.hash()))?);
        let ops = batch.len();
        self.kv.atomic_batch(batch)?;
        self.cache.lock().put(block.height(), block.clone());
        debug!(height = block.height(), ops, "block persisted");
        Ok(())
    }

    pub fn load_ledger(&self) -> Result<Ledger, StorageError> {
        let agg: LedgerAggregates = match self.kv.get(META_LEDGER)? {
            Some(b) => decode(&b)?,
            None => return Err(StorageError::Corrupt("missing ledger record".into())),
        };
        let mut accounts = BTreeMap::new();
        for (k, v) in self.kv.iterate_prefix(ACCT)? {
            let raw: [u8; 20] = k[ACCT.len()..]
                .try_into()
                .map_err(|_| StorageError::Corrupt("bad account key".into()))?;
            accounts.insert(Address(raw), decode::<Account>(&v)?);
        }
        Ok(Ledger::from_parts(accounts, agg))
    }

    pub fn block(&self, height: Height) -> Result<Option<Block>, StorageError> {
        if let Some(b) = self.cache.lock().get(&height) {
            return Ok(Some(b.clone()));
        }
        let block: Option<Block> = self.kv.get(&key(BLK, &height.to_be_bytes()))?.map(|b| decode(&b)).transpose()?;
        if let Some(b) = &block {
            self.cache.lock().put(height, b.clone());
        }
        Ok(block)
    }

    pub fn block_by_hash(&self, hash: &Hash32) -> Result<Option<Block>, StorageError> {
        match self.kv.get(&key(HASH, &hash.0))? {
            Some(raw) => {
                let h: [u8; 8] = raw
                    .as_slice()
                    .try_into()
                    .map_err(|_| StorageError::Corrupt("bad hash index".into()))?;
                self.block(Height::from_be_bytes(h))
            }
            None => Ok(None),
        }
    }

    pub fn certificate(&self, height: Height) -> Result<Option<FinalityCertificate>, StorageError> {
        self.kv.get(&key(CERT, &height.to_be_bytes()))?.map(|b| decode(&b)).transpose()
    }

    pub fn evidence(&self, id: &Hash32) -> Result<Option<Evidence>, StorageError> {
        self.kv.get(&key(EVD, &id.0))?.map(|b| decode(&b)).transpose()
    }

    /// Most recent certificate at or below `height`.
    pub fn latest_certificate(&self, height: Height) -> Result<Option<FinalityCertificate>, StorageError> {
        let mut best = None;
        for (k, v) in self.kv.iterate_prefix(CERT)? {
            let raw: [u8; 8] = k[CERT.len()..]
                .try_into()
                .map_err(|_| StorageError::Corrupt("bad cert key".into()))?;
            if Height::from_be_bytes(raw) > height {
                break;
            }
            best = Some(v);
        }
        best.map(|b| decode(&b)).transpose()
    }
}
