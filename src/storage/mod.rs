//! Key-value persistence.
//!
//! `KvStore` is the only storage seam: the chain writes every finalized block
//! as one `WriteBatch`, so either all of a block's keys land or none do.

pub mod chain_store;
pub mod file;
pub mod mem;

pub use chain_store::ChainStore;
pub use file::FileKvStore;
pub use mem::MemKvStore;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec: {0}")]
    Codec(#[from] bincode::Error),
    #[error("corrupt store: {0}")]
    Corrupt(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Ordered list of writes applied atomically.
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    ops: Vec<(Vec<u8>, Vec<u8>)>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: Vec<u8>) {
        self.ops.push((key.into(), value));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.ops
    }
}

pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    fn put(&self, key: &[u8], value: Vec<u8>) -> Result<(), StorageError> {
        let mut batch = WriteBatch::new();
        batch.put(key.to_vec(), value);
        self.atomic_batch(batch)
    }

    /// All writes become visible together, or none do.
    fn atomic_batch(&self, batch: WriteBatch) -> Result<(), StorageError>;

    /// Entries whose key starts with `prefix`, in key order.
    fn iterate_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;
}
